//! Metrics module
//!
//! Provides Prometheus metrics for S3 requests and uploads. Collectors live in
//! the default registry; [`render`] encodes them in the text exposition format.

use lazy_static::lazy_static;
use prometheus::{
    register_counter, register_counter_vec, register_histogram_vec, Counter, CounterVec,
    Encoder, HistogramVec, TextEncoder,
};

lazy_static! {
    // Request metrics
    pub static ref REQUESTS_TOTAL: CounterVec = register_counter_vec!(
        "mizuchi_s3_requests_total",
        "Total number of S3 requests by method and response status",
        &["method", "status"]
    ).unwrap();

    pub static ref REQUEST_DURATION: HistogramVec = register_histogram_vec!(
        "mizuchi_s3_request_duration_seconds",
        "S3 request duration in seconds",
        &["method"],
        vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0, 10.0, 30.0]
    ).unwrap();

    // Region metrics
    pub static ref REGION_LOOKUPS: CounterVec = register_counter_vec!(
        "mizuchi_s3_region_lookups_total",
        "Bucket region resolutions by result",
        &["result"]  // "cached", "resolved", "retried" or "failure"
    ).unwrap();

    // Upload metrics
    pub static ref UPLOADS_TOTAL: CounterVec = register_counter_vec!(
        "mizuchi_s3_uploads_total",
        "Total number of uploads",
        &["method", "status"]
    ).unwrap();

    pub static ref MULTIPART_PARTS: CounterVec = register_counter_vec!(
        "mizuchi_s3_multipart_parts_total",
        "Multipart parts by outcome",
        &["outcome"]  // "uploaded" or "reused"
    ).unwrap();

    pub static ref UPLOAD_BYTES_TOTAL: Counter = register_counter!(
        "mizuchi_s3_upload_bytes_total",
        "Total bytes uploaded"
    ).unwrap();
}

/// Record one executed request
pub fn record_request(method: &str, status: u16, duration_secs: f64) {
    let status = status.to_string();
    REQUESTS_TOTAL
        .with_label_values(&[method, status.as_str()])
        .inc();
    REQUEST_DURATION
        .with_label_values(&[method])
        .observe(duration_secs);
}

/// Record a bucket region resolution
pub fn record_region_lookup(result: &str) {
    REGION_LOOKUPS.with_label_values(&[result]).inc();
}

/// Record a finished upload; `method` is `put` or `multipart`
pub fn record_upload(method: &str, success: bool, bytes: u64) {
    let status = if success { "success" } else { "failure" };
    UPLOADS_TOTAL.with_label_values(&[method, status]).inc();
    if success {
        UPLOAD_BYTES_TOTAL.inc_by(bytes as f64);
    }
}

/// Record a multipart part that was uploaded or reused from a prior attempt
pub fn record_part(outcome: &str) {
    MULTIPART_PARTS.with_label_values(&[outcome]).inc();
}

/// Encode all registered metrics in the Prometheus text format
pub fn render() -> String {
    let encoder = TextEncoder::new();
    let mut buffer = Vec::new();
    if let Err(e) = encoder.encode(&prometheus::gather(), &mut buffer) {
        tracing::warn!(error = %e, "Failed to encode metrics");
        return String::new();
    }
    String::from_utf8_lossy(&buffer).into_owned()
}
