//! PutObject handler
//!
//! Entry point for uploads. Objects that fit in one part are buffered and sent
//! with a single PUT; everything else goes through the multipart handler.
//!
//! # Example
//!
//! ```no_run
//! use mizuchi_s3::s3::{S3Client, S3ClientConfig};
//! use mizuchi_s3::upload::put_object::PutObjectHandler;
//! use mizuchi_s3::upload::{ObjectSource, PutObjectOptions, UploadHandler};
//! use std::sync::Arc;
//!
//! # async fn example() -> Result<(), Box<dyn std::error::Error>> {
//! let config = S3ClientConfig {
//!     endpoint: "s3.amazonaws.com".to_string(),
//!     access_key: Some("access-key".to_string()),
//!     secret_key: Some("secret-key".to_string()),
//!     ..Default::default()
//! };
//! let handler = PutObjectHandler::new(Arc::new(S3Client::new(config)?));
//!
//! let options = PutObjectOptions::default().with_content_type("text/plain");
//! let result = handler
//!     .upload("my-bucket", "hello.txt", ObjectSource::from("Hello, World!"), &options)
//!     .await?;
//! println!("Uploaded with ETag: {}", result.etag);
//! # Ok(())
//! # }
//! ```

use super::multipart::MultipartHandler;
use super::plan::{calculate_part_size, MAX_OBJECT_SIZE};
use super::{ObjectReader, ObjectSource, PutObjectOptions, ResolvedSource};
use super::{UploadError, UploadHandler, UploadResult};
use crate::metrics;
use crate::s3::S3Client;
use async_trait::async_trait;
use bytes::Bytes;
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Instant;
use tokio::io::AsyncReadExt;

/// Upload handler choosing between a single PUT and a multipart upload
#[derive(Debug, Clone)]
pub struct PutObjectHandler {
    client: Arc<S3Client>,
    multipart: MultipartHandler,
}

impl PutObjectHandler {
    /// Create a new PutObject handler
    pub fn new(client: Arc<S3Client>) -> Self {
        Self {
            multipart: MultipartHandler::new(client.clone()),
            client,
        }
    }

    pub fn multipart(&self) -> &MultipartHandler {
        &self.multipart
    }

    async fn put_single(
        &self,
        bucket: &str,
        key: &str,
        data: Bytes,
        headers: &BTreeMap<String, String>,
    ) -> Result<UploadResult, UploadError> {
        let bytes_written = data.len() as u64;
        let completed = self
            .client
            .put_object_bytes(bucket, key, data, headers)
            .await?;
        Ok(UploadResult {
            etag: completed.etag,
            version_id: completed.version_id,
            bytes_written,
        })
    }

    /// Upload a resolved source, returning the method used alongside
    async fn dispatch(
        &self,
        bucket: &str,
        key: &str,
        source: ResolvedSource,
        headers: &BTreeMap<String, String>,
    ) -> (&'static str, Result<UploadResult, UploadError>) {
        let override_size = self.client.part_size();

        match source {
            ResolvedSource::Inline(data) => {
                let size = data.len() as u64;
                let part_size = match calculate_part_size(size, override_size) {
                    Ok(part_size) => part_size,
                    Err(e) => return ("put", Err(e)),
                };
                if size <= part_size {
                    return ("put", self.put_single(bucket, key, data, headers).await);
                }
                let reader: ObjectReader = Box::new(std::io::Cursor::new(data));
                let result = self
                    .multipart
                    .upload_stream(bucket, key, headers, reader, part_size)
                    .await;
                ("multipart", result)
            }
            ResolvedSource::Reader { reader, size } => {
                // An override is taken on trust for unknown sizes; the
                // uploader stops at the part limit.
                let planned = match (size, override_size) {
                    (None, Some(part_size)) => Ok(part_size),
                    (size, override_size) => {
                        calculate_part_size(size.unwrap_or(MAX_OBJECT_SIZE), override_size)
                    }
                };
                let part_size = match planned {
                    Ok(part_size) => part_size,
                    Err(e) => return ("put", Err(e)),
                };

                match size {
                    Some(size) if size <= part_size => {
                        let result = match read_exact_size(reader, size).await {
                            Ok(data) => self.put_single(bucket, key, data, headers).await,
                            Err(e) => Err(e),
                        };
                        ("put", result)
                    }
                    Some(size) => {
                        let reader: ObjectReader = Box::new(reader.take(size));
                        let result = self
                            .multipart
                            .upload_stream_sized(bucket, key, headers, reader, part_size, Some(size))
                            .await;
                        ("multipart", result)
                    }
                    None => {
                        let result = self
                            .multipart
                            .upload_stream(bucket, key, headers, reader, part_size)
                            .await;
                        ("multipart", result)
                    }
                }
            }
        }
    }
}

/// Buffer exactly `size` bytes of `reader`
async fn read_exact_size(reader: ObjectReader, size: u64) -> Result<Bytes, UploadError> {
    let capacity = usize::try_from(size)
        .map_err(|_| UploadError::InvalidArgument(format!("size {} too large to buffer", size)))?;
    let mut data = Vec::with_capacity(capacity);
    reader.take(size).read_to_end(&mut data).await?;
    if data.len() as u64 != size {
        return Err(UploadError::InvalidArgument(format!(
            "stream ended after {} bytes, expected {}",
            data.len(),
            size
        )));
    }
    Ok(Bytes::from(data))
}

fn validate_names(bucket: &str, key: &str) -> Result<(), UploadError> {
    if bucket.is_empty() {
        return Err(UploadError::InvalidArgument("bucket name must not be empty".into()));
    }
    if key.is_empty() {
        return Err(UploadError::InvalidArgument("object name must not be empty".into()));
    }
    Ok(())
}

#[async_trait]
impl UploadHandler for PutObjectHandler {
    #[tracing::instrument(
        name = "upload.put_object",
        skip(self, source, options),
        fields(
            s3.bucket = %bucket,
            s3.key = %key,
            http.content_type = ?options.content_type,
            upload.method = tracing::field::Empty,
            // Result fields - will be set after operation
            s3.etag = tracing::field::Empty,
            upload.bytes_written = tracing::field::Empty
        ),
        err
    )]
    async fn upload(
        &self,
        bucket: &str,
        key: &str,
        source: ObjectSource,
        options: &PutObjectOptions,
    ) -> Result<UploadResult, UploadError> {
        validate_names(bucket, key)?;
        if let ObjectSource::Stream { size: Some(size), .. } = &source {
            if *size > MAX_OBJECT_SIZE {
                return Err(UploadError::ObjectTooLarge {
                    size: *size,
                    max: MAX_OBJECT_SIZE,
                });
            }
        }

        let start_time = Instant::now();
        let headers = options.headers();
        let resolved = source.resolve().await?;
        let (method, upload_result) = self.dispatch(bucket, key, resolved, &headers).await;
        let duration = start_time.elapsed();

        let span = tracing::Span::current();
        span.record("upload.method", method);

        match upload_result {
            Ok(result) => {
                metrics::record_upload(method, true, result.bytes_written);
                span.record("s3.etag", result.etag.as_str());
                span.record("upload.bytes_written", result.bytes_written);

                tracing::info!(
                    etag = %result.etag,
                    method = method,
                    bytes_written = result.bytes_written,
                    duration_ms = duration.as_millis(),
                    "Upload completed"
                );
                Ok(result)
            }
            Err(e) => {
                metrics::record_upload(method, false, 0);
                tracing::error!(
                    error = %e,
                    method = method,
                    duration_ms = duration.as_millis(),
                    "Upload failed"
                );
                Err(e)
            }
        }
    }
}
