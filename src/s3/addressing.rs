//! Request addressing
//!
//! Decides between virtual-host-style (`bucket.host/object`) and path-style
//! (`host/bucket/object`) layouts and resolves the final host, port, path and
//! base headers of a request.

use super::S3ClientError;
use percent_encoding::{utf8_percent_encode, AsciiSet, NON_ALPHANUMERIC};
use reqwest::Method;
use std::collections::BTreeMap;

/// Characters escaped in URI components; only `A-Za-z0-9_.~-` survive
const URI_ESCAPE_SET: &AsciiSet = &NON_ALPHANUMERIC
    .remove(b'-')
    .remove(b'_')
    .remove(b'.')
    .remove(b'~');

/// Same as [`URI_ESCAPE_SET`] but keeps `/` for resource paths
const URI_RESOURCE_ESCAPE_SET: &AsciiSet = &URI_ESCAPE_SET.remove(b'/');

/// Region used when nothing else is known
pub const DEFAULT_REGION: &str = "us-east-1";

/// Percent-escape a query or path component
pub fn uri_escape(value: &str) -> String {
    utf8_percent_encode(value, URI_ESCAPE_SET).to_string()
}

/// Percent-escape an object name, leaving `/` intact
pub fn uri_resource_escape(value: &str) -> String {
    utf8_percent_encode(value, URI_RESOURCE_ESCAPE_SET).to_string()
}

/// Whether `host` is one of the canonical S3 endpoints
pub fn is_amazon_endpoint(host: &str) -> bool {
    host == "s3.amazonaws.com" || host == "s3.cn-north-1.amazonaws.com.cn"
}

/// Whether virtual-host-style addressing may be used for `bucket`
///
/// Dotted bucket names are never virtual-hosted over TLS since wildcard
/// certificates do not cover them.
pub fn is_virtual_host_style(host: &str, use_ssl: bool, bucket: &str, path_style: bool) -> bool {
    if use_ssl && bucket.contains('.') {
        return false;
    }
    // IP literals cannot carry a bucket label
    if host.parse::<std::net::IpAddr>().is_ok() {
        return false;
    }
    is_amazon_endpoint(host) || !path_style
}

/// S3 endpoint serving `region`
pub fn s3_endpoint(region: &str) -> String {
    match region {
        "" | DEFAULT_REGION => "s3.amazonaws.com".to_string(),
        r if r.starts_with("cn-") => format!("s3.{}.amazonaws.com.cn", r),
        r => format!("s3.{}.amazonaws.com", r),
    }
}

/// Whether `host` is a usable endpoint: an IP address or a DNS name
///
/// Schemes, paths and ports are not part of an endpoint.
pub fn is_valid_endpoint(host: &str) -> bool {
    if host.parse::<std::net::IpAddr>().is_ok() {
        return true;
    }
    if host.is_empty() || host.len() > 253 || host.starts_with('.') || host.ends_with('.') {
        return false;
    }
    host.split('.').all(|label| {
        !label.is_empty()
            && label.len() <= 63
            && !label.starts_with('-')
            && !label.ends_with('-')
            && label
                .chars()
                .all(|c| c.is_ascii_alphanumeric() || c == '-' || c == '_')
    })
}

/// Where and how the client reaches the service
#[derive(Debug, Clone)]
pub struct Endpoint {
    pub host: String,
    pub port: u16,
    pub use_ssl: bool,
    pub path_style: bool,
    pub accelerate_endpoint: Option<String>,
}

impl Endpoint {
    fn default_port(&self) -> u16 {
        if self.use_ssl {
            443
        } else {
            80
        }
    }

    fn scheme(&self) -> &'static str {
        if self.use_ssl {
            "https"
        } else {
            "http"
        }
    }

    /// Acceleration host for `bucket`/`object`, if acceleration applies
    fn accelerate_host(
        &self,
        bucket: Option<&str>,
        object: Option<&str>,
    ) -> Result<Option<&str>, S3ClientError> {
        let accelerate = match self.accelerate_endpoint.as_deref() {
            Some(endpoint) if !endpoint.is_empty() => endpoint,
            _ => return Ok(None),
        };

        match (bucket, object) {
            (Some(bucket), Some(object)) if !bucket.is_empty() && !object.is_empty() => {
                if bucket.contains('.') {
                    return Err(S3ClientError::InvalidArgument(format!(
                        "Transfer Acceleration is not supported for non compliant bucket: {}",
                        bucket
                    )));
                }
                Ok(Some(accelerate))
            }
            _ => Ok(None),
        }
    }
}

/// Caller's description of a request
#[derive(Debug, Clone)]
pub struct RequestOptions {
    pub method: Method,
    pub bucket: Option<String>,
    /// Unescaped object name
    pub object: Option<String>,
    /// Already-escaped query string without the leading `?`
    pub query: Option<String>,
    pub headers: BTreeMap<String, String>,
    /// Force path-style addressing for this request
    pub path_style: bool,
}

impl RequestOptions {
    pub fn new(method: Method) -> Self {
        Self {
            method,
            bucket: None,
            object: None,
            query: None,
            headers: BTreeMap::new(),
            path_style: false,
        }
    }

    pub fn bucket(mut self, bucket: impl Into<String>) -> Self {
        self.bucket = Some(bucket.into());
        self
    }

    pub fn object(mut self, object: impl Into<String>) -> Self {
        self.object = Some(object.into());
        self
    }

    pub fn query(mut self, query: impl Into<String>) -> Self {
        self.query = Some(query.into());
        self
    }

    pub fn header(mut self, name: impl Into<String>, value: impl Into<String>) -> Self {
        self.headers.insert(name.into(), value.into());
        self
    }

    pub fn force_path_style(mut self) -> Self {
        self.path_style = true;
        self
    }
}

/// Fully resolved request, ready to be signed and sent
#[derive(Debug, Clone)]
pub struct SignedRequestOptions {
    pub method: Method,
    pub scheme: &'static str,
    pub host: String,
    pub port: u16,
    /// Escaped path including the `?query` suffix
    pub path: String,
    /// Lower-cased header names
    pub headers: BTreeMap<String, String>,
}

impl SignedRequestOptions {
    /// Full URL of the request
    pub fn url(&self) -> String {
        format!("{}://{}:{}{}", self.scheme, self.host, self.port, self.path)
    }

    /// Path without the query string
    pub fn resource(&self) -> &str {
        self.path.split('?').next().unwrap_or_default()
    }

    /// Query string without the leading `?`
    pub fn query_string(&self) -> &str {
        self.path.split_once('?').map(|(_, q)| q).unwrap_or_default()
    }
}

/// Resolve host, path and base headers of a request
pub fn request_options(
    endpoint: &Endpoint,
    opts: &RequestOptions,
    region: &str,
    user_agent: &str,
) -> Result<SignedRequestOptions, S3ClientError> {
    let bucket = opts.bucket.as_deref().filter(|b| !b.is_empty());
    let object = opts
        .object
        .as_deref()
        .filter(|o| !o.is_empty())
        .map(uri_resource_escape);

    let virtual_host_style = bucket
        .map(|b| is_virtual_host_style(&endpoint.host, endpoint.use_ssl, b, endpoint.path_style))
        .unwrap_or(false);

    let mut host = endpoint.host.clone();
    if is_amazon_endpoint(&host) {
        host = match endpoint.accelerate_host(bucket, opts.object.as_deref())? {
            Some(accelerate) => accelerate.to_string(),
            None => s3_endpoint(region),
        };
    }

    let mut path = "/".to_string();
    if virtual_host_style && !opts.path_style {
        if let Some(bucket) = bucket {
            host = format!("{}.{}", bucket, host);
        }
        if let Some(object) = &object {
            path = format!("/{}", object);
        }
    } else {
        if let Some(bucket) = bucket {
            path = format!("/{}", bucket);
        }
        if let (Some(bucket), Some(object)) = (bucket, &object) {
            path = format!("/{}/{}", bucket, object);
        }
    }

    // IPv6 literals are bracketed in URLs and in the host header
    if host.parse::<std::net::Ipv6Addr>().is_ok() {
        host = format!("[{}]", host);
    }

    if let Some(query) = opts.query.as_deref().filter(|q| !q.is_empty()) {
        path.push('?');
        path.push_str(query);
    }

    let mut headers = BTreeMap::new();
    let host_header = if endpoint.port == endpoint.default_port() {
        host.clone()
    } else {
        format!("{}:{}", host, endpoint.port)
    };
    headers.insert("host".to_string(), host_header);
    headers.insert("user-agent".to_string(), user_agent.to_string());
    for (name, value) in &opts.headers {
        headers.insert(name.to_lowercase(), value.clone());
    }

    Ok(SignedRequestOptions {
        method: opts.method.clone(),
        scheme: endpoint.scheme(),
        host,
        port: endpoint.port,
        path,
        headers,
    })
}
