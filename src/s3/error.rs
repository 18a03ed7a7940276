//! S3 error responses
//!
//! Converts a non-success response into an [`S3Error`]. A body with an
//! `<Error>` document has every child element lifted onto the error; an empty
//! body falls back to a fixed status-code table. Malformed XML is reported as
//! a parse failure rather than swallowed.

use super::xml::{self, XmlError};
use reqwest::header::HeaderMap;
use std::collections::BTreeMap;
use std::fmt;

/// Header carrying the request id of a failed call
pub const X_AMZ_REQUEST_ID: &str = "x-amz-request-id";

/// Header carrying the extended request id of a failed call
pub const X_AMZ_ID_2: &str = "x-amz-id-2";

/// Header carrying the region a bucket lives in
pub const X_AMZ_BUCKET_REGION: &str = "x-amz-bucket-region";

/// Error code returned when a request was signed for the wrong region
pub const REGION_MISMATCH_CODE: &str = "AuthorizationHeaderMalformed";

/// Typed service error decoded from an S3 response
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct S3Error {
    /// Machine-readable error code (`NoSuchBucket`, `AccessDenied`, ...)
    pub code: String,
    pub message: String,
    /// Region hint carried in the error body
    pub region: Option<String>,
    pub request_id: Option<String>,
    pub host_id: Option<String>,
    /// Region reported through the `x-amz-bucket-region` header
    pub bucket_region: Option<String>,
    pub resource: Option<String>,
    pub bucket_name: Option<String>,
    pub key: Option<String>,
    /// HTTP status of the failed response; 200 for errors embedded in a success
    pub status_code: u16,
    /// Every child of `<Error>`, keyed by lower-cased element name
    pub fields: BTreeMap<String, String>,
}

impl S3Error {
    /// Create an error with just a code and message
    pub fn new(code: impl Into<String>, message: impl Into<String>) -> Self {
        Self {
            code: code.into(),
            message: message.into(),
            ..Default::default()
        }
    }

    /// Build an error from the lower-cased children of an `<Error>` element
    pub fn from_fields(fields: BTreeMap<String, String>, status_code: u16) -> Self {
        let get = |name: &str| fields.get(name).filter(|v| !v.is_empty()).cloned();

        Self {
            code: get("code").unwrap_or_default(),
            message: get("message").unwrap_or_default(),
            region: get("region"),
            request_id: get("requestid"),
            host_id: get("hostid"),
            bucket_region: None,
            resource: get("resource"),
            bucket_name: get("bucketname"),
            key: get("key"),
            status_code,
            fields,
        }
    }

    /// Whether this is the region-mismatch error used for region bootstrap
    pub fn is_region_mismatch(&self) -> bool {
        self.code == REGION_MISMATCH_CODE
    }

    fn with_headers(mut self, headers: &HeaderMap) -> Self {
        let header = |name: &str| {
            headers
                .get(name)
                .and_then(|v| v.to_str().ok())
                .filter(|v| !v.is_empty())
                .map(str::to_string)
        };

        if let Some(request_id) = header(X_AMZ_REQUEST_ID) {
            self.request_id = Some(request_id);
        }
        if let Some(host_id) = header(X_AMZ_ID_2) {
            self.host_id = Some(host_id);
        }
        self.bucket_region = header(X_AMZ_BUCKET_REGION);
        self
    }
}

impl fmt::Display for S3Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        if self.message.is_empty() {
            write!(f, "{}", self.code)
        } else {
            write!(f, "{}: {}", self.code, self.message)
        }
    }
}

impl std::error::Error for S3Error {}

/// Code and message synthesized for a failed response without a body
pub fn status_code_error(status_code: u16) -> (&'static str, String) {
    match status_code {
        301 => ("MovedPermanently", "Moved Permanently".to_string()),
        307 => (
            "TemporaryRedirect",
            "Are you using the correct endpoint URL?".to_string(),
        ),
        403 => (
            "AccessDenied",
            "Valid and authorized credentials required".to_string(),
        ),
        404 => ("NotFound", "Not Found".to_string()),
        405 | 501 => ("MethodNotAllowed", "Method Not Allowed".to_string()),
        other => ("UnknownError", other.to_string()),
    }
}

/// Decode a failed response into an [`S3Error`]
///
/// `body` is the already-drained response body. An empty body produces an
/// error from [`status_code_error`]; anything else must be an `<Error>`
/// document.
pub fn decode_error(status_code: u16, headers: &HeaderMap, body: &str) -> Result<S3Error, XmlError> {
    if body.trim().is_empty() {
        let (code, message) = status_code_error(status_code);
        let mut err = S3Error::new(code, message).with_headers(headers);
        err.status_code = status_code;
        return Ok(err);
    }

    let fields = xml::parse_error_fields(body)?;
    let mut err = S3Error::from_fields(fields, status_code).with_headers(headers);
    if err.code.is_empty() {
        let (code, message) = status_code_error(status_code);
        err.code = code.to_string();
        if err.message.is_empty() {
            err.message = message;
        }
    }
    Ok(err)
}
