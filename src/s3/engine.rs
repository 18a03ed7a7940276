//! Request execution
//!
//! Every call to the service goes through [`S3Client::execute`] or
//! [`S3Client::execute_stream`]:
//!
//! 1. validate the payload-hash token against the signing mode
//! 2. refresh credentials from the provider (fail closed)
//! 3. resolve the bucket region unless one was given
//! 4. resolve addressing, attach `x-amz-*` headers and sign
//! 5. send, then check the status against the expected set
//!
//! An unexpected status drops the bucket's cached region and decodes the body
//! into an [`S3Error`](super::S3Error). Nothing is retried here.

use super::addressing::{self, RequestOptions, SignedRequestOptions, DEFAULT_REGION};
use super::credentials::Credentials;
use super::error::decode_error;
use super::signer::{self, amz_date, hex_sha256, is_sha256_hex, UNSIGNED_PAYLOAD};
use super::{S3Client, S3ClientError};
use crate::metrics;
use bytes::Bytes;
use chrono::Utc;
use futures::future::BoxFuture;
use futures::Stream;
use reqwest::Method;
use std::collections::BTreeMap;
use std::pin::Pin;
use std::time::Instant;

/// Streaming request body
pub type BodyStream = Pin<Box<dyn Stream<Item = Result<Bytes, std::io::Error>> + Send>>;

/// In-memory request payload
#[derive(Debug, Clone, Default)]
pub struct Payload(Bytes);

impl Payload {
    pub fn empty() -> Self {
        Self(Bytes::new())
    }

    pub fn len(&self) -> usize {
        self.0.len()
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }

    pub fn into_bytes(self) -> Bytes {
        self.0
    }
}

impl From<Bytes> for Payload {
    fn from(bytes: Bytes) -> Self {
        Self(bytes)
    }
}

impl From<Vec<u8>> for Payload {
    fn from(bytes: Vec<u8>) -> Self {
        Self(Bytes::from(bytes))
    }
}

impl From<String> for Payload {
    fn from(text: String) -> Self {
        Self(Bytes::from(text))
    }
}

impl From<&'static str> for Payload {
    fn from(text: &'static str) -> Self {
        Self(Bytes::from_static(text.as_bytes()))
    }
}

/// Body accepted by [`S3Client::execute_stream`]
pub enum RequestBody {
    Bytes(Bytes),
    Stream(BodyStream),
}

impl RequestBody {
    pub fn empty() -> Self {
        Self::Bytes(Bytes::new())
    }

    pub fn from_stream<S>(stream: S) -> Self
    where
        S: Stream<Item = Result<Bytes, std::io::Error>> + Send + 'static,
    {
        Self::Stream(Box::pin(stream))
    }
}

impl From<RequestBody> for reqwest::Body {
    fn from(body: RequestBody) -> Self {
        match body {
            RequestBody::Bytes(bytes) => reqwest::Body::from(bytes),
            RequestBody::Stream(stream) => reqwest::Body::wrap_stream(stream),
        }
    }
}

impl std::fmt::Debug for RequestBody {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Bytes(bytes) => f.debug_tuple("Bytes").field(&bytes.len()).finish(),
            Self::Stream(_) => f.write_str("Stream"),
        }
    }
}

fn validate_status_codes(expected: &[u16]) -> Result<(), S3ClientError> {
    if expected.is_empty() {
        return Err(S3ClientError::InvalidArgument(
            "at least one expected status code is required".into(),
        ));
    }
    if let Some(code) = expected.iter().find(|c| !(100..=599).contains(*c)) {
        return Err(S3ClientError::InvalidArgument(format!(
            "expected status code {} is not a valid HTTP status",
            code
        )));
    }
    Ok(())
}

fn redacted_headers(headers: &BTreeMap<String, String>) -> BTreeMap<&str, String> {
    headers
        .iter()
        .map(|(name, value)| {
            let value = match name.as_str() {
                "authorization" => match value.split_once("Signature=") {
                    Some((head, _)) => format!("{}Signature=**REDACTED**", head),
                    None => "**REDACTED**".to_string(),
                },
                "x-amz-security-token" => "**REDACTED**".to_string(),
                _ => value.clone(),
            };
            (name.as_str(), value)
        })
        .collect()
}

impl S3Client {
    /// Execute a request with an in-memory payload
    ///
    /// Mutating methods get a `content-length` header; the payload is hashed
    /// when the client signs payloads with SHA-256.
    pub async fn execute(
        &self,
        mut opts: RequestOptions,
        payload: Payload,
        expected: &[u16],
        region: Option<&str>,
    ) -> Result<reqwest::Response, S3ClientError> {
        validate_status_codes(expected)?;

        if matches!(opts.method, Method::POST | Method::PUT | Method::DELETE) {
            opts.headers
                .insert("content-length".to_string(), payload.len().to_string());
        }

        let payload_hash = if self.is_sha256_signing() {
            hex_sha256(payload.as_bytes())
        } else {
            String::new()
        };

        self.execute_stream(
            opts,
            RequestBody::Bytes(payload.into_bytes()),
            &payload_hash,
            expected,
            region,
        )
        .await
    }

    /// Execute a request with a pre-computed payload-hash token
    ///
    /// `payload_hash` must be empty when the client does not sign payloads
    /// (anonymous or TLS) and a 64-character hex SHA-256 digest otherwise.
    pub async fn execute_stream(
        &self,
        opts: RequestOptions,
        body: RequestBody,
        payload_hash: &str,
        expected: &[u16],
        region: Option<&str>,
    ) -> Result<reqwest::Response, S3ClientError> {
        validate_status_codes(expected)?;

        let sha256_signing = self.is_sha256_signing();
        if !sha256_signing && !payload_hash.is_empty() {
            return Err(S3ClientError::InvalidArgument(
                "sha256 payload hash expected to be empty for anonymous or https requests".into(),
            ));
        }
        if sha256_signing && !is_sha256_hex(payload_hash) {
            return Err(S3ClientError::InvalidArgument(format!(
                "Invalid sha256 payload hash: {:?}",
                payload_hash
            )));
        }

        let credentials = self.refresh_credentials().await?;

        let region = match region.filter(|r| !r.is_empty()) {
            Some(region) => region.to_string(),
            None => self.resolve_region(opts.bucket.as_deref()).await?,
        };

        let mut signed =
            addressing::request_options(self.endpoint(), &opts, &region, self.user_agent())?;

        if !self.is_anonymous() {
            let hash = if sha256_signing {
                payload_hash
            } else {
                UNSIGNED_PAYLOAD
            };
            self.sign(&mut signed, &credentials, &region, hash)?;
        }

        let method = signed.method.clone();
        let mut request = self.http_client().request(method.clone(), signed.url());
        for (name, value) in &signed.headers {
            request = request.header(name.as_str(), value.as_str());
        }

        let start = Instant::now();
        let response = request.body(reqwest::Body::from(body)).send().await?;
        let status = response.status().as_u16();
        metrics::record_request(method.as_str(), status, start.elapsed().as_secs_f64());

        tracing::debug!(
            method = %method,
            host = %signed.host,
            path = %signed.path,
            headers = ?redacted_headers(&signed.headers),
            status = status,
            "S3 request"
        );

        if expected.contains(&status) {
            return Ok(response);
        }

        if let Some(bucket) = opts.bucket.as_deref() {
            self.region_cache().invalidate(bucket);
        }

        let headers = response.headers().clone();
        let text = response.text().await?;
        let mut err = decode_error(status, &headers, &text)?;
        if err.bucket_name.is_none() {
            err.bucket_name = opts.bucket.clone();
        }
        if err.key.is_none() {
            err.key = opts.object.clone();
        }
        if err.resource.is_none() {
            err.resource = Some(signed.resource().to_string());
        }

        tracing::debug!(
            status = status,
            code = %err.code,
            request_id = ?err.request_id,
            "S3 request failed"
        );
        Err(S3ClientError::S3(Box::new(err)))
    }

    /// Attach the `x-amz-*` headers and the `authorization` header
    fn sign(
        &self,
        signed: &mut SignedRequestOptions,
        credentials: &Credentials,
        region: &str,
        payload_hash: &str,
    ) -> Result<(), S3ClientError> {
        let date = Utc::now();
        signed
            .headers
            .insert("x-amz-date".to_string(), amz_date(date));
        signed
            .headers
            .insert("x-amz-content-sha256".to_string(), payload_hash.to_string());
        if let Some(token) = credentials.session_token() {
            signed
                .headers
                .insert("x-amz-security-token".to_string(), token.to_string());
        }

        let authorization = signer::sign_v4(
            signed,
            credentials.access_key_id(),
            credentials.secret_access_key(),
            region,
            date,
            payload_hash,
        )?;
        signed
            .headers
            .insert("authorization".to_string(), authorization);
        Ok(())
    }

    /// Region for a request that did not name one
    ///
    /// Boxed because region resolution itself executes requests.
    fn resolve_region<'a>(
        &'a self,
        bucket: Option<&'a str>,
    ) -> BoxFuture<'a, Result<String, S3ClientError>> {
        Box::pin(async move {
            match bucket.filter(|b| !b.is_empty()) {
                Some(bucket) => self.get_bucket_region(bucket).await,
                None => Ok(self.region().unwrap_or(DEFAULT_REGION).to_string()),
            }
        })
    }
}
