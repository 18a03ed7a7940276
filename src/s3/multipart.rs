//! Multipart protocol calls
//!
//! Single-shot wrappers over the request engine. None of these retry; the
//! orchestrator in [`crate::upload`] decides what to do with a failure.

use super::addressing::uri_escape;
use super::engine::Payload;
use super::error::S3Error;
use super::xml::{self, CompleteMultipartOutcome, ListUploadsPage, UploadedPart};
use super::{RequestOptions, S3Client, S3ClientError};
use base64::{engine::general_purpose::STANDARD, Engine};
use bytes::Bytes;
use md5::{Digest, Md5};
use reqwest::Method;
use std::collections::BTreeMap;

const X_AMZ_VERSION_ID: &str = "x-amz-version-id";

/// Uploads returned per listing page
const MAX_UPLOADS_PER_PAGE: u32 = 1000;

/// Hex MD5 digest, the form S3 uses for single-part etags
pub fn md5_hex(data: &[u8]) -> String {
    hex::encode(Md5::digest(data))
}

/// Base64 MD5 digest for the `Content-MD5` header
pub fn md5_base64(data: &[u8]) -> String {
    STANDARD.encode(Md5::digest(data))
}

/// One part of a multipart upload to complete
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletedPart {
    pub part_number: u32,
    pub etag: String,
}

impl CompletedPart {
    pub fn new(part_number: u32, etag: impl Into<String>) -> Self {
        Self {
            part_number,
            etag: etag.into(),
        }
    }
}

/// Result of a finished upload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletedUpload {
    pub etag: String,
    pub version_id: Option<String>,
}

fn version_id(response: &reqwest::Response) -> Option<String> {
    response
        .headers()
        .get(X_AMZ_VERSION_ID)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string)
}

fn response_etag(response: &reqwest::Response) -> String {
    response
        .headers()
        .get(reqwest::header::ETAG)
        .and_then(|v| v.to_str().ok())
        .map(xml::trim_etag)
        .unwrap_or_default()
}

impl S3Client {
    /// Start a multipart upload and return its upload id
    #[tracing::instrument(
        name = "s3.initiate_multipart_upload",
        skip(self, headers),
        fields(
            s3.bucket = %bucket,
            s3.key = %key,
            http.method = "POST",
            s3.upload_id = tracing::field::Empty
        ),
        err
    )]
    pub async fn initiate_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        headers: &BTreeMap<String, String>,
    ) -> Result<String, S3ClientError> {
        let mut opts = RequestOptions::new(Method::POST)
            .bucket(bucket)
            .object(key)
            .query("uploads");
        opts.headers.extend(headers.clone());

        let response = self.execute(opts, Payload::empty(), &[200], None).await?;
        let body = response.text().await?;
        let upload_id = xml::parse_initiate_multipart(&body)?;
        if upload_id.is_empty() {
            return Err(S3ClientError::ResponseError(
                "InitiateMultipartUpload response carries no UploadId".into(),
            ));
        }

        tracing::Span::current().record("s3.upload_id", upload_id.as_str());
        tracing::debug!(upload_id = %upload_id, "CreateMultipartUpload completed");
        Ok(upload_id)
    }

    /// Upload one part and return its etag without quotes
    #[tracing::instrument(
        name = "s3.upload_part",
        skip(self, data),
        fields(
            s3.bucket = %bucket,
            s3.key = %key,
            s3.upload_id = %upload_id,
            s3.part_number = part_number,
            http.method = "PUT",
            upload.bytes = data.len(),
            s3.etag = tracing::field::Empty
        ),
        err
    )]
    pub async fn upload_part(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        part_number: u32,
        data: Bytes,
    ) -> Result<String, S3ClientError> {
        if part_number == 0 {
            return Err(S3ClientError::InvalidArgument(
                "part number must be greater than 0".into(),
            ));
        }

        let opts = RequestOptions::new(Method::PUT)
            .bucket(bucket)
            .object(key)
            .query(format!(
                "partNumber={}&uploadId={}",
                part_number,
                uri_escape(upload_id)
            ))
            .header("Content-MD5", md5_base64(&data));

        let response = self.execute(opts, Payload::from(data), &[200], None).await?;
        let etag = response_etag(&response);

        tracing::Span::current().record("s3.etag", etag.as_str());
        Ok(etag)
    }

    /// Finish a multipart upload
    ///
    /// Parts are submitted in ascending part-number order. A `200` response
    /// may still carry an error document, which is returned as an
    /// [`S3ClientError::S3`].
    #[tracing::instrument(
        name = "s3.complete_multipart_upload",
        skip(self, parts),
        fields(
            s3.bucket = %bucket,
            s3.key = %key,
            s3.upload_id = %upload_id,
            http.method = "POST",
            parts_count = parts.len(),
            s3.etag = tracing::field::Empty
        ),
        err
    )]
    pub async fn complete_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
        parts: &[CompletedPart],
    ) -> Result<CompletedUpload, S3ClientError> {
        if upload_id.is_empty() {
            return Err(S3ClientError::InvalidArgument(
                "upload id must not be empty".into(),
            ));
        }

        let mut sorted: Vec<&CompletedPart> = parts.iter().collect();
        sorted.sort_by_key(|p| p.part_number);
        let body = xml::build_complete_multipart(
            sorted.iter().map(|p| (p.part_number, p.etag.as_str())),
        )?;

        let opts = RequestOptions::new(Method::POST)
            .bucket(bucket)
            .object(key)
            .query(format!("uploadId={}", uri_escape(upload_id)));

        let response = self
            .execute(opts, Payload::from(body), &[200], None)
            .await?;
        let version_id = version_id(&response);
        let text = response.text().await?;

        match xml::parse_complete_multipart(&text)? {
            Some(CompleteMultipartOutcome::Completed { etag, .. }) => {
                tracing::Span::current().record("s3.etag", etag.as_str());
                tracing::info!(
                    etag = %etag,
                    parts = parts.len(),
                    "CompleteMultipartUpload completed"
                );
                Ok(CompletedUpload { etag, version_id })
            }
            Some(CompleteMultipartOutcome::Failed { code, message }) => {
                self.region_cache().invalidate(bucket);
                let mut err = S3Error::new(code, message);
                err.status_code = 200;
                err.bucket_name = Some(bucket.to_string());
                err.key = Some(key.to_string());
                Err(err.into())
            }
            None => Err(S3ClientError::ResponseError(format!(
                "unexpected CompleteMultipartUpload response: {}",
                text
            ))),
        }
    }

    /// Abort a multipart upload
    #[tracing::instrument(
        name = "s3.abort_multipart_upload",
        skip(self),
        fields(s3.bucket = %bucket, s3.key = %key, s3.upload_id = %upload_id, http.method = "DELETE"),
        err
    )]
    pub async fn abort_multipart_upload(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
    ) -> Result<(), S3ClientError> {
        let opts = RequestOptions::new(Method::DELETE)
            .bucket(bucket)
            .object(key)
            .query(format!("uploadId={}", uri_escape(upload_id)));

        self.execute(opts, Payload::empty(), &[204], None).await?;
        tracing::info!(upload_id = %upload_id, "AbortMultipartUpload completed");
        Ok(())
    }

    /// One page of the incomplete uploads listing
    #[tracing::instrument(
        name = "s3.list_incomplete_uploads",
        skip(self, key_marker, upload_id_marker),
        fields(s3.bucket = %bucket, s3.prefix = %prefix),
        err
    )]
    pub async fn list_incomplete_uploads_page(
        &self,
        bucket: &str,
        prefix: &str,
        key_marker: &str,
        upload_id_marker: &str,
        delimiter: &str,
    ) -> Result<ListUploadsPage, S3ClientError> {
        let mut queries = vec![
            format!("prefix={}", uri_escape(prefix)),
            format!("delimiter={}", uri_escape(delimiter)),
            format!("max-uploads={}", MAX_UPLOADS_PER_PAGE),
        ];
        if !key_marker.is_empty() {
            queries.push(format!("key-marker={}", uri_escape(key_marker)));
        }
        if !upload_id_marker.is_empty() {
            queries.push(format!("upload-id-marker={}", upload_id_marker));
        }
        queries.sort();
        queries.insert(0, "uploads".to_string());

        let opts = RequestOptions::new(Method::GET)
            .bucket(bucket)
            .query(queries.join("&"));

        let response = self.execute(opts, Payload::empty(), &[200], None).await?;
        let body = response.text().await?;
        Ok(xml::parse_list_multipart(&body)?)
    }

    /// Every part uploaded so far, following `part-number-marker`
    #[tracing::instrument(
        name = "s3.list_parts",
        skip(self),
        fields(
            s3.bucket = %bucket,
            s3.key = %key,
            s3.upload_id = %upload_id,
            parts_count = tracing::field::Empty
        ),
        err
    )]
    pub async fn list_parts(
        &self,
        bucket: &str,
        key: &str,
        upload_id: &str,
    ) -> Result<Vec<UploadedPart>, S3ClientError> {
        let mut parts = Vec::new();
        let mut marker = 0u32;

        loop {
            let mut query = format!("uploadId={}", uri_escape(upload_id));
            if marker > 0 {
                query.push_str(&format!("&part-number-marker={}", marker));
            }
            let opts = RequestOptions::new(Method::GET)
                .bucket(bucket)
                .object(key)
                .query(query);

            let response = self.execute(opts, Payload::empty(), &[200], None).await?;
            let body = response.text().await?;
            let page = xml::parse_list_parts(&body)?;
            parts.extend(page.parts);

            if !page.is_truncated {
                break;
            }
            if page.next_part_number_marker <= marker {
                return Err(S3ClientError::ResponseError(format!(
                    "ListParts marker did not advance past {}",
                    marker
                )));
            }
            marker = page.next_part_number_marker;
        }

        tracing::Span::current().record("parts_count", parts.len());
        Ok(parts)
    }

    /// Upload an object with a single PUT
    #[tracing::instrument(
        name = "s3.put_object",
        skip(self, data, headers),
        fields(
            s3.bucket = %bucket,
            s3.key = %key,
            http.method = "PUT",
            upload.bytes = data.len(),
            s3.etag = tracing::field::Empty
        ),
        err
    )]
    pub async fn put_object_bytes(
        &self,
        bucket: &str,
        key: &str,
        data: Bytes,
        headers: &BTreeMap<String, String>,
    ) -> Result<CompletedUpload, S3ClientError> {
        let mut opts = RequestOptions::new(Method::PUT).bucket(bucket).object(key);
        opts.headers.extend(headers.clone());
        if !self.is_sha256_signing() {
            opts.headers
                .insert("content-md5".to_string(), md5_base64(&data));
        }

        let response = self.execute(opts, Payload::from(data), &[200], None).await?;
        let etag = response_etag(&response);
        let version_id = version_id(&response);

        tracing::Span::current().record("s3.etag", etag.as_str());
        tracing::info!(etag = %etag, "PutObject completed");
        Ok(CompletedUpload { etag, version_id })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_md5_digests() {
        assert_eq!(md5_hex(b""), "d41d8cd98f00b204e9800998ecf8427e");
        assert_eq!(md5_hex(b"hello"), "5d41402abc4b2a76b9719d911017c592");
        assert_eq!(md5_base64(b""), "1B2M2Y8AsgTpgAmY7PhCfg==");
    }

    #[test]
    fn test_completed_part() {
        let part = CompletedPart::new(3, "abc");
        assert_eq!(part.part_number, 3);
        assert_eq!(part.etag, "abc");
    }
}
