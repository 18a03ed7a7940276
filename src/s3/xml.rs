//! XML documents exchanged with S3
//!
//! Pure functions turning response bodies into typed records, plus the
//! `CompleteMultipartUpload` request body builder.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use thiserror::Error;

/// Namespace of S3 request documents
pub const S3_XMLNS: &str = "http://s3.amazonaws.com/doc/2006-03-01/";

/// XML errors
#[derive(Error, Debug)]
pub enum XmlError {
    #[error("Failed to parse XML: {0}")]
    Parse(#[from] quick_xml::DeError),

    #[error("Failed to build XML: {0}")]
    Build(#[from] quick_xml::SeError),
}

/// Strip the surrounding quote characters S3 puts around etags
pub fn trim_etag(etag: &str) -> String {
    let etag = etag.strip_prefix('"').unwrap_or(etag);
    etag.strip_suffix('"').unwrap_or(etag).to_string()
}

/// Lift every child element of an `<Error>` document into a map keyed by
/// lower-cased element name
pub fn parse_error_fields(body: &str) -> Result<BTreeMap<String, String>, XmlError> {
    let raw: BTreeMap<String, String> = quick_xml::de::from_str(body)?;
    Ok(raw
        .into_iter()
        .filter(|(name, _)| !name.starts_with('@'))
        .map(|(name, value)| (name.to_lowercase(), value))
        .collect())
}

#[derive(Debug, Deserialize)]
struct LocationConstraint {
    #[serde(rename = "$text", default)]
    region: String,
}

/// Parse a `GetBucketLocation` body; `None` when the constraint is empty
pub fn parse_bucket_region(body: &str) -> Result<Option<String>, XmlError> {
    let doc: LocationConstraint = quick_xml::de::from_str(body)?;
    let region = doc.region.trim();
    Ok((!region.is_empty()).then(|| region.to_string()))
}

#[derive(Debug, Deserialize)]
struct InitiateMultipartUploadResult {
    #[serde(rename = "UploadId")]
    upload_id: String,
}

/// Parse the upload id out of an `InitiateMultipartUploadResult`
pub fn parse_initiate_multipart(body: &str) -> Result<String, XmlError> {
    let doc: InitiateMultipartUploadResult = quick_xml::de::from_str(body)?;
    Ok(doc.upload_id)
}

/// Outcome of a `CompleteMultipartUpload` call
///
/// The endpoint answers 200 even when the upload failed, so the body is
/// either a result or an embedded error.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CompleteMultipartOutcome {
    Completed {
        location: String,
        bucket: String,
        key: String,
        etag: String,
    },
    Failed {
        code: String,
        message: String,
    },
}

#[derive(Debug, Deserialize)]
struct CompleteMultipartUploadResponse {
    #[serde(rename = "Location")]
    location: Option<String>,
    #[serde(rename = "Bucket")]
    bucket: Option<String>,
    #[serde(rename = "Key")]
    key: Option<String>,
    #[serde(rename = "ETag")]
    etag: Option<String>,
    #[serde(rename = "Code")]
    code: Option<String>,
    #[serde(rename = "Message")]
    message: Option<String>,
}

/// Parse a `CompleteMultipartUpload` response body
///
/// Returns `Ok(None)` when the document is neither a result nor an error.
pub fn parse_complete_multipart(body: &str) -> Result<Option<CompleteMultipartOutcome>, XmlError> {
    let doc: CompleteMultipartUploadResponse = quick_xml::de::from_str(body)?;

    if let (Some(code), Some(message)) = (&doc.code, &doc.message) {
        return Ok(Some(CompleteMultipartOutcome::Failed {
            code: code.clone(),
            message: message.clone(),
        }));
    }

    // Some S3-compatible servers omit Location; the ETag alone marks success
    match doc.etag {
        Some(etag) => Ok(Some(CompleteMultipartOutcome::Completed {
            location: doc.location.unwrap_or_default(),
            bucket: doc.bucket.unwrap_or_default(),
            key: doc.key.unwrap_or_default(),
            etag: trim_etag(&etag),
        })),
        None => Ok(None),
    }
}

/// One in-progress multipart upload from a listing
#[derive(Debug, Clone, Deserialize)]
pub struct IncompleteUpload {
    #[serde(rename = "Key")]
    pub key: String,
    #[serde(rename = "UploadId")]
    pub upload_id: String,
    #[serde(rename = "Initiated")]
    pub initiated: DateTime<Utc>,
}

#[derive(Debug, Deserialize)]
struct CommonPrefix {
    #[serde(rename = "Prefix", default)]
    prefix: String,
}

#[derive(Debug, Deserialize)]
struct ListMultipartUploadsResult {
    #[serde(rename = "IsTruncated", default)]
    is_truncated: bool,
    #[serde(rename = "NextKeyMarker", default)]
    next_key_marker: String,
    #[serde(rename = "NextUploadIdMarker", default)]
    next_upload_id_marker: String,
    #[serde(rename = "Upload", default)]
    uploads: Vec<IncompleteUpload>,
    #[serde(rename = "CommonPrefixes", default)]
    common_prefixes: Vec<CommonPrefix>,
}

/// One page of `ListMultipartUploads`
#[derive(Debug, Clone, Default)]
pub struct ListUploadsPage {
    pub is_truncated: bool,
    pub next_key_marker: String,
    pub next_upload_id_marker: String,
    pub uploads: Vec<IncompleteUpload>,
    pub prefixes: Vec<String>,
}

/// Parse a `ListMultipartUploadsResult` page
pub fn parse_list_multipart(body: &str) -> Result<ListUploadsPage, XmlError> {
    let doc: ListMultipartUploadsResult = quick_xml::de::from_str(body)?;
    Ok(ListUploadsPage {
        is_truncated: doc.is_truncated,
        next_key_marker: doc.next_key_marker,
        next_upload_id_marker: doc.next_upload_id_marker,
        uploads: doc.uploads,
        prefixes: doc.common_prefixes.into_iter().map(|p| p.prefix).collect(),
    })
}

/// A part already stored for an in-progress upload
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadedPart {
    pub part_number: u32,
    /// Etag with surrounding quotes removed
    pub etag: String,
    pub size: u64,
}

#[derive(Debug, Deserialize)]
struct ListedPart {
    #[serde(rename = "PartNumber")]
    part_number: u32,
    #[serde(rename = "ETag")]
    etag: String,
    #[serde(rename = "Size", default)]
    size: u64,
}

#[derive(Debug, Deserialize)]
struct ListPartsResult {
    #[serde(rename = "IsTruncated", default)]
    is_truncated: bool,
    #[serde(rename = "NextPartNumberMarker", default)]
    next_part_number_marker: u32,
    #[serde(rename = "Part", default)]
    parts: Vec<ListedPart>,
}

/// One page of `ListParts`
#[derive(Debug, Clone, Default)]
pub struct ListPartsPage {
    pub is_truncated: bool,
    pub next_part_number_marker: u32,
    pub parts: Vec<UploadedPart>,
}

/// Parse a `ListPartsResult` page
pub fn parse_list_parts(body: &str) -> Result<ListPartsPage, XmlError> {
    let doc: ListPartsResult = quick_xml::de::from_str(body)?;
    Ok(ListPartsPage {
        is_truncated: doc.is_truncated,
        next_part_number_marker: doc.next_part_number_marker,
        parts: doc
            .parts
            .into_iter()
            .map(|p| UploadedPart {
                part_number: p.part_number,
                etag: trim_etag(&p.etag),
                size: p.size,
            })
            .collect(),
    })
}

#[derive(Debug, Serialize)]
#[serde(rename = "CompleteMultipartUpload")]
struct CompleteMultipartUpload<'a> {
    #[serde(rename = "@xmlns")]
    xmlns: &'static str,
    #[serde(rename = "Part")]
    parts: Vec<CompletePart<'a>>,
}

#[derive(Debug, Serialize)]
struct CompletePart<'a> {
    #[serde(rename = "PartNumber")]
    part_number: u32,
    #[serde(rename = "ETag")]
    etag: &'a str,
}

/// Build the `CompleteMultipartUpload` body from `(part number, etag)` pairs
///
/// Parts are written in the order given.
pub fn build_complete_multipart<'a, I>(parts: I) -> Result<String, XmlError>
where
    I: IntoIterator<Item = (u32, &'a str)>,
{
    let doc = CompleteMultipartUpload {
        xmlns: S3_XMLNS,
        parts: parts
            .into_iter()
            .map(|(part_number, etag)| CompletePart { part_number, etag })
            .collect(),
    };
    Ok(quick_xml::se::to_string(&doc)?)
}
