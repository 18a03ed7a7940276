//! Upload module
//!
//! Drives object uploads on top of the S3 client: a single PUT for objects
//! that fit in one part, a resumable multipart upload otherwise.

use crate::s3::S3ClientError;
use bytes::Bytes;
use std::collections::BTreeMap;
use std::path::PathBuf;
use thiserror::Error;
use tokio::io::AsyncRead;

pub mod chunker;
pub mod multipart;
pub mod plan;
pub mod put_object;

/// Upload errors
#[derive(Error, Debug)]
pub enum UploadError {
    #[error("S3 error: {0}")]
    S3Error(#[from] S3ClientError),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Object size {size} exceeds the maximum of {max} bytes")]
    ObjectTooLarge { size: u64, max: u64 },

    #[error("Multipart upload error: {0}")]
    MultipartError(String),

    /// A multipart upload failed after it was initiated or discovered
    ///
    /// The upload stays on the server under `upload_id` until it is resumed
    /// or aborted.
    #[error("Multipart upload {upload_id} interrupted: {source}")]
    Interrupted {
        upload_id: String,
        #[source]
        source: Box<UploadError>,
    },
}

impl UploadError {
    /// Machine-readable service error code, if the failure came from S3
    pub fn code(&self) -> Option<&str> {
        match self {
            Self::S3Error(err) => err.code(),
            Self::Interrupted { source, .. } => source.code(),
            _ => None,
        }
    }

    /// Id of the multipart upload left behind by this failure
    pub fn upload_id(&self) -> Option<&str> {
        match self {
            Self::Interrupted { upload_id, .. } => Some(upload_id),
            _ => None,
        }
    }
}

/// Upload result
#[derive(Debug, Clone)]
pub struct UploadResult {
    pub etag: String,
    pub version_id: Option<String>,
    pub bytes_written: u64,
}

/// Boxed async byte source
pub type ObjectReader = Box<dyn AsyncRead + Send + Unpin>;

/// Data to upload
pub enum ObjectSource {
    Bytes(Bytes),
    Text(String),
    /// A reader with a known or unknown length
    Stream {
        reader: ObjectReader,
        size: Option<u64>,
    },
    /// A local file, stat-ed for its length
    File(PathBuf),
}

impl ObjectSource {
    pub fn stream<R>(reader: R, size: Option<u64>) -> Self
    where
        R: AsyncRead + Send + Unpin + 'static,
    {
        Self::Stream {
            reader: Box::new(reader),
            size,
        }
    }

    /// Resolve into a single representation before planning
    pub(crate) async fn resolve(self) -> Result<ResolvedSource, UploadError> {
        Ok(match self {
            Self::Bytes(bytes) => ResolvedSource::Inline(bytes),
            Self::Text(text) => ResolvedSource::Inline(Bytes::from(text)),
            Self::Stream { reader, size } => ResolvedSource::Reader { reader, size },
            Self::File(path) => {
                let file = tokio::fs::File::open(&path).await?;
                let size = file.metadata().await?.len();
                ResolvedSource::Reader {
                    reader: Box::new(file),
                    size: Some(size),
                }
            }
        })
    }
}

impl std::fmt::Debug for ObjectSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Bytes(bytes) => f.debug_tuple("Bytes").field(&bytes.len()).finish(),
            Self::Text(text) => f.debug_tuple("Text").field(&text.len()).finish(),
            Self::Stream { size, .. } => f.debug_struct("Stream").field("size", size).finish(),
            Self::File(path) => f.debug_tuple("File").field(path).finish(),
        }
    }
}

impl From<Bytes> for ObjectSource {
    fn from(bytes: Bytes) -> Self {
        Self::Bytes(bytes)
    }
}

impl From<Vec<u8>> for ObjectSource {
    fn from(bytes: Vec<u8>) -> Self {
        Self::Bytes(Bytes::from(bytes))
    }
}

impl From<String> for ObjectSource {
    fn from(text: String) -> Self {
        Self::Text(text)
    }
}

impl From<&str> for ObjectSource {
    fn from(text: &str) -> Self {
        Self::Text(text.to_string())
    }
}

impl From<PathBuf> for ObjectSource {
    fn from(path: PathBuf) -> Self {
        Self::File(path)
    }
}

pub(crate) enum ResolvedSource {
    Inline(Bytes),
    Reader {
        reader: ObjectReader,
        size: Option<u64>,
    },
}

pub const DEFAULT_CONTENT_TYPE: &str = "application/octet-stream";

const SUPPORTED_HEADERS: &[&str] = &[
    "content-type",
    "cache-control",
    "content-encoding",
    "content-disposition",
    "content-language",
    "x-amz-website-redirect-location",
];

/// Whether `name` is sent as is rather than as user metadata
fn is_passthrough_header(name: &str) -> bool {
    let name = name.to_ascii_lowercase();
    SUPPORTED_HEADERS.contains(&name.as_str())
        || name.starts_with("x-amz-meta-")
        || name == "x-amz-acl"
        || name == "x-amz-storage-class"
        || name.starts_with("x-amz-server-side-encryption")
}

/// Per-upload options
#[derive(Debug, Clone, Default)]
pub struct PutObjectOptions {
    pub content_type: Option<String>,
    /// User metadata; keys that are not standard headers get `X-Amz-Meta-`
    pub metadata: BTreeMap<String, String>,
}

impl PutObjectOptions {
    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.metadata.insert(key.into(), value.into());
        self
    }

    /// Request headers carrying the content type and metadata
    pub fn headers(&self) -> BTreeMap<String, String> {
        let mut headers: BTreeMap<String, String> = self
            .metadata
            .iter()
            .map(|(key, value)| {
                let name = if is_passthrough_header(key) {
                    key.clone()
                } else {
                    format!("X-Amz-Meta-{}", key)
                };
                (name, value.clone())
            })
            .collect();

        let has_content_type = headers
            .keys()
            .any(|k| k.eq_ignore_ascii_case("content-type"));
        if let Some(content_type) = &self.content_type {
            headers.retain(|k, _| !k.eq_ignore_ascii_case("content-type"));
            headers.insert("Content-Type".to_string(), content_type.clone());
        } else if !has_content_type {
            headers.insert("Content-Type".to_string(), DEFAULT_CONTENT_TYPE.to_string());
        }
        headers
    }
}

/// Upload handler trait
#[async_trait::async_trait]
pub trait UploadHandler: Send + Sync {
    /// Handle upload
    async fn upload(
        &self,
        bucket: &str,
        key: &str,
        source: ObjectSource,
        options: &PutObjectOptions,
    ) -> Result<UploadResult, UploadError>;
}
