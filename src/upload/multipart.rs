//! Multipart upload handler
//!
//! Resumable multipart uploads. Before uploading, the handler looks for an
//! incomplete upload of the same object. When one exists its id is reused and
//! every chunk whose MD5 matches the etag of the already-uploaded part with the
//! same number is skipped, so a restarted upload only sends what changed.
//!
//! Any failure stops the whole upload. Nothing is completed with missing parts
//! and nothing is aborted automatically; call [`MultipartHandler::abort`] or
//! [`MultipartHandler::remove_incomplete_upload`] to clean up.

use super::chunker;
use super::plan::MAX_PARTS;
use super::{ObjectReader, UploadError, UploadResult};
use crate::metrics;
use crate::s3::multipart::{md5_hex, CompletedPart};
use crate::s3::{S3Client, UploadedPart};
use std::collections::{BTreeMap, HashMap};
use std::sync::Arc;

/// Lifecycle of one multipart upload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    NotStarted,
    /// An incomplete upload was found and is being resumed
    Discovered,
    Initiated,
    PartsInFlight,
    Completed,
    Aborted,
}

impl SessionState {
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Aborted)
    }

    fn can_transition_to(self, next: SessionState) -> bool {
        use SessionState::*;
        match (self, next) {
            (NotStarted, Discovered | Initiated) => true,
            (Discovered | Initiated, PartsInFlight) => true,
            (PartsInFlight, Completed) => true,
            (from, Aborted) => !from.is_terminal(),
            _ => false,
        }
    }
}

/// Multipart upload state
#[derive(Debug)]
pub struct MultipartSession {
    pub bucket: String,
    pub key: String,
    pub upload_id: Option<String>,
    pub parts: Vec<CompletedPart>,
    state: SessionState,
}

impl MultipartSession {
    pub fn new(bucket: &str, key: &str) -> Self {
        Self {
            bucket: bucket.to_string(),
            key: key.to_string(),
            upload_id: None,
            parts: Vec::new(),
            state: SessionState::NotStarted,
        }
    }

    pub fn state(&self) -> SessionState {
        self.state
    }

    fn transition(&mut self, next: SessionState) -> Result<(), UploadError> {
        if !self.state.can_transition_to(next) {
            return Err(UploadError::MultipartError(format!(
                "invalid session transition {:?} -> {:?}",
                self.state, next
            )));
        }
        tracing::trace!(from = ?self.state, to = ?next, "Multipart session transition");
        self.state = next;
        Ok(())
    }

    fn upload_id(&self) -> Result<&str, UploadError> {
        self.upload_id
            .as_deref()
            .ok_or_else(|| UploadError::MultipartError("session has no upload id".into()))
    }
}

/// Multipart upload handler
#[derive(Debug, Clone)]
pub struct MultipartHandler {
    client: Arc<S3Client>,
}

impl MultipartHandler {
    /// Create a new multipart handler
    pub fn new(client: Arc<S3Client>) -> Self {
        Self { client }
    }

    /// Id of the most recently initiated incomplete upload of `key`
    ///
    /// Scans the whole listing. A later upload replaces the current pick only
    /// when its initiation time is strictly greater, so ties keep the first
    /// one listed.
    #[tracing::instrument(
        name = "upload.multipart.find_upload_id",
        skip(self),
        fields(s3.bucket = %bucket, s3.key = %key, s3.upload_id = tracing::field::Empty),
        err
    )]
    pub async fn find_upload_id(&self, bucket: &str, key: &str) -> Result<Option<String>, UploadError> {
        let mut latest: Option<crate::s3::IncompleteUpload> = None;
        let mut key_marker = String::new();
        let mut upload_id_marker = String::new();

        loop {
            let page = self
                .client
                .list_incomplete_uploads_page(bucket, key, &key_marker, &upload_id_marker, "")
                .await?;

            for upload in page.uploads.into_iter().filter(|u| u.key == key) {
                let newer = latest
                    .as_ref()
                    .map_or(true, |current| upload.initiated > current.initiated);
                if newer {
                    latest = Some(upload);
                }
            }

            if !page.is_truncated {
                break;
            }
            if page.next_key_marker == key_marker && page.next_upload_id_marker == upload_id_marker {
                return Err(UploadError::MultipartError(
                    "incomplete uploads listing did not advance".into(),
                ));
            }
            key_marker = page.next_key_marker;
            upload_id_marker = page.next_upload_id_marker;
        }

        let upload_id = latest.map(|u| u.upload_id);
        if let Some(id) = &upload_id {
            tracing::Span::current().record("s3.upload_id", id.as_str());
        }
        Ok(upload_id)
    }

    /// Upload `reader` as `key` in `part_size` parts
    ///
    /// `headers` are only sent when a new upload is initiated; a resumed
    /// upload keeps the headers it was started with.
    pub async fn upload_stream(
        &self,
        bucket: &str,
        key: &str,
        headers: &BTreeMap<String, String>,
        reader: ObjectReader,
        part_size: u64,
    ) -> Result<UploadResult, UploadError> {
        self.upload_stream_sized(bucket, key, headers, reader, part_size, None)
            .await
    }

    /// Like [`upload_stream`](Self::upload_stream), for a reader declared to
    /// hold exactly `expected_size` bytes
    ///
    /// A reader that ends early or runs long fails the upload before
    /// completion, leaving it incomplete on the server.
    #[tracing::instrument(
        name = "upload.multipart",
        skip(self, headers, reader),
        fields(
            s3.bucket = %bucket,
            s3.key = %key,
            part_size = part_size,
            s3.upload_id = tracing::field::Empty,
            parts_count = tracing::field::Empty,
            parts_reused = tracing::field::Empty
        ),
        err
    )]
    pub async fn upload_stream_sized(
        &self,
        bucket: &str,
        key: &str,
        headers: &BTreeMap<String, String>,
        reader: ObjectReader,
        part_size: u64,
        expected_size: Option<u64>,
    ) -> Result<UploadResult, UploadError> {
        let chunk_size = usize::try_from(part_size)
            .map_err(|_| UploadError::InvalidArgument(format!("part size {} too large", part_size)))?;

        let mut session = MultipartSession::new(bucket, key);
        let old_parts = self.start(&mut session, headers).await?;
        let upload_id = session.upload_id()?.to_string();
        tracing::Span::current().record("s3.upload_id", upload_id.as_str());

        self.send_parts(&mut session, old_parts, reader, chunk_size, expected_size)
            .await
            .map_err(|source| UploadError::Interrupted {
                upload_id,
                source: Box::new(source),
            })
    }

    /// Upload every chunk of `reader` into the session's upload and complete it
    async fn send_parts(
        &self,
        session: &mut MultipartSession,
        old_parts: HashMap<u32, UploadedPart>,
        reader: ObjectReader,
        chunk_size: usize,
        expected_size: Option<u64>,
    ) -> Result<UploadResult, UploadError> {
        let bucket = session.bucket.clone();
        let key = session.key.clone();
        let upload_id = session.upload_id()?.to_string();
        let part_size = chunk_size as u64;

        session.transition(SessionState::PartsInFlight)?;

        let (tx, mut rx) = chunker::channel();
        let producer = chunker::produce_chunks(reader, chunk_size, tx);

        let client = &self.client;
        let (bucket, key) = (bucket.as_str(), key.as_str());
        let upload_id_ref = upload_id.as_str();
        let old_parts_ref = &old_parts;
        let consumer = async move {
            let mut parts = Vec::new();
            let mut reused = 0usize;
            let mut part_number = 0u32;

            while let Some(chunk) = rx.recv().await {
                part_number += 1;
                if u64::from(part_number) > MAX_PARTS {
                    return Err(UploadError::MultipartError(format!(
                        "object needs more than {} parts of {} bytes",
                        MAX_PARTS, part_size
                    )));
                }

                let digest = md5_hex(&chunk);
                if let Some(old) = old_parts_ref.get(&part_number) {
                    if old.etag == digest {
                        tracing::debug!(part_number = part_number, "Reusing uploaded part");
                        metrics::record_part("reused");
                        parts.push(CompletedPart::new(part_number, old.etag.clone()));
                        reused += 1;
                        continue;
                    }
                }

                let etag = client
                    .upload_part(bucket, key, upload_id_ref, part_number, chunk)
                    .await?;
                metrics::record_part("uploaded");
                parts.push(CompletedPart::new(part_number, etag));
            }

            Ok::<_, UploadError>((parts, reused))
        };

        let (bytes_written, (parts, reused)) = futures::try_join!(producer, consumer)?;
        if let Some(expected) = expected_size {
            if bytes_written != expected {
                return Err(UploadError::InvalidArgument(format!(
                    "stream ended after {} bytes, expected {}",
                    bytes_written, expected
                )));
            }
        }
        let span = tracing::Span::current();
        span.record("parts_count", parts.len());
        span.record("parts_reused", reused);
        session.parts = parts;

        let completed = self
            .client
            .complete_multipart_upload(bucket, key, &upload_id, &session.parts)
            .await?;
        session.transition(SessionState::Completed)?;

        tracing::info!(
            upload_id = %upload_id,
            parts = session.parts.len(),
            reused = reused,
            bytes = bytes_written,
            "Completed multipart upload"
        );

        Ok(UploadResult {
            etag: completed.etag,
            version_id: completed.version_id,
            bytes_written,
        })
    }

    /// Discover or initiate the upload and index the parts already uploaded
    async fn start(
        &self,
        session: &mut MultipartSession,
        headers: &BTreeMap<String, String>,
    ) -> Result<HashMap<u32, UploadedPart>, UploadError> {
        let bucket = session.bucket.clone();
        let key = session.key.clone();

        match self.find_upload_id(&bucket, &key).await? {
            Some(upload_id) => {
                let parts = self.client.list_parts(&bucket, &key, &upload_id).await?;
                tracing::info!(
                    upload_id = %upload_id,
                    parts = parts.len(),
                    "Resuming incomplete multipart upload"
                );
                session.upload_id = Some(upload_id);
                session.transition(SessionState::Discovered)?;
                Ok(parts.into_iter().map(|p| (p.part_number, p)).collect())
            }
            None => {
                let upload_id = self
                    .client
                    .initiate_multipart_upload(&bucket, &key, headers)
                    .await?;
                tracing::info!(upload_id = %upload_id, "Created multipart upload");
                session.upload_id = Some(upload_id);
                session.transition(SessionState::Initiated)?;
                Ok(HashMap::new())
            }
        }
    }

    /// Abort a multipart upload
    #[tracing::instrument(
        name = "upload.multipart.abort",
        skip(self, session),
        fields(s3.bucket = %session.bucket, s3.key = %session.key, s3.upload_id = ?session.upload_id),
        err
    )]
    pub async fn abort(&self, session: &mut MultipartSession) -> Result<(), UploadError> {
        if session.state().is_terminal() {
            return Err(UploadError::MultipartError(format!(
                "cannot abort a {:?} upload",
                session.state()
            )));
        }
        let upload_id = session.upload_id()?.to_string();
        self.client
            .abort_multipart_upload(&session.bucket, &session.key, &upload_id)
            .await?;
        session.transition(SessionState::Aborted)
    }

    /// Abort the incomplete upload of `key`, if there is one
    ///
    /// Returns the aborted upload id.
    pub async fn remove_incomplete_upload(
        &self,
        bucket: &str,
        key: &str,
    ) -> Result<Option<String>, UploadError> {
        let Some(upload_id) = self.find_upload_id(bucket, key).await? else {
            return Ok(None);
        };

        let mut session = MultipartSession::new(bucket, key);
        session.upload_id = Some(upload_id.clone());
        session.transition(SessionState::Discovered)?;
        self.abort(&mut session).await?;
        Ok(Some(upload_id))
    }
}
