//! src/services/upload_service.rs
//!
//! UploadService — resumable chunked uploads. A client opens a session,
//! sends chunks in any order (retries are idempotent), polls which chunks the
//! server holds, and finally asks for completion, which assembles the chunks
//! into a PDF in `upload_dir`, validates it, records it and requests a
//! summary.
//!
//! Session lifecycle:
//!
//! ```text
//! init -> receiving (chunks, status polls) -> complete -> finalized
//!                                                    \-> rejected (session kept)
//! receiving --(older than TTL)--> expired (swept)
//! ```

use crate::{
    models::{
        pdf_file::NewPdfFile,
        session::{SessionMeta, SummaryStyle, UploadId},
        summary::NewSummary,
    },
    services::{
        pdf_repository::{PdfRepository, RepoError},
        session_locks::SessionLocks,
        session_store::{ChunkStream, SessionStore, StoreError},
        summarizer::{SummaryOutcome, Summarizer},
    },
};
use chrono::{Duration, Utc};
use std::{
    io::{self, ErrorKind},
    path::{Path, PathBuf},
    sync::Arc,
};
use thiserror::Error;
use tokio::{
    fs::{self, File},
    io::{AsyncReadExt, AsyncWriteExt},
};
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// Only PDFs are accepted.
const ACCEPTED_EXTENSION: &str = "pdf";
const PDF_SIGNATURE: &[u8] = b"%PDF-";
/// How much of the assembled file is inspected for the signature.
const SIGNATURE_PROBE_LEN: u64 = 1024;
const MAX_FILENAME_LEN: usize = 255;
const COPY_BUF_LEN: usize = 64 * 1024;
const STAGING_PREFIX: &str = ".assembling-";
const STAGING_SUFFIX: &str = ".tmp";

#[derive(Debug, Error)]
pub enum UploadError {
    #[error("invalid upload request: {0}")]
    InvalidSessionRequest(String),
    #[error("only .pdf files are accepted, got `{0}`")]
    UnsupportedFileType(String),
    #[error("file size {size} exceeds the {max} byte limit")]
    FileTooLarge { size: u64, max: u64 },
    #[error("upload session `{0}` not found")]
    SessionNotFound(String),
    #[error("chunk index {index} out of range for upload `{upload_id}`")]
    ChunkIndexOutOfRange { upload_id: String, index: u32 },
    #[error("chunk {index} size mismatch: expected {expected} bytes, got {actual}")]
    ChunkSizeMismatch {
        index: u32,
        expected: u64,
        actual: u64,
    },
    #[error("chunks incomplete, chunk {missing_chunk} is missing")]
    ChunksIncomplete { missing_chunk: u32 },
    #[error("failed to assemble upload: {0}")]
    AssemblyIo(#[source] io::Error),
    #[error("assembled file is not a valid PDF (signature mismatch)")]
    SignatureValidationFailed,
    #[error("assembled size {actual} does not match declared size {expected}")]
    FinalSizeMismatch { expected: u64, actual: u64 },
    #[error("failed to persist upload: {0}")]
    DownstreamPersistence(#[from] RepoError),
    #[error(transparent)]
    Store(#[from] StoreError),
}

pub type UploadResult<T> = Result<T, UploadError>;

/// Parameters of `init`, as received from the client.
///
/// Sizes are signed so that negative inputs surface as validation errors
/// rather than deserialization failures.
#[derive(Debug, Clone)]
pub struct NewSession {
    pub original_filename: String,
    pub file_size: i64,
    pub chunk_size: i64,
    pub total_chunks: i64,
    pub style: Option<String>,
    pub upload_id: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionTicket {
    pub upload_id: UploadId,
    pub chunk_size: u64,
    pub total_chunks: u32,
    pub style: SummaryStyle,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkReceipt {
    pub upload_id: UploadId,
    pub chunk_index: u32,
    pub already_uploaded: bool,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SessionStatus {
    pub upload_id: UploadId,
    pub received_indices: Vec<u32>,
    pub total_chunks: u32,
    pub chunk_size: u64,
    pub file_size: u64,
    pub original_filename: String,
    pub style: SummaryStyle,
}

/// Descriptor of a finalized upload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CompletedUpload {
    pub artifact_id: i64,
    pub filename: String,
    pub original_filename: String,
    pub style: SummaryStyle,
    pub summary_text: String,
    pub language: String,
    pub process_time_ms: i64,
    pub file_size: u64,
    pub checksum: String,
}

/// An assembled file that passed no checks yet.
struct StagedArtifact {
    path: PathBuf,
    checksum: String,
}

#[derive(Clone)]
pub struct UploadService {
    store: Arc<dyn SessionStore>,
    repo: Arc<dyn PdfRepository>,
    summarizer: Arc<dyn Summarizer>,
    locks: SessionLocks,

    /// Permanent directory for finalized PDFs.
    upload_dir: PathBuf,

    max_file_size: u64,
}

impl UploadService {
    pub fn new(
        store: Arc<dyn SessionStore>,
        repo: Arc<dyn PdfRepository>,
        summarizer: Arc<dyn Summarizer>,
        upload_dir: impl Into<PathBuf>,
        max_file_size: u64,
    ) -> Self {
        Self {
            store,
            repo,
            summarizer,
            locks: SessionLocks::new(),
            upload_dir: upload_dir.into(),
            max_file_size,
        }
    }

    pub fn upload_dir(&self) -> &Path {
        &self.upload_dir
    }

    pub fn repository(&self) -> &Arc<dyn PdfRepository> {
        &self.repo
    }

    /// Open (or reopen) an upload session.
    ///
    /// Reusing a client-supplied id rewrites the metadata in place, which is
    /// how clients resume after a restart. Nothing is persisted when
    /// validation fails.
    pub async fn init_session(&self, req: NewSession) -> UploadResult<SessionTicket> {
        let original_filename = validate_filename(&req.original_filename)?;
        if req.file_size <= 0 || req.chunk_size <= 0 || req.total_chunks <= 0 {
            return Err(UploadError::InvalidSessionRequest(
                "fileSize, chunkSize and totalChunks must be positive".into(),
            ));
        }
        ensure_pdf_extension(&original_filename)?;

        let file_size = req.file_size as u64;
        let chunk_size = req.chunk_size as u64;
        if file_size > self.max_file_size {
            return Err(UploadError::FileTooLarge {
                size: file_size,
                max: self.max_file_size,
            });
        }

        let total_chunks = u32::try_from(req.total_chunks).map_err(|_| {
            UploadError::InvalidSessionRequest("totalChunks is too large".into())
        })?;
        let implied = SessionMeta::chunk_count_for(file_size, chunk_size);
        if implied != Some(total_chunks) {
            return Err(UploadError::InvalidSessionRequest(format!(
                "totalChunks {} does not match fileSize {} split into {} byte chunks",
                total_chunks, file_size, chunk_size
            )));
        }

        let upload_id = match req.upload_id.as_deref().map(str::trim) {
            Some(raw) if !raw.is_empty() => UploadId::parse(raw)
                .map_err(|err| UploadError::InvalidSessionRequest(err.to_string()))?,
            _ => UploadId::generate(),
        };
        let style = SummaryStyle::normalize(req.style.as_deref().unwrap_or_default());

        let meta = SessionMeta {
            original_filename,
            file_size,
            chunk_size,
            total_chunks,
            style,
            created_at: Utc::now(),
        };
        self.store.put_meta(&upload_id, &meta).await?;

        info!(
            upload_id = %upload_id,
            file_size,
            chunk_size,
            total_chunks,
            style = %style,
            "upload session initialized"
        );

        Ok(SessionTicket {
            upload_id,
            chunk_size,
            total_chunks,
            style,
        })
    }

    /// Store one chunk.
    ///
    /// A chunk already on disk with the expected length is treated as a
    /// retry and left untouched. A chunk with the wrong length is discarded
    /// and replaced.
    pub async fn receive_chunk(
        &self,
        upload_id: &str,
        index: u32,
        data: ChunkStream<'_>,
    ) -> UploadResult<ChunkReceipt> {
        let id = parse_existing_id(upload_id)?;
        let meta = self.load_meta(&id).await?;
        let expected = meta.expected_chunk_size(index).map_err(|_| {
            UploadError::ChunkIndexOutOfRange {
                upload_id: id.to_string(),
                index,
            }
        })?;

        match self.store.chunk_len(&id, index).await? {
            Some(len) if len == expected => {
                debug!(upload_id = %id, chunk_index = index, "chunk already uploaded");
                return Ok(ChunkReceipt {
                    upload_id: id,
                    chunk_index: index,
                    already_uploaded: true,
                });
            }
            Some(len) => {
                warn!(
                    upload_id = %id,
                    chunk_index = index,
                    found = len,
                    expected,
                    "discarding partial chunk"
                );
                self.store.remove_chunk(&id, index).await?;
            }
            None => {}
        }

        let written = self.store.write_chunk(&id, index, data).await?;
        if written != expected {
            self.store.remove_chunk(&id, index).await?;
            return Err(UploadError::ChunkSizeMismatch {
                index,
                expected,
                actual: written,
            });
        }

        debug!(upload_id = %id, chunk_index = index, bytes = written, "chunk stored");
        Ok(ChunkReceipt {
            upload_id: id,
            chunk_index: index,
            already_uploaded: false,
        })
    }

    /// Which chunks the server holds, for client-driven resume.
    pub async fn status(&self, upload_id: &str) -> UploadResult<SessionStatus> {
        let id = parse_existing_id(upload_id)?;
        let meta = self.load_meta(&id).await?;
        let received_indices = self.store.list_chunks(&id).await?;

        Ok(SessionStatus {
            upload_id: id,
            received_indices,
            total_chunks: meta.total_chunks,
            chunk_size: meta.chunk_size,
            file_size: meta.file_size,
            original_filename: meta.original_filename,
            style: meta.style,
        })
    }

    /// Assemble, validate, record and summarize a fully uploaded session.
    ///
    /// Runs under the session lock. The session is deleted only after the
    /// upload has been recorded; any failure before that leaves it in place
    /// so the client can retry with the same id.
    pub async fn complete(&self, upload_id: &str) -> UploadResult<CompletedUpload> {
        let id = parse_existing_id(upload_id)?;
        let _guard = self.locks.acquire(&id).await;

        let meta = self.load_meta(&id).await?;
        for index in 0..meta.total_chunks {
            let expected = meta.expected_chunk_size(index).map_err(|_| {
                UploadError::ChunkIndexOutOfRange {
                    upload_id: id.to_string(),
                    index,
                }
            })?;
            if self.store.chunk_len(&id, index).await? != Some(expected) {
                return Err(UploadError::ChunksIncomplete {
                    missing_chunk: index,
                });
            }
        }

        fs::create_dir_all(&self.upload_dir)
            .await
            .map_err(UploadError::AssemblyIo)?;
        let staged = self.assemble(&id, &meta).await?;
        let file_size = match self.validate_artifact(&staged.path, &meta).await {
            Ok(size) => size,
            Err(err) => {
                warn!(upload_id = %id, error = %err, "rejecting assembled upload");
                discard_file(&staged.path).await;
                return Err(err);
            }
        };

        let now = Utc::now();
        let filename = artifact_file_name(now.timestamp(), &meta.original_filename);
        let final_path = self.upload_dir.join(&filename);
        if let Err(err) = fs::rename(&staged.path, &final_path).await {
            discard_file(&staged.path).await;
            return Err(UploadError::AssemblyIo(err));
        }

        let record = match self
            .repo
            .insert_pdf_file(&NewPdfFile {
                filename: filename.clone(),
                original_filename: meta.original_filename.clone(),
                filepath: final_path.to_string_lossy().into_owned(),
                filesize: file_size as i64,
                checksum: Some(staged.checksum.clone()),
                upload_time: now,
            })
            .await
        {
            Ok(record) => record,
            Err(err) => {
                error!(upload_id = %id, error = %err, "failed to record upload");
                discard_file(&final_path).await;
                return Err(UploadError::DownstreamPersistence(err));
            }
        };

        let outcome = match self.summarizer.summarize(&final_path, meta.style).await {
            Ok(outcome) => outcome,
            // Summarization is best effort: the upload is kept and the
            // placeholder summary is recorded in its place.
            Err(err) => {
                warn!(
                    upload_id = %id,
                    pdf_id = record.id,
                    error = %err,
                    "summarizer unavailable, storing fallback summary"
                );
                SummaryOutcome::fallback()
            }
        };

        if let Err(err) = self
            .repo
            .insert_summary(&NewSummary {
                pdf_id: record.id,
                summary_text: outcome.summary_text.clone(),
                summary_style: meta.style.as_str().to_string(),
                process_time_ms: outcome.process_time_ms,
                language_detected: Some(outcome.language.clone()),
            })
            .await
        {
            error!(upload_id = %id, pdf_id = record.id, error = %err, "failed to record summary");
            if let Err(undo) = self.repo.delete_pdf_file(record.id).await {
                error!(pdf_id = record.id, error = %undo, "failed to roll back pdf record");
            }
            discard_file(&final_path).await;
            return Err(UploadError::DownstreamPersistence(err));
        }

        if let Err(err) = self.store.remove_session(&id).await {
            warn!(upload_id = %id, error = %err, "failed to clean up finalized session");
        }

        info!(
            upload_id = %id,
            pdf_id = record.id,
            file_size,
            filename = %filename,
            "upload finalized"
        );

        Ok(CompletedUpload {
            artifact_id: record.id,
            filename,
            original_filename: meta.original_filename,
            style: meta.style,
            summary_text: outcome.summary_text,
            language: outcome.language,
            process_time_ms: outcome.process_time_ms,
            file_size,
            checksum: staged.checksum,
        })
    }

    /// Delete sessions created more than `ttl` ago, then stale staging files.
    /// Sessions whose lock is held (a completion in flight) are skipped.
    /// Returns how many sessions were removed.
    pub async fn sweep_expired(&self, ttl: Duration) -> UploadResult<usize> {
        let cutoff = Utc::now() - ttl;
        let mut removed = 0;

        for id in self.store.list_sessions().await? {
            let Some(_guard) = self.locks.try_acquire(&id) else {
                debug!(upload_id = %id, "session busy, skipping sweep");
                continue;
            };
            match self.store.get_meta(&id).await {
                Ok(Some(meta)) if meta.is_older_than(cutoff) => {
                    if let Err(err) = self.store.remove_session(&id).await {
                        warn!(upload_id = %id, error = %err, "failed to remove expired session");
                        continue;
                    }
                    removed += 1;
                    info!(upload_id = %id, created_at = %meta.created_at, "expired upload session removed");
                }
                Ok(_) => {}
                Err(err) => warn!(upload_id = %id, error = %err, "skipping unreadable session"),
            }
        }
        self.sweep_staging_files(ttl).await;
        Ok(removed)
    }

    /// Remove `.assembling-*.tmp` files left in `upload_dir` by an assembly
    /// that never finished. Files younger than `ttl` may belong to a running
    /// completion and are kept.
    async fn sweep_staging_files(&self, ttl: Duration) {
        let Ok(ttl) = ttl.to_std() else {
            return;
        };
        let mut entries = match fs::read_dir(&self.upload_dir).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == ErrorKind::NotFound => return,
            Err(err) => {
                warn!(error = %err, "could not scan upload dir for staging files");
                return;
            }
        };
        loop {
            let entry = match entries.next_entry().await {
                Ok(Some(entry)) => entry,
                Ok(None) => break,
                Err(err) => {
                    warn!(error = %err, "staging file scan aborted");
                    break;
                }
            };
            let name = entry.file_name();
            let Some(name) = name.to_str() else {
                continue;
            };
            if !is_staging_file_name(name) {
                continue;
            }
            let stale = match entry.metadata().await.and_then(|m| m.modified()) {
                Ok(modified) => modified.elapsed().is_ok_and(|age| age > ttl),
                Err(err) => {
                    warn!(file = name, error = %err, "could not stat staging file");
                    false
                }
            };
            if stale {
                info!(file = name, "removing abandoned staging file");
                discard_file(&entry.path()).await;
            }
        }
    }

    async fn load_meta(&self, id: &UploadId) -> UploadResult<SessionMeta> {
        self.store
            .get_meta(id)
            .await?
            .ok_or_else(|| UploadError::SessionNotFound(id.to_string()))
    }

    /// Concatenate all chunks in index order into a staging file inside
    /// `upload_dir`, computing the MD5 on the way.
    async fn assemble(&self, id: &UploadId, meta: &SessionMeta) -> UploadResult<StagedArtifact> {
        let path = self
            .upload_dir
            .join(format!("{}{}{}", STAGING_PREFIX, Uuid::new_v4(), STAGING_SUFFIX));
        match self.write_chunks_into(id, meta, &path).await {
            Ok(checksum) => Ok(StagedArtifact { path, checksum }),
            Err(err) => {
                discard_file(&path).await;
                Err(err)
            }
        }
    }

    async fn write_chunks_into(
        &self,
        id: &UploadId,
        meta: &SessionMeta,
        path: &Path,
    ) -> UploadResult<String> {
        let mut out = File::create(path).await.map_err(UploadError::AssemblyIo)?;
        let mut digest = md5::Context::new();
        let mut buf = vec![0u8; COPY_BUF_LEN];

        for index in 0..meta.total_chunks {
            let mut reader = self.store.open_chunk(id, index).await.map_err(|err| match err {
                StoreError::ChunkNotFound { index, .. } => UploadError::ChunksIncomplete {
                    missing_chunk: index,
                },
                StoreError::Io(err) => UploadError::AssemblyIo(err),
                other => UploadError::Store(other),
            })?;
            loop {
                let n = reader.read(&mut buf).await.map_err(UploadError::AssemblyIo)?;
                if n == 0 {
                    break;
                }
                digest.consume(&buf[..n]);
                out.write_all(&buf[..n])
                    .await
                    .map_err(UploadError::AssemblyIo)?;
            }
        }

        out.flush().await.map_err(UploadError::AssemblyIo)?;
        out.sync_all().await.map_err(UploadError::AssemblyIo)?;
        Ok(format!("{:x}", digest.compute()))
    }

    /// Check signature, declared size and size limit, in that order.
    /// Returns the artifact's length.
    async fn validate_artifact(&self, path: &Path, meta: &SessionMeta) -> UploadResult<u64> {
        let file = File::open(path).await.map_err(UploadError::AssemblyIo)?;
        let mut head = Vec::with_capacity(SIGNATURE_PROBE_LEN as usize);
        file.take(SIGNATURE_PROBE_LEN)
            .read_to_end(&mut head)
            .await
            .map_err(UploadError::AssemblyIo)?;
        if !has_pdf_signature(&head) {
            return Err(UploadError::SignatureValidationFailed);
        }

        let size = fs::metadata(path)
            .await
            .map_err(UploadError::AssemblyIo)?
            .len();
        if size != meta.file_size {
            return Err(UploadError::FinalSizeMismatch {
                expected: meta.file_size,
                actual: size,
            });
        }
        if size > self.max_file_size {
            return Err(UploadError::FileTooLarge {
                size,
                max: self.max_file_size,
            });
        }
        Ok(size)
    }
}

fn parse_existing_id(raw: &str) -> UploadResult<UploadId> {
    UploadId::parse(raw).map_err(|err| UploadError::InvalidSessionRequest(err.to_string()))
}

/// Reject names that could escape the upload directory.
fn validate_filename(raw: &str) -> UploadResult<String> {
    let name = raw.trim();
    if name.is_empty() {
        return Err(UploadError::InvalidSessionRequest(
            "originalFilename is required".into(),
        ));
    }
    if name.len() > MAX_FILENAME_LEN
        || name == "."
        || name == ".."
        || name
            .chars()
            .any(|c| c == '/' || c == '\\' || c.is_control())
    {
        return Err(UploadError::InvalidSessionRequest(format!(
            "originalFilename `{}` is not a plain file name",
            raw
        )));
    }
    Ok(name.to_string())
}

fn ensure_pdf_extension(name: &str) -> UploadResult<()> {
    let ext = Path::new(name)
        .extension()
        .and_then(|e| e.to_str())
        .unwrap_or_default();
    if ext.eq_ignore_ascii_case(ACCEPTED_EXTENSION) {
        Ok(())
    } else {
        Err(UploadError::UnsupportedFileType(name.to_string()))
    }
}

/// `%PDF-` after any leading NUL, whitespace or form feed bytes.
fn has_pdf_signature(head: &[u8]) -> bool {
    let start = head
        .iter()
        .position(|b| !matches!(b, b'\0' | b'\t' | b'\n' | b'\r' | b'\x0c' | b' '))
        .unwrap_or(head.len());
    head[start..].starts_with(PDF_SIGNATURE)
}

/// `<unix>_<8 hex>_<original>`; the random tag keeps same-second uploads of
/// the same name apart.
fn artifact_file_name(unix: i64, original: &str) -> String {
    let tag = Uuid::new_v4().simple().to_string();
    format!("{}_{}_{}", unix, &tag[..8], original)
}

fn is_staging_file_name(name: &str) -> bool {
    name.starts_with(STAGING_PREFIX) && name.ends_with(STAGING_SUFFIX)
}

async fn discard_file(path: &Path) {
    match fs::remove_file(path).await {
        Ok(_) => debug!("removed {}", path.display()),
        Err(err) if err.kind() == ErrorKind::NotFound => {}
        Err(err) => warn!("failed to remove {}: {}", path.display(), err),
    }
}
