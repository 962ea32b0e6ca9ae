//! src/services/session_store.rs
//!
//! Session state for in-flight chunked uploads. The [`SessionStore`] trait
//! hides where sessions live; [`FsSessionStore`] keeps one directory per
//! upload beneath `base_path`:
//!
//! ```text
//! base_path/{upload_id}/meta.json
//! base_path/{upload_id}/00000000.part
//! base_path/{upload_id}/00000001.part
//! ```
//!
//! Chunk and metadata files are always written to a temporary sibling,
//! fsynced and renamed into place, so readers never observe a torn file.

use crate::models::session::{SessionMeta, UploadId};
use async_trait::async_trait;
use bytes::Bytes;
use futures::{StreamExt, stream::BoxStream};
use std::{
    io::{self, ErrorKind},
    path::{Path, PathBuf},
    pin::Pin,
};
use thiserror::Error;
use tokio::{
    fs::{self, File},
    io::{AsyncRead, AsyncWriteExt},
};
use tracing::debug;
use uuid::Uuid;

const META_FILE: &str = "meta.json";
const CHUNK_SUFFIX: &str = ".part";

/// Incoming chunk payload.
pub type ChunkStream<'a> = BoxStream<'a, io::Result<Bytes>>;

/// Reader over one stored chunk.
pub type ChunkReader = Pin<Box<dyn AsyncRead + Send>>;

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("chunk {index} of upload `{upload_id}` not found")]
    ChunkNotFound { upload_id: String, index: u32 },
    #[error("metadata for upload `{upload_id}` is unreadable: {source}")]
    CorruptMeta {
        upload_id: String,
        #[source]
        source: serde_json::Error,
    },
    #[error(transparent)]
    Io(#[from] io::Error),
}

pub type StoreResult<T> = Result<T, StoreError>;

/// Durable per-session storage for metadata and chunk files.
#[async_trait]
pub trait SessionStore: Send + Sync {
    /// Create the session if needed and (re)write its metadata atomically.
    async fn put_meta(&self, id: &UploadId, meta: &SessionMeta) -> StoreResult<()>;

    /// Metadata for `id`, or `None` if the session does not exist.
    async fn get_meta(&self, id: &UploadId) -> StoreResult<Option<SessionMeta>>;

    /// Length of the stored chunk, or `None` when absent.
    async fn chunk_len(&self, id: &UploadId, index: u32) -> StoreResult<Option<u64>>;

    /// Atomically replace chunk `index` with the streamed bytes.
    /// Returns the number of bytes written.
    async fn write_chunk(
        &self,
        id: &UploadId,
        index: u32,
        data: ChunkStream<'_>,
    ) -> StoreResult<u64>;

    /// Delete chunk `index`. Missing chunks are not an error.
    async fn remove_chunk(&self, id: &UploadId, index: u32) -> StoreResult<()>;

    /// Indices of all stored chunks, ascending and unique.
    async fn list_chunks(&self, id: &UploadId) -> StoreResult<Vec<u32>>;

    async fn open_chunk(&self, id: &UploadId, index: u32) -> StoreResult<ChunkReader>;

    /// Delete the session with all of its chunks. Missing sessions are not an error.
    async fn remove_session(&self, id: &UploadId) -> StoreResult<()>;

    /// Ids of every session currently held.
    async fn list_sessions(&self) -> StoreResult<Vec<UploadId>>;
}

/// File name for chunk `index`; zero padding keeps lexicographic order numeric.
pub fn chunk_file_name(index: u32) -> String {
    format!("{:08}{}", index, CHUNK_SUFFIX)
}

/// Inverse of [`chunk_file_name`]. Anything else in a session directory
/// (metadata, temp files) yields `None`.
pub fn parse_chunk_file_name(name: &str) -> Option<u32> {
    let stem = name.strip_suffix(CHUNK_SUFFIX)?;
    if stem.len() < 8 || !stem.bytes().all(|b| b.is_ascii_digit()) {
        return None;
    }
    stem.parse().ok()
}

/// Filesystem-backed session store.
#[derive(Clone, Debug)]
pub struct FsSessionStore {
    /// Root directory holding one subdirectory per session.
    base_path: PathBuf,
}

impl FsSessionStore {
    pub fn new(base_path: impl Into<PathBuf>) -> Self {
        Self {
            base_path: base_path.into(),
        }
    }

    pub fn base_path(&self) -> &Path {
        &self.base_path
    }

    fn session_dir(&self, id: &UploadId) -> PathBuf {
        self.base_path.join(id.as_str())
    }

    fn meta_path(&self, id: &UploadId) -> PathBuf {
        self.session_dir(id).join(META_FILE)
    }

    fn chunk_path(&self, id: &UploadId, index: u32) -> PathBuf {
        self.session_dir(id).join(chunk_file_name(index))
    }
}

#[async_trait]
impl SessionStore for FsSessionStore {
    async fn put_meta(&self, id: &UploadId, meta: &SessionMeta) -> StoreResult<()> {
        let dir = self.session_dir(id);
        fs::create_dir_all(&dir).await?;

        let body = serde_json::to_vec(meta).map_err(io::Error::other)?;
        let tmp_path = dir.join(format!(".meta-{}.tmp", Uuid::new_v4()));
        let data: ChunkStream<'_> = futures::stream::iter([Ok(Bytes::from(body))]).boxed();
        write_atomic(&tmp_path, &self.meta_path(id), data).await?;
        Ok(())
    }

    async fn get_meta(&self, id: &UploadId) -> StoreResult<Option<SessionMeta>> {
        let raw = match fs::read(self.meta_path(id)).await {
            Ok(raw) => raw,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(None),
            Err(err) => return Err(StoreError::Io(err)),
        };
        serde_json::from_slice(&raw)
            .map(Some)
            .map_err(|source| StoreError::CorruptMeta {
                upload_id: id.to_string(),
                source,
            })
    }

    async fn chunk_len(&self, id: &UploadId, index: u32) -> StoreResult<Option<u64>> {
        match fs::metadata(self.chunk_path(id, index)).await {
            Ok(meta) if meta.is_file() => Ok(Some(meta.len())),
            Ok(_) => Ok(None),
            Err(err) if err.kind() == ErrorKind::NotFound => Ok(None),
            Err(err) => Err(StoreError::Io(err)),
        }
    }

    async fn write_chunk(
        &self,
        id: &UploadId,
        index: u32,
        data: ChunkStream<'_>,
    ) -> StoreResult<u64> {
        let tmp_path = self
            .session_dir(id)
            .join(format!(".chunk-{}.tmp", Uuid::new_v4()));
        let written = write_atomic(&tmp_path, &self.chunk_path(id, index), data).await?;
        Ok(written)
    }

    async fn remove_chunk(&self, id: &UploadId, index: u32) -> StoreResult<()> {
        let path = self.chunk_path(id, index);
        match fs::remove_file(&path).await {
            Ok(_) => debug!("removed chunk file {}", path.display()),
            Err(err) if err.kind() == ErrorKind::NotFound => {}
            Err(err) => return Err(StoreError::Io(err)),
        }
        Ok(())
    }

    async fn list_chunks(&self, id: &UploadId) -> StoreResult<Vec<u32>> {
        let mut entries = fs::read_dir(self.session_dir(id)).await?;
        let mut indices = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_file() {
                continue;
            }
            if let Some(index) = entry.file_name().to_str().and_then(parse_chunk_file_name) {
                indices.push(index);
            }
        }
        indices.sort_unstable();
        indices.dedup();
        Ok(indices)
    }

    async fn open_chunk(&self, id: &UploadId, index: u32) -> StoreResult<ChunkReader> {
        let file = File::open(self.chunk_path(id, index))
            .await
            .map_err(|err| {
                if err.kind() == ErrorKind::NotFound {
                    StoreError::ChunkNotFound {
                        upload_id: id.to_string(),
                        index,
                    }
                } else {
                    StoreError::Io(err)
                }
            })?;
        Ok(Box::pin(file))
    }

    async fn remove_session(&self, id: &UploadId) -> StoreResult<()> {
        let dir = self.session_dir(id);
        match fs::remove_dir_all(&dir).await {
            Ok(_) => debug!("removed session directory {}", dir.display()),
            Err(err) if err.kind() == ErrorKind::NotFound => {}
            Err(err) => return Err(StoreError::Io(err)),
        }
        Ok(())
    }

    async fn list_sessions(&self) -> StoreResult<Vec<UploadId>> {
        let mut entries = match fs::read_dir(&self.base_path).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == ErrorKind::NotFound => return Ok(Vec::new()),
            Err(err) => return Err(StoreError::Io(err)),
        };
        let mut ids = Vec::new();
        while let Some(entry) = entries.next_entry().await? {
            if !entry.file_type().await?.is_dir() {
                continue;
            }
            if let Some(id) = entry
                .file_name()
                .to_str()
                .and_then(|name| UploadId::parse(name).ok())
            {
                ids.push(id);
            }
        }
        Ok(ids)
    }
}

/// Stream `data` into `tmp_path`, fsync it and rename it over `final_path`.
///
/// The temp file is removed on every failure path.
async fn write_atomic(
    tmp_path: &Path,
    final_path: &Path,
    data: ChunkStream<'_>,
) -> io::Result<u64> {
    let mut file = File::create(tmp_path).await?;
    let written = match copy_stream(&mut file, data).await {
        Ok(written) => written,
        Err(err) => {
            drop(file);
            let _ = fs::remove_file(tmp_path).await;
            return Err(err);
        }
    };
    drop(file);

    if let Err(err) = fs::rename(tmp_path, final_path).await {
        if err.kind() == ErrorKind::AlreadyExists {
            fs::remove_file(final_path).await?;
            fs::rename(tmp_path, final_path).await?;
        } else {
            let _ = fs::remove_file(tmp_path).await;
            return Err(err);
        }
    }
    Ok(written)
}

async fn copy_stream(file: &mut File, mut data: ChunkStream<'_>) -> io::Result<u64> {
    let mut written: u64 = 0;
    while let Some(chunk) = data.next().await {
        let chunk = chunk?;
        written += chunk.len() as u64;
        file.write_all(&chunk).await?;
    }
    file.flush().await?;
    file.sync_all().await?;
    Ok(written)
}
