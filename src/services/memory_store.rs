//! In-memory [`SessionStore`] used by service and handler tests.

use crate::{
    models::session::{SessionMeta, UploadId},
    services::session_store::{ChunkReader, ChunkStream, SessionStore, StoreError, StoreResult},
};
use async_trait::async_trait;
use bytes::{Bytes, BytesMut};
use futures::StreamExt;
use std::{
    collections::{BTreeMap, HashMap},
    io::{self, Cursor, ErrorKind},
    sync::{
        Mutex,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
};

#[derive(Default)]
struct MemorySession {
    meta: Option<SessionMeta>,
    chunks: BTreeMap<u32, Bytes>,
}

#[derive(Default)]
pub struct MemorySessionStore {
    sessions: Mutex<HashMap<UploadId, MemorySession>>,
    chunk_writes: AtomicUsize,
    /// When set, `remove_session` fails without removing anything.
    pub fail_removals: AtomicBool,
}

impl MemorySessionStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of successful `write_chunk` calls so far.
    pub fn chunk_writes(&self) -> usize {
        self.chunk_writes.load(Ordering::SeqCst)
    }

    /// Place raw bytes at `index` without going through `write_chunk`,
    /// e.g. to simulate a truncated file left behind by a crash.
    pub fn insert_raw_chunk(&self, id: &UploadId, index: u32, data: &[u8]) {
        let mut sessions = self.sessions.lock().unwrap();
        sessions
            .entry(id.clone())
            .or_default()
            .chunks
            .insert(index, Bytes::copy_from_slice(data));
    }

    pub fn contains(&self, id: &UploadId) -> bool {
        self.sessions.lock().unwrap().contains_key(id)
    }
}

#[async_trait]
impl SessionStore for MemorySessionStore {
    async fn put_meta(&self, id: &UploadId, meta: &SessionMeta) -> StoreResult<()> {
        let mut sessions = self.sessions.lock().unwrap();
        sessions.entry(id.clone()).or_default().meta = Some(meta.clone());
        Ok(())
    }

    async fn get_meta(&self, id: &UploadId) -> StoreResult<Option<SessionMeta>> {
        let sessions = self.sessions.lock().unwrap();
        Ok(sessions.get(id).and_then(|s| s.meta.clone()))
    }

    async fn chunk_len(&self, id: &UploadId, index: u32) -> StoreResult<Option<u64>> {
        let sessions = self.sessions.lock().unwrap();
        Ok(sessions
            .get(id)
            .and_then(|s| s.chunks.get(&index))
            .map(|c| c.len() as u64))
    }

    async fn write_chunk(
        &self,
        id: &UploadId,
        index: u32,
        mut data: ChunkStream<'_>,
    ) -> StoreResult<u64> {
        let mut buf = BytesMut::new();
        while let Some(chunk) = data.next().await {
            buf.extend_from_slice(&chunk?);
        }
        let written = buf.len() as u64;

        let mut sessions = self.sessions.lock().unwrap();
        let session = sessions.get_mut(id).ok_or_else(|| {
            StoreError::Io(io::Error::new(ErrorKind::NotFound, "session missing"))
        })?;
        session.chunks.insert(index, buf.freeze());
        self.chunk_writes.fetch_add(1, Ordering::SeqCst);
        Ok(written)
    }

    async fn remove_chunk(&self, id: &UploadId, index: u32) -> StoreResult<()> {
        let mut sessions = self.sessions.lock().unwrap();
        if let Some(session) = sessions.get_mut(id) {
            session.chunks.remove(&index);
        }
        Ok(())
    }

    async fn list_chunks(&self, id: &UploadId) -> StoreResult<Vec<u32>> {
        let sessions = self.sessions.lock().unwrap();
        Ok(sessions
            .get(id)
            .map(|s| s.chunks.keys().copied().collect())
            .unwrap_or_default())
    }

    async fn open_chunk(&self, id: &UploadId, index: u32) -> StoreResult<ChunkReader> {
        let sessions = self.sessions.lock().unwrap();
        let chunk = sessions
            .get(id)
            .and_then(|s| s.chunks.get(&index))
            .cloned()
            .ok_or_else(|| StoreError::ChunkNotFound {
                upload_id: id.to_string(),
                index,
            })?;
        Ok(Box::pin(Cursor::new(chunk)))
    }

    async fn remove_session(&self, id: &UploadId) -> StoreResult<()> {
        if self.fail_removals.load(Ordering::SeqCst) {
            return Err(StoreError::Io(io::Error::new(
                ErrorKind::PermissionDenied,
                "session directory is busy",
            )));
        }
        self.sessions.lock().unwrap().remove(id);
        Ok(())
    }

    async fn list_sessions(&self) -> StoreResult<Vec<UploadId>> {
        Ok(self.sessions.lock().unwrap().keys().cloned().collect())
    }
}
