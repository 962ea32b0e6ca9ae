//! Per-session exclusive locks.
//!
//! Completion and expiry both delete a session directory, so each runs while
//! holding the lock for its upload id. Entries are dropped from the table
//! once no guard or waiter references them.

use crate::models::session::UploadId;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

#[derive(Clone, Default)]
pub struct SessionLocks {
    inner: Arc<DashMap<UploadId, Arc<Mutex<()>>>>,
}

/// Exclusive hold on one session. Released on drop.
pub struct SessionGuard {
    id: UploadId,
    guard: Option<OwnedMutexGuard<()>>,
    table: Arc<DashMap<UploadId, Arc<Mutex<()>>>>,
}

impl SessionLocks {
    pub fn new() -> Self {
        Self::default()
    }

    /// Wait until the session is free and take it.
    pub async fn acquire(&self, id: &UploadId) -> SessionGuard {
        let lock = self.lock_for(id);
        let guard = lock.lock_owned().await;
        self.guard(id, guard)
    }

    /// Take the session only if nobody holds it right now.
    pub fn try_acquire(&self, id: &UploadId) -> Option<SessionGuard> {
        let lock = self.lock_for(id);
        let guard = lock.try_lock_owned().ok()?;
        Some(self.guard(id, guard))
    }

    fn lock_for(&self, id: &UploadId) -> Arc<Mutex<()>> {
        self.inner.entry(id.clone()).or_default().clone()
    }

    fn guard(&self, id: &UploadId, guard: OwnedMutexGuard<()>) -> SessionGuard {
        SessionGuard {
            id: id.clone(),
            guard: Some(guard),
            table: self.inner.clone(),
        }
    }

    #[cfg(test)]
    fn tracked(&self) -> usize {
        self.inner.len()
    }
}

impl Drop for SessionGuard {
    fn drop(&mut self) {
        drop(self.guard.take());
        // Only the table itself still references an idle lock.
        self.table
            .remove_if(&self.id, |_, lock| Arc::strong_count(lock) == 1);
    }
}
