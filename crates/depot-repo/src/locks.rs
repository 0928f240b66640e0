//! Per-artifact-path async locks
//!
//! Serializes the first fetch of a proxied path (single-flight) and keeps the
//! eviction sweep away from paths that are being committed or served.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, PoisonError, Weak};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

/// Guard held while a path is locked
pub type PathGuard = OwnedMutexGuard<()>;

/// Registry of per-path mutexes, dropped once nobody holds them
#[derive(Default)]
pub struct PathLocks {
    locks: Mutex<HashMap<String, Weak<AsyncMutex<()>>>>,
}

impl PathLocks {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock_for(&self, key: &str) -> Arc<AsyncMutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(PoisonError::into_inner);
        if let Some(lock) = locks.get(key).and_then(Weak::upgrade) {
            return lock;
        }

        locks.retain(|_, lock| lock.strong_count() > 0);
        let lock = Arc::new(AsyncMutex::new(()));
        locks.insert(key.to_string(), Arc::downgrade(&lock));
        lock
    }

    /// Wait for the lock on `key`
    pub async fn acquire(&self, key: &str) -> PathGuard {
        self.lock_for(key).lock_owned().await
    }

    /// Take the lock on `key` only if it is free
    pub fn try_acquire(&self, key: &str) -> Option<PathGuard> {
        self.lock_for(key).try_lock_owned().ok()
    }

    /// Number of live locks
    pub fn len(&self) -> usize {
        self.locks
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .values()
            .filter(|lock| lock.strong_count() > 0)
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
