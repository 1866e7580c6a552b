//! Named exclusive locks, e.g. `task:12`.
//!
//! Entries are created on first use and removed when the last guard or
//! waiter for the key goes away, so the map only holds keys in use.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use tokio::sync::{Mutex as AsyncMutex, OwnedMutexGuard};

type LockMap = HashMap<String, Arc<AsyncMutex<()>>>;

#[derive(Clone, Default)]
pub struct KeyedLock {
    locks: Arc<Mutex<LockMap>>,
}

/// Held lock; released on drop, including unwinding.
pub struct KeyedGuard {
    key: String,
    locks: Arc<Mutex<LockMap>>,
    guard: Option<OwnedMutexGuard<()>>,
}

impl Drop for KeyedGuard {
    fn drop(&mut self) {
        let mut locks = self.locks.lock().unwrap_or_else(|p| p.into_inner());
        if let Some(guard) = self.guard.take() {
            let mutex = OwnedMutexGuard::mutex(&guard).clone();
            drop(guard);
            // The map, this clone and nobody else: no waiter can be parked on it.
            if Arc::strong_count(&mutex) == 2 {
                locks.remove(&self.key);
            }
        }
        tracing::trace!(key = %self.key, "Released keyed lock");
    }
}

impl KeyedLock {
    pub fn new() -> Self {
        Self::default()
    }

    fn entry(&self, key: &str) -> Arc<AsyncMutex<()>> {
        let mut locks = self.locks.lock().unwrap_or_else(|p| p.into_inner());
        locks
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(AsyncMutex::new(())))
            .clone()
    }

    fn guard(&self, key: &str, guard: OwnedMutexGuard<()>) -> KeyedGuard {
        KeyedGuard {
            key: key.to_string(),
            locks: self.locks.clone(),
            guard: Some(guard),
        }
    }

    /// Wait for the lock on `key`. No timeout.
    pub async fn lock(&self, key: &str) -> KeyedGuard {
        let mutex = self.entry(key);
        let guard = mutex.lock_owned().await;
        tracing::trace!(key, "Acquired keyed lock");
        self.guard(key, guard)
    }

    /// Take the lock only if nobody holds it.
    pub fn try_lock(&self, key: &str) -> Option<KeyedGuard> {
        let mutex = self.entry(key);
        let guard = mutex.try_lock_owned().ok()?;
        Some(self.guard(key, guard))
    }

    /// Number of keys currently held or waited on.
    pub fn len(&self) -> usize {
        self.locks.lock().unwrap_or_else(|p| p.into_inner()).len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}
