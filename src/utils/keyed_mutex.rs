use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

type LockMap = DashMap<String, Arc<Mutex<()>>>;

/// Async mutex scoped to a key (a chunk path, a session identity, a checksum).
/// Entries exist only while the key is held or awaited, so the map stays as
/// small as the set of keys in contention.
#[derive(Debug, Clone, Default)]
pub struct KeyedMutex {
    locks: Arc<LockMap>,
}

/// Holds one key of a [`KeyedMutex`]. Dropping it releases the key and removes
/// the entry when no other task is waiting for it.
#[derive(Debug)]
pub struct KeyedGuard {
    key: String,
    locks: Arc<LockMap>,
    guard: Option<OwnedMutexGuard<()>>,
}

impl KeyedMutex {
    pub fn new() -> Self {
        Self::default()
    }

    pub async fn lock(&self, key: &str) -> KeyedGuard {
        // Clone the Arc out so the map shard is unlocked before we wait.
        let mutex = self
            .locks
            .entry(key.to_string())
            .or_insert_with(|| Arc::new(Mutex::new(())))
            .value()
            .clone();

        KeyedGuard {
            key: key.to_string(),
            locks: self.locks.clone(),
            guard: Some(mutex.lock_owned().await),
        }
    }

    /// Keys currently held or awaited.
    pub fn len(&self) -> usize {
        self.locks.len()
    }

    pub fn is_empty(&self) -> bool {
        self.locks.is_empty()
    }
}

impl Drop for KeyedGuard {
    fn drop(&mut self) {
        drop(self.guard.take());
        // Waiters hold their own clone of the Arc, so a count of one means
        // only the map still refers to this mutex.
        self.locks
            .remove_if(&self.key, |_, mutex| Arc::strong_count(mutex) == 1);
    }
}
