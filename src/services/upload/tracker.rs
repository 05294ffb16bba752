use super::error::{Result, UploadError};
use dashmap::DashMap;
use fixedbitset::FixedBitSet;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};

/// Which chunks of a session are durably staged, one bit per chunk index.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BlockSet {
    bits: FixedBitSet,
}

impl BlockSet {
    pub fn new(count: usize) -> Self {
        Self {
            bits: FixedBitSet::with_capacity(count),
        }
    }

    /// Rebuilds a set from its packed form. Bytes beyond `count` bits are ignored
    /// and missing bytes read as clear.
    pub fn from_bytes(count: usize, bytes: &[u8]) -> Self {
        let mut set = Self::new(count);
        for index in 0..count {
            if let Some(byte) = bytes.get(index / 8) {
                if byte & (1 << (index % 8)) != 0 {
                    set.bits.insert(index);
                }
            }
        }
        set
    }

    /// Packed form, LSB first within each byte.
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = vec![0u8; self.bits.len().div_ceil(8)];
        for index in self.bits.ones() {
            bytes[index / 8] |= 1 << (index % 8);
        }
        bytes
    }

    /// Marks `index`; returns false if it was already set.
    pub fn set(&mut self, index: usize) -> Result<bool> {
        if index >= self.bits.len() {
            return Err(UploadError::invalid(format!(
                "chunk index {} out of range for {} chunks",
                index,
                self.bits.len()
            )));
        }
        Ok(!self.bits.put(index))
    }

    pub fn unset(&mut self, index: usize) {
        if index < self.bits.len() {
            self.bits.set(index, false);
        }
    }

    pub fn count_done(&self) -> usize {
        self.bits.count_ones(..)
    }

    pub fn is_complete(&self) -> bool {
        self.count_done() == self.bits.len()
    }

    pub fn first_missing(&self) -> Option<usize> {
        (0..self.bits.len()).find(|i| !self.bits.contains(*i))
    }

    /// 1-based chunk number a resuming client should send next.
    pub fn starting_block(&self) -> i32 {
        match self.first_missing() {
            Some(index) => index as i32 + 1,
            None => self.bits.len() as i32 + 1,
        }
    }
}

#[derive(Debug)]
pub struct SessionState {
    blocks: BlockSet,
    assembling: bool,
    removed: bool,
}

impl SessionState {
    pub fn blocks(&self) -> &BlockSet {
        &self.blocks
    }

    /// Sets the bit for `index`; returns whether it was newly set.
    pub fn mark_done(&mut self, index: usize) -> Result<bool> {
        self.blocks.set(index)
    }

    /// Reverts a mark whose persistence failed.
    pub fn unmark(&mut self, index: usize) {
        self.blocks.unset(index);
    }

    /// Test-and-set of the assembling flag. True exactly once per completed
    /// session until `end_assembly` runs.
    pub fn try_begin_assembly(&mut self) -> bool {
        if self.assembling || !self.blocks.is_complete() {
            return false;
        }
        self.assembling = true;
        true
    }
}

/// Guard over one session's state. Holding it serializes bit updates and the
/// done check for that session only.
pub struct SessionGuard {
    guard: OwnedMutexGuard<SessionState>,
}

impl std::ops::Deref for SessionGuard {
    type Target = SessionState;

    fn deref(&self) -> &Self::Target {
        &self.guard
    }
}

impl std::ops::DerefMut for SessionGuard {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.guard
    }
}

/// In-memory completion state for every live session. The map shards are only
/// locked while an entry is inserted, looked up or removed, never while a
/// session lock is awaited.
#[derive(Default)]
pub struct CompletionTracker {
    sessions: DashMap<String, Arc<Mutex<SessionState>>>,
}

impl CompletionTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Initializes state for `id` once. Later calls are no-ops, so a session
    /// already being tracked is never reset by a resume or a rehydration.
    pub fn load(&self, id: &str, chunk_count: usize, persisted: Option<&[u8]>) {
        self.sessions.entry(id.to_string()).or_insert_with(|| {
            let blocks = match persisted {
                Some(bytes) => BlockSet::from_bytes(chunk_count, bytes),
                None => BlockSet::new(chunk_count),
            };
            Arc::new(Mutex::new(SessionState {
                blocks,
                assembling: false,
                removed: false,
            }))
        });
    }

    pub fn is_loaded(&self, id: &str) -> bool {
        self.sessions.contains_key(id)
    }

    /// Takes the session lock.
    pub async fn lock(&self, id: &str) -> Result<SessionGuard> {
        let state = self
            .sessions
            .get(id)
            .map(|entry| entry.value().clone())
            .ok_or_else(|| UploadError::not_found(format!("upload session {}", id)))?;

        let guard = state.lock_owned().await;
        if guard.removed {
            return Err(UploadError::not_found(format!("upload session {}", id)));
        }
        Ok(SessionGuard { guard })
    }

    pub async fn try_begin_assembly(&self, id: &str) -> Result<bool> {
        Ok(self.lock(id).await?.try_begin_assembly())
    }

    /// Allows another assembly attempt after a failed finish.
    pub async fn end_assembly(&self, id: &str) {
        if let Ok(mut state) = self.lock(id).await {
            state.assembling = false;
        }
    }

    pub async fn snapshot(&self, id: &str) -> Result<BlockSet> {
        Ok(self.lock(id).await?.blocks.clone())
    }

    /// Discards state for `id`. Tasks already waiting on the session lock see
    /// the session as gone.
    pub async fn clear(&self, id: &str) {
        let state = self.sessions.remove(id).map(|(_, state)| state);
        if let Some(state) = state {
            state.lock().await.removed = true;
        }
    }

    pub fn len(&self) -> usize {
        self.sessions.len()
    }

    pub fn is_empty(&self) -> bool {
        self.sessions.is_empty()
    }
}
