use crate::entities::stored_files;
use bytes::Bytes;
use chrono::{DateTime, FixedOffset};

/// Input to session creation, already authenticated.
#[derive(Debug, Clone)]
pub struct CreateSessionRequest {
    pub owner: String,
    pub project_id: String,
    pub directory_id: String,
    /// Used when `directory_id` is empty; the directory is created if missing
    pub directory_path: Option<String>,
    pub file_name: String,
    pub file_size: i64,
    /// Zero selects the configured default
    pub chunk_size: i32,
    /// Hex digest computed by the client, empty when unknown
    pub checksum: String,
    pub file_mtime: Option<DateTime<FixedOffset>>,
    pub host: String,
}

/// One delivered chunk, 1-based.
#[derive(Debug, Clone)]
pub struct ChunkRequest {
    pub session_id: String,
    pub caller: String,
    pub chunk_number: i32,
    pub total_chunks: i32,
    /// Bytes in this chunk as declared by the client
    pub chunk_size: i64,
    pub total_size: i64,
    pub data: Bytes,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FinishKind {
    /// New content; this file owns its blob
    Stored,
    /// Content already stored elsewhere; `uses_id` points at the owner
    Aliased,
    /// Same bytes already current at the same directory and name
    Unchanged,
}

#[derive(Debug, Clone)]
pub struct FinishedFile {
    pub file: stored_files::Model,
    pub kind: FinishKind,
}

#[derive(Debug, Clone)]
pub struct CreatedSession {
    pub session_id: String,
    pub resumed: bool,
    /// 1-based chunk number the client should send next
    pub starting_block: i32,
    /// Set when the session finished on creation (zero-byte files)
    pub finished: Option<FinishedFile>,
}

#[derive(Debug, Clone, Default)]
pub struct ChunkOutcome {
    pub done: bool,
    pub file_id: Option<String>,
}

/// `ceil(size / chunk_size)`, zero for empty files.
pub fn chunk_count(file_size: i64, chunk_size: i32) -> i32 {
    if file_size <= 0 || chunk_size <= 0 {
        return 0;
    }
    let chunk_size = chunk_size as i64;
    ((file_size + chunk_size - 1) / chunk_size) as i32
}
