//! Chunked, resumable upload ingestion.
//!
//! A session is created (or resumed) for a file, chunks are staged in any
//! order, and the chunk that completes the set assembles the file, verifies it
//! and records it in the catalog with content-addressed deduplication.

pub mod assembler;
pub mod chunk_store;
pub mod error;
pub mod finisher;
pub mod registry;
pub mod tracker;
pub mod types;

pub use error::{Result, UploadError};
pub use types::*;

use crate::config::UploadConfig;
use crate::entities::upload_sessions;
use crate::services::access::Access;
use crate::services::processor::Processor;
use crate::services::storage::{StorageService, blob_key};
use crate::utils::validation::{sanitize_filename, validate_file_size};
use assembler::Assembler;
use chunk_store::{ChunkStore, ChunkWrite};
use finisher::Finisher;
use registry::SessionRegistry;
use sea_orm::DatabaseConnection;
use std::sync::Arc;
use tracker::CompletionTracker;
use tracing::{error, info, warn};
use uuid::Uuid;

pub struct UploadService {
    registry: SessionRegistry,
    tracker: CompletionTracker,
    chunks: Arc<ChunkStore>,
    assembler: Assembler,
    finisher: Finisher,
    storage: Arc<dyn StorageService>,
    max_file_size: u64,
    default_chunk_size: u32,
    max_chunk_size: u32,
}

impl UploadService {
    pub fn new(
        db: DatabaseConnection,
        storage: Arc<dyn StorageService>,
        access: Arc<dyn Access>,
        processor: Arc<dyn Processor>,
        config: &UploadConfig,
    ) -> Self {
        let chunks = Arc::new(ChunkStore::new(config.staging_root()));
        Self {
            registry: SessionRegistry::new(db.clone(), access, chunks.clone()),
            tracker: CompletionTracker::new(),
            assembler: Assembler::new(chunks.clone(), storage.clone()),
            finisher: Finisher::new(db, storage.clone(), processor),
            chunks,
            storage,
            max_file_size: config.max_file_size,
            default_chunk_size: config.default_chunk_size,
            max_chunk_size: config.max_chunk_size,
        }
    }

    pub fn registry(&self) -> &SessionRegistry {
        &self.registry
    }

    pub fn tracker(&self) -> &CompletionTracker {
        &self.tracker
    }

    pub fn finisher(&self) -> &Finisher {
        &self.finisher
    }

    pub fn storage(&self) -> &Arc<dyn StorageService> {
        &self.storage
    }

    /// Keyed locks currently held or awaited across the pipeline. Zero when
    /// no request is in flight.
    pub fn held_locks(&self) -> usize {
        self.registry.held_locks() + self.chunks.held_locks() + self.finisher.held_locks()
    }

    /// Creates a session, or finds the live one with the same project,
    /// directory, file name and checksum and reports where to resume.
    pub async fn create_session(&self, mut req: CreateSessionRequest) -> Result<CreatedSession> {
        validate_file_size(req.file_size, self.max_file_size)
            .map_err(|e| UploadError::invalid(e.to_string()))?;
        req.file_name =
            sanitize_filename(&req.file_name).map_err(|e| UploadError::invalid(e.to_string()))?;
        req.checksum = req.checksum.trim().to_lowercase();
        let chunk_size = self.effective_chunk_size(req.chunk_size)?;

        let (session, resumed) = self.registry.create(&req, chunk_size).await?;
        self.ensure_tracked(&session).await?;

        let starting_block = self.tracker.snapshot(&session.id).await?.starting_block();

        // Empty files have no chunks to wait for
        let finished = if session.chunk_count == 0 {
            if self.tracker.try_begin_assembly(&session.id).await? {
                match self.complete(&session).await {
                    Ok(finished) => Some(finished),
                    Err(e) => {
                        self.tracker.end_assembly(&session.id).await;
                        return Err(e);
                    }
                }
            } else {
                None
            }
        } else {
            None
        };

        Ok(CreatedSession {
            session_id: session.id,
            resumed,
            starting_block,
            finished,
        })
    }

    fn effective_chunk_size(&self, requested: i32) -> Result<i32> {
        if requested < 0 {
            return Err(UploadError::invalid(format!(
                "chunk size {} is negative",
                requested
            )));
        }
        if requested == 0 {
            return Ok(self.default_chunk_size as i32);
        }
        if requested as u32 > self.max_chunk_size {
            return Err(UploadError::invalid(format!(
                "chunk size {} exceeds maximum {}",
                requested, self.max_chunk_size
            )));
        }
        Ok(requested)
    }

    /// Loads tracker state for a session the first time this process sees it,
    /// e.g. after a restart.
    async fn ensure_tracked(&self, session: &upload_sessions::Model) -> Result<()> {
        if self.tracker.is_loaded(&session.id) {
            return Ok(());
        }
        let persisted = self.registry.persisted_blocks(session).await?;
        self.tracker
            .load(&session.id, session.chunk_count as usize, Some(&persisted));
        Ok(())
    }

    /// Stages one chunk and, when it completes the upload, finishes it.
    pub async fn accept_chunk(&self, req: ChunkRequest) -> Result<ChunkOutcome> {
        let session = self.registry.find(&req.session_id).await?;
        self.registry.authorize_session(&session, &req.caller).await?;
        Self::validate_chunk(&session, &req)?;
        self.ensure_tracked(&session).await?;

        let begin = match self.stage(&session, &req).await {
            Ok(begin) => begin,
            Err(e) => {
                // The session was deleted under us; drop any state we reloaded
                if matches!(e, UploadError::NotFound(_)) {
                    self.tracker.clear(&session.id).await;
                }
                return Err(e);
            }
        };

        if !begin {
            return Ok(ChunkOutcome::default());
        }

        match self.complete(&session).await {
            Ok(finished) => Ok(ChunkOutcome {
                done: true,
                file_id: Some(finished.file.id),
            }),
            Err(e) => {
                self.tracker.end_assembly(&session.id).await;
                Err(e)
            }
        }
    }

    /// Writes the chunk, marks it done and reports whether this call won the
    /// right to assemble.
    async fn stage(&self, session: &upload_sessions::Model, req: &ChunkRequest) -> Result<bool> {
        let write = self
            .chunks
            .accept(
                &session.id,
                req.chunk_number,
                req.chunk_size as u64,
                &req.data,
            )
            .await?;

        tracing::debug!(
            "Chunk {}/{} of {} {}",
            req.chunk_number,
            session.chunk_count,
            session.id,
            if write == ChunkWrite::Duplicate { "was a duplicate" } else { "staged" }
        );

        let index = (req.chunk_number - 1) as usize;
        let mut state = self.tracker.lock(&session.id).await?;
        if state.mark_done(index)? {
            let blocks = state.blocks().to_bytes();
            if let Err(e) = self.registry.persist_blocks(&session.id, blocks).await {
                state.unmark(index);
                return Err(e);
            }
        }
        Ok(state.try_begin_assembly())
    }

    fn validate_chunk(session: &upload_sessions::Model, req: &ChunkRequest) -> Result<()> {
        if req.chunk_number < 1 || req.chunk_number > session.chunk_count {
            return Err(UploadError::invalid(format!(
                "chunk {} out of range 1..={}",
                req.chunk_number, session.chunk_count
            )));
        }
        if req.total_chunks != session.chunk_count {
            return Err(UploadError::invalid(format!(
                "upload {} has {} chunks, request says {}",
                session.id, session.chunk_count, req.total_chunks
            )));
        }
        if req.total_size != session.file_size {
            return Err(UploadError::invalid(format!(
                "upload {} is {} bytes, request says {}",
                session.id, session.file_size, req.total_size
            )));
        }
        if req.chunk_size < 0 || req.chunk_size > session.chunk_size as i64 {
            return Err(UploadError::invalid(format!(
                "chunk size {} exceeds the session chunk size {}",
                req.chunk_size, session.chunk_size
            )));
        }
        Ok(())
    }

    /// Assembles and finishes a session whose assembling flag this task won.
    async fn complete(&self, session: &upload_sessions::Model) -> Result<FinishedFile> {
        let file_id = Uuid::new_v4().to_string();
        let key = blob_key(&file_id);

        let assembled = match self.assembler.assemble(session, &key).await {
            Ok(assembled) => assembled,
            Err(e) => {
                error!("❌ Assembly of upload {} failed: {}", session.id, e);
                if let Err(cleanup) = self.storage.delete_file(&key).await {
                    warn!("Failed to remove partial blob {}: {:#}", key, cleanup);
                }
                return Err(e);
            }
        };

        let finished = match self.finisher.finish(session, &assembled, &file_id).await {
            Ok(finished) => finished,
            Err(e) => {
                error!("❌ Finishing upload {} failed: {}", session.id, e);
                return Err(e);
            }
        };

        if let Err(e) = self.registry.remove(session).await {
            warn!("Upload {} finished but cleanup failed: {}", session.id, e);
        }
        self.tracker.clear(&session.id).await;

        info!(
            "🎉 Upload {} finished as file {}",
            session.id, finished.file.id
        );
        Ok(finished)
    }

    /// Abandons a session. Chunks still in flight for it fail with `NotFound`.
    pub async fn delete_session(&self, session_id: &str, caller: &str) -> Result<()> {
        self.registry.delete(session_id, caller).await?;
        self.tracker.clear(session_id).await;
        Ok(())
    }

    pub async fn list_sessions(
        &self,
        project_id: &str,
        caller: &str,
    ) -> Result<Vec<upload_sessions::Model>> {
        self.registry.list_for_project(project_id, caller).await
    }
}
