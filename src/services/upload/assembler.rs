use super::chunk_store::ChunkStore;
use super::error::{Result, UploadError};
use crate::entities::upload_sessions;
use crate::services::storage::{StorageService, UploadResult};
use futures::{StreamExt, TryStreamExt};
use std::sync::Arc;
use tokio_util::io::{ReaderStream, StreamReader};

/// Concatenates a session's staged chunks, in chunk order, into one blob.
pub struct Assembler {
    chunks: Arc<ChunkStore>,
    storage: Arc<dyn StorageService>,
}

impl Assembler {
    pub fn new(chunks: Arc<ChunkStore>, storage: Arc<dyn StorageService>) -> Self {
        Self { chunks, storage }
    }

    /// Streams chunks `1..=chunk_count` into `dest_key`. The returned hash and
    /// size describe the bytes actually written.
    pub async fn assemble(
        &self,
        session: &upload_sessions::Model,
        dest_key: &str,
    ) -> Result<UploadResult> {
        for number in 1..=session.chunk_count {
            if self.chunks.staged_size(&session.id, number).await?.is_none() {
                return Err(UploadError::invalid(format!(
                    "chunk {} of upload {} is missing",
                    number, session.id
                )));
            }
        }

        tracing::info!(
            "🧩 Assembling {} chunks of upload {} into {}",
            session.chunk_count,
            session.id,
            dest_key
        );

        // Chunks are opened one at a time as the previous one is drained
        let chunks = self.chunks.clone();
        let session_id = session.id.clone();
        let stream = futures::stream::iter(1..=session.chunk_count)
            .then(move |number| {
                let chunks = chunks.clone();
                let session_id = session_id.clone();
                async move {
                    chunks
                        .open_chunk(&session_id, number)
                        .await
                        .map_err(std::io::Error::other)
                }
            })
            .map_ok(ReaderStream::new)
            .try_flatten();
        let reader = StreamReader::new(Box::pin(stream));

        let written = self
            .storage
            .upload_stream_with_hash(dest_key, Box::new(reader))
            .await
            .map_err(|e| match e.downcast::<std::io::Error>() {
                // A chunk that vanished mid-read keeps its own kind
                Ok(io) if io.get_ref().is_some_and(|inner| inner.is::<UploadError>()) => {
                    match io.into_inner().map(|inner| inner.downcast::<UploadError>()) {
                        Some(Ok(upload)) => *upload,
                        _ => UploadError::Internal("chunk read failed".to_string()),
                    }
                }
                Ok(io) => io.into(),
                Err(other) => other.into(),
            })?;

        Ok(written)
    }
}
