use super::error::{Result, UploadError};
use crate::utils::keyed_mutex::KeyedMutex;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};
use tokio::io::AsyncWriteExt;

const BLOCKS_FILE: &str = "blocks";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ChunkWrite {
    New,
    /// Same chunk already staged in full; nothing was written
    Duplicate,
}

/// Staging area for chunks: `<root>/<session_id>/<chunk_number>` plus the
/// packed completion bits in `<root>/<session_id>/blocks`.
pub struct ChunkStore {
    root: PathBuf,
    locks: KeyedMutex,
}

impl ChunkStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            locks: KeyedMutex::new(),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn session_dir(&self, session_id: &str) -> Result<PathBuf> {
        if session_id.is_empty()
            || session_id.contains(['/', '\\'])
            || session_id == "."
            || session_id == ".."
        {
            return Err(UploadError::invalid(format!(
                "malformed upload id '{}'",
                session_id
            )));
        }
        Ok(self.root.join(session_id))
    }

    fn chunk_path(&self, session_id: &str, chunk_number: i32) -> Result<PathBuf> {
        Ok(self.session_dir(session_id)?.join(chunk_number.to_string()))
    }

    pub async fn create_session_dir(&self, session_id: &str) -> Result<()> {
        tokio::fs::create_dir_all(self.session_dir(session_id)?).await?;
        Ok(())
    }

    /// Stages one chunk. A fully staged chunk of the declared size is left
    /// alone, a shorter one is treated as an interrupted write and replaced.
    pub async fn accept(
        &self,
        session_id: &str,
        chunk_number: i32,
        declared_size: u64,
        data: &[u8],
    ) -> Result<ChunkWrite> {
        if data.len() as u64 != declared_size {
            return Err(UploadError::invalid(format!(
                "chunk {} declared {} bytes but carried {}",
                chunk_number,
                declared_size,
                data.len()
            )));
        }

        let path = self.chunk_path(session_id, chunk_number)?;
        let _guard = self
            .locks
            .lock(&format!("{}/{}", session_id, chunk_number))
            .await;

        // The directory only disappears when the session was deleted
        if !tokio::fs::try_exists(self.session_dir(session_id)?).await? {
            return Err(UploadError::not_found(format!("upload session {}", session_id)));
        }

        match self.staged_size(session_id, chunk_number).await? {
            Some(staged) if staged == declared_size => {
                tracing::debug!(
                    "Chunk {} of {} already staged, skipping write",
                    chunk_number,
                    session_id
                );
                return Ok(ChunkWrite::Duplicate);
            }
            Some(staged) if staged > declared_size => {
                return Err(UploadError::invalid(format!(
                    "chunk {} already staged with {} bytes, got {}",
                    chunk_number, staged, declared_size
                )));
            }
            Some(staged) => {
                tracing::debug!(
                    "Replacing incomplete chunk {} of {} ({} of {} bytes)",
                    chunk_number,
                    session_id,
                    staged,
                    declared_size
                );
            }
            None => {}
        }

        let mut file = tokio::fs::File::create(&path).await.map_err(|e| {
            if e.kind() == ErrorKind::NotFound {
                UploadError::not_found(format!("upload session {}", session_id))
            } else {
                e.into()
            }
        })?;
        file.write_all(data).await?;
        file.sync_all().await?;

        Ok(ChunkWrite::New)
    }

    pub async fn staged_size(&self, session_id: &str, chunk_number: i32) -> Result<Option<u64>> {
        let path = self.chunk_path(session_id, chunk_number)?;
        match tokio::fs::metadata(&path).await {
            Ok(meta) => Ok(Some(meta.len())),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    pub async fn open_chunk(&self, session_id: &str, chunk_number: i32) -> Result<tokio::fs::File> {
        let path = self.chunk_path(session_id, chunk_number)?;
        tokio::fs::File::open(&path).await.map_err(|e| {
            if e.kind() == ErrorKind::NotFound {
                UploadError::invalid(format!(
                    "chunk {} of {} is missing",
                    chunk_number, session_id
                ))
            } else {
                e.into()
            }
        })
    }

    pub async fn write_blocks(&self, session_id: &str, bytes: &[u8]) -> Result<()> {
        let path = self.session_dir(session_id)?.join(BLOCKS_FILE);
        match tokio::fs::write(&path, bytes).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => {
                Err(UploadError::not_found(format!("upload session {}", session_id)))
            }
            Err(e) => Err(e.into()),
        }
    }

    pub async fn read_blocks(&self, session_id: &str) -> Result<Option<Vec<u8>>> {
        let path = self.session_dir(session_id)?.join(BLOCKS_FILE);
        match tokio::fs::read(&path).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    /// Deletes a session's staging directory. The directory is renamed away
    /// first so a concurrent chunk write cannot land in it mid-removal.
    pub async fn remove_session(&self, session_id: &str) -> Result<()> {
        let dir = self.session_dir(session_id)?;
        let tombstone = self
            .root
            .join(format!(".{}.{}.removed", session_id, uuid::Uuid::new_v4()));

        match tokio::fs::rename(&dir, &tombstone).await {
            Ok(()) => tokio::fs::remove_dir_all(&tombstone).await?,
            Err(e) if e.kind() == ErrorKind::NotFound => {}
            Err(e) => return Err(e.into()),
        }
        Ok(())
    }

    /// Chunk locks currently held or awaited.
    pub fn held_locks(&self) -> usize {
        self.locks.len()
    }
}
