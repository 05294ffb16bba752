use super::error::{Result, UploadError};
use super::types::{FinishKind, FinishedFile};
use crate::entities::{stored_files, upload_sessions};
use crate::services::processor::{ProcessRequest, Processor};
use crate::services::storage::{StorageService, UploadResult, blob_key};
use crate::utils::hash::checksums_match;
use crate::utils::keyed_mutex::KeyedMutex;
use crate::utils::validation::detect_media_type;
use chrono::Utc;
use sea_orm::ActiveValue::Set;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, ConnectionTrait, DatabaseConnection, EntityTrait, QueryFilter,
    QueryOrder, TransactionTrait,
};
use std::sync::Arc;
use tracing::{info, warn};

/// Bytes read from the head of a blob for media type sniffing
const SNIFF_LEN: usize = 8192;

/// Alias chains longer than this are treated as catalog corruption
const MAX_ALIAS_DEPTH: usize = 16;

/// Validates an assembled blob and records it in the catalog, storing each
/// distinct checksum once.
pub struct Finisher {
    db: DatabaseConnection,
    storage: Arc<dyn StorageService>,
    processor: Arc<dyn Processor>,
    checksum_locks: KeyedMutex,
}

impl Finisher {
    pub fn new(
        db: DatabaseConnection,
        storage: Arc<dyn StorageService>,
        processor: Arc<dyn Processor>,
    ) -> Self {
        Self {
            db,
            storage,
            processor,
            checksum_locks: KeyedMutex::new(),
        }
    }

    pub fn held_locks(&self) -> usize {
        self.checksum_locks.len()
    }

    /// Finishes `session` whose bytes were assembled at `blob_key(file_id)`.
    /// The assembled blob is removed on every path that does not keep it.
    pub async fn finish(
        &self,
        session: &upload_sessions::Model,
        assembled: &UploadResult,
        file_id: &str,
    ) -> Result<FinishedFile> {
        match self.finish_inner(session, assembled, file_id).await {
            Ok(finished) => {
                if finished.kind != FinishKind::Stored {
                    self.discard_blob(&assembled.key).await;
                }
                Ok(finished)
            }
            Err(e) => {
                self.discard_blob(&assembled.key).await;
                Err(e)
            }
        }
    }

    async fn finish_inner(
        &self,
        session: &upload_sessions::Model,
        assembled: &UploadResult,
        file_id: &str,
    ) -> Result<FinishedFile> {
        if assembled.size != session.file_size {
            return Err(UploadError::invalid(format!(
                "upload {} assembled {} bytes, expected {}",
                session.id, assembled.size, session.file_size
            )));
        }

        if !session.checksum.is_empty() && !checksums_match(&session.checksum, &assembled.hash) {
            return Err(UploadError::invalid(format!(
                "upload {} checksum mismatch: declared {}, computed {}",
                session.id, session.checksum, assembled.hash
            )));
        }

        let checksum = assembled.hash.clone();
        let _guard = self.checksum_locks.lock(&checksum).await;

        if let Some(same) = stored_files::Entity::find()
            .filter(stored_files::Column::DirectoryId.eq(&session.directory_id))
            .filter(stored_files::Column::Name.eq(&session.file_name))
            .filter(stored_files::Column::Checksum.eq(&checksum))
            .filter(stored_files::Column::Current.eq(true))
            .one(&self.db)
            .await?
        {
            info!(
                "♻️  {} already current in directory {} as {}",
                session.file_name, session.directory_id, same.id
            );
            return Ok(FinishedFile {
                file: same,
                kind: FinishKind::Unchanged,
            });
        }

        let physical = stored_files::Entity::find()
            .filter(stored_files::Column::Checksum.eq(&checksum))
            .filter(stored_files::Column::UsesId.is_null())
            .order_by_asc(stored_files::Column::CreatedAt)
            .one(&self.db)
            .await?;

        let (uses_id, media_type, kind) = match &physical {
            Some(owner) => (
                Some(owner.id.clone()),
                owner.media_type.clone(),
                FinishKind::Aliased,
            ),
            None => {
                let head = self
                    .storage
                    .get_file_head(&assembled.key, SNIFF_LEN)
                    .await?;
                let media_type = detect_media_type(&session.file_name, &head);
                self.run_processor(file_id, session, &media_type, assembled)
                    .await;
                (None, media_type, FinishKind::Stored)
            }
        };

        let file = stored_files::ActiveModel {
            id: Set(file_id.to_string()),
            name: Set(session.file_name.clone()),
            owner: Set(session.owner.clone()),
            project_id: Set(session.project_id.clone()),
            directory_id: Set(session.directory_id.clone()),
            checksum: Set(checksum),
            size: Set(assembled.size),
            current: Set(true),
            parent_id: Set(None),
            uses_id: Set(uses_id),
            media_type: Set(media_type),
            created_at: Set(Utc::now().into()),
        };

        let directory_id = session.directory_id.clone();
        let name = session.file_name.clone();
        let saved = self
            .db
            .transaction::<_, stored_files::Model, UploadError>(|txn| {
                Box::pin(async move { insert_as_current(txn, file, &directory_id, &name).await })
            })
            .await?;

        match kind {
            FinishKind::Aliased => info!(
                "🔗 {} stored as {} (content of {})",
                saved.name,
                saved.id,
                saved.uses_id.as_deref().unwrap_or_default()
            ),
            _ => info!(
                "✅ {} stored as {} ({} bytes)",
                saved.name, saved.id, saved.size
            ),
        }

        Ok(FinishedFile { file: saved, kind })
    }

    async fn run_processor(
        &self,
        file_id: &str,
        session: &upload_sessions::Model,
        media_type: &str,
        assembled: &UploadResult,
    ) {
        let req = ProcessRequest {
            file_id: file_id.to_string(),
            name: session.file_name.clone(),
            media_type: media_type.to_string(),
            blob_key: assembled.key.clone(),
            size: assembled.size,
        };
        if let Err(e) = self.processor.process(&req).await {
            warn!("Processing {} ({}) failed: {:#}", file_id, media_type, e);
        }
    }

    async fn discard_blob(&self, key: &str) {
        if let Err(e) = self.storage.delete_file(key).await {
            warn!("Failed to remove assembled blob {}: {:#}", key, e);
        }
    }

    /// Blob key holding the bytes of `file`, following `uses_id` aliases.
    pub async fn resolve_blob_key(&self, file: &stored_files::Model) -> Result<String> {
        resolve_blob_key(&self.db, file).await
    }
}

/// Inserts `file` as the current version at (directory, name), demoting the
/// previous current version and linking it as the parent.
async fn insert_as_current<C: ConnectionTrait>(
    conn: &C,
    mut file: stored_files::ActiveModel,
    directory_id: &str,
    name: &str,
) -> Result<stored_files::Model> {
    let previous = stored_files::Entity::find()
        .filter(stored_files::Column::DirectoryId.eq(directory_id))
        .filter(stored_files::Column::Name.eq(name))
        .filter(stored_files::Column::Current.eq(true))
        .one(conn)
        .await?;

    if let Some(previous) = previous {
        file.parent_id = Set(Some(previous.id.clone()));
        let mut demoted: stored_files::ActiveModel = previous.into();
        demoted.current = Set(false);
        demoted.update(conn).await?;
    }

    Ok(file.insert(conn).await?)
}

pub async fn resolve_blob_key<C: ConnectionTrait>(
    conn: &C,
    file: &stored_files::Model,
) -> Result<String> {
    let mut id = file.id.clone();
    let mut uses_id = file.uses_id.clone();

    for _ in 0..MAX_ALIAS_DEPTH {
        let Some(target) = uses_id else {
            return Ok(blob_key(&id));
        };
        let aliased = stored_files::Entity::find_by_id(&target)
            .one(conn)
            .await?
            .ok_or_else(|| UploadError::not_found(format!("aliased file {}", target)))?;
        id = aliased.id;
        uses_id = aliased.uses_id;
    }

    Err(UploadError::Internal(format!(
        "alias chain from {} is too deep",
        file.id
    )))
}
