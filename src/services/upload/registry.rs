use super::chunk_store::ChunkStore;
use super::error::{Result, UploadError};
use super::types::{CreateSessionRequest, chunk_count};
use super::tracker::BlockSet;
use crate::entities::{directories, projects, upload_sessions};
use crate::services::access::Access;
use crate::utils::keyed_mutex::KeyedMutex;
use chrono::Utc;
use sea_orm::ActiveValue::Set;
use sea_orm::{
    ActiveModelTrait, ColumnTrait, DatabaseConnection, EntityTrait, ModelTrait, QueryFilter,
    QueryOrder,
};
use std::sync::Arc;
use tracing::info;
use uuid::Uuid;

/// Upload session records and their staging directories.
pub struct SessionRegistry {
    db: DatabaseConnection,
    access: Arc<dyn Access>,
    chunks: Arc<ChunkStore>,
    identity_locks: KeyedMutex,
}

impl SessionRegistry {
    pub fn new(db: DatabaseConnection, access: Arc<dyn Access>, chunks: Arc<ChunkStore>) -> Self {
        Self {
            db,
            access,
            chunks,
            identity_locks: KeyedMutex::new(),
        }
    }

    /// Loads the project and checks that `user` may work in it.
    pub async fn authorize_project(&self, project_id: &str, user: &str) -> Result<projects::Model> {
        let project = projects::Entity::find_by_id(project_id)
            .one(&self.db)
            .await?
            .ok_or_else(|| UploadError::not_found(format!("project {}", project_id)))?;

        if !self.access.allowed_by_owner(&project, user).await? {
            return Err(UploadError::no_access(format!(
                "user {} on project {}",
                user, project_id
            )));
        }

        Ok(project)
    }

    /// Session owner or anyone allowed in the owning project.
    pub async fn authorize_session(
        &self,
        session: &upload_sessions::Model,
        user: &str,
    ) -> Result<()> {
        if session.owner == user {
            return Ok(());
        }
        match self.authorize_project(&session.project_id, user).await {
            Ok(_) => Ok(()),
            // A vanished project leaves only the owner with rights
            Err(UploadError::NotFound(_)) => Err(UploadError::no_access(format!(
                "user {} on upload {}",
                user, session.id
            ))),
            Err(e) => Err(e),
        }
    }

    /// Returns the live session for the request's identity, creating it when
    /// none exists. `chunk_size` is the effective size after defaults.
    pub async fn create(
        &self,
        req: &CreateSessionRequest,
        chunk_size: i32,
    ) -> Result<(upload_sessions::Model, bool)> {
        let project = self.authorize_project(&req.project_id, &req.owner).await?;
        let directory = self.directory_in_project(req, &project).await?;

        let identity = format!(
            "{}\u{0}{}\u{0}{}\u{0}{}",
            project.id, directory.id, req.file_name, req.checksum
        );
        let _guard = self.identity_locks.lock(&identity).await;

        let existing = upload_sessions::Entity::find()
            .filter(upload_sessions::Column::ProjectId.eq(&project.id))
            .filter(upload_sessions::Column::DirectoryId.eq(&directory.id))
            .filter(upload_sessions::Column::FileName.eq(&req.file_name))
            .filter(upload_sessions::Column::Checksum.eq(&req.checksum))
            .order_by_asc(upload_sessions::Column::Birthtime)
            .one(&self.db)
            .await?;

        if let Some(session) = existing {
            info!("🔁 Resuming upload {} for {}", session.id, session.file_name);
            return Ok((session, true));
        }

        let count = chunk_count(req.file_size, chunk_size);
        let id = Uuid::new_v4().to_string();

        self.chunks.create_session_dir(&id).await?;

        let session = upload_sessions::ActiveModel {
            id: Set(id.clone()),
            owner: Set(req.owner.clone()),
            project_id: Set(project.id.clone()),
            project_name: Set(project.name.clone()),
            project_owner: Set(project.owner.clone()),
            directory_id: Set(directory.id.clone()),
            directory_name: Set(directory.name.clone()),
            file_name: Set(req.file_name.clone()),
            file_size: Set(req.file_size),
            chunk_size: Set(chunk_size),
            chunk_count: Set(count),
            checksum: Set(req.checksum.clone()),
            file_mtime: Set(req.file_mtime),
            blocks: Set(BlockSet::new(count as usize).to_bytes()),
            host: Set(req.host.clone()),
            birthtime: Set(Utc::now().into()),
        };

        let saved = match session.insert(&self.db).await {
            Ok(saved) => saved,
            Err(e) => {
                if let Err(cleanup) = self.chunks.remove_session(&id).await {
                    tracing::warn!("Failed to remove staging for {}: {}", id, cleanup);
                }
                return Err(e.into());
            }
        };

        info!(
            "📤 Upload {} created: {} ({} bytes, {} chunks of {})",
            saved.id, saved.file_name, saved.file_size, saved.chunk_count, saved.chunk_size
        );

        Ok((saved, false))
    }

    async fn directory_in_project(
        &self,
        req: &CreateSessionRequest,
        project: &projects::Model,
    ) -> Result<directories::Model> {
        if req.directory_id.is_empty() {
            return match req.directory_path.as_deref().map(str::trim) {
                Some(path) if !path.is_empty() => self.directory_by_path(project, path).await,
                _ => Err(UploadError::invalid("directory_id or directory_path is required")),
            };
        }

        let directory = directories::Entity::find_by_id(&req.directory_id)
            .one(&self.db)
            .await?
            .ok_or_else(|| UploadError::not_found(format!("directory {}", req.directory_id)))?;

        if directory.project_id != project.id {
            return Err(UploadError::invalid(format!(
                "directory {} is not in project {}",
                directory.id, project.id
            )));
        }

        Ok(directory)
    }

    /// Directory named `path` in the project, created when missing.
    async fn directory_by_path(
        &self,
        project: &projects::Model,
        path: &str,
    ) -> Result<directories::Model> {
        let _guard = self
            .identity_locks
            .lock(&format!("{}\u{0}dir\u{0}{}", project.id, path))
            .await;

        let existing = directories::Entity::find()
            .filter(directories::Column::ProjectId.eq(&project.id))
            .filter(directories::Column::Name.eq(path))
            .one(&self.db)
            .await?;
        if let Some(directory) = existing {
            return Ok(directory);
        }

        let directory = directories::ActiveModel {
            id: Set(Uuid::new_v4().to_string()),
            name: Set(path.to_string()),
            project_id: Set(project.id.clone()),
        }
        .insert(&self.db)
        .await?;

        info!("📁 Created directory {} ({}) in project {}", path, directory.id, project.id);
        Ok(directory)
    }

    pub fn held_locks(&self) -> usize {
        self.identity_locks.len()
    }

    pub async fn find(&self, session_id: &str) -> Result<upload_sessions::Model> {
        upload_sessions::Entity::find_by_id(session_id)
            .one(&self.db)
            .await?
            .ok_or_else(|| UploadError::not_found(format!("upload session {}", session_id)))
    }

    /// Abandons a session on behalf of `caller`.
    pub async fn delete(&self, session_id: &str, caller: &str) -> Result<upload_sessions::Model> {
        let session = self.find(session_id).await?;
        self.authorize_session(&session, caller).await?;
        self.remove(&session).await?;
        info!("🗑️  Upload {} deleted by {}", session.id, caller);
        Ok(session)
    }

    /// Drops the record and the staging directory without access checks.
    pub async fn remove(&self, session: &upload_sessions::Model) -> Result<()> {
        session.clone().delete(&self.db).await?;
        self.chunks.remove_session(&session.id).await
    }

    pub async fn list_for_project(
        &self,
        project_id: &str,
        caller: &str,
    ) -> Result<Vec<upload_sessions::Model>> {
        self.authorize_project(project_id, caller).await?;

        Ok(upload_sessions::Entity::find()
            .filter(upload_sessions::Column::ProjectId.eq(project_id))
            .order_by_asc(upload_sessions::Column::Birthtime)
            .all(&self.db)
            .await?)
    }

    /// Records the packed completion bits on the session row and in the
    /// staging directory.
    pub async fn persist_blocks(&self, session_id: &str, blocks: Vec<u8>) -> Result<()> {
        let res = upload_sessions::Entity::update_many()
            .col_expr(
                upload_sessions::Column::Blocks,
                sea_orm::sea_query::Expr::value(blocks.clone()),
            )
            .filter(upload_sessions::Column::Id.eq(session_id))
            .exec(&self.db)
            .await?;

        if res.rows_affected == 0 {
            return Err(UploadError::not_found(format!("upload session {}", session_id)));
        }

        self.chunks.write_blocks(session_id, &blocks).await
    }

    /// Persisted completion bits for rehydrating the tracker after a restart.
    pub async fn persisted_blocks(&self, session: &upload_sessions::Model) -> Result<Vec<u8>> {
        if session.blocks.iter().any(|b| *b != 0) {
            return Ok(session.blocks.clone());
        }
        Ok(self
            .chunks
            .read_blocks(&session.id)
            .await?
            .unwrap_or_else(|| session.blocks.clone()))
    }
}
