use crate::entities::{project_access, projects};
use anyhow::Result;
use async_trait::async_trait;
use sea_orm::{ColumnTrait, DatabaseConnection, EntityTrait, PaginatorTrait, QueryFilter};

/// Decides whether a user may work in a project.
#[async_trait]
pub trait Access: Send + Sync {
    async fn allowed_by_owner(&self, project: &projects::Model, user: &str) -> Result<bool>;
}

/// Project owner, or anyone listed in `project_access`.
pub struct DbAccess {
    db: DatabaseConnection,
}

impl DbAccess {
    pub fn new(db: DatabaseConnection) -> Self {
        Self { db }
    }
}

#[async_trait]
impl Access for DbAccess {
    async fn allowed_by_owner(&self, project: &projects::Model, user: &str) -> Result<bool> {
        if project.owner == user {
            return Ok(true);
        }

        let grants = project_access::Entity::find()
            .filter(project_access::Column::ProjectId.eq(&project.id))
            .filter(project_access::Column::UserId.eq(user))
            .count(&self.db)
            .await?;

        Ok(grants > 0)
    }
}
