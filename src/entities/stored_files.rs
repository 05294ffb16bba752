use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "stored_files")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,
    pub name: String,
    pub owner: String,
    pub project_id: String,
    pub directory_id: String,
    pub checksum: String,
    pub size: i64,
    /// Latest version of the file at (directory, name)
    pub current: bool,
    pub parent_id: Option<String>,
    /// Set when the bytes live in another entry's blob
    pub uses_id: Option<String>,
    pub media_type: String,
    pub created_at: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
