use sea_orm::entity::prelude::*;
use serde::{Deserialize, Serialize};

#[derive(Clone, Debug, PartialEq, Eq, DeriveEntityModel, Serialize, Deserialize)]
#[sea_orm(table_name = "upload_sessions")]
pub struct Model {
    #[sea_orm(primary_key, auto_increment = false)]
    pub id: String,
    pub owner: String,
    pub project_id: String,
    pub project_name: String,
    pub project_owner: String,
    pub directory_id: String,
    pub directory_name: String,
    pub file_name: String,
    pub file_size: i64,
    pub chunk_size: i32,
    pub chunk_count: i32,
    /// Client supplied hex checksum, empty when the client could not compute one
    pub checksum: String,
    pub file_mtime: Option<DateTimeWithTimeZone>,
    /// Packed completion bits, one per chunk, LSB first
    #[sea_orm(column_type = "Blob")]
    pub blocks: Vec<u8>,
    pub host: String,
    pub birthtime: DateTimeWithTimeZone,
}

#[derive(Copy, Clone, Debug, EnumIter, DeriveRelation)]
pub enum Relation {}

impl ActiveModelBehavior for ActiveModel {}
