use thiserror::Error;

/// Failure kinds surfaced by the ingestion pipeline. Each maps to one stable
/// transport status in `api::error`.
#[derive(Debug, Error)]
pub enum UploadError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("invalid request: {0}")]
    Invalid(String),

    #[error("access denied: {0}")]
    NoAccess(String),

    #[error("already exists: {0}")]
    Exists(String),

    #[error("internal error: {0}")]
    Internal(String),
}

pub type Result<T> = std::result::Result<T, UploadError>;

impl UploadError {
    pub fn not_found(what: impl Into<String>) -> Self {
        UploadError::NotFound(what.into())
    }

    pub fn invalid(why: impl Into<String>) -> Self {
        UploadError::Invalid(why.into())
    }

    pub fn no_access(what: impl Into<String>) -> Self {
        UploadError::NoAccess(what.into())
    }
}

impl From<sea_orm::DbErr> for UploadError {
    fn from(err: sea_orm::DbErr) -> Self {
        UploadError::Internal(format!("database: {}", err))
    }
}

impl From<std::io::Error> for UploadError {
    fn from(err: std::io::Error) -> Self {
        UploadError::Internal(format!("io: {}", err))
    }
}

impl From<anyhow::Error> for UploadError {
    fn from(err: anyhow::Error) -> Self {
        // Pipeline errors that went through anyhow keep their kind
        match err.downcast::<UploadError>() {
            Ok(upload) => upload,
            Err(other) => UploadError::Internal(format!("{:#}", other)),
        }
    }
}

impl From<sea_orm::TransactionError<UploadError>> for UploadError {
    fn from(err: sea_orm::TransactionError<UploadError>) -> Self {
        match err {
            sea_orm::TransactionError::Connection(db) => db.into(),
            sea_orm::TransactionError::Transaction(upload) => upload,
        }
    }
}
