use std::env;
use std::path::PathBuf;

/// Which blob store backs finished uploads.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StorageBackend {
    Local,
    S3,
}

impl StorageBackend {
    fn parse(value: &str) -> Self {
        match value.to_lowercase().as_str() {
            "s3" | "minio" => StorageBackend::S3,
            _ => StorageBackend::Local,
        }
    }
}

/// Configuration for the upload ingestion service
#[derive(Debug, Clone)]
pub struct UploadConfig {
    /// Maximum declared file size in bytes (default: 1 GB)
    pub max_file_size: u64,

    /// Chunk size used when a client sends 0 (default: 1 MB)
    pub default_chunk_size: u32,

    /// Largest chunk size a client may declare (default: 64 MB)
    pub max_chunk_size: u32,

    /// Root directory for staged chunks and the local blob store (default: ./data)
    pub upload_root: PathBuf,

    /// Blob store backend: "local" or "s3" (default: "local")
    pub storage_backend: StorageBackend,

    /// S3 endpoint, e.g. a MinIO URL
    pub s3_endpoint: Option<String>,
    pub s3_access_key: Option<String>,
    pub s3_secret_key: Option<String>,
    /// S3 bucket (default: "uploads")
    pub s3_bucket: String,

    /// JWT Secret Key (Required in production)
    pub jwt_secret: String,

    /// Allowed CORS Origins (comma separated)
    pub allowed_origins: Vec<String>,
}

impl Default for UploadConfig {
    fn default() -> Self {
        Self {
            max_file_size: 1024 * 1024 * 1024, // 1 GB
            default_chunk_size: 1024 * 1024,   // 1 MB
            max_chunk_size: 64 * 1024 * 1024,  // 64 MB
            upload_root: PathBuf::from("./data"),
            storage_backend: StorageBackend::Local,
            s3_endpoint: None,
            s3_access_key: None,
            s3_secret_key: None,
            s3_bucket: "uploads".to_string(),
            jwt_secret: "secret".to_string(),
            allowed_origins: vec![
                "http://localhost:3000".to_string(),
                "http://localhost:5173".to_string(),
                "http://127.0.0.1:3000".to_string(),
            ],
        }
    }
}

impl UploadConfig {
    /// Load configuration from environment variables
    pub fn from_env() -> Self {
        let default = Self::default();

        Self {
            max_file_size: env::var("MAX_FILE_SIZE")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(default.max_file_size),

            default_chunk_size: env::var("DEFAULT_CHUNK_SIZE")
                .ok()
                .and_then(|v| v.parse().ok())
                .filter(|v| *v > 0)
                .unwrap_or(default.default_chunk_size),

            max_chunk_size: env::var("MAX_CHUNK_SIZE")
                .ok()
                .and_then(|v| v.parse().ok())
                .unwrap_or(default.max_chunk_size),

            upload_root: env::var("UPLOAD_ROOT")
                .map(PathBuf::from)
                .unwrap_or(default.upload_root),

            storage_backend: env::var("STORAGE_BACKEND")
                .map(|v| StorageBackend::parse(&v))
                .unwrap_or(default.storage_backend),

            s3_endpoint: env::var("S3_ENDPOINT").ok(),
            s3_access_key: env::var("S3_ACCESS_KEY").ok(),
            s3_secret_key: env::var("S3_SECRET_KEY").ok(),
            s3_bucket: env::var("S3_BUCKET").unwrap_or(default.s3_bucket),

            jwt_secret: env::var("JWT_SECRET").unwrap_or(default.jwt_secret),

            allowed_origins: env::var("ALLOWED_ORIGINS")
                .ok()
                .map(|v| v.split(',').map(|s| s.trim().to_string()).collect())
                .unwrap_or(default.allowed_origins),
        }
    }

    /// Create config for development and tests, rooted at the given directory
    pub fn development(upload_root: impl Into<PathBuf>) -> Self {
        Self {
            upload_root: upload_root.into(),
            jwt_secret: "dev-secret".to_string(),
            ..Self::default()
        }
    }

    /// Directory holding one staging directory per upload session.
    pub fn staging_root(&self) -> PathBuf {
        self.upload_root.join("upload")
    }

    /// Directory holding finished blobs when the local backend is used.
    pub fn files_root(&self) -> PathBuf {
        self.upload_root.join("files")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config() {
        let config = UploadConfig::default();
        assert_eq!(config.max_file_size, 1024 * 1024 * 1024);
        assert_eq!(config.default_chunk_size, 1024 * 1024);
        assert_eq!(config.storage_backend, StorageBackend::Local);
        assert!(!config.allowed_origins.contains(&"*".to_string()));
    }

    #[test]
    fn test_development_config() {
        let config = UploadConfig::development("/tmp/uploads");
        assert_eq!(config.staging_root(), PathBuf::from("/tmp/uploads/upload"));
        assert_eq!(config.files_root(), PathBuf::from("/tmp/uploads/files"));
        assert_eq!(config.jwt_secret, "dev-secret");
    }

    #[test]
    fn test_storage_backend_parse() {
        assert_eq!(StorageBackend::parse("S3"), StorageBackend::S3);
        assert_eq!(StorageBackend::parse("minio"), StorageBackend::S3);
        assert_eq!(StorageBackend::parse("local"), StorageBackend::Local);
        assert_eq!(StorageBackend::parse("anything"), StorageBackend::Local);
    }
}
