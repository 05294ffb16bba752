use crate::config::{StorageBackend, UploadConfig};
use crate::services::storage::{LocalStorageService, S3StorageService, StorageService};
use anyhow::{Context, Result};
use aws_sdk_s3::config::Region;
use std::sync::Arc;
use tracing::info;

pub async fn setup_storage(config: &UploadConfig) -> Result<Arc<dyn StorageService>> {
    match config.storage_backend {
        StorageBackend::Local => {
            let root = config.files_root();
            tokio::fs::create_dir_all(&root)
                .await
                .with_context(|| format!("creating blob store at {}", root.display()))?;
            info!("💾 Local Storage: {}", root.display());
            Ok(Arc::new(LocalStorageService::new(root)))
        }
        StorageBackend::S3 => {
            let endpoint_url = config
                .s3_endpoint
                .clone()
                .context("S3_ENDPOINT must be set for the s3 backend")?;
            let access_key = config
                .s3_access_key
                .clone()
                .context("S3_ACCESS_KEY must be set for the s3 backend")?;
            let secret_key = config
                .s3_secret_key
                .clone()
                .context("S3_SECRET_KEY must be set for the s3 backend")?;
            let bucket = config.s3_bucket.clone();

            info!("☁️  S3 Storage: {} (Bucket: {})", endpoint_url, bucket);

            let aws_config = aws_config::from_env()
                .endpoint_url(&endpoint_url)
                .region(Region::new("us-east-1"))
                .credentials_provider(aws_sdk_s3::config::Credentials::new(
                    access_key, secret_key, None, None, "static",
                ))
                .load()
                .await;

            let s3_config = aws_sdk_s3::config::Builder::from(&aws_config)
                .force_path_style(true)
                .build();

            let s3_client = aws_sdk_s3::Client::from_conf(s3_config);
            Ok(Arc::new(S3StorageService::new(s3_client, bucket)))
        }
    }
}
