#![allow(dead_code)]

use async_trait::async_trait;
use chrono::Utc;
use sea_orm::ActiveValue::Set;
use sea_orm::{ActiveModelTrait, Database, DatabaseConnection};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;
use tempfile::TempDir;
use tokio::io::AsyncRead;
use upload_ingest::config::UploadConfig;
use upload_ingest::entities::{directories, project_access, projects};
use upload_ingest::infrastructure::database;
use upload_ingest::services::access::DbAccess;
use upload_ingest::services::processor::{ProcessRequest, Processor};
use upload_ingest::services::storage::{LocalStorageService, StorageService, UploadResult};
use upload_ingest::services::upload::{
    ChunkOutcome, ChunkRequest, CreateSessionRequest, UploadService,
};
use upload_ingest::utils::hash::calculate_hash;

pub const OWNER: &str = "alice";
pub const MEMBER: &str = "carol";
pub const STRANGER: &str = "mallory";
pub const PROJECT: &str = "p1";
pub const OTHER_PROJECT: &str = "p2";
pub const DIR_A: &str = "d1";
pub const DIR_B: &str = "d2";
pub const FOREIGN_DIR: &str = "dx";

pub async fn setup_test_db() -> DatabaseConnection {
    let db = Database::connect("sqlite::memory:").await.unwrap();
    database::run_migrations(&db).await.unwrap();
    db
}

/// Alice owns p1 (directories d1, d2) and grants carol access.
/// Bob owns p2 with directory dx.
pub async fn seed_catalog(db: &DatabaseConnection) {
    for (id, owner) in [(PROJECT, OWNER), (OTHER_PROJECT, "bob")] {
        projects::ActiveModel {
            id: Set(id.to_string()),
            name: Set(format!("project {}", id)),
            owner: Set(owner.to_string()),
        }
        .insert(db)
        .await
        .unwrap();
    }

    for (id, project) in [(DIR_A, PROJECT), (DIR_B, PROJECT), (FOREIGN_DIR, OTHER_PROJECT)] {
        directories::ActiveModel {
            id: Set(id.to_string()),
            name: Set(format!("dir {}", id)),
            project_id: Set(project.to_string()),
        }
        .insert(db)
        .await
        .unwrap();
    }

    project_access::ActiveModel {
        project_id: Set(PROJECT.to_string()),
        user_id: Set(MEMBER.to_string()),
    }
    .insert(db)
    .await
    .unwrap();
}

/// Counts invocations; optionally slows down so concurrent finishes overlap.
#[derive(Default)]
pub struct CountingProcessor {
    pub calls: AtomicUsize,
    pub delay: Option<Duration>,
}

impl CountingProcessor {
    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Processor for CountingProcessor {
    async fn process(&self, _req: &ProcessRequest) -> anyhow::Result<()> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        Ok(())
    }
}

/// Local storage whose next `fail_uploads` blob writes fail.
pub struct FlakyStorage {
    pub inner: LocalStorageService,
    pub fail_uploads: AtomicUsize,
}

#[async_trait]
impl StorageService for FlakyStorage {
    async fn upload_stream_with_hash<'a>(
        &self,
        key: &str,
        reader: Box<dyn AsyncRead + Unpin + Send + 'a>,
    ) -> anyhow::Result<UploadResult> {
        let remaining = self.fail_uploads.load(Ordering::SeqCst);
        if remaining > 0 {
            self.fail_uploads.store(remaining - 1, Ordering::SeqCst);
            return Err(anyhow::anyhow!("simulated storage outage"));
        }
        self.inner.upload_stream_with_hash(key, reader).await
    }

    async fn delete_file(&self, key: &str) -> anyhow::Result<()> {
        self.inner.delete_file(key).await
    }

    async fn file_exists(&self, key: &str) -> anyhow::Result<bool> {
        self.inner.file_exists(key).await
    }

    async fn get_file(&self, key: &str) -> anyhow::Result<Vec<u8>> {
        self.inner.get_file(key).await
    }

    async fn get_file_head(&self, key: &str, len: usize) -> anyhow::Result<Vec<u8>> {
        self.inner.get_file_head(key, len).await
    }

    async fn list_objects(&self, prefix: &str) -> anyhow::Result<Vec<String>> {
        self.inner.list_objects(prefix).await
    }
}

pub struct TestEnv {
    pub db: DatabaseConnection,
    pub config: UploadConfig,
    pub storage: Arc<dyn StorageService>,
    pub processor: Arc<CountingProcessor>,
    pub service: Arc<UploadService>,
    pub dir: TempDir,
}

impl TestEnv {
    pub async fn new() -> Self {
        Self::with_processor(CountingProcessor::default()).await
    }

    pub async fn with_processor(processor: CountingProcessor) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let config = UploadConfig::development(dir.path());
        let storage: Arc<dyn StorageService> =
            Arc::new(LocalStorageService::new(config.files_root()));
        Self::build(dir, config, storage, processor).await
    }

    pub async fn with_flaky_storage(fail_uploads: usize) -> Self {
        let dir = tempfile::tempdir().unwrap();
        let config = UploadConfig::development(dir.path());
        let storage: Arc<dyn StorageService> = Arc::new(FlakyStorage {
            inner: LocalStorageService::new(config.files_root()),
            fail_uploads: AtomicUsize::new(fail_uploads),
        });
        Self::build(dir, config, storage, CountingProcessor::default()).await
    }

    async fn build(
        dir: TempDir,
        config: UploadConfig,
        storage: Arc<dyn StorageService>,
        processor: CountingProcessor,
    ) -> Self {
        let db = setup_test_db().await;
        seed_catalog(&db).await;
        let processor = Arc::new(processor);
        let service = Arc::new(UploadService::new(
            db.clone(),
            storage.clone(),
            Arc::new(DbAccess::new(db.clone())),
            processor.clone(),
            &config,
        ));

        Self {
            db,
            config,
            storage,
            processor,
            service,
            dir,
        }
    }

    /// A second service over the same database and directories, as after a restart.
    pub fn restarted(&self) -> Arc<UploadService> {
        Arc::new(UploadService::new(
            self.db.clone(),
            self.storage.clone(),
            Arc::new(DbAccess::new(self.db.clone())),
            self.processor.clone(),
            &self.config,
        ))
    }

    pub async fn blob_count(&self) -> usize {
        self.storage.list_objects("").await.unwrap().len()
    }
}

pub fn create_request(dir: &str, name: &str, data: &[u8], chunk_size: i32) -> CreateSessionRequest {
    CreateSessionRequest {
        owner: OWNER.to_string(),
        project_id: PROJECT.to_string(),
        directory_id: dir.to_string(),
        directory_path: None,
        file_name: name.to_string(),
        file_size: data.len() as i64,
        chunk_size,
        checksum: calculate_hash(data),
        file_mtime: Some(Utc::now().into()),
        host: "test-host".to_string(),
    }
}

/// Bytes of 1-based chunk `number` of `data`.
pub fn chunk_of(data: &[u8], chunk_size: usize, number: usize) -> &[u8] {
    let start = (number - 1) * chunk_size;
    let end = (start + chunk_size).min(data.len());
    &data[start..end]
}

pub fn chunk_request(
    session_id: &str,
    data: &[u8],
    chunk_size: usize,
    number: usize,
) -> ChunkRequest {
    let chunk = chunk_of(data, chunk_size, number);
    ChunkRequest {
        session_id: session_id.to_string(),
        caller: OWNER.to_string(),
        chunk_number: number as i32,
        total_chunks: data.len().div_ceil(chunk_size) as i32,
        chunk_size: chunk.len() as i64,
        total_size: data.len() as i64,
        data: bytes::Bytes::copy_from_slice(chunk),
    }
}

/// Sends the chunks in `order`, returning the outcome of the last one.
pub async fn send_chunks(
    service: &UploadService,
    session_id: &str,
    data: &[u8],
    chunk_size: usize,
    order: &[usize],
) -> ChunkOutcome {
    let mut last = ChunkOutcome::default();
    for number in order {
        last = service
            .accept_chunk(chunk_request(session_id, data, chunk_size, *number))
            .await
            .unwrap();
    }
    last
}

/// Deterministic pseudo-random content.
pub fn test_data(len: usize, seed: u8) -> Vec<u8> {
    let mut state = (seed as u32).wrapping_mul(0x9E37_79B9).wrapping_add(0x7F4A_7C15);
    if state == 0 {
        state = 1;
    }
    (0..len)
        .map(|_| {
            state ^= state << 13;
            state ^= state >> 17;
            state ^= state << 5;
            (state & 0xff) as u8
        })
        .collect()
}
