use anyhow::{Result, anyhow};
use async_trait::async_trait;
use aws_sdk_s3::Client;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{CompletedMultipartUpload, CompletedPart};
use sha2::{Digest, Sha256};
use std::path::{Path, PathBuf};
use tokio::io::{AsyncRead, AsyncReadExt, AsyncWriteExt};

pub struct UploadResult {
    pub hash: String,
    pub size: i64,
    pub key: String,
}

/// Location of a stored file's blob, sharded by the first characters of its ID
/// so no single directory or prefix grows unbounded.
pub fn blob_key(file_id: &str) -> String {
    match (file_id.get(0..2), file_id.get(2..4)) {
        (Some(a), Some(b)) => format!("{}/{}/{}", a, b, file_id),
        _ => file_id.to_string(),
    }
}

#[async_trait]
pub trait StorageService: Send + Sync {
    /// Streams `reader` into `key`, returning the SHA-256 and byte count of what was written.
    async fn upload_stream_with_hash<'a>(
        &self,
        key: &str,
        reader: Box<dyn AsyncRead + Unpin + Send + 'a>,
    ) -> Result<UploadResult>;
    async fn delete_file(&self, key: &str) -> Result<()>;
    async fn file_exists(&self, key: &str) -> Result<bool>;
    async fn get_file(&self, key: &str) -> Result<Vec<u8>>;
    /// Up to `len` bytes from the start of the object.
    async fn get_file_head(&self, key: &str, len: usize) -> Result<Vec<u8>>;
    async fn list_objects(&self, prefix: &str) -> Result<Vec<String>>;
}

pub struct S3StorageService {
    client: Client,
    bucket: String,
}

impl S3StorageService {
    pub fn new(client: Client, bucket: String) -> Self {
        Self { client, bucket }
    }

    /// Sends `reader` as parts of an open multipart upload. Returns the parts,
    /// the hex SHA-256 and the byte count.
    async fn upload_parts<'a>(
        &self,
        key: &str,
        upload_id: &str,
        reader: &mut Box<dyn AsyncRead + Unpin + Send + 'a>,
    ) -> Result<(Vec<CompletedPart>, String, i64)> {
        let mut chunk_index = 1;
        let mut completed_parts = Vec::new();
        let mut hasher = Sha256::new();
        let mut total_size = 0;

        // S3 requires every part but the last to be at least 5MB
        let chunk_size = 10 * 1024 * 1024;
        let mut buffer = vec![0u8; chunk_size];

        loop {
            let mut n = 0;
            while n < chunk_size {
                let read = reader.read(&mut buffer[n..]).await?;
                if read == 0 {
                    break;
                }
                hasher.update(&buffer[n..n + read]);
                n += read;
            }

            if n == 0 {
                break;
            }

            total_size += n as i64;
            let body = ByteStream::from(buffer[..n].to_vec());
            let upload_part_res = self
                .client
                .upload_part()
                .bucket(&self.bucket)
                .key(key)
                .upload_id(upload_id)
                .body(body)
                .part_number(chunk_index)
                .send()
                .await?;

            completed_parts.push(
                CompletedPart::builder()
                    .e_tag(upload_part_res.e_tag().unwrap_or_default())
                    .part_number(chunk_index)
                    .build(),
            );

            chunk_index += 1;
        }

        Ok((completed_parts, hex::encode(hasher.finalize()), total_size))
    }

    /// Releases the parts of an unfinished multipart upload.
    async fn abort_upload(&self, key: &str, upload_id: &str) {
        if let Err(e) = self
            .client
            .abort_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .upload_id(upload_id)
            .send()
            .await
        {
            tracing::warn!("Failed to abort multipart upload of {}: {}", key, e);
        }
    }
}

#[async_trait]
impl StorageService for S3StorageService {
    async fn upload_stream_with_hash<'a>(
        &self,
        key: &str,
        mut reader: Box<dyn AsyncRead + Unpin + Send + 'a>,
    ) -> Result<UploadResult> {
        let multipart_upload_res = self
            .client
            .create_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await?;

        let upload_id = multipart_upload_res
            .upload_id()
            .ok_or_else(|| anyhow!("No upload ID"))?;
        let parts = self.upload_parts(key, upload_id, &mut reader).await;
        let (completed_parts, hash, total_size) = match parts {
            Ok(parts) => parts,
            Err(e) => {
                self.abort_upload(key, upload_id).await;
                return Err(e);
            }
        };

        if completed_parts.is_empty() {
            // A multipart upload cannot complete without parts
            self.abort_upload(key, upload_id).await;
            self.client
                .put_object()
                .bucket(&self.bucket)
                .key(key)
                .body(ByteStream::from(Vec::new()))
                .send()
                .await?;
        } else {
            let completed_multipart_upload = CompletedMultipartUpload::builder()
                .set_parts(Some(completed_parts))
                .build();

            let completed = self
                .client
                .complete_multipart_upload()
                .bucket(&self.bucket)
                .key(key)
                .upload_id(upload_id)
                .multipart_upload(completed_multipart_upload)
                .send()
                .await;
            if let Err(e) = completed {
                self.abort_upload(key, upload_id).await;
                return Err(e.into());
            }
        }

        Ok(UploadResult {
            hash,
            size: total_size,
            key: key.to_string(),
        })
    }

    async fn delete_file(&self, key: &str) -> Result<()> {
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await?;
        Ok(())
    }

    async fn file_exists(&self, key: &str) -> Result<bool> {
        let res = self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await;

        match res {
            Ok(_) => Ok(true),
            Err(e) => {
                let service_error = e.into_service_error();
                if service_error.is_not_found() {
                    Ok(false)
                } else {
                    Err(anyhow!(service_error))
                }
            }
        }
    }

    async fn get_file(&self, key: &str) -> Result<Vec<u8>> {
        let res = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await?;
        Ok(res.body.collect().await?.to_vec())
    }

    async fn get_file_head(&self, key: &str, len: usize) -> Result<Vec<u8>> {
        if len == 0 {
            return Ok(Vec::new());
        }
        let res = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .range(format!("bytes=0-{}", len - 1))
            .send()
            .await;

        match res {
            Ok(out) => Ok(out.body.collect().await?.to_vec()),
            // Ranges are unsatisfiable on empty objects
            Err(e) => {
                tracing::debug!("Ranged read of {} failed ({:?}), object may be empty", key, e);
                Ok(Vec::new())
            }
        }
    }

    async fn list_objects(&self, prefix: &str) -> Result<Vec<String>> {
        let mut objects = Vec::new();
        let mut continuation_token = None;

        loop {
            let res = self
                .client
                .list_objects_v2()
                .bucket(&self.bucket)
                .prefix(prefix)
                .set_continuation_token(continuation_token)
                .send()
                .await?;

            if let Some(contents) = res.contents {
                for object in contents {
                    if let Some(key) = object.key {
                        objects.push(key);
                    }
                }
            }

            if res.is_truncated.unwrap_or(false) {
                continuation_token = res.next_continuation_token;
            } else {
                break;
            }
        }

        Ok(objects)
    }
}

/// Blob store on the local filesystem. Keys are relative paths under `root`.
pub struct LocalStorageService {
    root: PathBuf,
}

impl LocalStorageService {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn path_for(&self, key: &str) -> Result<PathBuf> {
        if key.split('/').any(|part| part == ".." || part.is_empty()) {
            return Err(anyhow!("Invalid storage key: {}", key));
        }
        Ok(self.root.join(key))
    }
}

#[async_trait]
impl StorageService for LocalStorageService {
    async fn upload_stream_with_hash<'a>(
        &self,
        key: &str,
        mut reader: Box<dyn AsyncRead + Unpin + Send + 'a>,
    ) -> Result<UploadResult> {
        let path = self.path_for(key)?;
        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        // Write beside the target and rename so readers never see a partial blob
        let partial = path.with_extension("partial");
        let written = async {
            let mut file = tokio::fs::File::create(&partial).await?;
            let mut hasher = Sha256::new();
            let mut buffer = vec![0u8; 64 * 1024];
            let mut total_size = 0i64;

            loop {
                let n = reader.read(&mut buffer).await?;
                if n == 0 {
                    break;
                }
                hasher.update(&buffer[..n]);
                file.write_all(&buffer[..n]).await?;
                total_size += n as i64;
            }
            file.flush().await?;
            file.sync_all().await?;
            drop(file);

            tokio::fs::rename(&partial, &path).await?;
            Ok::<_, std::io::Error>((hex::encode(hasher.finalize()), total_size))
        }
        .await;

        match written {
            Ok((hash, size)) => Ok(UploadResult {
                hash,
                size,
                key: key.to_string(),
            }),
            Err(e) => {
                if let Err(cleanup) = tokio::fs::remove_file(&partial).await {
                    if cleanup.kind() != std::io::ErrorKind::NotFound {
                        tracing::warn!("Failed to remove {}: {}", partial.display(), cleanup);
                    }
                }
                Err(e.into())
            }
        }
    }

    async fn delete_file(&self, key: &str) -> Result<()> {
        let path = self.path_for(key)?;
        match tokio::fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn file_exists(&self, key: &str) -> Result<bool> {
        let path = self.path_for(key)?;
        Ok(tokio::fs::try_exists(&path).await?)
    }

    async fn get_file(&self, key: &str) -> Result<Vec<u8>> {
        let path = self.path_for(key)?;
        Ok(tokio::fs::read(&path).await?)
    }

    async fn get_file_head(&self, key: &str, len: usize) -> Result<Vec<u8>> {
        let path = self.path_for(key)?;
        let file = tokio::fs::File::open(&path).await?;
        let mut head = Vec::with_capacity(len);
        file.take(len as u64).read_to_end(&mut head).await?;
        Ok(head)
    }

    async fn list_objects(&self, prefix: &str) -> Result<Vec<String>> {
        let mut objects = Vec::new();
        let mut pending = vec![self.root.clone()];

        while let Some(dir) = pending.pop() {
            let mut entries = match tokio::fs::read_dir(&dir).await {
                Ok(entries) => entries,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => continue,
                Err(e) => return Err(e.into()),
            };
            while let Some(entry) = entries.next_entry().await? {
                let path = entry.path();
                if entry.file_type().await?.is_dir() {
                    pending.push(path);
                    continue;
                }
                let Ok(relative) = path.strip_prefix(&self.root) else {
                    continue;
                };
                let key = relative
                    .components()
                    .map(|c| c.as_os_str().to_string_lossy())
                    .collect::<Vec<_>>()
                    .join("/");
                if key.starts_with(prefix) && !key.ends_with(".partial") {
                    objects.push(key);
                }
            }
        }

        objects.sort();
        Ok(objects)
    }
}
