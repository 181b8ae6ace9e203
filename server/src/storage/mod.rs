use std::pin::Pin;
use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::io::AsyncRead;
use uuid::Uuid;

use crate::config::StorageConfig;

pub mod keys;
pub mod local;
pub mod s3;

pub use keys::{sanitize_filename, storage_key_from_url};

/// Multipart threshold and part size for streamed uploads.
pub const MULTIPART_CHUNK_BYTES: usize = 5 * 1024 * 1024;

#[derive(Debug, Error)]
pub enum StorageError {
    #[error("object '{0}' not found")]
    NotFound(String),
    #[error("storage validation failed: {0}")]
    Validation(String),
    #[error("storage backend unreachable: {0}")]
    Connection(String),
    #[error("upload failed: {0}")]
    Upload(String),
    #[error("storage i/o failed: {0}")]
    Io(String),
}

impl From<std::io::Error> for StorageError {
    fn from(err: std::io::Error) -> Self {
        match err.kind() {
            std::io::ErrorKind::NotFound => StorageError::NotFound(err.to_string()),
            _ => StorageError::Io(err.to_string()),
        }
    }
}

pub type StorageResult<T> = Result<T, StorageError>;

#[derive(Debug, Clone, serde::Serialize)]
pub struct UploadedObject {
    pub key: String,
    pub url: String,
    pub size: u64,
    pub content_type: String,
}

#[derive(Debug, Clone)]
pub struct ObjectMeta {
    pub size: u64,
    pub last_modified: Option<DateTime<Utc>>,
}

#[derive(Debug, Clone)]
pub struct ObjectInfo {
    pub key: String,
    pub size: u64,
}

#[derive(Debug, Default, Clone)]
pub struct ListOptions {
    pub prefix: String,
    pub max_keys: Option<usize>,
    pub continuation_token: Option<String>,
}

#[derive(Debug, Default)]
pub struct ObjectList {
    pub objects: Vec<ObjectInfo>,
    pub next_continuation_token: Option<String>,
}

#[derive(Debug, Default, Clone)]
pub struct SignedUrlOptions {
    pub expires_in_seconds: u64,
    pub response_content_type: Option<String>,
    pub response_content_disposition: Option<String>,
}

pub type ByteReader = Pin<Box<dyn AsyncRead + Send>>;

/// Capability surface shared by the local-filesystem and S3 backends. Key
/// layout and failure semantics are identical across the two; callers never
/// branch on the variant.
#[async_trait]
pub trait ObjectStorage: Send + Sync {
    async fn upload_screenshot(
        &self,
        project_id: Uuid,
        bug_id: Uuid,
        bytes: Bytes,
    ) -> StorageResult<UploadedObject>;

    async fn upload_thumbnail(
        &self,
        project_id: Uuid,
        bug_id: Uuid,
        bytes: Bytes,
    ) -> StorageResult<UploadedObject>;

    async fn upload_replay_metadata(
        &self,
        project_id: Uuid,
        bug_id: Uuid,
        metadata: &serde_json::Value,
    ) -> StorageResult<UploadedObject>;

    async fn upload_replay_chunk(
        &self,
        project_id: Uuid,
        bug_id: Uuid,
        chunk_index: u32,
        compressed: Bytes,
    ) -> StorageResult<UploadedObject>;

    async fn upload_attachment(
        &self,
        project_id: Uuid,
        bug_id: Uuid,
        filename: &str,
        bytes: Bytes,
    ) -> StorageResult<UploadedObject>;

    async fn get_object(&self, key: &str) -> StorageResult<Bytes>;

    async fn head_object(&self, key: &str) -> StorageResult<Option<ObjectMeta>>;

    /// Idempotent: deleting a missing key succeeds.
    async fn delete_object(&self, key: &str) -> StorageResult<()>;

    /// Recursive delete; returns the number of objects removed.
    async fn delete_folder(&self, prefix: &str) -> StorageResult<u64>;

    async fn list_objects(&self, options: ListOptions) -> StorageResult<ObjectList>;

    /// S3 presigns; local returns its public URL (signature semantics are
    /// best-effort there).
    async fn get_signed_url(&self, key: &str, options: SignedUrlOptions) -> StorageResult<String>;

    /// Streamed upload: multipart on S3 past the 5 MB threshold, temp file
    /// plus rename on local.
    async fn upload_stream(
        &self,
        key: &str,
        reader: ByteReader,
        content_type: &str,
    ) -> StorageResult<UploadedObject>;

    /// Write/read/delete probe used by readiness and the setup wizard.
    async fn health_check(&self) -> StorageResult<()>;

    fn public_url(&self, key: &str) -> String;

    fn backend_name(&self) -> &'static str;
}

pub async fn from_config(config: &StorageConfig) -> StorageResult<Arc<dyn ObjectStorage>> {
    match config {
        StorageConfig::Local { base_dir, base_url } => {
            let storage = local::LocalStorage::init(base_dir, base_url).await?;
            Ok(Arc::new(storage))
        }
        StorageConfig::S3 { .. } => {
            let storage = s3::S3Storage::init(config).await?;
            Ok(Arc::new(storage))
        }
    }
}
