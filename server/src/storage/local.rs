use std::path::PathBuf;

use async_trait::async_trait;
use bytes::Bytes;
use chrono::{DateTime, Utc};
use futures_util::future::BoxFuture;
use tokio::fs;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tracing::debug;
use uuid::Uuid;

use super::keys;
use super::{
    ByteReader, ListOptions, ObjectInfo, ObjectList, ObjectMeta, ObjectStorage, SignedUrlOptions,
    StorageError, StorageResult, UploadedObject,
};

const HEALTH_PROBE: &str = ".health-check";

/// Filesystem-backed variant. Keys map directly to paths under `base_dir`;
/// URLs are `base_url` joined with the key.
pub struct LocalStorage {
    base_dir: PathBuf,
    base_url: String,
}

impl LocalStorage {
    pub async fn init(base_dir: &str, base_url: &str) -> StorageResult<Self> {
        let storage = Self {
            base_dir: PathBuf::from(base_dir),
            base_url: base_url.trim_end_matches('/').to_string(),
        };
        fs::create_dir_all(&storage.base_dir).await?;
        storage.health_check().await?;
        Ok(storage)
    }

    /// Reject any key that could resolve outside the base directory. All
    /// generated keys are canonical; this guards hand-fed ones.
    fn resolve(&self, key: &str) -> StorageResult<PathBuf> {
        if key.is_empty()
            || key.starts_with('/')
            || key.split('/').any(|segment| segment == ".." || segment == "." || segment.is_empty())
        {
            return Err(StorageError::Validation(format!("invalid storage key '{key}'")));
        }
        Ok(self.base_dir.join(key))
    }

    async fn write_atomic(&self, key: &str, bytes: &[u8]) -> StorageResult<PathBuf> {
        let target = self.resolve(key)?;
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).await?;
        }
        // Write-then-rename so readers never observe a partial object.
        let tmp = target.with_extension(format!("tmp-{}", Uuid::new_v4()));
        fs::write(&tmp, bytes).await?;
        fs::rename(&tmp, &target).await?;
        Ok(target)
    }

    async fn put(
        &self,
        key: String,
        bytes: Bytes,
        content_type: &str,
    ) -> StorageResult<UploadedObject> {
        let size = bytes.len() as u64;
        self.write_atomic(&key, &bytes).await?;
        debug!(key = %key, size, "stored local object");
        Ok(UploadedObject {
            url: self.public_url(&key),
            key,
            size,
            content_type: content_type.to_string(),
        })
    }
}

/// Depth-first removal: files first, then the emptied directories on the
/// way back up. Returns the file count.
fn remove_tree(path: PathBuf) -> BoxFuture<'static, StorageResult<u64>> {
    Box::pin(async move {
        let mut removed = 0u64;
        let mut entries = match fs::read_dir(&path).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(0),
            Err(err) => return Err(err.into()),
        };
        while let Some(entry) = entries.next_entry().await? {
            let entry_path = entry.path();
            if entry.file_type().await?.is_dir() {
                removed += remove_tree(entry_path).await?;
            } else {
                fs::remove_file(&entry_path).await?;
                removed += 1;
            }
        }
        fs::remove_dir(&path).await?;
        Ok(removed)
    })
}

fn walk_files(root: PathBuf, base: PathBuf) -> BoxFuture<'static, StorageResult<Vec<ObjectInfo>>> {
    Box::pin(async move {
        let mut found = Vec::new();
        let mut entries = match fs::read_dir(&root).await {
            Ok(entries) => entries,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(found),
            Err(err) => return Err(err.into()),
        };
        while let Some(entry) = entries.next_entry().await? {
            let entry_path = entry.path();
            if entry.file_type().await?.is_dir() {
                found.extend(walk_files(entry_path, base.clone()).await?);
            } else {
                let meta = entry.metadata().await?;
                let key = entry_path
                    .strip_prefix(&base)
                    .map_err(|err| StorageError::Io(err.to_string()))?
                    .to_string_lossy()
                    .replace('\\', "/");
                found.push(ObjectInfo { key, size: meta.len() });
            }
        }
        Ok(found)
    })
}

#[async_trait]
impl ObjectStorage for LocalStorage {
    async fn upload_screenshot(
        &self,
        project_id: Uuid,
        bug_id: Uuid,
        bytes: Bytes,
    ) -> StorageResult<UploadedObject> {
        self.put(keys::screenshot_key(project_id, bug_id), bytes, "image/png")
            .await
    }

    async fn upload_thumbnail(
        &self,
        project_id: Uuid,
        bug_id: Uuid,
        bytes: Bytes,
    ) -> StorageResult<UploadedObject> {
        self.put(keys::thumbnail_key(project_id, bug_id), bytes, "image/jpeg")
            .await
    }

    async fn upload_replay_metadata(
        &self,
        project_id: Uuid,
        bug_id: Uuid,
        metadata: &serde_json::Value,
    ) -> StorageResult<UploadedObject> {
        let bytes = serde_json::to_vec(metadata)
            .map_err(|err| StorageError::Validation(err.to_string()))?;
        self.put(
            keys::replay_metadata_key(project_id, bug_id),
            Bytes::from(bytes),
            "application/json",
        )
        .await
    }

    async fn upload_replay_chunk(
        &self,
        project_id: Uuid,
        bug_id: Uuid,
        chunk_index: u32,
        compressed: Bytes,
    ) -> StorageResult<UploadedObject> {
        self.put(
            keys::replay_chunk_key(project_id, bug_id, chunk_index),
            compressed,
            "application/gzip",
        )
        .await
    }

    async fn upload_attachment(
        &self,
        project_id: Uuid,
        bug_id: Uuid,
        filename: &str,
        bytes: Bytes,
    ) -> StorageResult<UploadedObject> {
        self.put(
            keys::attachment_key(project_id, bug_id, filename),
            bytes,
            "application/octet-stream",
        )
        .await
    }

    async fn get_object(&self, key: &str) -> StorageResult<Bytes> {
        let path = self.resolve(key)?;
        match fs::read(&path).await {
            Ok(bytes) => Ok(Bytes::from(bytes)),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => {
                Err(StorageError::NotFound(key.to_string()))
            }
            Err(err) => Err(err.into()),
        }
    }

    async fn head_object(&self, key: &str) -> StorageResult<Option<ObjectMeta>> {
        let path = self.resolve(key)?;
        match fs::metadata(&path).await {
            Ok(meta) => {
                let last_modified = meta
                    .modified()
                    .ok()
                    .map(DateTime::<Utc>::from);
                Ok(Some(ObjectMeta { size: meta.len(), last_modified }))
            }
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(err) => Err(err.into()),
        }
    }

    async fn delete_object(&self, key: &str) -> StorageResult<()> {
        let path = self.resolve(key)?;
        match fs::remove_file(&path).await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(err) => Err(err.into()),
        }
    }

    async fn delete_folder(&self, prefix: &str) -> StorageResult<u64> {
        let path = self.resolve(prefix)?;
        remove_tree(path).await
    }

    async fn list_objects(&self, options: ListOptions) -> StorageResult<ObjectList> {
        let root = self.resolve(&options.prefix)?;
        let mut objects = walk_files(root, self.base_dir.clone()).await?;
        objects.sort_by(|a, b| a.key.cmp(&b.key));

        if let Some(token) = &options.continuation_token {
            objects.retain(|obj| obj.key.as_str() > token.as_str());
        }

        let max_keys = options.max_keys.unwrap_or(1_000);
        let next_continuation_token = if objects.len() > max_keys {
            objects.truncate(max_keys);
            objects.last().map(|obj| obj.key.clone())
        } else {
            None
        };

        Ok(ObjectList { objects, next_continuation_token })
    }

    async fn get_signed_url(&self, key: &str, _options: SignedUrlOptions) -> StorageResult<String> {
        self.resolve(key)?;
        Ok(self.public_url(key))
    }

    async fn upload_stream(
        &self,
        key: &str,
        mut reader: ByteReader,
        content_type: &str,
    ) -> StorageResult<UploadedObject> {
        let target = self.resolve(key)?;
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent).await?;
        }

        let tmp = target.with_extension(format!("tmp-{}", Uuid::new_v4()));
        let mut file = fs::File::create(&tmp).await?;
        let mut size = 0u64;
        let mut buf = vec![0u8; 64 * 1024];
        loop {
            let read = reader.read(&mut buf).await?;
            if read == 0 {
                break;
            }
            file.write_all(&buf[..read]).await?;
            size += read as u64;
        }
        file.flush().await?;
        drop(file);
        fs::rename(&tmp, &target).await?;

        Ok(UploadedObject {
            key: key.to_string(),
            url: self.public_url(key),
            size,
            content_type: content_type.to_string(),
        })
    }

    async fn health_check(&self) -> StorageResult<()> {
        let probe = self.base_dir.join(HEALTH_PROBE);
        fs::write(&probe, b"ok").await?;
        let read = fs::read(&probe).await?;
        if read != b"ok" {
            return Err(StorageError::Io("health probe readback mismatch".to_string()));
        }
        fs::remove_file(&probe).await?;
        Ok(())
    }

    fn public_url(&self, key: &str) -> String {
        format!("{}/{}", self.base_url, key)
    }

    fn backend_name(&self) -> &'static str {
        "local"
    }
}

impl LocalStorage {
    #[cfg(test)]
    pub fn base_dir(&self) -> &PathBuf {
        &self.base_dir
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    async fn storage() -> (tempfile::TempDir, LocalStorage) {
        let dir = tempfile::tempdir().unwrap();
        let storage = LocalStorage::init(
            dir.path().to_str().unwrap(),
            "http://localhost:8080/storage",
        )
        .await
        .unwrap();
        (dir, storage)
    }

    #[tokio::test]
    async fn health_probe_cleans_up_after_itself() {
        let (_dir, storage) = storage().await;
        storage.health_check().await.unwrap();
        assert!(!storage.base_dir().join(HEALTH_PROBE).exists());
    }

    #[tokio::test]
    async fn screenshot_round_trip() {
        let (_dir, storage) = storage().await;
        let project = Uuid::new_v4();
        let bug = Uuid::new_v4();

        let uploaded = storage
            .upload_screenshot(project, bug, Bytes::from_static(b"png-bytes"))
            .await
            .unwrap();
        assert_eq!(uploaded.key, keys::screenshot_key(project, bug));
        assert!(uploaded.url.ends_with(&uploaded.key));

        let read = storage.get_object(&uploaded.key).await.unwrap();
        assert_eq!(read.as_ref(), b"png-bytes");

        let meta = storage.head_object(&uploaded.key).await.unwrap().unwrap();
        assert_eq!(meta.size, 9);
    }

    #[tokio::test]
    async fn delete_object_is_idempotent() {
        let (_dir, storage) = storage().await;
        let project = Uuid::new_v4();
        let bug = Uuid::new_v4();
        let uploaded = storage
            .upload_thumbnail(project, bug, Bytes::from_static(b"jpg"))
            .await
            .unwrap();

        storage.delete_object(&uploaded.key).await.unwrap();
        storage.delete_object(&uploaded.key).await.unwrap();
        assert!(storage.head_object(&uploaded.key).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn delete_folder_counts_files() {
        let (_dir, storage) = storage().await;
        let project = Uuid::new_v4();
        let bug = Uuid::new_v4();

        for index in 0..3 {
            storage
                .upload_replay_chunk(project, bug, index, Bytes::from_static(b"gz"))
                .await
                .unwrap();
        }
        storage
            .upload_replay_metadata(project, bug, &serde_json::json!({"chunks": 3}))
            .await
            .unwrap();

        let deleted = storage
            .delete_folder(&keys::replay_prefix(project, bug))
            .await
            .unwrap();
        assert_eq!(deleted, 4);

        let list = storage
            .list_objects(ListOptions {
                prefix: keys::REPLAY_PREFIX.to_string(),
                ..Default::default()
            })
            .await
            .unwrap();
        assert!(list.objects.is_empty());
    }

    #[tokio::test]
    async fn hostile_keys_are_rejected() {
        let (_dir, storage) = storage().await;
        assert!(matches!(
            storage.get_object("../outside").await,
            Err(StorageError::Validation(_))
        ));
        assert!(matches!(
            storage.delete_object("/etc/passwd").await,
            Err(StorageError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn hostile_attachment_names_stay_inside_the_tree() {
        let (_dir, storage) = storage().await;
        let project = Uuid::new_v4();
        let bug = Uuid::new_v4();

        let uploaded = storage
            .upload_attachment(project, bug, "../../../etc/passwd", Bytes::from_static(b"x"))
            .await
            .unwrap();
        assert!(uploaded.key.starts_with(&format!("attachments/{project}/{bug}/")));
        assert!(!uploaded.key.contains(".."));
    }

    #[tokio::test]
    async fn list_paginates_with_continuation_token() {
        let (_dir, storage) = storage().await;
        let project = Uuid::new_v4();
        let bug = Uuid::new_v4();
        for index in 0..5 {
            storage
                .upload_replay_chunk(project, bug, index, Bytes::from_static(b"z"))
                .await
                .unwrap();
        }

        let first = storage
            .list_objects(ListOptions {
                prefix: keys::replay_prefix(project, bug),
                max_keys: Some(3),
                continuation_token: None,
            })
            .await
            .unwrap();
        assert_eq!(first.objects.len(), 3);
        let token = first.next_continuation_token.clone().unwrap();

        let second = storage
            .list_objects(ListOptions {
                prefix: keys::replay_prefix(project, bug),
                max_keys: Some(3),
                continuation_token: Some(token),
            })
            .await
            .unwrap();
        assert_eq!(second.objects.len(), 2);
        assert!(second.next_continuation_token.is_none());
    }

    #[tokio::test]
    async fn upload_stream_writes_via_temp_file() {
        let (_dir, storage) = storage().await;
        let payload = vec![7u8; 256 * 1024];
        let reader: ByteReader = Box::pin(std::io::Cursor::new(payload.clone()));

        let uploaded = storage
            .upload_stream("attachments/stream-test.bin", reader, "application/octet-stream")
            .await
            .unwrap();
        assert_eq!(uploaded.size, payload.len() as u64);
        let read = storage.get_object("attachments/stream-test.bin").await.unwrap();
        assert_eq!(read.len(), payload.len());
    }
}
