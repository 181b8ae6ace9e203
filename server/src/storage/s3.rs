use std::time::Duration;

use async_trait::async_trait;
use aws_sdk_s3::config::retry::RetryConfig;
use aws_sdk_s3::config::{BehaviorVersion, Credentials, Region};
use aws_sdk_s3::error::{DisplayErrorContext, SdkError};
use aws_sdk_s3::presigning::PresigningConfig;
use aws_sdk_s3::primitives::ByteStream;
use aws_sdk_s3::types::{
    CompletedMultipartUpload, CompletedPart, Delete, ObjectIdentifier, ServerSideEncryption,
    StorageClass,
};
use aws_sdk_s3::Client;
use bytes::Bytes;
use chrono::DateTime;
use tokio::io::AsyncReadExt;
use tracing::debug;
use uuid::Uuid;

use crate::config::StorageConfig;

use super::keys;
use super::{
    ByteReader, ListOptions, ObjectInfo, ObjectList, ObjectMeta, ObjectStorage, SignedUrlOptions,
    StorageError, StorageResult, UploadedObject, MULTIPART_CHUNK_BYTES,
};

const MAX_RETRY_ATTEMPTS: u32 = 3;
const DELETE_BATCH: usize = 1_000;

/// S3-compatible variant: AWS, MinIO, and R2 via endpoint override and
/// path-style addressing.
pub struct S3Storage {
    client: Client,
    bucket: String,
    sse: Option<ServerSideEncryption>,
    sse_kms_key_id: Option<String>,
    storage_class: Option<StorageClass>,
    public_base: String,
}

impl S3Storage {
    pub async fn init(config: &StorageConfig) -> StorageResult<Self> {
        let StorageConfig::S3 {
            endpoint,
            region,
            bucket,
            access_key_id,
            secret_access_key,
            force_path_style,
            sse,
            sse_kms_key_id,
            storage_class,
        } = config
        else {
            return Err(StorageError::Validation("expected s3 storage config".to_string()));
        };

        let credentials = Credentials::new(
            access_key_id.clone(),
            secret_access_key.clone(),
            None,
            None,
            "bugspotter-env",
        );

        let mut builder = aws_sdk_s3::Config::builder()
            .behavior_version(BehaviorVersion::latest())
            .region(Region::new(region.clone()))
            .credentials_provider(credentials)
            .retry_config(RetryConfig::standard().with_max_attempts(MAX_RETRY_ATTEMPTS))
            .force_path_style(*force_path_style);
        if let Some(endpoint) = endpoint {
            builder = builder.endpoint_url(endpoint.clone());
        }

        let sse = match sse.as_deref() {
            None => None,
            Some("AES256") => Some(ServerSideEncryption::Aes256),
            Some("aws:kms") => Some(ServerSideEncryption::AwsKms),
            Some(other) => {
                return Err(StorageError::Validation(format!(
                    "unsupported S3_SSE '{other}'"
                )))
            }
        };
        let storage_class = storage_class
            .as_deref()
            .map(|value| match value {
                "STANDARD" => Ok(StorageClass::Standard),
                "STANDARD_IA" => Ok(StorageClass::StandardIa),
                "INTELLIGENT_TIERING" => Ok(StorageClass::IntelligentTiering),
                "GLACIER" => Ok(StorageClass::Glacier),
                other => Err(StorageError::Validation(format!(
                    "unsupported S3_STORAGE_CLASS '{other}'"
                ))),
            })
            .transpose()?;

        let public_base = match endpoint {
            Some(endpoint) if *force_path_style => {
                format!("{}/{bucket}", endpoint.trim_end_matches('/'))
            }
            Some(endpoint) => {
                let trimmed = endpoint
                    .trim_start_matches("https://")
                    .trim_start_matches("http://");
                format!("https://{bucket}.{trimmed}")
            }
            None => format!("https://{bucket}.s3.{region}.amazonaws.com"),
        };

        let storage = Self {
            client: Client::from_conf(builder.build()),
            bucket: bucket.clone(),
            sse,
            sse_kms_key_id: sse_kms_key_id.clone(),
            storage_class,
            public_base,
        };
        Ok(storage)
    }

    async fn put(
        &self,
        key: String,
        bytes: Bytes,
        content_type: &str,
    ) -> StorageResult<UploadedObject> {
        let size = bytes.len() as u64;
        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(&key)
            .body(ByteStream::from(bytes))
            .content_type(content_type)
            .set_server_side_encryption(self.sse.clone())
            .set_ssekms_key_id(self.applicable_kms_key())
            .set_storage_class(self.storage_class.clone())
            .send()
            .await
            .map_err(|err| classify(err, "put_object"))?;
        debug!(key = %key, size, "stored s3 object");
        Ok(UploadedObject {
            url: self.public_url(&key),
            key,
            size,
            content_type: content_type.to_string(),
        })
    }

    fn applicable_kms_key(&self) -> Option<String> {
        match self.sse {
            Some(ServerSideEncryption::AwsKms) => self.sse_kms_key_id.clone(),
            _ => None,
        }
    }

    async fn multipart_upload(
        &self,
        key: &str,
        parts: Vec<Bytes>,
        content_type: &str,
        size: u64,
    ) -> StorageResult<UploadedObject> {
        let created = self
            .client
            .create_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .content_type(content_type)
            .set_server_side_encryption(self.sse.clone())
            .set_ssekms_key_id(self.applicable_kms_key())
            .set_storage_class(self.storage_class.clone())
            .send()
            .await
            .map_err(|err| classify(err, "create_multipart_upload"))?;
        let upload_id = created.upload_id().unwrap_or_default().to_string();

        let mut completed = Vec::with_capacity(parts.len());
        for (index, part) in parts.into_iter().enumerate() {
            let part_number = index as i32 + 1;
            let uploaded = self
                .client
                .upload_part()
                .bucket(&self.bucket)
                .key(key)
                .upload_id(&upload_id)
                .part_number(part_number)
                .body(ByteStream::from(part))
                .send()
                .await
                .map_err(|err| classify(err, "upload_part"))?;
            completed.push(
                CompletedPart::builder()
                    .part_number(part_number)
                    .set_e_tag(uploaded.e_tag().map(|tag| tag.to_string()))
                    .build(),
            );
        }

        self.client
            .complete_multipart_upload()
            .bucket(&self.bucket)
            .key(key)
            .upload_id(&upload_id)
            .multipart_upload(
                CompletedMultipartUpload::builder()
                    .set_parts(Some(completed))
                    .build(),
            )
            .send()
            .await
            .map_err(|err| classify(err, "complete_multipart_upload"))?;

        Ok(UploadedObject {
            key: key.to_string(),
            url: self.public_url(key),
            size,
            content_type: content_type.to_string(),
        })
    }
}

fn classify<E, R>(err: SdkError<E, R>, op: &'static str) -> StorageError
where
    E: std::error::Error + Send + Sync + 'static,
    R: std::fmt::Debug + Send + Sync + 'static,
{
    let detail = format!("{op}: {}", DisplayErrorContext(&err));
    match err {
        SdkError::DispatchFailure(_) | SdkError::TimeoutError(_) => StorageError::Connection(detail),
        _ => StorageError::Upload(detail),
    }
}

#[async_trait]
impl ObjectStorage for S3Storage {
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
        let resp = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|err| match &err {
                SdkError::ServiceError(service) if service.err().is_no_such_key() => {
                    StorageError::NotFound(key.to_string())
                }
                _ => classify(err, "get_object"),
            })?;
        let body = resp
            .body
            .collect()
            .await
            .map_err(|err| StorageError::Io(err.to_string()))?;
        Ok(body.into_bytes())
    }

    async fn head_object(&self, key: &str) -> StorageResult<Option<ObjectMeta>> {
        match self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
        {
            Ok(head) => {
                let last_modified = head
                    .last_modified()
                    .and_then(|dt| DateTime::from_timestamp(dt.secs(), dt.subsec_nanos()));
                Ok(Some(ObjectMeta {
                    size: head.content_length().unwrap_or(0) as u64,
                    last_modified,
                }))
            }
            Err(SdkError::ServiceError(service)) if service.err().is_not_found() => Ok(None),
            Err(err) => Err(classify(err, "head_object")),
        }
    }

    async fn delete_object(&self, key: &str) -> StorageResult<()> {
        // S3 DeleteObject succeeds for missing keys, which matches the
        // idempotency contract directly.
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(key)
            .send()
            .await
            .map_err(|err| classify(err, "delete_object"))?;
        Ok(())
    }

    async fn delete_folder(&self, prefix: &str) -> StorageResult<u64> {
        let prefix = format!("{}/", prefix.trim_end_matches('/'));
        let mut deleted = 0u64;
        let mut continuation: Option<String> = None;

        loop {
            let listed = self
                .client
                .list_objects_v2()
                .bucket(&self.bucket)
                .prefix(&prefix)
                .set_continuation_token(continuation.clone())
                .send()
                .await
                .map_err(|err| classify(err, "list_objects_v2"))?;

            let keys: Vec<String> = listed
                .contents()
                .iter()
                .filter_map(|obj| obj.key().map(|k| k.to_string()))
                .collect();

            for batch in keys.chunks(DELETE_BATCH) {
                let identifiers: Vec<ObjectIdentifier> = batch
                    .iter()
                    .map(|key| {
                        ObjectIdentifier::builder()
                            .key(key)
                            .build()
                            .map_err(|err| StorageError::Validation(err.to_string()))
                    })
                    .collect::<StorageResult<_>>()?;
                let delete = Delete::builder()
                    .set_objects(Some(identifiers))
                    .quiet(true)
                    .build()
                    .map_err(|err| StorageError::Validation(err.to_string()))?;
                self.client
                    .delete_objects()
                    .bucket(&self.bucket)
                    .delete(delete)
                    .send()
                    .await
                    .map_err(|err| classify(err, "delete_objects"))?;
                deleted += batch.len() as u64;
            }

            continuation = listed.next_continuation_token().map(|t| t.to_string());
            if continuation.is_none() {
                break;
            }
        }

        Ok(deleted)
    }

    async fn list_objects(&self, options: ListOptions) -> StorageResult<ObjectList> {
        let listed = self
            .client
            .list_objects_v2()
            .bucket(&self.bucket)
            .prefix(&options.prefix)
            .set_max_keys(options.max_keys.map(|n| n as i32))
            .set_continuation_token(options.continuation_token)
            .send()
            .await
            .map_err(|err| classify(err, "list_objects_v2"))?;

        let objects = listed
            .contents()
            .iter()
            .filter_map(|obj| {
                obj.key().map(|key| ObjectInfo {
                    key: key.to_string(),
                    size: obj.size().unwrap_or(0) as u64,
                })
            })
            .collect();

        Ok(ObjectList {
            objects,
            next_continuation_token: listed.next_continuation_token().map(|t| t.to_string()),
        })
    }

    async fn get_signed_url(&self, key: &str, options: SignedUrlOptions) -> StorageResult<String> {
        let expires = Duration::from_secs(options.expires_in_seconds.max(1));
        let presigning = PresigningConfig::expires_in(expires)
            .map_err(|err| StorageError::Validation(err.to_string()))?;

        let presigned = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(key)
            .set_response_content_type(options.response_content_type)
            .set_response_content_disposition(options.response_content_disposition)
            .presigned(presigning)
            .await
            .map_err(|err| classify(err, "presign_get_object"))?;

        Ok(presigned.uri().to_string())
    }

    async fn upload_stream(
        &self,
        key: &str,
        mut reader: ByteReader,
        content_type: &str,
    ) -> StorageResult<UploadedObject> {
        // Buffer in 5 MB parts; a single undersized part falls back to a
        // plain PutObject.
        let mut parts: Vec<Bytes> = Vec::new();
        let mut current = Vec::with_capacity(MULTIPART_CHUNK_BYTES);
        let mut buf = vec![0u8; 64 * 1024];
        let mut size = 0u64;
        loop {
            let read = reader.read(&mut buf).await?;
            if read == 0 {
                break;
            }
            size += read as u64;
            current.extend_from_slice(&buf[..read]);
            if current.len() >= MULTIPART_CHUNK_BYTES {
                parts.push(Bytes::from(std::mem::take(&mut current)));
            }
        }
        if !current.is_empty() || parts.is_empty() {
            parts.push(Bytes::from(current));
        }

        if parts.len() == 1 {
            let only = parts.pop().unwrap_or_default();
            return self.put(key.to_string(), only, content_type).await;
        }
        self.multipart_upload(key, parts, content_type, size).await
    }

    async fn health_check(&self) -> StorageResult<()> {
        let probe_key = format!(".health-check/{}", Uuid::new_v4());
        self.put(probe_key.clone(), Bytes::from_static(b"ok"), "text/plain")
            .await?;
        let read = self.get_object(&probe_key).await?;
        self.delete_object(&probe_key).await?;
        if read.as_ref() != b"ok" {
            return Err(StorageError::Io("health probe readback mismatch".to_string()));
        }
        Ok(())
    }

    fn public_url(&self, key: &str) -> String {
        format!("{}/{}", self.public_base, key)
    }

    fn backend_name(&self) -> &'static str {
        "s3"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::StorageConfig;

    fn s3_config(endpoint: Option<&str>, path_style: bool) -> StorageConfig {
        StorageConfig::S3 {
            endpoint: endpoint.map(|e| e.to_string()),
            region: "us-east-1".to_string(),
            bucket: "bugspotter".to_string(),
            access_key_id: "test".to_string(),
            secret_access_key: "test".to_string(),
            force_path_style: path_style,
            sse: None,
            sse_kms_key_id: None,
            storage_class: None,
        }
    }

    #[tokio::test]
    async fn public_url_uses_path_style_for_custom_endpoints() {
        let storage = S3Storage::init(&s3_config(Some("http://minio:9000"), true))
            .await
            .unwrap();
        assert_eq!(
            storage.public_url("screenshots/a/b/original.png"),
            "http://minio:9000/bugspotter/screenshots/a/b/original.png"
        );
    }

    #[tokio::test]
    async fn public_url_defaults_to_virtual_hosted_style() {
        let storage = S3Storage::init(&s3_config(None, false)).await.unwrap();
        assert_eq!(
            storage.public_url("replays/a/b/metadata.json"),
            "https://bugspotter.s3.us-east-1.amazonaws.com/replays/a/b/metadata.json"
        );
    }

    #[tokio::test]
    async fn rejects_unknown_sse_and_storage_class() {
        let mut config = s3_config(None, false);
        if let StorageConfig::S3 { sse, .. } = &mut config {
            *sse = Some("rot13".to_string());
        }
        assert!(matches!(
            S3Storage::init(&config).await,
            Err(StorageError::Validation(_))
        ));

        let mut config = s3_config(None, false);
        if let StorageConfig::S3 { storage_class, .. } = &mut config {
            *storage_class = Some("TAPE".to_string());
        }
        assert!(matches!(
            S3Storage::init(&config).await,
            Err(StorageError::Validation(_))
        ));
    }
}
