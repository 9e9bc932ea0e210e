//! S3 blob storage
//!
//! Stores blobs in AWS S3 (or S3-compatible services like MinIO) under
//! `{prefix}/{project_id}/{kind}/{entity_id}/{blob_id}`.

use async_trait::async_trait;
use aws_sdk_s3::Client;
use aws_sdk_s3::primitives::ByteStream;

use crate::utils::tsid::Tsid;

use super::error::BlobStorageError;
use super::storage::{BlobKey, BlobStorage};

/// S3 blob storage
#[derive(Debug, Clone)]
pub struct S3BlobStorage {
    client: Client,
    bucket: String,
    prefix: String,
}

impl S3BlobStorage {
    /// Create a new S3 storage with the given configuration.
    pub async fn new(
        bucket: String,
        prefix: String,
        region: Option<String>,
        endpoint: Option<String>,
    ) -> Result<Self, BlobStorageError> {
        let mut config_loader = aws_config::defaults(aws_config::BehaviorVersion::latest());

        if let Some(region) = region {
            config_loader = config_loader.region(aws_sdk_s3::config::Region::new(region));
        }

        let config = config_loader.load().await;

        let mut s3_config = aws_sdk_s3::config::Builder::from(&config);
        if let Some(endpoint_url) = endpoint {
            // force_path_style is required for most S3-compatible services
            s3_config = s3_config.endpoint_url(endpoint_url).force_path_style(true);
        }

        let client = Client::from_conf(s3_config.build());

        tracing::debug!(bucket = %bucket, prefix = %prefix, "S3 blob storage initialized");

        Ok(Self {
            client,
            bucket,
            prefix,
        })
    }

    fn object_key(&self, key: &BlobKey) -> String {
        format!("{}/{}", self.prefix, key.relative_path())
    }

    fn project_prefix(&self, project_id: Tsid) -> String {
        format!("{}/{}/", self.prefix, project_id)
    }
}

#[async_trait]
impl BlobStorage for S3BlobStorage {
    async fn store(&self, key: &BlobKey, data: &[u8]) -> Result<(), BlobStorageError> {
        let object_key = self.object_key(key);

        // Blobs are immutable; skip the upload if the id already exists
        match self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(&object_key)
            .send()
            .await
        {
            Ok(_) => {
                tracing::trace!(key = %object_key, "Blob already exists in S3, skipping upload");
                return Ok(());
            }
            Err(err) => {
                let service_err = err.into_service_error();
                if !service_err.is_not_found() {
                    return Err(BlobStorageError::Backend(format!(
                        "S3 head_object error: {service_err}"
                    )));
                }
            }
        }

        self.client
            .put_object()
            .bucket(&self.bucket)
            .key(&object_key)
            .body(ByteStream::from(data.to_vec()))
            .send()
            .await
            .map_err(|e| BlobStorageError::Backend(format!("S3 put_object error: {e}")))?;

        tracing::debug!(key = %object_key, size = data.len(), "Blob stored in S3");
        Ok(())
    }

    async fn get(&self, key: &BlobKey) -> Result<Vec<u8>, BlobStorageError> {
        let object_key = self.object_key(key);

        let response = self
            .client
            .get_object()
            .bucket(&self.bucket)
            .key(&object_key)
            .send()
            .await
            .map_err(|e| {
                let service_err = e.into_service_error();
                if service_err.is_no_such_key() {
                    BlobStorageError::NotFound {
                        path: key.relative_path(),
                    }
                } else {
                    BlobStorageError::Backend(format!("S3 get_object error: {service_err}"))
                }
            })?;

        let data = response
            .body
            .collect()
            .await
            .map_err(|e| BlobStorageError::Backend(format!("S3 body read error: {e}")))?
            .into_bytes()
            .to_vec();

        Ok(data)
    }

    async fn exists(&self, key: &BlobKey) -> Result<bool, BlobStorageError> {
        match self
            .client
            .head_object()
            .bucket(&self.bucket)
            .key(self.object_key(key))
            .send()
            .await
        {
            Ok(_) => Ok(true),
            Err(err) => {
                let service_err = err.into_service_error();
                if service_err.is_not_found() {
                    Ok(false)
                } else {
                    Err(BlobStorageError::Backend(format!(
                        "S3 head_object error: {service_err}"
                    )))
                }
            }
        }
    }

    async fn delete(&self, key: &BlobKey) -> Result<(), BlobStorageError> {
        // delete_object does not fail if the object doesn't exist
        self.client
            .delete_object()
            .bucket(&self.bucket)
            .key(self.object_key(key))
            .send()
            .await
            .map_err(|e| BlobStorageError::Backend(format!("S3 delete_object error: {e}")))?;
        Ok(())
    }

    async fn delete_project(&self, project_id: Tsid) -> Result<u64, BlobStorageError> {
        let prefix = self.project_prefix(project_id);
        let mut deleted_count = 0u64;
        let mut continuation_token: Option<String> = None;

        loop {
            let mut request = self
                .client
                .list_objects_v2()
                .bucket(&self.bucket)
                .prefix(&prefix);

            if let Some(token) = continuation_token {
                request = request.continuation_token(token);
            }

            let response = request.send().await.map_err(|e| {
                BlobStorageError::Backend(format!("S3 list_objects_v2 error: {e}"))
            })?;

            let objects: Vec<_> = response
                .contents()
                .iter()
                .filter_map(|obj| obj.key().map(|k| k.to_string()))
                .collect();

            if objects.is_empty() {
                break;
            }

            // S3 allows up to 1000 deletions per request
            for chunk in objects.chunks(1000) {
                let delete_objects: Vec<_> = chunk
                    .iter()
                    .filter_map(|key| {
                        aws_sdk_s3::types::ObjectIdentifier::builder()
                            .key(key)
                            .build()
                            .ok()
                    })
                    .collect();

                let delete_request = aws_sdk_s3::types::Delete::builder()
                    .set_objects(Some(delete_objects))
                    .build()
                    .map_err(|e| {
                        BlobStorageError::Backend(format!("S3 delete request build error: {e}"))
                    })?;

                self.client
                    .delete_objects()
                    .bucket(&self.bucket)
                    .delete(delete_request)
                    .send()
                    .await
                    .map_err(|e| {
                        BlobStorageError::Backend(format!("S3 delete_objects error: {e}"))
                    })?;

                deleted_count += chunk.len() as u64;
            }

            if response.is_truncated() == Some(true) {
                continuation_token = response.next_continuation_token().map(|s| s.to_string());
            } else {
                break;
            }
        }

        tracing::debug!(
            project_id = %project_id,
            deleted = deleted_count,
            "Project blobs deleted from S3"
        );

        Ok(deleted_count)
    }

    async fn health_check(&self) -> Result<(), BlobStorageError> {
        self.client
            .head_bucket()
            .bucket(&self.bucket)
            .send()
            .await
            .map_err(|e| BlobStorageError::Backend(format!("S3 head_bucket error: {e}")))?;
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "s3"
    }
}
