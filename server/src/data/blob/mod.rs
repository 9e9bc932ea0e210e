//! Blob storage for large payloads
//!
//! Observation inputs/outputs past the offload threshold are uploaded here
//! and the row keeps only the blob id plus an inline preview.

pub mod error;
mod filesystem;
mod s3;
mod storage;

pub use error::BlobStorageError;
pub use filesystem::FilesystemBlobStorage;
pub use s3::S3BlobStorage;
pub use storage::{BlobKey, BlobKind, BlobStorage};

use std::sync::Arc;

use crate::core::config::{BlobBackend, BlobConfig};
use crate::utils::tsid::Tsid;

/// Blob store facade owning the offload threshold and blob id generation.
pub struct BlobService {
    storage: Arc<dyn BlobStorage>,
    threshold_bytes: usize,
}

impl BlobService {
    pub fn new(storage: Arc<dyn BlobStorage>, threshold_bytes: usize) -> Self {
        Self {
            storage,
            threshold_bytes,
        }
    }

    /// Build from the blob config section; `None` when offload is disabled.
    pub async fn from_config(config: &BlobConfig) -> Result<Option<Self>, BlobStorageError> {
        if !config.enabled {
            return Ok(None);
        }
        let storage: Arc<dyn BlobStorage> = match config.backend {
            BlobBackend::Filesystem => {
                let root = config
                    .root_dir
                    .clone()
                    .unwrap_or_else(|| std::path::PathBuf::from("data/blobs"));
                Arc::new(FilesystemBlobStorage::new(root).await?)
            }
            BlobBackend::S3 => {
                let bucket = config.s3_bucket.clone().ok_or_else(|| {
                    BlobStorageError::Config("s3_bucket required for s3 backend".to_string())
                })?;
                Arc::new(
                    S3BlobStorage::new(
                        bucket,
                        config.s3_prefix.clone(),
                        config.s3_region.clone(),
                        config.s3_endpoint.clone(),
                    )
                    .await?,
                )
            }
        };
        Ok(Some(Self::new(storage, config.offload_threshold_bytes)))
    }

    /// Whether a payload of this size should be offloaded.
    pub fn should_offload(&self, payload_len: usize) -> bool {
        payload_len >= self.threshold_bytes
    }

    /// Upload a payload, returning the generated blob id.
    pub async fn store_payload(
        &self,
        project_id: Tsid,
        kind: BlobKind,
        entity_id: &str,
        data: &[u8],
    ) -> Result<String, BlobStorageError> {
        let blob_id = Tsid::generate().to_string();
        let key = BlobKey {
            project_id,
            kind,
            entity_id: entity_id.to_string(),
            blob_id: blob_id.clone(),
        };
        self.storage.store(&key, data).await?;
        Ok(blob_id)
    }

    /// Fetch a previously offloaded payload.
    pub async fn fetch_payload(
        &self,
        project_id: Tsid,
        kind: BlobKind,
        entity_id: &str,
        blob_id: &str,
    ) -> Result<Vec<u8>, BlobStorageError> {
        let key = BlobKey {
            project_id,
            kind,
            entity_id: entity_id.to_string(),
            blob_id: blob_id.to_string(),
        };
        self.storage.get(&key).await
    }

    pub async fn delete_project(&self, project_id: Tsid) -> Result<u64, BlobStorageError> {
        self.storage.delete_project(project_id).await
    }

    pub async fn health_check(&self) -> Result<(), BlobStorageError> {
        self.storage.health_check().await
    }

    pub fn backend_name(&self) -> &'static str {
        self.storage.backend_name()
    }
}
