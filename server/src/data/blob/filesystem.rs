//! Filesystem blob storage
//!
//! Stores blobs under `{root}/{project_id}/{kind}/{entity_id}/{blob_id}`.
//! Writes go through a temp file and an atomic rename so readers never see a
//! partial blob.

use std::path::{Path, PathBuf};

use async_trait::async_trait;

use crate::utils::tsid::Tsid;

use super::error::BlobStorageError;
use super::storage::{BlobKey, BlobStorage};

/// Filesystem blob storage
#[derive(Debug, Clone)]
pub struct FilesystemBlobStorage {
    root: PathBuf,
}

impl FilesystemBlobStorage {
    /// Create a new filesystem storage rooted at `root` (created if missing).
    pub async fn new(root: impl Into<PathBuf>) -> Result<Self, BlobStorageError> {
        let root = root.into();
        tokio::fs::create_dir_all(&root).await?;
        tracing::debug!(root = %root.display(), "Filesystem blob storage initialized");
        Ok(Self { root })
    }

    fn blob_path(&self, key: &BlobKey) -> PathBuf {
        self.root.join(key.relative_path())
    }

    fn project_dir(&self, project_id: Tsid) -> PathBuf {
        self.root.join(project_id.to_string())
    }

    /// Recursively count regular files under a directory.
    fn count_files(dir: &Path) -> u64 {
        let mut count = 0;
        if let Ok(entries) = std::fs::read_dir(dir) {
            for entry in entries.flatten() {
                let path = entry.path();
                if path.is_dir() {
                    count += Self::count_files(&path);
                } else {
                    count += 1;
                }
            }
        }
        count
    }
}

#[async_trait]
impl BlobStorage for FilesystemBlobStorage {
    async fn store(&self, key: &BlobKey, data: &[u8]) -> Result<(), BlobStorageError> {
        let path = self.blob_path(key);

        if tokio::fs::try_exists(&path).await? {
            tracing::trace!(path = %path.display(), "Blob already exists, skipping write");
            return Ok(());
        }

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent).await?;
        }

        // Temp-then-rename keeps readers from observing partial writes
        let tmp = path.with_extension("tmp");
        tokio::fs::write(&tmp, data).await?;
        tokio::fs::rename(&tmp, &path).await?;

        tracing::debug!(path = %path.display(), size = data.len(), "Blob stored");
        Ok(())
    }

    async fn get(&self, key: &BlobKey) -> Result<Vec<u8>, BlobStorageError> {
        let path = self.blob_path(key);
        match tokio::fs::read(&path).await {
            Ok(data) => Ok(data),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                Err(BlobStorageError::NotFound {
                    path: key.relative_path(),
                })
            }
            Err(e) => Err(e.into()),
        }
    }

    async fn exists(&self, key: &BlobKey) -> Result<bool, BlobStorageError> {
        Ok(tokio::fs::try_exists(self.blob_path(key)).await?)
    }

    async fn delete(&self, key: &BlobKey) -> Result<(), BlobStorageError> {
        match tokio::fs::remove_file(self.blob_path(key)).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }

    async fn delete_project(&self, project_id: Tsid) -> Result<u64, BlobStorageError> {
        let dir = self.project_dir(project_id);
        if !tokio::fs::try_exists(&dir).await? {
            return Ok(0);
        }
        let count = {
            let dir = dir.clone();
            tokio::task::spawn_blocking(move || Self::count_files(&dir))
                .await
                .map_err(|e| BlobStorageError::Backend(e.to_string()))?
        };
        tokio::fs::remove_dir_all(&dir).await?;
        tracing::debug!(project_id = %project_id, deleted = count, "Project blobs deleted");
        Ok(count)
    }

    async fn health_check(&self) -> Result<(), BlobStorageError> {
        if !tokio::fs::try_exists(&self.root).await? {
            return Err(BlobStorageError::Backend(format!(
                "blob root missing: {}",
                self.root.display()
            )));
        }
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "filesystem"
    }
}
