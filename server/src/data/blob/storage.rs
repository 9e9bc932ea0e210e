//! Blob storage trait definition

use async_trait::async_trait;

use crate::utils::tsid::Tsid;

use super::error::BlobStorageError;

/// What a blob holds; one path segment in the key layout.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BlobKind {
    ObservationInput,
    ObservationOutput,
}

impl BlobKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::ObservationInput => "observation-input",
            Self::ObservationOutput => "observation-output",
        }
    }
}

/// Fully qualified blob location: `<project_id>/<kind>/<entity_id>/<blob_id>`.
#[derive(Debug, Clone)]
pub struct BlobKey {
    pub project_id: Tsid,
    pub kind: BlobKind,
    pub entity_id: String,
    pub blob_id: String,
}

impl BlobKey {
    pub fn relative_path(&self) -> String {
        format!(
            "{}/{}/{}/{}",
            self.project_id,
            self.kind.as_str(),
            self.entity_id,
            self.blob_id
        )
    }
}

/// Trait for blob storage backends
///
/// All implementations must be thread-safe (Send + Sync) for use in async
/// contexts. Blobs are immutable once written; storing to an existing key is
/// a no-op.
#[async_trait]
pub trait BlobStorage: Send + Sync {
    /// Store a blob.
    async fn store(&self, key: &BlobKey, data: &[u8]) -> Result<(), BlobStorageError>;

    /// Retrieve a blob; NotFound if it does not exist.
    async fn get(&self, key: &BlobKey) -> Result<Vec<u8>, BlobStorageError>;

    /// Check whether a blob exists.
    async fn exists(&self, key: &BlobKey) -> Result<bool, BlobStorageError>;

    /// Delete a blob. Does not fail if it does not exist.
    async fn delete(&self, key: &BlobKey) -> Result<(), BlobStorageError>;

    /// Delete every blob for a project; returns the number deleted.
    async fn delete_project(&self, project_id: Tsid) -> Result<u64, BlobStorageError>;

    /// Health check (validates the backing store is reachable/writable)
    async fn health_check(&self) -> Result<(), BlobStorageError>;

    /// Backend name for debugging/logging
    fn backend_name(&self) -> &'static str;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_relative_path_layout() {
        let project_id = Tsid::generate();
        let key = BlobKey {
            project_id,
            kind: BlobKind::ObservationOutput,
            entity_id: "b7ad6b7169203331".to_string(),
            blob_id: "01890a5d".to_string(),
        };
        assert_eq!(
            key.relative_path(),
            format!("{project_id}/observation-output/b7ad6b7169203331/01890a5d")
        );
    }
}
