//! Deduplication store
//!
//! Short-TTL claim space over event ids. The ingest path claims every event
//! id before publishing; ids that fail the claim are reported back to the
//! client as duplicates and never re-enter the pipeline.

mod backend;
pub mod error;
mod memory;
mod redis;

pub use backend::{ClaimOutcome, DedupBackend, DedupEntry};
pub use error::DedupError;
pub use memory::MemoryDedupStore;
pub use redis::RedisDedupStore;

use std::sync::Arc;
use std::time::Duration;

use crate::core::config::{TransportBackend, TransportConfig};
use crate::utils::tsid::Tsid;

/// Dedup store facade owning the configured TTL.
pub struct DedupService {
    backend: Arc<dyn DedupBackend>,
    ttl: Duration,
}

impl DedupService {
    pub fn new(backend: Arc<dyn DedupBackend>, ttl: Duration) -> Self {
        Self { backend, ttl }
    }

    /// Build from the transport config section.
    pub async fn from_config(config: &TransportConfig) -> Result<Self, DedupError> {
        let backend: Arc<dyn DedupBackend> = match config.backend {
            TransportBackend::Memory => Arc::new(MemoryDedupStore::new()),
            TransportBackend::Redis => {
                let url = config.redis_url.as_deref().ok_or_else(|| {
                    DedupError::Config("redis_url required for redis backend".to_string())
                })?;
                Arc::new(RedisDedupStore::new(url).await?)
            }
        };
        Ok(Self::new(backend, config.dedup_ttl()))
    }

    pub async fn claim(
        &self,
        project_id: Tsid,
        batch_id: Tsid,
        ids: &[Tsid],
    ) -> Result<ClaimOutcome, DedupError> {
        self.backend.claim(project_id, batch_id, ids, self.ttl).await
    }

    pub async fn release(&self, project_id: Tsid, ids: &[Tsid]) -> Result<(), DedupError> {
        self.backend.release(project_id, ids).await
    }

    pub async fn exists(&self, project_id: Tsid, id: Tsid) -> Result<bool, DedupError> {
        self.backend.exists(project_id, id).await
    }

    pub async fn count_by_project(&self, project_id: Tsid) -> Result<u64, DedupError> {
        self.backend.count_by_project(project_id).await
    }

    pub async fn health_check(&self) -> Result<(), DedupError> {
        self.backend.health_check().await
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.backend_name()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_service_uses_configured_ttl() {
        let store = Arc::new(MemoryDedupStore::new());
        let service = DedupService::new(store.clone(), Duration::from_secs(3600));
        let project = Tsid::generate();
        let id = Tsid::generate();

        service
            .claim(project, Tsid::generate(), &[id])
            .await
            .unwrap();

        let entry = store.get(project, id).unwrap();
        assert_eq!(
            entry.expires_at.timestamp_millis(),
            id.timestamp_millis() + 3_600_000
        );
    }

    #[tokio::test]
    async fn test_from_config_memory() {
        let service = DedupService::from_config(&TransportConfig::default())
            .await
            .unwrap();
        assert_eq!(service.backend_name(), "memory");
    }
}
