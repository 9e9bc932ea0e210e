//! Data layer: stores, stream transport, and shared types

pub mod blob;
pub mod clickhouse;
pub mod dedup;
pub mod error;
pub mod memory;
pub mod observed;
pub mod streams;
pub mod traits;
pub mod types;

pub use error::DataError;
pub use traits::TelemetryStore;

use std::sync::Arc;

use crate::core::config::{AnalyticsBackend, AnalyticsConfig};

use observed::{AuditStore, MetricsStore, StoreCounters};

/// The composed analytics store (`base → audit → metrics`) plus the metrics
/// layer's counters for the health endpoint.
pub struct AnalyticsHandle {
    pub store: Arc<dyn TelemetryStore>,
    pub counters: Arc<StoreCounters>,
}

/// Build the analytics store from config and wrap it in the decorator chain.
pub async fn init_store(config: &AnalyticsConfig) -> Result<AnalyticsHandle, DataError> {
    let base: Arc<dyn TelemetryStore> = match config.backend {
        AnalyticsBackend::Memory => Arc::new(memory::MemoryTelemetryStore::new()),
        AnalyticsBackend::Clickhouse => {
            let clickhouse_config = config.clickhouse.as_ref().ok_or_else(|| {
                DataError::Config("clickhouse section required for clickhouse backend".to_string())
            })?;
            Arc::new(clickhouse::ClickhouseStore::init(clickhouse_config).await?)
        }
    };

    let audited = Arc::new(AuditStore::new(base));
    let metered = MetricsStore::new(audited);
    let counters = metered.counters();

    Ok(AnalyticsHandle {
        store: Arc::new(metered),
        counters,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_init_store_memory_chain() {
        let handle = init_store(&AnalyticsConfig::default()).await.unwrap();
        assert_eq!(handle.store.backend_name(), "memory");
        handle.store.health_check().await.unwrap();
        assert_eq!(handle.counters.snapshot().reads, 0);
    }
}
