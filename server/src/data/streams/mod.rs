//! Stream transport
//!
//! Durable, consumer-grouped event log carrying accepted telemetry batches
//! from the ingest path to the worker pool. The ingest stream is partitioned
//! by project id so a project's batches stay FIFO relative to each other;
//! nothing is ordered across partitions. Each partition has a `:dlq` sibling
//! stream holding permanently failed envelopes.

mod backend;
pub mod error;
mod memory;
mod redis;

pub use backend::{StreamBackend, StreamMessage, StreamStats, StreamSubscription};
pub use error::StreamError;
pub use memory::MemoryStreamBackend;
pub use redis::RedisStreamBackend;

use std::hash::{Hash, Hasher};
use std::sync::Arc;

use chrono::Utc;
use rustc_hash::FxHasher;

use crate::core::config::{TransportBackend, TransportConfig};
use crate::core::constants::{INGEST_STREAM_PREFIX, INGEST_CONSUMER_GROUP};
use crate::data::types::{BatchEnvelope, DeadLetterEnvelope};
use crate::utils::tsid::Tsid;

/// Stream transport facade owning partitioning and envelope serialization.
pub struct StreamService {
    backend: Arc<dyn StreamBackend>,
    partitions: u32,
}

impl StreamService {
    pub fn new(backend: Arc<dyn StreamBackend>, partitions: u32) -> Self {
        Self {
            backend,
            partitions: partitions.max(1),
        }
    }

    /// Build from the transport config section.
    pub async fn from_config(config: &TransportConfig) -> Result<Self, StreamError> {
        let backend: Arc<dyn StreamBackend> = match config.backend {
            TransportBackend::Memory => Arc::new(MemoryStreamBackend::new()),
            TransportBackend::Redis => {
                let url = config.redis_url.as_deref().ok_or_else(|| {
                    StreamError::Config("redis_url required for redis backend".to_string())
                })?;
                Arc::new(
                    RedisStreamBackend::new(url)
                        .await?
                        .with_maxlen(config.stream_maxlen),
                )
            }
        };
        Ok(Self::new(backend, config.stream_partitions))
    }

    pub fn partition_count(&self) -> u32 {
        self.partitions
    }

    /// Partition for a project: a project's batches always colocate.
    pub fn partition_for(&self, project_id: Tsid) -> u32 {
        let mut hasher = FxHasher::default();
        project_id.hash(&mut hasher);
        (hasher.finish() % self.partitions as u64) as u32
    }

    /// Stream key for a partition.
    pub fn partition_key(partition: u32) -> String {
        format!("{INGEST_STREAM_PREFIX}:{partition}")
    }

    /// Dead-letter sibling stream key for a partition.
    pub fn dlq_key(partition: u32) -> String {
        format!("{INGEST_STREAM_PREFIX}:{partition}:dlq")
    }

    /// The consumer group used by the worker pool.
    pub fn consumer_group() -> &'static str {
        INGEST_CONSUMER_GROUP
    }

    /// Publish a batch envelope to its project's partition.
    ///
    /// Returns the partition and the assigned entry id.
    pub async fn publish_envelope(
        &self,
        envelope: &BatchEnvelope,
    ) -> Result<(u32, String), StreamError> {
        let partition = self.partition_for(envelope.project_id);
        let payload = serde_json::to_vec(envelope)?;
        let entry_id = self
            .backend
            .publish(&Self::partition_key(partition), &payload)
            .await?;
        Ok((partition, entry_id))
    }

    /// Append a permanently failed envelope to the partition's dead-letter
    /// stream.
    pub async fn dead_letter(
        &self,
        partition: u32,
        envelope: BatchEnvelope,
        reason: &str,
        retry_count: u64,
    ) -> Result<String, StreamError> {
        let dead = DeadLetterEnvelope {
            message: envelope,
            reason: reason.to_string(),
            failed_at: Utc::now(),
            retry_count,
        };
        let payload = serde_json::to_vec(&dead)?;
        self.backend
            .publish(&Self::dlq_key(partition), &payload)
            .await
    }

    pub async fn subscribe(
        &self,
        partition: u32,
        consumer: &str,
    ) -> Result<StreamSubscription, StreamError> {
        self.backend
            .subscribe(&Self::partition_key(partition), Self::consumer_group(), consumer)
            .await
    }

    pub async fn ack(&self, partition: u32, id: &str) -> Result<(), StreamError> {
        self.backend
            .ack(&Self::partition_key(partition), Self::consumer_group(), id)
            .await
    }

    pub async fn claim(
        &self,
        partition: u32,
        consumer: &str,
        min_idle_ms: u64,
        count: usize,
    ) -> Result<Vec<StreamMessage>, StreamError> {
        self.backend
            .claim(
                &Self::partition_key(partition),
                Self::consumer_group(),
                consumer,
                min_idle_ms,
                count,
            )
            .await
    }

    pub async fn stats(&self, partition: u32) -> Result<StreamStats, StreamError> {
        self.backend
            .stats(&Self::partition_key(partition), Self::consumer_group())
            .await
    }

    pub async fn health_check(&self) -> Result<(), StreamError> {
        self.backend.health_check().await
    }

    pub fn backend_name(&self) -> &'static str {
        self.backend.backend_name()
    }
}
