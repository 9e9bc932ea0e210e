//! Stream backend trait definition
//!
//! A durable, ordered append-log with consumer groups and at-least-once
//! delivery. Messages persist until acknowledged; unacknowledged messages sit
//! in a per-group pending list and can be claimed by another consumer after a
//! minimum idle time.

use std::pin::Pin;

use async_trait::async_trait;
use futures::Stream;

use super::error::StreamError;

/// Message received from a stream.
#[derive(Debug, Clone)]
pub struct StreamMessage {
    /// Unique entry ID (Redis stream ID or memory sequence)
    pub id: String,
    /// Message payload
    pub payload: Vec<u8>,
    /// Times this entry has been delivered to the group (1 on first read).
    /// Drives the dead-letter-after-max-retries policy.
    pub delivery_count: u64,
}

/// Subscription to a stream with consumer-group semantics.
pub struct StreamSubscription {
    /// Stream of received messages with IDs
    pub receiver: Pin<Box<dyn Stream<Item = Result<StreamMessage, StreamError>> + Send>>,
}

/// Stream statistics for monitoring
#[derive(Debug, Clone, Default, serde::Serialize)]
pub struct StreamStats {
    /// Total entries in the stream
    pub length: u64,
    /// Entries pending acknowledgment
    pub pending: u64,
    /// Number of consumers in the group
    pub consumers: u64,
    /// Oldest pending entry age in milliseconds
    pub oldest_pending_ms: Option<u64>,
}

/// Stream backend trait
///
/// Both the Redis Streams and the in-memory backend implement this.
///
/// Delivery is at-least-once: consumers must tolerate duplicate entries.
/// Ordering is FIFO within a stream key; nothing is guaranteed across keys.
#[async_trait]
pub trait StreamBackend: Send + Sync {
    /// Append a message; returns the monotonic entry ID. Crash-safe for the
    /// durable backend (the write is acknowledged by the server before
    /// returning).
    async fn publish(&self, stream: &str, payload: &[u8]) -> Result<String, StreamError>;

    /// Subscribe with a consumer group. Each entry is delivered to exactly
    /// one consumer in the group until acknowledged.
    ///
    /// # Arguments
    /// - `stream`: stream key
    /// - `group`: consumer group name
    /// - `consumer`: unique consumer name (e.g. `{uuid}:{pid}`)
    async fn subscribe(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
    ) -> Result<StreamSubscription, StreamError>;

    /// Acknowledge an entry, removing it from the pending list.
    async fn ack(&self, stream: &str, group: &str, id: &str) -> Result<(), StreamError>;

    /// Acknowledge a batch of entries.
    async fn ack_batch(&self, stream: &str, group: &str, ids: &[String])
    -> Result<(), StreamError>;

    /// Claim pending entries that have been idle at least `min_idle_ms`,
    /// re-assigning them to `consumer`. Delivery counts reflect the claim.
    async fn claim(
        &self,
        stream: &str,
        group: &str,
        consumer: &str,
        min_idle_ms: u64,
        count: usize,
    ) -> Result<Vec<StreamMessage>, StreamError>;

    /// Stream statistics for monitoring.
    async fn stats(&self, stream: &str, group: &str) -> Result<StreamStats, StreamError>;

    /// Health check (validates connection)
    async fn health_check(&self) -> Result<(), StreamError>;

    /// Backend name for debugging/logging
    fn backend_name(&self) -> &'static str;
}
