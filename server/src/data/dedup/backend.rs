//! Dedup backend trait definition
//!
//! The dedup store is the single source of at-most-once acceptance on the
//! ingest path: an event id is accepted exactly when its claim succeeds.
//! The claim over a whole batch must be one atomic operation; a
//! check-then-register pattern loses atomicity under concurrent identical
//! batches.

use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::utils::tsid::Tsid;

use super::error::DedupError;

/// Result of an atomic batch claim. `claimed` and `duplicates` are disjoint
/// and together cover every id passed in (in-batch repeats of one id land
/// once in `claimed` and once per repeat in `duplicates`).
#[derive(Debug, Clone, Default)]
pub struct ClaimOutcome {
    pub claimed: Vec<Tsid>,
    pub duplicates: Vec<Tsid>,
}

/// A live claim entry, as stored by the memory backend and surfaced by
/// `get` for diagnostics.
#[derive(Debug, Clone)]
pub struct DedupEntry {
    pub event_id: Tsid,
    pub batch_id: Tsid,
    pub project_id: Tsid,
    pub first_seen_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// Key layout: `dedup:<project_id>:<event_id>`, value is the claiming batch
/// id.
pub fn dedup_key(project_id: Tsid, event_id: Tsid) -> String {
    format!("dedup:{project_id}:{event_id}")
}

/// Expiry anchored at the event id's embedded timestamp, not at claim time,
/// so replaying an old batch yields the same expiry instant.
pub fn expires_at_millis(event_id: Tsid, ttl: Duration) -> i64 {
    event_id.timestamp_millis() + ttl.as_millis() as i64
}

/// Dedup backend trait
///
/// Both the Redis and the in-memory backend implement this. All operations
/// are project-scoped through the key layout.
#[async_trait]
pub trait DedupBackend: Send + Sync {
    /// Atomically claim a batch of event ids.
    ///
    /// For each id the claim succeeds iff no live entry exists; the id lands
    /// in `claimed`, otherwise in `duplicates`. The whole batch is one
    /// round trip; partial failure cannot happen.
    async fn claim(
        &self,
        project_id: Tsid,
        batch_id: Tsid,
        ids: &[Tsid],
        ttl: Duration,
    ) -> Result<ClaimOutcome, DedupError>;

    /// Best-effort delete of claims; used for rollback after a publish
    /// failure. Missing keys are not an error.
    async fn release(&self, project_id: Tsid, ids: &[Tsid]) -> Result<(), DedupError>;

    /// Whether a live claim exists for the id.
    async fn exists(&self, project_id: Tsid, id: Tsid) -> Result<bool, DedupError>;

    /// Number of live claims for a project. Health/metrics only; O(keys).
    async fn count_by_project(&self, project_id: Tsid) -> Result<u64, DedupError>;

    /// Health check (validates connection)
    async fn health_check(&self) -> Result<(), DedupError>;

    /// Backend name for debugging/logging
    fn backend_name(&self) -> &'static str;
}
