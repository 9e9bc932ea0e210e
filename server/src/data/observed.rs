//! Store decorators: audit logging and operation metrics
//!
//! The analytics store is consumed through an ordered chain
//! `base → audit → metrics`, each layer implementing [`TelemetryStore`] and
//! delegating. The audit layer records every write with its entity identity;
//! the metrics layer counts operations and errors for the health endpoint.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::utils::tsid::Tsid;

use super::error::DataError;
use super::traits::TelemetryStore;
use super::types::{Observation, Score, Session, Trace};

// ============================================================================
// AUDIT LAYER
// ============================================================================

/// Logs every write operation with the affected entity identity.
pub struct AuditStore {
    inner: Arc<dyn TelemetryStore>,
}

impl AuditStore {
    pub fn new(inner: Arc<dyn TelemetryStore>) -> Self {
        Self { inner }
    }

    fn record<T>(op: &'static str, entity_id: &str, result: &Result<T, DataError>) {
        match result {
            Ok(_) => tracing::debug!(op, entity_id, "store write"),
            Err(e) => tracing::warn!(op, entity_id, error = %e, "store write failed"),
        }
    }
}

#[async_trait]
impl TelemetryStore for AuditStore {
    async fn insert_trace(&self, trace: Trace) -> Result<(), DataError> {
        let id = trace.id.clone();
        let result = self.inner.insert_trace(trace).await;
        Self::record("trace.insert", &id, &result);
        result
    }

    async fn get_trace(
        &self,
        project_id: Tsid,
        trace_id: &str,
    ) -> Result<Option<Trace>, DataError> {
        self.inner.get_trace(project_id, trace_id).await
    }

    async fn update_trace(&self, trace: Trace) -> Result<(), DataError> {
        let id = trace.id.clone();
        let result = self.inner.update_trace(trace).await;
        Self::record("trace.update", &id, &result);
        result
    }

    async fn soft_delete_trace(
        &self,
        project_id: Tsid,
        trace_id: &str,
    ) -> Result<(), DataError> {
        let result = self.inner.soft_delete_trace(project_id, trace_id).await;
        Self::record("trace.delete", trace_id, &result);
        result
    }

    async fn list_traces(
        &self,
        project_id: Tsid,
        from_ts: Option<DateTime<Utc>>,
        to_ts: Option<DateTime<Utc>>,
        limit: u64,
    ) -> Result<Vec<Trace>, DataError> {
        self.inner.list_traces(project_id, from_ts, to_ts, limit).await
    }

    async fn count_traces(&self, project_id: Tsid) -> Result<u64, DataError> {
        self.inner.count_traces(project_id).await
    }

    async fn insert_observation(&self, observation: Observation) -> Result<(), DataError> {
        let id = observation.id.clone();
        let result = self.inner.insert_observation(observation).await;
        Self::record("observation.insert", &id, &result);
        result
    }

    async fn get_observation(
        &self,
        project_id: Tsid,
        observation_id: &str,
    ) -> Result<Option<Observation>, DataError> {
        self.inner.get_observation(project_id, observation_id).await
    }

    async fn update_observation(&self, observation: Observation) -> Result<(), DataError> {
        let id = observation.id.clone();
        let result = self.inner.update_observation(observation).await;
        Self::record("observation.update", &id, &result);
        result
    }

    async fn soft_delete_observation(
        &self,
        project_id: Tsid,
        observation_id: &str,
    ) -> Result<(), DataError> {
        let result = self
            .inner
            .soft_delete_observation(project_id, observation_id)
            .await;
        Self::record("observation.delete", observation_id, &result);
        result
    }

    async fn get_observations_for_trace(
        &self,
        project_id: Tsid,
        trace_id: &str,
    ) -> Result<Vec<Observation>, DataError> {
        self.inner
            .get_observations_for_trace(project_id, trace_id)
            .await
    }

    async fn count_observations(&self, project_id: Tsid) -> Result<u64, DataError> {
        self.inner.count_observations(project_id).await
    }

    async fn insert_score(&self, score: Score) -> Result<(), DataError> {
        let id = score.id.to_string();
        let result = self.inner.insert_score(score).await;
        Self::record("score.insert", &id, &result);
        result
    }

    async fn get_score(
        &self,
        project_id: Tsid,
        score_id: Tsid,
    ) -> Result<Option<Score>, DataError> {
        self.inner.get_score(project_id, score_id).await
    }

    async fn get_scores_for_trace(
        &self,
        project_id: Tsid,
        trace_id: &str,
    ) -> Result<Vec<Score>, DataError> {
        self.inner.get_scores_for_trace(project_id, trace_id).await
    }

    async fn count_scores(&self, project_id: Tsid) -> Result<u64, DataError> {
        self.inner.count_scores(project_id).await
    }

    async fn upsert_session(&self, session: Session) -> Result<(), DataError> {
        let id = session.id.clone();
        let result = self.inner.upsert_session(session).await;
        Self::record("session.upsert", &id, &result);
        result
    }

    async fn get_session(
        &self,
        project_id: Tsid,
        session_id: &str,
    ) -> Result<Option<Session>, DataError> {
        self.inner.get_session(project_id, session_id).await
    }

    async fn health_check(&self) -> Result<(), DataError> {
        self.inner.health_check().await
    }

    fn backend_name(&self) -> &'static str {
        self.inner.backend_name()
    }
}

// ============================================================================
// METRICS LAYER
// ============================================================================

/// Operation counters exposed on the health endpoint.
#[derive(Default)]
pub struct StoreCounters {
    pub writes: AtomicU64,
    pub reads: AtomicU64,
    pub errors: AtomicU64,
}

/// Snapshot of [`StoreCounters`] for serialization.
#[derive(Debug, Clone, serde::Serialize)]
pub struct StoreCountersSnapshot {
    pub writes: u64,
    pub reads: u64,
    pub errors: u64,
}

impl StoreCounters {
    pub fn snapshot(&self) -> StoreCountersSnapshot {
        StoreCountersSnapshot {
            writes: self.writes.load(Ordering::Relaxed),
            reads: self.reads.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
        }
    }
}

/// Counts operations and errors.
pub struct MetricsStore {
    inner: Arc<dyn TelemetryStore>,
    counters: Arc<StoreCounters>,
}

impl MetricsStore {
    pub fn new(inner: Arc<dyn TelemetryStore>) -> Self {
        Self {
            inner,
            counters: Arc::new(StoreCounters::default()),
        }
    }

    pub fn counters(&self) -> Arc<StoreCounters> {
        Arc::clone(&self.counters)
    }

    fn count_write<T>(&self, result: &Result<T, DataError>) {
        self.counters.writes.fetch_add(1, Ordering::Relaxed);
        if result.is_err() {
            self.counters.errors.fetch_add(1, Ordering::Relaxed);
        }
    }

    fn count_read<T>(&self, result: &Result<T, DataError>) {
        self.counters.reads.fetch_add(1, Ordering::Relaxed);
        if result.is_err() {
            self.counters.errors.fetch_add(1, Ordering::Relaxed);
        }
    }
}

#[async_trait]
impl TelemetryStore for MetricsStore {
    async fn insert_trace(&self, trace: Trace) -> Result<(), DataError> {
        let result = self.inner.insert_trace(trace).await;
        self.count_write(&result);
        result
    }

    async fn get_trace(
        &self,
        project_id: Tsid,
        trace_id: &str,
    ) -> Result<Option<Trace>, DataError> {
        let result = self.inner.get_trace(project_id, trace_id).await;
        self.count_read(&result);
        result
    }

    async fn update_trace(&self, trace: Trace) -> Result<(), DataError> {
        let result = self.inner.update_trace(trace).await;
        self.count_write(&result);
        result
    }

    async fn soft_delete_trace(
        &self,
        project_id: Tsid,
        trace_id: &str,
    ) -> Result<(), DataError> {
        let result = self.inner.soft_delete_trace(project_id, trace_id).await;
        self.count_write(&result);
        result
    }

    async fn list_traces(
        &self,
        project_id: Tsid,
        from_ts: Option<DateTime<Utc>>,
        to_ts: Option<DateTime<Utc>>,
        limit: u64,
    ) -> Result<Vec<Trace>, DataError> {
        let result = self.inner.list_traces(project_id, from_ts, to_ts, limit).await;
        self.count_read(&result);
        result
    }

    async fn count_traces(&self, project_id: Tsid) -> Result<u64, DataError> {
        let result = self.inner.count_traces(project_id).await;
        self.count_read(&result);
        result
    }

    async fn insert_observation(&self, observation: Observation) -> Result<(), DataError> {
        let result = self.inner.insert_observation(observation).await;
        self.count_write(&result);
        result
    }

    async fn get_observation(
        &self,
        project_id: Tsid,
        observation_id: &str,
    ) -> Result<Option<Observation>, DataError> {
        let result = self.inner.get_observation(project_id, observation_id).await;
        self.count_read(&result);
        result
    }

    async fn update_observation(&self, observation: Observation) -> Result<(), DataError> {
        let result = self.inner.update_observation(observation).await;
        self.count_write(&result);
        result
    }

    async fn soft_delete_observation(
        &self,
        project_id: Tsid,
        observation_id: &str,
    ) -> Result<(), DataError> {
        let result = self
            .inner
            .soft_delete_observation(project_id, observation_id)
            .await;
        self.count_write(&result);
        result
    }

    async fn get_observations_for_trace(
        &self,
        project_id: Tsid,
        trace_id: &str,
    ) -> Result<Vec<Observation>, DataError> {
        let result = self
            .inner
            .get_observations_for_trace(project_id, trace_id)
            .await;
        self.count_read(&result);
        result
    }

    async fn count_observations(&self, project_id: Tsid) -> Result<u64, DataError> {
        let result = self.inner.count_observations(project_id).await;
        self.count_read(&result);
        result
    }

    async fn insert_score(&self, score: Score) -> Result<(), DataError> {
        let result = self.inner.insert_score(score).await;
        self.count_write(&result);
        result
    }

    async fn get_score(
        &self,
        project_id: Tsid,
        score_id: Tsid,
    ) -> Result<Option<Score>, DataError> {
        let result = self.inner.get_score(project_id, score_id).await;
        self.count_read(&result);
        result
    }

    async fn get_scores_for_trace(
        &self,
        project_id: Tsid,
        trace_id: &str,
    ) -> Result<Vec<Score>, DataError> {
        let result = self.inner.get_scores_for_trace(project_id, trace_id).await;
        self.count_read(&result);
        result
    }

    async fn count_scores(&self, project_id: Tsid) -> Result<u64, DataError> {
        let result = self.inner.count_scores(project_id).await;
        self.count_read(&result);
        result
    }

    async fn upsert_session(&self, session: Session) -> Result<(), DataError> {
        let result = self.inner.upsert_session(session).await;
        self.count_write(&result);
        result
    }

    async fn get_session(
        &self,
        project_id: Tsid,
        session_id: &str,
    ) -> Result<Option<Session>, DataError> {
        let result = self.inner.get_session(project_id, session_id).await;
        self.count_read(&result);
        result
    }

    async fn health_check(&self) -> Result<(), DataError> {
        self.inner.health_check().await
    }

    fn backend_name(&self) -> &'static str {
        self.inner.backend_name()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::memory::MemoryTelemetryStore;

    #[tokio::test]
    async fn test_metrics_layer_counts_ops() {
        let base: Arc<dyn TelemetryStore> = Arc::new(MemoryTelemetryStore::new());
        let store = MetricsStore::new(Arc::new(AuditStore::new(base)));
        let counters = store.counters();
        let project = Tsid::generate();

        store.get_trace(project, "00").await.unwrap();
        store.count_traces(project).await.unwrap();

        let snapshot = counters.snapshot();
        assert_eq!(snapshot.reads, 2);
        assert_eq!(snapshot.writes, 0);
        assert_eq!(snapshot.errors, 0);
    }
}
