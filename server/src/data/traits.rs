//! Analytics store trait
//!
//! One repository trait covering the trace/observation/score/session tables.
//! Implementations are append-oriented: updates write a new row with a
//! bumped version and reads collapse to the highest version (the columnar
//! backend's ReplacingMergeTree semantics; the memory backend mirrors them).
//!
//! # Version discipline
//!
//! - `insert_*` writes version 1, unconditionally. Re-inserting the same
//!   entity is idempotent: the row state converges to version 1.
//! - `update_*` / `upsert_session` write `incoming.version + 1`; callers
//!   pass the version they read (0 for a fresh session).
//! - Soft deletes write a tombstone row (`is_deleted = true`) with a bumped
//!   version; every read filters `is_deleted = false`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::utils::tsid::Tsid;

use super::error::DataError;
use super::types::{Observation, Score, Session, Trace};

#[async_trait]
pub trait TelemetryStore: Send + Sync {
    // ==================== Trace operations ====================

    async fn insert_trace(&self, trace: Trace) -> Result<(), DataError>;

    async fn get_trace(
        &self,
        project_id: Tsid,
        trace_id: &str,
    ) -> Result<Option<Trace>, DataError>;

    async fn update_trace(&self, trace: Trace) -> Result<(), DataError>;

    async fn soft_delete_trace(&self, project_id: Tsid, trace_id: &str)
    -> Result<(), DataError>;

    /// Traces for a project in a time range, newest first.
    async fn list_traces(
        &self,
        project_id: Tsid,
        from_ts: Option<DateTime<Utc>>,
        to_ts: Option<DateTime<Utc>>,
        limit: u64,
    ) -> Result<Vec<Trace>, DataError>;

    async fn count_traces(&self, project_id: Tsid) -> Result<u64, DataError>;

    // ==================== Observation operations ====================

    async fn insert_observation(&self, observation: Observation) -> Result<(), DataError>;

    async fn get_observation(
        &self,
        project_id: Tsid,
        observation_id: &str,
    ) -> Result<Option<Observation>, DataError>;

    async fn update_observation(&self, observation: Observation) -> Result<(), DataError>;

    async fn soft_delete_observation(
        &self,
        project_id: Tsid,
        observation_id: &str,
    ) -> Result<(), DataError>;

    /// All live observations belonging to a trace, oldest first.
    async fn get_observations_for_trace(
        &self,
        project_id: Tsid,
        trace_id: &str,
    ) -> Result<Vec<Observation>, DataError>;

    async fn count_observations(&self, project_id: Tsid) -> Result<u64, DataError>;

    // ==================== Score operations ====================

    async fn insert_score(&self, score: Score) -> Result<(), DataError>;

    async fn get_score(
        &self,
        project_id: Tsid,
        score_id: Tsid,
    ) -> Result<Option<Score>, DataError>;

    /// All live scores attached to a trace, oldest first.
    async fn get_scores_for_trace(
        &self,
        project_id: Tsid,
        trace_id: &str,
    ) -> Result<Vec<Score>, DataError>;

    async fn count_scores(&self, project_id: Tsid) -> Result<u64, DataError>;

    // ==================== Session operations ====================

    async fn upsert_session(&self, session: Session) -> Result<(), DataError>;

    async fn get_session(
        &self,
        project_id: Tsid,
        session_id: &str,
    ) -> Result<Option<Session>, DataError>;

    // ==================== Health ====================

    async fn health_check(&self) -> Result<(), DataError>;

    fn backend_name(&self) -> &'static str;
}
