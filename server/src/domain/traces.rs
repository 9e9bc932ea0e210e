//! Trace service

use std::sync::Arc;

use crate::data::TelemetryStore;
use crate::data::types::{Observation, Score, Trace, TraceUpdate};
use crate::utils::tsid::Tsid;

use super::{DomainError, WriteOutcome, require_hex_id};

/// Default environment when a trace does not carry one
const DEFAULT_ENVIRONMENT: &str = "production";

/// A trace together with its observations.
#[derive(Debug, Clone, serde::Serialize)]
pub struct TraceWithObservations {
    pub trace: Trace,
    pub observations: Vec<Observation>,
}

/// A trace together with its scores.
#[derive(Debug, Clone, serde::Serialize)]
pub struct TraceWithScores {
    pub trace: Trace,
    pub scores: Vec<Score>,
}

/// Write-through validation and aggregation for traces.
pub struct TraceService {
    store: Arc<dyn TelemetryStore>,
}

impl TraceService {
    pub fn new(store: Arc<dyn TelemetryStore>) -> Self {
        Self { store }
    }

    fn validate(trace: &Trace) -> Result<(), DomainError> {
        require_hex_id(&trace.id, 32, "trace id")?;
        if trace.project_id.is_nil() {
            return Err(DomainError::Validation("project id is required".into()));
        }
        if trace.name.is_empty() {
            return Err(DomainError::Validation("trace name is required".into()));
        }
        Ok(())
    }

    /// Create a trace. Idempotent on the trace id: a second create for the
    /// same id is reported as [`WriteOutcome::Duplicate`] and leaves the row
    /// untouched.
    pub async fn create(&self, mut trace: Trace) -> Result<WriteOutcome, DomainError> {
        Self::validate(&trace)?;

        if trace.environment.is_empty() {
            trace.environment = DEFAULT_ENVIRONMENT.to_string();
        }
        if trace.attributes.is_null() {
            trace.attributes = serde_json::json!({});
        }
        trace.is_deleted = false;
        trace.recompute_duration();

        if self
            .store
            .get_trace(trace.project_id, &trace.id)
            .await?
            .is_some()
        {
            return Ok(WriteOutcome::Duplicate);
        }

        self.store.insert_trace(trace).await?;
        Ok(WriteOutcome::Written)
    }

    /// Partial update via read-merge-write. Unset fields are preserved; the
    /// store layer bumps the version.
    pub async fn update(
        &self,
        project_id: Tsid,
        trace_id: &str,
        update: TraceUpdate,
    ) -> Result<(), DomainError> {
        require_hex_id(trace_id, 32, "trace id")?;

        let mut trace = self
            .store
            .get_trace(project_id, trace_id)
            .await?
            .ok_or_else(|| DomainError::not_found("trace", trace_id))?;

        trace.merge(&update);
        self.store.update_trace(trace).await?;
        Ok(())
    }

    /// Overwrite the aggregate metrics; called by the aggregation worker.
    pub async fn update_metrics(
        &self,
        project_id: Tsid,
        trace_id: &str,
        total_cost: f64,
        total_tokens: u64,
        observation_count: u64,
    ) -> Result<(), DomainError> {
        let mut trace = self
            .store
            .get_trace(project_id, trace_id)
            .await?
            .ok_or_else(|| DomainError::not_found("trace", trace_id))?;

        trace.total_cost = total_cost;
        trace.total_tokens = total_tokens;
        trace.observation_count = observation_count;
        self.store.update_trace(trace).await?;
        Ok(())
    }

    pub async fn get(&self, project_id: Tsid, trace_id: &str) -> Result<Trace, DomainError> {
        self.store
            .get_trace(project_id, trace_id)
            .await?
            .ok_or_else(|| DomainError::not_found("trace", trace_id))
    }

    pub async fn get_with_observations(
        &self,
        project_id: Tsid,
        trace_id: &str,
    ) -> Result<TraceWithObservations, DomainError> {
        let trace = self.get(project_id, trace_id).await?;
        let observations = self
            .store
            .get_observations_for_trace(project_id, trace_id)
            .await?;
        Ok(TraceWithObservations {
            trace,
            observations,
        })
    }

    pub async fn get_with_scores(
        &self,
        project_id: Tsid,
        trace_id: &str,
    ) -> Result<TraceWithScores, DomainError> {
        let trace = self.get(project_id, trace_id).await?;
        let scores = self.store.get_scores_for_trace(project_id, trace_id).await?;
        Ok(TraceWithScores { trace, scores })
    }

    /// Soft delete; the row stays in storage and is filtered from reads.
    pub async fn delete(&self, project_id: Tsid, trace_id: &str) -> Result<(), DomainError> {
        self.store.soft_delete_trace(project_id, trace_id).await?;
        Ok(())
    }
}
