//! Score service
//!
//! Enforces the data-type/value consistency rules and target existence on
//! every write.

use std::sync::Arc;

use crate::data::TelemetryStore;
use crate::data::types::Score;
use crate::utils::tsid::Tsid;

use super::{DomainError, WriteOutcome};

/// Write-through validation for quality scores.
pub struct ScoreService {
    store: Arc<dyn TelemetryStore>,
}

impl ScoreService {
    pub fn new(store: Arc<dyn TelemetryStore>) -> Self {
        Self { store }
    }

    fn validate(score: &Score) -> Result<(), DomainError> {
        if score.project_id.is_nil() {
            return Err(DomainError::Validation("project id is required".into()));
        }
        if score.name.is_empty() {
            return Err(DomainError::Validation("score name is required".into()));
        }
        if score.target_count() != 1 {
            return Err(DomainError::Validation(
                "score must target exactly one of trace, observation, session".into(),
            ));
        }
        if !score.values_consistent() {
            return Err(DomainError::Validation(format!(
                "score value fields inconsistent with data_type {}",
                score.data_type.as_str()
            )));
        }
        Ok(())
    }

    async fn verify_target(&self, score: &Score) -> Result<(), DomainError> {
        if let Some(trace_id) = &score.trace_id {
            self.store
                .get_trace(score.project_id, trace_id)
                .await?
                .ok_or_else(|| DomainError::not_found("trace", trace_id.clone()))?;
        } else if let Some(observation_id) = &score.observation_id {
            self.store
                .get_observation(score.project_id, observation_id)
                .await?
                .ok_or_else(|| DomainError::not_found("observation", observation_id.clone()))?;
        } else if let Some(session_id) = &score.session_id {
            self.store
                .get_session(score.project_id, session_id)
                .await?
                .ok_or_else(|| DomainError::not_found("session", session_id.clone()))?;
        }
        Ok(())
    }

    /// Create a score. The target (trace/observation/session) must exist.
    /// Idempotent on the score id.
    pub async fn create(&self, score: Score) -> Result<WriteOutcome, DomainError> {
        Self::validate(&score)?;
        self.verify_target(&score).await?;

        if self
            .store
            .get_score(score.project_id, score.id)
            .await?
            .is_some()
        {
            return Ok(WriteOutcome::Duplicate);
        }

        self.store.insert_score(score).await?;
        Ok(WriteOutcome::Written)
    }

    pub async fn get(&self, project_id: Tsid, score_id: Tsid) -> Result<Score, DomainError> {
        self.store
            .get_score(project_id, score_id)
            .await?
            .ok_or_else(|| DomainError::not_found("score", score_id.to_string()))
    }

    pub async fn get_for_trace(
        &self,
        project_id: Tsid,
        trace_id: &str,
    ) -> Result<Vec<Score>, DomainError> {
        Ok(self.store.get_scores_for_trace(project_id, trace_id).await?)
    }
}
