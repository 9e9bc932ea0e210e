//! Observation service
//!
//! Write-through validation for spans, large-payload offload to blob
//! storage, usage/cost detail finalization, and the aggregate folds the
//! trace service pulls from.

use std::collections::HashMap;
use std::sync::Arc;

use chrono::Utc;

use crate::data::TelemetryStore;
use crate::data::blob::{BlobKind, BlobService};
use crate::data::types::{Observation, ObservationUpdate};
use crate::utils::preview::payload_preview;
use crate::utils::tsid::Tsid;

use super::{DomainError, WriteOutcome, require_hex_id};

/// Usage detail keys (token counts)
pub const USAGE_INPUT: &str = "input_tokens";
pub const USAGE_OUTPUT: &str = "output_tokens";
pub const USAGE_TOTAL: &str = "total_tokens";

/// Cost detail keys (USD)
pub const COST_INPUT: &str = "input";
pub const COST_OUTPUT: &str = "output";
pub const COST_TOTAL: &str = "total";

/// Write-through validation and payload handling for observations.
pub struct ObservationService {
    store: Arc<dyn TelemetryStore>,
    blob: Option<Arc<BlobService>>,
    preview_limit: usize,
}

impl ObservationService {
    pub fn new(
        store: Arc<dyn TelemetryStore>,
        blob: Option<Arc<BlobService>>,
        preview_limit: usize,
    ) -> Self {
        Self {
            store,
            blob,
            preview_limit,
        }
    }

    fn validate(observation: &Observation) -> Result<(), DomainError> {
        require_hex_id(&observation.id, 16, "observation id")?;
        require_hex_id(&observation.trace_id, 32, "trace id")?;
        if observation.project_id.is_nil() {
            return Err(DomainError::Validation("project id is required".into()));
        }
        if observation.name.is_empty() {
            return Err(DomainError::Validation("observation name is required".into()));
        }
        Ok(())
    }

    /// Create an observation. The parent observation's existence is NOT
    /// verified: events arrive asynchronously and a child may land before
    /// its parent. Idempotent on the observation id.
    pub async fn create(&self, mut observation: Observation) -> Result<WriteOutcome, DomainError> {
        Self::validate(&observation)?;

        // Duplicate delivery is expected (at-least-once transport); check
        // before the blob upload so replays do not orphan blobs
        if self
            .store
            .get_observation(observation.project_id, &observation.id)
            .await?
            .is_some()
        {
            return Ok(WriteOutcome::Duplicate);
        }

        observation.is_deleted = false;
        if observation.attributes.is_null() {
            observation.attributes = serde_json::json!({});
        }
        if observation.model_parameters.is_null() {
            observation.model_parameters = serde_json::json!({});
        }
        observation.recompute_duration();
        // Wire payloads carry the SDK-reported maps under usage_details /
        // cost_details; those are the provided values
        if observation.provided_usage_details.is_empty() && !observation.usage_details.is_empty() {
            observation.provided_usage_details = std::mem::take(&mut observation.usage_details);
        }
        if observation.provided_cost_details.is_empty() && !observation.cost_details.is_empty() {
            observation.provided_cost_details = std::mem::take(&mut observation.cost_details);
        }
        finalize_usage(&mut observation);
        finalize_cost(&mut observation);
        self.offload_payloads(&mut observation).await;

        self.store.insert_observation(observation).await?;
        Ok(WriteOutcome::Written)
    }

    /// Partial update via read-merge-write.
    pub async fn update(
        &self,
        project_id: Tsid,
        observation_id: &str,
        update: ObservationUpdate,
    ) -> Result<(), DomainError> {
        require_hex_id(observation_id, 16, "observation id")?;

        let mut observation = self
            .store
            .get_observation(project_id, observation_id)
            .await?
            .ok_or_else(|| DomainError::not_found("observation", observation_id))?;

        observation.merge(&update);
        finalize_usage(&mut observation);
        finalize_cost(&mut observation);
        self.offload_payloads(&mut observation).await;

        self.store.update_observation(observation).await?;
        Ok(())
    }

    /// Complete an observation: record its end time and final payloads.
    /// Rejects with `Conflict` when the observation already has an end time.
    pub async fn complete(
        &self,
        project_id: Tsid,
        observation_id: &str,
        mut update: ObservationUpdate,
    ) -> Result<(), DomainError> {
        require_hex_id(observation_id, 16, "observation id")?;

        let mut observation = self
            .store
            .get_observation(project_id, observation_id)
            .await?
            .ok_or_else(|| DomainError::not_found("observation", observation_id))?;

        if observation.is_completed() {
            return Err(DomainError::Conflict(format!(
                "observation {observation_id} is already completed"
            )));
        }

        if update.end_time.is_none() {
            update.end_time = Some(Utc::now());
        }

        observation.merge(&update);
        finalize_usage(&mut observation);
        finalize_cost(&mut observation);
        self.offload_payloads(&mut observation).await;

        self.store.update_observation(observation).await?;
        Ok(())
    }

    pub async fn get(
        &self,
        project_id: Tsid,
        observation_id: &str,
    ) -> Result<Observation, DomainError> {
        self.store
            .get_observation(project_id, observation_id)
            .await?
            .ok_or_else(|| DomainError::not_found("observation", observation_id))
    }

    /// Get an observation with offloaded payloads resolved from blob
    /// storage. A failed blob fetch falls back to the stored preview.
    pub async fn get_with_full_content(
        &self,
        project_id: Tsid,
        observation_id: &str,
    ) -> Result<Observation, DomainError> {
        let mut observation = self.get(project_id, observation_id).await?;

        if let Some(blob) = &self.blob {
            if observation.input.is_none()
                && let Some(blob_id) = observation.input_blob_id.clone()
            {
                observation.input = Some(
                    self.resolve_blob(
                        blob,
                        project_id,
                        BlobKind::ObservationInput,
                        &observation.id,
                        &blob_id,
                        &observation.input_preview,
                    )
                    .await,
                );
            }
            if observation.output.is_none()
                && let Some(blob_id) = observation.output_blob_id.clone()
            {
                observation.output = Some(
                    self.resolve_blob(
                        blob,
                        project_id,
                        BlobKind::ObservationOutput,
                        &observation.id,
                        &blob_id,
                        &observation.output_preview,
                    )
                    .await,
                );
            }
        }

        Ok(observation)
    }

    async fn resolve_blob(
        &self,
        blob: &BlobService,
        project_id: Tsid,
        kind: BlobKind,
        entity_id: &str,
        blob_id: &str,
        preview: &str,
    ) -> String {
        match blob.fetch_payload(project_id, kind, entity_id, blob_id).await {
            Ok(data) => String::from_utf8_lossy(&data).into_owned(),
            Err(e) => {
                tracing::warn!(
                    error = %e,
                    blob_id,
                    entity_id,
                    "Blob fetch failed, falling back to preview"
                );
                preview.to_string()
            }
        }
    }

    /// Set usage details and persist; the total is backfilled when absent.
    pub async fn set_usage(
        &self,
        project_id: Tsid,
        observation_id: &str,
        usage: HashMap<String, u64>,
    ) -> Result<(), DomainError> {
        let mut observation = self.get(project_id, observation_id).await?;
        observation.provided_usage_details = usage;
        finalize_usage(&mut observation);
        self.store.update_observation(observation).await?;
        Ok(())
    }

    /// Set cost details and persist; the total is backfilled when absent.
    pub async fn set_cost(
        &self,
        project_id: Tsid,
        observation_id: &str,
        cost: HashMap<String, f64>,
    ) -> Result<(), DomainError> {
        let mut observation = self.get(project_id, observation_id).await?;
        observation.provided_cost_details = cost;
        finalize_cost(&mut observation);
        self.store.update_observation(observation).await?;
        Ok(())
    }

    /// Total cost of a trace: fold of `cost_details["total"]` over its
    /// observations.
    pub async fn calculate_trace_cost(
        &self,
        project_id: Tsid,
        trace_id: &str,
    ) -> Result<f64, DomainError> {
        let observations = self
            .store
            .get_observations_for_trace(project_id, trace_id)
            .await?;
        Ok(observations
            .iter()
            .filter_map(|o| o.cost_details.get(COST_TOTAL))
            .sum())
    }

    /// Total tokens of a trace: fold of `usage_details["total_tokens"]`.
    pub async fn calculate_trace_tokens(
        &self,
        project_id: Tsid,
        trace_id: &str,
    ) -> Result<u64, DomainError> {
        let observations = self
            .store
            .get_observations_for_trace(project_id, trace_id)
            .await?;
        Ok(observations
            .iter()
            .filter_map(|o| o.usage_details.get(USAGE_TOTAL))
            .sum())
    }

    /// Number of live observations in a trace.
    pub async fn count_trace_observations(
        &self,
        project_id: Tsid,
        trace_id: &str,
    ) -> Result<u64, DomainError> {
        let observations = self
            .store
            .get_observations_for_trace(project_id, trace_id)
            .await?;
        Ok(observations.len() as u64)
    }

    pub async fn delete(
        &self,
        project_id: Tsid,
        observation_id: &str,
    ) -> Result<(), DomainError> {
        self.store
            .soft_delete_observation(project_id, observation_id)
            .await?;
        Ok(())
    }

    /// Compute previews and offload large payloads.
    ///
    /// The preview is ALWAYS populated from the inline payload, whether or
    /// not it is offloaded. Offload failure falls back to inline storage
    /// with a warning; the write still succeeds.
    async fn offload_payloads(&self, observation: &mut Observation) {
        if let Some(input) = observation.input.clone() {
            observation.input_preview = payload_preview(&input, self.preview_limit);
            if observation.input_blob_id.is_none()
                && let Some(blob) = self.should_offload(&input)
            {
                match blob
                    .store_payload(
                        observation.project_id,
                        BlobKind::ObservationInput,
                        &observation.id,
                        input.as_bytes(),
                    )
                    .await
                {
                    Ok(blob_id) => {
                        observation.input_blob_id = Some(blob_id);
                        observation.input = None;
                    }
                    Err(e) => {
                        tracing::warn!(
                            error = %e,
                            observation_id = %observation.id,
                            "Input blob upload failed, storing inline"
                        );
                    }
                }
            }
        }

        if let Some(output) = observation.output.clone() {
            observation.output_preview = payload_preview(&output, self.preview_limit);
            if observation.output_blob_id.is_none()
                && let Some(blob) = self.should_offload(&output)
            {
                match blob
                    .store_payload(
                        observation.project_id,
                        BlobKind::ObservationOutput,
                        &observation.id,
                        output.as_bytes(),
                    )
                    .await
                {
                    Ok(blob_id) => {
                        observation.output_blob_id = Some(blob_id);
                        observation.output = None;
                    }
                    Err(e) => {
                        tracing::warn!(
                            error = %e,
                            observation_id = %observation.id,
                            "Output blob upload failed, storing inline"
                        );
                    }
                }
            }
        }
    }

    fn should_offload(&self, payload: &str) -> Option<&BlobService> {
        self.blob
            .as_deref()
            .filter(|blob| blob.should_offload(payload.len()))
    }
}

/// Fill `usage_details` from the provided map; `total_tokens` is backfilled
/// as `input_tokens + output_tokens` when absent.
pub fn finalize_usage(observation: &mut Observation) {
    observation.usage_details = observation.provided_usage_details.clone();
    if !observation.usage_details.contains_key(USAGE_TOTAL) {
        let input = observation.usage_details.get(USAGE_INPUT).copied().unwrap_or(0);
        let output = observation
            .usage_details
            .get(USAGE_OUTPUT)
            .copied()
            .unwrap_or(0);
        observation
            .usage_details
            .insert(USAGE_TOTAL.to_string(), input + output);
    }
}

/// Fill `cost_details` from the provided map; `total` is backfilled as
/// `input + output` when absent.
pub fn finalize_cost(observation: &mut Observation) {
    observation.cost_details = observation.provided_cost_details.clone();
    if !observation.cost_details.contains_key(COST_TOTAL) {
        let input = observation.cost_details.get(COST_INPUT).copied().unwrap_or(0.0);
        let output = observation
            .cost_details
            .get(COST_OUTPUT)
            .copied()
            .unwrap_or(0.0);
        observation
            .cost_details
            .insert(COST_TOTAL.to_string(), input + output);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::blob::FilesystemBlobStorage;
    use crate::data::memory::MemoryTelemetryStore;
    use crate::data::types::{ObservationType, StatusCode};
    use crate::utils::preview::DEFAULT_PREVIEW_LIMIT;

    const OBS_ID: &str = "b7ad6b7169203331";
    const TRACE_ID: &str = "0af7651916cd43dd8448eb211c80319c";

    fn observation(project_id: Tsid) -> Observation {
        Observation {
            id: OBS_ID.to_string(),
            trace_id: TRACE_ID.to_string(),
            parent_observation_id: Some("00f067aa0ba902b7".to_string()),
            project_id,
            name: "llm-call".to_string(),
            span_kind: None,
            observation_type: ObservationType::Generation,
            start_time: Utc::now(),
            end_time: None,
            duration_ms: None,
            status_code: StatusCode::Unset,
            status_message: None,
            level: None,
            attributes: serde_json::Value::Null,
            input: Some("what is 2+2".to_string()),
            output: None,
            input_preview: String::new(),
            output_preview: String::new(),
            input_blob_id: None,
            output_blob_id: None,
            model_name: None,
            model_provider: None,
            internal_model_id: None,
            model_parameters: serde_json::Value::Null,
            provided_usage_details: HashMap::new(),
            usage_details: HashMap::new(),
            provided_cost_details: HashMap::new(),
            cost_details: HashMap::new(),
            prompt_id: None,
            prompt_name: None,
            prompt_version: None,
            time_to_first_token_ms: None,
            retry_count: 0,
            error_message: None,
            is_deleted: false,
            version: 0,
            event_ts: Utc::now(),
        }
    }

    fn plain_service() -> ObservationService {
        ObservationService::new(
            Arc::new(MemoryTelemetryStore::new()),
            None,
            DEFAULT_PREVIEW_LIMIT,
        )
    }

    async fn blob_service(dir: &std::path::Path, threshold: usize) -> ObservationService {
        let storage = Arc::new(FilesystemBlobStorage::new(dir).await.unwrap());
        ObservationService::new(
            Arc::new(MemoryTelemetryStore::new()),
            Some(Arc::new(BlobService::new(storage, threshold))),
            DEFAULT_PREVIEW_LIMIT,
        )
    }

    #[tokio::test]
    async fn test_create_does_not_require_parent() {
        let service = plain_service();
        let project = Tsid::generate();
        // Parent 00f067aa0ba902b7 was never created; create still succeeds
        let outcome = service.create(observation(project)).await.unwrap();
        assert_eq!(outcome, WriteOutcome::Written);
    }

    #[tokio::test]
    async fn test_create_populates_preview_without_offload() {
        let service = plain_service();
        let project = Tsid::generate();
        service.create(observation(project)).await.unwrap();

        let stored = service.get(project, OBS_ID).await.unwrap();
        assert_eq!(stored.input_preview, "what is 2+2");
        assert_eq!(stored.input.as_deref(), Some("what is 2+2"));
        assert!(stored.input_blob_id.is_none());
    }

    #[tokio::test]
    async fn test_large_payload_offloaded_with_preview() {
        let dir = tempfile::tempdir().unwrap();
        let service = blob_service(dir.path(), 64).await;
        let project = Tsid::generate();

        let mut obs = observation(project);
        obs.input = Some("x".repeat(500));
        service.create(obs).await.unwrap();

        let stored = service.get(project, OBS_ID).await.unwrap();
        assert!(stored.input.is_none(), "inline payload nulled out");
        assert!(stored.input_blob_id.is_some());
        assert!(!stored.input_preview.is_empty());
        assert!(stored.input_preview.chars().count() <= DEFAULT_PREVIEW_LIMIT);

        let full = service.get_with_full_content(project, OBS_ID).await.unwrap();
        assert_eq!(full.input.as_deref(), Some("x".repeat(500).as_str()));
    }

    #[tokio::test]
    async fn test_small_payload_stays_inline() {
        let dir = tempfile::tempdir().unwrap();
        let service = blob_service(dir.path(), 10_000).await;
        let project = Tsid::generate();

        service.create(observation(project)).await.unwrap();
        let stored = service.get(project, OBS_ID).await.unwrap();
        assert!(stored.input_blob_id.is_none());
        assert_eq!(stored.input.as_deref(), Some("what is 2+2"));
    }

    #[tokio::test]
    async fn test_complete_sets_end_and_conflicts_on_repeat() {
        let service = plain_service();
        let project = Tsid::generate();
        service.create(observation(project)).await.unwrap();

        service
            .complete(
                project,
                OBS_ID,
                ObservationUpdate {
                    output: Some("4".to_string()),
                    status_code: Some(StatusCode::Ok),
                    ..Default::default()
                },
            )
            .await
            .unwrap();

        let stored = service.get(project, OBS_ID).await.unwrap();
        assert!(stored.is_completed());
        assert_eq!(stored.output.as_deref(), Some("4"));
        assert_eq!(stored.output_preview, "4");

        let second = service
            .complete(project, OBS_ID, ObservationUpdate::default())
            .await;
        assert!(matches!(second, Err(DomainError::Conflict(_))));
    }

    #[tokio::test]
    async fn test_usage_total_backfill() {
        let mut obs = observation(Tsid::generate());
        obs.provided_usage_details = HashMap::from([
            (USAGE_INPUT.to_string(), 10),
            (USAGE_OUTPUT.to_string(), 32),
        ]);
        finalize_usage(&mut obs);
        assert_eq!(obs.usage_details.get(USAGE_TOTAL), Some(&42));

        // Provided total wins
        obs.provided_usage_details
            .insert(USAGE_TOTAL.to_string(), 100);
        finalize_usage(&mut obs);
        assert_eq!(obs.usage_details.get(USAGE_TOTAL), Some(&100));
    }

    #[tokio::test]
    async fn test_cost_total_backfill() {
        let mut obs = observation(Tsid::generate());
        obs.provided_cost_details = HashMap::from([
            (COST_INPUT.to_string(), 0.001),
            (COST_OUTPUT.to_string(), 0.002),
        ]);
        finalize_cost(&mut obs);
        let total = obs.cost_details.get(COST_TOTAL).copied().unwrap();
        assert!((total - 0.003).abs() < 1e-12);
    }

    #[tokio::test]
    async fn test_trace_folds() {
        let service = plain_service();
        let project = Tsid::generate();

        for (i, cost, tokens) in [(1u8, 0.002, 30u64), (2, 0.003, 12)] {
            let mut obs = observation(project);
            obs.id = format!("b7ad6b716920333{i}");
            obs.provided_cost_details = HashMap::from([(COST_TOTAL.to_string(), cost)]);
            obs.provided_usage_details = HashMap::from([(USAGE_TOTAL.to_string(), tokens)]);
            service.create(obs).await.unwrap();
        }

        let cost = service.calculate_trace_cost(project, TRACE_ID).await.unwrap();
        assert!((cost - 0.005).abs() < 1e-12);
        assert_eq!(
            service
                .calculate_trace_tokens(project, TRACE_ID)
                .await
                .unwrap(),
            42
        );
        assert_eq!(
            service
                .count_trace_observations(project, TRACE_ID)
                .await
                .unwrap(),
            2
        );
    }
}
