//! Batch acceptance pipeline
//!
//! `validate → claim event ids → publish claimed subset → 202`. The dedup
//! claim is the single acceptance gate: ids that fail it are reported as
//! duplicates and never published; a publish failure rolls every claim back
//! so the client can retry the batch verbatim.

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use chrono::Utc;

use crate::core::constants::MAX_BATCH_EVENTS;
use crate::data::dedup::DedupService;
use crate::data::streams::StreamService;
use crate::data::types::{BatchEnvelope, EnvelopeEvent};
use crate::domain::DomainError;
use crate::utils::tsid::Tsid;

use super::metrics::IngestMetrics;
use super::types::{BatchResponse, TelemetryBatchRequest};

pub struct IngestService {
    dedup: Arc<DedupService>,
    streams: Arc<StreamService>,
    metrics: Arc<IngestMetrics>,
}

/// Rollback guard for claimed event ids.
///
/// The hot path runs under a request deadline; if the request future is
/// dropped after the claim but before the publish completes, the guard's
/// drop spawns the same best-effort release as an explicit publish failure.
/// Disarmed once the publish succeeded.
struct ClaimGuard {
    dedup: Arc<DedupService>,
    project_id: Tsid,
    ids: Vec<Tsid>,
    armed: bool,
}

impl ClaimGuard {
    fn new(dedup: Arc<DedupService>, project_id: Tsid, ids: Vec<Tsid>) -> Self {
        Self {
            dedup,
            project_id,
            ids,
            armed: true,
        }
    }

    fn disarm(&mut self) {
        self.armed = false;
    }
}

impl Drop for ClaimGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        let dedup = Arc::clone(&self.dedup);
        let project_id = self.project_id;
        let ids = std::mem::take(&mut self.ids);
        tokio::spawn(async move {
            if let Err(e) = dedup.release(project_id, &ids).await {
                tracing::warn!(
                    error = %e,
                    count = ids.len(),
                    "Claim rollback failed; claims expire at TTL"
                );
            }
        });
    }
}

impl IngestService {
    pub fn new(
        dedup: Arc<DedupService>,
        streams: Arc<StreamService>,
        metrics: Arc<IngestMetrics>,
    ) -> Self {
        Self {
            dedup,
            streams,
            metrics,
        }
    }

    pub fn metrics(&self) -> &IngestMetrics {
        &self.metrics
    }

    fn validate(request: &TelemetryBatchRequest) -> Result<(), DomainError> {
        if request.project_id.is_nil() {
            return Err(DomainError::Validation("project id is required".into()));
        }
        if request.events.is_empty() {
            return Err(DomainError::Validation(
                "batch must contain at least one event".into(),
            ));
        }
        if request.events.len() > MAX_BATCH_EVENTS {
            return Err(DomainError::Validation(format!(
                "batch exceeds {MAX_BATCH_EVENTS} events ({})",
                request.events.len()
            )));
        }
        for event in &request.events {
            if event.event_id.is_nil() {
                return Err(DomainError::Validation("event id is required".into()));
            }
            if event.payload.is_null() {
                return Err(DomainError::Validation(format!(
                    "event {} has an empty payload",
                    event.event_id
                )));
            }
        }
        Ok(())
    }

    /// Accept a telemetry batch.
    ///
    /// A dedup-store failure fails the request closed: accepting without a
    /// claim would break at-most-once acceptance on the storage layer.
    pub async fn process_batch(
        &self,
        request: TelemetryBatchRequest,
    ) -> Result<BatchResponse, DomainError> {
        let started = Instant::now();

        if let Err(e) = Self::validate(&request) {
            self.metrics.record_rejected();
            return Err(e);
        }

        let batch_id = Tsid::generate();
        let ids: Vec<Tsid> = request.events.iter().map(|e| e.event_id).collect();

        let outcome = match self.dedup.claim(request.project_id, batch_id, &ids).await {
            Ok(outcome) => outcome,
            Err(e) => {
                self.metrics.record_rejected();
                return Err(e.into());
            }
        };

        // Dedup shortcut: nothing new in this batch, nothing to publish
        if outcome.claimed.is_empty() {
            let elapsed_ms = started.elapsed().as_millis() as u64;
            self.metrics.record_batch(0, outcome.duplicates.len(), elapsed_ms);
            tracing::debug!(
                batch_id = %batch_id,
                duplicates = outcome.duplicates.len(),
                "Batch contained only duplicates"
            );
            return Ok(BatchResponse {
                batch_id,
                processed_events: 0,
                duplicate_events: outcome.duplicates.len(),
                failed_events: 0,
                processing_time_ms: elapsed_ms,
                duplicate_event_ids: outcome.duplicates,
            });
        }

        // From here until the publish completes, dropping this future (the
        // request deadline firing) must roll the claims back
        let mut guard = ClaimGuard::new(
            Arc::clone(&self.dedup),
            request.project_id,
            outcome.claimed.clone(),
        );

        // Publish the claimed subset only; the first occurrence of an id
        // carries the claim (later in-batch repeats are duplicates).
        let claimed_set: HashSet<Tsid> = outcome.claimed.iter().copied().collect();
        let mut remaining = claimed_set.clone();
        let events: Vec<EnvelopeEvent> = request
            .events
            .iter()
            .filter(|e| remaining.remove(&e.event_id))
            .map(EnvelopeEvent::from)
            .collect();

        let envelope = BatchEnvelope {
            batch_id,
            project_id: request.project_id,
            events,
            claimed_event_ids: outcome.claimed.clone(),
            metadata: request.metadata,
            timestamp: Utc::now(),
        };

        if let Err(publish_err) = self.streams.publish_envelope(&envelope).await {
            self.metrics.record_publish_failure();
            guard.disarm();
            // Roll back so a retry of the same batch is not seen as duplicate.
            // Best-effort: unreleased claims still expire at TTL.
            if let Err(release_err) = self
                .dedup
                .release(request.project_id, &outcome.claimed)
                .await
            {
                tracing::warn!(
                    batch_id = %batch_id,
                    error = %release_err,
                    "Failed to release claims after publish failure; they will expire at TTL"
                );
            }
            tracing::warn!(batch_id = %batch_id, error = %publish_err, "Stream publish failed");
            return Err(publish_err.into());
        }

        guard.disarm();

        let elapsed_ms = started.elapsed().as_millis() as u64;
        self.metrics
            .record_batch(outcome.claimed.len(), outcome.duplicates.len(), elapsed_ms);

        tracing::debug!(
            batch_id = %batch_id,
            project_id = %request.project_id,
            accepted = outcome.claimed.len(),
            duplicates = outcome.duplicates.len(),
            elapsed_ms,
            "Batch accepted"
        );

        Ok(BatchResponse {
            batch_id,
            processed_events: outcome.claimed.len(),
            duplicate_events: outcome.duplicates.len(),
            failed_events: 0,
            processing_time_ms: elapsed_ms,
            duplicate_event_ids: outcome.duplicates,
        })
    }
}
