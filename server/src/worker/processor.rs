//! Stream message processing
//!
//! Dispatches each event in a batch envelope to its domain service by event
//! type. Every write is idempotent keyed on the event's entity id, so
//! duplicate delivery of a message converges to the same row state; the
//! `duplicate_writes` counter records how often that happened.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use serde::Deserialize;

use crate::data::types::{
    BatchEnvelope, EnvelopeEvent, EventType, Observation, ObservationUpdate, Score, Trace,
    TraceUpdate,
};
use crate::domain::observations::ObservationService;
use crate::domain::scores::ScoreService;
use crate::domain::sessions::SessionService;
use crate::domain::traces::TraceService;
use crate::domain::{DomainError, ErrorSeverity, WriteOutcome};
use crate::utils::tsid::Tsid;

use super::fanout::{AggregationJob, AnalyticsFanout, JobPriority};

/// Worker counters for the health endpoint.
#[derive(Default)]
pub struct WorkerCounters {
    pub messages_processed: AtomicU64,
    pub events_processed: AtomicU64,
    pub duplicate_writes: AtomicU64,
    pub transient_retries: AtomicU64,
    pub dead_lettered: AtomicU64,
    pub decode_failures: AtomicU64,
    pub claims_released: AtomicU64,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct WorkerCountersSnapshot {
    pub messages_processed: u64,
    pub events_processed: u64,
    pub duplicate_writes: u64,
    pub transient_retries: u64,
    pub dead_lettered: u64,
    pub decode_failures: u64,
    pub claims_released: u64,
}

impl WorkerCounters {
    pub fn snapshot(&self) -> WorkerCountersSnapshot {
        WorkerCountersSnapshot {
            messages_processed: self.messages_processed.load(Ordering::Relaxed),
            events_processed: self.events_processed.load(Ordering::Relaxed),
            duplicate_writes: self.duplicate_writes.load(Ordering::Relaxed),
            transient_retries: self.transient_retries.load(Ordering::Relaxed),
            dead_lettered: self.dead_lettered.load(Ordering::Relaxed),
            decode_failures: self.decode_failures.load(Ordering::Relaxed),
            claims_released: self.claims_released.load(Ordering::Relaxed),
        }
    }
}

/// Outcome of processing one envelope, mapped from [`ErrorSeverity`].
#[derive(Debug)]
pub enum ProcessOutcome {
    /// All events written (or skipped as duplicates); ack the entry.
    Done,
    /// Transient failure; leave the entry pending for redelivery.
    Transient(DomainError),
    /// Permanent failure; dead-letter the entry.
    Fatal(DomainError),
}

/// `trace.update` event payload: target id plus the partial fields.
#[derive(Deserialize)]
struct TraceUpdatePayload {
    id: String,
    #[serde(flatten)]
    update: TraceUpdate,
}

/// `observation.update` / `observation.complete` event payload.
#[derive(Deserialize)]
struct ObservationUpdatePayload {
    id: String,
    #[serde(flatten)]
    update: ObservationUpdate,
}

pub struct EventProcessor {
    traces: Arc<TraceService>,
    observations: Arc<ObservationService>,
    scores: Arc<ScoreService>,
    sessions: Arc<SessionService>,
    fanout: Arc<AnalyticsFanout>,
    counters: Arc<WorkerCounters>,
}

impl EventProcessor {
    pub fn new(
        traces: Arc<TraceService>,
        observations: Arc<ObservationService>,
        scores: Arc<ScoreService>,
        sessions: Arc<SessionService>,
        fanout: Arc<AnalyticsFanout>,
    ) -> Self {
        Self {
            traces,
            observations,
            scores,
            sessions,
            fanout,
            counters: Arc::new(WorkerCounters::default()),
        }
    }

    pub fn counters(&self) -> Arc<WorkerCounters> {
        Arc::clone(&self.counters)
    }

    /// Process every event in an envelope, in order. The first transient
    /// failure aborts the pass (the whole message is redelivered; completed
    /// events are idempotent on replay). Fatal failures dead-letter the
    /// message.
    pub async fn process_envelope(&self, envelope: &BatchEnvelope) -> ProcessOutcome {
        for event in &envelope.events {
            match self.process_event(envelope.project_id, event).await {
                Ok(()) => {
                    self.counters.events_processed.fetch_add(1, Ordering::Relaxed);
                }
                Err(e) => match e.severity() {
                    ErrorSeverity::Transient => {
                        self.counters.transient_retries.fetch_add(1, Ordering::Relaxed);
                        tracing::debug!(
                            error = %e,
                            event_id = %event.event_id,
                            "Transient failure, leaving message pending"
                        );
                        return ProcessOutcome::Transient(e);
                    }
                    ErrorSeverity::Fatal => {
                        tracing::warn!(
                            error = %e,
                            event_id = %event.event_id,
                            event_type = %event.event_type,
                            "Fatal failure, dead-lettering message"
                        );
                        return ProcessOutcome::Fatal(e);
                    }
                },
            }
        }

        self.counters.messages_processed.fetch_add(1, Ordering::Relaxed);
        self.enqueue_aggregation(envelope);
        ProcessOutcome::Done
    }

    /// Enqueue one aggregation job per trace touched by observation events.
    fn enqueue_aggregation(&self, envelope: &BatchEnvelope) {
        let mut seen = std::collections::HashSet::new();
        for event in &envelope.events {
            let trace_id = match event.event_type {
                EventType::ObservationCreate
                | EventType::ObservationUpdate
                | EventType::ObservationComplete => event
                    .payload
                    .get("trace_id")
                    .and_then(|v| v.as_str())
                    .map(str::to_string),
                _ => None,
            };
            if let Some(trace_id) = trace_id
                && seen.insert(trace_id.clone())
            {
                self.fanout.enqueue(
                    JobPriority::Normal,
                    AggregationJob::RecomputeTraceAggregates {
                        project_id: envelope.project_id,
                        trace_id,
                    },
                );
            }
        }
    }

    async fn process_event(
        &self,
        project_id: Tsid,
        event: &EnvelopeEvent,
    ) -> Result<(), DomainError> {
        match event.event_type {
            EventType::TraceCreate => {
                let mut trace: Trace = decode(&event.payload)?;
                // The envelope's project id is the security boundary
                trace.project_id = project_id;
                let session = trace.session_id.clone();
                let user = trace.user_id.clone();

                if self.traces.create(trace).await? == WriteOutcome::Duplicate {
                    self.counters.duplicate_writes.fetch_add(1, Ordering::Relaxed);
                }
                if let Some(session_id) = session {
                    self.sessions
                        .ensure(project_id, &session_id, user.as_deref())
                        .await?;
                }
                Ok(())
            }
            EventType::TraceUpdate => {
                let payload: TraceUpdatePayload = decode(&event.payload)?;
                self.traces
                    .update(project_id, &payload.id, payload.update)
                    .await
            }
            EventType::ObservationCreate => {
                let mut observation: Observation = decode(&event.payload)?;
                observation.project_id = project_id;
                if self.observations.create(observation).await? == WriteOutcome::Duplicate {
                    self.counters.duplicate_writes.fetch_add(1, Ordering::Relaxed);
                }
                Ok(())
            }
            EventType::ObservationUpdate => {
                let payload: ObservationUpdatePayload = decode(&event.payload)?;
                self.observations
                    .update(project_id, &payload.id, payload.update)
                    .await
            }
            EventType::ObservationComplete => {
                let payload: ObservationUpdatePayload = decode(&event.payload)?;
                self.observations
                    .complete(project_id, &payload.id, payload.update)
                    .await
            }
            EventType::ScoreCreate => {
                let mut score: Score = decode(&event.payload)?;
                score.project_id = project_id;
                if self.scores.create(score).await? == WriteOutcome::Duplicate {
                    self.counters.duplicate_writes.fetch_add(1, Ordering::Relaxed);
                }
                Ok(())
            }
        }
    }
}

fn decode<T: serde::de::DeserializeOwned>(
    payload: &serde_json::Value,
) -> Result<T, DomainError> {
    serde_json::from_value(payload.clone())
        .map_err(|e| DomainError::Validation(format!("malformed event payload: {e}")))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::memory::MemoryTelemetryStore;
    use crate::data::{TelemetryStore, types::StatusCode};
    use crate::utils::preview::DEFAULT_PREVIEW_LIMIT;
    use crate::worker::fanout::fanout_channel;
    use chrono::Utc;
    use std::collections::HashMap;

    const TRACE_ID: &str = "0af7651916cd43dd8448eb211c80319c";
    const OBS_ID: &str = "b7ad6b7169203331";

    struct Harness {
        processor: EventProcessor,
        store: Arc<MemoryTelemetryStore>,
    }

    fn harness() -> Harness {
        let store = Arc::new(MemoryTelemetryStore::new());
        let telemetry: Arc<dyn TelemetryStore> = store.clone();
        let traces = Arc::new(TraceService::new(Arc::clone(&telemetry)));
        let observations = Arc::new(ObservationService::new(
            Arc::clone(&telemetry),
            None,
            DEFAULT_PREVIEW_LIMIT,
        ));
        let scores = Arc::new(ScoreService::new(Arc::clone(&telemetry)));
        let sessions = Arc::new(SessionService::new(Arc::clone(&telemetry)));
        let (fanout, _receivers) = fanout_channel(16);

        Harness {
            processor: EventProcessor::new(
                traces,
                observations,
                scores,
                sessions,
                Arc::new(fanout),
            ),
            store,
        }
    }

    fn trace_payload() -> serde_json::Value {
        serde_json::json!({
            "id": TRACE_ID,
            "project_id": Tsid::generate(),
            "name": "chat",
            "start_time": Utc::now(),
            "session_id": "sess-1",
            "user_id": "u-1",
        })
    }

    fn observation_payload() -> serde_json::Value {
        serde_json::json!({
            "id": OBS_ID,
            "trace_id": TRACE_ID,
            "project_id": Tsid::generate(),
            "name": "llm",
            "type": "GENERATION",
            "start_time": Utc::now(),
            "input": "hello",
        })
    }

    fn envelope(project_id: Tsid, events: Vec<EnvelopeEvent>) -> BatchEnvelope {
        let claimed = events.iter().map(|e| e.event_id).collect();
        BatchEnvelope {
            batch_id: Tsid::generate(),
            project_id,
            events,
            claimed_event_ids: claimed,
            metadata: HashMap::new(),
            timestamp: Utc::now(),
        }
    }

    fn event(event_type: EventType, payload: serde_json::Value) -> EnvelopeEvent {
        EnvelopeEvent {
            event_id: Tsid::generate(),
            event_type,
            payload,
        }
    }

    #[tokio::test]
    async fn test_processes_trace_and_observation() {
        let h = harness();
        let project = Tsid::generate();
        let message = envelope(
            project,
            vec![
                event(EventType::TraceCreate, trace_payload()),
                event(EventType::ObservationCreate, observation_payload()),
            ],
        );

        let outcome = h.processor.process_envelope(&message).await;
        assert!(matches!(outcome, ProcessOutcome::Done));

        // Rows landed under the envelope's project id, not the payload's
        let trace = h.store.get_trace(project, TRACE_ID).await.unwrap().unwrap();
        assert_eq!(trace.name, "chat");
        let observation = h.store.get_observation(project, OBS_ID).await.unwrap().unwrap();
        assert_eq!(observation.input_preview, "hello");

        // Session materialized from the trace
        let session = h.store.get_session(project, "sess-1").await.unwrap().unwrap();
        assert_eq!(session.user_id.as_deref(), Some("u-1"));
    }

    #[tokio::test]
    async fn test_duplicate_delivery_is_idempotent() {
        let h = harness();
        let project = Tsid::generate();
        let message = envelope(
            project,
            vec![
                event(EventType::TraceCreate, trace_payload()),
                event(EventType::ObservationCreate, observation_payload()),
            ],
        );

        assert!(matches!(
            h.processor.process_envelope(&message).await,
            ProcessOutcome::Done
        ));
        assert!(matches!(
            h.processor.process_envelope(&message).await,
            ProcessOutcome::Done
        ));

        // Same row state, not version+2
        let trace = h.store.get_trace(project, TRACE_ID).await.unwrap().unwrap();
        assert_eq!(trace.version, 1);
        assert_eq!(h.store.count_traces(project).await.unwrap(), 1);
        assert_eq!(h.store.count_observations(project).await.unwrap(), 1);
        assert_eq!(h.processor.counters().snapshot().duplicate_writes, 2);
    }

    #[tokio::test]
    async fn test_update_events_apply_in_order() {
        let h = harness();
        let project = Tsid::generate();

        let create = envelope(
            project,
            vec![
                event(EventType::TraceCreate, trace_payload()),
                event(EventType::ObservationCreate, observation_payload()),
            ],
        );
        assert!(matches!(
            h.processor.process_envelope(&create).await,
            ProcessOutcome::Done
        ));

        let updates = envelope(
            project,
            vec![
                event(
                    EventType::TraceUpdate,
                    serde_json::json!({"id": TRACE_ID, "output": "done", "status_code": "OK"}),
                ),
                event(
                    EventType::ObservationComplete,
                    serde_json::json!({"id": OBS_ID, "output": "4", "status_code": "OK"}),
                ),
            ],
        );
        assert!(matches!(
            h.processor.process_envelope(&updates).await,
            ProcessOutcome::Done
        ));

        let trace = h.store.get_trace(project, TRACE_ID).await.unwrap().unwrap();
        assert_eq!(trace.output.as_deref(), Some("done"));
        assert_eq!(trace.status_code, StatusCode::Ok);
        assert_eq!(trace.version, 2);

        let observation = h.store.get_observation(project, OBS_ID).await.unwrap().unwrap();
        assert!(observation.is_completed());
    }

    #[tokio::test]
    async fn test_malformed_payload_is_fatal() {
        let h = harness();
        let message = envelope(
            Tsid::generate(),
            vec![event(EventType::TraceCreate, serde_json::json!({"nope": 1}))],
        );
        assert!(matches!(
            h.processor.process_envelope(&message).await,
            ProcessOutcome::Fatal(DomainError::Validation(_))
        ));
    }

    #[tokio::test]
    async fn test_score_with_missing_target_is_fatal() {
        let h = harness();
        let score = serde_json::json!({
            "id": Tsid::generate(),
            "project_id": Tsid::generate(),
            "trace_id": "ffffffffffffffffffffffffffffffff",
            "name": "quality",
            "data_type": "NUMERIC",
            "numeric_value": 0.3,
        });
        let message = envelope(
            Tsid::generate(),
            vec![event(EventType::ScoreCreate, score)],
        );
        assert!(matches!(
            h.processor.process_envelope(&message).await,
            ProcessOutcome::Fatal(DomainError::NotFound { .. })
        ));
    }
}
