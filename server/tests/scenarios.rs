//! End-to-end scenarios over the in-memory backends: full ingest →
//! stream → worker → store pipeline in one process.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use tokio::sync::watch;

use spandrel_server::core::config::WorkerConfig;
use spandrel_server::data::dedup::{DedupService, MemoryDedupStore};
use spandrel_server::data::memory::MemoryTelemetryStore;
use spandrel_server::data::streams::{MemoryStreamBackend, StreamService};
use spandrel_server::data::types::{
    BatchEnvelope, EnvelopeEvent, EventType, TelemetryEvent,
};
use spandrel_server::data::TelemetryStore;
use spandrel_server::domain::observations::ObservationService;
use spandrel_server::domain::otlp::convert_export_request;
use spandrel_server::domain::scores::ScoreService;
use spandrel_server::domain::sessions::SessionService;
use spandrel_server::domain::traces::TraceService;
use spandrel_server::domain::DomainError;
use spandrel_server::ingest::{IngestMetrics, IngestService, TelemetryBatchRequest};
use spandrel_server::utils::preview::DEFAULT_PREVIEW_LIMIT;
use spandrel_server::utils::tsid::Tsid;
use spandrel_server::worker::fanout::{AggregationWorker, FanoutReceivers, fanout_channel};
use spandrel_server::worker::pool::WorkerPool;
use spandrel_server::worker::processor::EventProcessor;

const TRACE_ID: &str = "0af7651916cd43dd8448eb211c80319c";
const OBS_ID: &str = "b7ad6b7169203331";

struct Stack {
    ingest: IngestService,
    streams: Arc<StreamService>,
    store: Arc<MemoryTelemetryStore>,
    processor: Arc<EventProcessor>,
    pool: WorkerPool,
    aggregation: AggregationWorker,
    fanout_receivers: FanoutReceivers,
}

fn stack() -> Stack {
    let dedup = Arc::new(DedupService::new(
        Arc::new(MemoryDedupStore::new()),
        Duration::from_secs(24 * 60 * 60),
    ));
    let streams = Arc::new(StreamService::new(Arc::new(MemoryStreamBackend::new()), 2));
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

    let (fanout, fanout_receivers) = fanout_channel(256);
    let fanout_counters = fanout.counters();
    let fanout = Arc::new(fanout);

    let processor = Arc::new(EventProcessor::new(
        Arc::clone(&traces),
        Arc::clone(&observations),
        scores,
        sessions,
        Arc::clone(&fanout),
    ));

    let pool = WorkerPool::new(
        Arc::clone(&streams),
        Arc::clone(&dedup),
        Arc::clone(&processor),
        WorkerConfig {
            workers_per_partition: 1,
            claim_interval_secs: 1,
            claim_min_idle_ms: 50,
            ..Default::default()
        },
    );
    let aggregation = AggregationWorker::new(
        Arc::clone(&traces),
        Arc::clone(&observations),
        fanout_counters,
    );

    Stack {
        ingest: IngestService::new(
            Arc::clone(&dedup),
            Arc::clone(&streams),
            Arc::new(IngestMetrics::new()),
        ),
        streams,
        store,
        processor,
        pool,
        aggregation,
        fanout_receivers,
    }
}

fn trace_event() -> TelemetryEvent {
    TelemetryEvent {
        event_id: Tsid::generate(),
        event_type: EventType::TraceCreate,
        payload: serde_json::json!({
            "id": TRACE_ID,
            "project_id": Tsid::generate(),
            "name": "chat-request",
            "start_time": Utc::now(),
        }),
        timestamp: None,
    }
}

fn observation_event() -> TelemetryEvent {
    TelemetryEvent {
        event_id: Tsid::generate(),
        event_type: EventType::ObservationCreate,
        payload: serde_json::json!({
            "id": OBS_ID,
            "trace_id": TRACE_ID,
            "project_id": Tsid::generate(),
            "name": "llm-call",
            "type": "GENERATION",
            "start_time": Utc::now(),
            "usage_details": {"input_tokens": 10, "output_tokens": 32},
            "cost_details": {"input": 0.001, "output": 0.002},
        }),
        timestamp: None,
    }
}

fn batch(project_id: Tsid, events: Vec<TelemetryEvent>) -> TelemetryBatchRequest {
    TelemetryBatchRequest {
        project_id,
        events,
        metadata: HashMap::new(),
    }
}

async fn wait_for<F, Fut>(mut check: F)
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    for _ in 0..200 {
        if check().await {
            return;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
    panic!("condition not reached within timeout");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn s1_happy_path() {
    let stack = stack();
    let project = Tsid::generate();

    let response = stack
        .ingest
        .process_batch(batch(project, vec![trace_event(), observation_event()]))
        .await
        .unwrap();

    assert_eq!(response.processed_events, 2);
    assert_eq!(response.duplicate_events, 0);
    assert_eq!(response.failed_events, 0);
    assert!(response.duplicate_event_ids.is_empty());

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let mut handles = stack.pool.start(shutdown_rx.clone());
    handles.push(stack.aggregation.start(stack.fanout_receivers, shutdown_rx));

    // After the worker drains: one trace row and one observation row
    let store = stack.store.clone();
    wait_for(|| {
        let store = store.clone();
        async move {
            store.get_trace(project, TRACE_ID).await.unwrap().is_some()
                && store.get_observation(project, OBS_ID).await.unwrap().is_some()
        }
    })
    .await;

    // Aggregation catches up: usage and cost folded onto the trace
    wait_for(|| {
        let store = store.clone();
        async move {
            store
                .get_trace(project, TRACE_ID)
                .await
                .unwrap()
                .is_some_and(|t| t.total_tokens == 42 && t.observation_count == 1)
        }
    })
    .await;

    let trace = stack.store.get_trace(project, TRACE_ID).await.unwrap().unwrap();
    assert!((trace.total_cost - 0.003).abs() < 1e-12);

    shutdown_tx.send(true).unwrap();
    for handle in handles {
        let _ = tokio::time::timeout(Duration::from_secs(2), handle).await;
    }
}

#[tokio::test]
async fn s2_all_duplicates() {
    let stack = stack();
    let project = Tsid::generate();
    let request = batch(project, vec![trace_event(), observation_event()]);
    let ids: Vec<Tsid> = request.events.iter().map(|e| e.event_id).collect();

    stack.ingest.process_batch(request.clone()).await.unwrap();
    let second = stack.ingest.process_batch(request).await.unwrap();

    assert_eq!(second.processed_events, 0);
    assert_eq!(second.duplicate_events, 2);
    assert_eq!(second.duplicate_event_ids, ids);

    // No second stream publish
    let partition = stack.streams.partition_for(project);
    assert_eq!(stack.streams.stats(partition).await.unwrap().length, 1);
}

#[tokio::test]
async fn s3_partial_duplicate() {
    let stack = stack();
    let project = Tsid::generate();
    let e1 = trace_event();
    let e2 = observation_event();
    let e3 = observation_event();
    let e4 = observation_event();

    stack
        .ingest
        .process_batch(batch(project, vec![e1.clone(), e2.clone(), e3.clone()]))
        .await
        .unwrap();

    let second = stack
        .ingest
        .process_batch(batch(project, vec![e2.clone(), e3.clone(), e4.clone()]))
        .await
        .unwrap();

    assert_eq!(second.processed_events, 1);
    assert_eq!(second.duplicate_events, 2);
    assert_eq!(second.duplicate_event_ids, vec![e2.event_id, e3.event_id]);

    // The second stream message contains only E4
    use futures::StreamExt;
    let partition = stack.streams.partition_for(project);
    let mut receiver = stack
        .streams
        .subscribe(partition, "probe")
        .await
        .unwrap()
        .receiver;
    let _first = tokio::time::timeout(Duration::from_millis(500), receiver.next())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    let second_msg = tokio::time::timeout(Duration::from_millis(500), receiver.next())
        .await
        .unwrap()
        .unwrap()
        .unwrap();
    let envelope: BatchEnvelope = serde_json::from_slice(&second_msg.payload).unwrap();
    assert_eq!(envelope.events.len(), 1);
    assert_eq!(envelope.events[0].event_id, e4.event_id);
}

#[tokio::test]
async fn s4_publish_rollback() {
    use async_trait::async_trait;
    use spandrel_server::data::streams::{
        StreamBackend, StreamError, StreamMessage, StreamStats, StreamSubscription,
    };

    struct FailingBackend;

    #[async_trait]
    impl StreamBackend for FailingBackend {
        async fn publish(&self, _: &str, _: &[u8]) -> Result<String, StreamError> {
            Err(StreamError::Connection("injected publish failure".into()))
        }
        async fn subscribe(
            &self,
            _: &str,
            _: &str,
            _: &str,
        ) -> Result<StreamSubscription, StreamError> {
            Err(StreamError::Connection("injected".into()))
        }
        async fn ack(&self, _: &str, _: &str, _: &str) -> Result<(), StreamError> {
            Ok(())
        }
        async fn ack_batch(&self, _: &str, _: &str, _: &[String]) -> Result<(), StreamError> {
            Ok(())
        }
        async fn claim(
            &self,
            _: &str,
            _: &str,
            _: &str,
            _: u64,
            _: usize,
        ) -> Result<Vec<StreamMessage>, StreamError> {
            Ok(vec![])
        }
        async fn stats(&self, _: &str, _: &str) -> Result<StreamStats, StreamError> {
            Ok(StreamStats::default())
        }
        async fn health_check(&self) -> Result<(), StreamError> {
            Ok(())
        }
        fn backend_name(&self) -> &'static str {
            "failing"
        }
    }

    let dedup = Arc::new(DedupService::new(
        Arc::new(MemoryDedupStore::new()),
        Duration::from_secs(24 * 60 * 60),
    ));
    let failing = IngestService::new(
        Arc::clone(&dedup),
        Arc::new(StreamService::new(Arc::new(FailingBackend), 1)),
        Arc::new(IngestMetrics::new()),
    );

    let project = Tsid::generate();
    let request = batch(project, vec![trace_event(), observation_event()]);

    let result = failing.process_batch(request.clone()).await;
    assert!(matches!(result, Err(DomainError::PublishFailed(_))));

    // Claims were released; the same batch resubmitted to a healthy stack
    // (sharing the dedup store) is accepted in full
    let healthy = IngestService::new(
        dedup,
        Arc::new(StreamService::new(Arc::new(MemoryStreamBackend::new()), 1)),
        Arc::new(IngestMetrics::new()),
    );
    let retry = healthy.process_batch(request).await.unwrap();
    assert_eq!(retry.processed_events, 2);
    assert_eq!(retry.duplicate_events, 0);
}

#[tokio::test]
async fn s5_idempotent_consumer() {
    let stack = stack();
    let project = Tsid::generate();

    let events: Vec<EnvelopeEvent> = [trace_event(), observation_event()]
        .iter()
        .map(EnvelopeEvent::from)
        .collect();
    let envelope = BatchEnvelope {
        batch_id: Tsid::generate(),
        project_id: project,
        claimed_event_ids: events.iter().map(|e| e.event_id).collect(),
        events,
        metadata: HashMap::new(),
        timestamp: Utc::now(),
    };

    // Deliver the same stream message twice
    stack.processor.process_envelope(&envelope).await;
    stack.processor.process_envelope(&envelope).await;

    // Exactly one row per event id, same version
    assert_eq!(stack.store.count_traces(project).await.unwrap(), 1);
    assert_eq!(stack.store.count_observations(project).await.unwrap(), 1);
    let trace = stack.store.get_trace(project, TRACE_ID).await.unwrap().unwrap();
    assert_eq!(trace.version, 1);

    // duplicate_writes incremented by 2 (one per replayed event)
    assert_eq!(stack.processor.counters().snapshot().duplicate_writes, 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn s6_otlp_root_detection() {
    use opentelemetry_proto::tonic::collector::trace::v1::ExportTraceServiceRequest;
    use opentelemetry_proto::tonic::trace::v1::{ResourceSpans, ScopeSpans, Span};

    let span = Span {
        trace_id: vec![0xab; 16],
        span_id: vec![0xcd; 8],
        parent_span_id: vec![0u8; 8], // all-zero buffer => root
        name: "chat".to_string(),
        kind: 3,
        start_time_unix_nano: 1_700_000_000_000_000_000,
        end_time_unix_nano: 1_700_000_000_900_000_000,
        ..Default::default()
    };
    let request = ExportTraceServiceRequest {
        resource_spans: vec![ResourceSpans {
            resource: None,
            scope_spans: vec![ScopeSpans {
                scope: None,
                spans: vec![span],
                schema_url: String::new(),
            }],
            schema_url: String::new(),
        }],
    };

    let project = Tsid::generate();
    let events = convert_export_request(project, &request).unwrap();

    // A trace.create is synthesized in addition to observation.create
    assert_eq!(events.len(), 2);
    assert_eq!(events[0].event_type, EventType::TraceCreate);
    assert_eq!(events[1].event_type, EventType::ObservationCreate);

    // Routed through the same pipeline, both rows land in the store
    let stack = stack();
    stack
        .ingest
        .process_batch(batch(project, events))
        .await
        .unwrap();

    let (shutdown_tx, shutdown_rx) = watch::channel(false);
    let handles = stack.pool.start(shutdown_rx);

    let store = stack.store.clone();
    let trace_id = hex::encode([0xab; 16]);
    let span_id = hex::encode([0xcd; 8]);
    wait_for(|| {
        let store = store.clone();
        let trace_id = trace_id.clone();
        let span_id = span_id.clone();
        async move {
            store.get_trace(project, &trace_id).await.unwrap().is_some()
                && store.get_observation(project, &span_id).await.unwrap().is_some()
        }
    })
    .await;

    shutdown_tx.send(true).unwrap();
    for handle in handles {
        let _ = tokio::time::timeout(Duration::from_secs(2), handle).await;
    }
}
