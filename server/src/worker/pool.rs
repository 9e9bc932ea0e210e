//! Consumer worker pool
//!
//! A fixed pool of consumer tasks per stream partition, all in one consumer
//! group, plus one janitor task per partition that claims entries stuck in
//! the pending list. Acks happen only after successful processing, so a
//! crash between read and ack leaves the entry pending for recovery.

use std::sync::Arc;
use std::sync::atomic::Ordering;
use std::time::Duration;

use futures::StreamExt;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use uuid::Uuid;

use crate::core::config::WorkerConfig;
use crate::data::dedup::DedupService;
use crate::data::streams::{StreamMessage, StreamService};
use crate::data::types::BatchEnvelope;

use super::processor::{EventProcessor, ProcessOutcome};

/// Maximum entries the janitor claims per pass
const CLAIM_MAX_COUNT: usize = 100;

pub struct WorkerPool {
    streams: Arc<StreamService>,
    dedup: Arc<DedupService>,
    processor: Arc<EventProcessor>,
    config: WorkerConfig,
}

impl WorkerPool {
    pub fn new(
        streams: Arc<StreamService>,
        dedup: Arc<DedupService>,
        processor: Arc<EventProcessor>,
        config: WorkerConfig,
    ) -> Self {
        Self {
            streams,
            dedup,
            processor,
            config,
        }
    }

    /// Spawn all consumer and janitor tasks. Handles are returned for
    /// registration with the shutdown service.
    pub fn start(&self, shutdown_rx: watch::Receiver<bool>) -> Vec<JoinHandle<()>> {
        let mut handles = Vec::new();

        for partition in 0..self.streams.partition_count() {
            for worker_idx in 0..self.config.workers_per_partition {
                handles.push(self.spawn_consumer(partition, worker_idx, shutdown_rx.clone()));
            }
            handles.push(self.spawn_janitor(partition, shutdown_rx.clone()));
        }

        tracing::debug!(
            partitions = self.streams.partition_count(),
            workers_per_partition = self.config.workers_per_partition,
            "Worker pool started"
        );

        handles
    }

    fn spawn_consumer(
        &self,
        partition: u32,
        worker_idx: usize,
        mut shutdown_rx: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        let streams = Arc::clone(&self.streams);
        let dedup = Arc::clone(&self.dedup);
        let processor = Arc::clone(&self.processor);
        let max_retries = self.config.max_retries;
        let consumer = format!("{}:{}:{}", Uuid::new_v4(), std::process::id(), worker_idx);

        tokio::spawn(async move {
            let mut subscription = match streams.subscribe(partition, &consumer).await {
                Ok(s) => s,
                Err(e) => {
                    tracing::error!(error = %e, partition, "Failed to subscribe consumer");
                    return;
                }
            };

            tracing::debug!(partition, consumer = %consumer, "Consumer started");

            loop {
                let message = tokio::select! {
                    biased;
                    _ = shutdown_rx.changed() => {
                        if *shutdown_rx.borrow() {
                            break;
                        }
                        continue;
                    }
                    next = subscription.receiver.next() => match next {
                        Some(Ok(message)) => message,
                        Some(Err(e)) => {
                            tracing::warn!(error = %e, partition, "Consumer receive error");
                            continue;
                        }
                        None => break,
                    }
                };

                handle_message(
                    &streams, &dedup, &processor, partition, message, max_retries,
                )
                .await;
            }

            tracing::debug!(partition, consumer = %consumer, "Consumer stopped");
        })
    }

    fn spawn_janitor(
        &self,
        partition: u32,
        mut shutdown_rx: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        let streams = Arc::clone(&self.streams);
        let dedup = Arc::clone(&self.dedup);
        let processor = Arc::clone(&self.processor);
        let max_retries = self.config.max_retries;
        let min_idle_ms = self.config.claim_min_idle_ms;
        let claim_interval = Duration::from_secs(self.config.claim_interval_secs.max(1));
        let consumer = format!("janitor:{}:{}", Uuid::new_v4(), std::process::id());

        tokio::spawn(async move {
            let mut interval = tokio::time::interval(claim_interval);
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            loop {
                tokio::select! {
                    biased;
                    _ = shutdown_rx.changed() => {
                        if *shutdown_rx.borrow() {
                            break;
                        }
                        continue;
                    }
                    _ = interval.tick() => {}
                }

                let claimed = match streams
                    .claim(partition, &consumer, min_idle_ms, CLAIM_MAX_COUNT)
                    .await
                {
                    Ok(claimed) => claimed,
                    Err(e) => {
                        tracing::warn!(error = %e, partition, "Janitor claim failed");
                        continue;
                    }
                };

                if !claimed.is_empty() {
                    tracing::debug!(partition, count = claimed.len(), "Reprocessing stuck entries");
                }

                for message in claimed {
                    handle_message(
                        &streams, &dedup, &processor, partition, message, max_retries,
                    )
                    .await;
                }
            }

            tracing::debug!(partition, "Janitor stopped");
        })
    }
}

/// Process one stream entry: decode, dispatch, then ack / dead-letter /
/// leave pending per the outcome and delivery count.
async fn handle_message(
    streams: &StreamService,
    dedup: &DedupService,
    processor: &EventProcessor,
    partition: u32,
    message: StreamMessage,
    max_retries: u64,
) {
    let counters = processor.counters();

    let envelope: BatchEnvelope = match serde_json::from_slice(&message.payload) {
        Ok(envelope) => envelope,
        Err(e) => {
            // Nothing to retry or dead-letter meaningfully; discard
            counters.decode_failures.fetch_add(1, Ordering::Relaxed);
            tracing::error!(error = %e, entry_id = %message.id, "Undecodable entry, discarding");
            ack(streams, partition, &message.id).await;
            return;
        }
    };

    // Exhausted retries: dead-letter before another processing attempt
    if message.delivery_count > max_retries {
        dead_letter(
            streams,
            dedup,
            processor,
            partition,
            &message,
            envelope,
            "retry budget exhausted",
        )
        .await;
        return;
    }

    match processor.process_envelope(&envelope).await {
        ProcessOutcome::Done => {
            ack(streams, partition, &message.id).await;
        }
        ProcessOutcome::Transient(e) => {
            // Leave pending; the janitor redelivers after min idle
            tracing::debug!(
                error = %e,
                entry_id = %message.id,
                delivery_count = message.delivery_count,
                "Transient failure, entry stays pending"
            );
        }
        ProcessOutcome::Fatal(e) => {
            dead_letter(
                streams,
                dedup,
                processor,
                partition,
                &message,
                envelope,
                &e.to_string(),
            )
            .await;
        }
    }
}

async fn dead_letter(
    streams: &StreamService,
    dedup: &DedupService,
    processor: &EventProcessor,
    partition: u32,
    message: &StreamMessage,
    envelope: BatchEnvelope,
    reason: &str,
) {
    let counters = processor.counters();
    let project_id = envelope.project_id;
    let claimed = envelope.claimed_event_ids.clone();

    if let Err(e) = streams
        .dead_letter(partition, envelope, reason, message.delivery_count)
        .await
    {
        tracing::error!(error = %e, entry_id = %message.id, "Dead-letter write failed");
        // Leave the entry pending rather than dropping it silently
        return;
    }
    counters.dead_lettered.fetch_add(1, Ordering::Relaxed);

    // Release claims so a corrected resubmission is not refused as duplicate
    match dedup.release(project_id, &claimed).await {
        Ok(()) => {
            counters
                .claims_released
                .fetch_add(claimed.len() as u64, Ordering::Relaxed);
        }
        Err(e) => {
            tracing::warn!(error = %e, "Claim release failed; claims expire at TTL");
        }
    }

    ack(streams, partition, &message.id).await;
}

async fn ack(streams: &StreamService, partition: u32, entry_id: &str) {
    if let Err(e) = streams.ack(partition, entry_id).await {
        tracing::warn!(error = %e, entry_id, "Failed to ack entry");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::memory::MemoryTelemetryStore;
    use crate::data::streams::{MemoryStreamBackend, StreamBackend};
    use crate::data::types::{EnvelopeEvent, EventType};
    use crate::data::{TelemetryStore, dedup::MemoryDedupStore};
    use crate::domain::observations::ObservationService;
    use crate::domain::scores::ScoreService;
    use crate::domain::sessions::SessionService;
    use crate::domain::traces::TraceService;
    use crate::utils::preview::DEFAULT_PREVIEW_LIMIT;
    use crate::utils::tsid::Tsid;
    use crate::worker::fanout::fanout_channel;
    use chrono::Utc;
    use std::collections::HashMap;

    const TRACE_ID: &str = "0af7651916cd43dd8448eb211c80319c";

    struct Harness {
        pool: WorkerPool,
        streams: Arc<StreamService>,
        stream_backend: Arc<MemoryStreamBackend>,
        dedup: Arc<DedupService>,
        store: Arc<MemoryTelemetryStore>,
        processor: Arc<EventProcessor>,
    }

    fn harness(config: WorkerConfig) -> Harness {
        let stream_backend = Arc::new(MemoryStreamBackend::new());
        let streams = Arc::new(StreamService::new(stream_backend.clone(), 1));
        let dedup = Arc::new(DedupService::new(
            Arc::new(MemoryDedupStore::new()),
            Duration::from_secs(24 * 60 * 60),
        ));
        let store = Arc::new(MemoryTelemetryStore::new());
        let telemetry: Arc<dyn TelemetryStore> = store.clone();
        let (fanout, _receivers) = fanout_channel(64);
        let processor = Arc::new(EventProcessor::new(
            Arc::new(TraceService::new(Arc::clone(&telemetry))),
            Arc::new(ObservationService::new(
                Arc::clone(&telemetry),
                None,
                DEFAULT_PREVIEW_LIMIT,
            )),
            Arc::new(ScoreService::new(Arc::clone(&telemetry))),
            Arc::new(SessionService::new(Arc::clone(&telemetry))),
            Arc::new(fanout),
        ));

        Harness {
            pool: WorkerPool::new(
                Arc::clone(&streams),
                Arc::clone(&dedup),
                Arc::clone(&processor),
                config,
            ),
            streams,
            stream_backend,
            dedup,
            store,
            processor,
        }
    }

    fn trace_envelope(project_id: Tsid) -> BatchEnvelope {
        let event_id = Tsid::generate();
        BatchEnvelope {
            batch_id: Tsid::generate(),
            project_id,
            events: vec![EnvelopeEvent {
                event_id,
                event_type: EventType::TraceCreate,
                payload: serde_json::json!({
                    "id": TRACE_ID,
                    "project_id": project_id,
                    "name": "chat",
                    "start_time": Utc::now(),
                }),
            }],
            claimed_event_ids: vec![event_id],
            metadata: HashMap::new(),
            timestamp: Utc::now(),
        }
    }

    async fn wait_for<F, Fut>(mut check: F)
    where
        F: FnMut() -> Fut,
        Fut: std::future::Future<Output = bool>,
    {
        for _ in 0..100 {
            if check().await {
                return;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        panic!("condition not reached within timeout");
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_pool_drains_published_envelope() {
        let h = harness(WorkerConfig {
            workers_per_partition: 2,
            claim_interval_secs: 1,
            claim_min_idle_ms: 50,
            ..Default::default()
        });
        let project = Tsid::generate();

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handles = h.pool.start(shutdown_rx);

        h.streams
            .publish_envelope(&trace_envelope(project))
            .await
            .unwrap();

        let store = h.store.clone();
        wait_for(|| {
            let store = store.clone();
            async move { store.get_trace(project, TRACE_ID).await.unwrap().is_some() }
        })
        .await;

        // Entry acked after processing
        let streams = h.streams.clone();
        wait_for(|| {
            let streams = streams.clone();
            async move { streams.stats(0).await.unwrap().pending == 0 }
        })
        .await;

        shutdown_tx.send(true).unwrap();
        for handle in handles {
            let _ = tokio::time::timeout(Duration::from_secs(2), handle).await;
        }
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn test_fatal_envelope_dead_letters_and_releases_claims() {
        let h = harness(WorkerConfig {
            workers_per_partition: 1,
            claim_interval_secs: 1,
            claim_min_idle_ms: 50,
            ..Default::default()
        });
        let project = Tsid::generate();

        // Claim the id as the ingest path would have
        let mut envelope = trace_envelope(project);
        envelope.events[0].payload = serde_json::json!({"garbage": true});
        h.dedup
            .claim(project, envelope.batch_id, &envelope.claimed_event_ids)
            .await
            .unwrap();

        let (shutdown_tx, shutdown_rx) = watch::channel(false);
        let handles = h.pool.start(shutdown_rx);

        h.streams.publish_envelope(&envelope).await.unwrap();

        let processor = h.processor.clone();
        wait_for(|| {
            let processor = processor.clone();
            async move { processor.counters().snapshot().dead_lettered == 1 }
        })
        .await;

        // Claims released: the id can be claimed again
        let reclaim = h
            .dedup
            .claim(project, Tsid::generate(), &envelope.claimed_event_ids)
            .await
            .unwrap();
        assert_eq!(reclaim.claimed, envelope.claimed_event_ids);

        // DLQ carries the original envelope plus failure context
        let mut dlq = h
            .stream_backend
            .subscribe(&StreamService::dlq_key(0), "dlq-readers", "c")
            .await
            .unwrap()
            .receiver;
        let entry = tokio::time::timeout(Duration::from_millis(500), dlq.next())
            .await
            .unwrap()
            .unwrap()
            .unwrap();
        let dead: crate::data::types::DeadLetterEnvelope =
            serde_json::from_slice(&entry.payload).unwrap();
        assert_eq!(dead.message.batch_id, envelope.batch_id);
        assert!(dead.reason.contains("malformed event payload"));

        shutdown_tx.send(true).unwrap();
        for handle in handles {
            let _ = tokio::time::timeout(Duration::from_secs(2), handle).await;
        }
    }
}
