//! Analytics fan-out
//!
//! Secondary aggregation work rides on bounded priority channels. The
//! primary write has already succeeded by the time a job is enqueued, so a
//! full channel drops the job and counts it; telemetry data is never lost,
//! only a recomputation that the next event for the trace will redo.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};

use tokio::sync::{mpsc, watch};
use tokio::task::JoinHandle;

use crate::domain::observations::ObservationService;
use crate::domain::traces::TraceService;
use crate::utils::tsid::Tsid;

/// Job priority; one bounded channel per level.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum JobPriority {
    Critical,
    Normal,
    Low,
}

/// Aggregation job.
#[derive(Debug, Clone)]
pub enum AggregationJob {
    /// Re-fold cost/tokens/count over a trace's observations and write the
    /// aggregates back to the trace row.
    RecomputeTraceAggregates { project_id: Tsid, trace_id: String },
}

/// Fan-out counters for the health endpoint.
#[derive(Default)]
pub struct FanoutCounters {
    pub enqueued: AtomicU64,
    pub dropped: AtomicU64,
    pub processed: AtomicU64,
    pub failed: AtomicU64,
}

#[derive(Debug, Clone, serde::Serialize)]
pub struct FanoutCountersSnapshot {
    pub enqueued: u64,
    pub dropped: u64,
    pub processed: u64,
    pub failed: u64,
}

impl FanoutCounters {
    pub fn snapshot(&self) -> FanoutCountersSnapshot {
        FanoutCountersSnapshot {
            enqueued: self.enqueued.load(Ordering::Relaxed),
            dropped: self.dropped.load(Ordering::Relaxed),
            processed: self.processed.load(Ordering::Relaxed),
            failed: self.failed.load(Ordering::Relaxed),
        }
    }
}

/// Sending half of the fan-out.
pub struct AnalyticsFanout {
    critical: mpsc::Sender<AggregationJob>,
    normal: mpsc::Sender<AggregationJob>,
    low: mpsc::Sender<AggregationJob>,
    counters: Arc<FanoutCounters>,
}

/// Receiving half, consumed by the aggregation worker.
pub struct FanoutReceivers {
    critical: mpsc::Receiver<AggregationJob>,
    normal: mpsc::Receiver<AggregationJob>,
    low: mpsc::Receiver<AggregationJob>,
}

/// Create the fan-out pair with the given per-channel capacity.
pub fn fanout_channel(capacity: usize) -> (AnalyticsFanout, FanoutReceivers) {
    let (critical_tx, critical_rx) = mpsc::channel(capacity);
    let (normal_tx, normal_rx) = mpsc::channel(capacity);
    let (low_tx, low_rx) = mpsc::channel(capacity);
    (
        AnalyticsFanout {
            critical: critical_tx,
            normal: normal_tx,
            low: low_tx,
            counters: Arc::new(FanoutCounters::default()),
        },
        FanoutReceivers {
            critical: critical_rx,
            normal: normal_rx,
            low: low_rx,
        },
    )
}

impl AnalyticsFanout {
    pub fn counters(&self) -> Arc<FanoutCounters> {
        Arc::clone(&self.counters)
    }

    /// Enqueue a job; drops with a counter when the channel is full.
    pub fn enqueue(&self, priority: JobPriority, job: AggregationJob) {
        let sender = match priority {
            JobPriority::Critical => &self.critical,
            JobPriority::Normal => &self.normal,
            JobPriority::Low => &self.low,
        };
        match sender.try_send(job) {
            Ok(()) => {
                self.counters.enqueued.fetch_add(1, Ordering::Relaxed);
            }
            Err(mpsc::error::TrySendError::Full(job)) => {
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
                tracing::debug!(?priority, ?job, "Fan-out channel full, dropping job");
            }
            Err(mpsc::error::TrySendError::Closed(_)) => {
                self.counters.dropped.fetch_add(1, Ordering::Relaxed);
            }
        }
    }
}

/// Consumes fan-out jobs and recomputes trace aggregates by pulling folds
/// from the observation service (aggregates are pull, never a cyclic
/// object graph).
pub struct AggregationWorker {
    traces: Arc<TraceService>,
    observations: Arc<ObservationService>,
    counters: Arc<FanoutCounters>,
}

impl AggregationWorker {
    pub fn new(
        traces: Arc<TraceService>,
        observations: Arc<ObservationService>,
        counters: Arc<FanoutCounters>,
    ) -> Self {
        Self {
            traces,
            observations,
            counters,
        }
    }

    pub fn start(
        self,
        mut receivers: FanoutReceivers,
        mut shutdown_rx: watch::Receiver<bool>,
    ) -> JoinHandle<()> {
        tokio::spawn(async move {
            tracing::debug!("Aggregation worker started");
            loop {
                let job = tokio::select! {
                    biased;
                    _ = shutdown_rx.changed() => {
                        if *shutdown_rx.borrow() {
                            break;
                        }
                        continue;
                    }
                    Some(job) = receivers.critical.recv() => job,
                    Some(job) = receivers.normal.recv() => job,
                    Some(job) = receivers.low.recv() => job,
                    else => break,
                };
                self.run_job(job).await;
            }
            tracing::debug!("Aggregation worker stopped");
        })
    }

    async fn run_job(&self, job: AggregationJob) {
        match job {
            AggregationJob::RecomputeTraceAggregates {
                project_id,
                trace_id,
            } => {
                let result = async {
                    let total_cost = self
                        .observations
                        .calculate_trace_cost(project_id, &trace_id)
                        .await?;
                    let total_tokens = self
                        .observations
                        .calculate_trace_tokens(project_id, &trace_id)
                        .await?;
                    let count = self
                        .observations
                        .count_trace_observations(project_id, &trace_id)
                        .await?;
                    self.traces
                        .update_metrics(project_id, &trace_id, total_cost, total_tokens, count)
                        .await
                }
                .await;

                match result {
                    Ok(()) => {
                        self.counters.processed.fetch_add(1, Ordering::Relaxed);
                    }
                    Err(e) => {
                        // Aggregation is best-effort; the next event for this
                        // trace enqueues a fresh job
                        self.counters.failed.fetch_add(1, Ordering::Relaxed);
                        tracing::debug!(error = %e, trace_id, "Aggregation job failed");
                    }
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_enqueue_counts() {
        let (fanout, _receivers) = fanout_channel(2);
        let counters = fanout.counters();

        fanout.enqueue(
            JobPriority::Normal,
            AggregationJob::RecomputeTraceAggregates {
                project_id: Tsid::generate(),
                trace_id: "t".to_string(),
            },
        );
        assert_eq!(counters.snapshot().enqueued, 1);
        assert_eq!(counters.snapshot().dropped, 0);
    }

    #[test]
    fn test_full_channel_drops_with_counter() {
        let (fanout, _receivers) = fanout_channel(1);
        let counters = fanout.counters();
        let job = || AggregationJob::RecomputeTraceAggregates {
            project_id: Tsid::generate(),
            trace_id: "t".to_string(),
        };

        fanout.enqueue(JobPriority::Low, job());
        fanout.enqueue(JobPriority::Low, job());

        let snapshot = counters.snapshot();
        assert_eq!(snapshot.enqueued, 1);
        assert_eq!(snapshot.dropped, 1);
    }

    #[test]
    fn test_priorities_are_independent_channels() {
        let (fanout, _receivers) = fanout_channel(1);
        let job = || AggregationJob::RecomputeTraceAggregates {
            project_id: Tsid::generate(),
            trace_id: "t".to_string(),
        };

        fanout.enqueue(JobPriority::Low, job());
        // Low is full; Critical still accepts
        fanout.enqueue(JobPriority::Critical, job());
        assert_eq!(fanout.counters().snapshot().enqueued, 2);
    }
}
