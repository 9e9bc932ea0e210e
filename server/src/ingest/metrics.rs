//! Ingest path metrics
//!
//! Mutex-protected counters plus an exponential moving average of batch
//! processing latency. Everything here is short-critical-section state
//! touched once per request.

use parking_lot::Mutex;
use serde::Serialize;

/// EMA smoothing factor
const EMA_ALPHA: f64 = 0.1;

#[derive(Default)]
struct Inner {
    batches_accepted: u64,
    events_accepted: u64,
    events_duplicate: u64,
    batches_rejected: u64,
    publish_failures: u64,
    rollbacks: u64,
    ema_batch_ms: f64,
}

/// Counters and EMA latency for the ingest hot path.
#[derive(Default)]
pub struct IngestMetrics {
    inner: Mutex<Inner>,
}

/// Point-in-time snapshot for the health endpoint.
#[derive(Debug, Clone, Serialize)]
pub struct IngestMetricsSnapshot {
    pub batches_accepted: u64,
    pub events_accepted: u64,
    pub events_duplicate: u64,
    pub batches_rejected: u64,
    pub publish_failures: u64,
    pub rollbacks: u64,
    pub ema_batch_ms: f64,
}

impl IngestMetrics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an accepted batch and fold its latency into the EMA.
    pub fn record_batch(&self, accepted: usize, duplicates: usize, elapsed_ms: u64) {
        let mut inner = self.inner.lock();
        inner.batches_accepted += 1;
        inner.events_accepted += accepted as u64;
        inner.events_duplicate += duplicates as u64;
        inner.ema_batch_ms = if inner.batches_accepted == 1 {
            elapsed_ms as f64
        } else {
            EMA_ALPHA * elapsed_ms as f64 + (1.0 - EMA_ALPHA) * inner.ema_batch_ms
        };
    }

    pub fn record_rejected(&self) {
        self.inner.lock().batches_rejected += 1;
    }

    pub fn record_publish_failure(&self) {
        let mut inner = self.inner.lock();
        inner.publish_failures += 1;
        inner.rollbacks += 1;
    }

    pub fn snapshot(&self) -> IngestMetricsSnapshot {
        let inner = self.inner.lock();
        IngestMetricsSnapshot {
            batches_accepted: inner.batches_accepted,
            events_accepted: inner.events_accepted,
            events_duplicate: inner.events_duplicate,
            batches_rejected: inner.batches_rejected,
            publish_failures: inner.publish_failures,
            rollbacks: inner.rollbacks,
            ema_batch_ms: inner.ema_batch_ms,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_batch_seeds_ema() {
        let metrics = IngestMetrics::new();
        metrics.record_batch(5, 1, 20);
        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.batches_accepted, 1);
        assert_eq!(snapshot.events_accepted, 5);
        assert_eq!(snapshot.events_duplicate, 1);
        assert_eq!(snapshot.ema_batch_ms, 20.0);
    }

    #[test]
    fn test_ema_smooths_latency() {
        let metrics = IngestMetrics::new();
        metrics.record_batch(1, 0, 10);
        metrics.record_batch(1, 0, 110);
        let ema = metrics.snapshot().ema_batch_ms;
        // 0.1 * 110 + 0.9 * 10 = 20
        assert!((ema - 20.0).abs() < 1e-9);
    }

    #[test]
    fn test_failure_counters() {
        let metrics = IngestMetrics::new();
        metrics.record_rejected();
        metrics.record_publish_failure();
        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.batches_rejected, 1);
        assert_eq!(snapshot.publish_failures, 1);
        assert_eq!(snapshot.rollbacks, 1);
    }
}
