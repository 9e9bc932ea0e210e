//! Telemetry batch ingest (the hot path)

pub mod metrics;
pub mod service;
pub mod types;

pub use metrics::{IngestMetrics, IngestMetricsSnapshot};
pub use service::IngestService;
pub use types::{BatchResponse, TelemetryBatchRequest};
