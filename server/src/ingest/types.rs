//! Ingest request/response envelopes

use std::collections::HashMap;

use serde::{Deserialize, Serialize};

use crate::data::types::TelemetryEvent;
use crate::utils::tsid::Tsid;

/// One ingress batch: up to 1000 events under a single project id.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct TelemetryBatchRequest {
    pub project_id: Tsid,
    pub events: Vec<TelemetryEvent>,
    #[serde(default)]
    pub metadata: HashMap<String, String>,
}

/// Acceptance response. `processed_events` means accepted for processing,
/// not written to storage; end-to-end completion is observable via the
/// stream stats on the health endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchResponse {
    pub batch_id: Tsid,
    pub processed_events: usize,
    pub duplicate_events: usize,
    pub failed_events: usize,
    pub processing_time_ms: u64,
    pub duplicate_event_ids: Vec<Tsid>,
}
