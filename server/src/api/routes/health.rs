//! Health endpoint
//!
//! Reports per-component checks plus live measured numbers: ingest counters
//! with EMA latency, per-partition stream depth, worker and fan-out
//! counters, and store operation counts. Nothing here is simulated.

use axum::Json;
use axum::extract::State;
use axum::http::StatusCode;
use serde::Serialize;

use crate::api::server::AppState;
use crate::data::streams::StreamStats;
use crate::ingest::IngestMetricsSnapshot;

#[derive(Serialize)]
pub struct ComponentHealth {
    pub status: &'static str,
    pub backend: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

#[derive(Serialize)]
pub struct PartitionStats {
    pub partition: u32,
    #[serde(flatten)]
    pub stats: StreamStats,
}

#[derive(Serialize)]
pub struct HealthResponse {
    pub status: &'static str,
    pub components: Components,
    pub ingest: IngestMetricsSnapshot,
    pub worker: crate::worker::processor::WorkerCountersSnapshot,
    pub fanout: crate::worker::fanout::FanoutCountersSnapshot,
    pub store_ops: crate::data::observed::StoreCountersSnapshot,
    pub stream_partitions: Vec<PartitionStats>,
}

#[derive(Serialize)]
pub struct Components {
    pub dedup: ComponentHealth,
    pub stream: ComponentHealth,
    pub store: ComponentHealth,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub blob: Option<ComponentHealth>,
}

fn component<E: std::fmt::Display>(backend: &'static str, result: Result<(), E>) -> ComponentHealth {
    match result {
        Ok(()) => ComponentHealth {
            status: "ok",
            backend,
            error: None,
        },
        Err(e) => ComponentHealth {
            status: "unavailable",
            backend,
            error: Some(e.to_string()),
        },
    }
}

/// `GET /health`
pub async fn health(State(state): State<AppState>) -> (StatusCode, Json<HealthResponse>) {
    let dedup = component(state.dedup.backend_name(), state.dedup.health_check().await);
    let stream = component(state.streams.backend_name(), state.streams.health_check().await);
    let store = component(state.store.backend_name(), state.store.health_check().await);
    let blob = match &state.blob {
        Some(blob) => Some(component(blob.backend_name(), blob.health_check().await)),
        None => None,
    };

    let mut stream_partitions = Vec::new();
    for partition in 0..state.streams.partition_count() {
        if let Ok(stats) = state.streams.stats(partition).await {
            stream_partitions.push(PartitionStats { partition, stats });
        }
    }

    let degraded = [&dedup, &stream, &store]
        .into_iter()
        .chain(blob.as_ref())
        .any(|c| c.status != "ok");

    let response = HealthResponse {
        status: if degraded { "degraded" } else { "ok" },
        components: Components {
            dedup,
            stream,
            store,
            blob,
        },
        ingest: state.ingest_metrics.snapshot(),
        worker: state.worker_counters.snapshot(),
        fanout: state.fanout_counters.snapshot(),
        store_ops: state.store_counters.snapshot(),
        stream_partitions,
    };

    let status = if degraded {
        StatusCode::SERVICE_UNAVAILABLE
    } else {
        StatusCode::OK
    };
    (status, Json(response))
}
