//! HTTP server

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use anyhow::Result;
use axum::Router;
use axum::routing::{get, post};
use tower_http::cors::CorsLayer;
use tower_http::timeout::TimeoutLayer;
use tower_http::trace::TraceLayer;

use crate::core::ShutdownService;
use crate::data::TelemetryStore;
use crate::data::blob::BlobService;
use crate::data::dedup::DedupService;
use crate::data::observed::StoreCounters;
use crate::data::streams::StreamService;
use crate::ingest::{IngestMetrics, IngestService};
use crate::worker::fanout::FanoutCounters;
use crate::worker::processor::WorkerCounters;

use super::routes;

/// Hot-path request deadline
const REQUEST_TIMEOUT: Duration = Duration::from_secs(30);

/// Shared handler state. Everything is an `Arc`; cloning is cheap.
#[derive(Clone)]
pub struct AppState {
    pub ingest: Arc<IngestService>,
    pub dedup: Arc<DedupService>,
    pub streams: Arc<StreamService>,
    pub store: Arc<dyn TelemetryStore>,
    pub blob: Option<Arc<BlobService>>,
    pub ingest_metrics: Arc<IngestMetrics>,
    pub worker_counters: Arc<WorkerCounters>,
    pub fanout_counters: Arc<FanoutCounters>,
    pub store_counters: Arc<StoreCounters>,
}

pub struct ApiServer {
    addr: SocketAddr,
    state: AppState,
}

impl ApiServer {
    pub fn new(host: &str, port: u16, state: AppState) -> Result<Self> {
        let addr = SocketAddr::new(host.parse()?, port);
        Ok(Self { addr, state })
    }

    pub fn router(state: AppState) -> Router {
        Router::new()
            .route("/v1/telemetry/batch", post(routes::telemetry::ingest_batch))
            .route("/health", get(routes::health::health))
            .layer(TimeoutLayer::new(REQUEST_TIMEOUT))
            .layer(TraceLayer::new_for_http())
            .layer(CorsLayer::permissive())
            .with_state(state)
    }

    pub async fn start(self, shutdown: &ShutdownService) -> Result<()> {
        let router = Self::router(self.state);
        let listener = tokio::net::TcpListener::bind(self.addr).await?;
        tracing::info!(addr = %self.addr, "HTTP server listening");

        axum::serve(listener, router)
            .with_graceful_shutdown(shutdown.wait())
            .await?;

        tracing::debug!("HTTP server stopped");
        Ok(())
    }
}
