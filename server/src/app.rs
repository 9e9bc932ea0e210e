//! Core application
//!
//! Bottom-up construction: stores first, then domain services, then the
//! ingest service, then workers and servers. Each component receives
//! exactly the interfaces it consumes through its constructor; there is no
//! global registry.

use std::sync::Arc;

use anyhow::{Context, Result};

use crate::api::{ApiServer, AppState, OtlpGrpcServer};
use crate::core::cli;
use crate::core::config::AppConfig;
use crate::core::constants::{APP_NAME_LOWER, ENV_LOG};
use crate::core::shutdown::ShutdownService;
use crate::data::blob::BlobService;
use crate::data::dedup::DedupService;
use crate::data::streams::StreamService;
use crate::data::{AnalyticsHandle, init_store};
use crate::domain::observations::ObservationService;
use crate::domain::scores::ScoreService;
use crate::domain::sessions::SessionService;
use crate::domain::traces::TraceService;
use crate::ingest::{IngestMetrics, IngestService};
use crate::worker::fanout::{AggregationWorker, FanoutReceivers, fanout_channel};
use crate::worker::processor::EventProcessor;
use crate::worker::pool::WorkerPool;

pub struct CoreApp {
    config: AppConfig,
    shutdown: ShutdownService,
    state: AppState,
    pool: WorkerPool,
    aggregation: AggregationWorker,
    fanout_receivers: FanoutReceivers,
}

impl CoreApp {
    /// Run the application with CLI argument parsing.
    pub async fn run() -> Result<()> {
        dotenvy::dotenv().ok();
        Self::init_logging();

        tracing::debug!("Application starting");

        let cli_config = cli::parse();
        let config = AppConfig::load(&cli_config)?;
        let app = Self::init(config).await?;
        app.start().await
    }

    /// Build every component bottom-up from the configuration.
    pub async fn init(config: AppConfig) -> Result<Self> {
        // Stores
        let dedup = Arc::new(
            DedupService::from_config(&config.transport)
                .await
                .context("Failed to initialize dedup store")?,
        );
        tracing::debug!(backend = dedup.backend_name(), "Dedup store initialized");

        let streams = Arc::new(
            StreamService::from_config(&config.transport)
                .await
                .context("Failed to initialize stream transport")?,
        );
        tracing::debug!(
            backend = streams.backend_name(),
            partitions = streams.partition_count(),
            "Stream transport initialized"
        );

        let AnalyticsHandle {
            store,
            counters: store_counters,
        } = init_store(&config.analytics)
            .await
            .context("Failed to initialize analytics store")?;
        tracing::debug!(backend = store.backend_name(), "Analytics store initialized");

        let blob = BlobService::from_config(&config.blob)
            .await
            .context("Failed to initialize blob storage")?
            .map(Arc::new);
        match &blob {
            Some(blob) => {
                tracing::debug!(backend = blob.backend_name(), "Blob storage initialized")
            }
            None => tracing::debug!("Blob offload disabled"),
        }

        // Domain services
        let traces = Arc::new(TraceService::new(Arc::clone(&store)));
        let observations = Arc::new(ObservationService::new(
            Arc::clone(&store),
            blob.clone(),
            config.blob.preview_limit_chars,
        ));
        let scores = Arc::new(ScoreService::new(Arc::clone(&store)));
        let sessions = Arc::new(SessionService::new(Arc::clone(&store)));

        // Ingest service
        let ingest_metrics = Arc::new(IngestMetrics::new());
        let ingest = Arc::new(IngestService::new(
            Arc::clone(&dedup),
            Arc::clone(&streams),
            Arc::clone(&ingest_metrics),
        ));

        // Workers
        let (fanout, fanout_receivers) = fanout_channel(config.worker.fanout_capacity);
        let fanout_counters = fanout.counters();
        let fanout = Arc::new(fanout);

        let processor = Arc::new(EventProcessor::new(
            Arc::clone(&traces),
            Arc::clone(&observations),
            scores,
            sessions,
            Arc::clone(&fanout),
        ));
        let worker_counters = processor.counters();

        let pool = WorkerPool::new(
            Arc::clone(&streams),
            Arc::clone(&dedup),
            processor,
            config.worker.clone(),
        );
        let aggregation = AggregationWorker::new(
            Arc::clone(&traces),
            Arc::clone(&observations),
            Arc::clone(&fanout_counters),
        );

        let state = AppState {
            ingest,
            dedup,
            streams,
            store,
            blob,
            ingest_metrics,
            worker_counters,
            fanout_counters,
            store_counters,
        };

        Ok(Self {
            config,
            shutdown: ShutdownService::new(),
            state,
            pool,
            aggregation,
            fanout_receivers,
        })
    }

    /// Start workers and servers; returns after graceful shutdown.
    pub async fn start(self) -> Result<()> {
        self.shutdown.install_signal_handlers();

        for handle in self.pool.start(self.shutdown.subscribe()) {
            self.shutdown.register(handle).await;
        }
        self.shutdown
            .register(
                self.aggregation
                    .start(self.fanout_receivers, self.shutdown.subscribe()),
            )
            .await;

        if self.config.server.otlp_grpc_enabled {
            let grpc = OtlpGrpcServer::new(
                &self.config.server.host,
                self.config.server.otlp_grpc_port,
                Arc::clone(&self.state.ingest),
            )?;
            let shutdown_rx = self.shutdown.subscribe();
            self.shutdown
                .register(tokio::spawn(async move {
                    if let Err(e) = grpc.start(shutdown_rx).await {
                        tracing::error!(error = %e, "OTLP gRPC server failed");
                    }
                }))
                .await;
        }

        let api = ApiServer::new(
            &self.config.server.host,
            self.config.server.port,
            self.state.clone(),
        )?;
        let result = api.start(&self.shutdown).await;

        // HTTP server returned (signal or bind failure); drain workers
        self.shutdown.shutdown().await;
        result
    }

    fn init_logging() {
        let default_filter = format!("info,{}=info", APP_NAME_LOWER);

        let filter = std::env::var(ENV_LOG)
            .or_else(|_| std::env::var("RUST_LOG"))
            .unwrap_or(default_filter);

        tracing_subscriber::fmt()
            .with_target(false)
            .with_env_filter(filter)
            .init();
    }
}
