//! Application configuration
//!
//! Configuration is layered: built-in defaults, then an optional JSON config
//! file, then environment/CLI overrides (handled by clap's `env` feature in
//! `cli.rs`). Every subsystem gets its own section so components receive only
//! the slice they consume.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};

use super::cli::CliConfig;
use super::constants::{
    CONFIG_FILE_NAME, DEFAULT_CLAIM_INTERVAL_SECS, DEFAULT_CLAIM_MIN_IDLE_MS,
    DEFAULT_DEDUP_TTL_SECS, DEFAULT_FANOUT_CAPACITY, DEFAULT_HOST, DEFAULT_MAX_RETRIES,
    DEFAULT_OFFLOAD_THRESHOLD_BYTES, DEFAULT_OTLP_GRPC_PORT, DEFAULT_PORT,
    DEFAULT_STREAM_PARTITIONS, DEFAULT_WORKERS_PER_PARTITION,
};

// =============================================================================
// Backend selection enums
// =============================================================================

/// Backend for the dedup store and stream transport
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum TransportBackend {
    /// In-process only; messages do not survive a restart
    #[default]
    Memory,
    Redis,
}

impl fmt::Display for TransportBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            TransportBackend::Memory => write!(f, "memory"),
            TransportBackend::Redis => write!(f, "redis"),
        }
    }
}

/// Backend for the analytics store
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum AnalyticsBackend {
    #[default]
    Memory,
    Clickhouse,
}

impl fmt::Display for AnalyticsBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            AnalyticsBackend::Memory => write!(f, "memory"),
            AnalyticsBackend::Clickhouse => write!(f, "clickhouse"),
        }
    }
}

/// Backend for blob offload storage
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum BlobBackend {
    #[default]
    Filesystem,
    S3,
}

impl fmt::Display for BlobBackend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BlobBackend::Filesystem => write!(f, "filesystem"),
            BlobBackend::S3 => write!(f, "s3"),
        }
    }
}

// =============================================================================
// Sections
// =============================================================================

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
    pub otlp_grpc_enabled: bool,
    pub otlp_grpc_port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            otlp_grpc_enabled: true,
            otlp_grpc_port: DEFAULT_OTLP_GRPC_PORT,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct TransportConfig {
    pub backend: TransportBackend,
    /// Required when backend = redis
    pub redis_url: Option<String>,
    pub stream_partitions: u32,
    /// Approximate per-partition stream cap (XADD MAXLEN ~)
    pub stream_maxlen: u64,
    pub dedup_ttl_secs: u64,
}

impl Default for TransportConfig {
    fn default() -> Self {
        Self {
            backend: TransportBackend::Memory,
            redis_url: None,
            stream_partitions: DEFAULT_STREAM_PARTITIONS,
            stream_maxlen: 100_000,
            dedup_ttl_secs: DEFAULT_DEDUP_TTL_SECS,
        }
    }
}

impl TransportConfig {
    pub fn dedup_ttl(&self) -> Duration {
        Duration::from_secs(self.dedup_ttl_secs)
    }
}

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct AnalyticsConfig {
    pub backend: AnalyticsBackend,
    pub clickhouse: Option<ClickhouseConfig>,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ClickhouseConfig {
    pub url: String,
    #[serde(default = "default_clickhouse_database")]
    pub database: String,
    #[serde(default)]
    pub user: Option<String>,
    #[serde(default)]
    pub password: Option<String>,
    #[serde(default = "default_true")]
    pub compression: bool,
    #[serde(default = "default_true")]
    pub async_insert: bool,
    #[serde(default)]
    pub wait_for_async_insert: bool,
}

fn default_clickhouse_database() -> String {
    "spandrel".to_string()
}

fn default_true() -> bool {
    true
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct BlobConfig {
    pub enabled: bool,
    pub backend: BlobBackend,
    /// Root directory for the filesystem backend
    pub root_dir: Option<PathBuf>,
    /// Bucket for the S3 backend
    pub s3_bucket: Option<String>,
    /// Key prefix for the S3 backend
    pub s3_prefix: String,
    /// Region override for the S3 backend
    pub s3_region: Option<String>,
    /// Custom endpoint for S3-compatible services (MinIO etc.)
    pub s3_endpoint: Option<String>,
    pub offload_threshold_bytes: usize,
    pub preview_limit_chars: usize,
}

impl Default for BlobConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            backend: BlobBackend::Filesystem,
            root_dir: None,
            s3_bucket: None,
            s3_prefix: "blobs".to_string(),
            s3_region: None,
            s3_endpoint: None,
            offload_threshold_bytes: DEFAULT_OFFLOAD_THRESHOLD_BYTES,
            preview_limit_chars: crate::utils::preview::DEFAULT_PREVIEW_LIMIT,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct WorkerConfig {
    pub workers_per_partition: usize,
    pub max_retries: u64,
    pub claim_min_idle_ms: u64,
    pub claim_interval_secs: u64,
    pub fanout_capacity: usize,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            workers_per_partition: DEFAULT_WORKERS_PER_PARTITION,
            max_retries: DEFAULT_MAX_RETRIES,
            claim_min_idle_ms: DEFAULT_CLAIM_MIN_IDLE_MS,
            claim_interval_secs: DEFAULT_CLAIM_INTERVAL_SECS,
            fanout_capacity: DEFAULT_FANOUT_CAPACITY,
        }
    }
}

// =============================================================================
// AppConfig
// =============================================================================

#[derive(Debug, Clone, Default, Deserialize, Serialize)]
#[serde(default)]
pub struct AppConfig {
    pub server: ServerConfig,
    pub transport: TransportConfig,
    pub analytics: AnalyticsConfig,
    pub blob: BlobConfig,
    pub worker: WorkerConfig,
}

impl AppConfig {
    /// Load configuration: defaults ← config file ← CLI/env overrides.
    pub fn load(cli: &CliConfig) -> Result<Self> {
        let mut config = match Self::resolve_config_path(cli) {
            Some(path) => Self::load_from_file(&path)?,
            None => Self::default(),
        };
        config.apply_cli(cli);
        config.validate()?;
        Ok(config)
    }

    fn resolve_config_path(cli: &CliConfig) -> Option<PathBuf> {
        if let Some(path) = &cli.config {
            return Some(path.clone());
        }
        let local = PathBuf::from(CONFIG_FILE_NAME);
        local.exists().then_some(local)
    }

    fn load_from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        serde_json::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))
    }

    fn apply_cli(&mut self, cli: &CliConfig) {
        if let Some(host) = &cli.host {
            self.server.host = host.clone();
        }
        if let Some(port) = cli.port {
            self.server.port = port;
        }
        if let Some(port) = cli.otlp_grpc_port {
            self.server.otlp_grpc_port = port;
        }
        if let Some(url) = &cli.redis_url {
            self.transport.backend = TransportBackend::Redis;
            self.transport.redis_url = Some(url.clone());
        }
        if let Some(url) = &cli.clickhouse_url {
            let database = self
                .analytics
                .clickhouse
                .as_ref()
                .map(|c| c.database.clone())
                .unwrap_or_else(default_clickhouse_database);
            self.analytics.backend = AnalyticsBackend::Clickhouse;
            self.analytics.clickhouse = Some(ClickhouseConfig {
                url: url.clone(),
                database,
                user: cli.clickhouse_user.clone(),
                password: cli.clickhouse_password.clone(),
                compression: true,
                async_insert: true,
                wait_for_async_insert: false,
            });
        }
    }

    fn validate(&self) -> Result<()> {
        if self.transport.backend == TransportBackend::Redis
            && self.transport.redis_url.is_none()
        {
            anyhow::bail!("transport.redis_url is required when transport.backend = redis");
        }
        if self.analytics.backend == AnalyticsBackend::Clickhouse
            && self.analytics.clickhouse.is_none()
        {
            anyhow::bail!("analytics.clickhouse is required when analytics.backend = clickhouse");
        }
        if self.blob.enabled
            && self.blob.backend == BlobBackend::S3
            && self.blob.s3_bucket.is_none()
        {
            anyhow::bail!("blob.s3_bucket is required when blob.backend = s3");
        }
        if self.transport.stream_partitions == 0 {
            anyhow::bail!("transport.stream_partitions must be at least 1");
        }
        Ok(())
    }
}
