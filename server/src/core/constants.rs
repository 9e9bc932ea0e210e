//! Application-wide constants

/// Application name (lowercase, used in env vars and logging)
pub const APP_NAME_LOWER: &str = "spandrel";

/// Environment variable for the log filter
pub const ENV_LOG: &str = "SPANDREL_LOG";

/// Environment variable for the config file path
pub const ENV_CONFIG: &str = "SPANDREL_CONFIG";

/// Environment variable for the server host
pub const ENV_HOST: &str = "SPANDREL_HOST";

/// Environment variable for the server port
pub const ENV_PORT: &str = "SPANDREL_PORT";

/// Environment variable for the OTLP gRPC port
pub const ENV_OTLP_GRPC_PORT: &str = "SPANDREL_OTLP_GRPC_PORT";

/// Environment variable for the Redis URL (dedup + streams)
pub const ENV_REDIS_URL: &str = "SPANDREL_REDIS_URL";

/// Environment variable for the ClickHouse URL
pub const ENV_CLICKHOUSE_URL: &str = "SPANDREL_CLICKHOUSE_URL";

/// Config file name searched in cwd when no path is given
pub const CONFIG_FILE_NAME: &str = "spandrel.json";

/// Default server host
pub const DEFAULT_HOST: &str = "127.0.0.1";

/// Default HTTP port
pub const DEFAULT_PORT: u16 = 8720;

/// Default OTLP gRPC port
pub const DEFAULT_OTLP_GRPC_PORT: u16 = 4317;

/// Ingest stream key prefix; the partition index is appended
pub const INGEST_STREAM_PREFIX: &str = "ingest:events";

/// Consumer group name for the ingest worker pool
pub const INGEST_CONSUMER_GROUP: &str = "ingest_workers";

/// Maximum events per telemetry batch
pub const MAX_BATCH_EVENTS: usize = 1_000;

/// Default dedup claim TTL in seconds (24 h)
pub const DEFAULT_DEDUP_TTL_SECS: u64 = 24 * 60 * 60;

/// Default number of ingest stream partitions
pub const DEFAULT_STREAM_PARTITIONS: u32 = 4;

/// Default number of consumer tasks per partition
pub const DEFAULT_WORKERS_PER_PARTITION: usize = 2;

/// Default maximum delivery attempts before dead-lettering
pub const DEFAULT_MAX_RETRIES: u64 = 5;

/// Default minimum idle time before a pending entry is claimed (ms)
pub const DEFAULT_CLAIM_MIN_IDLE_MS: u64 = 60_000;

/// Default interval between janitor claim passes (seconds)
pub const DEFAULT_CLAIM_INTERVAL_SECS: u64 = 30;

/// Default payload size at which observation input/output is offloaded
pub const DEFAULT_OFFLOAD_THRESHOLD_BYTES: usize = 10 * 1024;

/// Default capacity of each analytics fan-out channel
pub const DEFAULT_FANOUT_CAPACITY: usize = 1_024;

/// Maximum OTLP message size (16 MiB)
pub const OTLP_BODY_LIMIT: usize = 16 * 1024 * 1024;

/// Seconds to wait for background tasks during shutdown
pub const SHUTDOWN_TIMEOUT_SECS: u64 = 30;
