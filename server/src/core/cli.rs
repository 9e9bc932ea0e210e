use std::path::PathBuf;

use clap::Parser;

use super::constants::{
    ENV_CLICKHOUSE_URL, ENV_CONFIG, ENV_HOST, ENV_OTLP_GRPC_PORT, ENV_PORT, ENV_REDIS_URL,
};

#[derive(Parser)]
#[command(name = "spandrel")]
#[command(version, about = "Telemetry ingestion core", long_about = None)]
pub struct Cli {
    /// Server host address
    #[arg(long, short = 'H', env = ENV_HOST)]
    pub host: Option<String>,

    /// Server port
    #[arg(long, short = 'p', env = ENV_PORT)]
    pub port: Option<u16>,

    /// OTLP gRPC port
    #[arg(long, env = ENV_OTLP_GRPC_PORT)]
    pub otlp_grpc_port: Option<u16>,

    /// Path to config file
    #[arg(long, short = 'c', env = ENV_CONFIG)]
    pub config: Option<PathBuf>,

    /// Redis URL for dedup claims and stream transport
    #[arg(long, env = ENV_REDIS_URL)]
    pub redis_url: Option<String>,

    /// ClickHouse URL for the analytics store
    #[arg(long, env = ENV_CLICKHOUSE_URL)]
    pub clickhouse_url: Option<String>,

    /// ClickHouse user
    #[arg(long)]
    pub clickhouse_user: Option<String>,

    /// ClickHouse password
    #[arg(long)]
    pub clickhouse_password: Option<String>,
}

/// Parsed CLI configuration consumed by `AppConfig::load`.
#[derive(Default)]
pub struct CliConfig {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub otlp_grpc_port: Option<u16>,
    pub config: Option<PathBuf>,
    pub redis_url: Option<String>,
    pub clickhouse_url: Option<String>,
    pub clickhouse_user: Option<String>,
    pub clickhouse_password: Option<String>,
}

/// Parse command-line arguments.
pub fn parse() -> CliConfig {
    let cli = Cli::parse();
    CliConfig {
        host: cli.host,
        port: cli.port,
        otlp_grpc_port: cli.otlp_grpc_port,
        config: cli.config,
        redis_url: cli.redis_url,
        clickhouse_url: cli.clickhouse_url,
        clickhouse_user: cli.clickhouse_user,
        clickhouse_password: cli.clickhouse_password,
    }
}
