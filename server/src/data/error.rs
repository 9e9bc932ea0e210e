//! Unified error type for the analytics store layer

use thiserror::Error;

/// Unified error type for analytics store operations
///
/// Wraps backend-specific errors while preserving which backend produced
/// them; `is_transient` drives the consumer's retry-vs-dead-letter decision.
#[derive(Error, Debug)]
pub enum DataError {
    /// ClickHouse database error
    #[error("ClickHouse error: {0}")]
    Clickhouse(#[from] clickhouse::error::Error),

    /// Migration failed
    #[error("Migration {version} ({name}) failed on {backend}: {error}")]
    MigrationFailed {
        backend: &'static str,
        version: i32,
        name: String,
        error: String,
    },

    /// Serialization of a row column failed
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Backend not available
    #[error("Backend {backend} is not available: {reason}")]
    BackendUnavailable {
        backend: &'static str,
        reason: String,
    },

    /// Conflict (e.g. stale version on write)
    #[error("Conflict: {0}")]
    Conflict(String),
}

impl DataError {
    pub fn migration_failed(backend: &'static str, version: i32, name: &str, error: &str) -> Self {
        Self::MigrationFailed {
            backend,
            version,
            name: name.to_string(),
            error: error.to_string(),
        }
    }

    pub fn backend_unavailable(backend: &'static str, reason: impl Into<String>) -> Self {
        Self::BackendUnavailable {
            backend,
            reason: reason.into(),
        }
    }

    /// Whether the error is likely transient (connection/timeout class);
    /// transient store errors are retried by the consumer, anything else is
    /// dead-lettered.
    pub fn is_transient(&self) -> bool {
        match self {
            Self::BackendUnavailable { .. } => true,
            Self::Clickhouse(e) => {
                let msg = e.to_string();
                msg.contains("connection") || msg.contains("timeout") || msg.contains("network")
            }
            _ => false,
        }
    }
}

impl From<serde_json::Error> for DataError {
    fn from(e: serde_json::Error) -> Self {
        Self::Serialization(e.to_string())
    }
}
