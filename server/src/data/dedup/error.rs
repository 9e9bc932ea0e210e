//! Dedup store error types

use thiserror::Error;

#[derive(Error, Debug)]
pub enum DedupError {
    #[error("Dedup configuration error: {0}")]
    Config(String),

    #[error("Dedup store connection error: {0}")]
    Connection(String),

    #[error("Dedup claim script returned malformed reply: {0}")]
    Protocol(String),

    #[error("Redis error: {0}")]
    Redis(#[from] deadpool_redis::redis::RedisError),

    #[error("Redis pool error: {0}")]
    Pool(#[from] deadpool_redis::PoolError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_error_display() {
        let err = DedupError::Config("redis_url required".to_string());
        assert_eq!(
            err.to_string(),
            "Dedup configuration error: redis_url required"
        );
    }

    #[test]
    fn test_protocol_error_display() {
        let err = DedupError::Protocol("expected two arrays".to_string());
        assert!(err.to_string().contains("expected two arrays"));
    }
}
