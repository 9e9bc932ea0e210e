//! Stream transport error types

use thiserror::Error;

#[derive(Error, Debug)]
pub enum StreamError {
    #[error("channel closed")]
    ChannelClosed,

    #[error("receiver lagged by {0} messages")]
    Lagged(u64),

    #[error("connection error: {0}")]
    Connection(String),

    #[error("serialization error: {0}")]
    Serialization(String),

    #[error("stream error: {0}")]
    Stream(String),

    #[error("consumer group error: {0}")]
    ConsumerGroup(String),

    #[error("configuration error: {0}")]
    Config(String),
}

impl From<deadpool_redis::PoolError> for StreamError {
    fn from(err: deadpool_redis::PoolError) -> Self {
        StreamError::Connection(err.to_string())
    }
}

impl From<deadpool_redis::redis::RedisError> for StreamError {
    fn from(err: deadpool_redis::redis::RedisError) -> Self {
        StreamError::Stream(err.to_string())
    }
}

impl From<serde_json::Error> for StreamError {
    fn from(err: serde_json::Error) -> Self {
        StreamError::Serialization(err.to_string())
    }
}
