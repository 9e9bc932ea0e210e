//! Blob storage error types

use thiserror::Error;

#[derive(Error, Debug)]
pub enum BlobStorageError {
    #[error("Blob not found: {path}")]
    NotFound { path: String },

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Storage backend error: {0}")]
    Backend(String),

    #[error("Blob configuration error: {0}")]
    Config(String),
}
