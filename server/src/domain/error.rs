//! Domain error taxonomy
//!
//! Every domain operation returns a [`DomainError`] with a stable code. The
//! API layer maps codes to HTTP/gRPC statuses; the consumer maps
//! [`ErrorSeverity`] to its retry-vs-dead-letter decision. Errors never
//! silently collapse: the ingest and worker layers count every retry,
//! dead-letter, and rollback.

use thiserror::Error;

use crate::data::DataError;
use crate::data::blob::BlobStorageError;
use crate::data::dedup::DedupError;
use crate::data::streams::StreamError;

#[derive(Error, Debug)]
pub enum DomainError {
    /// Bad request; returned to the caller, never retried.
    #[error("validation error: {0}")]
    Validation(String),

    /// Referenced target missing.
    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    /// Write conflicts with current state (e.g. already completed).
    #[error("conflict: {0}")]
    Conflict(String),

    /// Dedup store unreachable. The ingest path fails closed on this:
    /// accepting a batch without a claim would break at-most-once acceptance.
    #[error("dedup store unavailable: {0}")]
    DedupUnavailable(String),

    /// Stream publish failed after the claim succeeded; claims were rolled
    /// back and the caller may retry.
    #[error("stream publish failed: {0}")]
    PublishFailed(String),

    /// Transient store failure; the consumer leaves the message pending.
    #[error("transient store error: {0}")]
    StoreTransient(String),

    /// Permanent store failure; the consumer dead-letters the message.
    #[error("store rejected write: {0}")]
    StoreFatal(String),

    /// Unclassified.
    #[error("internal error: {0}")]
    Internal(String),
}

/// Consumer-side classification: retry or dead-letter.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorSeverity {
    Transient,
    Fatal,
}

impl DomainError {
    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity,
            id: id.into(),
        }
    }

    /// Stable machine-readable code.
    pub fn code(&self) -> &'static str {
        match self {
            Self::Validation(_) => "VALIDATION",
            Self::NotFound { .. } => "NOT_FOUND",
            Self::Conflict(_) => "CONFLICT",
            Self::DedupUnavailable(_) => "DEDUP_UNAVAILABLE",
            Self::PublishFailed(_) => "STREAM_PUBLISH_FAILED",
            Self::StoreTransient(_) => "STORE_TRANSIENT",
            Self::StoreFatal(_) => "STORE_FATAL",
            Self::Internal(_) => "INTERNAL",
        }
    }

    pub fn severity(&self) -> ErrorSeverity {
        match self {
            Self::DedupUnavailable(_) | Self::PublishFailed(_) | Self::StoreTransient(_) => {
                ErrorSeverity::Transient
            }
            Self::Validation(_)
            | Self::NotFound { .. }
            | Self::Conflict(_)
            | Self::StoreFatal(_)
            | Self::Internal(_) => ErrorSeverity::Fatal,
        }
    }
}

impl From<DataError> for DomainError {
    fn from(e: DataError) -> Self {
        if e.is_transient() {
            Self::StoreTransient(e.to_string())
        } else {
            Self::StoreFatal(e.to_string())
        }
    }
}

impl From<DedupError> for DomainError {
    fn from(e: DedupError) -> Self {
        Self::DedupUnavailable(e.to_string())
    }
}

impl From<StreamError> for DomainError {
    fn from(e: StreamError) -> Self {
        Self::PublishFailed(e.to_string())
    }
}

impl From<BlobStorageError> for DomainError {
    fn from(e: BlobStorageError) -> Self {
        Self::Internal(e.to_string())
    }
}
