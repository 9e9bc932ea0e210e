//! Domain services for the trace → observation → score hierarchy

pub mod error;
pub mod observations;
pub mod otlp;
pub mod scores;
pub mod sessions;
pub mod traces;

pub use error::{DomainError, ErrorSeverity};

/// Outcome of an idempotent write keyed on an entity id.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WriteOutcome {
    /// A new row was written.
    Written,
    /// A row for this id already exists; the write was skipped.
    Duplicate,
}

/// Validate an OTLP identifier: exactly `len` lowercase-insensitive hex chars.
pub(crate) fn require_hex_id(id: &str, len: usize, what: &str) -> Result<(), DomainError> {
    if id.len() != len || !id.chars().all(|c| c.is_ascii_hexdigit()) {
        return Err(DomainError::Validation(format!(
            "{what} must be {len} hex characters, got {:?}",
            id
        )));
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_require_hex_id() {
        assert!(require_hex_id("0af7651916cd43dd8448eb211c80319c", 32, "trace id").is_ok());
        assert!(require_hex_id("b7ad6b7169203331", 16, "span id").is_ok());
        assert!(require_hex_id("b7ad6b71692033", 16, "span id").is_err());
        assert!(require_hex_id("zzad6b7169203331", 16, "span id").is_err());
        assert!(require_hex_id("", 32, "trace id").is_err());
    }
}
