//! Error types for the Pilum library.
//!
//! All errors are represented by the [`PilumError`] enum. The merge engine
//! only needs one distinction surfaced to callers: "aborted by request"
//! ([`PilumError::MergeAborted`]) versus everything else (I/O failures,
//! detected corruption, invalid metadata), so each of those gets its own
//! variant rather than being folded into a generic error string.

use std::io;

use thiserror::Error;

/// The main error type for Pilum operations.
#[derive(Error, Debug)]
pub enum PilumError {
    /// I/O errors (file operations, stream access, etc.)
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Index-related errors
    #[error("Index error: {0}")]
    Index(String),

    /// Schema-related errors
    #[error("Schema error: {0}")]
    Schema(String),

    /// Storage-related errors
    #[error("Storage error: {0}")]
    Storage(String),

    /// Detected corruption in written output. Fatal: the data must not be
    /// exposed to readers.
    #[error("Corrupt index: {0}")]
    Corruption(String),

    /// The merge observed a cancellation request and unwound cleanly.
    /// Partial output is safe to discard.
    #[error("Merge aborted")]
    MergeAborted,

    /// Invalid operation
    #[error("Invalid operation: {0}")]
    InvalidOperation(String),

    /// JSON serialization/deserialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Generic error for other cases
    #[error("Error: {0}")]
    Other(String),

    /// Generic anyhow error
    #[error("Anyhow error: {0}")]
    Anyhow(#[from] anyhow::Error),
}

/// Result type alias for operations that may fail with PilumError.
pub type Result<T> = std::result::Result<T, PilumError>;

impl PilumError {
    /// Create a new index error.
    pub fn index<S: Into<String>>(msg: S) -> Self {
        PilumError::Index(msg.into())
    }

    /// Create a new schema error.
    pub fn schema<S: Into<String>>(msg: S) -> Self {
        PilumError::Schema(msg.into())
    }

    /// Create a new storage error.
    pub fn storage<S: Into<String>>(msg: S) -> Self {
        PilumError::Storage(msg.into())
    }

    /// Create a new corruption error.
    pub fn corruption<S: Into<String>>(msg: S) -> Self {
        PilumError::Corruption(msg.into())
    }

    /// Create a new invalid operation error.
    pub fn invalid_operation<S: Into<String>>(msg: S) -> Self {
        PilumError::InvalidOperation(msg.into())
    }

    /// Create a new generic error.
    pub fn other<S: Into<String>>(msg: S) -> Self {
        PilumError::Other(msg.into())
    }

    /// Whether this error is the cooperative-abort control condition.
    pub fn is_aborted(&self) -> bool {
        matches!(self, PilumError::MergeAborted)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_construction() {
        let error = PilumError::index("Test index error");
        assert_eq!(error.to_string(), "Index error: Test index error");

        let error = PilumError::schema("Test schema error");
        assert_eq!(error.to_string(), "Schema error: Test schema error");

        let error = PilumError::corruption("bad fdx length");
        assert_eq!(error.to_string(), "Corrupt index: bad fdx length");
    }

    #[test]
    fn test_io_error_conversion() {
        let io_error = io::Error::new(io::ErrorKind::NotFound, "File not found");
        let pilum_error = PilumError::from(io_error);

        match pilum_error {
            PilumError::Io(_) => {} // Expected
            _ => panic!("Expected IO error variant"),
        }
    }

    #[test]
    fn test_aborted_is_distinct() {
        assert!(PilumError::MergeAborted.is_aborted());
        assert!(!PilumError::corruption("x").is_aborted());
        assert!(!PilumError::storage("x").is_aborted());
    }
}
