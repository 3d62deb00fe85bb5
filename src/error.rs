use std::collections::TryReserveError;

use thiserror::Error;

use crate::models::{DocId, FieldId};

/// Main error type for Baleen operations
#[derive(Error, Debug)]
pub enum IndexError {
    #[error("posting buffer allocation failed: {0}")]
    ResourceExhausted(#[from] TryReserveError),

    #[error("document not indexed: {0}")]
    NotFound(DocId),

    #[error("key already present in store")]
    KeyExists,

    #[error("keyed store is closed")]
    StoreClosed,

    #[error("mutation queue is full")]
    QueueFull,

    #[error("field {0} is not registered")]
    UnknownField(FieldId),

    #[error("metrics registration failed: {0}")]
    Metrics(#[from] prometheus::Error),
}

/// Result type alias for Baleen operations
pub type Result<T> = std::result::Result<T, IndexError>;

impl IndexError {
    /// Check if this error indicates a transient failure that could be retried
    pub fn is_retriable(&self) -> bool {
        matches!(self, IndexError::QueueFull)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = IndexError::NotFound(42);
        assert_eq!(err.to_string(), "document not indexed: 42");

        let err = IndexError::UnknownField(7);
        assert_eq!(err.to_string(), "field 7 is not registered");
    }

    #[test]
    fn test_retriable_errors() {
        assert!(IndexError::QueueFull.is_retriable());
        assert!(!IndexError::NotFound(1).is_retriable());
        assert!(!IndexError::KeyExists.is_retriable());
    }
}
