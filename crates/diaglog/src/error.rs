//! Error types for diaglog
//!
//! This module defines the error types used throughout the log store.

use thiserror::Error;

/// Errors that can occur in log store operations
#[derive(Debug, Error)]
pub enum StoreError {
    /// Backing medium cannot be opened or prepared
    #[error("Storage unavailable: {0}")]
    Unavailable(String),

    /// An individual append could not be persisted
    #[error("Write failed: {0}")]
    WriteFailed(String),

    /// A query could not complete against the store
    #[error("Read failed: {0}")]
    ReadFailed(String),

    /// A stored record failed to deserialize
    #[error("Corrupt record: {0}")]
    CorruptRecord(String),

    /// The dispatch queue is full and the request was not accepted
    #[error("Dispatch queue full")]
    Backpressure,

    /// The worker has stopped and can no longer accept requests
    #[error("Log worker stopped")]
    Shutdown,
}

impl StoreError {
    /// Create a new Unavailable error
    pub fn unavailable(message: impl Into<String>) -> Self {
        Self::Unavailable(message.into())
    }

    /// Create a new WriteFailed error
    pub fn write_failed(message: impl Into<String>) -> Self {
        Self::WriteFailed(message.into())
    }

    /// Create a new ReadFailed error
    pub fn read_failed(message: impl Into<String>) -> Self {
        Self::ReadFailed(message.into())
    }

    /// Create a new CorruptRecord error
    pub fn corrupt(message: impl Into<String>) -> Self {
        Self::CorruptRecord(message.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_unavailable_error() {
        let err = StoreError::unavailable("no such directory");
        assert!(matches!(err, StoreError::Unavailable(_)));
        assert!(err.to_string().contains("no such directory"));
    }

    #[test]
    fn test_write_failed_error() {
        let err = StoreError::write_failed("disk full");
        assert!(matches!(err, StoreError::WriteFailed(_)));
        assert!(err.to_string().contains("disk full"));
    }

    #[test]
    fn test_read_failed_error() {
        let err = StoreError::read_failed("seek past end");
        assert!(matches!(err, StoreError::ReadFailed(_)));
    }

    #[test]
    fn test_corrupt_record_error() {
        let err = StoreError::corrupt("bad frame");
        assert!(matches!(err, StoreError::CorruptRecord(_)));
        assert!(err.to_string().contains("bad frame"));
    }

    #[test]
    fn test_dispatch_errors_display() {
        assert_eq!(StoreError::Backpressure.to_string(), "Dispatch queue full");
        assert_eq!(StoreError::Shutdown.to_string(), "Log worker stopped");
    }
}
