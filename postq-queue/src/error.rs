//! Error types for the postq-queue crate.

use std::io;

use thiserror::Error;

use crate::MessageId;

/// Top-level queue error type.
#[derive(Debug, Error)]
pub enum QueueError {
    /// I/O operation failed (file read/write/delete).
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Serialization or deserialization error.
    #[error("Serialization error: {0}")]
    Serialization(#[from] SerializationError),

    /// Message not found in the queue.
    #[error("Message not found: {0}")]
    NotFound(MessageId),

    /// Queue directory is unusable.
    #[error("Invalid queue directory {path}: {reason}")]
    InvalidDirectory { path: String, reason: String },

    /// Internal error (lock poisoning, etc.).
    #[error("Internal error: {0}")]
    Internal(String),
}

/// Serialization and deserialization errors.
#[derive(Debug, Error)]
pub enum SerializationError {
    #[error("Bincode encode error: {0}")]
    Encode(#[from] bincode::error::EncodeError),

    #[error("Bincode decode error: {0}")]
    Decode(#[from] bincode::error::DecodeError),
}

/// Specialized `Result` type for queue operations.
pub type Result<T> = std::result::Result<T, QueueError>;

impl<T> From<std::sync::PoisonError<T>> for QueueError {
    fn from(e: std::sync::PoisonError<T>) -> Self {
        Self::Internal(format!("Lock poisoned: {e}"))
    }
}

impl From<bincode::error::EncodeError> for QueueError {
    fn from(e: bincode::error::EncodeError) -> Self {
        Self::Serialization(e.into())
    }
}

impl From<bincode::error::DecodeError> for QueueError {
    fn from(e: bincode::error::DecodeError) -> Self {
        Self::Serialization(e.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_io_error_conversion() {
        let io_err = io::Error::new(io::ErrorKind::PermissionDenied, "access denied");
        let err: QueueError = io_err.into();
        assert!(matches!(err, QueueError::Io(_)));
        assert!(err.to_string().contains("access denied"));
    }

    #[test]
    fn test_not_found_display() {
        let id = MessageId::new(ulid::Ulid::nil());
        let err = QueueError::NotFound(id);
        assert_eq!(
            err.to_string(),
            "Message not found: 00000000000000000000000000"
        );
    }
}
