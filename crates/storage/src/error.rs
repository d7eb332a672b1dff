//! Blob store error types.

use thiserror::Error;

/// Blob store operation errors.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("blob not found: {0}")]
    NotFound(String),

    #[error("blob already exists: {0}")]
    AlreadyExists(String),

    #[error("hash mismatch: expected {expected}, got {actual}")]
    HashMismatch { expected: String, actual: String },

    #[error("size mismatch: declared {declared} bytes, got {actual}")]
    SizeMismatch { declared: u64, actual: u64 },

    #[error("invalid blob name: {0}")]
    InvalidName(String),

    #[error("invalid range: {0}")]
    InvalidRange(String),

    #[error("upload aborted: {0}")]
    Aborted(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl StorageError {
    /// Whether the error indicates that the declared content did not match
    /// the uploaded bytes. The ingest path reports these as client errors.
    pub fn is_content_mismatch(&self) -> bool {
        matches!(
            self,
            StorageError::HashMismatch { .. }
                | StorageError::SizeMismatch { .. }
                | StorageError::Aborted(_)
        )
    }
}

/// Result type for blob store operations.
pub type StorageResult<T> = std::result::Result<T, StorageError>;
