//! Core error types.

use thiserror::Error;

/// Errors produced by the core domain types.
#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid artifact reference {0:?}: {1}")]
    InvalidReference(String, String),

    #[error("invalid hash: {0}")]
    InvalidHash(String),

    #[error("cannot read archive: {0}")]
    BadArchive(String),

    #[error("{0}")]
    InvalidEntity(String),

    #[error("bundle verification failed: {0}")]
    Verification(String),
}

/// Result type for core operations.
pub type Result<T> = std::result::Result<T, Error>;
