//! API error types.

use axum::Json;
use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use serde::Serialize;

/// API error response body.
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    /// Error code for programmatic handling.
    pub code: String,
    /// Human-readable error message.
    pub message: String,
}

/// API error type.
#[derive(Debug, thiserror::Error)]
pub enum ApiError {
    #[error("not found: {0}")]
    NotFound(String),

    #[error("bad request: {0}")]
    BadRequest(String),

    #[error("forbidden: {0}")]
    Forbidden(String),

    #[error("duplicate upload: {0}")]
    DuplicateUpload(String),

    /// The archive is unreadable, carries template placeholders, or failed
    /// bundle verification. The message may be a JSON-encoded list of
    /// verification failures.
    #[error("{0}")]
    InvalidArchive(String),

    #[error("internal error: {0}")]
    Internal(String),

    #[error("storage error: {0}")]
    Storage(#[from] emporium_storage::StorageError),

    #[error("metadata error: {0}")]
    Metadata(#[from] emporium_metadata::MetadataError),

    #[error("{0}")]
    Core(#[from] emporium_core::Error),
}

impl ApiError {
    /// Get the error code for this error.
    pub fn code(&self) -> &'static str {
        match self {
            Self::NotFound(_) => "not_found",
            Self::BadRequest(_) => "bad_request",
            Self::Forbidden(_) => "forbidden",
            Self::DuplicateUpload(_) => "duplicate_upload",
            Self::InvalidArchive(_) => "invalid_archive",
            Self::Internal(_) => "internal_error",
            Self::Storage(e) => match e {
                emporium_storage::StorageError::NotFound(_) => "not_found",
                e if e.is_content_mismatch() => "invalid_archive",
                _ => "internal_error",
            },
            Self::Metadata(e) => match e {
                emporium_metadata::MetadataError::NotFound(_) => "not_found",
                emporium_metadata::MetadataError::DuplicateEntity(_) => "duplicate_upload",
                emporium_metadata::MetadataError::NotFullyQualified(_) => "bad_request",
                _ => "internal_error",
            },
            Self::Core(e) => match e {
                emporium_core::Error::InvalidReference(..) => "bad_request",
                _ => "invalid_archive",
            },
        }
    }

    /// Get the HTTP status code for this error.
    pub fn status_code(&self) -> StatusCode {
        match self {
            Self::NotFound(_) => StatusCode::NOT_FOUND,
            Self::BadRequest(_) => StatusCode::BAD_REQUEST,
            Self::Forbidden(_) => StatusCode::FORBIDDEN,
            Self::DuplicateUpload(_) => StatusCode::CONFLICT,
            Self::InvalidArchive(_) => StatusCode::BAD_REQUEST,
            Self::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
            Self::Storage(e) => match e {
                emporium_storage::StorageError::NotFound(_) => StatusCode::NOT_FOUND,
                e if e.is_content_mismatch() => StatusCode::BAD_REQUEST,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            },
            Self::Metadata(e) => match e {
                emporium_metadata::MetadataError::NotFound(_) => StatusCode::NOT_FOUND,
                emporium_metadata::MetadataError::DuplicateEntity(_) => StatusCode::CONFLICT,
                emporium_metadata::MetadataError::NotFullyQualified(_) => StatusCode::BAD_REQUEST,
                _ => StatusCode::INTERNAL_SERVER_ERROR,
            },
            Self::Core(_) => StatusCode::BAD_REQUEST,
        }
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        // Internal failures get an opaque body; the detail goes to the log.
        let message = if status == StatusCode::INTERNAL_SERVER_ERROR {
            tracing::error!(error = %self, "internal error");
            "internal server error".to_string()
        } else {
            self.to_string()
        };
        let body = ErrorResponse {
            code: self.code().to_string(),
            message,
        };
        (status, Json(body)).into_response()
    }
}

/// Result type for API handlers.
pub type ApiResult<T> = std::result::Result<T, ApiError>;
