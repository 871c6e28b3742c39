//! Error types surfaced at the HTTP boundary.

use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde::{Deserialize, Serialize};
use std::fmt;
use thiserror::Error;
use utoipa::ToSchema;

/// Coarse classification that tells a caller whose problem a failure is.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, ToSchema)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    /// The upload did not arrive intact; retrying may help.
    Transport,
    /// The file itself is unacceptable.
    Content,
    /// The server's storage configuration is broken.
    Configuration,
    /// The storage backend failed while writing.
    Storage,
    /// A public reference does not match any catalogued object.
    Integrity,
    NotFound,
    Internal,
}

impl fmt::Display for ErrorCategory {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorCategory::Transport => "transport",
            ErrorCategory::Content => "content",
            ErrorCategory::Configuration => "configuration",
            ErrorCategory::Storage => "storage",
            ErrorCategory::Integrity => "integrity",
            ErrorCategory::NotFound => "not_found",
            ErrorCategory::Internal => "internal",
        };
        f.write_str(s)
    }
}

/// Errors that can occur while ingesting one uploaded file.
#[derive(Debug, Error)]
pub enum UploadError {
    #[error("Upload interrupted: {0}")]
    Transport(String),

    #[error("Temporary upload storage unavailable")]
    Staging(#[source] std::io::Error),

    #[error("File is empty")]
    EmptyFile,

    #[error("File too large ({size} bytes, max {max_size} bytes)")]
    TooLarge { size: u64, max_size: u64 },

    #[error("Unsupported file type: {0}")]
    UnsupportedType(String),

    /// Deliberately generic: the detailed reason is logged, never returned.
    #[error("Storage unavailable")]
    StorageUnavailable,

    #[error("Failed to store file: {0}")]
    Storage(String),

    #[error("Collection not found")]
    CollectionNotFound,

    #[error("No files provided")]
    NoFiles,

    #[error("Database operation failed")]
    Database(String),
}

impl UploadError {
    pub fn category(&self) -> ErrorCategory {
        match self {
            UploadError::Transport(_) | UploadError::Staging(_) => ErrorCategory::Transport,
            UploadError::EmptyFile
            | UploadError::TooLarge { .. }
            | UploadError::UnsupportedType(_)
            | UploadError::NoFiles => ErrorCategory::Content,
            UploadError::StorageUnavailable => ErrorCategory::Configuration,
            UploadError::Storage(_) => ErrorCategory::Storage,
            UploadError::CollectionNotFound => ErrorCategory::NotFound,
            UploadError::Database(_) => ErrorCategory::Internal,
        }
    }

    fn status(&self) -> StatusCode {
        match self {
            UploadError::Transport(_) => StatusCode::BAD_REQUEST,
            UploadError::Staging(_) => StatusCode::INSUFFICIENT_STORAGE,
            UploadError::EmptyFile | UploadError::NoFiles => StatusCode::BAD_REQUEST,
            UploadError::TooLarge { .. } => StatusCode::PAYLOAD_TOO_LARGE,
            UploadError::UnsupportedType(_) => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            UploadError::StorageUnavailable => StatusCode::SERVICE_UNAVAILABLE,
            UploadError::Storage(_) | UploadError::Database(_) => StatusCode::INTERNAL_SERVER_ERROR,
            UploadError::CollectionNotFound => StatusCode::NOT_FOUND,
        }
    }
}

impl IntoResponse for UploadError {
    fn into_response(self) -> Response {
        let body = Json(serde_json::json!({
            "error": self.category(),
            "message": self.to_string(),
        }));
        (self.status(), body).into_response()
    }
}

/// Errors returned by the catalog management endpoints.
#[derive(Debug, Error)]
pub enum ApiError {
    #[error("{0}")]
    NotFound(String),

    #[error("{0}")]
    BadRequest(String),

    #[error("{0}")]
    Conflict(String),

    #[error("Storage unavailable")]
    StorageUnavailable,

    #[error("{0}")]
    Internal(String),
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let (status, code) = match &self {
            ApiError::NotFound(_) => (StatusCode::NOT_FOUND, "NOT_FOUND"),
            ApiError::BadRequest(_) => (StatusCode::BAD_REQUEST, "BAD_REQUEST"),
            ApiError::Conflict(_) => (StatusCode::CONFLICT, "CONFLICT"),
            ApiError::StorageUnavailable => (StatusCode::SERVICE_UNAVAILABLE, "STORAGE_UNAVAILABLE"),
            ApiError::Internal(_) => (StatusCode::INTERNAL_SERVER_ERROR, "INTERNAL_ERROR"),
        };

        let body = Json(serde_json::json!({
            "error": code,
            "message": self.to_string(),
        }));

        (status, body).into_response()
    }
}

impl From<anyhow::Error> for ApiError {
    fn from(e: anyhow::Error) -> Self {
        tracing::error!("Request failed: {:#}", e);
        ApiError::Internal("Internal server error".to_string())
    }
}

/// True when the error chain contains a database unique-constraint violation.
pub fn is_unique_violation(e: &anyhow::Error) -> bool {
    e.chain().any(|cause| {
        cause
            .downcast_ref::<sqlx::Error>()
            .and_then(|err| err.as_database_error())
            .map(|db_err| db_err.is_unique_violation())
            .unwrap_or(false)
    })
}
