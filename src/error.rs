//! Service Error Taxonomy
//!
//! A single error type shared by every layer. Handlers return it directly;
//! the `ResponseError` impl maps each variant to a stable HTTP status so
//! callers get a specific, machine-checkable rejection reason.

use actix_web::http::StatusCode;
use actix_web::{HttpResponse, ResponseError};
use serde_json::json;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ServiceError {
    /// Unknown collection or entry.
    #[error("not found: {0}")]
    NotFound(String),

    /// Malformed metadata, missing parts, or schema violations.
    #[error("validation failed: {0}")]
    Validation(String),

    /// MIME type not permitted for the collection's content type.
    #[error("unsupported media type: {0}")]
    Unsupported(String),

    /// Conversion is required but the transcoder is not available.
    #[error("dependency unavailable: {0}")]
    DependencyUnavailable(String),

    /// A collection with the same name already exists.
    #[error("conflict: {0}")]
    Conflict(String),

    /// The ingest queue is saturated; the upload was rejected before any
    /// row or file was created.
    #[error("ingest queue is full, try again later")]
    Overloaded,

    /// I/O, data-store, or encoding failures not attributable to the caller.
    #[error("internal error: {0}")]
    Internal(String),
}

impl ServiceError {
    /// Shorthand for wrapping any displayable error as `Internal`.
    pub fn internal<E: std::fmt::Display>(err: E) -> Self {
        ServiceError::Internal(err.to_string())
    }
}

impl From<rusqlite::Error> for ServiceError {
    fn from(err: rusqlite::Error) -> Self {
        match err {
            rusqlite::Error::QueryReturnedNoRows => {
                ServiceError::NotFound("record not found".to_string())
            }
            other => ServiceError::Internal(other.to_string()),
        }
    }
}

impl From<std::io::Error> for ServiceError {
    fn from(err: std::io::Error) -> Self {
        ServiceError::Internal(err.to_string())
    }
}

impl ResponseError for ServiceError {
    fn status_code(&self) -> StatusCode {
        match self {
            ServiceError::NotFound(_) => StatusCode::NOT_FOUND,
            ServiceError::Validation(_) => StatusCode::BAD_REQUEST,
            ServiceError::Unsupported(_) => StatusCode::UNSUPPORTED_MEDIA_TYPE,
            ServiceError::DependencyUnavailable(_) => StatusCode::FAILED_DEPENDENCY,
            ServiceError::Conflict(_) => StatusCode::CONFLICT,
            ServiceError::Overloaded => StatusCode::SERVICE_UNAVAILABLE,
            ServiceError::Internal(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    fn error_response(&self) -> HttpResponse {
        HttpResponse::build(self.status_code()).json(json!({ "error": self.to_string() }))
    }
}
