//! Service Layer
//!
//! Orchestrates repositories, file storage and media processing into the
//! operations the HTTP handlers expose.

pub mod collection_service;
pub mod entry_service;
pub mod export;
pub mod ingest;

pub use ingest::{IngestPool, PipelineContext};

use crate::error::ServiceError;

/// Runs a synchronous repository or filesystem closure off the async
/// executor threads.
pub(crate) async fn blocking<T, F>(f: F) -> Result<T, ServiceError>
where
    T: Send + 'static,
    F: FnOnce() -> Result<T, ServiceError> + Send + 'static,
{
    tokio::task::spawn_blocking(f)
        .await
        .map_err(ServiceError::internal)?
}
