//! Shared application state injected into every handler.

use chrono::{DateTime, Utc};
use std::sync::Arc;

use crate::config::AppConfig;
use crate::error::ServiceError;
use crate::housekeeping::CollectionLocks;
use crate::media::Transcoder;
use crate::repository::SqliteRepository;
use crate::service::{IngestPool, PipelineContext};
use crate::storage::FileStore;

pub struct AppState {
    pub config: AppConfig,
    pub ctx: PipelineContext,
    pub pool: IngestPool,
    pub locks: Arc<CollectionLocks>,
    pub started_at: DateTime<Utc>,
}

impl AppState {
    /// Builds the full dependency graph. Must run inside a tokio runtime
    /// because the ingest pool spawns its workers here.
    pub fn from_config(config: AppConfig) -> Result<Self, ServiceError> {
        let repo = Arc::new(SqliteRepository::new(&config.database.db_path)?);
        let store = Arc::new(FileStore::new(&config.storage)?);
        let transcoder = Arc::new(Transcoder::detect(&config.media));
        let ctx = PipelineContext {
            repo,
            store,
            transcoder,
        };
        let pool = IngestPool::start(
            ctx.clone(),
            config.ingest.workers,
            config.ingest.queue_capacity,
        );
        Ok(Self {
            config,
            ctx,
            pool,
            locks: Arc::new(CollectionLocks::new()),
            started_at: Utc::now(),
        })
    }
}
