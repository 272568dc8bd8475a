//! transcribe-engine library interface.
//!
//! Exposes the pipeline, job store, and HTTP surface for the
//! `transcribe-engine` binary and for integration testing.

pub mod api;
pub mod config;
pub mod db;
pub mod error;
pub mod jobs;
pub mod midi;
pub mod pipeline;
pub mod worker;
pub mod workspace;

pub use crate::error::{ApiError, ApiResult};

use chrono::{DateTime, Utc};
use sqlx::SqlitePool;
use std::sync::Arc;

use crate::jobs::JobStore;
use crate::pipeline::orchestrator::OrchestratorDeps;
use crate::worker::JobQueue;

/// Application state shared across every Axum handler.
#[derive(Clone)]
pub struct AppState {
    pub job_store: JobStore,
    pub db_pool: SqlitePool,
    pub orchestrator_deps: Arc<OrchestratorDeps>,
    pub job_queue: JobQueue,
    pub startup_time: DateTime<Utc>,
}

impl AppState {
    pub fn new(job_store: JobStore, db_pool: SqlitePool, orchestrator_deps: Arc<OrchestratorDeps>, job_queue: JobQueue) -> Self {
        Self {
            job_store,
            db_pool,
            orchestrator_deps,
            job_queue,
            startup_time: Utc::now(),
        }
    }
}

/// Builds the full application router: health, job submission/query,
/// artifact download, metadata, and the WS progress stream, behind
/// CORS and request tracing middleware.
pub fn build_router(state: AppState) -> axum::Router {
    use tower_http::{cors::CorsLayer, trace::TraceLayer};

    axum::Router::new()
        .merge(api::health_routes())
        .merge(api::job_routes())
        .merge(api::stream_routes())
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
        .with_state(state)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn app_state_construction() {
        let pool = SqlitePool::connect("sqlite::memory:").await.unwrap();
        let job_store = JobStore::new(Arc::new(transcribe_common::EventBus::new(16)));
        let deps = Arc::new(OrchestratorDeps {
            job_store: job_store.clone(),
            db_pool: pool.clone(),
            workspace_root: std::env::temp_dir(),
            engine_config: transcribe_common::config::EngineConfig::default(),
        });
        let job_queue = crate::worker::spawn(deps.clone());
        let state = AppState::new(job_store, pool, deps, job_queue);
        let _router = build_router(state);
    }
}
