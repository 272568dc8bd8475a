//! transcribe-engine — audio-to-notation transcription orchestration
//! core: job submission/status HTTP API, progress WebSocket stream,
//! and the C1-C7 pipeline that turns a recording into per-instrument
//! MIDI plus confidence sidecars.

use anyhow::Result;
use clap::Parser;
use std::sync::Arc;
use tracing::{info, Level};
use tracing_subscriber::FmtSubscriber;
use transcribe_engine::{
    config::AppConfig,
    db, jobs::JobStore,
    pipeline::orchestrator::OrchestratorDeps,
    AppState,
};

#[derive(Parser, Debug)]
#[command(name = "transcribe-engine", about = "Transcription orchestration core")]
struct Cli {
    /// Workspace root for job artifacts and the sqlite mirror.
    #[arg(long)]
    workspace_root: Option<String>,

    /// HTTP bind address, e.g. 127.0.0.1:5824.
    #[arg(long)]
    bind_addr: Option<String>,
}

#[tokio::main]
async fn main() -> Result<()> {
    let subscriber = FmtSubscriber::builder().with_max_level(Level::INFO).finish();
    tracing::subscriber::set_global_default(subscriber)?;

    let cli = Cli::parse();
    let config = AppConfig::resolve(cli.workspace_root.as_deref(), cli.bind_addr.as_deref())?;

    info!("Starting transcribe-engine");
    info!("Workspace root: {}", config.workspace_root.display());
    info!("Version: {}", env!("CARGO_PKG_VERSION"));

    std::fs::create_dir_all(&config.workspace_root)?;
    let db_pool = db::init_database_pool(&config.db_path).await?;
    info!("sqlite mirror ready: {}", config.db_path.display());

    let event_bus = Arc::new(transcribe_common::EventBus::new(100));
    let job_store = JobStore::new(event_bus);

    let orchestrator_deps = Arc::new(OrchestratorDeps {
        job_store: job_store.clone(),
        db_pool: db_pool.clone(),
        workspace_root: config.workspace_root.clone(),
        engine_config: config.engine.clone(),
    });

    let job_queue = transcribe_engine::worker::spawn(orchestrator_deps.clone());
    let state = AppState::new(job_store, db_pool, orchestrator_deps, job_queue);
    let app = transcribe_engine::build_router(state);

    let listener = tokio::net::TcpListener::bind(&config.bind_addr).await?;
    info!("Listening on http://{}", config.bind_addr);
    info!("Health check: http://{}/health", config.bind_addr);

    axum::serve(listener, app).await?;

    Ok(())
}
