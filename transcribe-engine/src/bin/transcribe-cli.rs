//! transcribe-cli — thin CLI wrapper around the same job pipeline the
//! HTTP surface drives: submit a local file, then poll until the job
//! reaches a terminal state, printing progress as it streams in.

use clap::Parser;
use std::process::ExitCode;
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::FmtSubscriber;
use transcribe_common::model::{ErrorKind, Instrument, JobOptions, JobStatus, Source};
use transcribe_engine::{
    config::AppConfig,
    db,
    jobs::JobStore,
    pipeline::orchestrator::{self, OrchestratorDeps},
};

/// Submit an audio file to the transcription pipeline and wait for it
/// to finish.
#[derive(Parser, Debug)]
#[command(name = "transcribe-cli", about = "Submit a local audio file for transcription")]
struct Cli {
    /// Path to a local audio file to transcribe.
    file: String,

    /// Comma-separated instrument tags (piano,vocals,drums,bass,guitar,other).
    #[arg(long, value_delimiter = ',', default_value = "piano")]
    instruments: Vec<String>,

    /// Enable the Test-Time Augmentation aggregator (C5).
    #[arg(long)]
    tta: bool,

    /// Enable the note-roll refiner (C6).
    #[arg(long)]
    refiner: bool,

    /// Workspace root for job artifacts and the sqlite mirror.
    #[arg(long)]
    workspace_root: Option<String>,
}

#[tokio::main]
async fn main() -> ExitCode {
    let subscriber = FmtSubscriber::builder()
        .with_max_level(tracing::Level::INFO)
        .finish();
    let _ = tracing::subscriber::set_global_default(subscriber);

    let cli = Cli::parse();
    match run(cli).await {
        Ok(code) => code,
        Err(err) => {
            error!("{err}");
            ExitCode::from(3)
        }
    }
}

async fn run(cli: Cli) -> anyhow::Result<ExitCode> {
    if !std::path::Path::new(&cli.file).exists() {
        error!("file not found: {}", cli.file);
        return Ok(ExitCode::from(1));
    }

    let instruments: Vec<Instrument> = cli
        .instruments
        .iter()
        .filter_map(|tag| Instrument::parse_tag(tag))
        .collect();
    if instruments.is_empty() {
        error!("no recognized instrument tags in --instruments");
        return Ok(ExitCode::from(1));
    }

    let config = AppConfig::resolve(cli.workspace_root.as_deref(), None)?;
    std::fs::create_dir_all(&config.workspace_root)?;
    let db_pool = db::init_database_pool(&config.db_path).await?;

    let event_bus = Arc::new(transcribe_common::EventBus::new(64));
    let job_store = JobStore::new(event_bus);
    let deps = Arc::new(OrchestratorDeps {
        job_store: job_store.clone(),
        db_pool,
        workspace_root: config.workspace_root.clone(),
        engine_config: config.engine.clone(),
    });

    let job_id = uuid::Uuid::new_v4();
    let source = Source::Upload { path: cli.file.clone() };
    let options = JobOptions {
        instruments,
        vocal_substitute_program: 0,
        enable_tta: cli.tta,
        enable_refiner: cli.refiner,
    };

    job_store.create(job_id, source.clone(), options).await?;
    info!(%job_id, "job submitted");

    // Single-worker model: this process runs exactly one job and waits
    // for it inline rather than spawning a detached task, since there
    // is no HTTP caller here to hand a job_id back to immediately.
    orchestrator::run_job(deps, job_id, source).await;

    let record = job_store
        .get(job_id)
        .await
        .ok_or_else(|| anyhow::anyhow!("job record disappeared after run"))?;

    match record.status {
        JobStatus::Completed => {
            info!("transcription complete");
            for (instrument, artifact) in &record.artifacts {
                info!("{instrument}: {}", artifact.midi_path);
            }
            if let Some(bpm) = record.metadata.tempo_bpm {
                info!("tempo: {bpm:.1} bpm");
            }
            if let Some(key) = &record.metadata.key {
                info!("key: {key}");
            }
            Ok(ExitCode::SUCCESS)
        }
        JobStatus::Failed => {
            let error = record.error.unwrap_or(transcribe_common::model::JobError {
                kind: ErrorKind::Internal,
                stage: "unknown".to_string(),
                message: "job failed with no recorded error".to_string(),
            });
            error!(stage = %error.stage, "transcription failed: {}", error.message);
            let code = match error.kind {
                ErrorKind::InvalidInput | ErrorKind::SourceTooLong => 1,
                ErrorKind::SourceUnavailable | ErrorKind::ModelError | ErrorKind::NoAudioContent => 2,
                ErrorKind::Timeout | ErrorKind::Internal => 3,
            };
            Ok(ExitCode::from(code))
        }
        other => {
            error!("job ended in unexpected non-terminal status {other:?}");
            Ok(ExitCode::from(3))
        }
    }
}
