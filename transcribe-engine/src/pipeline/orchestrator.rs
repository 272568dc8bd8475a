//! Pipeline Orchestrator (C7): drives one job from `queued` through
//! `running` to a terminal state, invoking every stage in order and
//! publishing progress at the exact percentages the external interface
//! contract promises.
//!
//! A linear per-stage sequence with a progress callback after each
//! stage: acquire audio, separate stems, then for each requested
//! instrument transcribe, vote, optionally augment and refine, before
//! collecting artifacts and detecting global metadata.

use crate::db;
use crate::error::StageError;
use crate::jobs::{JobPatch, JobStore};
use crate::pipeline::{augment::Variant, audio, metadata, model_backend, refiner, separator, transcriber, tta, voter};
use crate::workspace::JobWorkspace;
use sqlx::SqlitePool;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use transcribe_common::config::EngineConfig;
use transcribe_common::model::{Artifact, ErrorKind, Instrument, JobError, JobId, Note, Source};
use transcribe_common::TranscribeEvent;

pub struct OrchestratorDeps {
    pub job_store: JobStore,
    pub db_pool: SqlitePool,
    pub workspace_root: std::path::PathBuf,
    pub engine_config: EngineConfig,
}

/// Runs the full C7 state machine for `job_id`. The caller (the HTTP
/// handler or the CLI) is expected to spawn this as a detached task
/// per the single-worker scheduling model — one job in flight at a
/// time per process is a caller-side convention, not enforced here.
pub async fn run_job(deps: Arc<OrchestratorDeps>, job_id: JobId, source: Source) {
    if let Err(err) = run_job_inner(&deps, job_id, &source).await {
        tracing::error!(%job_id, error = ?err, "job failed");
        let job_error = JobError {
            kind: err.kind(),
            stage: err.stage().to_string(),
            message: err.to_string(),
        };
        let _ = deps.job_store.update(job_id, JobPatch::failed(job_error.clone())).await;
        deps.job_store.publish(
            job_id,
            TranscribeEvent::Error {
                kind: job_error.kind,
                stage: job_error.stage,
                message: job_error.message,
            },
        );
        mirror_best_effort(&deps, job_id).await;
        deps.job_store.retire_events(job_id);
    }
}

/// A `StageError` tagged with the stage name it failed in, so the
/// top-level `run_job` can populate the job record's `error.stage`
/// field without every stage having to know its own name redundantly.
struct StagedError {
    stage: String,
    inner: StageError,
}

impl StagedError {
    fn new(stage: impl Into<String>, inner: StageError) -> Self {
        Self { stage: stage.into(), inner }
    }
    fn kind(&self) -> ErrorKind {
        self.inner.kind()
    }
    fn stage(&self) -> &str {
        &self.stage
    }
}

impl std::fmt::Display for StagedError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.inner)
    }
}

async fn run_job_inner(deps: &OrchestratorDeps, job_id: JobId, source: &Source) -> Result<(), StagedError> {
    let workspace = JobWorkspace::new(&deps.workspace_root, job_id);
    workspace
        .ensure_dirs()
        .map_err(|e| StagedError::new("starting", StageError::Internal(e.to_string())))?;

    deps.job_store
        .update(job_id, JobPatch::running())
        .await
        .map_err(|e| StagedError::new("starting", StageError::Internal(e.to_string())))?;
    publish_progress(deps, job_id, 0, "starting", "job started").await;
    mirror_best_effort(deps, job_id).await;

    // Step 2: acquire audio.
    let source_path = acquire_audio(&workspace, source)
        .await
        .map_err(|e| StagedError::new("audio", e))?;
    publish_progress(deps, job_id, 10, "audio", "source audio acquired").await;

    let record = deps
        .job_store
        .get(job_id)
        .await
        .ok_or_else(|| StagedError::new("audio", StageError::Internal("job record disappeared".to_string())))?;
    let max_duration = Duration::from_secs(deps.engine_config.max_source_duration_secs);

    let mix = audio::decode_to_buffer(&source_path)
        .map_err(|e| StagedError::new("audio", StageError::SourceUnavailable(e.to_string())))?;
    if mix.samples.is_empty() {
        return Err(StagedError::new("audio", StageError::NoAudioContent("decoded to zero samples".to_string())));
    }
    if Duration::from_secs_f64(mix.duration_seconds()) > max_duration {
        return Err(StagedError::new(
            "audio",
            StageError::SourceTooLong(format!("{:.1}s exceeds ceiling", mix.duration_seconds())),
        ));
    }

    // Step 3: separate.
    let stems = separator::separate(&mix, &record.options.instruments, deps.engine_config.separator_energy_floor)
        .map_err(|e| StagedError::new("separation", StageError::ModelError(e.to_string())))?;
    publish_progress(deps, job_id, 25, "separation", "stems separated").await;

    if stems.is_empty() {
        return Err(StagedError::new(
            "separation",
            StageError::NoAudioContent("no requested instrument present above the energy floor".to_string()),
        ));
    }

    // Step 4: per stem.
    let total_stems = stems.len();
    let mut all_final_notes: Vec<Note> = Vec::new();
    let mut artifacts: Vec<(Instrument, Artifact)> = Vec::new();

    for (done, (&instrument, stem_audio)) in stems.iter().enumerate() {
        let resampled = audio::resample_to_rate(stem_audio, transcriber::MODEL_NATIVE_SAMPLE_RATE)
            .map_err(|e| StagedError::new(format!("ensemble/{instrument}"), StageError::Internal(e.to_string())))?;

        let ensemble_notes = run_stem(deps, &workspace, instrument, &resampled, &record.options)
            .map_err(|e| StagedError::new(format!("ensemble/{instrument}"), e))?;

        let final_notes = if record.options.enable_refiner {
            run_refiner_with_fallback(&ensemble_notes, resampled.duration_seconds(), deps.engine_config.refiner_threshold)
        } else {
            ensemble_notes
        };

        let program = matches!(instrument, Instrument::Vocals).then_some(record.options.vocal_substitute_program);

        let midi_path = workspace.artifact_midi_path(instrument);
        let confidence_path = workspace.artifact_confidence_path(instrument);
        crate::midi::write_midi(&midi_path, &final_notes, None, program)
            .map_err(|e| StagedError::new(format!("ensemble/{instrument}"), StageError::Internal(e.to_string())))?;
        crate::midi::write_confidence_sidecar(&confidence_path, &final_notes)
            .map_err(|e| StagedError::new(format!("ensemble/{instrument}"), StageError::Internal(e.to_string())))?;

        artifacts.push((
            instrument,
            Artifact {
                midi_path: midi_path.to_string_lossy().to_string(),
                confidence_path: confidence_path.to_string_lossy().to_string(),
            },
        ));
        all_final_notes.extend(final_notes);

        let progress = (25.0 + 70.0 * ((done + 1) as f64 / total_stems as f64)).round() as u8;
        publish_progress(deps, job_id, progress, &format!("ensemble/{instrument}"), "stem finished").await;
    }

    // Step 5: collect artifacts into the record.
    for (instrument, artifact) in artifacts {
        let _ = deps.job_store.update(job_id, JobPatch { artifact: Some((instrument, artifact)), ..Default::default() }).await;
    }
    mirror_best_effort(deps, job_id).await;

    // Step 6: detect global metadata.
    let detected = metadata::detect(&all_final_notes);
    deps.job_store
        .update(job_id, JobPatch { metadata: Some(detected), ..Default::default() })
        .await
        .map_err(|e| StagedError::new("metadata", StageError::Internal(e.to_string())))?;

    // Step 7: complete.
    deps.job_store
        .update(job_id, JobPatch::completed())
        .await
        .map_err(|e| StagedError::new("metadata", StageError::Internal(e.to_string())))?;
    deps.job_store.publish(job_id, TranscribeEvent::Completed);
    mirror_best_effort(deps, job_id).await;
    deps.job_store.retire_events(job_id);

    // The stems directory's contents are intermediate; the job's final
    // state only needs the artifacts directory on disk.
    let _ = workspace.remove_stems();

    Ok(())
}

/// Copies an uploaded file into the workspace, or hands a URL source
/// to the (unimplemented-here) external audio fetcher. The fetcher's
/// own implementation is explicitly out of this core's scope; a URL
/// source always fails with `SourceUnavailable` until one is wired in
/// by the surrounding deployment.
async fn acquire_audio(workspace: &JobWorkspace, source: &Source) -> Result<std::path::PathBuf, StageError> {
    match source {
        Source::Upload { path } => {
            let src = Path::new(path);
            let extension = src.extension().and_then(|e| e.to_str()).unwrap_or("wav");
            let dest = workspace.source_path(extension);
            tokio::fs::copy(src, &dest)
                .await
                .map_err(|e| StageError::SourceUnavailable(format!("copying upload: {e}")))?;
            Ok(dest)
        }
        Source::Url { value } => Err(StageError::SourceUnavailable(format!(
            "no external audio fetcher configured for url source: {value}"
        ))),
    }
}

/// Runs C3 (+ C4, + C5 if enabled) for one stem and returns its
/// post-ensemble (pre-refiner) note list.
fn run_stem(
    deps: &OrchestratorDeps,
    workspace: &JobWorkspace,
    instrument: Instrument,
    resampled: &model_backend::AudioBuffer,
    options: &transcribe_common::model::JobOptions,
) -> Result<Vec<Note>, StageError> {
    let outputs = transcriber::run_route(workspace, instrument, resampled)?;
    let notes_a = outputs
        .iter()
        .find(|o| o.model == transcriber::ModelTag::A)
        .map(|o| o.notes.clone())
        .unwrap_or_default();
    let notes_b = outputs
        .iter()
        .find(|o| o.model == transcriber::ModelTag::B)
        .map(|o| o.notes.clone())
        .unwrap_or_default();

    let weights = voter::VoterWeights::for_instrument(
        instrument,
        deps.engine_config.voter_weight_generalist,
        deps.engine_config.voter_weight_specialist,
    );
    let tolerance_secs = deps.engine_config.onset_tolerance_ms as f64 / 1000.0;
    const VOTER_THRESHOLD: f32 = 0.25;
    let ensemble_notes = voter::vote(&notes_a, &notes_b, &weights, VOTER_THRESHOLD, tolerance_secs);

    if !options.enable_tta {
        return Ok(ensemble_notes);
    }

    let tta_config = tta::TtaConfig {
        variants: Variant::defaults_capped(deps.engine_config.tta_pass_count),
        min_total_confidence: VOTER_THRESHOLD,
        tolerance_secs: 0.1,
        min_votes: deps.engine_config.min_votes,
        voter_weight_generalist: deps.engine_config.voter_weight_generalist,
        voter_weight_specialist: deps.engine_config.voter_weight_specialist,
    };
    tta::tta_transcribe(workspace, instrument, resampled, &tta_config)
}

/// Runs the refiner and falls back to the pre-refinement notes on any
/// failure — refinement is best-effort and the job must not fail
/// because the refiner did.
fn run_refiner_with_fallback(ensemble_notes: &[Note], duration_secs: f64, threshold: f32) -> Vec<Note> {
    let model = refiner::SmoothingRefinerModel;
    match refiner::refine(&model, ensemble_notes, duration_secs, threshold) {
        Ok(refined) => refined,
        Err(err) => {
            tracing::warn!(error = ?err, "refiner failed, falling back to ensemble output");
            ensemble_notes.to_vec()
        }
    }
}

/// Updates the job record's progress/stage and fans the same progress
/// out over the event bus. Awaited in place (not spawned) so that
/// progress events are published in the same order they are applied
/// to the record, preserving the monotonic-progress ordering
/// guarantee across the whole job.
async fn publish_progress(deps: &OrchestratorDeps, job_id: JobId, progress: u8, stage: &str, message: &str) {
    let patch = JobPatch::stage(progress, stage);
    if deps.job_store.update(job_id, patch).await.is_ok() {
        deps.job_store.publish(
            job_id,
            TranscribeEvent::Progress { progress, stage: stage.to_string(), message: message.to_string() },
        );
    }
}

async fn mirror_best_effort(deps: &OrchestratorDeps, job_id: JobId) {
    if let Some(record) = deps.job_store.get(job_id).await {
        if let Err(err) = db::save_job(&deps.db_pool, &record).await {
            tracing::warn!(%job_id, error = ?err, "sqlite mirror write failed (job store remains authoritative)");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn per_stem_failure_tags_the_stage_with_its_instrument() {
        let err = StagedError::new(format!("ensemble/{}", Instrument::Drums), StageError::ModelError("boom".to_string()));
        assert_eq!(err.stage(), "ensemble/drums");
        assert_eq!(err.kind(), ErrorKind::ModelError);
    }
}
