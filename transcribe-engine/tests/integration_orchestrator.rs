//! End-to-end pipeline orchestrator tests: submit a job against a real
//! (synthetic-tone) WAV fixture and drive it through the full C1-C7
//! state machine, checking cross-cutting properties of the whole
//! system rather than any one component.

use std::sync::Arc;
use tempfile::tempdir;
use transcribe_common::model::{Instrument, JobOptions, JobStatus, Source};
use transcribe_engine::{
    db,
    jobs::JobStore,
    pipeline::orchestrator::{self, OrchestratorDeps},
};

fn write_tone_wav(path: &std::path::Path, freq: f32, secs: f32, sample_rate: u32) {
    let spec = hound::WavSpec {
        channels: 1,
        sample_rate,
        bits_per_sample: 16,
        sample_format: hound::SampleFormat::Int,
    };
    let mut writer = hound::WavWriter::create(path, spec).unwrap();
    let n = (secs * sample_rate as f32) as usize;
    for i in 0..n {
        let t = i as f32 / sample_rate as f32;
        let sample = (0.6 * (2.0 * std::f32::consts::PI * freq * t).sin() * i16::MAX as f32) as i16;
        writer.write_sample(sample).unwrap();
    }
    writer.finalize().unwrap();
}

async fn fresh_deps(workspace_root: &std::path::Path) -> Arc<OrchestratorDeps> {
    let db_path = workspace_root.join("jobs.db");
    let db_pool = db::init_database_pool(&db_path).await.unwrap();
    let event_bus = Arc::new(transcribe_common::EventBus::new(32));
    let job_store = JobStore::new(event_bus);
    Arc::new(OrchestratorDeps {
        job_store,
        db_pool,
        workspace_root: workspace_root.to_path_buf(),
        engine_config: transcribe_common::config::EngineConfig::default(),
    })
}

#[tokio::test]
async fn happy_path_produces_valid_midi_and_parallel_sidecar() {
    let dir = tempdir().unwrap();
    let wav_path = dir.path().join("input.wav");
    write_tone_wav(&wav_path, 440.0, 2.0, 22050);

    let deps = fresh_deps(dir.path()).await;
    let job_id = uuid::Uuid::new_v4();
    let source = Source::Upload { path: wav_path.to_string_lossy().to_string() };
    let options = JobOptions {
        instruments: vec![Instrument::Vocals],
        vocal_substitute_program: 0,
        enable_tta: false,
        enable_refiner: false,
    };
    deps.job_store.create(job_id, source.clone(), options).await.unwrap();

    orchestrator::run_job(deps.clone(), job_id, source).await;

    let record = deps.job_store.get(job_id).await.unwrap();
    assert_eq!(record.status, JobStatus::Completed);
    assert_eq!(record.progress, 100);

    // Every artifact entry must open as a MIDI file with >=1 track.
    for artifact in record.artifacts.values() {
        let bytes = std::fs::read(&artifact.midi_path).unwrap();
        let smf = midly::Smf::parse(&bytes).unwrap();
        assert!(!smf.tracks.is_empty());

        // Confidence sidecar stays aligned entry-for-entry with the notes.
        let notes = transcribe_engine::midi::read_midi_notes(std::path::Path::new(&artifact.midi_path)).unwrap();
        let sidecar = transcribe_engine::midi::read_confidence_sidecar(std::path::Path::new(&artifact.confidence_path)).unwrap();
        assert_eq!(notes.len(), sidecar.len());
        for (note, entry) in notes.iter().zip(sidecar.iter()) {
            assert_eq!(note.pitch, entry.pitch);
        }
    }
}

#[tokio::test]
async fn tta_and_refiner_enabled_completes_without_failing() {
    let dir = tempdir().unwrap();
    let wav_path = dir.path().join("piano.wav");
    write_tone_wav(&wav_path, 261.63, 1.5, 22050);

    let deps = fresh_deps(dir.path()).await;
    let job_id = uuid::Uuid::new_v4();
    let source = Source::Upload { path: wav_path.to_string_lossy().to_string() };
    let options = JobOptions {
        instruments: vec![Instrument::Piano],
        vocal_substitute_program: 0,
        enable_tta: true,
        enable_refiner: true,
    };
    deps.job_store.create(job_id, source.clone(), options).await.unwrap();

    orchestrator::run_job(deps.clone(), job_id, source).await;

    let record = deps.job_store.get(job_id).await.unwrap();
    assert_eq!(record.status, JobStatus::Completed);
    assert!(record.artifacts.contains_key("piano"));
}

#[tokio::test]
async fn missing_upload_file_fails_with_source_unavailable() {
    let dir = tempdir().unwrap();
    let deps = fresh_deps(dir.path()).await;
    let job_id = uuid::Uuid::new_v4();
    let source = Source::Upload { path: dir.path().join("does_not_exist.wav").to_string_lossy().to_string() };
    let options = JobOptions {
        instruments: vec![Instrument::Piano],
        vocal_substitute_program: 0,
        enable_tta: false,
        enable_refiner: false,
    };
    deps.job_store.create(job_id, source.clone(), options).await.unwrap();

    orchestrator::run_job(deps.clone(), job_id, source).await;

    let record = deps.job_store.get(job_id).await.unwrap();
    assert_eq!(record.status, JobStatus::Failed);
    assert!(record.artifacts.is_empty());
    let error = record.error.unwrap();
    assert_eq!(error.kind, transcribe_common::model::ErrorKind::SourceUnavailable);
}

#[tokio::test]
async fn url_source_is_unsupported_without_an_external_fetcher() {
    let dir = tempdir().unwrap();
    let deps = fresh_deps(dir.path()).await;
    let job_id = uuid::Uuid::new_v4();
    let source = Source::Url { value: "https://example.com/video".to_string() };
    let options = JobOptions {
        instruments: vec![Instrument::Vocals],
        vocal_substitute_program: 0,
        enable_tta: false,
        enable_refiner: false,
    };
    deps.job_store.create(job_id, source.clone(), options).await.unwrap();

    orchestrator::run_job(deps.clone(), job_id, source).await;

    let record = deps.job_store.get(job_id).await.unwrap();
    assert_eq!(record.status, JobStatus::Failed);
    assert_eq!(record.error.unwrap().kind, transcribe_common::model::ErrorKind::SourceUnavailable);
}

#[tokio::test]
async fn no_requested_instrument_above_energy_floor_yields_no_audio_content() {
    let dir = tempdir().unwrap();
    let wav_path = dir.path().join("silence.wav");
    // A near-silent buffer: every stem's energy fraction should fall
    // below the default separator floor.
    let spec = hound::WavSpec { channels: 1, sample_rate: 22050, bits_per_sample: 16, sample_format: hound::SampleFormat::Int };
    let mut writer = hound::WavWriter::create(&wav_path, spec).unwrap();
    for _ in 0..22050 {
        writer.write_sample(0i16).unwrap();
    }
    writer.finalize().unwrap();

    let deps = fresh_deps(dir.path()).await;
    let job_id = uuid::Uuid::new_v4();
    let source = Source::Upload { path: wav_path.to_string_lossy().to_string() };
    let options = JobOptions {
        instruments: vec![Instrument::Bass],
        vocal_substitute_program: 0,
        enable_tta: false,
        enable_refiner: false,
    };
    deps.job_store.create(job_id, source.clone(), options).await.unwrap();

    orchestrator::run_job(deps.clone(), job_id, source).await;

    let record = deps.job_store.get(job_id).await.unwrap();
    assert_eq!(record.status, JobStatus::Failed);
    assert_eq!(record.error.unwrap().kind, transcribe_common::model::ErrorKind::NoAudioContent);
}
