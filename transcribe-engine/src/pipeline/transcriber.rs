//! Transcriber (C3): runs one model over one stem's audio and writes
//! its MIDI + confidence sidecar pair under the job workspace.
//!
//! Piano stems are routed through both models (`a` = generalist,
//! `b` = piano specialist); every other instrument runs the
//! generalist alone and its output is the final per-instrument result
//! with no voting stage.

use crate::error::StageError;
use crate::pipeline::model_backend::{AudioBuffer, GeneralistModel, NoteModel, PianoSpecialistModel};
use crate::{midi, workspace::JobWorkspace};
use std::path::PathBuf;
use transcribe_common::model::{Instrument, Note};

/// Native sample rate each synthetic model backend expects its input
/// resampled to before inference. Both share one rate here since
/// neither backend is an actual pretrained network with a fixed input
/// spec, but the seam exists so a future real model can differ.
pub const MODEL_NATIVE_SAMPLE_RATE: u32 = 16_000;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModelTag {
    A,
    B,
}

impl ModelTag {
    fn file_stem(&self) -> &'static str {
        match self {
            ModelTag::A => "a",
            ModelTag::B => "b",
        }
    }
}

/// One model's output for a stem: where its MIDI/sidecar pair landed
/// and the notes themselves (kept in memory too, so the voter doesn't
/// have to re-read the MIDI it was just handed).
pub struct TranscriptionOutput {
    pub model: ModelTag,
    pub midi_path: PathBuf,
    pub confidence_path: PathBuf,
    pub notes: Vec<Note>,
}

/// Runs `model` over `audio` (already resampled by the caller to
/// [`MODEL_NATIVE_SAMPLE_RATE`]) and writes its output under
/// `workspace`'s per-instrument transcriptions directory.
pub fn transcribe_with_model(
    workspace: &JobWorkspace,
    instrument: Instrument,
    tag: ModelTag,
    model: &dyn NoteModel,
    audio: &AudioBuffer,
) -> Result<TranscriptionOutput, StageError> {
    let notes = model
        .infer(audio)
        .map_err(|e| StageError::ModelError(e.to_string()))?;

    let dir = workspace.transcriptions_dir(instrument);
    let midi_path = dir.join(format!("{}.mid", tag.file_stem()));
    let confidence_path = dir.join(format!("{}_confidence.json", tag.file_stem()));

    midi::write_midi(&midi_path, &notes, None, None).map_err(|e| StageError::Internal(e.to_string()))?;
    midi::write_confidence_sidecar(&confidence_path, &notes)
        .map_err(|e| StageError::Internal(e.to_string()))?;

    Ok(TranscriptionOutput { model: tag, midi_path, confidence_path, notes })
}

/// Runs the instrument's full transcriber route over a
/// resampled stem, returning every model output produced: one for
/// `GeneralistOnly`, two (`a`, `b`) for `Ensemble`.
pub fn run_route(
    workspace: &JobWorkspace,
    instrument: Instrument,
    audio: &AudioBuffer,
) -> Result<Vec<TranscriptionOutput>, StageError> {
    use transcribe_common::model::TranscriberRoute;

    match instrument.transcriber_route() {
        TranscriberRoute::GeneralistOnly => {
            let model = GeneralistModel::default();
            let out = transcribe_with_model(workspace, instrument, ModelTag::A, &model, audio)?;
            Ok(vec![out])
        }
        TranscriberRoute::Ensemble => {
            let a = GeneralistModel::default();
            let b = PianoSpecialistModel::default();
            let out_a = transcribe_with_model(workspace, instrument, ModelTag::A, &a, audio)?;
            let out_b = transcribe_with_model(workspace, instrument, ModelTag::B, &b, audio)?;
            Ok(vec![out_a, out_b])
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;
    use uuid::Uuid;

    fn tone(secs: f32) -> AudioBuffer {
        let sample_rate = MODEL_NATIVE_SAMPLE_RATE;
        let n = (secs * sample_rate as f32) as usize;
        let samples = (0..n)
            .map(|i| 0.8 * (2.0 * std::f32::consts::PI * 440.0 * i as f32 / sample_rate as f32).sin())
            .collect();
        AudioBuffer { samples, sample_rate }
    }

    #[test]
    fn generalist_only_route_produces_one_output() {
        let dir = tempdir().unwrap();
        let workspace = JobWorkspace::new(dir.path(), Uuid::new_v4());
        let audio = tone(0.5);
        let outputs = run_route(&workspace, Instrument::Drums, &audio).unwrap();
        assert_eq!(outputs.len(), 1);
        assert!(outputs[0].midi_path.exists());
        assert!(outputs[0].confidence_path.exists());
    }

    #[test]
    fn ensemble_route_produces_two_outputs_for_piano() {
        let dir = tempdir().unwrap();
        let workspace = JobWorkspace::new(dir.path(), Uuid::new_v4());
        let audio = tone(0.5);
        let outputs = run_route(&workspace, Instrument::Piano, &audio).unwrap();
        assert_eq!(outputs.len(), 2);
        assert_eq!(outputs[0].model, ModelTag::A);
        assert_eq!(outputs[1].model, ModelTag::B);
    }
}
