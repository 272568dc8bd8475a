//! Shared signal-processing primitives and the two C3 transcription
//! models.
//!
//! No pretrained weights ship with this crate — there is no ONNX
//! runtime or GPU dependency in the corpus this workspace was built
//! from. `GeneralistModel` and `PianoSpecialistModel` are deterministic
//! synthetic backends: real (if simplified) onset detection and pitch
//! estimation over frame energy, standing in for the learned models the
//! contract describes. They exist so the orchestration logic around
//! them — ensembling, TTA un-warping, refinement — is genuinely
//! exercisable end to end.

use thiserror::Error;
use transcribe_common::model::{Note, MIN_NOTE_DURATION_SECS};

/// A single-channel block of PCM audio at a known sample rate.
#[derive(Debug, Clone)]
pub struct AudioBuffer {
    pub samples: Vec<f32>,
    pub sample_rate: u32,
}

impl AudioBuffer {
    pub fn duration_seconds(&self) -> f64 {
        self.samples.len() as f64 / self.sample_rate.max(1) as f64
    }

    /// RMS energy of the whole buffer, used for stem energy-fraction
    /// bookkeeping in the separator.
    pub fn rms(&self) -> f32 {
        if self.samples.is_empty() {
            return 0.0;
        }
        let sum_sq: f64 = self.samples.iter().map(|s| (*s as f64) * (*s as f64)).sum();
        (sum_sq / self.samples.len() as f64).sqrt() as f32
    }
}

/// Error raised by a model backend at inference time: resource
/// exhaustion, unsupported input shape, or similar — always surfaced as
/// `model-error` to the job record.
#[derive(Debug, Error, Clone)]
pub enum ModelError {
    #[error("model inference failed: {0}")]
    Inference(String),
}

const FRAME_SIZE: usize = 1024;
const HOP_SIZE: usize = 512;

/// Per-frame RMS energy over a buffer, at `HOP_SIZE` stride.
fn frame_energies(audio: &AudioBuffer) -> Vec<f32> {
    if audio.samples.is_empty() {
        return Vec::new();
    }
    let mut energies = Vec::new();
    let mut start = 0;
    while start < audio.samples.len() {
        let end = (start + FRAME_SIZE).min(audio.samples.len());
        let frame = &audio.samples[start..end];
        let sum_sq: f64 = frame.iter().map(|s| (*s as f64) * (*s as f64)).sum();
        energies.push((sum_sq / frame.len().max(1) as f64).sqrt() as f32);
        start += HOP_SIZE;
    }
    energies
}

/// Coarse pitch estimate for one frame via zero-crossing rate, mapped
/// onto the nearest MIDI note number. Good enough to give the synthetic
/// note stream a spread of pitches driven by the audio's actual
/// spectral content, without a full pitch-tracking model.
fn estimate_pitch(frame: &[f32], sample_rate: u32) -> u8 {
    if frame.len() < 2 {
        return 60;
    }
    let mut crossings = 0u32;
    for w in frame.windows(2) {
        if (w[0] >= 0.0) != (w[1] >= 0.0) {
            crossings += 1;
        }
    }
    let duration = frame.len() as f32 / sample_rate as f32;
    let freq = (crossings as f32 / 2.0) / duration.max(1e-6);
    let freq = freq.clamp(20.0, 5000.0);
    let midi = 69.0 + 12.0 * (freq / 440.0).log2();
    midi.round().clamp(0.0, 127.0) as u8
}

/// Decodes a frame-energy onset stream into discrete notes: a note
/// starts where energy rises above `floor` and ends where it falls back
/// below it (or the buffer ends), subject to the 128th-note duration
/// floor.
fn decode_notes_from_energy(
    audio: &AudioBuffer,
    floor: f32,
    default_confidence: f32,
) -> Vec<Note> {
    let energies = frame_energies(audio);
    let hop_secs = HOP_SIZE as f64 / audio.sample_rate.max(1) as f64;

    let mut notes = Vec::new();
    let mut active: Option<(usize, u8)> = None;

    for (i, &e) in energies.iter().enumerate() {
        let start = i * HOP_SIZE;
        let end = (start + FRAME_SIZE).min(audio.samples.len());
        let pitch = estimate_pitch(&audio.samples[start..end], audio.sample_rate);

        match (active, e > floor) {
            (None, true) => active = Some((i, pitch)),
            (Some((start_idx, start_pitch)), true) if start_pitch != pitch => {
                let onset = start_idx as f64 * hop_secs;
                let offset = i as f64 * hop_secs;
                push_note(&mut notes, start_pitch, onset, offset, default_confidence);
                active = Some((i, pitch));
            }
            (Some((start_idx, start_pitch)), false) => {
                let onset = start_idx as f64 * hop_secs;
                let offset = i as f64 * hop_secs;
                push_note(&mut notes, start_pitch, onset, offset, default_confidence);
                active = None;
            }
            _ => {}
        }
    }
    if let Some((start_idx, pitch)) = active {
        let onset = start_idx as f64 * hop_secs;
        let offset = energies.len() as f64 * hop_secs;
        push_note(&mut notes, pitch, onset, offset, default_confidence);
    }

    notes.sort_by(|a, b| a.onset.partial_cmp(&b.onset).unwrap().then(a.pitch.cmp(&b.pitch)));
    dedupe_onset_buckets(notes)
}

fn push_note(notes: &mut Vec<Note>, pitch: u8, onset: f64, offset: f64, confidence: f32) {
    let offset = offset.max(onset + MIN_NOTE_DURATION_SECS);
    if offset - onset < MIN_NOTE_DURATION_SECS {
        return;
    }
    notes.push(Note {
        pitch,
        onset,
        offset,
        velocity: 80,
        confidence,
    });
}

/// Collapses duplicate `(pitch, onset-bucket)` entries within one
/// model's output to the higher-confidence one, per the Note data
/// model's invariant.
fn dedupe_onset_buckets(notes: Vec<Note>) -> Vec<Note> {
    const SAME_NOTE_TOLERANCE_SECS: f64 = 0.01;
    let mut out: Vec<Note> = Vec::with_capacity(notes.len());
    for note in notes {
        if let Some(existing) = out.iter_mut().find(|n: &&mut Note| {
            n.pitch == note.pitch && (n.onset - note.onset).abs() <= SAME_NOTE_TOLERANCE_SECS
        }) {
            if note.confidence > existing.confidence {
                *existing = note;
            }
        } else {
            out.push(note);
        }
    }
    out
}

/// A model backend that turns a stem's audio into a note list with
/// per-note confidence already attached.
pub trait NoteModel: Send + Sync {
    fn infer(&self, audio: &AudioBuffer) -> Result<Vec<Note>, ModelError>;
}

/// The generalist multi-instrument model ("A"). Exposes no native
/// confidence signal, so every note gets the fixed default of 1.0 —
/// the voter treats this as a prior vote rather than real evidence.
pub struct GeneralistModel {
    pub energy_floor: f32,
}

impl Default for GeneralistModel {
    fn default() -> Self {
        Self { energy_floor: 0.01 }
    }
}

impl NoteModel for GeneralistModel {
    fn infer(&self, audio: &AudioBuffer) -> Result<Vec<Note>, ModelError> {
        if audio.samples.is_empty() {
            return Err(ModelError::Inference("empty audio buffer".to_string()));
        }
        Ok(decode_notes_from_energy(audio, self.energy_floor, 1.0))
    }
}

/// The piano specialist ("B"). Internally tracks onset/offset roll
/// probabilities and derives each note's confidence as the geometric
/// mean of its onset and offset window probabilities.
pub struct PianoSpecialistModel {
    pub energy_floor: f32,
}

impl Default for PianoSpecialistModel {
    fn default() -> Self {
        Self { energy_floor: 0.01 }
    }
}

const PIANO_MIN_PITCH: u8 = 21;
const PIANO_MAX_PITCH: u8 = 108;

impl PianoSpecialistModel {
    /// Onset/offset roll probability at a frame, modeled as the
    /// frame's energy normalized against the loudest frame in the
    /// buffer — a stand-in for a learned onset/offset detector's
    /// softmax output.
    fn roll_probability(&self, energies: &[f32], frame_idx: usize, window: usize) -> f32 {
        let peak = energies.iter().cloned().fold(0.0f32, f32::max).max(1e-6);
        let lo = frame_idx.saturating_sub(window);
        let hi = (frame_idx + window + 1).min(energies.len());
        energies[lo..hi]
            .iter()
            .cloned()
            .fold(0.0f32, f32::max)
            .min(peak)
            / peak
    }
}

impl NoteModel for PianoSpecialistModel {
    fn infer(&self, audio: &AudioBuffer) -> Result<Vec<Note>, ModelError> {
        if audio.samples.is_empty() {
            return Err(ModelError::Inference("empty audio buffer".to_string()));
        }
        let energies = frame_energies(audio);
        let hop_secs = HOP_SIZE as f64 / audio.sample_rate.max(1) as f64;

        let raw = decode_notes_from_energy(audio, self.energy_floor, 1.0);
        let mut notes = Vec::with_capacity(raw.len());
        for note in raw {
            if note.pitch < PIANO_MIN_PITCH || note.pitch > PIANO_MAX_PITCH {
                continue;
            }
            let onset_frame = (note.onset / hop_secs).round() as usize;
            let offset_frame = (note.offset / hop_secs).round() as usize;
            let onset_conf = self.roll_probability(&energies, onset_frame.min(energies.len().saturating_sub(1)), 2);
            let offset_conf = self.roll_probability(&energies, offset_frame.min(energies.len().saturating_sub(1)), 2);
            let confidence = (onset_conf * offset_conf).sqrt().clamp(1e-4, 1.0);
            notes.push(Note { confidence, ..note });
        }
        Ok(notes)
    }
}
