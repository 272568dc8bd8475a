//! Domain types shared between the engine, its API layer, and the CLI.
//!
//! These are the plain-data shapes described by the job/stem/note data
//! model: source descriptors, job options, the recognized instrument
//! tags, notes, and the small transient grouping types used by the
//! ensemble voter and TTA aggregator.

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Opaque job identifier.
pub type JobId = Uuid;

/// Where the job's source audio comes from.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Source {
    Url { value: String },
    Upload { path: String },
}

/// Recognized instrument tags. Unknown tags in a request are silently
/// ignored rather than rejected, per the external interface contract.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Instrument {
    Piano,
    Vocals,
    Drums,
    Bass,
    Guitar,
    Other,
}

impl Instrument {
    /// Parses a freeform tag, returning `None` for anything unrecognized
    /// (the caller is expected to drop and warn, not error).
    pub fn parse_tag(tag: &str) -> Option<Self> {
        match tag.to_ascii_lowercase().as_str() {
            "piano" => Some(Self::Piano),
            "vocals" => Some(Self::Vocals),
            "drums" => Some(Self::Drums),
            "bass" => Some(Self::Bass),
            "guitar" => Some(Self::Guitar),
            "other" => Some(Self::Other),
            _ => None,
        }
    }

    pub fn as_tag(&self) -> &'static str {
        match self {
            Self::Piano => "piano",
            Self::Vocals => "vocals",
            Self::Drums => "drums",
            Self::Bass => "bass",
            Self::Guitar => "guitar",
            Self::Other => "other",
        }
    }

    /// Which transcribers a stem of this instrument is routed through.
    /// Only piano gets the specialist/generalist ensemble; everything
    /// else runs the generalist alone.
    pub fn transcriber_route(&self) -> TranscriberRoute {
        match self {
            Self::Piano => TranscriberRoute::Ensemble,
            _ => TranscriberRoute::GeneralistOnly,
        }
    }
}

impl fmt::Display for Instrument {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_tag())
    }
}

/// Which transcriber(s) a stem is run through.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TranscriberRoute {
    GeneralistOnly,
    Ensemble,
}

/// Per-job options supplied at submission time.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobOptions {
    pub instruments: Vec<Instrument>,
    #[serde(default = "default_vocal_substitute_program")]
    pub vocal_substitute_program: u8,
    #[serde(default)]
    pub enable_tta: bool,
    #[serde(default)]
    pub enable_refiner: bool,
}

fn default_vocal_substitute_program() -> u8 {
    0
}

/// Job lifecycle status. Transitions are one-way:
/// `queued -> running -> {completed | failed}`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobStatus {
    Queued,
    Running,
    Completed,
    Failed,
}

/// The kinds of error a job can terminate with, per the error handling design.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ErrorKind {
    InvalidInput,
    SourceUnavailable,
    SourceTooLong,
    ModelError,
    NoAudioContent,
    Timeout,
    Internal,
}

/// A terminal job error: which kind, at which stage, with what message.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobError {
    pub kind: ErrorKind,
    pub stage: String,
    pub message: String,
}

/// Per-instrument final output pointers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Artifact {
    pub midi_path: String,
    pub confidence_path: String,
}

/// Detected global musical metadata, extracted once all stems finish.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Metadata {
    pub tempo_bpm: Option<f32>,
    pub key: Option<String>,
    pub time_signature: Option<String>,
}

/// A single transcribed note.
///
/// `confidence == 0.0` means "no confidence signal available", not
/// "certain to be wrong" — callers must not treat it as a negative
/// vote.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Note {
    pub pitch: u8,
    pub onset: f64,
    pub offset: f64,
    pub velocity: u8,
    pub confidence: f32,
}

/// Minimum note duration: a 128th note at the reference tempo used
/// throughout the pipeline for duration-floor checks (120 BPM, so a
/// quarter note is 0.5 s and a 128th note is 1/32 of that).
pub const MIN_NOTE_DURATION_SECS: f64 = 0.5 / 32.0;

impl Note {
    /// Onset-bucket key used for (pitch, onset) grouping. Two notes are
    /// candidates for the same group iff `same pitch and
    /// |onset difference| <= tolerance`; this computes a coarse bucket
    /// index from the tolerance for use as a hash key, then callers
    /// refine within-neighboring-bucket membership by exact distance.
    pub fn onset_bucket(&self, tolerance_secs: f64) -> i64 {
        if tolerance_secs <= 0.0 {
            return (self.onset * 1_000_000.0).round() as i64;
        }
        (self.onset / tolerance_secs).floor() as i64
    }
}

/// One row of a confidence sidecar, parallel to a MIDI file's note-on
/// events in (onset, pitch) sort order.
#[derive(Debug, Clone, Copy, Serialize, Deserialize)]
pub struct ConfidenceEntry {
    pub pitch: u8,
    pub onset: f64,
    pub confidence: f32,
}

/// A raw, un-aggregated candidate note as produced by one model, before
/// ensemble voting or TTA aggregation. Carries the provenance weight
/// needed to compute a vote-group score.
#[derive(Debug, Clone, Copy)]
pub struct WeightedNote {
    pub note: Note,
    pub weight: f32,
}

/// Sort key used everywhere sidecar/MIDI parallelism is required:
/// onset first, then pitch.
pub fn sort_key(n: &Note) -> (i64, u8) {
    ((n.onset * 1_000_000.0).round() as i64, n.pitch)
}

/// An intermediate per-instrument audio slice produced by the
/// separator. Owned by the job and deleted on job termination.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Stem {
    pub instrument_tag: Instrument,
    pub audio_path: String,
    pub sample_rate: u32,
    pub duration_seconds: f64,
    /// Share of the mix's total energy carried by this stem, in [0,1].
    pub energy_fraction: f32,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn note(onset: f64, pitch: u8) -> Note {
        Note { pitch, onset, offset: onset + 0.1, velocity: 90, confidence: 1.0 }
    }

    #[test]
    fn onset_bucket_groups_notes_within_tolerance_into_the_same_bucket() {
        let tolerance = 0.05;
        let a = note(1.00, 60);
        let b = note(1.02, 60);
        assert_eq!(a.onset_bucket(tolerance), b.onset_bucket(tolerance));
    }

    #[test]
    fn onset_bucket_separates_notes_far_enough_apart() {
        let tolerance = 0.05;
        let a = note(1.00, 60);
        let b = note(1.20, 60);
        assert_ne!(a.onset_bucket(tolerance), b.onset_bucket(tolerance));
    }

    #[test]
    fn onset_bucket_falls_back_to_microsecond_precision_when_tolerance_is_zero() {
        let a = note(1.0, 60);
        let b = note(1.0 + 1e-7, 60);
        assert_eq!(a.onset_bucket(0.0), b.onset_bucket(0.0));
    }

    #[test]
    fn sort_key_orders_by_onset_then_pitch() {
        let earlier_high = note(1.0, 72);
        let later_low = note(2.0, 40);
        let same_onset_low = note(1.0, 40);
        let mut notes = vec![earlier_high, later_low, same_onset_low];
        notes.sort_by_key(sort_key);
        assert_eq!(notes[0].pitch, 40);
        assert_eq!(notes[0].onset, 1.0);
        assert_eq!(notes[1].pitch, 72);
        assert_eq!(notes[2].pitch, 40);
        assert_eq!(notes[2].onset, 2.0);
    }

    #[test]
    fn instrument_parse_tag_is_case_insensitive_and_rejects_unknown_tags() {
        assert_eq!(Instrument::parse_tag("PIANO"), Some(Instrument::Piano));
        assert_eq!(Instrument::parse_tag("Vocals"), Some(Instrument::Vocals));
        assert_eq!(Instrument::parse_tag("kazoo"), None);
    }

    #[test]
    fn only_piano_routes_through_the_ensemble() {
        assert_eq!(Instrument::Piano.transcriber_route(), TranscriberRoute::Ensemble);
        for other in [Instrument::Vocals, Instrument::Drums, Instrument::Bass, Instrument::Guitar, Instrument::Other] {
            assert_eq!(other.transcriber_route(), TranscriberRoute::GeneralistOnly);
        }
    }

    #[test]
    fn job_options_defaults_vocal_substitute_program_to_zero_when_absent() {
        let json = r#"{"instruments": ["vocals"]}"#;
        let options: JobOptions = serde_json::from_str(json).unwrap();
        assert_eq!(options.vocal_substitute_program, 0);
        assert!(!options.enable_tta);
        assert!(!options.enable_refiner);
    }
}
