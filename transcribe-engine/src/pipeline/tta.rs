//! Test-Time Augmentation aggregator (C5): runs the full C3+C4 pipeline
//! over several augmented copies of a stem's audio, reverses each
//! variant's augmentation in prediction space, and merges the un-warped
//! candidates by confidence sum — never by vote count.
//!
//! The design notes are explicit about why: correlated augmentation
//! errors mean a naive "≥ N variants agree" filter discards most true
//! notes, since most only survive un-warping in a single variant. The
//! aggregator here differs from C4 only in its wider onset tolerance
//! (augmentation injects timing jitter) and its optional `min_votes`
//! safety rail, which is a secondary filter layered on top of the
//! confidence-sum gate, never the gate itself, and is off by default.

use crate::pipeline::augment::Variant;
use crate::pipeline::model_backend::AudioBuffer;
use crate::pipeline::transcriber::{self, ModelTag};
use crate::pipeline::voter::{self, VoterWeights};
use crate::{error::StageError, workspace::JobWorkspace};
use transcribe_common::model::{Instrument, Note, WeightedNote};

pub struct TtaConfig {
    pub variants: Vec<Variant>,
    pub min_total_confidence: f32,
    pub tolerance_secs: f64,
    /// Safety-rail vote-count floor. `None` disables it, per the
    /// documented default-off behavior.
    pub min_votes: Option<usize>,
    pub voter_weight_generalist: f32,
    pub voter_weight_specialist: f32,
}

/// Runs the TTA algorithm for one stem and returns the merged notes in
/// the original (unaugmented) audio's frame.
///
/// `variant_workspace` lets each variant write its C3/C4 intermediates
/// to a distinct subdirectory so concurrent variants never collide.
pub fn tta_transcribe(
    workspace: &JobWorkspace,
    instrument: Instrument,
    original_audio: &AudioBuffer,
    config: &TtaConfig,
) -> Result<Vec<Note>, StageError> {
    let mut candidates: Vec<WeightedNote> = Vec::new();

    for variant in &config.variants {
        let augmented = variant.apply(original_audio);
        let variant_notes = run_variant_ensemble(workspace, instrument, variant, &augmented, config)?;
        for note in variant_notes {
            let reversed = variant.reverse_note(note);
            candidates.push(WeightedNote { note: reversed, weight: variant.weight() });
        }
    }

    Ok(aggregate(candidates, config))
}

/// Runs C3 (both transcribers, routed per instrument) then C4 over one
/// variant's augmented audio, returning that variant's merged notes
/// still in the augmented audio's frame (reversal happens in the caller).
fn run_variant_ensemble(
    workspace: &JobWorkspace,
    instrument: Instrument,
    variant: &Variant,
    audio: &AudioBuffer,
    config: &TtaConfig,
) -> Result<Vec<Note>, StageError> {
    let outputs = transcriber::run_route(workspace, instrument, audio)?;
    let notes_a = outputs
        .iter()
        .find(|o| o.model == ModelTag::A)
        .map(|o| o.notes.clone())
        .unwrap_or_default();
    let notes_b = outputs
        .iter()
        .find(|o| o.model == ModelTag::B)
        .map(|o| o.notes.clone())
        .unwrap_or_default();

    tracing::info!(?instrument, variant = %variant.label(), "tta variant transcribed");

    let weights = VoterWeights::for_instrument(
        instrument,
        config.voter_weight_generalist,
        config.voter_weight_specialist,
    );
    // C4's own threshold is deliberately permissive here (0.0): the
    // real confidence gate for TTA is the cross-variant sum in
    // `aggregate`, not this per-variant pre-filter.
    Ok(voter::vote(&notes_a, &notes_b, &weights, 0.0, config.tolerance_secs))
}

/// Groups reversed candidates by `(pitch, onset-bucket)` in the
/// original frame and applies the confidence-sum gate.
fn aggregate(candidates: Vec<WeightedNote>, config: &TtaConfig) -> Vec<Note> {
    let groups = group_by_pitch_and_onset(candidates, config.tolerance_secs);

    let mut merged = Vec::with_capacity(groups.len());
    for group in groups {
        if let Some(min_votes) = config.min_votes {
            if group.len() < min_votes {
                continue;
            }
        }

        let total_confidence: f32 = group.iter().map(|w| w.weight * w.note.confidence).sum();
        if total_confidence < config.min_total_confidence {
            continue;
        }

        let norm = total_confidence.max(1e-6);
        let mut onset = 0.0f64;
        let mut offset = 0.0f64;
        let mut velocity = 0.0f32;
        for w in &group {
            let share = (w.weight * w.note.confidence / norm) as f64;
            onset += share * w.note.onset;
            offset += share * w.note.offset;
            velocity += (w.weight * w.note.confidence / norm) * w.note.velocity as f32;
        }

        merged.push(Note {
            pitch: group[0].note.pitch,
            onset,
            offset: offset.max(onset),
            velocity: velocity.round().clamp(1.0, 127.0) as u8,
            confidence: total_confidence.clamp(0.0, 1.0),
        });
    }

    merged.sort_by(|a, b| a.onset.partial_cmp(&b.onset).unwrap().then(a.pitch.cmp(&b.pitch)));
    merged
}

fn group_by_pitch_and_onset(candidates: Vec<WeightedNote>, tolerance_secs: f64) -> Vec<Vec<WeightedNote>> {
    let mut groups: Vec<Vec<WeightedNote>> = Vec::new();
    for candidate in candidates {
        let home = groups.iter_mut().find(|g: &&mut Vec<WeightedNote>| {
            let rep = g[0];
            rep.note.pitch == candidate.note.pitch
                && (rep.note.onset - candidate.note.onset).abs() <= tolerance_secs
        });
        match home {
            Some(group) => group.push(candidate),
            None => groups.push(vec![candidate]),
        }
    }
    groups
}

#[cfg(test)]
mod tests {
    use super::*;

    fn note(pitch: u8, onset: f64, confidence: f32) -> Note {
        Note { pitch, onset, offset: onset + 0.2, velocity: 80, confidence }
    }

    #[test]
    fn identity_variant_alone_reproduces_confidence_sum_of_one_weight() {
        let candidates = vec![WeightedNote { note: note(60, 1.0, 0.3), weight: Variant::Identity.weight() }];
        let config = TtaConfig {
            variants: vec![Variant::Identity],
            min_total_confidence: 0.25,
            tolerance_secs: 0.1,
            min_votes: None,
            voter_weight_generalist: 0.4,
            voter_weight_specialist: 0.6,
        };
        let merged = aggregate(candidates, &config);
        assert_eq!(merged.len(), 1);
        assert!((merged[0].confidence - 0.3).abs() < 1e-6);
    }

    #[test]
    fn min_votes_safety_rail_drops_single_support_groups_when_enabled() {
        let candidates = vec![WeightedNote { note: note(60, 1.0, 0.9), weight: 1.0 }];
        let config = TtaConfig {
            variants: vec![Variant::Identity],
            min_total_confidence: 0.25,
            tolerance_secs: 0.1,
            min_votes: Some(2),
            voter_weight_generalist: 0.4,
            voter_weight_specialist: 0.6,
        };
        let merged = aggregate(candidates, &config);
        assert!(merged.is_empty());
    }

    #[test]
    fn min_votes_defaults_to_off() {
        let candidates = vec![WeightedNote { note: note(60, 1.0, 0.9), weight: 1.0 }];
        let config = TtaConfig {
            variants: vec![Variant::Identity],
            min_total_confidence: 0.25,
            tolerance_secs: 0.1,
            min_votes: None,
            voter_weight_generalist: 0.4,
            voter_weight_specialist: 0.6,
        };
        let merged = aggregate(candidates, &config);
        assert_eq!(merged.len(), 1);
    }

    #[test]
    fn below_threshold_group_is_dropped() {
        let candidates = vec![WeightedNote { note: note(60, 1.0, 0.1), weight: 0.5 }];
        let config = TtaConfig {
            variants: vec![Variant::TimeStretch(0.95)],
            min_total_confidence: 0.25,
            tolerance_secs: 0.1,
            min_votes: None,
            voter_weight_generalist: 0.4,
            voter_weight_specialist: 0.6,
        };
        let merged = aggregate(candidates, &config);
        assert!(merged.is_empty());
    }
}
