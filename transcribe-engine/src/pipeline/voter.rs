//! Ensemble voter (C4): fuses transcriber A's and B's note sets for a
//! stem into one merged note list plus a confidence sidecar.
//!
//! Grounded on the confidence-sum (not vote-count) gate the design
//! notes insist on: a naive "≥ N variants agree" policy underperforms
//! because augmentation/ensemble errors are correlated, so every group
//! is scored by `Σ(model_weight × note_confidence)` and either emitted
//! whole or dropped, never partially kept by majority.

use transcribe_common::model::{Instrument, Note, WeightedNote};

/// Per-model weight used when only the generalist ran (no piano
/// specialist), vs. the piano ensemble's documented production
/// weights.
pub struct VoterWeights {
    pub generalist: f32,
    pub specialist: f32,
}

impl VoterWeights {
    /// Resolves the weight pair for `instrument`: the full ensemble
    /// weights for piano (where B also ran), uniform weight 1.0 for
    /// everything else (generalist-only route).
    pub fn for_instrument(instrument: Instrument, generalist: f32, specialist: f32) -> Self {
        match instrument {
            Instrument::Piano => Self { generalist, specialist },
            _ => Self { generalist: 1.0, specialist },
        }
    }
}

/// Runs the C4 algorithm over the raw candidate notes.
///
/// `notes_a`/`notes_b` are each model's output (`notes_b` is empty for
/// a generalist-only route, which collapses this to "emit A's notes
/// with a uniform-confidence threshold filter."
pub fn vote(
    notes_a: &[Note],
    notes_b: &[Note],
    weights: &VoterWeights,
    threshold: f32,
    tolerance_secs: f64,
) -> Vec<Note> {
    let mut candidates: Vec<WeightedNote> = Vec::with_capacity(notes_a.len() + notes_b.len());
    candidates.extend(notes_a.iter().map(|n| WeightedNote { note: *n, weight: weights.generalist }));
    candidates.extend(notes_b.iter().map(|n| WeightedNote { note: *n, weight: weights.specialist }));

    let groups = group_by_pitch_and_onset(candidates, tolerance_secs);

    let mut scored: Vec<(f32, Note)> = groups
        .into_iter()
        .filter_map(|group| score_group(&group, threshold))
        .collect();

    // Tie-break overlapping same-pitch groups: highest score wins.
    scored.sort_by(|a, b| b.0.partial_cmp(&a.0).unwrap());
    let mut kept: Vec<Note> = Vec::with_capacity(scored.len());
    for (_, note) in scored {
        let overlaps_kept = kept.iter().any(|k: &Note| {
            k.pitch == note.pitch && k.onset < note.offset && note.onset < k.offset
        });
        if !overlaps_kept {
            kept.push(note);
        }
    }

    kept.sort_by(|a, b| a.onset.partial_cmp(&b.onset).unwrap().then(a.pitch.cmp(&b.pitch)));
    kept
}

/// `(pitch, onset-bucket)` grouping, refined by exact onset distance
/// within neighboring buckets so a note sitting just across a bucket
/// boundary from another of the same pitch still merges with it.
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

/// Scores one vote group and, if it clears `threshold`, emits the
/// score-weighted-average merged note.
fn score_group(group: &[WeightedNote], threshold: f32) -> Option<(f32, Note)> {
    let score: f32 = group.iter().map(|w| w.weight * w.note.confidence).sum();
    if score < threshold {
        return None;
    }

    let total_weight: f32 = group.iter().map(|w| w.weight * w.note.confidence).sum::<f32>().max(1e-6);
    let mut onset = 0.0f64;
    let mut offset = 0.0f64;
    let mut velocity = 0.0f32;
    for w in group {
        let contribution = (w.weight * w.note.confidence / total_weight) as f64;
        onset += contribution * w.note.onset;
        offset += contribution * w.note.offset;
        velocity += (w.weight * w.note.confidence / total_weight) * w.note.velocity as f32;
    }

    let note = Note {
        pitch: group[0].note.pitch,
        onset,
        offset: offset.max(onset),
        velocity: velocity.round().clamp(1.0, 127.0) as u8,
        confidence: score.clamp(0.0, 1.0),
    };
    Some((score, note))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn note(pitch: u8, onset: f64, confidence: f32) -> Note {
        Note { pitch, onset, offset: onset + 0.2, velocity: 80, confidence }
    }

    #[test]
    fn group_below_threshold_is_dropped() {
        let weights = VoterWeights { generalist: 0.4, specialist: 0.6 };
        let notes_a = vec![note(60, 1.0, 0.1)];
        let merged = vote(&notes_a, &[], &weights, 0.25, 0.05);
        assert!(merged.is_empty());
    }

    #[test]
    fn agreeing_notes_combine_above_threshold() {
        let weights = VoterWeights { generalist: 0.4, specialist: 0.6 };
        let notes_a = vec![note(60, 1.0, 0.9)];
        let notes_b = vec![note(60, 1.02, 0.9)];
        let merged = vote(&notes_a, &notes_b, &weights, 0.25, 0.05);
        assert_eq!(merged.len(), 1);
        assert!(merged[0].confidence > 0.25);
    }

    #[test]
    fn generalist_only_route_uses_uniform_weight() {
        let weights = VoterWeights::for_instrument(Instrument::Drums, 0.4, 0.6);
        let notes_a = vec![note(40, 0.5, 0.5)];
        let merged = vote(&notes_a, &[], &weights, 0.25, 0.05);
        assert_eq!(merged.len(), 1);
        assert_eq!(merged[0].confidence, 0.5);
    }

    #[test]
    fn overlapping_same_pitch_groups_keep_only_the_higher_score() {
        let weights = VoterWeights { generalist: 1.0, specialist: 1.0 };
        let notes_a = vec![
            Note { pitch: 60, onset: 1.0, offset: 2.0, velocity: 80, confidence: 0.9 },
            Note { pitch: 60, onset: 1.5, offset: 2.5, velocity: 80, confidence: 0.3 },
        ];
        let merged = vote(&notes_a, &[], &weights, 0.1, 0.0);
        assert_eq!(merged.len(), 1);
        assert!((merged[0].onset - 1.0).abs() < 1e-9);
    }
}
