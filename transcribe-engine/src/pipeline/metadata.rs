//! Global metadata detection: tempo, key, and time
//! signature inferred from the concatenated note set of every stem.
//!
//! No beat-tracking/key-finding crate exists anywhere in the corpus
//! this workspace draws from, so all three are computed in-crate from
//! first principles: tempo from the inter-onset-interval histogram,
//! key via Krumhansl-Schmuckler pitch-class profile correlation, and
//! time signature from how evenly onsets land on the detected beat
//! grid.

use transcribe_common::model::{Metadata, Note};

const KRUMHANSL_MAJOR: [f32; 12] = [
    6.35, 2.23, 3.48, 2.33, 4.38, 4.09, 2.52, 5.19, 2.39, 3.66, 2.29, 2.88,
];
const KRUMHANSL_MINOR: [f32; 12] = [
    6.33, 2.68, 3.52, 5.38, 2.60, 3.53, 2.54, 4.75, 3.98, 2.69, 3.34, 3.17,
];
const PITCH_CLASS_NAMES: [&str; 12] = [
    "C", "C#", "D", "D#", "E", "F", "F#", "G", "G#", "A", "A#", "B",
];

/// Detects tempo (BPM), key, and time signature from `notes`. Returns
/// an all-`None` metadata if there are fewer than two notes to measure
/// an interval from.
pub fn detect(notes: &[Note]) -> Metadata {
    if notes.len() < 2 {
        return Metadata::default();
    }
    let mut sorted: Vec<&Note> = notes.iter().collect();
    sorted.sort_by(|a, b| a.onset.partial_cmp(&b.onset).unwrap());

    let tempo_bpm = detect_tempo(&sorted);
    let key = Some(detect_key(&sorted));
    let time_signature = tempo_bpm.map(|bpm| detect_time_signature(&sorted, bpm));

    Metadata { tempo_bpm, key, time_signature }
}

/// Estimates tempo from the inter-onset-interval (IOI) histogram: bin
/// all consecutive onset gaps, take the modal bin, and treat it as one
/// beat. Octave-errors (double/half tempo) are not corrected here —
/// acceptable given this is a heuristic estimate, not a contractual
/// beat tracker.
fn detect_tempo(sorted: &[&Note]) -> Option<f32> {
    let iois: Vec<f64> = sorted
        .windows(2)
        .map(|w| w[1].onset - w[0].onset)
        .filter(|d| *d > 0.05 && *d < 2.0)
        .collect();
    if iois.is_empty() {
        return None;
    }

    const BIN_WIDTH_SECS: f64 = 0.02;
    let mut bins: std::collections::HashMap<i64, usize> = std::collections::HashMap::new();
    for ioi in &iois {
        *bins.entry((ioi / BIN_WIDTH_SECS).round() as i64).or_insert(0) += 1;
    }
    let modal_bin = bins.iter().max_by_key(|(_, count)| **count)?.0;
    let beat_secs = (*modal_bin as f64) * BIN_WIDTH_SECS;
    if beat_secs <= 0.0 {
        return None;
    }
    Some((60.0 / beat_secs) as f32)
}

/// Krumhansl-Schmuckler key-finding: build a duration-weighted
/// pitch-class histogram, correlate it against all 24 major/minor
/// profile rotations, and return the best-correlating key name.
fn detect_key(sorted: &[&Note]) -> String {
    let mut histogram = [0.0f32; 12];
    for note in sorted {
        let pitch_class = (note.pitch % 12) as usize;
        let duration = (note.offset - note.onset).max(0.0) as f32;
        histogram[pitch_class] += duration * note.confidence.max(0.01);
    }

    let mut best_score = f32::NEG_INFINITY;
    let mut best_name = "C major".to_string();
    for tonic in 0..12 {
        for (profile, mode) in [(&KRUMHANSL_MAJOR, "major"), (&KRUMHANSL_MINOR, "minor")] {
            let score = correlate_rotated(&histogram, profile, tonic);
            if score > best_score {
                best_score = score;
                best_name = format!("{} {}", PITCH_CLASS_NAMES[tonic], mode);
            }
        }
    }
    best_name
}

fn correlate_rotated(histogram: &[f32; 12], profile: &[f32; 12], tonic: usize) -> f32 {
    let rotated: Vec<f32> = (0..12).map(|i| profile[(i + 12 - tonic) % 12]).collect();
    pearson_correlation(histogram, &rotated)
}

fn pearson_correlation(a: &[f32], b: &[f32]) -> f32 {
    let n = a.len() as f32;
    let mean_a = a.iter().sum::<f32>() / n;
    let mean_b = b.iter().sum::<f32>() / n;
    let mut cov = 0.0f32;
    let mut var_a = 0.0f32;
    let mut var_b = 0.0f32;
    for (x, y) in a.iter().zip(b.iter()) {
        cov += (x - mean_a) * (y - mean_b);
        var_a += (x - mean_a).powi(2);
        var_b += (y - mean_b).powi(2);
    }
    if var_a <= 0.0 || var_b <= 0.0 {
        return 0.0;
    }
    cov / (var_a.sqrt() * var_b.sqrt())
}

/// Counts how many onsets land (within a small tolerance) on an
/// integer multiple of the beat within each bar-length window, for
/// `num_beats` in {2,3,4}, and picks the best-fitting meter.
fn detect_time_signature(sorted: &[&Note], tempo_bpm: f32) -> String {
    let beat_secs = 60.0 / tempo_bpm.max(1.0) as f64;
    let onsets: Vec<f64> = sorted.iter().map(|n| n.onset).collect();
    let origin = onsets[0];

    let mut best_fit = 0.0f64;
    let mut best_label = "4/4".to_string();
    for (beats_per_bar, label) in [(2, "2/4"), (3, "3/4"), (4, "4/4")] {
        let bar_secs = beat_secs * beats_per_bar as f64;
        let fit: f64 = onsets
            .iter()
            .map(|&onset| {
                let phase = ((onset - origin) % bar_secs + bar_secs) % bar_secs;
                let distance_to_downbeat = phase.min(bar_secs - phase);
                1.0 - (distance_to_downbeat / (bar_secs / 2.0))
            })
            .sum();
        if fit > best_fit {
            best_fit = fit;
            best_label = label.to_string();
        }
    }
    best_label
}

#[cfg(test)]
mod tests {
    use super::*;

    fn note_at(onset: f64) -> Note {
        Note { pitch: 60, onset, offset: onset + 0.4, velocity: 80, confidence: 0.9 }
    }

    #[test]
    fn fewer_than_two_notes_yields_no_metadata() {
        let metadata = detect(&[note_at(0.0)]);
        assert!(metadata.tempo_bpm.is_none());
        assert!(metadata.key.is_none());
    }

    #[test]
    fn regular_half_second_onsets_detect_120_bpm() {
        let notes: Vec<Note> = (0..8).map(|i| note_at(i as f64 * 0.5)).collect();
        let metadata = detect(&notes);
        let bpm = metadata.tempo_bpm.expect("tempo detected");
        assert!((bpm - 120.0).abs() < 1.0);
    }

    #[test]
    fn all_c_notes_detect_a_c_key() {
        let notes: Vec<Note> = (0..8).map(|i| note_at(i as f64 * 0.5)).collect();
        let metadata = detect(&notes);
        assert!(metadata.key.unwrap().starts_with('C'));
    }
}
