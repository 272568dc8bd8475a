//! Audio augmentations used by the TTA aggregator (C5): pitch shift and
//! time stretch, plus their prediction-space reversal.
//!
//! No phase-vocoder crate exists anywhere in the corpus this workspace
//! draws from, so both effects are implemented with a classic two-step
//! technique built from primitives that are easy to verify: resampling
//! (which moves pitch and duration together) composed with an
//! overlap-add time-scale modification (which moves duration alone).
//! Pitch shift = resample by `k` (pitch ×k, duration ÷k) then OLA
//! stretch by `k` (duration back to original, pitch unchanged) so the
//! net effect is a pure pitch shift. Time stretch is the OLA step used
//! alone.

use crate::pipeline::model_backend::AudioBuffer;
use transcribe_common::model::Note;

/// One TTA variant: an augmentation plus its prior weight used when
/// aggregating across variants.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Variant {
    Identity,
    PitchShiftSemitones(i32),
    TimeStretch(f64),
}

impl Variant {
    pub fn weight(&self) -> f32 {
        match self {
            Variant::Identity => 1.0,
            Variant::PitchShiftSemitones(_) => 0.7,
            Variant::TimeStretch(_) => 0.5,
        }
    }

    pub fn label(&self) -> String {
        match self {
            Variant::Identity => "original".to_string(),
            Variant::PitchShiftSemitones(n) => format!("pitch_shift {n:+}"),
            Variant::TimeStretch(f) => format!("time_stretch {f:.2}x"),
        }
    }

    /// The five default variants, in order of decreasing weight, with
    /// identity first.
    pub fn defaults() -> Vec<Variant> {
        vec![
            Variant::Identity,
            Variant::PitchShiftSemitones(1),
            Variant::PitchShiftSemitones(-1),
            Variant::TimeStretch(1.05),
            Variant::TimeStretch(0.95),
        ]
    }

    /// The first `count` default variants, always including `Identity`
    /// (the original audio). This is how `EngineConfig::tta_pass_count`
    /// trades runtime cost against coverage — each extra variant means
    /// another full transcriber pass — without changing the aggregation
    /// algorithm itself.
    pub fn defaults_capped(count: u32) -> Vec<Variant> {
        let all = Self::defaults();
        let take = (count as usize).clamp(1, all.len());
        all.into_iter().take(take).collect()
    }

    /// Applies the augmentation to `audio`, producing the variant the
    /// transcriber pair actually runs on.
    pub fn apply(&self, audio: &AudioBuffer) -> AudioBuffer {
        match self {
            Variant::Identity => audio.clone(),
            Variant::PitchShiftSemitones(semitones) => {
                let ratio = 2f64.powf(*semitones as f64 / 12.0);
                let resampled = resample_ratio(audio, ratio);
                time_stretch_ola(&resampled, ratio)
            }
            Variant::TimeStretch(factor) => time_stretch_ola(audio, *factor),
        }
    }

    /// Projects a note predicted on the augmented audio back onto the
    /// original audio's frame.
    pub fn reverse_note(&self, note: Note) -> Note {
        match self {
            Variant::Identity => note,
            Variant::PitchShiftSemitones(semitones) => Note {
                pitch: (note.pitch as i32 - semitones).clamp(0, 127) as u8,
                ..note
            },
            Variant::TimeStretch(factor) => Note {
                onset: note.onset / factor,
                offset: note.offset / factor,
                ..note
            },
        }
    }
}

/// Speed-change resampling: output has `round(len / ratio)` samples,
/// each one `ratio` input-samples further along than the last. Scales
/// pitch by `ratio` and duration by `1/ratio`.
fn resample_ratio(audio: &AudioBuffer, ratio: f64) -> AudioBuffer {
    if audio.samples.is_empty() || ratio <= 0.0 {
        return audio.clone();
    }
    let out_len = ((audio.samples.len() as f64) / ratio).round().max(1.0) as usize;
    let mut samples = Vec::with_capacity(out_len);
    for i in 0..out_len {
        let pos = i as f64 * ratio;
        samples.push(linear_sample(&audio.samples, pos));
    }
    AudioBuffer { samples, sample_rate: audio.sample_rate }
}

fn linear_sample(samples: &[f32], pos: f64) -> f32 {
    if samples.is_empty() {
        return 0.0;
    }
    let lo = pos.floor() as usize;
    let frac = (pos - pos.floor()) as f32;
    let a = samples.get(lo).copied().unwrap_or(0.0);
    let b = samples.get(lo + 1).copied().unwrap_or(a);
    a + frac * (b - a)
}

const FRAME_SIZE: usize = 2048;
const HOP_ANALYSIS: usize = FRAME_SIZE / 4;

fn hann_window(len: usize) -> Vec<f32> {
    (0..len)
        .map(|i| 0.5 - 0.5 * (2.0 * std::f32::consts::PI * i as f32 / (len.max(2) - 1) as f32).cos())
        .collect()
}

/// Overlap-add time-scale modification: output duration is
/// `input duration * factor`, spectral content (and so perceived
/// pitch) approximately unchanged.
fn time_stretch_ola(audio: &AudioBuffer, factor: f64) -> AudioBuffer {
    if audio.samples.is_empty() || factor <= 0.0 {
        return audio.clone();
    }
    let hop_synthesis = ((HOP_ANALYSIS as f64) * factor).round().max(1.0) as usize;
    let window = hann_window(FRAME_SIZE);
    let out_len = ((audio.samples.len() as f64) * factor).round().max(1.0) as usize + FRAME_SIZE;

    let mut out = vec![0.0f32; out_len];
    let mut norm = vec![0.0f32; out_len];

    let mut analysis_pos = 0usize;
    let mut synthesis_pos = 0usize;
    while analysis_pos < audio.samples.len() {
        for i in 0..FRAME_SIZE {
            let sample = audio.samples.get(analysis_pos + i).copied().unwrap_or(0.0);
            let idx = synthesis_pos + i;
            if idx < out.len() {
                out[idx] += sample * window[i];
                norm[idx] += window[i] * window[i];
            }
        }
        analysis_pos += HOP_ANALYSIS;
        synthesis_pos += hop_synthesis;
    }

    for (s, n) in out.iter_mut().zip(norm.iter()) {
        if *n > 1e-6 {
            *s /= n;
        }
    }

    let target_len = ((audio.samples.len() as f64) * factor).round().max(1.0) as usize;
    out.truncate(target_len.max(1));
    AudioBuffer { samples: out, sample_rate: audio.sample_rate }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tone(secs: f32, sample_rate: u32) -> AudioBuffer {
        let n = (secs * sample_rate as f32) as usize;
        let samples = (0..n)
            .map(|i| (2.0 * std::f32::consts::PI * 220.0 * i as f32 / sample_rate as f32).sin())
            .collect();
        AudioBuffer { samples, sample_rate }
    }

    #[test]
    fn time_stretch_changes_duration_by_factor() {
        let audio = tone(1.0, 8000);
        let stretched = Variant::TimeStretch(1.05).apply(&audio);
        let expected = (audio.samples.len() as f64 * 1.05).round() as usize;
        assert!((stretched.samples.len() as i64 - expected as i64).abs() <= 2);
    }

    #[test]
    fn pitch_shift_preserves_duration_approximately() {
        let audio = tone(1.0, 8000);
        let shifted = Variant::PitchShiftSemitones(1).apply(&audio);
        let diff = (shifted.samples.len() as i64 - audio.samples.len() as i64).abs();
        assert!(diff < (audio.samples.len() as i64) / 10);
    }

    #[test]
    fn reverse_pitch_shift_restores_pitch() {
        let note = Note { pitch: 61, onset: 1.0, offset: 1.5, velocity: 80, confidence: 0.8 };
        let reversed = Variant::PitchShiftSemitones(1).reverse_note(note);
        assert_eq!(reversed.pitch, 60);
    }

    #[test]
    fn reverse_time_stretch_restores_original_onset() {
        let note = Note { pitch: 60, onset: 0.950, offset: 1.2, velocity: 80, confidence: 0.8 };
        let reversed = Variant::TimeStretch(0.95).reverse_note(note);
        assert!((reversed.onset - 1.0).abs() < 1e-9);
    }

    #[test]
    fn defaults_capped_always_keeps_identity_first() {
        let capped = Variant::defaults_capped(1);
        assert_eq!(capped, vec![Variant::Identity]);
    }

    #[test]
    fn defaults_capped_clamps_to_the_full_default_set() {
        let capped = Variant::defaults_capped(100);
        assert_eq!(capped, Variant::defaults());
    }
}
