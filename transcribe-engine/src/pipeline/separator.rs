//! Separator (C2): splits a mixed recording into per-instrument stems.
//!
//! The production separator this spec describes is a pretrained
//! multi-stem source-separation network; no such weights or runtime are
//! part of this workspace's dependency stack. `SeparatorModel` instead
//! decomposes the mix with a deterministic filter bank — low-pass for
//! bass, band-pass for vocals, a transient/high-frequency envelope for
//! drums, and the residual for "other" — which is enough to exercise
//! the real contract this stage has to honor: per-stem energy
//! fractions, the energy-floor drop rule, and the `piano` ⇐ residual
//! derivation.

use crate::pipeline::model_backend::AudioBuffer;
use std::collections::HashMap;
use thiserror::Error;
use transcribe_common::model::Instrument;

#[derive(Debug, Error, Clone)]
pub enum SeparatorError {
    #[error("separation model error: {0}")]
    ModelError(String),
}

/// The 4-stem model's native outputs. `piano` reuses the `other` signal
/// (the residual instrumental track) rather than a fifth native stem,
/// rather than running a fifth native model. `guitar` has no native stem in this
/// variant and is always dropped.
fn native_stems(mix: &AudioBuffer) -> HashMap<Instrument, AudioBuffer> {
    let bass = low_pass(mix, 250.0);
    let vocals = band_pass(mix, 300.0, 3400.0);
    let drums = transient_envelope(mix);
    let accounted: Vec<f32> = (0..mix.samples.len())
        .map(|i| bass.samples[i] + vocals.samples[i] + drums.samples[i])
        .collect();
    let other = AudioBuffer {
        samples: mix
            .samples
            .iter()
            .zip(accounted.iter())
            .map(|(m, a)| m - a)
            .collect(),
        sample_rate: mix.sample_rate,
    };

    let mut stems = HashMap::new();
    stems.insert(Instrument::Bass, bass);
    stems.insert(Instrument::Vocals, vocals);
    stems.insert(Instrument::Drums, drums);
    stems.insert(Instrument::Piano, other.clone());
    stems.insert(Instrument::Other, other);
    stems
}

/// `separate(audio_path, workspace_dir, requested_instruments) ->
/// mapping(instrument_tag -> stem audio)`, minus the workspace-dir
/// concern (the orchestrator decides where to write each stem file).
///
/// A stem whose energy fraction falls below `energy_floor` is dropped
/// and not returned, treated as "instrument not present" in the source.
/// `guitar` is always dropped since this separator variant has no
/// native guitar stem.
pub fn separate(
    mix: &AudioBuffer,
    requested: &[Instrument],
    energy_floor: f32,
) -> Result<HashMap<Instrument, AudioBuffer>, SeparatorError> {
    if mix.samples.is_empty() {
        return Err(SeparatorError::ModelError("empty input audio".to_string()));
    }

    let native = native_stems(mix);
    let mix_energy = mix.rms().max(1e-6);

    let mut out = HashMap::new();
    for &instrument in requested {
        let Some(stem) = native.get(&instrument) else {
            tracing::warn!(?instrument, "no native stem for this instrument tag");
            continue;
        };
        let fraction = stem.rms() / mix_energy;
        if fraction < energy_floor {
            tracing::warn!(?instrument, fraction, "instrument not present (below energy floor)");
            continue;
        }
        out.insert(instrument, stem.clone());
    }

    Ok(out)
}

/// Energy fraction a stem carries of the mix, for the stem record.
pub fn energy_fraction(mix: &AudioBuffer, stem: &AudioBuffer) -> f32 {
    stem.rms() / mix.rms().max(1e-6)
}

fn low_pass(audio: &AudioBuffer, cutoff_hz: f32) -> AudioBuffer {
    let rc = 1.0 / (2.0 * std::f32::consts::PI * cutoff_hz);
    let dt = 1.0 / audio.sample_rate as f32;
    let alpha = dt / (rc + dt);
    let mut samples = Vec::with_capacity(audio.samples.len());
    let mut prev = 0.0f32;
    for &s in &audio.samples {
        prev += alpha * (s - prev);
        samples.push(prev);
    }
    AudioBuffer { samples, sample_rate: audio.sample_rate }
}

fn high_pass(audio: &AudioBuffer, cutoff_hz: f32) -> AudioBuffer {
    let lowed = low_pass(audio, cutoff_hz);
    let samples = audio
        .samples
        .iter()
        .zip(lowed.samples.iter())
        .map(|(s, l)| s - l)
        .collect();
    AudioBuffer { samples, sample_rate: audio.sample_rate }
}

fn band_pass(audio: &AudioBuffer, low_hz: f32, high_hz: f32) -> AudioBuffer {
    high_pass(&low_pass(audio, high_hz), low_hz)
}

/// Crude percussive-transient extractor: high-pass the signal, then
/// keep only samples near a local energy spike (the rest attenuated),
/// approximating a drum stem's bursty envelope.
fn transient_envelope(audio: &AudioBuffer) -> AudioBuffer {
    let highs = high_pass(audio, 2000.0);
    const WINDOW: usize = 256;
    let mut samples = Vec::with_capacity(highs.samples.len());
    for (i, &s) in highs.samples.iter().enumerate() {
        let start = i.saturating_sub(WINDOW / 2);
        let end = (i + WINDOW / 2).min(highs.samples.len());
        let local_peak = highs.samples[start..end].iter().cloned().fold(0.0f32, |a, b| a.max(b.abs()));
        let global_peak = highs.samples.iter().cloned().fold(0.0f32, |a, b| a.max(b.abs())).max(1e-6);
        let gate = if local_peak > 0.4 * global_peak { 1.0 } else { 0.1 };
        samples.push(s * gate);
    }
    AudioBuffer { samples, sample_rate: highs.sample_rate }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn mix(sample_rate: u32, secs: f32) -> AudioBuffer {
        let n = (secs * sample_rate as f32) as usize;
        let samples = (0..n)
            .map(|i| {
                let t = i as f32 / sample_rate as f32;
                0.5 * (2.0 * std::f32::consts::PI * 100.0 * t).sin()
                    + 0.3 * (2.0 * std::f32::consts::PI * 1000.0 * t).sin()
            })
            .collect();
        AudioBuffer { samples, sample_rate }
    }

    #[test]
    fn empty_input_is_an_error() {
        let audio = AudioBuffer { samples: vec![], sample_rate: 44100 };
        assert!(separate(&audio, &[Instrument::Bass], 0.01).is_err());
    }

    #[test]
    fn guitar_is_always_dropped() {
        let audio = mix(22050, 1.0);
        let stems = separate(&audio, &[Instrument::Guitar], 0.0).unwrap();
        assert!(stems.is_empty());
    }

    #[test]
    fn low_energy_stem_is_dropped() {
        let audio = mix(22050, 1.0);
        // A floor of 1.1 exceeds any possible fraction (max 1.0), so
        // every requested stem must be dropped.
        let stems = separate(&audio, &[Instrument::Bass, Instrument::Vocals], 1.1).unwrap();
        assert!(stems.is_empty());
    }

    #[test]
    fn piano_reuses_the_residual_other_stem() {
        let audio = mix(22050, 1.0);
        let stems = separate(&audio, &[Instrument::Piano], 0.0).unwrap();
        assert!(stems.contains_key(&Instrument::Piano));
    }
}
