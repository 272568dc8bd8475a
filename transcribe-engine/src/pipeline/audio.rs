//! Audio decoding and resampling.
//!
//! Decodes arbitrary container/codec combinations to mono f32 PCM via
//! `symphonia`, then resamples to a model's native rate with `rubato`.
//! Samples stay in normalized f32 throughout, since that's the shape
//! [`AudioBuffer`] and every downstream model expect.

use crate::pipeline::model_backend::AudioBuffer;
use std::fs::File;
use std::path::Path;
use symphonia::core::audio::{AudioBufferRef, Signal};
use symphonia::core::codecs::DecoderOptions;
use symphonia::core::conv::FromSample;
use symphonia::core::formats::FormatOptions;
use symphonia::core::io::MediaSourceStream;
use symphonia::core::meta::MetadataOptions;
use symphonia::core::probe::Hint;

/// Decodes `path` to mono f32 PCM at its native sample rate.
pub fn decode_to_buffer(path: &Path) -> anyhow::Result<AudioBuffer> {
    let file = File::open(path)?;
    let mss = MediaSourceStream::new(Box::new(file), Default::default());

    let mut hint = Hint::new();
    if let Some(ext) = path.extension().and_then(|e| e.to_str()) {
        hint.with_extension(ext);
    }

    let probed = symphonia::default::get_probe().format(
        &hint,
        mss,
        &FormatOptions::default(),
        &MetadataOptions::default(),
    )?;
    let mut format_reader = probed.format;

    let track = format_reader
        .default_track()
        .ok_or_else(|| anyhow::anyhow!("no audio track found in {}", path.display()))?;
    let sample_rate = track
        .codec_params
        .sample_rate
        .ok_or_else(|| anyhow::anyhow!("no sample rate in track"))?;
    let track_id = track.id;

    let mut decoder = symphonia::default::get_codecs().make(&track.codec_params, &DecoderOptions::default())?;

    let mut samples = Vec::new();
    while let Ok(packet) = format_reader.next_packet() {
        if packet.track_id() != track_id {
            continue;
        }
        match decoder.decode(&packet) {
            Ok(decoded) => samples.extend(mix_to_mono_f32(&decoded)),
            Err(e) => {
                tracing::warn!("decode error (continuing): {}", e);
            }
        }
    }

    Ok(AudioBuffer { samples, sample_rate })
}

fn mix_to_mono_f32(buffer: &AudioBufferRef) -> Vec<f32> {
    let channels = buffer.spec().channels.count().max(1);
    let frames = buffer.frames();
    let mut mono = Vec::with_capacity(frames);

    for frame_idx in 0..frames {
        let mut sum = 0.0f32;
        for ch in 0..channels {
            let sample = match buffer {
                AudioBufferRef::U8(buf) => f32::from_sample(buf.chan(ch)[frame_idx]),
                AudioBufferRef::U16(buf) => f32::from_sample(buf.chan(ch)[frame_idx]),
                AudioBufferRef::U24(buf) => f32::from_sample(buf.chan(ch)[frame_idx]),
                AudioBufferRef::U32(buf) => f32::from_sample(buf.chan(ch)[frame_idx]),
                AudioBufferRef::S8(buf) => f32::from_sample(buf.chan(ch)[frame_idx]),
                AudioBufferRef::S16(buf) => f32::from_sample(buf.chan(ch)[frame_idx]),
                AudioBufferRef::S24(buf) => f32::from_sample(buf.chan(ch)[frame_idx]),
                AudioBufferRef::S32(buf) => f32::from_sample(buf.chan(ch)[frame_idx]),
                AudioBufferRef::F32(buf) => buf.chan(ch)[frame_idx],
                AudioBufferRef::F64(buf) => f32::from_sample(buf.chan(ch)[frame_idx]),
            };
            sum += sample;
        }
        mono.push(sum / channels as f32);
    }
    mono
}

/// Resamples `audio` to `target_rate` using a high-quality sinc
/// resampler. A no-op when already at the target rate.
pub fn resample_to_rate(audio: &AudioBuffer, target_rate: u32) -> anyhow::Result<AudioBuffer> {
    if audio.sample_rate == target_rate || audio.samples.is_empty() {
        return Ok(audio.clone());
    }

    use rubato::{Resampler, SincFixedIn, SincInterpolationParameters, SincInterpolationType, WindowFunction};

    let params = SincInterpolationParameters {
        sinc_len: 256,
        f_cutoff: 0.95,
        interpolation: SincInterpolationType::Linear,
        oversampling_factor: 256,
        window: WindowFunction::BlackmanHarris2,
    };

    let ratio = target_rate as f64 / audio.sample_rate as f64;
    let mut resampler = SincFixedIn::<f32>::new(ratio, 2.0, params, audio.samples.len(), 1)?;

    let waves_in = vec![audio.samples.clone()];
    let waves_out = resampler.process(&waves_in, None)?;

    Ok(AudioBuffer {
        samples: waves_out[0].clone(),
        sample_rate: target_rate,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resample_to_same_rate_is_noop() {
        let audio = AudioBuffer { samples: vec![0.1, 0.2, 0.3], sample_rate: 44100 };
        let out = resample_to_rate(&audio, 44100).unwrap();
        assert_eq!(out.samples, audio.samples);
    }
}
