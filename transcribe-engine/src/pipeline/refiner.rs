//! Refiner (C6): passes the ensemble note roll through a sequence
//! model that smooths spurious single-frame spikes out of the roll.
//!
//! No bidirectional-recurrent/self-attention runtime ships with this
//! workspace, so [`RefinerModel`] is a deterministic synthetic stand-in
//! that applies a 3-frame majority smoothing per pitch column — enough
//! to exercise the chunking/concatenation/fallback contract around a
//! real model without bundling one.

use crate::pipeline::noteroll::{self, NoteRoll, PIANO_RANGE};
use thiserror::Error;
use transcribe_common::model::Note;

/// Chunk size in frames (~100 s at 100 Hz), matching the contract's
/// stated window.
pub const MAX_CHUNK_FRAMES: usize = 10_000;

#[derive(Debug, Error, Clone)]
pub enum RefinerError {
    #[error("refiner model failed on chunk starting at frame {0}: {1}")]
    ChunkFailed(usize, String),
}

pub trait RefinerModel: Send + Sync {
    /// Maps one chunk's roll to a same-shape probability roll.
    fn infer_chunk(&self, chunk: &NoteRoll) -> Result<NoteRoll, RefinerError>;
}

/// Synthetic smoothing backend: a frame is active in the output iff at
/// least 2 of its 3-frame neighborhood are active in the input, which
/// causes isolated single-frame spikes to fall below the threshold.
pub struct SmoothingRefinerModel;

impl RefinerModel for SmoothingRefinerModel {
    fn infer_chunk(&self, chunk: &NoteRoll) -> Result<NoteRoll, RefinerError> {
        let frame_count = chunk.frame_count();
        let mut out = NoteRoll::empty(frame_count);
        for column in 0..PIANO_RANGE {
            for frame in 0..frame_count {
                let lo = frame.saturating_sub(1);
                let hi = (frame + 1).min(frame_count - 1);
                let active_neighbors = (lo..=hi).filter(|&f| chunk.frames[f][column] >= 0.5).count();
                out.frames[frame][column] = if active_neighbors >= 2 { 1.0 } else { 0.0 };
            }
        }
        Ok(out)
    }
}

/// Runs the full C6 inference pipeline: rasterize, chunk, model pass,
/// concatenate, extract. Returns the refined notes on success.
pub fn refine(
    model: &dyn RefinerModel,
    ensemble_notes: &[Note],
    duration_secs: f64,
    threshold: f32,
) -> Result<Vec<Note>, RefinerError> {
    let roll = noteroll::rasterize(ensemble_notes, duration_secs);
    let mut refined_frames = Vec::with_capacity(roll.frame_count());

    let mut start = 0;
    while start < roll.frame_count() {
        let end = (start + MAX_CHUNK_FRAMES).min(roll.frame_count());
        let chunk = NoteRoll { frames: roll.frames[start..end].to_vec() };
        let refined_chunk = model.infer_chunk(&chunk).map_err(|e| match e {
            RefinerError::ChunkFailed(_, msg) => RefinerError::ChunkFailed(start, msg),
        })?;
        refined_frames.extend(refined_chunk.frames);
        start = end;
    }

    let refined_roll = NoteRoll { frames: refined_frames };
    Ok(noteroll::extract_notes(&refined_roll, threshold, ensemble_notes, 0.05))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn refiner_is_idempotent_on_a_zero_roll() {
        let model = SmoothingRefinerModel;
        let refined = refine(&model, &[], 1.0, 0.5).unwrap();
        assert!(refined.is_empty());
    }

    #[test]
    fn isolated_single_frame_spike_is_smoothed_away() {
        let model = SmoothingRefinerModel;
        // A single note 1 frame (10ms) long is isolated; after
        // smoothing it should not survive extraction.
        let spike = vec![Note { pitch: 60, onset: 0.5, offset: 0.51, velocity: 80, confidence: 1.0 }];
        let refined = refine(&model, &spike, 2.0, 0.5).unwrap();
        assert!(refined.iter().all(|n| n.pitch != 60 || (n.offset - n.onset) > 0.01));
    }

    #[test]
    fn sustained_note_survives_refinement() {
        let model = SmoothingRefinerModel;
        let sustained = vec![Note { pitch: 64, onset: 0.0, offset: 1.0, velocity: 90, confidence: 1.0 }];
        let refined = refine(&model, &sustained, 1.5, 0.5).unwrap();
        assert!(refined.iter().any(|n| n.pitch == 64));
    }

    #[test]
    fn long_input_is_split_across_multiple_chunks() {
        let model = SmoothingRefinerModel;
        let duration = (MAX_CHUNK_FRAMES as f64 * 2.5) / noteroll::FRAME_RATE_HZ;
        let notes = vec![Note { pitch: 60, onset: 0.0, offset: duration, velocity: 80, confidence: 1.0 }];
        let refined = refine(&model, &notes, duration, 0.5).unwrap();
        assert!(refined.iter().any(|n| n.pitch == 60));
    }
}
