//! Note roll rasterization used by the refiner (C6): a dense `(T, 88)`
//! grid of per-frame, per-pitch activity, and its inverse.

use transcribe_common::model::Note;

/// Frames per second the roll is rasterized at.
pub const FRAME_RATE_HZ: f64 = 100.0;
pub const FRAME_PERIOD_SECS: f64 = 1.0 / FRAME_RATE_HZ;
pub const PIANO_RANGE: usize = 88;
const PIANO_MIN_PITCH: u8 = 21;

/// A dense note-activity grid: `frames.len()` rows, each `PIANO_RANGE`
/// probabilities in `[0,1]` for MIDI pitches 21..=108.
#[derive(Debug, Clone)]
pub struct NoteRoll {
    pub frames: Vec<[f32; PIANO_RANGE]>,
}

impl NoteRoll {
    pub fn empty(frame_count: usize) -> Self {
        Self { frames: vec![[0.0; PIANO_RANGE]; frame_count] }
    }

    pub fn frame_count(&self) -> usize {
        self.frames.len()
    }
}

fn pitch_to_column(pitch: u8) -> Option<usize> {
    if pitch < PIANO_MIN_PITCH || (pitch as usize) >= PIANO_MIN_PITCH as usize + PIANO_RANGE {
        return None;
    }
    Some((pitch - PIANO_MIN_PITCH) as usize)
}

fn column_to_pitch(column: usize) -> u8 {
    PIANO_MIN_PITCH + column as u8
}

/// Rasterizes `notes` into a roll spanning `duration_secs` at
/// [`FRAME_RATE_HZ`]. Notes outside the 88-key piano range are
/// silently excluded (the refiner only ever sees piano stems).
pub fn rasterize(notes: &[Note], duration_secs: f64) -> NoteRoll {
    let frame_count = ((duration_secs * FRAME_RATE_HZ).ceil() as usize).max(1);
    let mut roll = NoteRoll::empty(frame_count);
    for note in notes {
        let Some(column) = pitch_to_column(note.pitch) else { continue };
        let start = (note.onset * FRAME_RATE_HZ).floor().max(0.0) as usize;
        let end = ((note.offset * FRAME_RATE_HZ).ceil() as usize).min(frame_count).max(start + 1);
        for frame in start..end.min(frame_count) {
            roll.frames[frame][column] = roll.frames[frame][column].max(1.0);
        }
    }
    roll
}

/// Extracts notes from a thresholded roll: runs of activity in each
/// pitch column become one note apiece. Velocity is copied from the
/// nearest `source_notes` entry by `(pitch, onset)`; if none exists
/// within `velocity_tolerance_secs`, the default velocity 80 is used.
pub fn extract_notes(
    roll: &NoteRoll,
    threshold: f32,
    source_notes: &[Note],
    velocity_tolerance_secs: f64,
) -> Vec<Note> {
    let mut notes = Vec::new();
    for column in 0..PIANO_RANGE {
        let pitch = column_to_pitch(column);
        let mut run_start: Option<usize> = None;
        for frame in 0..=roll.frame_count() {
            let active = frame < roll.frame_count() && roll.frames[frame][column] >= threshold;
            match (run_start, active) {
                (None, true) => run_start = Some(frame),
                (Some(start), false) => {
                    let onset = start as f64 * FRAME_PERIOD_SECS;
                    let offset = frame as f64 * FRAME_PERIOD_SECS + FRAME_PERIOD_SECS;
                    let velocity = nearest_velocity(source_notes, pitch, onset, velocity_tolerance_secs);
                    notes.push(Note { pitch, onset, offset, velocity, confidence: threshold });
                    run_start = None;
                }
                _ => {}
            }
        }
    }
    notes.sort_by(|a, b| a.onset.partial_cmp(&b.onset).unwrap().then(a.pitch.cmp(&b.pitch)));
    notes
}

fn nearest_velocity(source_notes: &[Note], pitch: u8, onset: f64, tolerance_secs: f64) -> u8 {
    source_notes
        .iter()
        .filter(|n| n.pitch == pitch && (n.onset - onset).abs() <= tolerance_secs)
        .min_by(|a, b| (a.onset - onset).abs().partial_cmp(&(b.onset - onset).abs()).unwrap())
        .map(|n| n.velocity)
        .unwrap_or(80)
}
