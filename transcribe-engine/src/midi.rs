//! Standard MIDI File I/O and the confidence sidecar format.
//!
//! MIDI itself has no field for per-note confidence, so every MIDI
//! written by this crate is accompanied by a JSON sidecar whose entries
//! are parallel (same count, same order) to the MIDI's note-on events
//! under an (onset, pitch) sort.

use std::path::Path;
use transcribe_common::model::{sort_key, ConfidenceEntry, Note};

const TICKS_PER_QUARTER: u16 = 480;
/// Reference tempo used to convert seconds to ticks. The pipeline
/// itself does not need a musically meaningful tempo to round-trip
/// notes; actual tempo is detected separately (see `pipeline::metadata`)
/// and written to the conductor track.
const MICROS_PER_QUARTER_DEFAULT: u32 = 500_000; // 120 BPM

/// Writes `notes` as a Standard MIDI File, Type 1, with the tempo on
/// the conductor track (track 0) and the notes on track 1.
///
/// `program` is a General MIDI program number (0-127) written as a
/// Program Change at the start of the notes track. This is how a
/// vocals stem's `vocal_substitute_program` job option reaches the
/// final artifact: the separator has no pitched-instrument program to
/// fall back on for a vocal line, so the caller substitutes one.
pub fn write_midi(path: &Path, notes: &[Note], tempo_bpm: Option<f32>, program: Option<u8>) -> anyhow::Result<()> {
    use midly::num::{u15, u24, u28, u4, u7};
    use midly::{Header, MetaMessage, MidiMessage, Smf, Timing, Track, TrackEvent, TrackEventKind};

    let micros_per_quarter = tempo_bpm
        .filter(|bpm| *bpm > 0.0)
        .map(|bpm| (60_000_000.0 / bpm as f64).round() as u32)
        .unwrap_or(MICROS_PER_QUARTER_DEFAULT);

    let mut conductor = Track::new();
    conductor.push(TrackEvent {
        delta: u28::from(0),
        kind: TrackEventKind::Meta(MetaMessage::Tempo(u24::from(micros_per_quarter))),
    });
    conductor.push(TrackEvent {
        delta: u28::from(0),
        kind: TrackEventKind::Meta(MetaMessage::TimeSignature(4, 2, 24, 8)),
    });
    conductor.push(TrackEvent {
        delta: u28::from(0),
        kind: TrackEventKind::Meta(MetaMessage::EndOfTrack),
    });

    let mut sorted: Vec<&Note> = notes.iter().collect();
    sorted.sort_by_key(|n| sort_key(n));

    let ticks_per_sec = |secs: f64| -> u32 {
        let quarters = secs * 1_000_000.0 / micros_per_quarter as f64;
        (quarters * TICKS_PER_QUARTER as f64).round().max(0.0) as u32
    };

    #[derive(Clone, Copy)]
    enum Evt {
        On(u32, u8, u8),
        Off(u32, u8),
    }

    let mut events: Vec<Evt> = Vec::with_capacity(sorted.len() * 2);
    for note in &sorted {
        let on_tick = ticks_per_sec(note.onset);
        let off_tick = ticks_per_sec(note.offset).max(on_tick + 1);
        events.push(Evt::On(on_tick, note.pitch, note.velocity));
        events.push(Evt::Off(off_tick, note.pitch));
    }
    events.sort_by_key(|e| match e {
        Evt::On(t, _, _) => (*t, 1),
        Evt::Off(t, _) => (*t, 0),
    });

    let mut notes_track = Track::new();
    let mut last_tick = 0u32;
    if let Some(program) = program {
        notes_track.push(TrackEvent {
            delta: u28::from(0),
            kind: TrackEventKind::Midi {
                channel: u4::from(0),
                message: MidiMessage::ProgramChange { program: u7::from(program.min(127)) },
            },
        });
    }
    for event in &events {
        let (tick, kind) = match *event {
            Evt::On(tick, pitch, velocity) => (
                tick,
                TrackEventKind::Midi {
                    channel: u4::from(0),
                    message: MidiMessage::NoteOn {
                        key: u7::from(pitch.min(127)),
                        vel: u7::from(velocity.clamp(1, 127)),
                    },
                },
            ),
            Evt::Off(tick, pitch) => (
                tick,
                TrackEventKind::Midi {
                    channel: u4::from(0),
                    message: MidiMessage::NoteOff {
                        key: u7::from(pitch.min(127)),
                        vel: u7::from(0),
                    },
                },
            ),
        };
        let delta = tick.saturating_sub(last_tick);
        last_tick = tick;
        notes_track.push(TrackEvent {
            delta: u28::from(delta),
            kind,
        });
    }
    notes_track.push(TrackEvent {
        delta: u28::from(0),
        kind: TrackEventKind::Meta(MetaMessage::EndOfTrack),
    });

    let smf = Smf {
        header: Header::new(
            midly::Format::Parallel,
            Timing::Metrical(u15::from(TICKS_PER_QUARTER)),
        ),
        tracks: vec![conductor, notes_track],
    };

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let mut buf = Vec::new();
    smf.write(&mut buf)?;
    std::fs::write(path, buf)?;
    Ok(())
}

/// Reads back a note list from a Standard MIDI File produced by
/// [`write_midi`]. Confidence is not recoverable from MIDI alone;
/// callers needing it should read the sidecar and zip by (onset, pitch)
/// order.
pub fn read_midi_notes(path: &Path) -> anyhow::Result<Vec<Note>> {
    let bytes = std::fs::read(path)?;
    let smf = midly::Smf::parse(&bytes)?;
    let ticks_per_quarter = match smf.header.timing {
        midly::Timing::Metrical(t) => t.as_int() as f64,
        midly::Timing::Timecode(fps, sub) => (fps.as_f32() as f64) * (sub as f64),
    };

    let mut micros_per_quarter = MICROS_PER_QUARTER_DEFAULT as f64;
    let mut notes = Vec::new();
    let mut open: std::collections::HashMap<u8, (f64, u8)> = std::collections::HashMap::new();

    for track in &smf.tracks {
        let mut tick = 0u64;
        for event in track {
            tick += event.delta.as_int() as u64;
            match event.kind {
                midly::TrackEventKind::Meta(midly::MetaMessage::Tempo(t)) => {
                    micros_per_quarter = t.as_int() as f64;
                }
                midly::TrackEventKind::Midi { message, .. } => {
                    let seconds = (tick as f64 / ticks_per_quarter) * (micros_per_quarter / 1_000_000.0);
                    match message {
                        midly::MidiMessage::NoteOn { key, vel } if vel.as_int() > 0 => {
                            open.insert(key.as_int(), (seconds, vel.as_int()));
                        }
                        midly::MidiMessage::NoteOn { key, .. }
                        | midly::MidiMessage::NoteOff { key, .. } => {
                            if let Some((onset, velocity)) = open.remove(&key.as_int()) {
                                notes.push(Note {
                                    pitch: key.as_int(),
                                    onset,
                                    offset: seconds.max(onset),
                                    velocity,
                                    confidence: 0.0,
                                });
                            }
                        }
                        _ => {}
                    }
                }
                _ => {}
            }
        }
    }

    notes.sort_by_key(|n| sort_key(n));
    Ok(notes)
}

/// Writes the confidence sidecar for `notes`, sorted by (onset, pitch)
/// to match the MIDI's note-on ordering.
pub fn write_confidence_sidecar(path: &Path, notes: &[Note]) -> anyhow::Result<()> {
    let mut sorted: Vec<&Note> = notes.iter().collect();
    sorted.sort_by_key(|n| sort_key(n));
    let entries: Vec<ConfidenceEntry> = sorted
        .iter()
        .map(|n| ConfidenceEntry {
            pitch: n.pitch,
            onset: n.onset,
            confidence: n.confidence,
        })
        .collect();

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    let json = serde_json::to_vec_pretty(&entries)?;
    std::fs::write(path, json)?;
    Ok(())
}

pub fn read_confidence_sidecar(path: &Path) -> anyhow::Result<Vec<ConfidenceEntry>> {
    let content = std::fs::read_to_string(path)?;
    Ok(serde_json::from_str(&content)?)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn write_then_read_roundtrips_counts() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("out.mid");
        let notes = vec![
            Note { pitch: 60, onset: 1.0, offset: 1.5, velocity: 90, confidence: 0.9 },
            Note { pitch: 64, onset: 2.0, offset: 2.4, velocity: 80, confidence: 0.5 },
        ];
        write_midi(&path, &notes, Some(120.0), None).unwrap();
        let read_back = read_midi_notes(&path).unwrap();
        assert_eq!(read_back.len(), notes.len());
        assert_eq!(read_back[0].pitch, 60);
        assert_eq!(read_back[1].pitch, 64);
    }

    #[test]
    fn vocal_substitute_program_is_written_as_a_program_change() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("vocals.mid");
        let notes = vec![Note { pitch: 67, onset: 0.0, offset: 0.5, velocity: 90, confidence: 0.8 }];
        write_midi(&path, &notes, None, Some(54)).unwrap();

        let bytes = std::fs::read(&path).unwrap();
        let smf = midly::Smf::parse(&bytes).unwrap();
        let has_program_change = smf.tracks[1].iter().any(|event| {
            matches!(
                event.kind,
                midly::TrackEventKind::Midi {
                    message: midly::MidiMessage::ProgramChange { program },
                    ..
                } if program.as_int() == 54
            )
        });
        assert!(has_program_change);
    }

    #[test]
    fn empty_note_list_yields_valid_midi_with_zero_notes() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("empty.mid");
        write_midi(&path, &[], None, None).unwrap();
        let read_back = read_midi_notes(&path).unwrap();
        assert!(read_back.is_empty());
    }

    #[test]
    fn sidecar_is_parallel_to_sorted_notes() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("c.json");
        let notes = vec![
            Note { pitch: 64, onset: 2.0, offset: 2.4, velocity: 80, confidence: 0.5 },
            Note { pitch: 60, onset: 1.0, offset: 1.5, velocity: 90, confidence: 0.9 },
        ];
        write_confidence_sidecar(&path, &notes).unwrap();
        let entries = read_confidence_sidecar(&path).unwrap();
        assert_eq!(entries.len(), 2);
        assert_eq!(entries[0].pitch, 60);
        assert_eq!(entries[1].pitch, 64);
    }
}
