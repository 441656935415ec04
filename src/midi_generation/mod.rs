//! Standard MIDI File generation.
//!
//! Events are collected per track with absolute ticks and an ordering class,
//! then sorted and written as delta-timed `MTrk` data. The class keeps
//! simultaneous events in a safe order: meta events first, then note-offs,
//! then note-ons, so a note ending exactly where another begins never
//! swallows it.

pub mod data;

use crate::model::{Document, Event};
use crate::notes;

pub use self::data::{MidiGenerationOptions, MidiOutput};

const CLASS_META: u8 = 0;
const CLASS_NOTE_OFF: u8 = 1;
const CLASS_NOTE_ON: u8 = 2;

const VELOCITY: u8 = 64;

pub fn generate_midi(document: &Document, options: &MidiGenerationOptions) -> MidiOutput {
    let ppq = u32::from(options.ticks_per_beat);
    let mut warnings = Vec::new();

    let signature = document.header.time_signature;
    let expected_ticks = ppq * signature.numerator * 4 / signature.denominator;

    let mut tracks: Vec<Vec<u8>> = Vec::new();

    if document.tracks.is_empty() {
        let mut writer = TrackWriter::new();
        push_header_meta(&mut writer, document);
        tracks.push(writer.encode());
    }

    for (track_index, track) in document.tracks.iter().enumerate() {
        let channel = (track_index % 16) as u8;
        let mut writer = TrackWriter::new();
        push_header_meta(&mut writer, document);

        let mut missing_tuning_warned = false;
        let mut measure_start = 0u32;

        for measure in &document.measures {
            let mut span = expected_ticks;

            if let Some(track_measure) = measure.tracks.get(&track.id) {
                for events in track_measure.voices.values() {
                    let mut cursor = measure_start;

                    for event in events {
                        let ticks = event.duration().ticks(ppq);

                        let refs: &[crate::model::NoteRef] = match event {
                            Event::Note { note, .. } => std::slice::from_ref(note),
                            Event::Chord { notes, .. } => notes.as_slice(),
                            Event::Rest { .. } => &[],
                        };

                        for note in refs {
                            match notes::resolve_pitch(track, note.string, note.fret) {
                                Some(pitch) if (0..=127).contains(&pitch) => {
                                    writer.note_on(cursor, channel, pitch as u8, VELOCITY);
                                    writer.note_off(cursor + ticks, channel, pitch as u8);
                                }
                                Some(pitch) => warnings.push(format!(
                                    "track `{}` measure {}: pitch {} is outside the MIDI range; note dropped",
                                    track.id, measure.index, pitch
                                )),
                                None if track.tuning.is_none() => {
                                    if !missing_tuning_warned {
                                        warnings.push(format!(
                                            "track `{}` has no tuning; its notes are dropped",
                                            track.id
                                        ));
                                        missing_tuning_warned = true;
                                    }
                                }
                                None => warnings.push(format!(
                                    "track `{}` measure {}: string {} has no tuning entry; note dropped",
                                    track.id, measure.index, note.string
                                )),
                            }
                        }

                        cursor += ticks;
                    }

                    span = span.max(cursor - measure_start);
                }
            }

            measure_start += span;
        }

        tracks.push(writer.encode());
    }

    let format: u16 = if tracks.len() > 1 { 1 } else { 0 };

    let mut bytes = Vec::new();
    bytes.extend_from_slice(b"MThd");
    bytes.extend_from_slice(&6u32.to_be_bytes());
    bytes.extend_from_slice(&format.to_be_bytes());
    bytes.extend_from_slice(&(tracks.len() as u16).to_be_bytes());
    bytes.extend_from_slice(&options.ticks_per_beat.to_be_bytes());

    for track_data in tracks {
        bytes.extend_from_slice(b"MTrk");
        bytes.extend_from_slice(&(track_data.len() as u32).to_be_bytes());
        bytes.extend(track_data);
    }

    MidiOutput { bytes, warnings }
}

fn push_header_meta(writer: &mut TrackWriter, document: &Document) {
    let bpm = document.header.tempo_bpm.max(1);
    let us_per_beat = (60_000_000 + bpm / 2) / bpm;
    writer.meta(
        0,
        0x51,
        vec![
            ((us_per_beat >> 16) & 0xFF) as u8,
            ((us_per_beat >> 8) & 0xFF) as u8,
            (us_per_beat & 0xFF) as u8,
        ],
    );

    let signature = document.header.time_signature;
    let denominator_power = signature.denominator.trailing_zeros() as u8;
    writer.meta(
        0,
        0x58,
        vec![signature.numerator.min(255) as u8, denominator_power, 24, 8],
    );
}

struct TimedEvent {
    tick: u32,
    class: u8,
    data: Vec<u8>,
}

struct TrackWriter {
    events: Vec<TimedEvent>,
}

impl TrackWriter {
    fn new() -> TrackWriter {
        TrackWriter { events: Vec::new() }
    }

    fn meta(&mut self, tick: u32, meta_type: u8, data: Vec<u8>) {
        let mut bytes = vec![0xFF, meta_type];
        bytes.extend(encode_variable_length(data.len() as u32));
        bytes.extend(data);
        self.events.push(TimedEvent {
            tick,
            class: CLASS_META,
            data: bytes,
        });
    }

    fn note_on(&mut self, tick: u32, channel: u8, pitch: u8, velocity: u8) {
        self.events.push(TimedEvent {
            tick,
            class: CLASS_NOTE_ON,
            data: vec![0x90 | (channel & 0x0F), pitch, velocity],
        });
    }

    fn note_off(&mut self, tick: u32, channel: u8, pitch: u8) {
        self.events.push(TimedEvent {
            tick,
            class: CLASS_NOTE_OFF,
            data: vec![0x80 | (channel & 0x0F), pitch, 0],
        });
    }

    fn encode(mut self) -> Vec<u8> {
        self.events.sort_by_key(|event| (event.tick, event.class));

        let mut out = Vec::new();
        let mut last_tick = 0u32;

        for event in &self.events {
            let delta = event.tick - last_tick;
            out.extend(encode_variable_length(delta));
            out.extend(&event.data);
            last_tick = event.tick;
        }

        out.extend(&[0x00, 0xFF, 0x2F, 0x00]);
        out
    }
}

fn encode_variable_length(mut value: u32) -> Vec<u8> {
    if value == 0 {
        return vec![0];
    }

    let mut bytes = Vec::new();
    bytes.push((value & 0x7F) as u8);
    value >>= 7;

    while value > 0 {
        bytes.push(((value & 0x7F) | 0x80) as u8);
        value >>= 7;
    }

    bytes.reverse();
    bytes
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parsing;

    const MINIMAL: &str = r#"format="opentab"
version="0.1"
tempo_bpm=100
time_signature="4/4"

[[tracks]]
id="gtr1"
tuning=["E2","A2","D3","G3","B3","E4"]
---
@track gtr1
m1: | q (6:3) (5:5) (4:5) (3:3) |
"#;

    fn generate(source: &str) -> MidiOutput {
        let document = parsing::parse(source, None).unwrap();
        generate_midi(&document, &MidiGenerationOptions::default())
    }

    /// Decode (absolute_tick, status, data1, data2) triples from a track
    /// chunk, assuming only single-byte delta times and 3-byte events, which
    /// holds for the small fixtures below.
    fn note_events(bytes: &[u8]) -> Vec<(u32, u8, u8, u8)> {
        let track_start = 14 + 8;
        let mut events = Vec::new();
        let mut tick = 0u32;
        let mut i = track_start;

        while i < bytes.len() {
            let mut delta = 0u32;
            loop {
                let byte = bytes[i];
                i += 1;
                delta = (delta << 7) | u32::from(byte & 0x7F);
                if byte & 0x80 == 0 {
                    break;
                }
            }
            tick += delta;

            match bytes[i] {
                0xFF => {
                    let length = bytes[i + 2] as usize;
                    if bytes[i + 1] == 0x2F {
                        break;
                    }
                    i += 3 + length;
                }
                status if status & 0xF0 == 0x90 || status & 0xF0 == 0x80 => {
                    events.push((tick, status, bytes[i + 1], bytes[i + 2]));
                    i += 3;
                }
                other => panic!("unexpected status byte {:#x}", other),
            }
        }

        events
    }

    #[test]
    fn header_chunk_is_well_formed() {
        let output = generate(MINIMAL);
        let bytes = &output.bytes;

        assert_eq!(&bytes[0..4], b"MThd");
        assert_eq!(&bytes[4..8], &[0, 0, 0, 6]);
        assert_eq!(&bytes[8..10], &[0, 0]);
        assert_eq!(&bytes[10..12], &[0, 1]);
        assert_eq!(&bytes[12..14], &[1, 224]);
        assert_eq!(&bytes[14..18], b"MTrk");
        assert!(output.warnings.is_empty());
    }

    #[test]
    fn quarter_notes_land_on_beat_boundaries() {
        let output = generate(MINIMAL);
        let events = note_events(&output.bytes);

        let ons: Vec<_> = events
            .iter()
            .filter(|(_, status, _, _)| status & 0xF0 == 0x90)
            .collect();
        assert_eq!(ons.len(), 4);
        assert_eq!(ons[0], &(0, 0x90, 43, VELOCITY));
        assert_eq!(ons[1], &(480, 0x90, 50, VELOCITY));
        assert_eq!(ons[2], &(960, 0x90, 55, VELOCITY));
        assert_eq!(ons[3], &(1440, 0x90, 58, VELOCITY));

        let offs: Vec<_> = events
            .iter()
            .filter(|(_, status, _, _)| status & 0xF0 == 0x80)
            .collect();
        assert_eq!(offs[0].0, 480);
        assert_eq!(offs[3].0, 1920);
    }

    #[test]
    fn tempo_meta_is_emitted() {
        let output = generate(MINIMAL);
        // 100 bpm is 600000 microseconds per beat, 0x0927C0.
        let expected = [0xFF, 0x51, 0x03, 0x09, 0x27, 0xC0];
        assert!(output
            .bytes
            .windows(expected.len())
            .any(|window| window == expected));
    }

    #[test]
    fn time_signature_meta_is_emitted() {
        let source = MINIMAL.replace("time_signature=\"4/4\"", "time_signature=\"6/8\"");
        let output = generate(&source);
        let expected = [0xFF, 0x58, 0x04, 6, 3, 24, 8];
        assert!(output
            .bytes
            .windows(expected.len())
            .any(|window| window == expected));
    }

    #[test]
    fn note_off_sorts_before_note_on_at_equal_tick() {
        let source = MINIMAL.replace(
            "m1: | q (6:3) (5:5) (4:5) (3:3) |",
            "m1: | q (6:3) (6:3) |",
        );
        let events = note_events(&generate(&source).bytes);

        assert_eq!(events[0], (0, 0x90, 43, VELOCITY));
        assert_eq!(events[1], (480, 0x80, 43, 0));
        assert_eq!(events[2], (480, 0x90, 43, VELOCITY));
        assert_eq!(events[3], (960, 0x80, 43, 0));
    }

    #[test]
    fn capo_shifts_pitches() {
        let source = MINIMAL.replace(
            "tuning=[\"E2\",\"A2\",\"D3\",\"G3\",\"B3\",\"E4\"]",
            "tuning=[\"E2\",\"A2\",\"D3\",\"G3\",\"B3\",\"E4\"]\ncapo=2",
        );
        let events = note_events(&generate(&source).bytes);
        assert_eq!(events[0].2, 45);
    }

    #[test]
    fn multi_track_documents_use_format_1() {
        let source = MINIMAL.replace(
            "[[tracks]]\nid=\"gtr1\"",
            "[[tracks]]\nid=\"bass1\"\ntuning=[\"E1\",\"A1\",\"D2\",\"G2\"]\n\n[[tracks]]\nid=\"gtr1\"",
        );
        let output = generate(&source);
        assert_eq!(&output.bytes[8..10], &[0, 1]);
        assert_eq!(&output.bytes[10..12], &[0, 2]);
    }

    #[test]
    fn short_voices_do_not_shrink_the_measure() {
        let source = MINIMAL.replace(
            "m1: | q (6:3) (5:5) (4:5) (3:3) |",
            "m1: | q (6:3) |\nm2: | q (6:5) |",
        );
        let events = note_events(&generate(&source).bytes);
        // The second measure still starts a full bar later.
        assert_eq!(events[2], (1920, 0x90, 45, VELOCITY));
    }

    #[test]
    fn overfull_measures_push_the_next_one_back() {
        let source = MINIMAL.replace(
            "m1: | q (6:3) (5:5) (4:5) (3:3) |",
            "m1: | w (6:3) h (6:3) |\nm2: | q (6:5) |",
        );
        let events = note_events(&generate(&source).bytes);
        let last_on = events
            .iter()
            .filter(|(_, status, _, pitch)| status & 0xF0 == 0x90 && *pitch == 45)
            .next()
            .unwrap();
        assert_eq!(last_on.0, 2880);
    }

    #[test]
    fn out_of_range_notes_warn_and_are_dropped() {
        let source = MINIMAL.replace(
            "m1: | q (6:3) (5:5) (4:5) (3:3) |",
            "m1: | q (1:90) |",
        );
        let output = generate(&source);
        assert_eq!(note_events(&output.bytes).len(), 0);
        assert_eq!(output.warnings.len(), 1);
        assert!(output.warnings[0].contains("outside the MIDI range"));
    }

    #[test]
    fn missing_tuning_warns_once() {
        let source = r#"format="opentab"
version="0.1"
---
@track mystery
m1: | q (6:3) (5:5) |
"#;
        let output = generate(source);
        assert_eq!(output.warnings.len(), 1);
        assert!(output.warnings[0].contains("no tuning"));
    }

    #[test]
    fn rests_advance_the_cursor() {
        let source = MINIMAL.replace(
            "m1: | q (6:3) (5:5) (4:5) (3:3) |",
            "m1: | q (6:3) r (6:5) |",
        );
        let events = note_events(&generate(&source).bytes);
        let ons: Vec<_> = events
            .iter()
            .filter(|(_, status, _, _)| status & 0xF0 == 0x90)
            .collect();
        assert_eq!(ons[1].0, 960);
    }
}
