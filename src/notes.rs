//! Scientific pitch utilities shared by the encoders.
//!
//! The document model stores `(string, fret)` pairs only; turning those into
//! concrete pitches is an encoder concern, and it funnels through here.

use regex::Regex;

use crate::model::Track;
use crate::tokenize::{grammar_regex, MatchedGroups};

lazy_static! {
    static ref PITCH_REGEX: Regex = grammar_regex(r"^([A-Ga-g])([#b]?)(-?\d+)$");
}

const SHARP_NAMES: [&str; 12] = [
    "C", "C#", "D", "D#", "E", "F", "F#", "G", "G#", "A", "A#", "B",
];

// Sharp-preferring spelling of each semitone as (step, alter).
const SHARP_STEPS: [(char, i32); 12] = [
    ('C', 0),
    ('C', 1),
    ('D', 0),
    ('D', 1),
    ('E', 0),
    ('F', 0),
    ('F', 1),
    ('G', 0),
    ('G', 1),
    ('A', 0),
    ('A', 1),
    ('B', 0),
];

/// Parse a scientific pitch name such as `E2` or `F#3` into a MIDI number.
/// `C-1` is MIDI 0, `A4` is MIDI 69.
pub fn pitch_to_midi(name: &str) -> Option<i32> {
    let captures = PITCH_REGEX.captures(name.trim())?;

    let letter = captures.group(1).as_str();
    let accidental = captures.group(2).as_str();
    let octave: i32 = captures.group(3).as_str().parse().ok()?;

    let base = match letter.to_ascii_uppercase().as_str() {
        "C" => 0,
        "D" => 2,
        "E" => 4,
        "F" => 5,
        "G" => 7,
        "A" => 9,
        "B" => 11,
        _ => return None,
    };

    let alter = match accidental {
        "#" => 1,
        "b" => -1,
        _ => 0,
    };

    Some((octave + 1) * 12 + base + alter)
}

/// Render a MIDI number as a sharp-preferring scientific pitch name.
pub fn midi_to_name(midi: i32) -> String {
    let octave = midi.div_euclid(12) - 1;
    let step = midi.rem_euclid(12) as usize;
    format!("{}{}", SHARP_NAMES[step], octave)
}

/// Decompose a MIDI number into `(step, alter, octave)` the way staff-based
/// formats spell pitches, preferring sharps.
pub fn midi_to_step_alter_octave(midi: i32) -> (char, i32, i32) {
    let octave = midi.div_euclid(12) - 1;
    let (step, alter) = SHARP_STEPS[midi.rem_euclid(12) as usize];
    (step, alter, octave)
}

/// Resolve a `(string, fret)` pair against a track's tuning and capo.
/// String 1 is the highest-pitched string; the tuning array is stored
/// low-to-high. Returns `None` when the track has no tuning or the string
/// index is out of range.
pub fn resolve_pitch(track: &Track, string: u32, fret: u32) -> Option<i32> {
    let tuning = track.tuning.as_ref()?;
    let count = tuning.len() as u32;
    if string < 1 || string > count {
        return None;
    }

    let open = pitch_to_midi(&tuning[(count - string) as usize])?;
    Some(open + fret as i32 + track.capo as i32)
}

/// True when `name` is a well-formed scientific pitch name.
pub fn is_pitch_name(name: &str) -> bool {
    PITCH_REGEX.is_match(name.trim())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::Track;

    fn standard_track() -> Track {
        Track {
            tuning: Some(
                ["E2", "A2", "D3", "G3", "B3", "E4"]
                    .iter()
                    .map(|s| s.to_string())
                    .collect(),
            ),
            ..Track::with_id("gtr1")
        }
    }

    #[test]
    fn parse_plain_pitches() {
        assert_eq!(pitch_to_midi("E2"), Some(40));
        assert_eq!(pitch_to_midi("A2"), Some(45));
        assert_eq!(pitch_to_midi("E4"), Some(64));
        assert_eq!(pitch_to_midi("A4"), Some(69));
        assert_eq!(pitch_to_midi("C-1"), Some(0));
    }

    #[test]
    fn parse_accidentals() {
        assert_eq!(pitch_to_midi("F#3"), Some(54));
        assert_eq!(pitch_to_midi("Bb2"), Some(46));
        assert_eq!(pitch_to_midi("d#3"), Some(51));
    }

    #[test]
    fn reject_garbage() {
        assert_eq!(pitch_to_midi("H2"), None);
        assert_eq!(pitch_to_midi("E"), None);
        assert_eq!(pitch_to_midi(""), None);
    }

    #[test]
    fn names_round_trip() {
        for midi in 0..128 {
            assert_eq!(pitch_to_midi(&midi_to_name(midi)), Some(midi));
        }
    }

    #[test]
    fn resolve_standard_tuning() {
        let track = standard_track();
        assert_eq!(resolve_pitch(&track, 6, 0), Some(40));
        assert_eq!(resolve_pitch(&track, 1, 0), Some(64));
        assert_eq!(resolve_pitch(&track, 1, 12), Some(76));
        assert_eq!(resolve_pitch(&track, 6, 3), Some(43));
        assert_eq!(resolve_pitch(&track, 7, 0), None);
        assert_eq!(resolve_pitch(&track, 0, 0), None);
    }

    #[test]
    fn resolve_with_capo() {
        let mut track = standard_track();
        track.capo = 2;
        assert_eq!(resolve_pitch(&track, 1, 0), Some(66));
    }

    #[test]
    fn resolve_without_tuning() {
        let track = Track::with_id("gtr1");
        assert_eq!(resolve_pitch(&track, 1, 0), None);
    }

    #[test]
    fn step_alter_octave() {
        assert_eq!(midi_to_step_alter_octave(40), ('E', 0, 2));
        assert_eq!(midi_to_step_alter_octave(46), ('A', 1, 2));
        assert_eq!(midi_to_step_alter_octave(60), ('C', 0, 4));
    }
}
