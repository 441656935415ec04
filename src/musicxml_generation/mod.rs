//! Partwise MusicXML 3.1 generation.
//!
//! One part per track with a TAB clef and staff tuning. Divisions are fixed
//! at 480 per quarter so durations share their arithmetic with the MIDI
//! encoder. Voices beyond the first rewind with `<backup>`, and short voices
//! are padded to the full measure with a rest.

use std::fmt::Write;

use crate::model::{Document, Event, Measure, NoteRef, Track};
use crate::notes;

const DIVISIONS: u32 = 480;

pub fn generate_musicxml(document: &Document) -> String {
    let mut xml = String::new();

    xml.push_str("<?xml version=\"1.0\" encoding=\"UTF-8\"?>\n");
    xml.push_str("<score-partwise version=\"3.1\">\n");

    if let Some(title) = &document.header.title {
        xml.push_str("  <work>\n");
        let _ = writeln!(xml, "    <work-title>{}</work-title>", escape_xml(title));
        xml.push_str("  </work>\n");
    }
    if let Some(composer) = &document.header.composer {
        xml.push_str("  <identification>\n");
        let _ = writeln!(
            xml,
            "    <creator type=\"composer\">{}</creator>",
            escape_xml(composer)
        );
        xml.push_str("  </identification>\n");
    }

    xml.push_str("  <part-list>\n");
    for (index, track) in document.tracks.iter().enumerate() {
        let name = track.name.as_ref().unwrap_or(&track.id);
        let _ = writeln!(xml, "    <score-part id=\"P{}\">", index + 1);
        let _ = writeln!(xml, "      <part-name>{}</part-name>", escape_xml(name));
        xml.push_str("    </score-part>\n");
    }
    xml.push_str("  </part-list>\n");

    for (index, track) in document.tracks.iter().enumerate() {
        let _ = writeln!(xml, "  <part id=\"P{}\">", index + 1);
        for (position, measure) in document.measures.iter().enumerate() {
            write_measure(&mut xml, document, track, measure, position == 0);
        }
        xml.push_str("  </part>\n");
    }

    xml.push_str("</score-partwise>\n");
    xml
}

fn measure_divisions(document: &Document) -> u32 {
    let signature = document.header.time_signature;
    DIVISIONS * signature.numerator * 4 / signature.denominator
}

fn write_measure(
    xml: &mut String,
    document: &Document,
    track: &Track,
    measure: &Measure,
    first: bool,
) {
    let _ = writeln!(xml, "    <measure number=\"{}\">", measure.index);

    if first {
        write_attributes(xml, document, track);
    }

    let measure_length = measure_divisions(document);
    let empty = crate::model::TrackMeasure::default();
    let track_measure = measure.tracks.get(&track.id).unwrap_or(&empty);

    if track_measure.voices.is_empty() {
        write_rest(xml, measure_length, 1);
    }

    let voice_count = track_measure.voices.len();
    for (voice_index, events) in track_measure.voices.values().enumerate() {
        let voice_number = voice_index + 1;
        let mut filled = 0u32;

        for event in events {
            let duration = event.duration().ticks(DIVISIONS);
            match event {
                Event::Note { note, .. } => {
                    write_note(xml, track, note, event, duration, voice_number, false);
                }
                Event::Chord { notes, .. } => {
                    for (note_index, note) in notes.iter().enumerate() {
                        write_note(
                            xml,
                            track,
                            note,
                            event,
                            duration,
                            voice_number,
                            note_index > 0,
                        );
                    }
                }
                Event::Rest { .. } => write_rest(xml, duration, voice_number),
            }
            filled += duration;
        }

        if filled < measure_length {
            write_rest(xml, measure_length - filled, voice_number);
        }

        if voice_number < voice_count {
            xml.push_str("      <backup>\n");
            let _ = writeln!(xml, "        <duration>{}</duration>", measure_length);
            xml.push_str("      </backup>\n");
        }
    }

    xml.push_str("    </measure>\n");
}

fn write_attributes(xml: &mut String, document: &Document, track: &Track) {
    let string_count = document.string_count(track);

    xml.push_str("      <attributes>\n");
    let _ = writeln!(xml, "        <divisions>{}</divisions>", DIVISIONS);
    xml.push_str("        <key>\n          <fifths>0</fifths>\n        </key>\n");
    xml.push_str("        <time>\n");
    let _ = writeln!(
        xml,
        "          <beats>{}</beats>",
        document.header.time_signature.numerator
    );
    let _ = writeln!(
        xml,
        "          <beat-type>{}</beat-type>",
        document.header.time_signature.denominator
    );
    xml.push_str("        </time>\n");
    xml.push_str("        <clef>\n          <sign>TAB</sign>\n          <line>5</line>\n        </clef>\n");

    xml.push_str("        <staff-details>\n");
    let _ = writeln!(xml, "          <staff-lines>{}</staff-lines>", string_count);
    if let Some(tuning) = &track.tuning {
        // Staff line 1 is the lowest line; the tuning array is already
        // ordered low-to-high.
        for (line, pitch) in tuning.iter().enumerate() {
            if let Some(midi) = notes::pitch_to_midi(pitch) {
                let (step, alter, octave) = notes::midi_to_step_alter_octave(midi);
                let _ = writeln!(xml, "          <staff-tuning line=\"{}\">", line + 1);
                let _ = writeln!(xml, "            <tuning-step>{}</tuning-step>", step);
                if alter != 0 {
                    let _ = writeln!(xml, "            <tuning-alter>{}</tuning-alter>", alter);
                }
                let _ = writeln!(xml, "            <tuning-octave>{}</tuning-octave>", octave);
                xml.push_str("          </staff-tuning>\n");
            }
        }
    }
    if track.capo > 0 {
        let _ = writeln!(xml, "          <capo>{}</capo>", track.capo);
    }
    xml.push_str("        </staff-details>\n");
    xml.push_str("      </attributes>\n");
}

fn write_note(
    xml: &mut String,
    track: &Track,
    note: &NoteRef,
    event: &Event,
    duration: u32,
    voice_number: usize,
    chord_follower: bool,
) {
    let pitch = notes::resolve_pitch(track, note.string, note.fret);
    let pitch = match pitch {
        Some(pitch) if (0..=127).contains(&pitch) => pitch,
        // Unresolvable pitches degrade to rests so the measure keeps its length.
        _ => {
            if !chord_follower {
                write_rest(xml, duration, voice_number);
            }
            return;
        }
    };

    let note_duration = event.duration();
    let (step, alter, octave) = notes::midi_to_step_alter_octave(pitch);

    xml.push_str("      <note>\n");
    if chord_follower {
        xml.push_str("        <chord/>\n");
    }
    xml.push_str("        <pitch>\n");
    let _ = writeln!(xml, "          <step>{}</step>", step);
    if alter != 0 {
        let _ = writeln!(xml, "          <alter>{}</alter>", alter);
    }
    let _ = writeln!(xml, "          <octave>{}</octave>", octave);
    xml.push_str("        </pitch>\n");
    let _ = writeln!(xml, "        <duration>{}</duration>", duration);
    let _ = writeln!(xml, "        <voice>{}</voice>", voice_number);
    let _ = writeln!(
        xml,
        "        <type>{}</type>",
        note_duration.base.musicxml_type()
    );
    for _ in 0..note_duration.dots {
        xml.push_str("        <dot/>\n");
    }
    if let Some(tuplet) = note_duration.tuplet {
        xml.push_str("        <time-modification>\n");
        let _ = writeln!(xml, "          <actual-notes>{}</actual-notes>", tuplet);
        xml.push_str("          <normal-notes>2</normal-notes>\n");
        xml.push_str("        </time-modification>\n");
    }
    xml.push_str("        <staff>1</staff>\n");
    xml.push_str("        <notations>\n          <technical>\n");
    let _ = writeln!(xml, "            <string>{}</string>", note.string);
    let _ = writeln!(xml, "            <fret>{}</fret>", note.fret);
    xml.push_str("          </technical>\n        </notations>\n");
    xml.push_str("      </note>\n");
}

fn write_rest(xml: &mut String, duration: u32, voice_number: usize) {
    if duration == 0 {
        return;
    }
    xml.push_str("      <note>\n");
    xml.push_str("        <rest/>\n");
    let _ = writeln!(xml, "        <duration>{}</duration>", duration);
    let _ = writeln!(xml, "        <voice>{}</voice>", voice_number);
    xml.push_str("        <staff>1</staff>\n");
    xml.push_str("      </note>\n");
}

fn escape_xml(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
        .replace('"', "&quot;")
}
