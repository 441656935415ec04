//! Fixed-width ASCII tab rendering.
//!
//! One block per track, string 1 (the highest) on top. Rhythm is not
//! represented in this view; every event takes one column, padded with `-`
//! to the widest fret in that column, with a single `-` between columns.

use std::fmt::Write;

use crate::model::{Document, Event, Track};

pub fn generate_ascii(document: &Document) -> String {
    let mut out = String::new();

    for (track_index, track) in document.tracks.iter().enumerate() {
        if track_index > 0 {
            out.push('\n');
        }
        render_track(document, track, &mut out);
    }

    out
}

fn render_track(document: &Document, track: &Track, out: &mut String) {
    let string_count = document.string_count(track);
    let labels = string_labels(track, string_count);
    let label_width = labels.iter().map(String::len).max().unwrap_or(0);

    let name = track.name.as_ref().unwrap_or(&track.id);
    let _ = writeln!(out, "# Track: {}", name);

    for measure in &document.measures {
        let track_measure = match measure.tracks.get(&track.id) {
            Some(track_measure) => track_measure,
            None => continue,
        };

        // Voices collapse into one stream here; the view has no rhythm axis
        // to separate them on.
        let events: Vec<&Event> = track_measure
            .voices
            .values()
            .flat_map(|events| events.iter())
            .collect();

        let _ = writeln!(out, "// m{}", measure.index);

        let mut rows = vec![String::new(); string_count];
        for (event_index, event) in events.iter().enumerate() {
            let width = column_width(event);
            for (row_index, row) in rows.iter_mut().enumerate() {
                if event_index > 0 {
                    row.push('-');
                }
                let string = (row_index + 1) as u32;
                row.push_str(&cell(event, string, width));
            }
        }

        for (row_index, row) in rows.iter().enumerate() {
            let _ = writeln!(
                out,
                "{:<width$} |{}|",
                labels[row_index],
                row,
                width = label_width
            );
        }
    }
}

fn string_labels(track: &Track, string_count: usize) -> Vec<String> {
    match &track.tuning {
        Some(tuning) => tuning.iter().rev().cloned().collect(),
        None => (1..=string_count).map(|s| format!("S{}", s)).collect(),
    }
}

fn column_width(event: &Event) -> usize {
    match event {
        Event::Note { note, .. } => digit_width(note.fret),
        Event::Chord { notes, .. } => notes
            .iter()
            .map(|note| digit_width(note.fret))
            .max()
            .unwrap_or(1),
        Event::Rest { .. } => 1,
    }
}

fn digit_width(fret: u32) -> usize {
    fret.to_string().len()
}

fn cell(event: &Event, string: u32, width: usize) -> String {
    let fret = match event {
        Event::Note { note, .. } if note.string == string => Some(note.fret),
        Event::Chord { notes, .. } => notes
            .iter()
            .find(|note| note.string == string)
            .map(|note| note.fret),
        _ => None,
    };

    match fret {
        Some(fret) => format!("{:-<width$}", fret, width = width),
        None => "-".repeat(width),
    }
}
