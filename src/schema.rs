//! Structural validation of a document tree.
//!
//! Pure checks over an already-parsed document: required fields, enums in
//! range, tuning spellings, string indices. Grammar-level facts are the
//! parser's job and are not re-checked here. Documents crossing an API
//! boundary go through this gate.

use std::collections::BTreeSet;

use crate::model::{Document, Event, NoteRef, VALID_DENOMINATORS};
use crate::notes;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SchemaError {
    pub path: String,
    pub message: String,
}

impl SchemaError {
    fn new(path: String, message: String) -> SchemaError {
        SchemaError { path, message }
    }
}

/// Validate a document. An empty result means the document conforms.
pub fn validate(document: &Document) -> Vec<SchemaError> {
    let mut errors = Vec::new();

    validate_header(document, &mut errors);
    validate_tracks(document, &mut errors);
    validate_measures(document, &mut errors);

    errors
}

fn validate_header(document: &Document, errors: &mut Vec<SchemaError>) {
    let header = &document.header;

    if header.format != "opentab" {
        errors.push(SchemaError::new(
            "header.format".to_owned(),
            format!("unsupported format `{}`", header.format),
        ));
    }
    if header.version != "0.1" {
        errors.push(SchemaError::new(
            "header.version".to_owned(),
            format!("unsupported version `{}`", header.version),
        ));
    }
    if header.tempo_bpm == 0 {
        errors.push(SchemaError::new(
            "header.tempo_bpm".to_owned(),
            "tempo must be positive".to_owned(),
        ));
    }
    if header.time_signature.numerator < 1 {
        errors.push(SchemaError::new(
            "header.time_signature".to_owned(),
            "numerator must be at least 1".to_owned(),
        ));
    }
    if !VALID_DENOMINATORS.contains(&header.time_signature.denominator) {
        errors.push(SchemaError::new(
            "header.time_signature".to_owned(),
            format!(
                "denominator `{}` is not one of 1, 2, 4, 8, 16, 32",
                header.time_signature.denominator
            ),
        ));
    }
}

fn validate_tracks(document: &Document, errors: &mut Vec<SchemaError>) {
    let mut seen = BTreeSet::new();

    for (index, track) in document.tracks.iter().enumerate() {
        let path = format!("tracks[{}]", index);

        if track.id.is_empty() {
            errors.push(SchemaError::new(
                format!("{}.id", path),
                "track id must be non-empty".to_owned(),
            ));
        }
        if !seen.insert(&track.id) {
            errors.push(SchemaError::new(
                format!("{}.id", path),
                format!("duplicate track id `{}`", track.id),
            ));
        }

        if let Some(tuning) = &track.tuning {
            for (string_index, pitch) in tuning.iter().enumerate() {
                if !notes::is_pitch_name(pitch) {
                    errors.push(SchemaError::new(
                        format!("{}.tuning[{}]", path, string_index),
                        format!("`{}` is not a pitch name", pitch),
                    ));
                }
            }
        }
    }
}

fn validate_measures(document: &Document, errors: &mut Vec<SchemaError>) {
    let mut seen_indices = BTreeSet::new();

    for (position, measure) in document.measures.iter().enumerate() {
        let path = format!("measures[{}]", position);

        if measure.index < 1 {
            errors.push(SchemaError::new(
                format!("{}.index", path),
                "measure index must be positive".to_owned(),
            ));
        }
        if !seen_indices.insert(measure.index) {
            errors.push(SchemaError::new(
                format!("{}.index", path),
                format!("duplicate measure index {}", measure.index),
            ));
        }

        for (track_id, track_measure) in &measure.tracks {
            let string_count = document
                .track(track_id)
                .and_then(|track| track.tuning.as_ref())
                .map(Vec::len);

            for (voice_id, events) in &track_measure.voices {
                for (event_index, event) in events.iter().enumerate() {
                    let event_path = format!(
                        "{}.{}.{}[{}]",
                        path, track_id, voice_id, event_index
                    );
                    validate_event(event, string_count, &event_path, errors);
                }
            }
        }
    }
}

fn validate_event(
    event: &Event,
    string_count: Option<usize>,
    path: &str,
    errors: &mut Vec<SchemaError>,
) {
    let duration = event.duration();
    if duration.dots > 2 {
        errors.push(SchemaError::new(
            format!("{}.duration", path),
            format!("{} dots exceed the maximum of 2", duration.dots),
        ));
    }
    if let Some(tuplet) = duration.tuplet {
        if tuplet < 2 {
            errors.push(SchemaError::new(
                format!("{}.duration", path),
                format!("tuplet denominator {} must be at least 2", tuplet),
            ));
        }
    }

    match event {
        Event::Note { note, .. } => validate_note(note, string_count, path, errors),
        Event::Chord { notes, .. } => {
            if notes.is_empty() {
                errors.push(SchemaError::new(
                    path.to_owned(),
                    "chord must contain at least one note".to_owned(),
                ));
            }
            for note in notes {
                validate_note(note, string_count, path, errors);
            }
        }
        Event::Rest { .. } => (),
    }
}

fn validate_note(
    note: &NoteRef,
    string_count: Option<usize>,
    path: &str,
    errors: &mut Vec<SchemaError>,
) {
    if note.string < 1 {
        errors.push(SchemaError::new(
            path.to_owned(),
            "string index must be at least 1".to_owned(),
        ));
    }
    if let Some(count) = string_count {
        if note.string as usize > count {
            errors.push(SchemaError::new(
                path.to_owned(),
                format!(
                    "string {} is outside the track's {} declared strings",
                    note.string, count
                ),
            ));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parsing;

    fn sample() -> Document {
        parsing::parse(
            r#"format="opentab"
version="0.1"

[[tracks]]
id="gtr1"
tuning=["E2","A2","D3","G3","B3","E4"]
---
@track gtr1
m1: | q (6:3) (1:0) |
"#,
            None,
        )
        .unwrap()
    }

    #[test]
    fn valid_document_passes() {
        assert_eq!(validate(&sample()), vec![]);
    }

    #[test]
    fn bad_tuning_is_reported() {
        let mut document = sample();
        document.tracks[0].tuning = Some(vec!["E2".to_owned(), "X9".to_owned()]);

        let errors = validate(&document);
        assert_eq!(errors.len(), 1);
        assert_eq!(errors[0].path, "tracks[0].tuning[1]");
    }

    #[test]
    fn string_out_of_range_is_reported() {
        let mut document = sample();
        document.tracks[0].tuning = Some(vec!["E2".to_owned(), "A2".to_owned()]);

        let errors = validate(&document);
        assert!(errors
            .iter()
            .any(|error| error.message.contains("outside the track's 2 declared strings")));
    }

    #[test]
    fn undeclared_tuning_leaves_strings_unconstrained() {
        let mut document = sample();
        document.tracks[0].tuning = None;
        assert_eq!(validate(&document), vec![]);
    }

    #[test]
    fn zero_tempo_is_reported() {
        let mut document = sample();
        document.header.tempo_bpm = 0;
        let errors = validate(&document);
        assert_eq!(errors[0].path, "header.tempo_bpm");
    }

    #[test]
    fn excessive_dots_are_reported() {
        let mut document = sample();
        if let Event::Note { duration, .. } = &mut document.measures[0]
            .tracks
            .get_mut("gtr1")
            .unwrap()
            .voices
            .get_mut("v1")
            .unwrap()[0]
        {
            duration.dots = 3;
        }
        let errors = validate(&document);
        assert!(errors[0].message.contains("dots"));
    }
}
