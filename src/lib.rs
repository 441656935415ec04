//! OpenTab: plain-text guitar tablature as structured musical data.
//!
//! The pipeline is text in, document tree in the middle, codecs out:
//! parse `.otab` source into a [`model::Document`], validate it, and encode
//! it as ASCII tab, a Standard MIDI File, MusicXML or SVG. Importers run the
//! other way, recovering OpenTab source from free-form tab text or Guitar
//! Pro archives.

#[cfg(test)]
#[macro_use]
extern crate pretty_assertions;

#[macro_use]
extern crate failure;
#[macro_use]
extern crate lazy_static;

pub mod ascii_generation;
pub mod colors;
pub mod diagnostics;
pub mod error;
pub mod formatting;
pub mod importing;
pub mod midi_generation;
pub mod model;
pub mod musicxml_generation;
pub mod notes;
pub mod parsing;
pub mod schema;
pub mod svg_generation;
mod tokenize;

use failure::Error;

pub use crate::importing::ascii::{AsciiImport, RhythmStrategy};
pub use crate::importing::gpx::GpxImport;
pub use crate::midi_generation::data::{MidiGenerationOptions, MidiOutput};

/// Parse OpenTab source and gate the result through the schema validator.
pub fn parse_document(
    source: &str,
    filename: Option<&str>,
) -> Result<model::Document, Error> {
    let document = parsing::parse(source, filename)?;

    let schema_errors = schema::validate(&document);
    if !schema_errors.is_empty() {
        let details = schema_errors
            .iter()
            .map(|error| format!("{}: {}", error.path, error.message))
            .collect::<Vec<_>>()
            .join("; ");
        return Err(failure::err_msg(format!(
            "Document failed schema validation: {}",
            details
        )));
    }

    Ok(document)
}

/// Canonicalize OpenTab source text. Comments and unknown keys survive.
pub fn format_source(source: &str) -> String {
    formatting::format(source)
}

/// Diagnostics over raw text for editor integration. Never fails.
pub fn validate_source(source: &str) -> Vec<diagnostics::Diagnostic> {
    diagnostics::validate_source(source)
}

pub fn compile_to_ascii(source: &str, filename: Option<&str>) -> Result<String, Error> {
    let document = parse_document(source, filename)?;
    Ok(ascii_generation::generate_ascii(&document))
}

pub fn compile_to_midi(
    source: &str,
    filename: Option<&str>,
    options: &MidiGenerationOptions,
) -> Result<MidiOutput, Error> {
    let document = parse_document(source, filename)?;
    Ok(midi_generation::generate_midi(&document, options))
}

pub fn compile_to_musicxml(source: &str, filename: Option<&str>) -> Result<String, Error> {
    let document = parse_document(source, filename)?;
    Ok(musicxml_generation::generate_musicxml(&document))
}

pub fn compile_to_svg(source: &str, filename: Option<&str>) -> Result<String, Error> {
    let document = parse_document(source, filename)?;
    Ok(svg_generation::generate_svg(&document))
}

/// Recover OpenTab source from free-form ASCII tab. Always succeeds; every
/// ambiguity becomes a warning on the result.
pub fn import_ascii_tab(text: &str, strategy: RhythmStrategy) -> AsciiImport {
    importing::ascii::import_ascii(text, strategy)
}

/// Import a Guitar Pro `.gpx` archive.
pub fn import_gpx_archive(bytes: &[u8]) -> Result<GpxImport, Error> {
    Ok(importing::gpx::import_gpx(bytes)?)
}

#[cfg(test)]
mod tests {
    use super::*;

    const SAMPLE: &str = r#"format="opentab"
version="0.1"
tempo_bpm=120
time_signature="4/4"

[[tracks]]
id="gtr1"
tuning=["E2", "A2", "D3", "G3", "B3", "E4"]
---
@track gtr1
m1: | q (6:3) (5:5) |
"#;

    #[test]
    fn parse_document_gates_through_schema() {
        let bad = SAMPLE.replace("(6:3)", "(9:3)");
        let error = parse_document(&bad, None).unwrap_err().to_string();
        assert!(error.contains("schema validation"));
    }

    #[test]
    fn round_trip_through_canonical_writer() {
        let document = parse_document(SAMPLE, None).unwrap();
        let rewritten = document.to_source();
        let reparsed = parse_document(&rewritten, None).unwrap();
        assert_eq!(document, reparsed);
        assert_eq!(format_source(&rewritten), format_source(SAMPLE));
    }

    #[test]
    fn compile_entry_points_agree_on_errors() {
        let broken = "no delimiter here";
        assert!(compile_to_ascii(broken, None).is_err());
        assert!(compile_to_midi(broken, None, &MidiGenerationOptions::default()).is_err());
        assert!(compile_to_musicxml(broken, None).is_err());
        assert!(compile_to_svg(broken, None).is_err());
    }

    #[test]
    fn imported_ascii_parses_and_validates() {
        let tab = "e|--1--|\nB|-----|\nG|-----|\nD|-----|\nA|-----|\nE|-3---|\n";
        let import = import_ascii_tab(tab, RhythmStrategy::Unknown);
        let document = parse_document(&import.source, None).unwrap();
        assert_eq!(document.tracks[0].id, "gtr1");
    }
}
