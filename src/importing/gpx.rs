//! Guitar Pro archive import.
//!
//! A `.gpx` file is a zip archive containing a GPIF XML score. The score
//! references its `Bars`, `Voices`, `Beats`, `Notes` and `Rhythms` through
//! top-level id collections, so those are mapped up front and followed
//! lazily while walking tracks. Effects are recognized but not carried over;
//! each distinct one produces a warning.

use std::collections::{BTreeMap, BTreeSet, HashMap};
use std::fmt::Write as FmtWrite;
use std::io::{Cursor, Read};

use roxmltree::{Document as XmlDocument, Node};

use crate::formatting;
use crate::model::VALID_DENOMINATORS;
use crate::notes;

use super::quote;

#[derive(Debug, Fail)]
pub enum GpxImportError {
    #[fail(display = "No .gpif score found in the archive.")]
    MissingGpif,

    #[fail(display = "Could not read the archive: {}", message)]
    Archive { message: String },

    #[fail(display = "Could not parse the score XML: {}", message)]
    Xml { message: String },
}

#[derive(Debug, Clone)]
pub struct GpxImport {
    pub source: String,
    pub warnings: Vec<String>,
}

pub fn import_gpx(bytes: &[u8]) -> Result<GpxImport, GpxImportError> {
    let xml = extract_gpif(bytes)?;
    import_gpif(&xml)
}

/// Pull the `.gpif` entry out of the archive.
pub fn extract_gpif(bytes: &[u8]) -> Result<String, GpxImportError> {
    let mut archive =
        zip::ZipArchive::new(Cursor::new(bytes)).map_err(|error| GpxImportError::Archive {
            message: error.to_string(),
        })?;

    let name = archive
        .file_names()
        .find(|name| name.ends_with(".gpif"))
        .map(str::to_owned)
        .ok_or(GpxImportError::MissingGpif)?;

    let mut entry = archive
        .by_name(&name)
        .map_err(|error| GpxImportError::Archive {
            message: error.to_string(),
        })?;

    let mut xml = String::new();
    entry
        .read_to_string(&mut xml)
        .map_err(|error| GpxImportError::Archive {
            message: error.to_string(),
        })?;

    Ok(xml)
}

/// Convert a GPIF score document to OpenTab source.
pub fn import_gpif(xml: &str) -> Result<GpxImport, GpxImportError> {
    let document = XmlDocument::parse(xml).map_err(|error| GpxImportError::Xml {
        message: error.to_string(),
    })?;
    let root = document.root_element();

    let mut warnings: Vec<String> = Vec::new();
    let mut ignored_effects: BTreeSet<String> = BTreeSet::new();

    let bars = id_map(root, "Bars", "Bar");
    let voices = id_map(root, "Voices", "Voice");
    let beats = id_map(root, "Beats", "Beat");
    let score_notes = id_map(root, "Notes", "Note");
    let rhythms = id_map(root, "Rhythms", "Rhythm");

    let title = root
        .descendants()
        .find(|node| node.has_tag_name("Score"))
        .and_then(|score| child_text(score, "Title"))
        .filter(|title| !title.is_empty());

    let tempo_bpm = find_tempo(root).unwrap_or(120);
    let time_signature = find_time_signature(root, &mut warnings);

    let tracks = collect_tracks(root);

    // tokens_per_voice[track][voice] is a list of (measure index, content).
    let mut tokens_per_voice: Vec<BTreeMap<usize, Vec<(usize, String)>>> =
        vec![BTreeMap::new(); tracks.len()];

    let master_bars: Vec<Node> = root
        .descendants()
        .filter(|node| node.has_tag_name("MasterBar"))
        .collect();

    for (measure_number, master_bar) in master_bars.iter().enumerate() {
        let bar_ids = id_list(*master_bar, "Bars");

        for (track_index, bar_id) in bar_ids.iter().enumerate().take(tracks.len()) {
            let bar = match bars.get(bar_id.as_str()) {
                Some(bar) => bar,
                None => continue,
            };

            let string_count = tracks[track_index]
                .tuning
                .as_ref()
                .map(Vec::len)
                .unwrap_or(6) as u32;

            let voice_ids: Vec<String> = id_list(*bar, "Voices")
                .into_iter()
                .filter(|id| id != "-1")
                .collect();

            for (voice_index, voice_id) in voice_ids.iter().enumerate() {
                let voice = match voices.get(voice_id.as_str()) {
                    Some(voice) => voice,
                    None => continue,
                };

                let mut tokens: Vec<String> = Vec::new();
                for beat_id in id_list(*voice, "Beats") {
                    let beat = match beats.get(beat_id.as_str()) {
                        Some(beat) => beat,
                        None => continue,
                    };

                    tokens.push(rhythm_token(*beat, &rhythms).unwrap_or_else(|| "q".to_owned()));

                    collect_effects(*beat, &mut ignored_effects);

                    let note_tokens: Vec<String> = id_list(*beat, "Notes")
                        .iter()
                        .filter_map(|note_id| score_notes.get(note_id.as_str()))
                        .filter_map(|note| {
                            note_token(*note, string_count, &mut ignored_effects)
                        })
                        .collect();

                    match note_tokens.len() {
                        0 => tokens.push("r".to_owned()),
                        1 => tokens.extend(note_tokens),
                        _ => tokens.push(format!("[ {} ]", note_tokens.join(" "))),
                    }
                }

                tokens_per_voice[track_index]
                    .entry(voice_index)
                    .or_insert_with(Vec::new)
                    .push((measure_number + 1, tokens.join(" ")));
            }
        }
    }

    for effect in &ignored_effects {
        warnings.push(format!("ignoring effect `{}`", effect));
    }

    let mut source = String::new();
    let _ = writeln!(source, "format=\"opentab\"");
    let _ = writeln!(source, "version=\"0.1\"");
    if let Some(title) = &title {
        let _ = writeln!(source, "title={}", quote(title));
    }
    let _ = writeln!(source, "tempo_bpm={}", tempo_bpm);
    let _ = writeln!(
        source,
        "time_signature=\"{}/{}\"",
        time_signature.0, time_signature.1
    );
    let _ = writeln!(source, "imported_from=\"gpx\"");

    for (index, track) in tracks.iter().enumerate() {
        let _ = writeln!(source, "\n[[tracks]]");
        let _ = writeln!(source, "id=\"gp{}\"", index + 1);
        if let Some(name) = &track.name {
            let _ = writeln!(source, "name={}", quote(name));
        }
        if let Some(tuning) = &track.tuning {
            let pitches = tuning
                .iter()
                .map(|pitch| quote(pitch))
                .collect::<Vec<_>>()
                .join(", ");
            let _ = writeln!(source, "tuning=[{}]", pitches);
        }
        if track.capo > 0 {
            let _ = writeln!(source, "capo={}", track.capo);
        }
    }

    let _ = writeln!(source, "\n---");

    for (track_index, voices) in tokens_per_voice.iter().enumerate() {
        for (voice_index, measures) in voices {
            if *voice_index == 0 {
                let _ = writeln!(source, "\n@track gp{}", track_index + 1);
            } else {
                let _ = writeln!(
                    source,
                    "\n@track gp{} voice v{}",
                    track_index + 1,
                    voice_index + 1
                );
            }
            for (measure_number, content) in measures {
                if content.is_empty() {
                    let _ = writeln!(source, "m{}: | |", measure_number);
                } else {
                    let _ = writeln!(source, "m{}: | {} |", measure_number, content);
                }
            }
        }
    }

    Ok(GpxImport {
        source: formatting::format(&source),
        warnings,
    })
}

struct GpTrack {
    name: Option<String>,
    tuning: Option<Vec<String>>,
    capo: u32,
}

fn collect_tracks(root: Node) -> Vec<GpTrack> {
    let tracks_node = root
        .children()
        .find(|node| node.has_tag_name("Tracks"));

    let mut tracks = Vec::new();
    if let Some(tracks_node) = tracks_node {
        for track in tracks_node
            .children()
            .filter(|node| node.has_tag_name("Track"))
        {
            let name = child_text(track, "Name").filter(|name| !name.is_empty());

            let tuning = track
                .descendants()
                .find(|node| {
                    node.has_tag_name("Property") && node.attribute("name") == Some("Tuning")
                })
                .and_then(|property| child_text(property, "Pitches"))
                .map(|pitches| {
                    pitches
                        .split_whitespace()
                        .filter_map(|token| token.parse::<i32>().ok())
                        .map(notes::midi_to_name)
                        .collect::<Vec<_>>()
                })
                .filter(|tuning| !tuning.is_empty());

            let capo = track
                .descendants()
                .find(|node| {
                    node.has_tag_name("Property") && node.attribute("name") == Some("CapoFret")
                })
                .and_then(|property| child_text(property, "Fret"))
                .and_then(|fret| fret.parse().ok())
                .unwrap_or(0);

            tracks.push(GpTrack { name, tuning, capo });
        }
    }

    tracks
}

fn id_map<'a, 'input>(
    root: Node<'a, 'input>,
    collection: &str,
    item: &str,
) -> HashMap<String, Node<'a, 'input>> {
    let mut map = HashMap::new();

    if let Some(collection_node) = root
        .children()
        .find(|node| node.has_tag_name(collection))
    {
        for node in collection_node.children() {
            if node.has_tag_name(item) {
                if let Some(id) = node.attribute("id") {
                    map.insert(id.to_owned(), node);
                }
            }
        }
    }

    map
}

fn child_text(node: Node, name: &str) -> Option<String> {
    node.children()
        .find(|child| child.has_tag_name(name))
        .and_then(|child| child.text())
        .map(|text| text.trim().to_owned())
}

/// Space-separated id references in a child element, e.g. `<Bars>0 1</Bars>`.
fn id_list(node: Node, name: &str) -> Vec<String> {
    child_text(node, name)
        .map(|text| text.split_whitespace().map(str::to_owned).collect())
        .unwrap_or_default()
}

fn find_tempo(root: Node) -> Option<u32> {
    let automation = root.descendants().find(|node| {
        node.has_tag_name("Automation")
            && child_text(*node, "Type").as_deref() == Some("Tempo")
    })?;

    let value = child_text(automation, "Value")?;
    let first = value.split_whitespace().next()?;
    let bpm: f64 = first.parse().ok()?;
    if bpm < 1.0 {
        return None;
    }
    Some(bpm.round() as u32)
}

fn find_time_signature(root: Node, warnings: &mut Vec<String>) -> (u32, u32) {
    let time = root
        .descendants()
        .find(|node| node.has_tag_name("MasterBar"))
        .and_then(|master_bar| child_text(master_bar, "Time"));

    if let Some(time) = time {
        let mut parts = time.split('/');
        let numerator = parts.next().and_then(|n| n.trim().parse::<u32>().ok());
        let denominator = parts.next().and_then(|d| d.trim().parse::<u32>().ok());
        match (numerator, denominator) {
            (Some(numerator), Some(denominator))
                if numerator >= 1 && VALID_DENOMINATORS.contains(&denominator) =>
            {
                return (numerator, denominator);
            }
            _ => warnings.push(format!(
                "unsupported time signature `{}`; assuming 4/4",
                time
            )),
        }
    }

    (4, 4)
}

fn rhythm_token(beat: Node, rhythms: &HashMap<String, Node>) -> Option<String> {
    let reference = beat
        .children()
        .find(|node| node.has_tag_name("Rhythm"))?
        .attribute("ref")?;
    let rhythm = rhythms.get(reference)?;

    let base = match child_text(*rhythm, "NoteValue")?.as_str() {
        "Whole" | "1" => 'w',
        "Half" | "2" => 'h',
        "Quarter" | "4" => 'q',
        "Eighth" | "8" => 'e',
        "16th" | "Sixteenth" | "16" => 's',
        "32nd" | "ThirtySecond" | "32" => 't',
        _ => return None,
    };

    let mut token = base.to_string();

    let dots = rhythm
        .children()
        .find(|node| node.has_tag_name("AugmentationDot"))
        .and_then(|node| node.attribute("count"))
        .and_then(|count| count.parse::<usize>().ok())
        .unwrap_or(0);
    for _ in 0..dots.min(2) {
        token.push('.');
    }

    if let Some(tuplet) = rhythm
        .children()
        .find(|node| node.has_tag_name("PrimaryTuplet"))
        .and_then(|node| node.attribute("num"))
        .and_then(|num| num.parse::<u32>().ok())
    {
        if tuplet >= 2 {
            let _ = write!(token, "/{}", tuplet);
        }
    }

    Some(token)
}

fn note_token(
    note: Node,
    string_count: u32,
    ignored_effects: &mut BTreeSet<String>,
) -> Option<String> {
    let mut string: Option<u32> = None;
    let mut fret: Option<u32> = None;

    for property in note
        .descendants()
        .filter(|node| node.has_tag_name("Property"))
    {
        match property.attribute("name") {
            Some("String") => {
                string = child_text(property, "String").and_then(|s| s.parse().ok())
            }
            Some("Fret") => fret = child_text(property, "Fret").and_then(|f| f.parse().ok()),
            Some(other) => {
                ignored_effects.insert(other.to_owned());
            }
            None => (),
        }
    }

    // GPIF numbers strings from the lowest; the model numbers from the
    // highest.
    let gpif_string = string?;
    let fret = fret?;
    if gpif_string >= string_count {
        return None;
    }
    Some(format!("({}:{})", string_count - gpif_string, fret))
}

fn collect_effects(beat: Node, ignored_effects: &mut BTreeSet<String>) {
    for property in beat
        .children()
        .filter(|node| node.has_tag_name("Properties"))
        .flat_map(|properties| properties.children())
        .filter(|node| node.has_tag_name("Property"))
    {
        if let Some(name) = property.attribute("name") {
            ignored_effects.insert(name.to_owned());
        }
    }
}
