//! Text to document tree.
//!
//! The file splits at the first `---` line: a TOML-like header (key-value
//! pairs plus `[[tracks]]` array tables) followed by a body of directives and
//! measure lines. Durations inside a measure carry forward from the most
//! recent duration token; that state is resolved here, so every event in the
//! resulting document owns its duration.

pub mod error;

use std::collections::BTreeMap;

use regex::Regex;

use crate::error::{SourceInfo, SourceLoc, SourceMap};
use crate::model::{
    Annotations, AnnotationValue, Document, Duration, DurationBase, Event, Header, Measure,
    NoteRef, SlideDirection, Swing, Technique, TimeSignature, Track, TrackMeasure,
    VALID_DENOMINATORS,
};
use crate::tokenize::{
    self, grammar_regex, MatchedGroups, CHORD_TOKEN_REGEX, DURATION_TOKEN_REGEX,
    NOTE_TOKEN_REGEX, REST_TOKEN_REGEX,
};

use self::error::{ErrorType, ParseError};

lazy_static! {
    static ref KEY_VALUE_REGEX: Regex = grammar_regex(r"^([A-Za-z_][A-Za-z0-9_]*)\s*=\s*(.+)$");
    static ref TABLE_REGEX: Regex = grammar_regex(r"^\[\[\s*([A-Za-z_][A-Za-z0-9_]*)\s*\]\]$");
    static ref DIRECTIVE_REGEX: Regex = grammar_regex(
        r"^@track\s+([A-Za-z0-9_][A-Za-z0-9_.\-]*)(?:\s+voice\s+([A-Za-z0-9_][A-Za-z0-9_.\-]*))?$"
    );
    static ref MEASURE_LINE_REGEX: Regex = grammar_regex(r"^m(\d+):\s*\|(.*)\|\s*(?:#.*)?$");
    static ref MEASURE_PREFIX_REGEX: Regex = grammar_regex(r"^m\d*\s*:");
    static ref TECHNIQUE_REGEX: Regex = grammar_regex(r"([hp/\\])(\d+)|~");
    static ref ANNOTATION_PAIR_REGEX: Regex =
        grammar_regex(r"^([A-Za-z_][A-Za-z0-9_]*)\s*=\s*(.+)$");
    static ref IDENT_REGEX: Regex = grammar_regex(r"^[A-Za-z_][A-Za-z0-9_]*$");
}

pub fn parse(source: &str, filename: Option<&str>) -> Result<Document, ParseError> {
    let normalized = source.replace("\r\n", "\n");
    let info = SourceInfo::new(&normalized, filename);
    let lines: Vec<&str> = normalized.lines().collect();

    let delimiter = match lines.iter().position(|line| line.trim_end() == "---") {
        Some(index) => index,
        None => {
            return Err(ParseError::new(
                SourceLoc::new(&info, lines.len().max(1), 1, 1),
                ErrorType::MissingDelimiter,
            ))
        }
    };

    let (header, mut tracks) = parse_header(&lines[..delimiter], &info)?;
    let measures = parse_body(&lines[delimiter + 1..], delimiter + 1, &info, &mut tracks)?;

    Ok(Document {
        header,
        tracks,
        measures,
    })
}

/// A TOML-subset value: quoted string, boolean, integer, float or flat array.
#[derive(Debug, Clone, PartialEq)]
enum Value {
    Str(String),
    Bool(bool),
    Int(i64),
    Float(f64),
    Array(Vec<Value>),
}

fn unquote(text: &str) -> Option<String> {
    if text.len() < 2 || !text.starts_with('"') || !text.ends_with('"') {
        return None;
    }

    let inner = &text[1..text.len() - 1];
    let mut result = String::with_capacity(inner.len());
    let mut chars = inner.chars();

    while let Some(c) = chars.next() {
        match c {
            '"' => return None,
            '\\' => match chars.next()? {
                '"' => result.push('"'),
                '\\' => result.push('\\'),
                other => {
                    result.push('\\');
                    result.push(other);
                }
            },
            other => result.push(other),
        }
    }

    Some(result)
}

/// Split on commas that are outside quotes and brackets.
fn split_top_level_commas(text: &str) -> Vec<&str> {
    let mut parts = Vec::new();
    let mut depth = 0usize;
    let mut in_quotes = false;
    let mut escaped = false;
    let mut start = 0;

    for (index, c) in text.char_indices() {
        if escaped {
            escaped = false;
            continue;
        }
        match c {
            '\\' if in_quotes => escaped = true,
            '"' => in_quotes = !in_quotes,
            '[' | '(' | '{' if !in_quotes => depth += 1,
            ']' | ')' | '}' if !in_quotes => depth = depth.saturating_sub(1),
            ',' if !in_quotes && depth == 0 => {
                parts.push(&text[start..index]);
                start = index + 1;
            }
            _ => (),
        }
    }

    parts.push(&text[start..]);
    parts
}

fn parse_value(text: &str) -> Option<Value> {
    let text = text.trim();

    if text.starts_with('"') {
        return unquote(text).map(Value::Str);
    }

    match text {
        "true" => return Some(Value::Bool(true)),
        "false" => return Some(Value::Bool(false)),
        _ => (),
    }

    if text.starts_with('[') && text.ends_with(']') {
        let inner = text[1..text.len() - 1].trim();
        if inner.is_empty() {
            return Some(Value::Array(Vec::new()));
        }
        let items = split_top_level_commas(inner)
            .into_iter()
            .map(parse_value)
            .collect::<Option<Vec<_>>>()?;
        return Some(Value::Array(items));
    }

    if let Ok(n) = text.parse::<i64>() {
        return Some(Value::Int(n));
    }
    if let Ok(n) = text.parse::<f64>() {
        return Some(Value::Float(n));
    }

    None
}

fn value_to_annotation(value: Value, raw: &str) -> AnnotationValue {
    match value {
        Value::Str(s) => AnnotationValue::Str(s),
        Value::Bool(b) => AnnotationValue::Bool(b),
        Value::Int(n) => AnnotationValue::Num(n as f64),
        Value::Float(n) => AnnotationValue::Num(n),
        Value::Array(_) => AnnotationValue::Str(raw.trim().to_owned()),
    }
}

struct TrackEntry {
    table_line: usize,
    id: Option<String>,
    name: Option<String>,
    instrument: Option<String>,
    tuning: Option<Vec<String>>,
    capo: u32,
    extra: Annotations,
}

impl TrackEntry {
    fn new(table_line: usize) -> TrackEntry {
        TrackEntry {
            table_line,
            id: None,
            name: None,
            instrument: None,
            tuning: None,
            capo: 0,
            extra: Annotations::new(),
        }
    }
}

fn parse_header(
    lines: &[&str],
    info: &SourceMap,
) -> Result<(Header, Vec<Track>), ParseError> {
    let mut header = Header::default();
    let mut entries: Vec<TrackEntry> = Vec::new();
    let mut current: Option<TrackEntry> = None;
    let mut seen_format = false;
    let mut seen_version = false;

    for (index, line) in lines.iter().enumerate() {
        let line_no = index + 1;
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }

        let col = line.len() - line.trim_start().len() + 1;
        let loc = SourceLoc::new(info, line_no, col, trimmed.len());

        if trimmed.starts_with('@') {
            let directive = trimmed.split_whitespace().next().unwrap_or(trimmed).to_owned();
            return Err(ParseError::new(loc, ErrorType::DirectiveInHeader { directive }));
        }

        if let Some(captures) = TABLE_REGEX.captures(trimmed) {
            let name = captures.group(1).as_str();
            if name != "tracks" {
                return Err(ParseError::new(
                    loc,
                    ErrorType::UnknownTable {
                        name: name.to_owned(),
                    },
                ));
            }
            if let Some(entry) = current.take() {
                entries.push(entry);
            }
            current = Some(TrackEntry::new(line_no));
            continue;
        }

        let captures = match KEY_VALUE_REGEX.captures(trimmed) {
            Some(captures) => captures,
            None => {
                return Err(ParseError::new(
                    loc,
                    ErrorType::InvalidHeaderLine {
                        text: trimmed.to_owned(),
                    },
                ))
            }
        };

        let key = captures.group(1).as_str();
        let raw = captures.group(2).as_str();
        let value = match parse_value(raw) {
            Some(value) => value,
            None => {
                return Err(ParseError::new(
                    loc,
                    ErrorType::InvalidHeaderValue {
                        key: key.to_owned(),
                        value: raw.trim().to_owned(),
                        expected: "a quoted string, number, boolean or array",
                    },
                ))
            }
        };

        let invalid = |expected: &'static str| {
            ParseError::new(
                SourceLoc::new(info, line_no, col, trimmed.len()),
                ErrorType::InvalidHeaderValue {
                    key: key.to_owned(),
                    value: raw.trim().to_owned(),
                    expected,
                },
            )
        };

        if let Some(entry) = current.as_mut() {
            match key {
                "id" => match value {
                    Value::Str(ref s) if !s.is_empty() => entry.id = Some(s.clone()),
                    _ => return Err(invalid("a non-empty string")),
                },
                "name" => match value {
                    Value::Str(s) => entry.name = Some(s),
                    _ => return Err(invalid("a string")),
                },
                "instrument" => match value {
                    Value::Str(s) => entry.instrument = Some(s),
                    _ => return Err(invalid("a string")),
                },
                "tuning" => match value {
                    Value::Array(items) => {
                        let mut tuning = Vec::with_capacity(items.len());
                        for item in items {
                            match item {
                                Value::Str(s) => tuning.push(s),
                                _ => return Err(invalid("an array of pitch strings")),
                            }
                        }
                        entry.tuning = Some(tuning);
                    }
                    _ => return Err(invalid("an array of pitch strings")),
                },
                "capo" => match value {
                    Value::Int(n) if n >= 0 => entry.capo = n as u32,
                    _ => return Err(invalid("a non-negative integer")),
                },
                _ => {
                    entry
                        .extra
                        .insert(key.to_owned(), value_to_annotation(value, raw));
                }
            }
            continue;
        }

        match key {
            "format" => match value {
                Value::Str(s) => {
                    if s != "opentab" {
                        return Err(ParseError::new(
                            loc,
                            ErrorType::UnsupportedFormat { found: s },
                        ));
                    }
                    header.format = s;
                    seen_format = true;
                }
                _ => return Err(invalid("a string")),
            },
            "version" => match value {
                Value::Str(s) => {
                    if s != "0.1" {
                        return Err(ParseError::new(
                            loc,
                            ErrorType::UnsupportedVersion { found: s },
                        ));
                    }
                    header.version = s;
                    seen_version = true;
                }
                _ => return Err(invalid("a string")),
            },
            "title" | "artist" | "album" | "composer" | "source" | "copyright" => {
                let s = match value {
                    Value::Str(s) => s,
                    _ => return Err(invalid("a string")),
                };
                match key {
                    "title" => header.title = Some(s),
                    "artist" => header.artist = Some(s),
                    "album" => header.album = Some(s),
                    "composer" => header.composer = Some(s),
                    "source" => header.source = Some(s),
                    "copyright" => header.copyright = Some(s),
                    _ => unreachable!(),
                }
            }
            "tempo_bpm" => match value {
                Value::Int(n) if n > 0 => header.tempo_bpm = n as u32,
                _ => return Err(invalid("a positive integer")),
            },
            "time_signature" => match value {
                Value::Str(ref s) => match parse_time_signature(s) {
                    Some(ts) => header.time_signature = ts,
                    None => {
                        return Err(ParseError::new(
                            loc,
                            ErrorType::InvalidTimeSignature {
                                value: s.clone(),
                            },
                        ))
                    }
                },
                _ => return Err(invalid("a string such as \"4/4\"")),
            },
            "swing" => match value {
                Value::Str(ref s) if s == "none" => header.swing = Swing::None,
                Value::Str(ref s) if s == "eighth" => header.swing = Swing::Eighth,
                _ => return Err(invalid("`none` or `eighth`")),
            },
            _ => {
                header
                    .extra
                    .insert(key.to_owned(), value_to_annotation(value, raw));
            }
        }
    }

    if let Some(entry) = current.take() {
        entries.push(entry);
    }

    if !seen_format {
        return Err(ParseError::new(
            SourceLoc::new(info, 1, 1, 1),
            ErrorType::MissingHeaderKey { key: "format" },
        ));
    }
    if !seen_version {
        return Err(ParseError::new(
            SourceLoc::new(info, 1, 1, 1),
            ErrorType::MissingHeaderKey { key: "version" },
        ));
    }

    let mut tracks: Vec<Track> = Vec::with_capacity(entries.len());
    for entry in entries {
        let loc = SourceLoc::new(info, entry.table_line, 1, "[[tracks]]".len());
        let id = match entry.id {
            Some(id) => id,
            None => {
                return Err(ParseError::new(loc, ErrorType::MissingHeaderKey { key: "id" }))
            }
        };
        if tracks.iter().any(|track| track.id == id) {
            return Err(ParseError::new(loc, ErrorType::DuplicateTrackId { id }));
        }
        tracks.push(Track {
            id,
            name: entry.name,
            instrument: entry.instrument,
            tuning: entry.tuning,
            capo: entry.capo,
            extra: entry.extra,
        });
    }

    Ok((header, tracks))
}

fn parse_time_signature(text: &str) -> Option<TimeSignature> {
    let mut parts = text.split('/');
    let numerator: u32 = parts.next()?.trim().parse().ok()?;
    let denominator: u32 = parts.next()?.trim().parse().ok()?;
    if parts.next().is_some() || numerator < 1 {
        return None;
    }
    if !VALID_DENOMINATORS.contains(&denominator) {
        return None;
    }
    Some(TimeSignature {
        numerator,
        denominator,
    })
}

fn parse_body(
    lines: &[&str],
    line_offset: usize,
    info: &SourceMap,
    tracks: &mut Vec<Track>,
) -> Result<Vec<Measure>, ParseError> {
    let mut active: Option<(String, String)> = None;
    let mut measures: BTreeMap<u32, BTreeMap<String, TrackMeasure>> = BTreeMap::new();

    for (index, line) in lines.iter().enumerate() {
        let line_no = line_offset + index + 1;
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }

        let leading = line.len() - line.trim_start().len();
        let loc = SourceLoc::new(info, line_no, leading + 1, trimmed.len());

        if trimmed.starts_with('@') {
            let captures = match DIRECTIVE_REGEX.captures(trimmed) {
                Some(captures) => captures,
                None => {
                    return Err(ParseError::new(
                        loc,
                        ErrorType::UnknownBodyLine {
                            text: trimmed.to_owned(),
                        },
                    ))
                }
            };

            let track_id = captures.group(1).as_str();
            let voice_id = captures.get(2).map(|m| m.as_str()).unwrap_or("v1");

            // An undeclared id gets an implicit track so incremental edits
            // keep parsing; the editor-facing validator flags it.
            if !tracks.iter().any(|track| track.id == track_id) {
                tracks.push(Track::with_id(track_id));
            }

            active = Some((track_id.to_owned(), voice_id.to_owned()));
            continue;
        }

        if let Some(captures) = MEASURE_LINE_REGEX.captures(trimmed) {
            let (track_id, voice_id) = match &active {
                Some(pair) => pair.clone(),
                None => {
                    return Err(ParseError::new(loc, ErrorType::MeasureBeforeDirective))
                }
            };

            let index_text = captures.group(1);
            let index: u32 = match index_text.as_str().parse() {
                Ok(n) if n >= 1 => n,
                _ => return Err(ParseError::new(loc, ErrorType::MalformedMeasure)),
            };

            let content = captures.group(2);
            let content_col0 = leading + content.start();
            let events =
                parse_measure_content(content.as_str(), line_no, content_col0, info)?;

            measures
                .entry(index)
                .or_insert_with(BTreeMap::new)
                .entry(track_id)
                .or_insert_with(TrackMeasure::default)
                .voices
                .insert(voice_id, events);
            continue;
        }

        if MEASURE_PREFIX_REGEX.is_match(trimmed) {
            return Err(ParseError::new(loc, ErrorType::MalformedMeasure));
        }

        return Err(ParseError::new(
            loc,
            ErrorType::UnknownBodyLine {
                text: trimmed.to_owned(),
            },
        ));
    }

    Ok(measures
        .into_iter()
        .map(|(index, tracks)| Measure { index, tracks })
        .collect())
}

fn parse_measure_content(
    content: &str,
    line_no: usize,
    content_col0: usize,
    info: &SourceMap,
) -> Result<Vec<Event>, ParseError> {
    let tokens = tokenize::split_tokens(content).map_err(|offset| {
        ParseError::new(
            SourceLoc::new(info, line_no, content_col0 + offset + 1, 1),
            ErrorType::UnbalancedBrackets,
        )
    })?;

    let mut events = Vec::new();
    let mut current: Option<Duration> = None;

    for token in tokens {
        let loc = SourceLoc::new(
            info,
            line_no,
            content_col0 + token.start + 1,
            token.text.len(),
        );

        if DURATION_TOKEN_REGEX.is_match(token.text) {
            current = Some(parse_duration_token(token.text, &loc)?);
            continue;
        }

        let duration = match current {
            Some(duration) => duration,
            None if tokenize::is_event_token(token.text) => {
                return Err(ParseError::new(
                    loc,
                    ErrorType::EventBeforeDuration {
                        token: token.text.to_owned(),
                    },
                ))
            }
            None => {
                return Err(ParseError::new(
                    loc,
                    ErrorType::UnknownToken {
                        token: token.text.to_owned(),
                    },
                ))
            }
        };

        if let Some(captures) = REST_TOKEN_REGEX.captures(token.text) {
            let annotations = match captures.get(1) {
                Some(m) => parse_annotations(m.as_str(), &loc)?,
                None => Annotations::new(),
            };
            events.push(Event::Rest {
                duration,
                annotations,
            });
        } else if NOTE_TOKEN_REGEX.is_match(token.text) {
            let (note, annotations) = parse_note_token(token.text, &loc)?;
            events.push(Event::Note {
                duration,
                note,
                annotations,
            });
        } else if let Some(captures) = CHORD_TOKEN_REGEX.captures(token.text) {
            let inner = captures.group(1);
            let annotations = match captures.get(2) {
                Some(m) => parse_annotations(m.as_str(), &loc)?,
                None => Annotations::new(),
            };

            let inner_tokens = tokenize::split_tokens(inner.as_str())
                .map_err(|offset| {
                    ParseError::new(
                        SourceLoc::new(
                            info,
                            line_no,
                            content_col0 + token.start + inner.start() + offset + 1,
                            1,
                        ),
                        ErrorType::UnbalancedBrackets,
                    )
                })?;

            if inner_tokens.is_empty() {
                return Err(ParseError::new(loc, ErrorType::EmptyChord));
            }

            let mut notes = Vec::with_capacity(inner_tokens.len());
            for inner_token in inner_tokens {
                let inner_loc = SourceLoc::new(
                    info,
                    line_no,
                    content_col0 + token.start + inner.start() + inner_token.start + 1,
                    inner_token.text.len(),
                );
                if !NOTE_TOKEN_REGEX.is_match(inner_token.text) {
                    return Err(ParseError::new(
                        inner_loc,
                        ErrorType::UnknownToken {
                            token: inner_token.text.to_owned(),
                        },
                    ));
                }
                let (note, note_annotations) =
                    parse_note_token(inner_token.text, &inner_loc)?;
                let mut note = note;
                note.annotations = note_annotations;
                notes.push(note);
            }

            events.push(Event::Chord {
                duration,
                notes,
                annotations,
            });
        } else {
            return Err(ParseError::new(
                loc,
                ErrorType::UnknownToken {
                    token: token.text.to_owned(),
                },
            ));
        }
    }

    Ok(events)
}

fn parse_duration_token(text: &str, loc: &SourceLoc) -> Result<Duration, ParseError> {
    let mut chars = text.chars();
    let base = match chars.next().and_then(DurationBase::from_token_char) {
        Some(base) => base,
        None => {
            return Err(ParseError::new(
                loc.clone(),
                ErrorType::UnknownToken {
                    token: text.to_owned(),
                },
            ))
        }
    };

    let rest = chars.as_str();
    let dots = rest.chars().take_while(|&c| c == '.').count() as u8;

    let tuplet = match rest.find('/') {
        Some(slash) => {
            let value: u32 = rest[slash + 1..].parse().map_err(|_| {
                ParseError::new(
                    loc.clone(),
                    ErrorType::UnknownToken {
                        token: text.to_owned(),
                    },
                )
            })?;
            if value < 2 {
                return Err(ParseError::new(
                    loc.clone(),
                    ErrorType::UnknownToken {
                        token: text.to_owned(),
                    },
                ));
            }
            Some(value)
        }
        None => None,
    };

    Ok(Duration { base, dots, tuplet })
}

fn parse_note_token(
    text: &str,
    loc: &SourceLoc,
) -> Result<(NoteRef, Annotations), ParseError> {
    let unknown = || {
        ParseError::new(
            loc.clone(),
            ErrorType::UnknownToken {
                token: text.to_owned(),
            },
        )
    };

    let captures = match NOTE_TOKEN_REGEX.captures(text) {
        Some(captures) => captures,
        None => return Err(unknown()),
    };

    let string: u32 = captures
        .group(1)
        .as_str()
        .parse()
        .map_err(|_| unknown())?;
    let fret: u32 = captures
        .group(2)
        .as_str()
        .parse()
        .map_err(|_| unknown())?;

    let mut techniques = Vec::new();
    let mut from_fret = fret;

    if let Some(chain) = captures.get(3) {
        for link in TECHNIQUE_REGEX.captures_iter(chain.as_str()) {
            // A link is either `<kind><fret>` or the bare vibrato mark.
            if let (Some(kind), Some(target)) = (link.get(1), link.get(2)) {
                let to_fret: u32 = target.as_str().parse().map_err(|_| unknown())?;
                let technique = match kind.as_str() {
                    "h" => Technique::HammerOn { from_fret, to_fret },
                    "p" => Technique::PullOff { from_fret, to_fret },
                    "/" => Technique::Slide {
                        direction: SlideDirection::Up,
                        from_fret,
                        to_fret,
                    },
                    "\\" => Technique::Slide {
                        direction: SlideDirection::Down,
                        from_fret,
                        to_fret,
                    },
                    _ => unreachable!(),
                };
                techniques.push(technique);
                from_fret = to_fret;
            } else {
                techniques.push(Technique::Vibrato);
            }
        }
    }

    let annotations = match captures.get(4) {
        Some(m) => parse_annotations(m.as_str(), loc)?,
        None => Annotations::new(),
    };

    Ok((
        NoteRef {
            string,
            fret,
            techniques,
            annotations: Annotations::new(),
        },
        annotations,
    ))
}

fn parse_annotations(text: &str, loc: &SourceLoc) -> Result<Annotations, ParseError> {
    let inner = text[1..text.len() - 1].trim();
    let mut annotations = Annotations::new();

    if inner.is_empty() {
        return Ok(annotations);
    }

    for part in split_top_level_commas(inner) {
        let part = part.trim();
        if part.is_empty() {
            continue;
        }

        let captures = ANNOTATION_PAIR_REGEX.captures(part).ok_or_else(|| {
            ParseError::new(
                loc.clone(),
                ErrorType::InvalidAnnotation {
                    text: part.to_owned(),
                },
            )
        })?;

        let key = captures.group(1).as_str();
        let raw = captures.group(2).as_str().trim();

        let value = if raw.starts_with('"') {
            match unquote(raw) {
                Some(s) => AnnotationValue::Str(s),
                None => {
                    return Err(ParseError::new(
                        loc.clone(),
                        ErrorType::InvalidAnnotation {
                            text: part.to_owned(),
                        },
                    ))
                }
            }
        } else if raw == "true" {
            AnnotationValue::Bool(true)
        } else if raw == "false" {
            AnnotationValue::Bool(false)
        } else if let Ok(n) = raw.parse::<f64>() {
            AnnotationValue::Num(n)
        } else if IDENT_REGEX.is_match(raw) {
            AnnotationValue::Str(raw.to_owned())
        } else {
            return Err(ParseError::new(
                loc.clone(),
                ErrorType::InvalidAnnotation {
                    text: part.to_owned(),
                },
            ));
        };

        annotations.insert(key.to_owned(), value);
    }

    Ok(annotations)
}

#[cfg(test)]
mod tests {
    use super::*;

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

    fn parsetest(source: &str) -> Document {
        parse(source, None).unwrap()
    }

    fn failtest(source: &str) -> ErrorType {
        parse(source, None).unwrap_err().error
    }

    fn events_of<'a>(
        document: &'a Document,
        index: u32,
        track: &str,
        voice: &str,
    ) -> &'a [Event] {
        document
            .measures
            .iter()
            .find(|measure| measure.index == index)
            .unwrap()
            .tracks[track]
            .voices[voice]
            .as_slice()
    }

    #[test]
    fn parse_minimal_document() {
        let document = parsetest(MINIMAL);

        assert_eq!(document.header.tempo_bpm, 100);
        assert_eq!(document.header.time_signature.numerator, 4);
        assert_eq!(document.tracks.len(), 1);
        assert_eq!(document.tracks[0].id, "gtr1");
        assert_eq!(
            document.tracks[0].tuning.as_ref().unwrap().len(),
            6
        );
        assert_eq!(document.measures.len(), 1);

        let events = events_of(&document, 1, "gtr1", "v1");
        assert_eq!(events.len(), 4);
        for event in events {
            assert_eq!(event.duration().base, DurationBase::Quarter);
        }
        match &events[0] {
            Event::Note { note, .. } => {
                assert_eq!(note.string, 6);
                assert_eq!(note.fret, 3);
            }
            other => panic!("expected note, got {:?}", other),
        }
    }

    #[test]
    fn duration_carries_within_measure() {
        let source = MINIMAL.replace(
            "m1: | q (6:3) (5:5) (4:5) (3:3) |",
            "m1: | e (6:3) (5:5) q (4:5) |",
        );
        let document = parsetest(&source);
        let events = events_of(&document, 1, "gtr1", "v1");
        assert_eq!(events[0].duration().base, DurationBase::Eighth);
        assert_eq!(events[1].duration().base, DurationBase::Eighth);
        assert_eq!(events[2].duration().base, DurationBase::Quarter);
    }

    #[test]
    fn duration_does_not_carry_across_measures() {
        let source = MINIMAL.replace(
            "m1: | q (6:3) (5:5) (4:5) (3:3) |",
            "m1: | q (6:3) |\nm2: | (6:3) |",
        );
        assert_eq!(
            failtest(&source),
            ErrorType::EventBeforeDuration {
                token: "(6:3)".to_owned()
            }
        );
    }

    #[test]
    fn chord_rest_and_technique_chain() {
        let source = MINIMAL.replace(
            "m1: | q (6:3) (5:5) (4:5) (3:3) |",
            "m1: | e (3:2h4) (2:3) q [ (4:2) (3:2) (2:3) ] q r |",
        );
        let document = parsetest(&source);
        let events = events_of(&document, 1, "gtr1", "v1");
        assert_eq!(events.len(), 4);

        match &events[0] {
            Event::Note { note, .. } => {
                assert_eq!(note.fret, 2);
                assert_eq!(
                    note.techniques,
                    vec![Technique::HammerOn {
                        from_fret: 2,
                        to_fret: 4
                    }]
                );
            }
            other => panic!("expected note, got {:?}", other),
        }
        match &events[2] {
            Event::Chord { notes, .. } => assert_eq!(notes.len(), 3),
            other => panic!("expected chord, got {:?}", other),
        }
        match &events[3] {
            Event::Rest { duration, .. } => {
                assert_eq!(duration.base, DurationBase::Quarter)
            }
            other => panic!("expected rest, got {:?}", other),
        }
    }

    #[test]
    fn technique_chain_is_left_associative() {
        let source = MINIMAL.replace(
            "m1: | q (6:3) (5:5) (4:5) (3:3) |",
            "m1: | q (3:2h4p2) |",
        );
        let document = parsetest(&source);
        match &events_of(&document, 1, "gtr1", "v1")[0] {
            Event::Note { note, .. } => {
                assert_eq!(note.fret, 2);
                assert_eq!(
                    note.techniques,
                    vec![
                        Technique::HammerOn {
                            from_fret: 2,
                            to_fret: 4
                        },
                        Technique::PullOff {
                            from_fret: 4,
                            to_fret: 2
                        },
                    ]
                );
            }
            other => panic!("expected note, got {:?}", other),
        }
    }

    #[test]
    fn slides_and_vibrato() {
        let source = MINIMAL.replace(
            "m1: | q (6:3) (5:5) (4:5) (3:3) |",
            r"m1: | q (4:5/7~) (4:7\5) |",
        );
        let document = parsetest(&source);
        let events = events_of(&document, 1, "gtr1", "v1");
        match &events[0] {
            Event::Note { note, .. } => assert_eq!(
                note.techniques,
                vec![
                    Technique::Slide {
                        direction: SlideDirection::Up,
                        from_fret: 5,
                        to_fret: 7
                    },
                    Technique::Vibrato,
                ]
            ),
            other => panic!("expected note, got {:?}", other),
        }
        match &events[1] {
            Event::Note { note, .. } => assert_eq!(
                note.techniques,
                vec![Technique::Slide {
                    direction: SlideDirection::Down,
                    from_fret: 7,
                    to_fret: 5
                }]
            ),
            other => panic!("expected note, got {:?}", other),
        }
    }

    #[test]
    fn annotations_on_events_and_notes() {
        let source = MINIMAL.replace(
            "m1: | q (6:3) (5:5) (4:5) (3:3) |",
            r#"m1: | q (6:3){let_ring=true, label="open, low"} r{beats=1.5} |"#,
        );
        let document = parsetest(&source);
        let events = events_of(&document, 1, "gtr1", "v1");

        match &events[0] {
            Event::Note { annotations, .. } => {
                assert_eq!(
                    annotations["let_ring"],
                    AnnotationValue::Bool(true)
                );
                assert_eq!(
                    annotations["label"],
                    AnnotationValue::Str("open, low".to_owned())
                );
            }
            other => panic!("expected note, got {:?}", other),
        }
        match &events[1] {
            Event::Rest { annotations, .. } => {
                assert_eq!(annotations["beats"], AnnotationValue::Num(1.5))
            }
            other => panic!("expected rest, got {:?}", other),
        }
    }

    #[test]
    fn duplicate_annotation_keys_overwrite() {
        let source = MINIMAL.replace(
            "m1: | q (6:3) (5:5) (4:5) (3:3) |",
            "m1: | q r{x=1, x=2} |",
        );
        let document = parsetest(&source);
        match &events_of(&document, 1, "gtr1", "v1")[0] {
            Event::Rest { annotations, .. } => {
                assert_eq!(annotations["x"], AnnotationValue::Num(2.0))
            }
            other => panic!("expected rest, got {:?}", other),
        }
    }

    #[test]
    fn double_dotted_durations_accepted() {
        let source = MINIMAL.replace(
            "m1: | q (6:3) (5:5) (4:5) (3:3) |",
            "m1: | q.. (6:3) |",
        );
        let document = parsetest(&source);
        assert_eq!(events_of(&document, 1, "gtr1", "v1")[0].duration().dots, 2);
    }

    #[test]
    fn measure_before_directive_fails() {
        let source = MINIMAL.replace("@track gtr1\n", "");
        let error = parse(&source, None).unwrap_err();
        assert_eq!(error.error, ErrorType::MeasureBeforeDirective);
        assert_eq!(
            error.to_string().contains("Measure defined before selecting track/voice"),
            true
        );
    }

    #[test]
    fn missing_delimiter_fails() {
        assert_eq!(
            failtest("format=\"opentab\"\nversion=\"0.1\"\n"),
            ErrorType::MissingDelimiter
        );
    }

    #[test]
    fn directive_in_header_fails() {
        let source = MINIMAL.replace("[[tracks]]", "@track gtr1\n[[tracks]]");
        assert_eq!(
            failtest(&source),
            ErrorType::DirectiveInHeader {
                directive: "@track".to_owned()
            }
        );
    }

    #[test]
    fn unknown_body_line_fails() {
        let source = MINIMAL.replace("@track gtr1", "@track gtr1\nnot a measure");
        assert_eq!(
            failtest(&source),
            ErrorType::UnknownBodyLine {
                text: "not a measure".to_owned()
            }
        );
    }

    #[test]
    fn malformed_measure_fails() {
        let source = MINIMAL.replace(
            "m1: | q (6:3) (5:5) (4:5) (3:3) |",
            "m1: q (6:3)",
        );
        assert_eq!(failtest(&source), ErrorType::MalformedMeasure);
    }

    #[test]
    fn unbalanced_brackets_fail() {
        let source = MINIMAL.replace(
            "m1: | q (6:3) (5:5) (4:5) (3:3) |",
            "m1: | q (6:3 ] |",
        );
        assert_eq!(failtest(&source), ErrorType::UnbalancedBrackets);
    }

    #[test]
    fn empty_chord_fails() {
        let source = MINIMAL.replace(
            "m1: | q (6:3) (5:5) (4:5) (3:3) |",
            "m1: | q [ ] |",
        );
        assert_eq!(failtest(&source), ErrorType::EmptyChord);
    }

    #[test]
    fn unsupported_format_fails() {
        let source = MINIMAL.replace("format=\"opentab\"", "format=\"tabzilla\"");
        assert_eq!(
            failtest(&source),
            ErrorType::UnsupportedFormat {
                found: "tabzilla".to_owned()
            }
        );
    }

    #[test]
    fn missing_version_fails() {
        let source = MINIMAL.replace("version=\"0.1\"\n", "");
        assert_eq!(
            failtest(&source),
            ErrorType::MissingHeaderKey { key: "version" }
        );
    }

    #[test]
    fn bad_time_signature_denominator_fails() {
        let source = MINIMAL.replace("time_signature=\"4/4\"", "time_signature=\"4/5\"");
        assert_eq!(
            failtest(&source),
            ErrorType::InvalidTimeSignature {
                value: "4/5".to_owned()
            }
        );
    }

    #[test]
    fn unknown_header_keys_are_preserved() {
        let source = MINIMAL.replace(
            "tempo_bpm=100",
            "tempo_bpm=100\nimported_from=\"ascii\"\nimport_warnings=3",
        );
        let document = parsetest(&source);
        assert_eq!(
            document.header.extra["imported_from"],
            AnnotationValue::Str("ascii".to_owned())
        );
        assert_eq!(
            document.header.extra["import_warnings"],
            AnnotationValue::Num(3.0)
        );
    }

    #[test]
    fn unknown_directive_track_is_synthesized() {
        let source = MINIMAL.replace("@track gtr1", "@track gtr1\n@track gtr2\nm2: | q r |");
        let document = parsetest(&source);
        assert_eq!(document.tracks.len(), 2);
        assert_eq!(document.tracks[1].id, "gtr2");
        assert!(document.tracks[1].tuning.is_none());
    }

    #[test]
    fn same_measure_last_writer_wins() {
        let source = MINIMAL.replace(
            "m1: | q (6:3) (5:5) (4:5) (3:3) |",
            "m1: | q (6:3) |\nm1: | q (5:5) |",
        );
        let document = parsetest(&source);
        let events = events_of(&document, 1, "gtr1", "v1");
        assert_eq!(events.len(), 1);
        match &events[0] {
            Event::Note { note, .. } => assert_eq!(note.string, 5),
            other => panic!("expected note, got {:?}", other),
        }
    }

    #[test]
    fn measures_merge_across_tracks_and_sort_by_index() {
        let source = r#"format="opentab"
version="0.1"

[[tracks]]
id="gtr1"

[[tracks]]
id="bass1"
---
@track gtr1
m2: | q (6:3) |
@track bass1
m2: | q (4:0) |
@track gtr1
m1: | h r |
"#;
        let document = parsetest(source);
        assert_eq!(document.measures.len(), 2);
        assert_eq!(document.measures[0].index, 1);
        assert_eq!(document.measures[1].index, 2);
        assert_eq!(document.measures[1].tracks.len(), 2);
    }

    #[test]
    fn voice_directive_routes_events() {
        let source = MINIMAL.replace(
            "@track gtr1",
            "@track gtr1 voice v2",
        );
        let document = parsetest(&source);
        let events = events_of(&document, 1, "gtr1", "v2");
        assert_eq!(events.len(), 4);
    }

    #[test]
    fn crlf_input_parses() {
        let source = MINIMAL.replace('\n', "\r\n");
        let document = parsetest(&source);
        assert_eq!(document.measures.len(), 1);
    }

    #[test]
    fn inline_comment_after_measure() {
        let source = MINIMAL.replace(
            "m1: | q (6:3) (5:5) (4:5) (3:3) |",
            "m1: | q (6:3) | # pickup",
        );
        let document = parsetest(&source);
        assert_eq!(events_of(&document, 1, "gtr1", "v1").len(), 1);
    }

    #[test]
    fn duplicate_track_id_fails() {
        let source = MINIMAL.replace(
            "[[tracks]]\nid=\"gtr1\"",
            "[[tracks]]\nid=\"gtr1\"\n\n[[tracks]]\nid=\"gtr1\"",
        );
        assert_eq!(
            failtest(&source),
            ErrorType::DuplicateTrackId {
                id: "gtr1".to_owned()
            }
        );
    }

    #[test]
    fn error_reports_line_and_column() {
        let source = MINIMAL.replace(
            "m1: | q (6:3) (5:5) (4:5) (3:3) |",
            "m1: | q (6:3) zz |",
        );
        let error = parse(&source, None).unwrap_err();
        assert_eq!(error.line(), 11);
        assert_eq!(error.column(), 15);
        assert_eq!(
            error.error,
            ErrorType::UnknownToken {
                token: "zz".to_owned()
            }
        );
    }
}
