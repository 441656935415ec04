//! Best-effort import of free-form "internet tab" text.
//!
//! Nothing about the input is trusted: rows may be mislabeled, bar lines may
//! drift, rhythm is not written down at all. The importer recovers what it
//! can, records every ambiguity as a warning, and emits OpenTab source that
//! is then run through the formatter.

use std::fmt::Write;
use std::str::FromStr;

use regex::Regex;

use crate::formatting;
use crate::tokenize::{grammar_regex, MatchedGroups};

use super::quote;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RhythmStrategy {
    /// Every event becomes an eighth, annotated `rhythm="unknown"`.
    Unknown,
    /// Every event becomes an eighth, no annotation.
    FixedEighth,
    /// Durations are inferred from column positions on a measure-wide grid.
    ColumnGrid,
}

impl Default for RhythmStrategy {
    fn default() -> RhythmStrategy {
        RhythmStrategy::Unknown
    }
}

impl FromStr for RhythmStrategy {
    type Err = String;

    fn from_str(text: &str) -> Result<RhythmStrategy, String> {
        match text {
            "unknown" => Ok(RhythmStrategy::Unknown),
            "fixed-eighth" => Ok(RhythmStrategy::FixedEighth),
            "column-grid" => Ok(RhythmStrategy::ColumnGrid),
            other => Err(format!(
                "unknown rhythm strategy `{}`; expected unknown, fixed-eighth or column-grid",
                other
            )),
        }
    }
}

#[derive(Debug, Clone)]
pub struct AsciiImport {
    pub source: String,
    pub warnings: Vec<String>,
}

lazy_static! {
    static ref METADATA_REGEX: Regex =
        grammar_regex(r"(?i)^(title|tuning|capo|key)\s*:\s*(\S.*)$");
    static ref SECTION_REGEX: Regex = grammar_regex(r"^\[([^\[\]]+)\]$");
    static ref TAB_ROW_REGEX: Regex =
        grammar_regex(r"^\s*([A-Ga-g][#b]?\d?)?\s*\|(.*)$");
    static ref CHORD_NAME_REGEX: Regex =
        grammar_regex(r"^[A-G][#b]?(?:maj|min|dim|aug|sus|add|m|M)?\d*(?:/[A-G][#b]?)?$");
    static ref INTEGER_REGEX: Regex = grammar_regex(r"\d+");
}

struct Row {
    label: Option<String>,
    content: String,
}

enum Item {
    Comment(String),
    Block { rows: Vec<Row>, line: usize },
}

pub fn import_ascii(text: &str, strategy: RhythmStrategy) -> AsciiImport {
    let normalized = text.replace("\r\n", "\n");
    let lines: Vec<&str> = normalized.lines().collect();

    let mut warnings: Vec<String> = Vec::new();
    let mut items: Vec<Item> = Vec::new();

    let mut title: Option<String> = None;
    let mut title_fallback: Option<String> = None;
    let mut tuning_text: Option<String> = None;
    let mut capo_text: Option<String> = None;
    let mut key: Option<String> = None;
    let mut seen_block = false;

    let mut index = 0;
    while index < lines.len() {
        if tab_row(lines[index]).is_some() {
            let start = index;
            let mut rows = Vec::new();
            while index < lines.len() {
                match tab_row(lines[index]) {
                    Some(row) => {
                        rows.push(row);
                        index += 1;
                    }
                    None => break,
                }
            }
            if rows.len() >= 2 {
                items.push(Item::Block {
                    rows,
                    line: start + 1,
                });
                seen_block = true;
                continue;
            }
            // A lone pipe-bearing line is treated as prose below.
            index = start;
        }

        let trimmed = lines[index].trim();
        index += 1;

        if trimmed.is_empty() {
            continue;
        }

        if let Some(captures) = SECTION_REGEX.captures(trimmed) {
            items.push(Item::Comment(format!(
                "[{}]",
                captures.group(1).as_str().trim()
            )));
            continue;
        }

        if !seen_block {
            if let Some(captures) = METADATA_REGEX.captures(trimmed) {
                let value = captures.group(2).as_str().trim().to_owned();
                match captures.group(1).as_str().to_lowercase().as_str() {
                    "title" => title = Some(value),
                    "tuning" => tuning_text = Some(value),
                    "capo" => capo_text = Some(value),
                    "key" => key = Some(value),
                    _ => unreachable!(),
                }
                continue;
            }
        }

        let words: Vec<&str> = trimmed.split_whitespace().collect();
        if !words.is_empty() && words.iter().all(|word| CHORD_NAME_REGEX.is_match(word)) {
            items.push(Item::Comment(format!("chords: {}", words.join(" "))));
            continue;
        }

        if !seen_block && title_fallback.is_none() {
            title_fallback = Some(trimmed.to_owned());
        }
    }

    let capo = match capo_text.as_deref() {
        None => 0,
        Some(text) if text.to_lowercase().contains("no") => 0,
        Some(text) => match INTEGER_REGEX.find(text) {
            Some(m) => m.as_str().parse().unwrap_or(0),
            None => {
                warnings.push(format!("could not parse capo `{}`; assuming none", text));
                0
            }
        },
    };

    let first_block_labels: Option<Vec<String>> = items.iter().find_map(|item| match item {
        Item::Block { rows, .. } => Some(
            rows.iter()
                .map(|row| row.label.clone())
                .collect::<Option<Vec<_>>>(),
        ),
        _ => None,
    })
    .flatten();

    let tuning = resolve_tuning(tuning_text.as_deref(), first_block_labels, &mut warnings);

    let mut body = String::new();
    let mut measure_index = 0u32;
    let mut grid_warned = false;

    for item in &items {
        match item {
            Item::Comment(text) => {
                let _ = writeln!(body, "# {}", text);
            }
            Item::Block { rows, line } => {
                if rows.len() != 6 {
                    warnings.push(format!(
                        "tab block at line {} has {} strings (expected 6)",
                        line,
                        rows.len()
                    ));
                }
                let measures = split_block_measures(rows, *line, &mut warnings);
                for slices in measures {
                    measure_index += 1;
                    let tokens =
                        measure_tokens(&slices, strategy, &mut grid_warned, &mut warnings);
                    let _ = writeln!(body, "m{}: | {} |", measure_index, tokens.join(" "));
                }
            }
        }
    }

    let title = title.or(title_fallback);

    let mut source = String::new();
    let _ = writeln!(source, "format=\"opentab\"");
    let _ = writeln!(source, "version=\"0.1\"");
    if let Some(title) = &title {
        let _ = writeln!(source, "title={}", quote(title));
    }
    if let Some(key) = &key {
        let _ = writeln!(source, "key={}", quote(key));
    }
    let _ = writeln!(source, "imported_from=\"ascii\"");
    let _ = writeln!(source, "import_warnings={}", warnings.len());
    let _ = writeln!(source, "\n[[tracks]]");
    let _ = writeln!(source, "id=\"gtr1\"");
    let pitches = tuning
        .iter()
        .map(|pitch| quote(pitch))
        .collect::<Vec<_>>()
        .join(", ");
    let _ = writeln!(source, "tuning=[{}]", pitches);
    if capo > 0 {
        let _ = writeln!(source, "capo={}", capo);
    }
    let _ = writeln!(source, "\n---\n");
    let _ = writeln!(source, "@track gtr1");
    source.push_str(&body);

    AsciiImport {
        source: formatting::format(&source),
        warnings,
    }
}

fn tab_row(line: &str) -> Option<Row> {
    let captures = TAB_ROW_REGEX.captures(line)?;
    let content = captures.group(2).as_str();
    if !content.contains('-') {
        return None;
    }
    Some(Row {
        label: captures.get(1).map(|m| m.as_str().to_owned()),
        content: content.to_owned(),
    })
}

fn resolve_tuning(
    tuning_text: Option<&str>,
    first_block_labels: Option<Vec<String>>,
    warnings: &mut Vec<String>,
) -> Vec<String> {
    if let Some(text) = tuning_text {
        if let Some(tuning) = parse_tuning_text(text) {
            return tuning;
        }
        warnings.push(format!(
            "could not parse tuning `{}`; assuming standard",
            text
        ));
        return standard_tuning();
    }

    if let Some(labels) = first_block_labels {
        if labels.len() == 6 {
            // Rows run high string to low; flip to low-to-high.
            let letters: Vec<String> = labels.iter().rev().cloned().collect();
            if let Some(tuning) = apply_octave_shape(&letters) {
                return tuning;
            }
        }
    }

    warnings.push("tuning not specified; assuming standard".to_owned());
    standard_tuning()
}

fn standard_tuning() -> Vec<String> {
    ["E2", "A2", "D3", "G3", "B3", "E4"]
        .iter()
        .map(|s| s.to_string())
        .collect()
}

fn parse_tuning_text(text: &str) -> Option<Vec<String>> {
    let mut tokens: Vec<String> = text
        .split(|c: char| c.is_whitespace() || c == ',' || c == '-')
        .filter(|token| !token.is_empty())
        .map(str::to_owned)
        .collect();

    // Compact form such as `DADGBE`.
    if tokens.len() == 1 && tokens[0].len() >= 4 && !tokens[0].chars().any(|c| c.is_ascii_digit())
    {
        let compact = tokens.remove(0);
        let mut expanded = Vec::new();
        let mut chars = compact.chars().peekable();
        while let Some(c) = chars.next() {
            if !c.is_ascii_alphabetic() {
                return None;
            }
            let mut token = c.to_string();
            if let Some(&next) = chars.peek() {
                if next == '#' || next == 'b' {
                    token.push(next);
                    chars.next();
                }
            }
            expanded.push(token);
        }
        tokens = expanded;
    }

    if tokens.len() != 6 {
        return None;
    }

    let with_octaves = tokens
        .iter()
        .all(|token| token.chars().last().map_or(false, |c| c.is_ascii_digit()));
    if with_octaves {
        if !tokens.iter().all(|token| crate::notes::is_pitch_name(token)) {
            return None;
        }
        return Some(
            tokens
                .iter()
                .map(|token| normalize_pitch_case(token))
                .collect(),
        );
    }

    apply_octave_shape(&tokens)
}

/// Assign the standard six-string octave layout to bare note letters given
/// low-to-high.
fn apply_octave_shape(letters: &[String]) -> Option<Vec<String>> {
    const OCTAVES: [u32; 6] = [2, 2, 3, 3, 3, 4];

    if letters.len() != 6 {
        return None;
    }

    let mut tuning = Vec::with_capacity(6);
    for (letter, octave) in letters.iter().zip(OCTAVES.iter()) {
        let mut chars = letter.chars();
        let note = chars.next()?.to_ascii_uppercase();
        if !('A'..='G').contains(&note) {
            return None;
        }
        let accidental: String = chars.collect();
        if !accidental.is_empty() && accidental != "#" && accidental != "b" {
            return None;
        }
        tuning.push(format!("{}{}{}", note, accidental, octave));
    }

    Some(tuning)
}

fn normalize_pitch_case(token: &str) -> String {
    let mut chars = token.chars();
    match chars.next() {
        Some(first) => format!("{}{}", first.to_ascii_uppercase(), chars.as_str()),
        None => String::new(),
    }
}

/// Split every row of a block at the reference row's bar positions,
/// producing one vector of per-string slices per measure.
fn split_block_measures(
    rows: &[Row],
    line: usize,
    warnings: &mut Vec<String>,
) -> Vec<Vec<String>> {
    let reference = match rows
        .iter()
        .map(|row| row.content.as_str())
        .max_by_key(|content| content.len())
    {
        Some(reference) => reference,
        None => return Vec::new(),
    };

    if rows
        .iter()
        .any(|row| row.content.len() != reference.len())
    {
        warnings.push(format!(
            "tab block at line {} has rows of unequal length",
            line
        ));
    }

    let mut bars: Vec<usize> = reference
        .char_indices()
        .filter(|&(_, c)| c == '|')
        .map(|(index, _)| index)
        .collect();

    let mut misaligned = false;
    for row in rows {
        for &bar in &bars {
            if bar < row.content.len() && row.content.as_bytes()[bar] != b'|' {
                misaligned = true;
            }
        }
    }
    if misaligned {
        warnings.push(format!(
            "tab block at line {} has misaligned bar lines; using the longest row",
            line
        ));
    }

    if bars.last() != Some(&reference.len().saturating_sub(1)) || bars.is_empty() {
        bars.push(reference.len());
    }

    let mut measures = Vec::new();
    let mut start = 0;
    for &bar in &bars {
        if bar > start {
            let slices: Vec<String> = rows
                .iter()
                .map(|row| {
                    let end = bar.min(row.content.len());
                    row.content.get(start.min(end)..end).unwrap_or("").to_owned()
                })
                .collect();
            if slices.iter().any(|slice| !slice.is_empty()) {
                measures.push(slices);
            }
        }
        start = bar + 1;
    }

    measures
}

#[derive(Debug)]
struct RawNote {
    col: usize,
    string: u32,
    fret: u32,
    chain: String,
    annotations: Vec<(String, String)>,
}

fn scan_row(slice: &str, string: u32) -> Vec<RawNote> {
    let bytes = slice.as_bytes();
    let mut notes: Vec<RawNote> = Vec::new();
    let mut pending_tech: Option<char> = None;
    let mut index = 0;

    while index < bytes.len() {
        let c = bytes[index] as char;

        if c.is_ascii_digit() {
            let start = index;
            while index < bytes.len() && bytes[index].is_ascii_digit() {
                index += 1;
            }
            let fret: u32 = match slice[start..index].parse() {
                Ok(fret) => fret,
                Err(_) => continue,
            };

            if let Some(tech) = pending_tech.take() {
                if let Some(previous) = notes.last_mut() {
                    let _ = write!(previous.chain, "{}{}", tech, fret);
                    continue;
                }
            }

            notes.push(RawNote {
                col: start,
                string,
                fret,
                chain: String::new(),
                annotations: Vec::new(),
            });
            continue;
        }

        match c {
            'h' | 'p' | '/' | '\\' => {
                pending_tech = Some(c);
                index += 1;
            }
            'b' => {
                let start = index + 1;
                let mut end = start;
                while end < bytes.len() && bytes[end].is_ascii_digit() {
                    end += 1;
                }
                if let Some(previous) = notes.last_mut() {
                    if end > start {
                        previous
                            .annotations
                            .push(("bend_to".to_owned(), slice[start..end].to_owned()));
                    } else {
                        previous
                            .annotations
                            .push(("bend".to_owned(), "true".to_owned()));
                    }
                }
                index = end.max(index + 1);
            }
            '~' => {
                if let Some(previous) = notes.last_mut() {
                    previous.chain.push('~');
                }
                index += 1;
            }
            '(' => {
                let start = index + 1;
                let mut end = start;
                while end < bytes.len() && bytes[end].is_ascii_digit() {
                    end += 1;
                }
                if end > start && end < bytes.len() && bytes[end] == b')' {
                    if let Ok(fret) = slice[start..end].parse() {
                        notes.push(RawNote {
                            col: start,
                            string,
                            fret,
                            chain: String::new(),
                            annotations: vec![("ghost".to_owned(), "true".to_owned())],
                        });
                    }
                    index = end + 1;
                } else {
                    index += 1;
                }
            }
            '-' => {
                pending_tech = None;
                index += 1;
            }
            _ => {
                index += 1;
            }
        }
    }

    notes
}

fn measure_tokens(
    slices: &[String],
    strategy: RhythmStrategy,
    grid_warned: &mut bool,
    warnings: &mut Vec<String>,
) -> Vec<String> {
    let mut notes: Vec<RawNote> = Vec::new();
    for (row_index, slice) in slices.iter().enumerate() {
        notes.extend(scan_row(slice, (row_index + 1) as u32));
    }
    notes.sort_by_key(|note| note.col);

    let mut groups: Vec<Vec<RawNote>> = Vec::new();
    let mut last_col: Option<usize> = None;
    for note in notes {
        let col = note.col;
        match (groups.last_mut(), last_col) {
            (Some(group), Some(previous)) if col <= previous + 1 => group.push(note),
            _ => groups.push(vec![note]),
        }
        last_col = Some(col);
    }

    let width = slices.iter().map(String::len).max().unwrap_or(0);
    let annotate_unknown = strategy == RhythmStrategy::Unknown;

    if groups.is_empty() {
        let duration = match strategy {
            RhythmStrategy::ColumnGrid => "w".to_owned(),
            _ => "e".to_owned(),
        };
        let rest = if annotate_unknown {
            "r{rhythm=\"unknown\"}".to_owned()
        } else {
            "r".to_owned()
        };
        return vec![duration, rest];
    }

    let durations: Vec<String> = match strategy {
        RhythmStrategy::Unknown | RhythmStrategy::FixedEighth => {
            groups.iter().map(|_| "e".to_owned()).collect()
        }
        RhythmStrategy::ColumnGrid => {
            if !*grid_warned {
                warnings.push(
                    "column-grid rhythm inference is approximate; review the durations"
                        .to_owned(),
                );
                *grid_warned = true;
            }
            column_grid_durations(&groups, width)
        }
    };

    let mut tokens = Vec::new();
    for (group, duration) in groups.iter().zip(durations) {
        tokens.push(duration);

        let extra: Vec<(String, String)> = if annotate_unknown {
            vec![("rhythm".to_owned(), "\"unknown\"".to_owned())]
        } else {
            Vec::new()
        };
        tokens.push(event_token(group, &extra));
    }

    tokens
}

fn column_grid_durations(groups: &[Vec<RawNote>], width: usize) -> Vec<String> {
    let mut grid = 4usize;
    for candidate in &[8usize, 16, 32] {
        if (width as i64 - *candidate as i64).abs() < (width as i64 - grid as i64).abs() {
            grid = *candidate;
        }
    }

    let step = width.max(1) as f64 / grid as f64;
    let step_of = |col: usize| ((col as f64 / step).round() as usize).min(grid);

    let mut durations = Vec::with_capacity(groups.len());
    for (index, group) in groups.iter().enumerate() {
        let at = step_of(group[0].col).min(grid - 1);
        let next = match groups.get(index + 1) {
            Some(next_group) => step_of(next_group[0].col).max(at + 1),
            None => grid,
        };
        let span = (next - at).max(1);
        durations.push(duration_for_span(span, grid).to_owned());
    }

    durations
}

fn duration_for_span(span: usize, grid: usize) -> &'static str {
    let thirty_seconds = span * 32 / grid;
    match thirty_seconds {
        32.. => "w",
        24..=31 => "h.",
        16..=23 => "h",
        12..=15 => "q.",
        8..=11 => "q",
        6..=7 => "e.",
        4..=5 => "e",
        3 => "s.",
        2 => "s",
        _ => "t",
    }
}

fn event_token(group: &[RawNote], extra: &[(String, String)]) -> String {
    if group.len() == 1 {
        let note = &group[0];
        let mut annotations = note.annotations.clone();
        annotations.extend(extra.iter().cloned());
        format!(
            "({}:{}{}){}",
            note.string,
            note.fret,
            note.chain,
            annotations_text(&annotations)
        )
    } else {
        let members = group
            .iter()
            .map(|note| {
                format!(
                    "({}:{}{}){}",
                    note.string,
                    note.fret,
                    note.chain,
                    annotations_text(&note.annotations)
                )
            })
            .collect::<Vec<_>>()
            .join(" ");
        format!("[ {} ]{}", members, annotations_text(extra))
    }
}

fn annotations_text(annotations: &[(String, String)]) -> String {
    if annotations.is_empty() {
        return String::new();
    }
    let body = annotations
        .iter()
        .map(|(key, value)| format!("{}={}", key, value))
        .collect::<Vec<_>>()
        .join(", ");
    format!("{{{}}}", body)
}
