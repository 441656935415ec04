//! Line-addressed diagnostics over raw text.
//!
//! Editors run this on every keystroke, so it never fails and never needs a
//! successful parse: each line is judged on its own, with just enough state
//! to know whether a track has been selected and which header keys were seen.
//! Columns are 1-based and inclusive-exclusive.

use std::collections::BTreeSet;

use regex::Regex;

use serde::Serialize;

use crate::tokenize::{
    self, grammar_regex, CHORD_TOKEN_REGEX, DURATION_TOKEN_REGEX, MatchedGroups,
    NOTE_TOKEN_REGEX, REST_TOKEN_REGEX,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum Severity {
    Error,
    Warning,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Diagnostic {
    pub message: String,
    pub line: usize,
    pub start_col: usize,
    pub end_col: usize,
    pub severity: Severity,
}

impl Diagnostic {
    fn error(message: String, line: usize, start_col: usize, end_col: usize) -> Diagnostic {
        Diagnostic {
            message,
            line,
            start_col,
            end_col,
            severity: Severity::Error,
        }
    }

    fn warning(message: String, line: usize, start_col: usize, end_col: usize) -> Diagnostic {
        Diagnostic {
            message,
            line,
            start_col,
            end_col,
            severity: Severity::Warning,
        }
    }
}

lazy_static! {
    static ref KEY_REGEX: Regex = grammar_regex(r"^([A-Za-z_][A-Za-z0-9_]*)\s*=");
    static ref TABLE_REGEX: Regex = grammar_regex(r"^\[\[.*\]\]$");
    static ref DIRECTIVE_REGEX: Regex = grammar_regex(
        r"^@track\s+([A-Za-z0-9_][A-Za-z0-9_.\-]*)(?:\s+voice\s+([A-Za-z0-9_][A-Za-z0-9_.\-]*))?$"
    );
    static ref MEASURE_LINE_REGEX: Regex =
        grammar_regex(r"^m(\d+):\s*\|(.*)\|\s*(?:#.*)?$");
    static ref MEASURE_START_REGEX: Regex = grammar_regex(r"^m\d*\s*[:|]");
    static ref ID_LINE_REGEX: Regex = grammar_regex(r#"^id\s*=\s*"([^"]*)""#);
}

/// Validate raw text. Always returns a list; an empty one means no findings.
pub fn validate_source(source: &str) -> Vec<Diagnostic> {
    let normalized = source.replace("\r\n", "\n");
    let lines: Vec<&str> = normalized.lines().collect();
    let mut diagnostics = Vec::new();

    let delimiter = lines.iter().position(|line| line.trim_end() == "---");
    let delimiter = match delimiter {
        Some(index) => index,
        None => {
            diagnostics.push(Diagnostic::error(
                "Missing `---` delimiter between header and body".to_owned(),
                1,
                1,
                1,
            ));
            lines.len()
        }
    };

    let mut track_ids = BTreeSet::new();
    let mut seen_format = false;
    let mut seen_version = false;

    for line in &lines[..delimiter] {
        let trimmed = line.trim();
        if let Some(captures) = ID_LINE_REGEX.captures(trimmed) {
            track_ids.insert(captures.group(1).as_str().to_owned());
        }
        if let Some(captures) = KEY_REGEX.captures(trimmed) {
            match captures.group(1).as_str() {
                "format" => seen_format = true,
                "version" => seen_version = true,
                _ => (),
            }
        }
    }

    if !seen_format {
        diagnostics.push(Diagnostic::error(
            "Header is missing the required `format` key".to_owned(),
            1,
            1,
            1,
        ));
    }
    if !seen_version {
        diagnostics.push(Diagnostic::error(
            "Header is missing the required `version` key".to_owned(),
            1,
            1,
            1,
        ));
    }

    if delimiter >= lines.len() {
        return diagnostics;
    }

    let mut track_selected = false;
    let mut written: BTreeSet<(u32, String, String)> = BTreeSet::new();
    let mut active: Option<(String, String)> = None;

    for (offset, line) in lines[delimiter + 1..].iter().enumerate() {
        let line_no = delimiter + 2 + offset;
        let trimmed = line.trim();
        if trimmed.is_empty() || trimmed.starts_with('#') {
            continue;
        }

        let leading = line.len() - line.trim_start().len();
        let start_col = leading + 1;
        let end_col = leading + trimmed.len() + 1;

        if trimmed.starts_with('@') {
            match DIRECTIVE_REGEX.captures(trimmed) {
                Some(captures) => {
                    let track_id = captures.group(1).as_str();
                    let voice_id = captures.get(2).map(|m| m.as_str()).unwrap_or("v1");
                    if !track_ids.is_empty() && !track_ids.contains(track_id) {
                        diagnostics.push(Diagnostic::warning(
                            format!("Track `{}` is not declared in the header", track_id),
                            line_no,
                            start_col,
                            end_col,
                        ));
                    }
                    active = Some((track_id.to_owned(), voice_id.to_owned()));
                    track_selected = true;
                }
                None => diagnostics.push(Diagnostic::error(
                    "Malformed directive; expected `@track ID` or `@track ID voice V`"
                        .to_owned(),
                    line_no,
                    start_col,
                    end_col,
                )),
            }
            continue;
        }

        if let Some(captures) = MEASURE_LINE_REGEX.captures(trimmed) {
            if !track_selected {
                diagnostics.push(Diagnostic::error(
                    "Measure defined before selecting track/voice".to_owned(),
                    line_no,
                    start_col,
                    end_col,
                ));
            } else if let Some((track_id, voice_id)) = &active {
                let index: u32 = captures.group(1).as_str().parse().unwrap_or(0);
                if !written.insert((index, track_id.clone(), voice_id.clone())) {
                    diagnostics.push(Diagnostic::warning(
                        format!(
                            "Measure {} was already written for this track and voice; the earlier line is discarded",
                            index
                        ),
                        line_no,
                        start_col,
                        end_col,
                    ));
                }
            }

            let content = captures.group(2);
            let content_col0 = leading + content.start();
            check_measure_content(
                content.as_str(),
                line_no,
                content_col0,
                &mut diagnostics,
            );
            continue;
        }

        if MEASURE_START_REGEX.is_match(trimmed) {
            diagnostics.push(Diagnostic::error(
                "Malformed measure line; expected `mN: | tokens |`".to_owned(),
                line_no,
                start_col,
                end_col,
            ));
            continue;
        }

        diagnostics.push(Diagnostic::error(
            format!("Unrecognized body line `{}`", trimmed),
            line_no,
            start_col,
            end_col,
        ));
    }

    diagnostics
}

fn check_measure_content(
    content: &str,
    line_no: usize,
    content_col0: usize,
    diagnostics: &mut Vec<Diagnostic>,
) {
    let tokens = match tokenize::split_tokens(content) {
        Ok(tokens) => tokens,
        Err(offset) => {
            diagnostics.push(Diagnostic::error(
                "Unbalanced brackets in measure".to_owned(),
                line_no,
                content_col0 + offset + 1,
                content_col0 + content.len() + 1,
            ));
            return;
        }
    };

    for token in tokens {
        let start_col = content_col0 + token.start + 1;
        let end_col = start_col + token.text.len();
        let first = match token.text.chars().next() {
            Some(first) => first,
            None => continue,
        };

        let message = match first {
            'w' | 'h' | 'q' | 'e' | 's' | 't' if !DURATION_TOKEN_REGEX.is_match(token.text) => {
                Some(format!("Malformed duration token `{}`", token.text))
            }
            'w' | 'h' | 'q' | 'e' | 's' | 't' => None,
            '(' if !NOTE_TOKEN_REGEX.is_match(token.text) => {
                Some(format!("Malformed note token `{}`", token.text))
            }
            '(' => None,
            '[' => check_chord_token(token.text),
            'r' if !REST_TOKEN_REGEX.is_match(token.text) => {
                Some(format!("Malformed rest token `{}`", token.text))
            }
            'r' => None,
            _ => Some(format!("Unknown token `{}`", token.text)),
        };

        if let Some(message) = message {
            diagnostics.push(Diagnostic::error(message, line_no, start_col, end_col));
        }
    }
}

fn check_chord_token(text: &str) -> Option<String> {
    let captures = match CHORD_TOKEN_REGEX.captures(text) {
        Some(captures) => captures,
        None => return Some(format!("Malformed chord token `{}`", text)),
    };

    let inner = captures.group(1).as_str();
    let inner_tokens = match tokenize::split_tokens(inner) {
        Ok(tokens) => tokens,
        Err(_) => return Some(format!("Malformed chord token `{}`", text)),
    };

    if inner_tokens.is_empty() {
        return Some("Chords must contain at least one note".to_owned());
    }

    for inner_token in inner_tokens {
        if !NOTE_TOKEN_REGEX.is_match(inner_token.text) {
            return Some(format!(
                "Malformed note token `{}` in chord",
                inner_token.text
            ));
        }
    }

    None
}

#[cfg(test)]
mod tests {
    use super::*;

    const VALID: &str = r#"format="opentab"
version="0.1"

[[tracks]]
id="gtr1"
---
@track gtr1
m1: | q (6:3) (5:5) |
"#;

    fn messages(source: &str) -> Vec<String> {
        validate_source(source)
            .into_iter()
            .map(|d| d.message)
            .collect()
    }

    #[test]
    fn valid_source_has_no_findings() {
        assert_eq!(messages(VALID), Vec::<String>::new());
    }

    #[test]
    fn missing_delimiter_is_reported() {
        let source = "format=\"opentab\"\nversion=\"0.1\"\n";
        assert!(messages(source)
            .iter()
            .any(|m| m.contains("Missing `---` delimiter")));
    }

    #[test]
    fn missing_format_and_version_are_reported() {
        let findings = messages("---\n");
        assert!(findings.iter().any(|m| m.contains("`format`")));
        assert!(findings.iter().any(|m| m.contains("`version`")));
    }

    #[test]
    fn measure_before_directive_is_reported() {
        let source = VALID.replace("@track gtr1\n", "");
        assert!(messages(&source)
            .iter()
            .any(|m| m == "Measure defined before selecting track/voice"));
    }

    #[test]
    fn unbalanced_brackets_are_reported() {
        let source = VALID.replace("m1: | q (6:3) (5:5) |", "m1: | q (6:3 ] |");
        let diagnostics = validate_source(&source);
        assert_eq!(diagnostics.len(), 1);
        assert!(diagnostics[0].message.contains("Unbalanced brackets"));
        assert_eq!(diagnostics[0].severity, Severity::Error);
    }

    #[test]
    fn malformed_duration_is_reported() {
        let source = VALID.replace("m1: | q (6:3) (5:5) |", "m1: | q... (6:3) |");
        assert!(messages(&source)
            .iter()
            .any(|m| m.contains("Malformed duration token `q...`")));
    }

    #[test]
    fn malformed_note_is_reported() {
        let source = VALID.replace("m1: | q (6:3) (5:5) |", "m1: | q (6:) |");
        assert!(messages(&source)
            .iter()
            .any(|m| m.contains("Malformed note token `(6:)`")));
    }

    #[test]
    fn unknown_token_is_reported() {
        let source = VALID.replace("m1: | q (6:3) (5:5) |", "m1: | q x7 |");
        assert!(messages(&source).iter().any(|m| m.contains("Unknown token `x7`")));
    }

    #[test]
    fn undeclared_track_is_a_warning() {
        let source = VALID.replace("@track gtr1", "@track mystery");
        let diagnostics = validate_source(&source);
        assert!(diagnostics
            .iter()
            .any(|d| d.severity == Severity::Warning
                && d.message.contains("`mystery` is not declared")));
    }

    #[test]
    fn rewritten_measure_is_a_warning() {
        let source = VALID.replace(
            "m1: | q (6:3) (5:5) |",
            "m1: | q (6:3) |\nm1: | q (5:5) |",
        );
        let diagnostics = validate_source(&source);
        assert!(diagnostics
            .iter()
            .any(|d| d.severity == Severity::Warning && d.message.contains("already written")));
    }

    #[test]
    fn columns_point_at_the_offending_token() {
        let source = VALID.replace("m1: | q (6:3) (5:5) |", "m1: | q zz |");
        let diagnostics = validate_source(&source);
        assert_eq!(diagnostics.len(), 1);
        assert_eq!(diagnostics[0].line, 8);
        assert_eq!(diagnostics[0].start_col, 9);
        assert_eq!(diagnostics[0].end_col, 11);
    }

    #[test]
    fn never_panics_on_junk() {
        for source in &["", "\u{0}\u{1}", "---", "m1: |||", "@", "[[", "{{{{"] {
            let _ = validate_source(source);
        }
    }
}
