//! Canonical text formatting.
//!
//! The formatter works on text, not on the document tree, so comments and
//! unknown header keys survive untouched. Measure lines are re-tokenized and
//! re-emitted with single spaces, and duration carry is expanded so every
//! event token is preceded by an explicit duration token. Formatting is
//! idempotent, and formatting a parseable source never changes the document
//! it parses to.

use regex::Regex;

use crate::tokenize::{self, grammar_regex, is_duration_token, is_event_token, MatchedGroups};

lazy_static! {
    static ref MEASURE_LINE_REGEX: Regex = grammar_regex(r"^\s*m(\d+):\s*\|(.*)\|\s*(#.*)?$");
}

pub fn format(source: &str) -> String {
    let normalized = source.replace("\r\n", "\n");
    let lines: Vec<&str> = normalized.lines().collect();

    let delimiter = match lines.iter().position(|line| line.trim_end() == "---") {
        Some(index) => index,
        None => {
            // Not an OpenTab file yet; the only safe change is whitespace.
            let mut out: Vec<String> =
                lines.iter().map(|line| line.trim_end().to_owned()).collect();
            while out.last().map_or(false, String::is_empty) {
                out.pop();
            }
            return join_lines(out);
        }
    };

    let mut header: Vec<String> = lines[..delimiter]
        .iter()
        .map(|line| line.trim_end().to_owned())
        .collect();
    while header.first().map_or(false, String::is_empty) {
        header.remove(0);
    }
    while header.last().map_or(false, String::is_empty) {
        header.pop();
    }

    let mut body: Vec<String> = Vec::new();
    for line in &lines[delimiter + 1..] {
        if body.is_empty() && line.trim().is_empty() {
            continue;
        }
        body.push(format_body_line(line));
    }
    while body.last().map_or(false, String::is_empty) {
        body.pop();
    }

    let mut out = Vec::new();
    if !header.is_empty() {
        out.extend(header);
        out.push(String::new());
    }
    out.push("---".to_owned());
    if !body.is_empty() {
        out.push(String::new());
        out.extend(body);
    }

    join_lines(out)
}

fn join_lines(lines: Vec<String>) -> String {
    let mut out = lines.join("\n");
    out.push('\n');
    out
}

fn format_body_line(line: &str) -> String {
    let captures = match MEASURE_LINE_REGEX.captures(line) {
        Some(captures) => captures,
        None => return line.trim_end().to_owned(),
    };

    let index = captures.group(1).as_str();
    let content = captures.group(2).as_str();
    let comment = captures.get(3).map(|m| m.as_str().trim_end());

    let tokens = match tokenize::split_tokens(content) {
        Ok(tokens) => tokens,
        // Unbalanced brackets; leave the line for the validator to report.
        Err(_) => return line.trim_end().to_owned(),
    };

    let mut emitted: Vec<&str> = Vec::new();
    let mut current: Option<&str> = None;

    for token in &tokens {
        if is_duration_token(token.text) {
            current = Some(token.text);
        } else if is_event_token(token.text) {
            if let Some(duration) = current {
                emitted.push(duration);
            }
            emitted.push(token.text);
        } else {
            emitted.push(token.text);
        }
    }

    let mut out = if emitted.is_empty() {
        format!("m{}: | |", index)
    } else {
        format!("m{}: | {} |", index, emitted.join(" "))
    };

    if let Some(comment) = comment {
        out.push(' ');
        out.push_str(comment);
    }

    out
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

    #[test]
    fn expands_duration_carry() {
        let formatted = format(MINIMAL);
        assert!(formatted.contains("m1: | q (6:3) q (5:5) q (4:5) q (3:3) |"));
    }

    #[test]
    fn is_idempotent() {
        let once = format(MINIMAL);
        assert_eq!(format(&once), once);
    }

    #[test]
    fn preserves_document_identity() {
        use crate::parsing;

        let before = parsing::parse(MINIMAL, None).unwrap();
        let after = parsing::parse(&format(MINIMAL), None).unwrap();
        assert_eq!(before, after);
    }

    #[test]
    fn normalizes_measure_whitespace() {
        let source = MINIMAL.replace(
            "m1: | q (6:3) (5:5) (4:5) (3:3) |",
            "m1:   |   q    (6:3)   |",
        );
        assert!(format(&source).contains("m1: | q (6:3) |"));
    }

    #[test]
    fn mixed_explicit_durations_stay_explicit() {
        let source = MINIMAL.replace(
            "m1: | q (6:3) (5:5) (4:5) (3:3) |",
            "m1: | e (3:2h4) (2:3) q [ (4:2) (3:2) (2:3) ] q r |",
        );
        assert!(format(&source)
            .contains("m1: | e (3:2h4) e (2:3) q [ (4:2) (3:2) (2:3) ] q r |"));
    }

    #[test]
    fn preserves_inline_comments() {
        let source = MINIMAL.replace(
            "m1: | q (6:3) (5:5) (4:5) (3:3) |",
            "m1: | q (6:3) |   # pickup bar",
        );
        assert!(format(&source).contains("m1: | q (6:3) | # pickup bar"));
    }

    #[test]
    fn preserves_standalone_comments() {
        let source = MINIMAL.replace("@track gtr1", "# intro riff\n@track gtr1");
        assert!(format(&source).contains("# intro riff\n@track gtr1"));
    }

    #[test]
    fn trims_header_blank_lines() {
        let padded = format!("\n\n{}", MINIMAL);
        let formatted = format(&padded);
        assert!(formatted.starts_with("format=\"opentab\"\n"));
        assert_eq!(format(&formatted), formatted);
    }

    #[test]
    fn unbalanced_measure_passes_through() {
        let source = MINIMAL.replace(
            "m1: | q (6:3) (5:5) (4:5) (3:3) |",
            "m1: | q (6:3 ] |   ",
        );
        assert!(format(&source).contains("m1: | q (6:3 ] |"));
    }

    #[test]
    fn source_without_delimiter_is_only_trimmed() {
        let source = "some text   \nmore\n\n";
        assert_eq!(format(source), "some text\nmore\n");
    }

    #[test]
    fn delimiter_spacing_is_normalized() {
        let source = MINIMAL.replace("---\n", "---\n\n\n");
        let formatted = format(&source);
        assert!(formatted.contains("\n\n---\n\n@track gtr1"));
        assert_eq!(format(&formatted), formatted);
    }
}
