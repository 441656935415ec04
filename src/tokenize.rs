//! The shared token grammar for measure content.
//!
//! Tokens inside a measure are whitespace-separated, but whitespace inside
//! any open `[`, `(` or `{` belongs to the current token. The same splitter
//! and token patterns back the parser, the formatter and the editor-facing
//! validator, so all three agree on token boundaries.

use regex::{Captures, Match, Regex};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Token<'a> {
    /// Byte offset of the token within the measure content.
    pub start: usize,
    pub text: &'a str,
}

/// Compile one of the crate's fixed grammar patterns. The patterns are
/// literals exercised by the test suite, so a failure here is a defect in
/// the grammar tables, not in user input.
pub fn grammar_regex(pattern: &str) -> Regex {
    match Regex::new(pattern) {
        Ok(regex) => regex,
        Err(error) => panic!("invalid grammar pattern `{}`: {}", pattern, error),
    }
}

/// Access to capture groups whose participation the grammar pattern
/// guarantees.
pub trait MatchedGroups<'t> {
    fn group(&self, index: usize) -> Match<'t>;
}

impl<'t> MatchedGroups<'t> for Captures<'t> {
    fn group(&self, index: usize) -> Match<'t> {
        match self.get(index) {
            Some(group) => group,
            None => panic!("grammar pattern left group {} unmatched", index),
        }
    }
}

/// Split measure content into tokens. Fails with the byte offset of the
/// offending character when brackets do not balance.
pub fn split_tokens(content: &str) -> Result<Vec<Token>, usize> {
    let mut tokens = Vec::new();
    let mut stack: Vec<char> = Vec::new();
    let mut start: Option<usize> = None;

    for (index, c) in content.char_indices() {
        if c.is_whitespace() && stack.is_empty() {
            if let Some(s) = start.take() {
                tokens.push(Token {
                    start: s,
                    text: &content[s..index],
                });
            }
            continue;
        }

        if start.is_none() {
            start = Some(index);
        }

        match c {
            '(' => stack.push(')'),
            '[' => stack.push(']'),
            '{' => stack.push('}'),
            ')' | ']' | '}' => match stack.pop() {
                Some(expected) if expected == c => (),
                _ => return Err(index),
            },
            _ => (),
        }
    }

    if !stack.is_empty() {
        return Err(content.len());
    }

    if let Some(s) = start {
        tokens.push(Token {
            start: s,
            text: &content[s..],
        });
    }

    Ok(tokens)
}

lazy_static! {
    pub static ref DURATION_TOKEN_REGEX: Regex =
        grammar_regex(r"^[whqest](\.{1,2})?(/\d+)?$");
    pub static ref REST_TOKEN_REGEX: Regex = grammar_regex(r"^r(\{.*\})?$");
    pub static ref NOTE_TOKEN_REGEX: Regex =
        grammar_regex(r"^\((\d+):(\d+)((?:[hp/\\]\d+|~)*)\)(\{.*\})?$");
    pub static ref CHORD_TOKEN_REGEX: Regex = grammar_regex(r"^\[(.*)\](\{.*\})?$");
}

pub fn is_duration_token(text: &str) -> bool {
    DURATION_TOKEN_REGEX.is_match(text)
}

pub fn is_event_token(text: &str) -> bool {
    REST_TOKEN_REGEX.is_match(text)
        || NOTE_TOKEN_REGEX.is_match(text)
        || CHORD_TOKEN_REGEX.is_match(text)
}
