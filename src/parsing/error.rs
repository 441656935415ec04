use std::fmt::{Display, Error, Formatter};

use crate::error::{self, SourceLoc};

#[derive(Debug, Fail, PartialEq)]
pub struct ParseError {
    pub loc: SourceLoc,
    pub error: ErrorType,
}

#[derive(Debug, PartialEq)]
pub enum ErrorType {
    MissingDelimiter,

    DirectiveInHeader { directive: String },

    InvalidHeaderLine { text: String },

    InvalidHeaderValue {
        key: String,
        value: String,
        expected: &'static str,
    },

    MissingHeaderKey { key: &'static str },

    UnsupportedFormat { found: String },

    UnsupportedVersion { found: String },

    UnknownTable { name: String },

    DuplicateTrackId { id: String },

    InvalidTimeSignature { value: String },

    UnknownBodyLine { text: String },

    MalformedMeasure,

    UnbalancedBrackets,

    UnknownToken { token: String },

    InvalidAnnotation { text: String },

    EventBeforeDuration { token: String },

    MeasureBeforeDirective,

    EmptyChord,
}

impl ParseError {
    pub fn new(loc: SourceLoc, error: ErrorType) -> ParseError {
        ParseError { loc, error }
    }

    pub fn line(&self) -> usize {
        self.loc.line
    }

    pub fn column(&self) -> usize {
        self.loc.col
    }
}

impl Display for ParseError {
    fn fmt(&self, f: &mut Formatter) -> Result<(), Error> {
        use self::ErrorType::*;

        let error_message = match &self.error {
            MissingDelimiter => {
                "Missing `---` delimiter between header and body.".to_owned()
            }

            DirectiveInHeader { directive } => format!(
                "Directive `{}` before the `---` delimiter. Directives belong in the body.",
                directive
            ),

            InvalidHeaderLine { text } => {
                format!("Invalid header line `{}`. Expected `key = value`.", text)
            }

            InvalidHeaderValue {
                key,
                value,
                expected,
            } => format!(
                "Invalid value `{}` for header key `{}`. Expected {}.",
                value, key, expected
            ),

            MissingHeaderKey { key } => format!("Missing required header key `{}`.", key),

            UnsupportedFormat { found } => format!(
                "Unsupported format `{}`. Only `opentab` documents are supported.",
                found
            ),

            UnsupportedVersion { found } => format!(
                "Unsupported version `{}`. Only version `0.1` is supported.",
                found
            ),

            UnknownTable { name } => format!(
                "Unknown table `[[{}]]`. Only `[[tracks]]` is supported.",
                name
            ),

            DuplicateTrackId { id } => format!("Duplicate track id `{}`.", id),

            InvalidTimeSignature { value } => format!(
                "Invalid time signature `{}`. Expected `N/D` with D one of 1, 2, 4, 8, 16 or 32.",
                value
            ),

            UnknownBodyLine { text } => format!(
                "Unknown body line `{}`. Expected a comment, `@track` directive or measure.",
                text
            ),

            MalformedMeasure => {
                "Malformed measure. Expected `mN: | tokens |`.".to_owned()
            }

            UnbalancedBrackets => "Unbalanced brackets in measure.".to_owned(),

            UnknownToken { token } => format!("Unknown token `{}` in measure.", token),

            InvalidAnnotation { text } => {
                format!("Invalid annotation `{}`. Expected `{{key=value, ...}}`.", text)
            }

            EventBeforeDuration { token } => format!(
                "Event `{}` appears before any duration token in this measure.",
                token
            ),

            MeasureBeforeDirective => {
                "Measure defined before selecting track/voice".to_owned()
            }

            EmptyChord => "Chords must contain at least one note.".to_owned(),
        };

        error::fmt_error(
            f,
            &error_message,
            self.loc.info.filename(),
            self.loc.cause_line(),
            self.loc.line,
            self.loc.col,
            self.loc.width,
        )
    }
}
