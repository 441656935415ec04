//! Importers that recover OpenTab sources from foreign formats.
//!
//! Both importers emit OpenTab text rather than a document tree: the text
//! they build is run through the formatter, and parsing it afterwards goes
//! through the exact same path as a hand-written file.

pub mod ascii;
pub mod gpx;

/// Quote a string for a header value, escaping embedded quotes.
fn quote(text: &str) -> String {
    format!("\"{}\"", text.replace('\\', "\\\\").replace('"', "\\\""))
}
