use std::fmt::{self, Formatter};
use std::sync::Arc;

/// Shared handle on the text an error points into. Cheap to clone into every
/// `SourceLoc`, so rendering an error never needs the original buffer passed
/// around separately.
pub type SourceMap = Arc<SourceInfo>;

#[derive(Debug)]
pub struct SourceInfo {
    filename: String,
    source: String,
}

impl SourceInfo {
    pub fn new(source: &str, filename: Option<&str>) -> SourceMap {
        Arc::new(SourceInfo {
            filename: filename.unwrap_or("<stdin>").to_owned(),
            source: source.to_owned(),
        })
    }

    pub fn filename(&self) -> &str {
        &self.filename
    }

    /// The 1-based line of source, or empty when the number runs past the
    /// end (an error at end-of-file points one line beyond the last).
    pub fn line(&self, number: usize) -> &str {
        self.source
            .lines()
            .nth(number.saturating_sub(1))
            .unwrap_or("")
    }
}

/// A 1-based position in the source, wide enough to underline the whole
/// token it points at.
#[derive(Debug, Clone)]
pub struct SourceLoc {
    pub line: usize,
    pub col: usize,
    pub width: usize,
    pub info: SourceMap,
}

impl SourceLoc {
    pub fn new(info: &SourceMap, line: usize, col: usize, width: usize) -> SourceLoc {
        SourceLoc {
            line: line.max(1),
            col: col.max(1),
            width: width.max(1),
            info: info.clone(),
        }
    }

    pub fn cause_line(&self) -> &str {
        self.info.line(self.line)
    }
}

// Locations are interchangeable when they point at the same place; which
// handle they arrived through does not matter.
impl PartialEq for SourceLoc {
    fn eq(&self, other: &Self) -> bool {
        self.line == other.line && self.col == other.col && self.width == other.width
    }
}

impl Eq for SourceLoc {}

pub fn fmt_error(
    f: &mut Formatter,
    message: &str,
    filename: &str,
    cause_line: &str,
    line: usize,
    col: usize,
    width: usize,
) -> Result<(), fmt::Error> {
    use ansi_term::Color;

    let error_label = Color::Fixed(9).paint("error");
    let message = Color::Fixed(15).paint(message);
    let arrow = Color::Fixed(12).paint("-->");
    let underline = Color::Fixed(12).paint(format!(
        "{: >col$}{}",
        "^",
        "^".repeat(width.saturating_sub(1)),
        col = col
    ));
    let line_prefix = format!("{} |    ", line);
    let underline_indent = " ".repeat(line_prefix.len());
    let line_prefix = Color::Fixed(12).paint(line_prefix);

    writeln!(
        f,
        "{}: {}\n   {} {}:{}:{}\n\n{}{}\n{}{}",
        error_label,
        message,
        arrow,
        filename,
        line,
        col,
        line_prefix,
        cause_line,
        underline_indent,
        underline
    )
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lines_are_one_based_and_clamped() {
        let info = SourceInfo::new("first\nsecond\n", Some("song.otab"));
        assert_eq!(info.filename(), "song.otab");
        assert_eq!(info.line(1), "first");
        assert_eq!(info.line(2), "second");
        assert_eq!(info.line(3), "");
        assert_eq!(info.line(0), "first");
    }

    #[test]
    fn constructor_clamps_to_one() {
        let info = SourceInfo::new("", None);
        let loc = SourceLoc::new(&info, 0, 0, 0);
        assert_eq!((loc.line, loc.col, loc.width), (1, 1, 1));
        assert_eq!(loc.info.filename(), "<stdin>");
    }

    #[test]
    fn equality_ignores_the_source_handle() {
        let a = SourceInfo::new("x", None);
        let b = SourceInfo::new("y", None);
        assert_eq!(SourceLoc::new(&a, 2, 3, 1), SourceLoc::new(&b, 2, 3, 1));
        assert_ne!(SourceLoc::new(&a, 2, 3, 1), SourceLoc::new(&a, 2, 4, 1));
    }
}
