//! SVG rendering.
//!
//! A thin wrapper over the ASCII view: each line becomes a `<text>` element
//! in a monospace font with fixed character metrics, so the output lines up
//! exactly like the terminal rendering.

use std::fmt::Write;

use crate::ascii_generation;
use crate::model::Document;

const CHAR_WIDTH: usize = 8;
const LINE_HEIGHT: usize = 16;
const PADDING: usize = 12;

pub fn generate_svg(document: &Document) -> String {
    let ascii = ascii_generation::generate_ascii(document);
    let lines: Vec<&str> = ascii.lines().collect();

    let columns = lines.iter().map(|line| line.len()).max().unwrap_or(0);
    let width = PADDING * 2 + columns * CHAR_WIDTH;
    let height = PADDING * 2 + lines.len() * LINE_HEIGHT;

    let mut svg = String::new();
    let _ = writeln!(
        svg,
        "<svg xmlns=\"http://www.w3.org/2000/svg\" width=\"{}\" height=\"{}\" viewBox=\"0 0 {} {}\">",
        width, height, width, height
    );
    svg.push_str("  <style>text { font-family: monospace; font-size: 13px; white-space: pre; }</style>\n");
    let _ = writeln!(
        svg,
        "  <rect width=\"{}\" height=\"{}\" fill=\"white\"/>",
        width, height
    );

    for (index, line) in lines.iter().enumerate() {
        let y = PADDING + (index + 1) * LINE_HEIGHT - 4;
        let _ = writeln!(
            svg,
            "  <text x=\"{}\" y=\"{}\" xml:space=\"preserve\">{}</text>",
            PADDING,
            y,
            escape_xml(line)
        );
    }

    svg.push_str("</svg>\n");
    svg
}

fn escape_xml(text: &str) -> String {
    text.replace('&', "&amp;")
        .replace('<', "&lt;")
        .replace('>', "&gt;")
}
