#[macro_use]
extern crate pretty_assertions;

macro_rules! test_fmt {
    ($name: tt) => {
        test_formatting(
            include_str!(concat!(
                env!("CARGO_MANIFEST_DIR"),
                "/test_files/",
                $name,
                ".otab"
            )),
            include_str!(concat!(
                env!("CARGO_MANIFEST_DIR"),
                "/test_files/",
                $name,
                "_formatted.otab"
            )),
        )
    };
}

fn test_formatting(before: &str, after: &str) {
    let result = opentab::format_source(before);
    assert_eq!(result, after);

    // Formatting is idempotent.
    assert_eq!(opentab::format_source(&result), result);

    // Formatting never changes the parsed document.
    let before_document = opentab::parse_document(before, None).unwrap();
    let after_document = opentab::parse_document(&result, None).unwrap();
    assert_eq!(before_document, after_document);
}

#[test]
fn test_minimal() {
    test_fmt!("minimal");
}

#[test]
fn test_chords() {
    test_fmt!("chords");
}

#[test]
fn test_multitrack() {
    test_fmt!("multitrack");
}

#[test]
fn test_canonical_writer_round_trip() {
    for fixture in &[
        include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/test_files/minimal.otab")),
        include_str!(concat!(env!("CARGO_MANIFEST_DIR"), "/test_files/chords.otab")),
        include_str!(concat!(
            env!("CARGO_MANIFEST_DIR"),
            "/test_files/multitrack.otab"
        )),
    ] {
        let document = opentab::parse_document(fixture, None).unwrap();
        let rewritten = document.to_source();
        let reparsed = opentab::parse_document(&rewritten, None).unwrap();
        assert_eq!(document, reparsed);
    }
}
