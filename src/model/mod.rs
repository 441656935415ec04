//! The typed document tree.
//!
//! A `Document` is produced by the parser or an importer, optionally gated
//! through the schema validator, and then consumed by the encoders. Nothing
//! mutates a document after construction.

use std::collections::BTreeMap;
use std::fmt::Write;

use serde::{Deserialize, Serialize};

pub type Annotations = BTreeMap<String, AnnotationValue>;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum AnnotationValue {
    Bool(bool),
    Num(f64),
    Str(String),
}

impl AnnotationValue {
    /// Render the value the way it appears inside an `{...}` annotation bag.
    pub fn to_source(&self) -> String {
        match self {
            AnnotationValue::Bool(value) => value.to_string(),
            AnnotationValue::Num(value) => {
                if value.fract() == 0.0 && value.abs() < 1e15 {
                    format!("{}", *value as i64)
                } else {
                    format!("{}", value)
                }
            }
            AnnotationValue::Str(value) => {
                let bare = !value.is_empty()
                    && value
                        .chars()
                        .all(|c| c.is_ascii_alphanumeric() || c == '_');
                if bare && !value.chars().next().map_or(false, |c| c.is_ascii_digit()) {
                    value.clone()
                } else {
                    format!("\"{}\"", value.replace('\\', "\\\\").replace('"', "\\\""))
                }
            }
        }
    }
}

fn annotations_to_source(annotations: &Annotations) -> String {
    if annotations.is_empty() {
        return String::new();
    }

    let body = annotations
        .iter()
        .map(|(key, value)| format!("{}={}", key, value.to_source()))
        .collect::<Vec<_>>()
        .join(", ");

    format!("{{{}}}", body)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum DurationBase {
    #[serde(rename = "w")]
    Whole,
    #[serde(rename = "h")]
    Half,
    #[serde(rename = "q")]
    Quarter,
    #[serde(rename = "e")]
    Eighth,
    #[serde(rename = "s")]
    Sixteenth,
    #[serde(rename = "t")]
    ThirtySecond,
}

impl DurationBase {
    pub fn from_token_char(c: char) -> Option<DurationBase> {
        match c {
            'w' => Some(DurationBase::Whole),
            'h' => Some(DurationBase::Half),
            'q' => Some(DurationBase::Quarter),
            'e' => Some(DurationBase::Eighth),
            's' => Some(DurationBase::Sixteenth),
            't' => Some(DurationBase::ThirtySecond),
            _ => None,
        }
    }

    pub fn token_char(self) -> char {
        match self {
            DurationBase::Whole => 'w',
            DurationBase::Half => 'h',
            DurationBase::Quarter => 'q',
            DurationBase::Eighth => 'e',
            DurationBase::Sixteenth => 's',
            DurationBase::ThirtySecond => 't',
        }
    }

    pub fn base_ticks(self, ppq: u32) -> u32 {
        match self {
            DurationBase::Whole => ppq * 4,
            DurationBase::Half => ppq * 2,
            DurationBase::Quarter => ppq,
            DurationBase::Eighth => ppq / 2,
            DurationBase::Sixteenth => ppq / 4,
            DurationBase::ThirtySecond => ppq / 8,
        }
    }

    pub fn musicxml_type(self) -> &'static str {
        match self {
            DurationBase::Whole => "whole",
            DurationBase::Half => "half",
            DurationBase::Quarter => "quarter",
            DurationBase::Eighth => "eighth",
            DurationBase::Sixteenth => "16th",
            DurationBase::ThirtySecond => "32nd",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Duration {
    pub base: DurationBase,
    #[serde(default, skip_serializing_if = "is_zero")]
    pub dots: u8,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tuplet: Option<u32>,
}

fn is_zero(n: &u8) -> bool {
    *n == 0
}

impl Duration {
    pub fn new(base: DurationBase) -> Duration {
        Duration {
            base,
            dots: 0,
            tuplet: None,
        }
    }

    /// Length in MIDI ticks at the given pulses-per-quarter resolution.
    /// Dots extend by 1 + 1/2 + 1/4 + ...; a tuplet of `t` scales by 2/t.
    /// Rounded to nearest, never below one tick.
    pub fn ticks(&self, ppq: u32) -> u32 {
        let base = u64::from(self.base.base_ticks(ppq));
        let dots = u32::from(self.dots.min(16));

        let mut num = base * ((1u64 << (dots + 1)) - 1);
        let mut den = 1u64 << dots;

        if let Some(tuplet) = self.tuplet {
            num *= 2;
            den *= u64::from(tuplet.max(1));
        }

        (((num + den / 2) / den).max(1)) as u32
    }

    pub fn to_token(&self) -> String {
        let mut token = String::new();
        token.push(self.base.token_char());
        for _ in 0..self.dots {
            token.push('.');
        }
        if let Some(tuplet) = self.tuplet {
            let _ = write!(token, "/{}", tuplet);
        }
        token
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SlideDirection {
    Up,
    Down,
}

/// One link of an inline technique chain. Chains are linear and
/// left-associative; each link's source fret is the previous link's target.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Technique {
    HammerOn { from_fret: u32, to_fret: u32 },
    PullOff { from_fret: u32, to_fret: u32 },
    Slide {
        direction: SlideDirection,
        from_fret: u32,
        to_fret: u32,
    },
    Vibrato,
}

impl Technique {
    fn to_source(&self) -> String {
        match *self {
            Technique::HammerOn { to_fret, .. } => format!("h{}", to_fret),
            Technique::PullOff { to_fret, .. } => format!("p{}", to_fret),
            Technique::Slide {
                direction: SlideDirection::Up,
                to_fret,
                ..
            } => format!("/{}", to_fret),
            Technique::Slide {
                direction: SlideDirection::Down,
                to_fret,
                ..
            } => format!("\\{}", to_fret),
            Technique::Vibrato => "~".to_owned(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NoteRef {
    pub string: u32,
    pub fret: u32,
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub techniques: Vec<Technique>,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub annotations: Annotations,
}

impl NoteRef {
    pub fn new(string: u32, fret: u32) -> NoteRef {
        NoteRef {
            string,
            fret,
            techniques: Vec::new(),
            annotations: Annotations::new(),
        }
    }

    pub fn to_token(&self) -> String {
        let mut token = format!("({}:{}", self.string, self.fret);
        for technique in &self.techniques {
            token.push_str(&technique.to_source());
        }
        token.push(')');
        token.push_str(&annotations_to_source(&self.annotations));
        token
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Event {
    Note {
        duration: Duration,
        note: NoteRef,
        #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
        annotations: Annotations,
    },
    Chord {
        duration: Duration,
        notes: Vec<NoteRef>,
        #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
        annotations: Annotations,
    },
    Rest {
        duration: Duration,
        #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
        annotations: Annotations,
    },
}

impl Event {
    pub fn duration(&self) -> &Duration {
        match self {
            Event::Note { duration, .. }
            | Event::Chord { duration, .. }
            | Event::Rest { duration, .. } => duration,
        }
    }

    /// The event token without its leading duration token.
    pub fn to_token(&self) -> String {
        match self {
            Event::Note {
                note, annotations, ..
            } => {
                let mut token = note.to_token();
                token.push_str(&annotations_to_source(annotations));
                token
            }
            Event::Chord {
                notes, annotations, ..
            } => {
                let inner = notes
                    .iter()
                    .map(NoteRef::to_token)
                    .collect::<Vec<_>>()
                    .join(" ");
                format!("[ {} ]{}", inner, annotations_to_source(annotations))
            }
            Event::Rest { annotations, .. } => {
                format!("r{}", annotations_to_source(annotations))
            }
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct TimeSignature {
    pub numerator: u32,
    pub denominator: u32,
}

impl Default for TimeSignature {
    fn default() -> TimeSignature {
        TimeSignature {
            numerator: 4,
            denominator: 4,
        }
    }
}

pub const VALID_DENOMINATORS: [u32; 6] = [1, 2, 4, 8, 16, 32];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Swing {
    None,
    Eighth,
}

impl Default for Swing {
    fn default() -> Swing {
        Swing::None
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Header {
    pub format: String,
    pub version: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub artist: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub album: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub composer: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub source: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub copyright: Option<String>,
    pub tempo_bpm: u32,
    pub time_signature: TimeSignature,
    pub swing: Swing,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: Annotations,
}

impl Default for Header {
    fn default() -> Header {
        Header {
            format: "opentab".to_owned(),
            version: "0.1".to_owned(),
            title: None,
            artist: None,
            album: None,
            composer: None,
            source: None,
            copyright: None,
            tempo_bpm: 120,
            time_signature: TimeSignature::default(),
            swing: Swing::default(),
            extra: Annotations::new(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Track {
    pub id: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub instrument: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub tuning: Option<Vec<String>>,
    #[serde(default)]
    pub capo: u32,
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub extra: Annotations,
}

impl Track {
    pub fn with_id(id: &str) -> Track {
        Track {
            id: id.to_owned(),
            name: None,
            instrument: None,
            tuning: None,
            capo: 0,
            extra: Annotations::new(),
        }
    }
}

/// Events of one track within one measure, keyed by voice id.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TrackMeasure {
    pub voices: BTreeMap<String, Vec<Event>>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Measure {
    pub index: u32,
    pub tracks: BTreeMap<String, TrackMeasure>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct Document {
    pub header: Header,
    pub tracks: Vec<Track>,
    pub measures: Vec<Measure>,
}

impl Document {
    pub fn track(&self, id: &str) -> Option<&Track> {
        self.tracks.iter().find(|track| track.id == id)
    }

    /// Number of strings to render for a track: declared tuning length, else
    /// the highest string index used anywhere, else six.
    pub fn string_count(&self, track: &Track) -> usize {
        if let Some(tuning) = &track.tuning {
            return tuning.len();
        }

        let mut max_string = 0;
        for measure in &self.measures {
            if let Some(track_measure) = measure.tracks.get(&track.id) {
                for events in track_measure.voices.values() {
                    for event in events {
                        match event {
                            Event::Note { note, .. } => max_string = max_string.max(note.string),
                            Event::Chord { notes, .. } => {
                                for note in notes {
                                    max_string = max_string.max(note.string);
                                }
                            }
                            Event::Rest { .. } => (),
                        }
                    }
                }
            }
        }

        if max_string > 0 {
            max_string as usize
        } else {
            6
        }
    }

    /// Canonical text rendering. The output parses back to an equal document;
    /// every event token is preceded by an explicit duration token.
    pub fn to_source(&self) -> String {
        let mut out = String::new();

        let header = &self.header;
        let _ = writeln!(out, "format=\"{}\"", header.format);
        let _ = writeln!(out, "version=\"{}\"", header.version);

        let string_fields: [(&str, &Option<String>); 6] = [
            ("title", &header.title),
            ("artist", &header.artist),
            ("album", &header.album),
            ("composer", &header.composer),
            ("source", &header.source),
            ("copyright", &header.copyright),
        ];
        for (key, value) in &string_fields {
            if let Some(value) = value {
                let _ = writeln!(out, "{}=\"{}\"", key, value.replace('"', "\\\""));
            }
        }

        let _ = writeln!(out, "tempo_bpm={}", header.tempo_bpm);
        let _ = writeln!(
            out,
            "time_signature=\"{}/{}\"",
            header.time_signature.numerator, header.time_signature.denominator
        );
        if header.swing != Swing::None {
            let _ = writeln!(out, "swing=\"eighth\"");
        }
        for (key, value) in &header.extra {
            let _ = writeln!(out, "{}={}", key, value.to_source());
        }

        for track in &self.tracks {
            let _ = writeln!(out, "\n[[tracks]]");
            let _ = writeln!(out, "id=\"{}\"", track.id);
            if let Some(name) = &track.name {
                let _ = writeln!(out, "name=\"{}\"", name.replace('"', "\\\""));
            }
            if let Some(instrument) = &track.instrument {
                let _ = writeln!(out, "instrument=\"{}\"", instrument);
            }
            if let Some(tuning) = &track.tuning {
                let pitches = tuning
                    .iter()
                    .map(|p| format!("\"{}\"", p))
                    .collect::<Vec<_>>()
                    .join(", ");
                let _ = writeln!(out, "tuning=[{}]", pitches);
            }
            if track.capo > 0 {
                let _ = writeln!(out, "capo={}", track.capo);
            }
            for (key, value) in &track.extra {
                let _ = writeln!(out, "{}={}", key, value.to_source());
            }
        }

        out.push_str("\n---\n");

        for track in &self.tracks {
            let mut voice_ids: Vec<&String> = self
                .measures
                .iter()
                .filter_map(|measure| measure.tracks.get(&track.id))
                .flat_map(|track_measure| track_measure.voices.keys())
                .collect();
            voice_ids.sort();
            voice_ids.dedup();

            for voice_id in voice_ids {
                if voice_id == "v1" {
                    let _ = writeln!(out, "\n@track {}", track.id);
                } else {
                    let _ = writeln!(out, "\n@track {} voice {}", track.id, voice_id);
                }

                for measure in &self.measures {
                    let events = measure
                        .tracks
                        .get(&track.id)
                        .and_then(|track_measure| track_measure.voices.get(voice_id));
                    if let Some(events) = events {
                        let tokens = events
                            .iter()
                            .flat_map(|event| {
                                vec![event.duration().to_token(), event.to_token()]
                            })
                            .collect::<Vec<_>>()
                            .join(" ");
                        if tokens.is_empty() {
                            let _ = writeln!(out, "m{}: | |", measure.index);
                        } else {
                            let _ = writeln!(out, "m{}: | {} |", measure.index, tokens);
                        }
                    }
                }
            }
        }

        out
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn quarter() -> Duration {
        Duration::new(DurationBase::Quarter)
    }

    #[test]
    fn base_tick_table() {
        assert_eq!(Duration::new(DurationBase::Whole).ticks(480), 1920);
        assert_eq!(Duration::new(DurationBase::Half).ticks(480), 960);
        assert_eq!(quarter().ticks(480), 480);
        assert_eq!(Duration::new(DurationBase::Eighth).ticks(480), 240);
        assert_eq!(Duration::new(DurationBase::Sixteenth).ticks(480), 120);
        assert_eq!(Duration::new(DurationBase::ThirtySecond).ticks(480), 60);
    }

    #[test]
    fn dotted_ticks() {
        let mut duration = quarter();
        duration.dots = 1;
        assert_eq!(duration.ticks(480), 720);
        duration.dots = 2;
        assert_eq!(duration.ticks(480), 840);
    }

    #[test]
    fn triplet_ticks() {
        let mut duration = Duration::new(DurationBase::Eighth);
        duration.tuplet = Some(3);
        assert_eq!(duration.ticks(480), 160);
    }

    #[test]
    fn quintuplet_rounds_to_nearest() {
        let mut duration = Duration::new(DurationBase::Sixteenth);
        duration.tuplet = Some(5);
        assert_eq!(duration.ticks(480), 48);

        let mut duration = Duration::new(DurationBase::ThirtySecond);
        duration.tuplet = Some(7);
        assert_eq!(duration.ticks(480), 17);
    }

    #[test]
    fn duration_tokens() {
        let mut duration = quarter();
        assert_eq!(duration.to_token(), "q");
        duration.dots = 1;
        assert_eq!(duration.to_token(), "q.");
        duration.tuplet = Some(3);
        assert_eq!(duration.to_token(), "q./3");
    }

    #[test]
    fn note_tokens() {
        let mut note = NoteRef::new(3, 2);
        note.techniques.push(Technique::HammerOn {
            from_fret: 2,
            to_fret: 4,
        });
        note.techniques.push(Technique::PullOff {
            from_fret: 4,
            to_fret: 2,
        });
        assert_eq!(note.to_token(), "(3:2h4p2)");

        let mut slide = NoteRef::new(4, 5);
        slide.techniques.push(Technique::Slide {
            direction: SlideDirection::Up,
            from_fret: 5,
            to_fret: 7,
        });
        slide.techniques.push(Technique::Vibrato);
        assert_eq!(slide.to_token(), "(4:5/7~)");
    }

    #[test]
    fn annotation_rendering() {
        let mut annotations = Annotations::new();
        annotations.insert("rhythm".to_owned(), AnnotationValue::Str("unknown".to_owned()));
        annotations.insert("bend_to".to_owned(), AnnotationValue::Num(7.0));
        annotations.insert("ghost".to_owned(), AnnotationValue::Bool(true));

        let event = Event::Rest {
            duration: quarter(),
            annotations,
        };
        assert_eq!(event.to_token(), "r{bend_to=7, ghost=true, rhythm=unknown}");
    }

    #[test]
    fn string_count_fallbacks() {
        let mut document = Document::default();
        document.tracks.push(Track::with_id("gtr1"));

        let track = document.tracks[0].clone();
        assert_eq!(document.string_count(&track), 6);

        let mut voices = BTreeMap::new();
        voices.insert(
            "v1".to_owned(),
            vec![Event::Note {
                duration: quarter(),
                note: NoteRef::new(7, 0),
                annotations: Annotations::new(),
            }],
        );
        let mut tracks = BTreeMap::new();
        tracks.insert("gtr1".to_owned(), TrackMeasure { voices });
        document.measures.push(Measure { index: 1, tracks });
        assert_eq!(document.string_count(&track), 7);
    }
}
