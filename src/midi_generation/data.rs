#[derive(Debug, Clone, Copy)]
pub struct MidiGenerationOptions {
    pub ticks_per_beat: u16,
}

impl Default for MidiGenerationOptions {
    fn default() -> Self {
        MidiGenerationOptions {
            ticks_per_beat: 480,
        }
    }
}

/// Encoded file plus everything that was quietly dropped along the way.
#[derive(Debug, Clone)]
pub struct MidiOutput {
    pub bytes: Vec<u8>,
    pub warnings: Vec<String>,
}
