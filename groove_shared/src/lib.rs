pub mod error;
pub mod project;

pub use error::ModelError;
pub use project::{
    DrumKind, DrumPattern, DrumStep, EffectSettings, Note, PitchClass, Schedulable, SynthSettings,
    Track, TrackKind, Transport, Waveform,
};

/// Sixteenth notes per quarter-note beat.
pub const STEPS_PER_BEAT: u32 = 4;
/// Steps in one 4/4 measure.
pub const STEPS_PER_MEASURE: u32 = 16;

pub const MIN_BPM: f64 = 20.0;
pub const MAX_BPM: f64 = 999.0;

// Engine output is always interleaved stereo
pub const CHANNEL_COUNT: usize = 2;
