use groove_shared::{DrumKind, PitchClass};
use uuid::Uuid;

/// Requests from the editor thread to the audio callback.
#[derive(Debug, Clone, PartialEq)]
pub enum EngineCommand {
    Play,
    Pause,
    Stop,
    SetBpm(f64),
    SetMeasures(u32),
    SetMasterVolume(f32),
    // Auditioning, independent of the transport
    PreviewNote {
        track_id: Uuid,
        pitch: PitchClass,
        octave: i32,
        velocity: f32,
        duration_seconds: f64,
    },
    StopNote {
        track_id: Uuid,
        pitch: PitchClass,
        octave: i32,
    },
    PreviewDrum {
        track_id: Uuid,
        kind: DrumKind,
        velocity: f32,
    },
}
