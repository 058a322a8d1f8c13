use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

use crate::error::ModelError;

/// The twelve semitone names of 12-TET. Enharmonic spellings parse to the same value.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum PitchClass {
    C,
    CSharp,
    D,
    DSharp,
    E,
    F,
    FSharp,
    G,
    GSharp,
    A,
    ASharp,
    B,
}

impl PitchClass {
    pub const ALL: [PitchClass; 12] = [
        PitchClass::C,
        PitchClass::CSharp,
        PitchClass::D,
        PitchClass::DSharp,
        PitchClass::E,
        PitchClass::F,
        PitchClass::FSharp,
        PitchClass::G,
        PitchClass::GSharp,
        PitchClass::A,
        PitchClass::ASharp,
        PitchClass::B,
    ];

    /// Semitone offset from C (C = 0 .. B = 11).
    pub fn semitone(self) -> i32 {
        self as i32
    }

    pub fn from_semitone(semitone: i32) -> Self {
        Self::ALL[semitone.rem_euclid(12) as usize]
    }

    pub fn name(self) -> &'static str {
        match self {
            PitchClass::C => "C",
            PitchClass::CSharp => "C#",
            PitchClass::D => "D",
            PitchClass::DSharp => "D#",
            PitchClass::E => "E",
            PitchClass::F => "F",
            PitchClass::FSharp => "F#",
            PitchClass::G => "G",
            PitchClass::GSharp => "G#",
            PitchClass::A => "A",
            PitchClass::ASharp => "A#",
            PitchClass::B => "B",
        }
    }
}

impl FromStr for PitchClass {
    type Err = ModelError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let invalid = || ModelError::InvalidPitch(s.to_string());
        let mut chars = s.trim().chars();

        let base = match chars.next().map(|c| c.to_ascii_uppercase()) {
            Some('C') => 0,
            Some('D') => 2,
            Some('E') => 4,
            Some('F') => 5,
            Some('G') => 7,
            Some('A') => 9,
            Some('B') => 11,
            _ => return Err(invalid()),
        };

        let accidental = match chars.next() {
            None => 0,
            Some('#') | Some('♯') => 1,
            Some('b') | Some('♭') => -1,
            Some(_) => return Err(invalid()),
        };

        if chars.next().is_some() {
            return Err(invalid());
        }

        Ok(Self::from_semitone(base + accidental))
    }
}

impl TryFrom<String> for PitchClass {
    type Error = ModelError;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        value.parse()
    }
}

impl From<PitchClass> for String {
    fn from(value: PitchClass) -> Self {
        value.name().to_string()
    }
}

impl fmt::Display for PitchClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

pub const MIN_OCTAVE: i32 = -1;
pub const MAX_OCTAVE: i32 = 9;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Note {
    pub id: Uuid,
    pub pitch: PitchClass,
    pub octave: i32,
    /// Start position in steps. Fractional values allowed.
    pub start: f64,
    /// Length in steps, > 0.
    pub duration: f64,
    pub velocity: f32,
}

impl Note {
    /// Build a note from editor input. Bounded fields are clamped, positions are validated.
    pub fn new(
        pitch: PitchClass,
        octave: i32,
        start: f64,
        duration: f64,
        velocity: f32,
    ) -> Result<Self, ModelError> {
        let note = Self {
            id: Uuid::new_v4(),
            pitch,
            octave: octave.clamp(MIN_OCTAVE, MAX_OCTAVE),
            start,
            duration,
            velocity: clamp_unit(velocity),
        };
        note.validate()?;
        Ok(note)
    }

    /// Check the invariants required for scheduling. Editors mutate notes in place,
    /// so the engine re-checks this on every pass.
    pub fn validate(&self) -> Result<(), ModelError> {
        if !(self.start.is_finite() && self.start >= 0.0) {
            return Err(ModelError::InvalidStart(self.start));
        }
        if !(self.duration.is_finite() && self.duration > 0.0) {
            return Err(ModelError::InvalidDuration(self.duration));
        }
        Ok(())
    }

    pub fn end(&self) -> f64 {
        self.start + self.duration
    }

    pub fn clamped_velocity(&self) -> f32 {
        clamp_unit(self.velocity)
    }

    pub fn clamped_octave(&self) -> i32 {
        self.octave.clamp(MIN_OCTAVE, MAX_OCTAVE)
    }
}

/// The five procedural drum voices.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum DrumKind {
    Kick,
    Snare,
    ClosedHat,
    OpenHat,
    Crash,
}

impl DrumKind {
    pub const ALL: [DrumKind; 5] = [
        DrumKind::Kick,
        DrumKind::Snare,
        DrumKind::ClosedHat,
        DrumKind::OpenHat,
        DrumKind::Crash,
    ];

    pub fn index(self) -> usize {
        self as usize
    }

    /// Map a note on a drum track to a drum voice (General MIDI pitch classes:
    /// C=36 kick, D=38 snare, F#=42 closed hat, A#=46 open hat, C#=49 crash).
    pub fn from_pitch(pitch: PitchClass) -> Option<Self> {
        match pitch {
            PitchClass::C => Some(DrumKind::Kick),
            PitchClass::D => Some(DrumKind::Snare),
            PitchClass::FSharp => Some(DrumKind::ClosedHat),
            PitchClass::ASharp => Some(DrumKind::OpenHat),
            PitchClass::CSharp => Some(DrumKind::Crash),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            DrumKind::Kick => "kick",
            DrumKind::Snare => "snare",
            DrumKind::ClosedHat => "closed hat",
            DrumKind::OpenHat => "open hat",
            DrumKind::Crash => "crash",
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DrumStep {
    pub kick: bool,
    pub snare: bool,
    pub closed_hat: bool,
    pub open_hat: bool,
    pub crash: bool,
    pub velocity: f32,
}

impl Default for DrumStep {
    fn default() -> Self {
        Self {
            kick: false,
            snare: false,
            closed_hat: false,
            open_hat: false,
            crash: false,
            velocity: 0.8,
        }
    }
}

impl DrumStep {
    pub fn is_active(&self, kind: DrumKind) -> bool {
        match kind {
            DrumKind::Kick => self.kick,
            DrumKind::Snare => self.snare,
            DrumKind::ClosedHat => self.closed_hat,
            DrumKind::OpenHat => self.open_hat,
            DrumKind::Crash => self.crash,
        }
    }

    pub fn set(&mut self, kind: DrumKind, active: bool) {
        let flag = match kind {
            DrumKind::Kick => &mut self.kick,
            DrumKind::Snare => &mut self.snare,
            DrumKind::ClosedHat => &mut self.closed_hat,
            DrumKind::OpenHat => &mut self.open_hat,
            DrumKind::Crash => &mut self.crash,
        };
        *flag = active;
    }

    pub fn active_kinds(&self) -> impl Iterator<Item = DrumKind> + '_ {
        DrumKind::ALL.into_iter().filter(|kind| self.is_active(*kind))
    }

    pub fn is_empty(&self) -> bool {
        self.active_kinds().next().is_none()
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DrumPattern {
    pub steps: Vec<DrumStep>,
    pub length: usize,
}

impl Default for DrumPattern {
    fn default() -> Self {
        Self {
            steps: vec![DrumStep::default(); 16],
            length: 16,
        }
    }
}

impl DrumPattern {
    pub fn new(length: usize) -> Result<Self, ModelError> {
        if length == 0 {
            return Err(ModelError::EmptyPattern);
        }
        Ok(Self {
            steps: vec![DrumStep::default(); length],
            length,
        })
    }

    /// Number of steps that actually loop: the declared length, bounded by the stored steps.
    pub fn loop_len(&self) -> usize {
        self.length.min(self.steps.len())
    }

    /// Pattern index for an absolute (never reset) step counter.
    pub fn index_for(&self, absolute_step: u64) -> Option<usize> {
        let len = self.loop_len() as u64;
        if len == 0 {
            return None;
        }
        Some((absolute_step % len) as usize)
    }

    pub fn step(&self, index: usize) -> Option<&DrumStep> {
        if index < self.loop_len() {
            self.steps.get(index)
        } else {
            None
        }
    }

    pub fn step_mut(&mut self, index: usize) -> Option<&mut DrumStep> {
        if index < self.loop_len() {
            self.steps.get_mut(index)
        } else {
            None
        }
    }

    pub fn is_empty(&self) -> bool {
        self.steps[..self.loop_len()].iter().all(DrumStep::is_empty)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Waveform {
    Sine,
    Square,
    Sawtooth,
    Triangle,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SynthSettings {
    pub waveform: Waveform,
    /// Seconds
    pub attack: f64,
    /// Seconds
    pub decay: f64,
    /// Level fraction of the peak, 0..1
    pub sustain: f32,
    /// Seconds
    pub release: f64,
    pub filter_cutoff_hz: f32,
    pub filter_q: f32,
}

impl Default for SynthSettings {
    fn default() -> Self {
        Self {
            waveform: Waveform::Sawtooth,
            attack: 0.01,
            decay: 0.1,
            sustain: 0.7,
            release: 0.2,
            filter_cutoff_hz: 2000.0,
            filter_q: 1.0,
        }
    }
}

impl SynthSettings {
    /// Bass tracks without explicit settings get a darker default.
    pub fn bass() -> Self {
        Self {
            waveform: Waveform::Square,
            attack: 0.005,
            decay: 0.15,
            sustain: 0.6,
            release: 0.1,
            filter_cutoff_hz: 800.0,
            filter_q: 1.5,
        }
    }

    /// Copy with every field forced into a usable range.
    pub fn sanitized(&self) -> Self {
        let time = |t: f64| if t.is_finite() { t.max(0.0) } else { 0.0 };
        Self {
            waveform: self.waveform,
            attack: time(self.attack),
            decay: time(self.decay),
            sustain: clamp_unit(self.sustain),
            release: time(self.release),
            filter_cutoff_hz: if self.filter_cutoff_hz.is_finite() {
                self.filter_cutoff_hz.max(10.0)
            } else {
                20_000.0
            },
            filter_q: if self.filter_q.is_finite() {
                self.filter_q.max(0.01)
            } else {
                0.707
            },
        }
    }
}

/// The single insert point per track: a lowpass filter or a feedback delay.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum EffectSettings {
    Lowpass { cutoff_hz: f32, q: f32 },
    Delay { time_seconds: f32, feedback: f32, mix: f32 },
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum TrackKind {
    Synth,
    Drum,
    Bass,
    Audio,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Track {
    pub id: Uuid,
    pub name: String,
    pub kind: TrackKind,
    pub volume: f32,
    pub pan: f32,
    pub muted: bool,
    pub soloed: bool,
    pub notes: Vec<Note>,
    pub drum_pattern: Option<DrumPattern>,
    pub synth_settings: Option<SynthSettings>,
    pub effects: Vec<EffectSettings>,
}

impl Default for Track {
    fn default() -> Self {
        Self {
            id: Uuid::new_v4(),
            name: "New Track".to_string(),
            kind: TrackKind::Synth,
            volume: 0.8,
            pan: 0.0,
            muted: false,
            soloed: false,
            notes: Vec::new(),
            drum_pattern: None,
            synth_settings: None,
            effects: Vec::new(),
        }
    }
}

/// The events a track contributes to one playback pass, with the
/// "notes win when non-empty" rule already applied.
#[derive(Debug, Clone, Copy)]
pub enum Schedulable<'a> {
    Notes(&'a [Note]),
    Pattern(&'a DrumPattern),
    Silent,
}

impl Track {
    pub fn new(kind: TrackKind) -> Self {
        Self {
            kind,
            name: match kind {
                TrackKind::Synth => "Synth",
                TrackKind::Drum => "Drums",
                TrackKind::Bass => "Bass",
                TrackKind::Audio => "Audio",
            }
            .to_string(),
            ..Self::default()
        }
    }

    pub fn is_pitched(&self) -> bool {
        matches!(self.kind, TrackKind::Synth | TrackKind::Bass)
    }

    /// Synth settings every voice of this track uses.
    pub fn voice_settings(&self) -> SynthSettings {
        match (self.synth_settings, self.kind) {
            (Some(settings), _) => settings.sanitized(),
            (None, TrackKind::Bass) => SynthSettings::bass(),
            (None, _) => SynthSettings::default(),
        }
    }

    pub fn clamped_volume(&self) -> f32 {
        clamp_unit(self.volume)
    }

    pub fn clamped_pan(&self) -> f32 {
        if self.pan.is_finite() {
            self.pan.clamp(-1.0, 1.0)
        } else {
            0.0
        }
    }

    pub fn schedulable(&self) -> Schedulable<'_> {
        match self.kind {
            TrackKind::Audio => Schedulable::Silent,
            _ if !self.notes.is_empty() => Schedulable::Notes(&self.notes),
            TrackKind::Drum => match &self.drum_pattern {
                Some(pattern) if !pattern.is_empty() => Schedulable::Pattern(pattern),
                _ => Schedulable::Silent,
            },
            _ => Schedulable::Silent,
        }
    }
}

/// Apply solo before tracks reach the engine: when any track is soloed,
/// only soloed tracks remain.
pub fn audible_tracks(tracks: &[Track]) -> Vec<Track> {
    let any_solo = tracks.iter().any(|t| t.soloed);
    tracks
        .iter()
        .filter(|t| !any_solo || t.soloed)
        .cloned()
        .collect()
}

/// Transport snapshot polled by the editor for redraw.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Transport {
    pub bpm: f64,
    pub is_playing: bool,
    /// Frozen while paused.
    pub elapsed_seconds: f64,
    pub playhead_steps: f64,
    pub max_steps: f64,
}

impl Default for Transport {
    fn default() -> Self {
        Self {
            bpm: 120.0,
            is_playing: false,
            elapsed_seconds: 0.0,
            playhead_steps: 0.0,
            max_steps: max_steps(8),
        }
    }
}

pub fn max_steps(measures: u32) -> f64 {
    measures as f64 * crate::STEPS_PER_MEASURE as f64
}

/// Clamp to `0..=1`, mapping NaN and infinities to 0.
pub fn clamp_unit(value: f32) -> f32 {
    if value.is_finite() {
        value.clamp(0.0, 1.0)
    } else {
        0.0
    }
}
