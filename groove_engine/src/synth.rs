//! Pitched voices: oscillator → lowpass → ADSR gain.

use std::collections::HashMap;

use groove_shared::project::clamp_unit;
use groove_shared::{ModelError, PitchClass, SynthSettings, Waveform};
use uuid::Uuid;

use crate::error::EngineError;
use crate::events::NoteEvent;
use crate::graph::{AudioGraph, Voice, VoiceId};
use crate::nodes::Biquad;

/// Peak gain of a full-velocity voice. Leaves room for several voices to overlap
/// without clipping the master.
pub const HEADROOM: f32 = 0.3;

/// Largest fraction of a note its release may occupy.
const MAX_RELEASE_SHARE: f64 = 0.5;

pub fn midi_number(pitch: PitchClass, octave: i32) -> i32 {
    (octave + 1) * 12 + pitch.semitone()
}

/// Equal-tempered frequency, A4 = 440 Hz.
pub fn frequency(pitch: PitchClass, octave: i32) -> f64 {
    440.0 * 2f64.powf((midi_number(pitch, octave) - 69) as f64 / 12.0)
}

/// Frequency for a pitch given by name. Unknown names are rejected.
pub fn frequency_for(name: &str, octave: i32) -> Result<f64, ModelError> {
    Ok(frequency(name.parse()?, octave))
}

/// Piecewise-linear ADSR gain, in seconds relative to the note onset.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Envelope {
    peak: f32,
    sustain: f32,
    attack: f64,
    decay: f64,
    release_start: f64,
    end: f64,
    release_level: f32,
}

impl Envelope {
    /// Envelope for a note lasting `duration` seconds. The release is fitted inside
    /// the note, so the level is back at 0 when the note ends. The release takes at
    /// most half the note; short notes release from wherever attack/decay got to.
    pub fn new(settings: &SynthSettings, velocity: f32, duration: f64) -> Self {
        let end = if duration.is_finite() { duration.max(0.0) } else { 0.0 };
        let release_len = settings.release.max(0.0).min(end * MAX_RELEASE_SHARE);
        let mut envelope = Self {
            peak: clamp_unit(velocity) * HEADROOM,
            sustain: settings.sustain.clamp(0.0, 1.0),
            attack: settings.attack.max(0.0),
            decay: settings.decay.max(0.0),
            release_start: end - release_len,
            end,
            release_level: 0.0,
        };
        envelope.release_level = envelope.held_level(envelope.release_start);
        envelope
    }

    pub fn peak(&self) -> f32 {
        self.peak
    }

    /// Level ignoring any release: attack ramp, decay ramp, then sustain.
    fn held_level(&self, t: f64) -> f32 {
        if t < self.attack {
            return self.peak * (t / self.attack) as f32;
        }
        let sustain_level = self.peak * self.sustain;
        let td = t - self.attack;
        if td < self.decay {
            self.peak + (sustain_level - self.peak) * (td / self.decay) as f32
        } else {
            sustain_level
        }
    }

    pub fn level_at(&self, t: f64) -> f32 {
        if t < 0.0 || t >= self.end {
            return 0.0;
        }
        if t < self.release_start {
            return self.held_level(t);
        }
        let remaining = (self.end - t) / (self.end - self.release_start);
        self.release_level * remaining as f32
    }

    /// Time at which the level reaches 0 for good.
    pub fn end(&self) -> f64 {
        self.end
    }

    /// Release from whatever level the envelope has at `t`, lasting at most `release`
    /// seconds and never extending past the scheduled end.
    pub fn force_release(&mut self, t: f64, release: f64) {
        let t = t.max(0.0);
        if t >= self.end {
            return;
        }
        self.release_level = self.level_at(t);
        self.end = (t + release.max(0.0)).min(self.end);
        self.release_start = t;
    }
}

#[derive(Debug, Clone)]
pub struct Oscillator {
    waveform: Waveform,
    phase: f64,
    increment: f64,
}

impl Oscillator {
    pub fn new(waveform: Waveform, frequency: f64, sample_rate: f64) -> Self {
        Self {
            waveform,
            phase: 0.0,
            increment: frequency / sample_rate,
        }
    }

    #[inline]
    pub fn next(&mut self) -> f32 {
        let p = self.phase;
        let sample = match self.waveform {
            Waveform::Sine => (p * std::f64::consts::TAU).sin(),
            Waveform::Square => {
                if p < 0.5 {
                    1.0
                } else {
                    -1.0
                }
            }
            Waveform::Sawtooth => 2.0 * p - 1.0,
            Waveform::Triangle => 4.0 * (p - 0.5).abs() - 1.0,
        };
        self.phase = (self.phase + self.increment).fract();
        sample as f32
    }
}

pub struct SynthVoice {
    sample_rate: f64,
    start_frame: u64,
    end_frame: u64,
    release: f64,
    oscillator: Oscillator,
    filter: Biquad,
    envelope: Envelope,
}

impl SynthVoice {
    pub fn new(
        frequency: f64,
        velocity: f32,
        duration_seconds: f64,
        settings: &SynthSettings,
        start_frame: u64,
        sample_rate: u32,
    ) -> Self {
        let sr = sample_rate as f64;
        let envelope = Envelope::new(settings, velocity, duration_seconds);
        Self {
            sample_rate: sr,
            start_frame,
            end_frame: start_frame + (envelope.end() * sr).ceil() as u64,
            release: settings.release,
            oscillator: Oscillator::new(settings.waveform, frequency, sr),
            filter: Biquad::lowpass(
                settings.filter_cutoff_hz,
                settings.filter_q,
                sample_rate as f32,
            ),
            envelope,
        }
    }

    pub fn envelope(&self) -> &Envelope {
        &self.envelope
    }
}

impl Voice for SynthVoice {
    fn start_frame(&self) -> u64 {
        self.start_frame
    }

    fn end_frame(&self) -> u64 {
        self.end_frame
    }

    fn render(&mut self, out: &mut [f32], block_start: u64) {
        for (i, frame) in out.chunks_exact_mut(2).enumerate() {
            let abs = block_start + i as u64;
            if abs < self.start_frame {
                continue;
            }
            if abs >= self.end_frame {
                break;
            }
            let t = (abs - self.start_frame) as f64 / self.sample_rate;
            let sample = self.filter.next(self.oscillator.next()) * self.envelope.level_at(t);
            frame[0] += sample;
            frame[1] += sample;
        }
    }

    fn release(&mut self, frame: u64) {
        if frame <= self.start_frame {
            // Never sounded
            self.end_frame = self.start_frame;
            return;
        }
        let t = (frame - self.start_frame) as f64 / self.sample_rate;
        self.envelope.force_release(t, self.release);
        self.end_frame = self
            .end_frame
            .min(self.start_frame + (self.envelope.end() * self.sample_rate).ceil() as u64);
    }
}

/// Everything needed to start one pitched note.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct NoteRequest {
    pub pitch: PitchClass,
    pub octave: i32,
    pub velocity: f32,
    pub duration_seconds: f64,
    pub settings: SynthSettings,
    /// Absolute audio-clock onset.
    pub start_time_seconds: f64,
}

impl From<&NoteEvent> for NoteRequest {
    fn from(event: &NoteEvent) -> Self {
        Self {
            pitch: event.pitch,
            octave: event.octave,
            velocity: event.velocity,
            duration_seconds: event.duration_seconds,
            settings: event.settings,
            start_time_seconds: event.start_seconds,
        }
    }
}

type PreviewKey = (Uuid, PitchClass, i32);

pub struct Synthesizer {
    /// Voices started by preview, one per (track, pitch, octave).
    preview: HashMap<PreviewKey, VoiceId>,
}

impl Default for Synthesizer {
    fn default() -> Self {
        Self::new()
    }
}

impl Synthesizer {
    pub fn new() -> Self {
        Self {
            preview: HashMap::new(),
        }
    }

    /// Schedule a voice on `track_id`'s bus at the request's absolute start time.
    pub fn play_note(
        &self,
        graph: &mut AudioGraph,
        track_id: Uuid,
        request: &NoteRequest,
    ) -> Result<VoiceId, EngineError> {
        if !(request.duration_seconds.is_finite() && request.duration_seconds > 0.0) {
            return Err(ModelError::InvalidDuration(request.duration_seconds).into());
        }
        if !request.start_time_seconds.is_finite() {
            return Err(ModelError::InvalidStart(request.start_time_seconds).into());
        }

        let settings = request.settings.sanitized();
        let voice = SynthVoice::new(
            frequency(request.pitch, request.octave),
            request.velocity,
            request.duration_seconds,
            &settings,
            graph.frame_at(request.start_time_seconds),
            graph.sample_rate(),
        );
        Ok(graph.add_voice(track_id, Box::new(voice)))
    }

    /// Scheduler entry point. Problems are logged, never propagated into the tick.
    pub fn trigger(&self, graph: &mut AudioGraph, event: &NoteEvent) -> Option<VoiceId> {
        match self.play_note(graph, event.track_id, &NoteRequest::from(event)) {
            Ok(id) => Some(id),
            Err(e) => {
                log::warn!("[Synth] Dropping note {}: {}", event.note_id, e);
                None
            }
        }
    }

    /// Audition a note. A live voice on the same key is released first.
    pub fn preview_note(
        &mut self,
        graph: &mut AudioGraph,
        track_id: Uuid,
        request: &NoteRequest,
    ) -> Result<VoiceId, EngineError> {
        let key = (track_id, request.pitch, request.octave);
        if let Some(previous) = self.preview.remove(&key) {
            graph.release_voice(previous, graph.current_frame());
        }
        let id = self.play_note(graph, track_id, request)?;
        self.preview.insert(key, id);
        Ok(id)
    }

    /// Force release of a previewed note, whatever phase it is in.
    pub fn stop_note(
        &mut self,
        graph: &mut AudioGraph,
        track_id: Uuid,
        pitch: PitchClass,
        octave: i32,
    ) -> bool {
        match self.preview.remove(&(track_id, pitch, octave)) {
            Some(id) => graph.release_voice(id, graph.current_frame()),
            None => false,
        }
    }

    pub fn active_preview_count(&self, graph: &AudioGraph) -> usize {
        self.preview.values().filter(|id| graph.is_live(**id)).count()
    }

    /// Forget preview bookkeeping; the graph releases the voices themselves.
    pub fn clear(&mut self) {
        self.preview.clear();
    }
}
