//! Procedural drum kit.
//!
//! Each of the five voices is synthesized once per machine into a mono buffer and
//! shared from then on. Noise comes from a fixed seed per kind, so the buffers are
//! identical on every run.

use std::f64::consts::TAU;
use std::sync::{Arc, OnceLock};

use groove_shared::project::clamp_unit;
use groove_shared::DrumKind;
use uuid::Uuid;

use crate::events::DrumEvent;
use crate::graph::{AudioGraph, Voice, VoiceId};
use crate::synth::HEADROOM;

/// Fade applied when a drum hit is cut short by stop.
const CHOKE_SECONDS: f64 = 0.01;

pub struct DrumMachine {
    sample_rate: u32,
    buffers: [OnceLock<Arc<[f32]>>; 5],
}

impl DrumMachine {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            sample_rate,
            buffers: Default::default(),
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// The cached buffer for `kind`, synthesizing it on first use. Concurrent
    /// callers block on the same initialization and share its result.
    pub fn buffer(&self, kind: DrumKind) -> Arc<[f32]> {
        self.buffers[kind.index()]
            .get_or_init(|| {
                let buffer = synthesize(kind, self.sample_rate);
                log::debug!(
                    "[DrumMachine] Rendered {} ({} samples @ {} Hz)",
                    kind.name(),
                    buffer.len(),
                    self.sample_rate
                );
                buffer.into()
            })
            .clone()
    }

    /// Render all five buffers up front so the audio callback never pays for it.
    pub fn preload(&self) {
        for kind in DrumKind::ALL {
            self.buffer(kind);
        }
    }

    pub fn play_drum_sound(
        &self,
        graph: &mut AudioGraph,
        track_id: Uuid,
        kind: DrumKind,
        velocity: f32,
    ) -> VoiceId {
        let now = graph.current_time();
        self.play_drum_sound_at_time(graph, track_id, kind, velocity, now)
    }

    pub fn play_drum_sound_at_time(
        &self,
        graph: &mut AudioGraph,
        track_id: Uuid,
        kind: DrumKind,
        velocity: f32,
        when_seconds: f64,
    ) -> VoiceId {
        let start_frame = graph.frame_at(when_seconds.max(0.0));
        let voice = DrumVoice::new(self.buffer(kind), velocity, start_frame, graph.sample_rate());
        graph.add_voice(track_id, Box::new(voice))
    }

    pub fn trigger(&self, graph: &mut AudioGraph, event: &DrumEvent) -> VoiceId {
        self.play_drum_sound_at_time(
            graph,
            event.track_id,
            event.kind,
            event.velocity,
            event.start_seconds,
        )
    }
}

/// Playback of a cached drum buffer through its own gain.
pub struct DrumVoice {
    buffer: Arc<[f32]>,
    gain: f32,
    start_frame: u64,
    end_frame: u64,
    choke: Option<(u64, u64)>,
    choke_frames: u64,
}

impl DrumVoice {
    pub fn new(buffer: Arc<[f32]>, velocity: f32, start_frame: u64, sample_rate: u32) -> Self {
        let velocity = clamp_unit(velocity);
        Self {
            end_frame: start_frame + buffer.len() as u64,
            buffer,
            gain: velocity * HEADROOM,
            start_frame,
            choke: None,
            choke_frames: ((CHOKE_SECONDS * sample_rate as f64) as u64).max(1),
        }
    }

    fn choke_gain(&self, abs: u64) -> f32 {
        match self.choke {
            Some((from, len)) if abs >= from => 1.0 - ((abs - from) as f32 / len as f32).min(1.0),
            _ => 1.0,
        }
    }
}

impl Voice for DrumVoice {
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
            let raw = self.buffer[(abs - self.start_frame) as usize];
            let sample = raw * self.gain * self.choke_gain(abs);
            frame[0] += sample;
            frame[1] += sample;
        }
    }

    fn release(&mut self, frame: u64) {
        if frame <= self.start_frame {
            self.end_frame = self.start_frame;
            return;
        }
        if frame >= self.end_frame || self.choke.is_some() {
            return;
        }
        self.choke = Some((frame, self.choke_frames));
        self.end_frame = self.end_frame.min(frame + self.choke_frames);
    }
}

/// Synthesize one drum voice as a mono buffer normalized to a peak of 1.
pub fn synthesize(kind: DrumKind, sample_rate: u32) -> Vec<f32> {
    let sr = sample_rate as f64;
    let mut buffer = match kind {
        DrumKind::Kick => kick(sr),
        DrumKind::Snare => snare(sr),
        DrumKind::ClosedHat => hat(sr, 0.08, 0.015, 0.0, 0x48A7),
        DrumKind::OpenHat => hat(sr, 0.5, 0.12, 0.03, 0x09E4),
        DrumKind::Crash => crash(sr),
    };
    normalize(&mut buffer);
    buffer
}

fn frames(seconds: f64, sr: f64) -> usize {
    (seconds * sr).ceil() as usize
}

fn normalize(buffer: &mut [f32]) {
    let peak = buffer.iter().fold(0.0f32, |max, &s| max.max(s.abs()));
    if peak > 1e-9 {
        for s in buffer.iter_mut() {
            *s /= peak;
        }
    }
}

/// White noise in [-1, 1) from a fixed seed.
fn noise(rng: &mut fastrand::Rng) -> f64 {
    rng.f64() * 2.0 - 1.0
}

/// Linear ramp from 0 to 1 over `attack` seconds.
fn attack_ramp(t: f64, attack: f64) -> f64 {
    if t < attack { t / attack } else { 1.0 }
}

/// One-pole highpass, enough to push noise up into the cymbal range.
struct Highpass {
    alpha: f64,
    prev_in: f64,
    prev_out: f64,
}

impl Highpass {
    fn new(cutoff_hz: f64, sr: f64) -> Self {
        let rc = 1.0 / (TAU * cutoff_hz);
        let dt = 1.0 / sr;
        Self {
            alpha: rc / (rc + dt),
            prev_in: 0.0,
            prev_out: 0.0,
        }
    }

    fn next(&mut self, x: f64) -> f64 {
        let y = self.alpha * (self.prev_out + x - self.prev_in);
        self.prev_in = x;
        self.prev_out = y;
        y
    }
}

fn kick(sr: f64) -> Vec<f32> {
    let len = frames(0.5, sr);
    let mut rng = fastrand::Rng::with_seed(0x0C1C);
    let (start_hz, end_hz, sweep) = (90.0f64, 45.0f64, 0.08f64);

    let mut phase = 0.0f64;
    let mut sub_phase = 0.0f64;
    (0..len)
        .map(|i| {
            let t = i as f64 / sr;
            // Exponential glide from start_hz to end_hz, then hold
            let hz = start_hz * (end_hz / start_hz).powf((t / sweep).min(1.0));
            phase += TAU * hz / sr;
            sub_phase += TAU * hz * 0.5 / sr;

            let body = phase.sin() * (-t / 0.15).exp();
            let sub = sub_phase.sin() * 0.5 * (-t / 0.22).exp();
            let click = if t < 0.005 { noise(&mut rng) * 0.4 * (-t / 0.0015).exp() } else { 0.0 };

            ((body + sub + click) * attack_ramp(t, 0.002)) as f32
        })
        .collect()
}

fn snare(sr: f64) -> Vec<f32> {
    let len = frames(0.25, sr);
    let mut rng = fastrand::Rng::with_seed(0x5A4E);
    let mut hp = Highpass::new(1200.0, sr);

    (0..len)
        .map(|i| {
            let t = i as f64 / sr;
            let body = (TAU * 180.0 * t).sin() + 0.5 * (TAU * 330.0 * t).sin();
            let tone = body * (-t / 0.05).exp();
            let rattle = hp.next(noise(&mut rng)) * (-t / 0.07).exp();
            ((0.45 * tone + 0.8 * rattle) * attack_ramp(t, 0.001)) as f32
        })
        .collect()
}

/// Square-wave partial ratios of the classic analog hat.
const METAL_RATIOS: [f64; 6] = [2.0, 3.0, 4.16, 5.43, 6.79, 8.21];
const METAL_BASE_HZ: f64 = 400.0;

/// Hat family: metallic partials plus high-passed noise. `drift` bends the
/// partials down by that fraction over the length of the hit.
fn hat(sr: f64, length: f64, decay: f64, drift: f64, seed: u64) -> Vec<f32> {
    let len = frames(length, sr);
    let mut rng = fastrand::Rng::with_seed(seed);
    let mut hp_noise = Highpass::new(7000.0, sr);
    let mut hp_metal = Highpass::new(6000.0, sr);
    let mut phases = [0.0f64; METAL_RATIOS.len()];

    (0..len)
        .map(|i| {
            let t = i as f64 / sr;
            let bend = 1.0 - drift * (t / length);

            let mut metal = 0.0;
            for (phase, ratio) in phases.iter_mut().zip(METAL_RATIOS) {
                *phase = (*phase + METAL_BASE_HZ * ratio * bend / sr).fract();
                metal += if *phase < 0.5 { 1.0 } else { -1.0 };
            }
            metal /= METAL_RATIOS.len() as f64;

            let env = (-t / decay).exp() * attack_ramp(t, 0.0005);
            let s = 0.6 * hp_metal.next(metal) + 0.7 * hp_noise.next(noise(&mut rng));
            (s * env) as f32
        })
        .collect()
}

fn crash(sr: f64) -> Vec<f32> {
    let length = 2.0;
    let len = frames(length, sr);
    let mut rng = fastrand::Rng::with_seed(0xC2A5);
    let mut hp_low = Highpass::new(3000.0, sr);
    let mut hp_high = Highpass::new(8000.0, sr);
    let shimmer = [(3_150.0, 5.3), (4_730.0, 7.1), (6_320.0, 3.7), (8_950.0, 9.4)];

    (0..len)
        .map(|i| {
            let t = i as f64 / sr;
            let n = noise(&mut rng);
            let wash = 0.6 * hp_low.next(n) + 0.5 * hp_high.next(n);

            let mut partials = 0.0;
            for (hz, wobble_hz) in shimmer {
                let wobble = 0.5 + 0.5 * (TAU * wobble_hz * t).sin();
                partials += (TAU * hz * t).sin() * wobble;
            }
            partials *= 0.08;

            // Fixed 2 s envelope: exponential body, forced to 0 at the end
            let env = (-t / 0.6).exp() * (1.0 - t / length).max(0.0) * attack_ramp(t, 0.001);
            ((wash + partials) * env) as f32
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::thread;

    const SR: u32 = 44_100;

    fn energy(buf: &[f32]) -> f64 {
        buf.iter().map(|&s| (s as f64) * (s as f64)).sum()
    }

    #[test]
    fn every_kind_renders_a_normalized_buffer() {
        for kind in DrumKind::ALL {
            let buf = synthesize(kind, SR);
            let peak = buf.iter().fold(0.0f32, |m, &s| m.max(s.abs()));
            assert!((peak - 1.0).abs() < 1e-6, "{} peak {}", kind.name(), peak);
            assert!(buf.iter().all(|s| s.is_finite()));
        }
    }

    #[test]
    fn lengths_follow_each_recipe() {
        let len = |kind| synthesize(kind, SR).len();
        assert!(len(DrumKind::ClosedHat) < len(DrumKind::Snare));
        assert!(len(DrumKind::Snare) < len(DrumKind::OpenHat));
        assert_eq!(len(DrumKind::Crash), 2 * SR as usize);
    }

    #[test]
    fn crash_envelope_reaches_silence() {
        let buf = synthesize(DrumKind::Crash, SR);
        let tail = &buf[buf.len() - 100..];
        assert!(tail.iter().all(|s| s.abs() < 1e-3));
    }

    #[test]
    fn open_hat_rings_longer_than_closed_hat() {
        let window = |buf: &[f32]| energy(&buf[frames(0.06, SR as f64)..frames(0.08, SR as f64)]);
        let closed = synthesize(DrumKind::ClosedHat, SR);
        let open = synthesize(DrumKind::OpenHat, SR);
        assert!(window(&open) > window(&closed) * 10.0);
    }

    #[test]
    fn synthesis_is_deterministic() {
        for kind in DrumKind::ALL {
            assert_eq!(synthesize(kind, SR), synthesize(kind, SR));
        }
    }

    #[test]
    fn buffers_are_generated_once_and_shared() {
        let machine = Arc::new(DrumMachine::new(SR));
        let handles: Vec<_> = (0..8)
            .map(|_| {
                let machine = machine.clone();
                thread::spawn(move || machine.buffer(DrumKind::Snare))
            })
            .collect();
        let buffers: Vec<Arc<[f32]>> = handles.into_iter().map(|h| h.join().unwrap()).collect();
        for b in &buffers[1..] {
            assert!(Arc::ptr_eq(&buffers[0], b));
        }
        assert!(Arc::ptr_eq(&buffers[0], &machine.buffer(DrumKind::Snare)));
    }

    #[test]
    fn drum_hit_plays_at_requested_time_with_velocity_gain() {
        let machine = DrumMachine::new(1000);
        let mut graph = AudioGraph::new(1000);
        let track = Uuid::new_v4();
        machine.play_drum_sound_at_time(&mut graph, track, DrumKind::Kick, 0.5, 0.01);

        let mut out = vec![0.0; 2 * 40];
        graph.render(&mut out);
        assert!(out[..20].iter().all(|&s| s == 0.0), "sound before its onset");
        let peak = out.iter().fold(0.0f32, |m, &s| m.max(s.abs()));
        assert!(peak > 0.0 && peak <= 0.5 * HEADROOM + 1e-6);
    }

    #[test]
    fn choke_fades_out_quickly() {
        let buffer: Arc<[f32]> = vec![1.0f32; 1000].into();
        let mut voice = DrumVoice::new(buffer, 1.0, 0, 1000);
        voice.release(100);
        assert_eq!(voice.end_frame(), 110);

        let mut out = vec![0.0; 2 * 120];
        voice.render(&mut out, 0);
        assert!(out[2 * 99] > 0.0);
        assert!(out[2 * 105] < out[2 * 101]);
        assert_eq!(out[2 * 115], 0.0);
    }
}
