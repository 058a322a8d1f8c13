//! The rendering graph and the audio clock it carries.
//!
//! Every sound is a [`Voice`] pinned to an absolute frame on the graph's clock and
//! routed to a per-track bus. The live session renders the graph block by block
//! from the device callback; the exporter renders a fresh graph in one go.

use groove_shared::project::clamp_unit;
use groove_shared::Track;
use uuid::Uuid;

use crate::mixer::TrackBus;
use crate::nodes::{AudioNode, GainNode};
use crate::timebase::{frames_to_seconds, seconds_to_frames};

pub type VoiceId = u64;

/// One sounding (or about to sound) instance: a synth note or a drum hit.
pub trait Voice: Send {
    /// First frame at which the voice may produce sound.
    fn start_frame(&self) -> u64;

    /// First frame from which the voice is permanently silent.
    fn end_frame(&self) -> u64;

    /// Add this voice's output to `out` (interleaved stereo), where frame 0 of
    /// `out` is absolute frame `block_start`.
    fn render(&mut self, out: &mut [f32], block_start: u64);

    /// Start a release at absolute `frame`, ending in silence.
    fn release(&mut self, frame: u64);
}

pub struct AudioGraph {
    sample_rate: u32,
    frame: u64,
    buses: Vec<TrackBus>,
    next_voice_id: VoiceId,
    master: GainNode,
}

impl AudioGraph {
    pub fn new(sample_rate: u32) -> Self {
        Self {
            sample_rate,
            frame: 0,
            buses: Vec::new(),
            next_voice_id: 1,
            master: GainNode::new(1.0),
        }
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    pub fn current_frame(&self) -> u64 {
        self.frame
    }

    /// Audio-clock time of the next frame to be rendered.
    pub fn current_time(&self) -> f64 {
        frames_to_seconds(self.frame, self.sample_rate)
    }

    pub fn frame_at(&self, seconds: f64) -> u64 {
        seconds_to_frames(seconds, self.sample_rate)
    }

    pub fn set_master_volume(&mut self, volume: f32) {
        self.master.gain = clamp_unit(volume);
    }

    /// Bring bus parameters in line with the current track list. Buses of removed
    /// tracks are dropped once their voices and inserts have nothing left to play.
    pub fn sync_tracks(&mut self, tracks: &[Track]) {
        let sample_rate = self.sample_rate as f32;
        for track in tracks {
            self.bus_mut(track.id).apply_track(track, sample_rate);
        }
        self.buses.retain(|bus| {
            tracks.iter().any(|t| t.id == bus.track_id) || !bus.voices.is_empty()
        });
    }

    fn bus_mut(&mut self, track_id: Uuid) -> &mut TrackBus {
        let index = match self.buses.iter().position(|b| b.track_id == track_id) {
            Some(index) => index,
            None => {
                self.buses.push(TrackBus::new(track_id));
                self.buses.len() - 1
            }
        };
        &mut self.buses[index]
    }

    pub fn add_voice(&mut self, track_id: Uuid, voice: Box<dyn Voice>) -> VoiceId {
        let id = self.next_voice_id;
        self.next_voice_id += 1;
        self.bus_mut(track_id).voices.push((id, voice));
        id
    }

    /// Whether the voice is still pending or sounding.
    pub fn is_live(&self, id: VoiceId) -> bool {
        self.buses
            .iter()
            .flat_map(|bus| bus.voices.iter())
            .any(|(voice_id, voice)| *voice_id == id && voice.end_frame() > self.frame)
    }

    pub fn release_voice(&mut self, id: VoiceId, frame: u64) -> bool {
        for bus in self.buses.iter_mut() {
            if let Some((_, voice)) = bus.voices.iter_mut().find(|(voice_id, _)| *voice_id == id) {
                voice.release(frame);
                return true;
            }
        }
        false
    }

    /// Discard voices that have not started yet and release everything sounding.
    pub fn release_all(&mut self) {
        let now = self.frame;
        for bus in self.buses.iter_mut() {
            bus.voices.retain(|(_, voice)| voice.start_frame() <= now);
            for (_, voice) in bus.voices.iter_mut() {
                voice.release(now);
            }
        }
    }

    /// Silence effect tails on every bus.
    pub fn reset_inserts(&mut self) {
        for bus in self.buses.iter_mut() {
            bus.reset_inserts();
        }
    }

    pub fn voice_count(&self) -> usize {
        self.buses.iter().map(|bus| bus.voices.len()).sum()
    }

    /// Render the next block into `out` (interleaved stereo) and advance the clock.
    pub fn render(&mut self, out: &mut [f32]) {
        let frames = out.len() / 2;
        out.fill(0.0);

        let sample_rate = self.sample_rate as f32;
        for bus in self.buses.iter_mut() {
            bus.render_into(out, self.frame, frames, sample_rate);
        }
        self.master.process(out, sample_rate);

        self.frame += frames as u64;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Constant DC voice for routing tests.
    struct Dc {
        start: u64,
        end: u64,
        level: f32,
    }

    impl Voice for Dc {
        fn start_frame(&self) -> u64 {
            self.start
        }
        fn end_frame(&self) -> u64 {
            self.end
        }
        fn render(&mut self, out: &mut [f32], block_start: u64) {
            for (i, frame) in out.chunks_exact_mut(2).enumerate() {
                let abs = block_start + i as u64;
                if abs >= self.start && abs < self.end {
                    frame[0] += self.level;
                    frame[1] += self.level;
                }
            }
        }
        fn release(&mut self, frame: u64) {
            self.end = self.end.min(frame.max(self.start));
        }
    }

    #[test]
    fn voices_sound_at_their_scheduled_frame() {
        let mut graph = AudioGraph::new(1000);
        let track = Track::default();
        graph.sync_tracks(std::slice::from_ref(&track));
        graph.add_voice(track.id, Box::new(Dc { start: 5, end: 8, level: 0.5 }));

        let mut out = vec![0.0; 20];
        graph.render(&mut out);
        let left: Vec<f32> = out.iter().step_by(2).copied().collect();
        let expected: Vec<f32> = (0..10)
            .map(|i| if (5..8).contains(&i) { 0.5 * track.volume } else { 0.0 })
            .collect();
        assert_eq!(left, expected);
        assert_eq!(graph.current_frame(), 10);
        assert_eq!(graph.voice_count(), 0);
    }

    #[test]
    fn release_all_drops_pending_and_cuts_sounding() {
        let mut graph = AudioGraph::new(1000);
        let id = Uuid::new_v4();
        let sounding = graph.add_voice(id, Box::new(Dc { start: 0, end: 100, level: 1.0 }));
        let pending = graph.add_voice(id, Box::new(Dc { start: 50, end: 100, level: 1.0 }));

        let mut out = vec![0.0; 20];
        graph.render(&mut out);
        graph.release_all();

        assert!(!graph.is_live(pending));
        assert!(!graph.is_live(sounding));
        graph.render(&mut out);
        assert!(out.iter().all(|&s| s == 0.0));
    }

    #[test]
    fn nan_master_volume_mutes_instead_of_poisoning() {
        let mut graph = AudioGraph::new(1000);
        let id = Uuid::new_v4();
        graph.add_voice(id, Box::new(Dc { start: 0, end: 10, level: 1.0 }));
        graph.set_master_volume(f32::NAN);

        let mut out = vec![0.0; 20];
        graph.render(&mut out);
        assert!(out.iter().all(|&s| s == 0.0));
    }

    #[test]
    fn block_size_does_not_change_output() {
        let id = Uuid::new_v4();
        let render = |block: usize| {
            let mut graph = AudioGraph::new(1000);
            graph.add_voice(id, Box::new(Dc { start: 3, end: 17, level: 0.25 }));
            let mut all = Vec::new();
            let mut out = vec![0.0; block * 2];
            for _ in 0..(24 / block) {
                graph.render(&mut out);
                all.extend_from_slice(&out);
            }
            all
        };
        assert_eq!(render(4), render(8));
        assert_eq!(render(1), render(24));
    }
}
