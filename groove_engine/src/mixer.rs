use groove_shared::{EffectSettings, Track};
use uuid::Uuid;

use crate::graph::{Voice, VoiceId};
use crate::nodes::{build_insert, AudioNode};

/// Per-track channel strip: the voices routed to it, its insert chain, volume and pan.
pub struct TrackBus {
    pub track_id: Uuid,
    pub volume: f32,
    pub pan: f32,
    effect_settings: Vec<EffectSettings>,
    inserts: Vec<Box<dyn AudioNode>>,
    pub(crate) voices: Vec<(VoiceId, Box<dyn Voice>)>,
    buffer: Vec<f32>,
}

impl TrackBus {
    pub fn new(track_id: Uuid) -> Self {
        Self {
            track_id,
            volume: 1.0,
            pan: 0.0,
            effect_settings: Vec::new(),
            inserts: Vec::new(),
            voices: Vec::new(),
            buffer: Vec::new(),
        }
    }

    /// Pick up volume, pan and insert changes from the editor. Inserts are only
    /// rebuilt when their settings change so delay tails survive unrelated edits.
    pub fn apply_track(&mut self, track: &Track, sample_rate: f32) {
        self.volume = track.clamped_volume();
        self.pan = track.clamped_pan();
        if self.effect_settings != track.effects {
            self.effect_settings = track.effects.clone();
            self.inserts = self
                .effect_settings
                .iter()
                .map(|settings| build_insert(settings, sample_rate))
                .collect();
        }
    }

    pub fn has_inserts(&self) -> bool {
        !self.inserts.is_empty()
    }

    /// Clear insert state such as delay tails.
    pub fn reset_inserts(&mut self) {
        for insert in self.inserts.iter_mut() {
            insert.reset();
        }
    }

    /// Render `frames` frames starting at absolute frame `block_start` and add
    /// them to `master` with this bus's volume and pan.
    pub fn render_into(
        &mut self,
        master: &mut [f32],
        block_start: u64,
        frames: usize,
        sample_rate: f32,
    ) {
        if self.buffer.len() != frames * 2 {
            self.buffer.resize(frames * 2, 0.0);
        }
        self.buffer.fill(0.0);

        let block_end = block_start + frames as u64;
        for (_, voice) in self.voices.iter_mut() {
            if voice.start_frame() < block_end && voice.end_frame() > block_start {
                voice.render(&mut self.buffer, block_start);
            }
        }
        self.voices.retain(|(_, voice)| voice.end_frame() > block_end);

        for insert in self.inserts.iter_mut() {
            insert.process(&mut self.buffer, sample_rate);
        }

        mix_to_master(&self.buffer, master, self.volume, self.pan, frames);
    }
}

/// Add one interleaved stereo buffer into the master mix.
pub fn mix_to_master(track_buf: &[f32], master_mix: &mut [f32], vol: f32, pan: f32, frames: usize) {
    let mut l_gain = vol;
    let mut r_gain = vol;

    if pan > 0.0 {
        l_gain *= 1.0 - pan;
    } else if pan < 0.0 {
        r_gain *= 1.0 + pan;
    }

    for i in 0..frames {
        master_mix[i * 2] += track_buf[i * 2] * l_gain;
        master_mix[i * 2 + 1] += track_buf[i * 2 + 1] * r_gain;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hard_pan_silences_the_opposite_side() {
        let buf = vec![1.0; 8];
        let mut master = vec![0.0; 8];
        mix_to_master(&buf, &mut master, 0.5, 1.0, 4);
        assert!(master.chunks(2).all(|f| f[0] == 0.0 && f[1] == 0.5));

        let mut master = vec![0.0; 8];
        mix_to_master(&buf, &mut master, 1.0, -0.5, 4);
        assert!(master.chunks(2).all(|f| f[0] == 1.0 && f[1] == 0.5));
    }

    #[test]
    fn inserts_rebuild_only_on_change() {
        let mut track = Track::default();
        let mut bus = TrackBus::new(track.id);
        bus.apply_track(&track, 44_100.0);
        assert!(!bus.has_inserts());

        track.effects.push(EffectSettings::Lowpass { cutoff_hz: 800.0, q: 0.7 });
        bus.apply_track(&track, 44_100.0);
        assert!(bus.has_inserts());

        track.volume = 3.0;
        bus.apply_track(&track, 44_100.0);
        assert_eq!(bus.volume, 1.0);
        assert!(bus.has_inserts());
    }

    #[test]
    fn reset_clears_delay_tail() {
        let mut track = Track::default();
        track.effects.push(EffectSettings::Delay {
            time_seconds: 0.001,
            feedback: 0.5,
            mix: 1.0,
        });
        let mut bus = TrackBus::new(track.id);
        bus.apply_track(&track, 1000.0);

        let mut impulse = vec![0.0; 8];
        impulse[0] = 1.0;
        bus.inserts[0].process(&mut impulse, 1000.0);

        let mut master = vec![0.0; 8];
        bus.reset_inserts();
        bus.render_into(&mut master, 0, 4, 1000.0);
        assert!(master.iter().all(|&s| s == 0.0));
    }
}
