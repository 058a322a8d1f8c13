//! Everything the audio callback owns.
//!
//! A session couples the graph (and its clock) with the scheduler and the two
//! instruments. The device callback calls [`PlaybackSession::process_block`]; the
//! session splits each block at tick boundaries so scheduling happens at fixed
//! audio-time intervals whatever block size the device asks for.

use std::sync::Arc;

use groove_shared::project::clamp_unit;
use groove_shared::{DrumKind, PitchClass, Track, TrackKind, Transport};
use uuid::Uuid;

use crate::commands::EngineCommand;
use crate::config::EngineConfig;
use crate::drums::DrumMachine;
use crate::error::EngineError;
use crate::events::{EventSink, SoundEvent};
use crate::graph::AudioGraph;
use crate::scheduler::{PlayState, Scheduler};
use crate::synth::{NoteRequest, Synthesizer};

/// Routes scheduled events to the instrument that plays them.
pub struct Dispatch<'a> {
    pub graph: &'a mut AudioGraph,
    pub synth: &'a Synthesizer,
    pub drums: &'a DrumMachine,
}

impl EventSink for Dispatch<'_> {
    fn trigger(&mut self, event: SoundEvent) {
        match event {
            SoundEvent::Note(note) => {
                self.synth.trigger(self.graph, &note);
            }
            SoundEvent::Drum(drum) => {
                self.drums.trigger(self.graph, &drum);
            }
        }
    }
}

pub struct PlaybackSession {
    graph: AudioGraph,
    scheduler: Scheduler,
    synth: Synthesizer,
    drums: Arc<DrumMachine>,
    tick_frames: u64,
    next_tick_frame: u64,
}

impl PlaybackSession {
    pub fn new(config: &EngineConfig) -> Result<Self, EngineError> {
        config.validate()?;
        let drums = Arc::new(DrumMachine::new(config.sample_rate));
        drums.preload();
        Ok(Self::with_drums(config, drums))
    }

    /// Session sharing an existing drum cache. The cache must match the
    /// config's sample rate.
    pub fn with_drums(config: &EngineConfig, drums: Arc<DrumMachine>) -> Self {
        let mut graph = AudioGraph::new(config.sample_rate);
        graph.set_master_volume(config.master_volume);
        let tick_samples = config.tick_interval_seconds * config.sample_rate as f64;
        let tick_frames = (tick_samples.round() as u64).max(1);
        Self {
            graph,
            scheduler: Scheduler::new(config.bpm, config.measures, config.look_ahead_seconds),
            synth: Synthesizer::new(),
            drums,
            tick_frames,
            next_tick_frame: 0,
        }
    }

    pub fn graph(&self) -> &AudioGraph {
        &self.graph
    }

    pub fn scheduler(&self) -> &Scheduler {
        &self.scheduler
    }

    pub fn synth(&self) -> &Synthesizer {
        &self.synth
    }

    pub fn transport(&self) -> Transport {
        self.scheduler.transport()
    }

    pub fn play(&mut self) {
        if self.scheduler.state() == PlayState::Playing {
            return;
        }
        self.scheduler.play(self.graph.current_time());
        // Schedule the first window before anything else is rendered
        self.next_tick_frame = self.graph.current_frame();
    }

    pub fn pause(&mut self) {
        if self.scheduler.state() != PlayState::Playing {
            return;
        }
        self.scheduler.pause(self.graph.current_time());
        self.graph.release_all();
        self.synth.clear();
    }

    pub fn stop(&mut self) {
        self.scheduler.stop();
        self.graph.release_all();
        self.graph.reset_inserts();
        self.synth.clear();
    }

    pub fn set_bpm(&mut self, bpm: f64) -> Result<(), EngineError> {
        self.scheduler.set_bpm(bpm, self.graph.current_time())?;
        Ok(())
    }

    pub fn set_measures(&mut self, measures: u32) {
        self.scheduler.set_measures(measures);
    }

    pub fn set_master_volume(&mut self, volume: f32) {
        self.graph.set_master_volume(volume);
    }

    /// Audition a note now. Drum tracks map the pitch onto a drum kind.
    pub fn preview_note(
        &mut self,
        tracks: &[Track],
        track_id: Uuid,
        pitch: PitchClass,
        octave: i32,
        velocity: f32,
        duration_seconds: f64,
    ) -> Result<(), EngineError> {
        let track = tracks.iter().find(|t| t.id == track_id);
        if let Some(track) = track.filter(|t| t.kind == TrackKind::Drum) {
            match DrumKind::from_pitch(pitch) {
                Some(kind) => self.preview_drum(track.id, kind, velocity),
                None => log::warn!("[Session] No drum mapped to {}{}", pitch, octave),
            }
            return Ok(());
        }

        let settings = track.map(Track::voice_settings).unwrap_or_default();
        let request = NoteRequest {
            pitch,
            octave,
            velocity: clamp_unit(velocity),
            duration_seconds,
            settings,
            start_time_seconds: self.graph.current_time(),
        };
        self.graph.sync_tracks(tracks);
        self.synth.preview_note(&mut self.graph, track_id, &request)?;
        Ok(())
    }

    pub fn stop_note(&mut self, track_id: Uuid, pitch: PitchClass, octave: i32) -> bool {
        self.synth.stop_note(&mut self.graph, track_id, pitch, octave)
    }

    pub fn preview_drum(&mut self, track_id: Uuid, kind: DrumKind, velocity: f32) {
        self.drums.play_drum_sound(&mut self.graph, track_id, kind, velocity);
    }

    pub fn handle_command(
        &mut self,
        command: EngineCommand,
        tracks: &[Track],
    ) -> Result<(), EngineError> {
        match command {
            EngineCommand::Play => self.play(),
            EngineCommand::Pause => self.pause(),
            EngineCommand::Stop => self.stop(),
            EngineCommand::SetBpm(bpm) => self.set_bpm(bpm)?,
            EngineCommand::SetMeasures(measures) => self.set_measures(measures),
            EngineCommand::SetMasterVolume(volume) => self.set_master_volume(volume),
            EngineCommand::PreviewNote {
                track_id,
                pitch,
                octave,
                velocity,
                duration_seconds,
            } => self.preview_note(tracks, track_id, pitch, octave, velocity, duration_seconds)?,
            EngineCommand::StopNote { track_id, pitch, octave } => {
                self.stop_note(track_id, pitch, octave);
            }
            EngineCommand::PreviewDrum { track_id, kind, velocity } => {
                self.preview_drum(track_id, kind, velocity)
            }
        }
        Ok(())
    }

    fn tick(&mut self, tracks: &[Track]) {
        let now = self.graph.current_time();
        let mut sink = Dispatch {
            graph: &mut self.graph,
            synth: &self.synth,
            drums: &self.drums,
        };
        self.scheduler.tick(now, tracks, &mut sink);
    }

    /// Fill `out` (interleaved stereo) with the next block, ticking the scheduler
    /// on every tick boundary inside it.
    pub fn process_block(&mut self, out: &mut [f32], tracks: &[Track]) {
        self.graph.sync_tracks(tracks);

        let total = out.len() / 2;
        let mut done = 0;
        while done < total {
            if self.graph.current_frame() >= self.next_tick_frame {
                self.tick(tracks);
                self.next_tick_frame = self.graph.current_frame() + self.tick_frames;
            }
            let until_tick = (self.next_tick_frame - self.graph.current_frame()) as usize;
            let frames = until_tick.min(total - done);
            self.graph.render(&mut out[done * 2..(done + frames) * 2]);
            done += frames;
        }
    }
}
