//! Look-ahead scheduler.
//!
//! Driven by the audio callback at a fixed audio-time interval. Each tick scans a
//! short window ahead of the playhead and hands every event it has not already
//! scheduled to the sink with an absolute audio-clock onset. Overlapping windows
//! are harmless: notes are deduplicated by key and drum patterns advance a
//! per-track step cursor.

use std::collections::HashMap;

use groove_shared::error::validate_bpm;
use groove_shared::project::max_steps;
use groove_shared::{ModelError, Schedulable, Track, Transport};
use uuid::Uuid;

use crate::events::{note_event, pattern_events, whole_steps, EventSink};
use crate::timebase::{seconds_to_step, Timeline};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PlayState {
    Stopped,
    Playing,
    Paused,
}

/// Identity of one scheduled note occurrence.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ScheduleKey {
    pub track_id: Uuid,
    pub note_id: Uuid,
    start_bits: u64,
}

impl ScheduleKey {
    pub fn new(track_id: Uuid, note_id: Uuid, start: f64) -> Self {
        Self {
            track_id,
            note_id,
            start_bits: start.to_bits(),
        }
    }

    pub fn start(&self) -> f64 {
        f64::from_bits(self.start_bits)
    }
}

pub struct Scheduler {
    state: PlayState,
    bpm: f64,
    measures: u32,
    look_ahead: f64,
    timeline: Timeline,
    playhead: f64,
    /// Playing time accumulated before the current run.
    elapsed_before: f64,
    run_started_at: f64,
    elapsed: f64,
    /// Scheduled notes and the audio-clock time after which they can be forgotten.
    scheduled: HashMap<ScheduleKey, f64>,
    /// Next absolute step to emit, per pattern-driven track.
    cursors: HashMap<Uuid, u64>,
}

impl Scheduler {
    pub fn new(bpm: f64, measures: u32, look_ahead_seconds: f64) -> Self {
        Self {
            state: PlayState::Stopped,
            bpm,
            measures: measures.max(1),
            look_ahead: look_ahead_seconds,
            timeline: Timeline::new(bpm, 0.0),
            playhead: 0.0,
            elapsed_before: 0.0,
            run_started_at: 0.0,
            elapsed: 0.0,
            scheduled: HashMap::new(),
            cursors: HashMap::new(),
        }
    }

    pub fn state(&self) -> PlayState {
        self.state
    }

    pub fn is_playing(&self) -> bool {
        self.state == PlayState::Playing
    }

    pub fn bpm(&self) -> f64 {
        self.bpm
    }

    pub fn measures(&self) -> u32 {
        self.measures
    }

    pub fn max_steps(&self) -> f64 {
        max_steps(self.measures)
    }

    pub fn playhead_steps(&self) -> f64 {
        self.playhead
    }

    pub fn elapsed_seconds(&self) -> f64 {
        self.elapsed
    }

    pub fn transport(&self) -> Transport {
        Transport {
            bpm: self.bpm,
            is_playing: self.is_playing(),
            elapsed_seconds: self.elapsed,
            playhead_steps: self.playhead,
            max_steps: self.max_steps(),
        }
    }

    /// Start or resume at audio-clock time `now`. No-op while already playing.
    pub fn play(&mut self, now: f64) {
        match self.state {
            PlayState::Playing => return,
            PlayState::Stopped => {
                self.timeline = Timeline::new(self.bpm, now);
                self.playhead = 0.0;
                self.elapsed_before = 0.0;
                self.elapsed = 0.0;
                log::info!("[Scheduler] Play at {:.3}s, {} bpm", now, self.bpm);
            }
            PlayState::Paused => {
                self.timeline = Timeline::anchored(self.bpm, now, self.playhead);
                log::info!("[Scheduler] Resume at step {:.2}", self.playhead);
            }
        }
        self.run_started_at = now;
        self.state = PlayState::Playing;
    }

    /// Freeze the playhead at `now`. Notes starting at or after the pause point
    /// are forgotten so they are scheduled again on resume; earlier ones never
    /// replay.
    pub fn pause(&mut self, now: f64) {
        if self.state != PlayState::Playing {
            return;
        }
        self.update_position(now);
        self.elapsed_before = self.elapsed;

        let paused_at = self.playhead;
        self.scheduled.retain(|key, _| key.start() < paused_at);
        let resume_step = paused_at.ceil() as u64;
        for cursor in self.cursors.values_mut() {
            *cursor = (*cursor).min(resume_step);
        }

        self.state = PlayState::Paused;
        log::info!("[Scheduler] Paused at step {:.2}", paused_at);
    }

    pub fn stop(&mut self) {
        if self.state != PlayState::Stopped {
            log::info!("[Scheduler] Stopped");
        }
        self.state = PlayState::Stopped;
        self.playhead = 0.0;
        self.elapsed = 0.0;
        self.elapsed_before = 0.0;
        self.scheduled.clear();
        self.cursors.clear();
    }

    /// Change tempo from `now` on. Audio already handed to the sink keeps its
    /// timestamps.
    pub fn set_bpm(&mut self, bpm: f64, now: f64) -> Result<(), ModelError> {
        let bpm = validate_bpm(bpm)?;
        if self.state == PlayState::Playing {
            self.timeline = self.timeline.retempo(bpm, now);
        }
        self.bpm = bpm;
        Ok(())
    }

    pub fn set_measures(&mut self, measures: u32) {
        self.measures = measures.max(1);
    }

    pub fn set_look_ahead(&mut self, seconds: f64) {
        self.look_ahead = seconds;
    }

    fn update_position(&mut self, now: f64) {
        self.playhead = self.timeline.step_at(now).max(0.0);
        self.elapsed = self.elapsed_before + (now - self.run_started_at).max(0.0);
    }

    /// One scheduling pass at audio-clock time `now`.
    pub fn tick<S: EventSink + ?Sized>(&mut self, now: f64, tracks: &[Track], sink: &mut S) {
        if self.state != PlayState::Playing {
            return;
        }
        self.update_position(now);
        self.scheduled.retain(|_, audible_until| *audible_until > now);

        let end_of_song = self.max_steps();
        if self.playhead >= end_of_song {
            log::info!("[Scheduler] Reached end of song at step {:.2}", self.playhead);
            self.stop();
            return;
        }

        let look_ahead_steps = seconds_to_step(self.look_ahead, self.bpm);
        let window_end = (self.playhead + look_ahead_steps).min(end_of_song);
        self.schedule_window(self.playhead, window_end, tracks, sink);
    }

    /// Hand the sink every event in `[start, end)` (steps) that has not been
    /// scheduled yet.
    pub fn schedule_window<S: EventSink + ?Sized>(
        &mut self,
        start: f64,
        end: f64,
        tracks: &[Track],
        sink: &mut S,
    ) {
        let window = start..end;
        for track in tracks.iter().filter(|t| !t.muted) {
            match track.schedulable() {
                Schedulable::Notes(notes) => {
                    for note in notes.iter().filter(|n| window.contains(&n.start)) {
                        let key = ScheduleKey::new(track.id, note.id, note.start);
                        if self.scheduled.contains_key(&key) {
                            continue;
                        }
                        if let Some(event) = note_event(track, note, &self.timeline) {
                            self.scheduled.insert(key, event.audible_until());
                            sink.trigger(event);
                        }
                    }
                }
                Schedulable::Pattern(pattern) => {
                    let steps = whole_steps(&window);
                    let cursor = self.cursors.entry(track.id).or_insert(steps.start);
                    let from = (*cursor).max(steps.start);
                    if from < steps.end {
                        pattern_events(track, pattern, from..steps.end, &self.timeline, sink);
                        *cursor = steps.end;
                    }
                }
                Schedulable::Silent => {}
            }
        }
    }

    pub fn scheduled_count(&self) -> usize {
        self.scheduled.len()
    }
}
