//! Derivation of sound events from track data.
//!
//! The live scheduler walks these helpers window by window with its own dedupe
//! bookkeeping; the exporter calls [`derive_events`] once over the whole piece.

use std::ops::Range;

use groove_shared::{
    DrumKind, DrumPattern, Note, PitchClass, Schedulable, SynthSettings, Track, TrackKind,
};
use uuid::Uuid;

use crate::timebase::Timeline;

#[derive(Debug, Clone, PartialEq)]
pub struct NoteEvent {
    pub track_id: Uuid,
    pub note_id: Uuid,
    pub pitch: PitchClass,
    pub octave: i32,
    pub velocity: f32,
    /// Musical position in steps.
    pub step: f64,
    /// Audio-clock onset.
    pub start_seconds: f64,
    pub duration_seconds: f64,
    pub settings: SynthSettings,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DrumEvent {
    pub track_id: Uuid,
    pub kind: DrumKind,
    pub velocity: f32,
    pub step: f64,
    /// Index into the drum pattern when the event came from one.
    pub pattern_index: Option<usize>,
    pub start_seconds: f64,
    pub duration_seconds: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub enum SoundEvent {
    Note(NoteEvent),
    Drum(DrumEvent),
}

impl SoundEvent {
    pub fn track_id(&self) -> Uuid {
        match self {
            SoundEvent::Note(n) => n.track_id,
            SoundEvent::Drum(d) => d.track_id,
        }
    }

    pub fn step(&self) -> f64 {
        match self {
            SoundEvent::Note(n) => n.step,
            SoundEvent::Drum(d) => d.step,
        }
    }

    pub fn start_seconds(&self) -> f64 {
        match self {
            SoundEvent::Note(n) => n.start_seconds,
            SoundEvent::Drum(d) => d.start_seconds,
        }
    }

    /// Audio-clock time after which the event can no longer be heard.
    pub fn audible_until(&self) -> f64 {
        match self {
            SoundEvent::Note(n) => n.start_seconds + n.duration_seconds + n.settings.release,
            SoundEvent::Drum(d) => d.start_seconds + d.duration_seconds,
        }
    }
}

/// Receiver of scheduled sound requests.
pub trait EventSink {
    fn trigger(&mut self, event: SoundEvent);
}

impl EventSink for Vec<SoundEvent> {
    fn trigger(&mut self, event: SoundEvent) {
        self.push(event);
    }
}

/// Turn one note into a sound event. Invalid or unmappable notes are logged and
/// dropped so the rest of the track keeps playing.
pub fn note_event(track: &Track, note: &Note, timeline: &Timeline) -> Option<SoundEvent> {
    if let Err(e) = note.validate() {
        log::warn!("[Events] Skipping note {} on track {}: {}", note.id, track.id, e);
        return None;
    }

    let start_seconds = timeline.time_of(note.start);
    let duration_seconds = timeline.duration_of(note.duration);

    match track.kind {
        TrackKind::Drum => {
            let Some(kind) = DrumKind::from_pitch(note.pitch) else {
                log::warn!(
                    "[Events] No drum mapped to {}{} on track {}, skipping",
                    note.pitch,
                    note.octave,
                    track.id
                );
                return None;
            };
            Some(SoundEvent::Drum(DrumEvent {
                track_id: track.id,
                kind,
                velocity: note.clamped_velocity(),
                step: note.start,
                pattern_index: None,
                start_seconds,
                duration_seconds,
            }))
        }
        TrackKind::Synth | TrackKind::Bass => Some(SoundEvent::Note(NoteEvent {
            track_id: track.id,
            note_id: note.id,
            pitch: note.pitch,
            octave: note.clamped_octave(),
            velocity: note.clamped_velocity(),
            step: note.start,
            start_seconds,
            duration_seconds,
            settings: track.voice_settings(),
        })),
        TrackKind::Audio => None,
    }
}

/// Emit every active drum of the pattern for each absolute step in `steps`.
pub fn pattern_events<S: EventSink + ?Sized>(
    track: &Track,
    pattern: &DrumPattern,
    steps: Range<u64>,
    timeline: &Timeline,
    sink: &mut S,
) {
    for absolute in steps {
        let Some(index) = pattern.index_for(absolute) else {
            return;
        };
        let Some(drum_step) = pattern.step(index) else {
            continue;
        };

        let step = absolute as f64;
        let velocity = if drum_step.velocity.is_finite() {
            drum_step.velocity.clamp(0.0, 1.0)
        } else {
            0.0
        };
        for kind in drum_step.active_kinds() {
            sink.trigger(SoundEvent::Drum(DrumEvent {
                track_id: track.id,
                kind,
                velocity,
                step,
                pattern_index: Some(index),
                start_seconds: timeline.time_of(step),
                duration_seconds: timeline.duration_of(1.0),
            }));
        }
    }
}

/// Integer steps inside `[window.start, window.end)`.
pub fn whole_steps(window: &Range<f64>) -> Range<u64> {
    let first = window.start.max(0.0).ceil() as u64;
    let last = window.end.max(0.0).ceil() as u64;
    first..last.max(first)
}

/// Every event a track produces in `window`, without any dedupe state.
pub fn derive_events<S: EventSink + ?Sized>(
    track: &Track,
    window: Range<f64>,
    timeline: &Timeline,
    sink: &mut S,
) {
    if track.muted {
        return;
    }
    match track.schedulable() {
        Schedulable::Notes(notes) => {
            for note in notes.iter().filter(|n| window.contains(&n.start)) {
                if let Some(event) = note_event(track, note, timeline) {
                    sink.trigger(event);
                }
            }
        }
        Schedulable::Pattern(pattern) => {
            pattern_events(track, pattern, whole_steps(&window), timeline, sink);
        }
        Schedulable::Silent => {}
    }
}

/// Step at which a track's last sounding event ends, or `None` for a looping
/// pattern which fills whatever span it is given.
pub fn content_end(track: &Track) -> Option<f64> {
    match track.schedulable() {
        Schedulable::Notes(notes) => Some(
            notes
                .iter()
                .filter(|n| n.validate().is_ok())
                .map(Note::end)
                .fold(0.0, f64::max),
        ),
        Schedulable::Pattern(_) => None,
        Schedulable::Silent => Some(0.0),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use groove_shared::DrumStep;

    fn drum_track_with_notes(pitches: &[PitchClass]) -> Track {
        let mut track = Track::new(TrackKind::Drum);
        for (i, &p) in pitches.iter().enumerate() {
            track.notes.push(Note::new(p, 2, i as f64, 1.0, 0.9).unwrap());
        }
        track
    }

    #[test]
    fn drum_notes_map_to_kinds_and_skip_unmapped() {
        let track = drum_track_with_notes(&[PitchClass::C, PitchClass::G, PitchClass::D]);
        let mut events: Vec<SoundEvent> = Vec::new();
        derive_events(&track, 0.0..16.0, &Timeline::new(120.0, 0.0), &mut events);

        let kinds: Vec<_> = events
            .iter()
            .map(|e| match e {
                SoundEvent::Drum(d) => d.kind,
                SoundEvent::Note(_) => panic!("drum track produced a pitched note"),
            })
            .collect();
        assert_eq!(kinds, vec![DrumKind::Kick, DrumKind::Snare]);
    }

    #[test]
    fn invalid_note_does_not_silence_the_rest() {
        let mut track = Track::new(TrackKind::Synth);
        track.notes.push(Note::new(PitchClass::A, 4, 0.0, 1.0, 1.0).unwrap());
        let mut broken = Note::new(PitchClass::B, 4, 1.0, 1.0, 1.0).unwrap();
        broken.duration = -2.0;
        track.notes.push(broken);
        track.notes.push(Note::new(PitchClass::C, 5, 2.0, 1.0, 1.0).unwrap());

        let mut events: Vec<SoundEvent> = Vec::new();
        derive_events(&track, 0.0..16.0, &Timeline::new(120.0, 0.0), &mut events);
        let steps: Vec<f64> = events.iter().map(SoundEvent::step).collect();
        assert_eq!(steps, vec![0.0, 2.0]);
    }

    #[test]
    fn pattern_events_carry_times_from_the_timeline() {
        let mut track = Track::new(TrackKind::Drum);
        let mut pattern = DrumPattern::new(4).unwrap();
        pattern.steps[1] = DrumStep {
            kick: true,
            closed_hat: true,
            velocity: 0.5,
            ..DrumStep::default()
        };
        track.drum_pattern = Some(pattern);

        let mut events: Vec<SoundEvent> = Vec::new();
        derive_events(&track, 0.0..8.0, &Timeline::new(120.0, 1.0), &mut events);
        assert_eq!(events.len(), 4);
        assert_eq!(events[0].start_seconds(), 1.125);
        assert_eq!(events[2].step(), 5.0);
        assert_eq!(events[2].start_seconds(), 1.625);
    }

    #[test]
    fn whole_steps_respects_half_open_window() {
        assert_eq!(whole_steps(&(10.0..20.0)), 10..20);
        assert_eq!(whole_steps(&(9.5..12.0)), 10..12);
        assert_eq!(whole_steps(&(9.5..12.25)), 10..13);
        assert_eq!(whole_steps(&(3.0..3.0)), 3..3);
    }

    #[test]
    fn muted_tracks_produce_nothing() {
        let mut track = drum_track_with_notes(&[PitchClass::C]);
        track.muted = true;
        let mut events: Vec<SoundEvent> = Vec::new();
        derive_events(&track, 0.0..16.0, &Timeline::new(120.0, 0.0), &mut events);
        assert!(events.is_empty());
    }

    #[test]
    fn content_end_is_latest_note_end() {
        let mut track = Track::new(TrackKind::Bass);
        track.notes.push(Note::new(PitchClass::E, 2, 4.0, 8.0, 1.0).unwrap());
        track.notes.push(Note::new(PitchClass::E, 2, 0.0, 2.0, 1.0).unwrap());
        assert_eq!(content_end(&track), Some(12.0));
    }
}
