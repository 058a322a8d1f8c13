//! Conversion between musical position (steps) and audio-clock seconds.
//!
//! Live scheduling and offline export both go through these functions so their
//! timing cannot drift apart.

use groove_shared::STEPS_PER_BEAT;

/// Length of one sixteenth-note step in seconds.
pub fn seconds_per_step(bpm: f64) -> f64 {
    (60.0 / bpm) / STEPS_PER_BEAT as f64
}

pub fn step_to_seconds(step: f64, bpm: f64) -> f64 {
    step * seconds_per_step(bpm)
}

pub fn seconds_to_step(seconds: f64, bpm: f64) -> f64 {
    seconds / seconds_per_step(bpm)
}

/// Nearest frame for an audio-clock time. Negative times map to frame 0.
pub fn seconds_to_frames(seconds: f64, sample_rate: u32) -> u64 {
    (seconds * sample_rate as f64).round().max(0.0) as u64
}

pub fn frames_to_seconds(frames: u64, sample_rate: u32) -> f64 {
    frames as f64 / sample_rate as f64
}

/// Maps steps to audio-clock seconds for one tempo segment.
///
/// The anchor pins `anchor_step` to `anchor_seconds`. A tempo change creates a new
/// segment anchored at the current position, so it only affects what is scheduled
/// afterwards.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Timeline {
    bpm: f64,
    anchor_seconds: f64,
    anchor_step: f64,
}

impl Timeline {
    /// Step 0 sits at `start_seconds`.
    pub fn new(bpm: f64, start_seconds: f64) -> Self {
        Self::anchored(bpm, start_seconds, 0.0)
    }

    pub fn anchored(bpm: f64, anchor_seconds: f64, anchor_step: f64) -> Self {
        Self {
            bpm,
            anchor_seconds,
            anchor_step,
        }
    }

    pub fn bpm(&self) -> f64 {
        self.bpm
    }

    pub fn step_at(&self, clock_seconds: f64) -> f64 {
        self.anchor_step + seconds_to_step(clock_seconds - self.anchor_seconds, self.bpm)
    }

    pub fn time_of(&self, step: f64) -> f64 {
        self.anchor_seconds + step_to_seconds(step - self.anchor_step, self.bpm)
    }

    pub fn duration_of(&self, steps: f64) -> f64 {
        step_to_seconds(steps, self.bpm)
    }

    /// New segment at `bpm` continuing from wherever the playhead is at `now`.
    pub fn retempo(&self, bpm: f64, now: f64) -> Self {
        Self::anchored(bpm, now, self.step_at(now))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn step_length_at_common_tempos() {
        assert_eq!(seconds_per_step(120.0), 0.125);
        assert_eq!(seconds_per_step(60.0), 0.25);
        assert_eq!(step_to_seconds(4.0, 120.0), 0.5);
    }

    #[test]
    fn step_seconds_round_trip() {
        for bpm in (40..=240).step_by(7).map(f64::from) {
            for step in [0.0, 0.25, 1.0, 3.5, 15.75, 127.0, 1023.125] {
                let back = seconds_to_step(step_to_seconds(step, bpm), bpm);
                assert!((back - step).abs() < 1e-9, "bpm {bpm} step {step} -> {back}");
            }
        }
    }

    #[test]
    fn retempo_keeps_position_and_changes_rate() {
        let timeline = Timeline::new(120.0, 10.0);
        assert_eq!(timeline.step_at(11.0), 8.0);

        let faster = timeline.retempo(240.0, 11.0);
        assert!((faster.step_at(11.0) - 8.0).abs() < 1e-12);
        assert!((faster.step_at(12.0) - 24.0).abs() < 1e-12);
        // Step 8 still lands where it did before the change
        assert!((faster.time_of(8.0) - 11.0).abs() < 1e-12);
    }

    #[test]
    fn frame_conversion_rounds_and_floors_at_zero() {
        assert_eq!(seconds_to_frames(0.5, 44_100), 22_050);
        assert_eq!(seconds_to_frames(-0.1, 44_100), 0);
        assert_eq!(frames_to_seconds(22_050, 44_100), 0.5);
    }
}
