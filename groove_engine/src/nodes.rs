use groove_shared::EffectSettings;

use crate::delay::DelayLine;

/// Block processor on an interleaved stereo buffer (LRLR...).
pub trait AudioNode: Send + Sync {
    fn process(&mut self, buffer: &mut [f32], sample_rate: f32);

    /// Drop internal state (filter memory, delay tails).
    fn reset(&mut self) {}
}

pub struct GainNode {
    pub gain: f32,
}

impl GainNode {
    pub fn new(gain: f32) -> Self {
        Self { gain }
    }
}

impl AudioNode for GainNode {
    fn process(&mut self, buffer: &mut [f32], _sample_rate: f32) {
        for sample in buffer.iter_mut() {
            *sample *= self.gain;
        }
    }
}

/// RBJ cookbook lowpass, transposed direct form II. Mono.
#[derive(Debug, Clone)]
pub struct Biquad {
    b0: f64,
    b1: f64,
    b2: f64,
    a1: f64,
    a2: f64,
    z1: f64,
    z2: f64,
}

impl Biquad {
    pub fn lowpass(cutoff_hz: f32, q: f32, sample_rate: f32) -> Self {
        let nyquist = sample_rate as f64 * 0.5;
        let cutoff = (cutoff_hz as f64).clamp(10.0, nyquist * 0.99);
        let q = (q as f64).max(0.01);

        let w0 = std::f64::consts::TAU * cutoff / sample_rate as f64;
        let (sin_w0, cos_w0) = w0.sin_cos();
        let alpha = sin_w0 / (2.0 * q);
        let a0 = 1.0 + alpha;

        Self {
            b0: (1.0 - cos_w0) / 2.0 / a0,
            b1: (1.0 - cos_w0) / a0,
            b2: (1.0 - cos_w0) / 2.0 / a0,
            a1: -2.0 * cos_w0 / a0,
            a2: (1.0 - alpha) / a0,
            z1: 0.0,
            z2: 0.0,
        }
    }

    #[inline]
    pub fn next(&mut self, x: f32) -> f32 {
        let x = x as f64;
        let y = self.b0 * x + self.z1;
        self.z1 = self.b1 * x - self.a1 * y + self.z2;
        self.z2 = self.b2 * x - self.a2 * y;
        y as f32
    }

    pub fn reset(&mut self) {
        self.z1 = 0.0;
        self.z2 = 0.0;
    }
}

/// Insert lowpass on a track bus.
pub struct LowpassNode {
    left: Biquad,
    right: Biquad,
}

impl LowpassNode {
    pub fn new(cutoff_hz: f32, q: f32, sample_rate: f32) -> Self {
        let filter = Biquad::lowpass(cutoff_hz, q, sample_rate);
        Self {
            left: filter.clone(),
            right: filter,
        }
    }
}

impl AudioNode for LowpassNode {
    fn process(&mut self, buffer: &mut [f32], _sample_rate: f32) {
        for pair in buffer.chunks_exact_mut(2) {
            pair[0] = self.left.next(pair[0]);
            pair[1] = self.right.next(pair[1]);
        }
    }

    fn reset(&mut self) {
        self.left.reset();
        self.right.reset();
    }
}

/// Insert echo on a track bus.
pub struct DelayNode {
    line: DelayLine,
    delay_frames: usize,
    feedback: f32,
    mix: f32,
}

/// Longest echo the insert supports.
const MAX_DELAY_SECONDS: f32 = 2.0;

impl DelayNode {
    pub fn new(time_seconds: f32, feedback: f32, mix: f32, sample_rate: f32) -> Self {
        let time = time_seconds.clamp(0.001, MAX_DELAY_SECONDS);
        let max_frames = (MAX_DELAY_SECONDS * sample_rate) as usize + 1;
        Self {
            line: DelayLine::new(max_frames * 2 + 2),
            delay_frames: ((time * sample_rate) as usize).max(1),
            // Above 1.0 the echo would grow without bound
            feedback: feedback.clamp(0.0, 0.95),
            mix: mix.clamp(0.0, 1.0),
        }
    }
}

impl AudioNode for DelayNode {
    fn process(&mut self, buffer: &mut [f32], _sample_rate: f32) {
        self.line
            .process_feedback(buffer, self.delay_frames * 2, self.feedback, self.mix);
    }

    fn reset(&mut self) {
        self.line.clear();
    }
}

pub fn build_insert(settings: &EffectSettings, sample_rate: f32) -> Box<dyn AudioNode> {
    match *settings {
        EffectSettings::Lowpass { cutoff_hz, q } => {
            Box::new(LowpassNode::new(cutoff_hz, q, sample_rate))
        }
        EffectSettings::Delay {
            time_seconds,
            feedback,
            mix,
        } => Box::new(DelayNode::new(time_seconds, feedback, mix, sample_rate)),
    }
}
