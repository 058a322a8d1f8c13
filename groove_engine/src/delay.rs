pub struct DelayLine {
    buffer: Vec<f32>,
    write_pos: usize,
}

impl DelayLine {
    pub fn new(max_delay_samples: usize) -> Self {
        Self {
            buffer: vec![0.0; max_delay_samples.max(1)],
            write_pos: 0,
        }
    }

    /// Echo with feedback, processed in place.
    /// `delay_samples` counts raw samples, so interleaved stereo passes 2 × frames.
    pub fn process_feedback(
        &mut self,
        buffer: &mut [f32],
        delay_samples: usize,
        feedback: f32,
        mix: f32,
    ) {
        let buffer_len = self.buffer.len();
        let delay = delay_samples.clamp(1, buffer_len - 1);

        for sample in buffer.iter_mut() {
            let read_pos = (self.write_pos + buffer_len - delay) % buffer_len;
            let delayed = self.buffer[read_pos];
            let dry = *sample;

            self.buffer[self.write_pos] = dry + delayed * feedback;
            *sample = dry + delayed * mix;

            self.write_pos = (self.write_pos + 1) % buffer_len;
        }
    }

    pub fn clear(&mut self) {
        self.buffer.fill(0.0);
        self.write_pos = 0;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn impulse_repeats_with_decaying_feedback() {
        let mut line = DelayLine::new(64);
        let mut buf = vec![0.0; 32];
        buf[0] = 1.0;
        line.process_feedback(&mut buf, 8, 0.5, 1.0);

        assert_eq!(buf[0], 1.0);
        assert_eq!(buf[8], 1.0);
        assert_eq!(buf[16], 0.5);
        assert_eq!(buf[24], 0.25);
        assert_eq!(buf[4], 0.0);
    }

    #[test]
    fn dry_signal_passes_when_mix_is_zero() {
        let mut line = DelayLine::new(16);
        let mut buf = vec![0.3; 10];
        line.process_feedback(&mut buf, 4, 0.9, 0.0);
        assert!(buf.iter().all(|&s| s == 0.3));
    }
}
