//! Variable mono delay for aligning the radio channel with the WebSDR
//!
//! A delay change never jumps: the output crossfades from the tap at the old
//! delay to the tap at the new delay over ~50 ms with a raised-cosine curve.
//! The blend is a convex combination of the two taps, so no output sample
//! exceeds the larger of the two readings. A request arriving mid-fade is
//! held until the running fade completes, then fades on from there.

use crate::types::{ms_to_samples, Sample};

/// Length of a delay transition
pub const CROSSFADE_MS: f32 = 50.0;

/// Extra store beyond the maximum delay so reads never alias the write slot
const HEADROOM_SAMPLES: usize = 64;

/// Mono delay line with crossfaded delay changes
pub struct DelayLine {
    buffer: Vec<Sample>,
    write_pos: usize,
    sample_rate: u32,
    max_delay: usize,
    /// Effective delay (rounded interpolation during a transition)
    current: usize,
    target: usize,
    old: usize,
    /// Latest request received while a fade was running
    pending: Option<usize>,
    crossfade_progress: usize,
    crossfade_length: usize,
}

impl DelayLine {
    /// Create a delay line able to delay up to `max_delay_ms`
    pub fn new(max_delay_ms: f32, sample_rate: u32) -> Self {
        let max_delay = ms_to_samples(max_delay_ms, sample_rate);
        let crossfade_length = ms_to_samples(CROSSFADE_MS, sample_rate).max(1);
        Self {
            buffer: vec![0.0; max_delay + HEADROOM_SAMPLES],
            write_pos: 0,
            sample_rate,
            max_delay,
            current: 0,
            target: 0,
            old: 0,
            pending: None,
            crossfade_progress: crossfade_length,
            crossfade_length,
        }
    }

    /// Request a new delay. Clamped to `[0, max_delay]`; a request that maps
    /// to the latest requested sample count is ignored.
    pub fn set_delay_ms(&mut self, delay_ms: f32) {
        let max_ms = self.max_delay as f32 * 1000.0 / self.sample_rate as f32;
        let samples = ms_to_samples(delay_ms.clamp(0.0, max_ms), self.sample_rate)
            .min(self.max_delay);
        if samples == self.target_samples() {
            return;
        }
        if self.is_crossfading() {
            self.pending = (samples != self.target).then_some(samples);
            return;
        }
        self.begin_crossfade(samples);
    }

    /// Fade from the settled delay towards `samples`
    fn begin_crossfade(&mut self, samples: usize) {
        self.old = self.target;
        self.target = samples;
        self.crossfade_progress = 0;
    }

    /// Delay requested by the last `set_delay_ms`, in samples
    pub fn target_samples(&self) -> usize {
        self.pending.unwrap_or(self.target)
    }

    /// Delay currently applied, in samples
    pub fn current_samples(&self) -> usize {
        self.current
    }

    pub fn max_delay_samples(&self) -> usize {
        self.max_delay
    }

    pub fn is_crossfading(&self) -> bool {
        self.crossfade_progress < self.crossfade_length
    }

    pub fn crossfade_length(&self) -> usize {
        self.crossfade_length
    }

    /// Process `input` into `output` (equal lengths, one output per input)
    pub fn process(&mut self, input: &[Sample], output: &mut [Sample]) {
        for (x, y) in input.iter().zip(output.iter_mut()) {
            *y = self.process_sample(*x);
        }
    }

    /// Push one sample through the delay
    #[inline]
    pub fn process_sample(&mut self, input: Sample) -> Sample {
        self.buffer[self.write_pos] = input;

        let output = if self.is_crossfading() {
            self.crossfade_progress += 1;
            let t = self.crossfade_progress as f32 / self.crossfade_length as f32;
            let smooth = 0.5 * (1.0 - (std::f32::consts::PI * t).cos());

            let old_tap = self.read(self.old);
            let target_tap = self.read(self.target);

            if self.crossfade_progress >= self.crossfade_length {
                self.current = self.target;
                self.old = self.target;
                if let Some(next) = self.pending.take() {
                    self.begin_crossfade(next);
                }
            } else {
                self.current = (self.old as f32 * (1.0 - smooth) + self.target as f32 * smooth)
                    .round() as usize;
            }
            old_tap * (1.0 - smooth) + target_tap * smooth
        } else {
            self.read(self.current)
        };

        self.write_pos = (self.write_pos + 1) % self.buffer.len();
        output
    }

    /// Read the sample written `delay` samples before the current write slot
    #[inline]
    fn read(&self, delay: usize) -> Sample {
        let len = self.buffer.len();
        self.buffer[(self.write_pos + len - delay.min(self.max_delay)) % len]
    }

    /// Zero the store and all cursors, keeping the requested target
    pub fn reset(&mut self) {
        self.buffer.fill(0.0);
        self.write_pos = 0;
        if let Some(next) = self.pending.take() {
            self.target = next;
        }
        self.current = self.target;
        self.old = self.target;
        self.crossfade_progress = self.crossfade_length;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const SR: u32 = 48000;

    fn settle(line: &mut DelayLine) {
        let n = line.crossfade_length() + 1;
        let zeros = vec![0.0; n];
        let mut out = vec![0.0; n];
        line.process(&zeros, &mut out);
    }

    #[test]
    fn test_zero_delay_passes_through() {
        let mut line = DelayLine::new(100.0, SR);
        for i in 0..10 {
            let x = i as f32 * 0.1;
            assert_eq!(line.process_sample(x), x);
        }
    }

    #[test]
    fn test_impulse_lands_at_requested_delay() {
        let mut line = DelayLine::new(500.0, SR);
        line.set_delay_ms(12.5);
        settle(&mut line);
        assert!(!line.is_crossfading());
        assert_eq!(line.current_samples(), 600);

        let mut input = vec![0.0; 1000];
        input[0] = 1.0;
        let mut output = vec![0.0; 1000];
        line.process(&input, &mut output);

        for (i, &y) in output.iter().enumerate() {
            if i == 600 {
                assert_eq!(y, 1.0);
            } else {
                assert_eq!(y, 0.0, "unexpected energy at {}", i);
            }
        }
    }

    #[test]
    fn test_set_delay_clamps_to_max() {
        let mut line = DelayLine::new(100.0, SR);
        line.set_delay_ms(250.0);
        assert_eq!(line.target_samples(), 4800);
        line.set_delay_ms(-20.0);
        assert_eq!(line.target_samples(), 0);
    }

    #[test]
    fn test_same_target_does_not_restart_crossfade() {
        let mut line = DelayLine::new(100.0, SR);
        line.set_delay_ms(10.0);
        settle(&mut line);
        line.set_delay_ms(10.001);
        assert!(!line.is_crossfading());
    }

    #[test]
    fn test_crossfade_output_is_bounded_by_taps() {
        let mut line = DelayLine::new(200.0, SR);
        // Fill with a signal whose sample values are all distinct
        let warm: Vec<f32> = (0..9600).map(|i| ((i as f32) * 0.013).sin() * 0.8).collect();
        let mut sink = vec![0.0; warm.len()];
        line.process(&warm, &mut sink);

        line.set_delay_ms(80.0);
        let mut max_seen: f32 = 0.0;
        for i in 0..line.crossfade_length() {
            let x = ((9600 + i) as f32 * 0.013).sin() * 0.8;
            let y = line.process_sample(x);
            max_seen = max_seen.max(y.abs());
        }
        assert!(max_seen <= 0.8 + 1e-6);
        assert!(!line.is_crossfading());
        assert_eq!(line.current_samples(), 3840);
    }

    #[test]
    fn test_crossfade_moves_current_monotonically() {
        let mut line = DelayLine::new(200.0, SR);
        line.set_delay_ms(100.0);
        let mut last = 0;
        for _ in 0..line.crossfade_length() {
            line.process_sample(0.0);
            assert!(line.current_samples() >= last);
            last = line.current_samples();
        }
        assert_eq!(last, 4800);
    }

    #[test]
    fn test_retarget_mid_fade_stays_continuous() {
        let mut line = DelayLine::new(200.0, SR);
        let tone = |i: usize| {
            0.5 * (2.0 * std::f32::consts::PI * 150.0 * i as f32 / SR as f32).sin()
        };
        let mut n = 0;
        for _ in 0..9600 {
            line.process_sample(tone(n));
            n += 1;
        }

        line.set_delay_ms(100.0);
        let mut last = 0.0;
        for _ in 0..1200 {
            last = line.process_sample(tone(n));
            n += 1;
        }
        line.set_delay_ms(100.5);
        assert!(line.is_crossfading());
        assert_eq!(line.target_samples(), 4824);

        // A 150 Hz tone at 0.5 moves by at most ~0.01 per sample
        let mut max_step: f32 = 0.0;
        for _ in 0..3 * line.crossfade_length() {
            let y = line.process_sample(tone(n));
            max_step = max_step.max((y - last).abs());
            last = y;
            n += 1;
        }
        assert!(max_step < 0.03, "step {}", max_step);
        assert!(!line.is_crossfading());
        assert_eq!(line.current_samples(), 4824);
    }

    #[test]
    fn test_request_back_to_running_target_drops_pending() {
        let mut line = DelayLine::new(200.0, SR);
        line.set_delay_ms(50.0);
        line.process_sample(0.0);
        line.set_delay_ms(80.0);
        assert_eq!(line.target_samples(), 3840);
        line.set_delay_ms(50.0);
        assert_eq!(line.target_samples(), 2400);
        settle(&mut line);
        assert!(!line.is_crossfading());
        assert_eq!(line.current_samples(), 2400);
    }

    #[test]
    fn test_reset_clears_store() {
        let mut line = DelayLine::new(50.0, SR);
        line.set_delay_ms(1.0);
        settle(&mut line);
        for _ in 0..100 {
            line.process_sample(0.5);
        }
        line.reset();
        for _ in 0..48 {
            assert_eq!(line.process_sample(0.0), 0.0);
        }
        assert_eq!(line.current_samples(), 48);
    }
}
