//! Common types for sdrsync
//!
//! Sample formats and the stereo frame type shared by the ring buffers,
//! the mixer graph and the recorder.

/// Nominal sample rate of the whole graph (48kHz)
///
/// Devices that run at another rate are used as-is (no resampling); the
/// estimator keeps computing with this value.
pub const SAMPLE_RATE: u32 = 48000;

/// Channels carried through the graph (stereo throughout)
pub const CHANNELS: usize = 2;

/// Largest block processed in one pass of the mixer graph.
/// Longer device buffers are processed in several passes.
pub const MAX_BLOCK_FRAMES: usize = 8192;

/// Largest delay the delay line can apply (and the estimator can report)
pub const MAX_DELAY_MS: f32 = 2000.0;

/// Audio sample type inside the graph (32-bit float, [-1, 1])
pub type Sample = f32;

/// Scale between 16-bit device samples and graph floats
const I16_SCALE: f32 = 32768.0;

/// Convert a 16-bit device sample to a graph sample
#[inline]
pub fn i16_to_sample(value: i16) -> Sample {
    value as f32 / I16_SCALE
}

/// Convert a graph sample back to 16-bit, clamping to [-1, 1] first
#[inline]
pub fn sample_to_i16(value: Sample) -> i16 {
    (value.clamp(-1.0, 1.0) * 32767.0).round() as i16
}

/// Milliseconds to whole samples at the given rate
#[inline]
pub fn ms_to_samples(ms: f32, sample_rate: u32) -> usize {
    (ms.max(0.0) * sample_rate as f32 / 1000.0).round() as usize
}

/// Samples to milliseconds at the given rate
#[inline]
pub fn samples_to_ms(samples: f32, sample_rate: u32) -> f32 {
    samples * 1000.0 / sample_rate as f32
}

/// Which capture source a stream or meter belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(usize)]
pub enum Source {
    /// Local transceiver audio (channel 1, the delayed one)
    Radio = 0,
    /// WebSDR audio (channel 2)
    Remote = 1,
}

impl Source {
    pub const ALL: [Source; 2] = [Source::Radio, Source::Remote];

    pub fn index(self) -> usize {
        self as usize
    }

    pub fn name(&self) -> &'static str {
        match self {
            Source::Radio => "Radio",
            Source::Remote => "Remote",
        }
    }
}

impl std::fmt::Display for Source {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// A single stereo sample (left and right channels)
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct StereoSample {
    pub left: Sample,
    pub right: Sample,
}

impl StereoSample {
    #[inline]
    pub fn new(left: Sample, right: Sample) -> Self {
        Self { left, right }
    }

    #[inline]
    pub fn silence() -> Self {
        Self::default()
    }

    /// Average of both channels
    #[inline]
    pub fn to_mono(self) -> Sample {
        (self.left + self.right) * 0.5
    }

    /// Get the peak amplitude (max of abs(left), abs(right))
    #[inline]
    pub fn peak(&self) -> Sample {
        self.left.abs().max(self.right.abs())
    }
}

impl std::ops::Add for StereoSample {
    type Output = Self;

    #[inline]
    fn add(self, other: Self) -> Self {
        Self {
            left: self.left + other.left,
            right: self.right + other.right,
        }
    }
}

impl std::ops::AddAssign for StereoSample {
    #[inline]
    fn add_assign(&mut self, other: Self) {
        self.left += other.left;
        self.right += other.right;
    }
}

impl std::ops::Mul<Sample> for StereoSample {
    type Output = Self;

    #[inline]
    fn mul(self, factor: Sample) -> Self {
        Self {
            left: self.left * factor,
            right: self.right * factor,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_i16_conversion_bounds() {
        assert_eq!(sample_to_i16(1.5), i16::MAX);
        assert_eq!(sample_to_i16(-1.5), -i16::MAX);
        assert_eq!(sample_to_i16(0.0), 0);
        assert!((i16_to_sample(i16::MIN) + 1.0).abs() < 1e-6);
    }

    #[test]
    fn test_ms_samples() {
        assert_eq!(ms_to_samples(420.0, SAMPLE_RATE), 20160);
        assert_eq!(ms_to_samples(-5.0, SAMPLE_RATE), 0);
        assert!((samples_to_ms(480.0, SAMPLE_RATE) - 10.0).abs() < 1e-4);
    }

    #[test]
    fn test_stereo_mono_downmix() {
        let s = StereoSample::new(0.5, -0.25);
        assert!((s.to_mono() - 0.125).abs() < 1e-6);
        assert_eq!(s.peak(), 0.5);
    }
}
