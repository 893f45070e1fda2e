//! Output soft clipper
//!
//! Identity below the threshold, tanh roll-off above it:
//!
//! ```text
//! |x| <= T : y = x
//! |x| >  T : y = sign(x) * (T + (1 - T) * tanh((|x| - T) / (1 - T)))
//! ```
//!
//! The curve is odd, monotone, continuous (with continuous slope at T) and
//! never reaches ±1.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use crate::types::{Sample, StereoSample};

/// Level where the roll-off starts
pub const SOFT_CLIP_THRESHOLD: Sample = 0.95;

/// Largest f32 below 1.0; tanh saturates to exactly 1.0 in single precision
const CEILING: Sample = 1.0 - f32::EPSILON;

/// Apply the soft-clip curve to one sample
#[inline]
pub fn soft_clip(x: Sample) -> Sample {
    let magnitude = x.abs();
    if magnitude <= SOFT_CLIP_THRESHOLD {
        return x;
    }
    let knee = 1.0 - SOFT_CLIP_THRESHOLD;
    let shaped = SOFT_CLIP_THRESHOLD + knee * ((magnitude - SOFT_CLIP_THRESHOLD) / knee).tanh();
    shaped.min(CEILING).copysign(x)
}

/// Soft clipper for the master bus with a UI clip indicator
pub struct SoftClipper {
    /// Set by the audio thread when a block exceeded the threshold.
    /// UI thread reads and clears.
    clip_active: Arc<AtomicBool>,
}

impl SoftClipper {
    pub fn new() -> Self {
        Self {
            clip_active: Arc::new(AtomicBool::new(false)),
        }
    }

    /// Get the clip indicator atomic (shared with UI thread)
    pub fn clip_indicator(&self) -> Arc<AtomicBool> {
        Arc::clone(&self.clip_active)
    }

    /// Process a block of stereo frames in-place
    pub fn process(&mut self, frames: &mut [StereoSample]) {
        let mut clipped = false;
        for frame in frames.iter_mut() {
            clipped |= frame.peak() > SOFT_CLIP_THRESHOLD;
            frame.left = soft_clip(frame.left);
            frame.right = soft_clip(frame.right);
        }
        if clipped {
            self.clip_active.store(true, Ordering::Relaxed);
        }
    }
}

impl Default for SoftClipper {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_identity_below_threshold() {
        for &x in &[0.0, 0.3, -0.5, 0.95, -0.95] {
            assert_eq!(soft_clip(x), x);
        }
    }

    #[test]
    fn test_bounded_and_odd() {
        for i in 0..2000 {
            let x = i as f32 * 0.01;
            let y = soft_clip(x);
            assert!(y < 1.0, "soft_clip({}) = {}", x, y);
            assert_eq!(soft_clip(-x), -y);
        }
        assert!(soft_clip(1.0e6) < 1.0);
        assert!(soft_clip(-1.0e6) > -1.0);
    }

    #[test]
    fn test_monotone_and_continuous() {
        let mut last = soft_clip(-3.0);
        let step = 0.0005;
        let mut x = -3.0 + step;
        while x <= 3.0 {
            let y = soft_clip(x);
            assert!(y >= last, "not monotone at {}", x);
            assert!(y - last <= step * 1.0001, "jump at {}", x);
            last = y;
            x += step;
        }
    }

    #[test]
    fn test_clip_indicator() {
        let mut clipper = SoftClipper::new();
        let indicator = clipper.clip_indicator();

        let mut quiet = [StereoSample::new(0.5, -0.5); 4];
        clipper.process(&mut quiet);
        assert!(!indicator.load(Ordering::Relaxed));

        let mut hot = [StereoSample::new(1.4, -0.2); 4];
        clipper.process(&mut hot);
        assert!(indicator.load(Ordering::Relaxed));
        assert!(hot[0].left < 1.0 && hot[0].left > SOFT_CLIP_THRESHOLD);
    }
}
