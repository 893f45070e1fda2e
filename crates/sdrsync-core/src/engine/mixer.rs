//! Mixer graph: radio + WebSDR into one stereo output
//!
//! Signal flow per block:
//! ```text
//! radio  ─► mono ─┬─► DelayLine ─► gain ─► pan ─┐
//!                 └─► estimator capture         ├─► Σ ─► master ─► soft clip ─► fade-in ─► i16
//! remote ─► mono ─┬─────────────► gain ─► pan ─┘
//!                 └─► estimator capture
//! ```
//!
//! The graph is owned by the render callback. It reads the atomic
//! [`MixerParams`] once per call and never allocates or locks.

use std::f32::consts::{FRAC_1_SQRT_2, FRAC_PI_4};
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use crate::sync::CaptureTap;
use crate::types::{
    i16_to_sample, ms_to_samples, sample_to_i16, Source, StereoSample, CHANNELS, MAX_BLOCK_FRAMES,
    MAX_DELAY_MS,
};

use super::delay_line::DelayLine;
use super::params::{MeterLevels, MixerParams, MixerSnapshot};
use super::soft_clip::SoftClipper;

/// Fade-in applied after a stream (re)start
pub const FADE_IN_MS: f32 = 10.0;

/// Per-block decay of held meter peaks
pub const METER_DECAY: f32 = 0.95;

/// Held peaks below this read as silence
pub const METER_SILENCE: f32 = 1e-4;

/// Constant-power pan law: `(left, right)` gains for `pan` in `[-1, 1]`
#[inline]
pub fn pan_gains(pan: f32) -> (f32, f32) {
    if pan <= -1.0 {
        return (1.0, 0.0);
    }
    if pan >= 1.0 {
        return (0.0, 1.0);
    }
    if pan == 0.0 {
        return (FRAC_1_SQRT_2, FRAC_1_SQRT_2);
    }
    let alpha = (pan + 1.0) * FRAC_PI_4;
    (alpha.cos(), alpha.sin())
}

/// Held meter values: radio, remote, master L, master R
#[derive(Debug, Default, Clone, Copy)]
struct MeterHold([f32; 4]);

impl MeterHold {
    fn update(&mut self, index: usize, peak: f32) -> f32 {
        let held = peak.max(self.0[index] * METER_DECAY);
        self.0[index] = if held < METER_SILENCE { 0.0 } else { held };
        self.0[index]
    }
}

/// Block processor for the two input streams
pub struct MixerGraph {
    params: Arc<MixerParams>,
    meters: Arc<MeterLevels>,
    capture: Option<CaptureTap>,
    delay: DelayLine,
    clipper: SoftClipper,
    fade_length: usize,
    fade_position: usize,
    hold: MeterHold,
    // Scratch, sized for MAX_BLOCK_FRAMES
    radio_mono: Vec<f32>,
    remote_mono: Vec<f32>,
    delayed: Vec<f32>,
    mix: Vec<StereoSample>,
}

impl MixerGraph {
    pub fn new(params: Arc<MixerParams>, meters: Arc<MeterLevels>, sample_rate: u32) -> Self {
        Self {
            params,
            meters,
            capture: None,
            delay: DelayLine::new(MAX_DELAY_MS, sample_rate),
            clipper: SoftClipper::new(),
            fade_length: ms_to_samples(FADE_IN_MS, sample_rate).max(1),
            fade_position: 0,
            hold: MeterHold::default(),
            radio_mono: vec![0.0; MAX_BLOCK_FRAMES],
            remote_mono: vec![0.0; MAX_BLOCK_FRAMES],
            delayed: vec![0.0; MAX_BLOCK_FRAMES],
            mix: vec![StereoSample::silence(); MAX_BLOCK_FRAMES],
        }
    }

    /// Feed the pre-delay mono signals to an estimator capture
    pub fn with_capture(mut self, tap: CaptureTap) -> Self {
        self.capture = Some(tap);
        self
    }

    pub fn clip_indicator(&self) -> Arc<AtomicBool> {
        self.clipper.clip_indicator()
    }

    /// Delay currently applied to the radio, in samples
    pub fn current_delay_samples(&self) -> usize {
        self.delay.current_samples()
    }

    /// Stream (re)start: clear the delay store and restart the fade-in
    pub fn reset(&mut self) {
        self.delay.reset();
        self.fade_position = 0;
        self.hold = MeterHold::default();
    }

    /// Mix interleaved stereo `radio_in` and `remote_in` into `out`.
    ///
    /// The frame count is taken from `out`; inputs shorter than that are
    /// treated as silence past their end.
    pub fn process(&mut self, radio_in: &[i16], remote_in: &[i16], out: &mut [i16]) {
        let frames = out.len() / CHANNELS;
        let snapshot = self.params.snapshot();
        self.delay.set_delay_ms(snapshot.delay_ms);

        let mut offset = 0;
        while offset < frames {
            let n = (frames - offset).min(MAX_BLOCK_FRAMES);
            let out_block = &mut out[offset * CHANNELS..(offset + n) * CHANNELS];
            self.process_block(&snapshot, radio_in, remote_in, offset, out_block);
            offset += n;
        }
    }

    fn process_block(
        &mut self,
        snapshot: &MixerSnapshot,
        radio_in: &[i16],
        remote_in: &[i16],
        offset: usize,
        out: &mut [i16],
    ) {
        let n = out.len() / CHANNELS;
        downmix(radio_in, offset, &mut self.radio_mono[..n]);
        downmix(remote_in, offset, &mut self.remote_mono[..n]);

        if let Some(tap) = &self.capture {
            if tap.is_capturing() {
                tap.add_samples(&self.radio_mono[..n], &self.remote_mono[..n]);
            }
        }

        self.delay.process(&self.radio_mono[..n], &mut self.delayed[..n]);

        let radio = snapshot.channels[Source::Radio.index()];
        let remote = snapshot.channels[Source::Remote.index()];
        let (radio_l, radio_r) = pan_gains(snapshot.effective_pan(Source::Radio));
        let (remote_l, remote_r) = pan_gains(snapshot.effective_pan(Source::Remote));
        let master = if snapshot.master_mute { 0.0 } else { snapshot.master_gain };

        let mut radio_peak: f32 = 0.0;
        let mut remote_peak: f32 = 0.0;
        for i in 0..n {
            let r = self.delayed[i] * radio.gain;
            let w = self.remote_mono[i] * remote.gain;
            // Meters show post-gain level even when muted
            radio_peak = radio_peak.max(r.abs());
            remote_peak = remote_peak.max(w.abs());

            let mut frame = StereoSample::silence();
            if !radio.mute {
                frame += StereoSample::new(r * radio_l, r * radio_r);
            }
            if !remote.mute {
                frame += StereoSample::new(w * remote_l, w * remote_r);
            }
            self.mix[i] = frame * master;
        }

        self.clipper.process(&mut self.mix[..n]);

        for frame in self.mix[..n].iter_mut() {
            if self.fade_position >= self.fade_length {
                break;
            }
            let t = self.fade_position as f32 / self.fade_length as f32;
            *frame = *frame * (0.5 * (1.0 - (std::f32::consts::PI * t).cos()));
            self.fade_position += 1;
        }

        let mut left_peak: f32 = 0.0;
        let mut right_peak: f32 = 0.0;
        for (frame, dst) in self.mix[..n].iter().zip(out.chunks_exact_mut(CHANNELS)) {
            left_peak = left_peak.max(frame.left.abs());
            right_peak = right_peak.max(frame.right.abs());
            dst[0] = sample_to_i16(frame.left);
            dst[1] = sample_to_i16(frame.right);
        }

        self.meters.radio.store(self.hold.update(0, radio_peak));
        self.meters.remote.store(self.hold.update(1, remote_peak));
        self.meters.master_left.store(self.hold.update(2, left_peak));
        self.meters.master_right.store(self.hold.update(3, right_peak));
    }
}

/// Average interleaved stereo frames starting at frame `offset` into `out`
fn downmix(input: &[i16], offset: usize, out: &mut [f32]) {
    for (i, y) in out.iter_mut().enumerate() {
        let base = (offset + i) * CHANNELS;
        *y = match input.get(base..base + CHANNELS) {
            Some(&[l, r]) => (i16_to_sample(l) + i16_to_sample(r)) * 0.5,
            _ => 0.0,
        };
    }
}
