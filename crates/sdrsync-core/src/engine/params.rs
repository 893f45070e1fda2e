//! Mixer parameters shared between the control thread and the render thread
//!
//! Every parameter is an independent atomic scalar. The control thread
//! writes with `Ordering::Relaxed`; the render thread takes one
//! [`MixerSnapshot`] per block. There is no invariant spanning several
//! parameters, so a block may see one parameter updated before another.

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::Arc;

use crate::config::{ChannelState, SessionState};
use crate::types::{Source, MAX_DELAY_MS};

use super::crossfader::{crossfader_levels, CROSSFADER_RANGE};

/// An `f32` stored as its bit pattern in an `AtomicU32`
#[derive(Debug)]
pub struct AtomicF32(AtomicU32);

impl AtomicF32 {
    pub fn new(value: f32) -> Self {
        Self(AtomicU32::new(value.to_bits()))
    }

    #[inline]
    pub fn load(&self) -> f32 {
        f32::from_bits(self.0.load(Ordering::Relaxed))
    }

    #[inline]
    pub fn store(&self, value: f32) {
        self.0.store(value.to_bits(), Ordering::Relaxed);
    }
}

/// Effective (already composed) settings of one input channel
#[derive(Debug)]
pub struct ChannelParams {
    /// Linear gain: slider × crossfader
    pub gain: AtomicF32,
    /// Pan from the crossfader (-1.0 = left, 1.0 = right)
    pub pan: AtomicF32,
    pub mute: AtomicBool,
}

impl ChannelParams {
    fn new(pan: f32) -> Self {
        Self {
            gain: AtomicF32::new(1.0),
            pan: AtomicF32::new(pan),
            mute: AtomicBool::new(false),
        }
    }
}

/// The atomic parameter record read by the mixer graph
#[derive(Debug)]
pub struct MixerParams {
    pub channels: [ChannelParams; 2],
    pub master_gain: AtomicF32,
    pub master_mute: AtomicBool,
    /// Delay-line setpoint for the radio channel in ms
    pub delay_ms: AtomicF32,
}

impl MixerParams {
    pub fn new() -> Self {
        Self {
            channels: [ChannelParams::new(-1.0), ChannelParams::new(1.0)],
            master_gain: AtomicF32::new(1.0),
            master_mute: AtomicBool::new(false),
            delay_ms: AtomicF32::new(0.0),
        }
    }

    pub fn channel(&self, source: Source) -> &ChannelParams {
        &self.channels[source.index()]
    }

    /// Read every parameter once (start of a render block)
    pub fn snapshot(&self) -> MixerSnapshot {
        let read = |c: &ChannelParams| ChannelSnapshot {
            gain: c.gain.load(),
            pan: c.pan.load(),
            mute: c.mute.load(Ordering::Relaxed),
        };
        MixerSnapshot {
            channels: [read(&self.channels[0]), read(&self.channels[1])],
            master_gain: self.master_gain.load(),
            master_mute: self.master_mute.load(Ordering::Relaxed),
            delay_ms: self.delay_ms.load(),
        }
    }
}

impl Default for MixerParams {
    fn default() -> Self {
        Self::new()
    }
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChannelSnapshot {
    pub gain: f32,
    pub pan: f32,
    pub mute: bool,
}

/// One block's view of the parameters
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct MixerSnapshot {
    pub channels: [ChannelSnapshot; 2],
    pub master_gain: f32,
    pub master_mute: bool,
    pub delay_ms: f32,
}

impl MixerSnapshot {
    /// Pan actually used for `source` in this block.
    ///
    /// When exactly one channel is muted, the audible one is centred so a
    /// single-source listen is heard in both ears. The stored pan is untouched.
    pub fn effective_pan(&self, source: Source) -> f32 {
        let own = &self.channels[source.index()];
        let other = &self.channels[1 - source.index()];
        if !own.mute && other.mute {
            0.0
        } else {
            own.pan
        }
    }
}

/// Peak meters published by the render thread
#[derive(Debug)]
pub struct MeterLevels {
    pub radio: AtomicF32,
    pub remote: AtomicF32,
    pub master_left: AtomicF32,
    pub master_right: AtomicF32,
}

impl MeterLevels {
    pub fn new() -> Self {
        Self {
            radio: AtomicF32::new(0.0),
            remote: AtomicF32::new(0.0),
            master_left: AtomicF32::new(0.0),
            master_right: AtomicF32::new(0.0),
        }
    }

    pub fn input(&self, source: Source) -> f32 {
        match source {
            Source::Radio => self.radio.load(),
            Source::Remote => self.remote.load(),
        }
    }
}

impl Default for MeterLevels {
    fn default() -> Self {
        Self::new()
    }
}

/// Control-thread owner of the user-facing mixer settings.
///
/// Holds the raw slider values and the crossfader position, and rewrites the
/// effective atomics in [`MixerParams`] whenever one of them changes.
pub struct MixerControls {
    params: Arc<MixerParams>,
    /// Per-channel slider (0.0 - 1.0)
    sliders: [f32; 2],
    mutes: [bool; 2],
    crossfader: i32,
    master_gain: f32,
    master_mute: bool,
    delay_ms: f32,
}

impl MixerControls {
    pub fn new(params: Arc<MixerParams>) -> Self {
        let mut controls = Self {
            params,
            sliders: [1.0; 2],
            mutes: [false; 2],
            crossfader: 0,
            master_gain: 1.0,
            master_mute: false,
            delay_ms: 0.0,
        };
        controls.publish();
        controls
    }

    /// Restore a persisted session.
    ///
    /// Channel pans are not read back; they follow from `crossfader`.
    pub fn from_session(params: Arc<MixerParams>, session: &SessionState) -> Self {
        let mut controls = Self::new(params);
        for (source, state) in [
            (Source::Radio, &session.radio),
            (Source::Remote, &session.remote),
        ] {
            controls.sliders[source.index()] = percent(state.gain);
            controls.mutes[source.index()] = state.mute;
        }
        controls.crossfader = session.crossfader.clamp(-CROSSFADER_RANGE, CROSSFADER_RANGE);
        controls.master_gain = percent(session.master_gain);
        controls.master_mute = session.master_mute;
        controls.delay_ms = (session.delay_ms as f32).clamp(0.0, MAX_DELAY_MS);
        controls.publish();
        controls
    }

    /// Snapshot the current settings for persistence
    pub fn session(&self, auto_sync_enabled: bool) -> SessionState {
        let levels = crossfader_levels(self.crossfader);
        let channel = |source: Source, pan: f32| ChannelState {
            gain: (self.sliders[source.index()] * 100.0).round() as i32,
            pan: (pan * 100.0).round() as i32,
            mute: self.mutes[source.index()],
        };
        SessionState {
            radio: channel(Source::Radio, levels.radio_pan),
            remote: channel(Source::Remote, levels.remote_pan),
            delay_ms: self.delay_ms.round() as i32,
            master_gain: (self.master_gain * 100.0).round() as i32,
            master_mute: self.master_mute,
            crossfader: self.crossfader,
            auto_sync_enabled,
        }
    }

    pub fn params(&self) -> Arc<MixerParams> {
        Arc::clone(&self.params)
    }

    /// Channel slider in percent (0 - 100)
    pub fn set_channel_gain(&mut self, source: Source, gain_percent: i32) {
        self.sliders[source.index()] = percent(gain_percent);
        self.publish();
    }

    pub fn set_channel_mute(&mut self, source: Source, mute: bool) {
        self.mutes[source.index()] = mute;
        self.publish();
    }

    /// Crossfader position (-100 = radio only, 100 = WebSDR only)
    pub fn set_crossfader(&mut self, position: i32) {
        self.crossfader = position.clamp(-CROSSFADER_RANGE, CROSSFADER_RANGE);
        self.publish();
    }

    pub fn crossfader(&self) -> i32 {
        self.crossfader
    }

    /// Master level in percent (0 - 100)
    pub fn set_master_gain(&mut self, gain_percent: i32) {
        self.master_gain = percent(gain_percent);
        self.params.master_gain.store(self.master_gain);
    }

    pub fn set_master_mute(&mut self, mute: bool) {
        self.master_mute = mute;
        self.params.master_mute.store(mute, Ordering::Relaxed);
    }

    /// Radio delay setpoint in ms, clamped to `[0, MAX_DELAY_MS]`
    pub fn set_delay_ms(&mut self, delay_ms: f32) {
        self.delay_ms = delay_ms.clamp(0.0, MAX_DELAY_MS);
        self.params.delay_ms.store(self.delay_ms);
    }

    pub fn delay_ms(&self) -> f32 {
        self.delay_ms
    }

    /// Recompute the effective channel atomics from sliders and crossfader
    fn publish(&mut self) {
        let levels = crossfader_levels(self.crossfader);
        let effective = [
            (self.sliders[0] * levels.radio_gain, levels.radio_pan),
            (self.sliders[1] * levels.remote_gain, levels.remote_pan),
        ];
        for (i, (gain, pan)) in effective.into_iter().enumerate() {
            let channel = &self.params.channels[i];
            channel.gain.store(gain);
            channel.pan.store(pan);
            channel.mute.store(self.mutes[i], Ordering::Relaxed);
        }
        self.params.master_gain.store(self.master_gain);
        self.params.master_mute.store(self.master_mute, Ordering::Relaxed);
        self.params.delay_ms.store(self.delay_ms);
    }
}

fn percent(value: i32) -> f32 {
    value.clamp(0, 100) as f32 / 100.0
}
