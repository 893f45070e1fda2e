//! CPAL stream construction
//!
//! ```text
//! radio capture  ──i16──► RingWriter ─┐
//!                                     ├─► render callback ──► output device
//! remote capture ──i16──► RingWriter ─┘     (MixerGraph)
//! ```
//!
//! Every stream is built generically over the device sample format and
//! converts to or from interleaved stereo `i16` at the boundary. Callbacks
//! never allocate; scratch buffers are sized for [`MAX_BLOCK_FRAMES`] when
//! the stream is built.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use cpal::traits::DeviceTrait;
use cpal::{
    BufferSize as CpalBufferSize, FromSample, Sample, SampleFormat, SizedSample, Stream,
    StreamConfig, SupportedStreamConfigRange,
};

use super::config::{AudioConfig, BufferSize};
use super::device::Direction;
use super::error::{AudioError, AudioResult};
use super::ring_buffer::RingWriter;
use crate::types::{CHANNELS, MAX_BLOCK_FRAMES};

/// Smallest fixed buffer requested from a device
const MIN_BUFFER_FRAMES: u32 = 64;

/// Negotiated stream parameters for one device
#[derive(Debug, Clone)]
pub struct StreamSetup {
    pub config: StreamConfig,
    pub sample_format: SampleFormat,
}

impl StreamSetup {
    pub fn sample_rate(&self) -> u32 {
        self.config.sample_rate.0
    }

    pub fn channels(&self) -> usize {
        self.config.channels as usize
    }

    /// Requested buffer size in frames, None if the host decides
    pub fn buffer_frames(&self) -> Option<u32> {
        match self.config.buffer_size {
            CpalBufferSize::Fixed(frames) => Some(frames),
            CpalBufferSize::Default => None,
        }
    }
}

/// Called from a stream's error callback with a printable message
pub type ErrorHandler = Arc<dyn Fn(String) + Send + Sync>;

/// Pick the stream configuration for a device
///
/// Prefers 16-bit integer samples, then f32, at the configured sample rate.
/// Output streams prefer at least two channels. A device that cannot run at
/// the requested rate is opened at its maximum rate with a warning.
pub fn select_config(
    device: &cpal::Device,
    direction: Direction,
    config: &AudioConfig,
) -> AudioResult<StreamSetup> {
    let supported: Vec<SupportedStreamConfigRange> = match direction {
        Direction::Input => device
            .supported_input_configs()
            .map_err(|e| AudioError::ConfigError(e.to_string()))?
            .collect(),
        Direction::Output => device
            .supported_output_configs()
            .map_err(|e| AudioError::ConfigError(e.to_string()))?
            .collect(),
    };

    if supported.is_empty() {
        return Err(AudioError::ConfigError(format!(
            "No supported {:?} configurations",
            direction
        )));
    }

    let target_rate = config.sample_rate;
    let rate_ok = |c: &SupportedStreamConfigRange| {
        target_rate >= c.min_sample_rate().0 && target_rate <= c.max_sample_rate().0
    };
    let channels_ok = |c: &SupportedStreamConfigRange| match direction {
        Direction::Input => c.channels() >= 1,
        Direction::Output => c.channels() >= 2,
    };
    let format_rank = |c: &SupportedStreamConfigRange| match c.sample_format() {
        SampleFormat::I16 => 0,
        SampleFormat::F32 => 1,
        SampleFormat::I32 => 2,
        SampleFormat::U16 => 3,
        _ => 4,
    };

    let best = supported
        .iter()
        .filter(|c| format_rank(*c) < 4 && channels_ok(*c) && rate_ok(*c))
        .min_by_key(|c| (format_rank(*c), c.channels()))
        .or_else(|| {
            // Fallback: a usable format at any rate
            supported
                .iter()
                .filter(|c| format_rank(*c) < 4 && channels_ok(*c))
                .min_by_key(|c| format_rank(*c))
        })
        .or_else(|| supported.iter().find(|c| format_rank(*c) < 4))
        .ok_or_else(|| {
            AudioError::UnsupportedFormat(format!(
                "{:?}",
                supported.first().map(|c| c.sample_format())
            ))
        })?;

    let sample_rate = if rate_ok(best) {
        cpal::SampleRate(target_rate)
    } else {
        let fallback = best.max_sample_rate();
        log::warn!(
            "Device doesn't support {}Hz, opening at {}Hz (no resampling is done)",
            target_rate,
            fallback.0
        );
        fallback
    };

    let buffer_size = match config.buffer_size {
        BufferSize::Default => CpalBufferSize::Default,
        BufferSize::Fixed(frames) => {
            CpalBufferSize::Fixed(frames.clamp(MIN_BUFFER_FRAMES, MAX_BLOCK_FRAMES as u32))
        }
    };

    let supported_config = best.clone().with_sample_rate(sample_rate);
    let setup = StreamSetup {
        config: StreamConfig {
            channels: supported_config.channels(),
            sample_rate,
            buffer_size,
        },
        sample_format: supported_config.sample_format(),
    };

    log::debug!(
        "Selected {:?} config: {} ch, {}Hz, {:?}, buffer {:?}",
        direction,
        setup.config.channels,
        sample_rate.0,
        setup.sample_format,
        setup.buffer_frames()
    );
    Ok(setup)
}

/// Build a capture stream that feeds `writer`.
///
/// While `running` is false incoming audio is discarded.
pub fn build_input_stream(
    device: &cpal::Device,
    setup: &StreamSetup,
    writer: RingWriter,
    running: Arc<AtomicBool>,
    on_error: ErrorHandler,
) -> AudioResult<Stream> {
    let config = &setup.config;
    let stream = match setup.sample_format {
        SampleFormat::I16 => input_stream::<i16>(device, config, writer, running, on_error),
        SampleFormat::F32 => input_stream::<f32>(device, config, writer, running, on_error),
        SampleFormat::I32 => input_stream::<i32>(device, config, writer, running, on_error),
        SampleFormat::U16 => input_stream::<u16>(device, config, writer, running, on_error),
        other => return Err(AudioError::UnsupportedFormat(format!("{:?}", other))),
    };
    stream.map_err(|e| AudioError::StreamBuildError(e.to_string()))
}

/// Build the playback stream.
///
/// `render` fills interleaved stereo `i16` frames; its slice never holds more
/// than [`MAX_BLOCK_FRAMES`] frames. While `running` is false the device is
/// fed silence and `render` is not called.
pub fn build_output_stream<F>(
    device: &cpal::Device,
    setup: &StreamSetup,
    render: F,
    running: Arc<AtomicBool>,
    on_error: ErrorHandler,
) -> AudioResult<Stream>
where
    F: FnMut(&mut [i16]) + Send + 'static,
{
    let config = &setup.config;
    let stream = match setup.sample_format {
        SampleFormat::I16 => output_stream::<i16, F>(device, config, render, running, on_error),
        SampleFormat::F32 => output_stream::<f32, F>(device, config, render, running, on_error),
        SampleFormat::I32 => output_stream::<i32, F>(device, config, render, running, on_error),
        SampleFormat::U16 => output_stream::<u16, F>(device, config, render, running, on_error),
        other => return Err(AudioError::UnsupportedFormat(format!("{:?}", other))),
    };
    stream.map_err(|e| AudioError::StreamBuildError(e.to_string()))
}

fn input_stream<T>(
    device: &cpal::Device,
    config: &StreamConfig,
    mut writer: RingWriter,
    running: Arc<AtomicBool>,
    on_error: ErrorHandler,
) -> Result<Stream, cpal::BuildStreamError>
where
    T: SizedSample,
    i16: FromSample<T>,
{
    let channels = (config.channels as usize).max(1);
    let mut scratch = vec![0i16; MAX_BLOCK_FRAMES * channels];

    device.build_input_stream(
        config,
        move |data: &[T], _info: &cpal::InputCallbackInfo| {
            if !running.load(Ordering::Relaxed) {
                return;
            }
            for chunk in data.chunks(scratch.len()) {
                let converted = &mut scratch[..chunk.len()];
                for (dst, &src) in converted.iter_mut().zip(chunk) {
                    *dst = i16::from_sample(src);
                }
                writer.write_interleaved(converted, channels);
            }
        },
        move |err| on_error(err.to_string()),
        None,
    )
}

fn output_stream<T, F>(
    device: &cpal::Device,
    config: &StreamConfig,
    mut render: F,
    running: Arc<AtomicBool>,
    on_error: ErrorHandler,
) -> Result<Stream, cpal::BuildStreamError>
where
    T: SizedSample + FromSample<i16>,
    F: FnMut(&mut [i16]) + Send + 'static,
{
    let channels = (config.channels as usize).max(1);
    let mut mix = vec![0i16; MAX_BLOCK_FRAMES * CHANNELS];

    device.build_output_stream(
        config,
        move |data: &mut [T], _info: &cpal::OutputCallbackInfo| {
            if !running.load(Ordering::Relaxed) {
                data.fill(T::EQUILIBRIUM);
                return;
            }
            for block in data.chunks_mut(MAX_BLOCK_FRAMES * channels) {
                let frames = block.len() / channels;
                let mix = &mut mix[..frames * CHANNELS];
                render(mix);

                for (frame, stereo) in block.chunks_mut(channels).zip(mix.chunks_exact(CHANNELS)) {
                    if channels == 1 {
                        let mono = (stereo[0] as i32 + stereo[1] as i32) / 2;
                        frame[0] = T::from_sample(mono as i16);
                        continue;
                    }
                    frame[0] = T::from_sample(stereo[0]);
                    frame[1] = T::from_sample(stereo[1]);
                    // Fill additional channels with silence
                    for ch in frame.iter_mut().skip(2) {
                        *ch = T::EQUILIBRIUM;
                    }
                }
            }
        },
        move |err| on_error(err.to_string()),
        None,
    )
}
