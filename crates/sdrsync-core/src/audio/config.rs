//! Audio device configuration
//!
//! Selects the two capture devices (radio and WebSDR), the playback device
//! and the buffer settings requested from the platform.

use serde::{Deserialize, Serialize};

use crate::types::SAMPLE_RATE;

/// Default buffer size when no preference is specified (frames)
pub const DEFAULT_BUFFER_SIZE: u32 = 512;

/// Sample rate requested from every device unless configured otherwise
pub const DEFAULT_SAMPLE_RATE: u32 = SAMPLE_RATE;

/// Preferred buffer size for audio streams
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum BufferSize {
    /// Let the system choose
    #[default]
    Default,
    /// Request a specific size in frames (may be adjusted by the system)
    Fixed(u32),
}

impl BufferSize {
    /// Buffer size in frames, or None for the system default
    pub fn as_frames(&self) -> Option<u32> {
        match self {
            BufferSize::Default => None,
            BufferSize::Fixed(frames) => Some(*frames),
        }
    }

    /// Latency of one buffer in milliseconds
    pub fn latency_ms(&self, sample_rate: u32) -> Option<f32> {
        self.as_frames()
            .map(|frames| (frames as f32 / sample_rate as f32) * 1000.0)
    }
}

/// Audio device identifier
///
/// Includes both the device name and the host backend (ALSA, PulseAudio,
/// WASAPI, ...) so devices of several hosts can be told apart.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DeviceId {
    /// Device name as reported by the system
    pub name: String,
    /// Audio host identifier; None searches every host
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub host: Option<String>,
}

impl DeviceId {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            host: None,
        }
    }

    pub fn with_host(name: &str, host: &str) -> Self {
        Self {
            name: name.to_string(),
            host: Some(host.to_string()),
        }
    }

    /// Display label that includes the host if available
    pub fn display_label(&self) -> String {
        match &self.host {
            Some(host) => format!("[{}] {}", host, self.name),
            None => self.name.clone(),
        }
    }
}

/// Device selection for the engine. `None` uses the host default.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AudioConfig {
    /// Capture device carrying the local transceiver audio
    pub radio_device: Option<DeviceId>,
    /// Capture device carrying the WebSDR audio (e.g. a loopback/monitor)
    pub remote_device: Option<DeviceId>,
    /// Playback device for the mix
    pub output_device: Option<DeviceId>,
    pub buffer_size: BufferSize,
    /// Requested sample rate; devices that refuse it run at their own rate
    pub sample_rate: u32,
}

impl Default for AudioConfig {
    fn default() -> Self {
        Self {
            radio_device: None,
            remote_device: None,
            output_device: None,
            buffer_size: BufferSize::default(),
            sample_rate: DEFAULT_SAMPLE_RATE,
        }
    }
}

impl AudioConfig {
    pub fn with_radio_device(mut self, device: DeviceId) -> Self {
        self.radio_device = Some(device);
        self
    }

    pub fn with_remote_device(mut self, device: DeviceId) -> Self {
        self.remote_device = Some(device);
        self
    }

    pub fn with_output_device(mut self, device: DeviceId) -> Self {
        self.output_device = Some(device);
        self
    }

    /// Set a fixed buffer size in frames
    pub fn with_buffer_frames(mut self, frames: u32) -> Self {
        self.buffer_size = BufferSize::Fixed(frames);
        self
    }
}
