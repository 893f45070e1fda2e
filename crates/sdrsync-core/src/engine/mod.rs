//! Mixing engine - delay line, mixer graph and the device lifecycle
//!
//! - DelayLine: click-free variable delay for the radio channel
//! - MixerGraph: per-block gain, pan, sum, soft clip and metering
//! - MixerParams / MixerControls: lock-free parameters and their control-side owner
//! - AudioEngine: opens the devices and runs the graph in the render callback

mod crossfader;
mod delay_line;
mod engine;
mod mixer;
mod params;
mod smeter;
mod soft_clip;

pub use crossfader::*;
pub use delay_line::*;
pub use engine::*;
pub use mixer::*;
pub use params::*;
pub use smeter::*;
pub use soft_clip::*;
