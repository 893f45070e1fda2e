//! Device side of the audio engine
//!
//! - **ring_buffer**: lock-free frame queues between the capture callbacks and
//!   the render callback
//! - **device**: enumeration and lookup of capture and playback devices across
//!   all CPAL hosts
//! - **backend**: stream configuration and construction with sample-format
//!   conversion to interleaved stereo `i16`
//!
//! Nothing here knows about mixing; the engine hands the backend a render
//! closure and a pair of ring writers.

mod backend;
mod config;
mod device;
mod error;
pub mod ring_buffer;

pub use backend::{build_input_stream, build_output_stream, select_config, ErrorHandler, StreamSetup};
pub use config::{AudioConfig, BufferSize, DeviceId, DEFAULT_BUFFER_SIZE, DEFAULT_SAMPLE_RATE};
pub use device::{find_device, list_devices, resolve_device, AudioDevice, Direction};
pub use error::{AudioError, AudioResult};
pub use ring_buffer::{frame_ring, RingReader, RingStats, RingWriter};
