//! Recording of the mixed output to WAV files

mod recorder;

pub use recorder::{
    available_space, Recorder, RecorderError, RecorderResult, RecorderTap, RecordingInfo,
    LOW_DISK_BYTES,
};
