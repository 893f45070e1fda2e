//! Audio backend error types

use thiserror::Error;

use crate::sync::EstimatorError;

/// Errors that can occur while opening or running the audio devices
#[derive(Error, Debug)]
pub enum AudioError {
    /// No audio devices available
    #[error("No {0} devices found")]
    NoDevices(&'static str),

    /// Failed to get default device
    #[error("Failed to get default audio device: {0}")]
    NoDefaultDevice(String),

    /// Device not found
    #[error("Audio device not found: {0}")]
    DeviceNotFound(String),

    /// Failed to get device configuration
    #[error("Failed to get device config: {0}")]
    ConfigError(String),

    /// Failed to build audio stream
    #[error("Failed to build audio stream: {0}")]
    StreamBuildError(String),

    /// Failed to start/play stream
    #[error("Failed to start audio stream: {0}")]
    StreamPlayError(String),

    /// Unsupported sample format
    #[error("Unsupported sample format: {0}")]
    UnsupportedFormat(String),

    /// start() while the engine is already running
    #[error("Audio engine is already running")]
    AlreadyRunning,

    /// Offset estimator worker could not be created
    #[error("Failed to start offset estimator: {0}")]
    Estimator(#[from] EstimatorError),
}

/// Result type for audio operations
pub type AudioResult<T> = Result<T, AudioError>;
