//! Persisted application settings

use std::path::{Path, PathBuf};

use anyhow::Result;
use serde::{Deserialize, Serialize};

use super::io::{load_config, save_config};
use super::paths::default_recording_dir;
use crate::audio::AudioConfig;

/// Slider state of one mixer channel
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChannelState {
    /// Percent, 0 - 100
    pub gain: i32,
    /// -100 (left) to 100 (right). Derived from the crossfader position:
    /// saved for reference, recomputed on restore.
    pub pan: i32,
    pub mute: bool,
}

impl ChannelState {
    fn with_pan(pan: i32) -> Self {
        Self {
            gain: 100,
            pan,
            mute: false,
        }
    }
}

/// Mixer and sync state restored at startup
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SessionState {
    pub radio: ChannelState,
    pub remote: ChannelState,
    pub delay_ms: i32,
    pub master_gain: i32,
    pub master_mute: bool,
    /// -100 (radio only) to 100 (WebSDR only)
    pub crossfader: i32,
    pub auto_sync_enabled: bool,
}

impl Default for SessionState {
    fn default() -> Self {
        Self {
            radio: ChannelState::with_pan(-100),
            remote: ChannelState::with_pan(100),
            delay_ms: 0,
            master_gain: 100,
            master_mute: false,
            crossfader: 0,
            auto_sync_enabled: false,
        }
    }
}

/// Contents of `config.yaml`
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SyncSettings {
    pub audio: AudioConfig,
    /// Directory recordings are written to
    pub recording_dir: PathBuf,
    pub session: SessionState,
}

impl Default for SyncSettings {
    fn default() -> Self {
        Self {
            audio: AudioConfig::default(),
            recording_dir: default_recording_dir(),
            session: SessionState::default(),
        }
    }
}

impl SyncSettings {
    pub fn load(path: &Path) -> Self {
        load_config(path)
    }

    pub fn save(&self, path: &Path) -> Result<()> {
        save_config(self, path)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::DeviceId;

    #[test]
    fn test_defaults_pan_channels_apart() {
        let session = SessionState::default();
        assert_eq!(session.radio.pan, -100);
        assert_eq!(session.remote.pan, 100);
        assert_eq!(session.master_gain, 100);
        assert!(!session.auto_sync_enabled);
    }

    #[test]
    fn test_partial_session_fills_defaults() {
        let settings: SyncSettings =
            serde_yaml::from_str("session:\n  delay_ms: 420\n  auto_sync_enabled: true\n").unwrap();
        assert_eq!(settings.session.delay_ms, 420);
        assert!(settings.session.auto_sync_enabled);
        assert_eq!(settings.session.radio, ChannelState::with_pan(-100));
        assert_eq!(settings.audio, AudioConfig::default());
    }

    #[test]
    fn test_settings_roundtrip() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("config.yaml");

        let mut settings = SyncSettings::default();
        settings.audio = settings
            .audio
            .with_remote_device(DeviceId::with_host("Monitor of Built-in", "ALSA"));
        settings.recording_dir = dir.path().join("rec");
        settings.session.crossfader = -40;
        settings.session.remote.mute = true;

        settings.save(&path).unwrap();
        assert_eq!(SyncSettings::load(&path), settings);
    }
}
