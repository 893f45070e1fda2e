//! Standard locations for settings and recordings

use std::path::PathBuf;

const APP_DIR: &str = "sdrsync";

/// `~/.config/sdrsync/config.yaml` (platform config dir)
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .or_else(dirs::home_dir)
        .unwrap_or_else(|| PathBuf::from("."))
        .join(APP_DIR)
        .join("config.yaml")
}

/// `~/Music/sdrsync-recordings`
pub fn default_recording_dir() -> PathBuf {
    dirs::audio_dir()
        .or_else(|| dirs::home_dir().map(|home| home.join("Music")))
        .unwrap_or_else(|| PathBuf::from("."))
        .join("sdrsync-recordings")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_config_path_layout() {
        let path = default_config_path();
        assert!(path.ends_with("sdrsync/config.yaml"));
    }

    #[test]
    fn test_recording_dir_name() {
        assert!(default_recording_dir().ends_with("sdrsync-recordings"));
    }
}
