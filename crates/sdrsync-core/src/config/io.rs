//! YAML settings files

use std::io::ErrorKind;
use std::path::Path;

use anyhow::{Context, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Load a settings file, falling back to `T::default()`.
///
/// A missing file is normal on first run. An unreadable or invalid file is
/// logged and replaced by defaults so a bad edit never blocks startup.
pub fn load_config<T>(path: &Path) -> T
where
    T: DeserializeOwned + Default,
{
    let contents = match std::fs::read_to_string(path) {
        Ok(contents) => contents,
        Err(e) if e.kind() == ErrorKind::NotFound => {
            log::info!("No settings at {:?}, using defaults", path);
            return T::default();
        }
        Err(e) => {
            log::warn!("Failed to read settings {:?}: {}, using defaults", path, e);
            return T::default();
        }
    };

    match serde_yaml::from_str::<T>(&contents) {
        Ok(config) => {
            log::info!("Loaded settings from {:?}", path);
            config
        }
        Err(e) => {
            log::warn!("Failed to parse settings {:?}: {}, using defaults", path, e);
            T::default()
        }
    }
}

/// Write a settings file, creating parent directories.
///
/// The YAML is written next to the target and renamed over it, so a crash
/// mid-write leaves the previous file intact.
pub fn save_config<T>(config: &T, path: &Path) -> Result<()>
where
    T: Serialize,
{
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)
            .with_context(|| format!("Failed to create settings directory: {:?}", parent))?;
    }

    let yaml = serde_yaml::to_string(config).context("Failed to serialize settings to YAML")?;

    let staging = path.with_extension("yaml.tmp");
    std::fs::write(&staging, yaml)
        .with_context(|| format!("Failed to write settings file: {:?}", staging))?;
    std::fs::rename(&staging, path)
        .with_context(|| format!("Failed to replace settings file: {:?}", path))?;

    log::info!("Saved settings to {:?}", path);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde::Deserialize;

    #[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
    struct Probe {
        delay_ms: i32,
        label: String,
    }

    #[test]
    fn test_missing_file_gives_default() {
        let dir = tempfile::tempdir().unwrap();
        let loaded: Probe = load_config(&dir.path().join("absent.yaml"));
        assert_eq!(loaded, Probe::default());
    }

    #[test]
    fn test_invalid_yaml_gives_default() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.yaml");
        std::fs::write(&path, "delay_ms: [not a number").unwrap();
        let loaded: Probe = load_config(&path);
        assert_eq!(loaded, Probe::default());
    }

    #[test]
    fn test_save_creates_directories_and_reloads() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("a").join("b").join("settings.yaml");
        let probe = Probe {
            delay_ms: 420,
            label: "40m".to_string(),
        };

        save_config(&probe, &path).unwrap();
        assert!(!path.with_extension("yaml.tmp").exists());
        let loaded: Probe = load_config(&path);
        assert_eq!(loaded, probe);
    }
}
