// SPDX-License-Identifier: MIT OR Apache-2.0
//! Application settings.
//!
//! Stored as RON next to the working directory in [`SETTINGS_FILE_NAME`].

use crate::error::{AppError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Current settings format version
pub const SETTINGS_FORMAT_VERSION: u32 = 1;

/// Settings file name
pub const SETTINGS_FILE_NAME: &str = "coral.ron";

/// Playback settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlaybackSettings {
    /// Frames per second given to new Time nodes
    pub frames_per_second: f32,
    /// Frames the demo run plays before stopping
    pub demo_frames: u32,
}

impl Default for PlaybackSettings {
    fn default() -> Self {
        Self {
            frames_per_second: 24.0,
            demo_frames: 48,
        }
    }
}

/// Top-level settings
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Settings {
    /// Format version
    pub version: u32,
    /// Network opened at startup
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub startup_network: Option<PathBuf>,
    /// Where networks are saved when no path is given
    #[serde(default = "default_save_path")]
    pub default_save_path: PathBuf,
    /// Playback
    #[serde(default)]
    pub playback: PlaybackSettings,
}

fn default_save_path() -> PathBuf {
    PathBuf::from("network.ron")
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            version: SETTINGS_FORMAT_VERSION,
            startup_network: None,
            default_save_path: default_save_path(),
            playback: PlaybackSettings::default(),
        }
    }
}

impl Settings {
    /// Load settings from a file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let settings: Settings = ron::from_str(&content)?;

        if settings.version > SETTINGS_FORMAT_VERSION {
            return Err(AppError::SettingsVersion {
                found: settings.version,
                supported: SETTINGS_FORMAT_VERSION,
            });
        }

        Ok(settings)
    }

    /// Load settings, falling back to defaults when the file is missing or unreadable
    pub fn load_or_default(path: &Path) -> Self {
        if !path.exists() {
            tracing::debug!(path = %path.display(), "No settings file, using defaults");
            return Self::default();
        }
        match Self::load(path) {
            Ok(settings) => settings,
            Err(e) => {
                tracing::warn!(path = %path.display(), "Failed to load settings: {e}");
                Self::default()
            }
        }
    }

    /// Save settings to a file
    pub fn save(&self, path: &Path) -> Result<()> {
        let config = ron::ser::PrettyConfig::default().struct_names(true);
        let content = ron::ser::to_string_pretty(self, config)?;
        std::fs::write(path, content)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn temp_path(name: &str) -> PathBuf {
        std::env::temp_dir().join(format!("coral-settings-{}-{name}", std::process::id()))
    }

    #[test]
    fn test_default_settings() {
        let settings = Settings::default();
        assert_eq!(settings.version, SETTINGS_FORMAT_VERSION);
        assert_eq!(settings.playback.frames_per_second, 24.0);
        assert!(settings.startup_network.is_none());
    }

    #[test]
    fn test_save_and_load() {
        let path = temp_path("roundtrip.ron");
        let mut settings = Settings::default();
        settings.startup_network = Some(PathBuf::from("scenes/rig.ron"));
        settings.playback.demo_frames = 12;
        settings.save(&path).unwrap();

        let loaded = Settings::load(&path).unwrap();
        std::fs::remove_file(&path).ok();
        assert_eq!(loaded, settings);
    }

    #[test]
    fn test_missing_fields_use_defaults() {
        let settings: Settings = ron::from_str("(version: 1)").unwrap();
        assert_eq!(settings.default_save_path, PathBuf::from("network.ron"));
        assert_eq!(settings.playback, PlaybackSettings::default());
    }

    #[test]
    fn test_newer_version_rejected() {
        let path = temp_path("future.ron");
        std::fs::write(&path, "(version: 99)").unwrap();
        let result = Settings::load(&path);
        std::fs::remove_file(&path).ok();
        assert!(matches!(
            result,
            Err(AppError::SettingsVersion { found: 99, .. })
        ));
    }

    #[test]
    fn test_load_or_default_on_missing_file() {
        let settings = Settings::load_or_default(&temp_path("absent.ron"));
        assert_eq!(settings, Settings::default());
    }
}
