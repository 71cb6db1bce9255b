// Configuration management for Facecap

use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::time::Duration;

use crate::encoding::EncoderConfig;

/// Application configuration
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Config {
    /// Directory where session artifacts are written
    pub storage_path: PathBuf,

    /// How long `start` waits for the encoder to accept frames
    #[serde(default = "default_readiness_timeout_ms")]
    pub readiness_timeout_ms: u64,

    /// Poll interval while waiting for encoder readiness
    #[serde(default = "default_readiness_poll_interval_ms")]
    pub readiness_poll_interval_ms: u64,

    /// Record the tracked face mesh alongside blend shapes
    #[serde(default)]
    pub capture_mesh: bool,

    /// Indent the telemetry JSON
    #[serde(default)]
    pub pretty_json: bool,

    /// Frame size used when a session starts before any frame was seen
    #[serde(default = "default_fallback_frame_size")]
    pub fallback_frame_size: (u32, u32),

    /// Pixel format used when a session starts before any frame was seen
    #[serde(default = "default_pixel_format")]
    pub fallback_pixel_format: String,

    /// Video encoder settings
    #[serde(default)]
    pub encoder: EncoderConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            storage_path: get_default_storage_path(),
            readiness_timeout_ms: default_readiness_timeout_ms(),
            readiness_poll_interval_ms: default_readiness_poll_interval_ms(),
            capture_mesh: false,
            pretty_json: false,
            fallback_frame_size: default_fallback_frame_size(),
            fallback_pixel_format: default_pixel_format(),
            encoder: EncoderConfig::default(),
        }
    }
}

impl Config {
    /// Config rooted at a specific storage directory, defaults elsewhere
    pub fn with_storage_path(storage_path: impl Into<PathBuf>) -> Self {
        Self {
            storage_path: storage_path.into(),
            ..Self::default()
        }
    }

    /// Load config from disk or return default
    pub fn load_or_default(config_path: &Path) -> Self {
        if config_path.exists() {
            match Self::load(config_path) {
                Ok(config) => return config,
                Err(e) => log::warn!("Failed to load config {:?}: {}", config_path, e),
            }
        }

        Self::default()
    }

    /// Load config from disk
    pub fn load(config_path: &Path) -> anyhow::Result<Self> {
        let contents = std::fs::read_to_string(config_path)?;
        Ok(toml::from_str(&contents)?)
    }

    /// Save config to disk
    pub fn save(&self, config_path: &Path) -> anyhow::Result<()> {
        // Ensure parent directory exists
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let contents = toml::to_string_pretty(self)?;
        std::fs::write(config_path, contents)?;

        Ok(())
    }

    pub fn readiness_timeout(&self) -> Duration {
        Duration::from_millis(self.readiness_timeout_ms)
    }

    pub fn readiness_poll_interval(&self) -> Duration {
        Duration::from_millis(self.readiness_poll_interval_ms.max(1))
    }
}

/// Get the default storage path for recordings
fn get_default_storage_path() -> PathBuf {
    dirs::video_dir()
        .or_else(|| dirs::home_dir().map(|h| h.join("Videos")))
        .unwrap_or_else(|| PathBuf::from("."))
        .join("Facecap")
}

/// Get the default config file path
pub fn default_config_path() -> PathBuf {
    dirs::config_dir()
        .unwrap_or_else(|| PathBuf::from("."))
        .join("facecap")
        .join("config.toml")
}

fn default_readiness_timeout_ms() -> u64 {
    5000
}

fn default_readiness_poll_interval_ms() -> u64 {
    10
}

/// Capture size of the front-facing depth camera
fn default_fallback_frame_size() -> (u32, u32) {
    (1920, 1440)
}

fn default_pixel_format() -> String {
    "NV12".to_string()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::tempdir;

    #[test]
    fn save_and_load_round_trip() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("cfg").join("config.toml");

        let mut config = Config::with_storage_path(dir.path().join("out"));
        config.capture_mesh = true;
        config.encoder.bitrate = 4_000_000;
        config.save(&path).unwrap();

        assert_eq!(Config::load(&path).unwrap(), config);
    }

    #[test]
    fn missing_fields_take_defaults() {
        let config: Config = toml::from_str("storage_path = \"/tmp/fc\"\n").unwrap();
        assert_eq!(config.storage_path, PathBuf::from("/tmp/fc"));
        assert_eq!(config.readiness_timeout(), Duration::from_secs(5));
        assert_eq!(config.fallback_frame_size, (1920, 1440));
        assert_eq!(config.encoder.keyframe_interval, 60);
        assert!(!config.capture_mesh);
    }

    #[test]
    fn unreadable_config_falls_back_to_default() {
        let dir = tempdir().unwrap();
        let path = dir.path().join("config.toml");
        std::fs::write(&path, "storage_path = 12").unwrap();
        assert_eq!(Config::load_or_default(&path), Config::default());
    }
}
