//! Waterfall viewer configuration

use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("malformed config: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Viewer settings. Every field falls back to its default when absent.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WaterfallConfig {
    /// Slices visible at once
    pub window_size: usize,

    /// Playback rate in slices per second
    pub playback_speed: f64,

    pub min_playback_speed: f64,
    pub max_playback_speed: f64,

    /// Playback loop frame interval
    pub frame_interval_ms: u64,

    /// Concurrent fetch workers
    pub fetch_workers: usize,

    /// Whole windows fetched ahead of the visible one
    pub prefetch_windows: usize,
}

impl Default for WaterfallConfig {
    fn default() -> Self {
        Self {
            window_size: 64,
            playback_speed: 5.0,
            min_playback_speed: 0.5,
            max_playback_speed: 60.0,
            frame_interval_ms: 16,
            fetch_workers: 2,
            prefetch_windows: 1,
        }
    }
}

impl WaterfallConfig {
    pub fn load(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Self = serde_json::from_str(&text)?;
        config.validate()?;
        Ok(config)
    }

    /// Loads `path` if it exists, otherwise the defaults.
    pub fn load_or_default(path: impl AsRef<Path>) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        if path.exists() {
            Self::load(path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn save(&self, path: impl AsRef<Path>) -> Result<(), ConfigError> {
        let path = path.as_ref();
        let io_err = |source: std::io::Error| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        };
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).map_err(io_err)?;
        }
        fs::write(path, serde_json::to_string_pretty(self)?).map_err(io_err)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.window_size == 0 {
            return Err(ConfigError::Invalid("window_size must be > 0".into()));
        }
        if self.fetch_workers == 0 {
            return Err(ConfigError::Invalid("fetch_workers must be > 0".into()));
        }
        if !(self.min_playback_speed > 0.0 && self.min_playback_speed <= self.max_playback_speed) {
            return Err(ConfigError::Invalid(format!(
                "playback speed bounds {}..{} are invalid",
                self.min_playback_speed, self.max_playback_speed
            )));
        }
        if self.frame_interval_ms == 0 {
            return Err(ConfigError::Invalid("frame_interval_ms must be > 0".into()));
        }
        Ok(())
    }

    pub fn frame_interval(&self) -> Duration {
        Duration::from_millis(self.frame_interval_ms)
    }
}

pub fn config_dir() -> PathBuf {
    let base = dirs::config_dir().unwrap_or_else(std::env::temp_dir);
    base.join("gateway_waterfall")
}

pub fn default_config_path() -> PathBuf {
    config_dir().join("config.json")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_config_is_valid() {
        let config = WaterfallConfig::default();
        assert!(config.validate().is_ok());
        assert_eq!(config.frame_interval(), Duration::from_millis(16));
    }

    #[test]
    fn test_partial_json_uses_defaults() {
        let config: WaterfallConfig =
            serde_json::from_str(r#"{ "window_size": 16, "playback_speed": 12.5 }"#).unwrap();
        assert_eq!(config.window_size, 16);
        assert_eq!(config.playback_speed, 12.5);
        assert_eq!(config.fetch_workers, WaterfallConfig::default().fetch_workers);
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let zero_window = WaterfallConfig {
            window_size: 0,
            ..WaterfallConfig::default()
        };
        assert!(matches!(zero_window.validate(), Err(ConfigError::Invalid(_))));

        let inverted = WaterfallConfig {
            min_playback_speed: 10.0,
            max_playback_speed: 1.0,
            ..WaterfallConfig::default()
        };
        assert!(inverted.validate().is_err());
    }

    #[test]
    fn test_save_and_load() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("config.json");
        let config = WaterfallConfig {
            window_size: 32,
            prefetch_windows: 2,
            ..WaterfallConfig::default()
        };
        config.save(&path).unwrap();
        assert_eq!(WaterfallConfig::load(&path).unwrap(), config);

        let missing = dir.path().join("absent.json");
        assert_eq!(
            WaterfallConfig::load_or_default(&missing).unwrap(),
            WaterfallConfig::default()
        );
    }
}
