use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Config {
    #[serde(default)]
    pub general: GeneralConfig,
    #[serde(default)]
    pub capture: CaptureConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Interval of the backup safety poll while armed.
    #[serde(default = "GeneralConfig::default_poll_interval")]
    pub poll_interval_ms: u64,
    /// How long after arming the watched key may stay untouched before the
    /// failsafe fires.
    #[serde(default = "GeneralConfig::default_grace_period")]
    pub grace_period_ms: u64,
}

impl GeneralConfig {
    fn default_poll_interval() -> u64 { 200 }
    fn default_grace_period() -> u64 { 3000 }
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            poll_interval_ms: 200,
            grace_period_ms: 3000,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CaptureConfig {
    #[serde(default = "CaptureConfig::default_countdown_ticks")]
    pub countdown_ticks: u8,
    #[serde(default = "CaptureConfig::default_tick")]
    pub tick_ms: u64,
}

impl CaptureConfig {
    fn default_countdown_ticks() -> u8 { 3 }
    fn default_tick() -> u64 { 1000 }
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            countdown_ticks: 3,
            tick_ms: 1000,
        }
    }
}

impl Config {
    pub fn config_dir() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("/etc"))
            .join("deadtab")
    }

    pub fn config_path() -> PathBuf {
        Self::config_dir().join("config.toml")
    }

    pub fn load() -> Result<Self> {
        let path = Self::config_path();
        if path.exists() {
            Self::load_from(&path)
        } else {
            Ok(Self::default())
        }
    }

    pub fn load_from(path: &Path) -> Result<Self> {
        let contents = std::fs::read_to_string(path)
            .with_context(|| format!("reading config from {}", path.display()))?;
        toml::from_str(&contents).with_context(|| "parsing config TOML")
    }
}

pub fn socket_path() -> PathBuf {
    // DEADTABD_SOCK env var overrides for testing.
    if let Ok(path) = std::env::var("DEADTABD_SOCK") {
        return PathBuf::from(path);
    }
    dirs::runtime_dir()
        .unwrap_or_else(std::env::temp_dir)
        .join("deadtabd.sock")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_poll_interval_is_200ms() {
        let config = Config::default();
        assert_eq!(config.general.poll_interval_ms, 200);
    }

    #[test]
    fn default_grace_period_is_3000ms() {
        let config = Config::default();
        assert_eq!(config.general.grace_period_ms, 3000);
    }

    #[test]
    fn default_capture_is_three_one_second_ticks() {
        let config = Config::default();
        assert_eq!(config.capture.countdown_ticks, 3);
        assert_eq!(config.capture.tick_ms, 1000);
    }

    #[test]
    fn parse_empty_toml_applies_all_defaults() {
        let config: Config = toml::from_str("").unwrap();
        assert_eq!(config.general.poll_interval_ms, 200);
        assert_eq!(config.capture.countdown_ticks, 3);
    }

    #[test]
    fn parse_custom_grace_period() {
        let toml = r#"
[general]
grace_period_ms = 5000
"#;
        let config: Config = toml::from_str(toml).unwrap();
        assert_eq!(config.general.grace_period_ms, 5000);
        // Untouched sections keep their defaults
        assert_eq!(config.general.poll_interval_ms, 200);
        assert_eq!(config.capture.tick_ms, 1000);
    }

    #[test]
    fn socket_path_ends_with_deadtabd_sock() {
        let path = socket_path();
        assert_eq!(path.file_name().unwrap(), "deadtabd.sock");
    }
}
