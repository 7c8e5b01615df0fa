//! Global configuration management
//!
//! Reads `config.toml` from the config directory. Every section and key is
//! optional; a missing file means all defaults.

use crate::config::defaults;
use crate::infra::dirs::FieldKitDirs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

/// Global configuration error types
#[derive(Error, Debug)]
pub enum GlobalConfigError {
    /// Failed to read config file
    #[error("Failed to read config file '{path}': {error}")]
    ReadError { path: String, error: String },

    /// Failed to parse config file
    #[error("Failed to parse config file '{path}': {error}")]
    ParseError { path: String, error: String },
}

/// Global configuration for fieldkit
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GlobalConfig {
    /// Which HID device to talk to
    #[serde(default)]
    pub device: DeviceConfig,

    /// Request and bootloader timeouts
    #[serde(default)]
    pub timeouts: TimeoutConfig,

    /// QMK tooling
    #[serde(default)]
    pub qmk: QmkConfig,
}

/// Device selection
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// USB vendor ID
    pub vendor_id: Option<u16>,

    /// USB product ID
    pub product_id: Option<u16>,

    /// Preferred raw HID usage page
    pub usage_page: Option<u16>,
}

/// Timeouts
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TimeoutConfig {
    /// Per-request deadline in milliseconds
    pub request_ms: Option<u64>,

    /// Bootloader wait in seconds
    pub bootloader_wait_secs: Option<u64>,

    /// Bootloader poll interval in milliseconds
    pub poll_interval_ms: Option<u64>,
}

/// QMK tooling
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct QmkConfig {
    /// Path or name of the `qmk` executable
    pub binary: Option<String>,
}

impl GlobalConfig {
    /// Load global configuration from the config directory
    ///
    /// # Errors
    ///
    /// Returns `GlobalConfigError::ParseError` if the config file exists but
    /// contains invalid TOML.
    pub fn load(dirs: &FieldKitDirs) -> Result<Self, GlobalConfigError> {
        Self::load_from_path(&dirs.global_config_path())
    }

    /// Load global configuration from a specific path
    pub fn load_from_path(path: &Path) -> Result<Self, GlobalConfigError> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = fs::read_to_string(path).map_err(|e| GlobalConfigError::ReadError {
            path: path.display().to_string(),
            error: e.to_string(),
        })?;

        toml::from_str(&content).map_err(|e| GlobalConfigError::ParseError {
            path: path.display().to_string(),
            error: e.to_string(),
        })
    }

    /// Effective vendor ID
    #[must_use]
    pub fn vendor_id(&self) -> u16 {
        self.device.vendor_id.unwrap_or(defaults::DEFAULT_VENDOR_ID)
    }

    /// Effective product ID
    #[must_use]
    pub fn product_id(&self) -> u16 {
        self.device.product_id.unwrap_or(defaults::DEFAULT_PRODUCT_ID)
    }

    /// Effective raw HID usage page
    #[must_use]
    pub fn usage_page(&self) -> u16 {
        self.device.usage_page.unwrap_or(defaults::RAW_HID_USAGE_PAGE)
    }

    /// Effective request timeout
    #[must_use]
    pub fn request_timeout(&self) -> Duration {
        self.timeouts
            .request_ms
            .map_or(defaults::REQUEST_TIMEOUT, Duration::from_millis)
    }

    /// Effective bootloader wait
    #[must_use]
    pub fn bootloader_wait(&self) -> Duration {
        self.timeouts
            .bootloader_wait_secs
            .map_or(defaults::BOOTLOADER_WAIT_TIMEOUT, Duration::from_secs)
    }

    /// Effective bootloader poll interval
    #[must_use]
    pub fn poll_interval(&self) -> Duration {
        self.timeouts
            .poll_interval_ms
            .map_or(defaults::BOOTLOADER_POLL_INTERVAL, Duration::from_millis)
    }

    /// Effective `qmk` executable
    #[must_use]
    pub fn qmk_binary(&self) -> &str {
        self.qmk
            .binary
            .as_deref()
            .unwrap_or(defaults::DEFAULT_QMK_BINARY)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_default_config() {
        let config = GlobalConfig::default();
        assert_eq!(config.vendor_id(), 0xFEED);
        assert_eq!(config.product_id(), 0x0000);
        assert_eq!(config.usage_page(), 0xFF60);
        assert_eq!(config.request_timeout(), Duration::from_secs(5));
        assert_eq!(config.bootloader_wait(), Duration::from_secs(30));
        assert_eq!(config.poll_interval(), Duration::from_millis(500));
        assert_eq!(config.qmk_binary(), "qmk");
    }

    #[test]
    fn test_load_missing_file_returns_default() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("config.toml");

        let config = GlobalConfig::load_from_path(&config_path).unwrap();
        assert!(config.device.vendor_id.is_none());
    }

    #[test]
    fn test_load_valid_config() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("config.toml");

        let content = r#"
[device]
vendor_id = 0x4653
product_id = 0x0001

[timeouts]
bootloader_wait_secs = 45

[qmk]
binary = "/opt/qmk/bin/qmk"
"#;
        fs::write(&config_path, content).unwrap();

        let config = GlobalConfig::load_from_path(&config_path).unwrap();
        assert_eq!(config.vendor_id(), 0x4653);
        assert_eq!(config.product_id(), 0x0001);
        assert_eq!(config.usage_page(), 0xFF60);
        assert_eq!(config.bootloader_wait(), Duration::from_secs(45));
        assert_eq!(config.request_timeout(), Duration::from_secs(5));
        assert_eq!(config.qmk_binary(), "/opt/qmk/bin/qmk");
    }

    #[test]
    fn test_load_invalid_toml_returns_error() {
        let temp_dir = TempDir::new().unwrap();
        let config_path = temp_dir.path().join("config.toml");

        fs::write(&config_path, "invalid toml [[[").unwrap();

        let result = GlobalConfig::load_from_path(&config_path);
        assert!(matches!(result, Err(GlobalConfigError::ParseError { .. })));
    }

    #[test]
    fn test_load_via_dirs() {
        let temp_dir = TempDir::new().unwrap();
        fs::write(temp_dir.path().join("config.toml"), "[timeouts]\nrequest_ms = 250\n").unwrap();

        let dirs = FieldKitDirs::with_config_dir(temp_dir.path());
        let config = GlobalConfig::load(&dirs).unwrap();
        assert_eq!(config.request_timeout(), Duration::from_millis(250));
    }
}
