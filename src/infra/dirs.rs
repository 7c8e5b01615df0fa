//! Platform-specific directory management
//!
//! Only the config directory is needed. `FIELDKIT_CONFIG_DIR` overrides the
//! platform default (`$XDG_CONFIG_HOME/fieldkit` on Linux,
//! `~/Library/Application Support/fieldkit` on macOS).

use std::env;
use std::path::PathBuf;

/// Environment variable overriding the config directory
pub const ENV_CONFIG_DIR: &str = "FIELDKIT_CONFIG_DIR";

/// Application name used in directory paths
const APP_NAME: &str = "fieldkit";

const CONFIG_FILE: &str = "config.toml";

/// Directory provider for fieldkit
#[derive(Debug, Clone)]
pub struct FieldKitDirs {
    config_dir: PathBuf,
}

impl FieldKitDirs {
    /// Resolve directories from the environment, then platform defaults
    #[must_use]
    pub fn new() -> Self {
        Self {
            config_dir: Self::resolve_config_dir(),
        }
    }

    /// Use an explicit config directory
    #[must_use]
    pub fn with_config_dir(config_dir: impl Into<PathBuf>) -> Self {
        Self {
            config_dir: config_dir.into(),
        }
    }

    /// Config directory path
    #[must_use]
    pub fn config_dir(&self) -> PathBuf {
        self.config_dir.clone()
    }

    /// Path to `config.toml` in the config directory
    #[must_use]
    pub fn global_config_path(&self) -> PathBuf {
        self.config_dir.join(CONFIG_FILE)
    }

    fn resolve_config_dir() -> PathBuf {
        if let Ok(path) = env::var(ENV_CONFIG_DIR) {
            return PathBuf::from(path);
        }

        dirs::config_dir()
            .map(|p| p.join(APP_NAME))
            .unwrap_or_else(|| {
                dirs::home_dir()
                    .map(|h| h.join(".config").join(APP_NAME))
                    .unwrap_or_else(|| PathBuf::from(".").join(".config").join(APP_NAME))
            })
    }
}

impl Default for FieldKitDirs {
    fn default() -> Self {
        Self::new()
    }
}
