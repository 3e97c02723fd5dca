//! Platform-specific directory management
//!
//! Locates the user configuration directory following the XDG Base
//! Directory Specification on Linux and standard locations on macOS.
//!
//! `INCUBATOR_CONFIG_DIR` overrides the default location.

use std::env;
use std::path::PathBuf;

/// Environment variable overriding the config directory
pub const ENV_CONFIG_DIR: &str = "INCUBATOR_CONFIG_DIR";

/// Application name used in directory paths
const APP_NAME: &str = "incubator";

/// Name of the global configuration file
const CONFIG_FILE: &str = "config.toml";

/// Platform-specific directory provider
#[derive(Debug, Clone)]
pub struct IncubatorDirs {
    config_dir: PathBuf,
}

impl IncubatorDirs {
    /// Checks the environment first, then falls back to platform defaults
    #[must_use]
    pub fn new() -> Self {
        Self {
            config_dir: Self::resolve_config_dir(),
        }
    }

    /// Get the config directory path
    ///
    /// - Linux: `$XDG_CONFIG_HOME/incubator` or `~/.config/incubator`
    /// - macOS: `~/Library/Application Support/incubator`
    #[must_use]
    pub fn config_dir(&self) -> PathBuf {
        self.config_dir.clone()
    }

    /// Path of `config.toml` in the config directory
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
                // Fallback to home directory
                dirs::home_dir()
                    .map(|h| h.join(".config").join(APP_NAME))
                    .unwrap_or_else(|| PathBuf::from(".").join(".config").join(APP_NAME))
            })
    }
}

impl Default for IncubatorDirs {
    fn default() -> Self {
        Self::new()
    }
}
