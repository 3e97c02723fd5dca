//! Global configuration management
//!
//! Reads default build settings from `config.toml` in the config directory.
//! Values given on the command line or through the environment take
//! precedence over the file, which takes precedence over built-in defaults.

use crate::core::builder::BuilderConfig;
use crate::infra::dirs::IncubatorDirs;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
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

/// Global configuration for incubator
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct GlobalConfig {
    /// Default build options
    #[serde(default)]
    pub build: BuildConfig,

    /// Output preferences
    #[serde(default)]
    pub output: OutputConfig,
}

/// Default build options
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct BuildConfig {
    /// Manifest search paths
    #[serde(default)]
    pub package_paths: Vec<PathBuf>,

    pub build_dir: Option<PathBuf>,

    pub cache_dir: Option<PathBuf>,

    pub release_dir: Option<PathBuf>,

    /// Default number of workers
    pub parallel: Option<usize>,

    /// Upper bound on the number of workers
    pub parallel_max: Option<usize>,

    /// Delete build directories after successful builds
    pub save_space: Option<bool>,
}

/// Output preferences
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct OutputConfig {
    /// Plain log lines even on a terminal
    pub script: Option<bool>,

    /// JSON lines output
    pub json: Option<bool>,
}

impl GlobalConfig {
    /// Load global configuration from the config directory
    ///
    /// A missing file yields the default configuration.
    ///
    /// # Errors
    ///
    /// Returns `GlobalConfigError::ParseError` if the config file exists but
    /// contains invalid TOML.
    pub fn load(dirs: &IncubatorDirs) -> Result<Self, GlobalConfigError> {
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

    /// Builder configuration seeded with this file's values
    ///
    /// Callers overlay command line values on the result.
    #[must_use]
    pub fn builder_config(&self) -> BuilderConfig {
        let defaults = BuilderConfig::default();
        BuilderConfig {
            package_paths: self.build.package_paths.clone(),
            build_dir: self.build.build_dir.clone().unwrap_or(defaults.build_dir),
            cache_dir: self.build.cache_dir.clone(),
            release_dir: self.build.release_dir.clone(),
            parallel: self.build.parallel,
            parallel_max: self.build.parallel_max,
            clean: false,
            save_space: self.build.save_space.unwrap_or(false),
        }
    }
}
