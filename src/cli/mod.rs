//! Command-line interface module
//!
//! This module handles argument parsing and output formatting.
//! It contains no business logic - that belongs in the [`crate::core`] module.

pub mod commands;
pub mod output;

use anyhow::{Context, Result};
use clap::{Args, Parser};
use std::path::PathBuf;

use crate::config::defaults::PATH_LIST_SEPARATOR;
use crate::core::builder::BuilderConfig;
use crate::core::global_config::GlobalConfig;
use crate::infra::dirs::IncubatorDirs;
use crate::infra::filesystem;
use commands::Commands;
use output::OutputMode;

/// Incubator - build packages from versioned manifests
///
/// Resolves dependencies, fetches verified sources and builds packages in
/// dependency order on parallel workers.
#[derive(Parser, Debug)]
#[command(name = "incubate")]
#[command(author, version, about, long_about = None)]
#[command(propagate_version = true)]
pub struct Cli {
    /// Enable verbose output (-v for info, -vv for debug)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    #[command(flatten)]
    pub options: GlobalOptions,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

/// Options shared by every command
#[derive(Args, Debug, Clone, Default)]
pub struct GlobalOptions {
    /// Directory containing package manifests (repeatable)
    #[arg(
        short = 'p',
        long = "package-path",
        env = "INCUBATE_PACKAGE_PATH",
        value_delimiter = PATH_LIST_SEPARATOR,
        global = true
    )]
    pub package_paths: Vec<PathBuf>,

    /// Build directory [default: _build]
    #[arg(long, env = "INCUBATE_BUILD_DIR", global = true)]
    pub build_dir: Option<PathBuf>,

    /// Source cache directory [default: <build-dir>/cache]
    #[arg(long = "package-cache", env = "INCUBATE_CACHE_DIR", global = true)]
    pub cache_dir: Option<PathBuf>,

    /// Release directory [default: <build-dir>/rel]
    #[arg(long, env = "INCUBATE_RELEASE_DIR", global = true)]
    pub release_dir: Option<PathBuf>,

    /// Number of parallel workers [default: number of CPUs]
    #[arg(short = 'n', long, env = "INCUBATE_PARALLEL", global = true)]
    pub parallel: Option<usize>,

    /// Upper bound on parallel workers
    #[arg(long, env = "INCUBATE_PARALLEL_MAX", global = true)]
    pub parallel_max: Option<usize>,

    /// Rebuild packages even when up to date
    #[arg(short, long, global = true)]
    pub clean: bool,

    /// Delete build directories of successfully built packages
    #[arg(long, global = true)]
    pub save_space: bool,

    /// Plain log lines even on a terminal
    #[arg(short, long, global = true)]
    pub script: bool,

    /// Output JSON lines for scripting
    #[arg(long, global = true, conflicts_with = "script")]
    pub json: bool,

    /// Write a log file, replacing its content
    #[arg(short, long, global = true, value_name = "FILE")]
    pub log: Option<PathBuf>,

    /// Append to a log file
    #[arg(long, global = true, value_name = "FILE", conflicts_with = "log")]
    pub log_append: Option<PathBuf>,

    /// Global configuration file [default: <config-dir>/config.toml]
    #[arg(long, env = "INCUBATE_CONFIG", global = true, value_name = "FILE")]
    pub config: Option<PathBuf>,
}

impl GlobalOptions {
    /// Merge command line values over the configuration file
    pub fn builder_config(&self) -> Result<BuilderConfig> {
        let global = match &self.config {
            Some(path) => GlobalConfig::load_from_path(path),
            None => GlobalConfig::load(&IncubatorDirs::new()),
        }
        .context("Failed to load global configuration")?;

        let mut config = global.builder_config();
        if !self.package_paths.is_empty() {
            config.package_paths.clone_from(&self.package_paths);
        }
        if let Some(dir) = &self.build_dir {
            config.build_dir.clone_from(dir);
        }
        if self.cache_dir.is_some() {
            config.cache_dir.clone_from(&self.cache_dir);
        }
        if self.release_dir.is_some() {
            config.release_dir.clone_from(&self.release_dir);
        }
        config.parallel = self.parallel.or(config.parallel);
        config.parallel_max = self.parallel_max.or(config.parallel_max);
        config.clean = self.clean;
        config.save_space |= self.save_space;

        // steps run in other directories, so every path must be absolute
        config.package_paths = config
            .package_paths
            .iter()
            .map(|path| filesystem::absolute(path))
            .collect::<Result<_, _>>()?;
        config.build_dir = filesystem::absolute(&config.build_dir)?;
        config.cache_dir = config
            .cache_dir
            .as_deref()
            .map(filesystem::absolute)
            .transpose()?;
        config.release_dir = config
            .release_dir
            .as_deref()
            .map(filesystem::absolute)
            .transpose()?;

        Ok(config)
    }

    pub fn output_mode(&self) -> OutputMode {
        OutputMode::select(self.json, self.script)
    }

    /// Log file and whether to append to it
    pub fn log_file(&self) -> Option<(&std::path::Path, bool)> {
        match (&self.log, &self.log_append) {
            (Some(path), _) => Some((path.as_path(), false)),
            (None, Some(path)) => Some((path.as_path(), true)),
            (None, None) => None,
        }
    }
}

impl Cli {
    /// Execute the CLI command
    pub async fn run(self) -> Result<()> {
        if let Some(cmd) = self.command {
            cmd.run(&self.options).await
        } else {
            // No subcommand provided, show help
            use clap::CommandFactory;
            let mut cmd = Self::command();
            cmd.print_help()?;
            Ok(())
        }
    }
}
