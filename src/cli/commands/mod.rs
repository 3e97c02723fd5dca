//! CLI command implementations
//!
//! Each command is implemented in its own submodule.

pub mod build;
pub mod versions;

use anyhow::Result;
use clap::Subcommand;

use super::GlobalOptions;

/// Available CLI commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Load, fetch and build packages with their dependencies
    Build {
        /// Packages to build (`name` or `name-x.y.z`)
        #[arg(required = true)]
        packages: Vec<String>,
    },

    /// Load packages and fetch their sources without building
    Fetch {
        /// Packages to fetch (`name` or `name-x.y.z`)
        #[arg(required = true)]
        packages: Vec<String>,
    },

    /// List available versions of a package, newest first
    Versions {
        /// Package name
        name: String,
    },
}

impl Commands {
    /// Execute the command
    pub async fn run(self, options: &GlobalOptions) -> Result<()> {
        match self {
            Self::Build { packages } => build::execute(options, &packages, false).await,
            Self::Fetch { packages } => build::execute(options, &packages, true).await,
            Self::Versions { name } => versions::execute(options, &name),
        }
    }
}
