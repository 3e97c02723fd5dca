//! Incubator - multi-package build orchestrator
//!
//! Resolves a dependency graph from versioned package manifests, fetches
//! every declared source through a verified multi-origin cache and builds
//! the packages in dependency order on a bounded pool of workers, skipping
//! packages that are already up to date.
//!
//! # Architecture
//!
//! The crate is organized into several modules:
//!
//! - [`cli`] - Command-line interface parsing and output formatting
//! - [`core`] - Resolver, worker pool, file cache, build engine and builder
//! - [`infra`] - Infrastructure layer (network, git, filesystem, processes)
//! - [`config`] - Configuration constants
//! - [`error`] - Error types and handling

pub mod cli;
pub mod config;
pub mod core;
pub mod error;
pub mod infra;

#[cfg(test)]
pub mod test_utils;
