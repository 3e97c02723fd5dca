//! Core business logic module
//!
//! # Submodules
//!
//! - [`package`] - Package manifests
//! - [`digest`] - Content digests of source files
//! - [`catalog`] - Manifest lookup and the loaded package set
//! - [`resolver`] - Dependency-ordered scheduling
//! - [`workload`] - Bounded worker pool
//! - [`cache`] - Multi-origin source file cache
//! - [`build_env`] - Build layout and step environment
//! - [`engine`] - Incremental build of one package
//! - [`builder`] - Build orchestration
//! - [`global_config`] - Global configuration management

pub mod build_env;
pub mod builder;
pub mod cache;
pub mod catalog;
pub mod digest;
pub mod engine;
pub mod global_config;
pub mod package;
pub mod resolver;
pub mod workload;
