//! Common test utilities and helpers
//!
//! This module provides shared utilities for integration tests.

#![allow(dead_code)]

use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use std::time::{Duration, SystemTime};
use tempfile::TempDir;

/// Test project context
///
/// A temporary directory holding a package tree under `pkgs/` and a build
/// directory under `_build/`.
pub struct TestProject {
    /// Temporary directory for the test project
    pub dir: TempDir,
}

impl TestProject {
    /// Create a new test project in a temporary directory
    pub fn new() -> Self {
        Self {
            dir: TempDir::new().expect("Failed to create temp directory"),
        }
    }

    /// Get the path to the test project directory
    pub fn path(&self) -> PathBuf {
        self.dir.path().to_path_buf()
    }

    /// Directory manifests are written to
    pub fn packages(&self) -> PathBuf {
        self.dir.path().join("pkgs")
    }

    pub fn build_dir(&self) -> PathBuf {
        self.dir.path().join("_build")
    }

    /// Create a file in the test project
    pub fn create_file(&self, name: &str, content: &str) {
        let path = self.dir.path().join(name);
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).expect("Failed to create parent directories");
        }
        std::fs::write(path, content).expect("Failed to write file");
    }

    /// Write `pkgs/<name>/<version>.toml` with a `[package]` header and `body`
    ///
    /// `deps` is the TOML content of the dependency array, such as
    /// `"b", { a = "~1.0" }`. The manifest is backdated so markers written by
    /// a build are newer.
    pub fn write_manifest(&self, name: &str, version: &str, deps: &str, body: &str) {
        let rel = format!("pkgs/{name}/{version}.toml");
        self.create_file(
            &rel,
            &format!(
                "[package]\nname = \"{name}\"\nversion = \"{version}\"\ndependencies = [{deps}]\n{body}"
            ),
        );
        set_mtime(&self.dir.path().join(rel), -60);
    }

    /// Check if a file exists in the test project
    pub fn file_exists(&self, name: &str) -> bool {
        self.dir.path().join(name).exists()
    }

    /// Read a file from the test project
    pub fn read_file(&self, name: &str) -> String {
        std::fs::read_to_string(self.dir.path().join(name)).expect("Failed to read file")
    }

    /// Run the `incubate` binary in the project directory
    ///
    /// The package path points at `pkgs/` and the user config dir at an
    /// empty directory inside the project.
    pub fn incubate(&self, args: &[&str]) -> Output {
        Command::new(env!("CARGO_BIN_EXE_incubate"))
            .current_dir(self.path())
            .env("INCUBATE_PACKAGE_PATH", self.packages())
            .env("INCUBATOR_CONFIG_DIR", self.dir.path().join("config"))
            .env_remove("INCUBATE_BUILD_DIR")
            .env_remove("INCUBATE_CACHE_DIR")
            .env_remove("INCUBATE_RELEASE_DIR")
            .env_remove("RUST_LOG")
            .args(args)
            .output()
            .expect("Failed to execute incubate")
    }
}

impl Default for TestProject {
    fn default() -> Self {
        Self::new()
    }
}

/// Shift a file's modification time by `offset_secs` from now
pub fn set_mtime(path: &Path, offset_secs: i64) {
    let now = SystemTime::now();
    let delta = Duration::from_secs(offset_secs.unsigned_abs());
    let time = if offset_secs < 0 { now - delta } else { now + delta };
    std::fs::File::options()
        .write(true)
        .open(path)
        .expect("Failed to open file")
        .set_modified(time)
        .expect("Failed to set modification time");
}

/// Stdout of a finished command as text
pub fn stdout(output: &Output) -> String {
    String::from_utf8_lossy(&output.stdout).to_string()
}

/// Stderr of a finished command as text
pub fn stderr(output: &Output) -> String {
    String::from_utf8_lossy(&output.stderr).to_string()
}
