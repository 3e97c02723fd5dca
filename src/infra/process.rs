//! External process execution
//!
//! Runs one build command with an explicit environment and working
//! directory, appending its output to per-step log files.

use std::collections::BTreeMap;
use std::fs::OpenOptions;
use std::path::{Path, PathBuf};
use std::process::Stdio;

/// How a process ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ExitReport {
    pub code: Option<i32>,
    pub signal: Option<i32>,
}

impl ExitReport {
    pub fn success(&self) -> bool {
        self.code == Some(0)
    }
}

impl From<std::process::ExitStatus> for ExitReport {
    fn from(status: std::process::ExitStatus) -> Self {
        #[cfg(unix)]
        let signal = {
            use std::os::unix::process::ExitStatusExt;
            status.signal()
        };
        #[cfg(not(unix))]
        let signal = None;

        Self {
            code: status.code(),
            signal,
        }
    }
}

/// A command to run
#[derive(Debug, Clone)]
pub struct Invocation<'a> {
    pub program: PathBuf,
    pub args: Vec<String>,
    pub workdir: &'a Path,
    /// Complete environment; nothing is inherited
    pub env: &'a BTreeMap<String, String>,
    pub stdout: &'a Path,
    pub stderr: &'a Path,
}

fn append(path: &Path) -> std::io::Result<std::fs::File> {
    OpenOptions::new().create(true).append(true).open(path)
}

/// Run the invocation to completion
///
/// Errors only when the process cannot be started; a non-zero exit is
/// reported in the [`ExitReport`].
pub async fn run(invocation: &Invocation<'_>) -> std::io::Result<ExitReport> {
    let stdout = append(invocation.stdout)?;
    let stderr = append(invocation.stderr)?;

    let status = tokio::process::Command::new(&invocation.program)
        .args(&invocation.args)
        .current_dir(invocation.workdir)
        .env_clear()
        .envs(invocation.env)
        .stdin(Stdio::null())
        .stdout(Stdio::from(stdout))
        .stderr(Stdio::from(stderr))
        .kill_on_drop(true)
        .status()
        .await?;

    Ok(status.into())
}
