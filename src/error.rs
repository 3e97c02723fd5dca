//! Error types for incubator
//!
//! Domain-specific error types using thiserror. Each phase of a run has its
//! own enum; [`IncubatorError`] aggregates them and carries the full list of
//! failures when several concurrent jobs fail.

use std::path::PathBuf;
use thiserror::Error;

/// Manifest loading and validation errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ManifestError {
    /// Manifest file could not be read
    #[error("Failed to read manifest '{path}': {error}")]
    Read { path: PathBuf, error: String },

    /// Manifest is not valid TOML or has the wrong shape
    #[error("Failed to parse manifest '{path}': {error}")]
    Parse { path: PathBuf, error: String },

    /// A required table is absent
    #[error("Manifest '{path}' has no [{section}] section")]
    MissingSection { path: PathBuf, section: String },

    /// A required field is absent
    #[error("Manifest '{path}' is missing required field '{field}'")]
    MissingField { path: PathBuf, field: String },

    /// Version is not a valid semantic version
    #[error("Invalid version '{version}' in '{path}': {error}")]
    InvalidVersion {
        path: PathBuf,
        version: String,
        error: String,
    },

    /// Dependency entry is malformed
    #[error("Invalid dependency in '{package}': {error}")]
    InvalidDependency { package: String, error: String },

    /// Source entry is malformed
    #[error("Invalid source '{file}' in '{package}': {error}")]
    InvalidSource {
        package: String,
        file: String,
        error: String,
    },

    /// Build step is malformed
    #[error("Invalid build step {step} in '{package}': {error}")]
    InvalidStep {
        package: String,
        step: usize,
        error: String,
    },

    /// Digest is not `algorithm:hex` with a known algorithm
    #[error("Invalid digest '{digest}': {error}")]
    InvalidDigest { digest: String, error: String },

    /// Origin URL uses a scheme no downloader handles
    #[error("Unsupported download URL '{url}'")]
    UnsupportedOrigin { url: String },

    /// Package request string could not be parsed
    #[error("Invalid package request '{request}': {error}")]
    InvalidRequest { request: String, error: String },
}

/// Dependency resolution errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum ResolveError {
    /// No manifest satisfies the request
    #[error("Package not found: {request}")]
    NotFound { request: String },

    /// A package was marked complete more than once
    #[error("Package '{package}' was already completed")]
    AlreadyCompleted { package: String },

    /// A package was marked complete before its dependencies
    #[error("Package '{package}' cannot complete before its dependencies")]
    NotReady { package: String },

    /// Circular dependency detected
    #[error("Circular dependency detected: {}", cycle.join(" -> "))]
    CircularDependency { cycle: Vec<String> },
}

/// Download errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum DownloadError {
    /// Network error talking to one origin
    #[error("Network error downloading '{url}': {error}")]
    Network { url: String, error: String },

    /// Every origin of a file failed
    #[error("All origins failed for '{file}': {last}")]
    OriginsExhausted { file: String, last: String },

    /// Downloaded content does not match the declared digest
    #[error("File corrupted: {file}")]
    Corrupted { file: String },

    /// IO error
    #[error("IO error for '{path}': {error}")]
    Io { path: PathBuf, error: String },

    /// Source control checkout failed
    #[error("Failed to sync '{file}' from '{repo}': {error}")]
    Scm {
        file: String,
        repo: String,
        error: String,
    },
}

/// Build errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum BuildError {
    /// A step command exited unsuccessfully
    #[error("Step {step} of '{package}' failed ({}): {command}", describe_exit(*code, *signal))]
    StepFailed {
        package: String,
        step: usize,
        command: String,
        code: Option<i32>,
        signal: Option<i32>,
    },

    /// A step command could not be started
    #[error("Step {step} of '{package}' could not run '{command}': {error}")]
    Spawn {
        package: String,
        step: usize,
        command: String,
        error: String,
    },

    /// Script interpreter is not on PATH
    #[error("Interpreter '{interpreter}' for '{package}' not found")]
    InterpreterNotFound { package: String, interpreter: String },

    /// IO error preparing or finalizing a build
    #[error("IO error for '{path}': {error}")]
    Io { path: PathBuf, error: String },
}

/// Render a process exit as `exit code N` or `killed by signal N`
pub fn describe_exit(code: Option<i32>, signal: Option<i32>) -> String {
    match (code, signal) {
        (Some(code), _) => format!("exit code {code}"),
        (None, Some(signal)) => format!("killed by signal {signal}"),
        (None, None) => "terminated".to_string(),
    }
}

/// Top-level incubator error type
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum IncubatorError {
    /// Manifest error
    #[error("Manifest error: {0}")]
    Manifest(#[from] ManifestError),

    /// Resolver error
    #[error("Resolver error: {0}")]
    Resolve(#[from] ResolveError),

    /// Download error
    #[error("Download error: {0}")]
    Download(#[from] DownloadError),

    /// Build error
    #[error("Build error: {0}")]
    Build(#[from] BuildError),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(String),

    /// Several concurrent jobs failed
    #[error("Multiple errors:{}", errors.iter().map(|e| format!("\n  - {e}")).collect::<String>())]
    Multiple { errors: Vec<IncubatorError> },
}

impl IncubatorError {
    /// Fold a list of failures into one result
    ///
    /// No errors is success, a single error is returned as-is, and anything
    /// more becomes [`IncubatorError::Multiple`].
    pub fn aggregate(mut errors: Vec<IncubatorError>) -> Result<(), IncubatorError> {
        match errors.len() {
            0 => Ok(()),
            1 => Err(errors.remove(0)),
            _ => Err(Self::Multiple { errors }),
        }
    }

    /// Every individual failure carried by this error
    pub fn flatten(&self) -> Vec<&IncubatorError> {
        match self {
            Self::Multiple { errors } => errors.iter().flat_map(Self::flatten).collect(),
            other => vec![other],
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_aggregate_empty_is_ok() {
        assert!(IncubatorError::aggregate(Vec::new()).is_ok());
    }

    #[test]
    fn test_aggregate_single_is_unwrapped() {
        let err = IncubatorError::aggregate(vec![ResolveError::NotFound {
            request: "zlib".to_string(),
        }
        .into()])
        .unwrap_err();
        assert!(matches!(err, IncubatorError::Resolve(_)));
    }

    #[test]
    fn test_aggregate_many_lists_all() {
        let err = IncubatorError::aggregate(vec![
            DownloadError::Corrupted {
                file: "a.tar.gz".to_string(),
            }
            .into(),
            DownloadError::Corrupted {
                file: "b.tar.gz".to_string(),
            }
            .into(),
        ])
        .unwrap_err();

        assert_eq!(err.flatten().len(), 2);
        let message = err.to_string();
        assert!(message.contains("a.tar.gz"));
        assert!(message.contains("b.tar.gz"));
    }

    #[test]
    fn test_step_failed_message() {
        let err = BuildError::StepFailed {
            package: "zlib-1.3.1".to_string(),
            step: 2,
            command: "make".to_string(),
            code: Some(2),
            signal: None,
        };
        assert_eq!(
            err.to_string(),
            "Step 2 of 'zlib-1.3.1' failed (exit code 2): make"
        );
    }

    #[test]
    fn test_describe_exit_signal() {
        assert_eq!(describe_exit(None, Some(9)), "killed by signal 9");
    }
}
