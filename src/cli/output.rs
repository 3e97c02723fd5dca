//! Output formatting and progress indicators
//!
//! Turns the builder's notification stream into plain log lines, JSON
//! lines or per-worker spinners, and optionally copies the plain lines
//! into a log file.

use indicatif::{MultiProgress, ProgressBar, ProgressStyle};
use std::collections::HashMap;
use std::fs::{File, OpenOptions};
use std::io::{self, IsTerminal, Write};
use std::path::Path;
use std::time::{Duration, Instant};
use tokio::sync::mpsc::UnboundedReceiver;

use crate::core::builder::{Notification, RunSummary};
use crate::core::cache::SourceEvent;
use crate::core::catalog::PackageEvent;
use crate::core::engine::BuildEvent;
use crate::error::describe_exit;

/// How notifications are presented on the terminal
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputMode {
    /// One line per notification
    Plain,
    /// One JSON object per notification
    Json,
    /// Spinners per worker
    Interactive,
}

impl OutputMode {
    /// Pick a mode from the command line flags
    ///
    /// Spinners are only used when stdout is a terminal.
    pub fn select(json: bool, script: bool) -> Self {
        if json {
            Self::Json
        } else if script || !io::stdout().is_terminal() {
            Self::Plain
        } else {
            Self::Interactive
        }
    }
}

/// Create a spinner for one worker slot
pub fn create_spinner(message: &str) -> ProgressBar {
    let pb = ProgressBar::new_spinner();
    pb.set_style(
        ProgressStyle::default_spinner()
            .tick_chars("⠋⠙⠹⠸⠼⠴⠦⠧⠇⠏")
            .template("{spinner:.blue} {prefix:>4} {msg}")
            .unwrap_or_else(|_| ProgressStyle::default_spinner()),
    );
    pb.set_message(message.to_string());
    pb.enable_steady_tick(Duration::from_millis(80));
    pb
}

/// Status message prefixes
pub mod status {
    /// Success prefix (green checkmark)
    pub const SUCCESS: &str = "✓";

    /// Error prefix (red X)
    pub const ERROR: &str = "✗";
}

/// Plain text rendering of a notification
///
/// Returns `None` for notifications too noisy for a log, such as
/// intermediate download progress.
pub fn describe(notification: &Notification) -> Option<String> {
    match notification {
        Notification::Package { event } => Some(match event {
            PackageEvent::Examine { request } => format!("PACKAGE EXAMINE: {request}"),
            PackageEvent::Loading { request, manifest } => {
                format!("PACKAGE LOADING: {request} {}", manifest.display())
            }
            PackageEvent::Loaded { package } => format!("PACKAGE LOADED: {package}"),
        }),
        Notification::Source {
            worker,
            package,
            file,
            event,
        } => {
            let head = |name: &str| format!("SOURCE {name} <{worker}>: {package} {file}");
            Some(match event {
                SourceEvent::Start => head("START"),
                SourceEvent::Validating => head("VALIDATING"),
                SourceEvent::Validated { valid } => format!("{} {valid}", head("VALIDATED")),
                SourceEvent::Download { url } => format!("{} ({url})", head("DOWNLOAD")),
                SourceEvent::Progress { downloaded, total } => {
                    let finished = total.is_some_and(|total| *downloaded >= total);
                    if *downloaded != 0 && !finished {
                        return None;
                    }
                    match total {
                        Some(total) => format!("{} {downloaded}/{total}", head("PROGRESS")),
                        None => format!("{} {downloaded}", head("PROGRESS")),
                    }
                }
                SourceEvent::Failure { url, error } => {
                    format!("{} ERROR: {error} ({url})", head("FAILURE"))
                }
                SourceEvent::Complete { error } => with_error(head("COMPLETE"), error.as_deref()),
                SourceEvent::Done { error } => with_error(head("DONE"), error.as_deref()),
            })
        }
        Notification::Build {
            worker,
            package,
            event,
        } => {
            let head = |name: &str| format!("BUILD {name} <{worker}>: {package}");
            Some(match event {
                BuildEvent::Start => head("START"),
                BuildEvent::UpToDate => head("UP-TO-DATE"),
                BuildEvent::Prepare => head("PREPARE"),
                BuildEvent::Step { step, total, name } => match name {
                    Some(name) => format!("{} {step}/{total} {name}", head("STEP")),
                    None => format!("{} {step}/{total}", head("STEP")),
                },
                BuildEvent::Command { step, command } => {
                    format!("{} {step} COMMAND: {command}", head("STEP-EVENT"))
                }
                BuildEvent::Error { step, error, .. } => {
                    format!("{} {step} ERROR: {error}", head("STEP-EVENT"))
                }
                BuildEvent::Exit {
                    step, code, signal, ..
                } => format!(
                    "{} {step} EXIT: {}",
                    head("STEP-EVENT"),
                    describe_exit(*code, *signal)
                ),
                BuildEvent::Finishing => head("FINISHING"),
                BuildEvent::Succeeded => head("SUCCEEDED"),
                BuildEvent::Failed { error } => format!("{} {error}", head("FAILED")),
                BuildEvent::Done { error } => with_error(head("DONE"), error.as_deref()),
            })
        }
    }
}

fn with_error(text: String, error: Option<&str>) -> String {
    match error {
        Some(error) => format!("{text} ERROR: {error}"),
        None => text,
    }
}

/// Short spinner text for a notification, keyed by its worker
fn spinner_text(notification: &Notification) -> Option<(String, String)> {
    match notification {
        Notification::Package { .. } => None,
        Notification::Source {
            worker,
            package,
            file,
            event,
        } => {
            let action = match event {
                SourceEvent::Start | SourceEvent::Validating | SourceEvent::Validated { .. } => {
                    "CHECK".to_string()
                }
                SourceEvent::Download { .. } | SourceEvent::Failure { .. } => "FETCH".to_string(),
                SourceEvent::Progress { downloaded, total } => match total {
                    Some(total) if *total > 0 => {
                        format!("FETCH {}%", downloaded.saturating_mul(100) / total)
                    }
                    _ => format!("FETCH {downloaded}B"),
                },
                SourceEvent::Complete { .. } | SourceEvent::Done { .. } => return None,
            };
            Some((format!("src{worker}"), format!("{action:<10} {package} {file}")))
        }
        Notification::Build {
            worker,
            package,
            event,
        } => {
            let action = match event {
                BuildEvent::Prepare => "PREPARE".to_string(),
                BuildEvent::Step { step, total, .. } => format!("BUILD {step}/{total}"),
                BuildEvent::Command { command, .. } => format!("BUILD {command}"),
                BuildEvent::Finishing => "FINISH".to_string(),
                BuildEvent::Start => "START".to_string(),
                _ => return None,
            };
            Some((format!("bld{worker}"), format!("{package} {action}")))
        }
    }
}

/// Receives notifications and presents them
#[derive(Debug)]
pub struct Reporter {
    mode: OutputMode,
    log: Option<File>,
    started: Instant,
    progress: MultiProgress,
    spinners: HashMap<String, ProgressBar>,
}

impl Reporter {
    /// Reporter writing plain lines to `log` when given
    ///
    /// `append` keeps the existing content of the log file.
    pub fn new(mode: OutputMode, log: Option<(&Path, bool)>) -> io::Result<Self> {
        let log = match log {
            Some((path, append)) => Some(
                OpenOptions::new()
                    .create(true)
                    .write(true)
                    .append(append)
                    .truncate(!append)
                    .open(path)?,
            ),
            None => None,
        };

        Ok(Self {
            mode,
            log,
            started: Instant::now(),
            progress: MultiProgress::new(),
            spinners: HashMap::new(),
        })
    }

    fn line(&mut self, text: &str) {
        let stamped = self.write_log(text);
        match self.mode {
            OutputMode::Plain => println!("{stamped}"),
            OutputMode::Interactive => {
                // keeps spinners below the printed line
                let _ = self.progress.println(text);
            }
            OutputMode::Json => {}
        }
    }

    fn json(value: &impl serde::Serialize) {
        match serde_json::to_string(value) {
            Ok(text) => println!("{text}"),
            Err(e) => tracing::warn!("Could not serialize notification: {e}"),
        }
    }

    pub fn start(&mut self) {
        if self.mode == OutputMode::Json {
            Self::json(&serde_json::json!({ "src": "incubation", "event": "start" }));
        }
        self.line("INCUBATION START");
    }

    /// Present one notification
    pub fn notify(&mut self, notification: &Notification) {
        if self.mode == OutputMode::Json {
            Self::json(notification);
        }

        if self.mode == OutputMode::Interactive {
            self.update_spinners(notification);
            let important = matches!(
                notification,
                Notification::Source {
                    event: SourceEvent::Failure { .. } | SourceEvent::Complete { error: Some(_) },
                    ..
                } | Notification::Build {
                    event: BuildEvent::Failed { .. } | BuildEvent::Succeeded | BuildEvent::UpToDate,
                    ..
                }
            );
            if !important {
                if let Some(text) = describe(notification) {
                    self.write_log(&text);
                }
                return;
            }
        }

        if let Some(text) = describe(notification) {
            self.line(&text);
        }
    }

    /// Copy a line into the log file, returning it with its timestamp
    fn write_log(&mut self, text: &str) -> String {
        let stamped = format!("{:>9.3}s {text}", self.started.elapsed().as_secs_f64());
        if let Some(log) = &mut self.log {
            if let Err(e) = writeln!(log, "{stamped}") {
                tracing::warn!("Could not write log file: {e}");
            }
        }
        stamped
    }

    fn update_spinners(&mut self, notification: &Notification) {
        let finished = match notification {
            Notification::Source { worker, event: SourceEvent::Done { .. }, .. } => {
                Some(format!("src{worker}"))
            }
            Notification::Build { worker, event: BuildEvent::Done { .. }, .. } => {
                Some(format!("bld{worker}"))
            }
            _ => None,
        };
        if let Some(key) = finished {
            if let Some(spinner) = self.spinners.remove(&key) {
                spinner.finish_and_clear();
            }
            return;
        }

        if let Some((key, text)) = spinner_text(notification) {
            let progress = &self.progress;
            let spinner = self.spinners.entry(key.clone()).or_insert_with(|| {
                let spinner = progress.add(create_spinner(""));
                spinner.set_prefix(key);
                spinner
            });
            spinner.set_message(text);
        }
    }

    /// Present notifications until every sender is gone
    pub async fn run(mut self, mut rx: UnboundedReceiver<Notification>) -> Self {
        while let Some(notification) = rx.recv().await {
            self.notify(&notification);
        }
        self
    }

    /// Report how the incubation ended
    pub fn finish(mut self, result: Result<&RunSummary, &anyhow::Error>) {
        for spinner in self.spinners.values() {
            spinner.finish_and_clear();
        }

        if self.mode == OutputMode::Json {
            let value = match result {
                Ok(summary) => serde_json::json!({
                    "src": "incubation",
                    "event": "completed",
                    "built": summary.built,
                    "up_to_date": summary.up_to_date,
                }),
                Err(e) => serde_json::json!({
                    "src": "incubation",
                    "event": "completed",
                    "error": e.to_string(),
                }),
            };
            Self::json(&value);
        }

        match result {
            Ok(summary) => {
                self.line("INCUBATION COMPLETED: SUCCESS");
                if self.mode == OutputMode::Interactive {
                    println!(
                        "{} {} built, {} up to date",
                        status::SUCCESS,
                        summary.built.len(),
                        summary.up_to_date.len()
                    );
                }
            }
            Err(e) => self.line(&format!("INCUBATION COMPLETED: FAILURE {e}")),
        }
    }
}

/// Print an error for the user
pub fn display_error(error: &anyhow::Error) {
    eprintln!("{} Error: {error}", status::ERROR);
    for cause in error.chain().skip(1) {
        eprintln!("  caused by: {cause}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::path::PathBuf;
    use tempfile::TempDir;

    fn source(event: SourceEvent) -> Notification {
        Notification::Source {
            worker: 1,
            package: "zlib-1.3.1".to_string(),
            file: "zlib-1.3.1.tar.gz".to_string(),
            event,
        }
    }

    fn build(event: BuildEvent) -> Notification {
        Notification::Build {
            worker: 0,
            package: "zlib-1.3.1".to_string(),
            event,
        }
    }

    // ============================================
    // Unit Tests - Plain lines
    // ============================================

    #[test]
    fn test_describe_package_events() {
        let examine = Notification::Package {
            event: PackageEvent::Examine {
                request: "zlib".to_string(),
            },
        };
        assert_eq!(describe(&examine).unwrap(), "PACKAGE EXAMINE: zlib");

        let loading = Notification::Package {
            event: PackageEvent::Loading {
                request: "zlib".to_string(),
                manifest: PathBuf::from("/pkgs/zlib/1.3.1.toml"),
            },
        };
        assert_eq!(
            describe(&loading).unwrap(),
            "PACKAGE LOADING: zlib /pkgs/zlib/1.3.1.toml"
        );
    }

    #[test]
    fn test_describe_source_events() {
        assert_eq!(
            describe(&source(SourceEvent::Validated { valid: false })).unwrap(),
            "SOURCE VALIDATED <1>: zlib-1.3.1 zlib-1.3.1.tar.gz false"
        );
        assert_eq!(
            describe(&source(SourceEvent::Failure {
                url: "http://a/z".to_string(),
                error: "HTTP 404".to_string(),
            }))
            .unwrap(),
            "SOURCE FAILURE <1>: zlib-1.3.1 zlib-1.3.1.tar.gz ERROR: HTTP 404 (http://a/z)"
        );
    }

    #[test]
    fn test_intermediate_progress_is_skipped() {
        let progress = |downloaded| {
            describe(&source(SourceEvent::Progress {
                downloaded,
                total: Some(100),
            }))
        };
        assert!(progress(0).is_some());
        assert!(progress(50).is_none());
        assert!(progress(100).is_some());
    }

    #[test]
    fn test_describe_build_events() {
        assert_eq!(
            describe(&build(BuildEvent::Step {
                step: 1,
                total: 3,
                name: None,
            }))
            .unwrap(),
            "BUILD STEP <0>: zlib-1.3.1 1/3"
        );
        assert_eq!(
            describe(&build(BuildEvent::Exit {
                step: 2,
                command: "make".to_string(),
                code: Some(2),
                signal: None,
            }))
            .unwrap(),
            "BUILD STEP-EVENT <0>: zlib-1.3.1 2 EXIT: exit code 2"
        );
    }

    // ============================================
    // Unit Tests - Log files
    // ============================================

    #[test]
    fn test_log_file_receives_lines() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("incubate.log");

        let mut reporter = Reporter::new(OutputMode::Json, Some((&path, false))).unwrap();
        reporter.start();
        reporter.notify(&build(BuildEvent::Prepare));
        reporter.finish(Ok(&RunSummary::default()));

        let content = std::fs::read_to_string(&path).unwrap();
        let lines: Vec<&str> = content.lines().collect();
        assert_eq!(lines.len(), 3);
        assert!(lines[0].ends_with("INCUBATION START"));
        assert!(lines[1].ends_with("BUILD PREPARE <0>: zlib-1.3.1"));
        assert!(lines[2].ends_with("INCUBATION COMPLETED: SUCCESS"));
    }

    #[test]
    fn test_log_append_keeps_content() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("incubate.log");
        std::fs::write(&path, "earlier\n").unwrap();

        let mut reporter = Reporter::new(OutputMode::Json, Some((&path, true))).unwrap();
        reporter.start();
        drop(reporter);

        let content = std::fs::read_to_string(&path).unwrap();
        assert!(content.starts_with("earlier\n"));
        assert!(content.trim_end().ends_with("INCUBATION START"));
    }

    #[test]
    fn test_log_overwrite_truncates() {
        let temp = TempDir::new().unwrap();
        let path = temp.path().join("incubate.log");
        std::fs::write(&path, "earlier\n").unwrap();

        let mut reporter = Reporter::new(OutputMode::Json, Some((&path, false))).unwrap();
        reporter.start();
        drop(reporter);

        assert!(!std::fs::read_to_string(&path).unwrap().contains("earlier"));
    }
}
