//! Incremental build engine
//!
//! Builds one package: skip it when its success marker is newer than
//! everything it depends on, otherwise recreate its build and release
//! directories, run its steps in order and record success.
//!
//! Steps run through the shell engine: each command goes to `$SHELL -c`
//! (default `/bin/sh`) and a leading `-` ignores a non-zero exit. Script
//! steps are written to a temporary file and run by their interpreter.

use serde::Serialize;
use std::collections::{HashSet, VecDeque};
use std::path::{Path, PathBuf};
use std::time::{Duration, Instant, SystemTime};

use crate::config::defaults;
use crate::core::build_env::{BuildLayout, StepEnvironment};
use crate::core::catalog::{PackageId, PackageSet};
use crate::core::package::{BuildStep, Package, StepAction};
use crate::core::workload::SlotId;
use crate::error::BuildError;
use crate::infra::filesystem;
use crate::infra::process::{self, Invocation};

/// Longest wait for a success marker to become newer than its inputs
const MARKER_SETTLE: Duration = Duration::from_secs(2);
/// Pause between attempts to restamp a success marker
const MARKER_TICK: Duration = Duration::from_millis(1);

/// Progress of one package build
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "kebab-case")]
pub enum BuildEvent {
    /// The build was bound to a worker
    Start,
    /// Nothing changed since the last successful build
    UpToDate,
    /// Build and release directories are being recreated
    Prepare,
    /// A step begins (1-based)
    Step {
        step: usize,
        total: usize,
        name: Option<String>,
    },
    /// A command of the current step is being started
    Command { step: usize, command: String },
    /// A command could not be started
    Error {
        step: usize,
        command: String,
        error: String,
    },
    /// A command exited
    Exit {
        step: usize,
        command: String,
        code: Option<i32>,
        signal: Option<i32>,
    },
    /// The build is being finalized
    Finishing,
    /// The package built (or was already up to date)
    Succeeded,
    /// The package failed to build
    Failed { error: String },
    /// The build released its worker
    Done { error: Option<String> },
}

/// How a build ended
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BuildOutcome {
    Built,
    UpToDate,
}

/// Flags changing how packages are built
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BuildOptions {
    /// Rebuild even when up to date
    pub clean: bool,
    /// Delete the build directory after a successful build
    pub save_space: bool,
}

/// Builds packages of a loaded set
#[derive(Debug)]
pub struct BuildEngine<'s> {
    set: &'s PackageSet,
    layout: BuildLayout,
    options: BuildOptions,
    shell: PathBuf,
    /// Environment every step starts from
    ambient: Vec<(String, String)>,
}

impl<'s> BuildEngine<'s> {
    /// Engine using the current process environment and `$SHELL`
    pub fn new(set: &'s PackageSet, layout: BuildLayout, options: BuildOptions) -> Self {
        let shell = std::env::var_os("SHELL")
            .filter(|shell| !shell.is_empty())
            .map_or_else(|| PathBuf::from(defaults::DEFAULT_SHELL), PathBuf::from);

        Self {
            set,
            layout,
            options,
            shell,
            ambient: std::env::vars().collect(),
        }
    }

    /// Replace the ambient environment
    #[must_use]
    pub fn with_ambient(mut self, ambient: Vec<(String, String)>) -> Self {
        self.ambient = ambient;
        self
    }

    /// Replace the shell commands run through
    #[must_use]
    pub fn with_shell(mut self, shell: impl Into<PathBuf>) -> Self {
        self.shell = shell.into();
        self
    }

    pub fn layout(&self) -> &BuildLayout {
        &self.layout
    }

    /// Whether a package can be skipped
    ///
    /// Its success marker must exist and be strictly newer than the
    /// manifest, every declared source and the success marker of every
    /// transitive dependency. Any unreadable file means a rebuild.
    pub async fn is_up_to_date(&self, id: PackageId) -> bool {
        if self.options.clean {
            return false;
        }

        let Some(built) = filesystem::modified(&self.layout.marker(self.set.get(id))).await else {
            return false;
        };

        for input in self.inputs(id) {
            match filesystem::modified(&input).await {
                Some(time) if time < built => {}
                _ => return false,
            }
        }
        true
    }

    /// Files a package's success marker is compared against
    fn inputs(&self, id: PackageId) -> Vec<PathBuf> {
        let package = self.set.get(id);
        let mut inputs = vec![package.manifest.clone()];
        inputs.extend(
            package
                .sources
                .iter()
                .map(|source| source.freshness_marker(package, &self.layout.srcdir)),
        );

        let mut visited: HashSet<PackageId> = HashSet::from([id]);
        let mut queue: VecDeque<PackageId> = self.set.dependencies(id).iter().copied().collect();
        while let Some(dep) = queue.pop_front() {
            if !visited.insert(dep) {
                continue;
            }
            inputs.push(self.layout.marker(self.set.get(dep)));
            queue.extend(self.set.dependencies(dep));
        }
        inputs
    }

    /// Most recent modification time among the readable inputs
    async fn newest_input(&self, id: PackageId) -> Option<SystemTime> {
        let mut newest = None;
        for input in self.inputs(id) {
            newest = newest.max(filesystem::modified(&input).await);
        }
        newest
    }

    /// Build one package on worker `slot`
    pub async fn build(
        &self,
        id: PackageId,
        slot: SlotId,
        events: &mut dyn FnMut(BuildEvent),
    ) -> Result<BuildOutcome, BuildError> {
        let package = self.set.get(id);

        if self.is_up_to_date(id).await {
            tracing::debug!("{package} is up to date");
            events(BuildEvent::UpToDate);
            return Ok(BuildOutcome::UpToDate);
        }

        events(BuildEvent::Prepare);
        self.prepare(package).await?;

        let dependencies = self
            .set
            .dependencies(id)
            .iter()
            .map(|&dep| self.set.get(dep))
            .collect();
        let env = StepEnvironment::new(&self.layout, package, dependencies, slot);

        let total = package.steps.len();
        let mut result = Ok(());
        for (i, step) in package.steps.iter().enumerate() {
            let index = i + 1;
            events(BuildEvent::Step {
                step: index,
                total,
                name: step.name.clone(),
            });
            result = self.run_step(package, &env, index, step, events).await;
            if result.is_err() {
                break;
            }
        }

        events(BuildEvent::Finishing);
        result?;
        self.finalize(id).await?;
        Ok(BuildOutcome::Built)
    }

    async fn prepare(&self, package: &Package) -> Result<(), BuildError> {
        let marker = self.layout.marker(package);
        if let Err(e) = filesystem::remove_file_if_exists(&marker).await {
            tracing::warn!("Could not remove {}: {e}", marker.display());
        }

        for dir in [self.layout.blddir(package), self.layout.reldir(package)] {
            filesystem::recreate_dir(&dir)
                .await
                .map_err(|e| BuildError::Io {
                    path: dir.clone(),
                    error: e.to_string(),
                })?;
        }
        Ok(())
    }

    async fn finalize(&self, id: PackageId) -> Result<(), BuildError> {
        let package = self.set.get(id);
        self.write_marker(id).await?;

        if self.options.save_space {
            let blddir = self.layout.blddir(package);
            if let Err(e) = tokio::fs::remove_dir_all(&blddir).await {
                tracing::warn!("Could not remove {}: {e}", blddir.display());
            }
        }
        Ok(())
    }

    /// Write the success marker, strictly newer than every input
    ///
    /// File timestamps advance in coarse ticks, so a marker written right
    /// after a dependency's marker can share its time. The marker is then
    /// stamped with the current clock until it reads back newer. Inputs
    /// dated further ahead than [`MARKER_SETTLE`] are left alone.
    async fn write_marker(&self, id: PackageId) -> Result<(), BuildError> {
        let package = self.set.get(id);
        let marker = self.layout.marker(package);
        let io_error = |e: std::io::Error| BuildError::Io {
            path: marker.clone(),
            error: e.to_string(),
        };

        tokio::fs::write(&marker, b"").await.map_err(io_error)?;
        let Some(newest) = self.newest_input(id).await else {
            return Ok(());
        };
        if newest > SystemTime::now() + MARKER_SETTLE {
            tracing::debug!("{package} has inputs dated in the future");
            return Ok(());
        }

        let deadline = Instant::now() + MARKER_SETTLE;
        while filesystem::modified(&marker).await.is_some_and(|time| time <= newest) {
            if Instant::now() >= deadline {
                tracing::warn!("Success marker of {package} is not newer than its inputs");
                break;
            }
            tokio::time::sleep(MARKER_TICK).await;
            filesystem::set_modified(&marker, SystemTime::now())
                .await
                .map_err(io_error)?;
        }
        Ok(())
    }

    async fn run_step(
        &self,
        package: &Package,
        env: &StepEnvironment<'_>,
        index: usize,
        step: &BuildStep,
        events: &mut dyn FnMut(BuildEvent),
    ) -> Result<(), BuildError> {
        let blddir = self.layout.blddir(package);
        let io_error = |path: &Path, e: std::io::Error| BuildError::Io {
            path: path.to_path_buf(),
            error: e.to_string(),
        };

        for (name, content) in &step.scripts {
            let path = blddir.join(name);
            tokio::fs::write(&path, content)
                .await
                .map_err(|e| io_error(&path, e))?;
        }

        let vars = env.to_env_map(step, self.ambient.iter().cloned());
        let workdir = step
            .workdir
            .as_ref()
            .map_or_else(|| blddir.clone(), |dir| blddir.join(dir));
        let stdout = blddir.join(format!("build-{index}-out.log"));
        let stderr = blddir.join(format!("build-{index}-err.log"));

        let command = StepCommand {
            package,
            step: index,
            workdir: &workdir,
            env: &vars,
            stdout: &stdout,
            stderr: &stderr,
        };

        match &step.action {
            StepAction::Commands(commands) => {
                for text in commands {
                    let (ignore_failure, line) = match text.strip_prefix('-') {
                        Some(rest) => (true, rest.trim_start()),
                        None => (false, text.as_str()),
                    };
                    let args = vec!["-c".to_string(), line.to_string()];
                    command
                        .run(&self.shell, args, text, ignore_failure, events)
                        .await?;
                }
            }
            StepAction::Script { body, interpreter } => {
                let program = match interpreter {
                    Some(interpreter) => {
                        which::which(interpreter).map_err(|_| BuildError::InterpreterNotFound {
                            package: package.full_name(),
                            interpreter: interpreter.clone(),
                        })?
                    }
                    None => self.shell.clone(),
                };

                let script = tempfile::Builder::new()
                    .prefix(".step-")
                    .suffix(".script")
                    .tempfile_in(&blddir)
                    .map_err(|e| io_error(&blddir, e))?
                    .into_temp_path();
                tokio::fs::write(&script, body)
                    .await
                    .map_err(|e| io_error(&script, e))?;

                let text = format!("{} {}", program.display(), script.display());
                let args = vec![script.display().to_string()];
                command.run(&program, args, &text, false, events).await?;
            }
        }

        Ok(())
    }
}

/// Everything needed to run the commands of one step
struct StepCommand<'a> {
    package: &'a Package,
    step: usize,
    workdir: &'a Path,
    env: &'a std::collections::BTreeMap<String, String>,
    stdout: &'a Path,
    stderr: &'a Path,
}

impl StepCommand<'_> {
    async fn run(
        &self,
        program: &Path,
        args: Vec<String>,
        text: &str,
        ignore_failure: bool,
        events: &mut dyn FnMut(BuildEvent),
    ) -> Result<(), BuildError> {
        events(BuildEvent::Command {
            step: self.step,
            command: text.to_string(),
        });

        let invocation = Invocation {
            program: program.to_path_buf(),
            args,
            workdir: self.workdir,
            env: self.env,
            stdout: self.stdout,
            stderr: self.stderr,
        };

        let report = match process::run(&invocation).await {
            Ok(report) => report,
            Err(e) => {
                events(BuildEvent::Error {
                    step: self.step,
                    command: text.to_string(),
                    error: e.to_string(),
                });
                return Err(BuildError::Spawn {
                    package: self.package.full_name(),
                    step: self.step,
                    command: text.to_string(),
                    error: e.to_string(),
                });
            }
        };

        events(BuildEvent::Exit {
            step: self.step,
            command: text.to_string(),
            code: report.code,
            signal: report.signal,
        });

        if report.success() || ignore_failure {
            Ok(())
        } else {
            Err(BuildError::StepFailed {
                package: self.package.full_name(),
                step: self.step,
                command: text.to_string(),
                code: report.code,
                signal: report.signal,
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core::package::Package;
    use std::time::{Duration, SystemTime};
    use tempfile::TempDir;

    struct Fixture {
        temp: TempDir,
        set: PackageSet,
    }

    impl Fixture {
        /// One package per `(name, manifest body)`; each depends on the previous
        fn new(packages: &[(&str, &str)]) -> Self {
            let temp = TempDir::new().unwrap();
            let mut set = PackageSet::new();
            let mut previous = None;

            for (name, body) in packages {
                let path = temp.path().join(format!("pkgs/{name}/1.0.0.toml"));
                std::fs::create_dir_all(path.parent().unwrap()).unwrap();
                let content = format!("[package]\nname = \"{name}\"\nversion = \"1.0.0\"\n{body}");
                std::fs::write(&path, &content).unwrap();
                let id = set.insert(Package::from_toml(&content, &path).unwrap());
                if let Some(prev) = previous {
                    set.link(id, prev);
                }
                previous = Some(id);
            }


            Self { temp, set }
        }

        fn engine(&self, options: BuildOptions) -> BuildEngine<'_> {
            let build = self.temp.path().join("_build");
            let layout = BuildLayout::new(&build, None, &self.temp.path().join("cache"));
            BuildEngine::new(&self.set, layout, options)
                .with_shell("/bin/sh")
                .with_ambient(vec![(
                    "PATH".to_string(),
                    std::env::var("PATH").unwrap_or_default(),
                )])
        }

        fn id(&self, name: &str) -> PackageId {
            self.set.by_full_name(&format!("{name}-1.0.0")).unwrap()
        }
    }

    fn set_mtime(path: &Path, offset_secs: i64) {
        let now = SystemTime::now();
        let delta = Duration::from_secs(offset_secs.unsigned_abs());
        let time = if offset_secs < 0 { now - delta } else { now + delta };
        std::fs::File::options()
            .write(true)
            .open(path)
            .unwrap()
            .set_modified(time)
            .unwrap();
    }

    async fn build(engine: &BuildEngine<'_>, id: PackageId) -> (Result<BuildOutcome, BuildError>, Vec<BuildEvent>) {
        let mut events = Vec::new();
        let result = engine.build(id, 0, &mut |e| events.push(e)).await;
        (result, events)
    }

    // ============================================
    // Async Tests - Steps
    // ============================================

    #[tokio::test]
    async fn test_steps_run_in_order_with_logs() {
        let fixture = Fixture::new(&[(
            "hello",
            "[[build]]\ncommands = [\"echo one > \\\"$_RELDIR/out\\\"\", \"echo two >> \\\"$_RELDIR/out\\\"\"]\n\n[[build]]\ncommands = \"echo step2\"\n",
        )]);
        let engine = fixture.engine(BuildOptions::default());
        let id = fixture.id("hello");

        let (result, events) = build(&engine, id).await;
        assert_eq!(result.unwrap(), BuildOutcome::Built);

        let reldir = engine.layout().reldir(fixture.set.get(id));
        assert_eq!(std::fs::read_to_string(reldir.join("out")).unwrap(), "one\ntwo\n");

        let blddir = engine.layout().blddir(fixture.set.get(id));
        assert_eq!(
            std::fs::read_to_string(blddir.join("build-2-out.log")).unwrap(),
            "step2\n"
        );
        assert!(engine.layout().marker(fixture.set.get(id)).exists());

        let steps: Vec<usize> = events
            .iter()
            .filter_map(|e| match e {
                BuildEvent::Step { step, total, .. } => {
                    assert_eq!(*total, 2);
                    Some(*step)
                }
                _ => None,
            })
            .collect();
        assert_eq!(steps, vec![1, 2]);
        assert_eq!(events.first(), Some(&BuildEvent::Prepare));
        assert_eq!(events.last(), Some(&BuildEvent::Finishing));
    }

    #[tokio::test]
    async fn test_failing_command_stops_the_build() {
        let fixture = Fixture::new(&[(
            "broken",
            "[[build]]\ncommands = [\"exit 4\", \"touch never\"]\n\n[[build]]\ncommands = [\"touch never2\"]\n",
        )]);
        let engine = fixture.engine(BuildOptions::default());
        let id = fixture.id("broken");

        let (result, events) = build(&engine, id).await;
        match result.unwrap_err() {
            BuildError::StepFailed {
                step, command, code, ..
            } => {
                assert_eq!(step, 1);
                assert_eq!(command, "exit 4");
                assert_eq!(code, Some(4));
            }
            other => panic!("expected step failure, got {other:?}"),
        }

        let blddir = engine.layout().blddir(fixture.set.get(id));
        assert!(!blddir.join("never").exists());
        assert!(!blddir.join("never2").exists());
        assert!(!engine.layout().marker(fixture.set.get(id)).exists());
        assert_eq!(
            events
                .iter()
                .filter(|e| matches!(e, BuildEvent::Step { .. }))
                .count(),
            1
        );
    }

    #[tokio::test]
    async fn test_dash_prefix_ignores_failure() {
        let fixture = Fixture::new(&[("lenient", "[[build]]\ncommands = [\"-false\", \"touch ran\"]\n")]);
        let engine = fixture.engine(BuildOptions::default());
        let id = fixture.id("lenient");

        let (result, events) = build(&engine, id).await;
        assert!(result.is_ok());
        assert!(engine.layout().blddir(fixture.set.get(id)).join("ran").exists());
        assert!(events.contains(&BuildEvent::Exit {
            step: 1,
            command: "-false".to_string(),
            code: Some(1),
            signal: None,
        }));
    }

    #[tokio::test]
    async fn test_missing_workdir_is_spawn_error() {
        let fixture = Fixture::new(&[("tool", "[[build]]\nworkdir = \"sub\"\ncommands = [\"true\"]\n")]);
        let engine = fixture.engine(BuildOptions::default());

        let (result, events) = build(&engine, fixture.id("tool")).await;
        assert!(matches!(result, Err(BuildError::Spawn { step: 1, .. })));
        assert!(events.iter().any(|e| matches!(e, BuildEvent::Error { step: 1, .. })));
    }

    #[tokio::test]
    async fn test_workdir_env_and_scripts() {
        let fixture = Fixture::new(&[(
            "tool",
            "[[build]]\ncommands = [\"mkdir sub\"]\nscripts = { \"helper.sh\" = \"echo helper\" }\n\n[[build]]\nworkdir = \"sub\"\nenv = { WHO = \"world\" }\nenv_prefix = \"T\"\ncommands = [\"sh ../helper.sh > helper.out\", \"echo \\\"$WHO $T_BLDSLOT\\\" > env.out\"]\n",
        )]);
        let engine = fixture.engine(BuildOptions::default());
        let id = fixture.id("tool");
        let blddir = engine.layout().blddir(fixture.set.get(id));

        build(&engine, id).await.0.unwrap();
        assert_eq!(
            std::fs::read_to_string(blddir.join("sub/helper.out")).unwrap(),
            "helper\n"
        );
        assert_eq!(
            std::fs::read_to_string(blddir.join("sub/env.out")).unwrap(),
            "world 0\n"
        );
    }

    #[tokio::test]
    async fn test_script_step_uses_interpreter() {
        let fixture = Fixture::new(&[(
            "scripted",
            "[[build]]\ninterpreter = \"sh\"\nscript = \"echo from-script > script.out\"\n",
        )]);
        let engine = fixture.engine(BuildOptions::default());
        let id = fixture.id("scripted");

        let (result, _) = build(&engine, id).await;
        result.unwrap();
        let blddir = engine.layout().blddir(fixture.set.get(id));
        assert_eq!(
            std::fs::read_to_string(blddir.join("script.out")).unwrap(),
            "from-script\n"
        );
    }

    #[tokio::test]
    async fn test_missing_interpreter() {
        let fixture = Fixture::new(&[(
            "scripted",
            "[[build]]\ninterpreter = \"no-such-interpreter-xyz\"\nscript = \"print(1)\"\n",
        )]);
        let engine = fixture.engine(BuildOptions::default());

        let (result, _) = build(&engine, fixture.id("scripted")).await;
        assert!(matches!(result, Err(BuildError::InterpreterNotFound { .. })));
    }

    // ============================================
    // Async Tests - Incremental builds
    // ============================================

    #[tokio::test]
    async fn test_second_build_is_skipped() {
        let fixture = Fixture::new(&[("once", "[[build]]\ncommands = [\"true\"]\n")]);
        let engine = fixture.engine(BuildOptions::default());
        let id = fixture.id("once");

        build(&engine, id).await.0.unwrap();
        let (result, events) = build(&engine, id).await;

        assert_eq!(result.unwrap(), BuildOutcome::UpToDate);
        assert_eq!(events, vec![BuildEvent::UpToDate]);
    }

    #[tokio::test]
    async fn test_clean_forces_rebuild() {
        let fixture = Fixture::new(&[("once", "[[build]]\ncommands = [\"true\"]\n")]);
        let id = fixture.id("once");

        build(&fixture.engine(BuildOptions::default()), id).await.0.unwrap();
        let clean = fixture.engine(BuildOptions {
            clean: true,
            save_space: false,
        });
        assert_eq!(build(&clean, id).await.0.unwrap(), BuildOutcome::Built);
    }

    #[tokio::test]
    async fn test_touched_source_forces_rebuild() {
        let fixture = Fixture::new(&[(
            "src",
            "[[sources]]\nfile = \"src.tar\"\norigins = \"https://example.com/src.tar\"\n\n[[build]]\ncommands = [\"true\"]\n",
        )]);
        let cache = fixture.temp.path().join("cache");
        std::fs::create_dir_all(&cache).unwrap();
        let source = cache.join("src.tar");
        std::fs::write(&source, "v1").unwrap();
        set_mtime(&source, -60);

        let engine = fixture.engine(BuildOptions::default());
        let id = fixture.id("src");
        build(&engine, id).await.0.unwrap();
        assert!(engine.is_up_to_date(id).await);

        set_mtime(&source, 60);
        assert!(!engine.is_up_to_date(id).await);
    }

    #[tokio::test]
    async fn test_missing_source_forces_rebuild() {
        let fixture = Fixture::new(&[(
            "src",
            "[[sources]]\nfile = \"gone.tar\"\norigins = \"https://example.com/gone.tar\"\n\n[[build]]\ncommands = [\"true\"]\n",
        )]);
        let engine = fixture.engine(BuildOptions::default());
        let id = fixture.id("src");

        build(&engine, id).await.0.unwrap();
        assert!(!engine.is_up_to_date(id).await);
    }

    #[tokio::test]
    async fn test_rebuilt_dependency_forces_rebuild() {
        let fixture = Fixture::new(&[
            ("base", "[[build]]\ncommands = [\"true\"]\n"),
            ("mid", "[[build]]\ncommands = [\"true\"]\n"),
            ("top", "[[build]]\ncommands = [\"true\"]\n"),
        ]);
        let engine = fixture.engine(BuildOptions::default());
        let (base, mid, top) = (fixture.id("base"), fixture.id("mid"), fixture.id("top"));

        for id in [base, mid, top] {
            build(&engine, id).await.0.unwrap();
        }
        assert!(engine.is_up_to_date(top).await);

        // a newer marker two levels down invalidates the top package
        set_mtime(&engine.layout().marker(fixture.set.get(base)), 60);
        assert!(!engine.is_up_to_date(top).await);
    }

    #[tokio::test]
    async fn test_chain_built_back_to_back_is_up_to_date() {
        let fixture = Fixture::new(&[
            ("base", ""),
            ("mid", ""),
            ("top", ""),
        ]);
        let engine = fixture.engine(BuildOptions::default());
        let ids = [fixture.id("base"), fixture.id("mid"), fixture.id("top")];

        for _ in 0..10 {
            let clean = fixture.engine(BuildOptions {
                clean: true,
                save_space: false,
            });
            for id in ids {
                assert_eq!(build(&clean, id).await.0.unwrap(), BuildOutcome::Built);
            }
            for id in ids {
                assert!(engine.is_up_to_date(id).await);
            }
        }

        let marker = |name: &str| {
            let path = engine.layout().marker(fixture.set.get(fixture.id(name)));
            std::fs::metadata(path).unwrap().modified().unwrap()
        };
        assert!(marker("base") < marker("mid"));
        assert!(marker("mid") < marker("top"));
    }

    #[tokio::test]
    async fn test_future_input_does_not_stall_the_build() {
        let fixture = Fixture::new(&[("ahead", "")]);
        let id = fixture.id("ahead");
        set_mtime(&fixture.set.get(id).manifest, 3600);

        let engine = fixture.engine(BuildOptions::default());
        let started = std::time::Instant::now();
        build(&engine, id).await.0.unwrap();

        assert!(started.elapsed() < MARKER_SETTLE);
        assert!(!engine.is_up_to_date(id).await);
    }

    #[tokio::test]
    async fn test_save_space_removes_build_dir() {
        let fixture = Fixture::new(&[("small", "[[build]]\ncommands = [\"touch \\\"$_RELDIR/kept\\\"\"]\n")]);
        let engine = fixture.engine(BuildOptions {
            clean: false,
            save_space: true,
        });
        let id = fixture.id("small");

        build(&engine, id).await.0.unwrap();
        let package = fixture.set.get(id);
        assert!(!engine.layout().blddir(package).exists());
        assert!(engine.layout().reldir(package).join("kept").exists());
        assert!(engine.layout().marker(package).exists());
    }
}
