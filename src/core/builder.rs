//! Build orchestration
//!
//! [`Builder`] runs a complete incubation: load the requested packages and
//! their dependencies, bring every source file into the cache, then build
//! the packages in dependency order on a bounded pool of workers. Progress
//! from every layer is republished as [`Notification`]s on one channel.

use serde::Serialize;
use std::collections::HashSet;
use std::path::PathBuf;
use tokio::sync::mpsc::UnboundedSender;

use crate::config::defaults;
use crate::core::build_env::BuildLayout;
use crate::core::cache::{FileCache, SourceEvent};
use crate::core::catalog::{ManifestDirs, ManifestSource, PackageEvent, PackageId, PackageSet};
use crate::core::engine::{BuildEngine, BuildEvent, BuildOptions, BuildOutcome};
use crate::core::package::PackageRequest;
use crate::core::resolver::Order;
use crate::core::workload::{PoolEvent, SlotId, Workload};
use crate::error::{BuildError, DownloadError, IncubatorError};

/// Settings of one builder
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuilderConfig {
    /// Directories searched for manifests, in order
    pub package_paths: Vec<PathBuf>,
    pub build_dir: PathBuf,
    /// Source cache; `<build_dir>/cache` when unset
    pub cache_dir: Option<PathBuf>,
    /// Release root; `<build_dir>/rel` when unset
    pub release_dir: Option<PathBuf>,
    /// Worker count; the number of CPUs when unset
    pub parallel: Option<usize>,
    /// Upper bound on the worker count
    pub parallel_max: Option<usize>,
    pub clean: bool,
    pub save_space: bool,
}

impl Default for BuilderConfig {
    fn default() -> Self {
        Self {
            package_paths: Vec::new(),
            build_dir: PathBuf::from(defaults::DEFAULT_BUILD_DIR),
            cache_dir: None,
            release_dir: None,
            parallel: None,
            parallel_max: None,
            clean: false,
            save_space: false,
        }
    }
}

impl BuilderConfig {
    /// Effective number of workers, at least one
    pub fn workers(&self) -> usize {
        let wanted = self.parallel.unwrap_or_else(num_cpus::get);
        self.parallel_max
            .map_or(wanted, |max| wanted.min(max))
            .max(1)
    }

    pub fn cache_dir(&self) -> PathBuf {
        self.cache_dir
            .clone()
            .unwrap_or_else(|| self.build_dir.join(defaults::CACHE_SUBDIR))
    }

    pub fn layout(&self) -> BuildLayout {
        BuildLayout::new(
            &self.build_dir,
            self.release_dir.as_deref(),
            &self.cache_dir(),
        )
    }

    pub fn options(&self) -> BuildOptions {
        BuildOptions {
            clean: self.clean,
            save_space: self.save_space,
        }
    }
}

/// Event published by a [`Builder`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "src", rename_all = "kebab-case")]
pub enum Notification {
    /// Manifest loading
    Package {
        #[serde(flatten)]
        event: PackageEvent,
    },
    /// Source file caching
    Source {
        worker: SlotId,
        package: String,
        file: String,
        #[serde(flatten)]
        event: SourceEvent,
    },
    /// Package building
    Build {
        worker: SlotId,
        package: String,
        #[serde(flatten)]
        event: BuildEvent,
    },
}

/// Packages handled by a finished run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunSummary {
    /// Full names of packages whose steps ran
    pub built: Vec<String>,
    /// Full names of packages that were already up to date
    pub up_to_date: Vec<String>,
}

/// Orchestrates loading, downloading and building
pub struct Builder {
    config: BuilderConfig,
    catalog: Box<dyn ManifestSource>,
    cache: FileCache,
    notifier: UnboundedSender<Notification>,
}

impl std::fmt::Debug for Builder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Builder")
            .field("config", &self.config)
            .field("cache", &self.cache)
            .finish_non_exhaustive()
    }
}

impl Builder {
    /// Builder reading manifests from the configured package paths
    ///
    /// # Errors
    ///
    /// Fails when no package path is configured.
    pub fn new(
        config: BuilderConfig,
        notifier: UnboundedSender<Notification>,
    ) -> Result<Self, IncubatorError> {
        if config.package_paths.is_empty() {
            return Err(IncubatorError::Config(
                "no package path given (use --package-path or INCUBATE_PACKAGE_PATH)".to_string(),
            ));
        }

        let catalog = ManifestDirs::new(config.package_paths.clone());
        let cache = FileCache::new(config.cache_dir());
        Ok(Self {
            config,
            catalog: Box::new(catalog),
            cache,
            notifier,
        })
    }

    /// Replace the source cache
    #[must_use]
    pub fn with_cache(mut self, cache: FileCache) -> Self {
        self.cache = cache;
        self
    }

    /// Replace where manifests come from
    #[must_use]
    pub fn with_catalog(mut self, catalog: impl ManifestSource + 'static) -> Self {
        self.catalog = Box::new(catalog);
        self
    }

    pub fn config(&self) -> &BuilderConfig {
        &self.config
    }

    fn notify(&self, notification: Notification) {
        // a closed receiver only means nobody is listening
        let _ = self.notifier.send(notification);
    }

    /// Load the named packages and everything they depend on
    ///
    /// Names are `name` (newest version) or `name-x.y.z` (exact version).
    pub fn load(&self, names: &[String]) -> Result<PackageSet, IncubatorError> {
        let requests = names
            .iter()
            .map(|name| name.parse::<PackageRequest>())
            .collect::<Result<Vec<_>, _>>()?;

        tracing::info!("Loading {} requested package(s)", requests.len());
        let set = PackageSet::load(self.catalog.as_ref(), &requests, |event| {
            self.notify(Notification::Package { event });
        })?;
        tracing::info!("Loaded {} package(s)", set.len());
        Ok(set)
    }

    /// Bring every source file of every package into the cache
    ///
    /// Files sharing a cache path are fetched once. After the first
    /// failure queued files are dropped; running downloads still finish.
    pub async fn download(&self, set: &PackageSet) -> Result<(), IncubatorError> {
        let mut pool: Workload<'_, (PackageId, usize), (), DownloadError> =
            Workload::new(self.config.workers())
                .with_halt_on_error()
                .with_observer(|event| match event {
                    PoolEvent::Drain => tracing::debug!("All downloads dispatched"),
                    PoolEvent::Done {
                        error: Some(error), ..
                    } => tracing::debug!("Download failed: {error}"),
                    _ => {}
                });

        let mut seen = HashSet::new();
        for (id, package) in set.packages() {
            for (index, source) in package.sources.iter().enumerate() {
                if !seen.insert(self.cache.path_of(package, source)) {
                    tracing::debug!("{package}: {} already queued", source.file);
                    continue;
                }

                pool.push((id, index), move |slot| {
                    let notify = move |event| {
                        self.notify(Notification::Source {
                            worker: slot,
                            package: package.full_name(),
                            file: source.file.clone(),
                            event,
                        });
                    };
                    notify(SourceEvent::Start);
                    async move {
                        let mut notify = notify;
                        self.cache.fetch(package, source, &mut notify).await
                    }
                });
            }
        }

        tracing::info!("Fetching {} source file(s)", seen.len());
        let mut errors = Vec::new();
        while let Some(finished) = pool.next().await {
            let (id, index) = finished.data;
            let package = set.get(id);
            let error = finished.result.err();

            self.notify(Notification::Source {
                worker: finished.slot,
                package: package.full_name(),
                file: package.sources[index].file.clone(),
                event: SourceEvent::Done {
                    error: error.as_ref().map(ToString::to_string),
                },
            });

            if let Some(error) = error {
                if errors.is_empty() {
                    tracing::info!("Download failed, waiting for running downloads");
                }
                errors.push(IncubatorError::from(error));
            }
        }

        IncubatorError::aggregate(errors)
    }

    /// Build every package in dependency order
    ///
    /// A package is handed to a worker only once all of its dependencies
    /// built. After a failure nothing new starts and running builds finish.
    pub async fn build(&self, set: &PackageSet) -> Result<RunSummary, IncubatorError> {
        let engine = BuildEngine::new(set, self.config.layout(), self.config.options());
        let mut order = Order::new(set);
        let mut pool: Workload<'_, PackageId, BuildOutcome, BuildError> =
            Workload::new(self.config.workers());

        let mut summary = RunSummary::default();
        let mut errors = Vec::new();

        loop {
            if errors.is_empty() {
                for id in order.fetch(pool.free()) {
                    let engine = &engine;
                    pool.push(id, move |slot| {
                        let package = set.get(id);
                        let notify = move |event| {
                            self.notify(Notification::Build {
                                worker: slot,
                                package: package.full_name(),
                                event,
                            });
                        };
                        notify(BuildEvent::Start);
                        async move {
                            let mut notify = notify;
                            engine.build(id, slot, &mut notify).await
                        }
                    });
                }
            }

            let Some(finished) = pool.next().await else {
                break;
            };
            let id = finished.data;
            let full_name = set.get(id).full_name();
            let notify = |event| {
                self.notify(Notification::Build {
                    worker: finished.slot,
                    package: full_name.clone(),
                    event,
                });
            };

            match finished.result {
                Ok(outcome) => {
                    order.complete(&[id])?;
                    notify(BuildEvent::Succeeded);
                    notify(BuildEvent::Done { error: None });
                    match outcome {
                        BuildOutcome::Built => summary.built.push(full_name.clone()),
                        BuildOutcome::UpToDate => summary.up_to_date.push(full_name.clone()),
                    }
                }
                Err(error) => {
                    tracing::info!("{full_name} failed, no further builds are started");
                    notify(BuildEvent::Failed {
                        error: error.to_string(),
                    });
                    notify(BuildEvent::Done {
                        error: Some(error.to_string()),
                    });
                    errors.push(IncubatorError::from(error));
                }
            }
        }

        if errors.is_empty() {
            order.ensure_progress()?;
        }
        IncubatorError::aggregate(errors)?;
        Ok(summary)
    }

    /// Load, download and build the named packages
    pub async fn run(&self, names: &[String]) -> Result<RunSummary, IncubatorError> {
        let set = self.load(names)?;
        self.download(&set).await?;
        self.build(&set).await
    }
}
