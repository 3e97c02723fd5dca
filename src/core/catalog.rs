//! Package catalog
//!
//! Finds manifests on the package search paths and loads a closed set of
//! packages from a list of requests. Loaded packages live in a
//! [`PackageSet`] arena; dependency and consumer edges are stored as
//! package ids so the graph can be walked in both directions.

use semver::Version;
use serde::Serialize;
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::path::{Path, PathBuf};

use crate::core::package::{Package, PackageRequest};
use crate::error::{IncubatorError, ResolveError};

/// Manifest file extension
pub const MANIFEST_EXTENSION: &str = "toml";

/// Index of a package inside a [`PackageSet`]
pub type PackageId = usize;

/// Source of package manifests
pub trait ManifestSource {
    /// Available versions of a package, newest first
    fn versions(&self, name: &str) -> Vec<Version>;

    /// Manifest file of the newest version satisfying the request
    fn locate(&self, request: &PackageRequest) -> Option<PathBuf>;

    /// Load the newest version satisfying the request
    fn load(&self, request: &PackageRequest) -> Result<Package, IncubatorError> {
        let path = self.locate(request).ok_or_else(|| ResolveError::NotFound {
            request: request.to_string(),
        })?;
        Ok(Package::load(&path)?)
    }
}

/// Manifests stored as `<search-path>/<name>/<version>.toml`
#[derive(Debug, Clone, Default)]
pub struct ManifestDirs {
    paths: Vec<PathBuf>,
}

impl ManifestDirs {
    pub fn new(paths: Vec<PathBuf>) -> Self {
        Self { paths }
    }

    pub fn paths(&self) -> &[PathBuf] {
        &self.paths
    }

    /// Manifest path of an exact version, searching paths in order
    pub fn filename(&self, name: &str, version: &Version) -> Option<PathBuf> {
        self.paths
            .iter()
            .map(|path| manifest_path(path, name, version))
            .find(|path| path.is_file())
    }

    /// Newest version satisfying the request
    pub fn select(&self, request: &PackageRequest) -> Option<Version> {
        self.versions(&request.name)
            .into_iter()
            .find(|version| request.matches(version))
    }
}

impl ManifestSource for ManifestDirs {
    fn versions(&self, name: &str) -> Vec<Version> {
        let mut versions: Vec<Version> = self
            .paths
            .iter()
            .filter_map(|path| std::fs::read_dir(path.join(name)).ok())
            .flat_map(|entries| entries.filter_map(Result::ok))
            .filter_map(|entry| {
                let path = entry.path();
                if path.extension()? != MANIFEST_EXTENSION || !path.is_file() {
                    return None;
                }
                Version::parse(path.file_stem()?.to_str()?).ok()
            })
            .collect();

        versions.sort_unstable_by(|a, b| b.cmp(a));
        versions.dedup();
        versions
    }

    fn locate(&self, request: &PackageRequest) -> Option<PathBuf> {
        let version = self.select(request)?;
        self.filename(&request.name, &version)
    }
}

/// Location of a manifest for a given package version
pub fn manifest_path(search_path: &Path, name: &str, version: &Version) -> PathBuf {
    search_path
        .join(name)
        .join(format!("{version}.{MANIFEST_EXTENSION}"))
}

/// Progress of manifest loading
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "kebab-case")]
pub enum PackageEvent {
    /// A request is being considered
    Examine { request: String },
    /// A manifest was chosen for a request and is being read
    Loading { request: String, manifest: PathBuf },
    /// A package was added to the set
    Loaded { package: String },
}

/// Arena of loaded packages with resolved dependency edges
#[derive(Debug, Default)]
pub struct PackageSet {
    packages: Vec<Package>,
    index: HashMap<String, PackageId>,
    /// Loaded versions per name, newest first
    by_name: BTreeMap<String, Vec<PackageId>>,
    dependencies: Vec<Vec<PackageId>>,
    consumers: Vec<Vec<PackageId>>,
}

impl PackageSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Load every requested package and, transitively, their dependencies
    ///
    /// Requests are processed breadth-first. A request that an already
    /// loaded version satisfies reuses it; otherwise the newest matching
    /// manifest is loaded and its dependencies are queued.
    pub fn load(
        source: &dyn ManifestSource,
        requests: &[PackageRequest],
        mut observer: impl FnMut(PackageEvent),
    ) -> Result<Self, IncubatorError> {
        let mut set = Self::new();
        let mut queue: VecDeque<(PackageRequest, Option<PackageId>)> =
            requests.iter().cloned().map(|request| (request, None)).collect();

        while let Some((request, consumer)) = queue.pop_front() {
            observer(PackageEvent::Examine {
                request: request.to_string(),
            });

            let id = if let Some(id) = set.find(&request) {
                tracing::debug!("Reusing {} for {}", set.packages[id], request);
                id
            } else {
                let manifest = source.locate(&request).ok_or_else(|| ResolveError::NotFound {
                    request: request.to_string(),
                })?;
                observer(PackageEvent::Loading {
                    request: request.to_string(),
                    manifest: manifest.clone(),
                });

                let package = Package::load(&manifest)?;
                let id = set.insert(package);
                let package = &set.packages[id];
                queue.extend(
                    package
                        .dependencies
                        .iter()
                        .map(|dep| (PackageRequest::from(dep), Some(id))),
                );
                observer(PackageEvent::Loaded {
                    package: package.full_name(),
                });
                id
            };

            if let Some(consumer) = consumer {
                set.link(consumer, id);
            }
        }

        Ok(set)
    }

    /// Add a package, returning its id (or the id of an identical one)
    pub fn insert(&mut self, package: Package) -> PackageId {
        let full_name = package.full_name();
        if let Some(&id) = self.index.get(&full_name) {
            return id;
        }

        let id = self.packages.len();
        let versions = self.by_name.entry(package.name.clone()).or_default();
        let position = versions
            .iter()
            .position(|&other| self.packages[other].version < package.version)
            .unwrap_or(versions.len());
        versions.insert(position, id);

        self.packages.push(package);
        self.dependencies.push(Vec::new());
        self.consumers.push(Vec::new());
        self.index.insert(full_name, id);
        id
    }

    /// Record that `consumer` depends on `dependency`
    pub fn link(&mut self, consumer: PackageId, dependency: PackageId) {
        if !self.dependencies[consumer].contains(&dependency) {
            self.dependencies[consumer].push(dependency);
            self.consumers[dependency].push(consumer);
        }
    }

    /// Newest loaded version satisfying the request
    pub fn find(&self, request: &PackageRequest) -> Option<PackageId> {
        self.by_name
            .get(&request.name)?
            .iter()
            .copied()
            .find(|&id| request.matches(&self.packages[id].version))
    }

    pub fn get(&self, id: PackageId) -> &Package {
        &self.packages[id]
    }

    pub fn by_full_name(&self, full_name: &str) -> Option<PackageId> {
        self.index.get(full_name).copied()
    }

    /// Resolved direct dependencies, in declaration order
    pub fn dependencies(&self, id: PackageId) -> &[PackageId] {
        &self.dependencies[id]
    }

    /// Packages that depend directly on `id`
    pub fn consumers(&self, id: PackageId) -> &[PackageId] {
        &self.consumers[id]
    }

    pub fn ids(&self) -> impl Iterator<Item = PackageId> {
        0..self.packages.len()
    }

    pub fn packages(&self) -> impl Iterator<Item = (PackageId, &Package)> {
        self.packages.iter().enumerate()
    }

    pub fn len(&self) -> usize {
        self.packages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.packages.is_empty()
    }

    /// Ids ordered by name, then newest version first
    pub fn sorted_ids(&self) -> Vec<PackageId> {
        self.by_name.values().flatten().copied().collect()
    }
}
