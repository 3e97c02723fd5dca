//! Build environment setup
//!
//! Directory layout of a build and the environment each build step runs
//! with: the ambient process environment, the step's own variables, PATH
//! entries pointing into dependency release directories and the injected
//! `_BLD*`/`_REL*`/`_PKG*`/`_DEP_*` variables.

use std::collections::BTreeMap;
use std::path::{Path, PathBuf};

use crate::config::defaults::{BUILD_SUBDIR, RELEASE_SUBDIR};
use crate::core::package::{BuildStep, Package};
use crate::core::workload::SlotId;

/// Suffix of the per-package success marker
pub const SUCCESS_SUFFIX: &str = ".success";

/// Where builds happen and where their results go
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildLayout {
    /// Parent of all per-package build directories and success markers
    pub bldbase: PathBuf,
    /// Parent of all per-package release directories
    pub relbase: PathBuf,
    /// Source cache root
    pub srcdir: PathBuf,
}

impl BuildLayout {
    /// Layout under `build_dir`; releases default to `<build_dir>/rel`
    pub fn new(build_dir: &Path, release_dir: Option<&Path>, cache_dir: &Path) -> Self {
        Self {
            bldbase: build_dir.join(BUILD_SUBDIR),
            relbase: release_dir.map_or_else(|| build_dir.join(RELEASE_SUBDIR), Path::to_path_buf),
            srcdir: cache_dir.to_path_buf(),
        }
    }

    /// Scratch directory of one package's build
    pub fn blddir(&self, package: &Package) -> PathBuf {
        self.bldbase.join(package.full_name())
    }

    /// Release directory of one package
    pub fn reldir(&self, package: &Package) -> PathBuf {
        self.relbase.join(package.full_name())
    }

    /// Marker written when a package built successfully
    pub fn marker(&self, package: &Package) -> PathBuf {
        self.bldbase
            .join(format!("{}{SUCCESS_SUFFIX}", package.full_name()))
    }
}

/// Name of the variable carrying a dependency's full name
///
/// `my-lib` becomes `_DEP_MY_LIB`.
pub fn dep_variable(name: &str) -> String {
    format!("_DEP_{}", name.to_uppercase().replace('-', "_"))
}

/// Environment of the steps of one package build
#[derive(Debug, Clone)]
pub struct StepEnvironment<'a> {
    layout: &'a BuildLayout,
    package: &'a Package,
    /// Direct dependencies, resolved
    dependencies: Vec<&'a Package>,
    slot: SlotId,
}

impl<'a> StepEnvironment<'a> {
    pub fn new(
        layout: &'a BuildLayout,
        package: &'a Package,
        dependencies: Vec<&'a Package>,
        slot: SlotId,
    ) -> Self {
        Self {
            layout,
            package,
            dependencies,
            slot,
        }
    }

    /// Injected variables, without any prefix
    pub fn variables(&self) -> Vec<(String, String)> {
        let display = |path: PathBuf| path.display().to_string();
        let package = self.package;

        let mut vars = vec![
            ("_BLDSLOT".to_string(), self.slot.to_string()),
            ("_BLDBASE".to_string(), display(self.layout.bldbase.clone())),
            ("_BLDDIR".to_string(), display(self.layout.blddir(package))),
            ("_RELBASE".to_string(), display(self.layout.relbase.clone())),
            ("_RELDIR".to_string(), display(self.layout.reldir(package))),
            ("_SRCDIR".to_string(), display(self.layout.srcdir.clone())),
            (
                "_PKGDIR".to_string(),
                display(package.manifest_dir().to_path_buf()),
            ),
            ("_PKGFILE".to_string(), display(package.manifest.clone())),
            (
                "_PKGDEPS".to_string(),
                self.dependencies
                    .iter()
                    .map(|dep| dep.full_name())
                    .collect::<Vec<_>>()
                    .join("\n"),
            ),
        ];

        vars.extend(
            self.dependencies
                .iter()
                .map(|dep| (dep_variable(&dep.name), dep.full_name())),
        );
        vars
    }

    /// Release directories a step asks to put on PATH, in order
    pub fn path_dirs(&self, step: &BuildStep) -> Vec<PathBuf> {
        step.paths
            .iter()
            .filter_map(|entry| {
                let dep = self.dependencies.iter().find(|dep| dep.name == entry.dep);
                if dep.is_none() {
                    tracing::warn!(
                        "{}: PATH entry names '{}' which is not a direct dependency",
                        self.package,
                        entry.dep
                    );
                }
                dep.map(|dep| (entry, self.layout.reldir(dep)))
            })
            .flat_map(|(entry, reldir)| {
                if entry.dirs.is_empty() {
                    vec![reldir]
                } else {
                    entry.dirs.iter().map(|dir| reldir.join(dir)).collect()
                }
            })
            .collect()
    }

    /// Full environment of a step
    ///
    /// Starts from `ambient`, overlays the step's variables, prepends the
    /// requested dependency directories to PATH and adds the injected
    /// variables under the step's prefix.
    pub fn to_env_map(
        &self,
        step: &BuildStep,
        ambient: impl IntoIterator<Item = (String, String)>,
    ) -> BTreeMap<String, String> {
        let mut env: BTreeMap<String, String> = ambient.into_iter().collect();
        env.extend(step.env.iter().map(|(k, v)| (k.clone(), v.clone())));

        let dirs = self.path_dirs(step);
        if !dirs.is_empty() {
            let mut entries: Vec<String> = dirs.iter().map(|d| d.display().to_string()).collect();
            if let Some(old) = env.get("PATH").filter(|old| !old.is_empty()) {
                entries.push(old.clone());
            }
            env.insert("PATH".to_string(), entries.join(":"));
        }

        let prefix = step.env_prefix.as_deref().unwrap_or_default();
        env.extend(
            self.variables()
                .into_iter()
                .map(|(name, value)| (format!("{prefix}{name}"), value)),
        );
        env
    }
}
