//! Package definition handling
//!
//! Parses `<name>/<version>.toml` manifests into [`Package`] values. A
//! package has an immutable identity (name and version), a list of
//! dependencies with optional semver ranges, the source files it needs and
//! the linear list of build steps that turn those sources into a release.

use regex::Regex;
use semver::{Version, VersionReq};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::sync::OnceLock;

use crate::core::digest::Digest;
use crate::error::ManifestError;

/// Build engine used by the steps that do not name one
pub const DEFAULT_ENGINE: &str = "shell";

/// Suffix of the file recording the revision of an SCM checkout
pub const REVISION_SUFFIX: &str = ".revision";

/// A loaded package manifest
#[derive(Debug, Clone, PartialEq)]
pub struct Package {
    pub name: String,
    pub version: Version,
    pub description: Option<String>,
    /// Path of the manifest this package was loaded from
    pub manifest: PathBuf,
    pub dependencies: Vec<Dependency>,
    pub sources: Vec<SourceFile>,
    pub steps: Vec<BuildStep>,
}

/// A dependency on another package, optionally constrained to a range
///
/// Written either as a bare name, a full name (`zlib-1.3.1`, an exact
/// match) or a single-entry table `{ zlib = "^1.3" }`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Dependency {
    pub name: String,
    pub range: Option<VersionReq>,
}

/// A file the package needs before it can be built
#[derive(Debug, Clone, PartialEq)]
pub struct SourceFile {
    /// Path relative to the cache root (or the manifest directory when packaged)
    pub file: String,
    pub digest: Option<Digest>,
    pub kind: SourceKind,
}

/// Where a source file comes from
#[derive(Debug, Clone, PartialEq)]
pub enum SourceKind {
    /// Downloaded from the first working origin
    Remote { origins: Vec<Origin> },
    /// Shipped next to the manifest
    Packaged { subdir: Option<String> },
    /// Checked out from a git repository
    Scm(ScmSource),
}

/// Git checkout declared as a source
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ScmSource {
    pub repo: String,
    pub reference: ScmRef,
}

/// Reference an SCM source is pinned to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScmRef {
    Tag(String),
    Branch(String),
}

impl fmt::Display for ScmRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Tag(tag) => write!(f, "tag:{tag}"),
            Self::Branch(branch) => write!(f, "branch:{branch}"),
        }
    }
}

/// One URL a remote source can be fetched from
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Origin {
    url: reqwest::Url,
}

/// Transport an origin is fetched over
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OriginKind {
    Http,
    Ftp,
    File,
}

impl Origin {
    pub fn url(&self) -> &reqwest::Url {
        &self.url
    }

    pub fn kind(&self) -> OriginKind {
        match self.url.scheme() {
            "ftp" => OriginKind::Ftp,
            "file" => OriginKind::File,
            _ => OriginKind::Http,
        }
    }
}

impl FromStr for Origin {
    type Err = ManifestError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let unsupported = || ManifestError::UnsupportedOrigin { url: s.to_string() };
        let url = reqwest::Url::parse(s).map_err(|_| unsupported())?;
        match url.scheme() {
            "http" | "https" | "ftp" | "file" => Ok(Self { url }),
            _ => Err(unsupported()),
        }
    }
}

impl fmt::Display for Origin {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.url)
    }
}

/// One step of a package's build pipeline
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildStep {
    pub name: Option<String>,
    pub action: StepAction,
    /// Working directory relative to the build directory
    pub workdir: Option<String>,
    pub env: BTreeMap<String, String>,
    /// Prefix prepended to every injected variable name
    pub env_prefix: Option<String>,
    pub paths: Vec<PathInjection>,
    /// Auxiliary files written into the build directory before the step runs
    pub scripts: BTreeMap<String, String>,
}

/// What a build step executes
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StepAction {
    /// Shell commands run one after another
    Commands(Vec<String>),
    /// A script body run through an interpreter (or the shell)
    Script {
        body: String,
        interpreter: Option<String>,
    },
}

/// Release directories of a dependency to put on PATH
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PathInjection {
    pub dep: String,
    /// Subdirectories of the dependency's release dir; empty means the dir itself
    pub dirs: Vec<String>,
}

/// A request for a package by name and optional version range
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageRequest {
    pub name: String,
    pub range: Option<VersionReq>,
}

impl PackageRequest {
    pub fn new(name: impl Into<String>, range: Option<VersionReq>) -> Self {
        Self {
            name: name.into(),
            range,
        }
    }

    /// Whether a concrete version satisfies this request
    pub fn matches(&self, version: &Version) -> bool {
        self.range.as_ref().map_or(true, |range| range.matches(version))
    }
}

impl From<&Dependency> for PackageRequest {
    fn from(dep: &Dependency) -> Self {
        Self::new(dep.name.clone(), dep.range.clone())
    }
}

impl FromStr for PackageRequest {
    type Err = ManifestError;

    /// Parse `name` or `name-x.y.z`; an explicit version is an exact match
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        let Some((name, version)) = parse_full_name(s) else {
            return Ok(Self::new(s, None));
        };

        let version = Version::parse(version).map_err(|e| ManifestError::InvalidRequest {
            request: s.to_string(),
            error: e.to_string(),
        })?;
        let exact = VersionReq::parse(&format!("={version}")).map_err(|e| {
            ManifestError::InvalidRequest {
                request: s.to_string(),
                error: e.to_string(),
            }
        })?;

        Ok(Self::new(name, Some(exact)))
    }
}

impl fmt::Display for PackageRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.range {
            Some(range) => write!(f, "{} ({range})", self.name),
            None => write!(f, "{}", self.name),
        }
    }
}

/// Split a full name (`name-x.y.z`) into name and version text
///
/// Only suffixes with three numeric components count as versions, so
/// `name-1.2` is a bare name. Pre-release and build suffixes stay with the
/// version.
pub fn parse_full_name(full_name: &str) -> Option<(&str, &str)> {
    let captures = full_name_pattern().captures(full_name)?;
    Some((captures.get(1)?.as_str(), captures.get(2)?.as_str()))
}

const FULL_NAME_PATTERN: &str = r"^(.+)-((\d+\.){2}\d+.*)$";

fn full_name_pattern() -> &'static Regex {
    static PATTERN: OnceLock<Regex> = OnceLock::new();
    PATTERN.get_or_init(|| Regex::new(FULL_NAME_PATTERN).expect("full name pattern is valid"))
}

impl Package {
    /// Load a package from a manifest file
    pub fn load(path: &Path) -> Result<Self, ManifestError> {
        let content = std::fs::read_to_string(path).map_err(|e| ManifestError::Read {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;
        Self::from_toml(&content, path)
    }

    /// Parse a package from manifest text; `path` is recorded as its origin
    pub fn from_toml(content: &str, path: &Path) -> Result<Self, ManifestError> {
        let raw: RawManifest = toml::from_str(content).map_err(|e| ManifestError::Parse {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;
        raw.into_package(path)
    }

    /// `name-version`
    pub fn full_name(&self) -> String {
        format!("{}-{}", self.name, self.version)
    }

    /// Directory containing the manifest
    pub fn manifest_dir(&self) -> &Path {
        self.manifest.parent().unwrap_or_else(|| Path::new("."))
    }
}

impl fmt::Display for Package {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}-{}", self.name, self.version)
    }
}

impl SourceFile {
    /// On-disk location of the file once fetched
    pub fn location(&self, package: &Package, cache_dir: &Path) -> PathBuf {
        match &self.kind {
            SourceKind::Packaged { subdir } => {
                let base = package.manifest_dir();
                match subdir {
                    Some(subdir) => base.join(subdir).join(&self.file),
                    None => base.join(&self.file),
                }
            }
            SourceKind::Remote { .. } | SourceKind::Scm(_) => cache_dir.join(&self.file),
        }
    }

    /// File whose modification time stands for this source's freshness
    pub fn freshness_marker(&self, package: &Package, cache_dir: &Path) -> PathBuf {
        let location = self.location(package, cache_dir);
        match self.kind {
            SourceKind::Scm(_) => revision_file(&location),
            _ => location,
        }
    }
}

/// Revision record kept next to an SCM checkout
pub fn revision_file(checkout: &Path) -> PathBuf {
    let mut name = checkout.as_os_str().to_os_string();
    name.push(REVISION_SUFFIX);
    PathBuf::from(name)
}

// ============================================
// Raw manifest format
// ============================================

#[derive(Debug, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
struct RawManifest {
    package: Option<RawPackage>,
    #[serde(default)]
    sources: Vec<RawSource>,
    #[serde(default)]
    build: Vec<RawStep>,
}

#[derive(Debug, Deserialize, Serialize)]
struct RawPackage {
    name: Option<String>,
    version: Option<String>,
    description: Option<String>,
    #[serde(default)]
    dependencies: Vec<RawDependency>,
}

#[derive(Debug, Deserialize, Serialize)]
#[serde(untagged)]
enum RawDependency {
    Name(String),
    Ranged(BTreeMap<String, String>),
}

#[derive(Debug, Default, Deserialize, Serialize)]
#[serde(untagged)]
enum OneOrMany {
    One(String),
    Many(Vec<String>),
    #[default]
    #[serde(skip)]
    Empty,
}

impl OneOrMany {
    fn into_vec(self) -> Vec<String> {
        match self {
            Self::One(value) => vec![value],
            Self::Many(values) => values,
            Self::Empty => Vec::new(),
        }
    }
}

#[derive(Debug, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
struct RawSource {
    file: Option<String>,
    digest: Option<String>,
    #[serde(default)]
    origins: OneOrMany,
    #[serde(default)]
    packaged: bool,
    subdir: Option<String>,
    scm: Option<String>,
    repo: Option<String>,
    tag: Option<String>,
    branch: Option<String>,
}

#[derive(Debug, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
struct RawStep {
    name: Option<String>,
    engine: Option<String>,
    commands: Option<OneOrMany>,
    script: Option<String>,
    interpreter: Option<String>,
    workdir: Option<String>,
    #[serde(default)]
    env: BTreeMap<String, String>,
    env_prefix: Option<String>,
    #[serde(default)]
    paths: Vec<RawPath>,
    #[serde(default)]
    scripts: BTreeMap<String, String>,
}

#[derive(Debug, Deserialize, Serialize)]
#[serde(deny_unknown_fields)]
struct RawPath {
    dep: String,
    dir: Option<String>,
    #[serde(default)]
    dirs: Vec<String>,
}

impl RawManifest {
    fn into_package(self, path: &Path) -> Result<Package, ManifestError> {
        let raw = self.package.ok_or_else(|| ManifestError::MissingSection {
            path: path.to_path_buf(),
            section: "package".to_string(),
        })?;

        let name = raw.name.ok_or_else(|| ManifestError::MissingField {
            path: path.to_path_buf(),
            field: "package.name".to_string(),
        })?;
        let version_text = raw.version.ok_or_else(|| ManifestError::MissingField {
            path: path.to_path_buf(),
            field: "package.version".to_string(),
        })?;
        let version =
            Version::parse(&version_text).map_err(|e| ManifestError::InvalidVersion {
                path: path.to_path_buf(),
                version: version_text.clone(),
                error: e.to_string(),
            })?;
        let full_name = format!("{name}-{version}");

        let dependencies = raw
            .dependencies
            .into_iter()
            .map(|dep| dep.into_dependency(&full_name))
            .collect::<Result<Vec<_>, _>>()?;

        let sources = self
            .sources
            .into_iter()
            .map(|source| source.into_source(&full_name))
            .collect::<Result<Vec<_>, _>>()?;

        let steps = self
            .build
            .into_iter()
            .enumerate()
            .map(|(index, step)| step.into_step(&full_name, index + 1))
            .collect::<Result<Vec<_>, _>>()?;

        Ok(Package {
            name,
            version,
            description: raw.description,
            manifest: path.to_path_buf(),
            dependencies,
            sources,
            steps,
        })
    }
}

impl RawDependency {
    fn into_dependency(self, package: &str) -> Result<Dependency, ManifestError> {
        let invalid = |error: String| ManifestError::InvalidDependency {
            package: package.to_string(),
            error,
        };

        match self {
            Self::Name(text) => {
                let request: PackageRequest = text.parse()?;
                Ok(Dependency {
                    name: request.name,
                    range: request.range,
                })
            }
            Self::Ranged(map) => {
                if map.len() != 1 {
                    return Err(invalid(format!(
                        "expected a single 'name = range' entry, found {}",
                        map.len()
                    )));
                }
                let Some((name, range)) = map.into_iter().next() else {
                    return Err(invalid("empty dependency".to_string()));
                };
                let range = VersionReq::parse(&range)
                    .map_err(|e| invalid(format!("'{name}' range '{range}': {e}")))?;
                Ok(Dependency {
                    name,
                    range: Some(range),
                })
            }
        }
    }
}

impl RawSource {
    fn into_source(self, package: &str) -> Result<SourceFile, ManifestError> {
        let label = self
            .file
            .clone()
            .or_else(|| self.repo.clone())
            .unwrap_or_default();
        let invalid = |error: &str| ManifestError::InvalidSource {
            package: package.to_string(),
            file: label.clone(),
            error: error.to_string(),
        };

        let digest = self.digest.as_deref().map(Digest::from_str).transpose()?;
        let origins = self.origins.into_vec();

        if let Some(scm) = self.scm {
            if scm != "git" {
                return Err(invalid(&format!("unsupported scm '{scm}'")));
            }
            let repo = self.repo.ok_or_else(|| invalid("scm source needs 'repo'"))?;
            let reference = match (self.tag, self.branch) {
                (Some(tag), None) => ScmRef::Tag(tag),
                (None, Some(branch)) => ScmRef::Branch(branch),
                (None, None) => ScmRef::Branch("master".to_string()),
                (Some(_), Some(_)) => return Err(invalid("give either 'tag' or 'branch'")),
            };
            let file = match self.file {
                Some(file) => file,
                None => checkout_name(&repo).ok_or_else(|| invalid("cannot derive 'file'"))?,
            };
            return Ok(SourceFile {
                file,
                digest: None,
                kind: SourceKind::Scm(ScmSource { repo, reference }),
            });
        }

        let file = self.file.ok_or_else(|| invalid("missing 'file'"))?;

        if self.packaged {
            return Ok(SourceFile {
                file,
                digest,
                kind: SourceKind::Packaged {
                    subdir: self.subdir,
                },
            });
        }

        if origins.is_empty() {
            return Err(invalid("no origins"));
        }
        let origins = origins
            .iter()
            .map(|origin| origin.parse())
            .collect::<Result<Vec<Origin>, _>>()?;

        Ok(SourceFile {
            file,
            digest,
            kind: SourceKind::Remote { origins },
        })
    }
}

/// Checkout directory derived from a repository URL (`.../tools.git` -> `tools`)
fn checkout_name(repo: &str) -> Option<String> {
    let last = repo.trim_end_matches('/').rsplit(['/', ':']).next()?;
    let name = last.strip_suffix(".git").unwrap_or(last);
    (!name.is_empty()).then(|| name.to_string())
}

impl RawStep {
    fn into_step(self, package: &str, step: usize) -> Result<BuildStep, ManifestError> {
        let invalid = |error: String| ManifestError::InvalidStep {
            package: package.to_string(),
            step,
            error,
        };

        let engine = self.engine.as_deref().unwrap_or(DEFAULT_ENGINE);
        if engine != DEFAULT_ENGINE {
            return Err(invalid(format!("unknown engine '{engine}'")));
        }

        let action = match (self.commands, self.script) {
            (Some(commands), None) => StepAction::Commands(commands.into_vec()),
            (None, Some(body)) => StepAction::Script {
                body,
                interpreter: self.interpreter,
            },
            (None, None) => return Err(invalid("needs 'commands' or 'script'".to_string())),
            (Some(_), Some(_)) => {
                return Err(invalid("give either 'commands' or 'script'".to_string()))
            }
        };

        let paths = self
            .paths
            .into_iter()
            .map(|path| {
                let mut dirs = path.dirs;
                if let Some(dir) = path.dir {
                    dirs.insert(0, dir);
                }
                PathInjection {
                    dep: path.dep,
                    dirs,
                }
            })
            .collect();

        Ok(BuildStep {
            name: self.name,
            action,
            workdir: self.workdir,
            env: self.env,
            env_prefix: self.env_prefix,
            paths,
            scripts: self.scripts,
        })
    }
}
