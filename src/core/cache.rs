//! Source file cache
//!
//! One on-disk store for every package's source files. Each file is
//! validated in place and, when missing or wrong, fetched from its origins
//! in declaration order until one stream completes and verifies. SCM
//! sources are checked out into the cache with their revision recorded
//! next to the working tree. Packaged files live beside their manifest and
//! are never fetched.

use futures::StreamExt;
use serde::Serialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::fs::File;
use tokio::io::AsyncWriteExt;

use crate::core::package::{revision_file, Package, ScmSource, SourceFile, SourceKind};
use crate::error::DownloadError;
use crate::infra::download::{Downloader, Downloaders, Fetched};
use crate::infra::git::{GitSync, SourceControl};

/// Progress of one cached file
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "event", rename_all = "kebab-case")]
pub enum SourceEvent {
    /// The job was bound to a worker
    Start,
    /// The file on disk is being checked
    Validating,
    /// Result of the check before any download
    Validated { valid: bool },
    /// An origin is being tried
    Download { url: String },
    /// Bytes written so far for the current origin
    Progress { downloaded: u64, total: Option<u64> },
    /// An origin failed; the next one is tried
    Failure { url: String, error: String },
    /// The cache is done with the file
    Complete { error: Option<String> },
    /// The job released its worker
    Done { error: Option<String> },
}

/// Multi-origin, digest-verified file store
pub struct FileCache {
    base: PathBuf,
    downloader: Box<dyn Downloader>,
    scm: Arc<dyn SourceControl>,
}

impl std::fmt::Debug for FileCache {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("FileCache").field("base", &self.base).finish()
    }
}

impl FileCache {
    /// Cache rooted at `base` with the default downloaders and git
    pub fn new(base: impl Into<PathBuf>) -> Self {
        Self {
            base: base.into(),
            downloader: Box::new(Downloaders::new()),
            scm: Arc::new(GitSync::new()),
        }
    }

    /// Replace the origin downloader
    #[must_use]
    pub fn with_downloader(mut self, downloader: impl Downloader + 'static) -> Self {
        self.downloader = Box::new(downloader);
        self
    }

    /// Replace the source control collaborator
    #[must_use]
    pub fn with_scm(mut self, scm: impl SourceControl + 'static) -> Self {
        self.scm = Arc::new(scm);
        self
    }

    pub fn base(&self) -> &Path {
        &self.base
    }

    /// Where a source file lives once fetched
    pub fn path_of(&self, package: &Package, source: &SourceFile) -> PathBuf {
        source.location(package, &self.base)
    }

    /// Make sure a source file is present and valid, fetching it if needed
    ///
    /// Emits events for each stage and always finishes with `Complete`.
    pub async fn fetch(
        &self,
        package: &Package,
        source: &SourceFile,
        events: &mut dyn FnMut(SourceEvent),
    ) -> Result<(), DownloadError> {
        let result = match &source.kind {
            SourceKind::Packaged { .. } => {
                events(SourceEvent::Validating);
                events(SourceEvent::Validated { valid: true });
                Ok(())
            }
            SourceKind::Remote { .. } => self.fetch_remote(package, source, events).await,
            SourceKind::Scm(scm) => self.fetch_scm(source, scm, events).await,
        };

        events(SourceEvent::Complete {
            error: result.as_ref().err().map(ToString::to_string),
        });
        result
    }

    /// Check a remote file on disk
    ///
    /// A missing file or a non-file is invalid. With a digest the content
    /// must match; without one the file's presence is trusted.
    pub async fn validate(&self, path: &Path, source: &SourceFile) -> Result<bool, DownloadError> {
        match tokio::fs::metadata(path).await {
            Ok(meta) if meta.is_file() => {}
            Ok(_) => return Ok(false),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => return Ok(false),
            Err(e) => {
                return Err(DownloadError::Io {
                    path: path.to_path_buf(),
                    error: e.to_string(),
                })
            }
        }

        match &source.digest {
            Some(digest) => digest.verify(path).await,
            None => Ok(true),
        }
    }

    async fn fetch_remote(
        &self,
        package: &Package,
        source: &SourceFile,
        events: &mut dyn FnMut(SourceEvent),
    ) -> Result<(), DownloadError> {
        let SourceKind::Remote { origins } = &source.kind else {
            return Ok(());
        };
        let path = self.path_of(package, source);

        events(SourceEvent::Validating);
        let valid = self.validate(&path, source).await?;
        events(SourceEvent::Validated { valid });
        if valid {
            return Ok(());
        }

        if let Some(parent) = path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| DownloadError::Io {
                    path: parent.to_path_buf(),
                    error: e.to_string(),
                })?;
        }

        let mut last_error = None;
        for origin in origins {
            let url = origin.to_string();
            events(SourceEvent::Download { url: url.clone() });

            let attempt = match self.downloader.start(origin).await {
                Ok(fetched) => write_stream(&path, fetched, events).await,
                Err(e) => Err(e),
            };

            match attempt {
                Ok(()) => {
                    last_error = None;
                    break;
                }
                Err(e) => {
                    tracing::warn!("Download of {} from {url} failed: {e}", source.file);
                    events(SourceEvent::Failure {
                        url,
                        error: e.to_string(),
                    });
                    last_error = Some(e);
                }
            }
        }

        if let Some(last) = last_error {
            return Err(DownloadError::OriginsExhausted {
                file: source.file.clone(),
                last: last.to_string(),
            });
        }

        if !self.validate(&path, source).await? {
            return Err(DownloadError::Corrupted {
                file: source.file.clone(),
            });
        }
        Ok(())
    }

    async fn fetch_scm(
        &self,
        source: &SourceFile,
        scm: &ScmSource,
        events: &mut dyn FnMut(SourceEvent),
    ) -> Result<(), DownloadError> {
        let checkout = self.base.join(&source.file);
        let revision_path = revision_file(&checkout);

        events(SourceEvent::Validating);
        let recorded = tokio::fs::read_to_string(&revision_path)
            .await
            .ok()
            .map(|revision| revision.trim().to_string());
        let valid = match &recorded {
            Some(revision) if checkout.is_dir() => {
                let scm_impl = Arc::clone(&self.scm);
                let (scm_source, dir, revision) = (scm.clone(), checkout.clone(), revision.clone());
                tokio::task::spawn_blocking(move || scm_impl.validate(&scm_source, &dir, &revision))
                    .await
                    .unwrap_or(false)
            }
            _ => false,
        };
        events(SourceEvent::Validated { valid });
        if valid {
            return Ok(());
        }

        events(SourceEvent::Download {
            url: scm.repo.clone(),
        });
        let revision = match self.sync(scm, &checkout).await {
            Ok(revision) => revision,
            Err(first) => {
                events(SourceEvent::Failure {
                    url: scm.repo.clone(),
                    error: first.to_string(),
                });
                // a half-written checkout can make gix refuse the clone
                let _ = tokio::fs::remove_dir_all(&checkout).await;
                events(SourceEvent::Download {
                    url: scm.repo.clone(),
                });
                self.sync(scm, &checkout).await?
            }
        };

        if recorded.as_deref() != Some(revision.as_str()) {
            tokio::fs::write(&revision_path, format!("{revision}\n"))
                .await
                .map_err(|e| DownloadError::Io {
                    path: revision_path.clone(),
                    error: e.to_string(),
                })?;
        }
        Ok(())
    }

    async fn sync(&self, scm: &ScmSource, checkout: &Path) -> Result<String, DownloadError> {
        let scm_impl = Arc::clone(&self.scm);
        let (source, dir) = (scm.clone(), checkout.to_path_buf());
        let scm_error = |error: String| DownloadError::Scm {
            file: checkout.display().to_string(),
            repo: scm.repo.clone(),
            error,
        };

        tokio::task::spawn_blocking(move || scm_impl.sync(&source, &dir))
            .await
            .map_err(|e| scm_error(e.to_string()))?
            .map_err(|e| scm_error(e.to_string()))
    }
}

/// Stream one download to `path`, truncating any previous content
async fn write_stream(
    path: &Path,
    fetched: Fetched,
    events: &mut dyn FnMut(SourceEvent),
) -> Result<(), DownloadError> {
    let io_error = |e: std::io::Error| DownloadError::Io {
        path: path.to_path_buf(),
        error: e.to_string(),
    };

    let mut file = File::create(path).await.map_err(io_error)?;
    let Fetched { mut stream, size } = fetched;
    let mut downloaded: u64 = 0;
    events(SourceEvent::Progress {
        downloaded,
        total: size,
    });

    while let Some(chunk) = stream.next().await {
        let chunk = chunk?;
        file.write_all(&chunk).await.map_err(io_error)?;
        downloaded += chunk.len() as u64;
        events(SourceEvent::Progress {
            downloaded,
            total: size,
        });
    }

    file.flush().await.map_err(io_error)?;
    Ok(())
}
