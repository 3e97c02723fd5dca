//! Git operations
//!
//! Checks out SCM sources using the gix crate. A checkout is identified by
//! the commit it was synced to; the cache stores that revision next to the
//! working tree and asks [`SourceControl::validate`] whether it still holds.

use gix::remote::fetch::Shallow;
use std::num::NonZeroU32;
use std::path::{Path, PathBuf};
use thiserror::Error;

use crate::core::package::{ScmRef, ScmSource};

/// Git operation errors
#[derive(Error, Debug)]
pub enum GitError {
    /// Failed to clone repository
    #[error("Failed to clone '{url}': {error}")]
    CloneFailed { url: String, error: String },

    /// Ref not found
    #[error("Ref '{reference}' not found in repository '{repo}'")]
    RefNotFound { repo: String, reference: String },

    /// Failed to resolve ref to SHA
    #[error("Failed to resolve ref '{reference}' to SHA: {error}")]
    ResolveFailed { reference: String, error: String },

    /// IO error
    #[error("IO error for '{path}': {error}")]
    IoError { path: PathBuf, error: String },

    /// Invalid repository
    #[error("Invalid repository at '{path}': {error}")]
    InvalidRepository { path: PathBuf, error: String },
}

/// Source control collaborator used by the file cache
pub trait SourceControl: Send + Sync {
    /// Bring `checkout` to the declared reference, returning the commit id
    fn sync(&self, source: &ScmSource, checkout: &Path) -> Result<String, GitError>;

    /// Whether `checkout` still matches the recorded revision
    fn validate(&self, source: &ScmSource, checkout: &Path, revision: &str) -> bool;
}

/// Git checkouts through gix
#[derive(Debug, Clone, Copy, Default)]
pub struct GitSync;

impl GitSync {
    pub fn new() -> Self {
        Self
    }

    /// Shallow-clone `url` at `reference` into `dest`
    fn clone_into(&self, url: &str, reference: &ScmRef, dest: &Path) -> Result<(), GitError> {
        let clone_failed = |error: String| GitError::CloneFailed {
            url: url.to_string(),
            error,
        };

        let name = match reference {
            ScmRef::Tag(name) | ScmRef::Branch(name) => name.as_str(),
        };

        let mut prepare = gix::prepare_clone(url, dest)
            .map_err(|e| clone_failed(e.to_string()))?
            .with_shallow(Shallow::DepthAtRemote(NonZeroU32::MIN))
            .with_ref_name(Some(name))
            .map_err(|e| clone_failed(e.to_string()))?;

        let (mut checkout, _outcome) = prepare
            .fetch_then_checkout(gix::progress::Discard, &gix::interrupt::IS_INTERRUPTED)
            .map_err(|e| clone_failed(e.to_string()))?;

        checkout
            .main_worktree(gix::progress::Discard, &gix::interrupt::IS_INTERRUPTED)
            .map_err(|e| clone_failed(e.to_string()))?;

        Ok(())
    }

    /// Commit currently checked out at `path`
    pub fn head_revision(&self, path: &Path) -> Result<String, GitError> {
        let repo = gix::open(path).map_err(|e| GitError::InvalidRepository {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;

        let id = repo.head_id().map_err(|e| GitError::ResolveFailed {
            reference: "HEAD".to_string(),
            error: e.to_string(),
        })?;
        Ok(id.to_hex().to_string())
    }

    /// Commit a tag points at in the checkout at `path`
    pub fn tag_revision(&self, path: &Path, tag: &str) -> Result<String, GitError> {
        let repo = gix::open(path).map_err(|e| GitError::InvalidRepository {
            path: path.to_path_buf(),
            error: e.to_string(),
        })?;

        let mut reference = repo
            .find_reference(&format!("refs/tags/{tag}"))
            .map_err(|_| GitError::RefNotFound {
                repo: path.display().to_string(),
                reference: ScmRef::Tag(tag.to_string()).to_string(),
            })?;
        let commit = reference
            .peel_to_commit()
            .map_err(|e| GitError::ResolveFailed {
                reference: ScmRef::Tag(tag.to_string()).to_string(),
                error: e.to_string(),
            })?;

        Ok(commit.id().to_hex().to_string())
    }
}

impl SourceControl for GitSync {
    fn sync(&self, source: &ScmSource, checkout: &Path) -> Result<String, GitError> {
        // gix clones into empty directories only, so a stale tree is replaced
        if checkout.exists() {
            std::fs::remove_dir_all(checkout).map_err(|e| GitError::IoError {
                path: checkout.to_path_buf(),
                error: e.to_string(),
            })?;
        }
        if let Some(parent) = checkout.parent() {
            std::fs::create_dir_all(parent).map_err(|e| GitError::IoError {
                path: parent.to_path_buf(),
                error: e.to_string(),
            })?;
        }

        tracing::info!("Cloning {} ({})", source.repo, source.reference);
        self.clone_into(&source.repo, &source.reference, checkout)?;
        self.head_revision(checkout)
    }

    fn validate(&self, source: &ScmSource, checkout: &Path, revision: &str) -> bool {
        match &source.reference {
            // branches move, so they are synced on every run
            ScmRef::Branch(_) => false,
            ScmRef::Tag(tag) => {
                let head = self.head_revision(checkout);
                let tagged = self.tag_revision(checkout, tag);
                matches!((head, tagged), (Ok(head), Ok(tagged)) if head == revision && tagged == revision)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn tag_source(url: &str, tag: &str) -> ScmSource {
        ScmSource {
            repo: url.to_string(),
            reference: ScmRef::Tag(tag.to_string()),
        }
    }

    // ============================================
    // Unit Tests - Validation
    // ============================================

    #[test]
    fn test_branch_is_never_valid() {
        let temp = TempDir::new().unwrap();
        let source = ScmSource {
            repo: "https://example.com/repo.git".to_string(),
            reference: ScmRef::Branch("main".to_string()),
        };
        assert!(!GitSync::new().validate(&source, temp.path(), "abc"));
    }

    #[test]
    fn test_missing_checkout_is_invalid() {
        let temp = TempDir::new().unwrap();
        let source = tag_source("https://example.com/repo.git", "v1.0");
        assert!(!GitSync::new().validate(&source, &temp.path().join("absent"), "abc"));
    }

    #[test]
    fn test_head_revision_of_non_repository() {
        let temp = TempDir::new().unwrap();
        let err = GitSync::new().head_revision(temp.path()).unwrap_err();
        assert!(matches!(err, GitError::InvalidRepository { .. }));
    }

    // ============================================
    // Integration Tests - Clone operations
    // These tests require network access and will clone real repositories
    // ============================================

    #[test]
    #[ignore = "requires network access - run with --ignored"]
    fn test_sync_tag_records_revision() {
        let temp = TempDir::new().unwrap();
        let checkout = temp.path().join("gitoxide");
        let source = tag_source("https://github.com/Byron/gitoxide.git", "v0.1.0");
        let git = GitSync::new();

        let revision = git.sync(&source, &checkout).unwrap();
        assert_eq!(revision.len(), 40);
        assert!(git.validate(&source, &checkout, &revision));
        assert!(!git.validate(&source, &checkout, "0000000000000000000000000000000000000000"));
    }

    #[test]
    fn test_sync_invalid_url() {
        let temp = TempDir::new().unwrap();
        let source = tag_source(
            "https://invalid-url-that-does-not-exist.example.com/repo.git",
            "v1.0",
        );

        let result = GitSync::new().sync(&source, &temp.path().join("invalid"));
        match result.unwrap_err() {
            GitError::CloneFailed { url, .. } => assert!(url.contains("invalid-url")),
            e => panic!("Expected CloneFailed error, got: {e:?}"),
        }
    }
}
