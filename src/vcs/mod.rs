//! # Version Control Providers
//!
//! Everything envdeploy does with git goes through the [`Vcs`] trait. Two
//! backends implement it and must be indistinguishable from the outside:
//!
//! - [`ShellGit`] runs the system `git` binary, which picks up SSH agents,
//!   credential helpers and `~/.gitconfig` for free.
//! - [`NativeGit`] links libgit2 through the `git2` crate and never spawns a
//!   process.
//!
//! [`GitProvider`] is the closed set of backends selectable from
//! configuration. Components never look up a process-wide provider; they are
//! handed an `Arc<dyn Vcs>` at construction, which is also how tests swap in
//! an in-memory fake.
//!
//! ## Repository kinds
//!
//! Methods taking `git_dir` operate on a git directory: either a bare mirror
//! in the cache or the `.git` directory of a working tree. Methods taking
//! `worktree` operate on a checked-out directory.
//!
//! ## Errors
//!
//! `resolve`, `head` and `origin` return `Ok(None)` when the thing asked for
//! does not exist. Transport and execution failures are always `Err` and
//! carry the backend's message verbatim. `blob_at` reports a missing file as
//! [`Error::BlobNotFound`](crate::error::Error::BlobNotFound).

mod native;
mod shell;

use std::fmt;
use std::path::Path;
use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::error::Result;

pub use native::NativeGit;
pub use shell::ShellGit;

/// Operations every version-control backend provides.
pub trait Vcs: Send + Sync + fmt::Debug {
    /// Short backend name used in log messages.
    fn name(&self) -> &'static str;

    /// Create a bare mirror of `remote` at `dest`.
    fn clone_mirror(&self, remote: &str, dest: &Path) -> Result<()>;

    /// Refresh a mirror from its origin, pruning refs deleted upstream.
    fn fetch(&self, git_dir: &Path) -> Result<()>;

    /// Dereference a branch, tag or SHA-ish to a full commit id.
    fn resolve(&self, git_dir: &Path, reference: &str) -> Result<Option<String>>;

    /// Local branch names without the `refs/heads/` prefix, sorted.
    fn branches(&self, git_dir: &Path) -> Result<Vec<String>>;

    /// Tag names without the `refs/tags/` prefix, sorted.
    fn tags(&self, git_dir: &Path) -> Result<Vec<String>>;

    /// Create a working tree at `dest` whose object database borrows from
    /// `cache_dir` through alternates. `origin` is set to `remote`. No files
    /// are checked out.
    fn clone_with_alternates(&self, remote: &str, cache_dir: &Path, dest: &Path) -> Result<()>;

    /// Commit currently checked out, or `None` on an unborn HEAD.
    fn head(&self, worktree: &Path) -> Result<Option<String>>;

    /// URL of the `origin` remote, or `None` when it is not configured.
    fn origin(&self, worktree: &Path) -> Result<Option<String>>;

    /// True when tracked files have uncommitted modifications.
    fn is_dirty(&self, worktree: &Path) -> Result<bool>;

    /// Check out `commit` as a detached HEAD. With `force`, local changes to
    /// tracked files are discarded.
    fn checkout(&self, worktree: &Path, commit: &str, force: bool) -> Result<()>;

    /// Remove untracked files and directories, skipping paths matching
    /// `excludes`. Without `force` nothing is deleted. Returns the affected
    /// paths relative to the working tree.
    fn clean(&self, worktree: &Path, force: bool, excludes: &[String]) -> Result<Vec<String>>;

    /// Read one versioned file without a checkout.
    fn blob_at(&self, git_dir: &Path, rev: &str, path: &str) -> Result<Vec<u8>>;
}

/// Backend selection as it appears in configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum ProviderKind {
    /// Shell out to the `git` binary
    #[default]
    #[serde(alias = "shell")]
    Shellgit,
    /// Use libgit2 in-process
    #[serde(alias = "rugged", alias = "git2")]
    Native,
}

impl fmt::Display for ProviderKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProviderKind::Shellgit => write!(f, "shellgit"),
            ProviderKind::Native => write!(f, "native"),
        }
    }
}

/// The closed set of production backends.
#[derive(Debug, Clone)]
pub enum GitProvider {
    Shell(ShellGit),
    Native(NativeGit),
}

impl GitProvider {
    pub fn new(kind: ProviderKind) -> Self {
        match kind {
            ProviderKind::Shellgit => GitProvider::Shell(ShellGit::new()),
            ProviderKind::Native => GitProvider::Native(NativeGit::new()),
        }
    }

    /// Build a shareable handle for injection into caches and modules.
    pub fn handle(kind: ProviderKind) -> Arc<dyn Vcs> {
        Arc::new(Self::new(kind))
    }

    fn backend(&self) -> &dyn Vcs {
        match self {
            GitProvider::Shell(git) => git,
            GitProvider::Native(git) => git,
        }
    }
}

impl Vcs for GitProvider {
    fn name(&self) -> &'static str {
        self.backend().name()
    }

    fn clone_mirror(&self, remote: &str, dest: &Path) -> Result<()> {
        self.backend().clone_mirror(remote, dest)
    }

    fn fetch(&self, git_dir: &Path) -> Result<()> {
        self.backend().fetch(git_dir)
    }

    fn resolve(&self, git_dir: &Path, reference: &str) -> Result<Option<String>> {
        self.backend().resolve(git_dir, reference)
    }

    fn branches(&self, git_dir: &Path) -> Result<Vec<String>> {
        self.backend().branches(git_dir)
    }

    fn tags(&self, git_dir: &Path) -> Result<Vec<String>> {
        self.backend().tags(git_dir)
    }

    fn clone_with_alternates(&self, remote: &str, cache_dir: &Path, dest: &Path) -> Result<()> {
        self.backend().clone_with_alternates(remote, cache_dir, dest)
    }

    fn head(&self, worktree: &Path) -> Result<Option<String>> {
        self.backend().head(worktree)
    }

    fn origin(&self, worktree: &Path) -> Result<Option<String>> {
        self.backend().origin(worktree)
    }

    fn is_dirty(&self, worktree: &Path) -> Result<bool> {
        self.backend().is_dirty(worktree)
    }

    fn checkout(&self, worktree: &Path, commit: &str, force: bool) -> Result<()> {
        self.backend().checkout(worktree, commit, force)
    }

    fn clean(&self, worktree: &Path, force: bool, excludes: &[String]) -> Result<Vec<String>> {
        self.backend().clean(worktree, force, excludes)
    }

    fn blob_at(&self, git_dir: &Path, rev: &str, path: &str) -> Result<Vec<u8>> {
        self.backend().blob_at(git_dir, rev, path)
    }
}

/// Write `objects/info/alternates` so a new repository borrows objects from
/// a cache mirror. Shared by both backends.
pub(crate) fn write_alternates(git_dir: &Path, cache_dir: &Path) -> Result<()> {
    let info = git_dir.join("objects").join("info");
    std::fs::create_dir_all(&info)?;
    let objects = cache_dir.join("objects");
    std::fs::write(
        info.join("alternates"),
        format!("{}\n", objects.to_string_lossy()),
    )?;
    Ok(())
}

/// True for a full or abbreviated hexadecimal object id.
pub fn looks_like_sha(reference: &str) -> bool {
    (7..=40).contains(&reference.len()) && reference.chars().all(|c| c.is_ascii_hexdigit())
}

#[cfg(test)]
pub(crate) mod fake;
