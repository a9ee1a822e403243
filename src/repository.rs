//! # Working Repositories
//!
//! A [`WorkingRepository`] is a checked-out tree whose `.git` directory
//! borrows its objects from a [`GitCache`] mirror through alternates. Cloning
//! a new tree therefore costs a `git init` and a checkout, never a second
//! copy of the history.
//!
//! ## Status machine
//!
//! [`WorkingRepository::status`] evaluates these predicates in order and the
//! first one that fails decides the state:
//!
//! 1. the path exists, otherwise `Absent`
//! 2. a `.git` entry exists, otherwise `Uninitialized`
//! 3. `.git` is a directory and `origin` matches the remote, otherwise
//!    `Mismatched`
//! 4. tracked files are unmodified, otherwise `Dirty`
//! 5. `HEAD` equals the mirror's resolution of the desired ref, and for
//!    branches the mirror was synced this run, otherwise `Outdated`
//!
//! Dirty is checked before outdated so local edits are never overwritten
//! just because the tree is also behind.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::{debug, info, warn};

use crate::cache::{GitCache, RefType};
use crate::error::{Error, Result};
use crate::vcs::Vcs;

/// Convergence state of a working tree.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RepoStatus {
    Absent,
    Uninitialized,
    Mismatched,
    Dirty,
    Outdated,
    InSync,
}

impl fmt::Display for RepoStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            RepoStatus::Absent => "absent",
            RepoStatus::Uninitialized => "uninitialized",
            RepoStatus::Mismatched => "mismatched",
            RepoStatus::Dirty => "dirty",
            RepoStatus::Outdated => "outdated",
            RepoStatus::InSync => "insync",
        };
        write!(f, "{}", name)
    }
}

#[derive(Debug)]
pub struct WorkingRepository {
    path: PathBuf,
    remote: String,
    cache: Arc<GitCache>,
    vcs: Arc<dyn Vcs>,
    expect_dirty: bool,
}

impl WorkingRepository {
    pub fn new(path: impl Into<PathBuf>, cache: Arc<GitCache>, vcs: Arc<dyn Vcs>) -> Self {
        Self {
            path: path.into(),
            remote: cache.remote().to_string(),
            cache,
            vcs,
            expect_dirty: false,
        }
    }

    /// Silence the dirty-tree warning for trees that are known to carry
    /// generated files. Does not change whether they are overwritten.
    pub fn expect_dirty(mut self, expect_dirty: bool) -> Self {
        self.expect_dirty = expect_dirty;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    pub fn remote(&self) -> &str {
        &self.remote
    }

    pub fn cache(&self) -> &Arc<GitCache> {
        &self.cache
    }

    /// Commit currently checked out, if any.
    pub fn head(&self) -> Result<Option<String>> {
        if !self.path.join(".git").is_dir() {
            return Ok(None);
        }
        self.vcs.head(&self.path)
    }

    /// Whether the mirror must be refreshed before `reference` can be trusted.
    ///
    /// Only a reference already known to be a tag or commit in an existing
    /// mirror skips the fetch.
    pub fn sync_cache_needed(&self, reference: &str) -> Result<bool> {
        if !self.cache.exists() {
            return Ok(true);
        }
        Ok(!self.cache.ref_type(reference)?.is_immutable())
    }

    /// Refresh the mirror if needed and resolve `reference` to a commit.
    pub fn resolve(&self, reference: &str) -> Result<String> {
        if self.sync_cache_needed(reference)? {
            self.cache.sync()?;
        }
        self.cache
            .resolve(reference)?
            .ok_or_else(|| Error::RefNotFound {
                target: self.remote.clone(),
                reference: reference.to_string(),
            })
    }

    pub fn status(&self, desired_ref: &str) -> Result<RepoStatus> {
        if !self.path.exists() {
            return Ok(RepoStatus::Absent);
        }

        let git_dir = self.path.join(".git");
        if !git_dir.exists() {
            return Ok(RepoStatus::Uninitialized);
        }
        if !git_dir.is_dir() {
            return Ok(RepoStatus::Mismatched);
        }

        match self.vcs.origin(&self.path) {
            Ok(Some(origin)) if origin == self.remote => {}
            Ok(origin) => {
                debug!(
                    "{} has origin {:?}, expected {}",
                    self.path.display(),
                    origin,
                    self.remote
                );
                return Ok(RepoStatus::Mismatched);
            }
            Err(e) => {
                debug!("Cannot read origin of {}: {}", self.path.display(), e);
                return Ok(RepoStatus::Mismatched);
            }
        }

        if self.vcs.is_dirty(&self.path)? {
            return Ok(RepoStatus::Dirty);
        }

        let head = self.vcs.head(&self.path)?;
        let desired = self.cache.resolve(desired_ref)?;
        if head.is_none() || head != desired {
            return Ok(RepoStatus::Outdated);
        }

        // A branch tip may have moved upstream since the last fetch
        if !self.cache.is_synced() && self.cache.ref_type(desired_ref)? == RefType::Branch {
            return Ok(RepoStatus::Outdated);
        }

        Ok(RepoStatus::InSync)
    }

    /// Converge the tree onto `desired_ref`. Returns true when anything on
    /// disk changed.
    pub fn sync(&self, desired_ref: &str, force: bool) -> Result<bool> {
        let status = self.status(desired_ref)?;
        debug!("{} is {}", self.path.display(), status);

        match status {
            RepoStatus::InSync => Ok(false),
            RepoStatus::Absent | RepoStatus::Uninitialized => {
                let commit = self.resolve(desired_ref)?;
                self.clone_fresh()?;
                self.checkout(&commit, true)?;
                Ok(true)
            }
            RepoStatus::Mismatched => {
                let commit = self.resolve(desired_ref)?;
                warn!(
                    "Replacing {}: existing repository does not match {}",
                    self.path.display(),
                    self.remote
                );
                fs::remove_dir_all(&self.path)?;
                self.clone_fresh()?;
                self.checkout(&commit, true)?;
                Ok(true)
            }
            RepoStatus::Outdated => {
                let commit = self.resolve(desired_ref)?;
                if self.vcs.head(&self.path)?.as_deref() == Some(commit.as_str()) {
                    return Ok(false);
                }
                self.checkout(&commit, true)?;
                Ok(true)
            }
            RepoStatus::Dirty => {
                if force {
                    let commit = self.resolve(desired_ref)?;
                    warn!(
                        "Overwriting local modifications to {}",
                        self.path.display()
                    );
                    self.checkout(&commit, true)?;
                    Ok(true)
                } else {
                    if !self.expect_dirty {
                        warn!(
                            "Skipping {} due to local modifications",
                            self.path.display()
                        );
                    }
                    Ok(false)
                }
            }
        }
    }

    fn clone_fresh(&self) -> Result<()> {
        info!("Cloning {} into {}", self.remote, self.path.display());
        self.vcs
            .clone_with_alternates(&self.remote, self.cache.path(), &self.path)
    }

    fn checkout(&self, commit: &str, force: bool) -> Result<()> {
        info!("Checking out {} in {}", commit, self.path.display());
        self.vcs.checkout(&self.path, commit, force)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::CacheRegistry;
    use crate::vcs::fake::FakeVcs;
    use std::sync::atomic::Ordering;
    use tempfile::TempDir;

    const REMOTE: &str = "https://git.example.com/puppet/control.git";
    const SHA_A: &str = "aaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaaa";
    const SHA_B: &str = "bbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbbb";

    struct Fixture {
        temp: TempDir,
        fake: Arc<FakeVcs>,
        registry: CacheRegistry,
    }

    impl Fixture {
        fn new() -> Self {
            let temp = TempDir::new().unwrap();
            let fake = Arc::new(FakeVcs::new());
            fake.add_branch(REMOTE, "production", SHA_A);
            fake.add_tag(REMOTE, "v1.0.0", SHA_B);
            let vcs: Arc<dyn Vcs> = fake.clone();
            let registry = CacheRegistry::new(temp.path().join("cache"), vcs);
            Self {
                temp,
                fake,
                registry,
            }
        }

        fn repo(&self) -> WorkingRepository {
            let cache = self.registry.generate(REMOTE).unwrap();
            let vcs: Arc<dyn Vcs> = self.fake.clone();
            WorkingRepository::new(self.temp.path().join("envs/production"), cache, vcs)
        }
    }

    #[test]
    fn test_absent_then_insync() {
        let fx = Fixture::new();
        let repo = fx.repo();
        assert_eq!(repo.status("production").unwrap(), RepoStatus::Absent);

        assert!(repo.sync("production", false).unwrap());
        assert_eq!(repo.head().unwrap().as_deref(), Some(SHA_A));
        assert_eq!(repo.status("production").unwrap(), RepoStatus::InSync);
        assert!(repo.path().join(".git/objects/info/alternates").is_file());
    }

    #[test]
    fn test_second_sync_reports_no_change() {
        let fx = Fixture::new();
        let repo = fx.repo();
        assert!(repo.sync("production", false).unwrap());
        assert!(!repo.sync("production", false).unwrap());
        assert_eq!(fx.fake.clone_mirror_calls.load(Ordering::SeqCst), 1);
        assert_eq!(fx.fake.clone_calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_uninitialized_directory() {
        let fx = Fixture::new();
        let repo = fx.repo();
        fs::create_dir_all(repo.path()).unwrap();
        assert_eq!(repo.status("production").unwrap(), RepoStatus::Uninitialized);
        assert!(repo.sync("production", false).unwrap());
        assert_eq!(repo.status("production").unwrap(), RepoStatus::InSync);
    }

    #[test]
    fn test_git_file_is_mismatched() {
        let fx = Fixture::new();
        let repo = fx.repo();
        fs::create_dir_all(repo.path()).unwrap();
        fs::write(repo.path().join(".git"), "gitdir: elsewhere").unwrap();
        assert_eq!(repo.status("production").unwrap(), RepoStatus::Mismatched);
    }

    #[test]
    fn test_wrong_origin_is_replaced() {
        let fx = Fixture::new();
        let repo = fx.repo();
        repo.sync("production", false).unwrap();
        fs::write(repo.path().join("leftover"), "x").unwrap();
        fx.fake.set_origin(repo.path(), "https://git.example.com/other.git");

        assert_eq!(repo.status("production").unwrap(), RepoStatus::Mismatched);
        assert!(repo.sync("production", false).unwrap());
        assert!(!repo.path().join("leftover").exists());
        assert_eq!(repo.status("production").unwrap(), RepoStatus::InSync);
    }

    #[test]
    fn test_dirty_takes_precedence_over_outdated() {
        let fx = Fixture::new();
        let repo = fx.repo();
        repo.sync("production", false).unwrap();
        fx.fake.set_dirty(repo.path(), true);

        // HEAD is SHA_A but the tag points at SHA_B
        assert_eq!(repo.status("v1.0.0").unwrap(), RepoStatus::Dirty);
    }

    #[test]
    fn test_outdated_checks_out_in_place() {
        let fx = Fixture::new();
        let repo = fx.repo();
        repo.sync("production", false).unwrap();

        assert_eq!(repo.status("v1.0.0").unwrap(), RepoStatus::Outdated);
        assert!(repo.sync("v1.0.0", false).unwrap());
        assert_eq!(repo.head().unwrap().as_deref(), Some(SHA_B));
        assert_eq!(fx.fake.clone_calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_dirty_tree_is_left_alone_with_warning() {
        testing_logger::setup();
        let fx = Fixture::new();
        let repo = fx.repo();
        repo.sync("production", false).unwrap();
        fx.fake.set_dirty(repo.path(), true);

        assert!(!repo.sync("v1.0.0", false).unwrap());
        assert_eq!(repo.head().unwrap().as_deref(), Some(SHA_A));

        testing_logger::validate(|logs| {
            assert!(logs.iter().any(|l| l.level == log::Level::Warn
                && l.body.contains("local modifications")));
        });
    }

    #[test]
    fn test_expect_dirty_silences_warning() {
        testing_logger::setup();
        let fx = Fixture::new();
        let repo = fx.repo().expect_dirty(true);
        repo.sync("production", false).unwrap();
        fx.fake.set_dirty(repo.path(), true);

        assert!(!repo.sync("v1.0.0", false).unwrap());
        testing_logger::validate(|logs| {
            assert!(!logs.iter().any(|l| l.level == log::Level::Warn));
        });
    }

    #[test]
    fn test_force_overwrites_dirty_tree() {
        let fx = Fixture::new();
        let repo = fx.repo();
        repo.sync("production", false).unwrap();
        fx.fake.set_dirty(repo.path(), true);

        assert!(repo.sync("v1.0.0", true).unwrap());
        assert_eq!(repo.head().unwrap().as_deref(), Some(SHA_B));
        assert_eq!(repo.status("v1.0.0").unwrap(), RepoStatus::InSync);
    }

    #[test]
    fn test_unknown_ref_is_not_found() {
        let fx = Fixture::new();
        let repo = fx.repo();
        let err = repo.sync("does-not-exist", false).unwrap_err();
        assert!(matches!(err, Error::RefNotFound { .. }));
        assert!(!repo.path().exists());
    }

    #[test]
    fn test_sync_cache_needed() {
        let fx = Fixture::new();
        let repo = fx.repo();
        assert!(repo.sync_cache_needed("v1.0.0").unwrap());
        repo.cache().sync().unwrap();
        assert!(!repo.sync_cache_needed("v1.0.0").unwrap());
        assert!(!repo.sync_cache_needed(SHA_A).unwrap());
        assert!(repo.sync_cache_needed("production").unwrap());
        assert!(repo.sync_cache_needed("unknown").unwrap());
    }

    #[test]
    fn test_branch_is_outdated_until_cache_synced() {
        let fx = Fixture::new();
        repo_synced_then_reloaded(&fx);
    }

    fn repo_synced_then_reloaded(fx: &Fixture) {
        fx.repo().sync("production", false).unwrap();

        // Same tree seen from a new process: the mirror has not been fetched
        let vcs: Arc<dyn Vcs> = fx.fake.clone();
        let fresh = CacheRegistry::new(fx.temp.path().join("cache"), vcs.clone());
        let repo = WorkingRepository::new(
            fx.temp.path().join("envs/production"),
            fresh.generate(REMOTE).unwrap(),
            vcs,
        );
        assert_eq!(repo.status("production").unwrap(), RepoStatus::Outdated);
        assert_eq!(repo.status("v1.0.0").unwrap(), RepoStatus::Outdated);

        // The fetch finds nothing new, so nothing changes on disk
        assert!(!repo.sync("production", false).unwrap());
        assert_eq!(repo.status("production").unwrap(), RepoStatus::InSync);
    }
}
