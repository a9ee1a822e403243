//! Shared mirror repositories, one per remote

use std::collections::HashMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use log::{debug, info};

use crate::error::{Error, Result};
use crate::path::sanitize_remote;
use crate::vcs::{looks_like_sha, Vcs};

/// What kind of thing a reference names inside a mirror.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RefType {
    Branch,
    Tag,
    Commit,
    Unknown,
}

impl RefType {
    /// Tags and commits never move once they exist.
    pub fn is_immutable(self) -> bool {
        matches!(self, RefType::Tag | RefType::Commit)
    }
}

/// A bare mirror of one remote under the cache root.
///
/// `sync` is memoized: the first call in a process fetches or clones, later
/// calls return immediately unless forced. The flag is not guarded against
/// concurrent callers; the synchronizer keeps every module sharing a mirror
/// on one worker.
#[derive(Debug)]
pub struct GitCache {
    remote: String,
    path: PathBuf,
    vcs: Arc<dyn Vcs>,
    synced: AtomicBool,
}

impl GitCache {
    pub fn new(remote: &str, root: &Path, vcs: Arc<dyn Vcs>) -> Self {
        Self {
            remote: remote.to_string(),
            path: root.join(sanitize_remote(remote)),
            vcs,
            synced: AtomicBool::new(false),
        }
    }

    pub fn remote(&self) -> &str {
        &self.remote
    }

    /// Directory of the bare mirror.
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// True once the mirror exists on disk.
    pub fn exists(&self) -> bool {
        self.path.is_dir()
    }

    /// True when this process has already synced the mirror.
    pub fn is_synced(&self) -> bool {
        self.synced.load(Ordering::SeqCst)
    }

    pub fn sync(&self) -> Result<()> {
        self.sync_with(false)
    }

    /// Fetch into an existing mirror or clone a new one. Skipped when already
    /// synced during this run, unless `force` is set.
    pub fn sync_with(&self, force: bool) -> Result<()> {
        if self.is_synced() && !force {
            debug!("Cache for {} already synced", self.remote);
            return Ok(());
        }

        if let Some(root) = self.path.parent() {
            fs::create_dir_all(root)?;
        }

        if self.exists() {
            info!("Updating cache for {}", self.remote);
            self.vcs.fetch(&self.path)?;
        } else {
            info!("Creating cache for {} at {}", self.remote, self.path.display());
            self.vcs.clone_mirror(&self.remote, &self.path)?;
        }
        self.synced.store(true, Ordering::SeqCst);
        Ok(())
    }

    pub fn branches(&self) -> Result<Vec<String>> {
        self.vcs.branches(&self.path)
    }

    pub fn tags(&self) -> Result<Vec<String>> {
        self.vcs.tags(&self.path)
    }

    /// Resolve a reference to a commit id using only the local mirror.
    pub fn resolve(&self, reference: &str) -> Result<Option<String>> {
        if !self.exists() {
            return Ok(None);
        }
        self.vcs.resolve(&self.path, reference)
    }

    /// Classify `reference`, checking branches before tags before commits.
    pub fn ref_type(&self, reference: &str) -> Result<RefType> {
        if !self.exists() {
            return Ok(RefType::Unknown);
        }
        if self.branches()?.iter().any(|b| b == reference) {
            return Ok(RefType::Branch);
        }
        if self.tags()?.iter().any(|t| t == reference) {
            return Ok(RefType::Tag);
        }
        if looks_like_sha(reference) && self.resolve(reference)?.is_some() {
            return Ok(RefType::Commit);
        }
        Ok(RefType::Unknown)
    }

    /// Read one file from the mirror without a checkout.
    pub fn blob_at(&self, rev: &str, path: &str) -> Result<Vec<u8>> {
        self.vcs.blob_at(&self.path, rev, path)
    }
}

/// Memoizing factory for [`GitCache`] entries.
///
/// Within one registry the same remote string always yields the same
/// `Arc<GitCache>`. Tests create a fresh registry instead of resetting
/// global state.
#[derive(Debug)]
pub struct CacheRegistry {
    root: PathBuf,
    vcs: Arc<dyn Vcs>,
    entries: Mutex<HashMap<String, Arc<GitCache>>>,
}

impl CacheRegistry {
    pub fn new(root: impl Into<PathBuf>, vcs: Arc<dyn Vcs>) -> Self {
        Self {
            root: root.into(),
            vcs,
            entries: Mutex::new(HashMap::new()),
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn vcs(&self) -> Arc<dyn Vcs> {
        Arc::clone(&self.vcs)
    }

    /// Get the entry for `remote`, creating it on first use.
    pub fn generate(&self, remote: &str) -> Result<Arc<GitCache>> {
        let mut entries = self.entries.lock().map_err(|_| Error::LockPoisoned {
            context: "cache registry".to_string(),
        })?;
        let entry = entries
            .entry(remote.to_string())
            .or_insert_with(|| Arc::new(GitCache::new(remote, &self.root, Arc::clone(&self.vcs))));
        Ok(Arc::clone(entry))
    }

    /// Forget every entry created so far.
    pub fn clear(&self) -> Result<()> {
        let mut entries = self.entries.lock().map_err(|_| Error::LockPoisoned {
            context: "cache registry".to_string(),
        })?;
        entries.clear();
        Ok(())
    }

    pub fn len(&self) -> Result<usize> {
        let entries = self.entries.lock().map_err(|_| Error::LockPoisoned {
            context: "cache registry".to_string(),
        })?;
        Ok(entries.len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }

    /// Mirrors present under the cache root, whether or not this process
    /// touched them.
    pub fn on_disk(&self) -> Result<Vec<PathBuf>> {
        if !self.root.is_dir() {
            return Ok(Vec::new());
        }
        let mut mirrors = Vec::new();
        for entry in fs::read_dir(&self.root)? {
            let path = entry?.path();
            if path.join("objects").is_dir() {
                mirrors.push(path);
            }
        }
        mirrors.sort();
        Ok(mirrors)
    }
}
