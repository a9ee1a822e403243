//! # Purge Engine
//!
//! Removes content from managed directories that no declaration accounts
//! for. A [`Purger`] is built from:
//!
//! - managed directories, the roots this run owns;
//! - desired contents, paths that must exist after the run;
//! - exclusions, paths or patterns that must survive even though nothing
//!   declares them.
//!
//! A desired path protects its whole subtree, since whatever put it there
//! owns what is inside. The same goes for a managed directory nested inside
//! another one. Directories on the way to a protected path are kept and
//! searched. The managed roots themselves and anything outside them are
//! never removed.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use glob::Pattern;
use log::{debug, info};
use walkdir::WalkDir;

use crate::error::Result;
use crate::path::{is_glob, normalize};

/// A path that must survive a purge.
#[derive(Debug, Clone)]
pub enum Exclusion {
    /// Exactly this path
    Exact(PathBuf),
    /// This path and everything beneath it
    Subtree(PathBuf),
    /// Any path, or file name, matching the pattern
    Glob(Pattern),
}

impl Exclusion {
    /// Parse an exclusion, resolving relative paths against `base`.
    ///
    /// `dir/**` and `dir/` mean the subtree of `dir`; other strings with glob
    /// metacharacters are patterns; anything else is an exact path.
    pub fn parse(text: &str, base: &Path) -> Result<Self> {
        if let Some(dir) = text.strip_suffix("/**").or_else(|| text.strip_suffix('/')) {
            if !is_glob(dir) {
                return Ok(Exclusion::Subtree(normalize(&base.join(dir))));
            }
        }
        if is_glob(text) {
            let absolute = if Path::new(text).is_absolute() {
                text.to_string()
            } else {
                base.join(text).display().to_string()
            };
            return Ok(Exclusion::Glob(Pattern::new(&absolute)?));
        }
        Ok(Exclusion::Exact(normalize(&base.join(text))))
    }

    pub fn matches(&self, path: &Path) -> bool {
        match self {
            Exclusion::Exact(p) => path == p,
            Exclusion::Subtree(p) => path.starts_with(p),
            Exclusion::Glob(pattern) => {
                pattern.matches_path(path)
                    || path
                        .file_name()
                        .map(|name| pattern.matches(&name.to_string_lossy()))
                        .unwrap_or(false)
            }
        }
    }

    /// Root of a protected subtree, if this exclusion has one.
    fn subtree_root(&self) -> Option<&Path> {
        match self {
            Exclusion::Subtree(p) => Some(p),
            _ => None,
        }
    }
}

/// Paths a purge would remove, in walk order.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PurgePlan {
    pub stale: Vec<PathBuf>,
}

impl PurgePlan {
    pub fn is_empty(&self) -> bool {
        self.stale.is_empty()
    }

    /// Delete every stale path. Paths that vanished meanwhile are skipped.
    pub fn execute(&self) -> Result<Vec<PathBuf>> {
        let mut removed = Vec::with_capacity(self.stale.len());
        for path in &self.stale {
            info!("Removing unmanaged path {}", path.display());
            let outcome = match fs::symlink_metadata(path) {
                Ok(meta) if meta.is_dir() => fs::remove_dir_all(path),
                Ok(_) => fs::remove_file(path),
                Err(e) => Err(e),
            };
            match outcome {
                Ok(()) => removed.push(path.clone()),
                Err(e) if e.kind() == io::ErrorKind::NotFound => {
                    debug!("{} already gone", path.display());
                }
                Err(e) => return Err(e.into()),
            }
        }
        Ok(removed)
    }
}

#[derive(Debug, Clone, Default)]
pub struct Purger {
    managed: Vec<PathBuf>,
    desired: Vec<PathBuf>,
    exclusions: Vec<Exclusion>,
    recurse: bool,
}

impl Purger {
    pub fn new(managed: impl IntoIterator<Item = PathBuf>) -> Self {
        Self {
            managed: managed.into_iter().map(|p| normalize(&p)).collect(),
            ..Self::default()
        }
    }

    pub fn desired(mut self, desired: impl IntoIterator<Item = PathBuf>) -> Self {
        self.desired
            .extend(desired.into_iter().map(|p| normalize(&p)));
        self
    }

    pub fn exclude(mut self, exclusion: Exclusion) -> Self {
        self.exclusions.push(exclusion);
        self
    }

    pub fn exclusions(mut self, exclusions: impl IntoIterator<Item = Exclusion>) -> Self {
        self.exclusions.extend(exclusions);
        self
    }

    /// Look below the first level of each managed directory.
    pub fn recurse(mut self, recurse: bool) -> Self {
        self.recurse = recurse;
        self
    }

    /// Roots whose subtrees are kept wholesale.
    fn protected_roots<'a>(&'a self, managed: &'a Path) -> impl Iterator<Item = &'a Path> + 'a {
        let nested = self
            .managed
            .iter()
            .filter(move |other| other.as_path() != managed && other.starts_with(managed))
            .map(PathBuf::as_path);
        self.desired
            .iter()
            .map(PathBuf::as_path)
            .chain(self.exclusions.iter().filter_map(Exclusion::subtree_root))
            .chain(nested)
    }

    fn is_protected(&self, managed: &Path, path: &Path) -> bool {
        self.protected_roots(managed).any(|root| path.starts_with(root))
            || self.exclusions.iter().any(|e| e.matches(path))
    }

    fn leads_to_protected(&self, managed: &Path, path: &Path) -> bool {
        self.protected_roots(managed)
            .any(|root| root != path && root.starts_with(path))
    }

    pub fn plan(&self) -> Result<PurgePlan> {
        let mut plan = PurgePlan::default();
        for managed in &self.managed {
            if !managed.is_dir() {
                debug!("Managed directory {} does not exist", managed.display());
                continue;
            }
            let mut walker = WalkDir::new(managed)
                .min_depth(1)
                .follow_links(false)
                .sort_by_file_name();
            if !self.recurse {
                walker = walker.max_depth(1);
            }

            let mut entries = walker.into_iter();
            while let Some(entry) = entries.next() {
                let entry = entry?;
                let path = entry.path();
                let is_dir = entry.file_type().is_dir();

                if self.is_protected(managed, path) {
                    if is_dir {
                        entries.skip_current_dir();
                    }
                    continue;
                }
                if self.leads_to_protected(managed, path) {
                    continue;
                }

                plan.stale.push(path.to_path_buf());
                if is_dir {
                    entries.skip_current_dir();
                }
            }
        }
        Ok(plan)
    }

    /// Plan and delete in one step.
    pub fn purge(&self) -> Result<Vec<PathBuf>> {
        self.plan()?.execute()
    }
}
