//! # Environments
//!
//! An [`Environment`] is one deployed working tree of a control repository
//! together with the Puppetfile it carries. Deploying it means converging the
//! tree, then the modules, then purging what nothing declares any more.

use std::fs;
use std::path::PathBuf;
use std::sync::Arc;

use log::{debug, info};

use crate::cache::CacheRegistry;
use crate::defaults::{DEPLOY_MANIFEST, PUPPETFILE_NAME};
use crate::error::Result;
use crate::module::{Module, ModuleContext};
use crate::puppetfile::Puppetfile;
use crate::purge::Purger;
use crate::repository::{RepoStatus, WorkingRepository};
use crate::source::EnvironmentSpec;
use crate::vcs::Vcs;

#[derive(Debug)]
pub struct Environment {
    spec: EnvironmentSpec,
    repo: WorkingRepository,
    vcs: Arc<dyn Vcs>,
}

impl Environment {
    pub fn new(spec: EnvironmentSpec, caches: &CacheRegistry) -> Result<Self> {
        let cache = caches.generate(&spec.remote)?;
        let repo = WorkingRepository::new(spec.path(), cache, caches.vcs());
        Ok(Self {
            spec,
            repo,
            vcs: caches.vcs(),
        })
    }

    pub fn name(&self) -> &str {
        &self.spec.name
    }

    pub fn spec(&self) -> &EnvironmentSpec {
        &self.spec
    }

    pub fn path(&self) -> PathBuf {
        self.spec.path()
    }

    pub fn status(&self) -> Result<RepoStatus> {
        self.repo.status(&self.spec.reference)
    }

    /// Converge the environment's own tree. Returns true when it changed.
    pub fn sync(&self, force: bool) -> Result<bool> {
        self.repo.sync(&self.spec.reference, force)
    }

    /// Commit the environment is checked out at.
    pub fn head(&self) -> Result<Option<String>> {
        self.repo.head()
    }

    /// Evaluate the environment's Puppetfile.
    ///
    /// The checked-out file is preferred. Before a checkout exists the file
    /// is read from the mirror at the environment's ref. An environment
    /// without a Puppetfile has no modules.
    pub fn puppetfile(&self) -> Result<Puppetfile> {
        let basedir = self.path();
        let path = basedir.join(PUPPETFILE_NAME);
        let text = if path.is_file() {
            fs::read_to_string(&path)?
        } else {
            let reference = match self.head()? {
                Some(commit) => commit,
                None => self.repo.resolve(&self.spec.reference)?,
            };
            match self.repo.cache().blob_at(&reference, PUPPETFILE_NAME) {
                Ok(bytes) => String::from_utf8_lossy(&bytes).into_owned(),
                Err(e) if e.is_not_found() => {
                    debug!("{} has no Puppetfile", self.name());
                    String::new()
                }
                Err(e) => return Err(e),
            }
        };

        match &self.spec.moduledir {
            Some(moduledir) => {
                Puppetfile::parse_with_moduledir(&text, &path, &basedir, &basedir.join(moduledir))
            }
            None => Puppetfile::parse_str(&text, &path, &basedir),
        }
    }

    /// Bind every declared module to `ctx`.
    pub fn modules(&self, puppetfile: &Puppetfile, ctx: &ModuleContext) -> Result<Vec<Module>> {
        puppetfile
            .modules
            .iter()
            .map(|spec| Module::build(spec, ctx))
            .collect()
    }

    /// Remove undeclared content from the Puppetfile's managed directories.
    pub fn purge_puppetfile(&self, puppetfile: &Puppetfile) -> Result<Vec<PathBuf>> {
        let removed = Purger::new(puppetfile.managed_directories.iter().cloned())
            .desired(puppetfile.desired_contents.iter().cloned())
            .purge()?;
        if !removed.is_empty() {
            info!("Purged {} stale module(s) from {}", removed.len(), self.name());
        }
        Ok(removed)
    }

    /// Remove untracked files from the working tree, keeping the module
    /// directories, modules installed outside them, the deploy manifest and
    /// anything in `allowlist`.
    pub fn purge_untracked(&self, puppetfile: &Puppetfile, allowlist: &[String]) -> Result<Vec<String>> {
        let root = self.path();
        if !root.join(".git").is_dir() {
            return Ok(Vec::new());
        }
        let unmanaged_modules = puppetfile.desired_contents.iter().filter(|path| {
            !puppetfile
                .managed_directories
                .iter()
                .any(|dir| path.starts_with(dir))
        });
        let mut excludes: Vec<String> = puppetfile
            .managed_directories
            .iter()
            .chain(unmanaged_modules)
            .filter_map(|dir| dir.strip_prefix(&root).ok())
            .map(|dir| dir.display().to_string())
            .filter(|dir| !dir.is_empty())
            .collect();
        excludes.push(DEPLOY_MANIFEST.to_string());
        excludes.extend(allowlist.iter().cloned());

        let removed = self.vcs.clean(&root, true, &excludes)?;
        for path in &removed {
            info!("Removed untracked {} from {}", path, self.name());
        }
        Ok(removed)
    }

    pub fn manifest_path(&self) -> PathBuf {
        self.path().join(DEPLOY_MANIFEST)
    }
}
