//! # Modules
//!
//! A [`Module`] is a declared [`ModuleSpec`] bound to everything it needs to
//! converge: a working repository for git modules, a resolver and download
//! cache for Forge modules, a tarball source, or a local directory.
//!
//! Every variant follows the same cycle. `status` inspects the disk and
//! reports one of [`ModuleStatus`]; `sync` acts on it (install when absent,
//! reinstall when mismatched, upgrade in place when outdated, nothing when
//! in sync) and returns whether anything changed. Calling `sync` twice in a
//! row reports `false` the second time.
//!
//! The set of variants is closed and chosen once, when the Puppetfile is
//! evaluated. There is no registry of module types.

pub mod forge;
pub mod git;
pub mod local;
pub mod tarball;

use std::fmt;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use crate::cache::CacheRegistry;
use crate::defaults::DEFAULT_GIT_REF;
use crate::error::{Error, Result};
use crate::forge::{ArtifactCache, ForgeResolver};
use crate::puppetfile::{ModuleSpec, SourceKind};
use crate::resolution::ResolvedModule;
use crate::vcs::Vcs;

pub use self::forge::ForgeModule;
pub use self::git::GitModule;
pub use self::local::{LocalDirectoryModule, LocalModule};
pub use self::tarball::TarballModule;

/// On-disk state of a module relative to its declaration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ModuleStatus {
    Absent,
    Mismatched,
    Outdated,
    /// Local edits are present; only git modules report this
    Dirty,
    InSync,
}

impl fmt::Display for ModuleStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            ModuleStatus::Absent => "absent",
            ModuleStatus::Mismatched => "mismatched",
            ModuleStatus::Outdated => "outdated",
            ModuleStatus::Dirty => "dirty",
            ModuleStatus::InSync => "insync",
        };
        write!(f, "{}", name)
    }
}

/// Shared collaborators handed to every module of one environment.
#[derive(Debug, Clone)]
pub struct ModuleContext {
    pub vcs: Arc<dyn Vcs>,
    pub caches: Arc<CacheRegistry>,
    pub forge: ForgeResolver,
    pub artifacts: ArtifactCache,
    /// Directory for downloaded tarball sources
    pub tarball_cache: PathBuf,
    /// Branch of the environment that owns the Puppetfile
    pub environment_branch: Option<String>,
    /// Ref used by git modules that declare none
    pub default_ref: String,
    /// Last fallback for modules tracking the environment branch
    pub default_branch_override: Option<String>,
}

impl ModuleContext {
    /// Context with the standard cache layout under `cache_root`.
    pub fn new(cache_root: &Path, vcs: Arc<dyn Vcs>, forge: ForgeResolver) -> Self {
        Self::shared(Arc::new(CacheRegistry::new(cache_root, vcs)), forge)
    }

    /// Context reusing an existing mirror registry, so every environment of
    /// a run shares one memoized mirror per remote.
    pub fn shared(caches: Arc<CacheRegistry>, forge: ForgeResolver) -> Self {
        let cache_root = caches.root().to_path_buf();
        Self {
            vcs: caches.vcs(),
            caches,
            forge,
            artifacts: ArtifactCache::new(&cache_root),
            tarball_cache: cache_root.join("tarball"),
            environment_branch: None,
            default_ref: DEFAULT_GIT_REF.to_string(),
            default_branch_override: None,
        }
    }

    pub fn with_environment_branch(mut self, branch: impl Into<String>) -> Self {
        self.environment_branch = Some(branch.into());
        self
    }

    pub fn with_default_ref(mut self, reference: impl Into<String>) -> Self {
        self.default_ref = reference.into();
        self
    }

    pub fn with_default_branch_override(mut self, branch: Option<String>) -> Self {
        self.default_branch_override = branch;
        self
    }
}

#[derive(Debug)]
pub enum Module {
    Git(GitModule),
    Forge(ForgeModule),
    Tarball(TarballModule),
    Local(LocalModule),
    LocalDirectory(LocalDirectoryModule),
}

impl Module {
    /// Bind a declaration to its collaborators.
    pub fn build(spec: &ModuleSpec, ctx: &ModuleContext) -> Result<Self> {
        let module = match spec.kind {
            SourceKind::Git => Module::Git(GitModule::new(spec.clone(), ctx)?),
            SourceKind::Forge => Module::Forge(ForgeModule::new(spec.clone(), ctx)),
            SourceKind::Tarball => Module::Tarball(TarballModule::new(spec.clone(), ctx)),
            SourceKind::Local => Module::Local(LocalModule::new(spec.clone())),
            SourceKind::LocalDirectory => {
                Module::LocalDirectory(LocalDirectoryModule::new(spec.clone()))
            }
            SourceKind::Svn => {
                return Err(Error::Unsupported {
                    feature: format!("svn module '{}' ({})", spec.name, spec.source),
                })
            }
        };
        Ok(module)
    }

    pub fn spec(&self) -> &ModuleSpec {
        match self {
            Module::Git(m) => m.spec(),
            Module::Forge(m) => m.spec(),
            Module::Tarball(m) => m.spec(),
            Module::Local(m) => m.spec(),
            Module::LocalDirectory(m) => m.spec(),
        }
    }

    pub fn name(&self) -> &str {
        &self.spec().name
    }

    pub fn path(&self) -> &Path {
        &self.spec().path
    }

    pub fn kind(&self) -> SourceKind {
        self.spec().kind
    }

    /// Shared on-disk resource this module writes to besides its own path.
    /// Modules with the same key must be synced by the same worker.
    pub fn cache_key(&self) -> Option<PathBuf> {
        match self {
            Module::Git(m) => Some(m.cache_key()),
            Module::Forge(m) => Some(m.cache_key()),
            Module::Tarball(m) => m.cache_key(),
            Module::Local(_) | Module::LocalDirectory(_) => None,
        }
    }

    pub fn status(&self) -> Result<ModuleStatus> {
        let status = match self {
            Module::Git(m) => m.status(),
            Module::Forge(m) => m.status(),
            Module::Tarball(m) => m.status(),
            Module::Local(m) => m.status(),
            Module::LocalDirectory(m) => m.status(),
        };
        status.map_err(|e| e.in_module(self.name(), "status"))
    }

    /// Converge the module. Returns true when the disk changed.
    pub fn sync(&self, force: bool) -> Result<bool> {
        let changed = match self {
            Module::Git(m) => m.sync(force),
            Module::Forge(m) => m.sync(),
            Module::Tarball(m) => m.sync(),
            Module::Local(m) => m.sync(),
            Module::LocalDirectory(m) => m.sync(),
        };
        changed.map_err(|e| e.in_module(self.name(), "sync"))
    }

    /// What is on disk now, if it can be determined locally.
    pub fn deployed_version(&self) -> Option<String> {
        match self {
            Module::Git(m) => m.deployed_version(),
            Module::Forge(m) => m.deployed_version(),
            Module::Tarball(m) => m.deployed_version(),
            Module::Local(m) => m.deployed_version(),
            Module::LocalDirectory(m) => m.deployed_version(),
        }
    }

    /// Map the declared version to a concrete one.
    pub fn resolve(&self) -> Result<ResolvedModule> {
        let resolved = match self {
            Module::Git(m) => m.resolve(),
            Module::Forge(m) => m.resolve().map(|r| r.version),
            Module::Tarball(m) => m.resolve(),
            Module::Local(m) => m.resolve(),
            Module::LocalDirectory(m) => m.resolve(),
        };
        let resolved = resolved.map_err(|e| e.in_module(self.name(), "resolve"))?;
        Ok(ResolvedModule::new(
            self.spec(),
            Some(resolved),
            self.deployed_version(),
        ))
    }
}

/// Replace `path` with the directory produced by `fill`, staging it beside
/// the target so a failed install leaves the old content in place.
pub(crate) fn replace_dir(path: &Path, fill: impl FnOnce(&Path) -> Result<()>) -> Result<()> {
    let parent = path.parent().ok_or_else(|| Error::InvalidPath {
        path: path.to_path_buf(),
        message: "no parent directory".to_string(),
    })?;
    std::fs::create_dir_all(parent)?;

    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let staging = parent.join(format!(".{}.envdeploy-staging", name));
    if staging.exists() {
        std::fs::remove_dir_all(&staging)?;
    }

    if let Err(e) = fill(&staging) {
        let _ = std::fs::remove_dir_all(&staging);
        return Err(e);
    }
    if path.exists() {
        std::fs::remove_dir_all(path)?;
    }
    std::fs::rename(&staging, path)?;
    Ok(())
}
