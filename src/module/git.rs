//! Modules checked out from a git remote.

use std::path::PathBuf;
use std::sync::OnceLock;

use log::debug;

use super::{ModuleContext, ModuleStatus};
use crate::error::{Error, Result};
use crate::puppetfile::{ModuleSpec, VersionSpec};
use crate::repository::{RepoStatus, WorkingRepository};

#[derive(Debug)]
pub struct GitModule {
    spec: ModuleSpec,
    repo: WorkingRepository,
    environment_branch: Option<String>,
    default_ref: String,
    default_branch_override: Option<String>,
    desired: OnceLock<String>,
}

impl GitModule {
    pub fn new(spec: ModuleSpec, ctx: &ModuleContext) -> Result<Self> {
        let cache = ctx.caches.generate(&spec.source)?;
        let repo = WorkingRepository::new(&spec.path, cache, ctx.vcs.clone());
        Ok(Self {
            spec,
            repo,
            environment_branch: ctx.environment_branch.clone(),
            default_ref: ctx.default_ref.clone(),
            default_branch_override: ctx.default_branch_override.clone(),
            desired: OnceLock::new(),
        })
    }

    pub fn spec(&self) -> &ModuleSpec {
        &self.spec
    }

    pub fn repository(&self) -> &WorkingRepository {
        &self.repo
    }

    pub fn cache_key(&self) -> PathBuf {
        self.repo.cache().path().to_path_buf()
    }

    /// The ref this module should be checked out at.
    ///
    /// Modules tracking the environment try, in order, the environment's own
    /// branch, the module's `:default_branch`, and the deploy-wide override.
    /// The first one that exists in the mirror wins.
    pub fn desired_ref(&self) -> Result<String> {
        if let Some(desired) = self.desired.get() {
            return Ok(desired.clone());
        }

        let desired = match &self.spec.version {
            VersionSpec::Branch(r)
            | VersionSpec::Tag(r)
            | VersionSpec::Commit(r)
            | VersionSpec::Ref(r) => r.clone(),
            VersionSpec::Unspecified => self
                .spec
                .default_branch
                .clone()
                .unwrap_or_else(|| self.default_ref.clone()),
            VersionSpec::TrackEnvironment => self.track_environment()?,
            other => {
                return Err(Error::Unresolvable {
                    module: self.spec.name.clone(),
                    constraint: other.to_string(),
                    message: "not a git reference".to_string(),
                })
            }
        };

        let _ = self.desired.set(desired.clone());
        Ok(desired)
    }

    fn track_environment(&self) -> Result<String> {
        let tiers = [
            ("environment branch", self.environment_branch.as_ref()),
            (":default_branch", self.spec.default_branch.as_ref()),
            ("default branch override", self.default_branch_override.as_ref()),
        ];

        let cache = self.repo.cache();
        cache.sync()?;

        let mut tried = Vec::new();
        for (tier, candidate) in tiers {
            let Some(candidate) = candidate else {
                continue;
            };
            if cache.resolve(candidate)?.is_some() {
                debug!("{} tracks {} '{}'", self.spec.name, tier, candidate);
                return Ok(candidate.clone());
            }
            tried.push(format!("{} '{}'", tier, candidate));
        }

        let message = if tried.is_empty() {
            "no environment branch, :default_branch or override is available".to_string()
        } else {
            format!("none of {} exist in {}", tried.join(", "), self.spec.source)
        };
        Err(Error::Unresolvable {
            module: self.spec.name.clone(),
            constraint: self.spec.version.to_string(),
            message,
        })
    }

    pub fn status(&self) -> Result<ModuleStatus> {
        if !self.spec.path.exists() {
            return Ok(ModuleStatus::Absent);
        }
        let status = self.repo.status(&self.desired_ref()?)?;
        Ok(match status {
            RepoStatus::Absent => ModuleStatus::Absent,
            RepoStatus::Uninitialized | RepoStatus::Mismatched => ModuleStatus::Mismatched,
            RepoStatus::Dirty => ModuleStatus::Dirty,
            RepoStatus::Outdated => ModuleStatus::Outdated,
            RepoStatus::InSync => ModuleStatus::InSync,
        })
    }

    pub fn sync(&self, force: bool) -> Result<bool> {
        let desired = self.desired_ref()?;
        self.repo.sync(&desired, force)
    }

    pub fn deployed_version(&self) -> Option<String> {
        self.repo.head().ok().flatten()
    }

    /// Commit the desired ref points at.
    pub fn resolve(&self) -> Result<String> {
        self.repo.resolve(&self.desired_ref()?)
    }
}
