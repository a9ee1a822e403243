//! # Resolved Environment Map
//!
//! Resolution layers concrete versions over the declared module list without
//! touching the declarations themselves. The resulting [`ResolvedEnvironment`]
//! is what gets written as the deploy manifest.

use std::fs;
use std::path::Path;

use chrono::{DateTime, Utc};
use log::{debug, warn};
use serde::Serialize;

use crate::error::{Error, Result};
use crate::module::Module;
use crate::puppetfile::{ModuleSpec, SourceKind, VersionSpec};

/// One module with its declared and concrete versions.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ResolvedModule {
    pub name: String,
    pub kind: SourceKind,
    pub source: String,
    pub declared: VersionSpec,
    /// Commit, release version or archive digest
    pub resolved_version: Option<String>,
    /// What is on disk, when known
    #[serde(skip_serializing_if = "Option::is_none")]
    pub deployed_version: Option<String>,
}

impl ResolvedModule {
    pub fn new(spec: &ModuleSpec, resolved: Option<String>, deployed: Option<String>) -> Self {
        Self {
            name: spec.name.clone(),
            kind: spec.kind,
            source: spec.source.clone(),
            declared: spec.version.clone(),
            resolved_version: resolved,
            deployed_version: deployed,
        }
    }

    pub fn is_resolved(&self) -> bool {
        self.resolved_version.is_some()
    }
}

/// Where an environment came from.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct SourceDescriptor {
    /// Name of the source in the configuration
    pub name: String,
    /// `git` for control repositories, `hash` for declared environments
    pub kind: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub remote: Option<String>,
}

#[derive(Debug, Clone, Serialize)]
pub struct ResolvedEnvironment {
    pub environment: String,
    pub source: SourceDescriptor,
    /// Commit of the environment's own repository
    pub resolved_base_version: Option<String>,
    pub resolved_at: DateTime<Utc>,
    pub modules: Vec<ResolvedModule>,
    pub deploy_success: bool,
    pub started_at: DateTime<Utc>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl ResolvedEnvironment {
    pub fn new(environment: &str, source: SourceDescriptor) -> Self {
        let now = Utc::now();
        Self {
            environment: environment.to_string(),
            source,
            resolved_base_version: None,
            resolved_at: now,
            modules: Vec::new(),
            deploy_success: false,
            started_at: now,
            finished_at: None,
        }
    }

    /// True once every module carries a concrete version.
    pub fn is_fully_resolved(&self) -> bool {
        self.modules.iter().all(ResolvedModule::is_resolved)
    }

    pub fn finish(&mut self, success: bool) {
        self.deploy_success = success;
        self.finished_at = Some(Utc::now());
    }

    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string_pretty(self)?)
    }

    /// Write the record as pretty JSON to `path`.
    pub fn write(&self, path: &Path) -> Result<()> {
        debug!("Writing deploy manifest {}", path.display());
        fs::write(path, self.to_json()? + "\n")?;
        Ok(())
    }
}

/// Resolve every module, attempting all of them even after failures.
///
/// Unresolvable modules are collected into one
/// [`Error::UnresolvableBatch`]. Any other failure (a transport error, for
/// instance) is returned as-is once the whole list has been attempted.
pub fn resolve_modules(modules: &[Module]) -> Result<Vec<ResolvedModule>> {
    let mut resolved = Vec::with_capacity(modules.len());
    let mut unresolvable = Vec::new();
    let mut other: Option<Error> = None;

    for module in modules {
        match module.resolve() {
            Ok(record) => resolved.push(record),
            Err(e) if e.is_unresolvable() => {
                warn!("{}", e);
                unresolvable.push((module.name().to_string(), root_cause(&e)));
            }
            Err(e) => {
                warn!("{}", e);
                other.get_or_insert(e);
            }
        }
    }

    if !unresolvable.is_empty() {
        return Err(Error::UnresolvableBatch {
            failures: unresolvable,
        });
    }
    match other {
        Some(e) => Err(e),
        None => Ok(resolved),
    }
}

/// Message of the innermost error, without the module context wrappers.
fn root_cause(error: &Error) -> String {
    match error {
        Error::Module { source, .. } => root_cause(source),
        other => other.to_string(),
    }
}
