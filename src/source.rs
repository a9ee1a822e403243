//! # Environment Sources
//!
//! A source turns configuration into a list of [`EnvironmentSpec`]s. A git
//! source lists the branches of a control repository; a hash source lists
//! its declared environments verbatim.
//!
//! Branch names become environment names, so they must be made of word
//! characters only. What happens to the others is decided by the source's
//! `invalid_branches` setting.

use std::path::PathBuf;

use log::{debug, error, warn};
use regex::Regex;

use crate::cache::CacheRegistry;
use crate::config::{InvalidBranches, Prefix, SourceSettings, SourceType};
use crate::error::{Error, Result};
use crate::resolution::SourceDescriptor;

/// One environment a source wants deployed.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EnvironmentSpec {
    /// Directory name under the basedir
    pub name: String,
    pub basedir: PathBuf,
    pub remote: String,
    /// Branch, tag or commit to check out
    pub reference: String,
    /// Replaces the Puppetfile's own `moduledir`
    pub moduledir: Option<String>,
    pub source: SourceDescriptor,
}

impl EnvironmentSpec {
    pub fn path(&self) -> PathBuf {
        self.basedir.join(&self.name)
    }
}

#[derive(Debug, Clone)]
pub struct Source {
    name: String,
    settings: SourceSettings,
    default_ref: String,
}

impl Source {
    pub fn new(name: &str, settings: SourceSettings, default_ref: &str) -> Self {
        Self {
            name: name.to_string(),
            settings,
            default_ref: default_ref.to_string(),
        }
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    pub fn basedir(&self) -> Result<PathBuf> {
        self.settings.basedir.clone().ok_or_else(|| Error::MissingOption {
            option: "basedir".to_string(),
            context: format!("source '{}'", self.name),
        })
    }

    pub fn remote(&self) -> Option<&str> {
        self.settings.remote.as_deref()
    }

    fn descriptor(&self, remote: Option<&str>) -> SourceDescriptor {
        let kind = match self.settings.kind {
            SourceType::Git => "git",
            SourceType::Hash => "hash",
        };
        SourceDescriptor {
            name: self.name.clone(),
            kind: kind.to_string(),
            remote: remote.map(str::to_string),
        }
    }

    /// Enumerate the environments of this source. Git sources sync their
    /// control repository mirror first.
    pub fn environments(&self, caches: &CacheRegistry) -> Result<Vec<EnvironmentSpec>> {
        match self.settings.kind {
            SourceType::Git => self.branch_environments(caches),
            SourceType::Hash => self.declared_environments(),
        }
    }

    fn branch_environments(&self, caches: &CacheRegistry) -> Result<Vec<EnvironmentSpec>> {
        let remote = self.remote().ok_or_else(|| Error::MissingOption {
            option: "remote".to_string(),
            context: format!("git source '{}'", self.name),
        })?;
        let basedir = self.basedir()?;
        let cache = caches.generate(remote)?;
        cache.sync()?;

        let mut environments = Vec::new();
        for branch in cache.branches()? {
            if let Some(prefix) = self
                .settings
                .ignore_branch_prefixes
                .iter()
                .find(|p| branch.starts_with(p.as_str()))
            {
                debug!("Ignoring branch {} (prefix '{}')", branch, prefix);
                continue;
            }
            let Some(dirname) = environment_name(&branch, self.settings.invalid_branches)? else {
                error!(
                    "Skipping branch {} of source {}: not a valid environment name",
                    branch, self.name
                );
                continue;
            };
            environments.push(EnvironmentSpec {
                name: self.prefixed(&dirname),
                basedir: basedir.clone(),
                remote: remote.to_string(),
                reference: branch,
                moduledir: None,
                source: self.descriptor(Some(remote)),
            });
        }
        Ok(environments)
    }

    fn declared_environments(&self) -> Result<Vec<EnvironmentSpec>> {
        let basedir = self.basedir()?;
        Ok(self
            .settings
            .environments
            .iter()
            .map(|(name, declared)| EnvironmentSpec {
                name: self.prefixed(name),
                basedir: basedir.clone(),
                remote: declared.remote.clone(),
                reference: declared
                    .reference
                    .clone()
                    .unwrap_or_else(|| self.default_ref.clone()),
                moduledir: declared.moduledir.clone(),
                source: self.descriptor(Some(&declared.remote)),
            })
            .collect())
    }

    fn prefixed(&self, name: &str) -> String {
        match &self.settings.prefix {
            Prefix::Enabled(false) => name.to_string(),
            Prefix::Enabled(true) => format!("{}_{}", self.name, name),
            Prefix::Custom(prefix) => format!("{}_{}", prefix, name),
        }
    }
}

/// Map a branch name to an environment name. `None` means the branch is
/// skipped.
pub fn environment_name(branch: &str, policy: InvalidBranches) -> Result<Option<String>> {
    let valid = Regex::new(r"^\w+$")?;
    if valid.is_match(branch) {
        return Ok(Some(branch.to_string()));
    }
    let corrected = Regex::new(r"\W")?.replace_all(branch, "_").into_owned();
    match policy {
        InvalidBranches::Error => Ok(None),
        InvalidBranches::Correct => Ok(Some(corrected)),
        InvalidBranches::CorrectAndWarn => {
            warn!(
                "Environment name {} contains invalid characters, using {}",
                branch, corrected
            );
            Ok(Some(corrected))
        }
    }
}
