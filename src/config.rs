//! # Configuration
//!
//! This module defines the structure of `envdeploy.yaml` and the logic for
//! finding, parsing and validating it.
//!
//! ## Example
//!
//! ```yaml
//! cachedir: /var/cache/envdeploy
//! pool_size: 8
//! sources:
//!   main:
//!     remote: https://git.example.com/puppet/control.git
//!     basedir: /etc/puppetlabs/code/environments
//!     prefix: false
//!     invalid_branches: correct_and_warn
//!   pinned:
//!     type: hash
//!     basedir: /etc/puppetlabs/code/pinned
//!     environments:
//!       legacy:
//!         type: git
//!         remote: https://git.example.com/puppet/legacy.git
//!         ref: v1.4.0
//! git:
//!   provider: shellgit
//!   default_ref: main
//! forge:
//!   baseurl: https://forge.example.com
//! deploy:
//!   purge_levels: [deployment, environment, puppetfile]
//!   purge_allowlist: ["*.log"]
//!   write_manifest: true
//! ```
//!
//! Unknown keys are ignored. Missing required keys are reported as
//! [`Error::ConfigParse`] with a hint.
//!
//! ## Search order
//!
//! 1. the `--config` flag
//! 2. the `ENVDEPLOY_CONFIG` environment variable
//! 3. `./envdeploy.yaml`
//! 4. `/etc/envdeploy/envdeploy.yaml`
//!
//! Running without any configuration file is allowed; the Puppetfile
//! commands need none.

use std::collections::BTreeMap;
use std::fmt;
use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};

use crate::defaults::{
    default_cache_root, CONFIG_FILE_NAME, DEFAULT_GIT_REF, DEFAULT_POOL_SIZE, SYSTEM_CONFIG_PATH,
};
use crate::error::{Error, Result};
use crate::vcs::ProviderKind;

/// Environment variable naming the configuration file.
pub const CONFIG_ENV: &str = "ENVDEPLOY_CONFIG";

/// Top-level settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Root of the mirror, Forge and tarball caches
    pub cachedir: Option<PathBuf>,
    /// Named environment sources
    pub sources: BTreeMap<String, SourceSettings>,
    /// Worker threads used to synchronize modules
    pub pool_size: usize,
    pub git: GitSettings,
    pub forge: ForgeSettings,
    pub deploy: DeploySettings,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            cachedir: None,
            sources: BTreeMap::new(),
            pool_size: DEFAULT_POOL_SIZE,
            git: GitSettings::default(),
            forge: ForgeSettings::default(),
            deploy: DeploySettings::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "lowercase")]
pub enum SourceType {
    /// Every branch of a control repository is an environment
    #[default]
    Git,
    /// Environments are listed explicitly
    Hash,
}

/// Whether, and with what, environment names are prefixed.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(untagged)]
pub enum Prefix {
    /// `true` prefixes with the source name
    Enabled(bool),
    Custom(String),
}

impl Default for Prefix {
    fn default() -> Self {
        Prefix::Enabled(false)
    }
}

/// What to do with branch names that are not valid environment names.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum InvalidBranches {
    /// Skip the branch and log an error
    #[default]
    Error,
    /// Replace invalid characters with `_`
    Correct,
    /// Replace invalid characters and log a warning
    CorrectAndWarn,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SourceSettings {
    #[serde(rename = "type", default)]
    pub kind: SourceType,
    /// Control repository, for git sources
    #[serde(default)]
    pub remote: Option<String>,
    /// Directory environments are deployed into
    #[serde(default)]
    pub basedir: Option<PathBuf>,
    #[serde(default)]
    pub prefix: Prefix,
    /// Branch name prefixes that never become environments
    #[serde(default)]
    pub ignore_branch_prefixes: Vec<String>,
    #[serde(default)]
    pub invalid_branches: InvalidBranches,
    /// Declared environments, for hash sources
    #[serde(default)]
    pub environments: BTreeMap<String, DeclaredEnvironment>,
}

/// One entry of a hash source.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeclaredEnvironment {
    #[serde(rename = "type", default = "default_environment_type")]
    pub kind: String,
    pub remote: String,
    #[serde(rename = "ref", default)]
    pub reference: Option<String>,
    /// Module directory overriding the Puppetfile's own
    #[serde(default)]
    pub moduledir: Option<String>,
}

fn default_environment_type() -> String {
    "git".to_string()
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GitSettings {
    pub provider: ProviderKind,
    /// Ref used when a git module or environment names none
    pub default_ref: String,
    /// Accepted for compatibility; credentials come from the git backend
    pub private_key: Option<PathBuf>,
    /// Accepted for compatibility; per-repository settings are not honoured
    pub repositories: Vec<serde_yaml::Value>,
}

impl Default for GitSettings {
    fn default() -> Self {
        Self {
            provider: ProviderKind::default(),
            default_ref: DEFAULT_GIT_REF.to_string(),
            private_key: None,
            repositories: Vec::new(),
        }
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct ForgeSettings {
    /// Overrides the `forge` line of every Puppetfile
    pub baseurl: Option<String>,
}

/// Levels at which stale content is purged.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum PurgeLevel {
    /// Environment directories no source produces
    Deployment,
    /// Untracked files inside an environment
    Environment,
    /// Undeclared modules inside managed module directories
    Puppetfile,
}

impl fmt::Display for PurgeLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            PurgeLevel::Deployment => "deployment",
            PurgeLevel::Environment => "environment",
            PurgeLevel::Puppetfile => "puppetfile",
        };
        write!(f, "{}", name)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DeploySettings {
    pub purge_levels: Vec<PurgeLevel>,
    /// Globs, relative to the environment, kept by the environment purge
    pub purge_allowlist: Vec<String>,
    pub write_manifest: bool,
}

impl Default for DeploySettings {
    fn default() -> Self {
        Self {
            purge_levels: vec![PurgeLevel::Deployment, PurgeLevel::Puppetfile],
            purge_allowlist: Vec::new(),
            write_manifest: true,
        }
    }
}

impl DeploySettings {
    pub fn purges(&self, level: PurgeLevel) -> bool {
        self.purge_levels.contains(&level)
    }
}

impl Settings {
    /// Parse and validate YAML text. Empty input yields the defaults.
    pub fn parse(yaml: &str) -> Result<Self> {
        let settings: Settings = if yaml.trim().is_empty() {
            Settings::default()
        } else {
            serde_yaml::from_str(yaml).map_err(|e| Error::ConfigParse {
                message: e.to_string(),
                hint: None,
            })?
        };
        settings.validate()?;
        Ok(settings)
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path).map_err(|e| Error::ConfigParse {
            message: format!("cannot read {}: {}", path.display(), e),
            hint: Some("pass an existing file with --config".to_string()),
        })?;
        Self::parse(&text)
    }

    /// Find the configuration file to use, if any.
    pub fn locate(explicit: Option<&Path>) -> Option<PathBuf> {
        if let Some(path) = explicit {
            return Some(path.to_path_buf());
        }
        if let Ok(path) = std::env::var(CONFIG_ENV) {
            if !path.is_empty() {
                return Some(PathBuf::from(path));
            }
        }
        [PathBuf::from(CONFIG_FILE_NAME), PathBuf::from(SYSTEM_CONFIG_PATH)]
            .into_iter()
            .find(|candidate| candidate.is_file())
    }

    /// Load the located configuration, or the defaults when there is none.
    pub fn load(explicit: Option<&Path>) -> Result<Self> {
        match Self::locate(explicit) {
            Some(path) => {
                log::debug!("Loading configuration from {}", path.display());
                Self::from_file(&path)
            }
            None => Ok(Self::default()),
        }
    }

    pub fn cache_root(&self) -> PathBuf {
        self.cachedir.clone().unwrap_or_else(default_cache_root)
    }

    fn validate(&self) -> Result<()> {
        if self.pool_size == 0 {
            return Err(Error::ConfigParse {
                message: "pool_size must be at least 1".to_string(),
                hint: Some("use 'pool_size: 1' for sequential synchronization".to_string()),
            });
        }
        for (name, source) in &self.sources {
            if source.basedir.is_none() {
                return Err(Error::ConfigParse {
                    message: format!("source '{}' has no basedir", name),
                    hint: Some(format!(
                        "add 'basedir:' under sources.{} with the directory environments are deployed into",
                        name
                    )),
                });
            }
            match source.kind {
                SourceType::Git => {
                    if source.remote.is_none() {
                        return Err(Error::ConfigParse {
                            message: format!("git source '{}' has no remote", name),
                            hint: Some(format!(
                                "add 'remote:' under sources.{}, or set 'type: hash'",
                                name
                            )),
                        });
                    }
                }
                SourceType::Hash => {
                    for (env, declared) in &source.environments {
                        if declared.kind != "git" {
                            return Err(Error::ConfigParse {
                                message: format!(
                                    "environment '{}' in source '{}' has unsupported type '{}'",
                                    env, name, declared.kind
                                ),
                                hint: Some("only 'type: git' environments are supported".to_string()),
                            });
                        }
                    }
                }
            }
        }
        Ok(())
    }
}
