//! # envdeploy
//!
//! Deploys Puppet environments and modules. Branches of a control
//! repository (or environments declared in configuration) become directories
//! under a base directory, and the Puppetfile in each environment declares
//! modules that are fetched from git, a Forge, a tarball, or a local
//! directory.
//!
//! ## Quick Example
//!
//! ```
//! use std::path::Path;
//! use envdeploy::puppetfile::Puppetfile;
//!
//! let source = "\
//! forge 'https://forge.example.com'
//! mod 'puppetlabs/stdlib', '9.4.1'
//! mod 'ntp', :git => 'https://git.example.com/ntp.git', :tag => 'v2.0.0'
//! ";
//! let puppetfile = Puppetfile::parse_str(
//!     source,
//!     Path::new("/envs/production/Puppetfile"),
//!     Path::new("/envs/production"),
//! )
//! .unwrap();
//!
//! assert_eq!(puppetfile.forge, "https://forge.example.com");
//! assert_eq!(puppetfile.modules.len(), 2);
//! assert_eq!(puppetfile.modules[0].name, "stdlib");
//! assert!(puppetfile.modules[1].path.ends_with("modules/ntp"));
//! ```
//!
//! ## Core Concepts
//!
//! - **Version control (`vcs`, `cache`, `repository`)**: a [`vcs::Vcs`]
//!   provider runs git operations; bare mirrors in the cache root are shared
//!   between environments and modules through a [`cache::CacheRegistry`], and
//!   working trees are converged from them.
//! - **Puppetfile (`puppetfile`)**: the module declaration DSL, evaluated
//!   into [`puppetfile::ModuleSpec`] values.
//! - **Modules (`module`, `forge`, `archive`)**: one variant per source kind,
//!   each able to report its status, resolve its version, and synchronize.
//! - **Sources and environments (`source`, `environment`)**: configured
//!   sources enumerate environments; an environment owns a working tree and
//!   its Puppetfile.
//! - **Deployment (`deployment`, `synchronizer`, `purge`, `resolution`)**:
//!   orchestrates environment and module synchronization, removes stale
//!   content, and writes a manifest of what was resolved.
//!
//! Configuration is read from `envdeploy.yaml` by [`config::Settings`].

pub mod archive;
pub mod cache;
pub mod config;
pub mod defaults;
pub mod deployment;
pub mod environment;
pub mod error;
pub mod forge;
pub mod module;
pub mod output;
pub mod path;
pub mod puppetfile;
pub mod purge;
pub mod repository;
pub mod resolution;
pub mod source;
pub mod synchronizer;
pub mod vcs;
