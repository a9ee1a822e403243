//! Default values for envdeploy configuration.
//!
//! This module provides centralized default values used across the library
//! and the CLI, ensuring consistency and avoiding duplication.

use std::path::PathBuf;

/// File name of the declaration file inside an environment.
pub const PUPPETFILE_NAME: &str = "Puppetfile";

/// Module directory used when a Puppetfile does not call `moduledir`.
pub const DEFAULT_MODULEDIR: &str = "modules";

/// Name of the manifest written at the root of every deployed environment.
pub const DEPLOY_MANIFEST: &str = ".envdeploy-deploy.json";

/// Metadata sidecar at the root of every registry-sourced module.
pub const MODULE_METADATA: &str = "metadata.json";

/// Worker pool size for module synchronization.
pub const DEFAULT_POOL_SIZE: usize = 4;

/// Base URL of the public Forge API.
pub const DEFAULT_FORGE_URL: &str = "https://forgeapi.puppet.com";

/// Reference checked out for git modules and environments with no ref.
pub const DEFAULT_GIT_REF: &str = "main";

/// Configuration file name searched in the current directory.
pub const CONFIG_FILE_NAME: &str = "envdeploy.yaml";

/// System-wide configuration file location.
pub const SYSTEM_CONFIG_PATH: &str = "/etc/envdeploy/envdeploy.yaml";

/// Returns the default cache root directory.
///
/// Uses the platform-appropriate cache directory:
/// - Linux: `~/.cache/envdeploy` (XDG Base Directory)
/// - macOS: `~/Library/Caches/envdeploy`
/// - Windows: `{FOLDERID_LocalAppData}\envdeploy`
///
/// Falls back to `.envdeploy-cache` in the current directory if the
/// platform cache directory cannot be determined.
///
/// This can be overridden by the `cachedir` setting, the `--cache-root`
/// CLI flag, or the `ENVDEPLOY_CACHE` environment variable.
pub fn default_cache_root() -> PathBuf {
    dirs::cache_dir()
        .unwrap_or_else(|| PathBuf::from(".envdeploy-cache"))
        .join("envdeploy")
}
