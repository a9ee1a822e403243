//! Modules unpacked from a `.tar.gz` at a URL or filesystem path.
//!
//! After unpacking, a sidecar file records the source, the archive digest
//! and the digest of every file written. Later runs compare the tree on disk
//! against that record instead of downloading the archive again.

use std::fs;
use std::path::{Path, PathBuf};

use log::{debug, info};
use serde::{Deserialize, Serialize};

use super::{replace_dir, ModuleContext, ModuleStatus};
use crate::archive::{self, DigestMap};
use crate::error::Result;
use crate::forge::client::{download_bytes, http_client};
use crate::forge::ContentHash;
use crate::path::sanitize_remote;
use crate::puppetfile::{ModuleSpec, VersionSpec};

/// Sidecar written into every unpacked tarball module.
pub const TARBALL_SIDECAR: &str = ".envdeploy-tarball.json";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
struct Sidecar {
    source: String,
    sha256: String,
    files: DigestMap,
}

#[derive(Debug)]
pub struct TarballModule {
    spec: ModuleSpec,
    cache_file: Option<PathBuf>,
}

fn is_remote(source: &str) -> bool {
    source.starts_with("http://") || source.starts_with("https://")
}

impl TarballModule {
    pub fn new(spec: ModuleSpec, ctx: &ModuleContext) -> Self {
        let cache_file = is_remote(&spec.source).then(|| {
            ctx.tarball_cache
                .join(format!("{}.tar.gz", sanitize_remote(&spec.source)))
        });
        Self { spec, cache_file }
    }

    pub fn spec(&self) -> &ModuleSpec {
        &self.spec
    }

    /// Downloaded archives are shared by every module with the same URL.
    pub fn cache_key(&self) -> Option<PathBuf> {
        self.cache_file.clone()
    }

    fn checksum(&self) -> Option<ContentHash> {
        match &self.spec.version {
            VersionSpec::Checksum(sum) => Some(ContentHash::from_hex(sum)),
            _ => None,
        }
    }

    fn sidecar(&self) -> Option<Sidecar> {
        let text = fs::read_to_string(self.spec.path.join(TARBALL_SIDECAR)).ok()?;
        serde_json::from_str(&text).ok()
    }

    /// Archive bytes, verified against the declared checksum when there is
    /// one. Remote archives are cached and reused while they still verify.
    fn archive_bytes(&self) -> Result<Vec<u8>> {
        let expected = self.checksum();
        let Some(cache_file) = &self.cache_file else {
            let bytes = fs::read(&self.spec.source)?;
            if let Some(expected) = &expected {
                expected.check(&self.spec.source, &bytes)?;
            }
            return Ok(bytes);
        };

        if cache_file.is_file() {
            let bytes = fs::read(cache_file)?;
            match &expected {
                Some(expected) if !expected.verify(&bytes) => {
                    debug!("Cached {} is stale", cache_file.display());
                }
                _ => return Ok(bytes),
            }
        }

        info!("Downloading {}", self.spec.source);
        let client = http_client(&self.spec.source)?;
        let bytes = download_bytes(&client, &self.spec.source)?;
        if let Some(expected) = &expected {
            expected.check(&self.spec.source, &bytes)?;
        }
        write_atomic(cache_file, &bytes)?;
        Ok(bytes)
    }

    pub fn status(&self) -> Result<ModuleStatus> {
        if !self.spec.path.exists() {
            return Ok(ModuleStatus::Absent);
        }
        let Some(sidecar) = self.sidecar() else {
            return Ok(ModuleStatus::Mismatched);
        };
        if sidecar.source != self.spec.source {
            return Ok(ModuleStatus::Mismatched);
        }
        if let Some(expected) = self.checksum() {
            if expected.as_str() != sidecar.sha256 {
                return Ok(ModuleStatus::Outdated);
            }
        }

        let on_disk = archive::digest_tree(&self.spec.path, &[TARBALL_SIDECAR])?;
        if sidecar.files != on_disk {
            return Ok(ModuleStatus::Outdated);
        }
        Ok(ModuleStatus::InSync)
    }

    pub fn sync(&self) -> Result<bool> {
        if self.status()? == ModuleStatus::InSync {
            return Ok(false);
        }
        let bytes = self.archive_bytes()?;
        let sha256 = ContentHash::compute(&bytes);
        info!("Unpacking {} into {}", self.spec.source, self.spec.path.display());

        replace_dir(&self.spec.path, |staging| {
            let files = archive::unpack(&bytes, staging, self.spec.strip_component)?;
            let sidecar = Sidecar {
                source: self.spec.source.clone(),
                sha256: sha256.as_str().to_string(),
                files,
            };
            fs::write(
                staging.join(TARBALL_SIDECAR),
                serde_json::to_string_pretty(&sidecar)?,
            )?;
            Ok(())
        })?;
        Ok(true)
    }

    pub fn deployed_version(&self) -> Option<String> {
        self.sidecar()
            .filter(|s| s.source == self.spec.source)
            .map(|s| s.sha256)
    }

    /// Digest of the archive that should be deployed.
    pub fn resolve(&self) -> Result<String> {
        if let Some(expected) = self.checksum() {
            return Ok(expected.as_str().to_string());
        }
        if let Some(deployed) = self.deployed_version() {
            return Ok(deployed);
        }
        Ok(ContentHash::compute(&self.archive_bytes()?).as_str().to_string())
    }
}

fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent)?;
    }
    let partial = path.with_extension("gz.partial");
    fs::write(&partial, bytes)?;
    fs::rename(&partial, path)?;
    Ok(())
}
