//! Modules installed from a Forge registry release.
//!
//! The installed version is read back from the module's `metadata.json`.
//! A directory without readable metadata, or whose metadata names another
//! author, is treated as mismatched and reinstalled.

use std::fs;
use std::path::PathBuf;
use std::sync::OnceLock;

use log::{debug, info};
use serde::{Deserialize, Serialize};

use super::{replace_dir, ModuleContext, ModuleStatus};
use crate::archive;
use crate::defaults::MODULE_METADATA;
use crate::error::Result;
use crate::forge::{ArtifactCache, ForgeResolver, ResolvedRelease};
use crate::puppetfile::ModuleSpec;

/// The fields of `metadata.json` that matter for convergence.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct ModuleMetadata {
    /// `owner-name` or `owner/name`
    pub name: String,
    pub version: String,
}

impl ModuleMetadata {
    fn slug(&self) -> String {
        self.name.replace('/', "-")
    }
}

#[derive(Debug)]
pub struct ForgeModule {
    spec: ModuleSpec,
    resolver: ForgeResolver,
    artifacts: ArtifactCache,
    resolved: OnceLock<ResolvedRelease>,
}

impl ForgeModule {
    pub fn new(spec: ModuleSpec, ctx: &ModuleContext) -> Self {
        Self {
            spec,
            resolver: ctx.forge.clone(),
            artifacts: ctx.artifacts.clone(),
            resolved: OnceLock::new(),
        }
    }

    pub fn spec(&self) -> &ModuleSpec {
        &self.spec
    }

    /// Releases of one module share a download directory.
    pub fn cache_key(&self) -> PathBuf {
        self.artifacts.root().join(self.spec.slug())
    }

    pub fn metadata(&self) -> Option<ModuleMetadata> {
        let path = self.spec.path.join(MODULE_METADATA);
        let text = fs::read_to_string(&path).ok()?;
        match serde_json::from_str(&text) {
            Ok(metadata) => Some(metadata),
            Err(e) => {
                debug!("Ignoring malformed {}: {}", path.display(), e);
                None
            }
        }
    }

    fn owned_metadata(&self) -> Option<ModuleMetadata> {
        self.metadata().filter(|m| m.slug() == self.spec.slug())
    }

    pub fn deployed_version(&self) -> Option<String> {
        self.owned_metadata().map(|m| m.version)
    }

    /// Pick the release to install, asking the registry at most once.
    pub fn resolve(&self) -> Result<ResolvedRelease> {
        if let Some(resolved) = self.resolved.get() {
            return Ok(resolved.clone());
        }
        let deployed = self.deployed_version();
        let resolved =
            self.resolver
                .resolve(&self.spec.slug(), &self.spec.version, deployed.as_deref())?;
        let _ = self.resolved.set(resolved.clone());
        Ok(resolved)
    }

    pub fn status(&self) -> Result<ModuleStatus> {
        if !self.spec.path.exists() {
            return Ok(ModuleStatus::Absent);
        }
        let Some(metadata) = self.metadata() else {
            return Ok(ModuleStatus::Mismatched);
        };
        if metadata.slug() != self.spec.slug() {
            debug!(
                "{} holds {}, expected {}",
                self.spec.path.display(),
                metadata.name,
                self.spec.slug()
            );
            return Ok(ModuleStatus::Mismatched);
        }
        if self.resolve()?.version != metadata.version {
            return Ok(ModuleStatus::Outdated);
        }
        Ok(ModuleStatus::InSync)
    }

    pub fn sync(&self) -> Result<bool> {
        let status = self.status()?;
        if status == ModuleStatus::InSync {
            return Ok(false);
        }
        let resolved = self.resolve()?;
        info!(
            "{} {} {} ({})",
            match status {
                ModuleStatus::Absent => "Installing",
                ModuleStatus::Outdated => "Upgrading",
                _ => "Reinstalling",
            },
            self.spec.slug(),
            resolved.version,
            self.spec.path.display()
        );
        self.install(&resolved)?;
        Ok(true)
    }

    fn install(&self, resolved: &ResolvedRelease) -> Result<()> {
        let release = match &resolved.release {
            Some(release) => release.clone(),
            None => self.resolver.release(&self.spec.slug(), &resolved.version)?,
        };
        let artifact = self
            .artifacts
            .fetch(self.resolver.client().as_ref(), &release)?;
        let bytes = fs::read(&artifact)?;

        replace_dir(&self.spec.path, |staging| {
            archive::unpack(&bytes, staging, true)?;
            let metadata_path = staging.join(MODULE_METADATA);
            if !metadata_path.exists() {
                let metadata = ModuleMetadata {
                    name: self.spec.slug(),
                    version: release.version.clone(),
                };
                fs::write(&metadata_path, serde_json::to_string_pretty(&metadata)?)?;
            }
            Ok(())
        })
    }
}

#[cfg(test)]
mod tests {
    use super::super::test_support::*;
    use super::super::Module;
    use super::*;
    use crate::archive::build_tar_gz;
    use crate::forge::resolver::tests::CountingForge;
    use crate::vcs::fake::FakeVcs;
    use std::sync::atomic::Ordering;
    use std::sync::Arc;
    use tempfile::TempDir;

    fn release_tarball(slug: &str, version: &str) -> Vec<u8> {
        let metadata = format!(r#"{{"name": "{}", "version": "{}"}}"#, slug, version);
        let metadata_path = format!("{}-{}/metadata.json", slug, version);
        let manifest_path = format!("{}-{}/manifests/init.pp", slug, version);
        build_tar_gz(&[
            (metadata_path.as_str(), metadata.as_str()),
            (manifest_path.as_str(), "class stdlib {}"),
        ])
    }

    fn forge() -> Arc<CountingForge> {
        let forge = CountingForge::default();
        for version in ["9.3.0", "9.4.1"] {
            forge.add(
                "puppetlabs-stdlib",
                version,
                Some(release_tarball("puppetlabs-stdlib", version)),
            );
        }
        Arc::new(forge)
    }

    fn module(temp: &TempDir, forge: &Arc<CountingForge>, decl: &str) -> Module {
        let ctx = context(&temp.path().join("cache"), &Arc::new(FakeVcs::new()), forge);
        let pf = parse(decl, &temp.path().join("env"));
        Module::build(&pf.modules[0], &ctx).unwrap()
    }

    #[test]
    fn test_install_then_insync() {
        let temp = TempDir::new().unwrap();
        let forge = forge();
        let m = module(&temp, &forge, "mod 'puppetlabs/stdlib', '9.3.0'");

        assert_eq!(m.status().unwrap(), ModuleStatus::Absent);
        assert!(m.sync(false).unwrap());
        assert!(m.path().join("manifests/init.pp").is_file());
        assert_eq!(m.deployed_version().as_deref(), Some("9.3.0"));
        assert_eq!(m.status().unwrap(), ModuleStatus::InSync);
        assert!(!m.sync(false).unwrap());
        assert_eq!(forge.download_calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn test_outdated_module_is_upgraded() {
        let temp = TempDir::new().unwrap();
        let forge = forge();
        let old = module(&temp, &forge, "mod 'puppetlabs/stdlib', '9.3.0'");
        old.sync(false).unwrap();

        let new = module(&temp, &forge, "mod 'puppetlabs/stdlib', :latest");
        assert_eq!(new.status().unwrap(), ModuleStatus::Outdated);
        assert!(new.sync(false).unwrap());
        assert_eq!(new.deployed_version().as_deref(), Some("9.4.1"));
    }

    #[test]
    fn test_unpinned_keeps_what_is_deployed() {
        let temp = TempDir::new().unwrap();
        let forge = forge();
        module(&temp, &forge, "mod 'puppetlabs/stdlib', '9.3.0'")
            .sync(false)
            .unwrap();
        let calls = forge.release_calls.load(Ordering::SeqCst);

        let unpinned = module(&temp, &forge, "mod 'puppetlabs/stdlib'");
        assert_eq!(unpinned.status().unwrap(), ModuleStatus::InSync);
        let resolved = unpinned.resolve().unwrap();
        assert_eq!(resolved.resolved_version.as_deref(), Some("9.3.0"));
        assert_eq!(forge.release_calls.load(Ordering::SeqCst), calls);
    }

    #[test]
    fn test_foreign_metadata_is_mismatched() {
        let temp = TempDir::new().unwrap();
        let forge = forge();
        let m = module(&temp, &forge, "mod 'puppetlabs/stdlib', '9.3.0'");
        fs::create_dir_all(m.path()).unwrap();
        fs::write(
            m.path().join("metadata.json"),
            r#"{"name": "someoneelse-stdlib", "version": "9.3.0"}"#,
        )
        .unwrap();
        assert_eq!(m.status().unwrap(), ModuleStatus::Mismatched);
        assert_eq!(m.deployed_version(), None);

        assert!(m.sync(false).unwrap());
        assert_eq!(m.status().unwrap(), ModuleStatus::InSync);
    }

    #[test]
    fn test_directory_without_metadata_is_mismatched() {
        let temp = TempDir::new().unwrap();
        let forge = forge();
        let m = module(&temp, &forge, "mod 'puppetlabs/stdlib', '9.3.0'");
        fs::create_dir_all(m.path()).unwrap();
        fs::write(m.path().join("metadata.json"), "{ not json").unwrap();
        assert_eq!(m.status().unwrap(), ModuleStatus::Mismatched);
    }

    #[test]
    fn test_missing_release_leaves_disk_untouched() {
        let temp = TempDir::new().unwrap();
        let forge = forge();
        let m = module(&temp, &forge, "mod 'puppetlabs/stdlib', '1.0.0'");
        let err = m.sync(false).unwrap_err();
        assert!(err.is_unresolvable());
        assert!(!m.path().exists());
    }
}
