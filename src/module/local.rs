//! Modules that live on the local filesystem.
//!
//! A `:local => true` module is content already committed to the
//! environment. It is never touched and always reports in sync. A
//! `local_directory` module mirrors another directory on the host.

use std::fs;

use log::info;

use super::{replace_dir, ModuleStatus};
use crate::archive::{self, DigestMap};
use crate::error::Result;
use crate::forge::ContentHash;
use crate::puppetfile::ModuleSpec;

#[derive(Debug)]
pub struct LocalModule {
    spec: ModuleSpec,
}

impl LocalModule {
    pub fn new(spec: ModuleSpec) -> Self {
        Self { spec }
    }

    pub fn spec(&self) -> &ModuleSpec {
        &self.spec
    }

    pub fn status(&self) -> Result<ModuleStatus> {
        Ok(ModuleStatus::InSync)
    }

    pub fn sync(&self) -> Result<bool> {
        Ok(false)
    }

    pub fn deployed_version(&self) -> Option<String> {
        Some("local".to_string())
    }

    pub fn resolve(&self) -> Result<String> {
        Ok("local".to_string())
    }
}

#[derive(Debug)]
pub struct LocalDirectoryModule {
    spec: ModuleSpec,
}

/// One digest standing for a whole tree.
fn tree_digest(files: &DigestMap) -> String {
    let listing: String = files
        .iter()
        .map(|(path, digest)| format!("{}  {}\n", digest, path))
        .collect();
    ContentHash::compute(listing.as_bytes()).as_str().to_string()
}

impl LocalDirectoryModule {
    pub fn new(spec: ModuleSpec) -> Self {
        Self { spec }
    }

    pub fn spec(&self) -> &ModuleSpec {
        &self.spec
    }

    fn source_digests(&self) -> Result<DigestMap> {
        let source = std::path::Path::new(&self.spec.source);
        // Surface a missing source as an I/O error rather than an empty tree
        fs::metadata(source)?;
        archive::digest_tree(source, &[])
    }

    pub fn status(&self) -> Result<ModuleStatus> {
        if !self.spec.path.exists() {
            return Ok(ModuleStatus::Absent);
        }
        if !self.spec.path.is_dir() {
            return Ok(ModuleStatus::Mismatched);
        }
        if archive::digest_tree(&self.spec.path, &[])? != self.source_digests()? {
            return Ok(ModuleStatus::Outdated);
        }
        Ok(ModuleStatus::InSync)
    }

    pub fn sync(&self) -> Result<bool> {
        let status = self.status()?;
        if status == ModuleStatus::InSync {
            return Ok(false);
        }
        if status == ModuleStatus::Mismatched {
            fs::remove_file(&self.spec.path)?;
        }
        info!("Copying {} into {}", self.spec.source, self.spec.path.display());
        replace_dir(&self.spec.path, |staging| {
            archive::copy_tree(std::path::Path::new(&self.spec.source), staging)
        })?;
        Ok(true)
    }

    pub fn deployed_version(&self) -> Option<String> {
        if !self.spec.path.is_dir() {
            return None;
        }
        archive::digest_tree(&self.spec.path, &[])
            .ok()
            .map(|files| tree_digest(&files))
    }

    pub fn resolve(&self) -> Result<String> {
        Ok(tree_digest(&self.source_digests()?))
    }
}
