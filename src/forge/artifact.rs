//! Download cache for Forge release tarballs.
//!
//! Layout: `<root>/<owner-name>/<owner-name>-<version>.tar.gz`. Releases are
//! immutable, so a cached file that still matches its digest is reused
//! across runs.

use std::fs;
use std::path::{Path, PathBuf};

use log::{info, warn};

use super::client::{ForgeClient, Release};
use super::integrity::ContentHash;
use crate::error::Result;

#[derive(Debug, Clone)]
pub struct ArtifactCache {
    root: PathBuf,
}

impl ArtifactCache {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Where the artifact for `release` lives.
    pub fn path(&self, release: &Release) -> PathBuf {
        self.root
            .join(&release.module)
            .join(format!("{}.tar.gz", release.slug()))
    }

    /// Return a verified local copy of `release`, downloading it if needed.
    ///
    /// A digest mismatch on a fresh download is an error and nothing is
    /// written. A stale cached copy that no longer matches is replaced.
    pub fn fetch(&self, client: &dyn ForgeClient, release: &Release) -> Result<PathBuf> {
        let path = self.path(release);
        let expected = release.file_sha256.as_deref().map(ContentHash::from_hex);

        if path.is_file() {
            match &expected {
                None => return Ok(path),
                Some(expected) => {
                    if ContentHash::of_file(&path)? == *expected {
                        return Ok(path);
                    }
                    warn!(
                        "Cached {} does not match its checksum, downloading again",
                        path.display()
                    );
                }
            }
        }

        info!("Downloading {}", release.slug());
        let bytes = client.download(release)?;
        if let Some(expected) = &expected {
            expected.check(&release.slug(), &bytes)?;
        }

        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        // Write beside the target and rename so readers never see a partial file
        let partial = path.with_extension("gz.partial");
        fs::write(&partial, &bytes)?;
        fs::rename(&partial, &path)?;
        Ok(path)
    }
}
