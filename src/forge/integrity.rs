//! SHA-256 content hashes for downloaded artifacts.

use std::fmt;
use std::fs::File;
use std::io::{self, Read};
use std::path::Path;

use sha2::{Digest, Sha256};

use crate::error::{Error, Result};

/// A lowercase SHA-256 hex digest.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct ContentHash(String);

impl ContentHash {
    /// Hash in-memory data.
    pub fn compute(data: &[u8]) -> Self {
        let mut hasher = Sha256::new();
        hasher.update(data);
        ContentHash(hex_encode(&hasher.finalize()))
    }

    /// Hash a file without loading it whole.
    pub fn of_file(path: &Path) -> Result<Self> {
        let mut file = File::open(path)?;
        Self::of_reader(&mut file)
    }

    pub fn of_reader(reader: &mut impl Read) -> Result<Self> {
        let mut hasher = Sha256::new();
        io::copy(reader, &mut hasher)?;
        Ok(ContentHash(hex_encode(&hasher.finalize())))
    }

    /// Wrap an expected digest, normalizing case and an optional
    /// `sha256:` prefix.
    pub fn from_hex(hex: &str) -> Self {
        ContentHash(hex.trim().trim_start_matches("sha256:").to_ascii_lowercase())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    pub fn verify(&self, data: &[u8]) -> bool {
        ContentHash::compute(data) == *self
    }

    /// Fail with [`Error::ChecksumMismatch`] unless `data` hashes to `self`.
    pub fn check(&self, artifact: &str, data: &[u8]) -> Result<()> {
        let actual = ContentHash::compute(data);
        if actual == *self {
            Ok(())
        } else {
            Err(Error::ChecksumMismatch {
                artifact: artifact.to_string(),
                expected: self.0.clone(),
                actual: actual.0,
            })
        }
    }
}

impl fmt::Display for ContentHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

fn hex_encode(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{b:02x}")).collect()
}
