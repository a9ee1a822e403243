//! Shared test utilities for integration and E2E tests.
//!
//! Add `mod common;` to a test file, then use the helpers:
//!
//! ```rust,ignore
//! mod common;
//! use common::prelude::*;
//!
//! let fixture = TestFixture::new().with_config(configs::EMPTY);
//! fixture.command().args(["deploy", "display"]).assert().success();
//! ```

use assert_fs::prelude::*;
use std::path::{Path, PathBuf};
use std::process::Command;

/// Re-export commonly used test dependencies for convenience.
pub mod prelude {
    pub use assert_cmd::cargo::cargo_bin_cmd;
    pub use assert_fs::prelude::*;
    #[allow(unused_imports)]
    pub use assert_fs::TempDir;
    pub use predicates::prelude::*;

    #[allow(unused_imports)]
    pub use super::configs;
    #[allow(unused_imports)]
    pub use super::{git_available, GitRepo};
    pub use super::TestFixture;
}

/// Configuration snippets for testing.
#[allow(dead_code)]
pub mod configs {
    /// No sources at all.
    pub const EMPTY: &str = "pool_size: 2\n";

    /// Not YAML a mapping can be read from.
    pub const INVALID_YAML: &str = "sources: [unclosed\n";

    /// Only the puppetfile purge level, so no environment purge runs.
    pub const PUPPETFILE_PURGE_ONLY: &str = r#"
deploy:
  purge_levels: [puppetfile]
"#;
}

/// Whether a `git` binary can be run.
#[allow(dead_code)]
pub fn git_available() -> bool {
    Command::new("git")
        .arg("--version")
        .output()
        .map(|o| o.status.success())
        .unwrap_or(false)
}

/// A temporary directory holding `envdeploy.yaml`, a cache root and whatever
/// files a test adds.
pub struct TestFixture {
    temp_dir: assert_fs::TempDir,
}

impl TestFixture {
    /// Create a new test fixture with an empty temporary directory.
    pub fn new() -> Self {
        Self {
            temp_dir: assert_fs::TempDir::new().expect("Failed to create temp directory"),
        }
    }

    /// Write `envdeploy.yaml` with the given content.
    pub fn with_config(self, content: &str) -> Self {
        self.temp_dir
            .child("envdeploy.yaml")
            .write_str(content)
            .expect("Failed to write config file");
        self
    }

    /// Add a file with the given path and content.
    pub fn with_file(self, path: &str, content: &str) -> Self {
        self.temp_dir
            .child(path)
            .write_str(content)
            .expect("Failed to write file");
        self
    }

    /// Create an empty directory.
    #[allow(dead_code)]
    pub fn with_dir(self, path: &str) -> Self {
        self.temp_dir
            .child(path)
            .create_dir_all()
            .expect("Failed to create directory");
        self
    }

    pub fn path(&self) -> &Path {
        self.temp_dir.path()
    }

    pub fn config_path(&self) -> PathBuf {
        self.temp_dir.path().join("envdeploy.yaml")
    }

    pub fn cache_root(&self) -> PathBuf {
        self.temp_dir.path().join("cache")
    }

    #[allow(dead_code)]
    pub fn child(&self, path: &str) -> assert_fs::fixture::ChildPath {
        self.temp_dir.child(path)
    }

    /// The `envdeploy` binary, run inside the fixture with its config and
    /// cache root and without color.
    pub fn command(&self) -> assert_cmd::Command {
        let mut cmd = assert_cmd::cargo::cargo_bin_cmd!("envdeploy");
        cmd.current_dir(self.path())
            .env_remove("ENVDEPLOY_CONFIG")
            .env_remove("ENVDEPLOY_CACHE")
            .env_remove("RUST_LOG")
            .arg("--color")
            .arg("never")
            .arg("--config")
            .arg(self.config_path())
            .arg("--cache-root")
            .arg(self.cache_root());
        cmd
    }
}

impl Default for TestFixture {
    fn default() -> Self {
        Self::new()
    }
}

/// A non-bare git repository built with the `git` binary.
#[allow(dead_code)]
pub struct GitRepo {
    path: PathBuf,
}

#[allow(dead_code)]
impl GitRepo {
    /// `git init` at `path` with `branch` as the unborn branch.
    pub fn init(path: &Path, branch: &str) -> Self {
        std::fs::create_dir_all(path).expect("Failed to create repository directory");
        let repo = Self {
            path: path.to_path_buf(),
        };
        repo.git(&["init", "-q"]);
        repo.git(&["checkout", "-q", "-b", branch]);
        repo
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Remote string other repositories clone from.
    pub fn remote(&self) -> String {
        self.path.display().to_string()
    }

    pub fn write(&self, file: &str, content: &str) -> &Self {
        let target = self.path.join(file);
        if let Some(parent) = target.parent() {
            std::fs::create_dir_all(parent).expect("Failed to create parent directory");
        }
        std::fs::write(target, content).expect("Failed to write file");
        self
    }

    pub fn commit(&self, message: &str) -> &Self {
        self.git(&["add", "-A"]);
        self.git(&[
            "-c",
            "user.name=envdeploy tests",
            "-c",
            "user.email=tests@example.com",
            "commit",
            "-q",
            "-m",
            message,
        ]);
        self
    }

    pub fn branch(&self, name: &str) -> &Self {
        self.git(&["checkout", "-q", "-b", name]);
        self
    }

    pub fn checkout(&self, name: &str) -> &Self {
        self.git(&["checkout", "-q", name]);
        self
    }

    pub fn tag(&self, name: &str) -> &Self {
        self.git(&["tag", name]);
        self
    }

    pub fn head(&self) -> String {
        let output = Command::new("git")
            .args(["rev-parse", "HEAD"])
            .current_dir(&self.path)
            .output()
            .expect("Failed to run git rev-parse");
        String::from_utf8_lossy(&output.stdout).trim().to_string()
    }

    fn git(&self, args: &[&str]) {
        let status = Command::new("git")
            .args(args)
            .current_dir(&self.path)
            .status()
            .expect("Failed to run git");
        assert!(status.success(), "git {:?} failed", args);
    }
}
