use std::fs;
use std::path::{Path, PathBuf};
use std::process::{Command, Output};

use log::debug;

use super::{write_alternates, Vcs};
use crate::error::{Error, Result};

/// Backend that drives the system `git` binary.
///
/// This uses the system git command, which automatically handles:
/// - SSH keys from ~/.ssh/
/// - Git credential helpers
/// - Personal access tokens
/// - Any authentication configured in ~/.gitconfig
#[derive(Debug, Clone)]
pub struct ShellGit {
    binary: PathBuf,
}

/// Where a git invocation points.
enum Target<'a> {
    None,
    GitDir(&'a Path),
    WorkTree(&'a Path),
}

impl Target<'_> {
    fn describe(&self) -> String {
        match self {
            Target::None => "git".to_string(),
            Target::GitDir(p) | Target::WorkTree(p) => p.display().to_string(),
        }
    }
}

/// Formats a git error with both stdout and stderr for better debugging.
fn format_git_error(output: &Output) -> String {
    let stderr = String::from_utf8_lossy(&output.stderr).trim().to_string();
    let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();

    match (stderr.is_empty(), stdout.is_empty()) {
        (true, true) => format!(
            "Command failed with exit code {}",
            output.status.code().unwrap_or(-1)
        ),
        (true, false) => stdout,
        (false, true) => stderr,
        (false, false) => format!("{}\n{}", stderr, stdout),
    }
}

impl Default for ShellGit {
    fn default() -> Self {
        Self::new()
    }
}

impl ShellGit {
    pub fn new() -> Self {
        Self {
            binary: PathBuf::from("git"),
        }
    }

    /// Use a specific git executable.
    pub fn with_binary(binary: impl Into<PathBuf>) -> Self {
        Self {
            binary: binary.into(),
        }
    }

    fn run(&self, target: &Target<'_>, args: &[&str]) -> Result<Output> {
        let mut cmd = Command::new(&self.binary);
        match target {
            Target::None => {}
            Target::GitDir(dir) => {
                cmd.arg("--git-dir").arg(dir);
            }
            Target::WorkTree(dir) => {
                cmd.arg("--git-dir")
                    .arg(dir.join(".git"))
                    .arg("--work-tree")
                    .arg(dir)
                    .current_dir(dir);
            }
        }
        cmd.args(args);
        debug!("Starting process: git {} ({})", args.join(" "), target.describe());

        cmd.output().map_err(|e| Error::GitCommand {
            command: args.join(" "),
            target: target.describe(),
            stderr: e.to_string(),
        })
    }

    /// Run git and fail on a non-zero exit, returning trimmed stdout.
    fn run_checked(&self, target: &Target<'_>, args: &[&str]) -> Result<String> {
        let output = self.run(target, args)?;
        if !output.status.success() {
            return Err(Error::GitCommand {
                command: args.join(" "),
                target: target.describe(),
                stderr: format_git_error(&output),
            });
        }
        Ok(String::from_utf8_lossy(&output.stdout).trim().to_string())
    }

    /// Run a query where exit code 1 with empty stderr means "nothing found".
    fn run_optional(&self, target: &Target<'_>, args: &[&str]) -> Result<Option<String>> {
        let output = self.run(target, args)?;
        if output.status.success() {
            let stdout = String::from_utf8_lossy(&output.stdout).trim().to_string();
            return Ok(if stdout.is_empty() { None } else { Some(stdout) });
        }
        if output.status.code() == Some(1) && output.stderr.is_empty() {
            return Ok(None);
        }
        Err(Error::GitCommand {
            command: args.join(" "),
            target: target.describe(),
            stderr: format_git_error(&output),
        })
    }

    fn list_refs(&self, git_dir: &Path, namespace: &str) -> Result<Vec<String>> {
        let stdout = self.run_checked(
            &Target::GitDir(git_dir),
            &["for-each-ref", "--format=%(refname)", namespace],
        )?;
        let mut names: Vec<String> = stdout
            .lines()
            .filter_map(|line| line.strip_prefix(namespace))
            .map(|name| name.to_string())
            .collect();
        names.sort();
        Ok(names)
    }
}

impl Vcs for ShellGit {
    fn name(&self) -> &'static str {
        "shellgit"
    }

    fn clone_mirror(&self, remote: &str, dest: &Path) -> Result<()> {
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)?;
        }
        let dest_str = dest.to_string_lossy();
        self.run_checked(&Target::None, &["clone", "--mirror", remote, &dest_str])?;
        Ok(())
    }

    fn fetch(&self, git_dir: &Path) -> Result<()> {
        self.run_checked(&Target::GitDir(git_dir), &["fetch", "origin", "--prune"])?;
        Ok(())
    }

    fn resolve(&self, git_dir: &Path, reference: &str) -> Result<Option<String>> {
        let spec = format!("{}^{{commit}}", reference);
        let output = self.run(
            &Target::GitDir(git_dir),
            &["rev-parse", "--verify", "--quiet", "--end-of-options", &spec],
        )?;
        if output.status.success() {
            let sha = String::from_utf8_lossy(&output.stdout).trim().to_string();
            return Ok(Some(sha));
        }
        // `--verify --quiet` exits 1 without output for unknown revisions
        if output.status.code() == Some(1) {
            return Ok(None);
        }
        Err(Error::GitCommand {
            command: format!("rev-parse --verify {}", spec),
            target: git_dir.display().to_string(),
            stderr: format_git_error(&output),
        })
    }

    fn branches(&self, git_dir: &Path) -> Result<Vec<String>> {
        self.list_refs(git_dir, "refs/heads/")
    }

    fn tags(&self, git_dir: &Path) -> Result<Vec<String>> {
        self.list_refs(git_dir, "refs/tags/")
    }

    fn clone_with_alternates(&self, remote: &str, cache_dir: &Path, dest: &Path) -> Result<()> {
        fs::create_dir_all(dest)?;
        let dest_str = dest.to_string_lossy();
        self.run_checked(&Target::None, &["init", "--quiet", &dest_str])?;
        write_alternates(&dest.join(".git"), cache_dir)?;

        let target = Target::WorkTree(dest);
        self.run_checked(&target, &["remote", "add", "origin", remote])?;
        let cache_str = cache_dir.to_string_lossy();
        self.run_checked(&target, &["remote", "add", "cache", &cache_str])?;
        Ok(())
    }

    fn head(&self, worktree: &Path) -> Result<Option<String>> {
        self.run_optional(
            &Target::WorkTree(worktree),
            &["rev-parse", "--verify", "--quiet", "HEAD"],
        )
    }

    fn origin(&self, worktree: &Path) -> Result<Option<String>> {
        self.run_optional(
            &Target::WorkTree(worktree),
            &["config", "--get", "remote.origin.url"],
        )
    }

    fn is_dirty(&self, worktree: &Path) -> Result<bool> {
        let stdout = self.run_checked(
            &Target::WorkTree(worktree),
            &["status", "--porcelain", "--untracked-files=no"],
        )?;
        Ok(!stdout.is_empty())
    }

    fn checkout(&self, worktree: &Path, commit: &str, force: bool) -> Result<()> {
        let mut args = vec!["checkout", "--quiet"];
        if force {
            args.push("--force");
        }
        args.push("--detach");
        args.push(commit);
        self.run_checked(&Target::WorkTree(worktree), &args)?;
        Ok(())
    }

    fn clean(&self, worktree: &Path, force: bool, excludes: &[String]) -> Result<Vec<String>> {
        let mut args: Vec<&str> = vec!["clean", "-d"];
        args.push(if force { "--force" } else { "--dry-run" });
        for pattern in excludes {
            args.push("--exclude");
            args.push(pattern);
        }
        let stdout = self.run_checked(&Target::WorkTree(worktree), &args)?;
        Ok(stdout
            .lines()
            .filter_map(|line| {
                line.strip_prefix("Removing ")
                    .or_else(|| line.strip_prefix("Would remove "))
            })
            .map(|path| path.trim_end_matches('/').to_string())
            .collect())
    }

    fn blob_at(&self, git_dir: &Path, rev: &str, path: &str) -> Result<Vec<u8>> {
        let spec = format!("{}:{}", rev, path);
        let target = Target::GitDir(git_dir);
        let exists = self.run(&target, &["cat-file", "-e", &spec])?;
        if !exists.status.success() {
            return Err(Error::BlobNotFound {
                path: path.to_string(),
                rev: rev.to_string(),
            });
        }
        let output = self.run(&target, &["cat-file", "blob", &spec])?;
        if !output.status.success() {
            return Err(Error::GitCommand {
                command: format!("cat-file blob {}", spec),
                target: git_dir.display().to_string(),
                stderr: format_git_error(&output),
            });
        }
        Ok(output.stdout)
    }
}
