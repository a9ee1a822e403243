//! In-memory `Vcs` used by unit tests.
//!
//! Directories are created on disk so filesystem checks behave normally, but
//! refs, heads and dirtiness live in memory and can be manipulated directly.

use std::collections::{BTreeMap, HashMap};
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;

use super::Vcs;
use crate::error::{Error, Result};

#[derive(Debug, Clone, Default)]
pub struct FakeRemote {
    pub branches: BTreeMap<String, String>,
    pub tags: BTreeMap<String, String>,
    pub files: HashMap<(String, String), Vec<u8>>,
}

#[derive(Debug, Clone, Default)]
struct FakeWorktree {
    origin: Option<String>,
    head: Option<String>,
    dirty: bool,
}

#[derive(Debug, Default)]
pub struct FakeVcs {
    remotes: Mutex<HashMap<String, FakeRemote>>,
    mirrors: Mutex<HashMap<PathBuf, (String, FakeRemote)>>,
    worktrees: Mutex<HashMap<PathBuf, FakeWorktree>>,
    pub clone_mirror_calls: AtomicUsize,
    pub fetch_calls: AtomicUsize,
    pub checkout_calls: AtomicUsize,
    pub clone_calls: AtomicUsize,
    /// Every `clean` call with its exclusion list
    pub cleaned: Mutex<Vec<(PathBuf, Vec<String>)>>,
}

impl FakeVcs {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn add_branch(&self, remote: &str, branch: &str, sha: &str) {
        let mut remotes = self.remotes.lock().unwrap();
        let entry = remotes.entry(remote.to_string()).or_default();
        entry.branches.insert(branch.to_string(), sha.to_string());
    }

    pub fn add_tag(&self, remote: &str, tag: &str, sha: &str) {
        let mut remotes = self.remotes.lock().unwrap();
        let entry = remotes.entry(remote.to_string()).or_default();
        entry.tags.insert(tag.to_string(), sha.to_string());
    }

    pub fn add_file(&self, remote: &str, sha: &str, path: &str, content: &str) {
        let mut remotes = self.remotes.lock().unwrap();
        let entry = remotes.entry(remote.to_string()).or_default();
        entry
            .files
            .insert((sha.to_string(), path.to_string()), content.as_bytes().to_vec());
    }

    pub fn set_dirty(&self, worktree: &Path, dirty: bool) {
        let mut trees = self.worktrees.lock().unwrap();
        trees.entry(worktree.to_path_buf()).or_default().dirty = dirty;
    }

    pub fn set_origin(&self, worktree: &Path, origin: &str) {
        let mut trees = self.worktrees.lock().unwrap();
        trees.entry(worktree.to_path_buf()).or_default().origin = Some(origin.to_string());
    }

    pub fn set_head(&self, worktree: &Path, sha: &str) {
        let mut trees = self.worktrees.lock().unwrap();
        trees.entry(worktree.to_path_buf()).or_default().head = Some(sha.to_string());
    }

    pub fn head_of(&self, worktree: &Path) -> Option<String> {
        let trees = self.worktrees.lock().unwrap();
        trees.get(worktree).and_then(|t| t.head.clone())
    }

    fn snapshot(&self, remote: &str) -> Result<FakeRemote> {
        self.remotes
            .lock()
            .unwrap()
            .get(remote)
            .cloned()
            .ok_or_else(|| Error::GitCommand {
                command: "clone --mirror".to_string(),
                target: remote.to_string(),
                stderr: format!("fatal: repository '{}' does not exist", remote),
            })
    }

    fn mirror(&self, git_dir: &Path) -> Result<FakeRemote> {
        self.mirrors
            .lock()
            .unwrap()
            .get(git_dir)
            .map(|(_, refs)| refs.clone())
            .ok_or_else(|| Error::GitCommand {
                command: "rev-parse".to_string(),
                target: git_dir.display().to_string(),
                stderr: "fatal: not a git repository".to_string(),
            })
    }

    fn all_commits(refs: &FakeRemote) -> impl Iterator<Item = &String> {
        refs.branches.values().chain(refs.tags.values())
    }
}

impl Vcs for FakeVcs {
    fn name(&self) -> &'static str {
        "fake"
    }

    fn clone_mirror(&self, remote: &str, dest: &Path) -> Result<()> {
        self.clone_mirror_calls.fetch_add(1, Ordering::SeqCst);
        let refs = self.snapshot(remote)?;
        fs::create_dir_all(dest.join("objects"))?;
        self.mirrors
            .lock()
            .unwrap()
            .insert(dest.to_path_buf(), (remote.to_string(), refs));
        Ok(())
    }

    fn fetch(&self, git_dir: &Path) -> Result<()> {
        self.fetch_calls.fetch_add(1, Ordering::SeqCst);
        let remote = {
            let mirrors = self.mirrors.lock().unwrap();
            mirrors.get(git_dir).map(|(remote, _)| remote.clone())
        };
        let remote = match remote {
            Some(remote) => remote,
            None => {
                return Err(Error::GitCommand {
                    command: "fetch origin --prune".to_string(),
                    target: git_dir.display().to_string(),
                    stderr: "fatal: not a git repository".to_string(),
                })
            }
        };
        let refs = self.snapshot(&remote)?;
        self.mirrors
            .lock()
            .unwrap()
            .insert(git_dir.to_path_buf(), (remote, refs));
        Ok(())
    }

    fn resolve(&self, git_dir: &Path, reference: &str) -> Result<Option<String>> {
        let refs = self.mirror(git_dir)?;
        if let Some(sha) = refs.branches.get(reference) {
            return Ok(Some(sha.clone()));
        }
        if let Some(sha) = refs.tags.get(reference) {
            return Ok(Some(sha.clone()));
        }
        let found = Self::all_commits(&refs)
            .find(|sha| sha.starts_with(reference) && reference.len() >= 7)
            .cloned();
        Ok(found)
    }

    fn branches(&self, git_dir: &Path) -> Result<Vec<String>> {
        Ok(self.mirror(git_dir)?.branches.keys().cloned().collect())
    }

    fn tags(&self, git_dir: &Path) -> Result<Vec<String>> {
        Ok(self.mirror(git_dir)?.tags.keys().cloned().collect())
    }

    fn clone_with_alternates(&self, remote: &str, cache_dir: &Path, dest: &Path) -> Result<()> {
        self.clone_calls.fetch_add(1, Ordering::SeqCst);
        fs::create_dir_all(dest.join(".git"))?;
        super::write_alternates(&dest.join(".git"), cache_dir)?;
        self.worktrees.lock().unwrap().insert(
            dest.to_path_buf(),
            FakeWorktree {
                origin: Some(remote.to_string()),
                head: None,
                dirty: false,
            },
        );
        Ok(())
    }

    fn head(&self, worktree: &Path) -> Result<Option<String>> {
        Ok(self.head_of(worktree))
    }

    fn origin(&self, worktree: &Path) -> Result<Option<String>> {
        let trees = self.worktrees.lock().unwrap();
        match trees.get(worktree) {
            Some(tree) => Ok(tree.origin.clone()),
            None => Err(Error::GitCommand {
                command: "config --get remote.origin.url".to_string(),
                target: worktree.display().to_string(),
                stderr: "fatal: not a git repository".to_string(),
            }),
        }
    }

    fn is_dirty(&self, worktree: &Path) -> Result<bool> {
        let trees = self.worktrees.lock().unwrap();
        Ok(trees.get(worktree).map(|t| t.dirty).unwrap_or(false))
    }

    fn checkout(&self, worktree: &Path, commit: &str, force: bool) -> Result<()> {
        self.checkout_calls.fetch_add(1, Ordering::SeqCst);
        let mut trees = self.worktrees.lock().unwrap();
        let tree = trees.entry(worktree.to_path_buf()).or_default();
        if tree.dirty && !force {
            return Err(Error::GitCommand {
                command: format!("checkout --detach {}", commit),
                target: worktree.display().to_string(),
                stderr: "error: Your local changes would be overwritten by checkout".to_string(),
            });
        }
        tree.head = Some(commit.to_string());
        tree.dirty = false;
        Ok(())
    }

    fn clean(&self, worktree: &Path, _force: bool, excludes: &[String]) -> Result<Vec<String>> {
        self.cleaned
            .lock()
            .unwrap()
            .push((worktree.to_path_buf(), excludes.to_vec()));
        Ok(Vec::new())
    }

    fn blob_at(&self, git_dir: &Path, rev: &str, path: &str) -> Result<Vec<u8>> {
        let (remote, refs) = {
            let mirrors = self.mirrors.lock().unwrap();
            mirrors.get(git_dir).cloned().ok_or_else(|| Error::BlobNotFound {
                path: path.to_string(),
                rev: rev.to_string(),
            })?
        };
        let _ = remote;
        let sha = refs
            .branches
            .get(rev)
            .or_else(|| refs.tags.get(rev))
            .cloned()
            .unwrap_or_else(|| rev.to_string());
        refs.files
            .get(&(sha, path.to_string()))
            .cloned()
            .ok_or_else(|| Error::BlobNotFound {
                path: path.to_string(),
                rev: rev.to_string(),
            })
    }
}
