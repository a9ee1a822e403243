use std::fs;
use std::path::Path;

use git2::build::CheckoutBuilder;
use git2::{
    BranchType, Cred, CredentialType, ErrorCode, FetchOptions, FetchPrune, ObjectType,
    RemoteCallbacks, Repository, Status, StatusOptions,
};
use log::debug;

use super::{write_alternates, Vcs};
use crate::error::{Error, Result};
use crate::path::glob_match;

/// Backend that links libgit2 and never spawns a process.
#[derive(Debug, Clone, Default)]
pub struct NativeGit;

fn git_err<'a>(operation: &'a str, target: &'a Path) -> impl FnOnce(git2::Error) -> Error + 'a {
    move |e| Error::Git2 {
        operation: operation.to_string(),
        target: target.display().to_string(),
        message: e.message().to_string(),
    }
}

fn is_missing(e: &git2::Error) -> bool {
    matches!(
        e.code(),
        ErrorCode::NotFound | ErrorCode::InvalidSpec | ErrorCode::Ambiguous
    )
}

/// Credentials the way a command-line user would have them: the SSH agent
/// first, then configured credential helpers.
fn callbacks<'a>() -> RemoteCallbacks<'a> {
    let mut callbacks = RemoteCallbacks::new();
    callbacks.credentials(|url, username, allowed| {
        if allowed.contains(CredentialType::SSH_KEY) {
            return Cred::ssh_key_from_agent(username.unwrap_or("git"));
        }
        if allowed.contains(CredentialType::USER_PASS_PLAINTEXT) {
            let config = git2::Config::open_default()?;
            return Cred::credential_helper(&config, url, username);
        }
        Cred::default()
    });
    callbacks
}

impl NativeGit {
    pub fn new() -> Self {
        Self
    }

    fn open(&self, path: &Path, operation: &str) -> Result<Repository> {
        Repository::open(path).map_err(git_err(operation, path))
    }

    fn fetch_origin(&self, repo: &Repository, git_dir: &Path) -> Result<()> {
        let mut remote = repo
            .find_remote("origin")
            .map_err(git_err("fetch", git_dir))?;
        let mut options = FetchOptions::new();
        options.prune(FetchPrune::On);
        options.remote_callbacks(callbacks());
        debug!("Fetching origin into {}", git_dir.display());
        remote
            .fetch(&[] as &[&str], Some(&mut options), None)
            .map_err(git_err("fetch", git_dir))
    }
}

impl Vcs for NativeGit {
    fn name(&self) -> &'static str {
        "native"
    }

    fn clone_mirror(&self, remote: &str, dest: &Path) -> Result<()> {
        if let Some(parent) = dest.parent() {
            fs::create_dir_all(parent)?;
        }
        let repo = Repository::init_bare(dest).map_err(git_err("clone --mirror", dest))?;
        repo.remote_with_fetch("origin", remote, "+refs/*:refs/*")
            .map_err(git_err("clone --mirror", dest))?;
        repo.config()
            .and_then(|mut config| config.set_bool("remote.origin.mirror", true))
            .map_err(git_err("clone --mirror", dest))?;

        if let Err(e) = self.fetch_origin(&repo, dest) {
            // A half-created mirror would be fetched from next time
            drop(repo);
            fs::remove_dir_all(dest)?;
            return Err(e);
        }
        Ok(())
    }

    fn fetch(&self, git_dir: &Path) -> Result<()> {
        let repo = self.open(git_dir, "fetch")?;
        self.fetch_origin(&repo, git_dir)
    }

    fn resolve(&self, git_dir: &Path, reference: &str) -> Result<Option<String>> {
        let repo = self.open(git_dir, "rev-parse")?;
        let spec = format!("{}^{{commit}}", reference);
        let result = match repo.revparse_single(&spec) {
            Ok(object) => Ok(Some(object.id().to_string())),
            Err(e) if is_missing(&e) => Ok(None),
            Err(e) => Err(git_err("rev-parse", git_dir)(e)),
        };
        result
    }

    fn branches(&self, git_dir: &Path) -> Result<Vec<String>> {
        let repo = self.open(git_dir, "branches")?;
        let mut names = Vec::new();
        for entry in repo
            .branches(Some(BranchType::Local))
            .map_err(git_err("branches", git_dir))?
        {
            let (branch, _) = entry.map_err(git_err("branches", git_dir))?;
            if let Some(name) = branch.name().map_err(git_err("branches", git_dir))? {
                names.push(name.to_string());
            }
        }
        names.sort();
        Ok(names)
    }

    fn tags(&self, git_dir: &Path) -> Result<Vec<String>> {
        let repo = self.open(git_dir, "tags")?;
        let tags = repo.tag_names(None).map_err(git_err("tags", git_dir))?;
        let mut names: Vec<String> = tags.iter().flatten().map(|t| t.to_string()).collect();
        names.sort();
        Ok(names)
    }

    fn clone_with_alternates(&self, remote: &str, cache_dir: &Path, dest: &Path) -> Result<()> {
        fs::create_dir_all(dest)?;
        let repo = Repository::init(dest).map_err(git_err("init", dest))?;
        write_alternates(&dest.join(".git"), cache_dir)?;
        repo.remote("origin", remote)
            .map_err(git_err("remote add origin", dest))?;
        repo.remote("cache", &cache_dir.to_string_lossy())
            .map_err(git_err("remote add cache", dest))?;
        Ok(())
    }

    fn head(&self, worktree: &Path) -> Result<Option<String>> {
        let repo = self.open(worktree, "rev-parse HEAD")?;
        let result = match repo.head() {
            Ok(head) => {
                let commit = head
                    .peel_to_commit()
                    .map_err(git_err("rev-parse HEAD", worktree))?;
                Ok(Some(commit.id().to_string()))
            }
            Err(e) if matches!(e.code(), ErrorCode::UnbornBranch | ErrorCode::NotFound) => {
                Ok(None)
            }
            Err(e) => Err(git_err("rev-parse HEAD", worktree)(e)),
        };
        result
    }

    fn origin(&self, worktree: &Path) -> Result<Option<String>> {
        let repo = self.open(worktree, "remote get-url origin")?;
        let result = match repo.find_remote("origin") {
            Ok(remote) => Ok(remote.url().map(|u| u.to_string())),
            Err(e) if e.code() == ErrorCode::NotFound => Ok(None),
            Err(e) => Err(git_err("remote get-url origin", worktree)(e)),
        };
        result
    }

    fn is_dirty(&self, worktree: &Path) -> Result<bool> {
        let repo = self.open(worktree, "status")?;
        let mut options = StatusOptions::new();
        options.include_untracked(false).include_ignored(false);
        let statuses = repo
            .statuses(Some(&mut options))
            .map_err(git_err("status", worktree))?;
        Ok(statuses
            .iter()
            .any(|entry| !entry.status().is_empty() && entry.status() != Status::IGNORED))
    }

    fn checkout(&self, worktree: &Path, commit: &str, force: bool) -> Result<()> {
        let repo = self.open(worktree, "checkout")?;
        let object = repo
            .revparse_single(commit)
            .and_then(|o| o.peel(ObjectType::Commit))
            .map_err(git_err("checkout", worktree))?;

        let unborn = repo.head().is_err();
        let mut builder = CheckoutBuilder::new();
        if force || unborn {
            builder.force();
        } else {
            builder.safe();
        }
        repo.checkout_tree(&object, Some(&mut builder))
            .map_err(git_err("checkout", worktree))?;
        repo.set_head_detached(object.id())
            .map_err(git_err("checkout", worktree))
    }

    fn clean(&self, worktree: &Path, force: bool, excludes: &[String]) -> Result<Vec<String>> {
        let repo = self.open(worktree, "clean")?;
        let mut options = StatusOptions::new();
        options
            .include_untracked(true)
            .recurse_untracked_dirs(false)
            .include_ignored(false);
        let statuses = repo
            .statuses(Some(&mut options))
            .map_err(git_err("clean", worktree))?;

        let mut removed = Vec::new();
        for entry in statuses.iter() {
            if !entry.status().contains(Status::WT_NEW) {
                continue;
            }
            let Some(path) = entry.path() else { continue };
            let relative = path.trim_end_matches('/').to_string();
            let file_name = relative.rsplit('/').next().unwrap_or(&relative).to_string();

            let mut excluded = false;
            for pattern in excludes {
                if glob_match(pattern, &relative)? || glob_match(pattern, &file_name)? {
                    excluded = true;
                    break;
                }
            }
            if excluded {
                continue;
            }

            if force {
                let full = worktree.join(&relative);
                if full.is_dir() {
                    fs::remove_dir_all(&full)?;
                } else {
                    fs::remove_file(&full)?;
                }
            }
            removed.push(relative);
        }
        removed.sort();
        Ok(removed)
    }

    fn blob_at(&self, git_dir: &Path, rev: &str, path: &str) -> Result<Vec<u8>> {
        let repo = self.open(git_dir, "cat-file")?;
        let not_found = || Error::BlobNotFound {
            path: path.to_string(),
            rev: rev.to_string(),
        };

        let tree = match repo.revparse_single(rev).and_then(|o| o.peel_to_tree()) {
            Ok(tree) => tree,
            Err(e) if is_missing(&e) => return Err(not_found()),
            Err(e) => return Err(git_err("cat-file", git_dir)(e)),
        };
        let entry = match tree.get_path(Path::new(path)) {
            Ok(entry) => entry,
            Err(e) if e.code() == ErrorCode::NotFound => return Err(not_found()),
            Err(e) => return Err(git_err("cat-file", git_dir)(e)),
        };
        let object = entry
            .to_object(&repo)
            .map_err(git_err("cat-file", git_dir))?;
        let blob = object.as_blob().ok_or_else(not_found)?;
        Ok(blob.content().to_vec())
    }
}
