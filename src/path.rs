//! Path manipulation utilities for envdeploy

use std::path::{Component, Path, PathBuf};
use std::sync::OnceLock;

use crate::error::{Error, Result};
use glob::Pattern;
use regex::Regex;

fn unsafe_chars() -> &'static Regex {
    static RE: OnceLock<Regex> = OnceLock::new();
    RE.get_or_init(|| Regex::new(r"[^@\w.\-]").expect("static regex"))
}

/// Turn a remote URL into a directory name for the repository cache.
///
/// Every character outside `[@\w.-]` becomes `-`. Distinct remotes that
/// sanitize to the same name share a directory; that collision is accepted.
pub fn sanitize_remote(remote: &str) -> String {
    unsafe_chars().replace_all(remote, "-").into_owned()
}

/// Lexically normalize a path, folding `.` and `..` without touching disk.
pub fn normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::CurDir => {}
            Component::ParentDir => {
                if !out.pop() {
                    out.push("..");
                }
            }
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// Resolve `path` against `base` and require the result to live strictly
/// beneath `base`.
pub fn ensure_descendant(path: &Path, base: &Path) -> Result<PathBuf> {
    let base = normalize(base);
    let candidate = if path.is_absolute() {
        normalize(path)
    } else {
        normalize(&base.join(path))
    };

    if candidate != base && candidate.starts_with(&base) {
        Ok(candidate)
    } else {
        Err(Error::PathEscape {
            path: candidate,
            base,
        })
    }
}

/// Like [`ensure_descendant`] but also accepts `base` itself.
pub fn ensure_within(path: &Path, base: &Path) -> Result<PathBuf> {
    let normalized_base = normalize(base);
    let candidate = if path.is_absolute() {
        normalize(path)
    } else {
        normalize(&normalized_base.join(path))
    };
    if candidate == normalized_base {
        return Ok(candidate);
    }
    ensure_descendant(&candidate, &normalized_base)
}

/// Match a path against a glob pattern
pub fn glob_match(pattern: &str, path: &str) -> Result<bool> {
    let pattern = Pattern::new(pattern).map_err(Error::Glob)?;
    Ok(pattern.matches(path))
}

/// True when a string contains glob metacharacters.
pub fn is_glob(pattern: &str) -> bool {
    pattern.contains(['*', '?', '['])
}
