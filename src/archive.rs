//! Tarball unpacking and per-file digests of module trees.

use std::collections::{BTreeMap, BTreeSet};
use std::fs;
use std::io::Read;
use std::path::{Component, Path, PathBuf};

use flate2::read::GzDecoder;
use rayon::prelude::*;
use walkdir::WalkDir;

use crate::error::{Error, Result};
use crate::forge::ContentHash;

/// Relative path (with `/` separators) to SHA-256 of each regular file.
pub type DigestMap = BTreeMap<String, String>;

fn archive(bytes: &[u8]) -> tar::Archive<GzDecoder<&[u8]>> {
    tar::Archive::new(GzDecoder::new(bytes))
}

/// Normal components of an entry path, or an error if it tries to leave
/// the extraction root.
fn clean_components(path: &Path) -> Result<Vec<String>> {
    let mut out = Vec::new();
    for component in path.components() {
        match component {
            Component::Normal(part) => out.push(part.to_string_lossy().into_owned()),
            Component::CurDir => {}
            _ => {
                return Err(Error::Unsupported {
                    feature: format!("archive entry with unsafe path {}", path.display()),
                })
            }
        }
    }
    Ok(out)
}

fn unsafe_entry(entry: &Path, reason: impl Into<String>) -> Error {
    Error::UnsafeArchiveEntry {
        entry: entry.display().to_string(),
        reason: reason.into(),
    }
}

/// A symlink target must be relative and resolve inside the extraction root
/// from the directory holding the link. Hard links are not supported.
fn check_link<R: Read>(entry: &tar::Entry<'_, R>, relative: &Path) -> Result<()> {
    let kind = entry.header().entry_type();
    if kind.is_hard_link() {
        return Err(unsafe_entry(relative, "hard links are not supported"));
    }
    if !kind.is_symlink() {
        return Ok(());
    }
    let link = entry
        .link_name()?
        .ok_or_else(|| unsafe_entry(relative, "symlink without a target"))?;
    let mut depth = relative.components().count().saturating_sub(1);
    for component in link.components() {
        match component {
            Component::Normal(_) => depth += 1,
            Component::CurDir => {}
            Component::ParentDir if depth > 0 => depth -= 1,
            _ => {
                return Err(unsafe_entry(
                    relative,
                    format!("symlink target {} leaves the extraction root", link.display()),
                ))
            }
        }
    }
    Ok(())
}

/// No directory between `dest` and the entry may be a symlink, so an earlier
/// entry cannot redirect a later one.
fn check_parents(dest: &Path, relative: &Path) -> Result<()> {
    let mut current = dest.to_path_buf();
    if let Some(parent) = relative.parent() {
        for component in parent.components() {
            current.push(component);
            let is_link = fs::symlink_metadata(&current)
                .map(|m| m.file_type().is_symlink())
                .unwrap_or(false);
            if is_link {
                return Err(unsafe_entry(
                    relative,
                    format!("{} is a symlink", current.display()),
                ));
            }
        }
    }
    Ok(())
}

/// The single top-level directory every entry lives under, if there is one.
pub fn wrapper_dir(bytes: &[u8]) -> Result<Option<String>> {
    let mut tops = BTreeSet::new();
    let mut nested = false;
    for entry in archive(bytes).entries()? {
        let entry = entry?;
        if entry.header().entry_type().is_pax_global_extensions() {
            continue;
        }
        let parts = clean_components(&entry.path()?)?;
        if let Some(first) = parts.first() {
            tops.insert(first.clone());
            nested |= parts.len() > 1 || entry.header().entry_type().is_dir();
        }
    }
    if tops.len() == 1 && nested {
        Ok(tops.into_iter().next())
    } else {
        Ok(None)
    }
}

fn relative_parts(parts: Vec<String>, strip: bool) -> Vec<String> {
    if strip {
        parts.into_iter().skip(1).collect()
    } else {
        parts
    }
}

/// Unpack a `.tar.gz` into `dest`, optionally dropping a single wrapper
/// directory. Returns the digests of the files written.
pub fn unpack(bytes: &[u8], dest: &Path, strip_wrapper: bool) -> Result<DigestMap> {
    let strip = strip_wrapper && wrapper_dir(bytes)?.is_some();
    fs::create_dir_all(dest)?;

    let mut digests = DigestMap::new();
    for entry in archive(bytes).entries()? {
        let mut entry = entry?;
        let kind = entry.header().entry_type();
        if kind.is_pax_global_extensions() {
            continue;
        }
        let parts = relative_parts(clean_components(&entry.path()?)?, strip);
        if parts.is_empty() {
            continue;
        }
        let relative: PathBuf = parts.iter().collect();
        check_link(&entry, &relative)?;
        check_parents(dest, &relative)?;
        let target = dest.join(&relative);

        if kind.is_dir() {
            fs::create_dir_all(&target)?;
            continue;
        }
        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }
        entry.unpack(&target)?;
        if kind.is_file() {
            digests.insert(parts.join("/"), ContentHash::of_file(&target)?.to_string());
        }
    }
    Ok(digests)
}

fn relative_key(root: &Path, path: &Path) -> Option<String> {
    let relative = path.strip_prefix(root).ok()?;
    let parts: Vec<String> = relative
        .components()
        .map(|c| c.as_os_str().to_string_lossy().into_owned())
        .collect();
    Some(parts.join("/"))
}

/// Digests of every regular file under `dir`. Top-level entries named in
/// `ignore` are skipped. Hashing runs on the rayon pool.
pub fn digest_tree(dir: &Path, ignore: &[&str]) -> Result<DigestMap> {
    let mut files = Vec::new();
    for entry in WalkDir::new(dir).follow_links(false) {
        let entry = entry?;
        if !entry.file_type().is_file() {
            continue;
        }
        let Some(key) = relative_key(dir, entry.path()) else {
            continue;
        };
        let top = key.split('/').next().unwrap_or_default();
        if ignore.contains(&top) {
            continue;
        }
        files.push((key, entry.into_path()));
    }

    let digests: Result<Vec<(String, String)>> = files
        .into_par_iter()
        .map(|(key, path)| Ok((key, ContentHash::of_file(&path)?.to_string())))
        .collect();
    Ok(digests?.into_iter().collect())
}

/// Recursively copy `src` into `dest`, creating `dest`.
pub fn copy_tree(src: &Path, dest: &Path) -> Result<()> {
    fs::create_dir_all(dest)?;
    for entry in WalkDir::new(src).follow_links(false).min_depth(1) {
        let entry = entry?;
        let Ok(relative) = entry.path().strip_prefix(src) else {
            continue;
        };
        let target = dest.join(relative);
        let file_type = entry.file_type();
        if file_type.is_dir() {
            fs::create_dir_all(&target)?;
        } else if file_type.is_file() {
            fs::copy(entry.path(), &target)?;
        } else if file_type.is_symlink() {
            copy_symlink(entry.path(), &target)?;
        }
    }
    Ok(())
}

#[cfg(unix)]
fn copy_symlink(src: &Path, target: &Path) -> Result<()> {
    let link = fs::read_link(src)?;
    std::os::unix::fs::symlink(link, target)?;
    Ok(())
}

#[cfg(not(unix))]
fn copy_symlink(src: &Path, target: &Path) -> Result<()> {
    fs::copy(src, target)?;
    Ok(())
}

#[cfg(test)]
pub(crate) fn build_tar_gz(files: &[(&str, &str)]) -> Vec<u8> {
    let mut builder = tar::Builder::new(Vec::new());
    for (path, content) in files {
        let mut header = tar::Header::new_gnu();
        header.set_size(content.len() as u64);
        header.set_mode(0o644);
        header.set_entry_type(tar::EntryType::Regular);
        header.set_cksum();
        builder
            .append_data(&mut header, path, content.as_bytes())
            .unwrap();
    }
    gzip(builder)
}

#[cfg(test)]
fn gzip(builder: tar::Builder<Vec<u8>>) -> Vec<u8> {
    use flate2::write::GzEncoder;
    use flate2::Compression;

    let tar_bytes = builder.into_inner().unwrap();
    let mut encoder = GzEncoder::new(Vec::new(), Compression::default());
    std::io::Write::write_all(&mut encoder, &tar_bytes).unwrap();
    encoder.finish().unwrap()
}
