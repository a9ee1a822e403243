//! # Cache Command Implementation
//!
//! `cache list` shows what lives under the cache root: git mirrors of
//! control repositories and git modules, downloaded Forge releases, and
//! downloaded tarball sources.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::UNIX_EPOCH;

use anyhow::Result;
use clap::{Args, Subcommand};
use serde::Serialize;
use walkdir::WalkDir;

use envdeploy::cache::CacheRegistry;
use envdeploy::vcs::GitProvider;

use crate::cli::Context;

/// Inspect the local cache
#[derive(Args, Debug)]
pub struct CacheArgs {
    #[command(subcommand)]
    pub command: CacheSubcommand,
}

#[derive(Subcommand, Debug)]
pub enum CacheSubcommand {
    /// List cached mirrors and Forge releases
    List(ListArgs),
}

#[derive(Args, Debug)]
pub struct ListArgs {
    /// Output in JSON format
    #[arg(long)]
    pub json: bool,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
enum EntryKind {
    Mirror,
    Release,
    Tarball,
}

#[derive(Debug, Clone, Serialize)]
struct CacheEntry {
    kind: EntryKind,
    name: String,
    path: PathBuf,
    size: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    last_modified: Option<u64>,
}

/// Execute the `cache` command.
pub fn execute(args: CacheArgs, ctx: &Context) -> Result<()> {
    let settings = ctx.settings()?;
    match args.command {
        CacheSubcommand::List(list) => {
            let registry = CacheRegistry::new(
                settings.cache_root(),
                GitProvider::handle(settings.git.provider),
            );
            execute_list(&registry, list)
        }
    }
}

fn execute_list(registry: &CacheRegistry, args: ListArgs) -> Result<()> {
    let entries = scan(registry)?;

    if args.json {
        println!("{}", serde_json::to_string_pretty(&entries)?);
        return Ok(());
    }
    if entries.is_empty() {
        println!("No cache entries found in: {}", registry.root().display());
        return Ok(());
    }

    println!("{:<8} {:<50} {:>12}", "KIND", "NAME", "SIZE");
    println!("{}", "-".repeat(72));
    for entry in &entries {
        let kind = match entry.kind {
            EntryKind::Mirror => "mirror",
            EntryKind::Release => "release",
            EntryKind::Tarball => "tarball",
        };
        println!("{:<8} {:<50} {:>12}", kind, entry.name, format_size(entry.size));
    }
    println!("\nTotal: {} entries in {}", entries.len(), registry.root().display());
    Ok(())
}

fn scan(registry: &CacheRegistry) -> Result<Vec<CacheEntry>> {
    let mut entries = Vec::new();
    for mirror in registry.on_disk()? {
        entries.push(entry(EntryKind::Mirror, &mirror));
    }

    let root = registry.root();
    if root.is_dir() {
        for module_dir in fs::read_dir(root)? {
            let module_dir = module_dir?.path();
            if !module_dir.is_dir() || module_dir.join("objects").is_dir() {
                continue;
            }
            let kind = if module_dir.file_name().is_some_and(|n| n == "tarball") {
                EntryKind::Tarball
            } else {
                EntryKind::Release
            };
            for file in fs::read_dir(&module_dir)? {
                let file = file?.path();
                if file.to_string_lossy().ends_with(".tar.gz") {
                    entries.push(entry(kind.clone(), &file));
                }
            }
        }
    }

    entries.sort_by(|a, b| a.name.cmp(&b.name));
    Ok(entries)
}

fn entry(kind: EntryKind, path: &Path) -> CacheEntry {
    let name = path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    let (size, last_modified) = measure(path);
    CacheEntry {
        kind,
        name,
        path: path.to_path_buf(),
        size,
        last_modified,
    }
}

/// Total size in bytes and latest modification time, as seconds since the
/// epoch.
fn measure(path: &Path) -> (u64, Option<u64>) {
    let mut total = 0u64;
    let mut latest = None;
    for entry in WalkDir::new(path).into_iter().flatten() {
        let Ok(meta) = entry.metadata() else { continue };
        if !meta.is_file() {
            continue;
        }
        total += meta.len();
        if let Some(secs) = meta
            .modified()
            .ok()
            .and_then(|m| m.duration_since(UNIX_EPOCH).ok())
            .map(|d| d.as_secs())
        {
            latest = Some(latest.map_or(secs, |prev: u64| prev.max(secs)));
        }
    }
    (total, latest)
}

/// Format size in human-readable format
fn format_size(bytes: u64) -> String {
    const UNITS: &[&str] = &["B", "KB", "MB", "GB", "TB"];
    let mut size = bytes as f64;
    let mut unit_idx = 0;

    while size >= 1024.0 && unit_idx < UNITS.len() - 1 {
        size /= 1024.0;
        unit_idx += 1;
    }

    if unit_idx == 0 {
        format!("{} {}", bytes, UNITS[unit_idx])
    } else {
        format!("{:.2} {}", size, UNITS[unit_idx])
    }
}
