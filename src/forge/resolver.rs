//! Maps a declared Forge version to one concrete release.

use std::sync::Arc;

use log::debug;
use semver::{Version, VersionReq};

use super::client::{ForgeClient, Release};
use crate::error::{Error, Result};
use crate::puppetfile::VersionSpec;

/// A comparator without an operator matches the versions it spells out:
/// `1.2` is `1.2.x` and `1.2.3` is exactly `1.2.3`. `semver` would read both
/// as caret requirements.
fn bare_comparator(token: &str) -> String {
    if !token.starts_with(|c: char| c.is_ascii_digit()) {
        return token.to_string();
    }
    let core = token.split(['-', '+']).next().unwrap_or(token);
    let parts: Vec<&str> = core.split('.').collect();
    if parts.iter().any(|p| matches!(*p, "x" | "X" | "*")) {
        return token.to_string();
    }
    match parts.len() {
        2 => format!("~{}", token),
        3 => format!("={}", token),
        _ => token.to_string(),
    }
}

fn join_comparators<'a>(comparators: impl IntoIterator<Item = &'a str>) -> Result<VersionReq> {
    let joined: Vec<String> = comparators.into_iter().map(bare_comparator).collect();
    Ok(VersionReq::parse(&joined.join(", "))?)
}

/// Parse a version range as written in Puppetfiles.
///
/// Accepts the comma-separated form `semver` understands as well as the
/// space-separated form (`>= 1.0.0 < 2.0.0`) and hyphen ranges
/// (`1.0.0 - 2.0.0`).
pub fn parse_requirement(text: &str) -> Result<VersionReq> {
    let text = text.trim();
    if let Some((low, high)) = text.split_once(" - ") {
        return Ok(VersionReq::parse(&format!(
            ">={}, <={}",
            low.trim(),
            high.trim()
        ))?);
    }
    if text.contains(',') {
        return join_comparators(text.split(',').map(str::trim));
    }

    // Glue bare operators to their version, then comma-join comparators
    let mut comparators: Vec<String> = Vec::new();
    let mut pending_op: Option<&str> = None;
    for token in text.split_whitespace() {
        if token.chars().all(|c| "<>=~^".contains(c)) {
            pending_op = Some(token);
            continue;
        }
        match pending_op.take() {
            Some(op) => comparators.push(format!("{}{}", op, token)),
            None => comparators.push(token.to_string()),
        }
    }
    if let Some(op) = pending_op {
        comparators.push(op.to_string());
    }
    join_comparators(comparators.iter().map(String::as_str))
}

/// Releases ordered newest first. Unparseable versions are dropped.
fn sorted_desc(releases: &[Release]) -> Vec<(Version, &Release)> {
    let mut parsed: Vec<(Version, &Release)> = releases
        .iter()
        .filter_map(|r| Version::parse(&r.version).ok().map(|v| (v, r)))
        .collect();
    parsed.sort_by(|a, b| b.0.cmp(&a.0));
    parsed
}

/// Pick a release for `spec` from a release list.
///
/// - `Latest` and `Unpinned`: the newest release that is not a pre-release
/// - `Range`: the newest release satisfying the range
/// - `Exact`: the release with exactly that version
pub fn select_release<'r>(releases: &'r [Release], spec: &VersionSpec) -> Result<Option<&'r Release>> {
    let sorted = sorted_desc(releases);
    let found = match spec {
        VersionSpec::Latest | VersionSpec::Unpinned => sorted
            .into_iter()
            .find(|(v, _)| v.pre.is_empty())
            .map(|(_, r)| r),
        VersionSpec::Range(range) => {
            let req = parse_requirement(range)?;
            sorted
                .into_iter()
                .find(|(v, _)| req.matches(v))
                .map(|(_, r)| r)
        }
        VersionSpec::Exact(exact) => {
            let wanted = Version::parse(exact)?;
            sorted
                .into_iter()
                .find(|(v, _)| *v == wanted)
                .map(|(_, r)| r)
        }
        _ => None,
    };
    Ok(found)
}

/// Outcome of resolving one Forge module.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ResolvedRelease {
    pub version: String,
    /// Absent when the version was taken from what is already deployed
    pub release: Option<Release>,
}

#[derive(Debug, Clone)]
pub struct ForgeResolver {
    client: Arc<dyn ForgeClient>,
}

impl ForgeResolver {
    pub fn new(client: Arc<dyn ForgeClient>) -> Self {
        Self { client }
    }

    pub fn client(&self) -> &Arc<dyn ForgeClient> {
        &self.client
    }

    /// Resolve `spec` for the module `slug`.
    ///
    /// An unpinned module that is already deployed keeps its deployed
    /// version and the registry is not contacted.
    pub fn resolve(
        &self,
        slug: &str,
        spec: &VersionSpec,
        deployed: Option<&str>,
    ) -> Result<ResolvedRelease> {
        if let (VersionSpec::Unpinned, Some(version)) = (spec, deployed) {
            debug!("{} is unpinned, keeping deployed version {}", slug, version);
            return Ok(ResolvedRelease {
                version: version.to_string(),
                release: None,
            });
        }

        let unresolvable = |message: String| Error::Unresolvable {
            module: slug.to_string(),
            constraint: spec.to_string(),
            message,
        };

        match spec {
            VersionSpec::Latest | VersionSpec::Unpinned | VersionSpec::Range(_) | VersionSpec::Exact(_) => {}
            other => {
                return Err(unresolvable(format!(
                    "'{}' is not a Forge version constraint",
                    other
                )))
            }
        }

        let releases = self.client.releases(slug)?;
        if releases.is_empty() {
            return Err(unresolvable("module not found on the Forge".to_string()));
        }
        let release = select_release(&releases, spec)
            .map_err(|e| unresolvable(e.to_string()))?
            .ok_or_else(|| unresolvable("no release satisfies the constraint".to_string()))?;

        Ok(ResolvedRelease {
            version: release.version.clone(),
            release: Some(release.clone()),
        })
    }

    /// Look up the release for an already chosen version.
    pub fn release(&self, slug: &str, version: &str) -> Result<Release> {
        let spec = VersionSpec::Exact(version.to_string());
        match self.resolve(slug, &spec, None)?.release {
            Some(release) => Ok(release),
            None => Err(Error::Unresolvable {
                module: slug.to_string(),
                constraint: version.to_string(),
                message: "release not found".to_string(),
            }),
        }
    }
}
