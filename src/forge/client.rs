//! Registry clients.
//!
//! The resolver only needs two things from a registry: the list of releases
//! for a slug, and the bytes of one release. [`HttpForge`] speaks the public
//! v3 API; [`LocalForge`] serves a directory of tarballs for air-gapped
//! mirrors and tests. [`client_for`] picks one from a Forge location.

use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use log::debug;
use serde::{Deserialize, Serialize};

use super::integrity::ContentHash;
use crate::error::{Error, Result};

/// One immutable, downloadable release of a module.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Release {
    /// Module slug, `owner-name`
    pub module: String,
    pub version: String,
    /// Where the artifact can be downloaded from
    pub file_uri: String,
    /// Expected SHA-256 of the artifact, when the registry publishes one
    #[serde(default)]
    pub file_sha256: Option<String>,
}

impl Release {
    /// `owner-name-version`, the artifact's base name.
    pub fn slug(&self) -> String {
        format!("{}-{}", self.module, self.version)
    }
}

/// A source of release metadata and artifacts.
pub trait ForgeClient: Send + Sync + fmt::Debug {
    /// Every release of `slug`. An empty list means the module is unknown.
    fn releases(&self, slug: &str) -> Result<Vec<Release>>;

    /// Raw artifact bytes of `release`.
    fn download(&self, release: &Release) -> Result<Vec<u8>>;
}

#[derive(Debug, Deserialize)]
struct ReleasePage {
    pagination: Pagination,
    results: Vec<ApiRelease>,
}

#[derive(Debug, Deserialize)]
struct Pagination {
    next: Option<String>,
}

#[derive(Debug, Deserialize)]
struct ApiRelease {
    version: String,
    file_uri: String,
    #[serde(default)]
    file_sha256: Option<String>,
    #[serde(default)]
    deleted_at: Option<String>,
}

/// Blocking client for the Forge v3 API.
#[derive(Debug)]
pub struct HttpForge {
    base_url: String,
    client: reqwest::blocking::Client,
}

/// Blocking HTTP client shared by registry and tarball downloads.
pub(crate) fn http_client(target: &str) -> Result<reqwest::blocking::Client> {
    reqwest::blocking::Client::builder()
        .connect_timeout(Duration::from_secs(15))
        .timeout(Duration::from_secs(120))
        .user_agent(concat!("envdeploy/", env!("CARGO_PKG_VERSION")))
        .build()
        .map_err(|e| Error::Network {
            url: target.to_string(),
            message: e.to_string(),
        })
}

/// GET `url` and return the body, treating any non-2xx status as an error.
pub(crate) fn download_bytes(client: &reqwest::blocking::Client, url: &str) -> Result<Vec<u8>> {
    debug!("GET {}", url);
    let response = client.get(url).send().map_err(|e| Error::Network {
        url: url.to_string(),
        message: e.to_string(),
    })?;
    let status = response.status();
    if !status.is_success() {
        return Err(Error::Network {
            url: url.to_string(),
            message: format!("HTTP {}", status),
        });
    }
    let bytes = response.bytes().map_err(|e| Error::Network {
        url: url.to_string(),
        message: e.to_string(),
    })?;
    Ok(bytes.to_vec())
}

impl HttpForge {
    /// Client for the Forge at `base_url`, which must be an absolute
    /// http(s) URL.
    pub fn new(base_url: &str) -> Result<Self> {
        let parsed = url::Url::parse(base_url)?;
        if !matches!(parsed.scheme(), "http" | "https") {
            return Err(Error::Unsupported {
                feature: format!("forge URL scheme '{}' in {}", parsed.scheme(), base_url),
            });
        }
        let client = http_client(base_url)?;
        Ok(Self {
            base_url: base_url.trim_end_matches('/').to_string(),
            client,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn absolute(&self, uri: &str) -> String {
        if uri.starts_with("http://") || uri.starts_with("https://") {
            uri.to_string()
        } else {
            format!("{}{}", self.base_url, uri)
        }
    }

    fn get(&self, url: &str) -> Result<reqwest::blocking::Response> {
        debug!("GET {}", url);
        self.client.get(url).send().map_err(|e| Error::Network {
            url: url.to_string(),
            message: e.to_string(),
        })
    }
}

impl ForgeClient for HttpForge {
    fn releases(&self, slug: &str) -> Result<Vec<Release>> {
        let mut releases = Vec::new();
        let mut next = Some(format!(
            "/v3/releases?module={}&limit=100&show_deleted=false",
            slug
        ));

        while let Some(uri) = next {
            let url = self.absolute(&uri);
            let response = self.get(&url)?;
            let status = response.status();
            if status == reqwest::StatusCode::NOT_FOUND {
                return Ok(Vec::new());
            }
            if !status.is_success() {
                let body = response.text().unwrap_or_default();
                return Err(Error::Network {
                    url,
                    message: format!("HTTP {}: {}", status, body.trim()),
                });
            }
            let page: ReleasePage = response.json().map_err(|e| Error::Network {
                url: url.clone(),
                message: e.to_string(),
            })?;

            releases.extend(
                page.results
                    .into_iter()
                    .filter(|r| r.deleted_at.is_none())
                    .map(|r| Release {
                        module: slug.to_string(),
                        version: r.version,
                        file_uri: r.file_uri,
                        file_sha256: r.file_sha256,
                    }),
            );
            next = page.pagination.next;
        }
        Ok(releases)
    }

    fn download(&self, release: &Release) -> Result<Vec<u8>> {
        download_bytes(&self.client, &self.absolute(&release.file_uri))
    }
}

/// Index file a [`LocalForge`] module directory may carry.
#[derive(Debug, Deserialize)]
struct LocalIndex {
    releases: Vec<LocalIndexEntry>,
}

#[derive(Debug, Deserialize)]
struct LocalIndexEntry {
    version: String,
    file: String,
    #[serde(default)]
    sha256: Option<String>,
}

/// A registry laid out on disk:
///
/// ```text
/// <root>/<owner-name>/<owner-name>-<version>.tar.gz
/// <root>/<owner-name>/index.json   (optional)
/// ```
///
/// Without `index.json` every `.tar.gz` in the module directory is a release
/// and its digest is computed on the fly.
#[derive(Debug, Clone)]
pub struct LocalForge {
    root: PathBuf,
}

impl LocalForge {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn scan(&self, slug: &str, dir: &Path) -> Result<Vec<Release>> {
        let prefix = format!("{}-", slug);
        let mut releases = Vec::new();
        for entry in fs::read_dir(dir)? {
            let path = entry?.path();
            let Some(file_name) = path.file_name().and_then(|n| n.to_str()) else {
                continue;
            };
            let Some(version) = file_name
                .strip_prefix(&prefix)
                .and_then(|rest| rest.strip_suffix(".tar.gz"))
            else {
                continue;
            };
            releases.push(Release {
                module: slug.to_string(),
                version: version.to_string(),
                file_uri: path.to_string_lossy().into_owned(),
                file_sha256: Some(ContentHash::of_file(&path)?.to_string()),
            });
        }
        Ok(releases)
    }
}

impl ForgeClient for LocalForge {
    fn releases(&self, slug: &str) -> Result<Vec<Release>> {
        let dir = self.root.join(slug);
        if !dir.is_dir() {
            return Ok(Vec::new());
        }

        let index = dir.join("index.json");
        if !index.is_file() {
            return self.scan(slug, &dir);
        }
        let index: LocalIndex = serde_json::from_str(&fs::read_to_string(&index)?)?;
        Ok(index
            .releases
            .into_iter()
            .map(|entry| Release {
                module: slug.to_string(),
                version: entry.version,
                file_uri: dir.join(entry.file).to_string_lossy().into_owned(),
                file_sha256: entry.sha256,
            })
            .collect())
    }

    fn download(&self, release: &Release) -> Result<Vec<u8>> {
        fs::read(&release.file_uri).map_err(|e| Error::Network {
            url: release.file_uri.clone(),
            message: e.to_string(),
        })
    }
}

/// The client for a Forge location: an http(s) URL is the v3 API, while a
/// `file://` URL or an absolute path is a [`LocalForge`] mirror.
pub fn client_for(location: &str) -> Result<Arc<dyn ForgeClient>> {
    if location.starts_with("file://") {
        let url = url::Url::parse(location)?;
        let root = url.to_file_path().map_err(|_| Error::Unsupported {
            feature: format!("forge location {}", location),
        })?;
        debug!("Using local forge at {}", root.display());
        return Ok(Arc::new(LocalForge::new(root)));
    }
    if Path::new(location).is_absolute() {
        debug!("Using local forge at {}", location);
        return Ok(Arc::new(LocalForge::new(location)));
    }
    Ok(Arc::new(HttpForge::new(location)?))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_release_slug() {
        let release = Release {
            module: "puppetlabs-stdlib".into(),
            version: "9.4.1".into(),
            file_uri: "/v3/files/puppetlabs-stdlib-9.4.1.tar.gz".into(),
            file_sha256: None,
        };
        assert_eq!(release.slug(), "puppetlabs-stdlib-9.4.1");
    }

    #[test]
    fn test_http_forge_absolute_uris() {
        let forge = HttpForge::new("https://forge.example.com/").unwrap();
        assert_eq!(forge.base_url(), "https://forge.example.com");
        assert_eq!(
            forge.absolute("/v3/files/a-b-1.0.0.tar.gz"),
            "https://forge.example.com/v3/files/a-b-1.0.0.tar.gz"
        );
        assert_eq!(
            forge.absolute("https://cdn.example.com/a.tar.gz"),
            "https://cdn.example.com/a.tar.gz"
        );
    }

    #[test]
    fn test_http_forge_rejects_bad_urls() {
        assert!(matches!(
            HttpForge::new("forge.example.com").unwrap_err(),
            Error::UrlParse(_)
        ));
        assert!(matches!(
            HttpForge::new("ftp://forge.example.com").unwrap_err(),
            Error::Unsupported { .. }
        ));
    }

    #[test]
    fn test_release_page_deserializes() {
        let json = r#"{
            "pagination": {"next": null},
            "results": [
                {"slug": "a-b-1.0.0", "version": "1.0.0", "file_uri": "/v3/files/a-b-1.0.0.tar.gz",
                 "file_sha256": "abc", "deleted_at": null, "metadata": {"name": "a-b"}}
            ]
        }"#;
        let page: ReleasePage = serde_json::from_str(json).unwrap();
        assert!(page.pagination.next.is_none());
        assert_eq!(page.results[0].version, "1.0.0");
        assert_eq!(page.results[0].file_sha256.as_deref(), Some("abc"));
    }

    #[test]
    fn test_local_forge_scans_tarballs() {
        let temp = tempfile::TempDir::new().unwrap();
        let dir = temp.path().join("acme-web");
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("acme-web-1.0.0.tar.gz"), b"one").unwrap();
        fs::write(dir.join("acme-web-1.1.0.tar.gz"), b"two").unwrap();
        fs::write(dir.join("README"), b"ignored").unwrap();

        let forge = LocalForge::new(temp.path());
        let mut versions: Vec<String> = forge
            .releases("acme-web")
            .unwrap()
            .into_iter()
            .map(|r| r.version)
            .collect();
        versions.sort();
        assert_eq!(versions, vec!["1.0.0", "1.1.0"]);
        assert!(forge.releases("acme-missing").unwrap().is_empty());
    }

    #[test]
    fn test_client_for_location() {
        let temp = tempfile::TempDir::new().unwrap();
        let dir = temp.path().join("acme-web");
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("acme-web-1.0.0.tar.gz"), b"one").unwrap();

        let url = url::Url::from_directory_path(temp.path()).unwrap();
        for location in [url.to_string(), temp.path().display().to_string()] {
            let client = client_for(&location).unwrap();
            let releases = client.releases("acme-web").unwrap();
            assert_eq!(releases.len(), 1, "{}", location);
            assert_eq!(client.download(&releases[0]).unwrap(), b"one");
        }

        assert!(client_for("https://forge.example.com").is_ok());
        assert!(matches!(
            client_for("ftp://forge.example.com").unwrap_err(),
            Error::Unsupported { .. }
        ));
    }

    #[test]
    fn test_local_forge_index() {
        let temp = tempfile::TempDir::new().unwrap();
        let dir = temp.path().join("acme-db");
        fs::create_dir_all(&dir).unwrap();
        fs::write(dir.join("db.tgz"), b"payload").unwrap();
        fs::write(
            dir.join("index.json"),
            r#"{"releases": [{"version": "2.0.0", "file": "db.tgz", "sha256": "deadbeef"}]}"#,
        )
        .unwrap();

        let forge = LocalForge::new(temp.path());
        let releases = forge.releases("acme-db").unwrap();
        assert_eq!(releases.len(), 1);
        assert_eq!(releases[0].file_sha256.as_deref(), Some("deadbeef"));
        assert_eq!(forge.download(&releases[0]).unwrap(), b"payload");
    }
}
