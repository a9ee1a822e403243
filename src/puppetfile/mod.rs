//! # Puppetfile Evaluation
//!
//! A Puppetfile is a tiny declaration language with exactly three calls:
//!
//! ```text
//! forge 'https://forgeapi.puppet.com'
//! moduledir 'modules'
//! mod 'puppetlabs/stdlib', '9.4.1'
//! mod 'ntp', :git => 'https://git.example.com/ntp.git', :branch => :control_branch
//! ```
//!
//! Any other identifier is rejected with its name and arguments. Evaluation
//! runs top to bottom, so a `mod` uses the `moduledir` in effect at the point
//! it is declared.
//!
//! Each `mod` is matched against a fixed, ordered list of kind predicates
//! (see [`KIND_PREDICATES`]); the first that accepts the declaration decides
//! its [`SourceKind`]. While evaluating, the managed install directories and
//! the desired module paths are collected for the purge engine so nothing
//! has to be re-read from disk later.

pub mod lexer;
pub mod parser;

use std::collections::HashSet;
use std::fmt;
use std::fs;
use std::path::{Path, PathBuf};

use log::warn;
use serde::{Serialize, Serializer};

use crate::defaults::{DEFAULT_FORGE_URL, DEFAULT_MODULEDIR};
use crate::error::{Error, Result};
use crate::forge::parse_requirement;
use crate::path::{ensure_descendant, ensure_within, normalize};
use parser::{Call, Value};

/// Where a module's content comes from.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SourceKind {
    Git,
    Forge,
    Svn,
    Local,
    LocalDirectory,
    Tarball,
}

impl fmt::Display for SourceKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            SourceKind::Git => "git",
            SourceKind::Forge => "forge",
            SourceKind::Svn => "svn",
            SourceKind::Local => "local",
            SourceKind::LocalDirectory => "local_directory",
            SourceKind::Tarball => "tarball",
        };
        write!(f, "{}", name)
    }
}

/// The version a declaration asks for, before resolution.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum VersionSpec {
    Branch(String),
    Tag(String),
    Commit(String),
    /// Any git reference, classified later against the mirror
    Ref(String),
    /// `:branch => :control_branch`
    TrackEnvironment,
    Exact(String),
    Range(String),
    Latest,
    Unpinned,
    Checksum(String),
    Unspecified,
}

impl fmt::Display for VersionSpec {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            VersionSpec::Branch(s)
            | VersionSpec::Tag(s)
            | VersionSpec::Commit(s)
            | VersionSpec::Ref(s)
            | VersionSpec::Exact(s)
            | VersionSpec::Range(s) => write!(f, "{}", s),
            VersionSpec::TrackEnvironment => write!(f, ":control_branch"),
            VersionSpec::Latest => write!(f, ":latest"),
            VersionSpec::Unpinned => write!(f, ":unpinned"),
            VersionSpec::Checksum(s) => write!(f, "sha256:{}", s),
            VersionSpec::Unspecified => write!(f, "-"),
        }
    }
}

impl Serialize for VersionSpec {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.collect_str(self)
    }
}

/// One `mod` declaration after evaluation.
#[derive(Debug, Clone, PartialEq)]
pub struct ModuleSpec {
    /// Short name; also the install directory name
    pub name: String,
    pub owner: Option<String>,
    /// Name exactly as declared
    pub title: String,
    pub kind: SourceKind,
    /// Remote URL, registry slug or filesystem path
    pub source: String,
    pub version: VersionSpec,
    /// Directory the module is installed into
    pub install_dir: PathBuf,
    /// `install_dir/name`
    pub path: PathBuf,
    pub default_branch: Option<String>,
    pub strip_component: bool,
    pub line: usize,
}

impl ModuleSpec {
    /// `owner-name` for registry modules.
    pub fn slug(&self) -> String {
        match &self.owner {
            Some(owner) => format!("{}-{}", owner, self.name),
            None => self.name.clone(),
        }
    }
}

/// A fully evaluated Puppetfile.
#[derive(Debug, Clone)]
pub struct Puppetfile {
    pub path: PathBuf,
    pub basedir: PathBuf,
    pub forge: String,
    pub moduledir: PathBuf,
    pub modules: Vec<ModuleSpec>,
    /// Directories whose undeclared children are purged
    pub managed_directories: Vec<PathBuf>,
    /// Paths that must survive a purge
    pub desired_contents: Vec<PathBuf>,
}

impl Puppetfile {
    /// Read and evaluate the Puppetfile at `path` for an environment rooted
    /// at `basedir`.
    pub fn load(path: &Path, basedir: &Path) -> Result<Self> {
        let source = fs::read_to_string(path)?;
        Evaluator::new(path, basedir).evaluate(&source)
    }

    /// Evaluate source text that did not come from disk, for instance a
    /// blob read straight from a mirror.
    pub fn parse_str(source: &str, path: &Path, basedir: &Path) -> Result<Self> {
        Evaluator::new(path, basedir).evaluate(source)
    }

    /// Like [`Puppetfile::load`] but ignores `moduledir` calls in favour of
    /// `moduledir`.
    pub fn load_with_moduledir(path: &Path, basedir: &Path, moduledir: &Path) -> Result<Self> {
        let source = fs::read_to_string(path)?;
        Self::parse_with_moduledir(&source, path, basedir, moduledir)
    }

    pub fn parse_with_moduledir(
        source: &str,
        path: &Path,
        basedir: &Path,
        moduledir: &Path,
    ) -> Result<Self> {
        let mut evaluator = Evaluator::new(path, basedir);
        evaluator.moduledir_override = Some(moduledir.to_path_buf());
        evaluator.evaluate(source)
    }

    pub fn module(&self, name: &str) -> Option<&ModuleSpec> {
        self.modules.iter().find(|m| m.name == name || m.title == name)
    }
}

/// Option keys understood on `mod` declarations.
const KNOWN_OPTIONS: &[&str] = &[
    "git",
    "svn",
    "ref",
    "branch",
    "tag",
    "commit",
    "default_branch",
    "install_path",
    "local",
    "type",
    "source",
    "version",
    "sha256sum",
    "checksum",
    "exclude_spec",
    "strip_component",
    "rev",
    "revision",
];

/// A `mod` call before its kind is known.
struct Declaration {
    title: String,
    version: Option<Value>,
    options: Vec<(String, Value)>,
    line: usize,
}

impl Declaration {
    fn option(&self, key: &str) -> Option<&Value> {
        self.options.iter().find(|(k, _)| k == key).map(|(_, v)| v)
    }

    fn text(&self, key: &str) -> Option<&str> {
        self.option(key).and_then(Value::as_text)
    }

    fn has(&self, key: &str) -> bool {
        self.option(key).is_some()
    }

    fn flag(&self, key: &str) -> bool {
        matches!(self.option(key), Some(Value::Bool(true)))
    }

    fn type_is(&self, kind: &str) -> bool {
        self.text("type") == Some(kind)
    }
}

fn is_slug(title: &str) -> bool {
    match title.split_once(['/', '-']) {
        Some((owner, name)) => {
            !owner.is_empty()
                && !name.is_empty()
                && owner.chars().all(|c| c.is_alphanumeric() || c == '_')
                && name.chars().all(|c| c.is_alphanumeric() || c == '_')
        }
        None => false,
    }
}

fn is_git(d: &Declaration) -> bool {
    d.has("git") || d.type_is("git")
}

fn is_svn(d: &Declaration) -> bool {
    d.has("svn") || d.type_is("svn")
}

fn is_forge(d: &Declaration) -> bool {
    if d.type_is("forge") {
        return true;
    }
    !d.has("type") && !d.has("local") && !d.has("source") && is_slug(&d.title)
}

fn is_local(d: &Declaration) -> bool {
    d.flag("local")
}

fn is_local_directory(d: &Declaration) -> bool {
    d.type_is("local_directory")
}

fn is_tarball(d: &Declaration) -> bool {
    d.type_is("tarball")
}

type KindPredicate = fn(&Declaration) -> bool;

/// Kind predicates in priority order; the first match wins.
const KIND_PREDICATES: &[(SourceKind, KindPredicate)] = &[
    (SourceKind::Git, is_git),
    (SourceKind::Svn, is_svn),
    (SourceKind::Forge, is_forge),
    (SourceKind::Local, is_local),
    (SourceKind::LocalDirectory, is_local_directory),
    (SourceKind::Tarball, is_tarball),
];

struct Evaluator {
    path: PathBuf,
    file: String,
    basedir: PathBuf,
    forge: String,
    moduledir: PathBuf,
    moduledir_override: Option<PathBuf>,
    modules: Vec<ModuleSpec>,
    names: HashSet<String>,
    managed_directories: Vec<PathBuf>,
}

impl Evaluator {
    fn new(path: &Path, basedir: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
            file: path.display().to_string(),
            basedir: basedir.to_path_buf(),
            forge: DEFAULT_FORGE_URL.to_string(),
            moduledir: basedir.join(DEFAULT_MODULEDIR),
            moduledir_override: None,
            modules: Vec::new(),
            names: HashSet::new(),
            managed_directories: Vec::new(),
        }
    }

    fn error(&self, line: usize, message: impl Into<String>) -> Error {
        Error::PuppetfileParse {
            file: self.file.clone(),
            line,
            message: message.into(),
        }
    }

    fn evaluate(mut self, source: &str) -> Result<Puppetfile> {
        if let Some(dir) = self.moduledir_override.clone() {
            self.moduledir = self.resolve_dir(&dir, 0)?;
        }
        for call in parser::parse(&self.file, source)? {
            match call.name.as_str() {
                "forge" => self.forge(&call)?,
                "moduledir" => self.set_moduledir(&call)?,
                "mod" => self.declare(&call)?,
                _ => {
                    let args: Vec<String> = call.args.iter().map(|a| a.to_string()).collect();
                    return Err(self.error(
                        call.line,
                        format!(
                            "unrecognized declaration '{}' with args [{}]",
                            call.name,
                            args.join(", ")
                        ),
                    ));
                }
            }
        }

        let moduledir = self.moduledir.clone();
        self.manage(moduledir);
        let desired_contents = self.modules.iter().map(|m| m.path.clone()).collect();

        Ok(Puppetfile {
            path: self.path,
            basedir: self.basedir,
            forge: self.forge,
            moduledir: self.moduledir,
            modules: self.modules,
            managed_directories: self.managed_directories,
            desired_contents,
        })
    }

    /// The environment root is never a managed directory.
    fn manage(&mut self, dir: PathBuf) {
        if dir == normalize(&self.basedir) {
            return;
        }
        if !self.managed_directories.contains(&dir) {
            self.managed_directories.push(dir);
        }
    }

    fn single_text_arg<'c>(&self, call: &'c Call) -> Result<&'c str> {
        match call.args.as_slice() {
            [value] => value.as_text().ok_or_else(|| {
                self.error(
                    call.line,
                    format!("'{}' expects a string, got {}", call.name, value),
                )
            }),
            _ => Err(self.error(
                call.line,
                format!("'{}' expects exactly one argument", call.name),
            )),
        }
    }

    fn forge(&mut self, call: &Call) -> Result<()> {
        self.forge = self.single_text_arg(call)?.trim_end_matches('/').to_string();
        Ok(())
    }

    fn set_moduledir(&mut self, call: &Call) -> Result<()> {
        let dir = PathBuf::from(self.single_text_arg(call)?);
        if self.moduledir_override.is_some() {
            return Ok(());
        }
        self.moduledir = self.resolve_dir(&dir, call.line)?;
        Ok(())
    }

    fn resolve_dir(&self, dir: &Path, line: usize) -> Result<PathBuf> {
        ensure_descendant(dir, &self.basedir).map_err(|e| match e {
            Error::PathEscape { .. } => self.error(line, e.to_string()),
            other => other,
        })
    }

    fn declare(&mut self, call: &Call) -> Result<()> {
        let declaration = self.declaration(call)?;
        let kind = KIND_PREDICATES
            .iter()
            .find(|(_, matches)| matches(&declaration))
            .map(|(kind, _)| *kind)
            .ok_or_else(|| {
                let args: Vec<String> = call.args.iter().map(|a| a.to_string()).collect();
                self.error(
                    call.line,
                    format!(
                        "module '{}' with args [{}] does not match any module type",
                        declaration.title,
                        args.join(", ")
                    ),
                )
            })?;

        for (key, _) in &declaration.options {
            if !KNOWN_OPTIONS.contains(&key.as_str()) {
                warn!(
                    "{}:{}: ignoring unknown option :{} for module '{}'",
                    self.file, call.line, key, declaration.title
                );
            }
        }

        let spec = self.build_spec(kind, &declaration)?;
        if !self.names.insert(spec.name.clone()) {
            return Err(Error::DuplicateModule {
                name: spec.name,
                file: self.file.clone(),
            });
        }
        let install_dir = spec.install_dir.clone();
        self.manage(install_dir);
        self.modules.push(spec);
        Ok(())
    }

    fn declaration(&self, call: &Call) -> Result<Declaration> {
        let mut args = call.args.iter();
        let title = match args.next().and_then(Value::as_text) {
            Some(title) => title.to_string(),
            None => return Err(self.error(call.line, "'mod' expects a module name")),
        };

        let mut version = None;
        let mut options = Vec::new();
        for arg in args {
            match arg {
                Value::Hash(pairs) => options.extend(pairs.iter().cloned()),
                Value::Str(_) | Value::Symbol(_) if version.is_none() && options.is_empty() => {
                    version = Some(arg.clone())
                }
                other => {
                    return Err(self.error(
                        call.line,
                        format!("unexpected argument {} for module '{}'", other, title),
                    ))
                }
            }
        }

        Ok(Declaration {
            title,
            version,
            options,
            line: call.line,
        })
    }

    fn split_title(&self, d: &Declaration) -> Result<(Option<String>, String)> {
        let (owner, name) = match d.title.split_once(['/', '-']) {
            Some((owner, name)) => (Some(owner.to_string()), name.to_string()),
            None => (None, d.title.clone()),
        };
        if name.is_empty()
            || name == "."
            || name == ".."
            || name.contains(['/', '\\'])
            || owner.as_deref() == Some("")
        {
            return Err(self.error(d.line, format!("invalid module name '{}'", d.title)));
        }
        Ok((owner, name))
    }

    fn require_text(&self, d: &Declaration, key: &str) -> Result<String> {
        d.text(key).map(str::to_string).ok_or_else(|| Error::MissingOption {
            option: key.to_string(),
            context: format!("module '{}' in {}", d.title, self.file),
        })
    }

    fn build_spec(&self, kind: SourceKind, d: &Declaration) -> Result<ModuleSpec> {
        let (owner, name) = self.split_title(d)?;

        let (source, version) = match kind {
            SourceKind::Git => {
                let source = match d.text("git") {
                    Some(url) => url.to_string(),
                    None => self.require_text(d, "source")?,
                };
                (source, git_version(d))
            }
            SourceKind::Svn => {
                let source = match d.text("svn") {
                    Some(url) => url.to_string(),
                    None => self.require_text(d, "source")?,
                };
                let version = d
                    .text("rev")
                    .or_else(|| d.text("revision"))
                    .map(|r| VersionSpec::Ref(r.to_string()))
                    .unwrap_or(VersionSpec::Unspecified);
                (source, version)
            }
            SourceKind::Forge => {
                if owner.is_none() {
                    return Err(self.error(
                        d.line,
                        format!("Forge module '{}' must be named owner/name", d.title),
                    ));
                }
                let declared = d.version.as_ref().or_else(|| d.option("version"));
                let version = self.forge_version(d, declared)?;
                let slug = format!("{}-{}", owner.as_deref().unwrap_or_default(), name);
                (slug, version)
            }
            SourceKind::Local => (String::from("local"), VersionSpec::Unspecified),
            SourceKind::LocalDirectory => {
                let source = self.require_text(d, "source")?;
                (self.local_source(&source), VersionSpec::Unspecified)
            }
            SourceKind::Tarball => {
                let source = self.require_text(d, "source")?;
                let source = if source.contains("://") && !source.starts_with("file://") {
                    source
                } else {
                    self.local_source(source.trim_start_matches("file://"))
                };
                let checksum = d
                    .text("sha256sum")
                    .or_else(|| d.text("checksum"))
                    .or_else(|| d.text("version"))
                    .or_else(|| d.version.as_ref().and_then(Value::as_text));
                let version = match checksum {
                    Some(sum) => VersionSpec::Checksum(sum.trim_start_matches("sha256:").to_lowercase()),
                    None => VersionSpec::Unspecified,
                };
                (source, version)
            }
        };

        let install_dir = match d.text("install_path") {
            Some(dir) => ensure_within(Path::new(dir), &self.basedir)?,
            None => self.moduledir.clone(),
        };
        let path = ensure_descendant(&install_dir.join(&name), &self.basedir)?;

        Ok(ModuleSpec {
            name,
            owner,
            title: d.title.clone(),
            kind,
            source,
            version,
            install_dir,
            path,
            default_branch: d.text("default_branch").map(str::to_string),
            strip_component: !matches!(d.option("strip_component"), Some(Value::Bool(false))),
            line: d.line,
        })
    }

    /// Filesystem sources are relative to the environment.
    fn local_source(&self, source: &str) -> String {
        self.basedir.join(source).display().to_string()
    }

    fn forge_version(&self, d: &Declaration, declared: Option<&Value>) -> Result<VersionSpec> {
        let text = match declared {
            None | Some(Value::Nil) => return Ok(VersionSpec::Unpinned),
            Some(value) => match value.as_text() {
                Some(text) => text.trim(),
                None => {
                    return Err(self.error(
                        d.line,
                        format!("invalid version {} for module '{}'", value, d.title),
                    ))
                }
            },
        };
        match text {
            "latest" => return Ok(VersionSpec::Latest),
            "unpinned" => return Ok(VersionSpec::Unpinned),
            _ => {}
        }
        if semver::Version::parse(text).is_ok() {
            return Ok(VersionSpec::Exact(text.to_string()));
        }
        match parse_requirement(text) {
            Ok(_) => Ok(VersionSpec::Range(text.to_string())),
            Err(e) => Err(self.error(
                d.line,
                format!("invalid version '{}' for module '{}': {}", text, d.title, e),
            )),
        }
    }
}

fn git_version(d: &Declaration) -> VersionSpec {
    let tracks = |key: &str| {
        matches!(d.option(key), Some(Value::Symbol(s)) if s == "control_branch")
            || d.text(key) == Some(":control_branch")
    };
    if tracks("branch") || tracks("ref") {
        return VersionSpec::TrackEnvironment;
    }
    if let Some(r) = d.text("ref") {
        return VersionSpec::Ref(r.to_string());
    }
    if let Some(c) = d.text("commit") {
        return VersionSpec::Commit(c.to_string());
    }
    if let Some(t) = d.text("tag") {
        return VersionSpec::Tag(t.to_string());
    }
    if let Some(b) = d.text("branch") {
        return VersionSpec::Branch(b.to_string());
    }
    VersionSpec::Unspecified
}
