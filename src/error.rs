//! # Error Handling
//!
//! This module defines the centralized error type for `envdeploy`. It uses
//! `thiserror` to build a single `Error` enum covering every failure mode of
//! the resolution and synchronization engine.
//!
//! ## Error Kinds
//!
//! The variants fall into a handful of families, and callers are expected to
//! branch on the family rather than on individual messages:
//!
//! - **Transport / execution**: a `git` subprocess exited non-zero, the native
//!   git backend failed, or a registry request failed. These carry the
//!   captured stderr or response body verbatim.
//! - **Not found**: a reference or a versioned file does not exist. This is
//!   never reported as a transport failure.
//! - **Unresolvable**: a module's declared version could not be mapped to a
//!   concrete commit, release, or checksum. Batches of these are aggregated
//!   into `UnresolvableBatch` so every failing module is reported at once.
//! - **Configuration**: a bad declaration (duplicate module, install path
//!   outside the environment, missing option). Never retryable.
//! - **Integrity**: a downloaded artifact failed checksum verification.
//!
//! Lower layers are wrapped with `Error::Module` at each boundary so the
//! module name and the operation survive propagation.

use std::path::PathBuf;

use thiserror::Error;

/// Main error type for envdeploy operations
#[derive(Error, Debug)]
pub enum Error {
    /// The global YAML configuration could not be parsed or is invalid.
    #[error("Configuration parsing error: {message}{}", .hint.as_ref().map(|h| format!("\n  hint: {}", h)).unwrap_or_default())]
    ConfigParse {
        message: String,
        /// Optional hint for how to fix the configuration issue
        hint: Option<String>,
    },

    /// A Puppetfile could not be parsed or evaluated.
    #[error("Puppetfile error in {file} at line {line}: {message}")]
    PuppetfileParse {
        file: String,
        line: usize,
        message: String,
    },

    /// The same module name was declared twice in one Puppetfile.
    #[error("Puppetfile {file} declares module '{name}' more than once")]
    DuplicateModule { name: String, file: String },

    /// A module install path does not live beneath its environment.
    #[error("Install path {} is outside of the base directory {}", .path.display(), .base.display())]
    PathEscape { path: PathBuf, base: PathBuf },

    /// A required option was not supplied.
    #[error("Missing required option '{option}' for {context}")]
    MissingOption { option: String, context: String },

    /// The declaration asks for something this build does not implement.
    #[error("Unsupported: {feature}")]
    Unsupported { feature: String },

    /// A `git` subprocess exited unsuccessfully.
    #[error("Git command failed for {target}: {command} - {stderr}")]
    GitCommand {
        command: String,
        target: String,
        stderr: String,
    },

    /// The native git backend reported an error.
    #[error("Git operation '{operation}' failed for {target}: {message}")]
    Git2 {
        operation: String,
        target: String,
        message: String,
    },

    /// A registry or download request failed.
    #[error("Network operation error: {url} - {message}")]
    Network { url: String, message: String },

    /// A reference could not be resolved to a commit.
    #[error("Could not resolve '{reference}' in {target}")]
    RefNotFound { target: String, reference: String },

    /// A versioned file does not exist at the requested revision.
    #[error("File '{path}' does not exist at revision '{rev}'")]
    BlobNotFound { path: String, rev: String },

    /// A module's version constraint cannot be satisfied.
    #[error("Unable to resolve module '{module}' with constraint '{constraint}': {message}")]
    Unresolvable {
        module: String,
        constraint: String,
        message: String,
    },

    /// Several modules failed to resolve.
    #[error("Unable to resolve {} module(s):{}", .failures.len(), format_failures(.failures))]
    UnresolvableBatch { failures: Vec<(String, String)> },

    /// An archive entry would write outside its extraction root.
    #[error("Refusing to unpack archive entry {entry}: {reason}")]
    UnsafeArchiveEntry { entry: String, reason: String },

    /// A downloaded artifact does not match its expected digest.
    #[error("Checksum mismatch for {artifact}: expected {expected}, got {actual}")]
    ChecksumMismatch {
        artifact: String,
        expected: String,
        actual: String,
    },

    /// Context wrapper added at layer boundaries.
    #[error("Module '{module}' failed during {operation}: {source}")]
    Module {
        module: String,
        operation: String,
        #[source]
        source: Box<Error>,
    },

    /// The content synchronizer failed. `updated` lists the modules that were
    /// changed before the batch was abandoned.
    #[error("Synchronization failed for {} module(s):{}", .failures.len(), format_failures(.failures))]
    SyncFailed {
        updated: Vec<String>,
        failures: Vec<(String, String)>,
    },

    /// One or more environments failed to deploy.
    #[error("Deployment failed for {} environment(s):{}", .failures.len(), format_failures(.failures))]
    DeployFailed { failures: Vec<(String, String)> },

    /// A filesystem path cannot be used for the requested operation.
    #[error("Invalid path {}: {message}", .path.display())]
    InvalidPath { path: PathBuf, message: String },

    /// An I/O error, wrapped from `std::io::Error`.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A YAML parsing error, wrapped from `serde_yaml::Error`.
    #[error("YAML parsing error: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// A JSON error, wrapped from `serde_json::Error`.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// A regular expression error, wrapped from `regex::Error`.
    #[error("Regex error: {0}")]
    Regex(#[from] regex::Error),

    /// A glob pattern error, wrapped from `glob::PatternError`.
    #[error("Glob pattern error: {0}")]
    Glob(#[from] glob::PatternError),

    /// A URL parsing error, wrapped from `url::ParseError`.
    #[error("URL parsing error: {0}")]
    UrlParse(#[from] url::ParseError),

    /// A semantic versioning parsing error, wrapped from `semver::Error`.
    #[error("Semver parsing error: {0}")]
    Semver(#[from] semver::Error),

    /// A walkdir traversal error.
    #[error("Directory traversal error: {0}")]
    Walk(#[from] walkdir::Error),

    /// An error indicating that a mutex or other lock has been poisoned.
    #[error("Lock poisoned: {context}")]
    LockPoisoned { context: String },
}

/// A convenient type alias for `Result<T, Error>`.
pub type Result<T> = std::result::Result<T, Error>;

fn format_failures(failures: &[(String, String)]) -> String {
    failures
        .iter()
        .map(|(name, cause)| format!("\n  - {}: {}", name, cause))
        .collect()
}

impl Error {
    /// Wrap this error with the module and operation it occurred in.
    pub fn in_module(self, module: &str, operation: &str) -> Self {
        Error::Module {
            module: module.to_string(),
            operation: operation.to_string(),
            source: Box::new(self),
        }
    }

    /// True when the error means "does not exist" rather than "could not ask".
    pub fn is_not_found(&self) -> bool {
        match self {
            Error::RefNotFound { .. } | Error::BlobNotFound { .. } => true,
            Error::Module { source, .. } => source.is_not_found(),
            _ => false,
        }
    }

    /// True for errors that mean a version constraint could not be satisfied.
    pub fn is_unresolvable(&self) -> bool {
        match self {
            Error::Unresolvable { .. }
            | Error::UnresolvableBatch { .. }
            | Error::RefNotFound { .. } => true,
            Error::Module { source, .. } => source.is_unresolvable(),
            _ => false,
        }
    }

    /// True for subprocess, native backend and network failures.
    pub fn is_transport(&self) -> bool {
        match self {
            Error::GitCommand { .. } | Error::Git2 { .. } | Error::Network { .. } => true,
            Error::Module { source, .. } => source.is_transport(),
            _ => false,
        }
    }
}
