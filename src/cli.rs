//! CLI argument parsing and command dispatch

use std::path::PathBuf;

use anyhow::{Context as _, Result};
use clap::{Parser, Subcommand};

use envdeploy::config::Settings;
use envdeploy::output::OutputConfig;

use crate::commands;

/// envdeploy - Deploy Puppet environments and modules
#[derive(Parser, Debug)]
#[command(name = "envdeploy")]
#[command(version, about, long_about = None)]
pub struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Colorize output (always, never, auto)
    #[arg(long, global = true, value_name = "WHEN", default_value = "auto")]
    color: String,

    /// Set log level (error, warn, info, debug, trace)
    #[arg(long, global = true, value_name = "LEVEL", default_value = "info")]
    log_level: String,

    /// Path to envdeploy.yaml
    #[arg(long, global = true, value_name = "FILE", env = "ENVDEPLOY_CONFIG")]
    config: Option<PathBuf>,

    /// Root directory for git mirrors and downloaded modules
    #[arg(long, global = true, value_name = "DIR", env = "ENVDEPLOY_CACHE")]
    cache_root: Option<PathBuf>,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Deploy environments and modules from the configured sources
    Deploy(commands::deploy::DeployArgs),

    /// Operate on a single Puppetfile
    Puppetfile(commands::puppetfile::PuppetfileArgs),

    /// Inspect the local cache
    Cache(commands::cache::CacheArgs),

    /// Generate shell completion scripts
    Completions(commands::completions::CompletionsArgs),
}

/// Everything a command needs from the global flags.
pub struct Context {
    pub output: OutputConfig,
    config: Option<PathBuf>,
    cache_root: Option<PathBuf>,
}

impl Context {
    /// Load settings, applying `--cache-root` over `cachedir`.
    pub fn settings(&self) -> Result<Settings> {
        let mut settings = Settings::load(self.config.as_deref()).with_context(|| {
            match &self.config {
                Some(path) => format!("Failed to load configuration from {}", path.display()),
                None => "Failed to load configuration".to_string(),
            }
        })?;
        if let Some(root) = &self.cache_root {
            settings.cachedir = Some(root.clone());
        }
        Ok(settings)
    }
}

impl Cli {
    pub fn execute(self) -> Result<()> {
        init_logging(&self.log_level);
        let ctx = Context {
            output: OutputConfig::from_env_and_flag(&self.color),
            config: self.config,
            cache_root: self.cache_root,
        };

        match self.command {
            Commands::Deploy(args) => commands::deploy::execute(args, &ctx),
            Commands::Puppetfile(args) => commands::puppetfile::execute(args, &ctx),
            Commands::Cache(args) => commands::cache::execute(args, &ctx),
            Commands::Completions(args) => commands::completions::execute(args),
        }
    }
}

/// `RUST_LOG` wins over `--log-level`.
fn init_logging(level: &str) {
    let env = env_logger::Env::default().default_filter_or(level);
    let _ = env_logger::Builder::from_env(env)
        .format_timestamp(None)
        .format_target(false)
        .try_init();
}
