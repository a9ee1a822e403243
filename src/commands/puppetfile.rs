//! # Puppetfile Command Implementation
//!
//! Work on one Puppetfile outside any configured source. The environment
//! root is the directory that holds the Puppetfile.

use std::path::PathBuf;

use anyhow::{Context as _, Result};
use clap::{Args, Subcommand};

use envdeploy::deployment::{purge_puppetfile, DeployOptions, Deployment};
use envdeploy::output::render_modules;

use crate::cli::Context;

/// Install, check or purge a Puppetfile
#[derive(Args, Debug)]
pub struct PuppetfileArgs {
    /// Path to the Puppetfile
    #[arg(long, global = true, value_name = "PATH", default_value = "Puppetfile")]
    pub puppetfile: PathBuf,

    /// Install modules here instead of the Puppetfile's moduledir
    #[arg(long, global = true, value_name = "PATH")]
    pub moduledir: Option<PathBuf>,

    #[command(subcommand)]
    pub command: PuppetfileSubcommand,
}

#[derive(Subcommand, Debug)]
pub enum PuppetfileSubcommand {
    /// Install every declared module
    Install {
        /// Overwrite local changes in module checkouts
        #[arg(long)]
        force: bool,
    },
    /// Parse the Puppetfile and list its modules
    Check,
    /// Remove module directories the Puppetfile does not declare
    Purge,
}

/// Execute the `puppetfile` command.
pub fn execute(args: PuppetfileArgs, ctx: &Context) -> Result<()> {
    let puppetfile = Deployment::load_puppetfile(&args.puppetfile, args.moduledir.as_deref())
        .with_context(|| format!("Failed to evaluate {}", args.puppetfile.display()))?;

    match args.command {
        PuppetfileSubcommand::Check => {
            print!("{}", render_modules(&puppetfile.modules, &puppetfile.basedir));
            println!("{} Syntax OK", ctx.output.ok());
        }
        PuppetfileSubcommand::Install { force } => {
            let deployment = Deployment::new(ctx.settings()?);
            let options = DeployOptions {
                force,
                ..DeployOptions::default()
            };
            let updated = deployment.install_puppetfile(&puppetfile, &options)?;
            for name in &updated {
                println!("{} {}", ctx.output.ok(), name);
            }
            println!(
                "{} modules declared, {} updated",
                puppetfile.modules.len(),
                updated.len()
            );
        }
        PuppetfileSubcommand::Purge => {
            for path in purge_puppetfile(&puppetfile)? {
                println!("removed {}", path.display());
            }
        }
    }
    Ok(())
}
