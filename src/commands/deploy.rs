//! # Deploy Command Implementation
//!
//! `deploy environment` converges environment working trees (and, with
//! `--modules`, their Puppetfile modules), `deploy module` updates named
//! modules inside environments that are already deployed, and
//! `deploy display` prints the configured sources as a tree.

use anyhow::Result;
use clap::{Args, Subcommand};

use envdeploy::deployment::{DeployOptions, Deployment};
use envdeploy::output::listing_tree;

use crate::cli::Context;

/// Deploy environments and modules
#[derive(Args, Debug)]
pub struct DeployArgs {
    #[command(subcommand)]
    pub command: DeploySubcommand,
}

#[derive(Subcommand, Debug)]
pub enum DeploySubcommand {
    /// Deploy environments, all of them when none are named
    Environment(EnvironmentArgs),
    /// Update modules by name in every deployed environment
    Module(ModuleArgs),
    /// Show sources and the environments they produce
    Display(DisplayArgs),
}

/// Options shared by the deploying subcommands.
#[derive(Args, Debug, Default)]
pub struct SyncFlags {
    /// Overwrite local changes and re-fetch mutable references
    #[arg(long)]
    pub force: bool,

    /// Number of modules synchronized concurrently
    #[arg(long, value_name = "N", value_parser = clap::value_parser!(u16).range(1..))]
    pub pool_size: Option<u16>,

    /// Branch used by modules tracking `:control_branch` when it does not exist
    #[arg(long, value_name = "BRANCH")]
    pub default_branch_override: Option<String>,
}

#[derive(Args, Debug)]
pub struct EnvironmentArgs {
    /// Environments to deploy
    #[arg(value_name = "ENV")]
    pub environments: Vec<String>,

    /// Also deploy each environment's Puppetfile modules
    #[arg(long, short = 'm')]
    pub modules: bool,

    #[command(flatten)]
    pub sync: SyncFlags,
}

#[derive(Args, Debug)]
pub struct ModuleArgs {
    /// Module names, short or `owner/name`
    #[arg(value_name = "NAME", required = true)]
    pub names: Vec<String>,

    /// Limit to one environment
    #[arg(long, short = 'e', value_name = "ENV")]
    pub environment: Option<String>,

    #[command(flatten)]
    pub sync: SyncFlags,
}

#[derive(Args, Debug)]
pub struct DisplayArgs {
    /// Evaluate each environment's Puppetfile and list its modules
    #[arg(long)]
    pub detail: bool,
}

impl SyncFlags {
    fn options(&self) -> DeployOptions {
        DeployOptions {
            force: self.force,
            pool_size: self.pool_size.map(usize::from),
            default_branch_override: self.default_branch_override.clone(),
            ..DeployOptions::default()
        }
    }
}

/// Execute the `deploy` command.
pub fn execute(args: DeployArgs, ctx: &Context) -> Result<()> {
    let deployment = Deployment::new(ctx.settings()?);
    match args.command {
        DeploySubcommand::Environment(args) => execute_environment(&deployment, args, ctx),
        DeploySubcommand::Module(args) => execute_module(&deployment, args, ctx),
        DeploySubcommand::Display(args) => execute_display(&deployment, args),
    }
}

fn execute_environment(deployment: &Deployment, args: EnvironmentArgs, ctx: &Context) -> Result<()> {
    let options = DeployOptions {
        environments: args.environments,
        modules: args.modules,
        ..args.sync.options()
    };

    let spinner = ctx.output.spinner("Resolving environments");
    let outcome = deployment.deploy_with_progress(&options, &|name| {
        spinner.set_message(format!("Deploying {}", name));
    });
    spinner.finish_and_clear();
    let report = outcome?;

    for env in &report.environments {
        let detail = if env.updated_modules.is_empty() {
            String::new()
        } else {
            let names: Vec<&str> = env.updated_modules.iter().map(String::as_str).collect();
            format!(" (modules: {})", names.join(", "))
        };
        println!("{} {}{}", ctx.output.ok(), env.name, detail);
        for path in &env.purged {
            println!("    removed {}", path.display());
        }
    }
    for path in &report.purged_environments {
        println!("{} removed stale environment {}", ctx.output.ok(), path.display());
    }
    if report.environments.is_empty() {
        println!("No environments deployed.");
    }
    Ok(())
}

fn execute_module(deployment: &Deployment, args: ModuleArgs, ctx: &Context) -> Result<()> {
    let options = DeployOptions {
        environments: args.environment.into_iter().collect(),
        ..args.sync.options()
    };
    let updated = deployment.deploy_modules(&args.names, &options)?;
    if updated.is_empty() {
        println!("All requested modules are up to date.");
    }
    for name in &updated {
        println!("{} {}", ctx.output.ok(), name);
    }
    Ok(())
}

fn execute_display(deployment: &Deployment, args: DisplayArgs) -> Result<()> {
    let listings = deployment.display(args.detail)?;
    ptree::print_tree(&listing_tree(&listings))?;
    Ok(())
}
