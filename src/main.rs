//! # envdeploy CLI
//!
//! Binary entry point. Parses arguments with `clap` and hands off to the
//! command modules; all engine logic lives in the `envdeploy` library.

mod cli;
mod commands;

use anyhow::Result;
use clap::Parser;

fn main() -> Result<()> {
    let cli = cli::Cli::parse();
    cli.execute()
}
