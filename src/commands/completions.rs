//! # Completions Command Implementation
//!
//! Prints a completion script for the requested shell.
//!
//! ```bash
//! envdeploy completions bash > ~/.local/share/bash-completion/completions/envdeploy
//! envdeploy completions zsh > ~/.zfunc/_envdeploy
//! ```

use std::io;

use anyhow::Result;
use clap::{Args, CommandFactory};
use clap_complete::{generate, Shell};

use crate::cli::Cli;

/// Generate shell completion scripts
#[derive(Args, Debug)]
pub struct CompletionsArgs {
    /// Target shell
    #[arg(value_enum)]
    pub shell: Shell,
}

pub fn execute(args: CompletionsArgs) -> Result<()> {
    let mut cmd = Cli::command();
    let bin = cmd.get_name().to_string();
    generate(args.shell, &mut cmd, bin, &mut io::stdout());
    Ok(())
}
