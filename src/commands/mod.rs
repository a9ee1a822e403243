//! # CLI Command Implementations
//!
//! Each subcommand lives in its own file with an `Args` struct derived with
//! `clap` and an `execute` function that calls into the `envdeploy`
//! library.

pub mod cache;
pub mod completions;
pub mod deploy;
pub mod puppetfile;
