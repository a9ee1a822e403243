//! # Output
//!
//! Terminal presentation for the CLI: color detection, status symbols, the
//! deploy spinner, and plain-text renderings of module lists and source
//! trees.
//!
//! Color follows `--color=always|never|auto`. In auto mode it is disabled by
//! `NO_COLOR` (any value), `CLICOLOR=0`, `TERM=dumb`, or a non-TTY stdout,
//! and forced by `CLICOLOR_FORCE=1`.

use std::env;
use std::path::Path;
use std::time::Duration;

use console::style;
use indicatif::{ProgressBar, ProgressStyle};
use ptree::TreeBuilder;

use crate::deployment::SourceListing;
use crate::puppetfile::ModuleSpec;

#[derive(Debug, Clone)]
pub struct OutputConfig {
    pub use_color: bool,
}

impl OutputConfig {
    pub fn from_env_and_flag(color_flag: &str) -> Self {
        let use_color = match color_flag.to_lowercase().as_str() {
            "always" => true,
            "never" => false,
            _ => Self::detect_color_support(),
        };
        console::set_colors_enabled(use_color);
        console::set_colors_enabled_stderr(use_color);
        Self { use_color }
    }

    fn detect_color_support() -> bool {
        if env::var_os("NO_COLOR").is_some() {
            return false;
        }
        if env::var("CLICOLOR").is_ok_and(|v| v == "0") {
            return false;
        }
        if env::var("CLICOLOR_FORCE").is_ok_and(|v| v != "0" && !v.is_empty()) {
            return true;
        }
        if env::var("TERM").is_ok_and(|v| v == "dumb") {
            return false;
        }
        console::Term::stdout().features().colors_supported()
    }

    #[cfg(test)]
    pub fn plain() -> Self {
        Self { use_color: false }
    }

    /// Marker for a finished step.
    pub fn ok(&self) -> String {
        if self.use_color {
            style("✔").green().to_string()
        } else {
            "[OK]".to_string()
        }
    }

    /// Marker for a failed step.
    pub fn failed(&self) -> String {
        if self.use_color {
            style("✘").red().to_string()
        } else {
            "[FAIL]".to_string()
        }
    }

    pub fn heading(&self, text: &str) -> String {
        if self.use_color {
            style(text).bold().to_string()
        } else {
            text.to_string()
        }
    }

    /// Spinner shown while a long step runs. Hidden without a terminal.
    pub fn spinner(&self, message: &str) -> ProgressBar {
        if !self.use_color || !console::Term::stderr().is_term() {
            return ProgressBar::hidden();
        }
        let spinner = ProgressBar::new_spinner();
        spinner.set_style(
            ProgressStyle::with_template("{spinner:.cyan} {msg}")
                .unwrap_or_else(|_| ProgressStyle::default_spinner()),
        );
        spinner.set_message(message.to_string());
        spinner.enable_steady_tick(Duration::from_millis(100));
        spinner
    }
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self::from_env_and_flag("auto")
    }
}

/// One line per module: name, kind, declared version and install path
/// relative to `basedir`, in aligned columns.
pub fn render_modules(modules: &[ModuleSpec], basedir: &Path) -> String {
    let rows: Vec<[String; 4]> = modules
        .iter()
        .map(|m| {
            let path = m.path.strip_prefix(basedir).unwrap_or(&m.path);
            [
                m.name.clone(),
                m.kind.to_string(),
                m.version.to_string(),
                path.display().to_string(),
            ]
        })
        .collect();

    let mut widths = [0usize; 3];
    for row in &rows {
        for (width, cell) in widths.iter_mut().zip(row.iter()) {
            *width = (*width).max(cell.chars().count());
        }
    }

    let mut out = String::new();
    for row in &rows {
        let line = format!(
            "{:<w0$}  {:<w1$}  {:<w2$}  {}",
            row[0],
            row[1],
            row[2],
            row[3],
            w0 = widths[0],
            w1 = widths[1],
            w2 = widths[2]
        );
        out.push_str(line.trim_end());
        out.push('\n');
    }
    out
}

/// Tree of sources, environments and, when listed, modules.
pub fn listing_tree(listings: &[SourceListing]) -> ptree::item::StringItem {
    let mut tree = TreeBuilder::new("sources".to_string());
    for source in listings {
        tree.begin_child(format!("{} ({})", source.name, source.basedir.display()));
        for env in &source.environments {
            if env.modules.is_empty() {
                tree.add_empty_child(format!("{} @ {}", env.name, env.reference));
                continue;
            }
            tree.begin_child(format!("{} @ {}", env.name, env.reference));
            for module in &env.modules {
                tree.add_empty_child(format!(
                    "{} [{}] {}",
                    module.name, module.kind, module.declared
                ));
            }
            tree.end_child();
        }
        tree.end_child();
    }
    tree.build()
}
