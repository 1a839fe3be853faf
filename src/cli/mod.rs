//! CLI subcommand definitions and handlers.
//!
//! Uses clap derive to define the subcommand hierarchy:
//! - `run` (default) -- connect and serve polls
//! - `config show|path` -- inspect configuration

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Poll bot for a single Mattermost channel.
#[derive(Parser, Debug)]
#[command(
    name = "vote-bot",
    version = env!("CARGO_PKG_VERSION"),
    about = "Runs polls in a Mattermost channel"
)]
pub struct Cli {
    /// Path to the configuration file.
    #[arg(short, long, global = true, default_value = crate::config::DEFAULT_CONFIG_PATH)]
    pub config: PathBuf,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand, Debug)]
pub enum Command {
    /// Connect and serve polls (default when no subcommand is given).
    Run,

    /// Inspect configuration.
    #[command(subcommand)]
    Config(ConfigCommand),
}

#[derive(Subcommand, Debug)]
pub enum ConfigCommand {
    /// Print the loaded configuration (token redacted) as JSON.
    Show,

    /// Print the resolved configuration file path.
    Path,
}

// ---------------------------------------------------------------------------
// Subcommand handlers
// ---------------------------------------------------------------------------

use crate::config;
use std::path::Path;

/// Run the `config show` subcommand.
pub fn handle_config_show(path: &Path) -> Result<(), Box<dyn std::error::Error>> {
    let cfg = config::load_config(path)?;
    let pretty = serde_json::to_string_pretty(&cfg.redacted())?;
    println!("{}", pretty);
    Ok(())
}

/// Run the `config path` subcommand.
pub fn handle_config_path(path: &Path) {
    let resolved = std::fs::canonicalize(path).unwrap_or_else(|_| path.to_path_buf());
    println!("{}", resolved.display());
}
