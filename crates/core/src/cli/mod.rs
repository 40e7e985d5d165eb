//! Command-line interface.

pub mod chat;

use std::path::PathBuf;

use anyhow::Context;
use clap::{Parser, Subcommand};

use pg_domain::config::{Config, ConfigSeverity};

pub const DEFAULT_CONFIG_PATH: &str = "pegasus.toml";

#[derive(Parser)]
#[command(name = "pegasus", about = "Pegasus personal assistant runtime")]
pub struct Cli {
    /// Path to the configuration file.
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Subcommand)]
pub enum Command {
    /// Start the runtime (default).
    Run,
    /// Interactive chat REPL against the local agent.
    Chat,
    /// Configuration helpers.
    Config(ConfigCommand),
    /// Print the version.
    Version,
}

#[derive(clap::Args)]
pub struct ConfigCommand {
    #[command(subcommand)]
    pub action: ConfigAction,
}

#[derive(Subcommand)]
pub enum ConfigAction {
    /// Validate the configuration and report issues.
    Validate,
    /// Print the effective configuration (secrets masked).
    Show,
}

/// Load and parse the config file.
pub fn load_config(path: Option<PathBuf>) -> anyhow::Result<(Config, PathBuf)> {
    let path = path.unwrap_or_else(|| PathBuf::from(DEFAULT_CONFIG_PATH));
    let raw = std::fs::read_to_string(&path)
        .with_context(|| format!("reading config {}", path.display()))?;
    let config: Config =
        toml::from_str(&raw).with_context(|| format!("parsing config {}", path.display()))?;
    Ok((config, path))
}

/// `config validate` — print all issues; false when any is an error.
pub fn validate(config: &Config, path: &std::path::Path) -> bool {
    let issues = config.validate();
    if issues.is_empty() {
        println!("{}: OK", path.display());
        return true;
    }
    for issue in &issues {
        println!("{issue}");
    }
    !issues.iter().any(|i| i.severity == ConfigSeverity::Error)
}

/// `config show` — effective config with API keys masked.
pub fn show(config: &Config) {
    let mut masked = config.clone();
    for provider in masked.llm.providers.values_mut() {
        if provider.api_key.is_some() {
            provider.api_key = Some("***".into());
        }
    }
    match toml::to_string_pretty(&masked) {
        Ok(text) => println!("{text}"),
        Err(e) => eprintln!("failed to render config: {e}"),
    }
}
