pub mod config;
pub mod doctor;

use clap::{Parser, Subcommand};

/// temporal-agent-mcp — a durable task scheduler exposed as a remote
/// tool server.
#[derive(Debug, Parser)]
#[command(name = "tam-gateway", version, about)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Option<Command>,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Start the gateway server (default when no subcommand is given).
    Serve,
    /// Run diagnostic checks against the current configuration.
    Doctor,
    /// Configuration utilities.
    #[command(subcommand)]
    Config(ConfigCommand),
    /// Print version information.
    Version,
}

#[derive(Debug, Subcommand)]
pub enum ConfigCommand {
    /// Parse the config file and report any errors.
    Validate,
    /// Dump the resolved configuration (with defaults) as TOML.
    Show,
}

// ── Config loading helper ─────────────────────────────────────────────

/// Load the configuration from the path specified by `TAM_CONFIG` (or
/// `config.toml` by default), falling back to `Config::from_env` when
/// no file is present. Shared by `serve`, `doctor`, and `config`.
pub fn load_config() -> anyhow::Result<(tam_domain::config::Config, String)> {
    let config_path = std::env::var("TAM_CONFIG").unwrap_or_else(|_| "config.toml".into());

    let config = if std::path::Path::new(&config_path).exists() {
        let raw = std::fs::read_to_string(&config_path)
            .map_err(|e| anyhow::anyhow!("reading {config_path}: {e}"))?;
        toml::from_str(&raw).map_err(|e| anyhow::anyhow!("parsing {config_path}: {e}"))?
    } else {
        tam_domain::config::Config::from_env()
    };

    Ok((config, config_path))
}
