//! CLI argument definitions for the slotflow binary.
//!
//! Priority resolution: CLI args > env vars > config file > defaults.

use std::path::PathBuf;

use clap::{Parser, Subcommand};
use uuid::Uuid;

/// Slotflow - log workouts and body measurements by talking to it.
#[derive(Parser, Debug)]
#[command(name = "slotflow", version, about)]
pub struct CliArgs {
    /// Path to the configuration file.
    #[arg(short = 'c', long = "config", global = true)]
    pub config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error).
    #[arg(short = 'l', long = "log-level", global = true)]
    pub log_level: Option<String>,

    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand, Debug, PartialEq)]
pub enum Command {
    /// Start an interactive logging conversation on stdin.
    Chat {
        /// User the saved records belong to.
        #[arg(short = 'u', long = "user")]
        user: String,

        /// Session identifier. A fresh one is generated when omitted.
        #[arg(short = 's', long = "session")]
        session: Option<String>,

        /// Keep records in memory instead of the database.
        #[arg(long = "ephemeral")]
        ephemeral: bool,
    },

    /// List saved records, newest first.
    History {
        #[arg(short = 'u', long = "user")]
        user: String,

        /// Only records of this domain (workout, measurement).
        #[arg(long = "domain")]
        domain: Option<String>,

        /// Only workouts of this movement.
        #[arg(long = "movement")]
        movement: Option<String>,

        #[arg(short = 'n', long = "limit", default_value_t = 20)]
        limit: u32,
    },

    /// Delete one saved record.
    Delete {
        #[arg(short = 'u', long = "user")]
        user: String,

        #[arg(long = "id")]
        id: Uuid,
    },
}

impl CliArgs {
    /// Resolve the configuration file path.
    ///
    /// Priority: --config flag > SLOTFLOW_CONFIG env var > ~/.slotflow/config.toml.
    pub fn resolve_config_path(&self) -> PathBuf {
        if let Some(ref p) = self.config {
            return p.clone();
        }
        if let Ok(p) = std::env::var("SLOTFLOW_CONFIG") {
            return PathBuf::from(p);
        }
        default_config_path()
    }

    /// Resolve the log filter used when RUST_LOG is unset.
    ///
    /// Priority: --log-level flag > config file value.
    pub fn resolve_log_level(&self, config_level: &str) -> String {
        self.log_level
            .clone()
            .unwrap_or_else(|| config_level.to_string())
    }
}

/// Default config file path for the current platform.
fn default_config_path() -> PathBuf {
    #[cfg(target_os = "windows")]
    if let Ok(home) = std::env::var("USERPROFILE") {
        return PathBuf::from(home).join(".slotflow").join("config.toml");
    }
    #[cfg(not(target_os = "windows"))]
    if let Ok(home) = std::env::var("HOME") {
        return PathBuf::from(home).join(".slotflow").join("config.toml");
    }
    PathBuf::from("config.toml")
}
