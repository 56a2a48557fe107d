//! # wotdir CLI Module
//!
//! ## Available Commands
//!
//! - `server` - Start the HTTP server
//! - `status` - Show store and cache counts
//! - `export` - Write every partition in linear form
//! - `rebuild` - Rebuild the cache from the store and report
//! - `init` - Initialize a new database

mod commands;

use crate::config::{AppConfig, Backend};
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use wotdir_core::DirectoryError;

pub use commands::*;

// =============================================================================
// CLI STRUCTURE
// =============================================================================

/// wotdir - WoT Thing Description Directory
///
/// Registers, validates and stores Thing Descriptions in per-thing graph
/// partitions, and streams every change as Server-Sent Events.
#[derive(Parser, Debug)]
#[command(name = "wotdir")]
#[command(version, about, long_about = None)]
pub struct Cli {
    /// Suppress banner output
    #[arg(short, long, global = true)]
    pub quiet: bool,

    /// TOML configuration file
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// Path to the graph database (overrides the config file)
    #[arg(short = 'D', long, global = true)]
    pub database: Option<PathBuf>,

    /// Storage backend (overrides the config file)
    #[arg(short = 'B', long, global = true, value_enum)]
    pub backend: Option<Backend>,

    /// Output in JSON format (for programmatic access)
    #[arg(long, global = true)]
    pub json_mode: bool,

    #[command(subcommand)]
    pub command: Option<Commands>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Start HTTP server
    Server {
        /// Host to bind to
        #[arg(short = 'H', long)]
        host: Option<String>,

        /// Port to bind to
        #[arg(short, long)]
        port: Option<u16>,
    },

    /// Show store and cache counts
    Status,

    /// Export every partition in linear form
    Export {
        /// Output file path
        #[arg(short, long)]
        output: PathBuf,
    },

    /// Rebuild the cache from the store and report skipped partitions
    Rebuild,

    /// Initialize a new empty database
    Init {
        /// Replace an existing database
        #[arg(short, long)]
        force: bool,
    },
}

impl Cli {
    /// Config file values with the global flags applied on top.
    pub fn resolve_config(&self) -> Result<AppConfig, DirectoryError> {
        let mut config = AppConfig::load(self.config.as_deref())?;
        if let Some(database) = &self.database {
            config.database.clone_from(database);
        }
        if let Some(backend) = self.backend {
            config.backend = backend;
        }
        if let Some(Commands::Server { host, port }) = &self.command {
            if let Some(host) = host {
                config.host.clone_from(host);
            }
            if let Some(port) = port {
                config.port = *port;
            }
        }
        Ok(config)
    }
}

// =============================================================================
// COMMAND EXECUTION
// =============================================================================

pub async fn execute(cli: Cli) -> Result<(), DirectoryError> {
    let config = cli.resolve_config()?;
    let json_mode = cli.json_mode;

    match cli.command {
        Some(Commands::Server { .. }) => cmd_server(&config).await,
        Some(Commands::Export { output }) => cmd_export(&config, &output),
        Some(Commands::Rebuild) => cmd_rebuild(&config, json_mode),
        Some(Commands::Init { force }) => cmd_init(&config, force),
        Some(Commands::Status) | None => cmd_status(&config, json_mode),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn flags_override_defaults() {
        let cli = Cli::parse_from([
            "wotdir", "-D", "other.redb", "-B", "memory", "server", "-p", "9999",
        ]);
        let config = cli.resolve_config().expect("resolve");
        assert_eq!(config.database, PathBuf::from("other.redb"));
        assert_eq!(config.backend, Backend::Memory);
        assert_eq!(config.port, 9999);
        assert_eq!(config.host, AppConfig::default().host);
    }

    #[test]
    fn flags_override_config_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("wotdir.toml");
        std::fs::write(&path, "backend = \"memory\"\nport = 7000\n").expect("write");

        let cli = Cli::parse_from([
            "wotdir",
            "--config",
            path.to_str().expect("utf-8 path"),
            "-B",
            "redb",
            "status",
        ]);
        let config = cli.resolve_config().expect("resolve");
        assert_eq!(config.backend, Backend::Redb);
        assert_eq!(config.port, 7000);
    }

    #[test]
    fn no_subcommand_parses() {
        let cli = Cli::parse_from(["wotdir", "--json-mode"]);
        assert!(cli.command.is_none());
        assert!(cli.json_mode);
    }
}
