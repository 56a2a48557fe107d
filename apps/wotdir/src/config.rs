//! # Application Configuration
//!
//! [`AppConfig`] is read from an optional TOML file. CLI flags are applied on
//! top of it; security knobs stay in environment variables (see [`crate::api`]).
//!
//! ```toml
//! host = "0.0.0.0"
//! port = 8081
//! database = "/var/lib/wotdir/things.redb"
//! backend = "redb"
//! base_url = "https://directory.example.com"
//! page_size = 50
//!
//! [directory]
//! graph_prefix = "http://localhost/wotdir/graph/"
//! replay_delay_ms = 0
//! ```

use clap::ValueEnum;
use serde::{Deserialize, Serialize};
use std::fmt;
use std::path::{Path, PathBuf};
use wotdir_core::{DirectoryConfig, DirectoryError, MemoryStore, StorageBackend};

/// Largest config file accepted (1 MiB).
const MAX_CONFIG_FILE_SIZE: u64 = 1024 * 1024;

pub const DEFAULT_PAGE_SIZE: usize = 20;

// =============================================================================
// BACKEND
// =============================================================================

/// Which graph store backs the directory.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum Backend {
    /// ACID file database.
    #[default]
    Redb,
    /// Process-local; lost on exit.
    Memory,
}

impl fmt::Display for Backend {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Redb => f.write_str("redb"),
            Self::Memory => f.write_str("memory"),
        }
    }
}

// =============================================================================
// APP CONFIG
// =============================================================================

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct AppConfig {
    pub host: String,
    pub port: u16,
    pub database: PathBuf,
    pub backend: Backend,
    /// Prepended to `Location` and `Link` URLs. Empty gives relative URLs.
    pub base_url: String,
    pub page_size: usize,
    pub directory: DirectoryConfig,
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 8081,
            database: PathBuf::from("wotdir.redb"),
            backend: Backend::default(),
            base_url: String::new(),
            page_size: DEFAULT_PAGE_SIZE,
            directory: DirectoryConfig::default(),
        }
    }
}

impl AppConfig {
    /// Parse a config from TOML text.
    pub fn from_toml(text: &str) -> Result<Self, DirectoryError> {
        let mut config: Self = toml::from_str(text)
            .map_err(|e| DirectoryError::Internal(format!("Invalid config: {}", e)))?;
        config.base_url = config.base_url.trim_end_matches('/').to_string();
        Ok(config)
    }

    /// Load from `path`, or return the defaults when no path is given.
    pub fn load(path: Option<&Path>) -> Result<Self, DirectoryError> {
        let Some(path) = path else {
            return Ok(Self::default());
        };

        let metadata = std::fs::metadata(path).map_err(|e| {
            DirectoryError::Internal(format!("Cannot read config '{}': {}", path.display(), e))
        })?;
        if metadata.len() > MAX_CONFIG_FILE_SIZE {
            return Err(DirectoryError::Internal(format!(
                "Config file size {} bytes exceeds maximum allowed {} bytes",
                metadata.len(),
                MAX_CONFIG_FILE_SIZE
            )));
        }

        let text = std::fs::read_to_string(path).map_err(|e| {
            DirectoryError::Internal(format!("Cannot read config '{}': {}", path.display(), e))
        })?;
        let config = Self::from_toml(&text)?;
        tracing::info!(path = %path.display(), "Loaded configuration");
        Ok(config)
    }

    /// Address the server binds to.
    #[must_use]
    pub fn bind_addr(&self) -> String {
        format!("{}:{}", self.host, self.port)
    }

    /// Open the configured graph store.
    pub fn open_store(&self) -> Result<StorageBackend, DirectoryError> {
        match self.backend {
            Backend::Redb => StorageBackend::persistent(&self.database),
            Backend::Memory => Ok(StorageBackend::InMemory(MemoryStore::new())),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_file_gives_defaults() {
        assert_eq!(AppConfig::from_toml("").expect("parse"), AppConfig::default());
    }

    #[test]
    fn nested_directory_section_is_read() {
        let config = AppConfig::from_toml(
            r#"
            backend = "memory"
            base_url = "https://dir.example.com/"
            page_size = 5

            [directory]
            replay_delay_ms = 0
            "#,
        )
        .expect("parse");
        assert_eq!(config.backend, Backend::Memory);
        assert_eq!(config.base_url, "https://dir.example.com");
        assert_eq!(config.page_size, 5);
        assert_eq!(config.directory.replay_delay_ms, 0);
        assert_eq!(
            config.directory.graph_prefix,
            DirectoryConfig::default().graph_prefix
        );
    }

    #[test]
    fn unknown_keys_are_rejected() {
        assert!(AppConfig::from_toml("colour = \"blue\"").is_err());
    }

    #[test]
    fn load_without_path_is_default() {
        assert_eq!(AppConfig::load(None).expect("load"), AppConfig::default());
    }

    #[test]
    fn load_reads_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let path = dir.path().join("wotdir.toml");
        std::fs::write(&path, "port = 9000\n").expect("write");
        let config = AppConfig::load(Some(&path)).expect("load");
        assert_eq!(config.port, 9000);
        assert_eq!(config.bind_addr(), "127.0.0.1:9000");
    }

    #[test]
    fn memory_backend_opens_without_a_file() {
        let config = AppConfig {
            backend: Backend::Memory,
            ..AppConfig::default()
        };
        assert!(!config.open_store().expect("open").is_persistent());
    }
}
