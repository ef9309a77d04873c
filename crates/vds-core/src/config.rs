use std::path::Path;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use vds_backend::ConnectOptions;

use crate::error::{StorageError, StorageResult};

/// Settings for a [`Database`](crate::Database).
///
/// Every field has a default, so a TOML file only needs the keys it changes:
///
/// ```toml
/// host = "db.internal"
/// status_timeout_ms = 5000
/// ```
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub host: String,
    pub port: u16,
    /// Logical database that holds one collection per project.
    pub database: String,
    /// How long an unchanged status report is withheld.
    pub status_timeout_ms: u64,
    /// How long an unchanged branch read waits for a local update.
    pub branch_poll_timeout_ms: u64,
    /// Recompute content hashes on insert and reject mismatches.
    pub verify_hashes: bool,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        let connect = ConnectOptions::default();
        Self {
            host: connect.host,
            port: connect.port,
            database: connect.database,
            status_timeout_ms: 1000,
            branch_poll_timeout_ms: 1000,
            verify_hashes: false,
        }
    }
}

impl DatabaseConfig {
    /// Parse a configuration from TOML text.
    pub fn from_toml_str(text: &str) -> StorageResult<Self> {
        toml::from_str(text).map_err(|e| StorageError::Config(e.to_string()))
    }

    /// Read and parse a TOML configuration file.
    pub fn load(path: &Path) -> StorageResult<Self> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| StorageError::Config(format!("{}: {e}", path.display())))?;
        Self::from_toml_str(&text)
    }

    pub fn connect_options(&self) -> ConnectOptions {
        ConnectOptions {
            host: self.host.clone(),
            port: self.port,
            database: self.database.clone(),
        }
    }

    pub fn status_timeout(&self) -> Duration {
        Duration::from_millis(self.status_timeout_ms)
    }

    pub fn branch_poll_timeout(&self) -> Duration {
        Duration::from_millis(self.branch_poll_timeout_ms)
    }
}
