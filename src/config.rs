//! Configuration management for db-invoke.
//!
//! Handles loading named connection profiles and request defaults from TOML
//! files, with libpq-style environment variables as a fallback.

use crate::error::{InvokeError, Result};
use crate::request::{
    ExecutionMode, Secret, DEFAULT_CONNECT_TIMEOUT_SECS, DEFAULT_QUERY_TIMEOUT_SECS,
};
use serde::Deserialize;
use std::collections::HashMap;
use std::path::{Path, PathBuf};

/// Main configuration structure for db-invoke.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct Config {
    /// Defaults applied to every request.
    #[serde(default)]
    pub defaults: Defaults,

    /// Named database connections.
    #[serde(default)]
    pub connections: HashMap<String, ConnectionProfile>,
}

/// Request defaults.
#[derive(Debug, Clone, PartialEq, Deserialize)]
pub struct Defaults {
    /// Query timeout in seconds (0 = no limit).
    #[serde(default = "default_query_timeout")]
    pub query_timeout_secs: u64,

    /// Connect timeout in seconds (0 = no limit).
    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    /// Application name reported to the server.
    #[serde(default)]
    pub application_name: Option<String>,

    /// Execution mode, e.g. "auto" or "dataset".
    #[serde(default)]
    pub mode: Option<ExecutionMode>,

    /// Capture server messages by default.
    #[serde(default)]
    pub capture_messages: bool,
}

fn default_query_timeout() -> u64 {
    DEFAULT_QUERY_TIMEOUT_SECS
}

fn default_connect_timeout() -> u64 {
    DEFAULT_CONNECT_TIMEOUT_SECS
}

impl Default for Defaults {
    fn default() -> Self {
        Self {
            query_timeout_secs: default_query_timeout(),
            connect_timeout_secs: default_connect_timeout(),
            application_name: None,
            mode: None,
            capture_messages: false,
        }
    }
}

/// A named database connection.
#[derive(Debug, Clone, Deserialize, Default)]
pub struct ConnectionProfile {
    /// Server address, optionally with a port.
    pub server: Option<String>,

    /// Database name.
    pub database: Option<String>,

    /// User name. Without one, ambient authentication is used.
    pub user: Option<String>,

    /// Password (not recommended to store in config).
    pub password: Option<Secret>,

    /// Explicit connection string; overrides every other connection field.
    pub connection_string: Option<String>,

    pub encrypt: Option<bool>,

    pub trust_server_certificate: Option<bool>,

    pub application_name: Option<String>,
}

impl ConnectionProfile {
    /// Applies environment variables (PGHOST, PGPORT, etc.) as defaults.
    pub fn apply_env_defaults(&mut self) {
        self.apply_defaults_from(|key| std::env::var(key).ok());
    }

    fn apply_defaults_from(&mut self, lookup: impl Fn(&str) -> Option<String>) {
        if self.server.is_none() {
            self.server = lookup("PGHOST").map(|host| match lookup("PGPORT") {
                Some(port) => format!("{host}:{port}"),
                None => host,
            });
        }
        if self.database.is_none() {
            self.database = lookup("PGDATABASE");
        }
        if self.user.is_none() {
            self.user = lookup("PGUSER");
        }
        if self.password.is_none() {
            self.password = lookup("PGPASSWORD").map(Secret::new);
        }
    }

    /// Returns a display-safe string (no password) for diagnostics.
    pub fn display_string(&self) -> String {
        if self.connection_string.is_some() {
            return "<connection string>".to_string();
        }
        let server = self.server.as_deref().unwrap_or("localhost");
        let database = self.database.as_deref().unwrap_or("unknown");
        format!("{database} @ {server}")
    }
}

impl Config {
    /// Returns the default config file path for the current platform.
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("db-invoke")
            .join("config.toml")
    }

    /// Loads configuration from a TOML file. A missing file yields the default config.
    pub fn load_from_file(path: &Path) -> Result<Self> {
        if !path.exists() {
            return Ok(Self::default());
        }

        let content = std::fs::read_to_string(path)
            .map_err(|e| InvokeError::config(format!("Failed to read config file: {e}")))?;

        Self::parse_toml(&content, path)
    }

    /// Parses configuration from a TOML string.
    fn parse_toml(content: &str, path: &Path) -> Result<Self> {
        toml::from_str(content).map_err(|e| {
            InvokeError::config(format!(
                "Configuration error in {}:\n  {}",
                path.display(),
                e
            ))
        })
    }

    /// Gets a named connection, or the default connection if name is None.
    pub fn get_connection(&self, name: Option<&str>) -> Option<&ConnectionProfile> {
        let key = name.unwrap_or("default");
        self.connections.get(key)
    }
}
