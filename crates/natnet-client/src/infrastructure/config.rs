//! TOML configuration file for the client.
//!
//! Every field is optional in the file; missing ones take the defaults
//! below.  A complete file looks like:
//!
//! ```toml
//! [server]
//! address = "192.168.1.20"   # omit to discover the server by broadcast
//! command_port = 1510
//! multicast_group = "239.255.42.99"   # only needed for servers older than 3.0
//! data_port = 1511
//!
//! [session]
//! handshake_attempts = 5
//! handshake_timeout_ms = 1000
//! initial_sync_echoes = 100
//! echo_timeout_ms = 100
//! strict = false
//!
//! [logging]
//! level = "info"
//! ```
//!
//! # Serde default values (for beginners)
//!
//! Fields annotated with `#[serde(default = "some_fn")]` use the return value
//! of `some_fn()` when the field is absent from the TOML file.  The client
//! therefore runs without any config file at all, and an older file keeps
//! working when new fields are added.

use std::net::{IpAddr, Ipv4Addr};
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::application::session::{SessionConfig, DEFAULT_COMMAND_PORT};

/// Error type for configuration file operations.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// A file system I/O error occurred.
    #[error("I/O error accessing config at {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The TOML content could not be parsed.
    #[error("failed to parse config TOML: {0}")]
    Parse(#[from] toml::de::Error),

    /// The config could not be serialized to TOML.
    #[error("failed to serialize config: {0}")]
    Serialize(#[from] toml::ser::Error),
}

// ── Config schema types ───────────────────────────────────────────────────────

/// Top-level configuration file.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct ClientConfig {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub session: SessionSettings,
    #[serde(default)]
    pub logging: LoggingConfig,
}

/// Where the server is and how it streams.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ServerConfig {
    /// Server IP.  Absent means discover by broadcast.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub address: Option<IpAddr>,
    #[serde(default = "default_command_port")]
    pub command_port: u16,
    /// Overrides the multicast group announced by the server.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub multicast_group: Option<Ipv4Addr>,
    /// Overrides the data port announced by the server.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data_port: Option<u16>,
}

/// Handshake and decoding behaviour.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SessionSettings {
    #[serde(default = "default_handshake_attempts")]
    pub handshake_attempts: u32,
    #[serde(default = "default_handshake_timeout_ms")]
    pub handshake_timeout_ms: u64,
    #[serde(default = "default_initial_sync_echoes")]
    pub initial_sync_echoes: usize,
    #[serde(default = "default_echo_timeout_ms")]
    pub echo_timeout_ms: u64,
    #[serde(default)]
    pub strict: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoggingConfig {
    /// `tracing` filter used when `RUST_LOG` is unset, e.g. `"info"` or `"natnet=debug"`.
    #[serde(default = "default_log_level")]
    pub level: String,
}

// ── Default helpers ───────────────────────────────────────────────────────────

fn default_command_port() -> u16 {
    DEFAULT_COMMAND_PORT
}
fn default_handshake_attempts() -> u32 {
    5
}
fn default_handshake_timeout_ms() -> u64 {
    1000
}
fn default_initial_sync_echoes() -> usize {
    100
}
fn default_echo_timeout_ms() -> u64 {
    100
}
fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            address: None,
            command_port: default_command_port(),
            multicast_group: None,
            data_port: None,
        }
    }
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            handshake_attempts: default_handshake_attempts(),
            handshake_timeout_ms: default_handshake_timeout_ms(),
            initial_sync_echoes: default_initial_sync_echoes(),
            echo_timeout_ms: default_echo_timeout_ms(),
            strict: false,
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl From<&ClientConfig> for SessionConfig {
    fn from(config: &ClientConfig) -> Self {
        Self {
            server_address: config.server.address,
            command_port: config.server.command_port,
            multicast_group: config.server.multicast_group,
            data_port: config.server.data_port,
            handshake_attempts: config.session.handshake_attempts,
            handshake_timeout: Duration::from_millis(config.session.handshake_timeout_ms),
            initial_sync_echoes: config.session.initial_sync_echoes,
            echo_timeout: Duration::from_millis(config.session.echo_timeout_ms),
            strict: config.session.strict,
        }
    }
}

// ── Config repository ─────────────────────────────────────────────────────────

impl ClientConfig {
    /// Loads the configuration at `path`, returning defaults if the file
    /// does not exist.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] for file-system errors other than "not found",
    /// and [`ConfigError::Parse`] if the TOML is malformed.
    pub fn load_from(path: &Path) -> Result<Self, ConfigError> {
        match std::fs::read_to_string(path) {
            Ok(content) => Ok(toml::from_str(&content)?),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(Self::default()),
            Err(source) => Err(ConfigError::Io {
                path: path.to_path_buf(),
                source,
            }),
        }
    }

    /// Writes the configuration to `path`, creating parent directories.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] for file-system failures or
    /// [`ConfigError::Serialize`] if serialization fails.
    pub fn save_to(&self, path: &Path) -> Result<(), ConfigError> {
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir).map_err(|source| ConfigError::Io {
                path: dir.to_path_buf(),
                source,
            })?;
        }

        let content = toml::to_string_pretty(self)?;
        std::fs::write(path, content).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })
    }
}

// ── Tests ─────────────────────────────────────────────────────────────────────
