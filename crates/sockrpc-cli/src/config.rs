//! Configuration file loading and merging.
//!
//! Settings live in `~/.config/sockrpc/config.toml` by default:
//!
//! ```toml
//! [server]
//! host = "127.0.0.1"
//! port = 8875
//! pool_size = 8
//! request_timeout_ms = 3000
//! ```
//!
//! Command-line flags win over the file, the file wins over built-in defaults.

use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;
use sockrpc_server::ServerConfig;
use tracing::debug;

use crate::cli::Cli;
use crate::error::{CliError, CliResult};

/// Contents of `config.toml`.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct FileConfig {
    /// Listener settings.
    pub server: ServerSettings,
}

/// The `[server]` table. Unset keys keep their defaults.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct ServerSettings {
    pub host: Option<String>,
    pub port: Option<u16>,
    pub backlog: Option<u32>,
    pub pool_size: Option<usize>,
    pub max_frame_size: Option<usize>,

    /// Default handler deadline; `0` disables it.
    pub request_timeout_ms: Option<u64>,

    pub io_timeout_ms: Option<u64>,
}

impl FileConfig {
    /// Loads configuration from the default path.
    ///
    /// A missing file yields the defaults.
    pub fn load() -> CliResult<Self> {
        let path = Self::default_path();
        if path.exists() {
            Self::load_from(&path)
        } else {
            debug!(path = %path.display(), "No config file, using defaults");
            Ok(Self::default())
        }
    }

    /// Loads configuration from a specific path.
    pub fn load_from(path: &Path) -> CliResult<Self> {
        let content = std::fs::read_to_string(path).map_err(|source| CliError::ConfigRead {
            path: path.to_path_buf(),
            source,
        })?;
        let config = toml::from_str(&content).map_err(|source| CliError::ConfigParse {
            path: path.to_path_buf(),
            source,
        })?;
        debug!(path = %path.display(), "Loaded config file");
        Ok(config)
    }

    /// Returns the default configuration file path.
    pub fn default_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("sockrpc")
            .join("config.toml")
    }
}

impl ServerSettings {
    /// Overlays the settings that are set onto `config`.
    pub fn apply(&self, mut config: ServerConfig) -> ServerConfig {
        if let Some(ref host) = self.host {
            config.host = host.clone();
        }
        if let Some(port) = self.port {
            config.port = port;
        }
        if let Some(backlog) = self.backlog {
            config.backlog = backlog;
        }
        if let Some(pool_size) = self.pool_size {
            config.pool_size = pool_size;
        }
        if let Some(max) = self.max_frame_size {
            config.max_frame_size = max;
        }
        if let Some(ms) = self.request_timeout_ms {
            config.request_timeout = millis_or_none(ms);
        }
        if let Some(ms) = self.io_timeout_ms {
            config.io_timeout = Duration::from_millis(ms);
        }
        config
    }
}

/// Builds the effective server configuration: flags over file over defaults.
pub fn server_config(cli: &Cli, file: &FileConfig) -> ServerConfig {
    let flags = ServerSettings {
        host: cli.host.clone(),
        port: cli.port,
        backlog: None,
        pool_size: cli.pool_size,
        max_frame_size: cli.max_frame_size,
        request_timeout_ms: cli.timeout_ms,
        io_timeout_ms: None,
    };
    flags.apply(file.server.apply(ServerConfig::default()))
}

fn millis_or_none(ms: u64) -> Option<Duration> {
    (ms > 0).then(|| Duration::from_millis(ms))
}
