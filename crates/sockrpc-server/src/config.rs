//! Server configuration.

use std::time::Duration;

use sockrpc_protocol::DEFAULT_MAX_FRAME_SIZE;
use tokio::sync::Semaphore;

use crate::error::{ServerError, ServerResult};

/// Default bind host.
pub const DEFAULT_HOST: &str = "0.0.0.0";

/// Default bind port.
pub const DEFAULT_PORT: u16 = 8875;

/// Server configuration.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServerConfig {
    /// Host name or address to bind.
    pub host: String,

    /// Port to bind. `0` picks an ephemeral port.
    pub port: u16,

    /// Listen backlog handed to the OS.
    pub backlog: u32,

    /// Number of connections served concurrently.
    pub pool_size: usize,

    /// Largest accepted request frame, terminator excluded.
    pub max_frame_size: usize,

    /// Default handler deadline for methods registered without one.
    ///
    /// `None` lets handlers run unbounded.
    pub request_timeout: Option<Duration>,

    /// Deadline for each socket read and for the response write.
    pub io_timeout: Duration,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: DEFAULT_HOST.to_string(),
            port: DEFAULT_PORT,
            backlog: 5,
            pool_size: 4,
            max_frame_size: DEFAULT_MAX_FRAME_SIZE,
            request_timeout: Some(Duration::from_secs(3)),
            io_timeout: Duration::from_secs(30),
        }
    }
}

impl ServerConfig {
    /// Creates a configuration bound to the given host and port.
    pub fn new(host: impl Into<String>, port: u16) -> Self {
        Self {
            host: host.into(),
            port,
            ..Default::default()
        }
    }

    /// Builder: set listen backlog.
    pub fn with_backlog(mut self, backlog: u32) -> Self {
        self.backlog = backlog;
        self
    }

    /// Builder: set worker pool size.
    pub fn with_pool_size(mut self, pool_size: usize) -> Self {
        self.pool_size = pool_size;
        self
    }

    /// Builder: set maximum frame size in bytes.
    pub fn with_max_frame_size(mut self, max: usize) -> Self {
        self.max_frame_size = max;
        self
    }

    /// Builder: set default request timeout.
    pub fn with_request_timeout(mut self, timeout: Option<Duration>) -> Self {
        self.request_timeout = timeout;
        self
    }

    /// Builder: set socket IO timeout.
    pub fn with_io_timeout(mut self, timeout: Duration) -> Self {
        self.io_timeout = timeout;
        self
    }

    /// Returns the `host:port` string handed to the resolver.
    pub fn bind_addr(&self) -> String {
        if self.host.contains(':') && !self.host.starts_with('[') {
            format!("[{}]:{}", self.host, self.port)
        } else {
            format!("{}:{}", self.host, self.port)
        }
    }

    /// Checks that the configuration can be served.
    pub fn validate(&self) -> ServerResult<()> {
        if self.host.trim().is_empty() {
            return Err(ServerError::config("host must not be empty"));
        }
        if self.backlog == 0 {
            return Err(ServerError::config("backlog must be at least 1"));
        }
        if self.pool_size == 0 {
            return Err(ServerError::config("pool_size must be at least 1"));
        }
        if self.pool_size > Semaphore::MAX_PERMITS {
            return Err(ServerError::config(format!(
                "pool_size must be at most {}",
                Semaphore::MAX_PERMITS
            )));
        }
        if self.max_frame_size == 0 {
            return Err(ServerError::config("max_frame_size must be at least 1"));
        }
        if self.request_timeout == Some(Duration::ZERO) {
            return Err(ServerError::config("request_timeout must be non-zero"));
        }
        if self.io_timeout.is_zero() {
            return Err(ServerError::config("io_timeout must be non-zero"));
        }
        Ok(())
    }
}
