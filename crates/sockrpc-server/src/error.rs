//! Server error types.

use std::io;
use thiserror::Error;

use sockrpc_protocol::{DecodeFailure, ProtocolError};

/// Result type for server operations.
pub type ServerResult<T> = Result<T, ServerError>;

/// Errors that can occur in the server.
///
/// Everything past [`ServerError::Bind`] is contained at the connection
/// boundary and only ever logged.
#[derive(Debug, Error)]
pub enum ServerError {
    /// IO error (socket read/write, accept).
    #[error("IO error: {0}")]
    Io(#[from] io::Error),

    /// Protocol error (encoding, codec misbehavior).
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Configuration or codec rejected at construction.
    #[error("Configuration error: {message}")]
    Config { message: String },

    /// Listener could not be bound.
    #[error("Failed to bind {addr}: {source}")]
    Bind {
        addr: String,
        #[source]
        source: io::Error,
    },

    /// Request frame exceeded the configured maximum.
    #[error("Frame too large: {size} bytes (max: {max})")]
    FrameTooLarge { size: usize, max: usize },

    /// Request could not be decoded.
    #[error("Decode error: {0}")]
    Decode(#[from] DecodeFailure),

    /// Socket operation timed out.
    #[error("Timeout during {operation}")]
    Timeout { operation: String },

    /// The worker pool was closed.
    #[error("Server shutdown requested")]
    Shutdown,
}

impl ServerError {
    /// Creates a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
        }
    }

    /// Creates a bind error.
    pub fn bind(addr: impl Into<String>, source: io::Error) -> Self {
        Self::Bind {
            addr: addr.into(),
            source,
        }
    }

    /// Creates a timeout error.
    pub fn timeout(operation: impl Into<String>) -> Self {
        Self::Timeout {
            operation: operation.into(),
        }
    }
}
