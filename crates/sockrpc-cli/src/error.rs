//! CLI error types.

use std::path::PathBuf;

use sockrpc_server::ServerError;
use sockrpc_server::tracing::TracingError;
use thiserror::Error;

/// Result type for CLI operations.
pub type CliResult<T> = Result<T, CliError>;

/// Errors that end the `sockrpc-echo` process.
#[derive(Debug, Error)]
pub enum CliError {
    /// The configuration file could not be read.
    #[error("failed to read config {}: {source}", path.display())]
    ConfigRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    /// The configuration file is not valid TOML for [`FileConfig`](crate::config::FileConfig).
    #[error("failed to parse config {}: {source}", path.display())]
    ConfigParse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    /// The server failed to start or stopped with an error.
    #[error(transparent)]
    Server(#[from] ServerError),

    /// Logging could not be initialized.
    #[error(transparent)]
    Tracing(#[from] TracingError),
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn read_error_names_the_file() {
        let err = CliError::ConfigRead {
            path: PathBuf::from("/nowhere/config.toml"),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "not found"),
        };
        assert_eq!(
            err.to_string(),
            "failed to read config /nowhere/config.toml: not found"
        );
    }

    #[test]
    fn server_errors_pass_through() {
        let err: CliError = ServerError::config("pool_size must be at least 1").into();
        assert_eq!(
            err.to_string(),
            ServerError::config("pool_size must be at least 1").to_string()
        );
    }
}
