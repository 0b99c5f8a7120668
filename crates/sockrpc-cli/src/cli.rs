//! Command-line interface definition.

use std::path::PathBuf;

use clap::Parser;

use sockrpc_server::tracing::LogFormat;

/// sockrpc-echo - single-request-per-connection RPC echo server
#[derive(Debug, Parser)]
#[command(name = "sockrpc-echo")]
#[command(author, version, about, long_about = None)]
pub struct Cli {
    /// Path to configuration file
    #[arg(long, short, env = "SOCKRPC_CONFIG")]
    pub config: Option<PathBuf>,

    /// Host name or address to bind
    #[arg(long, env = "SOCKRPC_HOST")]
    pub host: Option<String>,

    /// Port to bind (0 picks a free port)
    #[arg(long, short, env = "SOCKRPC_PORT")]
    pub port: Option<u16>,

    /// Number of connections served concurrently
    #[arg(long, env = "SOCKRPC_POOL_SIZE")]
    pub pool_size: Option<usize>,

    /// Largest accepted request frame in bytes
    #[arg(long, env = "SOCKRPC_MAX_FRAME_SIZE")]
    pub max_frame_size: Option<usize>,

    /// Default handler deadline in milliseconds (0 disables it)
    #[arg(long, env = "SOCKRPC_TIMEOUT_MS")]
    pub timeout_ms: Option<u64>,

    /// Enable debug output
    #[arg(long, short = 'v')]
    pub debug: bool,

    /// Log output format: pretty, compact or json
    #[arg(long, default_value_t = LogFormat::Compact, env = "SOCKRPC_LOG_FORMAT")]
    pub log_format: LogFormat,
}
