//! sockrpc-echo entry point.

use std::process::ExitCode;

use clap::Parser;

use sockrpc_cli::cli::Cli;
use sockrpc_cli::config::{FileConfig, server_config};
use sockrpc_cli::error::CliResult;
use sockrpc_server::tracing::{TracingConfig, init_tracing};

#[tokio::main]
async fn main() -> ExitCode {
    let cli = Cli::parse();

    match run(cli).await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("error: {e}");
            ExitCode::FAILURE
        }
    }
}

async fn run(cli: Cli) -> CliResult<()> {
    let tracing_config = if cli.debug {
        TracingConfig::cli_debug()
    } else {
        TracingConfig::default()
    };
    init_tracing(tracing_config.with_format(cli.log_format))?;

    let file = match cli.config {
        Some(ref path) => FileConfig::load_from(path)?,
        None => FileConfig::load()?,
    };

    sockrpc_cli::serve(server_config(&cli, &file)).await
}
