//! `sockrpc-echo`: a ready-to-run server exposing an `Echo` method.
//!
//! ```text
//! $ printf '{"method":"Echo","params":[{"msg":"hi"}],"id":1}\n' | nc 127.0.0.1 8875
//! {"id":1,"result":{"Msg":"hi","Code":999}}
//! ```

pub mod cli;
pub mod config;
pub mod error;

use serde::{Deserialize, Serialize};
use sockrpc_server::{HandlerError, MethodRegistry, RpcServer, ServerConfig, Shutdown};
use tracing::info;

use crate::error::CliResult;

/// Arguments of the `Echo` method.
#[derive(Debug, Deserialize)]
pub struct EchoArgs {
    pub msg: String,
}

/// Reply of the `Echo` method.
#[derive(Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "PascalCase")]
pub struct EchoReply {
    pub msg: String,
    pub code: i64,
}

/// Status code carried by every echo reply.
pub const ECHO_CODE: i64 = 999;

/// Echoes `msg` back.
pub fn echo(args: EchoArgs) -> Result<EchoReply, HandlerError> {
    Ok(EchoReply {
        msg: args.msg,
        code: ECHO_CODE,
    })
}

/// Builds the registry served by `sockrpc-echo`.
pub fn registry() -> MethodRegistry {
    let mut registry = MethodRegistry::new();
    registry.register_typed("Echo", echo, None);
    registry
}

/// Binds the server and serves until SIGINT or SIGTERM.
pub async fn serve(config: ServerConfig) -> CliResult<()> {
    let server = RpcServer::bind(config, registry()).await?;

    let shutdown = Shutdown::new();
    shutdown.listen_for_signals();

    server.run_until_shutdown(shutdown.triggered()).await?;
    info!("Server stopped");
    Ok(())
}
