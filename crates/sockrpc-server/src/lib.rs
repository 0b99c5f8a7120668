//! TCP RPC server: method registry, dispatch, connections and worker pool.
//!
//! This crate provides:
//! - A [`MethodRegistry`] mapping method names to handlers with optional deadlines
//! - A [`Dispatcher`] that runs handlers off the async runtime and contains failures
//! - A per-connection state machine that reads one frame and writes one reply
//! - An [`RpcServer`] accept loop bounded by a fixed worker pool
//!
//! # Example
//!
//! ```rust,no_run
//! use serde_json::json;
//! use sockrpc_server::{MethodRegistry, RpcServer, ServerConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let mut registry = MethodRegistry::new();
//!     registry.register("Ping", |_params| Ok(json!("pong")), None);
//!
//!     let server = RpcServer::bind(ServerConfig::new("127.0.0.1", 8875), registry).await?;
//!     server.run().await?;
//!     Ok(())
//! }
//! ```

mod config;
mod connection;
mod dispatch;
mod error;
mod registry;
mod server;
mod signals;
pub mod tracing;

pub use config::{DEFAULT_HOST, DEFAULT_PORT, ServerConfig};
pub use connection::{Connection, ConnectionState, READ_CHUNK_SIZE};
pub use dispatch::{DispatchError, Dispatcher};
pub use error::{ServerError, ServerResult};
pub use registry::{Handler, HandlerError, HandlerResult, Method, MethodRegistry};
pub use server::RpcServer;
pub use signals::Shutdown;

pub use sockrpc_protocol::{
    Codec, JsonCodec, Params, Request, RequestId, Response, DEFAULT_MAX_FRAME_SIZE,
};
