//! TCP listener and bounded worker pool.
//!
//! Each accepted connection is served on its own task, but only while it
//! holds one of `pool_size` semaphore permits. The permit is taken before
//! `accept`, so once every worker is busy new connections queue in the OS
//! backlog.

use std::future::Future;
use std::io;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use serde_json::json;
use tokio::net::{TcpListener, TcpSocket, lookup_host};
use tokio::sync::Semaphore;
use tracing::{debug, error, info, warn};

use sockrpc_protocol::{
    Codec, JsonCodec, ProtocolError, RequestId, Response, decode_request, encode_response,
};

use crate::config::ServerConfig;
use crate::connection::Connection;
use crate::dispatch::Dispatcher;
use crate::error::{ServerError, ServerResult};
use crate::registry::MethodRegistry;

/// Pause after a failed accept so a persistent error (e.g. out of file
/// descriptors) does not spin the loop.
const ACCEPT_ERROR_BACKOFF: Duration = Duration::from_millis(50);

/// Single-request-per-connection RPC server.
pub struct RpcServer {
    config: ServerConfig,
    listener: TcpListener,
    local_addr: SocketAddr,
    dispatcher: Arc<Dispatcher>,
    codec: Arc<dyn Codec>,
    workers: Arc<Semaphore>,
}

impl RpcServer {
    /// Binds a server speaking newline-delimited JSON.
    pub async fn bind(config: ServerConfig, registry: MethodRegistry) -> ServerResult<Self> {
        Self::bind_with_codec(config, registry, Arc::new(JsonCodec)).await
    }

    /// Binds a server using the given codec.
    ///
    /// The configuration and codec are checked before binding. A bind failure
    /// is returned here, before any serving starts.
    pub async fn bind_with_codec(
        config: ServerConfig,
        registry: MethodRegistry,
        codec: Arc<dyn Codec>,
    ) -> ServerResult<Self> {
        config.validate()?;
        validate_codec(codec.as_ref())?;

        let addr = config.bind_addr();
        let listener = bind_listener(&addr, config.backlog)
            .await
            .map_err(|source| ServerError::bind(addr.clone(), source))?;
        let local_addr = listener.local_addr()?;

        info!(
            addr = %local_addr,
            codec = codec.name(),
            pool_size = config.pool_size,
            methods = ?registry.names(),
            "RPC server listening"
        );

        let dispatcher = Arc::new(Dispatcher::with_handler_limit(
            registry,
            config.request_timeout,
            config.pool_size,
        ));
        let workers = Arc::new(Semaphore::new(config.pool_size));

        Ok(Self {
            config,
            listener,
            local_addr,
            dispatcher,
            codec,
            workers,
        })
    }

    /// Returns the bound address.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Returns the configuration.
    pub fn config(&self) -> &ServerConfig {
        &self.config
    }

    /// Returns the dispatcher shared by all connections.
    pub fn dispatcher(&self) -> &Dispatcher {
        &self.dispatcher
    }

    /// Returns the number of idle workers.
    pub fn idle_workers(&self) -> usize {
        self.workers.available_permits()
    }

    /// Waits for a free worker, then accepts a single connection.
    ///
    /// Fails with [`ServerError::Shutdown`] once the server has been shut down.
    pub async fn accept(&self) -> ServerResult<Connection> {
        let permit = Arc::clone(&self.workers)
            .acquire_owned()
            .await
            .map_err(|_| ServerError::Shutdown)?;

        let (stream, peer) = self.listener.accept().await?;
        debug!(peer = %peer, "Accepted new connection");

        Ok(Connection::new(
            stream,
            peer,
            Arc::clone(&self.codec),
            self.config.max_frame_size,
            self.config.io_timeout,
        )
        .with_permit(permit))
    }

    /// Runs the accept loop forever.
    ///
    /// Accept failures are logged and never end the loop.
    pub async fn run(&self) -> ServerResult<()> {
        loop {
            match self.accept().await {
                Ok(connection) => self.spawn(connection),
                Err(ServerError::Shutdown) => return Ok(()),
                Err(e) => {
                    error!(error = %e, "Failed to accept connection");
                    tokio::time::sleep(ACCEPT_ERROR_BACKOFF).await;
                }
            }
        }
    }

    /// Runs the accept loop until `shutdown` completes, then closes the
    /// worker pool so later [`accept`](Self::accept) calls fail.
    ///
    /// Connections already being served finish on their own tasks.
    pub async fn run_until_shutdown<S>(&self, shutdown: S) -> ServerResult<()>
    where
        S: Future<Output = ()> + Send,
    {
        tokio::select! {
            result = self.run() => result,
            _ = shutdown => {
                info!("Shutdown signal received");
                self.workers.close();
                Ok(())
            }
        }
    }

    fn spawn(&self, connection: Connection) {
        let dispatcher = Arc::clone(&self.dispatcher);
        tokio::spawn(async move {
            let peer = connection.peer_addr();
            match connection.serve(&dispatcher).await {
                Ok(()) => debug!(peer = %peer, "Connection closed"),
                Err(e @ ServerError::FrameTooLarge { .. }) => {
                    warn!(peer = %peer, error = %e, "Aborted connection over frame limit");
                }
                Err(e) => warn!(peer = %peer, error = %e, "Connection closed without response"),
            }
        });
    }
}

/// Resolves `addr` and binds the first address that accepts a listener.
async fn bind_listener(addr: &str, backlog: u32) -> io::Result<TcpListener> {
    let mut last_error = None;

    for candidate in lookup_host(addr).await? {
        let socket = if candidate.is_ipv4() {
            TcpSocket::new_v4()?
        } else {
            TcpSocket::new_v6()?
        };
        #[cfg(unix)]
        socket.set_reuseaddr(true)?;

        if let Err(e) = socket.bind(candidate) {
            debug!(addr = %candidate, error = %e, "Bind attempt failed");
            last_error = Some(e);
            continue;
        }
        match socket.listen(backlog) {
            Ok(listener) => return Ok(listener),
            Err(e) => last_error = Some(e),
        }
    }

    Err(last_error.unwrap_or_else(|| {
        io::Error::new(
            io::ErrorKind::AddrNotAvailable,
            format!("{addr} did not resolve to any address"),
        )
    }))
}

/// Rejects codecs that cannot carry protocol frames.
///
/// Encodes representative responses: each must encode without the
/// terminator inside the body and decode back to the same value.
fn validate_codec(codec: &dyn Codec) -> ServerResult<()> {
    let samples = [
        Response::success(
            RequestId::Number(0),
            json!({"text": "line\nbreak", "list": [1, 2.5, null, true]}),
        ),
        Response::error(RequestId::String("check".to_string()), "sample error"),
    ];

    for sample in &samples {
        let frame = encode_response(codec, sample).map_err(|e| codec_error(codec, &e))?;
        let body = frame.split_last().map(|(_, body)| body).unwrap_or_default();
        let decoded = codec.decode(body).map_err(|e| codec_error(codec, &e))?;
        let expected = serde_json::to_value(sample).map_err(ProtocolError::from)?;
        if decoded != expected {
            return Err(ServerError::config(format!(
                "invalid codec {}: decode(encode(v)) does not reproduce v",
                codec.name()
            )));
        }
    }

    // The request path must accept what a client would send.
    let request = json!({"method": "Check", "params": [{}], "id": 0});
    let body = codec.encode(&request).map_err(|e| codec_error(codec, &e))?;
    decode_request(codec, &body)
        .map_err(|e| ServerError::config(format!("invalid codec {}: {e}", codec.name())))?;

    Ok(())
}

fn codec_error(codec: &dyn Codec, error: &ProtocolError) -> ServerError {
    ServerError::config(format!("invalid codec {}: {error}", codec.name()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::Value;
    use sockrpc_protocol::{Params, ProtocolResult};
    use tokio::io::{AsyncReadExt, AsyncWriteExt};
    use tokio::net::TcpStream;

    fn local_config() -> ServerConfig {
        ServerConfig::new("127.0.0.1", 0).with_io_timeout(Duration::from_secs(5))
    }

    fn echo_registry() -> MethodRegistry {
        let mut registry = MethodRegistry::new();
        registry.register(
            "Echo",
            |params: Params| Ok(json!({"Msg": params.get("msg").cloned(), "Code": 999})),
            None,
        );
        registry
    }

    #[tokio::test]
    async fn bind_reports_ephemeral_port() {
        let server = RpcServer::bind(local_config(), echo_registry())
            .await
            .unwrap();
        assert_ne!(server.local_addr().port(), 0);
        assert_eq!(server.idle_workers(), 4);
        assert!(server.dispatcher().registry().contains("Echo"));
    }

    #[tokio::test]
    async fn bind_rejects_invalid_config() {
        let config = local_config().with_pool_size(0);
        let result = RpcServer::bind(config, MethodRegistry::new()).await;
        assert!(matches!(result, Err(ServerError::Config { .. })));
    }

    #[tokio::test]
    async fn bind_fails_on_port_in_use() {
        let first = RpcServer::bind(local_config(), MethodRegistry::new())
            .await
            .unwrap();
        let port = first.local_addr().port();

        let result = RpcServer::bind(ServerConfig::new("127.0.0.1", port), MethodRegistry::new())
            .await;
        match result {
            Err(ServerError::Bind { addr, .. }) => assert_eq!(addr, format!("127.0.0.1:{port}")),
            other => panic!("expected bind error, got {:?}", other.map(|_| ())),
        }
    }

    struct NulCodec;

    impl Codec for NulCodec {
        fn encode(&self, value: &Value) -> ProtocolResult<Vec<u8>> {
            Ok(serde_json::to_vec_pretty(value)?)
        }

        fn decode(&self, body: &[u8]) -> ProtocolResult<Value> {
            Ok(serde_json::from_slice(body)?)
        }

        fn terminator(&self) -> u8 {
            0
        }

        fn name(&self) -> &'static str {
            "nul-pretty-json"
        }
    }

    struct BrokenCodec;

    impl Codec for BrokenCodec {
        fn encode(&self, value: &Value) -> ProtocolResult<Vec<u8>> {
            Ok(serde_json::to_vec_pretty(value)?)
        }

        fn decode(&self, body: &[u8]) -> ProtocolResult<Value> {
            Ok(serde_json::from_slice(body)?)
        }

        fn terminator(&self) -> u8 {
            b'\n'
        }

        fn name(&self) -> &'static str {
            "pretty-json"
        }
    }

    struct LossyCodec;

    impl Codec for LossyCodec {
        fn encode(&self, _value: &Value) -> ProtocolResult<Vec<u8>> {
            Ok(b"{}".to_vec())
        }

        fn decode(&self, body: &[u8]) -> ProtocolResult<Value> {
            Ok(serde_json::from_slice(body)?)
        }

        fn terminator(&self) -> u8 {
            b'\n'
        }
    }

    #[test]
    fn codec_validation() {
        assert!(validate_codec(&JsonCodec).is_ok());
        assert!(validate_codec(&NulCodec).is_ok());

        let err = validate_codec(&BrokenCodec).unwrap_err();
        assert!(err.to_string().contains("pretty-json"), "{err}");

        let err = validate_codec(&LossyCodec).unwrap_err();
        assert!(matches!(err, ServerError::Config { .. }));
    }

    #[tokio::test]
    async fn bind_rejects_codec_that_breaks_framing() {
        let result =
            RpcServer::bind_with_codec(local_config(), echo_registry(), Arc::new(BrokenCodec))
                .await;
        assert!(matches!(result, Err(ServerError::Config { .. })));
    }

    #[tokio::test]
    async fn custom_codec_is_used_for_framing() {
        let server =
            RpcServer::bind_with_codec(local_config(), echo_registry(), Arc::new(NulCodec))
                .await
                .unwrap();
        let addr = server.local_addr();

        let client = tokio::spawn(async move {
            let mut stream = TcpStream::connect(addr).await.unwrap();
            stream
                .write_all(b"{\n  \"method\": \"Echo\",\n  \"params\": {\"msg\": \"nul\"},\n  \"id\": 1\n}\0")
                .await
                .unwrap();
            let mut reply = Vec::new();
            stream.read_to_end(&mut reply).await.unwrap();
            reply
        });

        let connection = server.accept().await.unwrap();
        connection.serve(server.dispatcher()).await.unwrap();

        let reply = client.await.unwrap();
        assert_eq!(reply.last(), Some(&0));
        let value: Value = serde_json::from_slice(&reply[..reply.len() - 1]).unwrap();
        assert_eq!(value, json!({"id": 1, "result": {"Msg": "nul", "Code": 999}}));
    }

    #[tokio::test]
    async fn accept_holds_worker_until_connection_drops() {
        let server = RpcServer::bind(local_config().with_pool_size(1), echo_registry())
            .await
            .unwrap();
        let addr = server.local_addr();

        let _client = TcpStream::connect(addr).await.unwrap();
        let connection = server.accept().await.unwrap();
        assert_eq!(server.idle_workers(), 0);

        drop(connection);
        assert_eq!(server.idle_workers(), 1);
    }

    #[tokio::test]
    async fn run_until_shutdown_stops_accepting() {
        let server = RpcServer::bind(local_config(), echo_registry())
            .await
            .unwrap();

        let result = server.run_until_shutdown(async {}).await;
        assert!(result.is_ok());

        let _client = TcpStream::connect(server.local_addr()).await.unwrap();
        assert!(matches!(server.accept().await, Err(ServerError::Shutdown)));
        assert!(server.run().await.is_ok());
    }

    #[tokio::test]
    async fn handler_limit_follows_pool_size() {
        let server = RpcServer::bind(local_config().with_pool_size(3), echo_registry())
            .await
            .unwrap();
        assert_eq!(server.dispatcher().idle_handler_slots(), 3);
    }

    #[tokio::test(start_paused = true)]
    async fn idle_client_is_dropped_after_io_timeout() {
        let server = RpcServer::bind(local_config(), echo_registry())
            .await
            .unwrap();

        let _client = TcpStream::connect(server.local_addr()).await.unwrap();
        let connection = server.accept().await.unwrap();

        // The paused clock jumps straight to the 5s read deadline.
        let err = connection.serve(server.dispatcher()).await.unwrap_err();
        assert!(matches!(err, ServerError::Timeout { .. }), "{err}");
        assert_eq!(server.idle_workers(), 4);
    }
}
