//! End-to-end tests against a listening server on 127.0.0.1.

use std::net::SocketAddr;
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use sockrpc_server::{HandlerError, MethodRegistry, Params, RpcServer, ServerConfig};

#[derive(Deserialize)]
struct EchoArgs {
    msg: String,
}

#[derive(Serialize)]
#[serde(rename_all = "PascalCase")]
struct EchoReply {
    msg: String,
    code: i64,
}

fn registry() -> MethodRegistry {
    let mut registry = MethodRegistry::new();
    registry
        .register_typed(
            "Echo",
            |args: EchoArgs| -> Result<EchoReply, HandlerError> {
                Ok(EchoReply {
                    msg: args.msg,
                    code: 999,
                })
            },
            None,
        )
        .register("Fail", |_: Params| Err("handler refused".into()), None)
        .register(
            "Panic",
            |_: Params| -> sockrpc_server::HandlerResult { panic!("boom") },
            None,
        )
        .register(
            "Slow",
            |params: Params| {
                let ms = params.get("ms").and_then(Value::as_u64).unwrap_or(200);
                std::thread::sleep(Duration::from_millis(ms));
                Ok(json!("done"))
            },
            Some(Duration::from_millis(50)),
        );
    registry
}

async fn start(config: ServerConfig) -> SocketAddr {
    let server = Arc::new(RpcServer::bind(config, registry()).await.unwrap());
    let addr = server.local_addr();
    tokio::spawn(async move { server.run().await });
    addr
}

fn local_config() -> ServerConfig {
    ServerConfig::new("127.0.0.1", 0).with_io_timeout(Duration::from_secs(5))
}

/// Sends `bytes` and reads until the server closes the connection.
///
/// A reset counts as an empty reply.
async fn exchange(addr: SocketAddr, bytes: &[u8]) -> Vec<u8> {
    let mut stream = TcpStream::connect(addr).await.unwrap();
    let _ = stream.write_all(bytes).await;
    let mut reply = Vec::new();
    let read = tokio::time::timeout(Duration::from_secs(5), stream.read_to_end(&mut reply))
        .await
        .expect("server did not close the connection");
    if read.is_err() {
        reply.clear();
    }
    reply
}

async fn call(addr: SocketAddr, request: Value) -> Value {
    let mut frame = serde_json::to_vec(&request).unwrap();
    frame.push(b'\n');
    let reply = exchange(addr, &frame).await;
    assert_eq!(reply.last(), Some(&b'\n'), "{:?}", String::from_utf8_lossy(&reply));
    serde_json::from_slice(&reply[..reply.len() - 1]).unwrap()
}

#[tokio::test]
async fn echo_reply_is_exact() {
    let addr = start(local_config()).await;

    let reply = exchange(
        addr,
        b"{\"method\":\"Echo\",\"params\":[{\"msg\":\"hi\"}],\"id\":1}\n",
    )
    .await;
    assert_eq!(
        String::from_utf8(reply).unwrap(),
        "{\"id\":1,\"result\":{\"Msg\":\"hi\",\"Code\":999}}\n"
    );
}

#[tokio::test]
async fn unknown_method_names_the_method() {
    let addr = start(local_config()).await;

    let reply = exchange(addr, b"{\"method\":\"Nope\",\"id\":2}\n").await;
    let text = String::from_utf8(reply).unwrap();
    assert!(text.starts_with("{\"id\":2,\"error\":\""), "{text}");
    assert!(text.ends_with("\"}\n"), "{text}");

    let reply: Value = serde_json::from_str(text.trim_end()).unwrap();
    assert!(reply.get("result").is_none());
    assert!(reply["error"].as_str().unwrap().contains("Nope"));
}

#[tokio::test]
async fn zero_id_is_echoed() {
    let addr = start(local_config()).await;

    let reply = call(addr, json!({"method": "Echo", "params": {"msg": "z"}, "id": 0})).await;
    assert_eq!(reply, json!({"id": 0, "result": {"Msg": "z", "Code": 999}}));

    let reply = call(addr, json!({"method": "Echo", "params": {"msg": "s"}, "id": "abc"})).await;
    assert_eq!(reply["id"], "abc");
}

#[tokio::test]
async fn missing_method_with_id_gets_error() {
    let addr = start(local_config()).await;

    let reply = call(addr, json!({"params": [{}], "id": 7})).await;
    assert_eq!(reply, json!({"id": 7, "error": "lack of necessary key: method"}));
}

#[tokio::test]
async fn undecodable_request_without_id_gets_no_reply() {
    let addr = start(local_config()).await;

    assert!(exchange(addr, b"{\"method\":\"Echo\"}\n").await.is_empty());
    assert!(exchange(addr, b"not json at all\n").await.is_empty());
}

#[tokio::test]
async fn eof_before_terminator_gets_no_reply() {
    let addr = start(local_config()).await;

    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream.write_all(b"{\"method\":\"Echo\"").await.unwrap();
    stream.shutdown().await.unwrap();
    let mut reply = Vec::new();
    stream.read_to_end(&mut reply).await.unwrap();
    assert!(reply.is_empty());
}

#[tokio::test]
async fn bytes_after_terminator_are_ignored() {
    let addr = start(local_config()).await;

    let reply = exchange(
        addr,
        b"{\"method\":\"Echo\",\"params\":{\"msg\":\"a\"},\"id\":1}\n{\"method\":\"Echo\",\"id\":2}\n",
    )
    .await;
    let text = String::from_utf8(reply).unwrap();
    assert_eq!(text.matches('\n').count(), 1);
    assert!(text.starts_with("{\"id\":1,"));
}

#[tokio::test]
async fn request_split_across_writes() {
    let addr = start(local_config()).await;

    let mut stream = TcpStream::connect(addr).await.unwrap();
    stream.write_all(b"{\"method\":\"Echo\",").await.unwrap();
    stream.flush().await.unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;
    stream
        .write_all(b"\"params\":{\"msg\":\"split\"},\"id\":9}\n")
        .await
        .unwrap();

    let mut reply = Vec::new();
    stream.read_to_end(&mut reply).await.unwrap();
    let value: Value = serde_json::from_slice(&reply[..reply.len() - 1]).unwrap();
    assert_eq!(value["result"]["Msg"], "split");
}

#[tokio::test]
async fn oversized_frame_is_dropped_without_reply() {
    let addr = start(local_config().with_max_frame_size(1024)).await;

    let mut frame = br#"{"method":"Echo","params":{"msg":""#.to_vec();
    frame.extend(std::iter::repeat_n(b'x', 4096));
    frame.extend_from_slice(b"\"},\"id\":1}\n");
    assert!(exchange(addr, &frame).await.is_empty());

    // The server is still healthy.
    let reply = call(addr, json!({"method": "Echo", "params": {"msg": "ok"}, "id": 2})).await;
    assert_eq!(reply["result"]["Msg"], "ok");
}

/// An `Echo` request body of exactly `len` bytes, terminator excluded.
fn echo_body_of_len(len: usize) -> Vec<u8> {
    let prefix = br#"{"method":"Echo","params":{"msg":""#;
    let suffix = br#""},"id":1}"#;
    let mut body = prefix.to_vec();
    body.extend(std::iter::repeat_n(b'x', len - prefix.len() - suffix.len()));
    body.extend_from_slice(suffix);
    assert_eq!(body.len(), len);
    body
}

#[tokio::test]
async fn frame_limit_excludes_terminator() {
    let max = 1024;
    let addr = start(local_config().with_max_frame_size(max)).await;

    let mut at_limit = echo_body_of_len(max);
    at_limit.push(b'\n');
    let reply = exchange(addr, &at_limit).await;
    let value: Value = serde_json::from_slice(&reply[..reply.len() - 1]).unwrap();
    assert_eq!(value["id"], 1);
    assert!(value["result"]["Msg"].as_str().unwrap().starts_with("xxx"));

    let mut over_limit = echo_body_of_len(max + 1);
    over_limit.push(b'\n');
    assert!(exchange(addr, &over_limit).await.is_empty());
}

#[tokio::test]
async fn large_integer_id_is_echoed() {
    let addr = start(local_config()).await;

    let reply = exchange(
        addr,
        b"{\"method\":\"Echo\",\"params\":[{\"msg\":\"hi\"}],\"id\":18446744073709551615}\n",
    )
    .await;
    assert_eq!(
        String::from_utf8(reply).unwrap(),
        "{\"id\":18446744073709551615,\"result\":{\"Msg\":\"hi\",\"Code\":999}}\n"
    );
}

#[tokio::test]
async fn timed_out_handlers_stay_within_pool_size() {
    let running = Arc::new(AtomicUsize::new(0));
    let peak = Arc::new(AtomicUsize::new(0));

    let mut registry = MethodRegistry::new();
    let (r, p) = (Arc::clone(&running), Arc::clone(&peak));
    registry.register(
        "Stuck",
        move |_: Params| {
            let now = r.fetch_add(1, Ordering::SeqCst) + 1;
            p.fetch_max(now, Ordering::SeqCst);
            std::thread::sleep(Duration::from_millis(500));
            r.fetch_sub(1, Ordering::SeqCst);
            Ok(Value::Null)
        },
        Some(Duration::from_millis(20)),
    );
    let server = RpcServer::bind(local_config().with_pool_size(1), registry)
        .await
        .unwrap();
    let addr = server.local_addr();
    tokio::spawn(async move { server.run().await });

    for id in 0..6 {
        let reply = call(addr, json!({"method": "Stuck", "id": id})).await;
        assert_eq!(reply["error"], "method Stuck timed out after 20ms");
    }
    assert_eq!(peak.load(Ordering::SeqCst), 1);
}

#[tokio::test]
async fn handler_failures_do_not_affect_later_connections() {
    let addr = start(local_config()).await;

    let reply = call(addr, json!({"method": "Fail", "id": 1})).await;
    assert_eq!(reply, json!({"id": 1, "error": "handler refused"}));

    let reply = call(addr, json!({"method": "Panic", "id": 2})).await;
    assert_eq!(reply["error"], "method Panic panicked");

    let reply = call(addr, json!({"method": "Echo", "params": {"wrong": 1}, "id": 3})).await;
    assert!(reply["error"].as_str().unwrap().contains("msg"), "{reply}");

    let reply = call(addr, json!({"method": "Echo", "params": {"msg": "alive"}, "id": 4})).await;
    assert_eq!(reply["result"]["Msg"], "alive");
}

#[tokio::test]
async fn slow_handler_times_out() {
    let addr = start(local_config()).await;

    let started = std::time::Instant::now();
    let reply = call(addr, json!({"method": "Slow", "params": {"ms": 500}, "id": 5})).await;
    assert!(started.elapsed() < Duration::from_millis(450));
    assert_eq!(reply, json!({"id": 5, "error": "method Slow timed out after 50ms"}));
}

#[tokio::test]
async fn single_worker_serves_connections_in_turn() {
    let addr = start(local_config().with_pool_size(1)).await;

    // An idle client occupies the only worker.
    let mut idle = TcpStream::connect(addr).await.unwrap();
    tokio::time::sleep(Duration::from_millis(50)).await;

    let waiting = tokio::spawn(async move {
        call(addr, json!({"method": "Echo", "params": {"msg": "queued"}, "id": 1})).await
    });
    tokio::time::sleep(Duration::from_millis(100)).await;
    assert!(!waiting.is_finished());

    idle.write_all(b"{\"method\":\"Echo\",\"params\":{\"msg\":\"first\"},\"id\":0}\n")
        .await
        .unwrap();
    let mut reply = Vec::new();
    idle.read_to_end(&mut reply).await.unwrap();
    assert!(String::from_utf8_lossy(&reply).contains("first"));

    let queued = tokio::time::timeout(Duration::from_secs(5), waiting)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(queued["result"]["Msg"], "queued");
}

#[tokio::test]
async fn concurrent_clients() {
    let addr = start(local_config().with_pool_size(4)).await;

    let clients: Vec<_> = (0..16)
        .map(|i| {
            tokio::spawn(async move {
                call(
                    addr,
                    json!({"method": "Echo", "params": {"msg": format!("m{i}")}, "id": i}),
                )
                .await
            })
        })
        .collect();

    for (i, client) in clients.into_iter().enumerate() {
        let reply = client.await.unwrap();
        assert_eq!(reply["id"], i);
        assert_eq!(reply["result"]["Msg"], format!("m{i}"));
    }
}

#[tokio::test]
async fn shutdown_stops_accept_loop() {
    let server = RpcServer::bind(local_config(), registry()).await.unwrap();
    let (tx, rx) = tokio::sync::oneshot::channel::<()>();

    let task = tokio::spawn(async move {
        server
            .run_until_shutdown(async {
                let _ = rx.await;
            })
            .await
    });

    tx.send(()).unwrap();
    let result = tokio::time::timeout(Duration::from_secs(5), task)
        .await
        .unwrap()
        .unwrap();
    assert!(result.is_ok());
}
