//! End-to-end tests for the relay server.
//!
//! Each test starts a server on an ephemeral port and talks to it with real
//! WebSocket clients, checking fan-out, self-exclusion, ordering and
//! session cleanup as seen from the wire.

use futures_util::future::join_all;
use futures_util::{SinkExt, StreamExt};
use relay::server::{RelayServer, ServerConfig, ShutdownHandle};
use relay::{BroadcastRelay, DocumentState};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::time::Duration;
use tokio::io::AsyncReadExt;
use tokio::net::{TcpListener, TcpStream};
use tokio::time::{sleep, timeout};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};

type Client = WebSocketStream<MaybeTlsStream<TcpStream>>;

const WAIT: Duration = Duration::from_secs(5);
const QUIET: Duration = Duration::from_millis(200);

/// Test harness owning a running server.
struct TestServer {
    addr: SocketAddr,
    relay: BroadcastRelay,
    shutdown: ShutdownHandle,
}

impl TestServer {
    async fn start() -> Self {
        Self::start_with(ServerConfig::default()).await
    }

    async fn start_with(config: ServerConfig) -> Self {
        let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();

        let server = RelayServer::new(config, DocumentState::default());
        let relay = server.relay();
        let shutdown = server.shutdown_handle();
        tokio::spawn(async move {
            server.serve(listener).await.unwrap();
        });

        Self { addr, relay, shutdown }
    }

    fn url(&self, path: &str) -> String {
        format!("ws://{}{}", self.addr, path)
    }

    /// Connect a client and wait until the server has admitted it.
    async fn connect(&self) -> Client {
        let before = self.relay.count().await;
        let (ws, _) = connect_async(self.url("/ws")).await.unwrap();
        self.wait_for_count(before + 1).await;
        ws
    }

    async fn wait_for_count(&self, expected: usize) {
        let relay = self.relay.clone();
        timeout(WAIT, async move {
            while relay.count().await != expected {
                sleep(Duration::from_millis(10)).await;
            }
        })
        .await
        .unwrap_or_else(|_| panic!("session count never reached {}", expected));
    }
}

impl Drop for TestServer {
    fn drop(&mut self) {
        self.shutdown.shutdown();
    }
}

async fn send_json(ws: &mut Client, value: Value) {
    ws.send(Message::Text(value.to_string().into())).await.unwrap();
}

async fn send_raw(ws: &mut Client, text: &str) {
    ws.send(Message::Text(text.to_string().into())).await.unwrap();
}

/// Next JSON text frame, skipping control frames.
async fn next_json(ws: &mut Client) -> Value {
    timeout(WAIT, async {
        loop {
            match ws.next().await {
                Some(Ok(Message::Text(text))) => return serde_json::from_str::<Value>(&text).unwrap(),
                Some(Ok(_)) => continue,
                other => panic!("connection ended while waiting for a frame: {:?}", other),
            }
        }
    })
    .await
    .expect("timed out waiting for a frame")
}

async fn assert_no_frame(ws: &mut Client) {
    let result = timeout(QUIET, ws.next()).await;
    assert!(result.is_err(), "expected no frame, got {:?}", result);
}

/// Read until the server ends the connection, discarding buffered frames.
async fn wait_for_close(ws: &mut Client) {
    timeout(WAIT, async {
        loop {
            match ws.next().await {
                Some(Ok(Message::Close(_))) | Some(Err(_)) | None => return,
                Some(Ok(_)) => continue,
            }
        }
    })
    .await
    .expect("server never closed the connection");
}

#[tokio::test]
async fn test_two_client_scenario() {
    let server = TestServer::start().await;
    let mut client1 = server.connect().await;
    let mut client2 = server.connect().await;
    assert_eq!(server.relay.count().await, 2);

    send_json(
        &mut client1,
        json!({"content": "Hello", "client_id": "c1", "cursor": {"line": 0, "ch": 5}}),
    )
    .await;

    let update = next_json(&mut client2).await;
    assert_eq!(
        update,
        json!({
            "type": "content_update",
            "content": "Hello",
            "client_id": "c1",
            "cursor": {"line": 0, "ch": 5}
        })
    );

    assert_no_frame(&mut client1).await;
    assert_no_frame(&mut client2).await;

    let snapshot = server.relay.document_snapshot().await;
    assert_eq!(snapshot["content"], "Hello");
}

#[tokio::test]
async fn test_edit_without_optional_fields() {
    let server = TestServer::start().await;
    let mut client1 = server.connect().await;
    let mut client2 = server.connect().await;

    send_json(&mut client1, json!({"content": "bare"})).await;

    let update = next_json(&mut client2).await;
    assert_eq!(
        update,
        json!({"type": "content_update", "content": "bare", "client_id": null, "cursor": null})
    );
}

#[tokio::test]
async fn test_fan_out_to_every_peer() {
    let server = TestServer::start().await;
    let mut sender = server.connect().await;
    let mut peer_a = server.connect().await;
    let mut peer_b = server.connect().await;

    send_json(&mut sender, json!({"content": "shared", "client_id": "s"})).await;

    assert_eq!(next_json(&mut peer_a).await["content"], "shared");
    assert_eq!(next_json(&mut peer_b).await["content"], "shared");
    assert_no_frame(&mut sender).await;
}

#[tokio::test]
async fn test_rapid_edits_arrive_in_order() {
    let server = TestServer::start().await;
    let mut client1 = server.connect().await;
    let mut client2 = server.connect().await;

    for content in ["a", "ab", "abc", "abcd"] {
        send_json(&mut client1, json!({"content": content})).await;
    }

    let mut received = Vec::new();
    for _ in 0..4 {
        received.push(next_json(&mut client2).await["content"].as_str().unwrap().to_string());
    }
    assert_eq!(received, vec!["a", "ab", "abc", "abcd"]);
    assert_eq!(server.relay.content().await, "abcd");
}

#[tokio::test]
async fn test_malformed_frame_keeps_connection_open() {
    let server = TestServer::start().await;
    let mut client1 = server.connect().await;
    let mut client2 = server.connect().await;
    let before = server.relay.content().await;

    send_raw(&mut client1, r#"{"client_id":"c1"}"#).await;
    send_raw(&mut client1, "this is not json").await;
    client1.send(Message::Binary(vec![1u8, 2, 3].into())).await.unwrap();

    assert_no_frame(&mut client2).await;
    assert_eq!(server.relay.content().await, before);
    assert_eq!(server.relay.count().await, 2);

    send_json(&mut client1, json!({"content": "still here"})).await;
    assert_eq!(next_json(&mut client2).await["content"], "still here");
}

#[tokio::test]
async fn test_disconnect_removes_session() {
    let server = TestServer::start().await;
    let mut client1 = server.connect().await;
    let mut client2 = server.connect().await;
    let mut client3 = server.connect().await;
    assert_eq!(server.relay.health().await.connected_clients, 3);

    client2.close(None).await.unwrap();
    server.wait_for_count(2).await;

    send_json(&mut client1, json!({"content": "after leave"})).await;
    assert_eq!(next_json(&mut client3).await["content"], "after leave");
    assert_eq!(server.relay.count().await, 2);
}

#[tokio::test]
async fn test_abrupt_disconnect_removes_session() {
    let server = TestServer::start().await;
    let _client1 = server.connect().await;
    let client2 = server.connect().await;

    drop(client2);
    server.wait_for_count(1).await;
}

#[tokio::test]
async fn test_wrong_path_is_rejected() {
    let server = TestServer::start().await;

    let result = connect_async(server.url("/document")).await;
    assert!(result.is_err());
    assert_eq!(server.relay.count().await, 0);
}

#[tokio::test]
async fn test_connection_limit() {
    let config = ServerConfig {
        max_total_connections: 1,
        ..Default::default()
    };
    let server = TestServer::start_with(config).await;
    let _client1 = server.connect().await;

    let result = connect_async(server.url("/ws")).await;
    assert!(result.is_err());
    assert_eq!(server.relay.count().await, 1);
}

#[tokio::test]
async fn test_shutdown_closes_sessions() {
    let server = TestServer::start().await;
    let _client1 = server.connect().await;
    let _client2 = server.connect().await;

    server.shutdown.shutdown();
    server.wait_for_count(0).await;
}

#[tokio::test]
async fn test_concurrent_connects_respect_limit() {
    let config = ServerConfig {
        max_total_connections: 1,
        ..Default::default()
    };
    let server = TestServer::start_with(config).await;
    let url = server.url("/ws");

    let results = join_all((0..8).map(|_| connect_async(url.clone()))).await;
    let clients: Vec<Client> = results.into_iter().filter_map(|r| r.ok()).map(|(ws, _)| ws).collect();

    assert_eq!(clients.len(), 1);
    server.wait_for_count(1).await;
    sleep(QUIET).await;
    assert_eq!(server.relay.count().await, 1);
}

#[tokio::test]
async fn test_silent_connection_times_out_and_frees_slot() {
    let config = ServerConfig {
        max_total_connections: 1,
        handshake_timeout_ms: 200,
        ..Default::default()
    };
    let server = TestServer::start_with(config).await;

    // Connects but never sends the upgrade request.
    let mut silent = TcpStream::connect(server.addr).await.unwrap();
    let mut buf = [0u8; 64];
    let read = timeout(WAIT, silent.read(&mut buf))
        .await
        .expect("server never closed the silent connection");
    assert!(matches!(read, Ok(0) | Err(_)), "unexpected read: {:?}", read);
    assert_eq!(server.relay.count().await, 0);

    let _client = server.connect().await;
}

#[tokio::test]
async fn test_slow_peer_is_disconnected() {
    let config = ServerConfig {
        outbox_capacity: 1,
        send_timeout_ms: 100,
        ..Default::default()
    };
    let server = TestServer::start_with(config).await;
    let mut sender = server.connect().await;
    let mut slow = server.connect().await;

    // `slow` never reads, so its socket buffers fill and its outbox overflows.
    let content = "x".repeat(256 * 1024);
    let relay = server.relay.clone();
    timeout(WAIT, async {
        while relay.count().await == 2 {
            send_json(&mut sender, json!({"content": content})).await;
        }
    })
    .await
    .expect("slow peer was never disconnected");

    assert_eq!(server.relay.count().await, 1);
    wait_for_close(&mut slow).await;

    // The sender keeps its session.
    let mut late = server.connect().await;
    send_json(&mut sender, json!({"content": "after drop"})).await;
    assert_eq!(next_json(&mut late).await["content"], "after drop");
}

#[tokio::test]
async fn test_stalled_writer_closes_session() {
    let config = ServerConfig {
        outbox_capacity: 64,
        send_timeout_ms: 100,
        ..Default::default()
    };
    let server = TestServer::start_with(config).await;
    let mut sender = server.connect().await;
    let mut stalled = server.connect().await;

    // Fewer edits than the outbox holds, but far more bytes than the socket
    // buffers take, so only the write timeout can end the session.
    let content = "y".repeat(1024 * 1024);
    for _ in 0..48 {
        send_json(&mut sender, json!({"content": content})).await;
    }

    server.wait_for_count(1).await;
    wait_for_close(&mut stalled).await;
    assert_eq!(server.relay.content().await.len(), content.len());
}
