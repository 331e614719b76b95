//! Integration tests for the WebSocket handshake, routing, job bridge and debug surface.

use async_trait::async_trait;
use futures_util::{SinkExt, StreamExt};
use serde_json::{json, Value};
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::net::{TcpListener, TcpStream};
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{MaybeTlsStream, WebSocketStream};

use relay_server::jobs::scraper::{ProfileScraper, ScrapeError, ScrapeResult};
use relay_server::jobs::{JobBridge, JobSettings};
use relay_server::state::AppState;
use relay_server::ws::{ClientId, ConnectionRegistry};

type Ws = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Scraper that answers with a fixed follower count, or fails for "private".
struct StubScraper;

#[async_trait]
impl ProfileScraper for StubScraper {
    async fn scrape(&self, username: &str) -> Result<ScrapeResult, ScrapeError> {
        if username == "private" {
            return Err(ScrapeError::Failed("profile is private".to_string()));
        }
        Ok(ScrapeResult::with_followers(321))
    }
}

/// Helper: start the server on a random port and return its address.
async fn start_test_server() -> SocketAddr {
    let registry = ConnectionRegistry::new();
    let jobs = JobBridge::new(
        registry.clone(),
        Arc::new(StubScraper),
        JobSettings {
            receiver_id: ClientId::parse("tv").unwrap(),
            timeout: Duration::from_secs(5),
            default_username: None,
        },
    );
    let state = AppState {
        registry,
        jobs,
        debug_username: "instagram".to_string(),
    };

    let app = relay_server::routes::build_router(state);
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();

    tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    addr
}

async fn connect(addr: SocketAddr, id: &str) -> Ws {
    let url = format!("ws://{}/ws?id={}", addr, id);
    let (ws, _) = tokio_tungstenite::connect_async(&url)
        .await
        .expect("Failed to connect to WebSocket");
    // Give the server a moment to register the connection
    tokio::time::sleep(Duration::from_millis(50)).await;
    ws
}

async fn send_json(ws: &mut Ws, value: Value) {
    ws.send(Message::text(value.to_string()))
        .await
        .expect("Failed to send frame");
}

/// Read the next text frame as JSON, skipping control frames.
async fn next_json(ws: &mut Ws) -> Value {
    loop {
        let msg = tokio::time::timeout(Duration::from_secs(2), ws.next())
            .await
            .expect("Expected a frame within timeout");
        match msg {
            Some(Ok(Message::Text(text))) => {
                return serde_json::from_str(text.as_str()).expect("Frame should be JSON")
            }
            Some(Ok(Message::Ping(_))) | Some(Ok(Message::Pong(_))) => continue,
            other => panic!("Expected text frame, got: {:?}", other),
        }
    }
}

async fn assert_silent(ws: &mut Ws) {
    let result = tokio::time::timeout(Duration::from_millis(300), ws.next()).await;
    assert!(result.is_err(), "Expected no further frames, got: {:?}", result);
}

async fn expect_close_code(ws: &mut Ws) -> u16 {
    loop {
        let msg = tokio::time::timeout(Duration::from_secs(2), ws.next())
            .await
            .expect("Expected close within timeout");
        match msg {
            Some(Ok(Message::Close(Some(frame)))) => return u16::from(frame.code),
            Some(Ok(Message::Text(_))) | Some(Ok(Message::Ping(_))) => continue,
            other => panic!("Expected close frame, got: {:?}", other),
        }
    }
}

#[tokio::test]
async fn test_ws_echo_round_trip() {
    let addr = start_test_server().await;
    let mut ws = connect(addr, "Alice").await;

    send_json(&mut ws, json!({"type": "hello", "payload": {"n": 1}})).await;

    let reply = next_json(&mut ws).await;
    assert_eq!(reply["type"], "echo");
    assert_eq!(reply["from"], "server");
    assert_eq!(reply["payload"]["type"], "hello");
    assert_eq!(reply["payload"]["from"], "alice");
    assert_eq!(reply["payload"]["payload"]["n"], 1);
    assert_silent(&mut ws).await;
}

#[tokio::test]
async fn test_ws_missing_id_closes_with_policy_violation() {
    let addr = start_test_server().await;

    for url in [format!("ws://{}/ws", addr), format!("ws://{}/ws?id=%20", addr)] {
        let (mut ws, _) = tokio_tungstenite::connect_async(&url)
            .await
            .expect("WebSocket should upgrade even without an id");
        assert_eq!(expect_close_code(&mut ws).await, 1008);
    }
}

#[tokio::test]
async fn test_ws_reserved_server_id_is_refused() {
    let addr = start_test_server().await;
    let mut bob = connect(addr, "bob").await;

    for id in ["server", "SERVER", "%20Server%20"] {
        let url = format!("ws://{}/ws?id={}", addr, id);
        let (mut ws, _) = tokio_tungstenite::connect_async(&url)
            .await
            .expect("WebSocket should upgrade before being refused");
        assert_eq!(expect_close_code(&mut ws).await, 1008);
    }

    // Nobody may address or impersonate the server
    send_json(&mut bob, json!({"type": "chat", "to": "server", "payload": "hi"})).await;
    let reply = next_json(&mut bob).await;
    assert_eq!(reply["type"], "error");
    assert_eq!(reply["payload"]["to"], "server");

    let body: Value = reqwest::Client::new()
        .get(format!("http://{}/debug/clients", addr))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["clients"], json!(["bob"]));
}

#[tokio::test]
async fn test_ws_direct_forward_and_ack() {
    let addr = start_test_server().await;
    let mut alice = connect(addr, "alice").await;
    let mut bob = connect(addr, "bob").await;

    send_json(
        &mut alice,
        json!({"type": "chat", "to": "bob", "from": "someone-else", "payload": "hi"}),
    )
    .await;

    let delivered = next_json(&mut bob).await;
    assert_eq!(delivered["type"], "chat");
    assert_eq!(delivered["from"], "alice");
    assert_eq!(delivered["payload"], "hi");

    let ack = next_json(&mut alice).await;
    assert_eq!(ack["type"], "ack");
    assert_eq!(ack["payload"]["to"], "bob");

    assert_silent(&mut bob).await;
}

#[tokio::test]
async fn test_ws_forward_to_unknown_target() {
    let addr = start_test_server().await;
    let mut alice = connect(addr, "alice").await;

    send_json(&mut alice, json!({"type": "chat", "to": "nobody"})).await;

    let err = next_json(&mut alice).await;
    assert_eq!(err["type"], "error");
    assert_eq!(err["payload"]["to"], "nobody");
    assert_silent(&mut alice).await;
}

#[tokio::test]
async fn test_ws_malformed_frame_yields_one_error() {
    let addr = start_test_server().await;
    let mut ws = connect(addr, "alice").await;

    ws.send(Message::text("{not json")).await.unwrap();
    let err = next_json(&mut ws).await;
    assert_eq!(err["type"], "error");
    assert_silent(&mut ws).await;

    // The connection survives and keeps routing
    send_json(&mut ws, json!({"type": "hello"})).await;
    assert_eq!(next_json(&mut ws).await["type"], "echo");
}

#[tokio::test]
async fn test_ws_same_id_replaces_old_connection() {
    let addr = start_test_server().await;
    let mut first = connect(addr, "tv").await;
    let mut second = connect(addr, "TV").await;

    assert_eq!(expect_close_code(&mut first).await, 4000);

    send_json(&mut second, json!({"type": "hello"})).await;
    assert_eq!(next_json(&mut second).await["type"], "echo");
}

#[tokio::test]
async fn test_ws_ping_pong() {
    let addr = start_test_server().await;
    let mut ws = connect(addr, "pinger").await;

    ws.send(Message::Ping(vec![42, 43, 44].into()))
        .await
        .expect("Failed to send ping");

    let msg = tokio::time::timeout(Duration::from_secs(2), ws.next())
        .await
        .expect("Expected pong within timeout");
    match msg {
        Some(Ok(Message::Pong(data))) => {
            assert_eq!(data.as_ref(), &[42, 43, 44], "Pong data should match ping");
        }
        other => panic!("Expected Pong message, got: {:?}", other),
    }

    // Exactly one pong per ping
    let again = tokio::time::timeout(Duration::from_millis(300), ws.next()).await;
    assert!(again.is_err(), "Expected a single pong, got: {:?}", again);
}

#[tokio::test]
async fn test_ws_job_success_reaches_receiver() {
    let addr = start_test_server().await;
    let mut tv = connect(addr, "tv").await;
    let mut r1 = connect(addr, "r1").await;

    send_json(&mut r1, json!({"type": "job", "payload": {"username": "alice"}})).await;

    let ack = next_json(&mut r1).await;
    assert_eq!(ack["type"], "ack");
    assert_eq!(ack["payload"]["started"], true);
    assert_eq!(ack["payload"]["username"], "alice");

    let result = next_json(&mut tv).await;
    assert_eq!(result["type"], "followers");
    assert_eq!(result["payload"]["followers"], 321);

    let done = next_json(&mut r1).await;
    assert_eq!(done["type"], "done");
    assert_eq!(done["payload"]["deliveredToReceiver"], true);
}

#[tokio::test]
async fn test_ws_job_without_receiver_warns() {
    let addr = start_test_server().await;
    let mut r1 = connect(addr, "r1").await;

    send_json(&mut r1, json!({"type": "job", "payload": {"username": "alice"}})).await;

    assert_eq!(next_json(&mut r1).await["type"], "ack");
    let done = next_json(&mut r1).await;
    assert_eq!(done["type"], "done");
    assert_eq!(done["payload"]["deliveredToReceiver"], false);
    assert_eq!(next_json(&mut r1).await["type"], "warn");
}

#[tokio::test]
async fn test_ws_job_failure_reports_error() {
    let addr = start_test_server().await;
    let mut tv = connect(addr, "tv").await;
    let mut r1 = connect(addr, "r1").await;

    send_json(&mut r1, json!({"type": "job", "payload": {"username": "private"}})).await;

    assert_eq!(next_json(&mut r1).await["type"], "ack");
    let err = next_json(&mut r1).await;
    assert_eq!(err["type"], "error");
    assert_eq!(err["payload"]["message"], "profile is private");

    let tv_err = next_json(&mut tv).await;
    assert_eq!(tv_err["type"], "job_error");
    assert_eq!(tv_err["payload"]["username"], "private");
}

#[tokio::test]
async fn test_debug_clients_and_cleanup_on_disconnect() {
    let addr = start_test_server().await;
    let client = reqwest::Client::new();
    let mut bob = connect(addr, "bob").await;
    let _alice = connect(addr, "alice").await;

    let body: Value = client
        .get(format!("http://{}/debug/clients", addr))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["clients"], json!(["alice", "bob"]));
    assert_eq!(body["count"], 2);

    bob.send(Message::Close(None)).await.expect("Failed to send close");

    let mut remaining = Value::Null;
    for _ in 0..20 {
        tokio::time::sleep(Duration::from_millis(50)).await;
        remaining = client
            .get(format!("http://{}/debug/clients", addr))
            .send()
            .await
            .unwrap()
            .json()
            .await
            .unwrap();
        if remaining["count"] == 1 {
            break;
        }
    }
    assert_eq!(remaining["clients"], json!(["alice"]));
}

#[tokio::test]
async fn test_debug_ping_and_broadcast() {
    let addr = start_test_server().await;
    let client = reqwest::Client::new();
    let mut tv = connect(addr, "tv").await;
    let mut phone = connect(addr, "phone").await;

    let resp = client
        .post(format!("http://{}/debug/ping/TV", addr))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let ping = next_json(&mut tv).await;
    assert_eq!(ping["type"], "ping");
    assert_eq!(ping["from"], "server");

    let resp = client
        .post(format!("http://{}/debug/ping/ghost", addr))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 404);

    let body: Value = client
        .post(format!("http://{}/debug/broadcast", addr))
        .json(&json!({"type": "notice", "payload": {"text": "maintenance"}}))
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["delivered"], 2);

    for ws in [&mut tv, &mut phone] {
        let notice = next_json(ws).await;
        assert_eq!(notice["type"], "notice");
        assert_eq!(notice["payload"]["text"], "maintenance");
    }
}

#[tokio::test]
async fn test_debug_job_trigger_delivers_to_receiver() {
    let addr = start_test_server().await;
    let client = reqwest::Client::new();
    let mut tv = connect(addr, "tv").await;

    let resp = client
        .post(format!("http://{}/debug/job", addr))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 202);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["started"], true);
    assert_eq!(body["username"], "instagram");

    let result = next_json(&mut tv).await;
    assert_eq!(result["type"], "followers");
    assert_eq!(result["payload"]["username"], "instagram");
}
