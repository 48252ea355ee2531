//! End-to-end integration tests for the provider socket and wallet API.
//!
//! These tests start a real Axum server on a random port, connect a WebSocket
//! client as a page would, and verify the full message flow:
//! - Origin taken from the upgrade headers
//! - Handshake offer and acknowledgement
//! - Request → approval over the wallet API → response
//! - Account change fan-out to the open socket
//! - Bearer auth on the wallet API

mod support;

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use futures::{SinkExt, StreamExt};
use serde_json::{Value, json};
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::tungstenite::client::IntoClientRequest;

use provider_gateway::channels::web::{ServerState, WebApprovalSurface, start_server};
use provider_gateway::clock::SystemClock;
use provider_gateway::config::GatewayConfig;
use provider_gateway::gateway::{Gateway, GatewayDeps};
use provider_gateway::keystore::{MemoryKeyStore, PublicKey};
use provider_gateway::network::ChainId;
use provider_gateway::session::{MemoryBackend, SessionStore};

use support::{FakeRpc, FakeSigner, KEY_A, KEY_B};

const AUTH_TOKEN: &str = "test-token-12345";
const TIMEOUT: Duration = Duration::from_secs(5);
const PAGE: &str = "https://app.example";

type WsStream =
    tokio_tungstenite::WebSocketStream<tokio_tungstenite::MaybeTlsStream<tokio::net::TcpStream>>;

fn is_bind_permission_error<E: std::fmt::Display>(err: &E) -> bool {
    err.to_string().contains("Operation not permitted")
        || err.to_string().contains("failed to bind")
        || err.to_string().contains("Failed to bind")
}

/// Start a gateway server on a random port. `None` when the sandbox forbids
/// binding.
async fn start_test_server() -> Option<(SocketAddr, Arc<ServerState>)> {
    let config = GatewayConfig::default();
    let sessions = Arc::new(
        SessionStore::open(
            Arc::new(MemoryBackend::default()),
            Arc::new(SystemClock),
            config.session_ttl,
        )
        .await
        .unwrap(),
    );
    let (key_store, key_events) =
        MemoryKeyStore::new(Some(PublicKey::new(KEY_A)), ChainId::X1Mainnet);
    let approvals = Arc::new(WebApprovalSurface::new());
    let gateway = Gateway::new(
        config,
        GatewayDeps {
            sessions,
            signer: Arc::new(FakeSigner::new(false)),
            key_store: Arc::new(key_store),
            rpc: Arc::new(FakeRpc::default()),
            surface: approvals.clone(),
        },
    );
    gateway.spawn_event_loop(key_events);

    let state = Arc::new(ServerState::new(gateway, approvals));
    let addr: SocketAddr = "127.0.0.1:0".parse().unwrap();
    match start_server(addr, state.clone(), AUTH_TOKEN.to_string()).await {
        Ok(bound_addr) => Some((bound_addr, state)),
        Err(e) if is_bind_permission_error(&e) => None,
        Err(e) => panic!("Failed to start test server: {e:?}"),
    }
}

/// Connect to the provider socket the way a page served from `PAGE` would.
async fn connect_page(addr: SocketAddr) -> WsStream {
    let url = format!("ws://{}/provider", addr);
    let mut request = url.into_client_request().unwrap();
    request
        .headers_mut()
        .insert("Origin", PAGE.parse().unwrap());
    let (stream, _response) = tokio_tungstenite::connect_async(request)
        .await
        .expect("Failed to connect WebSocket");
    stream
}

/// Read the next JSON frame from the WebSocket, with a timeout.
async fn recv_json(ws: &mut WsStream) -> Value {
    let msg = timeout(TIMEOUT, ws.next())
        .await
        .expect("Timed out waiting for WS message")
        .expect("Stream ended")
        .expect("WS error");
    match msg {
        Message::Text(text) => serde_json::from_str(text.as_str()).unwrap(),
        other => panic!("Expected Text frame, got {:?}", other),
    }
}

async fn send_json(ws: &mut WsStream, frame: Value) {
    ws.send(Message::Text(frame.to_string().into())).await.unwrap();
}

/// Connect and complete the handshake.
async fn verified_page(addr: SocketAddr) -> WsStream {
    let mut ws = connect_page(addr).await;
    let offer = recv_json(&mut ws).await;
    assert_eq!(offer["kind"], "handshake");
    let token = offer["token"].as_str().unwrap().to_string();
    send_json(&mut ws, json!({ "kind": "handshake-ack", "token": token })).await;
    ws
}

fn api(addr: SocketAddr, path: &str) -> String {
    format!("http://{}{}", addr, path)
}

/// Poll the wallet API until a request is awaiting a decision.
async fn wait_for_approval(client: &reqwest::Client, addr: SocketAddr) -> Value {
    timeout(TIMEOUT, async {
        loop {
            let body: Value = client
                .get(api(addr, "/api/approvals/current"))
                .bearer_auth(AUTH_TOKEN)
                .send()
                .await
                .unwrap()
                .json()
                .await
                .unwrap();
            if !body["request"].is_null() {
                return body["request"].clone();
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
    })
    .await
    .expect("No approval was presented")
}

async fn decide(client: &reqwest::Client, addr: SocketAddr, id: &str, decision: &str) {
    let resp = client
        .post(api(addr, &format!("/api/approvals/{id}")))
        .bearer_auth(AUTH_TOKEN)
        .json(&json!({ "decision": decision }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
}

// ============================================================================
// Tests
// ============================================================================

#[tokio::test]
async fn test_health_endpoint_is_public() {
    let Some((addr, _state)) = start_test_server().await else {
        return;
    };

    let resp = reqwest::get(api(addr, "/api/health")).await.unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["channel"], "provider");
}

#[tokio::test]
async fn test_wallet_api_requires_token() {
    let Some((addr, _state)) = start_test_server().await else {
        return;
    };
    let client = reqwest::Client::new();

    let resp = client
        .get(api(addr, "/api/sessions"))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 401);

    let resp = client
        .get(api(addr, "/api/sessions"))
        .bearer_auth("wrong-token")
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 401);

    let resp = client
        .get(api(addr, "/api/sessions"))
        .bearer_auth(AUTH_TOKEN)
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);
    let body: Value = resp.json().await.unwrap();
    assert_eq!(body["sessions"], json!([]));
}

#[tokio::test]
async fn test_socket_without_origin_is_forbidden() {
    let Some((addr, _state)) = start_test_server().await else {
        return;
    };

    let request = format!("ws://{}/provider", addr)
        .into_client_request()
        .unwrap();
    let err = tokio_tungstenite::connect_async(request)
        .await
        .expect_err("upgrade without Origin must be refused");
    match err {
        tokio_tungstenite::tungstenite::Error::Http(response) => {
            assert_eq!(response.status(), 403);
        }
        other => panic!("Expected HTTP 403, got {other:?}"),
    }
}

#[tokio::test]
async fn test_requests_before_handshake_are_refused() {
    let Some((addr, _state)) = start_test_server().await else {
        return;
    };
    let mut ws = connect_page(addr).await;
    let offer = recv_json(&mut ws).await;
    assert_eq!(offer["kind"], "handshake");

    send_json(
        &mut ws,
        json!({ "kind": "request", "id": 1, "method": "get_network" }),
    )
    .await;
    let frame = recv_json(&mut ws).await;
    assert_eq!(frame["kind"], "response");
    assert_eq!(frame["id"], 1);
    assert_eq!(frame["payload"]["error"]["code"], "untrusted_channel");

    ws.close(None).await.unwrap();
}

#[tokio::test]
async fn test_connect_round_trip_through_wallet_api() {
    let Some((addr, _state)) = start_test_server().await else {
        return;
    };
    let client = reqwest::Client::new();
    let mut ws = verified_page(addr).await;

    send_json(
        &mut ws,
        json!({ "kind": "request", "id": "c1", "method": "connect" }),
    )
    .await;

    let prompt = wait_for_approval(&client, addr).await;
    assert_eq!(prompt["origin"], PAGE);
    assert_eq!(prompt["method"], "connect");
    decide(&client, addr, prompt["id"].as_str().unwrap(), "approve").await;

    let frame = recv_json(&mut ws).await;
    assert_eq!(frame["id"], "c1");
    assert_eq!(
        frame["payload"]["result"],
        json!({ "public_key": KEY_A, "network": "X1 Mainnet", "chain": "x1:mainnet" })
    );

    let body: Value = client
        .get(api(addr, "/api/sessions"))
        .bearer_auth(AUTH_TOKEN)
        .send()
        .await
        .unwrap()
        .json()
        .await
        .unwrap();
    assert_eq!(body["sessions"][0]["origin"], PAGE);

    ws.close(None).await.unwrap();
}

#[tokio::test]
async fn test_account_switch_reaches_open_socket() {
    let Some((addr, _state)) = start_test_server().await else {
        return;
    };
    let client = reqwest::Client::new();
    let mut ws = verified_page(addr).await;

    send_json(
        &mut ws,
        json!({ "kind": "request", "id": 1, "method": "connect" }),
    )
    .await;
    let prompt = wait_for_approval(&client, addr).await;
    decide(&client, addr, prompt["id"].as_str().unwrap(), "approve").await;
    let _ = recv_json(&mut ws).await;

    let resp = client
        .post(api(addr, "/api/account"))
        .bearer_auth(AUTH_TOKEN)
        .json(&json!({ "public_key": KEY_B }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 200);

    let event = recv_json(&mut ws).await;
    assert_eq!(event["kind"], "event");
    assert_eq!(event["name"], "accountChanged");
    assert_eq!(event["new_key"], KEY_B);

    ws.close(None).await.unwrap();
}

#[tokio::test]
async fn test_rejection_and_stale_decision() {
    let Some((addr, _state)) = start_test_server().await else {
        return;
    };
    let client = reqwest::Client::new();
    let mut ws = verified_page(addr).await;

    send_json(
        &mut ws,
        json!({ "kind": "request", "id": 9, "method": "connect" }),
    )
    .await;
    let prompt = wait_for_approval(&client, addr).await;
    let id = prompt["id"].as_str().unwrap().to_string();
    decide(&client, addr, &id, "reject").await;

    let frame = recv_json(&mut ws).await;
    assert_eq!(frame["payload"]["error"]["code"], "user_rejected");

    let resp = client
        .post(api(addr, &format!("/api/approvals/{id}")))
        .bearer_auth(AUTH_TOKEN)
        .json(&json!({ "decision": "approve" }))
        .send()
        .await
        .unwrap();
    assert_eq!(resp.status(), 409);

    ws.close(None).await.unwrap();
}
