//! Shared fixtures for relay integration tests.

#![allow(dead_code)]

use std::net::SocketAddr;
use std::sync::Arc;

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use qshield_core::auth::{TokenClaims, TokenSigner};
use qshield_core::crypto::{kem_keygen, sig_keygen, KemPublicKey, KemSecretKey, SigPublicKey, SigSecretKey};
use qshield_core::envelope::Envelope;
use qshield_core::storage::{Database, DatabaseConfig};
use qshield_relay::models::AppState;
use qshield_relay::rate_limit::RateLimiter;
use qshield_relay::rooms::Rooms;
use tokio::net::TcpStream;
use tokio::sync::Mutex as TokioMutex;
use tokio_tungstenite::{connect_async, tungstenite::Message, MaybeTlsStream, WebSocketStream};

/// Shared token secret between the fixture "auth endpoint" and the relay.
pub const TEST_SECRET: &[u8] = b"integration-test-signing-secret";

/// Origin the fixture relay allowlists.
pub const TEST_ORIGIN: &str = "http://localhost:5173";

pub type WsSink = SplitSink<WebSocketStream<MaybeTlsStream<TcpStream>>, Message>;
pub type WsStream = SplitStream<WebSocketStream<MaybeTlsStream<TcpStream>>>;

/// A registered user with its full key material and a valid token.
pub struct TestUser {
    pub id: i64,
    pub username: String,
    pub kem_pk: KemPublicKey,
    pub kem_sk: KemSecretKey,
    pub sig_pk: SigPublicKey,
    pub sig_sk: SigSecretKey,
    pub token: String,
}

/// Create relay state over an in-memory database.
pub fn test_state() -> Arc<AppState> {
    test_state_with_event_limiter(RateLimiter::per_window(60, 60))
}

/// Same, but with a custom event-layer limiter for flood tests.
pub fn test_state_with_event_limiter(event_limiter: RateLimiter) -> Arc<AppState> {
    let database = Database::open(&DatabaseConfig {
        path: String::new(),
        in_memory: true,
    })
    .expect("open in-memory db");

    Arc::new(AppState {
        database: Arc::new(TokioMutex::new(database)),
        rooms: Rooms::new(),
        token_signer: TokenSigner::new(TEST_SECRET),
        friend_request_limiter: RateLimiter::per_window(10, 3600),
        http_limiter: RateLimiter::per_window(20, 60),
        event_limiter,
        allowed_origins: vec![TEST_ORIGIN.to_string()],
    })
}

/// Register a user projection and mint a one-hour token.
pub async fn register_user(state: &AppState, id: i64, username: &str) -> TestUser {
    let (kem_pk, kem_sk) = kem_keygen().expect("kem keygen");
    let (sig_pk, sig_sk) = sig_keygen();

    {
        let db = state.database.lock().await;
        db.insert_user(id, username, &kem_pk, &sig_pk)
            .expect("insert user");
    }

    let token = state
        .token_signer
        .mint(&TokenClaims {
            user_id: id,
            username: username.to_string(),
            exp: chrono::Utc::now().timestamp() + 3600,
        })
        .expect("mint token");

    TestUser {
        id,
        username: username.to_string(),
        kem_pk,
        kem_sk,
        sig_pk,
        sig_sk,
        token,
    }
}

/// Establish a friendship through the state machine.
pub async fn make_friends(state: &AppState, a: &TestUser, b: &TestUser) {
    let mut db = state.database.lock().await;
    let request = db
        .create_friend_request(a.id, &b.username)
        .expect("create request");
    db.accept_request(request, b.id).expect("accept request");
}

/// Start the full relay router on an ephemeral port.
pub async fn start_server(state: Arc<AppState>) -> SocketAddr {
    let router = qshield_relay::router(state);
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0")
        .await
        .expect("bind ephemeral port");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        axum::serve(listener, router).await.expect("serve");
    });
    addr
}

/// Connect a WebSocket client, authenticating as the given user.
pub async fn ws_connect(addr: SocketAddr, user: &TestUser) -> (WsSink, WsStream) {
    let url = format!(
        "ws://{}/ws?token={}&user_id={}",
        addr, user.token, user.id
    );
    let (stream, _response) = connect_async(&url)
        .await
        .expect("WebSocket connect should succeed");
    stream.split()
}

/// Attempt a WebSocket handshake with arbitrary token and user id.
pub async fn try_ws_connect(
    addr: SocketAddr,
    token: &str,
    user_id: i64,
) -> Result<(), tokio_tungstenite::tungstenite::Error> {
    let url = format!("ws://{}/ws?token={}&user_id={}", addr, token, user_id);
    connect_async(&url).await.map(|_| ())
}

/// Read the next text frame as JSON, failing after five seconds.
pub async fn read_ws_json(rx: &mut WsStream) -> serde_json::Value {
    let msg = tokio::time::timeout(std::time::Duration::from_secs(5), rx.next())
        .await
        .expect("should receive message within timeout")
        .expect("stream should not end")
        .expect("message should be ok");

    match msg {
        Message::Text(text) => serde_json::from_str(&text).expect("should be valid JSON"),
        other => panic!("Expected text message, got: {:?}", other),
    }
}

/// Assert that no frame arrives within a short window.
pub async fn assert_ws_silent(rx: &mut WsStream) {
    let result =
        tokio::time::timeout(std::time::Duration::from_millis(300), rx.next()).await;
    assert!(result.is_err(), "expected silence, got {:?}", result);
}

/// Send a JSON event frame.
pub async fn send_ws_json(tx: &mut WsSink, value: &serde_json::Value) {
    tx.send(Message::Text(value.to_string()))
        .await
        .expect("send ws frame");
}

/// Seal `plaintext` from `sender` to `receiver` and wrap it as a
/// `send_message` client event.
pub fn send_message_event(
    sender: &TestUser,
    receiver: &TestUser,
    plaintext: &[u8],
) -> serde_json::Value {
    let envelope =
        Envelope::seal(plaintext, &receiver.kem_pk, &sender.sig_sk).expect("seal envelope");
    serde_json::json!({
        "type": "send_message",
        "data": {
            "sender_id": sender.id,
            "receiver_id": receiver.id,
            "kem_ciphertext": envelope.kem_ct,
            "iv": envelope.iv,
            "ciphertext": envelope.ciphertext,
            "auth_tag": envelope.tag,
            "signature": envelope.sig,
        }
    })
}

/// Rebuild an [`Envelope`] from a `receive_message` event payload.
pub fn envelope_from_event(data: &serde_json::Value) -> Envelope {
    Envelope::from_parts(
        data["kem_ciphertext"].as_str().expect("kem_ciphertext"),
        data["iv"].as_str().expect("iv"),
        data["ciphertext"].as_str().expect("ciphertext"),
        data["auth_tag"].as_str().expect("auth_tag"),
        data["signature"].as_str().expect("signature"),
    )
    .expect("complete envelope")
}
