//! Shared state and wire models for the relay.

use qshield_core::auth::TokenSigner;
use qshield_core::storage::Database;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::Mutex as TokioMutex;

use crate::rate_limit::RateLimiter;
use crate::rooms::Rooms;

/// Application shared state.
pub struct AppState {
    /// User directory and friendship graph.
    pub database: Arc<TokioMutex<Database>>,
    /// Live connection registry, one room per user.
    pub rooms: Rooms,
    /// Verifier for bearer tokens issued by the external auth endpoint.
    pub token_signer: TokenSigner,
    /// Friend-request creation limiter (10/hour/user).
    pub friend_request_limiter: RateLimiter,
    /// General limiter for crypto-assisted HTTP endpoints (20/min/user).
    pub http_limiter: RateLimiter,
    /// Event-layer limiter for relayed socket events (60/min/user).
    /// Bounds the signature-verify work a flooding sender can trigger.
    pub event_limiter: RateLimiter,
    /// Origins allowed to present an `Origin` header.
    pub allowed_origins: Vec<String>,
}

/// An event pushed to a WebSocket client, `{"type": ..., "data": ...}`.
#[derive(Debug, Clone, Serialize)]
pub struct WsEvent {
    /// Event name, e.g. `receive_message`.
    #[serde(rename = "type")]
    pub event_type: String,
    /// Event payload.
    pub data: serde_json::Value,
}

impl WsEvent {
    /// Build an event from a name and payload.
    pub fn new(event_type: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            event_type: event_type.into(),
            data,
        }
    }
}

/// `send_message` payload, all crypto fields base64.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SendMessagePayload {
    pub sender_id: i64,
    pub receiver_id: i64,
    pub kem_ciphertext: String,
    pub iv: String,
    pub ciphertext: String,
    pub auth_tag: String,
    pub signature: String,
}

/// `send_file` payload. `file_data` is the AEAD ciphertext of the
/// base64-encoded file; the metadata fields are untrusted display hints.
#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SendFilePayload {
    pub sender_id: i64,
    pub receiver_id: i64,
    pub file_name: String,
    pub file_size: u64,
    pub file_type: String,
    pub file_data: String,
    pub kem_ciphertext: String,
    pub iv: String,
    pub auth_tag: String,
    pub signature: String,
}

/// Events a client may send over the socket.
#[derive(Debug, Deserialize)]
#[serde(tag = "type", content = "data", rename_all = "snake_case")]
pub enum ClientEvent {
    /// Relay an encrypted message.
    SendMessage(SendMessagePayload),
    /// Relay an encrypted file.
    SendFile(SendFilePayload),
}

/// Body of `POST /friends/request`.
#[derive(Debug, Deserialize)]
pub struct FriendRequestBody {
    /// Username of the intended receiver.
    pub receiver_username: String,
}
