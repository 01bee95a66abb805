//! WebSocket and HTTP handlers.

use axum::{
    extract::ws::{Message as WsMessage, WebSocket, WebSocketUpgrade},
    extract::{Path, Query, State},
    http::{header, HeaderMap, StatusCode},
    response::{IntoResponse, Response},
    Json,
};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use futures_util::{SinkExt, StreamExt};
use qshield_core::auth::TokenClaims;
use qshield_core::Error;
use serde::Deserialize;
use serde_json::json;
use std::sync::Arc;
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use crate::engine;
use crate::models::{AppState, ClientEvent, FriendRequestBody, WsEvent};

fn now() -> i64 {
    chrono::Utc::now().timestamp()
}

// ========================================
// WebSocket event bus
// ========================================

/// Query params for the WebSocket handshake.
#[derive(Debug, Deserialize)]
pub struct WsAuthParams {
    /// Bearer token from the auth endpoint.
    pub token: String,
    /// The user id the client claims to be.
    pub user_id: i64,
}

/// WebSocket upgrade handler.
///
/// Verifies the token (validity and expiry) and that its subject matches
/// the claimed `user_id` before upgrading. Failures get one generic
/// "authentication error" - no session state is created.
pub async fn ws_handler(
    ws: WebSocketUpgrade,
    Query(params): Query<WsAuthParams>,
    State(state): State<Arc<AppState>>,
) -> Response {
    let claims = match state.token_signer.verify(&params.token, now()) {
        Ok(claims) => claims,
        Err(_) => {
            return (StatusCode::UNAUTHORIZED, "authentication error").into_response();
        }
    };
    if claims.user_id != params.user_id {
        // A valid token for a different user is still impersonation.
        warn!(token_user = claims.user_id, claimed = params.user_id, "handshake user id mismatch");
        return (StatusCode::UNAUTHORIZED, "authentication error").into_response();
    }

    ws.on_upgrade(move |socket| handle_ws_connection(socket, claims, state))
}

/// Drive one authenticated connection: join the user's room, forward
/// room emissions outward, and process inbound client events in arrival
/// order.
async fn handle_ws_connection(socket: WebSocket, claims: TokenClaims, state: Arc<AppState>) {
    let user_id = claims.user_id;
    let (mut ws_tx, mut ws_rx) = socket.split();

    let (room_tx, mut room_rx) = mpsc::unbounded_channel::<String>();
    let conn_id = state.rooms.join(user_id, room_tx).await;
    info!(user_id, conn_id, "connection joined room");

    let connected = WsEvent::new("connected", json!({ "user_id": user_id }));
    if send_event(&mut ws_tx, &connected).await.is_err() {
        state.rooms.leave(user_id, conn_id).await;
        return;
    }

    loop {
        tokio::select! {
            outbound = room_rx.recv() => {
                match outbound {
                    Some(json) => {
                        if ws_tx.send(WsMessage::Text(json)).await.is_err() {
                            break;
                        }
                    }
                    None => break,
                }
            }
            inbound = ws_rx.next() => {
                match inbound {
                    Some(Ok(WsMessage::Text(text))) => {
                        let reply = process_client_event(&state, user_id, &text).await;
                        if send_event(&mut ws_tx, &reply).await.is_err() {
                            break;
                        }
                    }
                    Some(Ok(WsMessage::Close(_))) | None => break,
                    Some(Err(_)) => break,
                    _ => {
                        // Ping/pong and binary frames are ignored.
                    }
                }
            }
        }
    }

    state.rooms.leave(user_id, conn_id).await;
    info!(user_id, conn_id, "connection left room");
    let _ = ws_tx.close().await;
}

async fn send_event(
    ws_tx: &mut (impl SinkExt<WsMessage> + Unpin),
    event: &WsEvent,
) -> std::result::Result<(), ()> {
    let json = serde_json::to_string(event).map_err(|_| ())?;
    ws_tx.send(WsMessage::Text(json)).await.map_err(|_| ())
}

/// Dispatch one inbound event and build the reply for this connection.
async fn process_client_event(state: &AppState, conn_user_id: i64, text: &str) -> WsEvent {
    let event: ClientEvent = match serde_json::from_str(text) {
        Ok(event) => event,
        Err(_) => {
            debug!(conn_user_id, "malformed client event");
            return WsEvent::new("message_error", json!({ "error": "malformed_event" }));
        }
    };

    match event {
        ClientEvent::SendMessage(msg) => {
            match engine::handle_send_message(state, conn_user_id, &msg).await {
                Ok(delivered) => WsEvent::new(
                    "message_sent",
                    json!({ "success": true, "message_id": delivered.id }),
                ),
                Err(err) => WsEvent::new("message_error", json!({ "error": err.code() })),
            }
        }
        ClientEvent::SendFile(file) => {
            match engine::handle_send_file(state, conn_user_id, &file).await {
                Ok(delivered) => WsEvent::new(
                    "file_delivered",
                    json!({ "success": true, "file_id": delivered.id }),
                ),
                Err(err) => WsEvent::new("file_error", json!({ "error": err.code() })),
            }
        }
    }
}

// ========================================
// HTTP surface
// ========================================

type ApiError = (StatusCode, Json<serde_json::Value>);

fn api_error(status: StatusCode, message: &str) -> ApiError {
    (status, Json(json!({ "error": message })))
}

/// Map a core error onto an HTTP response without leaking sub-reasons.
fn map_core_error(err: Error) -> ApiError {
    match err {
        Error::NotFound(_) => api_error(StatusCode::NOT_FOUND, "not found"),
        Error::Protocol(_) => api_error(StatusCode::BAD_REQUEST, "invalid request"),
        Error::Unauthorized => api_error(StatusCode::FORBIDDEN, "forbidden"),
        Error::RateLimited => api_error(StatusCode::TOO_MANY_REQUESTS, "rate limit exceeded"),
        _ => api_error(StatusCode::INTERNAL_SERVER_ERROR, "server error"),
    }
}

/// Authenticate a request from its `Authorization: Bearer` header.
fn bearer_claims(state: &AppState, headers: &HeaderMap) -> Result<TokenClaims, ApiError> {
    let token = headers
        .get(header::AUTHORIZATION)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| value.strip_prefix("Bearer "))
        .ok_or_else(|| api_error(StatusCode::UNAUTHORIZED, "authentication error"))?;
    state
        .token_signer
        .verify(token, now())
        .map_err(|_| api_error(StatusCode::UNAUTHORIZED, "authentication error"))
}

async fn check_http_limit(state: &AppState, user_id: i64) -> Result<(), ApiError> {
    if state.http_limiter.check(user_id).await {
        Ok(())
    } else {
        Err(api_error(
            StatusCode::TOO_MANY_REQUESTS,
            "rate limit exceeded",
        ))
    }
}

/// `GET /users/{id}/keys` - a peer's public keys, base64.
pub async fn get_user_keys(
    Path(id): Path<i64>,
    headers: HeaderMap,
    State(state): State<Arc<AppState>>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let claims = bearer_claims(&state, &headers)?;
    check_http_limit(&state, claims.user_id).await?;

    let db = state.database.lock().await;
    let user = db
        .get_user(id)
        .map_err(map_core_error)?
        .ok_or_else(|| api_error(StatusCode::NOT_FOUND, "not found"))?;

    Ok(Json(json!({
        "kem_public_key": BASE64.encode(user.kem_public_key.as_bytes()),
        "sig_public_key": BASE64.encode(user.sig_public_key.as_bytes()),
    })))
}

/// `POST /friends/request` - create a friend request; 10/hour/user.
pub async fn create_friend_request(
    headers: HeaderMap,
    State(state): State<Arc<AppState>>,
    Json(body): Json<FriendRequestBody>,
) -> Result<Response, ApiError> {
    let claims = bearer_claims(&state, &headers)?;

    if !state.friend_request_limiter.check(claims.user_id).await {
        let retry_after = state.friend_request_limiter.retry_after_secs();
        return Ok((
            StatusCode::TOO_MANY_REQUESTS,
            [(header::RETRY_AFTER, retry_after.to_string())],
            Json(json!({ "error": "rate limit exceeded" })),
        )
            .into_response());
    }

    let (request_id, receiver_id) = {
        let db = state.database.lock().await;
        let receiver = db
            .get_user_by_username(&body.receiver_username)
            .map_err(map_core_error)?
            .ok_or_else(|| api_error(StatusCode::NOT_FOUND, "not found"))?;
        let request_id = db
            .create_friend_request(claims.user_id, &body.receiver_username)
            .map_err(map_core_error)?;
        (request_id, receiver.id)
    };

    // Courtesy notification; the pending list is authoritative.
    state
        .rooms
        .emit(
            receiver_id,
            &WsEvent::new(
                "friend_request_received",
                json!({
                    "id": request_id,
                    "sender_id": claims.user_id,
                    "username": claims.username,
                    "created_at": now(),
                }),
            ),
        )
        .await;

    Ok((StatusCode::CREATED, Json(json!({ "id": request_id }))).into_response())
}

/// `GET /friends/requests/pending`.
pub async fn pending_friend_requests(
    headers: HeaderMap,
    State(state): State<Arc<AppState>>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let claims = bearer_claims(&state, &headers)?;
    let db = state.database.lock().await;
    let pending = db.pending_requests(claims.user_id).map_err(map_core_error)?;
    Ok(Json(json!(pending)))
}

/// `POST /friends/request/{id}/accept`.
pub async fn accept_friend_request(
    Path(id): Path<i64>,
    headers: HeaderMap,
    State(state): State<Arc<AppState>>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let claims = bearer_claims(&state, &headers)?;
    let mut db = state.database.lock().await;
    db.accept_request(id, claims.user_id).map_err(map_core_error)?;
    Ok(Json(json!({ "success": true })))
}

/// `POST /friends/request/{id}/reject`.
pub async fn reject_friend_request(
    Path(id): Path<i64>,
    headers: HeaderMap,
    State(state): State<Arc<AppState>>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let claims = bearer_claims(&state, &headers)?;
    let db = state.database.lock().await;
    db.reject_request(id, claims.user_id).map_err(map_core_error)?;
    Ok(Json(json!({ "success": true })))
}

/// `GET /friends/list`.
pub async fn list_friends(
    headers: HeaderMap,
    State(state): State<Arc<AppState>>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let claims = bearer_claims(&state, &headers)?;
    let db = state.database.lock().await;
    let friends = db.list_friends(claims.user_id).map_err(map_core_error)?;
    Ok(Json(json!(friends)))
}

/// `DELETE /friends/{friend_id}`.
pub async fn remove_friend(
    Path(friend_id): Path<i64>,
    headers: HeaderMap,
    State(state): State<Arc<AppState>>,
) -> Result<Json<serde_json::Value>, ApiError> {
    let claims = bearer_claims(&state, &headers)?;
    let db = state.database.lock().await;
    db.remove_friend(claims.user_id, friend_id)
        .map_err(map_core_error)?;
    Ok(Json(json!({ "success": true })))
}
