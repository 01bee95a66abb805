//! QuantumShield relay library.
//!
//! Exposes the router assembly so integration tests can run the exact
//! production routes against an ephemeral listener.

pub mod api;
pub mod config;
pub mod engine;
pub mod models;
pub mod rate_limit;
pub mod rooms;

use axum::{
    extract::{Request, State},
    http::{header, HeaderValue, Method, StatusCode},
    middleware::{self, Next},
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use models::AppState;
use std::sync::Arc;
use std::time::Duration;
use tower_http::cors::{AllowOrigin, CorsLayer};
use tower_http::limit::RequestBodyLimitLayer;

/// Body limit for the HTTP surface. Files travel over the socket, so
/// HTTP requests stay small.
const HTTP_BODY_LIMIT: usize = 64 * 1024;

/// Origin gate: a browser-presented `Origin` must be allowlisted.
///
/// Requests without an `Origin` (non-browser clients) pass; every handler
/// still requires a valid token. The rejection is deliberately explicit,
/// unlike authentication errors.
async fn origin_gate(
    State(state): State<Arc<AppState>>,
    request: Request,
    next: Next,
) -> Response {
    if let Some(origin) = request.headers().get(header::ORIGIN) {
        let allowed = origin
            .to_str()
            .map(|o| state.allowed_origins.iter().any(|a| a == o))
            .unwrap_or(false);
        if !allowed {
            return (
                StatusCode::FORBIDDEN,
                Json(serde_json::json!({ "error": "origin not allowed" })),
            )
                .into_response();
        }
    }
    next.run(request).await
}

/// Build the relay router over shared state.
pub fn router(state: Arc<AppState>) -> Router {
    let origins: Vec<HeaderValue> = state
        .allowed_origins
        .iter()
        .filter_map(|origin| origin.parse().ok())
        .collect();

    let cors = CorsLayer::new()
        .allow_origin(AllowOrigin::list(origins))
        .allow_methods([Method::GET, Method::POST, Method::DELETE, Method::OPTIONS])
        .allow_headers([header::CONTENT_TYPE, header::AUTHORIZATION])
        .max_age(Duration::from_secs(3600));

    Router::new()
        .route("/ws", get(api::ws_handler))
        .route("/users/:id/keys", get(api::get_user_keys))
        .route("/friends/request", post(api::create_friend_request))
        .route("/friends/requests/pending", get(api::pending_friend_requests))
        .route("/friends/request/:id/accept", post(api::accept_friend_request))
        .route("/friends/request/:id/reject", post(api::reject_friend_request))
        .route("/friends/list", get(api::list_friends))
        .route("/friends/:friend_id", delete(api::remove_friend))
        .layer(RequestBodyLimitLayer::new(HTTP_BODY_LIMIT))
        .layer(middleware::from_fn_with_state(state.clone(), origin_gate))
        .layer(cors)
        .with_state(state)
}
