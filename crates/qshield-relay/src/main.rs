//! QuantumShield Relay Server
//!
//! Authenticated realtime event bus for end-to-end encrypted messaging.
//!
//! ## Relay Properties
//!
//! - Never decrypts content; verifies sender signatures before forwarding
//! - Enforces the friendship ACL on every relayed event
//! - Real-time-only delivery: no envelope is ever persisted
//! - Per-user rate limiting keyed by authenticated user id

use anyhow::Result;
use clap::Parser;
use qshield_core::auth::TokenSigner;
use qshield_core::storage::{Database, DatabaseConfig};
use qshield_relay::config::{Args, Config};
use qshield_relay::models::AppState;
use qshield_relay::rate_limit::RateLimiter;
use qshield_relay::rooms::Rooms;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex as TokioMutex;
use tracing::info;
use tracing_subscriber::EnvFilter;

/// How long an idle rate-limiter bucket survives before being purged.
const LIMITER_IDLE_SECS: f64 = 2.0 * 3600.0;

#[tokio::main]
async fn main() -> Result<()> {
    let args = Args::parse();

    let filter = if args.verbose {
        EnvFilter::new("debug")
    } else {
        EnvFilter::new("info")
    };
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .init();

    // Fatal on missing secret or database path.
    let config = Config::load(args)?;

    let database = Database::open(&DatabaseConfig {
        path: config.database.clone(),
        in_memory: false,
    })
    .map_err(|e| anyhow::anyhow!("failed to open database: {}", e))?;

    let state = Arc::new(AppState {
        database: Arc::new(TokioMutex::new(database)),
        rooms: Rooms::new(),
        token_signer: TokenSigner::new(&config.token_secret),
        friend_request_limiter: RateLimiter::per_window(10, 3600),
        http_limiter: RateLimiter::per_window(20, 60),
        event_limiter: RateLimiter::per_window(60, 60),
        allowed_origins: config.allowed_origins.clone(),
    });

    // Periodically drop idle rate-limiter buckets.
    let purge_state = Arc::clone(&state);
    tokio::spawn(async move {
        let mut interval = tokio::time::interval(Duration::from_secs(600));
        loop {
            interval.tick().await;
            purge_state
                .friend_request_limiter
                .purge_stale(LIMITER_IDLE_SECS)
                .await;
            purge_state.http_limiter.purge_stale(LIMITER_IDLE_SECS).await;
            purge_state.event_limiter.purge_stale(LIMITER_IDLE_SECS).await;
        }
    });

    let app = qshield_relay::router(state);

    let listener = tokio::net::TcpListener::bind(&config.listen).await?;
    info!(
        address = %config.listen,
        origins = ?config.allowed_origins,
        "QuantumShield relay started"
    );

    axum::serve(listener, app).await?;
    Ok(())
}
