//! Live connection registry.
//!
//! One logical room per user id. Every authenticated connection joins its
//! user's room; duplicate connections (multi-device) coexist and all
//! receive emitted events. Membership reflects live connections only -
//! nothing survives a disconnect, and nothing is ever queued here.

use crate::models::WsEvent;
use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, RwLock};

/// Identifies one connection within a room.
pub type ConnId = u64;

type RoomMap = HashMap<i64, HashMap<ConnId, mpsc::UnboundedSender<String>>>;

/// The room registry.
#[derive(Clone, Default)]
pub struct Rooms {
    inner: Arc<RwLock<RoomMap>>,
    next_id: Arc<AtomicU64>,
}

impl Rooms {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Add a connection to `room(user_id)` and return its id.
    pub async fn join(&self, user_id: i64, sender: mpsc::UnboundedSender<String>) -> ConnId {
        let conn_id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let mut rooms = self.inner.write().await;
        rooms.entry(user_id).or_default().insert(conn_id, sender);
        conn_id
    }

    /// Remove a connection. Empty rooms are dropped.
    pub async fn leave(&self, user_id: i64, conn_id: ConnId) {
        let mut rooms = self.inner.write().await;
        if let Some(room) = rooms.get_mut(&user_id) {
            room.remove(&conn_id);
            if room.is_empty() {
                rooms.remove(&user_id);
            }
        }
    }

    /// Emit an event to every live connection in `room(user_id)`.
    ///
    /// Returns how many connections received it. Senders whose receiver
    /// side is gone are pruned on the way.
    pub async fn emit(&self, user_id: i64, event: &WsEvent) -> usize {
        let json = match serde_json::to_string(event) {
            Ok(json) => json,
            Err(_) => return 0,
        };

        let mut rooms = self.inner.write().await;
        let Some(room) = rooms.get_mut(&user_id) else {
            return 0;
        };

        let mut delivered = 0;
        room.retain(|_, sender| match sender.send(json.clone()) {
            Ok(()) => {
                delivered += 1;
                true
            }
            Err(_) => false,
        });
        if room.is_empty() {
            rooms.remove(&user_id);
        }
        delivered
    }

    /// Number of live connections in a user's room.
    pub async fn occupancy(&self, user_id: i64) -> usize {
        let rooms = self.inner.read().await;
        rooms.get(&user_id).map(|room| room.len()).unwrap_or(0)
    }
}
