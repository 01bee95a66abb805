//! In-memory session handle and the session-scoped mirror.
//!
//! The session owns the KEK; holding a live, unexpired session is what
//! "unlocked" means. The mirror models per-tab session storage used for
//! reload survival. The KEK value written to the mirror is sensitive by
//! design: a same-tab XSS can read it, which is inherent to reload
//! survival without re-prompting the password.

use super::{KEK_SIZE, SESSION_TIMEOUT_SECS};
use crate::error::Result;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use zeroize::Zeroizing;

/// An unlocked keystore session. Dropping it zeroizes the KEK.
pub struct Session {
    username: String,
    kek: Zeroizing<[u8; KEK_SIZE]>,
    last_activity: i64,
}

impl Session {
    /// Create a session for a user with a freshly derived KEK.
    pub fn new(username: impl Into<String>, kek: Zeroizing<[u8; KEK_SIZE]>, now: i64) -> Self {
        Self {
            username: username.into(),
            kek,
            last_activity: now,
        }
    }

    /// The session's username.
    pub fn username(&self) -> &str {
        &self.username
    }

    /// The key-encrypting key.
    pub fn kek(&self) -> &[u8; KEK_SIZE] {
        &self.kek
    }

    /// Whether the inactivity timeout has elapsed.
    pub fn is_expired(&self, now: i64) -> bool {
        now - self.last_activity > SESSION_TIMEOUT_SECS
    }

    /// Record activity, extending the deadline.
    pub fn touch(&mut self, now: i64) {
        self.last_activity = now;
    }

    #[cfg(test)]
    pub(crate) fn backdate(&mut self, seconds: i64) {
        self.last_activity -= seconds;
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("username", &self.username)
            .field("kek", &"[REDACTED]")
            .field("last_activity", &self.last_activity)
            .finish()
    }
}

/// The record mirrored into session-scoped storage for reload survival.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MirrorRecord {
    /// Session username.
    pub username: String,
    /// KEK, base64. Sensitive; see the module docs for the attacker model.
    pub kek: String,
    /// When the mirror was last refreshed (Unix seconds).
    pub saved_at: i64,
}

/// Session-scoped storage for the mirror record.
///
/// Implementations must have session-storage semantics: the record does
/// not survive termination of the hosting session.
pub trait SessionMirror {
    /// Write (or refresh) the mirror record.
    fn store(&self, record: &MirrorRecord) -> Result<()>;
    /// Read the mirror record, if present.
    fn load(&self) -> Result<Option<MirrorRecord>>;
    /// Remove the mirror record. Idempotent.
    fn clear(&self) -> Result<()>;
}

/// An in-process mirror. Clones share the same slot, modelling multiple
/// keystore instances inside one tab session.
#[derive(Clone, Default)]
pub struct MemoryMirror {
    slot: Arc<Mutex<Option<MirrorRecord>>>,
}

impl SessionMirror for MemoryMirror {
    fn store(&self, record: &MirrorRecord) -> Result<()> {
        if let Ok(mut slot) = self.slot.lock() {
            *slot = Some(record.clone());
        }
        Ok(())
    }

    fn load(&self) -> Result<Option<MirrorRecord>> {
        Ok(self.slot.lock().ok().and_then(|slot| slot.clone()))
    }

    fn clear(&self) -> Result<()> {
        if let Ok(mut slot) = self.slot.lock() {
            *slot = None;
        }
        Ok(())
    }
}
