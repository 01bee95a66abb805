//! Optional client-side offline queue.
//!
//! Holds already-sealed envelopes for recipients who were offline at send
//! time, so the client can retry when they reappear. Records expire after
//! 24 hours. The store is purged at open and the embedding client is
//! expected to purge on a 5-minute cadence. The relay never reads this
//! queue; server-side delivery stays real-time-only.

use crate::envelope::Envelope;
use crate::error::{Error, Result};
use rusqlite::{params, Connection};
use std::path::Path;

/// Time-to-live for queued envelopes: 24 hours.
pub const QUEUE_TTL_SECS: i64 = 24 * 60 * 60;

/// Recommended purge cadence for the embedding client: 5 minutes.
pub const CLEANUP_INTERVAL_SECS: i64 = 5 * 60;

/// A queued, already-encrypted envelope.
#[derive(Debug, Clone)]
pub struct QueuedEnvelope {
    /// Database row id.
    pub id: i64,
    /// Intended recipient.
    pub recipient_id: i64,
    /// The sealed envelope. Never plaintext.
    pub envelope: Envelope,
    /// When the envelope was queued (Unix seconds).
    pub queued_at: i64,
}

/// The offline envelope queue.
pub struct OfflineQueue {
    conn: Connection,
}

impl OfflineQueue {
    /// Open or create the queue, purging expired records.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let conn = Connection::open(path)?;
        Self::init(conn)
    }

    /// Open an in-memory queue (for testing).
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS offline_envelopes (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                recipient_id INTEGER NOT NULL,
                envelope TEXT NOT NULL,
                queued_at INTEGER NOT NULL
            );

            CREATE INDEX IF NOT EXISTS idx_offline_recipient ON offline_envelopes(recipient_id);
            CREATE INDEX IF NOT EXISTS idx_offline_queued_at ON offline_envelopes(queued_at);
            "#,
        )?;

        let queue = Self { conn };
        queue.purge_expired_at(current_timestamp())?;
        Ok(queue)
    }

    /// Queue a sealed envelope for a recipient.
    pub fn enqueue(&self, recipient_id: i64, envelope: &Envelope) -> Result<i64> {
        self.enqueue_at(recipient_id, envelope, current_timestamp())
    }

    fn enqueue_at(&self, recipient_id: i64, envelope: &Envelope, now: i64) -> Result<i64> {
        let body = serde_json::to_string(envelope).map_err(|e| Error::Encoding(e.to_string()))?;
        self.conn.execute(
            "INSERT INTO offline_envelopes (recipient_id, envelope, queued_at) VALUES (?, ?, ?)",
            params![recipient_id, body, now],
        )?;
        Ok(self.conn.last_insert_rowid())
    }

    /// Unexpired envelopes queued for a recipient, oldest first.
    pub fn pending_for(&self, recipient_id: i64) -> Result<Vec<QueuedEnvelope>> {
        let cutoff = current_timestamp() - QUEUE_TTL_SECS;
        let mut stmt = self.conn.prepare(
            r#"
            SELECT id, recipient_id, envelope, queued_at
            FROM offline_envelopes
            WHERE recipient_id = ? AND queued_at > ?
            ORDER BY queued_at ASC, id ASC
            "#,
        )?;

        let rows = stmt.query_map(params![recipient_id, cutoff], |row| {
            let id: i64 = row.get(0)?;
            let recipient_id: i64 = row.get(1)?;
            let body: String = row.get(2)?;
            let queued_at: i64 = row.get(3)?;
            Ok((id, recipient_id, body, queued_at))
        })?;

        let mut envelopes = Vec::new();
        for row in rows {
            let (id, recipient_id, body, queued_at) = row?;
            let envelope =
                serde_json::from_str(&body).map_err(|e| Error::Encoding(e.to_string()))?;
            envelopes.push(QueuedEnvelope {
                id,
                recipient_id,
                envelope,
                queued_at,
            });
        }
        Ok(envelopes)
    }

    /// Remove a queued envelope after successful delivery.
    pub fn remove(&self, id: i64) -> Result<()> {
        self.conn
            .execute("DELETE FROM offline_envelopes WHERE id = ?", params![id])?;
        Ok(())
    }

    /// Delete everything past the TTL. Returns the number of rows removed.
    pub fn purge_expired(&self) -> Result<usize> {
        self.purge_expired_at(current_timestamp())
    }

    fn purge_expired_at(&self, now: i64) -> Result<usize> {
        let count = self.conn.execute(
            "DELETE FROM offline_envelopes WHERE queued_at <= ?",
            params![now - QUEUE_TTL_SECS],
        )?;
        Ok(count)
    }

    /// Total queued envelopes, expired or not.
    pub fn len(&self) -> Result<usize> {
        let count: i64 =
            self.conn
                .query_row("SELECT COUNT(*) FROM offline_envelopes", [], |row| row.get(0))?;
        Ok(count as usize)
    }

    /// Whether the queue is empty.
    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }
}

/// Current Unix timestamp.
fn current_timestamp() -> i64 {
    chrono::Utc::now().timestamp()
}
