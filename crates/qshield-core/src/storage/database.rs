//! User directory and friendship state machine operations.

use super::schema::{CREATE_SCHEMA, SCHEMA_VERSION};
use crate::crypto::{KemPublicKey, SigPublicKey};
use crate::error::{Error, Result};
use rusqlite::{params, Connection, OpenFlags};
use serde::Serialize;
use std::path::Path;

/// Database configuration.
#[derive(Debug, Clone)]
pub struct DatabaseConfig {
    /// Path to the database file.
    pub path: String,
    /// Whether to use an in-memory database (for testing).
    pub in_memory: bool,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            path: "qshield.db".to_string(),
            in_memory: false,
        }
    }
}

/// Status of a friend request.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum FriendRequestStatus {
    /// Awaiting a response from the receiver.
    Pending,
    /// Accepted; a friendship row exists.
    Accepted,
    /// Rejected. Does not block a future re-request.
    Rejected,
}

impl FriendRequestStatus {
    fn as_str(&self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Accepted => "accepted",
            Self::Rejected => "rejected",
        }
    }

    fn parse(s: &str) -> Self {
        match s {
            "accepted" => Self::Accepted,
            "rejected" => Self::Rejected,
            _ => Self::Pending,
        }
    }
}

/// A registered user as the core sees it: public keys only.
#[derive(Debug, Clone)]
pub struct UserRecord {
    /// Opaque user id.
    pub id: i64,
    /// Unique username.
    pub username: String,
    /// ML-KEM-1024 public key.
    pub kem_public_key: KemPublicKey,
    /// Falcon-1024 public key.
    pub sig_public_key: SigPublicKey,
}

/// A pending friend request as listed for the receiver.
#[derive(Debug, Clone, Serialize)]
pub struct PendingRequest {
    /// Request id.
    pub id: i64,
    /// Sender's user id.
    pub sender_id: i64,
    /// Sender's username.
    pub username: String,
    /// Creation time (Unix seconds).
    pub created_at: i64,
}

/// A friend as listed for a user.
#[derive(Debug, Clone, Serialize)]
pub struct FriendInfo {
    /// The friend's user id.
    pub friend_id: i64,
    /// The friend's username.
    pub username: String,
    /// When the friendship was created (Unix seconds).
    pub created_at: i64,
}

/// Canonical ordering for a friendship pair.
fn canonical_pair(a: i64, b: i64) -> (i64, i64) {
    if a < b {
        (a, b)
    } else {
        (b, a)
    }
}

/// Database handle for the user directory and friendship graph.
pub struct Database {
    conn: Connection,
}

impl Database {
    /// Open or create the database and initialize its schema.
    pub fn open(config: &DatabaseConfig) -> Result<Self> {
        let conn = if config.in_memory {
            Connection::open_in_memory()
        } else {
            if let Some(parent) = Path::new(&config.path).parent() {
                std::fs::create_dir_all(parent)
                    .map_err(|e| Error::Storage(format!("failed to create directory: {}", e)))?;
            }
            Connection::open_with_flags(
                &config.path,
                OpenFlags::SQLITE_OPEN_READ_WRITE
                    | OpenFlags::SQLITE_OPEN_CREATE
                    | OpenFlags::SQLITE_OPEN_NO_MUTEX,
            )
        }
        .map_err(|e| Error::Storage(format!("failed to open database: {}", e)))?;

        conn.execute_batch("PRAGMA foreign_keys = ON;")
            .map_err(|e| Error::Storage(e.to_string()))?;

        let db = Self { conn };
        db.init_schema()?;
        Ok(db)
    }

    fn init_schema(&self) -> Result<()> {
        self.conn
            .execute_batch(&CREATE_SCHEMA.replace('?', &SCHEMA_VERSION.to_string()))
            .map_err(|e| Error::Storage(format!("failed to create schema: {}", e)))?;
        Ok(())
    }

    // ========================================================================
    // User directory (read-only projection; writes come from registration)
    // ========================================================================

    /// Sync a user projection row from the external registration store.
    ///
    /// `(user_id, kem_pk, sig_pk)` is immutable post-registration, so an
    /// existing row is never overwritten.
    pub fn insert_user(
        &self,
        id: i64,
        username: &str,
        kem_public_key: &KemPublicKey,
        sig_public_key: &SigPublicKey,
    ) -> Result<()> {
        let now = chrono::Utc::now().timestamp();
        self.conn
            .execute(
                r#"
                INSERT OR IGNORE INTO users (id, username, kem_public_key, sig_public_key, created_at)
                VALUES (?, ?, ?, ?, ?)
                "#,
                params![
                    id,
                    username,
                    kem_public_key.as_bytes(),
                    sig_public_key.as_bytes(),
                    now
                ],
            )
            .map_err(|e| Error::Storage(format!("failed to insert user: {}", e)))?;
        Ok(())
    }

    /// Look up a user by id.
    pub fn get_user(&self, id: i64) -> Result<Option<UserRecord>> {
        self.query_user("SELECT id, username, kem_public_key, sig_public_key FROM users WHERE id = ?", params![id])
    }

    /// Look up a user by username.
    pub fn get_user_by_username(&self, username: &str) -> Result<Option<UserRecord>> {
        self.query_user(
            "SELECT id, username, kem_public_key, sig_public_key FROM users WHERE username = ?",
            params![username],
        )
    }

    fn query_user(
        &self,
        sql: &str,
        bind: impl rusqlite::Params,
    ) -> Result<Option<UserRecord>> {
        let mut stmt = self
            .conn
            .prepare(sql)
            .map_err(|e| Error::Storage(e.to_string()))?;

        let result = stmt.query_row(bind, |row| {
            let id: i64 = row.get(0)?;
            let username: String = row.get(1)?;
            let kem: Vec<u8> = row.get(2)?;
            let sig: Vec<u8> = row.get(3)?;
            Ok((id, username, kem, sig))
        });

        match result {
            Ok((id, username, kem, sig)) => Ok(Some(UserRecord {
                id,
                username,
                kem_public_key: KemPublicKey::from_bytes(&kem)?,
                sig_public_key: SigPublicKey::from_bytes(&sig)?,
            })),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(Error::Storage(e.to_string())),
        }
    }

    // ========================================================================
    // Friendship state machine
    // ========================================================================

    /// Create (or revive) a friend request from `sender_id` to the named
    /// receiver.
    ///
    /// Valid iff sender != receiver, no friendship exists, and no pending
    /// request exists in either direction. A previously rejected row for
    /// the same ordered pair is reused, keeping requests unique per
    /// ordered pair while allowing re-requests.
    pub fn create_friend_request(&self, sender_id: i64, receiver_username: &str) -> Result<i64> {
        let receiver = self
            .get_user_by_username(receiver_username)?
            .ok_or_else(|| Error::NotFound("user".into()))?;

        if receiver.id == sender_id {
            return Err(Error::Protocol("cannot send a friend request to yourself".into()));
        }
        if self.are_friends(sender_id, receiver.id)? {
            return Err(Error::Protocol("already friends".into()));
        }
        if self.pending_request_between(sender_id, receiver.id)? {
            return Err(Error::Protocol("request already pending".into()));
        }

        let now = chrono::Utc::now().timestamp();
        self.conn
            .execute(
                r#"
                INSERT INTO friend_requests (sender_id, receiver_id, status, created_at, responded_at)
                VALUES (?, ?, 'pending', ?, NULL)
                ON CONFLICT(sender_id, receiver_id)
                DO UPDATE SET status = 'pending', created_at = excluded.created_at, responded_at = NULL
                "#,
                params![sender_id, receiver.id, now],
            )
            .map_err(|e| Error::Storage(format!("failed to create request: {}", e)))?;

        let id: i64 = self
            .conn
            .query_row(
                "SELECT id FROM friend_requests WHERE sender_id = ? AND receiver_id = ?",
                params![sender_id, receiver.id],
                |row| row.get(0),
            )
            .map_err(|e| Error::Storage(e.to_string()))?;
        Ok(id)
    }

    fn pending_request_between(&self, a: i64, b: i64) -> Result<bool> {
        let count: i64 = self
            .conn
            .query_row(
                r#"
                SELECT COUNT(*) FROM friend_requests
                WHERE status = 'pending'
                  AND ((sender_id = ?1 AND receiver_id = ?2) OR (sender_id = ?2 AND receiver_id = ?1))
                "#,
                params![a, b],
                |row| row.get(0),
            )
            .map_err(|e| Error::Storage(e.to_string()))?;
        Ok(count > 0)
    }

    /// Fetch the `(sender_id, receiver_id, status)` of a request.
    pub fn get_request(&self, request_id: i64) -> Result<Option<(i64, i64, FriendRequestStatus)>> {
        let result = self.conn.query_row(
            "SELECT sender_id, receiver_id, status FROM friend_requests WHERE id = ?",
            params![request_id],
            |row| {
                let sender: i64 = row.get(0)?;
                let receiver: i64 = row.get(1)?;
                let status: String = row.get(2)?;
                Ok((sender, receiver, status))
            },
        );
        match result {
            Ok((s, r, st)) => Ok(Some((s, r, FriendRequestStatus::parse(&st)))),
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(Error::Storage(e.to_string())),
        }
    }

    /// List pending requests addressed to `receiver_id`.
    pub fn pending_requests(&self, receiver_id: i64) -> Result<Vec<PendingRequest>> {
        let mut stmt = self
            .conn
            .prepare(
                r#"
                SELECT r.id, r.sender_id, u.username, r.created_at
                FROM friend_requests r
                JOIN users u ON u.id = r.sender_id
                WHERE r.receiver_id = ? AND r.status = 'pending'
                ORDER BY r.created_at ASC
                "#,
            )
            .map_err(|e| Error::Storage(e.to_string()))?;

        let rows = stmt
            .query_map(params![receiver_id], |row| {
                Ok(PendingRequest {
                    id: row.get(0)?,
                    sender_id: row.get(1)?,
                    username: row.get(2)?,
                    created_at: row.get(3)?,
                })
            })
            .map_err(|e| Error::Storage(e.to_string()))?;

        let mut requests = Vec::new();
        for row in rows {
            requests.push(row.map_err(|e| Error::Storage(e.to_string()))?);
        }
        Ok(requests)
    }

    /// Accept a pending request addressed to `caller_id`.
    ///
    /// Creates the canonical friendship row and marks the request accepted
    /// in one transaction. A uniqueness race on the friendship INSERT
    /// rolls the whole transition back.
    pub fn accept_request(&mut self, request_id: i64, caller_id: i64) -> Result<()> {
        let (sender_id, receiver_id, status) = self
            .get_request(request_id)?
            .ok_or_else(|| Error::NotFound("friend request".into()))?;
        if receiver_id != caller_id {
            return Err(Error::Unauthorized);
        }
        if status != FriendRequestStatus::Pending {
            return Err(Error::Protocol("request is not pending".into()));
        }

        let now = chrono::Utc::now().timestamp();
        let (low, high) = canonical_pair(sender_id, receiver_id);

        let tx = self
            .conn
            .transaction()
            .map_err(|e| Error::Storage(e.to_string()))?;

        tx.execute(
            "INSERT INTO friendships (user_low, user_high, created_at) VALUES (?, ?, ?)",
            params![low, high, now],
        )
        .map_err(|e| Error::Storage(format!("failed to create friendship: {}", e)))?;

        tx.execute(
            "UPDATE friend_requests SET status = 'accepted', responded_at = ? WHERE id = ?",
            params![now, request_id],
        )
        .map_err(|e| Error::Storage(e.to_string()))?;

        tx.commit().map_err(|e| Error::Storage(e.to_string()))?;
        Ok(())
    }

    /// Reject a pending request addressed to `caller_id`.
    pub fn reject_request(&self, request_id: i64, caller_id: i64) -> Result<()> {
        let (_, receiver_id, status) = self
            .get_request(request_id)?
            .ok_or_else(|| Error::NotFound("friend request".into()))?;
        if receiver_id != caller_id {
            return Err(Error::Unauthorized);
        }
        if status != FriendRequestStatus::Pending {
            return Err(Error::Protocol("request is not pending".into()));
        }

        let now = chrono::Utc::now().timestamp();
        self.conn
            .execute(
                "UPDATE friend_requests SET status = 'rejected', responded_at = ? WHERE id = ?",
                params![now, request_id],
            )
            .map_err(|e| Error::Storage(e.to_string()))?;
        Ok(())
    }

    /// Remove an existing friendship. Returns an error if none exists.
    ///
    /// Removal does not create a request and does not block future
    /// requests.
    pub fn remove_friend(&self, a: i64, b: i64) -> Result<()> {
        let (low, high) = canonical_pair(a, b);
        let rows = self
            .conn
            .execute(
                "DELETE FROM friendships WHERE user_low = ? AND user_high = ?",
                params![low, high],
            )
            .map_err(|e| Error::Storage(e.to_string()))?;
        if rows == 0 {
            return Err(Error::NotFound("friendship".into()));
        }
        Ok(())
    }

    /// Whether a friendship exists for the unordered pair `{a, b}`.
    pub fn are_friends(&self, a: i64, b: i64) -> Result<bool> {
        if a == b {
            // No self-friendship can exist; the CHECK constraint forbids it.
            return Ok(false);
        }
        let (low, high) = canonical_pair(a, b);
        let count: i64 = self
            .conn
            .query_row(
                "SELECT COUNT(*) FROM friendships WHERE user_low = ? AND user_high = ?",
                params![low, high],
                |row| row.get(0),
            )
            .map_err(|e| Error::Storage(e.to_string()))?;
        Ok(count > 0)
    }

    /// List a user's friends.
    pub fn list_friends(&self, user_id: i64) -> Result<Vec<FriendInfo>> {
        let mut stmt = self
            .conn
            .prepare(
                r#"
                SELECT CASE WHEN f.user_low = ?1 THEN f.user_high ELSE f.user_low END AS friend_id,
                       u.username, f.created_at
                FROM friendships f
                JOIN users u ON u.id = (CASE WHEN f.user_low = ?1 THEN f.user_high ELSE f.user_low END)
                WHERE f.user_low = ?1 OR f.user_high = ?1
                ORDER BY f.created_at ASC
                "#,
            )
            .map_err(|e| Error::Storage(e.to_string()))?;

        let rows = stmt
            .query_map(params![user_id], |row| {
                Ok(FriendInfo {
                    friend_id: row.get(0)?,
                    username: row.get(1)?,
                    created_at: row.get(2)?,
                })
            })
            .map_err(|e| Error::Storage(e.to_string()))?;

        let mut friends = Vec::new();
        for row in rows {
            friends.push(row.map_err(|e| Error::Storage(e.to_string()))?);
        }
        Ok(friends)
    }

    /// Count friendship rows for a pair (testing hook for the uniqueness
    /// invariant).
    pub fn friendship_row_count(&self, a: i64, b: i64) -> Result<i64> {
        let (low, high) = canonical_pair(a, b);
        self.conn
            .query_row(
                "SELECT COUNT(*) FROM friendships WHERE user_low = ? AND user_high = ?",
                params![low, high],
                |row| row.get(0),
            )
            .map_err(|e| Error::Storage(e.to_string()))
    }
}
