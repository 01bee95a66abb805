//! Database schema definitions.

/// Schema version for migrations.
pub const SCHEMA_VERSION: u32 = 1;

/// SQL to create the database schema.
///
/// Friendships are stored canonically as `(min, max)`; the CHECK plus the
/// UNIQUE index make "at most one row per unordered pair" a database
/// invariant rather than an application promise. Friend requests are
/// unique per ordered pair; re-requests after rejection reuse the row.
pub const CREATE_SCHEMA: &str = r#"
-- Read-only projection of registered users
CREATE TABLE IF NOT EXISTS users (
    id INTEGER PRIMARY KEY,
    username TEXT NOT NULL UNIQUE,
    kem_public_key BLOB NOT NULL,
    sig_public_key BLOB NOT NULL,
    created_at INTEGER NOT NULL
);

CREATE INDEX IF NOT EXISTS idx_users_username ON users(username);

-- Friend requests, one row per ordered (sender, receiver) pair
CREATE TABLE IF NOT EXISTS friend_requests (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    sender_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
    receiver_id INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
    status TEXT NOT NULL DEFAULT 'pending',
    created_at INTEGER NOT NULL,
    responded_at INTEGER,
    UNIQUE(sender_id, receiver_id),
    CHECK(sender_id != receiver_id)
);

CREATE INDEX IF NOT EXISTS idx_requests_receiver ON friend_requests(receiver_id, status);

-- Friendships, one row per unordered pair, stored as (min, max)
CREATE TABLE IF NOT EXISTS friendships (
    id INTEGER PRIMARY KEY AUTOINCREMENT,
    user_low INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
    user_high INTEGER NOT NULL REFERENCES users(id) ON DELETE CASCADE,
    created_at INTEGER NOT NULL,
    UNIQUE(user_low, user_high),
    CHECK(user_low < user_high)
);

CREATE INDEX IF NOT EXISTS idx_friendships_low ON friendships(user_low);
CREATE INDEX IF NOT EXISTS idx_friendships_high ON friendships(user_high);

-- Settings table
CREATE TABLE IF NOT EXISTS settings (
    key TEXT PRIMARY KEY,
    value BLOB NOT NULL
);

-- Schema version
INSERT OR REPLACE INTO settings (key, value) VALUES ('schema_version', ?);
"#;
