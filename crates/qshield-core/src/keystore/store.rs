//! Keyed record store backing the client keystore.
//!
//! Three record families per user, JSON bodies with base64 byte fields:
//!
//! - `secrets_{username}`: `{salt, iv, ciphertext}` where ciphertext is
//!   the KEK-encrypted secret key blob (tag appended)
//! - `meta_salt_{username}`: `{salt}` for KEK re-derivation on re-login
//! - `meta_pubkeys_{username}`: `{kem_public, sig_public}` in plaintext

use crate::error::{Error, Result};
use rusqlite::{params, Connection};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// The `secrets_{username}` record: everything needed to unseal the
/// secret keys given the password.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecretsRecord {
    /// PBKDF2 salt, base64 (16 bytes).
    pub salt: String,
    /// AES-GCM IV, base64 (12 bytes).
    pub iv: String,
    /// Encrypted secret-key blob with the tag appended, base64.
    pub ciphertext: String,
}

/// The `meta_salt_{username}` record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SaltRecord {
    /// PBKDF2 salt, base64 (16 bytes).
    pub salt: String,
}

/// The `meta_pubkeys_{username}` record. Stored in plaintext; integrity
/// of these keys rests on the enrollment channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PubkeysRecord {
    /// ML-KEM-1024 public key, base64.
    pub kem_public: String,
    /// Falcon-1024 public key, base64.
    pub sig_public: String,
}

/// Storage key for a user's secrets record.
pub fn secrets_key(username: &str) -> String {
    format!("secrets_{username}")
}

/// Storage key for a user's salt record.
pub fn salt_key(username: &str) -> String {
    format!("meta_salt_{username}")
}

/// Storage key for a user's public keys record.
pub fn pubkeys_key(username: &str) -> String {
    format!("meta_pubkeys_{username}")
}

/// Persistent keyed record store.
pub struct KeystoreStore {
    conn: Connection,
}

impl KeystoreStore {
    /// Open or create the record store.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let conn = Connection::open(path)?;
        Self::init(conn)
    }

    /// Open an in-memory store (for testing).
    pub fn open_in_memory() -> Result<Self> {
        let conn = Connection::open_in_memory()?;
        Self::init(conn)
    }

    fn init(conn: Connection) -> Result<Self> {
        conn.execute_batch(
            r#"
            CREATE TABLE IF NOT EXISTS records (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
            );
            "#,
        )?;
        Ok(Self { conn })
    }

    /// Store a record, replacing any existing one under the same key.
    pub fn put<T: Serialize>(&self, key: &str, record: &T) -> Result<()> {
        let value = serde_json::to_string(record).map_err(|e| Error::Encoding(e.to_string()))?;
        self.conn
            .execute(
                "INSERT OR REPLACE INTO records (key, value) VALUES (?, ?)",
                params![key, value],
            )
            .map_err(|e| Error::Storage(e.to_string()))?;
        Ok(())
    }

    /// Fetch a record by key.
    pub fn get<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>> {
        let result = self.conn.query_row(
            "SELECT value FROM records WHERE key = ?",
            params![key],
            |row| row.get::<_, String>(0),
        );
        match result {
            Ok(value) => {
                let record =
                    serde_json::from_str(&value).map_err(|e| Error::Encoding(e.to_string()))?;
                Ok(Some(record))
            }
            Err(rusqlite::Error::QueryReturnedNoRows) => Ok(None),
            Err(e) => Err(Error::Storage(e.to_string())),
        }
    }

    /// Whether a record exists under the key.
    pub fn contains(&self, key: &str) -> Result<bool> {
        let count: i64 = self
            .conn
            .query_row(
                "SELECT COUNT(*) FROM records WHERE key = ?",
                params![key],
                |row| row.get(0),
            )
            .map_err(|e| Error::Storage(e.to_string()))?;
        Ok(count > 0)
    }

    /// Delete a record. Missing keys are not an error.
    pub fn delete(&self, key: &str) -> Result<()> {
        self.conn
            .execute("DELETE FROM records WHERE key = ?", params![key])
            .map_err(|e| Error::Storage(e.to_string()))?;
        Ok(())
    }
}
