//! Error types for QuantumShield.
//!
//! All errors are designed to avoid leaking sensitive information.
//! Cryptographic failures in particular collapse into generic messages so
//! callers cannot distinguish a signature failure from a KEM or AEAD failure.

use thiserror::Error;

/// Core error type for QuantumShield operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Cryptographic operation failed.
    /// Details are intentionally vague to prevent oracle attacks.
    #[error("cryptographic operation failed")]
    Crypto(String),

    /// The receive pipeline failed somewhere between signature check and
    /// AEAD open. Which stage failed is never surfaced.
    #[error("decryption failed")]
    DecryptionFailed,

    /// Key validation or derivation failed.
    #[error("invalid key material")]
    InvalidKey(String),

    /// Wire or event protocol violation (incomplete envelope, oversize
    /// payload, malformed event).
    #[error("protocol error")]
    Protocol(String),

    /// Encoding/decoding error.
    #[error("encoding error")]
    Encoding(String),

    /// Storage operation failed.
    #[error("storage error")]
    Storage(String),

    /// The keystore has no unlocked session and none could be restored.
    #[error("session not initialized")]
    SessionNotInitialized,

    /// Authentication failure. The sub-reason (missing, invalid, expired,
    /// user mismatch) is never revealed.
    #[error("authentication error")]
    Unauthorized,

    /// Rate limit exceeded; the caller may retry later.
    #[error("rate limit exceeded")]
    RateLimited,

    /// Resource not found.
    #[error("not found")]
    NotFound(String),
}

/// Result type alias using QuantumShield's Error.
pub type Result<T> = std::result::Result<T, Error>;

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        Error::Storage(e.to_string())
    }
}

impl From<rusqlite::Error> for Error {
    fn from(e: rusqlite::Error) -> Self {
        Error::Storage(e.to_string())
    }
}
