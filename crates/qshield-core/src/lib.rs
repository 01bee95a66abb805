//! # QuantumShield Core
//!
//! End-to-end encrypted, ephemeral one-to-one messaging built on NIST
//! post-quantum primitives: ML-KEM-1024 for key encapsulation and
//! Falcon-1024 for signatures, composed with AES-256-GCM for bulk
//! encryption.
//!
//! ## Security Model
//!
//! - Every message encapsulates a fresh shared secret; nothing is
//!   decryptable without the recipient's long-lived KEM secret key.
//! - Every envelope is signed; the relay verifies before forwarding and
//!   refuses anything unsigned, partial or unauthorized.
//! - Delivery is real-time-only: no component of this crate ever persists
//!   an envelope on behalf of the relay.
//! - Secret keys rest encrypted under a password-derived KEK and are
//!   zeroized when they leave scope.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────┐
//! │             relay / client              │
//! ├─────────────────────────────────────────┤
//! │  keystore  │  storage  │     auth       │
//! ├─────────────────────────────────────────┤
//! │           envelope (wire)               │
//! ├─────────────────────────────────────────┤
//! │               crypto                    │
//! └─────────────────────────────────────────┘
//! ```

#![forbid(unsafe_code)]
#![warn(missing_docs, rust_2018_idioms, clippy::all)]
#![deny(clippy::unwrap_used, clippy::expect_used)]

pub mod auth;
pub mod crypto;
pub mod envelope;
pub mod error;
pub mod keystore;
pub mod logging;
pub mod storage;

pub use error::{Error, Result};

/// Library version.
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
