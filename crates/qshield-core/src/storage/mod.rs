//! Server-side storage: user directory projection and friendship graph.
//!
//! The relay consults this database for exactly two things before
//! forwarding an event: the sender's signature public key and the
//! friendship ACL. Users are a read-only projection maintained by the
//! external registration flow; `(user_id, kem_pk, sig_pk)` is immutable
//! post-registration. Envelopes are never written here.

mod database;
mod schema;

pub use database::{Database, DatabaseConfig, FriendInfo, FriendRequestStatus, PendingRequest, UserRecord};
