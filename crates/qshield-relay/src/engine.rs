//! The relay's event-processing pipeline.
//!
//! Every inbound event first passes the per-user event limiter, which
//! bounds the CPU-bound signature verification a flooding authenticated
//! sender could trigger. A limited event gets a retryable `rate_limited`
//! error; the connection stays up.
//!
//! Past the limiter, checks run strictly in order and the first failure
//! wins, each with its own wire code:
//!
//! 1. the sender claims its own authenticated id
//! 2. the envelope is complete (encryption is mandatory)
//! 3. the encoded payload is within bounds
//! 4. a friendship authorizes the pair
//! 5. the sender's signature verifies over the relay-reconstructed
//!    canonical payload - never over a client-supplied string
//! 6. the receiver's room has at least one live connection
//!
//! Signature verification and the friendship lookup happen before any
//! emit; this order is part of the protocol and must not change. The
//! relay never stores an envelope: an offline recipient is a sender-
//! visible failure.

use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use qshield_core::crypto::{self, Signature};
use qshield_core::envelope::{
    Envelope, MAX_FILE_DATA_B64, MAX_FILE_SIZE, MAX_MESSAGE_CIPHERTEXT_B64,
};
use serde_json::json;
use tracing::{debug, warn};

use crate::models::{AppState, SendFilePayload, SendMessagePayload, WsEvent};

/// A rejected event, by wire code.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RelayError {
    /// The user exceeded the event-layer rate limit. Retryable; the
    /// connection is not dropped.
    RateLimited,
    /// The claimed sender is not the authenticated connection user.
    UnauthorizedSender,
    /// One or more envelope fields are empty.
    IncompleteEnvelope,
    /// The encoded bundle exceeds the hard size cap.
    PayloadTooLarge,
    /// No friendship authorizes this pair.
    NotFriend,
    /// The sender's signature does not verify.
    BadSignature,
    /// No live connection in the receiver's room.
    RecipientOffline,
    /// Storage or lookup failure; details stay server-side.
    Internal,
}

impl RelayError {
    /// The error code sent to the client.
    pub fn code(&self) -> &'static str {
        match self {
            Self::RateLimited => "rate_limited",
            Self::UnauthorizedSender => "unauthorized_sender",
            Self::IncompleteEnvelope => "incomplete_envelope",
            Self::PayloadTooLarge => "payload_too_large",
            Self::NotFriend => "not_friend",
            Self::BadSignature => "bad_signature",
            Self::RecipientOffline => "recipient_offline",
            Self::Internal => "internal_error",
        }
    }
}

/// Outcome of a successfully relayed event: the ack for the sender.
#[derive(Debug)]
pub struct Delivered {
    /// Correlation id generated by the relay.
    pub id: String,
    /// How many of the receiver's connections got the emit.
    pub connections: usize,
}

/// Authorize and deliver a `send_message` event.
pub async fn handle_send_message(
    state: &AppState,
    conn_user_id: i64,
    msg: &SendMessagePayload,
) -> Result<Delivered, RelayError> {
    if !state.event_limiter.check(conn_user_id).await {
        return Err(RelayError::RateLimited);
    }

    if msg.sender_id != conn_user_id {
        warn!(conn_user_id, claimed = msg.sender_id, "sender id forgery attempt");
        return Err(RelayError::UnauthorizedSender);
    }

    let envelope = Envelope::from_parts(
        msg.kem_ciphertext.clone(),
        msg.iv.clone(),
        msg.ciphertext.clone(),
        msg.auth_tag.clone(),
        msg.signature.clone(),
    )
    .map_err(|_| RelayError::IncompleteEnvelope)?;

    if msg.ciphertext.len() > MAX_MESSAGE_CIPHERTEXT_B64 {
        return Err(RelayError::PayloadTooLarge);
    }

    authorize(state, msg.sender_id, msg.receiver_id, &envelope).await?;

    let id = hex::encode(crypto::random_bytes::<16>());
    let timestamp = chrono::Utc::now().timestamp();
    let event = WsEvent::new(
        "receive_message",
        json!({
            "sender_id": msg.sender_id,
            "receiver_id": msg.receiver_id,
            "kem_ciphertext": msg.kem_ciphertext,
            "iv": msg.iv,
            "ciphertext": msg.ciphertext,
            "auth_tag": msg.auth_tag,
            "signature": msg.signature,
            "timestamp": timestamp,
            "id": id,
        }),
    );

    let connections = state.rooms.emit(msg.receiver_id, &event).await;
    if connections == 0 {
        return Err(RelayError::RecipientOffline);
    }

    debug!(sender = msg.sender_id, receiver = msg.receiver_id, connections, "message relayed");
    Ok(Delivered { id, connections })
}

/// Authorize and deliver a `send_file` event.
pub async fn handle_send_file(
    state: &AppState,
    conn_user_id: i64,
    file: &SendFilePayload,
) -> Result<Delivered, RelayError> {
    if !state.event_limiter.check(conn_user_id).await {
        return Err(RelayError::RateLimited);
    }

    if file.sender_id != conn_user_id {
        warn!(conn_user_id, claimed = file.sender_id, "sender id forgery attempt");
        return Err(RelayError::UnauthorizedSender);
    }

    let envelope = Envelope::from_parts(
        file.kem_ciphertext.clone(),
        file.iv.clone(),
        file.file_data.clone(),
        file.auth_tag.clone(),
        file.signature.clone(),
    )
    .map_err(|_| RelayError::IncompleteEnvelope)?;

    // Exact bound on the declared raw size; base64 granularity makes the
    // encoded length a coarser backstop.
    if file.file_size > MAX_FILE_SIZE as u64 || file.file_data.len() > MAX_FILE_DATA_B64 {
        return Err(RelayError::PayloadTooLarge);
    }

    authorize(state, file.sender_id, file.receiver_id, &envelope).await?;

    let file_id = hex::encode(crypto::random_bytes::<16>());
    let timestamp = chrono::Utc::now().timestamp();
    let event = WsEvent::new(
        "receive_file",
        json!({
            "sender_id": file.sender_id,
            "receiver_id": file.receiver_id,
            "file_name": file.file_name,
            "file_size": file.file_size,
            "file_type": file.file_type,
            "file_data": file.file_data,
            "kem_ciphertext": file.kem_ciphertext,
            "iv": file.iv,
            "auth_tag": file.auth_tag,
            "signature": file.signature,
            "timestamp": timestamp,
            "file_id": file_id,
        }),
    );

    let connections = state.rooms.emit(file.receiver_id, &event).await;
    if connections == 0 {
        return Err(RelayError::RecipientOffline);
    }

    debug!(sender = file.sender_id, receiver = file.receiver_id, connections, "file relayed");
    Ok(Delivered {
        id: file_id,
        connections,
    })
}

/// Friendship check, then signature verification over the canonical
/// payload the relay reconstructs itself.
async fn authorize(
    state: &AppState,
    sender_id: i64,
    receiver_id: i64,
    envelope: &Envelope,
) -> Result<(), RelayError> {
    let (is_friend, sender_sig_pk) = {
        let db = state.database.lock().await;
        let is_friend = db
            .are_friends(sender_id, receiver_id)
            .map_err(|_| RelayError::Internal)?;
        let sig_pk = db
            .get_user(sender_id)
            .map_err(|_| RelayError::Internal)?
            .map(|user| user.sig_public_key);
        (is_friend, sig_pk)
    };

    if !is_friend {
        return Err(RelayError::NotFriend);
    }

    let sig_pk = sender_sig_pk.ok_or(RelayError::Internal)?;
    let sig_bytes = BASE64
        .decode(&envelope.sig)
        .map_err(|_| RelayError::BadSignature)?;
    let sig = Signature::from_bytes(&sig_bytes).map_err(|_| RelayError::BadSignature)?;
    if !crypto::verify(&envelope.signing_payload(), &sig, &sig_pk) {
        return Err(RelayError::BadSignature);
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use qshield_core::auth::TokenSigner;
    use qshield_core::crypto::{kem_keygen, sig_keygen, KemSecretKey, SigSecretKey};
    use qshield_core::storage::{Database, DatabaseConfig};
    use std::sync::Arc;
    use tokio::sync::{mpsc, Mutex as TokioMutex};

    use crate::rate_limit::RateLimiter;
    use crate::rooms::Rooms;

    struct Fixture {
        state: AppState,
        alice_kem_sk: KemSecretKey,
        alice_sig_sk: SigSecretKey,
        bob_kem_sk: KemSecretKey,
    }

    /// Alice (10) and Bob (11), registered and friends.
    fn fixture() -> Fixture {
        let mut db = Database::open(&DatabaseConfig {
            path: String::new(),
            in_memory: true,
        })
        .unwrap();

        let (alice_kem_pk, alice_kem_sk) = kem_keygen().unwrap();
        let (alice_sig_pk, alice_sig_sk) = sig_keygen();
        let (bob_kem_pk, bob_kem_sk) = kem_keygen().unwrap();
        let (bob_sig_pk, _bob_sig_sk) = sig_keygen();

        db.insert_user(10, "alice", &alice_kem_pk, &alice_sig_pk).unwrap();
        db.insert_user(11, "bob", &bob_kem_pk, &bob_sig_pk).unwrap();
        let req = db.create_friend_request(10, "bob").unwrap();
        db.accept_request(req, 11).unwrap();

        let state = AppState {
            database: Arc::new(TokioMutex::new(db)),
            rooms: Rooms::new(),
            token_signer: TokenSigner::new(b"test-secret"),
            friend_request_limiter: RateLimiter::per_window(10, 3600),
            http_limiter: RateLimiter::per_window(20, 60),
            event_limiter: RateLimiter::per_window(60, 60),
            allowed_origins: Vec::new(),
        };

        Fixture {
            state,
            alice_kem_sk,
            alice_sig_sk,
            bob_kem_sk,
        }
    }

    fn message_from_alice(fx: &Fixture, plaintext: &[u8]) -> SendMessagePayload {
        // Alice encrypts to Bob's public key from the directory.
        let bob_kem_pk = {
            let db = fx.state.database.try_lock().unwrap();
            db.get_user(11).unwrap().unwrap().kem_public_key
        };
        let envelope = Envelope::seal(plaintext, &bob_kem_pk, &fx.alice_sig_sk).unwrap();
        SendMessagePayload {
            sender_id: 10,
            receiver_id: 11,
            kem_ciphertext: envelope.kem_ct,
            iv: envelope.iv,
            ciphertext: envelope.ciphertext,
            auth_tag: envelope.tag,
            signature: envelope.sig,
        }
    }

    async fn connect(state: &AppState, user_id: i64) -> mpsc::UnboundedReceiver<String> {
        let (tx, rx) = mpsc::unbounded_channel();
        state.rooms.join(user_id, tx).await;
        rx
    }

    #[tokio::test]
    async fn test_happy_path_delivers_and_decrypts() {
        let fx = fixture();
        let mut bob_rx = connect(&fx.state, 11).await;

        let msg = message_from_alice(&fx, b"hello");
        let delivered = handle_send_message(&fx.state, 10, &msg).await.unwrap();
        assert_eq!(delivered.connections, 1);

        let raw = bob_rx.recv().await.unwrap();
        let event: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(event["type"], "receive_message");
        assert_eq!(event["data"]["sender_id"], 10);

        // Bob reconstructs the envelope and decrypts.
        let alice_sig_pk = {
            let db = fx.state.database.lock().await;
            db.get_user(10).unwrap().unwrap().sig_public_key
        };
        let envelope = Envelope::from_parts(
            event["data"]["kem_ciphertext"].as_str().unwrap(),
            event["data"]["iv"].as_str().unwrap(),
            event["data"]["ciphertext"].as_str().unwrap(),
            event["data"]["auth_tag"].as_str().unwrap(),
            event["data"]["signature"].as_str().unwrap(),
        )
        .unwrap();
        let plaintext = envelope.open(&fx.bob_kem_sk, &alice_sig_pk).unwrap();
        assert_eq!(&*plaintext, b"hello");
        let _ = &fx.alice_kem_sk;
    }

    #[tokio::test]
    async fn test_forged_sender_rejected_before_anything_else() {
        let fx = fixture();
        let mut bob_rx = connect(&fx.state, 11).await;

        let mut msg = message_from_alice(&fx, b"hello");
        msg.sender_id = 11;
        // Break the signature too: the sender check must still win.
        msg.signature = String::new();

        let err = handle_send_message(&fx.state, 10, &msg).await.unwrap_err();
        assert_eq!(err, RelayError::UnauthorizedSender);
        assert!(bob_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_incomplete_envelope_rejected() {
        let fx = fixture();
        let mut msg = message_from_alice(&fx, b"hello");
        msg.ciphertext = String::new();

        let err = handle_send_message(&fx.state, 10, &msg).await.unwrap_err();
        assert_eq!(err, RelayError::IncompleteEnvelope);
    }

    #[tokio::test]
    async fn test_not_friend_rejected_before_signature_check() {
        let fx = fixture();
        let _bob_rx = connect(&fx.state, 11).await;
        {
            let db = fx.state.database.lock().await;
            db.remove_friend(10, 11).unwrap();
        }

        let mut msg = message_from_alice(&fx, b"hello");
        // Also corrupt the signature; the friendship check comes first.
        msg.signature = msg.signature.replace('A', "B");
        let err = handle_send_message(&fx.state, 10, &msg).await.unwrap_err();
        assert_eq!(err, RelayError::NotFriend);
    }

    #[tokio::test]
    async fn test_bad_signature_rejected() {
        let fx = fixture();
        let _bob_rx = connect(&fx.state, 11).await;

        let mut msg = message_from_alice(&fx, b"hello");
        let mut sig = BASE64.decode(&msg.signature).unwrap();
        let last = sig.len() - 1;
        sig[last] ^= 0x01;
        msg.signature = BASE64.encode(sig);

        let err = handle_send_message(&fx.state, 10, &msg).await.unwrap_err();
        assert_eq!(err, RelayError::BadSignature);
    }

    #[tokio::test]
    async fn test_tampered_ciphertext_fails_signature() {
        // The signature covers the canonical payload, so a swapped
        // ciphertext dies at the relay, not at the recipient.
        let fx = fixture();
        let _bob_rx = connect(&fx.state, 11).await;

        let mut msg = message_from_alice(&fx, b"hello");
        let mut ct = BASE64.decode(&msg.ciphertext).unwrap();
        ct[0] ^= 0xFF;
        msg.ciphertext = BASE64.encode(ct);

        let err = handle_send_message(&fx.state, 10, &msg).await.unwrap_err();
        assert_eq!(err, RelayError::BadSignature);
    }

    #[tokio::test]
    async fn test_recipient_offline_is_a_failure_and_nothing_is_stored() {
        let fx = fixture();

        let msg = message_from_alice(&fx, b"hello");
        let err = handle_send_message(&fx.state, 10, &msg).await.unwrap_err();
        assert_eq!(err, RelayError::RecipientOffline);

        // Bob connects afterwards and must see nothing.
        let mut bob_rx = connect(&fx.state, 11).await;
        assert!(bob_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_multi_device_delivery() {
        let fx = fixture();
        let mut rx1 = connect(&fx.state, 11).await;
        let mut rx2 = connect(&fx.state, 11).await;

        let msg = message_from_alice(&fx, b"hello");
        let delivered = handle_send_message(&fx.state, 10, &msg).await.unwrap();
        assert_eq!(delivered.connections, 2);
        assert!(rx1.recv().await.is_some());
        assert!(rx2.recv().await.is_some());
    }

    #[tokio::test]
    async fn test_event_layer_rate_limited() {
        let mut fx = fixture();
        fx.state.event_limiter = RateLimiter::per_window(1, 3600);
        let mut bob_rx = connect(&fx.state, 11).await;

        let msg = message_from_alice(&fx, b"one");
        assert!(handle_send_message(&fx.state, 10, &msg).await.is_ok());
        assert!(bob_rx.recv().await.is_some());

        // The limiter gates before the pipeline; the envelope is valid.
        let err = handle_send_message(&fx.state, 10, &msg).await.unwrap_err();
        assert_eq!(err, RelayError::RateLimited);
        assert_eq!(err.code(), "rate_limited");
        assert!(bob_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_self_send_fails_friendship_check() {
        let fx = fixture();
        let _alice_rx = connect(&fx.state, 10).await;

        let mut msg = message_from_alice(&fx, b"hello");
        msg.receiver_id = 10;
        let err = handle_send_message(&fx.state, 10, &msg).await.unwrap_err();
        assert_eq!(err, RelayError::NotFriend);
    }

    #[tokio::test]
    async fn test_file_pipeline_and_size_boundary() {
        let fx = fixture();
        let mut bob_rx = connect(&fx.state, 11).await;

        let bob_kem_pk = {
            let db = fx.state.database.lock().await;
            db.get_user(11).unwrap().unwrap().kem_public_key
        };
        let file_bytes = b"file contents";
        let plaintext = BASE64.encode(file_bytes);
        let envelope =
            Envelope::seal(plaintext.as_bytes(), &bob_kem_pk, &fx.alice_sig_sk).unwrap();

        let mut file = SendFilePayload {
            sender_id: 10,
            receiver_id: 11,
            file_name: "notes.txt".into(),
            file_size: file_bytes.len() as u64,
            file_type: "text/plain".into(),
            file_data: envelope.ciphertext,
            kem_ciphertext: envelope.kem_ct,
            iv: envelope.iv,
            auth_tag: envelope.tag,
            signature: envelope.sig,
        };

        let delivered = handle_send_file(&fx.state, 10, &file).await.unwrap();
        assert_eq!(delivered.connections, 1);
        let raw = bob_rx.recv().await.unwrap();
        let event: serde_json::Value = serde_json::from_str(&raw).unwrap();
        assert_eq!(event["type"], "receive_file");
        assert_eq!(event["data"]["file_name"], "notes.txt");

        // Exactly 10 MiB declared: accepted as far as the size check goes.
        file.file_size = MAX_FILE_SIZE as u64;
        assert!(handle_send_file(&fx.state, 10, &file).await.is_ok());

        // One byte over: rejected.
        file.file_size = MAX_FILE_SIZE as u64 + 1;
        let err = handle_send_file(&fx.state, 10, &file).await.unwrap_err();
        assert_eq!(err, RelayError::PayloadTooLarge);
    }
}
