//! Client-side secure keystore.
//!
//! Long-lived secret keys rest encrypted under a password-derived KEK
//! (PBKDF2-HMAC-SHA256, 600 000 iterations). An unlocked session holds the
//! KEK in memory with a 30-minute inactivity timeout and mirrors it into
//! session-scoped storage so a page reload inside the same tab does not
//! force a re-login. Plaintext secret keys leave the keystore only by
//! value, in zeroized containers, for the duration of a crypto operation.

mod queue;
mod session;
mod store;

pub use queue::{OfflineQueue, QueuedEnvelope, CLEANUP_INTERVAL_SECS, QUEUE_TTL_SECS};
pub use session::{MemoryMirror, MirrorRecord, Session, SessionMirror};
pub use store::{KeystoreStore, PubkeysRecord, SaltRecord, SecretsRecord};

use crate::crypto::{self, Iv, KemPublicKey, KemSecretKey, SigPublicKey, SigSecretKey, IV_SIZE, TAG_SIZE};
use crate::error::{Error, Result};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use hmac::Hmac;
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use zeroize::Zeroizing;

/// PBKDF2 iterations for KEK derivation. Part of the stored format.
pub const KEY_DERIVATION_ITERATIONS: u32 = 600_000;

/// Salt length in bytes. Part of the stored format.
pub const SALT_SIZE: usize = 16;

/// KEK length in bytes (AES-256).
pub const KEK_SIZE: usize = 32;

/// Inactivity timeout: 30 minutes.
pub const SESSION_TIMEOUT_SECS: i64 = 30 * 60;

/// Derive the key-encrypting key from a password and salt.
///
/// # Panics
/// Does not panic: PBKDF2 with a 32-byte output cannot fail.
pub fn derive_kek(password: &[u8], salt: &[u8]) -> Zeroizing<[u8; KEK_SIZE]> {
    let mut key = Zeroizing::new([0u8; KEK_SIZE]);

    // PBKDF2 only fails if the output length exceeds 2^32 - 1 blocks,
    // which a 32-byte output cannot. On the unreachable branch the key
    // stays zeroed and any later decrypt fails safely.
    if pbkdf2::pbkdf2::<Hmac<Sha256>>(password, salt, KEY_DERIVATION_ITERATIONS, key.as_mut())
        .is_err()
    {}

    key
}

/// The one-time key seed delivered by the login endpoint.
pub struct KeyBundle {
    /// ML-KEM-1024 public key.
    pub kem_public: KemPublicKey,
    /// Falcon-1024 public key.
    pub sig_public: SigPublicKey,
    /// ML-KEM-1024 secret key.
    pub kem_secret: KemSecretKey,
    /// Falcon-1024 secret key.
    pub sig_secret: SigSecretKey,
}

/// Decrypted secret keys, returned by value for a single crypto operation.
pub struct SecretKeys {
    /// ML-KEM-1024 secret key.
    pub kem_secret: KemSecretKey,
    /// Falcon-1024 secret key.
    pub sig_secret: SigSecretKey,
}

/// Serialized form of the encrypted blob's plaintext.
#[derive(Serialize, Deserialize)]
struct SecretBlob {
    kem_secret: String,
    sig_secret: String,
}

/// The client keystore: persistent records plus the session lifecycle.
pub struct Keystore<M: SessionMirror> {
    store: KeystoreStore,
    mirror: M,
    session: Option<Session>,
}

impl<M: SessionMirror> Keystore<M> {
    /// Create a keystore over a record store and a session mirror.
    pub fn new(store: KeystoreStore, mirror: M) -> Self {
        Self {
            store,
            mirror,
            session: None,
        }
    }

    /// First-time setup after registration: encrypt and persist the key
    /// bundle, then open a session.
    pub fn initialize(&mut self, username: &str, password: &str, bundle: &KeyBundle) -> Result<()> {
        self.initialize_at(username, password, bundle, now())
    }

    fn initialize_at(
        &mut self,
        username: &str,
        password: &str,
        bundle: &KeyBundle,
        now: i64,
    ) -> Result<()> {
        let salt: [u8; SALT_SIZE] = crypto::random_bytes();
        let kek = derive_kek(password.as_bytes(), &salt);

        let blob = Zeroizing::new(
            serde_json::to_vec(&SecretBlob {
                kem_secret: BASE64.encode(bundle.kem_secret.as_bytes()),
                sig_secret: BASE64.encode(bundle.sig_secret.as_bytes()),
            })
            .map_err(|e| Error::Encoding(e.to_string()))?,
        );

        let iv = Iv::random();
        let (mut ciphertext, tag) = crypto::encrypt(&kek, &iv, &blob)?;
        ciphertext.extend_from_slice(&tag);

        let salt_b64 = BASE64.encode(salt);
        self.store.put(
            &store::secrets_key(username),
            &SecretsRecord {
                salt: salt_b64.clone(),
                iv: BASE64.encode(iv.as_bytes()),
                ciphertext: BASE64.encode(&ciphertext),
            },
        )?;
        self.store
            .put(&store::salt_key(username), &SaltRecord { salt: salt_b64 })?;
        self.store.put(
            &store::pubkeys_key(username),
            &PubkeysRecord {
                kem_public: BASE64.encode(bundle.kem_public.as_bytes()),
                sig_public: BASE64.encode(bundle.sig_public.as_bytes()),
            },
        )?;

        self.open_session(username, kek, now)
    }

    /// Re-derive the KEK from the password and open a session, validating
    /// the password by decrypting the stored blob.
    ///
    /// A wrong password fails generically and leaves stored data intact.
    pub fn unlock(&mut self, username: &str, password: &str) -> Result<()> {
        self.unlock_at(username, password, now())
    }

    fn unlock_at(&mut self, username: &str, password: &str, now: i64) -> Result<()> {
        let salt_record: SaltRecord = self
            .store
            .get(&store::salt_key(username))?
            .ok_or_else(|| Error::NotFound("keystore record".into()))?;
        let salt = BASE64
            .decode(&salt_record.salt)
            .map_err(|e| Error::Encoding(e.to_string()))?;

        let kek = derive_kek(password.as_bytes(), &salt);

        // Decrypt-to-validate before accepting the session.
        self.decrypt_blob(username, &kek)?;
        self.open_session(username, kek, now)
    }

    /// Return the decrypted secret keys, refreshing the activity deadline.
    ///
    /// If the in-memory session is gone, attempts restoration from the
    /// session mirror (unexpired, username backed by stored records).
    /// Fails with [`Error::SessionNotInitialized`] otherwise.
    pub fn get_secret_keys(&mut self) -> Result<SecretKeys> {
        self.get_secret_keys_at(now())
    }

    fn get_secret_keys_at(&mut self, now: i64) -> Result<SecretKeys> {
        match self.session.as_ref().map(|session| session.is_expired(now)) {
            Some(true) => {
                // Expiry clears the KEK and the mirror together.
                self.clear_session()?;
                return Err(Error::SessionNotInitialized);
            }
            Some(false) => {}
            None => self.restore_from_mirror(now)?,
        }

        let session = self
            .session
            .as_mut()
            .ok_or(Error::SessionNotInitialized)?;
        session.touch(now);

        let username = session.username().to_string();
        let kek = Zeroizing::new(*session.kek());

        // Refresh the mirror so a reload keeps the extended deadline.
        self.mirror.store(&MirrorRecord {
            username: username.clone(),
            kek: BASE64.encode(kek.as_slice()),
            saved_at: now,
        })?;

        self.decrypt_blob(&username, &kek)
    }

    /// Return the stored public keys for a user.
    pub fn get_public_keys(&self, username: &str) -> Result<(KemPublicKey, SigPublicKey)> {
        let record: PubkeysRecord = self
            .store
            .get(&store::pubkeys_key(username))?
            .ok_or_else(|| Error::NotFound("public keys".into()))?;
        let kem = BASE64
            .decode(&record.kem_public)
            .map_err(|e| Error::Encoding(e.to_string()))?;
        let sig = BASE64
            .decode(&record.sig_public)
            .map_err(|e| Error::Encoding(e.to_string()))?;
        Ok((
            KemPublicKey::from_bytes(&kem)?,
            SigPublicKey::from_bytes(&sig)?,
        ))
    }

    /// Drop the in-memory KEK and clear the session mirror. Idempotent.
    pub fn clear_session(&mut self) -> Result<()> {
        self.session = None;
        self.mirror.clear()
    }

    /// Whether a live session currently holds the KEK.
    pub fn is_unlocked(&self) -> bool {
        self.session.is_some()
    }

    fn open_session(
        &mut self,
        username: &str,
        kek: Zeroizing<[u8; KEK_SIZE]>,
        now: i64,
    ) -> Result<()> {
        self.mirror.store(&MirrorRecord {
            username: username.to_string(),
            kek: BASE64.encode(kek.as_slice()),
            saved_at: now,
        })?;
        self.session = Some(Session::new(username, kek, now));
        Ok(())
    }

    fn restore_from_mirror(&mut self, now: i64) -> Result<()> {
        let record = match self.mirror.load()? {
            Some(record) => record,
            None => return Err(Error::SessionNotInitialized),
        };
        if now - record.saved_at > SESSION_TIMEOUT_SECS {
            self.mirror.clear()?;
            return Err(Error::SessionNotInitialized);
        }
        // The mirror must belong to a user this store actually holds.
        if !self.store.contains(&store::secrets_key(&record.username))? {
            self.mirror.clear()?;
            return Err(Error::SessionNotInitialized);
        }

        let kek_bytes = BASE64
            .decode(&record.kek)
            .map_err(|_| Error::SessionNotInitialized)?;
        let kek: [u8; KEK_SIZE] = kek_bytes
            .as_slice()
            .try_into()
            .map_err(|_| Error::SessionNotInitialized)?;
        self.session = Some(Session::new(record.username, Zeroizing::new(kek), now));
        Ok(())
    }

    fn decrypt_blob(&self, username: &str, kek: &[u8; KEK_SIZE]) -> Result<SecretKeys> {
        let record: SecretsRecord = self
            .store
            .get(&store::secrets_key(username))?
            .ok_or_else(|| Error::NotFound("keystore record".into()))?;

        let iv_bytes: [u8; IV_SIZE] = BASE64
            .decode(&record.iv)
            .map_err(|_| Error::DecryptionFailed)?
            .try_into()
            .map_err(|_| Error::DecryptionFailed)?;
        let mut ciphertext = BASE64
            .decode(&record.ciphertext)
            .map_err(|_| Error::DecryptionFailed)?;
        if ciphertext.len() < TAG_SIZE {
            return Err(Error::DecryptionFailed);
        }
        let tag_bytes = ciphertext.split_off(ciphertext.len() - TAG_SIZE);
        let tag: [u8; TAG_SIZE] = tag_bytes
            .as_slice()
            .try_into()
            .map_err(|_| Error::DecryptionFailed)?;

        let plaintext = crypto::decrypt(kek, &Iv::from_bytes(iv_bytes), &ciphertext, &tag)?;
        let blob: SecretBlob =
            serde_json::from_slice(&plaintext).map_err(|_| Error::DecryptionFailed)?;

        let kem_secret = BASE64
            .decode(&blob.kem_secret)
            .map_err(|_| Error::DecryptionFailed)?;
        let sig_secret = BASE64
            .decode(&blob.sig_secret)
            .map_err(|_| Error::DecryptionFailed)?;

        Ok(SecretKeys {
            kem_secret: KemSecretKey::from_bytes(&kem_secret)?,
            sig_secret: SigSecretKey::from_bytes(&sig_secret)?,
        })
    }

    #[cfg(test)]
    fn backdate_session(&mut self, seconds: i64) {
        if let Some(session) = &mut self.session {
            session.backdate(seconds);
        }
    }
}

/// Current Unix timestamp.
fn now() -> i64 {
    chrono::Utc::now().timestamp()
}
