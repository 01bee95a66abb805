//! Authenticated encryption using AES-256-GCM.
//!
//! Ciphertext and the 128-bit authentication tag travel as separate wire
//! fields, so encryption splits the tag off and decryption rejoins it.

use crate::error::{Error, Result};
use aes_gcm::{
    aead::{Aead, KeyInit},
    Aes256Gcm, Key, Nonce,
};
use rand::RngCore;
use zeroize::Zeroizing;

/// Size of the AES key in bytes (256 bits).
pub const AES_KEY_SIZE: usize = 32;

/// Size of the IV in bytes (96 bits).
pub const IV_SIZE: usize = 12;

/// Size of the authentication tag in bytes (128 bits).
pub const TAG_SIZE: usize = 16;

/// A random IV for AES-GCM.
///
/// Must be unique per key. Random IVs are safe here because every message
/// encapsulates a fresh key.
#[derive(Clone, Copy, Debug)]
pub struct Iv([u8; IV_SIZE]);

impl Iv {
    /// Create a new random IV.
    pub fn random() -> Self {
        let mut bytes = [0u8; IV_SIZE];
        rand::rngs::OsRng.fill_bytes(&mut bytes);
        Self(bytes)
    }

    /// Create from bytes.
    pub fn from_bytes(bytes: [u8; IV_SIZE]) -> Self {
        Self(bytes)
    }

    /// Get the raw bytes.
    pub fn as_bytes(&self) -> &[u8; IV_SIZE] {
        &self.0
    }
}

impl From<[u8; IV_SIZE]> for Iv {
    fn from(bytes: [u8; IV_SIZE]) -> Self {
        Self(bytes)
    }
}

/// Encrypt plaintext with AES-256-GCM.
///
/// Returns `(ciphertext, tag)` as separate values; `ciphertext` has the
/// same length as the plaintext.
pub fn encrypt(
    key: &[u8; AES_KEY_SIZE],
    iv: &Iv,
    plaintext: &[u8],
) -> Result<(Vec<u8>, [u8; TAG_SIZE])> {
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));
    let mut out = cipher
        .encrypt(Nonce::from_slice(iv.as_bytes()), plaintext)
        .map_err(|_| Error::Crypto("encryption failed".into()))?;

    let tag_bytes = out.split_off(out.len() - TAG_SIZE);
    let tag: [u8; TAG_SIZE] = tag_bytes
        .as_slice()
        .try_into()
        .map_err(|_| Error::Crypto("encryption failed".into()))?;

    Ok((out, tag))
}

/// Decrypt ciphertext with AES-256-GCM, checking the tag.
///
/// Returns the plaintext in a zeroized container, or a generic error if
/// authentication fails.
pub fn decrypt(
    key: &[u8; AES_KEY_SIZE],
    iv: &Iv,
    ciphertext: &[u8],
    tag: &[u8; TAG_SIZE],
) -> Result<Zeroizing<Vec<u8>>> {
    let cipher = Aes256Gcm::new(Key::<Aes256Gcm>::from_slice(key));

    let mut joined = Vec::with_capacity(ciphertext.len() + TAG_SIZE);
    joined.extend_from_slice(ciphertext);
    joined.extend_from_slice(tag);

    cipher
        .decrypt(Nonce::from_slice(iv.as_bytes()), joined.as_slice())
        .map(Zeroizing::new)
        .map_err(|_| Error::DecryptionFailed)
}
