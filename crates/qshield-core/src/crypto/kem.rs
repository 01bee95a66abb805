//! ML-KEM-1024 key encapsulation.
//!
//! Thin adapter over the FIPS 203 implementation. Keys, ciphertexts and
//! shared secrets are opaque byte strings of fixed length; base64 encoding
//! happens at the wire/storage boundary, not here. The backend is
//! constant-time with respect to secret key bits, and decapsulation
//! failures surface as a generic error value.

use crate::error::{Error, Result};
use fips203::ml_kem_1024;
use fips203::traits::{Decaps as _, Encaps as _, KeyGen as _, SerDes as _};
use serde::{Deserialize, Serialize};
use std::fmt;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Size of an ML-KEM-1024 public (encapsulation) key in bytes.
pub const KEM_PUBLIC_KEY_SIZE: usize = ml_kem_1024::EK_LEN;

/// Size of an ML-KEM-1024 secret (decapsulation) key in bytes.
pub const KEM_SECRET_KEY_SIZE: usize = ml_kem_1024::DK_LEN;

/// Size of an ML-KEM-1024 ciphertext in bytes.
pub const KEM_CIPHERTEXT_SIZE: usize = ml_kem_1024::CT_LEN;

/// Size of the encapsulated shared secret in bytes.
pub const SHARED_SECRET_SIZE: usize = 32;

/// An ML-KEM-1024 public key (1568 bytes).
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KemPublicKey(Vec<u8>);

impl KemPublicKey {
    /// Create from raw bytes, validating the length.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != KEM_PUBLIC_KEY_SIZE {
            return Err(Error::InvalidKey("KEM public key length".into()));
        }
        Ok(Self(bytes.to_vec()))
    }

    /// Get the raw bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for KemPublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "KemPublicKey({}...)", hex::encode(&self.0[..8]))
    }
}

/// An ML-KEM-1024 secret key (3168 bytes).
///
/// Zeroized on drop to prevent key material from persisting in memory.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct KemSecretKey(Vec<u8>);

impl KemSecretKey {
    /// Create from raw bytes, validating the length.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != KEM_SECRET_KEY_SIZE {
            return Err(Error::InvalidKey("KEM secret key length".into()));
        }
        Ok(Self(bytes.to_vec()))
    }

    /// Get the raw bytes.
    ///
    /// # Security
    /// Handle with care - this exposes secret key material.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for KemSecretKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "KemSecretKey([REDACTED])")
    }
}

/// An ML-KEM-1024 ciphertext (1568 bytes).
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct KemCiphertext(Vec<u8>);

impl KemCiphertext {
    /// Create from raw bytes, validating the length.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != KEM_CIPHERTEXT_SIZE {
            return Err(Error::InvalidKey("KEM ciphertext length".into()));
        }
        Ok(Self(bytes.to_vec()))
    }

    /// Get the raw bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for KemCiphertext {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "KemCiphertext({}...)", hex::encode(&self.0[..8]))
    }
}

/// A shared secret recovered from encapsulation or decapsulation.
///
/// Used directly as the AES-256-GCM key. Zeroized on drop.
#[derive(Zeroize, ZeroizeOnDrop)]
pub struct SharedSecret([u8; SHARED_SECRET_SIZE]);

impl SharedSecret {
    /// Get the raw bytes.
    pub fn as_bytes(&self) -> &[u8; SHARED_SECRET_SIZE] {
        &self.0
    }
}

impl fmt::Debug for SharedSecret {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SharedSecret([REDACTED])")
    }
}

/// Generate a fresh ML-KEM-1024 keypair.
pub fn kem_keygen() -> Result<(KemPublicKey, KemSecretKey)> {
    let (ek, dk) =
        ml_kem_1024::KG::try_keygen().map_err(|_| Error::Crypto("KEM keygen failed".into()))?;
    Ok((
        KemPublicKey(ek.into_bytes().to_vec()),
        KemSecretKey(dk.into_bytes().to_vec()),
    ))
}

/// Encapsulate against a recipient public key.
///
/// Returns the ciphertext to send and the shared secret to encrypt with.
pub fn encapsulate(pk: &KemPublicKey) -> Result<(KemCiphertext, SharedSecret)> {
    let arr: [u8; KEM_PUBLIC_KEY_SIZE] = pk
        .0
        .as_slice()
        .try_into()
        .map_err(|_| Error::InvalidKey("KEM public key length".into()))?;
    let ek = ml_kem_1024::EncapsKey::try_from_bytes(arr)
        .map_err(|_| Error::InvalidKey("KEM public key".into()))?;
    let (ssk, ct) = ek
        .try_encaps()
        .map_err(|_| Error::Crypto("encapsulation failed".into()))?;
    Ok((
        KemCiphertext(ct.into_bytes().to_vec()),
        SharedSecret(ssk.into_bytes()),
    ))
}

/// Decapsulate a ciphertext with the recipient secret key.
///
/// Failures return a generic error; the caller must not distinguish them
/// from AEAD failures when reporting outward.
pub fn decapsulate(ct: &KemCiphertext, sk: &KemSecretKey) -> Result<SharedSecret> {
    let ct_arr: [u8; KEM_CIPHERTEXT_SIZE] = ct
        .0
        .as_slice()
        .try_into()
        .map_err(|_| Error::Crypto("decapsulation failed".into()))?;
    let ct = ml_kem_1024::CipherText::try_from_bytes(ct_arr)
        .map_err(|_| Error::Crypto("decapsulation failed".into()))?;
    let sk_arr: [u8; KEM_SECRET_KEY_SIZE] = sk
        .0
        .as_slice()
        .try_into()
        .map_err(|_| Error::InvalidKey("KEM secret key length".into()))?;
    let dk = ml_kem_1024::DecapsKey::try_from_bytes(sk_arr)
        .map_err(|_| Error::InvalidKey("KEM secret key".into()))?;
    let ssk = dk
        .try_decaps(&ct)
        .map_err(|_| Error::Crypto("decapsulation failed".into()))?;
    Ok(SharedSecret(ssk.into_bytes()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keygen_sizes() {
        let (pk, sk) = kem_keygen().unwrap();
        assert_eq!(pk.as_bytes().len(), 1568);
        assert_eq!(sk.as_bytes().len(), KEM_SECRET_KEY_SIZE);
    }

    #[test]
    fn test_encap_decap_agreement() {
        let (pk, sk) = kem_keygen().unwrap();
        let (ct, ss_sender) = encapsulate(&pk).unwrap();
        assert_eq!(ct.as_bytes().len(), 1568);

        let ss_recipient = decapsulate(&ct, &sk).unwrap();
        assert_eq!(ss_sender.as_bytes(), ss_recipient.as_bytes());
    }

    #[test]
    fn test_wrong_key_derives_different_secret() {
        // ML-KEM decapsulation with the wrong key yields an implicit-
        // rejection secret rather than an error; it must not match.
        let (pk, _sk) = kem_keygen().unwrap();
        let (_pk2, sk2) = kem_keygen().unwrap();

        let (ct, ss) = encapsulate(&pk).unwrap();
        let ss_wrong = decapsulate(&ct, &sk2).unwrap();
        assert_ne!(ss.as_bytes(), ss_wrong.as_bytes());
    }

    #[test]
    fn test_key_roundtrip_bytes() {
        let (pk, sk) = kem_keygen().unwrap();
        let pk2 = KemPublicKey::from_bytes(pk.as_bytes()).unwrap();
        let sk2 = KemSecretKey::from_bytes(sk.as_bytes()).unwrap();
        assert_eq!(pk, pk2);
        assert_eq!(sk.as_bytes(), sk2.as_bytes());
    }

    #[test]
    fn test_bad_lengths_rejected() {
        assert!(KemPublicKey::from_bytes(&[0u8; 10]).is_err());
        assert!(KemSecretKey::from_bytes(&[0u8; 10]).is_err());
        assert!(KemCiphertext::from_bytes(&[0u8; 10]).is_err());
    }
}
