//! Falcon-1024 signatures.
//!
//! Uses the padded encoding so every signature is exactly
//! [`SIGNATURE_SIZE`] bytes, matching the wire bound. Signing is
//! randomized: two signatures over the same message differ, but both
//! verify. Verification returns a boolean verdict and never panics on
//! malformed input.

use crate::error::{Error, Result};
use pqcrypto_falcon::falconpadded1024 as falcon;
use pqcrypto_traits::sign::{DetachedSignature as _, PublicKey as _, SecretKey as _};
use serde::{Deserialize, Serialize};
use std::fmt;
use zeroize::{Zeroize, ZeroizeOnDrop};

/// Size of a Falcon-1024 public key in bytes.
pub const SIG_PUBLIC_KEY_SIZE: usize = 1793;

/// Size of a Falcon-1024 secret key in bytes.
pub const SIG_SECRET_KEY_SIZE: usize = 2305;

/// Size of a padded Falcon-1024 signature in bytes.
pub const SIGNATURE_SIZE: usize = 1280;

/// A Falcon-1024 public key (1793 bytes).
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SigPublicKey(Vec<u8>);

impl SigPublicKey {
    /// Create from raw bytes, validating the length.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != SIG_PUBLIC_KEY_SIZE {
            return Err(Error::InvalidKey("signature public key length".into()));
        }
        Ok(Self(bytes.to_vec()))
    }

    /// Get the raw bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for SigPublicKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SigPublicKey({}...)", hex::encode(&self.0[..8]))
    }
}

/// A Falcon-1024 secret key (2305 bytes).
///
/// Zeroized on drop.
#[derive(Clone, Zeroize, ZeroizeOnDrop)]
pub struct SigSecretKey(Vec<u8>);

impl SigSecretKey {
    /// Create from raw bytes, validating the length.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != SIG_SECRET_KEY_SIZE {
            return Err(Error::InvalidKey("signature secret key length".into()));
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

impl fmt::Debug for SigSecretKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SigSecretKey([REDACTED])")
    }
}

/// A detached Falcon-1024 signature.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Signature(Vec<u8>);

impl Signature {
    /// Create from raw bytes, validating the length bound.
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        if bytes.is_empty() || bytes.len() > SIGNATURE_SIZE {
            return Err(Error::InvalidKey("signature length".into()));
        }
        Ok(Self(bytes.to_vec()))
    }

    /// Get the raw bytes.
    pub fn as_bytes(&self) -> &[u8] {
        &self.0
    }
}

impl fmt::Debug for Signature {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "Signature({} bytes)", self.0.len())
    }
}

/// Generate a fresh Falcon-1024 keypair.
pub fn sig_keygen() -> (SigPublicKey, SigSecretKey) {
    let (pk, sk) = falcon::keypair();
    (
        SigPublicKey(pk.as_bytes().to_vec()),
        SigSecretKey(sk.as_bytes().to_vec()),
    )
}

/// Sign a message, producing a detached signature.
pub fn sign(msg: &[u8], sk: &SigSecretKey) -> Result<Signature> {
    let sk = falcon::SecretKey::from_bytes(&sk.0)
        .map_err(|_| Error::InvalidKey("signature secret key".into()))?;
    let sig = falcon::detached_sign(msg, &sk);
    Ok(Signature(sig.as_bytes().to_vec()))
}

/// Verify a detached signature over a message.
///
/// Malformed keys or signatures simply fail verification; no error path
/// reveals why.
pub fn verify(msg: &[u8], sig: &Signature, pk: &SigPublicKey) -> bool {
    let pk = match falcon::PublicKey::from_bytes(&pk.0) {
        Ok(pk) => pk,
        Err(_) => return false,
    };
    let sig = match falcon::DetachedSignature::from_bytes(&sig.0) {
        Ok(sig) => sig,
        Err(_) => return false,
    };
    falcon::verify_detached_signature(&sig, msg, &pk).is_ok()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_keygen_sizes() {
        let (pk, sk) = sig_keygen();
        assert_eq!(pk.as_bytes().len(), 1793);
        assert_eq!(sk.as_bytes().len(), SIG_SECRET_KEY_SIZE);
    }

    #[test]
    fn test_sign_verify() {
        let (pk, sk) = sig_keygen();
        let sig = sign(b"payload", &sk).unwrap();
        assert!(sig.as_bytes().len() <= SIGNATURE_SIZE);
        assert!(verify(b"payload", &sig, &pk));
    }

    #[test]
    fn test_verify_rejects_wrong_message() {
        let (pk, sk) = sig_keygen();
        let sig = sign(b"payload", &sk).unwrap();
        assert!(!verify(b"other payload", &sig, &pk));
    }

    #[test]
    fn test_verify_rejects_wrong_key() {
        let (_pk, sk) = sig_keygen();
        let (other_pk, _other_sk) = sig_keygen();
        let sig = sign(b"payload", &sk).unwrap();
        assert!(!verify(b"payload", &sig, &other_pk));
    }

    #[test]
    fn test_verify_rejects_tampered_signature() {
        let (pk, sk) = sig_keygen();
        let sig = sign(b"payload", &sk).unwrap();
        let mut bytes = sig.as_bytes().to_vec();
        let last = bytes.len() - 1;
        bytes[last] ^= 0x01;
        let tampered = Signature(bytes);
        assert!(!verify(b"payload", &tampered, &pk));
    }

    #[test]
    fn test_signing_is_randomized_but_all_verify() {
        let (pk, sk) = sig_keygen();
        let s1 = sign(b"same payload", &sk).unwrap();
        let s2 = sign(b"same payload", &sk).unwrap();
        assert_ne!(s1.as_bytes(), s2.as_bytes());
        assert!(verify(b"same payload", &s1, &pk));
        assert!(verify(b"same payload", &s2, &pk));
    }

    #[test]
    fn test_garbage_inputs_fail_closed() {
        let (pk, _sk) = sig_keygen();
        let garbage = Signature(vec![0u8; 64]);
        assert!(!verify(b"payload", &garbage, &pk));
        assert!(Signature::from_bytes(&[]).is_err());
        assert!(Signature::from_bytes(&vec![0u8; SIGNATURE_SIZE + 1]).is_err());
    }
}
