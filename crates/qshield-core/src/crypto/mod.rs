//! Cryptographic primitives for QuantumShield.
//!
//! The suite is fixed by the wire format:
//!
//! - **ML-KEM-1024** (FIPS 203): per-message key encapsulation
//! - **Falcon-1024** (padded encoding): sender signatures
//! - **AES-256-GCM**: bulk authenticated encryption
//!
//! All primitives come from audited ecosystem crates; nothing here rolls
//! its own math. The adapters expose opaque byte-string keys of fixed
//! length and return well-defined failure values instead of panicking.
//! Secret material is zeroized on drop.

mod aead;
mod kem;
mod sig;

pub use aead::{decrypt, encrypt, Iv, AES_KEY_SIZE, IV_SIZE, TAG_SIZE};
pub use kem::{
    decapsulate, encapsulate, kem_keygen, KemCiphertext, KemPublicKey, KemSecretKey, SharedSecret,
    KEM_CIPHERTEXT_SIZE, KEM_PUBLIC_KEY_SIZE, KEM_SECRET_KEY_SIZE, SHARED_SECRET_SIZE,
};
pub use sig::{
    sig_keygen, sign, verify, SigPublicKey, SigSecretKey, Signature, SIGNATURE_SIZE,
    SIG_PUBLIC_KEY_SIZE, SIG_SECRET_KEY_SIZE,
};

/// Generate cryptographically secure random bytes.
pub fn random_bytes<const N: usize>() -> [u8; N] {
    let mut bytes = [0u8; N];
    rand::RngCore::fill_bytes(&mut rand::rngs::OsRng, &mut bytes);
    bytes
}

/// Constant-time comparison of byte slices.
///
/// Prevents timing attacks when comparing MACs and tokens.
pub fn constant_time_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut result = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        result |= x ^ y;
    }
    result == 0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_random_bytes() {
        let a: [u8; 32] = random_bytes();
        let b: [u8; 32] = random_bytes();
        assert_ne!(a, b);
    }

    #[test]
    fn test_constant_time_eq() {
        assert!(constant_time_eq(b"hello", b"hello"));
        assert!(!constant_time_eq(b"hello", b"world"));
        assert!(!constant_time_eq(b"hello", b"hi"));
    }
}
