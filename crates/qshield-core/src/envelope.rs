//! The per-message encryption bundle and its canonical signing payload.
//!
//! Every message or file travels as an [`Envelope`]: KEM ciphertext, IV,
//! AEAD ciphertext, AEAD tag and a Falcon signature, all base64 on the
//! wire. The signature covers the canonical payload
//! `{"c":...,"i":...,"t":...}` - field order and the absence of whitespace
//! are load-bearing for cross-runtime compatibility, so the payload is
//! assembled by hand rather than through a JSON serializer.
//!
//! The KEM ciphertext is deliberately not part of the signed payload; the
//! wire format is fixed. An adversary who swaps it in transit derives a
//! different shared secret and the AEAD tag check fails.

use crate::crypto::{self, Iv, IV_SIZE, TAG_SIZE};
use crate::crypto::{KemPublicKey, KemSecretKey, SigPublicKey, SigSecretKey, Signature};
use crate::error::{Error, Result};
use base64::{engine::general_purpose::STANDARD as BASE64, Engine};
use serde::{Deserialize, Serialize};
use zeroize::Zeroizing;

/// Maximum plaintext an envelope may carry (10 MiB).
pub const MAX_PLAINTEXT_SIZE: usize = 10 * 1024 * 1024;

/// Maximum raw file size before encoding (10 MiB).
pub const MAX_FILE_SIZE: usize = 10 * 1024 * 1024;

/// Base64-encoded length of `n` input bytes.
pub const fn base64_len(n: usize) -> usize {
    4 * ((n + 2) / 3)
}

/// Hard cap on the base64 ciphertext field of a message envelope.
pub const MAX_MESSAGE_CIPHERTEXT_B64: usize = base64_len(MAX_PLAINTEXT_SIZE);

/// Hard cap on the base64 `file_data` field of a file envelope.
///
/// File plaintext is itself base64, so the wire field is base64 twice over.
pub const MAX_FILE_DATA_B64: usize = base64_len(base64_len(MAX_FILE_SIZE));

/// Build the canonical signing payload from the base64 wire fields.
///
/// Byte-exact: keys in the order `c,i,t`, no whitespace.
pub fn signing_payload(ciphertext_b64: &str, iv_b64: &str, tag_b64: &str) -> Vec<u8> {
    format!("{{\"c\":\"{ciphertext_b64}\",\"i\":\"{iv_b64}\",\"t\":\"{tag_b64}\"}}").into_bytes()
}

/// The full cryptographic record sent per message.
///
/// Fields hold base64 exactly as they appear on the wire and at rest.
/// Construct through [`Envelope::seal`] or [`Envelope::from_parts`];
/// partial forms are rejected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Envelope {
    /// ML-KEM-1024 ciphertext, base64.
    pub kem_ct: String,
    /// AES-GCM IV (12 bytes), base64.
    pub iv: String,
    /// AES-GCM ciphertext, base64.
    pub ciphertext: String,
    /// AES-GCM authentication tag (16 bytes), base64.
    pub tag: String,
    /// Falcon-1024 signature over the canonical payload, base64.
    pub sig: String,
}

impl Envelope {
    /// Assemble an envelope from wire fields, rejecting partial forms.
    pub fn from_parts(
        kem_ct: impl Into<String>,
        iv: impl Into<String>,
        ciphertext: impl Into<String>,
        tag: impl Into<String>,
        sig: impl Into<String>,
    ) -> Result<Self> {
        let envelope = Self {
            kem_ct: kem_ct.into(),
            iv: iv.into(),
            ciphertext: ciphertext.into(),
            tag: tag.into(),
            sig: sig.into(),
        };
        if !envelope.is_complete() {
            return Err(Error::Protocol("incomplete envelope".into()));
        }
        Ok(envelope)
    }

    /// Whether every field is non-empty. Encryption is mandatory; the relay
    /// refuses envelopes with any missing part.
    pub fn is_complete(&self) -> bool {
        !self.kem_ct.is_empty()
            && !self.iv.is_empty()
            && !self.ciphertext.is_empty()
            && !self.tag.is_empty()
            && !self.sig.is_empty()
    }

    /// The canonical payload this envelope's signature covers.
    pub fn signing_payload(&self) -> Vec<u8> {
        signing_payload(&self.ciphertext, &self.iv, &self.tag)
    }

    /// Encrypt and sign a plaintext for a recipient.
    pub fn seal(
        plaintext: &[u8],
        recipient_kem_pk: &KemPublicKey,
        sender_sig_sk: &SigSecretKey,
    ) -> Result<Self> {
        if plaintext.len() > MAX_PLAINTEXT_SIZE {
            return Err(Error::Protocol("payload too large".into()));
        }

        let (kem_ct, shared) = crypto::encapsulate(recipient_kem_pk)?;
        let iv = Iv::random();
        let (ciphertext, tag) = crypto::encrypt(shared.as_bytes(), &iv, plaintext)?;

        let ciphertext_b64 = BASE64.encode(&ciphertext);
        let iv_b64 = BASE64.encode(iv.as_bytes());
        let tag_b64 = BASE64.encode(tag);

        let payload = signing_payload(&ciphertext_b64, &iv_b64, &tag_b64);
        let sig = crypto::sign(&payload, sender_sig_sk)?;

        Ok(Self {
            kem_ct: BASE64.encode(kem_ct.as_bytes()),
            iv: iv_b64,
            ciphertext: ciphertext_b64,
            tag: tag_b64,
            sig: BASE64.encode(sig.as_bytes()),
        })
    }

    /// Verify, decapsulate and decrypt.
    ///
    /// The signature is checked over the reconstructed canonical payload
    /// before any decapsulation attempt. Every failure - malformed field,
    /// bad signature, decapsulation, tag mismatch - collapses into the one
    /// generic [`Error::DecryptionFailed`].
    pub fn open(
        &self,
        recipient_kem_sk: &KemSecretKey,
        sender_sig_pk: &SigPublicKey,
    ) -> Result<Zeroizing<Vec<u8>>> {
        if !self.is_complete() {
            return Err(Error::DecryptionFailed);
        }

        // Signature first: fail closed before touching the KEM.
        let payload = self.signing_payload();
        let sig_bytes = BASE64.decode(&self.sig).map_err(|_| Error::DecryptionFailed)?;
        let sig = Signature::from_bytes(&sig_bytes).map_err(|_| Error::DecryptionFailed)?;
        if !crypto::verify(&payload, &sig, sender_sig_pk) {
            return Err(Error::DecryptionFailed);
        }

        let kem_ct_bytes = BASE64
            .decode(&self.kem_ct)
            .map_err(|_| Error::DecryptionFailed)?;
        let kem_ct =
            crypto::KemCiphertext::from_bytes(&kem_ct_bytes).map_err(|_| Error::DecryptionFailed)?;
        let shared =
            crypto::decapsulate(&kem_ct, recipient_kem_sk).map_err(|_| Error::DecryptionFailed)?;

        let iv_bytes: [u8; IV_SIZE] = BASE64
            .decode(&self.iv)
            .map_err(|_| Error::DecryptionFailed)?
            .try_into()
            .map_err(|_| Error::DecryptionFailed)?;
        let tag: [u8; TAG_SIZE] = BASE64
            .decode(&self.tag)
            .map_err(|_| Error::DecryptionFailed)?
            .try_into()
            .map_err(|_| Error::DecryptionFailed)?;
        let ciphertext = BASE64
            .decode(&self.ciphertext)
            .map_err(|_| Error::DecryptionFailed)?;

        crypto::decrypt(shared.as_bytes(), &Iv::from_bytes(iv_bytes), &ciphertext, &tag)
            .map_err(|_| Error::DecryptionFailed)
    }
}

/// File metadata travelling alongside a file envelope.
///
/// Not covered by the signature: untrusted display hints only.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileMetadata {
    /// Original file name.
    pub file_name: String,
    /// Declared size of the raw file in bytes.
    pub file_size: u64,
    /// MIME type hint.
    pub file_type: String,
}

/// A file transfer bundle: untrusted metadata plus a sealed envelope whose
/// plaintext is `base64(file_bytes)`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileEnvelope {
    /// Display metadata.
    pub metadata: FileMetadata,
    /// The encryption bundle.
    pub envelope: Envelope,
}

impl FileEnvelope {
    /// Encrypt and sign a file for a recipient.
    pub fn seal_file(
        file_bytes: &[u8],
        metadata: FileMetadata,
        recipient_kem_pk: &KemPublicKey,
        sender_sig_sk: &SigSecretKey,
    ) -> Result<Self> {
        if file_bytes.len() > MAX_FILE_SIZE {
            return Err(Error::Protocol("payload too large".into()));
        }
        let plaintext = BASE64.encode(file_bytes);
        let envelope = Envelope::seal(plaintext.as_bytes(), recipient_kem_pk, sender_sig_sk)?;
        Ok(Self { metadata, envelope })
    }

    /// Verify, decrypt and decode back to raw file bytes.
    pub fn open_file(
        &self,
        recipient_kem_sk: &KemSecretKey,
        sender_sig_pk: &SigPublicKey,
    ) -> Result<Zeroizing<Vec<u8>>> {
        let plaintext = self.envelope.open(recipient_kem_sk, sender_sig_pk)?;
        BASE64
            .decode(plaintext.as_slice())
            .map(Zeroizing::new)
            .map_err(|_| Error::DecryptionFailed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::crypto::{kem_keygen, sig_keygen};

    fn keysets() -> (KemPublicKey, KemSecretKey, SigPublicKey, SigSecretKey) {
        let (kem_pk, kem_sk) = kem_keygen().unwrap();
        let (sig_pk, sig_sk) = sig_keygen();
        (kem_pk, kem_sk, sig_pk, sig_sk)
    }

    #[test]
    fn test_seal_open_roundtrip() {
        let (kem_pk, kem_sk, sig_pk, sig_sk) = keysets();

        let envelope = Envelope::seal(b"hello", &kem_pk, &sig_sk).unwrap();
        assert!(envelope.is_complete());

        // Wire field sizes
        assert_eq!(BASE64.decode(&envelope.iv).unwrap().len(), 12);
        assert_eq!(BASE64.decode(&envelope.tag).unwrap().len(), 16);
        assert_eq!(BASE64.decode(&envelope.kem_ct).unwrap().len(), 1568);
        assert!(BASE64.decode(&envelope.sig).unwrap().len() <= 1280);

        let plaintext = envelope.open(&kem_sk, &sig_pk).unwrap();
        assert_eq!(&*plaintext, b"hello");
    }

    #[test]
    fn test_canonical_payload_is_byte_exact() {
        let payload = signing_payload("Y3Q=", "aXY=", "dGFn");
        assert_eq!(
            payload,
            br#"{"c":"Y3Q=","i":"aXY=","t":"dGFn"}"#.to_vec()
        );
        // No whitespace anywhere.
        assert!(!payload.contains(&b' '));
        assert!(!payload.contains(&b'\n'));
    }

    #[test]
    fn test_bit_flip_in_any_field_breaks_open() {
        let (kem_pk, kem_sk, sig_pk, sig_sk) = keysets();
        let envelope = Envelope::seal(b"flip me", &kem_pk, &sig_sk).unwrap();

        let flip = |field: &str| -> String {
            let mut bytes = BASE64.decode(field).unwrap();
            let last = bytes.len() - 1;
            bytes[last] ^= 0x01;
            BASE64.encode(bytes)
        };

        for target in ["ciphertext", "tag", "iv", "kem_ct", "sig"] {
            let mut broken = envelope.clone();
            match target {
                "ciphertext" => broken.ciphertext = flip(&envelope.ciphertext),
                "tag" => broken.tag = flip(&envelope.tag),
                "iv" => broken.iv = flip(&envelope.iv),
                "kem_ct" => broken.kem_ct = flip(&envelope.kem_ct),
                "sig" => broken.sig = flip(&envelope.sig),
                _ => unreachable!(),
            }
            let result = broken.open(&kem_sk, &sig_pk);
            assert!(result.is_err(), "flipping {target} must break open");
            assert!(
                matches!(result, Err(Error::DecryptionFailed)),
                "{target} failure must be the generic outcome"
            );
        }
    }

    #[test]
    fn test_wrong_sender_key_fails() {
        let (kem_pk, kem_sk, _sig_pk, sig_sk) = keysets();
        let (other_sig_pk, _other_sig_sk) = sig_keygen();

        let envelope = Envelope::seal(b"hello", &kem_pk, &sig_sk).unwrap();
        assert!(envelope.open(&kem_sk, &other_sig_pk).is_err());
    }

    #[test]
    fn test_wrong_recipient_key_fails() {
        let (kem_pk, _kem_sk, sig_pk, sig_sk) = keysets();
        let (_other_pk, other_kem_sk) = kem_keygen().unwrap();

        let envelope = Envelope::seal(b"hello", &kem_pk, &sig_sk).unwrap();
        assert!(envelope.open(&other_kem_sk, &sig_pk).is_err());
    }

    #[test]
    fn test_partial_envelope_rejected() {
        let err = Envelope::from_parts("a", "b", "", "d", "e");
        assert!(err.is_err());

        let ok = Envelope::from_parts("a", "b", "c", "d", "e").unwrap();
        assert!(ok.is_complete());
    }

    #[test]
    fn test_oversize_plaintext_rejected() {
        let (kem_pk, _kem_sk, _sig_pk, sig_sk) = keysets();
        let big = vec![0u8; MAX_PLAINTEXT_SIZE + 1];
        assert!(Envelope::seal(&big, &kem_pk, &sig_sk).is_err());
    }

    #[test]
    fn test_file_roundtrip_with_untrusted_metadata() {
        let (kem_pk, kem_sk, sig_pk, sig_sk) = keysets();
        let file_bytes: Vec<u8> = (0..=255u8).cycle().take(4096).collect();

        let meta = FileMetadata {
            file_name: "photo.png".into(),
            file_size: file_bytes.len() as u64,
            file_type: "image/png".into(),
        };
        let mut sealed =
            FileEnvelope::seal_file(&file_bytes, meta, &kem_pk, &sig_sk).unwrap();

        // Metadata is outside the signed payload: changing it does not
        // affect decryption, which is exactly why it is untrusted.
        sealed.metadata.file_name = "renamed.png".into();
        let opened = sealed.open_file(&kem_sk, &sig_pk).unwrap();
        assert_eq!(&*opened, file_bytes.as_slice());
    }

    #[test]
    fn test_file_size_boundary() {
        let (kem_pk, _kem_sk, _sig_pk, sig_sk) = keysets();
        let meta = FileMetadata {
            file_name: "big.bin".into(),
            file_size: (MAX_FILE_SIZE + 1) as u64,
            file_type: "application/octet-stream".into(),
        };
        let too_big = vec![0u8; MAX_FILE_SIZE + 1];
        assert!(FileEnvelope::seal_file(&too_big, meta, &kem_pk, &sig_sk).is_err());
    }

    #[test]
    fn test_larger_message_roundtrip() {
        let (kem_pk, kem_sk, sig_pk, sig_sk) = keysets();
        let big: Vec<u8> = (0..1024 * 1024u32).map(|i| (i % 251) as u8).collect();
        let envelope = Envelope::seal(&big, &kem_pk, &sig_sk).unwrap();
        let opened = envelope.open(&kem_sk, &sig_pk).unwrap();
        assert_eq!(&*opened, big.as_slice());
    }

    #[test]
    fn test_envelope_json_field_names() {
        let envelope = Envelope::from_parts("a", "b", "c", "d", "e").unwrap();
        let json = serde_json::to_value(&envelope).unwrap();
        assert_eq!(json["kem_ct"], "a");
        assert_eq!(json["iv"], "b");
        assert_eq!(json["ciphertext"], "c");
        assert_eq!(json["tag"], "d");
        assert_eq!(json["sig"], "e");
    }
}
