//! Bearer token verification for the relay boundary.
//!
//! The token is an opaque credential carrying `(user_id, username, exp)`
//! with HMAC-SHA256 integrity protection: `base64url(claims JSON) "."
//! base64url(mac)`. Issuance happens at the external login endpoint; this
//! module is the verification contract the relay enforces, including the
//! `exp` claim. The MAC comparison is constant-time.

use crate::crypto::constant_time_eq;
use crate::error::{Error, Result};
use base64::{engine::general_purpose::URL_SAFE_NO_PAD, Engine};
use hmac::{Hmac, Mac};
use serde::{Deserialize, Serialize};
use sha2::Sha256;
use zeroize::Zeroizing;

type HmacSha256 = Hmac<Sha256>;

/// Claims carried by a bearer token.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenClaims {
    /// Authenticated user id; the relay's authorization subject.
    pub user_id: i64,
    /// Username at issuance time.
    pub username: String,
    /// Expiry as Unix seconds. A token with `exp <= now` is invalid.
    pub exp: i64,
}

/// Mints and verifies HMAC-protected bearer tokens.
pub struct TokenSigner {
    secret: Zeroizing<Vec<u8>>,
}

impl TokenSigner {
    /// Create a signer over the shared signing secret.
    pub fn new(secret: &[u8]) -> Self {
        Self {
            secret: Zeroizing::new(secret.to_vec()),
        }
    }

    /// Mint a token for the given claims.
    pub fn mint(&self, claims: &TokenClaims) -> Result<String> {
        let body = serde_json::to_vec(claims).map_err(|e| Error::Encoding(e.to_string()))?;
        let body_b64 = URL_SAFE_NO_PAD.encode(&body);
        let mac = self.mac(body_b64.as_bytes())?;
        Ok(format!("{body_b64}.{}", URL_SAFE_NO_PAD.encode(mac)))
    }

    /// Verify a token and extract its claims.
    ///
    /// Rejects bad encoding, a wrong MAC and expiry with the same
    /// [`Error::Unauthorized`]; the sub-reason is never revealed.
    pub fn verify(&self, token: &str, now: i64) -> Result<TokenClaims> {
        let (body_b64, mac_b64) = token.split_once('.').ok_or(Error::Unauthorized)?;
        let presented = URL_SAFE_NO_PAD
            .decode(mac_b64)
            .map_err(|_| Error::Unauthorized)?;
        let expected = self.mac(body_b64.as_bytes())?;
        if !constant_time_eq(&presented, &expected) {
            return Err(Error::Unauthorized);
        }

        let body = URL_SAFE_NO_PAD
            .decode(body_b64)
            .map_err(|_| Error::Unauthorized)?;
        let claims: TokenClaims =
            serde_json::from_slice(&body).map_err(|_| Error::Unauthorized)?;
        if claims.exp <= now {
            return Err(Error::Unauthorized);
        }
        Ok(claims)
    }

    fn mac(&self, data: &[u8]) -> Result<Vec<u8>> {
        let mut mac = HmacSha256::new_from_slice(&self.secret)
            .map_err(|_| Error::InvalidKey("token secret".into()))?;
        mac.update(data);
        Ok(mac.finalize().into_bytes().to_vec())
    }
}
