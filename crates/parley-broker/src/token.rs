//! Signed claim bundles
//!
//! Credentials and consent tokens are canonical-JSON claim sets signed with
//! the broker key, carried as an opaque compact string:
//! `base64url(claims_json) "." base64url(signature)`. The signature covers
//! the canonical form of the claims, so verification is independent of the
//! field order the encoder happened to use.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use serde::de::DeserializeOwned;
use serde::Serialize;
use serde_json::Value;

use parley_core::{canonicalize, Signature};

use crate::error::{Error, Result};
use crate::keys::KeyAuthority;

/// Sign `claims` with the broker key and encode as a compact token string.
pub fn sign_claims<C: Serialize>(claims: &C, authority: &KeyAuthority) -> Result<String> {
    let value = serde_json::to_value(claims)?;
    let canonical = canonicalize(&value)?;
    let signature = authority.sign(canonical.as_bytes());

    let claims_b64 = URL_SAFE_NO_PAD.encode(canonical.as_bytes());
    let sig_b64 = URL_SAFE_NO_PAD.encode(signature.to_bytes());
    Ok(format!("{claims_b64}.{sig_b64}"))
}

/// Decode a compact token and verify its signature against the broker key.
///
/// Only the signature is checked here; issuer, expiry, and claim-specific
/// binding checks belong to the caller. Every failure collapses into the
/// same opaque error.
pub fn verify_claims<C: DeserializeOwned>(token: &str, authority: &KeyAuthority) -> Result<C> {
    let (claims_b64, sig_b64) = token
        .split_once('.')
        .ok_or_else(|| malformed("missing separator"))?;

    let claims_bytes = URL_SAFE_NO_PAD
        .decode(claims_b64)
        .map_err(|_| malformed("claims encoding"))?;
    let sig_bytes = URL_SAFE_NO_PAD
        .decode(sig_b64)
        .map_err(|_| malformed("signature encoding"))?;
    let sig_bytes: [u8; 64] = sig_bytes
        .try_into()
        .map_err(|_| malformed("signature length"))?;
    let signature = Signature::from_bytes(&sig_bytes);

    // Re-canonicalize rather than trusting the transmitted bytes; a token
    // whose payload is not in canonical form fails verification.
    let value: Value =
        serde_json::from_slice(&claims_bytes).map_err(|_| malformed("claims json"))?;
    let canonical = canonicalize(&value)?;
    if !authority.verify(canonical.as_bytes(), &signature) {
        return Err(malformed("signature"));
    }

    serde_json::from_value(value).map_err(|_| malformed("claims shape"))
}

fn malformed(what: &str) -> Error {
    Error::InvalidToken(format!("token rejected ({what})"))
}

/// Current unix time in seconds.
pub fn now_unix() -> i64 {
    chrono::Utc::now().timestamp()
}
