//! Challenge-response engine
//!
//! Proof of private-key possession: the broker hands the target agent a
//! single-use random nonce; the target signs the raw nonce bytes with the
//! key it registered. This is a security boundary and fails closed — any
//! decode or verification failure is `false`, never an error.

use rand_core::{OsRng, RngCore};

use parley_core::{PublicKey, Signature};

/// Generate a fresh 256-bit challenge nonce, hex-encoded.
///
/// Each nonce is embedded in exactly one handshake and never reused.
pub fn new_challenge() -> String {
    let mut nonce = [0u8; 32];
    OsRng.fill_bytes(&mut nonce);
    hex::encode(nonce)
}

/// Verify a signed challenge response against an agent's registered key.
///
/// `signature_hex` must be an Ed25519 signature over the *raw* nonce bytes
/// (not the hex string). Returns `false` on any malformed input.
pub fn verify_response(signature_hex: &str, nonce_hex: &str, public_key_hex: &str) -> bool {
    let Ok(public_key) = PublicKey::from_hex(public_key_hex) else {
        return false;
    };
    let Ok(signature) = Signature::from_hex(signature_hex) else {
        return false;
    };
    let Ok(nonce) = hex::decode(nonce_hex) else {
        return false;
    };
    public_key.verify(&nonce, &signature)
}
