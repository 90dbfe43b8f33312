//! Key authority: the broker's own signing identity
//!
//! One Ed25519 keypair with process lifetime, generated at construction and
//! injected into every component that signs or verifies. The private key
//! never leaves this struct; a restart invalidates all outstanding
//! credentials and consent tokens (accepted limitation).

use parley_core::{Keypair, PublicKey, Signature};

pub struct KeyAuthority {
    keypair: Keypair,
}

impl KeyAuthority {
    /// Generate a fresh broker keypair.
    pub fn new() -> Self {
        tracing::warn!(
            "using ephemeral broker keypair; credentials and receipts will not verify across restarts"
        );
        Self {
            keypair: Keypair::generate(),
        }
    }

    /// Deterministic authority for tests and fixed deployments.
    pub fn from_seed(seed: &[u8; 32]) -> Self {
        Self {
            keypair: Keypair::from_seed(seed),
        }
    }

    /// Sign arbitrary bytes with the broker key.
    pub fn sign(&self, message: &[u8]) -> Signature {
        self.keypair.sign(message)
    }

    /// Verify a signature made with the broker key.
    pub fn verify(&self, message: &[u8], signature: &Signature) -> bool {
        self.keypair.public_key().verify(message, signature)
    }

    /// The broker's public key, for independent offline verification.
    pub fn public_key(&self) -> PublicKey {
        self.keypair.public_key()
    }

    /// Hex encoding of the broker's public key.
    pub fn public_key_hex(&self) -> String {
        self.keypair.public_key().to_hex()
    }
}

impl Default for KeyAuthority {
    fn default() -> Self {
        Self::new()
    }
}
