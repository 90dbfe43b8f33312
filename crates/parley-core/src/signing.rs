//! Ed25519 signing and verification

use ed25519_dalek::{
    Signature as DalekSignature, Signer as DalekSigner, SigningKey, Verifier, VerifyingKey,
};
use rand_core::OsRng;
use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};

use crate::error::{Error, Result};

/// Ed25519 keypair used for broker and agent signing.
#[derive(Clone)]
pub struct Keypair {
    signing_key: SigningKey,
}

impl Keypair {
    /// Generate a fresh random keypair.
    pub fn generate() -> Self {
        Self {
            signing_key: SigningKey::generate(&mut OsRng),
        }
    }

    /// Build from a 32-byte seed.
    pub fn from_seed(seed: &[u8; 32]) -> Self {
        Self {
            signing_key: SigningKey::from_bytes(seed),
        }
    }

    /// Build from a hex-encoded seed.
    pub fn from_hex(hex_seed: &str) -> Result<Self> {
        let seed: [u8; 32] = decode_hex_array(hex_seed).ok_or(Error::InvalidSeed)?;
        Ok(Self::from_seed(&seed))
    }

    /// Sign a message.
    ///
    /// ```rust
    /// let keypair = parley_core::Keypair::generate();
    /// assert_eq!(keypair.sign(b"nonce").to_bytes().len(), 64);
    /// ```
    pub fn sign(&self, message: &[u8]) -> Signature {
        Signature {
            inner: self.signing_key.sign(message),
        }
    }

    /// The verifying half of this keypair.
    pub fn public_key(&self) -> PublicKey {
        PublicKey {
            verifying_key: self.signing_key.verifying_key(),
        }
    }

    /// Export the seed as hex.
    pub fn to_hex(&self) -> String {
        hex::encode(self.signing_key.to_bytes())
    }
}

fn decode_hex_array<const N: usize>(hex_str: &str) -> Option<[u8; N]> {
    let hex_str = hex_str.strip_prefix("0x").unwrap_or(hex_str);
    let bytes = hex::decode(hex_str).ok()?;
    bytes.try_into().ok()
}

/// Ed25519 public key, hex-encoded on the wire.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct PublicKey {
    verifying_key: VerifyingKey,
}

impl PublicKey {
    /// Build from raw key bytes.
    pub fn from_bytes(bytes: &[u8; 32]) -> Result<Self> {
        let verifying_key =
            VerifyingKey::from_bytes(bytes).map_err(|e| Error::InvalidPublicKey(e.to_string()))?;
        Ok(Self { verifying_key })
    }

    /// Build from a hex-encoded key (a `0x` prefix is tolerated).
    pub fn from_hex(hex_str: &str) -> Result<Self> {
        let bytes: [u8; 32] = decode_hex_array(hex_str)
            .ok_or_else(|| Error::InvalidPublicKey("expected 32 hex-encoded bytes".into()))?;
        Self::from_bytes(&bytes)
    }

    /// Verify a signature over `message`.
    ///
    /// Fails closed: any mismatch returns `false`, never an error.
    pub fn verify(&self, message: &[u8], signature: &Signature) -> bool {
        self.verifying_key.verify(message, &signature.inner).is_ok()
    }

    /// Raw key bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        self.verifying_key.as_bytes()
    }

    /// Export as hex.
    pub fn to_hex(&self) -> String {
        hex::encode(self.verifying_key.to_bytes())
    }
}

impl Serialize for PublicKey {
    fn serialize<S: Serializer>(&self, s: S) -> std::result::Result<S::Ok, S::Error> {
        s.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for PublicKey {
    fn deserialize<D: Deserializer<'de>>(d: D) -> std::result::Result<Self, D::Error> {
        let hex_str = String::deserialize(d)?;
        PublicKey::from_hex(&hex_str).map_err(D::Error::custom)
    }
}

/// Ed25519 signature, hex-encoded on the wire.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Signature {
    inner: DalekSignature,
}

impl Signature {
    /// Build from raw signature bytes.
    pub fn from_bytes(bytes: &[u8; 64]) -> Self {
        Self {
            inner: DalekSignature::from_bytes(bytes),
        }
    }

    /// Build from a hex-encoded signature.
    pub fn from_hex(hex_str: &str) -> Result<Self> {
        let bytes: [u8; 64] = decode_hex_array(hex_str).ok_or(Error::InvalidSignature)?;
        Ok(Self::from_bytes(&bytes))
    }

    /// Raw signature bytes.
    pub fn to_bytes(&self) -> [u8; 64] {
        self.inner.to_bytes()
    }

    /// Export as hex.
    pub fn to_hex(&self) -> String {
        hex::encode(self.inner.to_bytes())
    }
}

impl Serialize for Signature {
    fn serialize<S: Serializer>(&self, s: S) -> std::result::Result<S::Ok, S::Error> {
        s.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Signature {
    fn deserialize<D: Deserializer<'de>>(d: D) -> std::result::Result<Self, D::Error> {
        let hex_str = String::deserialize(d)?;
        Signature::from_hex(&hex_str).map_err(D::Error::custom)
    }
}
