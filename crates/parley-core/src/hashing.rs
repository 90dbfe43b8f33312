//! SHA-256 hashing and public-key fingerprints

use serde::de::Error as _;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};

use crate::error::{Error, Result};

/// A 32-byte SHA-256 digest, hex-encoded on the wire.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct Hash {
    bytes: [u8; 32],
}

impl Hash {
    /// Wrap raw digest bytes.
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Self { bytes }
    }

    /// Parse from a hex string (a `0x` prefix is tolerated).
    pub fn from_hex(hex_str: &str) -> Result<Self> {
        let hex_str = hex_str.strip_prefix("0x").unwrap_or(hex_str);
        let bytes = hex::decode(hex_str).map_err(|e| Error::InvalidHex(e.to_string()))?;
        let len = bytes.len();
        let bytes: [u8; 32] = bytes.try_into().map_err(|_| Error::InvalidHashLength(len))?;
        Ok(Self::from_bytes(bytes))
    }

    /// Raw digest bytes.
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.bytes
    }

    /// Export as hex.
    pub fn to_hex(&self) -> String {
        hex::encode(self.bytes)
    }
}

impl AsRef<[u8]> for Hash {
    fn as_ref(&self) -> &[u8] {
        &self.bytes
    }
}

impl std::fmt::Display for Hash {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.to_hex())
    }
}

impl Serialize for Hash {
    fn serialize<S: Serializer>(&self, s: S) -> std::result::Result<S::Ok, S::Error> {
        s.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Hash {
    fn deserialize<D: Deserializer<'de>>(d: D) -> std::result::Result<Self, D::Error> {
        let hex_str = String::deserialize(d)?;
        Hash::from_hex(&hex_str).map_err(D::Error::custom)
    }
}

/// Compute the SHA-256 digest of `data`.
///
/// ```rust
/// let hash = parley_core::sha256(b"hello");
/// assert_eq!(
///     hash.to_hex(),
///     "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
/// );
/// ```
pub fn sha256(data: &[u8]) -> Hash {
    let digest = Sha256::digest(data);
    let mut bytes = [0u8; 32];
    bytes.copy_from_slice(&digest);
    Hash::from_bytes(bytes)
}

/// Compute the SHA-256 digest of `data` as a hex string.
pub fn sha256_hex(data: &[u8]) -> String {
    sha256(data).to_hex()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn known_vector() {
        assert_eq!(
            sha256_hex(b"hello"),
            "2cf24dba5fb0a30e26e83b2ac5b9e29e1b161e5c1fa7425e73043362938b9824"
        );
    }

    #[test]
    fn hex_round_trip() {
        let hash = sha256(b"fingerprint");
        assert_eq!(Hash::from_hex(&hash.to_hex()).unwrap(), hash);
        assert_eq!(Hash::from_hex(&format!("0x{hash}")).unwrap(), hash);
    }

    #[test]
    fn rejects_wrong_length() {
        assert!(matches!(
            Hash::from_hex("abcd"),
            Err(Error::InvalidHashLength(2))
        ));
    }

    #[test]
    fn serde_round_trip() {
        let hash = sha256(b"fingerprint");
        let json = serde_json::to_string(&hash).unwrap();
        let restored: Hash = serde_json::from_str(&json).unwrap();
        assert_eq!(hash, restored);
    }
}
