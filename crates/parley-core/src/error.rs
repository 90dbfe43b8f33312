//! Error types for parley-core operations

use thiserror::Error;

/// Errors that can occur during cryptographic operations
#[non_exhaustive]
#[derive(Error, Debug)]
pub enum Error {
    #[error("Invalid signature encoding")]
    InvalidSignature,

    #[error("Invalid public key: {0}")]
    InvalidPublicKey(String),

    #[error("Invalid private key seed")]
    InvalidSeed,

    #[error("Invalid hex encoding: {0}")]
    InvalidHex(String),

    #[error("Invalid hash length: expected 32, got {0}")]
    InvalidHashLength(usize),

    #[error("JSON serialization error: {0}")]
    Json(String),
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Json(e.to_string())
    }
}

/// Result type for parley-core operations
pub type Result<T> = std::result::Result<T, Error>;
