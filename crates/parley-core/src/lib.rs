#![cfg_attr(test, allow(clippy::expect_used, clippy::unwrap_used))]

//! # parley-core
//!
//! Cryptographic primitives for the Parley trust broker.
//!
//! This crate provides:
//! - Ed25519 signing and verification
//! - SHA-256 hashing and public-key fingerprints
//! - Canonical JSON serialization for deterministic signing
//!
//! ## Quick Start
//!
//! ```rust
//! use parley_core::{sha256, Keypair};
//!
//! let keypair = Keypair::generate();
//! let signature = keypair.sign(b"challenge");
//! assert!(keypair.public_key().verify(b"challenge", &signature));
//!
//! let fingerprint = sha256(keypair.public_key().as_bytes());
//! assert_eq!(fingerprint.as_bytes().len(), 32);
//! ```

pub mod canonical;
pub mod error;
pub mod hashing;
pub mod signing;

pub use canonical::canonicalize;
pub use error::{Error, Result};
pub use hashing::{sha256, sha256_hex, Hash};
pub use signing::{Keypair, PublicKey, Signature};
