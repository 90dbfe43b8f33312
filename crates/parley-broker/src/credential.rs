//! Credential issuer: agent registration and credential verification

use chrono::{DateTime, Duration, TimeZone, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use parley_core::{sha256, PublicKey};

use crate::error::{Error, Result};
use crate::keys::KeyAuthority;
use crate::token;
use crate::types::{Agent, AgentType};

/// Claims carried by an agent credential: a signed, time-bounded assertion
/// binding an agent id to the fingerprint of its registered public key.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct CredentialClaims {
    /// Subject agent id.
    pub sub: String,
    pub name: String,
    pub agent_type: AgentType,
    pub owner: String,
    /// SHA-256 of the registered public key's raw bytes, hex.
    pub key_fingerprint: String,
    pub iss: String,
    /// Issued at (unix seconds).
    pub iat: i64,
    /// Expiry (unix seconds).
    pub exp: i64,
}

/// An issued credential with its validity window.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct IssuedCredential {
    pub credential: String,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// Compute the fingerprint of a hex-encoded Ed25519 public key.
///
/// The hash covers the raw 32 key bytes, so the fingerprint is independent
/// of encoding quirks like a `0x` prefix or uppercase hex.
pub fn key_fingerprint(public_key_hex: &str) -> Result<String> {
    let key = PublicKey::from_hex(public_key_hex)?;
    Ok(sha256(key.as_bytes()).to_hex())
}

/// Registration input as supplied by the caller, unvalidated.
#[derive(Clone, Debug, Deserialize)]
pub struct RegisterRequest {
    pub agent_name: String,
    pub agent_type: String,
    pub owner: String,
    /// Hex-encoded Ed25519 public key.
    pub public_key: String,
}

/// Validate a registration request, collecting **every** violated
/// constraint rather than stopping at the first.
pub fn validate_registration(request: &RegisterRequest) -> Vec<String> {
    let mut errors = Vec::new();

    let name = &request.agent_name;
    if name.len() < 3 || name.len() > 100 {
        errors.push("agent_name must be between 3 and 100 characters".to_string());
    } else if !name
        .bytes()
        .all(|b| b.is_ascii_lowercase() || b.is_ascii_digit() || b == b'-')
    {
        errors.push(
            "agent_name must contain only lowercase alphanumeric characters and hyphens"
                .to_string(),
        );
    }

    if AgentType::parse(&request.agent_type).is_none() {
        errors.push("agent_type must be \"personal\" or \"enterprise\"".to_string());
    }

    if request.owner.trim().is_empty() {
        errors.push("owner is required".to_string());
    }

    if PublicKey::from_hex(&request.public_key).is_err() {
        errors.push("public_key must be a valid hex-encoded Ed25519 public key".to_string());
    }

    errors
}

/// Issues and verifies agent credentials with the broker key.
#[derive(Clone)]
pub struct CredentialIssuer {
    authority: Arc<KeyAuthority>,
    issuer: String,
    ttl: Duration,
}

impl CredentialIssuer {
    pub fn new(authority: Arc<KeyAuthority>, issuer: impl Into<String>, ttl: Duration) -> Self {
        Self {
            authority,
            issuer: issuer.into(),
            ttl,
        }
    }

    /// Issue a credential for a registered agent.
    pub fn issue(&self, agent: &Agent) -> Result<IssuedCredential> {
        let issued_at = Utc::now();
        let expires_at = issued_at + self.ttl;

        let claims = CredentialClaims {
            sub: agent.agent_id.clone(),
            name: agent.agent_name.clone(),
            agent_type: agent.agent_type,
            owner: agent.owner.clone(),
            key_fingerprint: key_fingerprint(&agent.public_key)?,
            iss: self.issuer.clone(),
            iat: issued_at.timestamp(),
            exp: expires_at.timestamp(),
        };

        let credential = token::sign_claims(&claims, &self.authority)?;
        tracing::info!(agent_id = %agent.agent_id, exp = claims.exp, "issued agent credential");

        Ok(IssuedCredential {
            credential,
            issued_at,
            expires_at,
        })
    }

    /// Verify a presented credential: signature, issuer, expiry.
    ///
    /// Callers must additionally re-check the embedded fingerprint against
    /// the agent's *current* public key and the agent's active status;
    /// credential validity alone is insufficient.
    pub fn verify(&self, credential: &str) -> Result<CredentialClaims> {
        let claims: CredentialClaims = token::verify_claims(credential, &self.authority)
            .map_err(|_| Error::InvalidCredential("credential rejected".to_string()))?;

        if claims.iss != self.issuer {
            return Err(Error::InvalidCredential("credential rejected".to_string()));
        }
        if token::now_unix() > claims.exp {
            return Err(Error::InvalidCredential("credential rejected".to_string()));
        }

        Ok(claims)
    }

    pub fn issuer(&self) -> &str {
        &self.issuer
    }
}

/// Expiry timestamp of a claims set as a `DateTime`.
pub fn claims_expiry(exp: i64) -> Option<DateTime<Utc>> {
    Utc.timestamp_opt(exp, 0).single()
}
