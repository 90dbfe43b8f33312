//! Broker configuration

use serde::{Deserialize, Serialize};

/// Issuer claim stamped into credentials, consent tokens, and receipts.
pub const DEFAULT_ISSUER: &str = "parley-trust-broker";

fn default_issuer() -> String {
    DEFAULT_ISSUER.to_string()
}

fn default_credential_ttl_secs() -> i64 {
    30 * 24 * 60 * 60
}

fn default_handshake_ttl_secs() -> i64 {
    5 * 60
}

fn default_session_ttl_secs() -> i64 {
    5 * 60
}

/// Configuration for a `TrustBroker`.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(default)]
pub struct BrokerConfig {
    /// Issuer claim for all signed tokens.
    pub issuer: String,
    /// Agent credential validity window (default 30 days).
    pub credential_ttl_secs: i64,
    /// Handshake negotiation window (default 5 minutes).
    pub handshake_ttl_secs: i64,
    /// Session and consent token validity window (default 5 minutes).
    pub session_ttl_secs: i64,
    /// Bearer key for the read-only admin query surface. Unset disables it.
    pub admin_key: Option<String>,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            issuer: default_issuer(),
            credential_ttl_secs: default_credential_ttl_secs(),
            handshake_ttl_secs: default_handshake_ttl_secs(),
            session_ttl_secs: default_session_ttl_secs(),
            admin_key: None,
        }
    }
}
