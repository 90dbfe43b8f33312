//! Trust ledger record types

use chrono::{DateTime, Utc};
use rand_core::{OsRng, RngCore};
use serde::{Deserialize, Serialize};
use serde_json::Value;

/// Mint a prefixed random identifier, e.g. `sess_a1b2c3d4e5f6`.
///
/// `random_bytes` of OS entropy rendered as hex; collision probability is
/// negligible at the sizes used here.
pub fn mint_id(prefix: &str, random_bytes: usize) -> String {
    let mut bytes = vec![0u8; random_bytes];
    OsRng.fill_bytes(&mut bytes);
    format!("{prefix}_{}", hex::encode(bytes))
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentType {
    Personal,
    Enterprise,
}

impl AgentType {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "personal" => Some(Self::Personal),
            "enterprise" => Some(Self::Enterprise),
            _ => None,
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Personal => "personal",
            Self::Enterprise => "enterprise",
        }
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentStatus {
    Active,
    Revoked,
}

/// A registered agent identity. Never deleted; only `status` ever mutates,
/// so historical sessions and receipts keep valid references.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Agent {
    pub agent_id: String,
    pub agent_name: String,
    pub agent_type: AgentType,
    pub owner: String,
    /// Hex-encoded Ed25519 public key.
    pub public_key: String,
    pub status: AgentStatus,
    pub registered_at: DateTime<Utc>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HandshakeStatus {
    PendingTargetAuth,
    Authenticated,
    Expired,
}

impl HandshakeStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::PendingTargetAuth => "pending_target_auth",
            Self::Authenticated => "authenticated",
            Self::Expired => "expired",
        }
    }
}

/// Ephemeral negotiation record. Leaves `pending_target_auth` at most once.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Handshake {
    pub handshake_id: String,
    pub initiator_agent_id: String,
    pub target_agent_id: String,
    pub requested_scope: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub requested_permissions: Option<Vec<String>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<Value>,
    /// Single-use 256-bit nonce the target must sign, hex-encoded.
    pub challenge_nonce: String,
    pub status: HandshakeStatus,
    pub initiated_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SessionStatus {
    Active,
    Closed,
    Expired,
}

impl SessionStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Active => "active",
            Self::Closed => "closed",
            Self::Expired => "expired",
        }
    }
}

/// An action appended to a session's record. Append-only, insertion order.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ActionRecord {
    pub action_id: String,
    pub agent_id: String,
    pub action: String,
    pub details: Value,
    pub timestamp: DateTime<Utc>,
}

/// The established trust context between two authenticated agents.
///
/// Owned exclusively by the broker; agents hold only the opaque
/// `session_id` and a bearer consent token.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Session {
    pub session_id: String,
    pub handshake_id: String,
    pub initiator_agent_id: String,
    pub target_agent_id: String,
    pub scope: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub context: Option<Value>,
    pub status: SessionStatus,
    pub established_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub closed_at: Option<DateTime<Utc>>,
    pub permissions: Vec<String>,
    pub excluded: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub consent_token: Option<String>,
    pub actions: Vec<ActionRecord>,
}

impl Session {
    pub fn is_participant(&self, agent_id: &str) -> bool {
        agent_id == self.initiator_agent_id || agent_id == self.target_agent_id
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HandshakeEventType {
    Initiate,
    Complete,
}

/// Audit entry, one per handshake attempt (success or failure).
/// Never mutated or deleted; exists purely for observability.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct HandshakeEvent {
    pub event_id: String,
    pub event_type: HandshakeEventType,
    pub timestamp: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub handshake_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub initiator_agent_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_agent_id: Option<String>,
    /// Agent names resolved at log time for display.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub initiator_agent_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub target_agent_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub requested_scope: Option<String>,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error_message: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub session_id: Option<String>,
}

/// Audit entry for a blocked out-of-scope action.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ScopeViolation {
    pub violation_id: String,
    pub timestamp: DateTime<Utc>,
    pub session_id: String,
    pub agent_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub agent_name: Option<String>,
    pub attempted_action: String,
    pub scope: String,
    pub result: String,
}
