//! Receipt notary: signed interaction records
//!
//! A receipt is the durable artifact of a closed session: who interacted,
//! under what scope, and every recorded action, signed over the canonical
//! JSON form so any third party holding the broker's public key can verify
//! it offline. Verification always recomputes the canonical bytes from the
//! body the verifier supplies — a single changed field invalidates the
//! signature.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use parley_core::{canonicalize, PublicKey, Signature};

use crate::error::Result;
use crate::keys::KeyAuthority;
use crate::types::{ActionRecord, Agent};

/// Identity fields of one participant, frozen at receipt time.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ReceiptParticipant {
    pub agent_id: String,
    pub agent_name: String,
    pub owner: String,
}

impl From<&Agent> for ReceiptParticipant {
    fn from(agent: &Agent) -> Self {
        Self {
            agent_id: agent.agent_id.clone(),
            agent_name: agent.agent_name.clone(),
            owner: agent.owner.clone(),
        }
    }
}

/// One action as it appears in a receipt. Details are summarized away;
/// the full payload stays in the session record.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ReceiptAction {
    pub action_id: String,
    pub agent_id: String,
    pub action: String,
    pub timestamp: DateTime<Utc>,
}

impl From<&ActionRecord> for ReceiptAction {
    fn from(record: &ActionRecord) -> Self {
        Self {
            action_id: record.action_id.clone(),
            agent_id: record.agent_id.clone(),
            action: record.action.clone(),
            timestamp: record.timestamp,
        }
    }
}

/// The signed portion of a receipt. Every field participates in the
/// signature via canonical serialization.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ReceiptBody {
    pub receipt_id: String,
    pub handshake_id: String,
    pub session_id: String,
    pub initiator: ReceiptParticipant,
    pub target: ReceiptParticipant,
    pub scope: String,
    /// Full action list, insertion order.
    pub actions: Vec<ReceiptAction>,
    pub outcome: String,
    pub session_started: DateTime<Utc>,
    pub session_closed: DateTime<Utc>,
}

/// A notarized receipt: body plus signature and the key that produced it.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Receipt {
    #[serde(flatten)]
    pub body: ReceiptBody,
    /// Hex-encoded Ed25519 signature over the canonical body.
    pub signature: String,
    /// Hex-encoded broker public key, included so verifiers need no
    /// out-of-band key exchange.
    pub broker_public_key: String,
}

/// Outcome of third-party receipt verification.
#[derive(Clone, Debug, Serialize)]
pub struct ReceiptVerification {
    pub valid: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signed_by: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub receipt_id: Option<String>,
    pub tamper_detected: bool,
}

/// Signs receipt bodies with the broker key and verifies presented ones.
#[derive(Clone)]
pub struct ReceiptNotary {
    authority: Arc<KeyAuthority>,
}

impl ReceiptNotary {
    pub fn new(authority: Arc<KeyAuthority>) -> Self {
        Self { authority }
    }

    /// Sign a body, producing the full notarized receipt.
    pub fn notarize(&self, body: ReceiptBody) -> Result<Receipt> {
        let canonical = canonicalize(&serde_json::to_value(&body)?)?;
        let signature = self.authority.sign(canonical.as_bytes());

        tracing::info!(
            receipt_id = %body.receipt_id,
            session_id = %body.session_id,
            actions = body.actions.len(),
            "notarized receipt"
        );

        Ok(Receipt {
            body,
            signature: signature.to_hex(),
            broker_public_key: self.authority.public_key_hex(),
        })
    }

    /// Verify a presented receipt body against this broker's key.
    ///
    /// The body arrives as arbitrary JSON from an untrusted party, so the
    /// canonical bytes are recomputed from exactly what was supplied.
    /// Verification never errors toward the caller; malformed input is
    /// simply an invalid receipt.
    pub fn verify(&self, body: &serde_json::Value, signature_hex: &str) -> ReceiptVerification {
        let receipt_id = body
            .get("receipt_id")
            .and_then(|v| v.as_str())
            .map(str::to_string);

        let valid = match (canonicalize(body), Signature::from_hex(signature_hex)) {
            (Ok(canonical), Ok(signature)) => self
                .authority
                .verify(canonical.as_bytes(), &signature),
            _ => false,
        };

        ReceiptVerification {
            valid,
            signed_by: valid.then(|| self.authority.public_key_hex()),
            receipt_id,
            tamper_detected: !valid,
        }
    }
}

/// Verify a receipt against an arbitrary broker public key, without a
/// notary instance. This is the fully offline path for third parties.
pub fn verify_with_key(
    body: &serde_json::Value,
    signature_hex: &str,
    broker_public_key_hex: &str,
) -> ReceiptVerification {
    let receipt_id = body
        .get("receipt_id")
        .and_then(|v| v.as_str())
        .map(str::to_string);

    let valid = match (
        canonicalize(body),
        Signature::from_hex(signature_hex),
        PublicKey::from_hex(broker_public_key_hex),
    ) {
        (Ok(canonical), Ok(signature), Ok(key)) => key.verify(canonical.as_bytes(), &signature),
        _ => false,
    };

    ReceiptVerification {
        valid,
        signed_by: valid.then(|| broker_public_key_hex.to_string()),
        receipt_id,
        tamper_detected: !valid,
    }
}
