//! Read-only admin query surface
//!
//! Consumed by an operator console. Gated by a bearer key checked in
//! constant time, distinct from agent credentials, and it never mutates
//! ledger state — every aggregate is computed on read.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use crate::error::{Error, Result};
use crate::ledger::TrustLedger;
use crate::types::{
    Agent, AgentStatus, AgentType, HandshakeEvent, HandshakeEventType, ScopeViolation, Session,
    SessionStatus,
};

/// Constant-time byte comparison. The XOR fold touches every byte of both
/// inputs regardless of where they first differ.
fn timing_safe_eq(a: &[u8], b: &[u8]) -> bool {
    if a.len() != b.len() {
        return false;
    }
    let mut diff = 0u8;
    for (x, y) in a.iter().zip(b.iter()) {
        diff |= x ^ y;
    }
    diff == 0
}

#[derive(Clone, Debug, Default)]
pub struct AgentFilter {
    pub status: Option<AgentStatus>,
    pub agent_type: Option<AgentType>,
    /// Case-insensitive substring match on name or owner.
    pub search: Option<String>,
}

#[derive(Clone, Debug, Default)]
pub struct SessionFilter {
    pub status: Option<SessionStatus>,
    pub scope: Option<String>,
    pub agent_id: Option<String>,
}

#[derive(Clone, Debug, Default)]
pub struct EventFilter {
    /// `Some(true)` for successes only, `Some(false)` for failures only.
    pub success: Option<bool>,
    pub event_type: Option<HandshakeEventType>,
    pub agent_id: Option<String>,
    pub scope: Option<String>,
    /// Newest-first cap; defaults to 100.
    pub limit: Option<usize>,
}

#[derive(Clone, Debug, Serialize)]
pub struct AgentCounts {
    pub total: usize,
    pub active: usize,
    pub personal: usize,
    pub enterprise: usize,
}

#[derive(Clone, Debug, Serialize)]
pub struct HandshakeCounts {
    pub total: usize,
    pub successful: usize,
    pub failed: usize,
    /// Percentage with two decimals; `None` when there were no attempts.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub success_rate: Option<f64>,
}

/// Broker-wide aggregates; handshake/receipt/violation counts cover the
/// trailing 24 hours.
#[derive(Clone, Debug, Serialize)]
pub struct Stats {
    pub agents: AgentCounts,
    pub active_sessions: usize,
    pub handshakes_24h: HandshakeCounts,
    pub receipts_24h: usize,
    pub scope_violations_24h: usize,
    pub generated_at: DateTime<Utc>,
}

#[derive(Clone, Debug, Serialize)]
pub struct AgentSummary {
    pub agent_id: String,
    pub agent_name: String,
    pub agent_type: AgentType,
    pub owner: String,
    pub status: AgentStatus,
    pub registered_at: DateTime<Utc>,
    pub session_count: usize,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last_active: Option<DateTime<Utc>>,
}

#[derive(Clone, Debug, Serialize)]
pub struct ParticipantSummary {
    pub agent_id: String,
    pub agent_name: String,
}

#[derive(Clone, Debug, Serialize)]
pub struct SessionSummary {
    pub session_id: String,
    pub handshake_id: String,
    pub initiator: ParticipantSummary,
    pub target: ParticipantSummary,
    pub scope: String,
    pub status: SessionStatus,
    pub action_count: usize,
    pub established_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub closed_at: Option<DateTime<Utc>>,
    pub duration_ms: i64,
    pub has_receipt: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub receipt_id: Option<String>,
}

#[derive(Clone, Debug, Serialize)]
pub struct ReceiptSummary {
    pub receipt_id: String,
    pub handshake_id: String,
    pub session_id: String,
    pub initiator: ParticipantSummary,
    pub target: ParticipantSummary,
    pub scope: String,
    pub action_count: usize,
    pub outcome: String,
    pub session_started: DateTime<Utc>,
    pub session_closed: DateTime<Utc>,
}

/// Read-only queries over the trust ledger.
pub struct AdminConsole {
    ledger: Arc<dyn TrustLedger>,
    admin_key: Option<String>,
}

impl AdminConsole {
    pub fn new(ledger: Arc<dyn TrustLedger>, admin_key: Option<String>) -> Self {
        Self { ledger, admin_key }
    }

    /// Check the caller's bearer key against the configured one.
    fn authorize(&self, bearer: Option<&str>) -> Result<()> {
        let configured = self
            .admin_key
            .as_deref()
            .ok_or(Error::AdminNotConfigured)?;
        let presented =
            bearer.ok_or_else(|| Error::Unauthorized("Admin key required".to_string()))?;
        if !timing_safe_eq(presented.as_bytes(), configured.as_bytes()) {
            return Err(Error::Forbidden("Invalid admin key".to_string()));
        }
        Ok(())
    }

    pub fn stats(&self, bearer: Option<&str>) -> Result<Stats> {
        self.authorize(bearer)?;
        let now = Utc::now();
        let cutoff = now - Duration::hours(24);

        let agents = self.ledger.agents();
        let sessions = self.ledger.sessions();
        let events = self.ledger.handshake_events();
        let receipts = self.ledger.receipts();
        let violations = self.ledger.scope_violations();

        let recent: Vec<_> = events.iter().filter(|e| e.timestamp >= cutoff).collect();
        let successful = recent.iter().filter(|e| e.success).count();
        let total = recent.len();
        let success_rate = (total > 0)
            .then(|| (successful as f64 / total as f64 * 10_000.0).round() / 100.0);

        Ok(Stats {
            agents: AgentCounts {
                total: agents.len(),
                active: agents
                    .iter()
                    .filter(|a| a.status == AgentStatus::Active)
                    .count(),
                personal: agents
                    .iter()
                    .filter(|a| a.agent_type == AgentType::Personal)
                    .count(),
                enterprise: agents
                    .iter()
                    .filter(|a| a.agent_type == AgentType::Enterprise)
                    .count(),
            },
            active_sessions: sessions
                .iter()
                .filter(|s| s.status == SessionStatus::Active)
                .count(),
            handshakes_24h: HandshakeCounts {
                total,
                successful,
                failed: total - successful,
                success_rate,
            },
            receipts_24h: receipts
                .iter()
                .filter(|r| r.body.session_closed >= cutoff)
                .count(),
            scope_violations_24h: violations
                .iter()
                .filter(|v| v.timestamp >= cutoff)
                .count(),
            generated_at: now,
        })
    }

    pub fn list_agents(&self, bearer: Option<&str>, filter: &AgentFilter) -> Result<Vec<AgentSummary>> {
        self.authorize(bearer)?;
        let sessions = self.ledger.sessions();

        let mut summaries: Vec<_> = self
            .ledger
            .agents()
            .into_iter()
            .filter(|agent| {
                filter.status.map_or(true, |s| agent.status == s)
                    && filter.agent_type.map_or(true, |t| agent.agent_type == t)
                    && filter.search.as_deref().map_or(true, |term| {
                        let term = term.to_lowercase();
                        agent.agent_name.to_lowercase().contains(&term)
                            || agent.owner.to_lowercase().contains(&term)
                    })
            })
            .map(|agent| {
                let own: Vec<_> = sessions
                    .iter()
                    .filter(|s| s.is_participant(&agent.agent_id))
                    .collect();
                AgentSummary {
                    session_count: own.len(),
                    last_active: own.iter().map(|s| s.established_at).max(),
                    agent_id: agent.agent_id,
                    agent_name: agent.agent_name,
                    agent_type: agent.agent_type,
                    owner: agent.owner,
                    status: agent.status,
                    registered_at: agent.registered_at,
                }
            })
            .collect();
        summaries.sort_by(|a, b| b.registered_at.cmp(&a.registered_at));
        Ok(summaries)
    }

    pub fn list_sessions(
        &self,
        bearer: Option<&str>,
        filter: &SessionFilter,
    ) -> Result<Vec<SessionSummary>> {
        self.authorize(bearer)?;
        let receipts = self.ledger.receipts();

        let mut summaries: Vec<_> = self
            .ledger
            .sessions()
            .into_iter()
            .filter(|session| {
                filter.status.map_or(true, |s| session.status == s)
                    && filter.scope.as_deref().map_or(true, |s| session.scope == s)
                    && filter
                        .agent_id
                        .as_deref()
                        .map_or(true, |id| session.is_participant(id))
            })
            .map(|session| {
                let receipt = receipts
                    .iter()
                    .find(|r| r.body.session_id == session.session_id);
                SessionSummary {
                    duration_ms: session_duration_ms(&session),
                    has_receipt: receipt.is_some(),
                    receipt_id: receipt.map(|r| r.body.receipt_id.clone()),
                    initiator: self.participant(&session.initiator_agent_id),
                    target: self.participant(&session.target_agent_id),
                    action_count: session.actions.len(),
                    session_id: session.session_id,
                    handshake_id: session.handshake_id,
                    scope: session.scope,
                    status: session.status,
                    established_at: session.established_at,
                    expires_at: session.expires_at,
                    closed_at: session.closed_at,
                }
            })
            .collect();
        summaries.sort_by(|a, b| b.established_at.cmp(&a.established_at));
        Ok(summaries)
    }

    pub fn list_receipts(
        &self,
        bearer: Option<&str>,
        scope: Option<&str>,
    ) -> Result<Vec<ReceiptSummary>> {
        self.authorize(bearer)?;
        let mut summaries: Vec<_> = self
            .ledger
            .receipts()
            .into_iter()
            .filter(|r| scope.map_or(true, |s| r.body.scope == s))
            .map(|r| ReceiptSummary {
                receipt_id: r.body.receipt_id,
                handshake_id: r.body.handshake_id,
                session_id: r.body.session_id,
                initiator: ParticipantSummary {
                    agent_id: r.body.initiator.agent_id,
                    agent_name: r.body.initiator.agent_name,
                },
                target: ParticipantSummary {
                    agent_id: r.body.target.agent_id,
                    agent_name: r.body.target.agent_name,
                },
                scope: r.body.scope,
                action_count: r.body.actions.len(),
                outcome: r.body.outcome,
                session_started: r.body.session_started,
                session_closed: r.body.session_closed,
            })
            .collect();
        summaries.sort_by(|a, b| b.session_closed.cmp(&a.session_closed));
        Ok(summaries)
    }

    pub fn list_handshake_events(
        &self,
        bearer: Option<&str>,
        filter: &EventFilter,
    ) -> Result<Vec<HandshakeEvent>> {
        self.authorize(bearer)?;
        let mut events: Vec<_> = self
            .ledger
            .handshake_events()
            .into_iter()
            .filter(|e| {
                filter.success.map_or(true, |wanted| e.success == wanted)
                    && filter.event_type.map_or(true, |t| e.event_type == t)
                    && filter.agent_id.as_deref().map_or(true, |id| {
                        e.initiator_agent_id.as_deref() == Some(id)
                            || e.target_agent_id.as_deref() == Some(id)
                    })
                    && filter
                        .scope
                        .as_deref()
                        .map_or(true, |s| e.requested_scope.as_deref() == Some(s))
            })
            .collect();
        events.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        events.truncate(filter.limit.unwrap_or(100));
        Ok(events)
    }

    pub fn list_scope_violations(
        &self,
        bearer: Option<&str>,
        session_id: Option<&str>,
        agent_id: Option<&str>,
    ) -> Result<Vec<ScopeViolation>> {
        self.authorize(bearer)?;
        let mut violations: Vec<_> = self
            .ledger
            .scope_violations()
            .into_iter()
            .filter(|v| {
                session_id.map_or(true, |id| v.session_id == id)
                    && agent_id.map_or(true, |id| v.agent_id == id)
            })
            .collect();
        violations.sort_by(|a, b| b.timestamp.cmp(&a.timestamp));
        Ok(violations)
    }

    fn participant(&self, agent_id: &str) -> ParticipantSummary {
        match self.ledger.agent(agent_id) {
            Some(Agent {
                agent_id,
                agent_name,
                ..
            }) => ParticipantSummary {
                agent_id,
                agent_name,
            },
            None => ParticipantSummary {
                agent_id: agent_id.to_string(),
                agent_name: "unknown".to_string(),
            },
        }
    }
}

/// Session duration for display: to close time when closed, to now while
/// active, to the TTL bound once expired.
fn session_duration_ms(session: &Session) -> i64 {
    let end = match (session.closed_at, session.status) {
        (Some(closed_at), _) => closed_at,
        (None, SessionStatus::Active) => Utc::now(),
        (None, _) => session.expires_at,
    };
    (end - session.established_at).num_milliseconds()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::broker::{CompleteRequest, InitiateRequest, RecordRequest, TrustBroker};
    use crate::credential::RegisterRequest;
    use crate::config::BrokerConfig;
    use crate::keys::KeyAuthority;
    use crate::ledger::InMemoryTrustLedger;
    use parley_core::Keypair;

    fn seeded() -> (TrustBroker, AdminConsole) {
        let ledger: Arc<dyn TrustLedger> = Arc::new(InMemoryTrustLedger::new());
        let broker = TrustBroker::with_parts(
            BrokerConfig::default(),
            Arc::new(KeyAuthority::from_seed(&[13u8; 32])),
            Arc::clone(&ledger),
        );
        let console = AdminConsole::new(ledger, Some("sekrit".to_string()));

        let a_keys = Keypair::generate();
        let b_keys = Keypair::generate();
        let a = broker
            .register_agent(RegisterRequest {
                agent_name: "travel-assistant".to_string(),
                agent_type: "personal".to_string(),
                owner: "Pat Doe".to_string(),
                public_key: a_keys.public_key().to_hex(),
            })
            .unwrap();
        let b = broker
            .register_agent(RegisterRequest {
                agent_name: "airline-rebooker".to_string(),
                agent_type: "enterprise".to_string(),
                owner: "Acme Air".to_string(),
                public_key: b_keys.public_key().to_hex(),
            })
            .unwrap();

        let challenge = broker
            .initiate_handshake(InitiateRequest {
                initiator_credential: a.credential.credential.clone(),
                target_agent_id: b.agent.agent_id.clone(),
                requested_scope: "flight-rebooking".to_string(),
                requested_permissions: None,
                context: None,
            })
            .unwrap();
        let nonce = hex::decode(&challenge.challenge_for_target).unwrap();
        let completed = broker
            .complete_handshake(CompleteRequest {
                handshake_id: challenge.handshake_id,
                target_credential: b.credential.credential.clone(),
                challenge_response: b_keys.sign(&nonce).to_hex(),
            })
            .unwrap();

        // One in-scope action, one blocked one.
        broker
            .record_interaction(RecordRequest {
                session_id: completed.session.session_id.clone(),
                consent_token: Some(completed.consent_token.token.clone()),
                agent_id: a.agent.agent_id.clone(),
                action: "read_bookings".to_string(),
                details: None,
            })
            .unwrap();
        broker
            .record_interaction(RecordRequest {
                session_id: completed.session.session_id.clone(),
                consent_token: Some(completed.consent_token.token.clone()),
                agent_id: a.agent.agent_id,
                action: "loyalty_transfers".to_string(),
                details: None,
            })
            .unwrap();
        broker.generate_receipt(&completed.session.session_id).unwrap();

        (broker, console)
    }

    #[test]
    fn bearer_key_is_required_and_checked() {
        let (_, console) = seeded();
        assert!(matches!(
            console.stats(None),
            Err(Error::Unauthorized(_))
        ));
        assert!(matches!(
            console.stats(Some("wrong")),
            Err(Error::Forbidden(_))
        ));
        assert!(console.stats(Some("sekrit")).is_ok());
    }

    #[test]
    fn broker_hands_out_a_console_with_its_configured_key() {
        let broker = TrustBroker::new(BrokerConfig {
            admin_key: Some("sekrit".to_string()),
            ..BrokerConfig::default()
        });
        let console = broker.admin_console();
        assert!(matches!(console.stats(None), Err(Error::Unauthorized(_))));
        assert!(console.stats(Some("sekrit")).is_ok());

        let unconfigured = TrustBroker::new(BrokerConfig::default()).admin_console();
        assert!(matches!(
            unconfigured.stats(Some("sekrit")),
            Err(Error::AdminNotConfigured)
        ));
    }

    #[test]
    fn unconfigured_console_rejects_everything() {
        let ledger: Arc<dyn TrustLedger> = Arc::new(InMemoryTrustLedger::new());
        let console = AdminConsole::new(ledger, None);
        assert!(matches!(
            console.stats(Some("anything")),
            Err(Error::AdminNotConfigured)
        ));
    }

    #[test]
    fn stats_reflect_ledger_contents() {
        let (_, console) = seeded();
        let stats = console.stats(Some("sekrit")).unwrap();

        assert_eq!(stats.agents.total, 2);
        assert_eq!(stats.agents.active, 2);
        assert_eq!(stats.agents.personal, 1);
        assert_eq!(stats.agents.enterprise, 1);
        // Session was closed by receipt generation.
        assert_eq!(stats.active_sessions, 0);
        assert_eq!(stats.handshakes_24h.total, 2);
        assert_eq!(stats.handshakes_24h.successful, 2);
        assert_eq!(stats.handshakes_24h.success_rate, Some(100.0));
        assert_eq!(stats.receipts_24h, 1);
        assert_eq!(stats.scope_violations_24h, 1);
    }

    #[test]
    fn agent_listing_filters_and_enriches() {
        let (_, console) = seeded();

        let all = console
            .list_agents(Some("sekrit"), &AgentFilter::default())
            .unwrap();
        assert_eq!(all.len(), 2);
        assert!(all.iter().all(|a| a.session_count == 1));
        assert!(all.iter().all(|a| a.last_active.is_some()));

        let enterprise = console
            .list_agents(
                Some("sekrit"),
                &AgentFilter {
                    agent_type: Some(AgentType::Enterprise),
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(enterprise.len(), 1);
        assert_eq!(enterprise[0].agent_name, "airline-rebooker");

        let searched = console
            .list_agents(
                Some("sekrit"),
                &AgentFilter {
                    search: Some("ACME".to_string()),
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(searched.len(), 1);
        assert_eq!(searched[0].owner, "Acme Air");
    }

    #[test]
    fn session_listing_links_receipt() {
        let (_, console) = seeded();
        let sessions = console
            .list_sessions(Some("sekrit"), &SessionFilter::default())
            .unwrap();
        assert_eq!(sessions.len(), 1);

        let session = &sessions[0];
        assert_eq!(session.status, SessionStatus::Closed);
        assert_eq!(session.action_count, 1);
        assert!(session.has_receipt);
        assert!(session.receipt_id.is_some());
        assert!(session.duration_ms >= 0);
        assert_eq!(session.initiator.agent_name, "travel-assistant");
    }

    #[test]
    fn event_listing_filters_by_outcome() {
        let (broker, console) = seeded();
        // Add a failed attempt.
        let _ = broker.initiate_handshake(InitiateRequest {
            initiator_credential: "garbage".to_string(),
            target_agent_id: "agt_x".to_string(),
            requested_scope: "flight-rebooking".to_string(),
            requested_permissions: None,
            context: None,
        });

        let failed = console
            .list_handshake_events(
                Some("sekrit"),
                &EventFilter {
                    success: Some(false),
                    ..Default::default()
                },
            )
            .unwrap();
        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].error_code.as_deref(), Some("invalid_credential"));
    }

    #[test]
    fn violations_filter_by_agent() {
        let (broker, console) = seeded();
        let violations = console
            .list_scope_violations(Some("sekrit"), None, None)
            .unwrap();
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].attempted_action, "loyalty_transfers");

        let none = console
            .list_scope_violations(Some("sekrit"), None, Some("agt_other"))
            .unwrap();
        assert!(none.is_empty());
        drop(broker);
    }

    #[test]
    fn timing_safe_eq_basics() {
        assert!(timing_safe_eq(b"abc", b"abc"));
        assert!(!timing_safe_eq(b"abc", b"abd"));
        assert!(!timing_safe_eq(b"abc", b"ab"));
        assert!(timing_safe_eq(b"", b""));
    }
}
