//! Trust broker facade
//!
//! Wires the key authority, credential issuer, consent issuer, scope
//! registry, receipt notary, and trust ledger into the boundary operations
//! agents actually call. Transport is out of scope; every operation is a
//! plain request/response pair.

use std::sync::Arc;

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::admin::AdminConsole;
use crate::challenge;
use crate::config::BrokerConfig;
use crate::consent::{ConsentDecision, ConsentIssuer};
use crate::credential::{
    key_fingerprint, validate_registration, CredentialClaims, CredentialIssuer, IssuedCredential,
    RegisterRequest,
};
use crate::error::{Error, Result};
use crate::keys::KeyAuthority;
use crate::ledger::{
    AppendOutcome, AuthenticateOutcome, CloseOutcome, InMemoryTrustLedger, TrustLedger,
};
use crate::receipt::{verify_with_key, Receipt, ReceiptBody, ReceiptNotary, ReceiptVerification};
use crate::scopes::ScopeRegistry;
use crate::types::{
    mint_id, ActionRecord, Agent, AgentStatus, AgentType, Handshake, HandshakeEvent,
    HandshakeEventType, HandshakeStatus, ScopeViolation, Session, SessionStatus,
};

/// Successful registration: the persisted agent plus its first credential.
#[derive(Clone, Debug, Serialize)]
pub struct Registration {
    pub agent: Agent,
    pub credential: IssuedCredential,
}

#[derive(Clone, Debug, Deserialize)]
pub struct InitiateRequest {
    pub initiator_credential: String,
    pub target_agent_id: String,
    pub requested_scope: String,
    #[serde(default)]
    pub requested_permissions: Option<Vec<String>>,
    #[serde(default)]
    pub context: Option<Value>,
}

/// Phase-one result: the challenge the target must sign.
#[derive(Clone, Debug, Serialize)]
pub struct ChallengeIssued {
    pub handshake_id: String,
    pub status: HandshakeStatus,
    pub initiator_verified: bool,
    pub initiator_agent_id: String,
    pub target_agent_id: String,
    /// Hex nonce; the target signs the raw bytes.
    pub challenge_for_target: String,
    pub requested_scope: String,
    pub expires_at: DateTime<Utc>,
}

#[derive(Clone, Debug, Deserialize)]
pub struct CompleteRequest {
    pub handshake_id: String,
    pub target_credential: String,
    /// Hex Ed25519 signature over the raw challenge nonce bytes.
    pub challenge_response: String,
}

/// Consent grant returned alongside a freshly established session.
#[derive(Clone, Debug, Serialize)]
pub struct ConsentGrant {
    pub token: String,
    pub scope: String,
    pub permissions: Vec<String>,
    pub excluded: Vec<String>,
    pub session_id: String,
    pub issued_at: DateTime<Utc>,
    pub expires_at: DateTime<Utc>,
}

/// Phase-two result: mutual authentication established.
#[derive(Clone, Debug, Serialize)]
pub struct HandshakeCompleted {
    pub handshake_id: String,
    pub status: HandshakeStatus,
    pub mutual_auth: bool,
    pub session: Session,
    pub consent_token: ConsentGrant,
}

#[derive(Clone, Debug, Deserialize)]
pub struct RecordRequest {
    pub session_id: String,
    #[serde(default)]
    pub consent_token: Option<String>,
    pub agent_id: String,
    pub action: String,
    #[serde(default)]
    pub details: Option<Value>,
}

/// Outcome of an interaction recording attempt. Scope denial is a
/// successful call with `recorded == false`, never an `Err`.
#[derive(Clone, Debug, Serialize)]
pub struct RecordOutcome {
    pub recorded: bool,
    pub within_scope: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub action_id: Option<String>,
    pub action: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

/// Fields describing one handshake attempt, folded into the audit event.
#[derive(Default)]
struct EventFields<'a> {
    handshake_id: Option<&'a str>,
    initiator_agent_id: Option<&'a str>,
    target_agent_id: Option<&'a str>,
    requested_scope: Option<&'a str>,
    session_id: Option<&'a str>,
}

/// The neutral trust broker. One instance per process; all components share
/// the same key authority and ledger.
pub struct TrustBroker {
    config: BrokerConfig,
    authority: Arc<KeyAuthority>,
    credentials: CredentialIssuer,
    consent: ConsentIssuer,
    scopes: ScopeRegistry,
    notary: ReceiptNotary,
    ledger: Arc<dyn TrustLedger>,
}

impl TrustBroker {
    /// Broker with a fresh keypair and an empty in-memory ledger.
    pub fn new(config: BrokerConfig) -> Self {
        Self::with_parts(
            config,
            Arc::new(KeyAuthority::new()),
            Arc::new(InMemoryTrustLedger::new()),
        )
    }

    /// Broker over an explicit key authority and ledger.
    pub fn with_parts(
        config: BrokerConfig,
        authority: Arc<KeyAuthority>,
        ledger: Arc<dyn TrustLedger>,
    ) -> Self {
        let credentials = CredentialIssuer::new(
            Arc::clone(&authority),
            config.issuer.clone(),
            Duration::seconds(config.credential_ttl_secs),
        );
        let consent = ConsentIssuer::new(Arc::clone(&authority), config.issuer.clone());
        let notary = ReceiptNotary::new(Arc::clone(&authority));

        Self {
            config,
            authority,
            credentials,
            consent,
            scopes: ScopeRegistry::builtin(),
            notary,
            ledger,
        }
    }

    pub fn config(&self) -> &BrokerConfig {
        &self.config
    }

    pub fn ledger(&self) -> &Arc<dyn TrustLedger> {
        &self.ledger
    }

    /// Admin query surface over this broker's ledger, gated by the
    /// configured admin key.
    pub fn admin_console(&self) -> AdminConsole {
        AdminConsole::new(Arc::clone(&self.ledger), self.config.admin_key.clone())
    }

    /// The broker's public key, for independent offline verification.
    pub fn public_key_hex(&self) -> String {
        self.authority.public_key_hex()
    }

    /// Register a new agent identity and issue its first credential.
    pub fn register_agent(&self, request: RegisterRequest) -> Result<Registration> {
        let errors = validate_registration(&request);
        if !errors.is_empty() {
            return Err(Error::Validation(errors));
        }
        // Validated above.
        let agent_type = AgentType::parse(&request.agent_type)
            .ok_or_else(|| Error::Validation(vec!["agent_type is invalid".to_string()]))?;

        let agent = Agent {
            agent_id: mint_id("agt", 8),
            agent_name: request.agent_name,
            agent_type,
            owner: request.owner,
            public_key: request.public_key,
            status: AgentStatus::Active,
            registered_at: Utc::now(),
        };

        if !self.ledger.insert_agent(agent.clone()) {
            return Err(Error::AgentNameTaken(agent.agent_name));
        }

        let credential = self.credentials.issue(&agent)?;
        tracing::info!(
            agent_id = %agent.agent_id,
            agent_name = %agent.agent_name,
            agent_type = agent.agent_type.as_str(),
            "registered agent"
        );

        Ok(Registration { agent, credential })
    }

    /// Flip an agent's status (binary revocation).
    pub fn set_agent_status(&self, agent_id: &str, status: AgentStatus) -> Result<Agent> {
        if !self.ledger.set_agent_status(agent_id, status) {
            return Err(Error::NotFound("Agent not found".to_string()));
        }
        tracing::info!(agent_id, ?status, "agent status changed");
        self.ledger
            .agent(agent_id)
            .ok_or_else(|| Error::NotFound("Agent not found".to_string()))
    }

    /// Verify a presented credential and bind it to a live agent record:
    /// signature/issuer/expiry, agent exists and is active, and the embedded
    /// fingerprint matches the agent's current key. All failures collapse
    /// into `invalid_credential`.
    fn verify_bound_credential(&self, credential: &str) -> Result<(CredentialClaims, Agent)> {
        let rejected = || Error::InvalidCredential("credential rejected".to_string());

        let claims = self.credentials.verify(credential)?;
        let agent = self.ledger.agent(&claims.sub).ok_or_else(rejected)?;
        if agent.status != AgentStatus::Active {
            return Err(rejected());
        }
        // Key rotation invalidates credentials issued for the old key.
        if key_fingerprint(&agent.public_key)? != claims.key_fingerprint {
            return Err(rejected());
        }
        Ok((claims, agent))
    }

    fn log_event(
        &self,
        event_type: HandshakeEventType,
        fields: EventFields<'_>,
        outcome: std::result::Result<(), &Error>,
    ) {
        let resolve_name = |id: Option<&str>| {
            id.and_then(|id| self.ledger.agent(id))
                .map(|agent| agent.agent_name)
        };

        let (success, error_code, error_message) = match outcome {
            Ok(()) => (true, None, None),
            Err(error) => (false, Some(error.code().to_string()), Some(error.to_string())),
        };

        self.ledger.log_handshake_event(HandshakeEvent {
            event_id: mint_id("hse", 4),
            event_type,
            timestamp: Utc::now(),
            handshake_id: fields.handshake_id.map(str::to_string),
            initiator_agent_id: fields.initiator_agent_id.map(str::to_string),
            target_agent_id: fields.target_agent_id.map(str::to_string),
            initiator_agent_name: resolve_name(fields.initiator_agent_id),
            target_agent_name: resolve_name(fields.target_agent_id),
            requested_scope: fields.requested_scope.map(str::to_string),
            success,
            error_code,
            error_message,
            session_id: fields.session_id.map(str::to_string),
        });
    }

    /// Phase one: verify the initiator and issue a challenge addressed to
    /// the target. The initiator never sees the target's private material
    /// and cannot forge the response.
    pub fn initiate_handshake(&self, request: InitiateRequest) -> Result<ChallengeIssued> {
        let result = self.try_initiate(&request);
        if let Err(error) = &result {
            self.log_event(
                HandshakeEventType::Initiate,
                EventFields {
                    target_agent_id: Some(&request.target_agent_id),
                    requested_scope: Some(&request.requested_scope),
                    ..Default::default()
                },
                Err(error),
            );
        }
        result
    }

    fn try_initiate(&self, request: &InitiateRequest) -> Result<ChallengeIssued> {
        let mut missing = Vec::new();
        if request.initiator_credential.is_empty() {
            missing.push("initiator_credential is required".to_string());
        }
        if request.target_agent_id.is_empty() {
            missing.push("target_agent_id is required".to_string());
        }
        if request.requested_scope.is_empty() {
            missing.push("requested_scope is required".to_string());
        }
        if !missing.is_empty() {
            return Err(Error::Validation(missing));
        }

        let (claims, _initiator) = self.verify_bound_credential(&request.initiator_credential)?;

        let target = self
            .ledger
            .agent(&request.target_agent_id)
            .ok_or_else(|| Error::NotFound("Target agent not found".to_string()))?;
        if target.status != AgentStatus::Active {
            return Err(Error::NotFound("Target agent is not active".to_string()));
        }

        let now = Utc::now();
        let expires_at = now + Duration::seconds(self.config.handshake_ttl_secs);
        let handshake = Handshake {
            handshake_id: mint_id("hs", 6),
            initiator_agent_id: claims.sub.clone(),
            target_agent_id: target.agent_id.clone(),
            requested_scope: request.requested_scope.clone(),
            requested_permissions: request.requested_permissions.clone(),
            context: request.context.clone(),
            challenge_nonce: challenge::new_challenge(),
            status: HandshakeStatus::PendingTargetAuth,
            initiated_at: now,
            expires_at,
        };
        self.ledger.insert_handshake(handshake.clone());

        self.log_event(
            HandshakeEventType::Initiate,
            EventFields {
                handshake_id: Some(&handshake.handshake_id),
                initiator_agent_id: Some(&claims.sub),
                target_agent_id: Some(&target.agent_id),
                requested_scope: Some(&request.requested_scope),
                ..Default::default()
            },
            Ok(()),
        );
        tracing::info!(
            handshake_id = %handshake.handshake_id,
            initiator = %claims.sub,
            target = %target.agent_id,
            scope = %request.requested_scope,
            "handshake initiated"
        );

        Ok(ChallengeIssued {
            handshake_id: handshake.handshake_id,
            status: HandshakeStatus::PendingTargetAuth,
            initiator_verified: true,
            initiator_agent_id: claims.sub.clone(),
            target_agent_id: target.agent_id,
            challenge_for_target: handshake.challenge_nonce,
            requested_scope: request.requested_scope.clone(),
            expires_at,
        })
    }

    /// Phase two: the target proves key possession; on success the broker
    /// establishes a session and mints its consent token.
    ///
    /// Completion is not idempotent: a second attempt on an authenticated
    /// handshake is always `already_completed`. Two concurrent completes
    /// yield exactly one session.
    pub fn complete_handshake(&self, request: CompleteRequest) -> Result<HandshakeCompleted> {
        let snapshot = self.ledger.handshake(&request.handshake_id);
        let result = self.try_complete(&request, snapshot.as_ref());

        let fields = match &snapshot {
            Some(handshake) => EventFields {
                handshake_id: Some(&request.handshake_id),
                initiator_agent_id: Some(&handshake.initiator_agent_id),
                target_agent_id: Some(&handshake.target_agent_id),
                requested_scope: Some(&handshake.requested_scope),
                session_id: result.as_ref().ok().map(|c| c.session.session_id.as_str()),
            },
            None => EventFields {
                handshake_id: Some(&request.handshake_id),
                ..Default::default()
            },
        };
        self.log_event(HandshakeEventType::Complete, fields, result.as_ref().map(|_| ()));
        result
    }

    fn try_complete(
        &self,
        request: &CompleteRequest,
        snapshot: Option<&Handshake>,
    ) -> Result<HandshakeCompleted> {
        let mut missing = Vec::new();
        if request.handshake_id.is_empty() {
            missing.push("handshake_id is required".to_string());
        }
        if request.target_credential.is_empty() {
            missing.push("target_credential is required".to_string());
        }
        if request.challenge_response.is_empty() {
            missing.push("challenge_response is required".to_string());
        }
        if !missing.is_empty() {
            return Err(Error::Validation(missing));
        }

        let handshake = snapshot
            .ok_or_else(|| Error::NotFound("Handshake not found".to_string()))?;

        let now = Utc::now();
        match handshake.status {
            HandshakeStatus::Authenticated => return Err(Error::AlreadyCompleted),
            HandshakeStatus::PendingTargetAuth if now > handshake.expires_at => {
                // Lazy expiry: this failing attempt flips the stored status.
                self.ledger
                    .authenticate_handshake(&request.handshake_id, now);
                return Err(Error::Expired("Handshake".to_string()));
            }
            HandshakeStatus::PendingTargetAuth => {}
            status => {
                return Err(Error::InvalidState(format!(
                    "Handshake is in state '{}'",
                    status.as_str()
                )))
            }
        }

        let (claims, target) = self.verify_bound_credential(&request.target_credential)?;
        // A third party's valid credential must not complete this handshake.
        if claims.sub != handshake.target_agent_id {
            return Err(Error::InvalidCredential(
                "credential does not match the target agent for this handshake".to_string(),
            ));
        }

        if !challenge::verify_response(
            &request.challenge_response,
            &handshake.challenge_nonce,
            &target.public_key,
        ) {
            return Err(Error::InvalidChallengeResponse);
        }

        // All checks passed; attempt the single pending → authenticated
        // transition. A concurrent winner surfaces here as a terminal error
        // and no session is created.
        let handshake = match self
            .ledger
            .authenticate_handshake(&request.handshake_id, Utc::now())
        {
            AuthenticateOutcome::Authenticated(handshake) => handshake,
            AuthenticateOutcome::AlreadyCompleted => return Err(Error::AlreadyCompleted),
            AuthenticateOutcome::Expired => return Err(Error::Expired("Handshake".to_string())),
            AuthenticateOutcome::NotFound => {
                return Err(Error::NotFound("Handshake not found".to_string()))
            }
        };

        let established_at = Utc::now();
        let expires_at = established_at + Duration::seconds(self.config.session_ttl_secs);
        let session_id = mint_id("sess", 6);

        let (permissions, excluded) = self.scopes.resolve(
            &handshake.requested_scope,
            handshake.requested_permissions.as_deref(),
        );
        let consent_token = self.consent.issue(
            &handshake.requested_scope,
            permissions.clone(),
            excluded.clone(),
            &session_id,
            expires_at,
        )?;

        let session = Session {
            session_id: session_id.clone(),
            handshake_id: handshake.handshake_id.clone(),
            initiator_agent_id: handshake.initiator_agent_id.clone(),
            target_agent_id: handshake.target_agent_id.clone(),
            scope: handshake.requested_scope.clone(),
            context: handshake.context.clone(),
            status: SessionStatus::Active,
            established_at,
            expires_at,
            closed_at: None,
            permissions: permissions.clone(),
            excluded: excluded.clone(),
            consent_token: Some(consent_token.clone()),
            actions: Vec::new(),
        };
        self.ledger.insert_session(session.clone());

        tracing::info!(
            handshake_id = %handshake.handshake_id,
            session_id = %session_id,
            scope = %handshake.requested_scope,
            "handshake completed, session established"
        );

        Ok(HandshakeCompleted {
            handshake_id: handshake.handshake_id,
            status: HandshakeStatus::Authenticated,
            mutual_auth: true,
            session,
            consent_token: ConsentGrant {
                token: consent_token,
                scope: handshake.requested_scope,
                permissions,
                excluded,
                session_id,
                issued_at: established_at,
                expires_at,
            },
        })
    }

    /// Check whether a consent token permits an action for a session.
    pub fn verify_consent(
        &self,
        consent_token: &str,
        action: &str,
        session_id: &str,
    ) -> Result<ConsentDecision> {
        self.consent.verify_action(consent_token, action, session_id)
    }

    /// Record an action against an active session, gated by consent scope
    /// when a token is supplied.
    pub fn record_interaction(&self, request: RecordRequest) -> Result<RecordOutcome> {
        let mut missing = Vec::new();
        if request.session_id.is_empty() {
            missing.push("session_id is required".to_string());
        }
        if request.agent_id.is_empty() {
            missing.push("agent_id is required".to_string());
        }
        if request.action.is_empty() {
            missing.push("action is required".to_string());
        }
        if !missing.is_empty() {
            return Err(Error::Validation(missing));
        }

        let session = self
            .ledger
            .session(&request.session_id)
            .ok_or_else(|| Error::NotFound("Session not found".to_string()))?;
        if session.status != SessionStatus::Active {
            return Err(Error::InvalidState(format!(
                "Session is in state '{}'",
                session.status.as_str()
            )));
        }
        if self
            .ledger
            .expire_session_if_due(&request.session_id, Utc::now())
        {
            return Err(Error::Expired("Session".to_string()));
        }

        // A session is a closed two-party relationship.
        if !session.is_participant(&request.agent_id) {
            return Err(Error::Forbidden(
                "Agent is not a participant in this session".to_string(),
            ));
        }

        if let Some(token) = &request.consent_token {
            let decision = self
                .consent
                .verify_action(token, &request.action, &request.session_id)?;
            if !decision.permitted {
                self.ledger.log_scope_violation(ScopeViolation {
                    violation_id: mint_id("sv", 4),
                    timestamp: Utc::now(),
                    session_id: request.session_id.clone(),
                    agent_id: request.agent_id.clone(),
                    agent_name: self
                        .ledger
                        .agent(&request.agent_id)
                        .map(|agent| agent.agent_name),
                    attempted_action: request.action.clone(),
                    scope: session.scope.clone(),
                    result: "blocked".to_string(),
                });
                tracing::warn!(
                    session_id = %request.session_id,
                    agent_id = %request.agent_id,
                    action = %request.action,
                    "out-of-scope action blocked"
                );
                // Denial is an expected outcome, not a system fault.
                return Ok(RecordOutcome {
                    recorded: false,
                    within_scope: false,
                    action_id: None,
                    action: request.action,
                    timestamp: None,
                    reason: decision.reason,
                });
            }
        }

        let record = ActionRecord {
            action_id: mint_id("act", 4),
            agent_id: request.agent_id,
            action: request.action.clone(),
            details: request.details.unwrap_or_else(|| Value::Object(Default::default())),
            timestamp: Utc::now(),
        };
        match self
            .ledger
            .append_action(&request.session_id, record, Utc::now())
        {
            AppendOutcome::Appended(record) => Ok(RecordOutcome {
                recorded: true,
                within_scope: true,
                action_id: Some(record.action_id),
                action: record.action,
                timestamp: Some(record.timestamp),
                reason: None,
            }),
            AppendOutcome::Expired => Err(Error::Expired("Session".to_string())),
            AppendOutcome::InvalidState(status) => Err(Error::InvalidState(format!(
                "Session is in state '{}'",
                status.as_str()
            ))),
            AppendOutcome::NotFound => Err(Error::NotFound("Session not found".to_string())),
        }
    }

    /// Close a session and notarize its receipt. Generation is the only
    /// path that closes a session; concurrent calls yield exactly one
    /// receipt.
    pub fn generate_receipt(&self, session_id: &str) -> Result<Receipt> {
        if self.ledger.session(session_id).is_none() {
            return Err(Error::NotFound("Session not found".to_string()));
        }

        let session = match self.ledger.close_session(session_id, Utc::now()) {
            CloseOutcome::Closed(session) => session,
            CloseOutcome::AlreadyClosed => return Err(Error::AlreadyClosed),
            CloseOutcome::NotFound => {
                return Err(Error::NotFound("Session not found".to_string()))
            }
        };

        let initiator = self
            .ledger
            .agent(&session.initiator_agent_id)
            .ok_or_else(|| Error::NotFound("Initiator agent not found".to_string()))?;
        let target = self
            .ledger
            .agent(&session.target_agent_id)
            .ok_or_else(|| Error::NotFound("Target agent not found".to_string()))?;
        let closed_at = session.closed_at.unwrap_or_else(Utc::now);

        let body = ReceiptBody {
            receipt_id: mint_id("rcpt", 6),
            handshake_id: session.handshake_id.clone(),
            session_id: session.session_id.clone(),
            initiator: (&initiator).into(),
            target: (&target).into(),
            scope: session.scope.clone(),
            actions: session.actions.iter().map(Into::into).collect(),
            outcome: "completed".to_string(),
            session_started: session.established_at,
            session_closed: closed_at,
        };

        let receipt = self.notary.notarize(body)?;
        self.ledger.insert_receipt(receipt.clone());
        Ok(receipt)
    }

    /// Verify a presented receipt body/signature pair against this broker's
    /// key. No authentication required.
    pub fn verify_receipt(&self, body: &Value, signature_hex: &str) -> ReceiptVerification {
        self.notary.verify(body, signature_hex)
    }

    /// Fully offline verification against an arbitrary broker key.
    pub fn verify_receipt_with_key(
        body: &Value,
        signature_hex: &str,
        broker_public_key_hex: &str,
    ) -> ReceiptVerification {
        verify_with_key(body, signature_hex, broker_public_key_hex)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use parley_core::Keypair;

    fn broker() -> TrustBroker {
        TrustBroker::with_parts(
            BrokerConfig::default(),
            Arc::new(KeyAuthority::from_seed(&[11u8; 32])),
            Arc::new(InMemoryTrustLedger::new()),
        )
    }

    fn register(broker: &TrustBroker, name: &str, agent_type: &str) -> (Registration, Keypair) {
        let keypair = Keypair::generate();
        let registration = broker
            .register_agent(RegisterRequest {
                agent_name: name.to_string(),
                agent_type: agent_type.to_string(),
                owner: format!("{name} owner"),
                public_key: keypair.public_key().to_hex(),
            })
            .unwrap();
        (registration, keypair)
    }

    fn establish_session(
        broker: &TrustBroker,
    ) -> (Registration, Keypair, Registration, HandshakeCompleted) {
        let (a, a_keys) = register(broker, "travel-assistant", "personal");
        let (b, b_keys) = register(broker, "airline-rebooker", "enterprise");

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

        (a, a_keys, b, completed)
    }

    #[test]
    fn duplicate_agent_name_rejected() {
        let broker = broker();
        register(&broker, "travel-assistant", "personal");
        let keypair = Keypair::generate();
        let result = broker.register_agent(RegisterRequest {
            agent_name: "travel-assistant".to_string(),
            agent_type: "personal".to_string(),
            owner: "someone else".to_string(),
            public_key: keypair.public_key().to_hex(),
        });
        assert!(matches!(result, Err(Error::AgentNameTaken(_))));
    }

    #[test]
    fn initiate_rejects_unknown_target() {
        let broker = broker();
        let (a, _) = register(&broker, "travel-assistant", "personal");
        let result = broker.initiate_handshake(InitiateRequest {
            initiator_credential: a.credential.credential,
            target_agent_id: "agt_missing".to_string(),
            requested_scope: "flight-rebooking".to_string(),
            requested_permissions: None,
            context: None,
        });
        assert!(matches!(result, Err(Error::NotFound(_))));
    }

    #[test]
    fn initiate_rejects_revoked_initiator() {
        let broker = broker();
        let (a, _) = register(&broker, "travel-assistant", "personal");
        let (b, _) = register(&broker, "airline-rebooker", "enterprise");
        broker
            .set_agent_status(&a.agent.agent_id, AgentStatus::Revoked)
            .unwrap();

        let result = broker.initiate_handshake(InitiateRequest {
            initiator_credential: a.credential.credential,
            target_agent_id: b.agent.agent_id,
            requested_scope: "flight-rebooking".to_string(),
            requested_permissions: None,
            context: None,
        });
        assert!(matches!(result, Err(Error::InvalidCredential(_))));
    }

    #[test]
    fn complete_with_wrong_agents_credential_rejected() {
        let broker = broker();
        let (a, a_keys) = register(&broker, "travel-assistant", "personal");
        let (b, _) = register(&broker, "airline-rebooker", "enterprise");

        let challenge = broker
            .initiate_handshake(InitiateRequest {
                initiator_credential: a.credential.credential.clone(),
                target_agent_id: b.agent.agent_id,
                requested_scope: "flight-rebooking".to_string(),
                requested_permissions: None,
                context: None,
            })
            .unwrap();

        // The initiator's own (valid) credential must not complete it.
        let nonce = hex::decode(&challenge.challenge_for_target).unwrap();
        let result = broker.complete_handshake(CompleteRequest {
            handshake_id: challenge.handshake_id,
            target_credential: a.credential.credential,
            challenge_response: a_keys.sign(&nonce).to_hex(),
        });
        assert!(matches!(result, Err(Error::InvalidCredential(_))));
    }

    #[test]
    fn complete_with_bad_signature_rejected_and_retriable() {
        let broker = broker();
        let (a, _) = register(&broker, "travel-assistant", "personal");
        let (b, b_keys) = register(&broker, "airline-rebooker", "enterprise");

        let challenge = broker
            .initiate_handshake(InitiateRequest {
                initiator_credential: a.credential.credential,
                target_agent_id: b.agent.agent_id,
                requested_scope: "flight-rebooking".to_string(),
                requested_permissions: None,
                context: None,
            })
            .unwrap();

        let result = broker.complete_handshake(CompleteRequest {
            handshake_id: challenge.handshake_id.clone(),
            target_credential: b.credential.credential.clone(),
            challenge_response: b_keys.sign(b"wrong message").to_hex(),
        });
        assert!(matches!(result, Err(Error::InvalidChallengeResponse)));

        // Failure leaves the handshake pending; a correct retry succeeds.
        let nonce = hex::decode(&challenge.challenge_for_target).unwrap();
        let completed = broker
            .complete_handshake(CompleteRequest {
                handshake_id: challenge.handshake_id,
                target_credential: b.credential.credential,
                challenge_response: b_keys.sign(&nonce).to_hex(),
            })
            .unwrap();
        assert!(completed.mutual_auth);
    }

    #[test]
    fn second_completion_is_already_completed() {
        let broker = broker();
        let (_, _, b, completed) = establish_session(&broker);

        let handshake = broker.ledger().handshake(&completed.handshake_id).unwrap();
        // Status check fires before the signature is even looked at.
        let result = broker.complete_handshake(CompleteRequest {
            handshake_id: completed.handshake_id,
            target_credential: b.credential.credential,
            challenge_response: handshake.challenge_nonce,
        });
        assert!(matches!(result, Err(Error::AlreadyCompleted)));
    }

    #[test]
    fn session_carries_scope_template_consent() {
        let broker = broker();
        let (_, _, _, completed) = establish_session(&broker);

        let grant = &completed.consent_token;
        assert!(grant.permissions.contains(&"read_bookings".to_string()));
        assert!(grant.excluded.contains(&"loyalty_transfers".to_string()));
        assert_eq!(grant.session_id, completed.session.session_id);
        assert_eq!(completed.session.status, SessionStatus::Active);
        assert!(completed.session.actions.is_empty());
    }

    #[test]
    fn record_in_scope_action() {
        let broker = broker();
        let (a, _, _, completed) = establish_session(&broker);

        let outcome = broker
            .record_interaction(RecordRequest {
                session_id: completed.session.session_id.clone(),
                consent_token: Some(completed.consent_token.token.clone()),
                agent_id: a.agent.agent_id,
                action: "read_bookings".to_string(),
                details: Some(serde_json::json!({"booking": "ABC123"})),
            })
            .unwrap();
        assert!(outcome.recorded && outcome.within_scope);
        assert!(outcome.action_id.is_some());

        let session = broker.ledger().session(&completed.session.session_id).unwrap();
        assert_eq!(session.actions.len(), 1);
    }

    #[test]
    fn excluded_action_denied_without_error_and_logged() {
        let broker = broker();
        let (a, _, _, completed) = establish_session(&broker);

        let outcome = broker
            .record_interaction(RecordRequest {
                session_id: completed.session.session_id.clone(),
                consent_token: Some(completed.consent_token.token.clone()),
                agent_id: a.agent.agent_id.clone(),
                action: "loyalty_transfers".to_string(),
                details: None,
            })
            .unwrap();
        assert!(!outcome.recorded && !outcome.within_scope);
        assert!(outcome.reason.is_some());

        let violations = broker.ledger().scope_violations();
        assert_eq!(violations.len(), 1);
        assert_eq!(violations[0].attempted_action, "loyalty_transfers");
        assert_eq!(violations[0].agent_id, a.agent.agent_id);
        assert_eq!(violations[0].result, "blocked");

        // The denied action never lands in the session record.
        let session = broker.ledger().session(&completed.session.session_id).unwrap();
        assert!(session.actions.is_empty());
    }

    #[test]
    fn third_agent_cannot_append() {
        let broker = broker();
        let (_, _, _, completed) = establish_session(&broker);
        let (c, _) = register(&broker, "interloper", "personal");

        let result = broker.record_interaction(RecordRequest {
            session_id: completed.session.session_id,
            consent_token: None,
            agent_id: c.agent.agent_id,
            action: "read_bookings".to_string(),
            details: None,
        });
        assert!(matches!(result, Err(Error::Forbidden(_))));
    }

    #[test]
    fn receipt_closes_session_and_verifies() {
        let broker = broker();
        let (a, _, _, completed) = establish_session(&broker);
        broker
            .record_interaction(RecordRequest {
                session_id: completed.session.session_id.clone(),
                consent_token: Some(completed.consent_token.token.clone()),
                agent_id: a.agent.agent_id,
                action: "read_bookings".to_string(),
                details: None,
            })
            .unwrap();

        let receipt = broker.generate_receipt(&completed.session.session_id).unwrap();
        assert_eq!(receipt.body.actions.len(), 1);
        assert_eq!(receipt.body.outcome, "completed");

        let session = broker.ledger().session(&completed.session.session_id).unwrap();
        assert_eq!(session.status, SessionStatus::Closed);
        assert!(session.closed_at.is_some());

        let presented = serde_json::to_value(&receipt.body).unwrap();
        assert!(broker.verify_receipt(&presented, &receipt.signature).valid);

        // Only one receipt per session.
        assert!(matches!(
            broker.generate_receipt(&completed.session.session_id),
            Err(Error::AlreadyClosed)
        ));
    }

    #[test]
    fn recording_after_close_is_invalid_state() {
        let broker = broker();
        let (a, _, _, completed) = establish_session(&broker);
        broker.generate_receipt(&completed.session.session_id).unwrap();

        let result = broker.record_interaction(RecordRequest {
            session_id: completed.session.session_id,
            consent_token: None,
            agent_id: a.agent.agent_id,
            action: "read_bookings".to_string(),
            details: None,
        });
        assert!(matches!(result, Err(Error::InvalidState(_))));
    }

    #[test]
    fn every_attempt_is_audited() {
        let broker = broker();
        let (_, _, _, _completed) = establish_session(&broker);

        // One initiate + one complete, both successful.
        let events = broker.ledger().handshake_events();
        assert_eq!(events.len(), 2);
        assert!(events.iter().all(|e| e.success));
        assert!(events
            .iter()
            .all(|e| e.initiator_agent_name.as_deref() == Some("travel-assistant")));

        // A failed initiate is audited too.
        let result = broker.initiate_handshake(InitiateRequest {
            initiator_credential: "garbage".to_string(),
            target_agent_id: "agt_whatever".to_string(),
            requested_scope: "flight-rebooking".to_string(),
            requested_permissions: None,
            context: None,
        });
        assert!(result.is_err());
        let events = broker.ledger().handshake_events();
        assert_eq!(events.len(), 3);
        assert_eq!(events[2].error_code.as_deref(), Some("invalid_credential"));
    }

    #[test]
    fn credential_for_a_superseded_key_is_rejected() {
        let authority = Arc::new(KeyAuthority::from_seed(&[11u8; 32]));
        let ledger: Arc<dyn TrustLedger> = Arc::new(InMemoryTrustLedger::new());
        let broker = TrustBroker::with_parts(
            BrokerConfig::default(),
            Arc::clone(&authority),
            Arc::clone(&ledger),
        );
        let (b, _) = register(&broker, "airline-rebooker", "enterprise");

        let old_key = Keypair::generate();
        let new_key = Keypair::generate();
        let mut agent = Agent {
            agent_id: "agt_rotated".to_string(),
            agent_name: "travel-assistant".to_string(),
            agent_type: AgentType::Personal,
            owner: "Pat Doe".to_string(),
            public_key: old_key.public_key().to_hex(),
            status: AgentStatus::Active,
            registered_at: Utc::now(),
        };

        // Credential minted while the old key was registered.
        let issuer = CredentialIssuer::new(
            authority,
            broker.config().issuer.clone(),
            Duration::days(30),
        );
        let stale = issuer.issue(&agent).unwrap();

        // Register the agent as it looks after rotation.
        agent.public_key = new_key.public_key().to_hex();
        assert!(ledger.insert_agent(agent));

        let result = broker.initiate_handshake(InitiateRequest {
            initiator_credential: stale.credential,
            target_agent_id: b.agent.agent_id,
            requested_scope: "flight-rebooking".to_string(),
            requested_permissions: None,
            context: None,
        });
        assert!(matches!(result, Err(Error::InvalidCredential(_))));
    }
}
