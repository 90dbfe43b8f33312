//! Trust ledger: shared record store for agents, handshakes, sessions,
//! receipts, and audit logs
//!
//! The ledger is passive — no business logic — but the security-relevant
//! state transitions are part of its contract, not bolted on by callers:
//! handshake authentication, session closure, and action appends each happen
//! under a per-entity critical section, so two racing callers observe
//! exactly one winner. Sessions and handshakes are independent entities and
//! mutate fully in parallel.

use std::collections::HashMap;
use std::sync::{Arc, Mutex, RwLock};

use chrono::{DateTime, Utc};

use crate::receipt::Receipt;
use crate::types::{
    ActionRecord, Agent, AgentStatus, Handshake, HandshakeEvent, HandshakeStatus, ScopeViolation,
    Session, SessionStatus,
};

/// Outcome of the pending → authenticated transition.
#[derive(Clone, Debug)]
pub enum AuthenticateOutcome {
    /// This caller won the transition; snapshot of the authenticated record.
    Authenticated(Handshake),
    NotFound,
    /// Terminal: some caller already authenticated it.
    AlreadyCompleted,
    /// TTL elapsed; the stored status was flipped to expired by this call
    /// (or already was).
    Expired,
}

/// Outcome of the active → closed transition.
#[derive(Clone, Debug)]
pub enum CloseOutcome {
    /// This caller won; snapshot with `closed_at` set.
    Closed(Session),
    NotFound,
    AlreadyClosed,
}

/// Outcome of appending an action to a session.
#[derive(Clone, Debug)]
pub enum AppendOutcome {
    Appended(ActionRecord),
    NotFound,
    /// Session TTL elapsed; status flipped to expired by this call.
    Expired,
    /// Session is closed or expired.
    InvalidState(SessionStatus),
}

/// Store abstraction for the broker's shared mutable state.
///
/// Implementations must make each outcome-returning transition atomic with
/// respect to the entity it names.
pub trait TrustLedger: Send + Sync {
    /// Insert a new agent; fails (returns `false`) if the name is taken.
    fn insert_agent(&self, agent: Agent) -> bool;
    fn agent(&self, agent_id: &str) -> Option<Agent>;
    fn agent_by_name(&self, name: &str) -> Option<Agent>;
    /// Flip an agent's status; the only permitted agent mutation.
    fn set_agent_status(&self, agent_id: &str, status: AgentStatus) -> bool;
    fn agents(&self) -> Vec<Agent>;

    fn insert_handshake(&self, handshake: Handshake);
    fn handshake(&self, handshake_id: &str) -> Option<Handshake>;
    /// Attempt the single pending → authenticated transition.
    fn authenticate_handshake(&self, handshake_id: &str, now: DateTime<Utc>)
        -> AuthenticateOutcome;

    fn insert_session(&self, session: Session);
    fn session(&self, session_id: &str) -> Option<Session>;
    /// Flip an active session past its TTL to `expired`. Returns `true`
    /// when the session is (now) expired.
    fn expire_session_if_due(&self, session_id: &str, now: DateTime<Utc>) -> bool;
    /// Append an action, enforcing active status and lazy expiry.
    fn append_action(
        &self,
        session_id: &str,
        action: ActionRecord,
        now: DateTime<Utc>,
    ) -> AppendOutcome;
    /// Attempt the single transition out of `active` into `closed`.
    /// Receipt generation is the only caller and the only closing path.
    fn close_session(&self, session_id: &str, now: DateTime<Utc>) -> CloseOutcome;
    fn sessions(&self) -> Vec<Session>;

    fn insert_receipt(&self, receipt: Receipt);
    fn receipt(&self, receipt_id: &str) -> Option<Receipt>;
    fn receipts(&self) -> Vec<Receipt>;

    fn log_handshake_event(&self, event: HandshakeEvent);
    fn handshake_events(&self) -> Vec<HandshakeEvent>;
    fn log_scope_violation(&self, violation: ScopeViolation);
    fn scope_violations(&self) -> Vec<ScopeViolation>;
}

#[derive(Default)]
struct AgentTable {
    by_id: HashMap<String, Agent>,
    id_by_name: HashMap<String, String>,
}

/// In-memory ledger. Nothing survives a restart (accepted limitation).
#[derive(Default)]
pub struct InMemoryTrustLedger {
    agents: RwLock<AgentTable>,
    handshakes: RwLock<HashMap<String, Arc<Mutex<Handshake>>>>,
    sessions: RwLock<HashMap<String, Arc<Mutex<Session>>>>,
    receipts: RwLock<HashMap<String, Receipt>>,
    events: RwLock<Vec<HandshakeEvent>>,
    violations: RwLock<Vec<ScopeViolation>>,
}

impl InMemoryTrustLedger {
    pub fn new() -> Self {
        Self::default()
    }

    fn read<T>(lock: &RwLock<T>) -> std::sync::RwLockReadGuard<'_, T> {
        lock.read().unwrap_or_else(|e| e.into_inner())
    }

    fn write<T>(lock: &RwLock<T>) -> std::sync::RwLockWriteGuard<'_, T> {
        lock.write().unwrap_or_else(|e| e.into_inner())
    }

    fn entity<E>(table: &RwLock<HashMap<String, Arc<Mutex<E>>>>, id: &str) -> Option<Arc<Mutex<E>>> {
        Self::read(table).get(id).cloned()
    }

    fn lock_entity<E>(entity: &Arc<Mutex<E>>) -> std::sync::MutexGuard<'_, E> {
        entity.lock().unwrap_or_else(|e| e.into_inner())
    }
}

impl TrustLedger for InMemoryTrustLedger {
    fn insert_agent(&self, agent: Agent) -> bool {
        let mut table = Self::write(&self.agents);
        if table.id_by_name.contains_key(&agent.agent_name) {
            return false;
        }
        table
            .id_by_name
            .insert(agent.agent_name.clone(), agent.agent_id.clone());
        table.by_id.insert(agent.agent_id.clone(), agent);
        true
    }

    fn agent(&self, agent_id: &str) -> Option<Agent> {
        Self::read(&self.agents).by_id.get(agent_id).cloned()
    }

    fn agent_by_name(&self, name: &str) -> Option<Agent> {
        let table = Self::read(&self.agents);
        let id = table.id_by_name.get(name)?;
        table.by_id.get(id).cloned()
    }

    fn set_agent_status(&self, agent_id: &str, status: AgentStatus) -> bool {
        let mut table = Self::write(&self.agents);
        match table.by_id.get_mut(agent_id) {
            Some(agent) => {
                agent.status = status;
                true
            }
            None => false,
        }
    }

    fn agents(&self) -> Vec<Agent> {
        let mut agents: Vec<_> = Self::read(&self.agents).by_id.values().cloned().collect();
        agents.sort_by(|a, b| a.registered_at.cmp(&b.registered_at));
        agents
    }

    fn insert_handshake(&self, handshake: Handshake) {
        Self::write(&self.handshakes).insert(
            handshake.handshake_id.clone(),
            Arc::new(Mutex::new(handshake)),
        );
    }

    fn handshake(&self, handshake_id: &str) -> Option<Handshake> {
        let entity = Self::entity(&self.handshakes, handshake_id)?;
        let handshake = Self::lock_entity(&entity);
        Some(handshake.clone())
    }

    fn authenticate_handshake(
        &self,
        handshake_id: &str,
        now: DateTime<Utc>,
    ) -> AuthenticateOutcome {
        let Some(entity) = Self::entity(&self.handshakes, handshake_id) else {
            return AuthenticateOutcome::NotFound;
        };
        let mut handshake = Self::lock_entity(&entity);

        match handshake.status {
            HandshakeStatus::Authenticated => AuthenticateOutcome::AlreadyCompleted,
            HandshakeStatus::Expired => AuthenticateOutcome::Expired,
            HandshakeStatus::PendingTargetAuth => {
                if now > handshake.expires_at {
                    // Lazy expiry: the failed attempt flips the stored status.
                    handshake.status = HandshakeStatus::Expired;
                    return AuthenticateOutcome::Expired;
                }
                handshake.status = HandshakeStatus::Authenticated;
                AuthenticateOutcome::Authenticated(handshake.clone())
            }
        }
    }

    fn insert_session(&self, session: Session) {
        Self::write(&self.sessions).insert(
            session.session_id.clone(),
            Arc::new(Mutex::new(session)),
        );
    }

    fn session(&self, session_id: &str) -> Option<Session> {
        let entity = Self::entity(&self.sessions, session_id)?;
        let session = Self::lock_entity(&entity);
        Some(session.clone())
    }

    fn expire_session_if_due(&self, session_id: &str, now: DateTime<Utc>) -> bool {
        let Some(entity) = Self::entity(&self.sessions, session_id) else {
            return false;
        };
        let mut session = Self::lock_entity(&entity);
        match session.status {
            SessionStatus::Expired => true,
            SessionStatus::Active if now > session.expires_at => {
                session.status = SessionStatus::Expired;
                true
            }
            _ => false,
        }
    }

    fn append_action(
        &self,
        session_id: &str,
        action: ActionRecord,
        now: DateTime<Utc>,
    ) -> AppendOutcome {
        let Some(entity) = Self::entity(&self.sessions, session_id) else {
            return AppendOutcome::NotFound;
        };
        let mut session = Self::lock_entity(&entity);

        match session.status {
            SessionStatus::Active => {
                if now > session.expires_at {
                    session.status = SessionStatus::Expired;
                    return AppendOutcome::Expired;
                }
                session.actions.push(action.clone());
                AppendOutcome::Appended(action)
            }
            status => AppendOutcome::InvalidState(status),
        }
    }

    fn close_session(&self, session_id: &str, now: DateTime<Utc>) -> CloseOutcome {
        let Some(entity) = Self::entity(&self.sessions, session_id) else {
            return CloseOutcome::NotFound;
        };
        let mut session = Self::lock_entity(&entity);

        if session.status == SessionStatus::Closed {
            return CloseOutcome::AlreadyClosed;
        }
        session.status = SessionStatus::Closed;
        session.closed_at = Some(now);
        CloseOutcome::Closed(session.clone())
    }

    fn sessions(&self) -> Vec<Session> {
        let entities: Vec<_> = Self::read(&self.sessions).values().cloned().collect();
        let mut sessions: Vec<_> = entities
            .iter()
            .map(|e| Self::lock_entity(e).clone())
            .collect();
        sessions.sort_by(|a, b| a.established_at.cmp(&b.established_at));
        sessions
    }

    fn insert_receipt(&self, receipt: Receipt) {
        Self::write(&self.receipts).insert(receipt.body.receipt_id.clone(), receipt);
    }

    fn receipt(&self, receipt_id: &str) -> Option<Receipt> {
        Self::read(&self.receipts).get(receipt_id).cloned()
    }

    fn receipts(&self) -> Vec<Receipt> {
        let mut receipts: Vec<_> = Self::read(&self.receipts).values().cloned().collect();
        receipts.sort_by(|a, b| a.body.session_closed.cmp(&b.body.session_closed));
        receipts
    }

    fn log_handshake_event(&self, event: HandshakeEvent) {
        Self::write(&self.events).push(event);
    }

    fn handshake_events(&self) -> Vec<HandshakeEvent> {
        Self::read(&self.events).clone()
    }

    fn log_scope_violation(&self, violation: ScopeViolation) {
        Self::write(&self.violations).push(violation);
    }

    fn scope_violations(&self) -> Vec<ScopeViolation> {
        Self::read(&self.violations).clone()
    }
}
