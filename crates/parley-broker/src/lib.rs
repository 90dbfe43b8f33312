//! Neutral trust broker for autonomous agents.
//!
//! Agents register an Ed25519 identity and receive a signed credential;
//! pairs of agents establish mutual trust through a two-phase
//! challenge-response handshake; each established session carries a
//! consent token that gates every recorded action; and closed sessions are
//! notarized into receipts any third party can verify offline with the
//! broker's public key.
//!
//! The broker holds all trust state. Agents hold only their own keys,
//! credentials, and opaque session/consent handles.

pub mod admin;
pub mod broker;
pub mod challenge;
pub mod config;
pub mod consent;
pub mod credential;
pub mod error;
pub mod keys;
pub mod ledger;
pub mod receipt;
pub mod scopes;
pub mod token;
pub mod types;

pub use admin::{AdminConsole, AgentFilter, EventFilter, SessionFilter, Stats};
pub use broker::{
    ChallengeIssued, CompleteRequest, ConsentGrant, HandshakeCompleted, InitiateRequest,
    RecordOutcome, RecordRequest, Registration, TrustBroker,
};
pub use config::BrokerConfig;
pub use consent::{ConsentClaims, ConsentDecision, ConsentIssuer};
pub use credential::{CredentialClaims, CredentialIssuer, IssuedCredential, RegisterRequest};
pub use error::{Error, Result};
pub use keys::KeyAuthority;
pub use ledger::{InMemoryTrustLedger, TrustLedger};
pub use receipt::{Receipt, ReceiptBody, ReceiptNotary, ReceiptVerification};
pub use scopes::ScopeRegistry;
pub use types::{
    Agent, AgentStatus, AgentType, Handshake, HandshakeEvent, HandshakeStatus, ScopeViolation,
    Session, SessionStatus,
};
