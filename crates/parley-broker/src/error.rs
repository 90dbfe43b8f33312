//! Broker error taxonomy
//!
//! Every failure is a structured, terminal outcome. A failed operation never
//! partially applies ledger state, and scope denial during interaction
//! recording is deliberately *not* an error (see `TrustBroker::record_interaction`).

use thiserror::Error;

#[derive(Error, Debug)]
pub enum Error {
    /// Malformed or missing input; carries every violated constraint.
    #[error("Validation failed: {}", .0.join("; "))]
    Validation(Vec<String>),

    #[error("Agent name '{0}' is already registered")]
    AgentNameTaken(String),

    /// Credential signature, issuer, expiry, fingerprint, or agent status
    /// mismatch. Deliberately undifferentiated so callers cannot probe which
    /// check failed.
    #[error("Invalid credential: {0}")]
    InvalidCredential(String),

    #[error("Challenge response signature verification failed")]
    InvalidChallengeResponse,

    #[error("Invalid consent token: {0}")]
    InvalidToken(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Handshake already completed")]
    AlreadyCompleted,

    #[error("Session already closed and receipt generated")]
    AlreadyClosed,

    #[error("{0} has expired")]
    Expired(String),

    #[error("Invalid state: {0}")]
    InvalidState(String),

    #[error("Forbidden: {0}")]
    Forbidden(String),

    #[error("Unauthorized: {0}")]
    Unauthorized(String),

    #[error("Admin key is not configured")]
    AdminNotConfigured,

    #[error("Crypto error: {0}")]
    Core(#[from] parley_core::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Stable snake_case classification recorded in audit events.
    pub fn code(&self) -> &'static str {
        match self {
            Error::Validation(_) => "validation_error",
            Error::AgentNameTaken(_) => "agent_name_taken",
            Error::InvalidCredential(_) => "invalid_credential",
            Error::InvalidChallengeResponse => "invalid_challenge_response",
            Error::InvalidToken(_) => "invalid_token",
            Error::NotFound(_) => "not_found",
            Error::AlreadyCompleted => "already_completed",
            Error::AlreadyClosed => "already_closed",
            Error::Expired(_) => "expired",
            Error::InvalidState(_) => "invalid_state",
            Error::Forbidden(_) => "forbidden",
            Error::Unauthorized(_) => "unauthorized",
            Error::AdminNotConfigured => "admin_not_configured",
            Error::Core(_) | Error::Json(_) => "internal_error",
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
