//! Consent tokens and scope enforcement

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

use crate::credential::claims_expiry;
use crate::error::{Error, Result};
use crate::keys::KeyAuthority;
use crate::token;

pub const CONSENT_TOKEN_TYPE: &str = "consent";

/// Claims carried by a consent token: a signed, time-bounded grant
/// enumerating permitted and excluded actions for one session.
#[derive(Clone, Debug, Serialize, Deserialize)]
#[serde(deny_unknown_fields)]
pub struct ConsentClaims {
    pub scope: String,
    /// Allow-list. Anything not listed is denied.
    pub permissions: Vec<String>,
    /// Deny-list. Takes precedence over `permissions`.
    pub excluded: Vec<String>,
    pub session_id: String,
    pub token_type: String,
    pub iss: String,
    pub iat: i64,
    pub exp: i64,
}

/// How a consent token rules on a single action.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum ActionRuling {
    Permitted,
    /// Present in the exclusion list (checked before permissions).
    Excluded,
    /// In neither list; allow-list semantics deny it.
    NotGranted,
}

impl ConsentClaims {
    /// Rule on an action. Exclusions take precedence: an action present in
    /// both lists is denied.
    pub fn rule(&self, action: &str) -> ActionRuling {
        if self.excluded.iter().any(|a| a == action) {
            return ActionRuling::Excluded;
        }
        if self.permissions.iter().any(|a| a == action) {
            return ActionRuling::Permitted;
        }
        ActionRuling::NotGranted
    }
}

/// Outcome of `verify_action`, safe to hand back to the caller.
#[derive(Clone, Debug, Serialize)]
pub struct ConsentDecision {
    pub valid: bool,
    pub action: String,
    pub permitted: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    pub session_id: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub expires_at: Option<DateTime<Utc>>,
}

/// Issues and verifies consent tokens with the broker key.
#[derive(Clone)]
pub struct ConsentIssuer {
    authority: Arc<KeyAuthority>,
    issuer: String,
}

impl ConsentIssuer {
    pub fn new(authority: Arc<KeyAuthority>, issuer: impl Into<String>) -> Self {
        Self {
            authority,
            issuer: issuer.into(),
        }
    }

    /// Mint a consent token scoped to a session; expiry equals the session's.
    pub fn issue(
        &self,
        scope: &str,
        permissions: Vec<String>,
        excluded: Vec<String>,
        session_id: &str,
        expires_at: DateTime<Utc>,
    ) -> Result<String> {
        let claims = ConsentClaims {
            scope: scope.to_string(),
            permissions,
            excluded,
            session_id: session_id.to_string(),
            token_type: CONSENT_TOKEN_TYPE.to_string(),
            iss: self.issuer.clone(),
            iat: Utc::now().timestamp(),
            exp: expires_at.timestamp(),
        };
        token::sign_claims(&claims, &self.authority)
    }

    /// Verify a consent token: signature, issuer, type, expiry.
    pub fn verify(&self, consent_token: &str) -> Result<ConsentClaims> {
        let claims: ConsentClaims = token::verify_claims(consent_token, &self.authority)?;

        if claims.iss != self.issuer {
            return Err(Error::InvalidToken("token rejected (issuer)".to_string()));
        }
        if claims.token_type != CONSENT_TOKEN_TYPE {
            return Err(Error::InvalidToken("not a consent token".to_string()));
        }
        if token::now_unix() > claims.exp {
            return Err(Error::InvalidToken("token rejected (expired)".to_string()));
        }

        Ok(claims)
    }

    /// Check whether a consent token permits an action for a session.
    ///
    /// The session id in the token must match the caller's exactly; a token
    /// is never transferable across sessions. Denial is a valid decision,
    /// not an error — only token verification failures return `Err`.
    pub fn verify_action(
        &self,
        consent_token: &str,
        action: &str,
        session_id: &str,
    ) -> Result<ConsentDecision> {
        let claims = self.verify(consent_token)?;

        if claims.session_id != session_id {
            return Err(Error::InvalidToken(
                "consent token does not match this session".to_string(),
            ));
        }

        let decision = match claims.rule(action) {
            ActionRuling::Permitted => ConsentDecision {
                valid: true,
                action: action.to_string(),
                permitted: true,
                reason: None,
                session_id: session_id.to_string(),
                expires_at: claims_expiry(claims.exp),
            },
            ActionRuling::Excluded => ConsentDecision {
                valid: true,
                action: action.to_string(),
                permitted: false,
                reason: Some(format!(
                    "Action '{action}' is in the excluded list for this consent token"
                )),
                session_id: session_id.to_string(),
                expires_at: None,
            },
            ActionRuling::NotGranted => ConsentDecision {
                valid: true,
                action: action.to_string(),
                permitted: false,
                reason: Some(format!(
                    "Action '{action}' is not in the permissions list for this consent token"
                )),
                session_id: session_id.to_string(),
                expires_at: None,
            },
        };
        Ok(decision)
    }
}
