//! Unified error model for the session core.
//! Each collaborator fails with its own narrow type; `SessionError` gathers them
//! for callers that want one type, with stable codes and a provider-free user message.

use chrono::{DateTime, Utc};
use thiserror::Error;

/// Failure of a call against the identity provider token endpoint.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum AuthFailure {
    #[error("credentials rejected (HTTP {status}): {error}")]
    CredentialRejected { status: u16, error: String },
    #[error("refresh token rejected (HTTP {status}): {error}")]
    RefreshRejected { status: u16, error: String },
    #[error("identity provider unreachable: {0}")]
    NetworkUnavailable(String),
    #[error("unexpected identity provider response: {0}")]
    UnexpectedResponse(String),
}

/// An access token that cannot be trusted.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum InvalidTokenError {
    #[error("malformed access token: {0}")]
    Malformed(String),
    #[error("access token expired at {expired_at}")]
    Expired { expired_at: DateTime<Utc> },
}

/// A decoded payload lacking the fields every authorization decision needs.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum MalformedPayloadError {
    #[error("token payload carries no user identity")]
    MissingIdentity,
    #[error("token payload carries no organization id")]
    MissingOrganization,
}

#[derive(Debug, Error)]
pub enum StoreError {
    #[error("session store io: {0}")]
    Io(#[from] std::io::Error),
    #[error("session store encode: {0}")]
    Encode(#[from] serde_json::Error),
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config io: {0}")]
    Io(#[from] std::io::Error),
    #[error("config parse: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("invalid config: {0}")]
    Invalid(String),
}

#[derive(Debug, Error)]
pub enum SessionError {
    #[error(transparent)]
    Auth(#[from] AuthFailure),
    #[error(transparent)]
    InvalidToken(#[from] InvalidTokenError),
    #[error(transparent)]
    MalformedPayload(#[from] MalformedPayloadError),
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error("a token refresh is already in flight")]
    RefreshInFlight,
    #[error("no active session")]
    NotAuthenticated,
    #[error("session changed while the refresh was in flight")]
    Superseded,
    #[error("internal: {0}")]
    Internal(String),
}

impl SessionError {
    /// Stable snake_case code, safe to log or display.
    pub fn code_str(&self) -> &'static str {
        match self {
            SessionError::Auth(AuthFailure::CredentialRejected { .. }) => "credential_rejected",
            SessionError::Auth(AuthFailure::RefreshRejected { .. }) => "refresh_rejected",
            SessionError::Auth(AuthFailure::NetworkUnavailable(_)) => "network_unavailable",
            SessionError::Auth(AuthFailure::UnexpectedResponse(_)) => "provider_protocol",
            SessionError::InvalidToken(InvalidTokenError::Malformed(_)) => "token_malformed",
            SessionError::InvalidToken(InvalidTokenError::Expired { .. }) => "token_expired",
            SessionError::MalformedPayload(_) => "payload_malformed",
            SessionError::Store(_) => "store_error",
            SessionError::RefreshInFlight => "refresh_in_flight",
            SessionError::NotAuthenticated => "not_authenticated",
            SessionError::Superseded => "superseded",
            SessionError::Internal(_) => "internal",
        }
    }

    /// Message suitable for an end user. Never carries provider detail.
    pub fn user_message(&self) -> &'static str {
        match self {
            SessionError::Auth(AuthFailure::CredentialRejected { .. }) => "invalid credentials",
            SessionError::NotAuthenticated => "session expired, please log in again",
            _ => "login error",
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_follow_taxonomy() {
        let rejected: SessionError = AuthFailure::CredentialRejected { status: 401, error: "invalid_grant".into() }.into();
        assert_eq!(rejected.code_str(), "credential_rejected");
        assert_eq!(rejected.user_message(), "invalid credentials");

        let offline: SessionError = AuthFailure::NetworkUnavailable("connection refused".into()).into();
        assert_eq!(offline.code_str(), "network_unavailable");
        assert_eq!(offline.user_message(), "login error");

        let expired: SessionError = InvalidTokenError::Expired { expired_at: Utc::now() }.into();
        assert_eq!(expired.code_str(), "token_expired");

        let payload: SessionError = MalformedPayloadError::MissingOrganization.into();
        assert_eq!(payload.code_str(), "payload_malformed");
        assert_eq!(payload.user_message(), "login error");
    }

    #[test]
    fn user_message_hides_provider_detail() {
        let e: SessionError = AuthFailure::CredentialRejected {
            status: 401,
            error: "Account disabled for user alice".into(),
        }
        .into();
        assert!(!e.user_message().contains("alice"));
        assert!(e.to_string().contains("401"));
    }
}
