//! Token set issued by the identity provider and the claims carried by its access token.

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

use crate::error::InvalidTokenError;

/// Credentials returned by the token endpoint. Lifetimes are in seconds.
#[derive(Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TokenSet {
    pub access_token: String,
    pub refresh_token: String,
    pub expires_in: u64,
    #[serde(default)]
    pub refresh_expires_in: u64,
}

impl std::fmt::Debug for TokenSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TokenSet")
            .field("access_token", &"<redacted>")
            .field("refresh_token", &"<redacted>")
            .field("expires_in", &self.expires_in)
            .field("refresh_expires_in", &self.refresh_expires_in)
            .finish()
    }
}

#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct RealmAccess {
    #[serde(default)]
    pub roles: Vec<String>,
}

/// Claims of interest in a decoded access token. Unknown claims are ignored.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct TokenPayload {
    /// Expiration, seconds since the Unix epoch.
    pub exp: i64,
    #[serde(default)]
    pub iat: Option<i64>,
    #[serde(default)]
    pub sub: Option<String>,
    #[serde(default)]
    pub preferred_username: Option<String>,
    #[serde(default)]
    pub name: Option<String>,
    #[serde(default)]
    pub email: Option<String>,
    #[serde(default)]
    pub roles: Vec<String>,
    #[serde(default)]
    pub realm_access: Option<RealmAccess>,
    /// String or number depending on the realm mapper.
    #[serde(default)]
    pub organizacion_id: Option<serde_json::Value>,
    #[serde(default)]
    pub cliente_id: Option<serde_json::Value>,
}

impl TokenPayload {
    pub fn expires_at(&self) -> Option<DateTime<Utc>> { DateTime::from_timestamp(self.exp, 0) }
}

/// Decode the payload segment of a compact JWS and check its `exp` against `now`.
/// The signature is not verified here; resource servers do that.
pub fn decode_access_token(token: &str, now: DateTime<Utc>) -> Result<TokenPayload, InvalidTokenError> {
    let mut parts = token.split('.');
    let (Some(_header), Some(payload), Some(_sig), None) = (parts.next(), parts.next(), parts.next(), parts.next()) else {
        return Err(InvalidTokenError::Malformed("expected three dot-separated segments".into()));
    };
    if payload.is_empty() {
        return Err(InvalidTokenError::Malformed("empty payload segment".into()));
    }
    let bytes = URL_SAFE_NO_PAD
        .decode(payload.trim_end_matches('='))
        .map_err(|e| InvalidTokenError::Malformed(format!("payload is not base64url: {e}")))?;
    let claims: TokenPayload = serde_json::from_slice(&bytes)
        .map_err(|e| InvalidTokenError::Malformed(format!("payload is not valid claims json: {e}")))?;
    let expires_at = claims
        .expires_at()
        .ok_or_else(|| InvalidTokenError::Malformed(format!("exp out of range: {}", claims.exp)))?;
    if expires_at <= now {
        return Err(InvalidTokenError::Expired { expired_at: expires_at });
    }
    Ok(claims)
}

#[cfg(test)]
#[path = "token_tests.rs"]
mod token_tests;
