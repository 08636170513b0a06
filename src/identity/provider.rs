use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::{StatusCode, Url};
use serde::Deserialize;
use tracing::debug;

use super::clock::{Clock, SystemClock};
use super::token::{decode_access_token, TokenPayload, TokenSet};
use crate::config::SessionConfig;
use crate::error::{AuthFailure, ConfigError, InvalidTokenError};

/// Remote identity provider. Stateless request/response; no retries.
/// Dropping a pending future abandons the call with no side effect.
#[async_trait]
pub trait IdentityProvider: Send + Sync {
    async fn obtain_token(&self, username: &str, password: &str) -> Result<TokenSet, AuthFailure>;
    async fn refresh_token(&self, refresh_token: &str) -> Result<TokenSet, AuthFailure>;
    async fn decode_and_validate(&self, access_token: &str) -> Result<TokenPayload, InvalidTokenError>;
    /// Best-effort termination of the remote session.
    async fn end_session(&self, refresh_token: &str) -> Result<(), AuthFailure>;
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    #[serde(default)]
    refresh_token: Option<String>,
    expires_in: u64,
    #[serde(default)]
    refresh_expires_in: Option<u64>,
    #[serde(default)]
    token_type: Option<String>,
    #[serde(default)]
    scope: Option<String>,
}

#[derive(Debug, Default, Deserialize)]
struct ErrorResponse {
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Clone, Copy)]
enum Grant {
    Password,
    Refresh,
}

/// OpenID Connect endpoint speaking the Keycloak dialect:
/// `{issuer}/token` for password and refresh grants, `{issuer}/logout` for session end.
pub struct KeycloakProvider {
    client: reqwest::Client,
    token_url: Url,
    logout_url: Url,
    client_id: String,
    client_secret: Option<String>,
    clock: Arc<dyn Clock>,
}

impl KeycloakProvider {
    pub fn new(cfg: &SessionConfig) -> Result<Self, ConfigError> { Self::with_clock(cfg, Arc::new(SystemClock)) }

    pub fn with_clock(cfg: &SessionConfig, clock: Arc<dyn Clock>) -> Result<Self, ConfigError> {
        let base = cfg.issuer_url.trim_end_matches('/');
        let token_url = Url::parse(&format!("{base}/token")).map_err(|e| ConfigError::Invalid(format!("issuer_url: {e}")))?;
        let logout_url = Url::parse(&format!("{base}/logout")).map_err(|e| ConfigError::Invalid(format!("issuer_url: {e}")))?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_millis(cfg.http_timeout_ms))
            .redirect(reqwest::redirect::Policy::none())
            .build()
            .map_err(|e| ConfigError::Invalid(format!("http client: {e}")))?;
        Ok(Self {
            client,
            token_url,
            logout_url,
            client_id: cfg.client_id.clone(),
            client_secret: cfg.client_secret.clone(),
            clock,
        })
    }

    fn form<'a>(&'a self, mut fields: Vec<(&'static str, &'a str)>) -> Vec<(&'static str, &'a str)> {
        fields.push(("client_id", self.client_id.as_str()));
        if let Some(secret) = &self.client_secret {
            fields.push(("client_secret", secret.as_str()));
        }
        fields
    }

    async fn token_request(&self, grant: Grant, form: Vec<(&'static str, &str)>) -> Result<TokenSet, AuthFailure> {
        let resp = self
            .client
            .post(self.token_url.clone())
            .form(&form)
            .send()
            .await
            .map_err(|e| AuthFailure::NetworkUnavailable(e.to_string()))?;
        let status = resp.status();
        if status == StatusCode::BAD_REQUEST || status == StatusCode::UNAUTHORIZED || status == StatusCode::FORBIDDEN {
            let body: ErrorResponse = resp.json().await.unwrap_or_default();
            let error = body.error.unwrap_or_else(|| "unauthorized".to_string());
            return Err(match grant {
                Grant::Password => AuthFailure::CredentialRejected { status: status.as_u16(), error },
                Grant::Refresh => AuthFailure::RefreshRejected { status: status.as_u16(), error },
            });
        }
        if status.is_server_error() {
            return Err(AuthFailure::NetworkUnavailable(format!("token endpoint returned HTTP {status}")));
        }
        if !status.is_success() {
            return Err(AuthFailure::UnexpectedResponse(format!("token endpoint returned HTTP {status}")));
        }
        let body: TokenResponse = resp
            .json()
            .await
            .map_err(|e| AuthFailure::UnexpectedResponse(format!("token response: {e}")))?;
        if let Some(kind) = body.token_type.as_deref() {
            if !kind.eq_ignore_ascii_case("bearer") {
                return Err(AuthFailure::UnexpectedResponse(format!("unsupported token type {kind}")));
            }
        }
        let Some(refresh_token) = body.refresh_token.filter(|t| !t.is_empty()) else {
            return Err(AuthFailure::UnexpectedResponse("token response carries no refresh token".into()));
        };
        debug!(
            target: "taskdesk::provider",
            grant = ?grant,
            expires_in = body.expires_in,
            scope = body.scope.as_deref().unwrap_or(""),
            "token issued"
        );
        Ok(TokenSet {
            access_token: body.access_token,
            refresh_token,
            expires_in: body.expires_in,
            refresh_expires_in: body.refresh_expires_in.unwrap_or(0),
        })
    }
}

#[async_trait]
impl IdentityProvider for KeycloakProvider {
    async fn obtain_token(&self, username: &str, password: &str) -> Result<TokenSet, AuthFailure> {
        let form = self.form(vec![("grant_type", "password"), ("username", username), ("password", password)]);
        self.token_request(Grant::Password, form).await
    }

    async fn refresh_token(&self, refresh_token: &str) -> Result<TokenSet, AuthFailure> {
        let form = self.form(vec![("grant_type", "refresh_token"), ("refresh_token", refresh_token)]);
        self.token_request(Grant::Refresh, form).await
    }

    async fn decode_and_validate(&self, access_token: &str) -> Result<TokenPayload, InvalidTokenError> {
        decode_access_token(access_token, self.clock.now())
    }

    async fn end_session(&self, refresh_token: &str) -> Result<(), AuthFailure> {
        let form = self.form(vec![("refresh_token", refresh_token)]);
        let resp = self
            .client
            .post(self.logout_url.clone())
            .form(&form)
            .send()
            .await
            .map_err(|e| AuthFailure::NetworkUnavailable(e.to_string()))?;
        if !resp.status().is_success() {
            return Err(AuthFailure::UnexpectedResponse(format!("logout endpoint returned HTTP {}", resp.status())));
        }
        Ok(())
    }
}
