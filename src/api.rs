//! Minimal consumer of the workspace REST API. Every request carries the headers derived
//! from the current session and counts as user activity once it has been sent.

use std::time::Duration;

use reqwest::{Method, Url};
use serde_json::Value;
use thiserror::Error;
use tracing::debug;

use crate::config::SessionConfig;
use crate::error::ConfigError;
use crate::identity::SessionManager;

#[derive(Debug, Error)]
pub enum ApiError {
    #[error("not signed in")]
    NotAuthenticated,
    #[error("invalid request path {path}: {reason}")]
    InvalidPath { path: String, reason: String },
    #[error("transport: {0}")]
    Transport(#[from] reqwest::Error),
    #[error("remote error: HTTP {status}: {body}")]
    Status { status: u16, body: Value },
}

#[derive(Clone)]
pub struct ApiClient {
    base: Url,
    client: reqwest::Client,
    session: SessionManager,
}

impl ApiClient {
    pub fn new(cfg: &SessionConfig, session: SessionManager) -> Result<Self, ConfigError> {
        Self::with_base(&cfg.api_base_url, Duration::from_millis(cfg.http_timeout_ms), session)
    }

    pub fn with_base(base: &str, timeout: Duration, session: SessionManager) -> Result<Self, ConfigError> {
        // a trailing slash makes relative joins append instead of replacing the last segment
        let normalized = format!("{}/", base.trim_end_matches('/'));
        let base = Url::parse(&normalized).map_err(|e| ConfigError::Invalid(format!("api_base_url: {e}")))?;
        let client = reqwest::Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| ConfigError::Invalid(format!("http client: {e}")))?;
        Ok(Self { base, client, session })
    }

    pub fn base(&self) -> &Url { &self.base }

    pub fn endpoint(&self, path: &str) -> Result<Url, ApiError> {
        self.base.join(path.trim_start_matches('/')).map_err(|e| ApiError::InvalidPath { path: path.to_string(), reason: e.to_string() })
    }

    pub async fn get_json(&self, path: &str) -> Result<Value, ApiError> { self.send(Method::GET, path, None).await }

    pub async fn post_json(&self, path: &str, body: &Value) -> Result<Value, ApiError> {
        self.send(Method::POST, path, Some(body)).await
    }

    async fn send(&self, method: Method, path: &str, body: Option<&Value>) -> Result<Value, ApiError> {
        let url = self.endpoint(path)?;
        if !self.session.enforce_session_window() {
            return Err(ApiError::NotAuthenticated);
        }
        let headers = self.session.build_auth_headers();
        let mut req = self.client.request(method.clone(), url.clone()).headers(headers.to_header_map());
        if let Some(b) = body {
            req = req.json(b);
        }
        let resp = req.send().await?;
        self.session.update_activity();

        let status = resp.status();
        let text = resp.text().await?;
        debug!(target: "taskdesk::api", %method, url = %url, status = status.as_u16(), "api request");
        let val = if text.trim().is_empty() {
            Value::Null
        } else {
            serde_json::from_str(&text).unwrap_or(Value::String(text))
        };
        if !status.is_success() {
            return Err(ApiError::Status { status: status.as_u16(), body: val });
        }
        Ok(val)
    }
}
