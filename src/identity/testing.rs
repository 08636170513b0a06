//! Test doubles shared by the identity unit tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;

use async_trait::async_trait;
use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde_json::{json, Value};
use tokio::sync::Notify;

use super::clock::Clock;
use super::provider::IdentityProvider;
use super::token::{decode_access_token, TokenPayload, TokenSet};
use crate::error::{AuthFailure, InvalidTokenError};

/// Build an unsigned compact token around the given claims.
pub fn mint_token(claims: &Value) -> String {
    let header = URL_SAFE_NO_PAD.encode(br#"{"alg":"RS256","typ":"JWT"}"#);
    let payload = URL_SAFE_NO_PAD.encode(claims.to_string());
    format!("{header}.{payload}.c2lnbmF0dXJl")
}

pub fn claims_for(username: &str, exp: DateTime<Utc>) -> Value {
    json!({
        "exp": exp.timestamp(),
        "iat": exp.timestamp() - 3600,
        "sub": format!("sub-{username}"),
        "preferred_username": username,
        "name": format!("{username} example"),
        "email": format!("{username}@example.com"),
        "realm_access": { "roles": ["member", "editor"] },
        "organizacion_id": 42,
        "cliente_id": "acme",
    })
}

/// Token set for `username` whose access token expires `expires_in` seconds after `now`.
pub fn token_set(username: &str, now: DateTime<Utc>, expires_in: u64, serial: usize) -> TokenSet {
    let exp = now + chrono::Duration::seconds(expires_in as i64);
    let mut claims = claims_for(username, exp);
    claims["jti"] = json!(format!("jti-{serial}"));
    TokenSet {
        access_token: mint_token(&claims),
        refresh_token: format!("refresh-{username}-{serial}"),
        expires_in,
        refresh_expires_in: expires_in * 8,
    }
}

/// In-process identity provider with scripted outcomes.
/// Successful calls mint fresh tokens relative to the shared clock.
pub struct ScriptedProvider {
    clock: Arc<dyn Clock>,
    pub expires_in: u64,
    login_results: Mutex<VecDeque<Result<(), AuthFailure>>>,
    refresh_results: Mutex<VecDeque<Result<(), AuthFailure>>>,
    refresh_gate: Mutex<Option<Arc<Notify>>>,
    pub login_calls: AtomicUsize,
    pub refresh_calls: AtomicUsize,
    pub end_session_calls: AtomicUsize,
    pub refresh_tokens_seen: Mutex<Vec<String>>,
    serial: AtomicUsize,
}

impl ScriptedProvider {
    pub fn new(clock: Arc<dyn Clock>, expires_in: u64) -> Self {
        Self {
            clock,
            expires_in,
            login_results: Mutex::new(VecDeque::new()),
            refresh_results: Mutex::new(VecDeque::new()),
            refresh_gate: Mutex::new(None),
            login_calls: AtomicUsize::new(0),
            refresh_calls: AtomicUsize::new(0),
            end_session_calls: AtomicUsize::new(0),
            refresh_tokens_seen: Mutex::new(Vec::new()),
            serial: AtomicUsize::new(0),
        }
    }

    /// Queue the outcome of the next login; unqueued logins succeed.
    pub fn push_login(&self, outcome: Result<(), AuthFailure>) { self.login_results.lock().push_back(outcome); }

    /// Queue the outcome of the next refresh; unqueued refreshes succeed.
    pub fn push_refresh(&self, outcome: Result<(), AuthFailure>) { self.refresh_results.lock().push_back(outcome); }

    /// Hold every refresh call until the returned handle is notified.
    pub fn gate_refresh(&self) -> Arc<Notify> {
        let gate = Arc::new(Notify::new());
        *self.refresh_gate.lock() = Some(gate.clone());
        gate
    }

    pub fn refreshes(&self) -> usize { self.refresh_calls.load(Ordering::SeqCst) }

    pub fn logins(&self) -> usize { self.login_calls.load(Ordering::SeqCst) }

    fn next_serial(&self) -> usize { self.serial.fetch_add(1, Ordering::SeqCst) }
}

#[async_trait]
impl IdentityProvider for ScriptedProvider {
    async fn obtain_token(&self, username: &str, _password: &str) -> Result<TokenSet, AuthFailure> {
        self.login_calls.fetch_add(1, Ordering::SeqCst);
        let outcome = self.login_results.lock().pop_front().unwrap_or(Ok(()));
        outcome?;
        Ok(token_set(username, self.clock.now(), self.expires_in, self.next_serial()))
    }

    async fn refresh_token(&self, refresh_token: &str) -> Result<TokenSet, AuthFailure> {
        self.refresh_calls.fetch_add(1, Ordering::SeqCst);
        self.refresh_tokens_seen.lock().push(refresh_token.to_string());
        let gate = self.refresh_gate.lock().clone();
        if let Some(gate) = gate {
            gate.notified().await;
        }
        let outcome = self.refresh_results.lock().pop_front().unwrap_or(Ok(()));
        outcome?;
        let username = refresh_token
            .strip_prefix("refresh-")
            .and_then(|rest| rest.rsplit_once('-').map(|(u, _)| u.to_string()))
            .unwrap_or_else(|| "unknown".to_string());
        Ok(token_set(&username, self.clock.now(), self.expires_in, self.next_serial()))
    }

    async fn decode_and_validate(&self, access_token: &str) -> Result<TokenPayload, InvalidTokenError> {
        decode_access_token(access_token, self.clock.now())
    }

    async fn end_session(&self, _refresh_token: &str) -> Result<(), AuthFailure> {
        self.end_session_calls.fetch_add(1, Ordering::SeqCst);
        Ok(())
    }
}
