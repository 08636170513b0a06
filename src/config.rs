//! Client configuration: built-in defaults, overlaid by an optional JSON file, overlaid by
//! `TASKDESK_*` environment variables.

use std::path::{Path, PathBuf};

use chrono::Duration;
use serde::{Deserialize, Serialize};

use crate::error::ConfigError;

/// Proactive refresh margin ahead of access-token expiration.
pub const REFRESH_BUFFER_SECS: u64 = 5 * 60;
/// Longest gap between recorded activity before a session counts as expired.
pub const MAX_INACTIVITY_SECS: u64 = 30 * 60;

pub const CONFIG_FILE_NAME: &str = "taskdesk.json";

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct SessionConfig {
    /// OpenID Connect base; `/token` and `/logout` are appended.
    pub issuer_url: String,
    pub client_id: String,
    pub client_secret: Option<String>,
    /// Directory holding the persisted user context.
    pub state_dir: PathBuf,
    /// Base URL of the workspace REST API.
    pub api_base_url: String,
    pub refresh_buffer_secs: u64,
    pub max_inactivity_secs: u64,
    pub http_timeout_ms: u64,
}

fn default_state_dir() -> PathBuf {
    std::env::var_os("HOME")
        .or_else(|| std::env::var_os("USERPROFILE"))
        .map(|home| PathBuf::from(home).join(".taskdesk"))
        .unwrap_or_else(|| PathBuf::from(".taskdesk"))
}

impl Default for SessionConfig {
    fn default() -> Self {
        Self {
            issuer_url: "http://localhost:8080/realms/taskdesk/protocol/openid-connect".to_string(),
            client_id: "taskdesk-web".to_string(),
            client_secret: None,
            state_dir: default_state_dir(),
            api_base_url: "http://localhost:3000/api".to_string(),
            refresh_buffer_secs: REFRESH_BUFFER_SECS,
            max_inactivity_secs: MAX_INACTIVITY_SECS,
            http_timeout_ms: 10_000,
        }
    }
}

/// File layer: every field optional, unspecified values inherit the defaults.
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
#[serde(default, deny_unknown_fields)]
pub struct SessionConfigFile {
    pub issuer_url: Option<String>,
    pub client_id: Option<String>,
    pub client_secret: Option<String>,
    pub state_dir: Option<PathBuf>,
    pub api_base_url: Option<String>,
    pub refresh_buffer_secs: Option<u64>,
    pub max_inactivity_secs: Option<u64>,
    pub http_timeout_ms: Option<u64>,
}

impl SessionConfigFile {
    pub fn read(path: &Path) -> Result<Self, ConfigError> {
        let bytes = std::fs::read(path)?;
        Ok(serde_json::from_slice(&bytes)?)
    }
}

/// Timing knobs handed to the session manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SessionSettings {
    pub refresh_buffer: Duration,
    pub max_inactivity: Duration,
}

impl Default for SessionSettings {
    fn default() -> Self {
        Self {
            refresh_buffer: Duration::seconds(REFRESH_BUFFER_SECS as i64),
            max_inactivity: Duration::seconds(MAX_INACTIVITY_SECS as i64),
        }
    }
}

fn parse_u64(name: &str, raw: &str) -> Result<u64, ConfigError> {
    raw.trim().parse::<u64>().map_err(|_| ConfigError::Invalid(format!("{name} must be a non-negative integer, got '{raw}'")))
}

impl SessionConfig {
    /// Resolve defaults + file + environment. `env` is usually `|k| std::env::var(k).ok()`.
    pub fn from_layers(file: Option<&SessionConfigFile>, env: impl Fn(&str) -> Option<String>) -> Result<Self, ConfigError> {
        let mut cfg = Self::default();
        if let Some(f) = file {
            if let Some(v) = &f.issuer_url { cfg.issuer_url = v.clone(); }
            if let Some(v) = &f.client_id { cfg.client_id = v.clone(); }
            if f.client_secret.is_some() { cfg.client_secret = f.client_secret.clone(); }
            if let Some(v) = &f.state_dir { cfg.state_dir = v.clone(); }
            if let Some(v) = &f.api_base_url { cfg.api_base_url = v.clone(); }
            cfg.refresh_buffer_secs = f.refresh_buffer_secs.unwrap_or(cfg.refresh_buffer_secs);
            cfg.max_inactivity_secs = f.max_inactivity_secs.unwrap_or(cfg.max_inactivity_secs);
            cfg.http_timeout_ms = f.http_timeout_ms.unwrap_or(cfg.http_timeout_ms);
        }

        if let Some(v) = env("TASKDESK_ISSUER_URL") { cfg.issuer_url = v; }
        if let Some(v) = env("TASKDESK_CLIENT_ID") { cfg.client_id = v; }
        if let Some(v) = env("TASKDESK_CLIENT_SECRET") { cfg.client_secret = Some(v).filter(|s| !s.is_empty()); }
        if let Some(v) = env("TASKDESK_STATE_DIR") { cfg.state_dir = PathBuf::from(v); }
        if let Some(v) = env("TASKDESK_API_URL") { cfg.api_base_url = v; }
        if let Some(v) = env("TASKDESK_REFRESH_BUFFER_SECS") { cfg.refresh_buffer_secs = parse_u64("TASKDESK_REFRESH_BUFFER_SECS", &v)?; }
        if let Some(v) = env("TASKDESK_MAX_INACTIVITY_SECS") { cfg.max_inactivity_secs = parse_u64("TASKDESK_MAX_INACTIVITY_SECS", &v)?; }
        if let Some(v) = env("TASKDESK_HTTP_TIMEOUT_MS") { cfg.http_timeout_ms = parse_u64("TASKDESK_HTTP_TIMEOUT_MS", &v)?; }

        cfg.validate()?;
        Ok(cfg)
    }

    /// Load the optional file (explicit path, else `<state_dir>/taskdesk.json` if present) and the process env.
    pub fn load(explicit: Option<&Path>) -> Result<Self, ConfigError> {
        let env = |k: &str| std::env::var(k).ok();
        let file = match explicit {
            Some(p) => Some(SessionConfigFile::read(p)?),
            None => {
                let dir = env("TASKDESK_STATE_DIR").map(PathBuf::from).unwrap_or_else(default_state_dir);
                let candidate = dir.join(CONFIG_FILE_NAME);
                if candidate.exists() { Some(SessionConfigFile::read(&candidate)?) } else { None }
            }
        };
        Self::from_layers(file.as_ref(), env)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.client_id.trim().is_empty() {
            return Err(ConfigError::Invalid("client_id must not be empty".into()));
        }
        let issuer = reqwest::Url::parse(&self.issuer_url).map_err(|e| ConfigError::Invalid(format!("issuer_url: {e}")))?;
        if !matches!(issuer.scheme(), "http" | "https") {
            return Err(ConfigError::Invalid(format!("issuer_url must be http(s), got {}", issuer.scheme())));
        }
        reqwest::Url::parse(&self.api_base_url).map_err(|e| ConfigError::Invalid(format!("api_base_url: {e}")))?;
        if self.max_inactivity_secs == 0 {
            return Err(ConfigError::Invalid("max_inactivity_secs must be positive".into()));
        }
        if self.http_timeout_ms == 0 {
            return Err(ConfigError::Invalid("http_timeout_ms must be positive".into()));
        }
        Ok(())
    }

    pub fn settings(&self) -> SessionSettings {
        SessionSettings {
            refresh_buffer: Duration::seconds(self.refresh_buffer_secs.min(i32::MAX as u64) as i64),
            max_inactivity: Duration::seconds(self.max_inactivity_secs.min(i32::MAX as u64) as i64),
        }
    }
}

#[cfg(test)]
#[path = "config_tests.rs"]
mod config_tests;
