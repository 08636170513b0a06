use chrono::{DateTime, Duration, SubsecRound, Utc};
use serde::{Deserialize, Serialize};

use super::token::TokenSet;
use super::user::User;

/// Timestamps bounding a session. Serialized as epoch milliseconds.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct SessionWindow {
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub login_time: DateTime<Utc>,
    #[serde(with = "chrono::serde::ts_milliseconds")]
    pub last_activity: DateTime<Utc>,
    #[serde(rename = "expirationTime", with = "chrono::serde::ts_milliseconds")]
    pub expiration: DateTime<Utc>,
}

impl SessionWindow {
    pub fn open(now: DateTime<Utc>, access_lifetime_secs: u64) -> Self {
        let now = stored_precision(now);
        Self { login_time: now, last_activity: now, expiration: now + lifetime(access_lifetime_secs) }
    }

    /// Holds for every window this crate creates; stored records violating it are corrupt.
    pub fn is_consistent(&self) -> bool { self.expiration >= self.login_time }

    pub fn is_expired(&self, now: DateTime<Utc>) -> bool { now > self.expiration }

    pub fn is_idle(&self, now: DateTime<Utc>, max_inactivity: Duration) -> bool { now - self.last_activity > max_inactivity }

    /// Instant the proactive refresh should fire: `buffer` ahead of expiration.
    pub fn refresh_due(&self, buffer: Duration) -> DateTime<Utc> { self.expiration - buffer }
}

// Provider lifetimes are minutes to days; clamp so timestamp arithmetic cannot overflow.
const MAX_LIFETIME_SECS: u64 = 10 * 365 * 24 * 3600;

// Records keep millisecond timestamps; truncate up front so a stored record reads back equal.
fn stored_precision(t: DateTime<Utc>) -> DateTime<Utc> { t.trunc_subsecs(3) }

fn lifetime(secs: u64) -> Duration { Duration::seconds(secs.min(MAX_LIFETIME_SECS) as i64) }

/// The single persisted record: who is signed in, for how long, and with which tokens.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UserContext {
    pub user: User,
    pub session: SessionWindow,
    #[serde(rename = "keycloakToken")]
    pub tokens: TokenSet,
}

impl UserContext {
    pub fn open(user: User, tokens: TokenSet, now: DateTime<Utc>) -> Self {
        Self { user, session: SessionWindow::open(now, tokens.expires_in), tokens }
    }

    /// Swap in a refreshed token set together with its new expiration.
    pub fn apply_refresh(&mut self, tokens: TokenSet, now: DateTime<Utc>) {
        self.session.expiration = (stored_precision(now) + lifetime(tokens.expires_in)).max(self.session.login_time);
        self.tokens = tokens;
    }

    pub fn touch(&mut self, now: DateTime<Utc>) { self.session.last_activity = stored_precision(now); }
}
