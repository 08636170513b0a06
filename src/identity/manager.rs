//! Session lifecycle: restore from storage, login, refresh-ahead, activity, logout.
//!
//! All state lives behind one lock and is only touched between network awaits, never across
//! them. Every login and logout bumps a generation counter; a refresh captures the generation
//! it started under and its completion is dropped if the counter has moved, so a late response
//! can never resurrect or overwrite a session that was replaced or ended meanwhile.
//! At most one refresh timer is armed: arming always cancels the previous handle first.

use std::sync::{Arc, Weak};

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use super::clock::{Clock, SystemClock};
use super::headers::{AuthHeaderBuilder, AuthHeaders};
use super::mapper::map_payload;
use super::provider::{IdentityProvider, KeycloakProvider};
use super::session::{SessionWindow, UserContext};
use super::store::{FileSessionStore, SessionStore};
use super::token::decode_access_token;
use super::user::User;
use crate::config::{SessionConfig, SessionSettings};
use crate::error::{ConfigError, SessionError};

const EVENT_CAPACITY: usize = 32;
/// Shortest delay before refreshing a token that was just issued.
const MIN_REFRESH_DELAY_SECS: i64 = 5;

/// Whether the token behind the timer was just issued or restored from storage.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Issued {
    Fresh,
    Restored,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    LoggedOut,
    Active,
    /// Active with a refresh call in flight.
    RefreshPending,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LogoutReason {
    UserRequested,
    RefreshFailed,
    Expired,
    Inactive,
    StorageFailure,
}

impl LogoutReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            LogoutReason::UserRequested => "user_requested",
            LogoutReason::RefreshFailed => "refresh_failed",
            LogoutReason::Expired => "expired",
            LogoutReason::Inactive => "inactive",
            LogoutReason::StorageFailure => "storage_failure",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SessionEvent {
    LoggedIn { user: User },
    Refreshed { user_id: String, expires_at: DateTime<Utc> },
    LoggedOut { reason: LogoutReason },
}

struct RefreshTimer {
    id: u64,
    fires_at: DateTime<Utc>,
    handle: JoinHandle<()>,
}

impl RefreshTimer {
    fn cancel(self) { self.handle.abort(); }
}

#[derive(Default)]
struct State {
    context: Option<UserContext>,
    generation: u64,
    timer: Option<RefreshTimer>,
    // generation whose refresh is in flight
    refreshing: Option<u64>,
    timer_seq: u64,
}

struct Inner {
    provider: Arc<dyn IdentityProvider>,
    store: Arc<dyn SessionStore>,
    clock: Arc<dyn Clock>,
    settings: SessionSettings,
    state: Mutex<State>,
    current_user: watch::Sender<Option<User>>,
    events: broadcast::Sender<SessionEvent>,
}

/// Cheap-to-clone handle; construct once per process and pass it to every consumer.
#[derive(Clone)]
pub struct SessionManager {
    inner: Arc<Inner>,
}

impl SessionManager {
    /// Build the manager and perform the startup transition from whatever the store holds.
    ///
    /// A restored session arms its refresh timer on the ambient Tokio runtime. Outside one the
    /// session is still restored but nothing refreshes it until the next login or `refresh_now`.
    pub fn restore(
        provider: Arc<dyn IdentityProvider>,
        store: Arc<dyn SessionStore>,
        clock: Arc<dyn Clock>,
        settings: SessionSettings,
    ) -> Self {
        let (current_user, _) = watch::channel(None);
        let (events, _) = broadcast::channel(EVENT_CAPACITY);
        let inner = Arc::new(Inner {
            provider,
            store,
            clock,
            settings,
            state: Mutex::new(State::default()),
            current_user,
            events,
        });
        inner.startup();
        Self { inner }
    }

    /// Production wiring: Keycloak provider, file store under `state_dir`, system clock.
    pub fn from_config(cfg: &SessionConfig) -> Result<Self, ConfigError> {
        let clock: Arc<dyn Clock> = Arc::new(SystemClock);
        let provider = Arc::new(KeycloakProvider::with_clock(cfg, clock.clone())?);
        let store = Arc::new(FileSessionStore::in_dir(&cfg.state_dir));
        Ok(Self::restore(provider, store, clock, cfg.settings()))
    }

    /// Resolves `false` on any failure; the reason is logged, never surfaced to the caller.
    pub async fn login(&self, username: &str, password: &str) -> bool {
        match self.try_login(username, password).await {
            Ok(_) => true,
            Err(e) => {
                warn!(target: "taskdesk::session", user = username, code = e.code_str(), error = %e, "login failed");
                false
            }
        }
    }

    /// Login with the typed outcome. On error nothing about the current session changes.
    pub async fn try_login(&self, username: &str, password: &str) -> Result<User, SessionError> {
        let tokens = self.inner.provider.obtain_token(username, password).await?;
        let payload = self.inner.provider.decode_and_validate(&tokens.access_token).await?;
        let user = map_payload(&payload)?;
        let ctx = UserContext::open(user.clone(), tokens, self.inner.clock.now());

        let mut st = self.inner.state.lock();
        self.inner.store.write(&ctx)?;
        st.generation += 1;
        st.refreshing = None;
        st.context = Some(ctx);
        self.inner.current_user.send_replace(Some(user.clone()));
        Inner::arm_refresh(&self.inner, &mut st, Issued::Fresh);
        info!(target: "taskdesk::session", user = %user.identity, generation = st.generation, "login succeeded");
        let _ = self.inner.events.send(SessionEvent::LoggedIn { user: user.clone() });
        Ok(user)
    }

    /// End the session from any state. Idempotent; remote session end is fire-and-forget.
    pub fn logout(&self) { let _ = self.logout_detached(); }

    /// Local logout as in [`logout`](Self::logout), then wait for the remote session end.
    /// For short-lived processes whose runtime would otherwise drop the call.
    pub async fn logout_and_wait(&self) {
        if let Some(handle) = self.logout_detached() {
            let _ = handle.await;
        }
    }

    fn logout_detached(&self) -> Option<JoinHandle<()>> {
        let refresh_token = {
            let mut st = self.inner.state.lock();
            self.inner.end_locked(&mut st, LogoutReason::UserRequested)
        };
        self.inner.end_remote_session(refresh_token?)
    }

    /// Record user interaction. Does not touch tokens or the refresh schedule.
    pub fn update_activity(&self) -> bool {
        let mut st = self.inner.state.lock();
        let Some(ctx) = st.context.as_ref() else { return false };
        let mut next = ctx.clone();
        next.touch(self.inner.clock.now());
        match self.inner.store.write(&next) {
            Ok(()) => {
                st.context = Some(next);
                true
            }
            Err(e) => {
                warn!(target: "taskdesk::session", error = %e, "could not persist activity timestamp");
                false
            }
        }
    }

    /// Re-check absolute expiration and inactivity against the live session, logging out if
    /// either has lapsed. Returns whether the session is still active.
    pub fn enforce_session_window(&self) -> bool {
        let refresh_token = {
            let mut st = self.inner.state.lock();
            let Some(ctx) = st.context.as_ref() else { return false };
            match self.inner.lapse_reason(&ctx.session) {
                None => return true,
                Some(reason) => {
                    info!(target: "taskdesk::session", user = %ctx.user.identity, reason = reason.as_str(), "session window lapsed");
                    self.inner.end_locked(&mut st, reason)
                }
            }
        };
        if let Some(rt) = refresh_token {
            let _ = self.inner.end_remote_session(rt);
        }
        false
    }

    /// Refresh immediately instead of waiting for the timer. Success re-arms the timer;
    /// failure ends the session exactly as a timer-driven refresh would.
    pub async fn refresh_now(&self) -> Result<(), SessionError> {
        let (generation, refresh_token) = {
            let mut st = self.inner.state.lock();
            let generation = st.generation;
            if st.refreshing == Some(generation) {
                return Err(SessionError::RefreshInFlight);
            }
            let Some(rt) = st.context.as_ref().map(|c| c.tokens.refresh_token.clone()) else {
                return Err(SessionError::NotAuthenticated);
            };
            if let Some(timer) = st.timer.take() {
                timer.cancel();
            }
            st.refreshing = Some(generation);
            (generation, rt)
        };
        // run detached so dropping this future cannot strand the in-flight marker
        let inner = self.inner.clone();
        tokio::spawn(async move { Inner::complete_refresh(&inner, generation, refresh_token).await })
            .await
            .map_err(|e| SessionError::Internal(format!("refresh task: {e}")))?
    }

    pub fn is_authenticated(&self) -> bool { self.inner.state.lock().context.is_some() }

    /// True only while signed in with an access token that decodes and has not expired.
    pub fn is_session_valid(&self) -> bool {
        let st = self.inner.state.lock();
        match st.context.as_ref() {
            Some(ctx) if !ctx.tokens.access_token.is_empty() => {
                decode_access_token(&ctx.tokens.access_token, self.inner.clock.now()).is_ok()
            }
            _ => false,
        }
    }

    pub fn current_user(&self) -> Option<User> { self.inner.state.lock().context.as_ref().map(|c| c.user.clone()) }

    pub fn has_role(&self, role: &str) -> bool {
        self.inner.state.lock().context.as_ref().is_some_and(|c| c.user.has_role(role))
    }

    pub fn has_any_role(&self, roles: &[&str]) -> bool {
        self.inner.state.lock().context.as_ref().is_some_and(|c| c.user.has_any_role(roles))
    }

    /// Live current-user signal. The receiver sees the present value immediately.
    pub fn subscribe(&self) -> watch::Receiver<Option<User>> { self.inner.current_user.subscribe() }

    pub fn subscribe_events(&self) -> broadcast::Receiver<SessionEvent> { self.inner.events.subscribe() }

    pub fn state(&self) -> SessionState {
        let st = self.inner.state.lock();
        match (&st.context, st.refreshing) {
            (None, _) => SessionState::LoggedOut,
            (Some(_), Some(g)) if g == st.generation => SessionState::RefreshPending,
            (Some(_), _) => SessionState::Active,
        }
    }

    /// When the armed refresh timer will fire, if one is armed.
    pub fn refresh_deadline(&self) -> Option<DateTime<Utc>> { self.inner.state.lock().timer.as_ref().map(|t| t.fires_at) }

    pub fn session_window(&self) -> Option<SessionWindow> { self.inner.state.lock().context.as_ref().map(|c| c.session) }

    pub fn header_builder(&self) -> AuthHeaderBuilder { AuthHeaderBuilder::new(self.inner.store.clone()) }

    /// Headers for the live session. Anonymous once logged out, even if the store could not
    /// be cleared.
    pub fn build_auth_headers(&self) -> AuthHeaders {
        if !self.is_authenticated() {
            return AuthHeaders::anonymous();
        }
        self.header_builder().build()
    }
}

impl Inner {
    fn startup(self: &Arc<Self>) {
        let mut st = self.state.lock();
        let Some(ctx) = self.store.read() else {
            // nothing stored, or a corrupt record: either way leave the store empty
            if let Err(e) = self.store.clear() {
                warn!(target: "taskdesk::session", error = %e, "could not clear session store at startup");
            }
            debug!(target: "taskdesk::session", "no persisted session");
            return;
        };
        if let Some(reason) = self.lapse_reason(&ctx.session) {
            info!(target: "taskdesk::session", user = %ctx.user.identity, reason = reason.as_str(), "persisted session lapsed; discarding");
            if let Err(e) = self.store.clear() {
                warn!(target: "taskdesk::session", error = %e, "could not clear lapsed session");
            }
            let _ = self.events.send(SessionEvent::LoggedOut { reason });
            return;
        }
        info!(target: "taskdesk::session", user = %ctx.user.identity, expires_at = %ctx.session.expiration, "session restored");
        self.current_user.send_replace(Some(ctx.user.clone()));
        st.context = Some(ctx);
        Self::arm_refresh(self, &mut st, Issued::Restored);
    }

    fn lapse_reason(&self, window: &SessionWindow) -> Option<LogoutReason> {
        let now = self.clock.now();
        if window.is_expired(now) {
            Some(LogoutReason::Expired)
        } else if window.is_idle(now, self.settings.max_inactivity) {
            Some(LogoutReason::Inactive)
        } else {
            None
        }
    }

    /// When the next refresh should fire. A restored token already inside the buffer refreshes
    /// at once; a freshly issued token whose whole lifetime fits in the buffer refreshes halfway
    /// through it instead, so short-lived tokens never refresh back to back.
    fn refresh_instant(&self, window: &SessionWindow, now: DateTime<Utc>, issued: Issued) -> DateTime<Utc> {
        let due = window.refresh_due(self.settings.refresh_buffer);
        if issued == Issued::Restored || due > now {
            return due.max(now);
        }
        let half_life = (window.expiration - now) / 2;
        now + half_life.max(chrono::Duration::seconds(MIN_REFRESH_DELAY_SECS))
    }

    /// Cancel any armed timer, then arm one at [`refresh_instant`](Self::refresh_instant).
    fn arm_refresh(this: &Arc<Self>, st: &mut State, issued: Issued) {
        if let Some(prev) = st.timer.take() {
            prev.cancel();
        }
        let Some(ctx) = st.context.as_ref() else { return };
        let Ok(runtime) = tokio::runtime::Handle::try_current() else {
            warn!(target: "taskdesk::session", user = %ctx.user.identity, "no runtime; refresh timer not armed");
            return;
        };
        let now = this.clock.now();
        let fires_at = this.refresh_instant(&ctx.session, now, issued);
        let delay = (fires_at - now).to_std().unwrap_or_default();
        // deadline is fixed here, not when the task is first polled
        let deadline = tokio::time::Instant::now() + delay;
        st.timer_seq += 1;
        let id = st.timer_seq;
        let generation = st.generation;
        let weak: Weak<Self> = Arc::downgrade(this);
        let handle = runtime.spawn(async move {
            tokio::time::sleep_until(deadline).await;
            if let Some(inner) = weak.upgrade() {
                Inner::on_timer(&inner, generation, id).await;
            }
        });
        debug!(target: "taskdesk::session", timer_id = id, generation, fires_at = %fires_at, "refresh timer armed");
        st.timer = Some(RefreshTimer { id, fires_at, handle });
    }

    async fn on_timer(this: &Arc<Self>, generation: u64, timer_id: u64) {
        let refresh_token = {
            let mut st = this.state.lock();
            if st.generation != generation || st.timer.as_ref().map(|t| t.id) != Some(timer_id) {
                debug!(target: "taskdesk::session", timer_id, "stale refresh timer ignored");
                return;
            }
            // disarm without aborting: this task is the timer
            st.timer = None;
            if st.refreshing == Some(generation) {
                return;
            }
            let Some(rt) = st.context.as_ref().map(|c| c.tokens.refresh_token.clone()) else { return };
            st.refreshing = Some(generation);
            rt
        };
        debug!(target: "taskdesk::session", timer_id, generation, "refresh timer fired");
        if let Err(e) = Self::complete_refresh(this, generation, refresh_token).await {
            debug!(target: "taskdesk::session", code = e.code_str(), "scheduled refresh did not complete");
        }
    }

    async fn complete_refresh(this: &Arc<Self>, generation: u64, refresh_token: String) -> Result<(), SessionError> {
        let outcome = this.provider.refresh_token(&refresh_token).await;

        let mut st = this.state.lock();
        if st.generation != generation {
            debug!(target: "taskdesk::session", generation, current = st.generation, "refresh completion discarded; session changed while in flight");
            return Err(SessionError::Superseded);
        }
        st.refreshing = None;
        let tokens = match outcome {
            Ok(tokens) => tokens,
            Err(e) => {
                warn!(target: "taskdesk::session", error = %e, "token refresh failed; ending session");
                this.end_locked(&mut st, LogoutReason::RefreshFailed);
                return Err(e.into());
            }
        };
        let Some(mut next) = st.context.clone() else {
            return Err(SessionError::NotAuthenticated);
        };
        next.apply_refresh(tokens, this.clock.now());
        if let Err(e) = this.store.write(&next) {
            error!(target: "taskdesk::session", error = %e, "could not persist refreshed tokens; ending session");
            this.end_locked(&mut st, LogoutReason::StorageFailure);
            return Err(e.into());
        }
        let (user_id, expires_at) = (next.user.identity.clone(), next.session.expiration);
        st.context = Some(next);
        Self::arm_refresh(this, &mut st, Issued::Fresh);
        info!(target: "taskdesk::session", user = %user_id, expires_at = %expires_at, "tokens refreshed");
        let _ = this.events.send(SessionEvent::Refreshed { user_id, expires_at });
        Ok(())
    }

    /// Transition to LoggedOut. Returns the refresh token of the session that ended, if any.
    fn end_locked(&self, st: &mut State, reason: LogoutReason) -> Option<String> {
        st.generation += 1;
        st.refreshing = None;
        if let Some(timer) = st.timer.take() {
            timer.cancel();
        }
        let previous = st.context.take();
        if let Err(e) = self.store.clear() {
            error!(target: "taskdesk::session", error = %e, "could not clear session store on logout");
        }
        self.current_user.send_replace(None);
        let previous = previous?;
        info!(target: "taskdesk::session", user = %previous.user.identity, reason = reason.as_str(), "logged out");
        let _ = self.events.send(SessionEvent::LoggedOut { reason });
        Some(previous.tokens.refresh_token)
    }

    fn end_remote_session(&self, refresh_token: String) -> Option<JoinHandle<()>> {
        let Ok(rt) = tokio::runtime::Handle::try_current() else {
            debug!(target: "taskdesk::session", "no runtime; skipping remote session end");
            return None;
        };
        let provider = self.provider.clone();
        Some(rt.spawn(async move {
            if let Err(e) = provider.end_session(&refresh_token).await {
                debug!(target: "taskdesk::session", error = %e, "remote session end failed");
            }
        }))
    }
}

impl Drop for Inner {
    fn drop(&mut self) {
        if let Some(timer) = self.state.get_mut().timer.take() {
            timer.cancel();
        }
    }
}

#[cfg(test)]
#[path = "manager_tests.rs"]
mod manager_tests;
