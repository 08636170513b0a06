//! taskdesk session core: signs a user in against an OpenID Connect provider, persists the
//! resulting user context, keeps access tokens fresh ahead of expiry, expires idle sessions
//! and derives the headers that resource requests carry.

pub mod api;
pub mod cli;
pub mod config;
pub mod error;
pub mod identity;
pub mod logging;

pub use config::{SessionConfig, SessionSettings};
pub use error::{AuthFailure, ConfigError, InvalidTokenError, MalformedPayloadError, SessionError, StoreError};
pub use identity::{AuthHeaders, SessionEvent, SessionManager, SessionState, User};
