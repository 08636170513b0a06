//! Client-side identity for taskdesk: token acquisition, the persisted session record,
//! the refresh-ahead lifecycle and the headers resource requests carry.
//! Keep the public surface thin and split implementation across sub-modules.

mod clock;
mod headers;
mod manager;
mod mapper;
mod provider;
mod session;
mod store;
mod token;
mod user;

#[cfg(test)]
pub(crate) mod testing;

pub use clock::{Clock, ManualClock, SystemClock};
pub use headers::{AuthHeaderBuilder, AuthHeaders, ORGANIZATION_HEADER, TENANT_HEADER, USER_HEADER};
pub use manager::{LogoutReason, SessionEvent, SessionManager, SessionState};
pub use mapper::map_payload;
pub use provider::{IdentityProvider, KeycloakProvider};
pub use session::{SessionWindow, UserContext};
pub use store::{FileSessionStore, MemorySessionStore, SessionStore, USER_CONTEXT_KEY};
pub use token::{decode_access_token, RealmAccess, TokenPayload, TokenSet};
pub use user::User;
