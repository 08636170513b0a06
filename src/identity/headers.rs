use std::sync::Arc;

use reqwest::header::{HeaderMap, HeaderName, HeaderValue, AUTHORIZATION};
use tracing::warn;

use super::session::UserContext;
use super::store::SessionStore;

pub const USER_HEADER: &str = "x-user-id";
pub const ORGANIZATION_HEADER: &str = "x-organization-id";
pub const TENANT_HEADER: &str = "x-tenant-id";

/// Headers to attach to an outgoing resource request. Empty when nobody is signed in.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct AuthHeaders {
    entries: Vec<(HeaderName, HeaderValue)>,
}

impl AuthHeaders {
    pub fn anonymous() -> Self { Self::default() }

    pub fn from_context(ctx: &UserContext) -> Self {
        let mut out = Self::default();
        out.push(USER_HEADER, &ctx.user.identity);
        out.push(ORGANIZATION_HEADER, &ctx.user.organization_id);
        if let Some(tenant) = &ctx.user.tenant_id {
            out.push(TENANT_HEADER, tenant);
        }
        if !ctx.tokens.access_token.is_empty() {
            match HeaderValue::from_str(&format!("Bearer {}", ctx.tokens.access_token)) {
                Ok(mut v) => {
                    v.set_sensitive(true);
                    out.entries.push((AUTHORIZATION, v));
                }
                Err(_) => warn!(target: "taskdesk::headers", "access token is not a valid header value; omitting Authorization"),
            }
        }
        out
    }

    fn push(&mut self, name: &'static str, value: &str) {
        match HeaderValue::from_str(value) {
            Ok(v) => self.entries.push((HeaderName::from_static(name), v)),
            Err(_) => warn!(target: "taskdesk::headers", header = name, "value is not a valid header value; skipping"),
        }
    }

    pub fn is_anonymous(&self) -> bool { self.entries.is_empty() }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .iter()
            .find(|(n, _)| n.as_str().eq_ignore_ascii_case(name))
            .and_then(|(_, v)| v.to_str().ok())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&HeaderName, &HeaderValue)> { self.entries.iter().map(|(n, v)| (n, v)) }

    pub fn to_header_map(&self) -> HeaderMap {
        let mut map = HeaderMap::with_capacity(self.entries.len());
        for (n, v) in &self.entries {
            map.insert(n.clone(), v.clone());
        }
        map
    }
}

/// Derives request headers from the persisted record, so stateless services need only the store.
/// Never blocks on the network and never refreshes.
#[derive(Clone)]
pub struct AuthHeaderBuilder {
    store: Arc<dyn SessionStore>,
}

impl AuthHeaderBuilder {
    pub fn new(store: Arc<dyn SessionStore>) -> Self { Self { store } }

    pub fn build(&self) -> AuthHeaders {
        match self.store.read() {
            Some(ctx) => AuthHeaders::from_context(&ctx),
            None => AuthHeaders::anonymous(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::identity::store::MemorySessionStore;
    use crate::identity::testing::token_set;
    use crate::identity::user::User;
    use chrono::Utc;
    use std::collections::BTreeSet;

    fn ctx(tenant: Option<&str>) -> UserContext {
        let user = User {
            identity: "alice".into(),
            display_name: "Alice".into(),
            roles: BTreeSet::new(),
            organization_id: "42".into(),
            tenant_id: tenant.map(str::to_string),
            email: None,
        };
        UserContext::open(user, token_set("alice", Utc::now(), 3600, 0), Utc::now())
    }

    #[test]
    fn logged_out_is_anonymous() {
        let builder = AuthHeaderBuilder::new(Arc::new(MemorySessionStore::new()));
        let headers = builder.build();
        assert!(headers.is_anonymous());
        assert!(headers.to_header_map().is_empty());
    }

    #[test]
    fn logged_in_carries_bearer_and_scope_hints() {
        let store = Arc::new(MemorySessionStore::new());
        let c = ctx(Some("acme"));
        store.write(&c).unwrap();
        let headers = AuthHeaderBuilder::new(store).build();
        assert_eq!(headers.get("authorization"), Some(format!("Bearer {}", c.tokens.access_token).as_str()));
        assert_eq!(headers.get(USER_HEADER), Some("alice"));
        assert_eq!(headers.get(ORGANIZATION_HEADER), Some("42"));
        assert_eq!(headers.get(TENANT_HEADER), Some("acme"));
        let map = headers.to_header_map();
        assert_eq!(map.len(), 4);
        assert!(map.get(AUTHORIZATION).unwrap().is_sensitive());
    }

    #[test]
    fn tenant_hint_omitted_when_absent() {
        let headers = AuthHeaders::from_context(&ctx(None));
        assert!(headers.get(TENANT_HEADER).is_none());
        assert_eq!(headers.iter().count(), 3);
    }

    #[test]
    fn empty_access_token_omits_authorization() {
        let mut c = ctx(None);
        c.tokens.access_token.clear();
        let headers = AuthHeaders::from_context(&c);
        assert!(headers.get("authorization").is_none());
        assert_eq!(headers.get(USER_HEADER), Some("alice"));
    }

    #[test]
    fn invalid_header_values_are_skipped() {
        let mut c = ctx(None);
        c.user.organization_id = "bad\nvalue".into();
        let headers = AuthHeaders::from_context(&c);
        assert!(headers.get(ORGANIZATION_HEADER).is_none());
        assert!(headers.get("authorization").is_some());
    }
}
