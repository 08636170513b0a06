use std::collections::BTreeSet;

use serde::{Deserialize, Serialize};

/// The signed-in user as seen by every consumer of the session.
/// Replaced wholesale on login; never patched field by field.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct User {
    #[serde(rename = "username")]
    pub identity: String,
    #[serde(rename = "name")]
    pub display_name: String,
    #[serde(default)]
    pub roles: BTreeSet<String>,
    #[serde(rename = "organizacion_id")]
    pub organization_id: String,
    #[serde(rename = "cliente_id", default)]
    pub tenant_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub email: Option<String>,
}

impl User {
    pub fn has_role(&self, role: &str) -> bool { self.roles.contains(role) }

    pub fn has_any_role(&self, roles: &[&str]) -> bool { roles.iter().any(|r| self.has_role(r)) }
}
