use std::collections::BTreeSet;

use serde_json::Value;

use super::token::TokenPayload;
use super::user::User;
use crate::error::MalformedPayloadError;

// Scope ids arrive as strings or numbers depending on the realm mapper.
fn scope_id(v: Option<&Value>) -> Option<String> {
    match v? {
        Value::String(s) if !s.trim().is_empty() => Some(s.trim().to_string()),
        Value::Number(n) => Some(n.to_string()),
        _ => None,
    }
}

fn non_blank(s: Option<&str>) -> Option<&str> { s.map(str::trim).filter(|s| !s.is_empty()) }

/// Extract the domain user from decoded claims.
/// Identity and organization are mandatory; everything else degrades to a default.
pub fn map_payload(payload: &TokenPayload) -> Result<User, MalformedPayloadError> {
    let identity = non_blank(payload.preferred_username.as_deref())
        .or_else(|| non_blank(payload.sub.as_deref()))
        .ok_or(MalformedPayloadError::MissingIdentity)?
        .to_string();
    let organization_id = scope_id(payload.organizacion_id.as_ref()).ok_or(MalformedPayloadError::MissingOrganization)?;

    let mut roles: BTreeSet<String> = payload.roles.iter().cloned().collect();
    if let Some(realm) = &payload.realm_access {
        roles.extend(realm.roles.iter().cloned());
    }
    roles.retain(|r| !r.is_empty());

    Ok(User {
        display_name: non_blank(payload.name.as_deref()).unwrap_or(&identity).to_string(),
        identity,
        roles,
        organization_id,
        tenant_id: scope_id(payload.cliente_id.as_ref()),
        email: non_blank(payload.email.as_deref()).map(str::to_string),
    })
}
