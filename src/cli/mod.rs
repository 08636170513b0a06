//! Rendering helpers for the `taskdesk` binary.

use serde_json::Value;

use crate::identity::{AuthHeaders, SessionManager, SessionState};

const MAX_COL_WIDTH: usize = 80;

/// Render rows under a header as an ASCII table.
pub fn render_table(cols: &[&str], rows: &[Vec<String>]) -> String {
    let mut widths: Vec<usize> = cols.iter().map(|c| display_len(c).min(MAX_COL_WIDTH)).collect();
    for r in rows {
        for (i, cell) in r.iter().enumerate().take(cols.len()) {
            let w = display_len(cell);
            if w > widths[i] { widths[i] = w.min(MAX_COL_WIDTH); }
        }
    }
    let header: Vec<String> = cols.iter().map(|c| c.to_string()).collect();
    let sep = build_separator(&widths);
    let mut out = String::new();
    out.push_str(&sep);
    out.push('\n');
    out.push_str(&build_row(&header, &widths));
    out.push('\n');
    out.push_str(&sep);
    out.push('\n');
    for r in rows {
        out.push_str(&build_row(r, &widths));
        out.push('\n');
    }
    out.push_str(&sep);
    out
}

/// Key/value rows describing the live session. Never includes token material.
pub fn status_rows(session: &SessionManager) -> Vec<Vec<String>> {
    let state = match session.state() {
        SessionState::LoggedOut => "logged out",
        SessionState::Active => "active",
        SessionState::RefreshPending => "refresh pending",
    };
    let mut rows = vec![vec!["state".to_string(), state.to_string()]];
    if let Some(user) = session.current_user() {
        rows.push(vec!["user".into(), user.identity.clone()]);
        rows.push(vec!["name".into(), user.display_name.clone()]);
        rows.push(vec!["organization".into(), user.organization_id.clone()]);
        rows.push(vec!["tenant".into(), user.tenant_id.clone().unwrap_or_else(|| "-".into())]);
        rows.push(vec!["roles".into(), user.roles.iter().cloned().collect::<Vec<_>>().join(",")]);
    }
    if let Some(w) = session.session_window() {
        rows.push(vec!["login time".into(), w.login_time.to_rfc3339()]);
        rows.push(vec!["last activity".into(), w.last_activity.to_rfc3339()]);
        rows.push(vec!["expires".into(), w.expiration.to_rfc3339()]);
    }
    if let Some(at) = session.refresh_deadline() {
        rows.push(vec!["next refresh".into(), at.to_rfc3339()]);
    }
    rows
}

/// Header rows with the bearer credential masked unless `reveal` is set.
pub fn header_rows(headers: &AuthHeaders, reveal: bool) -> Vec<Vec<String>> {
    headers
        .iter()
        .map(|(name, value)| {
            let shown = if value.is_sensitive() && !reveal {
                mask_bearer(value.to_str().unwrap_or_default())
            } else {
                value.to_str().unwrap_or("<binary>").to_string()
            };
            vec![name.as_str().to_string(), shown]
        })
        .collect()
}

fn mask_bearer(v: &str) -> String {
    match v.split_once(' ') {
        Some((scheme, token)) => format!("{scheme} {}", truncate(token, 9)),
        None => "…".to_string(),
    }
}

/// Print a JSON response: arrays of objects as a table, everything else pretty-printed.
pub fn print_value(val: &Value) {
    if let Some((cols, rows)) = table_from_array(val) {
        let refs: Vec<&str> = cols.iter().map(String::as_str).collect();
        println!("{}", render_table(&refs, &rows));
        println!("rows: {}", rows.len());
        return;
    }
    match serde_json::to_string_pretty(val) {
        Ok(s) => println!("{s}"),
        Err(_) => println!("{val}"),
    }
}

// Union of keys across all rows, sorted; only when every element is an object.
fn table_from_array(val: &Value) -> Option<(Vec<String>, Vec<Vec<String>>)> {
    let arr = val.as_array()?;
    if arr.is_empty() { return None; }
    let mut keys: Vec<String> = Vec::new();
    for el in arr {
        let map = el.as_object()?;
        for k in map.keys() {
            if !keys.contains(k) { keys.push(k.clone()); }
        }
    }
    if keys.is_empty() { return None; }
    keys.sort();
    let rows = arr
        .iter()
        .filter_map(Value::as_object)
        .map(|m| keys.iter().map(|k| m.get(k).map(to_cell_string).unwrap_or_else(|| "NULL".into())).collect())
        .collect();
    Some((keys, rows))
}

fn to_cell_string(v: &Value) -> String {
    match v {
        Value::Null => String::from("NULL"),
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}

fn display_len(s: &str) -> usize { s.chars().count() }

fn build_separator(widths: &[usize]) -> String {
    let mut s = String::from("+");
    for w in widths {
        s.push_str(&"-".repeat(*w + 2));
        s.push('+');
    }
    s
}

fn build_row(cells: &[String], widths: &[usize]) -> String {
    let mut s = String::from("|");
    for (i, w) in widths.iter().enumerate() {
        let cell = cells.get(i).cloned().unwrap_or_default();
        let text = truncate(&cell, *w);
        s.push(' ');
        s.push_str(&text);
        s.push_str(&" ".repeat(w.saturating_sub(display_len(&text))));
        s.push_str(" |");
    }
    s
}

fn truncate(s: &str, max: usize) -> String {
    if display_len(s) <= max { return s.to_string(); }
    if max <= 1 { return "…".to_string(); }
    s.chars().take(max - 1).collect::<String>() + "…"
}
