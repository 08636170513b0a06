//! Login, persistence across restarts, authenticated API calls and logout, end to end
//! against mock identity and API servers with the file-backed store.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use base64::engine::general_purpose::URL_SAFE_NO_PAD;
use base64::Engine;
use chrono::{Duration, Utc};
use serde_json::json;
use tempfile::tempdir;
use wiremock::matchers::{body_string_contains, header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

use taskdesk::api::{ApiClient, ApiError};
use taskdesk::identity::{FileSessionStore, KeycloakProvider, SessionStore, SystemClock};
use taskdesk::{SessionConfig, SessionManager};

const REALM_PATH: &str = "/realms/taskdesk/protocol/openid-connect";

fn access_token(username: &str) -> String {
    let claims = json!({
        "exp": (Utc::now() + Duration::hours(1)).timestamp(),
        "sub": "f3c1-42",
        "preferred_username": username,
        "name": "Alice Example",
        "realm_access": { "roles": ["member"] },
        "roles": ["editor"],
        "organizacion_id": 42,
        "cliente_id": "acme",
    });
    format!(
        "{}.{}.sig",
        URL_SAFE_NO_PAD.encode(br#"{"alg":"RS256","typ":"JWT"}"#),
        URL_SAFE_NO_PAD.encode(claims.to_string())
    )
}

async fn mount_identity(server: &MockServer, access: &str) {
    Mock::given(method("POST"))
        .and(path(format!("{REALM_PATH}/token")))
        .and(body_string_contains("password=pw1"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!({
            "access_token": access,
            "refresh_token": "refresh-1",
            "expires_in": 3600,
            "refresh_expires_in": 7200,
            "token_type": "Bearer",
        })))
        .mount(server)
        .await;
    Mock::given(method("POST"))
        .and(path(format!("{REALM_PATH}/token")))
        .respond_with(ResponseTemplate::new(401).set_body_json(json!({"error": "invalid_grant"})))
        .mount(server)
        .await;
}

fn config_for(server: &MockServer, state_dir: &std::path::Path) -> SessionConfig {
    SessionConfig {
        issuer_url: format!("{}{REALM_PATH}", server.uri()),
        api_base_url: format!("{}/api", server.uri()),
        state_dir: state_dir.to_path_buf(),
        ..Default::default()
    }
}

#[tokio::test]
async fn login_persists_and_survives_restart() {
    let server = MockServer::start().await;
    let token = access_token("alice");
    mount_identity(&server, &token).await;
    let dir = tempdir().unwrap();
    let cfg = config_for(&server, dir.path());

    let first = SessionManager::from_config(&cfg).unwrap();
    assert!(!first.is_authenticated());
    assert!(first.login("alice", "pw1").await);

    let store = FileSessionStore::in_dir(dir.path());
    assert!(store.path().exists());
    let raw: serde_json::Value = serde_json::from_slice(&std::fs::read(store.path()).unwrap()).unwrap();
    assert_eq!(raw["user"]["username"], "alice");
    assert_eq!(raw["user"]["organizacion_id"], "42");
    assert_eq!(raw["user"]["cliente_id"], "acme");
    assert_eq!(raw["user"]["roles"], json!(["editor", "member"]));
    assert!(raw["session"]["loginTime"].is_i64());
    assert!(raw["session"]["lastActivity"].is_i64());
    assert!(raw["session"]["expirationTime"].is_i64());
    assert_eq!(raw["keycloakToken"]["refresh_token"], "refresh-1");

    // a fresh process sees the same session
    let second = SessionManager::from_config(&cfg).unwrap();
    assert!(second.is_authenticated());
    assert!(second.is_session_valid());
    let user = second.current_user().unwrap();
    assert_eq!(user.identity, "alice");
    assert_eq!(user.display_name, "Alice Example");
    assert!(second.has_role("member") && second.has_role("editor"));
    assert_eq!(second.session_window(), first.session_window());
}

#[tokio::test]
async fn rejected_login_leaves_no_record() {
    let server = MockServer::start().await;
    mount_identity(&server, &access_token("alice")).await;
    let dir = tempdir().unwrap();
    let cfg = config_for(&server, dir.path());

    let session = SessionManager::from_config(&cfg).unwrap();
    match session.try_login("alice", "wrong").await {
        Err(e) => {
            assert_eq!(e.code_str(), "credential_rejected");
            assert_eq!(e.user_message(), "invalid credentials");
        }
        Ok(u) => panic!("unexpected login as {}", u.identity),
    }
    assert!(!session.is_authenticated());
    assert!(FileSessionStore::in_dir(dir.path()).read().is_none());
}

#[tokio::test]
async fn api_requests_carry_session_headers_and_count_as_activity() {
    let server = MockServer::start().await;
    let token = access_token("alice");
    mount_identity(&server, &token).await;
    Mock::given(method("GET"))
        .and(path("/api/tasks"))
        .and(header("authorization", format!("Bearer {token}").as_str()))
        .and(header("x-user-id", "alice"))
        .and(header("x-organization-id", "42"))
        .and(header("x-tenant-id", "acme"))
        .respond_with(ResponseTemplate::new(200).set_body_json(json!([{"id": 1, "title": "write docs"}])))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("POST"))
        .and(path("/api/tasks"))
        .and(header("x-user-id", "alice"))
        .and(body_string_contains("\"title\":\"review\""))
        .respond_with(ResponseTemplate::new(201).set_body_json(json!({"id": 2, "title": "review"})))
        .expect(1)
        .mount(&server)
        .await;
    Mock::given(method("GET"))
        .and(path("/api/forbidden"))
        .respond_with(ResponseTemplate::new(403).set_body_json(json!({"error": "forbidden"})))
        .mount(&server)
        .await;

    let dir = tempdir().unwrap();
    let cfg = config_for(&server, dir.path());
    let session = SessionManager::from_config(&cfg).unwrap();
    assert!(session.login("alice", "pw1").await);
    let before = session.session_window().unwrap();

    tokio::time::sleep(StdDuration::from_millis(20)).await;
    let api = ApiClient::new(&cfg, session.clone()).unwrap();
    let tasks = api.get_json("/tasks").await.unwrap();
    assert_eq!(tasks[0]["title"], "write docs");

    let after = session.session_window().unwrap();
    assert!(after.last_activity > before.last_activity);
    assert_eq!(after.expiration, before.expiration);

    let created = api.post_json("tasks", &json!({"title": "review"})).await.unwrap();
    assert_eq!(created["id"], 2);

    match api.get_json("forbidden").await {
        Err(ApiError::Status { status, body }) => {
            assert_eq!(status, 403);
            assert_eq!(body["error"], "forbidden");
        }
        other => panic!("expected status error, got {other:?}"),
    }
}

#[tokio::test]
async fn logout_clears_record_and_ends_remote_session() {
    let server = MockServer::start().await;
    mount_identity(&server, &access_token("alice")).await;
    Mock::given(method("POST"))
        .and(path(format!("{REALM_PATH}/logout")))
        .and(body_string_contains("refresh_token=refresh-1"))
        .respond_with(ResponseTemplate::new(204))
        .expect(1)
        .mount(&server)
        .await;

    let dir = tempdir().unwrap();
    let cfg = config_for(&server, dir.path());
    let session = SessionManager::from_config(&cfg).unwrap();
    assert!(session.login("alice", "pw1").await);
    let user_rx = session.subscribe();

    session.logout_and_wait().await;

    assert!(!session.is_authenticated());
    assert!(user_rx.borrow().is_none());
    assert!(session.build_auth_headers().is_anonymous());
    assert!(!FileSessionStore::in_dir(dir.path()).path().exists());

    let api = ApiClient::new(&cfg, session.clone()).unwrap();
    assert!(matches!(api.get_json("tasks").await, Err(ApiError::NotAuthenticated)));

    let restarted = SessionManager::from_config(&cfg).unwrap();
    assert!(!restarted.is_authenticated());
}

#[tokio::test]
async fn idle_record_is_discarded_on_restart() {
    let server = MockServer::start().await;
    mount_identity(&server, &access_token("alice")).await;
    let dir = tempdir().unwrap();
    let cfg = SessionConfig { max_inactivity_secs: 1, ..config_for(&server, dir.path()) };

    let session = SessionManager::from_config(&cfg).unwrap();
    assert!(session.login("alice", "pw1").await);
    drop(session);

    tokio::time::sleep(StdDuration::from_millis(1_100)).await;
    let store: Arc<dyn SessionStore> = Arc::new(FileSessionStore::in_dir(dir.path()));
    assert!(store.read().is_some());

    let provider = Arc::new(KeycloakProvider::new(&cfg).unwrap());
    let restarted = SessionManager::restore(provider, store.clone(), Arc::new(SystemClock), cfg.settings());
    assert!(!restarted.is_authenticated());
    assert!(store.read().is_none());
}
