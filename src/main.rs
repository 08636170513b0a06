//!
//! taskdesk CLI binary
//! -------------------
//! Signs in against the identity provider, keeps the persisted user context, and issues
//! authenticated requests to the workspace API. Every invocation restores the session from
//! the state directory first, so lapsed sessions are discarded before any command runs.

use std::env;
use std::io::{self, BufRead, Write};
use std::path::PathBuf;

use anyhow::{anyhow, bail, Context, Result};
use tracing::info;

use taskdesk::api::ApiClient;
use taskdesk::cli::{header_rows, print_value, render_table, status_rows};
use taskdesk::config::SessionConfig;
use taskdesk::identity::{SessionEvent, SessionManager, User};
use taskdesk::logging::init_tracing;

fn print_usage(program: &str) {
    eprintln!(
        "Usage:\n  {program} [--config <file>] [--state-dir <dir>] <command> [args]\n\nCommands:\n  login --user <u> [--password <p>]   sign in; password is read from TASKDESK_PASSWORD or stdin when omitted\n  logout                             end the session locally and at the identity provider\n  status                             show session state, window and next refresh\n  whoami                             print the signed-in user id\n  headers [--reveal]                 show the headers attached to API requests\n  touch                              record user activity\n  refresh                            refresh tokens now\n  get <path>                         GET <api_base_url>/<path> with session headers\n  post <path> <json>                 POST a JSON body to <api_base_url>/<path>\n  watch                              stay resident and print session changes until Ctrl-C\n\nFlags:\n  --config <file>          JSON config file (default: <state dir>/taskdesk.json when present)\n  --state-dir <dir>        Directory holding the persisted session (default: $HOME/.taskdesk)\n  -h, --help               Show this help\n\nEnvironment:\n  TASKDESK_ISSUER_URL, TASKDESK_CLIENT_ID, TASKDESK_CLIENT_SECRET, TASKDESK_STATE_DIR,\n  TASKDESK_API_URL, TASKDESK_REFRESH_BUFFER_SECS, TASKDESK_MAX_INACTIVITY_SECS,\n  TASKDESK_HTTP_TIMEOUT_MS, RUST_LOG"
    );
}

struct Invocation {
    config: Option<PathBuf>,
    state_dir: Option<PathBuf>,
    command: String,
    rest: Vec<String>,
}

fn parse_args(args: &[String]) -> Result<Option<Invocation>> {
    let mut config = None;
    let mut state_dir = None;
    let mut i = 0;
    while i < args.len() {
        match args[i].as_str() {
            "-h" | "--help" => return Ok(None),
            "--config" => {
                i += 1;
                config = Some(PathBuf::from(args.get(i).ok_or_else(|| anyhow!("--config requires a path"))?));
            }
            "--state-dir" => {
                i += 1;
                state_dir = Some(PathBuf::from(args.get(i).ok_or_else(|| anyhow!("--state-dir requires a path"))?));
            }
            cmd => {
                return Ok(Some(Invocation { config, state_dir, command: cmd.to_string(), rest: args[i + 1..].to_vec() }));
            }
        }
        i += 1;
    }
    Ok(None)
}

fn flag_value(rest: &[String], names: &[&str]) -> Option<String> {
    rest.iter().position(|a| names.contains(&a.as_str())).and_then(|i| rest.get(i + 1).cloned())
}

fn read_password() -> Result<String> {
    if let Ok(p) = env::var("TASKDESK_PASSWORD") {
        return Ok(p);
    }
    eprint!("password: ");
    io::stderr().flush().ok();
    let mut line = String::new();
    io::stdin().lock().read_line(&mut line).context("reading password from stdin")?;
    Ok(line.trim_end_matches(['\r', '\n']).to_string())
}

fn print_kv(rows: &[Vec<String>]) { println!("{}", render_table(&["key", "value"], rows)); }

fn require_session(session: &SessionManager) -> Result<()> {
    if !session.enforce_session_window() {
        bail!("session expired, please log in again");
    }
    Ok(())
}

#[tokio::main]
async fn main() -> Result<()> {
    init_tracing("info");

    let argv: Vec<String> = env::args().collect();
    let program = argv.first().cloned().unwrap_or_else(|| "taskdesk".to_string());
    let Some(inv) = parse_args(argv.get(1..).unwrap_or(&[]))? else {
        print_usage(&program);
        return Ok(());
    };

    let mut cfg = SessionConfig::load(inv.config.as_deref()).context("loading configuration")?;
    if let Some(dir) = inv.state_dir {
        cfg.state_dir = dir;
    }
    info!(target: "taskdesk", issuer = %cfg.issuer_url, state_dir = %cfg.state_dir.display(), command = %inv.command, "taskdesk starting");
    let session = SessionManager::from_config(&cfg).context("initializing session")?;

    match inv.command.as_str() {
        "login" => {
            let user = flag_value(&inv.rest, &["--user", "-u"]).ok_or_else(|| anyhow!("login requires --user"))?;
            let password = match flag_value(&inv.rest, &["--password", "-p"]) {
                Some(p) => p,
                None => read_password()?,
            };
            match session.try_login(&user, &password).await {
                Ok(u) => println!("logged in as {} ({})", u.identity, u.display_name),
                Err(e) => bail!("{} [{}]", e.user_message(), e.code_str()),
            }
        }
        "logout" => {
            session.logout_and_wait().await;
            println!("logged out");
        }
        "status" => print_kv(&status_rows(&session)),
        "whoami" => match session.current_user() {
            Some(u) => println!("{}", u.identity),
            None => bail!("not logged in"),
        },
        "headers" => {
            let reveal = inv.rest.iter().any(|a| a == "--reveal");
            let headers = session.build_auth_headers();
            if headers.is_anonymous() {
                println!("(anonymous: no headers)");
            } else {
                println!("{}", render_table(&["header", "value"], &header_rows(&headers, reveal)));
            }
        }
        "touch" => {
            require_session(&session)?;
            if !session.update_activity() {
                bail!("could not record activity");
            }
            println!("activity recorded");
        }
        "refresh" => {
            require_session(&session)?;
            session.refresh_now().await.map_err(|e| anyhow!("{} [{}]", e.user_message(), e.code_str()))?;
            match session.session_window() {
                Some(w) => println!("tokens refreshed; expires {}", w.expiration.to_rfc3339()),
                None => println!("tokens refreshed"),
            }
        }
        "get" => {
            let path = inv.rest.first().ok_or_else(|| anyhow!("get requires a path"))?;
            let api = ApiClient::new(&cfg, session.clone())?;
            print_value(&api.get_json(path).await?);
        }
        "post" => {
            let path = inv.rest.first().ok_or_else(|| anyhow!("post requires a path"))?;
            let raw = inv.rest.get(1).ok_or_else(|| anyhow!("post requires a JSON body"))?;
            let body: serde_json::Value = serde_json::from_str(raw).context("body is not valid JSON")?;
            let api = ApiClient::new(&cfg, session.clone())?;
            print_value(&api.post_json(path, &body).await?);
        }
        "watch" => watch(&session).await?,
        other => {
            print_usage(&program);
            bail!("unknown command: {other}");
        }
    }
    Ok(())
}

fn describe(user: &Option<User>) -> String {
    match user {
        Some(u) => format!("signed in: {}", u.identity),
        None => "signed out".to_string(),
    }
}

async fn watch(session: &SessionManager) -> Result<()> {
    let mut user_rx = session.subscribe();
    let mut events = session.subscribe_events();
    println!("{}", describe(&*user_rx.borrow_and_update()));
    if let Some(at) = session.refresh_deadline() {
        println!("next refresh at {}", at.to_rfc3339());
    }
    loop {
        tokio::select! {
            changed = user_rx.changed() => {
                if changed.is_err() { break; }
                println!("{}", describe(&*user_rx.borrow_and_update()));
            }
            ev = events.recv() => match ev {
                Ok(SessionEvent::Refreshed { expires_at, .. }) => {
                    println!("tokens refreshed; expires {}", expires_at.to_rfc3339());
                }
                Ok(SessionEvent::LoggedOut { reason }) => println!("session ended: {}", reason.as_str()),
                Ok(SessionEvent::LoggedIn { .. }) => {}
                Err(tokio::sync::broadcast::error::RecvError::Lagged(_)) => {}
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            },
            _ = tokio::signal::ctrl_c() => break,
        }
    }
    Ok(())
}
