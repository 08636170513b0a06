//! Durable home of the one `UserContext` record.
//! Reads are forgiving: anything that does not parse into a consistent record is "no session".

use std::path::{Path, PathBuf};

use parking_lot::{Mutex, RwLock};
use tracing::{debug, warn};

use super::session::UserContext;
use crate::error::StoreError;

/// Well-known key the record lives under.
pub const USER_CONTEXT_KEY: &str = "userContext";

pub trait SessionStore: Send + Sync {
    /// Never fails; malformed data reads as `None`.
    fn read(&self) -> Option<UserContext>;
    fn write(&self, ctx: &UserContext) -> Result<(), StoreError>;
    fn clear(&self) -> Result<(), StoreError>;
}

fn decode(raw: &[u8], origin: &str) -> Option<UserContext> {
    match serde_json::from_slice::<UserContext>(raw) {
        Ok(ctx) if ctx.session.is_consistent() => Some(ctx),
        Ok(_) => {
            warn!(target: "taskdesk::store", origin, "stored session window is inconsistent; ignoring record");
            None
        }
        Err(e) => {
            warn!(target: "taskdesk::store", origin, error = %e, "stored session record is corrupt; ignoring record");
            None
        }
    }
}

/// One JSON file per state directory, replaced atomically on write.
#[derive(Debug)]
pub struct FileSessionStore {
    path: PathBuf,
    // serializes writers within this process; rename keeps readers from seeing torn files
    write_lock: Mutex<()>,
}

impl FileSessionStore {
    pub fn new(path: impl Into<PathBuf>) -> Self { Self { path: path.into(), write_lock: Mutex::new(()) } }

    pub fn in_dir(state_dir: &Path) -> Self { Self::new(state_dir.join(format!("{USER_CONTEXT_KEY}.json"))) }

    pub fn path(&self) -> &Path { &self.path }

    fn tmp_path(&self) -> PathBuf {
        let mut name = self.path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
        name.push(".tmp");
        self.path.with_file_name(name)
    }
}

impl SessionStore for FileSessionStore {
    fn read(&self) -> Option<UserContext> {
        match std::fs::read(&self.path) {
            Ok(bytes) => decode(&bytes, &self.path.display().to_string()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => None,
            Err(e) => {
                warn!(target: "taskdesk::store", path = %self.path.display(), error = %e, "session file unreadable");
                None
            }
        }
    }

    fn write(&self, ctx: &UserContext) -> Result<(), StoreError> {
        let bytes = serde_json::to_vec_pretty(ctx)?;
        let _guard = self.write_lock.lock();
        if let Some(dir) = self.path.parent() {
            if !dir.as_os_str().is_empty() { std::fs::create_dir_all(dir)?; }
        }
        let tmp = self.tmp_path();
        std::fs::write(&tmp, &bytes)?;
        restrict_permissions(&tmp);
        std::fs::rename(&tmp, &self.path)?;
        debug!(target: "taskdesk::store", path = %self.path.display(), user = %ctx.user.identity, "session record written");
        Ok(())
    }

    fn clear(&self) -> Result<(), StoreError> {
        let _guard = self.write_lock.lock();
        match std::fs::remove_file(&self.path) {
            Ok(()) => {
                debug!(target: "taskdesk::store", path = %self.path.display(), "session record cleared");
                Ok(())
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e.into()),
        }
    }
}

// tokens live in this file; keep it owner-only where the platform allows
#[cfg(unix)]
fn restrict_permissions(path: &Path) {
    use std::os::unix::fs::PermissionsExt;
    if let Err(e) = std::fs::set_permissions(path, std::fs::Permissions::from_mode(0o600)) {
        warn!(target: "taskdesk::store", path = %path.display(), error = %e, "could not restrict session file permissions");
    }
}

#[cfg(not(unix))]
fn restrict_permissions(_path: &Path) {}

/// Process-local store. Holds the serialized form so reads go through the same decode path.
#[derive(Debug, Default)]
pub struct MemorySessionStore {
    raw: RwLock<Option<Vec<u8>>>,
}

impl MemorySessionStore {
    pub fn new() -> Self { Self::default() }

    /// Seed with arbitrary bytes, e.g. a record left behind by an older build.
    pub fn with_raw(raw: impl Into<Vec<u8>>) -> Self { Self { raw: RwLock::new(Some(raw.into())) } }

    pub fn is_empty(&self) -> bool { self.raw.read().is_none() }
}

impl SessionStore for MemorySessionStore {
    fn read(&self) -> Option<UserContext> {
        let raw = self.raw.read();
        decode(raw.as_deref()?, "memory")
    }

    fn write(&self, ctx: &UserContext) -> Result<(), StoreError> {
        let bytes = serde_json::to_vec(ctx)?;
        *self.raw.write() = Some(bytes);
        Ok(())
    }

    fn clear(&self) -> Result<(), StoreError> {
        *self.raw.write() = None;
        Ok(())
    }
}

#[cfg(test)]
#[path = "store_tests.rs"]
mod store_tests;
