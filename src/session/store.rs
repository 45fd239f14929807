use super::Session;
use crate::error::AuthError;
use chrono::{DateTime, Duration, Utc};
use log::{debug, warn};
use serde::{Deserialize, Serialize};
use std::fs;
use std::io::{ErrorKind, Write};
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

/// Durable home of the current session.
///
/// `load` never fails: unreadable or corrupt state reads as "no session".
pub trait CredentialStore: Send + Sync {
    fn save(&self, session: &Session) -> Result<(), AuthError>;
    fn load(&self) -> Option<Session>;
    fn clear(&self) -> Result<(), AuthError>;
}

/// On-disk record; the expiry hint mirrors a cookie lifetime
#[derive(Debug, Serialize, Deserialize)]
struct StoredRecord {
    saved_at: DateTime<Utc>,
    expires_at: DateTime<Utc>,
    session: Session,
}

/// JSON file store. Writes go to a sibling temp file and are renamed into place.
pub struct FileCredentialStore {
    path: PathBuf,
    lifetime: Duration,
    io: Mutex<()>,
}

impl FileCredentialStore {
    pub fn new(path: &Path, persist_days: u32) -> Self {
        Self {
            path: path.to_path_buf(),
            lifetime: Duration::days(i64::from(persist_days)),
            io: Mutex::new(()),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn write_atomic(&self, content: &str) -> std::io::Result<()> {
        if let Some(parent) = self.path.parent() {
            fs::create_dir_all(parent)?;
        }
        let tmp = self.path.with_extension("json.tmp");
        {
            let mut file = fs::File::create(&tmp)?;
            file.write_all(content.as_bytes())?;
            file.sync_all()?;
        }
        restrict_permissions(&tmp)?;
        fs::rename(&tmp, &self.path)
    }
}

#[cfg(unix)]
fn restrict_permissions(path: &Path) -> std::io::Result<()> {
    use std::os::unix::fs::PermissionsExt;
    fs::set_permissions(path, fs::Permissions::from_mode(0o600))
}

#[cfg(not(unix))]
fn restrict_permissions(_path: &Path) -> std::io::Result<()> {
    Ok(())
}

impl CredentialStore for FileCredentialStore {
    fn save(&self, session: &Session) -> Result<(), AuthError> {
        let _io = self.io.lock().unwrap_or_else(PoisonError::into_inner);
        let now = Utc::now();
        let record = StoredRecord {
            saved_at: now,
            expires_at: now + self.lifetime,
            session: session.clone(),
        };
        let content =
            serde_json::to_string_pretty(&record).map_err(|e| AuthError::Storage(e.to_string()))?;
        self.write_atomic(&content)
            .map_err(|e| AuthError::Storage(format!("{}: {}", self.path.display(), e)))
    }

    fn load(&self) -> Option<Session> {
        let _io = self.io.lock().unwrap_or_else(PoisonError::into_inner);
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(e) if e.kind() == ErrorKind::NotFound => return None,
            Err(e) => {
                warn!("Ignoring unreadable credentials {}: {}", self.path.display(), e);
                return None;
            }
        };

        let record: StoredRecord = match serde_json::from_str(&content) {
            Ok(record) => record,
            Err(e) => {
                warn!("Ignoring corrupt credentials {}: {}", self.path.display(), e);
                return None;
            }
        };

        if record.expires_at <= Utc::now() {
            debug!("Stored credentials past their expiry hint");
            return None;
        }
        Some(record.session)
    }

    fn clear(&self) -> Result<(), AuthError> {
        let _io = self.io.lock().unwrap_or_else(PoisonError::into_inner);
        match fs::remove_file(&self.path) {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == ErrorKind::NotFound => Ok(()),
            Err(e) => Err(AuthError::Storage(format!("{}: {}", self.path.display(), e))),
        }
    }
}

/// Process-local store; the session does not survive a restart
#[derive(Default)]
pub struct MemoryCredentialStore {
    slot: Mutex<Option<String>>,
}

impl MemoryCredentialStore {
    pub fn new() -> Self {
        Self::default()
    }
}

impl CredentialStore for MemoryCredentialStore {
    fn save(&self, session: &Session) -> Result<(), AuthError> {
        let encoded =
            serde_json::to_string(session).map_err(|e| AuthError::Storage(e.to_string()))?;
        *self.slot.lock().unwrap_or_else(PoisonError::into_inner) = Some(encoded);
        Ok(())
    }

    fn load(&self) -> Option<Session> {
        let slot = self.slot.lock().unwrap_or_else(PoisonError::into_inner);
        slot.as_deref()
            .and_then(|encoded| serde_json::from_str(encoded).ok())
    }

    fn clear(&self) -> Result<(), AuthError> {
        *self.slot.lock().unwrap_or_else(PoisonError::into_inner) = None;
        Ok(())
    }
}
