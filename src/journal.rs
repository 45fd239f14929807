use anyhow::Result;
use chrono::{DateTime, Utc};
use log::warn;
use serde::Serialize;
use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::{Mutex, PoisonError};

/// Append-only JSONL record of session transitions. Never holds tokens.
pub struct Journal {
    path: Option<PathBuf>,
    run_id: String,
    file: Mutex<Option<File>>,
}

#[derive(Serialize)]
struct Event<'a> {
    ts: DateTime<Utc>,
    run_id: &'a str,
    #[serde(rename = "type")]
    event_type: &'a str,
    #[serde(flatten)]
    data: serde_json::Value,
}

impl Journal {
    pub fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let file = OpenOptions::new().create(true).append(true).open(path)?;

        Ok(Self {
            path: Some(path.to_path_buf()),
            run_id: uuid::Uuid::new_v4().to_string(),
            file: Mutex::new(Some(file)),
        })
    }

    /// A journal that drops every event
    pub fn disabled() -> Self {
        Self {
            path: None,
            run_id: uuid::Uuid::new_v4().to_string(),
            file: Mutex::new(None),
        }
    }

    pub fn path(&self) -> Option<&Path> {
        self.path.as_deref()
    }

    pub fn run_id(&self) -> &str {
        &self.run_id
    }

    /// Journal failures are logged, never surfaced to the session logic
    pub fn log(&self, event_type: &str, data: serde_json::Value) {
        let mut file = self.file.lock().unwrap_or_else(PoisonError::into_inner);
        let Some(file) = file.as_mut() else {
            return;
        };
        let event = Event {
            ts: Utc::now(),
            run_id: &self.run_id,
            event_type,
            data,
        };
        let written = serde_json::to_string(&event)
            .map_err(std::io::Error::from)
            .and_then(|line| {
                writeln!(file, "{}", line)?;
                file.flush()
            });
        if let Err(e) = written {
            warn!("Failed to write session journal: {}", e);
        }
    }

    pub fn login(&self, user_id: &str) {
        self.log("login", serde_json::json!({ "user_id": user_id }))
    }

    pub fn refresh_ok(&self, user_id: &str) {
        self.log("refresh_ok", serde_json::json!({ "user_id": user_id }))
    }

    pub fn refresh_failed(&self, reason: &str) {
        self.log("refresh_failed", serde_json::json!({ "reason": reason }))
    }

    pub fn refresh_discarded(&self) {
        self.log("refresh_discarded", serde_json::json!({}))
    }

    /// `remote_ok` is whether the backend acknowledged the logout
    pub fn logout(&self, remote_ok: bool) {
        self.log("logout", serde_json::json!({ "remote_ok": remote_ok }))
    }

    pub fn forced_logout(&self, reason: &str) {
        self.log("forced_logout", serde_json::json!({ "reason": reason }))
    }

    pub fn guard_denied(&self, guard: &str, path: &str) {
        self.log(
            "guard_denied",
            serde_json::json!({ "guard": guard, "path": path }),
        )
    }
}
