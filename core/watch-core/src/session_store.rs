//! File-backed session cache.
//!
//! Sessions are stored in `sessions.json` as a map from account handle to
//! session. The whole map is rewritten on every save.
//!
//! # Defensive Design
//!
//! A missing, empty, or corrupt file loads as an empty cache; callers fall
//! back to fresh logins. Writes go through a temp file + rename so a crash
//! mid-write never leaves a truncated cache behind.

use std::collections::BTreeMap;
use std::io::Write;
use std::path::{Path, PathBuf};

use fs_err as fs;
use tempfile::NamedTempFile;
use tracing::warn;

use crate::error::{Result, WatchError};
use crate::types::Session;

pub type SessionMap = BTreeMap<String, Session>;

#[derive(Debug, Clone)]
pub struct SessionStore {
    path: PathBuf,
}

impl SessionStore {
    pub fn new(path: &Path) -> Self {
        Self {
            path: path.to_path_buf(),
        }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Loads cached sessions. Unreadable state is treated as "no cached sessions".
    pub fn load(&self) -> SessionMap {
        let content = match fs::read_to_string(&self.path) {
            Ok(content) => content,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return SessionMap::new(),
            Err(err) => {
                warn!(error = %err, "Failed to read session cache; starting without cached sessions");
                return SessionMap::new();
            }
        };

        if content.trim().is_empty() {
            return SessionMap::new();
        }

        match serde_json::from_str::<SessionMap>(&content) {
            Ok(sessions) => sessions,
            Err(err) => {
                warn!(
                    error = %err,
                    path = %self.path.display(),
                    "Failed to parse session cache; starting without cached sessions"
                );
                SessionMap::new()
            }
        }
    }

    /// Persists the full set of sessions, replacing prior content.
    pub fn save(&self, sessions: &SessionMap) -> Result<()> {
        let content = serde_json::to_string_pretty(sessions).map_err(|source| WatchError::Json {
            context: "serialize session cache".to_string(),
            source,
        })?;
        write_atomic(&self.path, content.as_bytes())
    }
}

/// Writes `bytes` to `path` via a sibling temp file and rename.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let persistence = |details: String| WatchError::Persistence {
        path: path.to_path_buf(),
        details,
    };

    let parent_dir = path
        .parent()
        .filter(|parent| !parent.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    fs::create_dir_all(parent_dir).map_err(|err| persistence(err.to_string()))?;

    let mut temp_file =
        NamedTempFile::new_in(parent_dir).map_err(|err| persistence(format!("temp file: {err}")))?;
    temp_file
        .write_all(bytes)
        .map_err(|err| persistence(format!("write temp file: {err}")))?;
    temp_file
        .flush()
        .map_err(|err| persistence(format!("flush temp file: {err}")))?;
    temp_file
        .persist(path)
        .map_err(|err| persistence(format!("commit: {}", err.error)))?;
    Ok(())
}
