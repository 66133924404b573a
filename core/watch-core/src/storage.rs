//! Storage configuration and path management for blockwatch.
//!
//! Production code uses `StorageConfig::default()` which points to `~/.blockwatch/`.
//! Tests use `StorageConfig::with_root(temp_dir)` for isolation.

use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
pub struct StorageConfig {
    root: PathBuf,
}

impl Default for StorageConfig {
    fn default() -> Self {
        let root = dirs::home_dir()
            .map(|home| home.join(".blockwatch"))
            .unwrap_or_else(|| PathBuf::from(".blockwatch"));
        Self { root }
    }
}

impl StorageConfig {
    pub fn with_root(root: PathBuf) -> Self {
        Self { root }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Path to sessions.json (cached sessions keyed by account handle).
    pub fn sessions_file(&self) -> PathBuf {
        self.root.join("sessions.json")
    }

    /// Path to processed-messages.json (dedup identities).
    pub fn processed_messages_file(&self) -> PathBuf {
        self.root.join("processed-messages.json")
    }

    /// Path to daemon-backoff.json (recent daemon start times).
    pub fn backoff_file(&self) -> PathBuf {
        self.root.join("daemon-backoff.json")
    }
}
