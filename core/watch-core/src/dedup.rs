//! Processed-message tracking, persisted across restarts.
//!
//! Membership means "will not be reprocessed", not "was acted on": an identity
//! is persisted before its event runs, so a crash in between drops that event.
//!
//! The file is a flat JSON array of identities in insertion order. With no cap
//! configured the set grows for the life of the data directory; with a cap the
//! oldest identities are forgotten first.

use std::collections::{HashSet, VecDeque};
use std::path::{Path, PathBuf};

use fs_err as fs;
use tracing::warn;

use crate::error::{Result, WatchError};
use crate::session_store::write_atomic;

#[derive(Debug, Default)]
pub struct Deduplicator {
    seen: HashSet<String>,
    order: VecDeque<String>,
    path: Option<PathBuf>,
    max_entries: Option<usize>,
}

impl Deduplicator {
    pub fn new_in_memory() -> Self {
        Self::default()
    }

    /// Loads previously processed identities. Unreadable state starts empty.
    pub fn load(path: &Path, max_entries: Option<usize>) -> Self {
        let mut dedup = Self {
            path: Some(path.to_path_buf()),
            max_entries,
            ..Self::default()
        };

        for identity in read_identities(path) {
            if dedup.seen.insert(identity.clone()) {
                dedup.order.push_back(identity);
            }
        }
        dedup.evict_overflow();
        dedup
    }

    /// Keeps reading the loaded identities but never writes them back.
    /// Dry runs use this so a preview does not consume events a live run needs.
    pub fn detached(mut self) -> Self {
        self.path = None;
        self
    }

    pub fn seen(&self, identity: &str) -> bool {
        self.seen.contains(identity)
    }

    /// Records `identity` and persists the set.
    ///
    /// Returns `Ok(false)` when the identity was already present. A persistence
    /// error leaves the in-memory set updated; callers log it and carry on.
    pub fn mark_seen(&mut self, identity: &str) -> Result<bool> {
        if !self.seen.insert(identity.to_string()) {
            return Ok(false);
        }
        self.order.push_back(identity.to_string());
        self.evict_overflow();
        self.persist()?;
        Ok(true)
    }

    /// Drops `identity` so the next pass processes it again.
    pub fn forget(&mut self, identity: &str) -> Result<bool> {
        if !self.seen.remove(identity) {
            return Ok(false);
        }
        self.order.retain(|existing| existing != identity);
        self.persist()?;
        Ok(true)
    }

    pub fn len(&self) -> usize {
        self.order.len()
    }

    pub fn is_empty(&self) -> bool {
        self.order.is_empty()
    }

    fn evict_overflow(&mut self) {
        let Some(max) = self.max_entries else {
            return;
        };
        while self.order.len() > max {
            if let Some(oldest) = self.order.pop_front() {
                self.seen.remove(&oldest);
            }
        }
    }

    fn persist(&self) -> Result<()> {
        let Some(path) = self.path.as_ref() else {
            return Ok(());
        };
        let content = serde_json::to_vec(&self.order).map_err(|source| WatchError::Json {
            context: "serialize processed messages".to_string(),
            source,
        })?;
        write_atomic(path, &content)
    }
}

fn read_identities(path: &Path) -> Vec<String> {
    let data = match fs::read(path) {
        Ok(data) => data,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Vec::new(),
        Err(err) => {
            warn!(error = %err, "Failed to read processed messages; starting empty");
            return Vec::new();
        }
    };
    if data.iter().all(u8::is_ascii_whitespace) {
        return Vec::new();
    }
    serde_json::from_slice(&data).unwrap_or_else(|err| {
        warn!(
            error = %err,
            path = %path.display(),
            "Failed to parse processed messages; starting empty"
        );
        Vec::new()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mark_seen_persists_before_returning() {
        let temp_dir = tempfile::tempdir().expect("temp dir");
        let path = temp_dir.path().join("processed-messages.json");
        let mut dedup = Deduplicator::load(&path, None);

        assert!(!dedup.seen("m1"));
        assert!(dedup.mark_seen("m1").expect("mark"));
        assert!(dedup.seen("m1"));

        let raw = std::fs::read_to_string(&path).expect("read");
        assert_eq!(raw, r#"["m1"]"#);
    }

    #[test]
    fn repeated_identity_is_not_new() {
        let mut dedup = Deduplicator::new_in_memory();
        assert!(dedup.mark_seen("m1").expect("first"));
        assert!(!dedup.mark_seen("m1").expect("second"));
        assert_eq!(dedup.len(), 1);
    }

    #[test]
    fn identities_survive_restart() {
        let temp_dir = tempfile::tempdir().expect("temp dir");
        let path = temp_dir.path().join("processed-messages.json");
        {
            let mut dedup = Deduplicator::load(&path, None);
            dedup.mark_seen("m1").expect("mark");
            dedup.mark_seen("2025-01-01T00:00:00Z").expect("mark");
        }
        let dedup = Deduplicator::load(&path, None);
        assert!(dedup.seen("m1"));
        assert!(dedup.seen("2025-01-01T00:00:00Z"));
        assert!(!dedup.seen("m2"));
    }

    #[test]
    fn cap_evicts_oldest_first() {
        let mut dedup = Deduplicator::new_in_memory();
        dedup.max_entries = Some(2);
        dedup.mark_seen("a").expect("a");
        dedup.mark_seen("b").expect("b");
        dedup.mark_seen("c").expect("c");
        assert!(!dedup.seen("a"));
        assert!(dedup.seen("b"));
        assert!(dedup.seen("c"));
        assert_eq!(dedup.len(), 2);
    }

    #[test]
    fn load_applies_cap_to_existing_file() {
        let temp_dir = tempfile::tempdir().expect("temp dir");
        let path = temp_dir.path().join("processed-messages.json");
        std::fs::write(&path, r#"["a","b","c","b"]"#).expect("write");
        let dedup = Deduplicator::load(&path, Some(2));
        assert_eq!(dedup.len(), 2);
        assert!(!dedup.seen("a"));
        assert!(dedup.seen("c"));
    }

    #[test]
    fn corrupt_file_starts_empty() {
        let temp_dir = tempfile::tempdir().expect("temp dir");
        let path = temp_dir.path().join("processed-messages.json");
        std::fs::write(&path, "{\"not\": \"an array\"}").expect("write");
        assert!(Deduplicator::load(&path, None).is_empty());
    }

    #[test]
    fn forget_removes_identity_from_memory_and_file() {
        let temp_dir = tempfile::tempdir().expect("temp dir");
        let path = temp_dir.path().join("processed-messages.json");
        let mut dedup = Deduplicator::load(&path, None);
        dedup.mark_seen("m1").expect("m1");
        dedup.mark_seen("m2").expect("m2");

        assert!(dedup.forget("m1").expect("forget"));
        assert!(!dedup.forget("m1").expect("forget again"));
        assert!(!dedup.seen("m1"));
        assert_eq!(std::fs::read_to_string(&path).expect("read"), r#"["m2"]"#);
    }

    #[test]
    fn detached_set_reads_file_but_never_writes_it() {
        let temp_dir = tempfile::tempdir().expect("temp dir");
        let path = temp_dir.path().join("processed-messages.json");
        std::fs::write(&path, r#"["old"]"#).expect("write");

        let mut dedup = Deduplicator::load(&path, None).detached();
        assert!(dedup.seen("old"));
        dedup.mark_seen("new").expect("mark");
        assert!(dedup.seen("new"));
        assert_eq!(std::fs::read_to_string(&path).expect("read"), r#"["old"]"#);
    }

    #[test]
    fn persistence_failure_keeps_in_memory_state() {
        let temp_dir = tempfile::tempdir().expect("temp dir");
        let blocker = temp_dir.path().join("blocker");
        std::fs::write(&blocker, "x").expect("write");
        let mut dedup = Deduplicator::load(&blocker.join("processed.json"), None);

        let err = dedup.mark_seen("m1").expect_err("should fail");
        assert!(matches!(err, WatchError::Persistence { .. }));
        assert!(dedup.seen("m1"));
    }
}
