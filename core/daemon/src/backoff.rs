//! Crash-loop protection: a supervisor restarting us in a tight loop would
//! otherwise hit the login endpoint on every start.

use blockwatch_core::session_store::write_atomic;
use blockwatch_core::WatchError;
use chrono::{DateTime, Utc};
use fs_err as fs;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::warn;

const WINDOW_SECS: i64 = 120;
const MAX_STARTS: usize = 3;
const BACKOFF_STEP_SECS: u64 = 10;
const BACKOFF_MAX_SECS: u64 = 60;

#[derive(Debug, Default, Serialize, Deserialize)]
struct StartHistory {
    starts: Vec<DateTime<Utc>>,
}

/// Records this start in `path` and returns how long to wait before continuing.
pub fn record_start(path: &Path, now: DateTime<Utc>) -> Option<Duration> {
    let mut history = load(path);
    let delay = next_delay(now, &mut history);

    if let Err(err) = save(path, &history) {
        warn!(error = %err, path = %path.display(), "Failed to persist startup history");
    }

    if let Some(delay) = delay {
        warn!(
            recent_starts = history.starts.len(),
            delay_secs = delay.as_secs(),
            "Restarting too often; delaying startup"
        );
    }
    delay
}

fn next_delay(now: DateTime<Utc>, history: &mut StartHistory) -> Option<Duration> {
    history
        .starts
        .retain(|start| now.signed_duration_since(*start).num_seconds() <= WINDOW_SECS);
    history.starts.push(now);

    let extra = history.starts.len().checked_sub(MAX_STARTS).filter(|n| *n > 0)? as u64;
    let secs = BACKOFF_STEP_SECS
        .saturating_mul(extra)
        .min(BACKOFF_MAX_SECS);
    Some(Duration::from_secs(secs))
}

fn load(path: &Path) -> StartHistory {
    let data = match fs::read(path) {
        Ok(data) => data,
        Err(err) => {
            if err.kind() != std::io::ErrorKind::NotFound {
                warn!(error = %err, "Failed to read startup history");
            }
            return StartHistory::default();
        }
    };
    serde_json::from_slice(&data).unwrap_or_else(|err| {
        warn!(error = %err, "Ignoring unreadable startup history");
        StartHistory::default()
    })
}

fn save(path: &Path, history: &StartHistory) -> blockwatch_core::Result<()> {
    let payload = serde_json::to_vec_pretty(history).map_err(|source| WatchError::Json {
        context: "serialize startup history".to_string(),
        source,
    })?;
    write_atomic(path, &payload)
}
