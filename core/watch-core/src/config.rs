//! Environment-sourced configuration.
//!
//! Read once at startup into an immutable [`WatchConfig`]. Everything mutable
//! (sessions, dedup state) lives in [`crate::scheduler::WatchState`] instead.

use std::path::PathBuf;
use std::time::Duration;

use tracing::warn;

use crate::error::{Result, WatchError};
use crate::list_uri::ListUri;
use crate::storage::StorageConfig;
use crate::types::MonitorAccount;

pub const DEFAULT_SERVICE_URL: &str = "https://bsky.social";
pub const DEFAULT_SERVICE_DID: &str = "did:plc:ea2eqamjmtuo6f4rvhl3g6ne";
pub const DEFAULT_SERVICE_HANDLE_HINT: &str = "listifications";
pub const DEFAULT_POLL_INTERVAL_SECS: u64 = 30;
pub const MIN_POLL_INTERVAL_SECS: u64 = 5;
pub const DEFAULT_BACKFILL_HOURS: u32 = 24;
pub const DEFAULT_HEALTH_PORT: u16 = 3000;
pub const DEFAULT_SESSION_TTL_MINUTES: i64 = 120;
pub const DEFAULT_HTTP_TIMEOUT_SECS: u64 = 30;

/// Identity of the third-party bot that sends moderation notices.
///
/// The DID is authoritative; the handle hint is a softer fallback used only
/// when no member carries the DID.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceIdentity {
    pub did: String,
    pub handle_hint: String,
}

impl ServiceIdentity {
    pub fn matches(&self, did: &str, handle: Option<&str>) -> bool {
        if did == self.did {
            return true;
        }
        let hint = self.handle_hint.trim().to_ascii_lowercase();
        !hint.is_empty()
            && handle
                .map(|value| value.to_ascii_lowercase().contains(&hint))
                .unwrap_or(false)
    }
}

impl Default for ServiceIdentity {
    fn default() -> Self {
        Self {
            did: DEFAULT_SERVICE_DID.to_string(),
            handle_hint: DEFAULT_SERVICE_HANDLE_HINT.to_string(),
        }
    }
}

#[derive(Debug, Clone)]
pub struct WatchConfig {
    pub accounts: Vec<MonitorAccount>,
    pub list: ListUri,
    pub list_owner: MonitorAccount,
    pub monitor_list_owner: bool,
    pub poll_interval: Duration,
    pub dry_run: bool,
    pub backfill_hours: u32,
    pub health_port: u16,
    pub service_url: String,
    pub service: ServiceIdentity,
    pub storage: StorageConfig,
    pub session_ttl: chrono::Duration,
    pub http_timeout: Duration,
    pub dedup_max_entries: Option<usize>,
}

impl WatchConfig {
    pub fn from_env() -> Result<Self> {
        Self::from_lookup(|key| std::env::var(key).ok())
    }

    /// Builds the config from an arbitrary variable source. Tests pass a map.
    pub fn from_lookup<F>(lookup: F) -> Result<Self>
    where
        F: Fn(&str) -> Option<String>,
    {
        let read = |key: &str| {
            lookup(key)
                .map(|raw| raw.trim().to_string())
                .filter(|value| !value.is_empty())
        };

        let list_raw = read("BLOCKERS_LIST_URI")
            .ok_or_else(|| WatchError::config("BLOCKERS_LIST_URI", "is required"))?;
        let list = ListUri::parse(&list_raw)?;
        if !list.has_did_authority() {
            warn!(
                authority = %list.authority(),
                "List address names a handle; list items will reference it as-is"
            );
        }

        let owner_handle = read("LIST_ACCOUNT_HANDLE")
            .ok_or_else(|| WatchError::config("LIST_ACCOUNT_HANDLE", "is required"))?;
        let owner_password = read("LIST_ACCOUNT_PASSWORD")
            .ok_or_else(|| WatchError::config("LIST_ACCOUNT_PASSWORD", "is required"))?;
        let list_owner = MonitorAccount::new(strip_at(&owner_handle), owner_password);

        let accounts = parse_monitor_accounts(&read("MONITOR_ACCOUNTS").unwrap_or_default());
        let monitor_list_owner = parse_flag(read("MONITOR_LIST_ACCOUNT").as_deref());
        if accounts.is_empty() && !monitor_list_owner {
            return Err(WatchError::config(
                "MONITOR_ACCOUNTS",
                "no handle:password pairs configured",
            ));
        }

        let poll_interval_secs = parse_number(&read, "POLL_INTERVAL_SECONDS")?
            .unwrap_or(DEFAULT_POLL_INTERVAL_SECS)
            .max(MIN_POLL_INTERVAL_SECS);
        let backfill_hours =
            parse_number(&read, "BACKFILL_HOURS")?.unwrap_or(DEFAULT_BACKFILL_HOURS);
        let health_port = parse_number(&read, "PORT")?.unwrap_or(DEFAULT_HEALTH_PORT);
        let session_ttl_minutes = parse_number::<i64, _>(&read, "BLOCKWATCH_SESSION_TTL_MINUTES")?
            .filter(|minutes| *minutes > 0)
            .unwrap_or(DEFAULT_SESSION_TTL_MINUTES);
        let http_timeout_secs = parse_number(&read, "BLOCKWATCH_HTTP_TIMEOUT_SECS")?
            .filter(|secs| *secs > 0)
            .unwrap_or(DEFAULT_HTTP_TIMEOUT_SECS);
        let dedup_max_entries = parse_number::<usize, _>(&read, "BLOCKWATCH_DEDUP_MAX_ENTRIES")?
            .filter(|max| *max > 0);

        let storage = read("BLOCKWATCH_DATA_DIR")
            .map(|dir| StorageConfig::with_root(PathBuf::from(dir)))
            .unwrap_or_default();

        Ok(Self {
            accounts,
            list,
            list_owner,
            monitor_list_owner,
            poll_interval: Duration::from_secs(poll_interval_secs),
            dry_run: parse_flag(read("DRY_RUN").as_deref()),
            backfill_hours,
            health_port,
            service_url: read("BLOCKWATCH_SERVICE_URL")
                .unwrap_or_else(|| DEFAULT_SERVICE_URL.to_string()),
            service: ServiceIdentity {
                did: read("BLOCKWATCH_SERVICE_DID")
                    .unwrap_or_else(|| DEFAULT_SERVICE_DID.to_string()),
                handle_hint: read("BLOCKWATCH_SERVICE_HANDLE_HINT")
                    .unwrap_or_else(|| DEFAULT_SERVICE_HANDLE_HINT.to_string()),
            },
            storage,
            session_ttl: chrono::Duration::minutes(session_ttl_minutes),
            http_timeout: Duration::from_secs(http_timeout_secs),
            dedup_max_entries,
        })
    }

    /// Accounts to poll: the configured monitors, plus the list owner when enabled.
    /// Handles are compared case-insensitively; the first occurrence wins.
    pub fn monitored_accounts(&self) -> Vec<MonitorAccount> {
        let mut accounts: Vec<MonitorAccount> = Vec::new();
        let extra = self
            .monitor_list_owner
            .then(|| self.list_owner.clone())
            .into_iter();
        for account in self.accounts.iter().cloned().chain(extra) {
            if accounts
                .iter()
                .any(|existing| existing.handle.eq_ignore_ascii_case(&account.handle))
            {
                continue;
            }
            accounts.push(account);
        }
        accounts
    }
}

/// Parses `handle:password,handle:password`. Entries without a colon are skipped.
/// Only the first colon separates, so passwords may contain colons.
pub fn parse_monitor_accounts(raw: &str) -> Vec<MonitorAccount> {
    raw.split(',')
        .filter_map(|entry| {
            let entry = entry.trim();
            if entry.is_empty() {
                return None;
            }
            let Some((handle, password)) = entry.split_once(':') else {
                warn!("Skipping MONITOR_ACCOUNTS entry without a handle:password separator");
                return None;
            };
            let handle = strip_at(handle.trim());
            let password = password.trim();
            if handle.is_empty() || password.is_empty() {
                warn!("Skipping MONITOR_ACCOUNTS entry with an empty handle or password");
                return None;
            }
            Some(MonitorAccount::new(handle, password))
        })
        .collect()
}

#[must_use]
pub fn parse_flag(raw: Option<&str>) -> bool {
    matches!(
        raw.map(|value| value.trim().to_ascii_lowercase()).as_deref(),
        Some("1" | "true" | "yes" | "on")
    )
}

fn parse_number<T, R>(read: &R, key: &str) -> Result<Option<T>>
where
    T: std::str::FromStr,
    T::Err: std::fmt::Display,
    R: Fn(&str) -> Option<String>,
{
    read(key)
        .map(|raw| {
            raw.parse::<T>()
                .map_err(|err| WatchError::config(key, format!("{raw:?}: {err}")))
        })
        .transpose()
}

fn strip_at(handle: &str) -> String {
    handle.trim_start_matches('@').to_string()
}
