//! Startup, backfill, and the recurring poll loop.
//!
//! [`Watcher`] holds the collaborators and the immutable [`WatchConfig`];
//! [`WatchState`] holds everything that changes while running. Ticks run
//! strictly one after another, and accounts within a tick are polled
//! sequentially. A failure on one account never aborts the rest.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use blockwatch_xrpc_protocol::MAX_PAGE_LIMIT;
use tracing::{debug, info, warn};

use crate::auth::{AuthPath, Authenticator};
use crate::client::AtprotoApi;
use crate::clock::Clock;
use crate::config::WatchConfig;
use crate::dedup::Deduplicator;
use crate::error::{Result, WatchError};
use crate::list_sync::ListSynchronizer;
use crate::pipeline::{EventPipeline, Pass, PassReport};
use crate::resolver::HandleResolver;
use crate::session_store::{SessionMap, SessionStore};
use crate::source::{FetchOutcome, NotificationSource};
use crate::types::{MonitorAccount, Session};

pub const POLL_FETCH_LIMIT: u32 = 20;
pub const BACKFILL_FETCH_LIMIT: u32 = MAX_PAGE_LIMIT;

const STOP_CHECK_INTERVAL: Duration = Duration::from_millis(250);

/// Mutable runtime state threaded through every pass.
#[derive(Debug)]
pub struct WatchState {
    sessions: SessionMap,
    accounts: Vec<MonitorAccount>,
    owner: MonitorAccount,
    dedup: Deduplicator,
}

impl WatchState {
    /// Accounts that authenticated at startup.
    pub fn accounts(&self) -> &[MonitorAccount] {
        &self.accounts
    }

    pub fn owner(&self) -> &MonitorAccount {
        &self.owner
    }

    pub fn session(&self, handle: &str) -> Option<&Session> {
        self.sessions.get(handle)
    }

    pub fn dedup(&self) -> &Deduplicator {
        &self.dedup
    }
}

/// What happened to one account during a pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccountStatus {
    Polled,
    /// Both channels failed.
    Unavailable,
    /// No usable session could be obtained.
    Skipped,
}

#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct TickReport {
    pub accounts: Vec<(String, AccountStatus)>,
    pub pass: PassReport,
}

impl TickReport {
    pub fn count(&self, status: AccountStatus) -> usize {
        self.accounts.iter().filter(|(_, s)| *s == status).count()
    }
}

pub struct Watcher {
    config: WatchConfig,
    clock: Arc<dyn Clock>,
    auth: Authenticator,
    source: NotificationSource,
    pipeline: EventPipeline,
}

impl Watcher {
    pub fn from_config(config: WatchConfig, api: Arc<dyn AtprotoApi>, clock: Arc<dyn Clock>) -> Self {
        let store = SessionStore::new(&config.storage.sessions_file());
        let auth = Authenticator::new(api.clone(), clock.clone(), store, config.session_ttl);
        let source = NotificationSource::new(api.clone(), config.service.clone());
        let pipeline = EventPipeline::new(
            HandleResolver::new(api.clone()),
            ListSynchronizer::new(api, clock.clone(), config.list.clone(), config.dry_run),
        );
        Self {
            config,
            clock,
            auth,
            source,
            pipeline,
        }
    }

    pub fn config(&self) -> &WatchConfig {
        &self.config
    }

    /// Authenticates every monitored account and the list owner.
    ///
    /// Monitored accounts that fail are excluded for the rest of the run. A
    /// list owner that cannot authenticate is fatal.
    pub fn start(&self) -> Result<WatchState> {
        let mut sessions = self.auth.load_cache();
        let monitored = self.config.monitored_accounts();
        let summary = self.auth.authenticate_all(&monitored, &mut sessions);

        if !summary.failed.is_empty() {
            let handles: Vec<&str> = summary.failed.iter().map(|(h, _)| h.as_str()).collect();
            warn!(
                failed = summary.failed.len(),
                handles = %handles.join(", "),
                "Some monitored accounts failed to authenticate and will not be polled"
            );
        }

        let owner = self.config.list_owner.clone();
        let owner_ready = summary
            .authenticated
            .iter()
            .any(|(account, _)| account.handle == owner.handle);
        if !owner_ready {
            let outcome = self.auth.authenticate(&owner, &mut sessions)?;
            info!(handle = %owner.handle, path = ?outcome.path, "List owner authenticated");
        }

        let accounts: Vec<MonitorAccount> = summary
            .authenticated
            .into_iter()
            .map(|(account, _)| account)
            .collect();
        if accounts.is_empty() {
            warn!("No monitored accounts authenticated; nothing will be polled");
        }

        let dedup = Deduplicator::load(
            &self.config.storage.processed_messages_file(),
            self.config.dedup_max_entries,
        );
        let dedup = if self.config.dry_run {
            dedup.detached()
        } else {
            dedup
        };
        info!(
            accounts = accounts.len(),
            seen = dedup.len(),
            dry_run = self.config.dry_run,
            list = %self.config.list,
            "Watcher started"
        );

        Ok(WatchState {
            sessions,
            accounts,
            owner,
            dedup,
        })
    }

    /// One sweep over recent history. Disabled when the window is zero hours.
    pub fn backfill(&self, state: &mut WatchState) -> Option<TickReport> {
        if self.config.backfill_hours == 0 {
            info!("Backfill disabled");
            return None;
        }
        let cutoff = self.clock.now() - chrono::Duration::hours(i64::from(self.config.backfill_hours));
        info!(hours = self.config.backfill_hours, cutoff = %cutoff, "Starting backfill");
        let report = self.pass(state, Pass::Backfill { cutoff }, BACKFILL_FETCH_LIMIT);
        log_report("Backfill complete", &report);
        Some(report)
    }

    /// One steady-state poll across every active account.
    pub fn tick(&self, state: &mut WatchState) -> TickReport {
        let report = self.pass(state, Pass::Poll, POLL_FETCH_LIMIT);
        if report.pass.detected > 0 || report.count(AccountStatus::Polled) < report.accounts.len() {
            log_report("Poll complete", &report);
        } else {
            debug!(fetched = report.pass.fetched, "Poll complete; nothing new");
        }
        report
    }

    /// Ticks until `stop` is set. The next tick starts one interval after the
    /// previous one started, or immediately if it overran.
    pub fn run(&self, state: &mut WatchState, stop: &AtomicBool) {
        info!(
            interval_secs = self.config.poll_interval.as_secs(),
            "Polling loop started"
        );
        while !stop.load(Ordering::Relaxed) {
            let started = Instant::now();
            self.tick(state);
            let deadline = started + self.config.poll_interval;
            while !stop.load(Ordering::Relaxed) {
                let now = Instant::now();
                if now >= deadline {
                    break;
                }
                std::thread::sleep((deadline - now).min(STOP_CHECK_INTERVAL));
            }
        }
        info!("Polling loop stopped");
    }

    fn pass(&self, state: &mut WatchState, pass: Pass, limit: u32) -> TickReport {
        let mut report = TickReport::default();

        let owner_handle = state.owner.handle.clone();
        let owner = match self.fresh_session(state, &owner_handle) {
            Ok(session) => session,
            Err(err) => {
                warn!(
                    handle = %owner_handle,
                    error = %err,
                    "List owner has no usable session; skipping pass"
                );
                report.accounts = state
                    .accounts
                    .iter()
                    .map(|account| (account.handle.clone(), AccountStatus::Skipped))
                    .collect();
                return report;
            }
        };

        let accounts = state.accounts.clone();
        for account in &accounts {
            if report.pass.owner_auth_expired {
                report
                    .accounts
                    .push((account.handle.clone(), AccountStatus::Skipped));
                continue;
            }
            let status = self.poll_account(state, account, &owner, pass, limit, &mut report.pass);
            report.accounts.push((account.handle.clone(), status));
        }

        if report.pass.owner_auth_expired {
            self.auth.invalidate(&owner_handle, &mut state.sessions);
        }
        report
    }

    fn poll_account(
        &self,
        state: &mut WatchState,
        account: &MonitorAccount,
        owner: &Session,
        pass: Pass,
        limit: u32,
        totals: &mut PassReport,
    ) -> AccountStatus {
        let session = match self.fresh_session(state, &account.handle) {
            Ok(session) => session,
            Err(err) => {
                warn!(handle = %account.handle, error = %err, "Skipping account this tick");
                return AccountStatus::Skipped;
            }
        };

        let outcome = self.source.fetch(&session, limit);
        match &outcome {
            FetchOutcome::Delivered { channel, messages } => {
                debug!(
                    handle = %account.handle,
                    channel = %channel,
                    count = messages.len(),
                    "Fetched candidate messages"
                );
                let report =
                    self.pipeline
                        .process(&account.handle, messages, pass, &mut state.dedup, owner);
                totals.merge(&report);
                AccountStatus::Polled
            }
            FetchOutcome::Unavailable {
                direct_messages,
                mentions,
            } => {
                warn!(
                    handle = %account.handle,
                    direct_messages = %direct_messages.reason,
                    mentions = %mentions.reason,
                    "Both notification channels failed"
                );
                if outcome.auth_expired() {
                    self.auth.invalidate(&account.handle, &mut state.sessions);
                }
                AccountStatus::Unavailable
            }
        }
    }

    /// The cached session for `handle`, renewed first when past its expiry estimate.
    fn fresh_session(&self, state: &mut WatchState, handle: &str) -> Result<Session> {
        let now = self.clock.now();
        if let Some(session) = state.sessions.get(handle) {
            if session.is_usable_at(now) {
                return Ok(session.clone());
            }
        }

        let account = if state.owner.handle == handle {
            state.owner.clone()
        } else {
            state
                .accounts
                .iter()
                .find(|account| account.handle == handle)
                .cloned()
                .ok_or_else(|| WatchError::NoSession(handle.to_string()))?
        };

        let outcome = self.auth.renew(&account, &mut state.sessions)?;
        match outcome.path {
            AuthPath::Refreshed => info!(handle = %handle, "Session refreshed"),
            _ => info!(handle = %handle, path = ?outcome.path, "Session renewed"),
        }
        Ok(outcome.session)
    }
}

fn log_report(message: &str, report: &TickReport) {
    let pass = &report.pass;
    info!(
        accounts = report.accounts.len(),
        unavailable = report.count(AccountStatus::Unavailable),
        skipped = report.count(AccountStatus::Skipped),
        fetched = pass.fetched,
        seen = pass.skipped_seen,
        undated = pass.undated,
        out_of_window = pass.out_of_window,
        detected = pass.detected,
        added = pass.added,
        already_member = pass.already_member,
        would_add = pass.would_add,
        failed = pass.failed,
        deferred = pass.deferred,
        "{message}"
    );
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::config::ServiceIdentity;
    use crate::list_uri::ListUri;
    use crate::storage::StorageConfig;
    use crate::testing::{ApiCall, FakeAtproto};
    use chrono::{TimeZone, Utc};

    const LIST: &str = "at://did:plc:owner/app.bsky.graph.list/3l2u";
    const SERVICE_DID: &str = "did:plc:service";

    struct Harness {
        api: Arc<FakeAtproto>,
        clock: Arc<ManualClock>,
        watcher: Watcher,
        _temp_dir: tempfile::TempDir,
    }

    fn config(root: &std::path::Path, accounts: Vec<MonitorAccount>) -> WatchConfig {
        WatchConfig {
            accounts,
            list: ListUri::parse(LIST).expect("list"),
            list_owner: MonitorAccount::new("owner.test", "pw-o"),
            monitor_list_owner: false,
            poll_interval: Duration::from_secs(30),
            dry_run: false,
            backfill_hours: 24,
            health_port: 0,
            service_url: "http://fake.invalid".to_string(),
            service: ServiceIdentity {
                did: SERVICE_DID.to_string(),
                handle_hint: "listifications".to_string(),
            },
            storage: StorageConfig::with_root(root.to_path_buf()),
            session_ttl: chrono::Duration::minutes(120),
            http_timeout: Duration::from_secs(5),
            dedup_max_entries: None,
        }
    }

    fn harness_with(edit: impl FnOnce(&mut WatchConfig)) -> Harness {
        let temp_dir = tempfile::tempdir().expect("temp dir");
        let api = Arc::new(FakeAtproto::new());
        api.add_account("owner.test", "pw-o", "did:plc:owner");
        api.add_account("alice.test", "pw-a", "did:plc:alice");
        api.add_account("bob.test", "pw-b", "did:plc:bob");
        api.add_handle("offender.test", "did:plc:offender");
        api.add_convo("did:plc:alice", "c-alice", SERVICE_DID, "listifications.app");
        api.add_convo("did:plc:bob", "c-bob", SERVICE_DID, "listifications.app");

        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2026, 1, 31, 12, 0, 0).unwrap(),
        ));
        let mut config = config(
            temp_dir.path(),
            vec![
                MonitorAccount::new("alice.test", "pw-a"),
                MonitorAccount::new("bob.test", "pw-b"),
            ],
        );
        edit(&mut config);
        let watcher = Watcher::from_config(config, api.clone(), clock.clone());
        Harness {
            api,
            clock,
            watcher,
            _temp_dir: temp_dir,
        }
    }

    fn harness() -> Harness {
        harness_with(|_| {})
    }

    #[test]
    fn start_excludes_failed_accounts() {
        let h = harness_with(|config| {
            config
                .accounts
                .push(MonitorAccount::new("mallory.test", "wrong"));
        });
        let state = h.watcher.start().expect("start");
        let handles: Vec<_> = state.accounts().iter().map(|a| a.handle.as_str()).collect();
        assert_eq!(handles, vec!["alice.test", "bob.test"]);
        assert!(state.session("owner.test").is_some());
    }

    #[test]
    fn owner_authentication_failure_is_fatal() {
        let h = harness_with(|config| {
            config.list_owner = MonitorAccount::new("owner.test", "wrong");
        });
        let err = h.watcher.start().expect_err("should fail");
        assert!(matches!(err, WatchError::Authentication { ref handle, .. } if handle == "owner.test"));
    }

    #[test]
    fn monitored_owner_logs_in_once() {
        let h = harness_with(|config| {
            config.accounts.clear();
            config.monitor_list_owner = true;
        });
        let state = h.watcher.start().expect("start");
        assert_eq!(state.accounts().len(), 1);
        assert_eq!(h.api.count(ApiCall::CreateSession), 1);
    }

    #[test]
    fn one_failing_account_does_not_stop_the_others() {
        let h = harness();
        let mut state = h.watcher.start().expect("start");
        h.api.add_message(
            "c-bob",
            "m1",
            SERVICE_DID,
            "@offender.test has blocked you",
            "2026-01-31T11:59:00Z",
        );
        let alice = state.session("alice.test").expect("alice").access_token.clone();
        h.api.revoke_token(&alice);

        let report = h.watcher.tick(&mut state);
        assert_eq!(
            report.accounts,
            vec![
                ("alice.test".to_string(), AccountStatus::Unavailable),
                ("bob.test".to_string(), AccountStatus::Polled),
            ]
        );
        assert_eq!(report.pass.added, 1);
        assert_eq!(h.api.list_subjects(LIST), vec!["did:plc:offender".to_string()]);
    }

    #[test]
    fn rejected_owner_token_defers_events_to_next_tick() {
        let h = harness();
        h.api.add_handle("second.test", "did:plc:second");
        let mut state = h.watcher.start().expect("start");
        h.api.add_message(
            "c-alice",
            "m-alice",
            SERVICE_DID,
            "@offender.test has blocked you",
            "2026-01-31T11:59:00Z",
        );
        h.api.add_message(
            "c-bob",
            "m-bob",
            SERVICE_DID,
            "@second.test has blocked you",
            "2026-01-31T11:59:00Z",
        );
        let owner = state.session("owner.test").expect("owner").access_token.clone();
        h.api.revoke_token(&owner);

        let first = h.watcher.tick(&mut state);
        assert!(first.pass.owner_auth_expired);
        assert_eq!(first.pass.deferred, 1);
        assert_eq!(
            first.accounts,
            vec![
                ("alice.test".to_string(), AccountStatus::Polled),
                ("bob.test".to_string(), AccountStatus::Skipped),
            ]
        );
        assert!(h.api.list_subjects(LIST).is_empty());

        let second = h.watcher.tick(&mut state);
        assert_eq!(second.pass.added, 2);
        assert_eq!(second.pass.skipped_seen, 0);
        let mut subjects = h.api.list_subjects(LIST);
        subjects.sort();
        assert_eq!(
            subjects,
            vec!["did:plc:offender".to_string(), "did:plc:second".to_string()]
        );
        assert_ne!(state.session("owner.test").expect("owner").access_token, owner);
    }

    #[test]
    fn auth_failure_during_poll_renews_session_next_tick() {
        let h = harness();
        let mut state = h.watcher.start().expect("start");
        let alice = state.session("alice.test").expect("alice").access_token.clone();
        h.api.revoke_token(&alice);

        h.watcher.tick(&mut state);
        h.api.clear_calls();
        let report = h.watcher.tick(&mut state);

        assert_eq!(h.api.count(ApiCall::RefreshSession), 1);
        assert_eq!(report.count(AccountStatus::Polled), 2);
        assert_ne!(state.session("alice.test").expect("alice").access_token, alice);
    }

    #[test]
    fn expired_sessions_are_refreshed_before_polling() {
        let h = harness();
        let mut state = h.watcher.start().expect("start");
        h.clock.advance(chrono::Duration::minutes(121));
        h.api.clear_calls();

        let report = h.watcher.tick(&mut state);
        // owner plus both monitors
        assert_eq!(h.api.count(ApiCall::RefreshSession), 3);
        assert_eq!(h.api.count(ApiCall::CreateSession), 0);
        assert_eq!(report.count(AccountStatus::Polled), 2);
    }

    #[test]
    fn backfill_respects_window_and_can_be_disabled() {
        let h = harness();
        let mut state = h.watcher.start().expect("start");
        h.api.add_message(
            "c-alice",
            "old",
            SERVICE_DID,
            "@offender.test has blocked you",
            "2026-01-30T11:00:00Z",
        );
        let report = h.watcher.backfill(&mut state).expect("backfill ran");
        assert_eq!(report.pass.out_of_window, 1);
        assert_eq!(h.api.count(ApiCall::CreateRecord), 0);
        assert!(state.dedup().seen("old"));

        let disabled = harness_with(|config| config.backfill_hours = 0);
        let mut state = disabled.watcher.start().expect("start");
        assert!(disabled.watcher.backfill(&mut state).is_none());
    }

    #[test]
    fn run_returns_once_stopped() {
        let h = harness();
        let mut state = h.watcher.start().expect("start");
        let stop = AtomicBool::new(true);
        h.watcher.run(&mut state, &stop);
        assert_eq!(h.api.count(ApiCall::ListConvos), 0);
    }
}
