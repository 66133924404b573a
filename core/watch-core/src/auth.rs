//! Per-account authentication.
//!
//! ```text
//! UNAUTHENTICATED ─┬─ cached, unexpired, verified ──▶ SESSION_CHECK ──▶ AUTHENTICATED
//!                  └─ otherwise ─────────────────────▶ FRESH_LOGIN ──┬─▶ AUTHENTICATED
//!                                                                    └─▶ FAILED
//! ```
//!
//! A fresh login always overwrites the cached session and resets the expiry
//! estimate. Failed accounts are reported to the caller, which excludes them
//! for the rest of the run.

use std::sync::Arc;

use tracing::{debug, info, warn};

use crate::client::AtprotoApi;
use crate::clock::Clock;
use crate::error::{Result, WatchError};
use crate::session_store::{SessionMap, SessionStore};
use crate::types::{MonitorAccount, Session};

/// How an account ended up authenticated.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuthPath {
    Restored,
    FreshLogin,
    Refreshed,
}

#[derive(Debug, Clone)]
pub struct AuthOutcome {
    pub session: Session,
    pub path: AuthPath,
}

/// Accounts split by authentication result.
#[derive(Debug, Default)]
pub struct AuthSummary {
    pub authenticated: Vec<(MonitorAccount, Session)>,
    pub failed: Vec<(String, WatchError)>,
}

pub struct Authenticator {
    api: Arc<dyn AtprotoApi>,
    clock: Arc<dyn Clock>,
    store: SessionStore,
    ttl: chrono::Duration,
}

impl Authenticator {
    pub fn new(
        api: Arc<dyn AtprotoApi>,
        clock: Arc<dyn Clock>,
        store: SessionStore,
        ttl: chrono::Duration,
    ) -> Self {
        Self {
            api,
            clock,
            store,
            ttl,
        }
    }

    pub fn load_cache(&self) -> SessionMap {
        self.store.load()
    }

    /// Produces a usable session, preferring a verified cached one.
    pub fn authenticate(
        &self,
        account: &MonitorAccount,
        cache: &mut SessionMap,
    ) -> Result<AuthOutcome> {
        if let Some(session) = cache.get(&account.handle).cloned() {
            if self.verify_cached(&session) {
                debug!(handle = %account.handle, "Restored cached session");
                return Ok(AuthOutcome {
                    session,
                    path: AuthPath::Restored,
                });
            }
        }

        let session = self.login(account, cache)?;
        Ok(AuthOutcome {
            session,
            path: AuthPath::FreshLogin,
        })
    }

    /// Authenticates every account, isolating failures per account.
    pub fn authenticate_all(
        &self,
        accounts: &[MonitorAccount],
        cache: &mut SessionMap,
    ) -> AuthSummary {
        let mut summary = AuthSummary::default();
        for account in accounts {
            match self.authenticate(account, cache) {
                Ok(outcome) => {
                    info!(
                        handle = %account.handle,
                        path = ?outcome.path,
                        "Account authenticated"
                    );
                    summary
                        .authenticated
                        .push((account.clone(), outcome.session));
                }
                Err(err) => {
                    warn!(handle = %account.handle, error = %err, "Account authentication failed");
                    summary.failed.push((account.handle.clone(), err));
                }
            }
        }
        summary
    }

    /// Replaces an expired session mid-run: refresh token first, then a fresh login.
    pub fn renew(&self, account: &MonitorAccount, cache: &mut SessionMap) -> Result<AuthOutcome> {
        if let Some(current) = cache.get(&account.handle).cloned() {
            match self.api.refresh_session(&current.refresh_token) {
                Ok(tokens) => {
                    let session = Session::from_tokens(tokens, self.clock.now(), self.ttl);
                    self.remember(&account.handle, session.clone(), cache);
                    return Ok(AuthOutcome {
                        session,
                        path: AuthPath::Refreshed,
                    });
                }
                Err(err) => {
                    debug!(
                        handle = %account.handle,
                        error = %err,
                        "Session refresh failed; falling back to login"
                    );
                }
            }
        }

        let session = self.login(account, cache)?;
        Ok(AuthOutcome {
            session,
            path: AuthPath::FreshLogin,
        })
    }

    /// Marks a cached session as expired so the next check renews it.
    pub fn invalidate(&self, handle: &str, cache: &mut SessionMap) {
        if let Some(session) = cache.get_mut(handle) {
            session.expires_at = self.clock.now();
        }
    }

    fn verify_cached(&self, session: &Session) -> bool {
        if !session.is_usable_at(self.clock.now()) {
            debug!(handle = %session.handle, "Cached session past expiry estimate");
            return false;
        }
        match self.api.get_session(&session.access_token) {
            Ok(_) => true,
            Err(err) => {
                debug!(handle = %session.handle, error = %err, "Cached session failed verification");
                false
            }
        }
    }

    fn login(&self, account: &MonitorAccount, cache: &mut SessionMap) -> Result<Session> {
        let tokens = self
            .api
            .create_session(&account.handle, &account.password)
            .map_err(|source| WatchError::Authentication {
                handle: account.handle.clone(),
                source,
            })?;
        let session = Session::from_tokens(tokens, self.clock.now(), self.ttl);
        self.remember(&account.handle, session.clone(), cache);
        Ok(session)
    }

    fn remember(&self, handle: &str, session: Session, cache: &mut SessionMap) {
        cache.insert(handle.to_string(), session);
        if let Err(err) = self.store.save(cache) {
            warn!(error = %err, "Failed to persist session cache; continuing in memory");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::clock::ManualClock;
    use crate::testing::{ApiCall, FakeAtproto};
    use chrono::{Duration, TimeZone, Utc};

    struct Harness {
        api: Arc<FakeAtproto>,
        clock: Arc<ManualClock>,
        auth: Authenticator,
        store: SessionStore,
        _temp_dir: tempfile::TempDir,
    }

    fn harness() -> Harness {
        let temp_dir = tempfile::tempdir().expect("temp dir");
        let store = SessionStore::new(&temp_dir.path().join("sessions.json"));
        let api = Arc::new(FakeAtproto::new());
        api.add_account("alice.test", "pw", "did:plc:alice");
        let clock = Arc::new(ManualClock::new(
            Utc.with_ymd_and_hms(2026, 1, 31, 12, 0, 0).unwrap(),
        ));
        let auth = Authenticator::new(
            api.clone(),
            clock.clone(),
            store.clone(),
            Duration::minutes(120),
        );
        Harness {
            api,
            clock,
            auth,
            store,
            _temp_dir: temp_dir,
        }
    }

    fn account() -> MonitorAccount {
        MonitorAccount::new("alice.test", "pw")
    }

    #[test]
    fn valid_cached_session_skips_login() {
        let h = harness();
        let mut cache = SessionMap::new();
        let first = h.auth.authenticate(&account(), &mut cache).expect("login");
        assert_eq!(first.path, AuthPath::FreshLogin);
        h.api.clear_calls();

        let mut reloaded = h.store.load();
        let second = h.auth.authenticate(&account(), &mut reloaded).expect("restore");
        assert_eq!(second.path, AuthPath::Restored);
        assert_eq!(h.api.count(ApiCall::CreateSession), 0);
        assert_eq!(h.api.count(ApiCall::GetSession), 1);
    }

    #[test]
    fn expired_cached_session_triggers_login_and_overwrites_cache() {
        let h = harness();
        let mut cache = SessionMap::new();
        let first = h.auth.authenticate(&account(), &mut cache).expect("login");
        h.api.clear_calls();

        h.clock.advance(Duration::minutes(121));
        let second = h.auth.authenticate(&account(), &mut cache).expect("login again");
        assert_eq!(second.path, AuthPath::FreshLogin);
        assert_eq!(h.api.count(ApiCall::GetSession), 0);
        assert_eq!(h.api.count(ApiCall::CreateSession), 1);
        assert_ne!(second.session.access_token, first.session.access_token);

        let stored = h.store.load();
        assert_eq!(stored["alice.test"], second.session);
        assert_eq!(
            stored["alice.test"].expires_at,
            h.clock.now() + Duration::minutes(120)
        );
    }

    #[test]
    fn cached_session_failing_verification_triggers_login() {
        let h = harness();
        let mut cache = SessionMap::new();
        let first = h.auth.authenticate(&account(), &mut cache).expect("login");
        h.api.revoke_token(&first.session.access_token);
        h.api.clear_calls();

        let second = h.auth.authenticate(&account(), &mut cache).expect("login again");
        assert_eq!(second.path, AuthPath::FreshLogin);
        assert_eq!(h.api.count(ApiCall::GetSession), 1);
        assert_eq!(h.api.count(ApiCall::CreateSession), 1);
    }

    #[test]
    fn rejected_credentials_fail_only_that_account() {
        let h = harness();
        let mut cache = SessionMap::new();
        let accounts = vec![account(), MonitorAccount::new("mallory.test", "nope")];
        let summary = h.auth.authenticate_all(&accounts, &mut cache);

        assert_eq!(summary.authenticated.len(), 1);
        assert_eq!(summary.authenticated[0].0.handle, "alice.test");
        assert_eq!(summary.failed.len(), 1);
        assert_eq!(summary.failed[0].0, "mallory.test");
        assert!(matches!(
            summary.failed[0].1,
            WatchError::Authentication { .. }
        ));
        assert!(!cache.contains_key("mallory.test"));
    }

    #[test]
    fn renew_prefers_refresh_token() {
        let h = harness();
        let mut cache = SessionMap::new();
        h.auth.authenticate(&account(), &mut cache).expect("login");
        h.api.clear_calls();

        let renewed = h.auth.renew(&account(), &mut cache).expect("renew");
        assert_eq!(renewed.path, AuthPath::Refreshed);
        assert_eq!(h.api.count(ApiCall::RefreshSession), 1);
        assert_eq!(h.api.count(ApiCall::CreateSession), 0);
        assert_eq!(cache["alice.test"], renewed.session);
    }

    #[test]
    fn renew_falls_back_to_login_when_refresh_is_rejected() {
        let h = harness();
        let mut cache = SessionMap::new();
        let first = h.auth.authenticate(&account(), &mut cache).expect("login");
        h.api.revoke_token(&first.session.refresh_token);
        h.api.clear_calls();

        let renewed = h.auth.renew(&account(), &mut cache).expect("renew");
        assert_eq!(renewed.path, AuthPath::FreshLogin);
        assert_eq!(h.api.count(ApiCall::CreateSession), 1);
    }

    #[test]
    fn invalidate_expires_cached_session_now() {
        let h = harness();
        let mut cache = SessionMap::new();
        h.auth.authenticate(&account(), &mut cache).expect("login");
        h.auth.invalidate("alice.test", &mut cache);
        assert!(!cache["alice.test"].is_usable_at(h.clock.now()));
    }
}
