//! The path every fetched message takes, shared by backfill and steady polling:
//!
//! ```text
//! identity → seen? → mark seen (persisted) → window filter → extract → resolve → ensure member
//! ```
//!
//! The only difference between the passes is the backfill time window and the
//! `backfill` annotation on log lines.
//!
//! If the list owner's token is rejected mid-pass, the event in hand is
//! un-marked and processing stops, so nothing is consumed until the owner
//! session is renewed.

use chrono::{DateTime, Utc};
use tracing::{debug, info, warn};

use crate::dedup::Deduplicator;
use crate::extract::extract;
use crate::list_sync::{ListSynchronizer, SyncOutcome};
use crate::resolver::HandleResolver;
use crate::types::{CandidateMessage, NotificationEvent, Session};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Pass {
    /// Startup sweep; messages older than `cutoff` are retired without action.
    Backfill { cutoff: DateTime<Utc> },
    Poll,
}

impl Pass {
    pub fn is_backfill(&self) -> bool {
        matches!(self, Pass::Backfill { .. })
    }
}

/// Per-pass counters, used for logging and tests.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PassReport {
    pub fetched: usize,
    pub skipped_seen: usize,
    pub skipped_no_identity: usize,
    /// Backfill only: no parseable timestamp, left for steady polling.
    pub undated: usize,
    pub out_of_window: usize,
    pub ignored: usize,
    pub detected: usize,
    pub added: usize,
    pub already_member: usize,
    pub would_add: usize,
    pub failed: usize,
    /// Un-marked after the owner token was rejected; retried next pass.
    pub deferred: usize,
    pub owner_auth_expired: bool,
}

impl PassReport {
    pub fn merge(&mut self, other: &PassReport) {
        self.fetched += other.fetched;
        self.skipped_seen += other.skipped_seen;
        self.skipped_no_identity += other.skipped_no_identity;
        self.undated += other.undated;
        self.out_of_window += other.out_of_window;
        self.ignored += other.ignored;
        self.detected += other.detected;
        self.added += other.added;
        self.already_member += other.already_member;
        self.would_add += other.would_add;
        self.failed += other.failed;
        self.deferred += other.deferred;
        self.owner_auth_expired |= other.owner_auth_expired;
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Applied {
    Done,
    OwnerRejected,
}

pub struct EventPipeline {
    resolver: HandleResolver,
    sync: ListSynchronizer,
}

impl EventPipeline {
    pub fn new(resolver: HandleResolver, sync: ListSynchronizer) -> Self {
        Self { resolver, sync }
    }

    pub fn synchronizer(&self) -> &ListSynchronizer {
        &self.sync
    }

    pub fn process(
        &self,
        target_handle: &str,
        messages: &[CandidateMessage],
        pass: Pass,
        dedup: &mut Deduplicator,
        owner: &Session,
    ) -> PassReport {
        let mut report = PassReport {
            fetched: messages.len(),
            ..PassReport::default()
        };

        for message in messages {
            let Some(identity) = message.identity() else {
                debug!(handle = %target_handle, "Skipping message without id or timestamp");
                report.skipped_no_identity += 1;
                continue;
            };

            if dedup.seen(identity) {
                report.skipped_seen += 1;
                continue;
            }

            let timestamp = message.timestamp();
            if pass.is_backfill() && timestamp.is_none() {
                debug!(
                    handle = %target_handle,
                    identity = %identity,
                    "Skipping undated message during backfill"
                );
                report.undated += 1;
                continue;
            }

            if let Err(err) = dedup.mark_seen(identity) {
                warn!(error = %err, "Failed to persist processed messages; continuing in memory");
            }

            if let (Pass::Backfill { cutoff }, Some(timestamp)) = (pass, timestamp) {
                if timestamp < cutoff {
                    report.out_of_window += 1;
                    continue;
                }
            }

            let Some(detection) = extract(&message.text) else {
                report.ignored += 1;
                continue;
            };

            report.detected += 1;
            let event = detection.into_event(target_handle, pass.is_backfill());
            if self.apply(&event, owner, &mut report) == Applied::OwnerRejected {
                if let Err(err) = dedup.forget(identity) {
                    warn!(error = %err, "Failed to persist processed messages; continuing in memory");
                }
                report.deferred += 1;
                report.owner_auth_expired = true;
                warn!(
                    handle = %target_handle,
                    "List owner token rejected; deferring remaining messages"
                );
                break;
            }
        }

        report
    }

    fn apply(&self, event: &NotificationEvent, owner: &Session, report: &mut PassReport) -> Applied {
        let did = match self.resolver.resolve(&event.offender_handle) {
            Ok(did) => did,
            Err(err) => {
                warn!(
                    offender = %event.offender_handle,
                    target = %event.target_handle,
                    error = %err,
                    "Dropping event: handle did not resolve"
                );
                report.failed += 1;
                return Applied::Done;
            }
        };

        info!(
            offender = %event.offender_handle,
            did = %did,
            action = %event.action,
            target = %event.target_handle,
            backfill = event.is_backfill,
            "Detected moderation event"
        );

        match self.sync.ensure_member(owner, &did) {
            Ok(SyncOutcome::Added(_)) => report.added += 1,
            Ok(SyncOutcome::AlreadyMember) => report.already_member += 1,
            Ok(SyncOutcome::WouldAdd { .. }) => report.would_add += 1,
            Err(err) if err.is_auth_failure() => {
                warn!(did = %did, error = %err, "List owner token rejected");
                return Applied::OwnerRejected;
            }
            Err(err) => {
                warn!(did = %did, error = %err, "Failed to add to blockers list");
                report.failed += 1;
            }
        }
        Applied::Done
    }
}
