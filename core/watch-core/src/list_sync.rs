//! Idempotent list-membership synchronization.
//!
//! Idempotency is approximate: only the first page of the list is checked, so
//! a subject already present further back can be added again. A failed check
//! is treated as "membership unknown" and still permits the create.

use std::sync::Arc;

use blockwatch_xrpc_protocol::{ListItemRecord, MAX_PAGE_LIMIT};
use tracing::{info, warn};

use crate::client::AtprotoApi;
use crate::clock::Clock;
use crate::error::{Result, WatchError};
use crate::list_uri::ListUri;
use crate::types::{ListMembership, Session};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MembershipCheck {
    Present,
    Absent,
    Unknown,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SyncOutcome {
    AlreadyMember,
    Added(ListMembership),
    /// Dry run: the create call was suppressed.
    WouldAdd { subject_did: String },
}

pub struct ListSynchronizer {
    api: Arc<dyn AtprotoApi>,
    clock: Arc<dyn Clock>,
    list: ListUri,
    dry_run: bool,
    page_limit: u32,
}

impl ListSynchronizer {
    pub fn new(api: Arc<dyn AtprotoApi>, clock: Arc<dyn Clock>, list: ListUri, dry_run: bool) -> Self {
        Self {
            api,
            clock,
            list,
            dry_run,
            page_limit: MAX_PAGE_LIMIT,
        }
    }

    pub fn with_page_limit(mut self, page_limit: u32) -> Self {
        self.page_limit = page_limit;
        self
    }

    pub fn list(&self) -> &ListUri {
        &self.list
    }

    pub fn is_dry_run(&self) -> bool {
        self.dry_run
    }

    /// Checks the first page of the list for `subject_did`.
    pub fn check_membership(&self, owner: &Session, subject_did: &str) -> MembershipCheck {
        match self.first_page_contains(owner, subject_did) {
            Ok(true) => MembershipCheck::Present,
            Ok(false) => MembershipCheck::Absent,
            Err(err) => {
                warn!(
                    subject = %subject_did,
                    error = %err,
                    "Membership check failed; treating membership as unknown"
                );
                MembershipCheck::Unknown
            }
        }
    }

    /// Adds `subject_did` to the list unless the first page already has it.
    pub fn ensure_member(&self, owner: &Session, subject_did: &str) -> Result<SyncOutcome> {
        if self.check_membership(owner, subject_did) == MembershipCheck::Present {
            info!(subject = %subject_did, "Already on blockers list");
            return Ok(SyncOutcome::AlreadyMember);
        }

        if self.dry_run {
            info!(
                subject = %subject_did,
                list = %self.list,
                "[dry run] Would add to blockers list"
            );
            return Ok(SyncOutcome::WouldAdd {
                subject_did: subject_did.to_string(),
            });
        }

        let created_at = self.clock.now();
        let list_uri = self.list.as_at_uri();
        let record = ListItemRecord::new(subject_did, &list_uri, created_at);
        let response = self
            .api
            .create_list_item(&owner.access_token, &owner.did, &record)
            .map_err(|source| WatchError::ListWrite {
                subject: subject_did.to_string(),
                source,
            })?;

        info!(subject = %subject_did, record = %response.uri, "Added to blockers list");
        Ok(SyncOutcome::Added(ListMembership {
            subject_did: subject_did.to_string(),
            list_uri,
            created_at,
            record_uri: Some(response.uri),
        }))
    }

    fn first_page_contains(&self, owner: &Session, subject_did: &str) -> Result<bool> {
        let list_uri = self.list.as_at_uri();
        let page = self
            .api
            .get_list(&owner.access_token, &list_uri, self.page_limit)
            .map_err(|source| WatchError::MembershipCheck {
                list: list_uri.clone(),
                source,
            })?;
        Ok(page.items.iter().any(|item| item.subject.did == subject_did))
    }
}
