//! Shared data types for the watcher.

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use blockwatch_xrpc_protocol::{parse_timestamp, SessionTokens};

/// An account whose notifications are watched. Loaded once from configuration.
#[derive(Clone, PartialEq, Eq)]
pub struct MonitorAccount {
    pub handle: String,
    pub password: String,
}

impl MonitorAccount {
    pub fn new(handle: impl Into<String>, password: impl Into<String>) -> Self {
        Self {
            handle: handle.into(),
            password: password.into(),
        }
    }
}

// Never print credentials, even at debug level.
impl std::fmt::Debug for MonitorAccount {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MonitorAccount")
            .field("handle", &self.handle)
            .finish_non_exhaustive()
    }
}

/// Authentication session for one account.
///
/// `expires_at` is a local estimate: a fixed horizon from issuance, not
/// decoded from the token.
#[derive(Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Session {
    pub access_token: String,
    pub refresh_token: String,
    pub handle: String,
    pub did: String,
    pub expires_at: DateTime<Utc>,
}

impl Session {
    pub fn from_tokens(tokens: SessionTokens, issued_at: DateTime<Utc>, ttl: Duration) -> Self {
        Self {
            access_token: tokens.access_jwt,
            refresh_token: tokens.refresh_jwt,
            handle: tokens.handle,
            did: tokens.did,
            expires_at: issued_at + ttl,
        }
    }

    pub fn is_usable_at(&self, now: DateTime<Utc>) -> bool {
        now < self.expires_at
    }
}

impl std::fmt::Debug for Session {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Session")
            .field("handle", &self.handle)
            .field("did", &self.did)
            .field("expires_at", &self.expires_at)
            .finish_non_exhaustive()
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum ModerationAction {
    Blocked,
    AddedToList,
}

impl ModerationAction {
    pub fn describe(&self) -> &'static str {
        match self {
            ModerationAction::Blocked => "blocked",
            ModerationAction::AddedToList => "added to moderation list",
        }
    }
}

impl std::fmt::Display for ModerationAction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.describe())
    }
}

/// A moderation event extracted from notification text.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationEvent {
    pub offender_handle: String,
    pub action: ModerationAction,
    pub target_handle: String,
    pub is_backfill: bool,
}

/// Which upstream channel produced a message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum Channel {
    DirectMessages,
    Mentions,
}

impl std::fmt::Display for Channel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Channel::DirectMessages => f.write_str("direct-messages"),
            Channel::Mentions => f.write_str("mentions"),
        }
    }
}

/// A message from the notification service, before extraction.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CandidateMessage {
    pub id: Option<String>,
    pub text: String,
    pub raw_timestamp: Option<String>,
    pub channel: Channel,
}

impl CandidateMessage {
    /// Dedup identity: the upstream id, else the timestamp string.
    pub fn identity(&self) -> Option<&str> {
        self.id
            .as_deref()
            .filter(|id| !id.is_empty())
            .or_else(|| self.raw_timestamp.as_deref().filter(|ts| !ts.is_empty()))
    }

    pub fn timestamp(&self) -> Option<DateTime<Utc>> {
        self.raw_timestamp.as_deref().and_then(parse_timestamp)
    }
}

/// A list-item record created (or that would have been created) by the synchronizer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListMembership {
    pub subject_did: String,
    pub list_uri: String,
    pub created_at: DateTime<Utc>,
    pub record_uri: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn message(id: Option<&str>, ts: Option<&str>) -> CandidateMessage {
        CandidateMessage {
            id: id.map(str::to_string),
            text: "hello".to_string(),
            raw_timestamp: ts.map(str::to_string),
            channel: Channel::DirectMessages,
        }
    }

    #[test]
    fn identity_prefers_id_then_timestamp() {
        assert_eq!(
            message(Some("m1"), Some("2025-01-01T00:00:00Z")).identity(),
            Some("m1")
        );
        assert_eq!(
            message(None, Some("2025-01-01T00:00:00Z")).identity(),
            Some("2025-01-01T00:00:00Z")
        );
        assert_eq!(
            message(Some(""), Some("2025-01-01T00:00:00Z")).identity(),
            Some("2025-01-01T00:00:00Z")
        );
        assert_eq!(message(None, None).identity(), None);
    }

    #[test]
    fn session_is_usable_strictly_before_expiry() {
        let issued = parse_timestamp("2025-01-01T00:00:00Z").expect("ts");
        let session = Session::from_tokens(
            SessionTokens {
                access_jwt: "a".to_string(),
                refresh_jwt: "r".to_string(),
                handle: "alice.test".to_string(),
                did: "did:plc:alice".to_string(),
            },
            issued,
            Duration::minutes(120),
        );
        assert!(session.is_usable_at(issued + Duration::minutes(119)));
        assert!(!session.is_usable_at(issued + Duration::minutes(120)));
    }

    #[test]
    fn debug_output_omits_secrets() {
        let account = MonitorAccount::new("alice.test", "hunter2");
        assert!(!format!("{:?}", account).contains("hunter2"));
    }
}
