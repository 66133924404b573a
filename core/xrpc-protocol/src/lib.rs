//! XRPC wire types for the calls blockwatch makes against an AT Protocol service.
//!
//! This crate is shared by the HTTP client and the test fakes so the two cannot
//! drift. Only the fields blockwatch reads are modeled; unknown fields are
//! ignored on decode because the upstream lexicons grow over time.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;

pub const CREATE_SESSION: &str = "com.atproto.server.createSession";
pub const GET_SESSION: &str = "com.atproto.server.getSession";
pub const REFRESH_SESSION: &str = "com.atproto.server.refreshSession";
pub const RESOLVE_HANDLE: &str = "com.atproto.identity.resolveHandle";
pub const CREATE_RECORD: &str = "com.atproto.repo.createRecord";
pub const LIST_CONVOS: &str = "chat.bsky.convo.listConvos";
pub const GET_MESSAGES: &str = "chat.bsky.convo.getMessages";
pub const LIST_NOTIFICATIONS: &str = "app.bsky.notification.listNotifications";
pub const GET_LIST: &str = "app.bsky.graph.getList";

pub const LIST_COLLECTION: &str = "app.bsky.graph.list";
pub const LISTITEM_COLLECTION: &str = "app.bsky.graph.listitem";

/// Service proxy header value that routes chat calls through the PDS.
pub const CHAT_PROXY_HEADER: &str = "atproto-proxy";
pub const CHAT_PROXY_TARGET: &str = "did:web:api.bsky.chat#bsky_chat";

/// Upper bound the upstream accepts for `limit` on list-style queries.
pub const MAX_PAGE_LIMIT: u32 = 100;

// ═══════════════════════════════════════════════════════════════════════════════
// Sessions
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateSessionRequest {
    pub identifier: String,
    pub password: String,
}

/// Returned by both `createSession` and `refreshSession`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SessionTokens {
    pub access_jwt: String,
    pub refresh_jwt: String,
    pub handle: String,
    pub did: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GetSessionResponse {
    pub handle: String,
    pub did: String,
}

// ═══════════════════════════════════════════════════════════════════════════════
// Identity
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolveHandleResponse {
    pub did: String,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProfileBasic {
    pub did: String,
    #[serde(default)]
    pub handle: Option<String>,
}

// ═══════════════════════════════════════════════════════════════════════════════
// Chat
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ListConvosResponse {
    #[serde(default)]
    pub convos: Vec<ConvoView>,
    #[serde(default)]
    pub cursor: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConvoView {
    pub id: String,
    #[serde(default)]
    pub members: Vec<ProfileBasic>,
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct GetMessagesResponse {
    #[serde(default)]
    pub messages: Vec<MessageItem>,
    #[serde(default)]
    pub cursor: Option<String>,
}

/// One entry of `getMessages`. The upstream returns a union of message and
/// deleted-message views; deleted messages carry no text.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageItem {
    #[serde(rename = "$type", default)]
    pub kind: Option<String>,
    #[serde(default)]
    pub id: Option<String>,
    #[serde(default)]
    pub text: Option<String>,
    #[serde(default)]
    pub sender: Option<MessageSender>,
    #[serde(default)]
    pub sent_at: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MessageSender {
    pub did: String,
}

// ═══════════════════════════════════════════════════════════════════════════════
// Notifications
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ListNotificationsResponse {
    #[serde(default)]
    pub notifications: Vec<Notification>,
    #[serde(default)]
    pub cursor: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Notification {
    pub uri: String,
    #[serde(default)]
    pub cid: Option<String>,
    pub author: ProfileBasic,
    pub reason: String,
    #[serde(default)]
    pub record: Value,
    #[serde(default)]
    pub indexed_at: Option<String>,
}

impl Notification {
    /// Post text of the notifying record, if the record is a post.
    pub fn record_text(&self) -> Option<&str> {
        self.record.get("text").and_then(Value::as_str)
    }

    /// Creation time declared by the record, falling back to the index time.
    pub fn timestamp(&self) -> Option<&str> {
        self.record
            .get("createdAt")
            .and_then(Value::as_str)
            .or(self.indexed_at.as_deref())
    }
}

// ═══════════════════════════════════════════════════════════════════════════════
// Lists
// ═══════════════════════════════════════════════════════════════════════════════

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GetListResponse {
    pub list: ListView,
    #[serde(default)]
    pub items: Vec<ListItemView>,
    #[serde(default)]
    pub cursor: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListView {
    pub uri: String,
    #[serde(default)]
    pub name: Option<String>,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ListItemView {
    pub uri: String,
    pub subject: ProfileBasic,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ListItemRecord {
    #[serde(rename = "$type")]
    pub kind: String,
    pub subject: String,
    pub list: String,
    pub created_at: String,
}

impl ListItemRecord {
    pub fn new(subject: &str, list: &str, created_at: DateTime<Utc>) -> Self {
        Self {
            kind: LISTITEM_COLLECTION.to_string(),
            subject: subject.to_string(),
            list: list.to_string(),
            created_at: created_at.to_rfc3339_opts(chrono::SecondsFormat::Millis, true),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CreateRecordRequest<R> {
    pub repo: String,
    pub collection: String,
    pub record: R,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CreateRecordResponse {
    pub uri: String,
    #[serde(default)]
    pub cid: Option<String>,
}

// ═══════════════════════════════════════════════════════════════════════════════
// Errors
// ═══════════════════════════════════════════════════════════════════════════════

/// Body the upstream returns alongside non-2xx statuses.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct XrpcErrorBody {
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub message: Option<String>,
}

/// Error names that mean the presented token is no longer usable.
pub const AUTH_ERROR_NAMES: &[&str] = &["ExpiredToken", "InvalidToken", "AuthenticationRequired"];

pub fn parse_timestamp(value: &str) -> Option<DateTime<Utc>> {
    DateTime::parse_from_rfc3339(value)
        .ok()
        .map(|dt| dt.with_timezone(&Utc))
}
