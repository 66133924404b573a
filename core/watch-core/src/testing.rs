//! In-memory [`AtprotoApi`] for tests.
//!
//! Models just enough of the upstream to drive the pipeline: credentialed
//! accounts with revocable tokens, DM conversations, mention notifications,
//! handle resolution and list membership. Every call is recorded so tests can
//! assert which operations ran.

use std::collections::{HashMap, HashSet};
use std::sync::{Mutex, MutexGuard};

use blockwatch_xrpc_protocol::{
    self as xrpc, ConvoView, CreateRecordResponse, GetListResponse, GetMessagesResponse,
    GetSessionResponse, ListConvosResponse, ListItemRecord, ListItemView, ListNotificationsResponse,
    ListView, MessageItem, MessageSender, Notification, ProfileBasic, ResolveHandleResponse,
    SessionTokens,
};
use serde_json::json;

use crate::client::{AtprotoApi, XrpcError, XrpcResult};

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ApiCall {
    CreateSession,
    GetSession,
    RefreshSession,
    ListConvos,
    GetMessages,
    ListNotifications,
    ResolveHandle,
    GetList,
    CreateRecord,
}

#[derive(Debug, Clone)]
struct FakeAccount {
    handle: String,
    password: String,
    did: String,
}

#[derive(Debug, Clone)]
struct FakeConvo {
    owner_did: String,
    view: ConvoView,
    messages: Vec<MessageItem>,
}

#[derive(Debug, Clone)]
struct FakeListItem {
    list: String,
    subject: String,
    uri: String,
}

#[derive(Debug, Default)]
struct FakeState {
    accounts: Vec<FakeAccount>,
    handles: HashMap<String, String>,
    access_tokens: HashMap<String, String>,
    refresh_tokens: HashMap<String, String>,
    next_token: u64,
    convos: Vec<FakeConvo>,
    notifications: HashMap<String, Vec<Notification>>,
    list_items: Vec<FakeListItem>,
    failing: HashSet<ApiCall>,
    calls: Vec<ApiCall>,
}

#[derive(Debug, Default)]
pub struct FakeAtproto {
    state: Mutex<FakeState>,
}

impl FakeAtproto {
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> MutexGuard<'_, FakeState> {
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    // ─────────────────────────────────────────────────────────────────────
    // Setup
    // ─────────────────────────────────────────────────────────────────────

    pub fn add_account(&self, handle: &str, password: &str, did: &str) {
        let mut state = self.state();
        state.accounts.push(FakeAccount {
            handle: handle.to_string(),
            password: password.to_string(),
            did: did.to_string(),
        });
        state.handles.insert(handle.to_string(), did.to_string());
    }

    /// Makes `handle` resolvable without giving it credentials.
    pub fn add_handle(&self, handle: &str, did: &str) {
        self.state()
            .handles
            .insert(handle.to_string(), did.to_string());
    }

    /// Adds a conversation between `owner_did` and `partner`.
    pub fn add_convo(&self, owner_did: &str, convo_id: &str, partner_did: &str, partner_handle: &str) {
        self.state().convos.push(FakeConvo {
            owner_did: owner_did.to_string(),
            view: ConvoView {
                id: convo_id.to_string(),
                members: vec![
                    ProfileBasic {
                        did: owner_did.to_string(),
                        handle: None,
                    },
                    ProfileBasic {
                        did: partner_did.to_string(),
                        handle: Some(partner_handle.to_string()),
                    },
                ],
            },
            messages: Vec::new(),
        });
    }

    /// Appends a message to a conversation. Newest messages are returned first.
    pub fn add_message(&self, convo_id: &str, id: &str, sender_did: &str, text: &str, sent_at: &str) {
        let mut state = self.state();
        if let Some(convo) = state.convos.iter_mut().find(|c| c.view.id == convo_id) {
            convo.messages.insert(
                0,
                MessageItem {
                    kind: Some("chat.bsky.convo.defs#messageView".to_string()),
                    id: Some(id.to_string()),
                    text: Some(text.to_string()),
                    sender: Some(MessageSender {
                        did: sender_did.to_string(),
                    }),
                    sent_at: Some(sent_at.to_string()),
                },
            );
        }
    }

    /// Adds a notification for `recipient_did`. Newest notifications are returned first.
    #[allow(clippy::too_many_arguments)]
    pub fn add_notification(
        &self,
        recipient_did: &str,
        uri: &str,
        author_did: &str,
        author_handle: &str,
        reason: &str,
        text: &str,
        created_at: &str,
    ) {
        self.state()
            .notifications
            .entry(recipient_did.to_string())
            .or_default()
            .insert(
                0,
                Notification {
                    uri: uri.to_string(),
                    cid: None,
                    author: ProfileBasic {
                        did: author_did.to_string(),
                        handle: Some(author_handle.to_string()),
                    },
                    reason: reason.to_string(),
                    record: json!({ "text": text, "createdAt": created_at }),
                    indexed_at: Some(created_at.to_string()),
                },
            );
    }

    pub fn seed_list_item(&self, list: &str, subject: &str) {
        let mut state = self.state();
        let uri = format!("at://seed/{}/{}", xrpc::LISTITEM_COLLECTION, state.list_items.len());
        state.list_items.push(FakeListItem {
            list: list.to_string(),
            subject: subject.to_string(),
            uri,
        });
    }

    pub fn revoke_token(&self, token: &str) {
        let mut state = self.state();
        state.access_tokens.remove(token);
        state.refresh_tokens.remove(token);
    }

    /// Makes every call of this kind fail with a 502 until [`FakeAtproto::heal`].
    pub fn fail(&self, call: ApiCall) {
        self.state().failing.insert(call);
    }

    pub fn heal(&self, call: ApiCall) {
        self.state().failing.remove(&call);
    }

    // ─────────────────────────────────────────────────────────────────────
    // Inspection
    // ─────────────────────────────────────────────────────────────────────

    pub fn count(&self, call: ApiCall) -> usize {
        self.state().calls.iter().filter(|c| **c == call).count()
    }

    pub fn clear_calls(&self) {
        self.state().calls.clear();
    }

    /// Subjects on `list`, oldest first, duplicates included.
    pub fn list_subjects(&self, list: &str) -> Vec<String> {
        self.state()
            .list_items
            .iter()
            .filter(|item| item.list == list)
            .map(|item| item.subject.clone())
            .collect()
    }

    // ─────────────────────────────────────────────────────────────────────
    // Internals
    // ─────────────────────────────────────────────────────────────────────

    fn begin(&self, call: ApiCall, method: &str) -> XrpcResult<MutexGuard<'_, FakeState>> {
        let mut state = self.state();
        state.calls.push(call);
        if state.failing.contains(&call) {
            return Err(XrpcError::status(
                method,
                502,
                Some("UpstreamFailure"),
                Some("injected failure"),
            ));
        }
        Ok(state)
    }
}

impl FakeState {
    fn issue_tokens(&mut self, account: &FakeAccount) -> SessionTokens {
        self.next_token += 1;
        let access = format!("access-{}-{}", account.handle, self.next_token);
        let refresh = format!("refresh-{}-{}", account.handle, self.next_token);
        self.access_tokens
            .insert(access.clone(), account.did.clone());
        self.refresh_tokens
            .insert(refresh.clone(), account.did.clone());
        SessionTokens {
            access_jwt: access,
            refresh_jwt: refresh,
            handle: account.handle.clone(),
            did: account.did.clone(),
        }
    }

    fn did_for_access(&self, method: &str, token: &str) -> XrpcResult<String> {
        self.access_tokens.get(token).cloned().ok_or_else(|| {
            XrpcError::status(method, 400, Some("ExpiredToken"), Some("Token has expired"))
        })
    }
}

impl AtprotoApi for FakeAtproto {
    fn create_session(&self, identifier: &str, password: &str) -> XrpcResult<SessionTokens> {
        let mut state = self.begin(ApiCall::CreateSession, xrpc::CREATE_SESSION)?;
        let account = state
            .accounts
            .iter()
            .find(|a| a.handle == identifier && a.password == password)
            .cloned()
            .ok_or_else(|| {
                XrpcError::status(
                    xrpc::CREATE_SESSION,
                    401,
                    Some("AuthenticationRequired"),
                    Some("Invalid identifier or password"),
                )
            })?;
        Ok(state.issue_tokens(&account))
    }

    fn get_session(&self, access_token: &str) -> XrpcResult<GetSessionResponse> {
        let state = self.begin(ApiCall::GetSession, xrpc::GET_SESSION)?;
        let did = state.did_for_access(xrpc::GET_SESSION, access_token)?;
        let handle = state
            .accounts
            .iter()
            .find(|a| a.did == did)
            .map(|a| a.handle.clone())
            .unwrap_or_default();
        Ok(GetSessionResponse { handle, did })
    }

    fn refresh_session(&self, refresh_token: &str) -> XrpcResult<SessionTokens> {
        let mut state = self.begin(ApiCall::RefreshSession, xrpc::REFRESH_SESSION)?;
        let did = state.refresh_tokens.remove(refresh_token).ok_or_else(|| {
            XrpcError::status(xrpc::REFRESH_SESSION, 400, Some("ExpiredToken"), None)
        })?;
        let account = state
            .accounts
            .iter()
            .find(|a| a.did == did)
            .cloned()
            .ok_or_else(|| XrpcError::status(xrpc::REFRESH_SESSION, 400, Some("InvalidToken"), None))?;
        Ok(state.issue_tokens(&account))
    }

    fn list_convos(&self, access_token: &str, limit: u32) -> XrpcResult<ListConvosResponse> {
        let state = self.begin(ApiCall::ListConvos, xrpc::LIST_CONVOS)?;
        let did = state.did_for_access(xrpc::LIST_CONVOS, access_token)?;
        let convos = state
            .convos
            .iter()
            .filter(|c| c.owner_did == did)
            .take(limit as usize)
            .map(|c| c.view.clone())
            .collect();
        Ok(ListConvosResponse {
            convos,
            cursor: None,
        })
    }

    fn get_messages(
        &self,
        access_token: &str,
        convo_id: &str,
        limit: u32,
    ) -> XrpcResult<GetMessagesResponse> {
        let state = self.begin(ApiCall::GetMessages, xrpc::GET_MESSAGES)?;
        let did = state.did_for_access(xrpc::GET_MESSAGES, access_token)?;
        let convo = state
            .convos
            .iter()
            .find(|c| c.view.id == convo_id && c.owner_did == did)
            .ok_or_else(|| XrpcError::status(xrpc::GET_MESSAGES, 400, Some("InvalidConvo"), None))?;
        Ok(GetMessagesResponse {
            messages: convo.messages.iter().take(limit as usize).cloned().collect(),
            cursor: None,
        })
    }

    fn list_notifications(
        &self,
        access_token: &str,
        limit: u32,
    ) -> XrpcResult<ListNotificationsResponse> {
        let state = self.begin(ApiCall::ListNotifications, xrpc::LIST_NOTIFICATIONS)?;
        let did = state.did_for_access(xrpc::LIST_NOTIFICATIONS, access_token)?;
        let notifications = state
            .notifications
            .get(&did)
            .map(|items| items.iter().take(limit as usize).cloned().collect())
            .unwrap_or_default();
        Ok(ListNotificationsResponse {
            notifications,
            cursor: None,
        })
    }

    fn resolve_handle(&self, handle: &str) -> XrpcResult<ResolveHandleResponse> {
        let state = self.begin(ApiCall::ResolveHandle, xrpc::RESOLVE_HANDLE)?;
        state
            .handles
            .iter()
            .find(|(known, _)| known.eq_ignore_ascii_case(handle))
            .map(|(_, did)| ResolveHandleResponse { did: did.clone() })
            .ok_or_else(|| {
                XrpcError::status(
                    xrpc::RESOLVE_HANDLE,
                    400,
                    Some("InvalidRequest"),
                    Some("Unable to resolve handle"),
                )
            })
    }

    fn get_list(
        &self,
        access_token: &str,
        list_uri: &str,
        limit: u32,
    ) -> XrpcResult<GetListResponse> {
        let state = self.begin(ApiCall::GetList, xrpc::GET_LIST)?;
        state.did_for_access(xrpc::GET_LIST, access_token)?;
        let matching: Vec<&FakeListItem> = state
            .list_items
            .iter()
            .filter(|item| item.list == list_uri)
            .collect();
        let items = matching
            .iter()
            .rev()
            .take(limit as usize)
            .map(|item| ListItemView {
                uri: item.uri.clone(),
                subject: ProfileBasic {
                    did: item.subject.clone(),
                    handle: None,
                },
            })
            .collect();
        let cursor = (matching.len() > limit as usize).then(|| "more".to_string());
        Ok(GetListResponse {
            list: ListView {
                uri: list_uri.to_string(),
                name: None,
            },
            items,
            cursor,
        })
    }

    fn create_list_item(
        &self,
        access_token: &str,
        repo_did: &str,
        record: &ListItemRecord,
    ) -> XrpcResult<CreateRecordResponse> {
        let mut state = self.begin(ApiCall::CreateRecord, xrpc::CREATE_RECORD)?;
        let did = state.did_for_access(xrpc::CREATE_RECORD, access_token)?;
        if did != repo_did {
            return Err(XrpcError::status(
                xrpc::CREATE_RECORD,
                400,
                Some("InvalidRequest"),
                Some("repo does not match session"),
            ));
        }
        let uri = format!(
            "at://{}/{}/{}",
            repo_did,
            xrpc::LISTITEM_COLLECTION,
            state.list_items.len()
        );
        state.list_items.push(FakeListItem {
            list: record.list.clone(),
            subject: record.subject.clone(),
            uri: uri.clone(),
        });
        Ok(CreateRecordResponse { uri, cid: None })
    }
}
