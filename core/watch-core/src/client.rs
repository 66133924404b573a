//! Network seam for every XRPC call the pipeline makes.
//!
//! Components depend on [`AtprotoApi`] rather than on HTTP directly so the
//! scheduler, backfill cutoff and list idempotency can be exercised with
//! [`crate::testing::FakeAtproto`] and no real network.

use std::time::Duration;

use blockwatch_xrpc_protocol::{
    self as xrpc, CreateRecordRequest, CreateRecordResponse, CreateSessionRequest,
    GetListResponse, GetMessagesResponse, GetSessionResponse, ListConvosResponse, ListItemRecord,
    ListNotificationsResponse, ResolveHandleResponse, SessionTokens, XrpcErrorBody,
};
use reqwest::blocking::{Client, RequestBuilder};
use serde::de::DeserializeOwned;
use serde::Serialize;

/// Transport-level failure of a single XRPC call.
#[derive(Debug, thiserror::Error)]
pub enum XrpcError {
    #[error("{method}: transport error: {source}")]
    Transport {
        method: String,
        #[source]
        source: reqwest::Error,
    },

    #[error(
        "{method} returned HTTP {status}: {}: {}",
        .error.as_deref().unwrap_or("UnknownError"),
        .message.as_deref().unwrap_or("no message")
    )]
    Status {
        method: String,
        status: u16,
        error: Option<String>,
        message: Option<String>,
    },

    #[error("{method}: unexpected response: {details}")]
    Decode { method: String, details: String },
}

impl XrpcError {
    pub fn status(method: &str, status: u16, error: Option<&str>, message: Option<&str>) -> Self {
        XrpcError::Status {
            method: method.to_string(),
            status,
            error: error.map(str::to_string),
            message: message.map(str::to_string),
        }
    }

    pub fn decode(method: &str, details: impl Into<String>) -> Self {
        XrpcError::Decode {
            method: method.to_string(),
            details: details.into(),
        }
    }

    /// True for 401s and for error names that mean the token must be replaced.
    pub fn is_auth_failure(&self) -> bool {
        match self {
            XrpcError::Status { status, error, .. } => {
                *status == 401
                    || error
                        .as_deref()
                        .map(|name| xrpc::AUTH_ERROR_NAMES.contains(&name))
                        .unwrap_or(false)
            }
            _ => false,
        }
    }
}

pub type XrpcResult<T> = std::result::Result<T, XrpcError>;

/// The XRPC operations blockwatch relies on.
///
/// Access tokens are passed per call; implementations hold no session state.
pub trait AtprotoApi: Send + Sync {
    fn create_session(&self, identifier: &str, password: &str) -> XrpcResult<SessionTokens>;

    /// Lightweight verification that an access token is still accepted.
    fn get_session(&self, access_token: &str) -> XrpcResult<GetSessionResponse>;

    fn refresh_session(&self, refresh_token: &str) -> XrpcResult<SessionTokens>;

    fn list_convos(&self, access_token: &str, limit: u32) -> XrpcResult<ListConvosResponse>;

    fn get_messages(
        &self,
        access_token: &str,
        convo_id: &str,
        limit: u32,
    ) -> XrpcResult<GetMessagesResponse>;

    fn list_notifications(
        &self,
        access_token: &str,
        limit: u32,
    ) -> XrpcResult<ListNotificationsResponse>;

    fn resolve_handle(&self, handle: &str) -> XrpcResult<ResolveHandleResponse>;

    fn get_list(&self, access_token: &str, list_uri: &str, limit: u32)
        -> XrpcResult<GetListResponse>;

    fn create_list_item(
        &self,
        access_token: &str,
        repo_did: &str,
        record: &ListItemRecord,
    ) -> XrpcResult<CreateRecordResponse>;
}

/// [`AtprotoApi`] over HTTPS with a blocking reqwest client.
#[derive(Clone)]
pub struct HttpAtprotoApi {
    base_url: String,
    http: Client,
}

impl std::fmt::Debug for HttpAtprotoApi {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("HttpAtprotoApi")
            .field("base_url", &self.base_url)
            .finish_non_exhaustive()
    }
}

impl HttpAtprotoApi {
    pub fn new(base_url: &str, timeout: Duration) -> XrpcResult<Self> {
        let http = Client::builder()
            .timeout(timeout)
            .user_agent(concat!("blockwatch/", env!("CARGO_PKG_VERSION")))
            .build()
            .map_err(|source| XrpcError::Transport {
                method: "client-builder".to_string(),
                source,
            })?;
        Ok(Self {
            base_url: normalize_base_url(base_url),
            http,
        })
    }

    pub fn base_url(&self) -> &str {
        &self.base_url
    }

    fn endpoint(&self, method: &str) -> String {
        format!("{}/xrpc/{}", self.base_url, method)
    }

    fn query<T: DeserializeOwned>(
        &self,
        method: &str,
        bearer: Option<&str>,
        params: &[(&str, String)],
        via_chat_proxy: bool,
    ) -> XrpcResult<T> {
        let mut request = self.http.get(self.endpoint(method)).query(params);
        if let Some(token) = bearer {
            request = request.bearer_auth(token);
        }
        if via_chat_proxy {
            request = request.header(xrpc::CHAT_PROXY_HEADER, xrpc::CHAT_PROXY_TARGET);
        }
        send_and_decode(method, request)
    }

    fn procedure<B: Serialize, T: DeserializeOwned>(
        &self,
        method: &str,
        bearer: Option<&str>,
        body: Option<&B>,
    ) -> XrpcResult<T> {
        let mut request = self.http.post(self.endpoint(method));
        if let Some(token) = bearer {
            request = request.bearer_auth(token);
        }
        if let Some(body) = body {
            request = request.json(body);
        }
        send_and_decode(method, request)
    }
}

impl AtprotoApi for HttpAtprotoApi {
    fn create_session(&self, identifier: &str, password: &str) -> XrpcResult<SessionTokens> {
        let body = CreateSessionRequest {
            identifier: identifier.to_string(),
            password: password.to_string(),
        };
        self.procedure(xrpc::CREATE_SESSION, None, Some(&body))
    }

    fn get_session(&self, access_token: &str) -> XrpcResult<GetSessionResponse> {
        self.query(xrpc::GET_SESSION, Some(access_token), &[], false)
    }

    fn refresh_session(&self, refresh_token: &str) -> XrpcResult<SessionTokens> {
        self.procedure::<(), _>(xrpc::REFRESH_SESSION, Some(refresh_token), None)
    }

    fn list_convos(&self, access_token: &str, limit: u32) -> XrpcResult<ListConvosResponse> {
        self.query(
            xrpc::LIST_CONVOS,
            Some(access_token),
            &[("limit", clamp_limit(limit))],
            true,
        )
    }

    fn get_messages(
        &self,
        access_token: &str,
        convo_id: &str,
        limit: u32,
    ) -> XrpcResult<GetMessagesResponse> {
        self.query(
            xrpc::GET_MESSAGES,
            Some(access_token),
            &[
                ("convoId", convo_id.to_string()),
                ("limit", clamp_limit(limit)),
            ],
            true,
        )
    }

    fn list_notifications(
        &self,
        access_token: &str,
        limit: u32,
    ) -> XrpcResult<ListNotificationsResponse> {
        self.query(
            xrpc::LIST_NOTIFICATIONS,
            Some(access_token),
            &[("limit", clamp_limit(limit))],
            false,
        )
    }

    fn resolve_handle(&self, handle: &str) -> XrpcResult<ResolveHandleResponse> {
        self.query(
            xrpc::RESOLVE_HANDLE,
            None,
            &[("handle", handle.to_string())],
            false,
        )
    }

    fn get_list(
        &self,
        access_token: &str,
        list_uri: &str,
        limit: u32,
    ) -> XrpcResult<GetListResponse> {
        self.query(
            xrpc::GET_LIST,
            Some(access_token),
            &[("list", list_uri.to_string()), ("limit", clamp_limit(limit))],
            false,
        )
    }

    fn create_list_item(
        &self,
        access_token: &str,
        repo_did: &str,
        record: &ListItemRecord,
    ) -> XrpcResult<CreateRecordResponse> {
        let body = CreateRecordRequest {
            repo: repo_did.to_string(),
            collection: xrpc::LISTITEM_COLLECTION.to_string(),
            record,
        };
        self.procedure(xrpc::CREATE_RECORD, Some(access_token), Some(&body))
    }
}

fn send_and_decode<T: DeserializeOwned>(method: &str, request: RequestBuilder) -> XrpcResult<T> {
    let response = request.send().map_err(|source| XrpcError::Transport {
        method: method.to_string(),
        source,
    })?;
    let status = response.status();
    let body = response.text().map_err(|source| XrpcError::Transport {
        method: method.to_string(),
        source,
    })?;

    if !status.is_success() {
        let parsed: XrpcErrorBody = serde_json::from_str(&body).unwrap_or_default();
        return Err(XrpcError::status(
            method,
            status.as_u16(),
            parsed.error.as_deref(),
            parsed.message.as_deref(),
        ));
    }

    serde_json::from_str(&body).map_err(|err| XrpcError::decode(method, err.to_string()))
}

fn clamp_limit(limit: u32) -> String {
    limit.clamp(1, xrpc::MAX_PAGE_LIMIT).to_string()
}

fn normalize_base_url(raw: &str) -> String {
    raw.trim().trim_end_matches('/').to_string()
}
