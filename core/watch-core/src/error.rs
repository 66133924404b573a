//! Error types for blockwatch-core operations.

use std::path::PathBuf;

use crate::client::XrpcError;

/// All errors that can occur in the detection and synchronization pipeline.
///
/// Inside a tick these are logged and the scheduler moves on to the next
/// account or message. Only configuration errors and a list owner that cannot
/// log in stop the process.
#[derive(Debug, thiserror::Error)]
pub enum WatchError {
    // ─────────────────────────────────────────────────────────────────────
    // Configuration Errors
    // ─────────────────────────────────────────────────────────────────────
    #[error("Configuration invalid: {key}: {details}")]
    Config { key: String, details: String },

    // ─────────────────────────────────────────────────────────────────────
    // Pipeline Errors
    // ─────────────────────────────────────────────────────────────────────
    #[error("Authentication failed for {handle}: {source}")]
    Authentication {
        handle: String,
        #[source]
        source: XrpcError,
    },

    #[error("Could not resolve handle {handle}: {source}")]
    Resolution {
        handle: String,
        #[source]
        source: XrpcError,
    },

    #[error("Membership check failed for {list}: {source}")]
    MembershipCheck {
        list: String,
        #[source]
        source: XrpcError,
    },

    #[error("List item creation failed for {subject}: {source}")]
    ListWrite {
        subject: String,
        #[source]
        source: XrpcError,
    },

    #[error("Account {0} has no active session")]
    NoSession(String),

    // ─────────────────────────────────────────────────────────────────────
    // Persistence Errors
    // ─────────────────────────────────────────────────────────────────────
    #[error("Persistence failed: {path}: {details}")]
    Persistence { path: PathBuf, details: String },

    #[error("JSON parsing error: {context}: {source}")]
    Json {
        context: String,
        #[source]
        source: serde_json::Error,
    },

    #[error(transparent)]
    Xrpc(#[from] XrpcError),
}

impl WatchError {
    pub fn config(key: &str, details: impl Into<String>) -> Self {
        WatchError::Config {
            key: key.to_string(),
            details: details.into(),
        }
    }

    /// True when the underlying upstream failure means the token is no longer usable.
    pub fn is_auth_failure(&self) -> bool {
        match self {
            WatchError::Authentication { .. } => true,
            WatchError::MembershipCheck { source, .. } | WatchError::ListWrite { source, .. } => {
                source.is_auth_failure()
            }
            WatchError::Xrpc(source) => source.is_auth_failure(),
            _ => false,
        }
    }
}

/// Convenience type alias for Results using WatchError.
pub type Result<T> = std::result::Result<T, WatchError>;
