//! Canonical form of the target moderation list.
//!
//! Operators paste either the web address of the list or its `at://` resource
//! URI. Both are normalized once at load time to
//! `at://{authority}/app.bsky.graph.list/{rkey}`.

use crate::error::{Result, WatchError};
use crate::patterns::{RE_LIST_AT_URI, RE_LIST_WEB_URL};
use blockwatch_xrpc_protocol::LIST_COLLECTION;

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListUri {
    authority: String,
    rkey: String,
}

impl ListUri {
    pub fn parse(input: &str) -> Result<Self> {
        let trimmed = strip_query_and_fragment(input.trim());

        let captures = RE_LIST_AT_URI
            .captures(trimmed)
            .or_else(|| RE_LIST_WEB_URL.captures(trimmed))
            .ok_or_else(|| {
                WatchError::config(
                    "BLOCKERS_LIST_URI",
                    format!("not a list URI or list web address: {}", input.trim()),
                )
            })?;

        Ok(Self {
            authority: captures[1].to_string(),
            rkey: captures[2].to_string(),
        })
    }

    /// Repo that owns the list (a DID, or a handle when pasted from a web address).
    pub fn authority(&self) -> &str {
        &self.authority
    }

    pub fn rkey(&self) -> &str {
        &self.rkey
    }

    pub fn has_did_authority(&self) -> bool {
        self.authority.starts_with("did:")
    }

    pub fn as_at_uri(&self) -> String {
        format!("at://{}/{}/{}", self.authority, LIST_COLLECTION, self.rkey)
    }
}

impl std::fmt::Display for ListUri {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.as_at_uri())
    }
}

fn strip_query_and_fragment(value: &str) -> &str {
    if !value.starts_with("http") {
        return value;
    }
    let end = value.find(['?', '#']).unwrap_or(value.len());
    &value[..end]
}
