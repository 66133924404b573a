//! Compiled regex patterns for parsing notification text and list resources.
//!
//! Update these when the notification service changes its wording.

use once_cell::sync::Lazy;
use regex::Regex;

// ═══════════════════════════════════════════════════════════════════════════════
// Notification Text
// ═══════════════════════════════════════════════════════════════════════════════

/// `@handle has blocked you`
pub static RE_BLOCK_NOTICE: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?i)@([A-Za-z0-9_.\-]+)\s+has blocked you").unwrap());

/// `@handle has added you to the "Some List" moderation list`
pub static RE_LIST_NOTICE: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r#"(?i)@([A-Za-z0-9_.\-]+)\s+has added you to the ["“][^"”]*["”]\s+moderation list"#)
        .unwrap()
});

// ═══════════════════════════════════════════════════════════════════════════════
// List Resources
// ═══════════════════════════════════════════════════════════════════════════════

pub static RE_LIST_AT_URI: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^at://([^/\s]+)/app\.bsky\.graph\.list/([A-Za-z0-9._:~\-]+)$").unwrap()
});

pub static RE_LIST_WEB_URL: Lazy<Regex> = Lazy::new(|| {
    Regex::new(r"^https?://(?:www\.)?bsky\.app/profile/([^/\s]+)/lists/([A-Za-z0-9._:~\-]+)/?$")
        .unwrap()
});
