//! Event extraction from notification text.
//!
//! Patterns are tried in a fixed order: block notices first, then
//! moderation-list additions. The first match wins.

use crate::patterns::{RE_BLOCK_NOTICE, RE_LIST_NOTICE};
use crate::types::{ModerationAction, NotificationEvent};

/// Offender and action parsed from a single message.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Detection {
    pub offender_handle: String,
    pub action: ModerationAction,
}

impl Detection {
    pub fn into_event(self, target_handle: &str, is_backfill: bool) -> NotificationEvent {
        NotificationEvent {
            offender_handle: self.offender_handle,
            action: self.action,
            target_handle: target_handle.to_string(),
            is_backfill,
        }
    }
}

pub fn extract(text: &str) -> Option<Detection> {
    let patterns = [
        (&*RE_BLOCK_NOTICE, ModerationAction::Blocked),
        (&*RE_LIST_NOTICE, ModerationAction::AddedToList),
    ];

    patterns.into_iter().find_map(|(pattern, action)| {
        pattern.captures(text).map(|captures| Detection {
            offender_handle: captures[1].to_string(),
            action,
        })
    })
}
