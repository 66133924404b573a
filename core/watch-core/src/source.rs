//! Candidate-message retrieval with channel fallback.
//!
//! The direct-message channel is tried first. Any failure there (transport,
//! response shape, or no conversation with the notification service) falls
//! back to mention notifications. The channels are never merged: whichever one
//! delivers is authoritative for that poll.

use std::sync::Arc;

use tracing::debug;

use blockwatch_xrpc_protocol::ProfileBasic;

use crate::client::{AtprotoApi, XrpcError, XrpcResult};
use crate::config::ServiceIdentity;
use crate::types::{CandidateMessage, Channel, Session};

const CONVO_SCAN_LIMIT: u32 = 10;

/// Why a channel produced nothing usable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChannelFailure {
    pub reason: String,
    pub auth_expired: bool,
}

impl ChannelFailure {
    fn from_xrpc(err: &XrpcError) -> Self {
        Self {
            reason: err.to_string(),
            auth_expired: err.is_auth_failure(),
        }
    }

    fn missing(reason: &str) -> Self {
        Self {
            reason: reason.to_string(),
            auth_expired: false,
        }
    }
}

/// Result of trying one channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelAttempt {
    Delivered(Vec<CandidateMessage>),
    Unavailable(ChannelFailure),
}

/// Result of a full fetch across both channels.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum FetchOutcome {
    Delivered {
        channel: Channel,
        messages: Vec<CandidateMessage>,
    },
    Unavailable {
        direct_messages: ChannelFailure,
        mentions: ChannelFailure,
    },
}

impl FetchOutcome {
    pub fn auth_expired(&self) -> bool {
        match self {
            FetchOutcome::Delivered { .. } => false,
            FetchOutcome::Unavailable {
                direct_messages,
                mentions,
            } => direct_messages.auth_expired || mentions.auth_expired,
        }
    }
}

/// One direct-message conversation, as seen by `inspect-dms`.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ConversationSummary {
    pub id: String,
    pub members: Vec<ProfileBasic>,
    pub is_service: bool,
}

pub struct NotificationSource {
    api: Arc<dyn AtprotoApi>,
    service: ServiceIdentity,
}

impl NotificationSource {
    pub fn new(api: Arc<dyn AtprotoApi>, service: ServiceIdentity) -> Self {
        Self { api, service }
    }

    pub fn fetch(&self, session: &Session, limit: u32) -> FetchOutcome {
        let direct_messages = match self.direct_messages(session, limit) {
            ChannelAttempt::Delivered(messages) => {
                return FetchOutcome::Delivered {
                    channel: Channel::DirectMessages,
                    messages,
                }
            }
            ChannelAttempt::Unavailable(failure) => failure,
        };

        debug!(
            handle = %session.handle,
            reason = %direct_messages.reason,
            "Direct-message channel unavailable; falling back to mentions"
        );

        match self.mentions(session, limit) {
            ChannelAttempt::Delivered(messages) => FetchOutcome::Delivered {
                channel: Channel::Mentions,
                messages,
            },
            ChannelAttempt::Unavailable(mentions) => FetchOutcome::Unavailable {
                direct_messages,
                mentions,
            },
        }
    }

    pub fn direct_messages(&self, session: &Session, limit: u32) -> ChannelAttempt {
        let convos = match self.api.list_convos(&session.access_token, CONVO_SCAN_LIMIT) {
            Ok(response) => response.convos,
            Err(err) => return ChannelAttempt::Unavailable(ChannelFailure::from_xrpc(&err)),
        };

        let partner = convos.iter().find_map(|convo| {
            self.find_service_member(convo.members.iter().map(|m| (m.did.as_str(), m.handle.as_deref())))
                .map(|did| (convo.id.clone(), did))
        });
        let Some((convo_id, partner_did)) = partner else {
            return ChannelAttempt::Unavailable(ChannelFailure::missing(
                "no conversation with the notification service",
            ));
        };

        let response = match self
            .api
            .get_messages(&session.access_token, &convo_id, limit)
        {
            Ok(response) => response,
            Err(err) => return ChannelAttempt::Unavailable(ChannelFailure::from_xrpc(&err)),
        };

        let messages = response
            .messages
            .into_iter()
            .filter(|message| {
                message
                    .sender
                    .as_ref()
                    .map(|sender| sender.did == partner_did)
                    .unwrap_or(false)
            })
            .filter_map(|message| {
                let text = message.text?;
                Some(CandidateMessage {
                    id: message.id,
                    text,
                    raw_timestamp: message.sent_at,
                    channel: Channel::DirectMessages,
                })
            })
            .collect();

        ChannelAttempt::Delivered(messages)
    }

    pub fn mentions(&self, session: &Session, limit: u32) -> ChannelAttempt {
        let response = match self.api.list_notifications(&session.access_token, limit) {
            Ok(response) => response,
            Err(err) => return ChannelAttempt::Unavailable(ChannelFailure::from_xrpc(&err)),
        };

        let messages = response
            .notifications
            .iter()
            .filter(|notification| notification.reason == "mention")
            .filter(|notification| {
                self.service
                    .matches(&notification.author.did, notification.author.handle.as_deref())
            })
            .filter_map(|notification| {
                let text = notification.record_text()?;
                Some(CandidateMessage {
                    id: Some(notification.uri.clone()),
                    text: text.to_string(),
                    raw_timestamp: notification.timestamp().map(str::to_string),
                    channel: Channel::Mentions,
                })
            })
            .collect();

        ChannelAttempt::Delivered(messages)
    }

    /// Lists the first conversations and flags those that include the service.
    pub fn conversations(&self, session: &Session) -> XrpcResult<Vec<ConversationSummary>> {
        let convos = self
            .api
            .list_convos(&session.access_token, CONVO_SCAN_LIMIT)?
            .convos;
        Ok(convos
            .into_iter()
            .map(|convo| {
                let is_service = convo
                    .members
                    .iter()
                    .any(|m| self.service.matches(&m.did, m.handle.as_deref()));
                ConversationSummary {
                    id: convo.id,
                    members: convo.members,
                    is_service,
                }
            })
            .collect())
    }

    /// DID of the service among `members`: an exact DID match wins over a handle hint.
    fn find_service_member<'a>(
        &self,
        members: impl Iterator<Item = (&'a str, Option<&'a str>)> + Clone,
    ) -> Option<String> {
        members
            .clone()
            .find(|(did, _)| *did == self.service.did)
            .or_else(|| members.clone().find(|(did, handle)| self.service.matches(did, *handle)))
            .map(|(did, _)| did.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{ApiCall, FakeAtproto};
    use chrono::{TimeZone, Utc};

    const SERVICE_DID: &str = "did:plc:service";
    const ALICE_DID: &str = "did:plc:alice";

    fn service() -> ServiceIdentity {
        ServiceIdentity {
            did: SERVICE_DID.to_string(),
            handle_hint: "listifications".to_string(),
        }
    }

    fn setup() -> (Arc<FakeAtproto>, Session) {
        let api = Arc::new(FakeAtproto::new());
        api.add_account("alice.test", "pw", ALICE_DID);
        let tokens = api.create_session("alice.test", "pw").expect("login");
        let session = Session::from_tokens(
            tokens,
            Utc.with_ymd_and_hms(2026, 1, 31, 12, 0, 0).unwrap(),
            chrono::Duration::minutes(120),
        );
        api.clear_calls();
        (api, session)
    }

    #[test]
    fn direct_messages_from_the_service_are_delivered() {
        let (api, session) = setup();
        api.add_convo(ALICE_DID, "c-other", "did:plc:friend", "friend.test");
        api.add_convo(ALICE_DID, "c-svc", SERVICE_DID, "listifications.app");
        api.add_message("c-svc", "m1", SERVICE_DID, "@x.test has blocked you", "2026-01-31T11:00:00Z");
        api.add_message("c-svc", "m2", ALICE_DID, "thanks!", "2026-01-31T11:01:00Z");

        let source = NotificationSource::new(api.clone(), service());
        let outcome = source.fetch(&session, 20);

        match outcome {
            FetchOutcome::Delivered { channel, messages } => {
                assert_eq!(channel, Channel::DirectMessages);
                assert_eq!(messages.len(), 1);
                assert_eq!(messages[0].id.as_deref(), Some("m1"));
                assert_eq!(messages[0].raw_timestamp.as_deref(), Some("2026-01-31T11:00:00Z"));
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
        assert_eq!(api.count(ApiCall::ListNotifications), 0);
    }

    #[test]
    fn conversation_is_found_by_handle_hint_when_did_differs() {
        let (api, session) = setup();
        api.add_convo(ALICE_DID, "c-svc", "did:plc:rotated", "Listifications.bsky.social");
        api.add_message("c-svc", "m1", "did:plc:rotated", "@x.test has blocked you", "2026-01-31T11:00:00Z");

        let source = NotificationSource::new(api.clone(), service());
        let ChannelAttempt::Delivered(messages) = source.direct_messages(&session, 20) else {
            panic!("expected delivery");
        };
        assert_eq!(messages.len(), 1);
    }

    #[test]
    fn missing_conversation_falls_back_to_mentions() {
        let (api, session) = setup();
        api.add_notification(
            ALICE_DID,
            "at://did:plc:service/app.bsky.feed.post/1",
            SERVICE_DID,
            "listifications.app",
            "mention",
            "@x.test has blocked you",
            "2026-01-31T11:00:00Z",
        );
        api.add_notification(
            ALICE_DID,
            "at://did:plc:service/app.bsky.feed.post/2",
            SERVICE_DID,
            "listifications.app",
            "like",
            "@y.test has blocked you",
            "2026-01-31T11:00:00Z",
        );
        api.add_notification(
            ALICE_DID,
            "at://did:plc:rando/app.bsky.feed.post/3",
            "did:plc:rando",
            "rando.test",
            "mention",
            "@z.test has blocked you",
            "2026-01-31T11:00:00Z",
        );

        let source = NotificationSource::new(api.clone(), service());
        match source.fetch(&session, 50) {
            FetchOutcome::Delivered { channel, messages } => {
                assert_eq!(channel, Channel::Mentions);
                assert_eq!(messages.len(), 1);
                assert_eq!(
                    messages[0].id.as_deref(),
                    Some("at://did:plc:service/app.bsky.feed.post/1")
                );
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }

    #[test]
    fn transport_failure_on_dms_falls_back_without_merging() {
        let (api, session) = setup();
        api.add_convo(ALICE_DID, "c-svc", SERVICE_DID, "listifications.app");
        api.add_message("c-svc", "m1", SERVICE_DID, "@dm.test has blocked you", "2026-01-31T11:00:00Z");
        api.add_notification(
            ALICE_DID,
            "at://post/1",
            SERVICE_DID,
            "listifications.app",
            "mention",
            "@mention.test has blocked you",
            "2026-01-31T11:00:00Z",
        );
        api.fail(ApiCall::GetMessages);

        let source = NotificationSource::new(api.clone(), service());
        let FetchOutcome::Delivered { channel, messages } = source.fetch(&session, 20) else {
            panic!("expected delivery");
        };
        assert_eq!(channel, Channel::Mentions);
        assert_eq!(messages.len(), 1);
        assert_eq!(messages[0].text, "@mention.test has blocked you");
    }

    #[test]
    fn empty_dm_conversation_is_authoritative() {
        let (api, session) = setup();
        api.add_convo(ALICE_DID, "c-svc", SERVICE_DID, "listifications.app");

        let source = NotificationSource::new(api.clone(), service());
        let outcome = source.fetch(&session, 20);
        assert_eq!(
            outcome,
            FetchOutcome::Delivered {
                channel: Channel::DirectMessages,
                messages: Vec::new(),
            }
        );
        assert_eq!(api.count(ApiCall::ListNotifications), 0);
    }

    #[test]
    fn conversations_flag_the_service() {
        let (api, session) = setup();
        api.add_convo(ALICE_DID, "c-other", "did:plc:friend", "friend.test");
        api.add_convo(ALICE_DID, "c-svc", SERVICE_DID, "listifications.app");

        let source = NotificationSource::new(api, service());
        let summaries = source.conversations(&session).expect("conversations");
        let flags: Vec<_> = summaries.iter().map(|c| (c.id.as_str(), c.is_service)).collect();
        assert_eq!(flags, vec![("c-other", false), ("c-svc", true)]);
    }

    #[test]
    fn both_channels_failing_reports_auth_expiry() {
        let (api, session) = setup();
        api.revoke_token(&session.access_token);

        let source = NotificationSource::new(api.clone(), service());
        let outcome = source.fetch(&session, 20);
        assert!(matches!(outcome, FetchOutcome::Unavailable { .. }));
        assert!(outcome.auth_expired());
    }
}
