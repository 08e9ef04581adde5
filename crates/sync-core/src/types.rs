use std::fmt;

use serde::{Deserialize, Deserializer, Serialize};

/// Server-assigned thread identifier.
pub type ThreadId = u64;
/// Server-assigned message identifier (`0` while a message is pending).
pub type MessageId = u64;
/// Server-assigned user identifier.
pub type UserId = u64;

/// One chat message, either confirmed by the server or optimistically created.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Message {
    /// Server id, `0` while pending.
    pub id: MessageId,
    /// Owning thread.
    pub thread_id: ThreadId,
    /// Author user id.
    pub sender_user_id: UserId,
    /// Plain-text body.
    pub content: String,
    /// Creation time in milliseconds since Unix epoch.
    pub created_at: i64,
    /// `true` until the server confirms the message.
    #[serde(default)]
    pub pending: bool,
    /// Client idempotency key. Always set on pending messages; confirmed rows
    /// carry it only when the server echoes the key back.
    #[serde(
        default,
        alias = "requestId",
        deserialize_with = "string_or_null",
        skip_serializing_if = "String::is_empty"
    )]
    pub local_request_id: String,
    /// Process-local creation sequence, the last sort tiebreaker.
    #[serde(skip)]
    pub local_seq: u64,
}

impl Message {
    /// Identity key used for dedup during merges.
    pub fn key(&self) -> MessageKey {
        if self.pending {
            MessageKey::Local(self.local_request_id.clone())
        } else {
            MessageKey::Server(self.id)
        }
    }

    /// Check the pending/id invariant.
    pub fn validate(&self) -> bool {
        if self.pending {
            self.id == 0 && !self.local_request_id.is_empty()
        } else {
            self.id > 0
        }
    }
}

/// Identity of a message for dedup: `srv:{id}` or `local:{request_id}`.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MessageKey {
    Server(MessageId),
    Local(String),
}

impl fmt::Display for MessageKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Server(id) => write!(f, "srv:{id}"),
            Self::Local(request_id) => write!(f, "local:{request_id}"),
        }
    }
}

/// The other participant of a two-party thread.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct ThreadUser {
    pub id: UserId,
    #[serde(default)]
    pub display_name: Option<String>,
    #[serde(default)]
    pub avatar_url: Option<String>,
}

/// Conversation list row with its latest-message preview.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct Thread {
    pub id: ThreadId,
    #[serde(default)]
    pub last_message_at: Option<i64>,
    #[serde(default)]
    pub last_message_id: Option<MessageId>,
    #[serde(default)]
    pub last_message_content: Option<String>,
    #[serde(default)]
    pub last_message_sender_user_id: Option<UserId>,
    pub other_user: ThreadUser,
}

/// `GET /threads` response body.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct ThreadListResponse {
    #[serde(default)]
    pub ok: bool,
    #[serde(default)]
    pub threads: Vec<Thread>,
}

/// `POST /threads` response body.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "camelCase")]
pub struct CreateThreadResponse {
    #[serde(default)]
    pub ok: bool,
    pub thread_id: ThreadId,
}

/// `GET /threads/:id/messages` response body.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "camelCase")]
pub struct MessagePage {
    #[serde(default)]
    pub ok: bool,
    #[serde(default)]
    pub messages: Vec<Message>,
    #[serde(default)]
    pub has_more: bool,
    #[serde(default)]
    pub next_before_id: Option<MessageId>,
}

/// `POST /threads/:id/messages` response body.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SendMessageResponse {
    #[serde(default)]
    pub ok: bool,
    pub message: Message,
}

/// Query parameters for one message window fetch.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct MessageQuery {
    /// Maximum number of rows.
    pub limit: u16,
    /// Exclusive upper bound; `None` returns the newest window.
    pub before_id: Option<MessageId>,
    /// Ask the server to mark the thread read.
    pub mark_read: bool,
}

impl MessageQuery {
    pub fn newest(limit: u16, mark_read: bool) -> Self {
        Self {
            limit,
            before_id: None,
            mark_read,
        }
    }

    pub fn before(before_id: MessageId, limit: u16) -> Self {
        Self {
            limit,
            before_id: Some(before_id),
            mark_read: false,
        }
    }
}

/// Named event received from the push channel.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum PushEvent {
    /// Stream is open and subscribed.
    Ready,
    /// A thread changed. `None` when the payload was missing or malformed.
    Chat { thread_id: Option<ThreadId> },
    /// Keep-alive.
    Heartbeat,
}

/// Realtime channel connection state.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum RealtimeState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

/// Result of a fetch that may race with thread switches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadOutcome {
    /// Response applied; carries the number of rows received.
    Applied { received: usize },
    /// Guard prevented the request (nothing open, no older rows, already in flight).
    Skipped,
    /// Response arrived after a newer selection or refresh and was dropped.
    Stale,
}

impl LoadOutcome {
    pub fn is_applied(&self) -> bool {
        matches!(self, Self::Applied { .. })
    }
}

/// How `select_thread` populated the view.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SelectOutcome {
    /// Restored from the view cache without a network call.
    Restored,
    /// Loaded through the initial window fetch.
    Loaded(LoadOutcome),
}

/// Acknowledgement for an optimistic send.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct SendAck {
    /// Idempotency key of the pending message.
    pub local_request_id: String,
    pub thread_id: ThreadId,
    /// Confirmed server id on success.
    pub message_id: Option<MessageId>,
    /// Stable error code on failure.
    pub error_code: Option<String>,
    /// User-facing failure text.
    pub error_text: Option<String>,
}

/// Command channel input accepted by the sync runtime.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum SyncCommand {
    /// Refresh the conversation list.
    RefreshThreads,
    /// Create (or reuse) a thread with a user without opening it.
    CreateThread { target_user_id: UserId },
    /// Create or reuse the thread with a user and open it.
    OpenConversationWith { target_user_id: UserId },
    /// Open a thread.
    SelectThread { thread_id: ThreadId },
    /// Fetch one page of older history.
    LoadOlder,
    /// Auto-backfill while the viewport has no scrollbar.
    Backfill,
    /// Refresh the newest window of the open thread.
    RefreshLatest,
    /// Send a message to the open thread.
    SendMessage { content: String },
    /// Tab visibility changed.
    SetVisibility { visible: bool },
    /// Record the current distance from the bottom of the message list.
    RecordScroll { distance_to_bottom: f64 },
    /// Tear down timers and the push channel.
    Dispose,
}

/// Event channel output emitted by the engine.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub enum SyncEvent {
    /// Conversation list replaced, sorted by recency.
    ThreadListUpdated { threads: Vec<Thread> },
    /// Rendered message list of the open thread changed.
    MessagesUpdated {
        thread_id: ThreadId,
        messages: Vec<Message>,
    },
    /// Optimistic send finished.
    SendAck(SendAck),
    /// Best-effort signal for unread badges.
    MessagesViewed { thread_id: ThreadId },
    /// Realtime connection state changed.
    RealtimeChanged { state: RealtimeState },
    /// A request was rejected as unauthenticated.
    SignInRequired,
    /// A background operation failed; state did not update this cycle.
    Error {
        code: String,
        message: String,
        user_message: String,
    },
}

fn string_or_null<'de, D>(deserializer: D) -> Result<String, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<String>::deserialize(deserializer)?.unwrap_or_default())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn formats_identity_keys() {
        assert_eq!(MessageKey::Server(42).to_string(), "srv:42");
        assert_eq!(MessageKey::Local("abc".into()).to_string(), "local:abc");
    }

    #[test]
    fn decodes_message_page_with_echoed_request_id() {
        let page: MessagePage = serde_json::from_str(
            r#"{"ok":true,"hasMore":true,"nextBeforeId":7,"messages":[
                {"id":7,"threadId":3,"senderUserId":9,"content":"hey","createdAt":1700000000000,"requestId":"r-1"},
                {"id":8,"threadId":3,"senderUserId":9,"content":"yo","createdAt":1700000001000,"requestId":null}
            ]}"#,
        )
        .expect("page should decode");

        assert!(page.has_more);
        assert_eq!(page.next_before_id, Some(7));
        assert_eq!(page.messages[0].local_request_id, "r-1");
        assert_eq!(page.messages[1].local_request_id, "");
        assert!(!page.messages[0].pending);
        assert_eq!(page.messages[0].key(), MessageKey::Server(7));
    }

    #[test]
    fn validates_pending_invariant() {
        let mut message = Message {
            id: 0,
            thread_id: 1,
            sender_user_id: 1,
            content: "x".into(),
            created_at: 0,
            pending: true,
            local_request_id: "r".into(),
            local_seq: 1,
        };
        assert!(message.validate());

        message.local_request_id.clear();
        assert!(!message.validate());

        message.pending = false;
        assert!(!message.validate());
        message.id = 5;
        assert!(message.validate());
    }

    #[test]
    fn decodes_thread_with_missing_preview() {
        let threads: ThreadListResponse = serde_json::from_str(
            r#"{"ok":true,"threads":[{"id":4,"otherUser":{"id":12,"displayName":"Rin"}}]}"#,
        )
        .expect("thread list should decode");
        assert_eq!(threads.threads[0].last_message_at, None);
        assert_eq!(
            threads.threads[0].other_user.display_name.as_deref(),
            Some("Rin")
        );
    }
}
