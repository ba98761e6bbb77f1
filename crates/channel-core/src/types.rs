use std::collections::BTreeMap;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Channel lifecycle state reported to the presentation layer.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
pub enum ChannelLifecycleState {
    /// Controller exists but `initialize` has not run yet.
    #[default]
    Cold,
    /// Initial watch/hydration is in flight.
    Connecting,
    /// Channel state is loaded and the event listener is attached.
    Active,
    /// Initial watch failed; the channel shows an error instead of a timeline.
    Errored,
    /// Channel was torn down; late completions must not mutate state.
    Disposed,
}

/// Delivery status of a message.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum MessageStatus {
    /// Optimistically inserted, not yet confirmed by the server.
    Sending,
    /// Confirmed by the server.
    #[default]
    Received,
    /// Network send failed; the message stays visible so it can be retried.
    Failed,
}

/// Message type as reported by the server.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, Default)]
#[serde(rename_all = "lowercase")]
pub enum MessageKind {
    /// Ordinary user message.
    #[default]
    Regular,
    /// Only visible to the current user, never persisted server side.
    Ephemeral,
    /// Server-generated error message (for example a blocked command).
    Error,
    /// Thread reply.
    Reply,
    /// System notice.
    System,
    /// Soft-deleted message kept as a tombstone.
    Deleted,
}

/// Author or participant reference.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct UserRef {
    /// Stable user id.
    pub id: String,
    /// Optional display name.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub name: Option<String>,
}

impl UserRef {
    pub fn new(id: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            name: None,
        }
    }
}

/// Message attachment. Unknown attachment fields are preserved verbatim.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct Attachment {
    /// Attachment type, for example `image` or `file`.
    #[serde(rename = "type", default, skip_serializing_if = "Option::is_none")]
    pub kind: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub asset_url: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub title: Option<String>,
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Canonical message payload shared by the main timeline and threads.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct Message {
    /// Client-generated for optimistic sends, server-assigned otherwise.
    pub id: String,
    #[serde(default)]
    pub text: String,
    #[serde(default)]
    pub attachments: Vec<Attachment>,
    #[serde(default)]
    pub status: MessageStatus,
    #[serde(rename = "type", default)]
    pub kind: MessageKind,
    #[serde(default)]
    pub user: UserRef,
    /// Creation time in milliseconds since Unix epoch; primary sort key.
    #[serde(default)]
    pub created_at_ms: u64,
    /// Thread root id, present iff this message is a thread reply.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<String>,
    /// Thread reply that is also shown in the main timeline.
    #[serde(default)]
    pub show_in_channel: bool,
    #[serde(default)]
    pub mentioned_users: Vec<UserRef>,
    #[serde(default)]
    pub reaction_counts: BTreeMap<String, u64>,
    #[serde(default)]
    pub reply_count: u64,
    /// Fields this core does not interpret, kept verbatim.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

impl Message {
    /// Build a server-confirmed regular message.
    pub fn new(
        id: impl Into<String>,
        user: UserRef,
        text: impl Into<String>,
        created_at_ms: u64,
    ) -> Self {
        Self {
            id: id.into(),
            text: text.into(),
            user,
            created_at_ms,
            ..Self::default()
        }
    }

    /// Turn this message into a reply of `parent_id`.
    pub fn with_parent(mut self, parent_id: impl Into<String>) -> Self {
        self.parent_id = Some(parent_id.into());
        self
    }

    pub fn with_status(mut self, status: MessageStatus) -> Self {
        self.status = status;
        self
    }

    pub fn with_kind(mut self, kind: MessageKind) -> Self {
        self.kind = kind;
        self
    }

    pub fn is_reply(&self) -> bool {
        self.parent_id.is_some()
    }

    /// Whether this message belongs in the main timeline.
    pub fn is_visible_in_channel(&self) -> bool {
        self.parent_id.is_none() || self.show_in_channel
    }
}

/// Channel membership record.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct Member {
    pub user: UserRef,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub role: Option<String>,
}

impl Member {
    pub fn new(user: UserRef) -> Self {
        Self { user, role: None }
    }
}

/// Last-read marker for one user.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct ReadState {
    pub user: UserRef,
    pub last_read_ms: u64,
}

/// Active typing indicator for one user.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Default)]
pub struct TypingIndicator {
    pub user: UserRef,
    pub started_at_ms: u64,
}

/// Per-channel feature switches reported by the server.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub struct ChannelConfig {
    /// Read receipts enabled; `mark_read` is a no-op otherwise.
    pub read_events: bool,
    pub typing_events: bool,
    /// Thread replies enabled.
    pub replies: bool,
}

impl Default for ChannelConfig {
    fn default() -> Self {
        Self {
            read_events: true,
            typing_events: true,
            replies: true,
        }
    }
}

/// Full channel state returned by the initial watch call.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Default)]
pub struct ChannelSnapshot {
    #[serde(default)]
    pub messages: Vec<Message>,
    #[serde(default)]
    pub members: Vec<Member>,
    #[serde(default)]
    pub watchers: Vec<UserRef>,
    #[serde(default)]
    pub watcher_count: u64,
    #[serde(default)]
    pub read: Vec<ReadState>,
}

/// Page request for message and reply queries.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct QueryOptions {
    /// Maximum number of messages returned.
    pub limit: usize,
    /// Only return messages older than this id; `None` fetches from the head.
    pub id_lt: Option<String>,
}

impl QueryOptions {
    pub fn page(limit: usize, id_lt: Option<String>) -> Self {
        Self { limit, id_lt }
    }
}

/// Compose input used to build an optimistic preview.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct MessageInput {
    pub text: String,
    pub attachments: Vec<Attachment>,
    /// Thread root when replying inside a thread.
    pub parent: Option<Message>,
    pub mentioned_users: Vec<UserRef>,
    pub extra: Map<String, Value>,
}

impl MessageInput {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Self::default()
        }
    }

    pub fn in_thread(mut self, parent: Message) -> Self {
        self.parent = Some(parent);
        self
    }
}
