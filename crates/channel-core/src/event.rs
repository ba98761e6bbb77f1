use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;

use crate::types::{Member, Message, UserRef};

/// Errors produced while decoding a raw event payload.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum EventDecodeError {
    /// The payload is not an object or has no string `type` field.
    #[error("event payload has no string 'type' field")]
    MissingType,
    /// The payload has a known type but its body does not match.
    #[error("malformed '{kind}' event: {reason}")]
    Malformed { kind: String, reason: String },
}

/// Remote channel event delivered by the client event stream.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(tag = "type")]
pub enum ChannelEvent {
    #[serde(rename = "message.new")]
    MessageNew { message: Message },
    #[serde(rename = "message.updated")]
    MessageUpdated { message: Message },
    #[serde(rename = "message.deleted")]
    MessageDeleted { message: Message },
    #[serde(rename = "reaction.new")]
    ReactionNew { message: Message },
    #[serde(rename = "reaction.updated")]
    ReactionUpdated { message: Message },
    #[serde(rename = "reaction.deleted")]
    ReactionDeleted { message: Message },
    #[serde(rename = "member.added")]
    MemberAdded { member: Member },
    #[serde(rename = "member.updated")]
    MemberUpdated { member: Member },
    #[serde(rename = "member.removed")]
    MemberRemoved { member: Member },
    #[serde(rename = "typing.start")]
    TypingStart {
        user: UserRef,
        #[serde(default)]
        created_at_ms: u64,
    },
    #[serde(rename = "typing.stop")]
    TypingStop { user: UserRef },
    #[serde(rename = "message.read")]
    MessageRead {
        user: UserRef,
        #[serde(default)]
        created_at_ms: u64,
    },
    #[serde(rename = "user.watching.start")]
    WatchingStart { user: UserRef, watcher_count: u64 },
    #[serde(rename = "user.watching.stop")]
    WatchingStop { user: UserRef, watcher_count: u64 },
    #[serde(rename = "connection.changed")]
    ConnectionChanged { online: bool },
    #[serde(rename = "connection.recovered")]
    ConnectionRecovered,
    /// All messages were cleared server side.
    #[serde(rename = "channel.truncated")]
    ChannelTruncated,
    /// Any event type this core does not handle.
    #[serde(other)]
    Unknown,
}

impl ChannelEvent {
    /// Decode a raw JSON event, distinguishing a missing type from a bad body.
    pub fn from_value(value: Value) -> Result<Self, EventDecodeError> {
        let kind = value
            .get("type")
            .and_then(Value::as_str)
            .ok_or(EventDecodeError::MissingType)?
            .to_owned();
        serde_json::from_value(value).map_err(|err| EventDecodeError::Malformed {
            kind,
            reason: err.to_string(),
        })
    }

    /// Message carried by the event, if any.
    pub fn message(&self) -> Option<&Message> {
        match self {
            Self::MessageNew { message }
            | Self::MessageUpdated { message }
            | Self::MessageDeleted { message }
            | Self::ReactionNew { message }
            | Self::ReactionUpdated { message }
            | Self::ReactionDeleted { message } => Some(message),
            _ => None,
        }
    }

    /// Stable label used in log fields.
    pub fn kind(&self) -> &'static str {
        match self {
            Self::MessageNew { .. } => "message.new",
            Self::MessageUpdated { .. } => "message.updated",
            Self::MessageDeleted { .. } => "message.deleted",
            Self::ReactionNew { .. } => "reaction.new",
            Self::ReactionUpdated { .. } => "reaction.updated",
            Self::ReactionDeleted { .. } => "reaction.deleted",
            Self::MemberAdded { .. } => "member.added",
            Self::MemberUpdated { .. } => "member.updated",
            Self::MemberRemoved { .. } => "member.removed",
            Self::TypingStart { .. } => "typing.start",
            Self::TypingStop { .. } => "typing.stop",
            Self::MessageRead { .. } => "message.read",
            Self::WatchingStart { .. } => "user.watching.start",
            Self::WatchingStop { .. } => "user.watching.stop",
            Self::ConnectionChanged { .. } => "connection.changed",
            Self::ConnectionRecovered => "connection.recovered",
            Self::ChannelTruncated => "channel.truncated",
            Self::Unknown => "unknown",
        }
    }

    /// Whether the event should trigger reactivation and a page-one resync.
    pub fn is_reconnect(&self) -> bool {
        matches!(
            self,
            Self::ConnectionRecovered | Self::ConnectionChanged { online: true }
        )
    }
}
