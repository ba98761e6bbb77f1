//! Errors surfaced by the channel engine and its collaborators.
//!
//! A [`ChannelError`] is either published in state (initial watch failure)
//! or logged and folded into message/pagination flags.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::types::ChannelLifecycleState;

/// Which layer of the channel engine an error came from.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
pub enum ChannelErrorCategory {
    /// The initial watch failed; the view shows the error instead of a timeline.
    Connection,
    /// A send, query, or read receipt failed in transit.
    Network,
    /// The server asked the client to back off.
    RateLimited,
    /// The offline message store failed.
    Storage,
    /// A remote payload or stored row could not be decoded.
    Serialization,
    /// A `CHANNEL_*` setting or caller input was rejected.
    Config,
    /// An operation ran in the wrong lifecycle state.
    Internal,
}

/// Error carried in [`crate::PublishedState::error`] and returned by clients.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq, Error)]
#[error("{category:?}:{code}: {message}")]
pub struct ChannelError {
    /// Originating layer.
    pub category: ChannelErrorCategory,
    /// Code such as `connection_failed` or `network_error`; stable across releases.
    pub code: String,
    /// Detail from the collaborator, shown to users as-is.
    pub message: String,
    /// Server back-off hint in milliseconds, set for rate limits.
    pub retry_after_ms: Option<u64>,
}

impl ChannelError {
    pub fn new(
        category: ChannelErrorCategory,
        code: impl Into<String>,
        message: impl Into<String>,
    ) -> Self {
        Self {
            category,
            code: code.into(),
            message: message.into(),
            retry_after_ms: None,
        }
    }

    /// Network failure with the stable `network_error` code.
    pub fn network(message: impl Into<String>) -> Self {
        Self::new(ChannelErrorCategory::Network, "network_error", message)
    }

    /// Connection failure during the initial watch.
    pub fn connection(message: impl Into<String>) -> Self {
        Self::new(ChannelErrorCategory::Connection, "connection_failed", message)
    }

    /// Record how long the server asked the client to wait.
    pub fn with_retry_after(mut self, retry_after: Duration) -> Self {
        self.retry_after_ms = Some(retry_after.as_millis() as u64);
        self
    }

    /// Rejection of `action` because the channel is not `Active`.
    pub fn invalid_state(current: ChannelLifecycleState, action: impl Into<String>) -> Self {
        let action = action.into();
        Self::new(
            ChannelErrorCategory::Internal,
            "invalid_state_transition",
            format!("cannot run '{action}' while channel is in state {current:?}"),
        )
    }

    /// Whether a watch failure in this category is worth retrying later.
    pub fn is_transient(&self) -> bool {
        matches!(
            self.category,
            ChannelErrorCategory::Network | ChannelErrorCategory::RateLimited
        )
    }
}
