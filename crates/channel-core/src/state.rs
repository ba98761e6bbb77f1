use std::{
    collections::{BTreeMap, HashMap},
    sync::Arc,
};

use crate::{
    error::ChannelError,
    history::HistoryEvent,
    types::{ChannelLifecycleState, Member, Message, ReadState, TypingIndicator, UserRef},
};

/// Thread sub-state visible to the presentation layer.
#[derive(Debug, Clone, PartialEq)]
pub struct ThreadView {
    /// Latest snapshot of the thread root message.
    pub parent: Message,
    /// Replies in display order.
    pub messages: Arc<Vec<Message>>,
    pub has_more: bool,
    pub loading_more: bool,
}

/// Externally visible channel snapshot.
///
/// Collections are `Arc`-shared with the store; the store copies on write, so
/// a snapshot never changes after it has been published.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PublishedState {
    /// Incremented by one on every publish.
    pub revision: u64,
    pub lifecycle: ChannelLifecycleState,
    /// Channel-level error; the view shows an error instead of the timeline.
    pub error: Option<ChannelError>,
    /// Initial load in progress.
    pub loading: bool,
    pub online: bool,
    pub messages: Arc<Vec<Message>>,
    pub watchers: Arc<BTreeMap<String, UserRef>>,
    pub members: Arc<BTreeMap<String, Member>>,
    pub read: Arc<BTreeMap<String, ReadState>>,
    pub typing: Arc<BTreeMap<String, TypingIndicator>>,
    pub watcher_count: u64,
    /// Membership events bucketed by the newest message id at receipt.
    pub event_history: Arc<HashMap<String, Vec<HistoryEvent>>>,
    pub loading_more: bool,
    /// Older pages are available from the network.
    pub has_more: bool,
    /// Older pages are available from local storage.
    pub has_more_local_messages: bool,
    pub thread: Option<ThreadView>,
    /// Message currently being edited by the composer.
    pub editing: Option<Message>,
}

impl PublishedState {
    pub fn message(&self, id: &str) -> Option<&Message> {
        self.messages.iter().find(|m| m.id == id)
    }

    pub fn message_ids(&self) -> Vec<&str> {
        self.messages.iter().map(|m| m.id.as_str()).collect()
    }

    pub fn has_error(&self) -> bool {
        self.error.is_some()
    }
}
