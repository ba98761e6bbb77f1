use std::{
    collections::{BTreeMap, HashMap, HashSet},
    sync::Arc,
};

use thiserror::Error;

use crate::types::{
    ChannelSnapshot, Member, Message, MessageKind, MessageStatus, ReadState, TypingIndicator,
    UserRef,
};

/// Errors that can occur while applying timeline operations.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum TimelineMergeError {
    /// An operation referenced a message id that is not present.
    #[error("message with id '{0}' was not found")]
    MissingMessage(String),
}

/// Ordered, id-unique message sequence.
///
/// Sorted by `created_at_ms` ascending; equal keys keep insertion order.
/// Storage is shared copy-on-write so cloned snapshots never observe later
/// mutation.
#[derive(Debug, Clone, Default)]
pub struct MessageList {
    messages: Arc<Vec<Message>>,
}

impl MessageList {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn from_messages(messages: Vec<Message>) -> Self {
        let mut list = Self::new();
        list.merge_bulk(messages, false);
        list
    }

    /// Messages in display order.
    pub fn as_slice(&self) -> &[Message] {
        &self.messages
    }

    /// Shared handle to the current sequence.
    pub fn shared(&self) -> Arc<Vec<Message>> {
        Arc::clone(&self.messages)
    }

    pub fn len(&self) -> usize {
        self.messages.len()
    }

    pub fn is_empty(&self) -> bool {
        self.messages.is_empty()
    }

    pub fn get(&self, id: &str) -> Option<&Message> {
        self.messages.iter().find(|m| m.id == id)
    }

    pub fn contains(&self, id: &str) -> bool {
        self.get(id).is_some()
    }

    /// Oldest message; the cursor for backward pagination.
    pub fn oldest(&self) -> Option<&Message> {
        self.messages.first()
    }

    pub fn newest(&self) -> Option<&Message> {
        self.messages.last()
    }

    /// Insert, or replace the entry with the same id, keeping the order.
    ///
    /// A replacement stays in place while its sort key still fits between its
    /// neighbours, so an optimistic message does not jump when confirmed.
    pub fn insert_sorted(&mut self, message: Message) {
        let messages = Arc::make_mut(&mut self.messages);
        if let Some(idx) = messages.iter().position(|m| m.id == message.id) {
            let fits_before = idx == 0 || messages[idx - 1].created_at_ms <= message.created_at_ms;
            let fits_after = idx + 1 >= messages.len()
                || message.created_at_ms <= messages[idx + 1].created_at_ms;
            if fits_before && fits_after {
                messages[idx] = message;
                return;
            }
            messages.remove(idx);
        }

        let at = messages.partition_point(|m| m.created_at_ms <= message.created_at_ms);
        messages.insert(at, message);
    }

    /// Replace an existing message by id.
    pub fn update(&mut self, message: Message) -> Result<(), TimelineMergeError> {
        if !self.contains(&message.id) {
            return Err(TimelineMergeError::MissingMessage(message.id));
        }
        self.insert_sorted(message);
        Ok(())
    }

    pub fn remove(&mut self, id: &str) -> Option<Message> {
        let idx = self.messages.iter().position(|m| m.id == id)?;
        Some(Arc::make_mut(&mut self.messages).remove(idx))
    }

    /// Merge a page of messages.
    ///
    /// With `prepend_older`, a sorted page that is strictly older than the
    /// current head and shares no ids with it is spliced in front in one step.
    pub fn merge_bulk(&mut self, incoming: Vec<Message>, prepend_older: bool) {
        if incoming.is_empty() {
            return;
        }

        if prepend_older && self.can_prepend(&incoming) {
            Arc::make_mut(&mut self.messages).splice(0..0, incoming);
            return;
        }

        for message in incoming {
            self.insert_sorted(message);
        }
    }

    /// Drop every message that is not a regular message.
    pub fn filter_ephemeral(&mut self) -> usize {
        self.retain(|m| m.kind == MessageKind::Regular)
    }

    /// Drop failed sends and server error messages.
    pub fn filter_errored(&mut self) -> usize {
        self.retain(|m| m.status != MessageStatus::Failed && m.kind != MessageKind::Error)
    }

    pub fn clear(&mut self) {
        if !self.messages.is_empty() {
            Arc::make_mut(&mut self.messages).clear();
        }
    }

    fn retain(&mut self, keep: impl Fn(&Message) -> bool) -> usize {
        if self.messages.iter().all(&keep) {
            return 0;
        }
        let messages = Arc::make_mut(&mut self.messages);
        let before = messages.len();
        messages.retain(|m| keep(m));
        before - messages.len()
    }

    fn can_prepend(&self, incoming: &[Message]) -> bool {
        let sorted = incoming
            .windows(2)
            .all(|pair| pair[0].created_at_ms < pair[1].created_at_ms);
        let older = match (incoming.last(), self.messages.first()) {
            (Some(last), Some(first)) => last.created_at_ms < first.created_at_ms,
            _ => true,
        };
        if !sorted || !older {
            return false;
        }

        let mut seen = HashSet::with_capacity(incoming.len());
        incoming
            .iter()
            .all(|m| seen.insert(m.id.as_str()) && !self.contains(&m.id))
    }
}

/// Main channel timeline: messages plus presence, membership and read state.
#[derive(Debug, Clone, Default)]
pub struct Timeline {
    pub messages: MessageList,
    pub watchers: Arc<BTreeMap<String, UserRef>>,
    pub members: Arc<BTreeMap<String, Member>>,
    pub read: Arc<BTreeMap<String, ReadState>>,
    pub typing: Arc<BTreeMap<String, TypingIndicator>>,
    pub watcher_count: u64,
}

impl Timeline {
    pub fn upsert_member(&mut self, member: Member) {
        Arc::make_mut(&mut self.members).insert(member.user.id.clone(), member);
    }

    pub fn remove_member(&mut self, user_id: &str) {
        if self.members.contains_key(user_id) {
            Arc::make_mut(&mut self.members).remove(user_id);
        }
    }

    pub fn set_typing(&mut self, user: UserRef, started_at_ms: u64) {
        Arc::make_mut(&mut self.typing).insert(
            user.id.clone(),
            TypingIndicator {
                user,
                started_at_ms,
            },
        );
    }

    pub fn clear_typing(&mut self, user_id: &str) {
        if self.typing.contains_key(user_id) {
            Arc::make_mut(&mut self.typing).remove(user_id);
        }
    }

    pub fn mark_read(&mut self, user: UserRef, last_read_ms: u64) {
        Arc::make_mut(&mut self.read)
            .insert(user.id.clone(), ReadState { user, last_read_ms });
    }

    pub fn add_watcher(&mut self, user: UserRef, watcher_count: u64) {
        Arc::make_mut(&mut self.watchers).insert(user.id.clone(), user);
        self.watcher_count = watcher_count;
    }

    pub fn remove_watcher(&mut self, user_id: &str, watcher_count: u64) {
        if self.watchers.contains_key(user_id) {
            Arc::make_mut(&mut self.watchers).remove(user_id);
        }
        self.watcher_count = watcher_count;
    }
}

/// Local store for one channel: the main timeline and reply lists per thread.
#[derive(Debug, Clone, Default)]
pub struct ChannelStore {
    pub main: Timeline,
    threads: HashMap<String, MessageList>,
}

impl ChannelStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Copy the full channel state returned by the initial watch.
    pub fn copy_channel_state(&mut self, snapshot: ChannelSnapshot) {
        self.main.members = Arc::new(
            snapshot
                .members
                .into_iter()
                .map(|member| (member.user.id.clone(), member))
                .collect(),
        );
        self.main.watchers = Arc::new(
            snapshot
                .watchers
                .into_iter()
                .map(|user| (user.id.clone(), user))
                .collect(),
        );
        self.main.read = Arc::new(
            snapshot
                .read
                .into_iter()
                .map(|read| (read.user.id.clone(), read))
                .collect(),
        );
        self.main.watcher_count = snapshot.watcher_count;
        for message in snapshot.messages {
            self.insert_sorted(message);
        }
    }

    /// Route a message into its thread and, when visible there, the main timeline.
    pub fn insert_sorted(&mut self, message: Message) {
        if let Some(parent_id) = message.parent_id.clone() {
            self.threads
                .entry(parent_id)
                .or_default()
                .insert_sorted(message.clone());
        }
        if message.is_visible_in_channel() {
            self.main.messages.insert_sorted(message);
        }
    }

    /// Merge a main-timeline page. Replies also land in their thread list.
    pub fn merge_bulk(&mut self, page: Vec<Message>, prepend_older: bool) {
        let mut visible = Vec::with_capacity(page.len());
        for message in page {
            if let Some(parent_id) = message.parent_id.clone() {
                self.threads
                    .entry(parent_id)
                    .or_default()
                    .insert_sorted(message.clone());
            }
            if message.is_visible_in_channel() {
                visible.push(message);
            }
        }
        self.main.messages.merge_bulk(visible, prepend_older);
    }

    /// Replace an existing message wherever it is stored.
    pub fn update(&mut self, message: Message) -> Result<(), TimelineMergeError> {
        let in_thread = message
            .parent_id
            .as_deref()
            .and_then(|parent_id| self.threads.get(parent_id))
            .is_some_and(|replies| replies.contains(&message.id));
        let in_main = self.main.messages.contains(&message.id);
        if !in_thread && !in_main {
            return Err(TimelineMergeError::MissingMessage(message.id));
        }
        self.insert_sorted(message);
        Ok(())
    }

    /// Remove a message by id from the main timeline and every thread.
    pub fn remove(&mut self, id: &str) -> Option<Message> {
        let from_main = self.main.messages.remove(id);
        let from_thread = self
            .threads
            .values_mut()
            .find_map(|replies| replies.remove(id));
        from_main.or(from_thread)
    }

    /// Reply list for a thread root; empty when nothing is known yet.
    pub fn replies(&self, parent_id: &str) -> MessageList {
        self.threads.get(parent_id).cloned().unwrap_or_default()
    }

    pub fn merge_replies(&mut self, parent_id: &str, page: Vec<Message>, prepend_older: bool) {
        self.threads
            .entry(parent_id.to_owned())
            .or_default()
            .merge_bulk(page, prepend_older);
    }

    pub fn filter_errored_replies(&mut self, parent_id: &str) -> usize {
        self.threads
            .get_mut(parent_id)
            .map_or(0, MessageList::filter_errored)
    }

    /// Drop all messages, keeping membership and presence.
    pub fn truncate(&mut self) {
        self.main.messages.clear();
        self.threads.clear();
    }
}
