//! Durable message storage contract used by the offline path.

use std::{
    collections::HashMap,
    sync::{
        Arc,
        atomic::{AtomicBool, Ordering},
    },
};

use async_trait::async_trait;
use channel_core::{ChannelError, ChannelErrorCategory, Message, MessageList};
use parking_lot::RwLock;
use thiserror::Error;
use tracing::debug;

#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum StorageError {
    #[error("message not found: {0}")]
    NotFound(String),
    #[error("message store is closed")]
    Closed,
    #[error("message store unavailable: {0}")]
    Unavailable(String),
    #[error("message store backend failure: {0}")]
    Backend(String),
}

impl From<StorageError> for ChannelError {
    fn from(err: StorageError) -> Self {
        let code = match &err {
            StorageError::NotFound(_) => "storage_not_found",
            StorageError::Closed => "storage_closed",
            StorageError::Unavailable(_) => "storage_unavailable",
            StorageError::Backend(_) => "storage_backend",
        };
        ChannelError::new(ChannelErrorCategory::Storage, code, err.to_string())
    }
}

/// Local document store holding messages per channel.
#[async_trait]
pub trait MessageStore: Send + Sync {
    async fn insert_message_for_channel(
        &self,
        channel_id: &str,
        message: &Message,
    ) -> Result<(), StorageError>;

    /// Replace a stored message by id, whatever channel holds it.
    async fn update_message(&self, message: &Message) -> Result<(), StorageError>;

    async fn insert_messages_for_channel(
        &self,
        channel_id: &str,
        messages: &[Message],
    ) -> Result<(), StorageError>;

    /// Up to `limit` of the newest messages strictly older than `cursor`,
    /// in ascending order. Without a cursor, the newest page.
    async fn query_messages(
        &self,
        channel_id: &str,
        cursor: Option<&Message>,
        limit: usize,
    ) -> Result<Vec<Message>, StorageError>;

    async fn close(&self) -> Result<(), StorageError>;
}

/// In-memory store for tests, demos and platforms without a database.
#[derive(Clone, Default)]
pub struct InMemoryMessageStore {
    data: Arc<RwLock<HashMap<String, MessageList>>>,
    closed: Arc<AtomicBool>,
}

impl InMemoryMessageStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn is_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    /// Number of messages stored for a channel.
    pub fn len_for_channel(&self, channel_id: &str) -> usize {
        self.data
            .read()
            .get(channel_id)
            .map_or(0, MessageList::len)
    }

    fn ensure_open(&self) -> Result<(), StorageError> {
        if self.is_closed() {
            return Err(StorageError::Closed);
        }
        Ok(())
    }

    fn with_write<R>(
        &self,
        apply: impl FnOnce(&mut HashMap<String, MessageList>) -> Result<R, StorageError>,
    ) -> Result<R, StorageError> {
        self.ensure_open()?;
        apply(&mut self.data.write())
    }
}

#[async_trait]
impl MessageStore for InMemoryMessageStore {
    async fn insert_message_for_channel(
        &self,
        channel_id: &str,
        message: &Message,
    ) -> Result<(), StorageError> {
        self.with_write(|data| {
            data.entry(channel_id.to_owned())
                .or_default()
                .insert_sorted(message.clone());
            Ok(())
        })
    }

    async fn update_message(&self, message: &Message) -> Result<(), StorageError> {
        self.with_write(|data| {
            let list = data
                .values_mut()
                .find(|list| list.contains(&message.id))
                .ok_or_else(|| StorageError::NotFound(message.id.clone()))?;
            list.insert_sorted(message.clone());
            Ok(())
        })
    }

    async fn insert_messages_for_channel(
        &self,
        channel_id: &str,
        messages: &[Message],
    ) -> Result<(), StorageError> {
        self.with_write(|data| {
            data.entry(channel_id.to_owned())
                .or_default()
                .merge_bulk(messages.to_vec(), false);
            Ok(())
        })
    }

    async fn query_messages(
        &self,
        channel_id: &str,
        cursor: Option<&Message>,
        limit: usize,
    ) -> Result<Vec<Message>, StorageError> {
        self.ensure_open()?;
        let data = self.data.read();
        let Some(list) = data.get(channel_id) else {
            return Ok(Vec::new());
        };

        let messages = list.as_slice();
        let end = match cursor {
            Some(cursor) => messages
                .iter()
                .position(|m| m.id == cursor.id)
                .unwrap_or_else(|| {
                    messages.partition_point(|m| m.created_at_ms < cursor.created_at_ms)
                }),
            None => messages.len(),
        };
        let start = end.saturating_sub(limit);
        debug!(channel_id, start, end, "queried local messages");
        Ok(messages[start..end].to_vec())
    }

    async fn close(&self) -> Result<(), StorageError> {
        self.closed.store(true, Ordering::SeqCst);
        Ok(())
    }
}

/// A store bound to one channel id.
#[derive(Clone)]
pub struct ChannelScopedStore {
    inner: Arc<dyn MessageStore>,
    channel_id: String,
}

impl ChannelScopedStore {
    pub fn new(inner: Arc<dyn MessageStore>, channel_id: impl Into<String>) -> Self {
        Self {
            inner,
            channel_id: channel_id.into(),
        }
    }

    pub fn channel_id(&self) -> &str {
        &self.channel_id
    }

    pub async fn insert(&self, message: &Message) -> Result<(), StorageError> {
        self.inner
            .insert_message_for_channel(&self.channel_id, message)
            .await
    }

    pub async fn insert_many(&self, messages: &[Message]) -> Result<(), StorageError> {
        self.inner
            .insert_messages_for_channel(&self.channel_id, messages)
            .await
    }

    pub async fn update(&self, message: &Message) -> Result<(), StorageError> {
        self.inner.update_message(message).await
    }

    pub async fn query(
        &self,
        cursor: Option<&Message>,
        limit: usize,
    ) -> Result<Vec<Message>, StorageError> {
        self.inner
            .query_messages(&self.channel_id, cursor, limit)
            .await
    }

    pub async fn close(&self) -> Result<(), StorageError> {
        self.inner.close().await
    }
}
