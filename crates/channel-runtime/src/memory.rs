//! Scripted in-process channel client for tests and the smoke app.

use std::{
    collections::HashMap,
    sync::{
        Arc,
        atomic::{AtomicBool, AtomicUsize, Ordering},
    },
    time::Duration,
};

use async_trait::async_trait;
use channel_core::{
    ChannelConfig, ChannelError, ChannelEvent, ChannelSnapshot, Member, Message, MessageList,
    MessageStatus, QueryOptions, UserRef,
};
use parking_lot::Mutex;
use serde_json::Value;
use tokio::sync::broadcast;
use tracing::trace;

use crate::client::{ChannelClient, EventStream};

const EVENT_BUFFER: usize = 256;
const DEFAULT_WATCH_LIMIT: usize = 25;

struct ServerState {
    messages: MessageList,
    replies: HashMap<String, MessageList>,
    members: Vec<Member>,
    watchers: Vec<UserRef>,
    watch_limit: usize,
    watch_error: Option<ChannelError>,
    failing_sends: usize,
    failing_queries: usize,
}

impl Default for ServerState {
    fn default() -> Self {
        Self {
            messages: MessageList::new(),
            replies: HashMap::new(),
            members: Vec::new(),
            watchers: Vec::new(),
            watch_limit: DEFAULT_WATCH_LIMIT,
            watch_error: None,
            failing_sends: 0,
            failing_queries: 0,
        }
    }
}

#[derive(Default)]
struct Counters {
    watch: AtomicUsize,
    query: AtomicUsize,
    replies: AtomicUsize,
    send: AtomicUsize,
    mark_read: AtomicUsize,
    activate: AtomicUsize,
}

struct Shared {
    channel_id: String,
    user: UserRef,
    online: AtomicBool,
    config: Mutex<ChannelConfig>,
    latency: Mutex<Option<Duration>>,
    server: Mutex<ServerState>,
    events: broadcast::Sender<Value>,
    counters: Counters,
}

/// Channel client backed by an in-process "server".
#[derive(Clone)]
pub struct InMemoryChannelClient {
    shared: Arc<Shared>,
}

impl InMemoryChannelClient {
    pub fn new(channel_id: impl Into<String>, user: UserRef) -> Self {
        let (events, _) = broadcast::channel(EVENT_BUFFER);
        Self {
            shared: Arc::new(Shared {
                channel_id: channel_id.into(),
                user,
                online: AtomicBool::new(true),
                config: Mutex::new(ChannelConfig::default()),
                latency: Mutex::new(None),
                server: Mutex::new(ServerState::default()),
                events,
                counters: Counters::default(),
            }),
        }
    }

    /// Add server-side channel messages; replies are routed to their thread.
    pub fn seed_messages(&self, messages: Vec<Message>) {
        let mut server = self.shared.server.lock();
        for message in messages {
            match message.parent_id.clone() {
                Some(parent_id) => server
                    .replies
                    .entry(parent_id)
                    .or_default()
                    .insert_sorted(message),
                None => server.messages.insert_sorted(message),
            }
        }
    }

    pub fn seed_members(&self, members: Vec<Member>) {
        self.shared.server.lock().members = members;
    }

    pub fn seed_watchers(&self, watchers: Vec<UserRef>) {
        self.shared.server.lock().watchers = watchers;
    }

    /// Number of newest messages returned by `watch`.
    pub fn set_watch_limit(&self, limit: usize) {
        self.shared.server.lock().watch_limit = limit;
    }

    pub fn set_online(&self, online: bool) {
        self.shared.online.store(online, Ordering::SeqCst);
    }

    pub fn set_config(&self, config: ChannelConfig) {
        *self.shared.config.lock() = config;
    }

    /// Delay applied to every async call.
    pub fn set_latency(&self, latency: Option<Duration>) {
        *self.shared.latency.lock() = latency;
    }

    pub fn fail_watch(&self, error: Option<ChannelError>) {
        self.shared.server.lock().watch_error = error;
    }

    /// Fail the next `count` sends with a network error.
    pub fn fail_next_sends(&self, count: usize) {
        self.shared.server.lock().failing_sends = count;
    }

    /// Fail the next `count` message/reply queries with a network error.
    pub fn fail_next_queries(&self, count: usize) {
        self.shared.server.lock().failing_queries = count;
    }

    /// Deliver a raw payload to subscribers. Returns the number of receivers.
    pub fn emit_raw(&self, payload: Value) -> usize {
        self.shared.events.send(payload).unwrap_or(0)
    }

    pub fn emit(&self, event: &ChannelEvent) -> usize {
        match serde_json::to_value(event) {
            Ok(payload) => self.emit_raw(payload),
            Err(_) => 0,
        }
    }

    pub fn server_message(&self, id: &str) -> Option<Message> {
        self.shared.server.lock().messages.get(id).cloned()
    }

    pub fn query_count(&self) -> usize {
        self.shared.counters.query.load(Ordering::SeqCst)
    }

    pub fn replies_count(&self) -> usize {
        self.shared.counters.replies.load(Ordering::SeqCst)
    }

    pub fn send_count(&self) -> usize {
        self.shared.counters.send.load(Ordering::SeqCst)
    }

    pub fn mark_read_count(&self) -> usize {
        self.shared.counters.mark_read.load(Ordering::SeqCst)
    }

    pub fn activate_count(&self) -> usize {
        self.shared.counters.activate.load(Ordering::SeqCst)
    }

    pub fn watch_count(&self) -> usize {
        self.shared.counters.watch.load(Ordering::SeqCst)
    }

    async fn simulate_latency(&self) {
        let latency = *self.shared.latency.lock();
        if let Some(delay) = latency {
            tokio::time::sleep(delay).await;
        }
    }

    fn take_query_failure(&self) -> Result<(), ChannelError> {
        let mut server = self.shared.server.lock();
        if server.failing_queries > 0 {
            server.failing_queries -= 1;
            return Err(ChannelError::network("scripted query failure"));
        }
        Ok(())
    }
}

fn page_before(list: &MessageList, options: &QueryOptions) -> Vec<Message> {
    let messages = list.as_slice();
    let end = match &options.id_lt {
        Some(id) => match messages.iter().position(|m| &m.id == id) {
            Some(end) => end,
            None => return Vec::new(),
        },
        None => messages.len(),
    };
    let start = end.saturating_sub(options.limit);
    messages[start..end].to_vec()
}

#[async_trait]
impl ChannelClient for InMemoryChannelClient {
    fn channel_id(&self) -> &str {
        &self.shared.channel_id
    }

    fn current_user(&self) -> UserRef {
        self.shared.user.clone()
    }

    fn is_online(&self) -> bool {
        self.shared.online.load(Ordering::SeqCst)
    }

    fn config(&self) -> ChannelConfig {
        *self.shared.config.lock()
    }

    fn subscribe(&self) -> EventStream {
        self.shared.events.subscribe()
    }

    async fn watch(&self) -> Result<ChannelSnapshot, ChannelError> {
        self.shared.counters.watch.fetch_add(1, Ordering::SeqCst);
        self.simulate_latency().await;
        let server = self.shared.server.lock();
        if let Some(err) = &server.watch_error {
            return Err(err.clone());
        }
        let newest = QueryOptions::page(server.watch_limit, None);
        Ok(ChannelSnapshot {
            messages: page_before(&server.messages, &newest),
            members: server.members.clone(),
            watcher_count: server.watchers.len() as u64,
            watchers: server.watchers.clone(),
            read: Vec::new(),
        })
    }

    async fn query(&self, options: QueryOptions) -> Result<Vec<Message>, ChannelError> {
        self.shared.counters.query.fetch_add(1, Ordering::SeqCst);
        self.simulate_latency().await;
        self.take_query_failure()?;
        let page = page_before(&self.shared.server.lock().messages, &options);
        trace!(limit = options.limit, returned = page.len(), "served message page");
        Ok(page)
    }

    async fn get_replies(
        &self,
        parent_id: &str,
        options: QueryOptions,
    ) -> Result<Vec<Message>, ChannelError> {
        self.shared.counters.replies.fetch_add(1, Ordering::SeqCst);
        self.simulate_latency().await;
        self.take_query_failure()?;
        let server = self.shared.server.lock();
        Ok(server
            .replies
            .get(parent_id)
            .map(|replies| page_before(replies, &options))
            .unwrap_or_default())
    }

    async fn send_message(&self, message: &Message) -> Result<Message, ChannelError> {
        self.shared.counters.send.fetch_add(1, Ordering::SeqCst);
        self.simulate_latency().await;
        let mut server = self.shared.server.lock();
        if server.failing_sends > 0 {
            server.failing_sends -= 1;
            return Err(ChannelError::network("scripted send failure"));
        }

        let stored = message.clone().with_status(MessageStatus::Received);
        match stored.parent_id.clone() {
            Some(parent_id) => server
                .replies
                .entry(parent_id)
                .or_default()
                .insert_sorted(stored.clone()),
            None => server.messages.insert_sorted(stored.clone()),
        }
        Ok(stored)
    }

    async fn mark_read(&self) -> Result<(), ChannelError> {
        self.shared.counters.mark_read.fetch_add(1, Ordering::SeqCst);
        self.simulate_latency().await;
        Ok(())
    }

    async fn activate(&self) -> Result<(), ChannelError> {
        self.shared.counters.activate.fetch_add(1, Ordering::SeqCst);
        self.simulate_latency().await;
        Ok(())
    }
}
