//! Channel controller: owns the local store and publishes whole snapshots.

use std::sync::{Arc, Weak};

use channel_core::{
    ChannelError, ChannelStateMachine, ChannelStore, ControllerConfig, Debouncer, EventHistory,
    Message, PublishedState, StatePublisher, StateStream, Throttler,
};
use channel_storage::{ChannelScopedStore, MessageStore};
use parking_lot::Mutex;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::{
    client::ChannelClient,
    listener,
    pagination::{PaginationState, ThreadPageFinished, ThreadState},
};

/// Mutable channel state guarded by the controller lock.
///
/// The lock is never held across an `.await`.
#[derive(Default)]
pub(crate) struct ControllerState {
    pub(crate) lifecycle: ChannelStateMachine,
    pub(crate) store: ChannelStore,
    pub(crate) history: EventHistory,
    pub(crate) pagination: PaginationState,
    pub(crate) thread: Option<ThreadState>,
    pub(crate) editing: Option<Message>,
    pub(crate) error: Option<ChannelError>,
    pub(crate) loading: bool,
}

impl ControllerState {
    fn snapshot(&self, online: bool) -> PublishedState {
        let main = &self.store.main;
        PublishedState {
            revision: 0,
            lifecycle: self.lifecycle.state(),
            error: self.error.clone(),
            loading: self.loading,
            online,
            messages: main.messages.shared(),
            watchers: Arc::clone(&main.watchers),
            members: Arc::clone(&main.members),
            read: Arc::clone(&main.read),
            typing: Arc::clone(&main.typing),
            watcher_count: main.watcher_count,
            event_history: self.history.shared(),
            loading_more: self.pagination.loading_more,
            has_more: self.pagination.has_more,
            has_more_local_messages: self.pagination.has_more_local_messages,
            thread: self.thread.as_ref().map(ThreadState::view),
            editing: self.editing.clone(),
        }
    }

    /// Keep the open thread in step with a message that was just stored.
    pub(crate) fn refresh_thread_for(&mut self, message: &Message) {
        let Some(thread) = self.thread.as_mut() else {
            return;
        };
        if message.parent_id.as_deref() == Some(thread.parent.id.as_str()) {
            thread.messages = self.store.replies(&thread.parent.id);
        }
        if message.id == thread.parent.id {
            thread.parent = message.clone();
        }
    }
}

struct Coalescers {
    publish: Throttler<()>,
    main_finished: Debouncer<bool>,
    local_finished: Debouncer<bool>,
    thread_finished: Debouncer<ThreadPageFinished>,
    load_more: Throttler<()>,
    mark_read: Throttler<()>,
}

impl Coalescers {
    fn new(weak: &Weak<Inner>, config: &ControllerConfig, shutdown: &CancellationToken) -> Self {
        let publish = {
            let weak = weak.clone();
            Throttler::new(config.publish_throttle(), shutdown.child_token(), move |()| {
                if let Some(controller) = ChannelController::from_weak(&weak) {
                    controller.publish_now();
                }
            })
        };
        let main_finished = {
            let weak = weak.clone();
            Debouncer::new(
                config.load_more_debounce(),
                true,
                shutdown.child_token(),
                move |has_more| {
                    if let Some(controller) = ChannelController::from_weak(&weak) {
                        controller.finish_main_page(has_more);
                    }
                },
            )
        };
        let local_finished = {
            let weak = weak.clone();
            Debouncer::new(
                config.load_more_debounce(),
                true,
                shutdown.child_token(),
                move |has_more_local| {
                    if let Some(controller) = ChannelController::from_weak(&weak) {
                        controller.finish_local_page(has_more_local);
                    }
                },
            )
        };
        let thread_finished = {
            let weak = weak.clone();
            Debouncer::new(
                config.load_more_debounce(),
                true,
                shutdown.child_token(),
                move |finished| {
                    if let Some(controller) = ChannelController::from_weak(&weak) {
                        controller.finish_thread_page(finished);
                    }
                },
            )
        };
        let load_more = {
            let weak = weak.clone();
            Throttler::new(config.load_more_throttle(), shutdown.child_token(), move |()| {
                if let Some(controller) = ChannelController::from_weak(&weak) {
                    tokio::spawn(async move { controller.load_more(false, false).await });
                }
            })
        };
        let mark_read = {
            let weak = weak.clone();
            Throttler::new(config.mark_read_throttle(), shutdown.child_token(), move |()| {
                if let Some(controller) = ChannelController::from_weak(&weak) {
                    tokio::spawn(async move { controller.mark_read_now().await });
                }
            })
        };

        Self {
            publish,
            main_finished,
            local_finished,
            thread_finished,
            load_more,
            mark_read,
        }
    }

    fn cancel_all(&self) {
        self.publish.cancel();
        self.main_finished.cancel();
        self.local_finished.cancel();
        self.thread_finished.cancel();
        self.load_more.cancel();
        self.mark_read.cancel();
    }
}

pub(crate) struct Inner {
    coalescers: Coalescers,
    pub(crate) client: Arc<dyn ChannelClient>,
    pub(crate) storage: Option<ChannelScopedStore>,
    pub(crate) config: ControllerConfig,
    pub(crate) shutdown: CancellationToken,
    pub(crate) state: Mutex<ControllerState>,
    publisher: StatePublisher,
}

/// Handle to one channel's state-synchronization engine.
///
/// Cloning is cheap; all clones drive the same store and publisher.
#[derive(Clone)]
pub struct ChannelController {
    pub(crate) inner: Arc<Inner>,
}

impl ChannelController {
    /// Build a controller. `storage` is only used when
    /// [`ControllerConfig::offline_storage`] is enabled.
    pub fn new(
        client: Arc<dyn ChannelClient>,
        storage: Option<Arc<dyn MessageStore>>,
        config: ControllerConfig,
    ) -> Self {
        let channel_id = client.channel_id().to_owned();
        let storage = match (config.offline_storage, storage) {
            (true, Some(store)) => Some(ChannelScopedStore::new(store, channel_id.as_str())),
            (true, None) => {
                warn!(%channel_id, "offline storage enabled without a message store");
                None
            }
            (false, _) => None,
        };
        let shutdown = CancellationToken::new();

        let inner = Arc::new_cyclic(|weak| Inner {
            coalescers: Coalescers::new(weak, &config, &shutdown),
            client,
            storage,
            config: config.clone(),
            shutdown: shutdown.clone(),
            state: Mutex::new(ControllerState::default()),
            publisher: StatePublisher::new(),
        });
        Self { inner }
    }

    pub(crate) fn from_weak(weak: &Weak<Inner>) -> Option<Self> {
        weak.upgrade().map(|inner| Self { inner })
    }

    pub fn channel_id(&self) -> &str {
        self.inner.client.channel_id()
    }

    pub fn config(&self) -> &ControllerConfig {
        &self.inner.config
    }

    /// Latest published state.
    pub fn snapshot(&self) -> PublishedState {
        self.inner.publisher.current()
    }

    /// Receiver that observes every published snapshot.
    pub fn subscribe(&self) -> StateStream {
        self.inner.publisher.subscribe()
    }

    pub(crate) fn is_disposed(&self) -> bool {
        self.inner.state.lock().lifecycle.is_disposed()
    }

    /// Publish the current state immediately. No-op once disposed.
    pub(crate) fn publish_now(&self) {
        let online = self.inner.client.is_online();
        let state = self.inner.state.lock();
        if state.lifecycle.is_disposed() {
            return;
        }
        self.inner.publisher.publish(state.snapshot(online));
    }

    /// Publish through the throttled publisher.
    pub(crate) fn schedule_publish(&self) {
        self.inner.coalescers.publish.schedule(());
    }

    pub(crate) fn schedule_main_finished(&self, has_more: bool) {
        self.inner.coalescers.main_finished.schedule(has_more);
    }

    pub(crate) fn schedule_local_finished(&self, has_more_local: bool) {
        self.inner.coalescers.local_finished.schedule(has_more_local);
    }

    pub(crate) fn schedule_load_more(&self) {
        self.inner.coalescers.load_more.schedule(());
    }

    pub(crate) fn schedule_thread_finished(&self, finished: ThreadPageFinished) {
        self.inner.coalescers.thread_finished.schedule(finished);
    }

    /// Load channel state and attach the event listener.
    ///
    /// Offline with local storage enabled, the timeline is hydrated from
    /// storage instead of the network.
    pub async fn initialize(&self) {
        {
            let mut state = self.inner.state.lock();
            if let Err(err) = state.lifecycle.begin_connect() {
                warn!(channel_id = %self.channel_id(), code = %err.code, "initialize ignored");
                return;
            }
            state.loading = true;
            state.error = None;
        }
        self.publish_now();

        // Subscribe first so nothing emitted during the watch call is lost.
        let events = self.inner.client.subscribe();

        if !self.inner.client.is_online()
            && let Some(storage) = self.inner.storage.clone()
        {
            self.hydrate_from_storage(&storage).await;
            self.attach_listener(events);
            return;
        }

        match self.inner.client.watch().await {
            Ok(snapshot) => {
                let persisted = snapshot.messages.clone();
                {
                    let mut state = self.inner.state.lock();
                    if state.lifecycle.is_disposed() {
                        return;
                    }
                    state.store.copy_channel_state(snapshot);
                    state.loading = false;
                    if let Err(err) = state.lifecycle.on_connected() {
                        warn!(code = %err.code, "unexpected lifecycle after watch");
                    }
                }
                info!(
                    channel_id = %self.channel_id(),
                    messages = persisted.len(),
                    "channel watch established"
                );
                self.attach_listener(events);
                self.publish_now();
                self.persist_page(&persisted).await;
            }
            Err(err) => {
                {
                    let mut state = self.inner.state.lock();
                    if state.lifecycle.is_disposed() {
                        return;
                    }
                    if let Err(transition) = state.lifecycle.on_connect_failed() {
                        warn!(code = %transition.code, "unexpected lifecycle after failed watch");
                    }
                    state.loading = false;
                    state.error = Some(err.clone());
                }
                warn!(
                    channel_id = %self.channel_id(),
                    code = %err.code,
                    transient = err.is_transient(),
                    "channel watch failed"
                );
                self.publish_now();
            }
        }
    }

    async fn hydrate_from_storage(&self, storage: &ChannelScopedStore) {
        let limit = self.inner.config.main_page_size;
        let needs_page = self.inner.state.lock().store.main.messages.is_empty();
        let page = if needs_page {
            match storage.query(None, limit).await {
                Ok(page) => Some(page),
                Err(err) => {
                    warn!(channel_id = %self.channel_id(), error = %err, "local hydration failed");
                    None
                }
            }
        } else {
            None
        };

        {
            let mut state = self.inner.state.lock();
            if state.lifecycle.is_disposed() {
                return;
            }
            if let Some(page) = page {
                state.pagination.has_more_local_messages = page.len() >= limit;
                state.store.merge_bulk(page, true);
            }
            state.loading = false;
            if let Err(err) = state.lifecycle.on_connected() {
                warn!(code = %err.code, "unexpected lifecycle after local hydration");
            }
        }
        debug!(channel_id = %self.channel_id(), "channel hydrated from local storage");
        self.publish_now();
    }

    fn attach_listener(&self, events: crate::client::EventStream) {
        listener::spawn(
            Arc::downgrade(&self.inner),
            events,
            self.inner.shutdown.child_token(),
        );
    }

    /// Persist a page of network messages when local storage is enabled.
    pub(crate) async fn persist_page(&self, messages: &[Message]) {
        let Some(storage) = &self.inner.storage else {
            return;
        };
        if messages.is_empty() {
            return;
        }
        if let Err(err) = storage.insert_many(messages).await {
            warn!(channel_id = %self.channel_id(), error = %err, "failed to persist messages");
        }
    }

    /// Throttled read receipt. No-op when read events are disabled.
    pub fn mark_read(&self) {
        if !self.inner.client.config().read_events {
            debug!(channel_id = %self.channel_id(), "read events disabled; mark_read skipped");
            return;
        }
        self.inner.coalescers.mark_read.schedule(());
    }

    async fn mark_read_now(&self) {
        if self.is_disposed() || !self.inner.client.config().read_events {
            return;
        }
        if let Err(err) = self.inner.client.mark_read().await {
            warn!(channel_id = %self.channel_id(), code = %err.code, "mark_read failed");
        }
    }

    pub fn set_editing(&self, message: Message) {
        self.inner.state.lock().editing = Some(message);
        self.publish_now();
    }

    pub fn clear_editing(&self) {
        self.inner.state.lock().editing = None;
        self.publish_now();
    }

    /// Tear the channel down. Late completions observe `Disposed` and return.
    pub async fn dispose(&self) {
        let online = self.inner.client.is_online();
        {
            let mut state = self.inner.state.lock();
            if !state.lifecycle.dispose() {
                return;
            }
            self.inner.publisher.publish(state.snapshot(online));
        }
        self.inner.shutdown.cancel();
        self.inner.coalescers.cancel_all();

        if let Some(storage) = &self.inner.storage
            && let Err(err) = storage.close().await
        {
            warn!(channel_id = %self.channel_id(), error = %err, "failed to close message store");
        }
        info!(channel_id = %self.channel_id(), "channel disposed");
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use channel_core::{ChannelConfig, ChannelError, ChannelLifecycleState, MessageStatus};
    use channel_storage::InMemoryMessageStore;

    use super::*;
    use crate::test_support::{controller_for, msg, settle, test_client, test_config};

    #[tokio::test(start_paused = true)]
    async fn initialize_copies_watch_state_and_goes_active() {
        let client = test_client();
        client.seed_messages(vec![msg("a", 10), msg("b", 20)]);
        client.seed_watchers(vec![channel_core::UserRef::new("bob")]);
        let controller = controller_for(&client, test_config());

        controller.initialize().await;
        let state = controller.snapshot();

        assert_eq!(state.lifecycle, ChannelLifecycleState::Active);
        assert_eq!(state.message_ids(), ["a", "b"]);
        assert_eq!(state.watcher_count, 1);
        assert!(!state.loading);
        assert!(state.online);
        assert_eq!(client.watch_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn watch_failure_publishes_error_and_blocks_sends() {
        let client = test_client();
        client.fail_watch(Some(ChannelError::connection("socket closed")));
        let controller = controller_for(&client, test_config());

        controller.initialize().await;
        let state = controller.snapshot();
        assert_eq!(state.lifecycle, ChannelLifecycleState::Errored);
        assert_eq!(
            state.error.as_ref().map(|e| e.code.as_str()),
            Some("connection_failed")
        );
        assert!(!state.loading);

        let sent = controller
            .send(channel_core::MessageInput::text("hello"))
            .await;
        assert!(sent.is_none());
        assert_eq!(client.send_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn errored_channel_does_not_paginate() {
        let client = test_client();
        client.seed_messages(vec![msg("root", 1), msg("r1", 2).with_parent("root")]);
        client.fail_watch(Some(ChannelError::connection("socket closed")));
        let controller = controller_for(&client, test_config());
        controller.initialize().await;
        let before = controller.snapshot();

        controller.load_more(false, false).await;
        controller.open_thread(msg("root", 1));
        controller.load_more_thread().await;

        let state = controller.snapshot();
        assert_eq!(state.lifecycle, ChannelLifecycleState::Errored);
        assert_eq!(client.query_count(), 0);
        assert_eq!(client.replies_count(), 0);
        assert_eq!(state.has_more, before.has_more);
        assert!(!state.loading_more);
        assert!(state.thread.as_ref().is_some_and(|t| !t.loading_more));
    }

    #[tokio::test(start_paused = true)]
    async fn errored_channel_can_initialize_again() {
        let client = test_client();
        client.fail_watch(Some(ChannelError::connection("socket closed")));
        let controller = controller_for(&client, test_config());
        controller.initialize().await;

        client.fail_watch(None);
        controller.initialize().await;
        let state = controller.snapshot();
        assert_eq!(state.lifecycle, ChannelLifecycleState::Active);
        assert!(state.error.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn mark_read_is_noop_when_read_events_disabled() {
        let client = test_client();
        client.set_config(ChannelConfig {
            read_events: false,
            ..ChannelConfig::default()
        });
        let controller = controller_for(&client, test_config());
        controller.initialize().await;

        controller.mark_read();
        settle(Duration::from_secs(1)).await;
        assert_eq!(client.mark_read_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn mark_read_is_throttled() {
        let client = test_client();
        let controller = controller_for(&client, test_config());
        controller.initialize().await;

        for _ in 0..5 {
            controller.mark_read();
        }
        settle(Duration::from_secs(1)).await;

        let calls = client.mark_read_count();
        assert!((1..=2).contains(&calls), "unexpected mark_read calls: {calls}");
    }

    #[tokio::test(start_paused = true)]
    async fn editing_state_is_published() {
        let client = test_client();
        let controller = controller_for(&client, test_config());
        controller.initialize().await;

        controller.set_editing(msg("a", 10));
        assert_eq!(
            controller.snapshot().editing.map(|m| m.id),
            Some("a".to_owned())
        );
        controller.clear_editing();
        assert!(controller.snapshot().editing.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn dispose_stops_late_send_completion() {
        let client = test_client();
        client.set_latency(Some(Duration::from_millis(100)));
        let store = InMemoryMessageStore::new();
        let controller = ChannelController::new(
            Arc::new(client.clone()),
            Some(Arc::new(store.clone())),
            test_config().with_offline_storage(true),
        );
        controller.initialize().await;

        let sender = controller.clone();
        let task = tokio::spawn(async move {
            sender
                .send(channel_core::MessageInput::text("late"))
                .await
        });
        tokio::task::yield_now().await;
        controller.dispose().await;
        let id = task.await.expect("send task").expect("preview id");

        let state = controller.snapshot();
        assert_eq!(state.lifecycle, ChannelLifecycleState::Disposed);
        assert_eq!(
            state.message(&id).map(|m| m.status),
            Some(MessageStatus::Sending)
        );
        assert!(store.is_closed());

        controller.load_more(false, false).await;
        controller.publish_now();
        assert_eq!(controller.snapshot().revision, state.revision);
    }
}
