//! Backward pagination for the main timeline and the open thread.

use channel_core::{ChannelError, Message, MessageList, MessageStatus, QueryOptions, ThreadView};
use tracing::{debug, warn};

use crate::controller::ChannelController;

/// Pagination flags of the main timeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct PaginationState {
    pub(crate) loading_more: bool,
    pub(crate) has_more: bool,
    pub(crate) has_more_local_messages: bool,
}

impl Default for PaginationState {
    fn default() -> Self {
        Self {
            loading_more: false,
            has_more: true,
            has_more_local_messages: true,
        }
    }
}

/// The open thread and its own pagination flags.
#[derive(Debug, Clone)]
pub(crate) struct ThreadState {
    pub(crate) parent: Message,
    pub(crate) messages: MessageList,
    pub(crate) has_more: bool,
    pub(crate) loading_more: bool,
}

impl ThreadState {
    pub(crate) fn view(&self) -> ThreadView {
        ThreadView {
            parent: self.parent.clone(),
            messages: self.messages.shared(),
            has_more: self.has_more,
            loading_more: self.loading_more,
        }
    }
}

/// Debounced completion of a thread page, matched against the open thread.
#[derive(Debug, Clone, PartialEq, Eq)]
pub(crate) struct ThreadPageFinished {
    pub(crate) parent_id: String,
    pub(crate) has_more: bool,
}

#[derive(Debug, Clone, Copy)]
enum PageSource {
    Network,
    Local,
}

/// The oldest entry was never confirmed by the server and has no position there.
struct OldestPending;

/// Cursor for the next older page; `None` requests the newest page.
fn page_cursor(messages: &MessageList) -> Result<Option<Message>, OldestPending> {
    match messages.oldest() {
        Some(oldest) if oldest.status != MessageStatus::Received => Err(OldestPending),
        oldest => Ok(oldest.cloned()),
    }
}

impl ChannelController {
    /// Load the next older page of the main timeline.
    ///
    /// `resync` fetches page one again and drops ephemeral messages;
    /// `force_online` skips the local-storage fallback.
    pub async fn load_more(&self, resync: bool, force_online: bool) {
        let online = self.inner.client.is_online() || force_online;
        let source = match (&self.inner.storage, online) {
            (_, true) => PageSource::Network,
            (Some(_), false) => PageSource::Local,
            (None, false) => {
                debug!(channel_id = %self.channel_id(), "offline without local storage; load_more skipped");
                return;
            }
        };

        let cursor = {
            let mut state = self.inner.state.lock();
            if let Err(err) = state.lifecycle.ensure_active("load_more") {
                debug!(channel_id = %self.channel_id(), code = %err.code, "load_more rejected");
                return;
            }
            let pagination = state.pagination;
            if pagination.loading_more {
                return;
            }
            match source {
                PageSource::Local if !pagination.has_more_local_messages => return,
                PageSource::Network if !resync && !pagination.has_more => return,
                _ => {}
            }

            state.pagination.loading_more = true;
            if resync {
                Ok(None)
            } else {
                let cursor = page_cursor(&state.store.main.messages);
                if cursor.is_err() {
                    state.pagination.loading_more = false;
                }
                cursor
            }
        };
        self.publish_now();

        let Ok(cursor) = cursor else {
            debug!(channel_id = %self.channel_id(), "oldest message unconfirmed; load_more skipped");
            return;
        };

        match source {
            PageSource::Network => self.load_network_page(cursor, resync).await,
            PageSource::Local => self.load_local_page(cursor).await,
        }
    }

    async fn load_network_page(&self, cursor: Option<Message>, resync: bool) {
        let limit = self.inner.config.main_page_size;
        let options = QueryOptions::page(limit, cursor.map(|m| m.id));
        let page = match self.inner.client.query(options).await {
            Ok(page) => page,
            Err(err) => {
                self.abort_main_page(&err);
                return;
            }
        };

        let has_more = page.len() >= limit;
        {
            let mut state = self.inner.state.lock();
            if state.lifecycle.is_disposed() {
                return;
            }
            if resync {
                state.store.main.messages.filter_ephemeral();
            }
            state.store.merge_bulk(page.clone(), !resync);
        }
        debug!(
            channel_id = %self.channel_id(),
            returned = page.len(),
            has_more,
            "merged message page"
        );

        self.persist_page(&page).await;
        if self.is_disposed() {
            return;
        }
        self.schedule_main_finished(has_more);
    }

    async fn load_local_page(&self, cursor: Option<Message>) {
        let Some(storage) = self.inner.storage.clone() else {
            return;
        };
        let limit = self.inner.config.main_page_size;
        let page = match storage.query(cursor.as_ref(), limit).await {
            Ok(page) => page,
            Err(err) => {
                self.abort_main_page(&ChannelError::from(err));
                return;
            }
        };

        let has_more_local = page.len() >= limit;
        {
            let mut state = self.inner.state.lock();
            if state.lifecycle.is_disposed() {
                return;
            }
            state.store.merge_bulk(page, true);
        }
        self.publish_now();
        self.schedule_local_finished(has_more_local);
    }

    fn abort_main_page(&self, err: &ChannelError) {
        warn!(
            channel_id = %self.channel_id(),
            code = %err.code,
            message = %err.message,
            "load_more failed"
        );
        {
            let mut state = self.inner.state.lock();
            if state.lifecycle.is_disposed() {
                return;
            }
            state.pagination.loading_more = false;
        }
        self.publish_now();
    }

    pub(crate) fn finish_main_page(&self, has_more: bool) {
        {
            let mut state = self.inner.state.lock();
            if state.lifecycle.is_disposed() {
                return;
            }
            state.pagination.loading_more = false;
            state.pagination.has_more = has_more;
        }
        self.publish_now();
    }

    pub(crate) fn finish_local_page(&self, has_more_local: bool) {
        {
            let mut state = self.inner.state.lock();
            if state.lifecycle.is_disposed() {
                return;
            }
            state.pagination.loading_more = false;
            state.pagination.has_more_local_messages = has_more_local;
        }
        self.publish_now();
    }

    /// Throttled entry point for scroll-driven pagination.
    pub fn request_load_more(&self) {
        self.schedule_load_more();
    }

    /// Show the thread rooted at `parent` with the replies already stored.
    pub fn open_thread(&self, parent: Message) {
        {
            let mut state = self.inner.state.lock();
            if state.lifecycle.is_disposed() {
                return;
            }
            let messages = state.store.replies(&parent.id);
            state.thread = Some(ThreadState {
                parent,
                messages,
                has_more: true,
                loading_more: false,
            });
        }
        self.publish_now();
    }

    pub fn close_thread(&self) {
        self.inner.state.lock().thread = None;
        self.publish_now();
    }

    /// Load the next older page of replies for the open thread.
    pub async fn load_more_thread(&self) {
        let limit = self.inner.config.thread_page_size;
        let request = {
            let mut state = self.inner.state.lock();
            if let Err(err) = state.lifecycle.ensure_active("load_more_thread") {
                debug!(channel_id = %self.channel_id(), code = %err.code, "thread load_more rejected");
                return;
            }
            let Some(thread) = state.thread.as_mut() else {
                return;
            };
            if thread.loading_more || !thread.has_more {
                return;
            }
            thread.loading_more = true;
            let cursor = page_cursor(&thread.messages);
            if cursor.is_err() {
                thread.loading_more = false;
            }
            cursor.map(|cursor| (thread.parent.id.clone(), cursor))
        };
        self.publish_now();

        let Ok((parent_id, cursor)) = request else {
            debug!(channel_id = %self.channel_id(), "oldest reply unconfirmed; thread page skipped");
            return;
        };

        let options = QueryOptions::page(limit, cursor.map(|m| m.id));
        let page = match self.inner.client.get_replies(&parent_id, options).await {
            Ok(page) => page,
            Err(err) => {
                warn!(
                    channel_id = %self.channel_id(),
                    parent_id = %parent_id,
                    code = %err.code,
                    "thread load_more failed"
                );
                self.with_open_thread(&parent_id, |thread| thread.loading_more = false);
                return;
            }
        };

        let has_more = page.len() >= limit;
        {
            let mut state = self.inner.state.lock();
            if state.lifecycle.is_disposed() {
                return;
            }
            state.store.merge_replies(&parent_id, page, true);
            let replies = state.store.replies(&parent_id);
            if let Some(thread) = state.thread.as_mut()
                && thread.parent.id == parent_id
            {
                thread.messages = replies;
            }
        }
        self.publish_now();
        self.schedule_thread_finished(ThreadPageFinished {
            parent_id,
            has_more,
        });
    }

    pub(crate) fn finish_thread_page(&self, finished: ThreadPageFinished) {
        self.with_open_thread(&finished.parent_id, |thread| {
            thread.loading_more = false;
            thread.has_more = finished.has_more;
        });
    }

    /// Apply `update` to the open thread if it is still `parent_id`, then publish.
    fn with_open_thread(&self, parent_id: &str, update: impl FnOnce(&mut ThreadState)) {
        {
            let mut state = self.inner.state.lock();
            if state.lifecycle.is_disposed() {
                return;
            }
            match state.thread.as_mut() {
                Some(thread) if thread.parent.id == parent_id => update(thread),
                _ => {
                    debug!(parent_id, "thread closed or switched; page result ignored");
                    return;
                }
            }
        }
        self.publish_now();
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, time::Duration};

    use channel_core::{ChannelEvent, ControllerConfig, MessageInput};
    use channel_storage::{InMemoryMessageStore, MessageStore};

    use super::*;
    use crate::test_support::{controller_for, msg, settle, test_client, test_config};

    fn small_pages() -> ControllerConfig {
        ControllerConfig {
            main_page_size: 2,
            thread_page_size: 2,
            ..test_config()
        }
    }

    #[tokio::test(start_paused = true)]
    async fn older_page_is_prepended_and_short_page_ends_pagination() {
        let client = test_client();
        client.set_watch_limit(3);
        client.seed_messages(vec![
            msg("x", 1),
            msg("y", 2),
            msg("a", 10),
            msg("b", 20),
            msg("c", 30),
        ]);
        let controller = controller_for(&client, test_config());
        controller.initialize().await;
        assert_eq!(controller.snapshot().message_ids(), ["a", "b", "c"]);

        controller.load_more(false, false).await;
        settle(Duration::from_millis(10)).await;

        let state = controller.snapshot();
        assert_eq!(state.message_ids(), ["x", "y", "a", "b", "c"]);
        assert!(!state.has_more);
        assert!(!state.loading_more);

        controller.load_more(false, false).await;
        assert_eq!(client.query_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn full_page_keeps_has_more() {
        let client = test_client();
        client.set_watch_limit(2);
        client.seed_messages((1..=5).map(|i| msg(&format!("m{i}"), i)).collect());
        let controller = controller_for(&client, small_pages());
        controller.initialize().await;

        controller.load_more(false, false).await;
        settle(Duration::from_millis(10)).await;

        let state = controller.snapshot();
        assert_eq!(state.message_ids(), ["m2", "m3", "m4", "m5"]);
        assert!(state.has_more);
    }

    #[tokio::test(start_paused = true)]
    async fn concurrent_load_more_issues_one_query() {
        let client = test_client();
        client.set_watch_limit(1);
        client.seed_messages(vec![msg("a", 1), msg("b", 2)]);
        let controller = controller_for(&client, test_config());
        controller.initialize().await;
        client.set_latency(Some(Duration::from_millis(200)));

        tokio::join!(
            controller.load_more(false, false),
            controller.load_more(false, false),
            controller.load_more(false, false),
        );

        assert_eq!(client.query_count(), 1);
        assert_eq!(controller.snapshot().message_ids(), ["a", "b"]);
    }

    #[tokio::test(start_paused = true)]
    async fn sending_oldest_message_blocks_pagination() {
        let client = test_client();
        let controller = controller_for(&client, test_config());
        controller.initialize().await;
        client.set_latency(Some(Duration::from_secs(30)));

        let sender = controller.clone();
        let send = tokio::spawn(async move { sender.send(MessageInput::text("first")).await });
        tokio::task::yield_now().await;

        controller.load_more(false, false).await;
        let state = controller.snapshot();
        assert_eq!(client.query_count(), 0);
        assert!(!state.loading_more);
        assert_eq!(
            state.messages.first().map(|m| m.status),
            Some(MessageStatus::Sending)
        );
        send.abort();
    }

    #[tokio::test(start_paused = true)]
    async fn failed_oldest_message_blocks_pagination() {
        let client = test_client();
        let controller = controller_for(&client, test_config());
        controller.initialize().await;

        client.fail_next_sends(1);
        let id = controller
            .send(MessageInput::text("lost"))
            .await
            .expect("preview id");

        controller.load_more(false, false).await;
        let state = controller.snapshot();
        assert_eq!(client.query_count(), 0);
        assert!(!state.loading_more);
        assert!(state.has_more);
        assert_eq!(
            state.message(&id).map(|m| m.status),
            Some(MessageStatus::Failed)
        );
    }

    #[tokio::test(start_paused = true)]
    async fn query_failure_leaves_flags_untouched() {
        let client = test_client();
        client.set_watch_limit(1);
        client.seed_messages(vec![msg("a", 1), msg("b", 2)]);
        let controller = controller_for(&client, test_config());
        controller.initialize().await;

        client.fail_next_queries(1);
        controller.load_more(false, false).await;

        let state = controller.snapshot();
        assert!(!state.loading_more);
        assert!(state.has_more);
        assert_eq!(state.message_ids(), ["b"]);
    }

    #[tokio::test(start_paused = true)]
    async fn request_load_more_is_throttled() {
        let client = test_client();
        client.set_watch_limit(1);
        client.seed_messages((1..=10).map(|i| msg(&format!("m{i}"), i)).collect());
        let controller = controller_for(&client, small_pages());
        controller.initialize().await;

        for _ in 0..5 {
            controller.request_load_more();
        }
        settle(Duration::from_millis(100)).await;
        assert_eq!(client.query_count(), 1);
    }

    #[tokio::test(start_paused = true)]
    async fn offline_start_hydrates_and_pages_from_local_storage() {
        let store = InMemoryMessageStore::new();
        store
            .insert_messages_for_channel("general", &[msg("m1", 1), msg("m2", 2), msg("m3", 3)])
            .await
            .expect("seed local store");

        let client = test_client();
        client.set_online(false);
        let controller = ChannelController::new(
            Arc::new(client.clone()),
            Some(Arc::new(store)),
            small_pages().with_offline_storage(true),
        );
        controller.initialize().await;

        let state = controller.snapshot();
        assert_eq!(state.message_ids(), ["m2", "m3"]);
        assert!(state.has_more_local_messages);
        assert!(!state.online);
        assert_eq!(client.watch_count(), 0);

        controller.load_more(false, false).await;
        settle(Duration::from_millis(10)).await;

        let state = controller.snapshot();
        assert_eq!(state.message_ids(), ["m1", "m2", "m3"]);
        assert!(!state.has_more_local_messages);
        assert!(!state.loading_more);
        assert_eq!(client.query_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn offline_without_storage_does_nothing() {
        let client = test_client();
        let controller = controller_for(&client, test_config());
        controller.initialize().await;
        client.set_online(false);

        controller.load_more(false, false).await;
        assert_eq!(client.query_count(), 0);
        assert!(!controller.snapshot().loading_more);
    }

    #[tokio::test(start_paused = true)]
    async fn open_thread_shows_exactly_the_stored_replies() {
        let client = test_client();
        client.seed_messages(vec![msg("root", 10), msg("other", 11)]);
        let controller = controller_for(&client, test_config());
        controller.initialize().await;

        controller.handle_event(ChannelEvent::MessageNew {
            message: msg("r1", 12).with_parent("root"),
        });
        controller.handle_event(ChannelEvent::MessageNew {
            message: msg("o1", 13).with_parent("other"),
        });

        controller.open_thread(msg("root", 10));
        let thread = controller.snapshot().thread.expect("thread is open");
        let ids: Vec<_> = thread.messages.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, ["r1"]);
        assert_eq!(controller.snapshot().message_ids(), ["root", "other"]);
    }

    #[tokio::test(start_paused = true)]
    async fn thread_pagination_is_independent_of_main_timeline() {
        let client = test_client();
        client.seed_messages(vec![
            msg("root", 10),
            msg("r1", 11).with_parent("root"),
            msg("r2", 12).with_parent("root"),
            msg("r3", 13).with_parent("root"),
        ]);
        let controller = controller_for(&client, small_pages());
        controller.initialize().await;
        let main_before = controller.snapshot();

        controller.open_thread(msg("root", 10));
        controller.load_more_thread().await;
        settle(Duration::from_millis(10)).await;

        let state = controller.snapshot();
        let thread = state.thread.as_ref().expect("thread is open");
        let ids: Vec<_> = thread.messages.iter().map(|m| m.id.as_str()).collect();
        assert_eq!(ids, ["r2", "r3"]);
        assert!(thread.has_more);
        assert!(!thread.loading_more);
        assert_eq!(state.message_ids(), main_before.message_ids());
        assert_eq!(state.has_more, main_before.has_more);
        assert_eq!(client.replies_count(), 1);
        assert_eq!(client.query_count(), 0);
    }

    #[tokio::test(start_paused = true)]
    async fn thread_page_is_ignored_after_thread_switch() {
        let client = test_client();
        client.seed_messages(vec![
            msg("root", 10),
            msg("other", 11),
            msg("r1", 12).with_parent("root"),
        ]);
        let controller = controller_for(&client, test_config());
        controller.initialize().await;
        client.set_latency(Some(Duration::from_millis(100)));

        controller.open_thread(msg("root", 10));
        let loader = controller.clone();
        let page = tokio::spawn(async move { loader.load_more_thread().await });
        tokio::task::yield_now().await;
        controller.open_thread(msg("other", 11));
        page.await.expect("thread page task");
        settle(Duration::from_millis(10)).await;

        let thread = controller.snapshot().thread.expect("thread is open");
        assert_eq!(thread.parent.id, "other");
        assert!(thread.messages.is_empty());
        assert!(thread.has_more);
    }
}
