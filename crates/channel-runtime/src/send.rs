//! Optimistic send pipeline.

use std::time::{SystemTime, UNIX_EPOCH};

use channel_core::{
    Message, MessageInput, MessageKind, MessageStatus, SendOutcome, TimelineMergeError,
    normalize_send_outcome,
};
use tracing::{debug, info, warn};
use uuid::Uuid;

use crate::controller::ChannelController;

fn now_ms() -> u64 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|elapsed| elapsed.as_millis() as u64)
        .unwrap_or_default()
}

impl ChannelController {
    /// Build a local `Sending` message for `input` authored by the current user.
    pub fn create_preview(&self, input: MessageInput) -> Message {
        let user = self.inner.client.current_user();
        Message {
            id: format!("{}-{}", user.id, Uuid::new_v4()),
            text: input.text,
            attachments: input.attachments,
            status: MessageStatus::Sending,
            kind: MessageKind::Regular,
            user,
            created_at_ms: now_ms(),
            parent_id: input.parent.map(|parent| parent.id),
            mentioned_users: input.mentioned_users,
            extra: input.extra,
            ..Message::default()
        }
    }

    /// Insert a preview immediately, then deliver it.
    ///
    /// Returns the preview id, or `None` when the channel is not active.
    /// Delivery failures surface as a `Failed` message, never as an error.
    pub async fn send(&self, input: MessageInput) -> Option<String> {
        let preview = self.create_preview(input);
        {
            let mut state = self.inner.state.lock();
            if let Err(err) = state.lifecycle.ensure_active("send") {
                warn!(channel_id = %self.channel_id(), code = %err.code, "send rejected");
                return None;
            }
            state.store.main.messages.filter_errored();
            if let Some(parent_id) = preview.parent_id.as_deref() {
                state.store.filter_errored_replies(parent_id);
            }
            state.store.insert_sorted(preview.clone());
            state.editing = None;
            state.refresh_thread_for(&preview);
        }
        self.publish_now();

        let id = preview.id.clone();
        self.dispatch(preview).await;
        Some(id)
    }

    /// Resend a failed message under its original id.
    pub async fn retry(&self, message: Message) {
        let message = message.with_status(MessageStatus::Sending);
        {
            let mut state = self.inner.state.lock();
            if let Err(err) = state.lifecycle.ensure_active("retry") {
                warn!(message_id = %message.id, code = %err.code, "retry rejected");
                return;
            }
            state.store.insert_sorted(message.clone());
            state.refresh_thread_for(&message);
        }
        self.publish_now();
        self.dispatch(message).await;
    }

    async fn dispatch(&self, message: Message) {
        if let Some(storage) = &self.inner.storage {
            if let Err(err) = storage.insert(&message).await {
                warn!(message_id = %message.id, error = %err, "failed to persist outgoing message");
            }
            if self.is_disposed() {
                return;
            }
        }

        let result = self.inner.client.send_message(&message).await;
        let settled = normalize_send_outcome(message, SendOutcome::from(result));
        {
            let mut state = self.inner.state.lock();
            if state.lifecycle.is_disposed() {
                debug!(message_id = %settled.id, "send settled after dispose; ignored");
                return;
            }
            if let Err(err) = state.store.update(settled.clone()) {
                debug!(message_id = %settled.id, error = %err, "message gone before send settled");
                return;
            }
            state.refresh_thread_for(&settled);
        }
        match settled.status {
            MessageStatus::Failed => {
                warn!(message_id = %settled.id, "send failed; message kept for retry");
            }
            _ => info!(message_id = %settled.id, "message delivered"),
        }
        self.publish_now();

        if let Some(storage) = &self.inner.storage
            && let Err(err) = storage.update(&settled).await
        {
            warn!(message_id = %settled.id, error = %err, "failed to persist send outcome");
        }
    }

    /// Replace a stored message by id, in the main timeline and its thread.
    pub async fn update_message(&self, message: Message) -> Result<(), TimelineMergeError> {
        {
            let mut state = self.inner.state.lock();
            if state.lifecycle.is_disposed() {
                return Ok(());
            }
            state.store.update(message.clone())?;
            state.refresh_thread_for(&message);
        }
        self.publish_now();

        if let Some(storage) = &self.inner.storage
            && let Err(err) = storage.update(&message).await
        {
            warn!(message_id = %message.id, error = %err, "failed to persist message update");
        }
        Ok(())
    }

    /// Remove a message locally. Returns the removed message, if any.
    pub fn remove_message(&self, id: &str) -> Option<Message> {
        let removed = {
            let mut state = self.inner.state.lock();
            if state.lifecycle.is_disposed() {
                return None;
            }
            let removed = state.store.remove(id)?;
            state.refresh_thread_for(&removed);
            removed
        };
        self.publish_now();
        Some(removed)
    }
}

#[cfg(test)]
mod tests {
    use std::{sync::Arc, time::Duration};

    use channel_core::{ChannelEvent, ControllerConfig};
    use channel_storage::{InMemoryMessageStore, MessageStore};

    use super::*;
    use crate::{
        ChannelClient,
        test_support::{active, controller_for, msg, settle, test_client, test_config},
    };

    #[tokio::test(start_paused = true)]
    async fn preview_is_visible_as_sending_before_network_completes() {
        let (client, controller) = active(test_config()).await;
        client.set_latency(Some(Duration::from_millis(500)));

        let sender = controller.clone();
        let send = tokio::spawn(async move { sender.send(MessageInput::text("hello")).await });
        tokio::task::yield_now().await;

        let state = controller.snapshot();
        assert_eq!(state.messages.len(), 1);
        let preview = &state.messages[0];
        assert_eq!(preview.text, "hello");
        assert_eq!(preview.status, MessageStatus::Sending);
        assert!(preview.id.starts_with("alice-"));

        let id = send.await.expect("send task").expect("preview id");
        let state = controller.snapshot();
        assert_eq!(state.message_ids(), [id.as_str()]);
        assert_eq!(state.messages[0].status, MessageStatus::Received);
    }

    #[tokio::test(start_paused = true)]
    async fn failed_send_keeps_id_and_retry_delivers() {
        let (client, controller) = active(test_config()).await;
        client.fail_next_sends(1);

        let id = controller
            .send(MessageInput::text("flaky"))
            .await
            .expect("preview id");
        let failed = controller
            .snapshot()
            .message(&id)
            .cloned()
            .expect("failed message stays visible");
        assert_eq!(failed.status, MessageStatus::Failed);

        controller.retry(failed).await;
        let state = controller.snapshot();
        assert_eq!(state.message_ids(), [id.as_str()]);
        assert_eq!(state.messages[0].status, MessageStatus::Received);
        assert_eq!(client.send_count(), 2);
        assert!(client.server_message(&id).is_some());
    }

    async fn failed_send(
        client: &crate::InMemoryChannelClient,
        controller: &ChannelController,
    ) -> Message {
        client.fail_next_sends(1);
        let id = controller
            .send(MessageInput::text("flaky"))
            .await
            .expect("preview id");
        controller
            .snapshot()
            .message(&id)
            .cloned()
            .expect("failed message stays visible")
    }

    #[tokio::test(start_paused = true)]
    async fn retry_passes_through_sending_before_received() {
        let (client, controller) = active(test_config()).await;
        let failed = failed_send(&client, &controller).await;
        client.set_latency(Some(Duration::from_millis(500)));

        let retrier = controller.clone();
        let pending = failed.clone();
        let retry = tokio::spawn(async move { retrier.retry(pending).await });
        tokio::task::yield_now().await;

        let state = controller.snapshot();
        assert_eq!(state.message_ids(), [failed.id.as_str()]);
        assert_eq!(state.messages[0].status, MessageStatus::Sending);

        retry.await.expect("retry task");
        let state = controller.snapshot();
        assert_eq!(state.message_ids(), [failed.id.as_str()]);
        assert_eq!(state.messages[0].status, MessageStatus::Received);
    }

    #[tokio::test(start_paused = true)]
    async fn retry_that_fails_again_ends_failed_under_same_id() {
        let (client, controller) = active(test_config()).await;
        let failed = failed_send(&client, &controller).await;
        client.fail_next_sends(1);
        client.set_latency(Some(Duration::from_millis(500)));

        let retrier = controller.clone();
        let pending = failed.clone();
        let retry = tokio::spawn(async move { retrier.retry(pending).await });
        tokio::task::yield_now().await;
        assert_eq!(
            controller.snapshot().message(&failed.id).map(|m| m.status),
            Some(MessageStatus::Sending)
        );

        retry.await.expect("retry task");
        let state = controller.snapshot();
        assert_eq!(state.message_ids(), [failed.id.as_str()]);
        assert_eq!(state.messages[0].status, MessageStatus::Failed);
        assert_eq!(client.send_count(), 2);
        assert!(client.server_message(&failed.id).is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn new_send_evicts_previous_failures_and_editing_state() {
        let (client, controller) = active(test_config()).await;
        client.fail_next_sends(1);
        let failed = controller
            .send(MessageInput::text("lost"))
            .await
            .expect("preview id");
        controller.set_editing(msg("a", 1));

        let delivered = controller
            .send(MessageInput::text("second"))
            .await
            .expect("preview id");
        let state = controller.snapshot();
        assert!(state.message(&failed).is_none());
        assert!(state.message(&delivered).is_some());
        assert!(state.editing.is_none());
    }

    #[tokio::test(start_paused = true)]
    async fn thread_reply_lands_in_open_thread_only() {
        let client = test_client();
        client.seed_messages(vec![msg("root", 10)]);
        let controller = controller_for(&client, test_config());
        controller.initialize().await;
        controller.open_thread(msg("root", 10));

        let id = controller
            .send(MessageInput::text("in thread").in_thread(msg("root", 10)))
            .await
            .expect("preview id");

        let state = controller.snapshot();
        assert_eq!(state.message_ids(), ["root"]);
        let thread = state.thread.expect("thread is open");
        assert_eq!(thread.messages.len(), 1);
        assert_eq!(thread.messages[0].id, id);
        assert_eq!(thread.messages[0].parent_id.as_deref(), Some("root"));
        assert_eq!(thread.messages[0].status, MessageStatus::Received);
    }

    #[tokio::test(start_paused = true)]
    async fn remote_echo_before_completion_does_not_duplicate() {
        let (client, controller) = active(test_config()).await;
        client.set_latency(Some(Duration::from_millis(100)));

        let sender = controller.clone();
        let send = tokio::spawn(async move { sender.send(MessageInput::text("echo")).await });
        tokio::task::yield_now().await;
        let preview = controller.snapshot().messages[0].clone();
        client.emit(&ChannelEvent::MessageNew {
            message: preview.clone().with_status(MessageStatus::Received),
        });

        send.await.expect("send task");
        settle(Duration::from_secs(1)).await;
        assert_eq!(controller.snapshot().message_ids(), [preview.id.as_str()]);
    }

    #[tokio::test(start_paused = true)]
    async fn offline_durability_persists_preview_and_outcome() {
        let store = InMemoryMessageStore::new();
        let client = test_client();
        let controller = ChannelController::new(
            Arc::new(client.clone()),
            Some(Arc::new(store.clone())),
            ControllerConfig::default().with_offline_storage(true),
        );
        controller.initialize().await;

        let id = controller
            .send(MessageInput::text("durable"))
            .await
            .expect("preview id");

        let stored = store
            .query_messages(client.channel_id(), None, 10)
            .await
            .expect("local query");
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0].id, id);
        assert_eq!(stored[0].status, MessageStatus::Received);
    }

    #[tokio::test(start_paused = true)]
    async fn update_and_remove_apply_by_id() {
        let client = test_client();
        client.seed_messages(vec![msg("a", 10), msg("b", 20)]);
        let controller = controller_for(&client, test_config());
        controller.initialize().await;

        let mut edited = msg("a", 10);
        edited.text = "edited".into();
        controller
            .update_message(edited)
            .await
            .expect("known id updates");
        assert_eq!(
            controller.snapshot().message("a").map(|m| m.text.as_str()),
            Some("edited")
        );

        let err = controller
            .update_message(msg("zz", 1))
            .await
            .expect_err("unknown id fails");
        assert_eq!(err, TimelineMergeError::MissingMessage("zz".into()));

        assert!(controller.remove_message("b").is_some());
        assert!(controller.remove_message("b").is_none());
        assert_eq!(controller.snapshot().message_ids(), ["a"]);
    }
}
