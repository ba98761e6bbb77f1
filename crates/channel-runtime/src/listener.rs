//! Remote event listener: applies channel events to the local store.

use std::sync::Weak;

use channel_core::{ChannelEvent, HistoryEvent, MessageKind};
use serde_json::Value;
use tokio::{sync::broadcast::error::RecvError, task::JoinHandle};
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace, warn};

use crate::{
    client::EventStream,
    controller::{ChannelController, ControllerState, Inner},
};

/// Drive `events` until the token is cancelled or the stream closes.
pub(crate) fn spawn(
    weak: Weak<Inner>,
    mut events: EventStream,
    stop: CancellationToken,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        loop {
            tokio::select! {
                _ = stop.cancelled() => break,
                received = events.recv() => match received {
                    Ok(payload) => {
                        let Some(controller) = ChannelController::from_weak(&weak) else {
                            break;
                        };
                        controller.handle_raw_event(payload);
                    }
                    Err(RecvError::Lagged(skipped)) => {
                        warn!(skipped, "event listener lagged; continuing with newer events");
                    }
                    Err(RecvError::Closed) => break,
                },
            }
        }
        debug!("event listener stopped");
    })
}

impl ChannelController {
    /// Decode and apply a raw event. Malformed payloads are dropped.
    pub fn handle_raw_event(&self, payload: Value) {
        match ChannelEvent::from_value(payload) {
            Ok(event) => self.handle_event(event),
            Err(err) => {
                warn!(channel_id = %self.channel_id(), error = %err, "dropping malformed channel event");
            }
        }
    }

    /// Apply one event, publish through the throttled publisher and resync
    /// after a reconnect.
    pub fn handle_event(&self, event: ChannelEvent) {
        let reconnect = event.is_reconnect();
        trace!(kind = event.kind(), "channel event");
        {
            let mut state = self.inner.state.lock();
            if state.lifecycle.is_disposed() {
                return;
            }
            state.apply_event(event);
        }
        self.schedule_publish();

        if reconnect {
            let controller = self.clone();
            tokio::spawn(async move { controller.resync().await });
        }
    }

    async fn resync(&self) {
        if let Err(err) = self.inner.client.activate().await {
            warn!(channel_id = %self.channel_id(), code = %err.code, "channel reactivation failed");
        }
        if self.is_disposed() {
            return;
        }
        debug!(channel_id = %self.channel_id(), "resyncing newest page after reconnect");
        self.load_more(true, true).await;
    }
}

impl ControllerState {
    fn apply_event(&mut self, event: ChannelEvent) {
        match event {
            ChannelEvent::MessageNew { message }
            | ChannelEvent::MessageUpdated { message }
            | ChannelEvent::ReactionNew { message }
            | ChannelEvent::ReactionUpdated { message }
            | ChannelEvent::ReactionDeleted { message } => {
                self.store.insert_sorted(message.clone());
                self.refresh_thread_for(&message);
            }
            ChannelEvent::MessageDeleted { mut message } => {
                message.kind = MessageKind::Deleted;
                self.store.insert_sorted(message.clone());
                self.refresh_thread_for(&message);
            }
            ChannelEvent::MemberAdded { member } => {
                self.record_history(HistoryEvent::MemberAdded(member.clone()));
                self.store.main.upsert_member(member);
            }
            ChannelEvent::MemberUpdated { member } => self.store.main.upsert_member(member),
            ChannelEvent::MemberRemoved { member } => {
                self.store.main.remove_member(&member.user.id);
                self.record_history(HistoryEvent::MemberRemoved(member));
            }
            ChannelEvent::TypingStart {
                user,
                created_at_ms,
            } => self.store.main.set_typing(user, created_at_ms),
            ChannelEvent::TypingStop { user } => self.store.main.clear_typing(&user.id),
            ChannelEvent::MessageRead {
                user,
                created_at_ms,
            } => self.store.main.mark_read(user, created_at_ms),
            ChannelEvent::WatchingStart {
                user,
                watcher_count,
            } => self.store.main.add_watcher(user, watcher_count),
            ChannelEvent::WatchingStop {
                user,
                watcher_count,
            } => self.store.main.remove_watcher(&user.id, watcher_count),
            ChannelEvent::ChannelTruncated => {
                self.store.truncate();
                if let Some(thread) = self.thread.as_mut() {
                    thread.messages.clear();
                }
            }
            // Connectivity is read from the client at publish time.
            ChannelEvent::ConnectionChanged { .. } | ChannelEvent::ConnectionRecovered => {}
            ChannelEvent::Unknown => {}
        }
    }

    fn record_history(&mut self, event: HistoryEvent) {
        let newest = self.store.main.messages.newest().map(|m| m.id.clone());
        self.history.record(newest.as_deref(), event);
    }
}
