use std::{collections::HashMap, sync::Arc};

use serde::{Deserialize, Serialize};

use crate::types::Member;

/// Bucket key used while the timeline has no messages yet.
pub const NO_MESSAGES_KEY: &str = "none";

/// Side-channel event interleaved into the rendered timeline.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub enum HistoryEvent {
    MemberAdded(Member),
    MemberRemoved(Member),
}

/// Side-channel events bucketed by the newest message id at receipt time.
#[derive(Debug, Clone, Default)]
pub struct EventHistory {
    buckets: Arc<HashMap<String, Vec<HistoryEvent>>>,
}

impl EventHistory {
    /// Append an event to the bucket of `last_message_id`, creating it if absent.
    pub fn record(&mut self, last_message_id: Option<&str>, event: HistoryEvent) {
        let key = last_message_id.unwrap_or(NO_MESSAGES_KEY).to_owned();
        Arc::make_mut(&mut self.buckets)
            .entry(key)
            .or_default()
            .push(event);
    }

    /// Events received while `message_id` was the newest message.
    pub fn events_after(&self, message_id: &str) -> &[HistoryEvent] {
        self.buckets
            .get(message_id)
            .map(Vec::as_slice)
            .unwrap_or_default()
    }

    pub fn shared(&self) -> Arc<HashMap<String, Vec<HistoryEvent>>> {
        Arc::clone(&self.buckets)
    }

    pub fn is_empty(&self) -> bool {
        self.buckets.is_empty()
    }
}
