use async_trait::async_trait;
use channel_core::{ChannelConfig, ChannelError, ChannelSnapshot, Message, QueryOptions, UserRef};
use serde_json::Value;
use tokio::sync::broadcast;

/// Raw event stream delivered by a channel client.
pub type EventStream = broadcast::Receiver<Value>;

/// Remote channel collaborator: transport, auth and server state live behind it.
#[async_trait]
pub trait ChannelClient: Send + Sync {
    fn channel_id(&self) -> &str;

    /// Author used for optimistic previews.
    fn current_user(&self) -> UserRef;

    fn is_online(&self) -> bool;

    fn config(&self) -> ChannelConfig;

    /// Subscribe to raw channel events.
    fn subscribe(&self) -> EventStream;

    /// Start watching the channel and return its full state.
    async fn watch(&self) -> Result<ChannelSnapshot, ChannelError>;

    /// Up to `limit` of the newest messages older than `id_lt`, ascending.
    async fn query(&self, options: QueryOptions) -> Result<Vec<Message>, ChannelError>;

    /// Up to `limit` of the newest replies of `parent_id` older than `id_lt`, ascending.
    async fn get_replies(
        &self,
        parent_id: &str,
        options: QueryOptions,
    ) -> Result<Vec<Message>, ChannelError>;

    /// Send a message and return the stored server form.
    async fn send_message(&self, message: &Message) -> Result<Message, ChannelError>;

    async fn mark_read(&self) -> Result<(), ChannelError>;

    /// Re-establish the server-side watch after a reconnect.
    async fn activate(&self) -> Result<(), ChannelError>;
}
