use std::{sync::Arc, time::Duration};

use channel_core::{ControllerConfig, Message, UserRef};

use crate::{controller::ChannelController, memory::InMemoryChannelClient};

pub(crate) fn msg(id: &str, at: u64) -> Message {
    Message::new(id, UserRef::new("bob"), format!("body {id}"), at)
}

pub(crate) fn test_client() -> InMemoryChannelClient {
    InMemoryChannelClient::new("general", UserRef::new("alice"))
}

pub(crate) fn test_config() -> ControllerConfig {
    ControllerConfig::default()
}

pub(crate) fn controller_for(
    client: &InMemoryChannelClient,
    config: ControllerConfig,
) -> ChannelController {
    ChannelController::new(Arc::new(client.clone()), None, config)
}

/// Initialized controller over an empty channel.
pub(crate) async fn active(config: ControllerConfig) -> (InMemoryChannelClient, ChannelController) {
    let client = test_client();
    let controller = controller_for(&client, config);
    controller.initialize().await;
    (client, controller)
}

/// Let spawned tasks and coalescer timers run for `duration` of paused time.
pub(crate) async fn settle(duration: Duration) {
    tokio::task::yield_now().await;
    tokio::time::sleep(duration).await;
    tokio::task::yield_now().await;
}
