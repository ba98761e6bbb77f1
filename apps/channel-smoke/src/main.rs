mod logging;

use std::{process::ExitCode, sync::Arc, time::Duration};

use channel_core::{ChannelEvent, ControllerConfig, Message, MessageInput, UserRef};
use channel_runtime::{ChannelController, InMemoryChannelClient};
use channel_storage::{InMemoryMessageStore, MessageStore};
use serde_json::json;
use tracing::{error, info};

const CHANNEL_ID: &str = "smoke-general";

#[tokio::main]
async fn main() -> ExitCode {
    logging::init();

    let config = match ControllerConfig::from_env() {
        Ok(config) => config,
        Err(err) => {
            error!(error = %err, "invalid configuration");
            return ExitCode::FAILURE;
        }
    };

    let client = InMemoryChannelClient::new(CHANNEL_ID, UserRef::new("smoke-user"));
    client.set_watch_limit(3);
    client.seed_messages(
        (1..=6)
            .map(|i| Message::new(format!("seed-{i}"), UserRef::new("peer"), format!("seed {i}"), i))
            .collect(),
    );

    let store: Arc<dyn MessageStore> = Arc::new(InMemoryMessageStore::new());
    let controller = ChannelController::new(Arc::new(client.clone()), Some(store), config);
    let mut updates = controller.subscribe();

    controller.initialize().await;
    let state = controller.snapshot();
    if state.has_error() {
        error!(lifecycle = ?state.lifecycle, "channel failed to initialize");
        return ExitCode::FAILURE;
    }
    info!(messages = ?state.message_ids(), "channel ready");

    controller.load_more(false, false).await;

    client.fail_next_sends(1);
    let Some(failed_id) = controller.send(MessageInput::text("first try")).await else {
        error!("send rejected on an active channel");
        return ExitCode::FAILURE;
    };
    if let Some(failed) = controller.snapshot().message(&failed_id).cloned() {
        info!(message_id = %failed.id, status = ?failed.status, "retrying failed send");
        controller.retry(failed).await;
    }

    client.emit(&ChannelEvent::TypingStart {
        user: UserRef::new("peer"),
        created_at_ms: 7,
    });
    client.emit_raw(json!({ "type": "message.new", "message": "garbage" }));
    client.emit(&ChannelEvent::MessageNew {
        message: Message::new("peer-reply", UserRef::new("peer"), "welcome back", 8),
    });
    tokio::time::sleep(controller.config().publish_throttle() + Duration::from_millis(50)).await;

    let state = updates.borrow_and_update().clone();
    info!(
        revision = state.revision,
        messages = ?state.message_ids(),
        has_more = state.has_more,
        typing = state.typing.len(),
        "final channel state"
    );

    controller.dispose().await;
    ExitCode::SUCCESS
}
