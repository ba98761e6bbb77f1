use tracing::debug;

use crate::{
    error::ChannelError,
    types::{Message, MessageStatus},
};

/// Result of a network send before it is folded back into the timeline.
#[derive(Debug, Clone, PartialEq)]
pub enum SendOutcome {
    /// Server accepted the message and echoed its stored form.
    Delivered { message: Message },
    /// Send failed with error details.
    Failed { error: ChannelError },
}

impl From<Result<Message, ChannelError>> for SendOutcome {
    fn from(result: Result<Message, ChannelError>) -> Self {
        match result {
            Ok(message) => Self::Delivered { message },
            Err(error) => Self::Failed { error },
        }
    }
}

/// Fold a send outcome into the message that replaces the preview by id.
///
/// The preview id always wins so the timeline entry keeps its identity across
/// the `sending → received | failed` transition.
pub fn normalize_send_outcome(preview: Message, outcome: SendOutcome) -> Message {
    match outcome {
        SendOutcome::Delivered { mut message } => {
            if message.id != preview.id {
                debug!(
                    preview_id = %preview.id,
                    server_id = %message.id,
                    "server echoed a different message id; keeping preview id"
                );
                message.id = preview.id;
            }
            message.status = MessageStatus::Received;
            message
        }
        SendOutcome::Failed { error } => {
            debug!(message_id = %preview.id, code = %error.code, "send failed");
            Message {
                status: MessageStatus::Failed,
                ..preview
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{error::ChannelErrorCategory, types::UserRef};

    fn preview() -> Message {
        Message::new("alice-1", UserRef::new("alice"), "hello", 100)
            .with_status(MessageStatus::Sending)
    }

    #[test]
    fn delivered_message_is_received_with_preview_id() {
        let echoed = Message::new("alice-1", UserRef::new("alice"), "hello", 101);
        let message = normalize_send_outcome(
            preview(),
            SendOutcome::Delivered {
                message: echoed.with_status(MessageStatus::Sending),
            },
        );

        assert_eq!(message.id, "alice-1");
        assert_eq!(message.status, MessageStatus::Received);
        assert_eq!(message.created_at_ms, 101);
    }

    #[test]
    fn delivered_message_with_foreign_id_keeps_preview_identity() {
        let echoed = Message::new("server-9", UserRef::new("alice"), "hello", 101);
        let message = normalize_send_outcome(preview(), SendOutcome::Delivered { message: echoed });
        assert_eq!(message.id, "alice-1");
    }

    #[test]
    fn failure_marks_preview_failed() {
        let message = normalize_send_outcome(
            preview(),
            SendOutcome::from(Err(ChannelError::new(
                ChannelErrorCategory::RateLimited,
                "rate_limited",
                "slow down",
            ))),
        );

        assert_eq!(message.id, "alice-1");
        assert_eq!(message.status, MessageStatus::Failed);
        assert_eq!(message.text, "hello");
    }
}
