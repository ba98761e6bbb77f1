//! Core model for the channel state-synchronization engine.
//!
//! This crate defines the message/event model, the local timeline store, the
//! call coalescer, the lifecycle state machine and the published snapshot
//! shared with presentation consumers.

/// Debounce/throttle schedulers.
pub mod coalesce;
/// Environment-backed controller tuning.
pub mod config;
pub mod error;
/// Remote event model and decoding.
pub mod event;
/// Side-channel event history.
pub mod history;
/// Send outcome normalization.
pub mod normalization;
/// Published snapshot channel.
pub mod publisher;
/// Externally visible snapshot types.
pub mod state;
/// Channel lifecycle state machine.
pub mod state_machine;
/// Local ordered timeline store.
pub mod timeline;
/// Message, membership and query types.
pub mod types;

pub use coalesce::{Debouncer, Throttler};
pub use config::{ConfigError, ControllerConfig};
pub use error::{ChannelError, ChannelErrorCategory};
pub use event::{ChannelEvent, EventDecodeError};
pub use history::{EventHistory, HistoryEvent, NO_MESSAGES_KEY};
pub use normalization::{SendOutcome, normalize_send_outcome};
pub use publisher::{StatePublisher, StateStream};
pub use state::{PublishedState, ThreadView};
pub use state_machine::ChannelStateMachine;
pub use timeline::{ChannelStore, MessageList, Timeline, TimelineMergeError};
pub use types::{
    Attachment, ChannelConfig, ChannelLifecycleState, ChannelSnapshot, Member, Message,
    MessageInput, MessageKind, MessageStatus, QueryOptions, ReadState, TypingIndicator, UserRef,
};
