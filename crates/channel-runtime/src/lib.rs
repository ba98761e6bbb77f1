//! Async runtime for one chat channel.
//!
//! [`ChannelController`] loads channel state through a [`ChannelClient`],
//! listens to its remote events, runs optimistic sends and backward
//! pagination, and publishes immutable [`channel_core::PublishedState`]
//! snapshots to presentation consumers.

/// Remote channel collaborator contract.
pub mod client;
mod controller;
mod listener;
/// Scripted in-process client.
pub mod memory;
mod pagination;
mod send;

#[cfg(test)]
pub(crate) mod test_support;

pub use client::{ChannelClient, EventStream};
pub use controller::ChannelController;
pub use memory::InMemoryChannelClient;
