//! Reconnecting publish/subscribe bus client
//!
//! [`BusClient`] is shared by the coordinator and the terminals. It owns a
//! [`Transport`] inside a background task, buffers publishes while the link
//! is down, replays subscriptions after every reconnect, and dispatches
//! inbound messages to per-subscription handler tasks.

mod backoff;
mod client;
mod memory;
mod mqtt;
mod queue;
mod transport;

pub use backoff::ExponentialBackoff;
pub use client::{BusClient, MessageHandler};
pub use memory::{MemoryBroker, MemoryTransport};
pub use mqtt::MqttTransport;
pub use queue::{OutboundMessage, OutboundQueue};
pub use transport::{Inbound, QoS, Transport};
