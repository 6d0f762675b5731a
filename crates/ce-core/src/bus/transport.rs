//! Transport abstraction under the bus client

use async_trait::async_trait;
use bytes::Bytes;
use serde::{Deserialize, Serialize};

use super::queue::OutboundMessage;
use crate::error::TransportError;

/// Delivery guarantee requested from the broker
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum QoS {
    /// Fire and forget
    AtMostOnce,
    /// Redelivered until acknowledged; receivers must be idempotent
    #[default]
    AtLeastOnce,
}

/// A message received from the bus
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Inbound {
    /// Topic it was published on
    pub topic: String,
    /// Raw payload
    pub payload: Bytes,
}

impl Inbound {
    /// Create an inbound message
    pub fn new(topic: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
        }
    }
}

/// A session-oriented connection to a publish/subscribe broker.
///
/// The bus client drives a transport from a single task, so implementations
/// need not be `Sync`. `recv` must be cancel-safe: the client races it
/// against outbound commands.
#[async_trait]
pub trait Transport: Send + 'static {
    /// Establish a fresh session. Subscriptions from earlier sessions are
    /// not assumed to survive.
    async fn connect(&mut self) -> Result<(), TransportError>;

    /// Subscribe to a topic filter for the current session
    async fn subscribe(&mut self, filter: &str, qos: QoS) -> Result<(), TransportError>;

    /// Publish a payload
    async fn publish(&mut self, topic: &str, payload: Bytes, qos: QoS)
        -> Result<(), TransportError>;

    /// Wait for the next inbound message. An error means the session is gone.
    async fn recv(&mut self) -> Result<Inbound, TransportError>;

    /// Publishes accepted during the last session that the broker never
    /// confirmed, oldest first. Called after the session is lost; the bus
    /// client queues them for the next session.
    fn take_unacked(&mut self) -> Vec<OutboundMessage> {
        Vec::new()
    }
}
