//! In-process broker for single-host runs and tests

use std::sync::Arc;

use async_trait::async_trait;
use bytes::Bytes;
use dashmap::DashMap;
use tokio::sync::mpsc;

use ce_protocol::topic_matches;

use super::transport::{Inbound, QoS, Transport};
use crate::error::TransportError;

enum Delivery {
    Message(Inbound),
    Dropped,
}

#[derive(Default)]
struct Slot {
    partitioned: bool,
    filters: Vec<String>,
    session: Option<mpsc::UnboundedSender<Delivery>>,
}

/// Broker shared by every [`MemoryTransport`] created from it.
///
/// Individual clients can be cut off with [`disconnect`](Self::disconnect)
/// and let back in with [`restore`](Self::restore), which is how the
/// reconnect paths are exercised without a network.
#[derive(Clone, Default)]
pub struct MemoryBroker {
    clients: Arc<DashMap<String, Slot>>,
}

impl MemoryBroker {
    pub fn new() -> Self {
        Self::default()
    }

    /// Create a transport that connects as `client_id`
    pub fn transport(&self, client_id: impl Into<String>) -> MemoryTransport {
        MemoryTransport {
            broker: self.clone(),
            client_id: client_id.into(),
            inbox: None,
        }
    }

    /// Drop the client's session and refuse new connects until restored
    pub fn disconnect(&self, client_id: &str) {
        let mut slot = self.clients.entry(client_id.to_string()).or_default();
        slot.partitioned = true;
        slot.filters.clear();
        if let Some(session) = slot.session.take() {
            let _ = session.send(Delivery::Dropped);
        }
        tracing::debug!(client = %client_id, "Memory broker partitioned client");
    }

    /// Allow the client to connect again
    pub fn restore(&self, client_id: &str) {
        if let Some(mut slot) = self.clients.get_mut(client_id) {
            slot.partitioned = false;
        }
        tracing::debug!(client = %client_id, "Memory broker restored client");
    }

    /// Whether the client currently holds a session
    pub fn is_connected(&self, client_id: &str) -> bool {
        self.clients
            .get(client_id)
            .map(|slot| slot.session.is_some())
            .unwrap_or(false)
    }

    /// Publish as if from an external client
    pub fn publish(&self, topic: &str, payload: Bytes) {
        for entry in self.clients.iter() {
            let slot = entry.value();
            let Some(session) = &slot.session else {
                continue;
            };
            if slot.filters.iter().any(|f| topic_matches(f, topic)) {
                let _ = session.send(Delivery::Message(Inbound::new(topic, payload.clone())));
            }
        }
    }
}

/// One client's connection to a [`MemoryBroker`]
pub struct MemoryTransport {
    broker: MemoryBroker,
    client_id: String,
    inbox: Option<mpsc::UnboundedReceiver<Delivery>>,
}

impl MemoryTransport {
    fn ensure_session(&self) -> Result<(), TransportError> {
        let live = self.inbox.is_some()
            && self
                .broker
                .clients
                .get(&self.client_id)
                .map(|slot| slot.session.is_some())
                .unwrap_or(false);
        if live {
            Ok(())
        } else {
            Err(TransportError::Disconnected)
        }
    }
}

#[async_trait]
impl Transport for MemoryTransport {
    async fn connect(&mut self) -> Result<(), TransportError> {
        let (tx, rx) = mpsc::unbounded_channel();
        {
            let mut slot = self.broker.clients.entry(self.client_id.clone()).or_default();
            if slot.partitioned {
                return Err(TransportError::ConnectFailed(format!(
                    "{} cannot reach broker",
                    self.client_id
                )));
            }
            slot.filters.clear();
            if let Some(previous) = slot.session.replace(tx) {
                let _ = previous.send(Delivery::Dropped);
            }
        }
        self.inbox = Some(rx);
        Ok(())
    }

    async fn subscribe(&mut self, filter: &str, _qos: QoS) -> Result<(), TransportError> {
        self.ensure_session()?;
        if let Some(mut slot) = self.broker.clients.get_mut(&self.client_id) {
            if !slot.filters.iter().any(|f| f == filter) {
                slot.filters.push(filter.to_string());
            }
        }
        Ok(())
    }

    async fn publish(
        &mut self,
        topic: &str,
        payload: Bytes,
        _qos: QoS,
    ) -> Result<(), TransportError> {
        self.ensure_session()?;
        self.broker.publish(topic, payload);
        Ok(())
    }

    async fn recv(&mut self) -> Result<Inbound, TransportError> {
        let Some(inbox) = self.inbox.as_mut() else {
            return Err(TransportError::Disconnected);
        };
        match inbox.recv().await {
            Some(Delivery::Message(message)) => Ok(message),
            Some(Delivery::Dropped) | None => {
                self.inbox = None;
                Err(TransportError::ConnectionLost(format!(
                    "{} dropped by broker",
                    self.client_id
                )))
            }
        }
    }
}
