//! Bus client and its background worker

use std::future::Future;

use async_trait::async_trait;
use bytes::Bytes;
use tokio::sync::{broadcast, mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;

use ce_protocol::{topic_matches, MessageEnvelope};

use super::backoff::ExponentialBackoff;
use super::queue::{OutboundMessage, OutboundQueue};
use super::transport::{Inbound, QoS, Transport};
use crate::config::BusConfig;
use crate::error::{CeError, TransportError};
use crate::types::ConnectionStatus;

/// Capacity of the connection-change broadcast channel.
///
/// Transitions are rare; 16 only overflows if a subscriber stalls through
/// several reconnect cycles, in which case it sees `Lagged` and the current
/// status is still available from [`BusClient::status`].
const CONNECTION_EVENT_CAPACITY: usize = 16;

/// Receives messages for one subscription.
///
/// Invocations for a subscription are serialized in arrival order;
/// handlers of different subscriptions run concurrently.
#[async_trait]
pub trait MessageHandler: Send + Sync + 'static {
    /// Process one message
    async fn handle(&self, message: Inbound);
}

#[async_trait]
impl<F, Fut> MessageHandler for F
where
    F: Fn(Inbound) -> Fut + Send + Sync + 'static,
    Fut: Future<Output = ()> + Send + 'static,
{
    async fn handle(&self, message: Inbound) {
        (self)(message).await
    }
}

/// Commands from client handles to the worker
enum Command {
    Publish(OutboundMessage),
    Subscribe {
        filter: String,
        qos: QoS,
        deliver: mpsc::UnboundedSender<Inbound>,
        ack: oneshot::Sender<()>,
    },
}

/// Handle to the reconnecting bus client.
///
/// Cheap to clone; all clones talk to the same worker task.
#[derive(Clone)]
pub struct BusClient {
    command_tx: mpsc::UnboundedSender<Command>,
    status_rx: watch::Receiver<ConnectionStatus>,
    changes_tx: broadcast::Sender<ConnectionStatus>,
    qos: QoS,
    cancel: CancellationToken,
}

impl BusClient {
    /// Start a client over `transport`.
    ///
    /// Returns immediately; the worker keeps (re)connecting in the background
    /// until `cancel` fires or every handle is dropped.
    pub fn connect<T: Transport>(
        transport: T,
        config: &BusConfig,
        cancel: CancellationToken,
    ) -> Self {
        let cancel = cancel.child_token();
        let (command_tx, command_rx) = mpsc::unbounded_channel();
        let (status_tx, status_rx) = watch::channel(ConnectionStatus::Disconnected);
        let (changes_tx, _) = broadcast::channel(CONNECTION_EVENT_CAPACITY);

        let worker = BusWorker {
            transport,
            command_rx,
            subscriptions: Vec::new(),
            queue: OutboundQueue::new(config.queue_capacity),
            backoff: ExponentialBackoff::from_config(&config.backoff),
            status_tx,
            changes_tx: changes_tx.clone(),
            cancel: cancel.clone(),
        };
        tokio::spawn(worker.run());

        Self {
            command_tx,
            status_rx,
            changes_tx,
            qos: config.qos,
            cancel,
        }
    }

    /// Publish raw bytes.
    ///
    /// Never waits for the network: while disconnected the message is
    /// buffered. Only fails once the client has shut down.
    pub fn publish(
        &self,
        topic: impl Into<String>,
        payload: Bytes,
        qos: QoS,
    ) -> Result<(), TransportError> {
        self.command_tx
            .send(Command::Publish(OutboundMessage {
                topic: topic.into(),
                payload,
                qos,
            }))
            .map_err(|_| TransportError::Closed)
    }

    /// Encode and publish an envelope with the configured QoS
    pub fn publish_envelope(
        &self,
        topic: impl Into<String>,
        envelope: &MessageEnvelope,
    ) -> Result<(), CeError> {
        let payload = envelope.encode()?;
        self.publish(topic, payload, self.qos)?;
        Ok(())
    }

    /// Register a handler for a topic filter.
    ///
    /// Returns once the worker has recorded the subscription (and, if
    /// connected, forwarded it to the broker). The subscription is replayed
    /// after every reconnect.
    pub async fn subscribe<H: MessageHandler>(
        &self,
        filter: impl Into<String>,
        handler: H,
    ) -> Result<(), TransportError> {
        let filter = filter.into();
        let (deliver, mut inbox) = mpsc::unbounded_channel::<Inbound>();
        let (ack, acked) = oneshot::channel();

        self.command_tx
            .send(Command::Subscribe {
                filter: filter.clone(),
                qos: self.qos,
                deliver,
                ack,
            })
            .map_err(|_| TransportError::Closed)?;
        acked.await.map_err(|_| TransportError::Closed)?;

        tokio::spawn(async move {
            while let Some(message) = inbox.recv().await {
                handler.handle(message).await;
            }
            tracing::debug!(filter = %filter, "Subscription handler stopped");
        });

        Ok(())
    }

    /// Invoke `callback` on every connected/disconnected transition
    pub fn on_connection_change<F>(&self, callback: F) -> JoinHandle<()>
    where
        F: Fn(ConnectionStatus) + Send + 'static,
    {
        let mut changes = self.changes_tx.subscribe();
        tokio::spawn(async move {
            loop {
                match changes.recv().await {
                    Ok(status) => callback(status),
                    Err(broadcast::error::RecvError::Lagged(n)) => {
                        tracing::warn!("Connection listener lagged by {} events", n);
                    }
                    Err(broadcast::error::RecvError::Closed) => break,
                }
            }
        })
    }

    /// Stream of connection transitions
    pub fn connection_changes(&self) -> broadcast::Receiver<ConnectionStatus> {
        self.changes_tx.subscribe()
    }

    /// Current connection status
    pub fn status(&self) -> ConnectionStatus {
        *self.status_rx.borrow()
    }

    /// Whether a session is up
    pub fn is_connected(&self) -> bool {
        self.status().is_connected()
    }

    /// Wait until the client reaches `status`
    pub async fn wait_for(&self, status: ConnectionStatus) -> Result<(), TransportError> {
        let mut rx = self.status_rx.clone();
        rx.wait_for(|s| *s == status)
            .await
            .map(|_| ())
            .map_err(|_| TransportError::Closed)
    }

    /// Stop the worker; buffered messages are discarded
    pub fn close(&self) {
        self.cancel.cancel();
    }
}

/// A registered subscription
struct SubscriptionEntry {
    filter: String,
    qos: QoS,
    deliver: mpsc::UnboundedSender<Inbound>,
}

/// Why a connected session ended
enum SessionEnd {
    Lost(TransportError),
    Shutdown,
}

/// Owns the transport; the only task that touches it
struct BusWorker<T: Transport> {
    transport: T,
    command_rx: mpsc::UnboundedReceiver<Command>,
    subscriptions: Vec<SubscriptionEntry>,
    queue: OutboundQueue,
    backoff: ExponentialBackoff,
    status_tx: watch::Sender<ConnectionStatus>,
    changes_tx: broadcast::Sender<ConnectionStatus>,
    cancel: CancellationToken,
}

impl<T: Transport> BusWorker<T> {
    async fn run(mut self) {
        loop {
            let attempt = tokio::select! {
                _ = self.cancel.cancelled() => break,
                result = self.transport.connect() => result,
            };

            let started = match attempt {
                Ok(()) => self.start_session().await,
                Err(e) => Err(e),
            };

            let error = match started {
                Ok(()) => match self.pump().await {
                    SessionEnd::Lost(e) => e,
                    SessionEnd::Shutdown => break,
                },
                Err(e) => e,
            };

            self.recover_unacked();
            self.set_status(ConnectionStatus::Disconnected);
            let delay = self.backoff.next_delay();
            tracing::warn!(
                error = %error,
                buffered = self.queue.len(),
                "Bus unavailable, reconnecting in {:?}",
                delay
            );
            if !self.wait_offline(delay).await {
                break;
            }
        }

        self.set_status(ConnectionStatus::Disconnected);
        if !self.queue.is_empty() {
            tracing::warn!(
                "Bus client stopped with {} undelivered messages",
                self.queue.len()
            );
        }
    }

    /// Replay subscriptions and drain the buffer on a fresh session
    async fn start_session(&mut self) -> Result<(), TransportError> {
        self.subscriptions.retain(|s| !s.deliver.is_closed());
        for sub in &self.subscriptions {
            self.transport.subscribe(&sub.filter, sub.qos).await?;
        }

        self.backoff.reset();
        self.set_status(ConnectionStatus::Connected);

        if !self.queue.is_empty() {
            tracing::info!("Flushing {} buffered messages", self.queue.len());
        }
        while let Some(message) = self.queue.pop() {
            if let Err(e) = self
                .transport
                .publish(&message.topic, message.payload.clone(), message.qos)
                .await
            {
                self.requeue(message);
                return Err(e);
            }
        }
        Ok(())
    }

    /// Serve commands and inbound messages until the session ends
    async fn pump(&mut self) -> SessionEnd {
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => return SessionEnd::Shutdown,

                command = self.command_rx.recv() => {
                    let Some(command) = command else {
                        return SessionEnd::Shutdown;
                    };
                    if let Err(e) = self.handle_online(command).await {
                        return SessionEnd::Lost(e);
                    }
                }

                inbound = self.transport.recv() => match inbound {
                    Ok(message) => self.dispatch(message),
                    Err(e) => return SessionEnd::Lost(e),
                },
            }
        }
    }

    /// Sleep out a backoff delay while still accepting commands
    async fn wait_offline(&mut self, delay: std::time::Duration) -> bool {
        let sleep = tokio::time::sleep(delay);
        tokio::pin!(sleep);

        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => return false,
                _ = &mut sleep => return true,
                command = self.command_rx.recv() => match command {
                    Some(command) => self.handle_offline(command),
                    None => return false,
                },
            }
        }
    }

    async fn handle_online(&mut self, command: Command) -> Result<(), TransportError> {
        match command {
            Command::Publish(message) => {
                if let Err(e) = self
                    .transport
                    .publish(&message.topic, message.payload.clone(), message.qos)
                    .await
                {
                    self.requeue(message);
                    return Err(e);
                }
                Ok(())
            }
            Command::Subscribe {
                filter,
                qos,
                deliver,
                ack,
            } => {
                let result = self.transport.subscribe(&filter, qos).await;
                tracing::debug!(filter = %filter, "Subscribed");
                self.subscriptions.push(SubscriptionEntry {
                    filter,
                    qos,
                    deliver,
                });
                let _ = ack.send(());
                result
            }
        }
    }

    fn handle_offline(&mut self, command: Command) {
        match command {
            Command::Publish(message) => self.buffer(message),
            Command::Subscribe {
                filter,
                qos,
                deliver,
                ack,
            } => {
                tracing::debug!(filter = %filter, "Subscription recorded while offline");
                self.subscriptions.push(SubscriptionEntry {
                    filter,
                    qos,
                    deliver,
                });
                let _ = ack.send(());
            }
        }
    }

    fn dispatch(&mut self, message: Inbound) {
        let mut delivered = false;
        for sub in &self.subscriptions {
            if topic_matches(&sub.filter, &message.topic) && sub.deliver.send(message.clone()).is_ok()
            {
                delivered = true;
            }
        }
        if !delivered {
            tracing::debug!(topic = %message.topic, "No handler for inbound message");
        }
    }

    fn buffer(&mut self, message: OutboundMessage) {
        if let Some(evicted) = self.queue.push(message) {
            tracing::warn!(
                topic = %evicted.topic,
                dropped_total = self.queue.dropped(),
                "Outbound buffer full, dropped oldest message"
            );
        }
    }

    /// Put publishes the broker never confirmed back at the head of the queue
    fn recover_unacked(&mut self) {
        let unacked = self.transport.take_unacked();
        if unacked.is_empty() {
            return;
        }
        tracing::info!("Requeueing {} unconfirmed publishes", unacked.len());
        for message in unacked.into_iter().rev() {
            self.requeue(message);
        }
    }

    fn requeue(&mut self, message: OutboundMessage) {
        if let Some(evicted) = self.queue.requeue(message) {
            tracing::warn!(
                topic = %evicted.topic,
                dropped_total = self.queue.dropped(),
                "Outbound buffer full, dropped newest message"
            );
        }
    }

    fn set_status(&self, status: ConnectionStatus) {
        if *self.status_tx.borrow() == status {
            return;
        }
        self.status_tx.send_replace(status);
        let _ = self.changes_tx.send(status);
        tracing::info!("Bus {}", status);
    }
}
