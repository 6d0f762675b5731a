//! MQTT transport backed by rumqttc

use std::collections::VecDeque;
use std::time::Duration;

use async_trait::async_trait;
use bytes::Bytes;
use rumqttc::{
    AsyncClient, ClientError, ConnectReturnCode, Event, EventLoop, MqttOptions, Outgoing, Packet,
};

use super::queue::OutboundMessage;
use super::transport::{Inbound, QoS, Transport};
use crate::config::BusConfig;
use crate::error::TransportError;

/// Smallest keep-alive the broker side is expected to honour
const MIN_KEEP_ALIVE: Duration = Duration::from_secs(5);

/// Publishes handed to rumqttc that the broker has not confirmed.
///
/// rumqttc keeps its own retransmit state inside the `EventLoop`, which is
/// discarded with the session, so delivery is tracked here instead:
/// `queued` until the event loop writes the packet, then `inflight` by
/// packet id until the PUBACK arrives. QoS 0 publishes are forgotten once
/// written.
#[derive(Debug, Default)]
struct Unacked {
    queued: VecDeque<OutboundMessage>,
    inflight: VecDeque<(u16, OutboundMessage)>,
}

impl Unacked {
    fn accepted(&mut self, message: OutboundMessage) {
        self.queued.push_back(message);
    }

    fn observe(&mut self, event: &Event) {
        match event {
            Event::Outgoing(Outgoing::Publish(pkid)) => {
                let Some(message) = self.queued.pop_front() else {
                    return;
                };
                if message.qos == QoS::AtLeastOnce {
                    self.inflight.push_back((*pkid, message));
                }
            }
            Event::Incoming(Packet::PubAck(ack)) => {
                if let Some(pos) = self.inflight.iter().position(|(id, _)| *id == ack.pkid) {
                    self.inflight.remove(pos);
                }
            }
            _ => {}
        }
    }

    /// Everything unconfirmed, oldest first
    fn drain(&mut self) -> Vec<OutboundMessage> {
        self.inflight
            .drain(..)
            .map(|(_, message)| message)
            .chain(self.queued.drain(..))
            .collect()
    }
}

/// One broker session
struct Session {
    client: AsyncClient,
    eventloop: EventLoop,
}

/// MQTT 3.1.1 session.
///
/// A fresh `AsyncClient`/`EventLoop` pair is built for every connect, so no
/// state leaks between sessions; subscriptions are replayed by the bus worker
/// and unconfirmed publishes are handed back through
/// [`Transport::take_unacked`].
pub struct MqttTransport {
    options: MqttOptions,
    request_capacity: usize,
    connect_timeout: Duration,
    session: Option<Session>,
    /// Publishes read off the event loop while draining a full request channel
    backlog: VecDeque<Inbound>,
    unacked: Unacked,
}

impl MqttTransport {
    pub fn new(config: &BusConfig, client_id: impl Into<String>) -> Self {
        let mut options = MqttOptions::new(client_id, config.host.clone(), config.port);
        options.set_keep_alive(config.keep_alive.max(MIN_KEEP_ALIVE));
        options.set_clean_session(true);
        if let (Some(username), Some(password)) = (&config.username, &config.password) {
            options.set_credentials(username.clone(), password.clone());
        }

        Self {
            options,
            request_capacity: config.request_channel_capacity.max(1),
            connect_timeout: config.connect_timeout,
            session: None,
            backlog: VecDeque::new(),
            unacked: Unacked::default(),
        }
    }

    fn qos(qos: QoS) -> rumqttc::QoS {
        match qos {
            QoS::AtMostOnce => rumqttc::QoS::AtMostOnce,
            QoS::AtLeastOnce => rumqttc::QoS::AtLeastOnce,
        }
    }
}

async fn handshake(eventloop: &mut EventLoop) -> Result<(), TransportError> {
    loop {
        match eventloop.poll().await {
            Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                return if ack.code == ConnectReturnCode::Success {
                    Ok(())
                } else {
                    Err(TransportError::ConnectFailed(format!(
                        "broker refused connection: {:?}",
                        ack.code
                    )))
                };
            }
            Ok(_) => continue,
            Err(e) => return Err(TransportError::ConnectFailed(e.to_string())),
        }
    }
}

async fn next_publish(
    eventloop: &mut EventLoop,
    unacked: &mut Unacked,
) -> Result<Inbound, TransportError> {
    loop {
        let event = eventloop
            .poll()
            .await
            .map_err(|e| TransportError::ConnectionLost(e.to_string()))?;
        unacked.observe(&event);
        match event {
            Event::Incoming(Packet::Publish(publish)) => {
                return Ok(Inbound::new(publish.topic, publish.payload));
            }
            Event::Incoming(Packet::Disconnect) => {
                return Err(TransportError::ConnectionLost(
                    "broker sent disconnect".to_string(),
                ));
            }
            _ => continue,
        }
    }
}

/// Retry a non-blocking client request, driving the event loop whenever the
/// request channel is full.
async fn drive_until<F>(
    mut attempt: F,
    eventloop: &mut EventLoop,
    backlog: &mut VecDeque<Inbound>,
    unacked: &mut Unacked,
) -> Result<(), TransportError>
where
    F: FnMut() -> Result<(), ClientError> + Send,
{
    loop {
        if attempt().is_ok() {
            return Ok(());
        }
        let event = eventloop
            .poll()
            .await
            .map_err(|e| TransportError::ConnectionLost(e.to_string()))?;
        unacked.observe(&event);
        if let Event::Incoming(Packet::Publish(publish)) = event {
            backlog.push_back(Inbound::new(publish.topic, publish.payload));
        }
    }
}

#[async_trait]
impl Transport for MqttTransport {
    async fn connect(&mut self) -> Result<(), TransportError> {
        self.session = None;
        self.backlog.clear();

        let (client, mut eventloop) =
            AsyncClient::new(self.options.clone(), self.request_capacity);
        tokio::time::timeout(self.connect_timeout, handshake(&mut eventloop))
            .await
            .map_err(|_| TransportError::Timeout)??;

        let (host, port) = self.options.broker_address();
        tracing::info!("Connected to MQTT broker at {}:{}", host, port);
        self.session = Some(Session { client, eventloop });
        Ok(())
    }

    async fn subscribe(&mut self, filter: &str, qos: QoS) -> Result<(), TransportError> {
        let Some(Session { client, eventloop }) = self.session.as_mut() else {
            return Err(TransportError::Disconnected);
        };
        let qos = Self::qos(qos);
        let result = drive_until(
            || client.try_subscribe(filter, qos),
            eventloop,
            &mut self.backlog,
            &mut self.unacked,
        )
        .await;
        if result.is_err() {
            self.session = None;
        }
        result
    }

    async fn publish(
        &mut self,
        topic: &str,
        payload: Bytes,
        qos: QoS,
    ) -> Result<(), TransportError> {
        let Some(Session { client, eventloop }) = self.session.as_mut() else {
            return Err(TransportError::Disconnected);
        };
        let mqtt_qos = Self::qos(qos);
        let result = drive_until(
            || client.try_publish(topic, mqtt_qos, false, payload.to_vec()),
            eventloop,
            &mut self.backlog,
            &mut self.unacked,
        )
        .await;
        match result {
            Ok(()) => {
                self.unacked.accepted(OutboundMessage {
                    topic: topic.to_string(),
                    payload,
                    qos,
                });
                Ok(())
            }
            Err(e) => {
                self.session = None;
                Err(e)
            }
        }
    }

    async fn recv(&mut self) -> Result<Inbound, TransportError> {
        if let Some(message) = self.backlog.pop_front() {
            return Ok(message);
        }
        let result = match self.session.as_mut() {
            Some(session) => next_publish(&mut session.eventloop, &mut self.unacked).await,
            None => return Err(TransportError::Disconnected),
        };
        if result.is_err() {
            self.session = None;
        }
        result
    }

    fn take_unacked(&mut self) -> Vec<OutboundMessage> {
        self.unacked.drain()
    }
}
