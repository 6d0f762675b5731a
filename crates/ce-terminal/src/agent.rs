//! Terminal agent
//!
//! Owns the terminal's local view of its pending requests. Requests arrive
//! on `{ns}/requests`, are queued in arrival order with the oldest on
//! display, and each gets its own local timeout. Operator decisions and
//! local timeouts are published to `{ns}/requests/status` with a fresh
//! idempotency token; the bus client buffers them while disconnected.

use std::collections::VecDeque;
use std::time::Duration;

use thiserror::Error;
use tokio::sync::{broadcast, mpsc};
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use ce_core::bus::{BusClient, Inbound};
use ce_core::config::TerminalConfig;
use ce_core::dedup::DedupWindow;
use ce_core::error::{CeError, ConfigError};
use ce_core::lifecycle;
use ce_core::timers::PendingTimers;
use ce_core::traits::RequestDisplay;
use ce_core::{ConnectionStatus, FacultyIdentity};
use ce_protocol::{
    ConsultationRequest, FacultyTopics, Message, MessageEnvelope, Presence, PresenceSource,
    PresenceState, RequestId, RequestStatus,
};

use crate::presence::PresenceEvent;
use crate::timesync::ClockHandle;

/// How long resolved request ids are remembered to drop redeliveries
const RESOLVED_RETENTION: Duration = Duration::from_secs(600);

/// Decision taken at the terminal. `id: None` targets the displayed request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum OperatorAction {
    Accept {
        id: Option<RequestId>,
    },
    Decline {
        id: Option<RequestId>,
        reason: Option<String>,
    },
}

#[derive(Error, Debug, Clone, Copy, PartialEq, Eq)]
#[error("Terminal agent has stopped")]
pub struct AgentStopped;

/// Feeds operator input into a running [`TerminalAgent`]
#[derive(Debug, Clone)]
pub struct TerminalHandle {
    actions: mpsc::UnboundedSender<OperatorAction>,
}

impl TerminalHandle {
    pub fn send(&self, action: OperatorAction) -> Result<(), AgentStopped> {
        self.actions.send(action).map_err(|_| AgentStopped)
    }

    pub fn on_operator_accept(&self, id: RequestId) -> Result<(), AgentStopped> {
        self.send(OperatorAction::Accept { id: Some(id) })
    }

    pub fn on_operator_decline(
        &self,
        id: RequestId,
        reason: Option<String>,
    ) -> Result<(), AgentStopped> {
        self.send(OperatorAction::Decline {
            id: Some(id),
            reason,
        })
    }
}

/// Per-terminal event loop
pub struct TerminalAgent<D> {
    identity: FacultyIdentity,
    topics: FacultyTopics,
    request_timeout: Duration,
    refresh_interval: Duration,
    bus: BusClient,
    clock: ClockHandle,
    display: D,
    queue: VecDeque<ConsultationRequest>,
    resolved: DedupWindow<RequestId>,
    timers: PendingTimers,
    presence: PresenceState,
    sequence: u64,
    actions_rx: mpsc::UnboundedReceiver<OperatorAction>,
    presence_rx: mpsc::UnboundedReceiver<PresenceEvent>,
    timeout_tx: mpsc::UnboundedSender<RequestId>,
    timeout_rx: mpsc::UnboundedReceiver<RequestId>,
}

impl<D: RequestDisplay + 'static> TerminalAgent<D> {
    pub fn new(
        config: &TerminalConfig,
        bus: BusClient,
        clock: ClockHandle,
        display: D,
        presence_rx: mpsc::UnboundedReceiver<PresenceEvent>,
    ) -> Result<(Self, TerminalHandle), ConfigError> {
        let identity = config.identity()?.clone();
        let (actions_tx, actions_rx) = mpsc::unbounded_channel();
        let (timeout_tx, timeout_rx) = mpsc::unbounded_channel();

        let agent = Self {
            topics: identity.topics(),
            identity,
            request_timeout: config.request_timeout,
            refresh_interval: config.presence.keepalive_interval,
            bus,
            clock,
            display,
            queue: VecDeque::new(),
            resolved: DedupWindow::new(RESOLVED_RETENTION),
            timers: PendingTimers::new(),
            presence: PresenceState::unknown(),
            sequence: 0,
            actions_rx,
            presence_rx,
            timeout_tx,
            timeout_rx,
        };
        Ok((agent, TerminalHandle { actions: actions_tx }))
    }

    pub async fn run(mut self, cancel: CancellationToken) -> Result<(), CeError> {
        let (inbound_tx, mut inbound_rx) = mpsc::unbounded_channel::<Inbound>();
        self.bus
            .subscribe(self.topics.requests(), move |message: Inbound| {
                let tx = inbound_tx.clone();
                async move {
                    let _ = tx.send(message);
                }
            })
            .await?;

        let mut connection = self.bus.connection_changes();
        let mut refresh = interval_at(
            Instant::now() + self.refresh_interval,
            self.refresh_interval,
        );
        refresh.set_missed_tick_behavior(MissedTickBehavior::Delay);

        tracing::info!(
            faculty = %self.identity.id,
            namespace = %self.topics.namespace(),
            "Terminal agent started"
        );

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,

                Some(message) = inbound_rx.recv() => self.handle_inbound(message),

                Some(action) = self.actions_rx.recv() => self.handle_operator(action),

                Some(id) = self.timeout_rx.recv() => self.handle_local_timeout(id),

                Some(event) = self.presence_rx.recv() => self.handle_presence(event),

                change = connection.recv() => match change {
                    Ok(ConnectionStatus::Connected) => self.republish_presence(),
                    Ok(ConnectionStatus::Disconnected) => {}
                    Err(broadcast::error::RecvError::Lagged(_)) => self.republish_presence(),
                    Err(broadcast::error::RecvError::Closed) => break,
                },

                _ = refresh.tick() => self.refresh_presence(),
            }
        }

        self.timers.disarm_all();
        tracing::info!("Terminal agent stopped");
        Ok(())
    }

    fn handle_inbound(&mut self, message: Inbound) {
        let envelope = match MessageEnvelope::decode(&message.payload) {
            Ok(envelope) => envelope,
            Err(e) => {
                tracing::warn!(topic = %message.topic, error = %e, "Dropping undecodable message");
                return;
            }
        };

        match envelope.body {
            Message::RequestCreated(request) => self.on_request_created(request),
            Message::RequestResolved { request_id, status } => {
                self.on_request_resolved(request_id, status)
            }
            other => tracing::debug!(
                topic = %message.topic,
                "Ignoring {} on request topic",
                other.message_type()
            ),
        }
    }

    fn on_request_created(&mut self, mut request: ConsultationRequest) {
        if request.faculty_id != self.identity.id {
            tracing::warn!(
                request_id = %request.id,
                owner = %request.faculty_id,
                "Request addressed to another faculty member"
            );
            return;
        }
        if self.resolved.contains(&request.id) || self.position(&request.id).is_some() {
            tracing::debug!(request_id = %request.id, "Duplicate request delivery ignored");
            return;
        }
        if request.status == RequestStatus::Created {
            if let Err(e) = lifecycle::apply(&mut request, RequestStatus::Pending, 0, None) {
                tracing::warn!("{}", e);
                return;
            }
        }
        if request.status != RequestStatus::Pending {
            tracing::debug!(
                request_id = %request.id,
                status = %request.status,
                "Ignoring request that is no longer pending"
            );
            return;
        }

        tracing::info!(
            request_id = %request.id,
            requester = %request.requester_id,
            queued = self.queue.len(),
            "Consultation request received"
        );
        self.timers
            .arm(request.id, self.request_timeout, self.timeout_tx.clone());
        self.queue.push_back(request);
        if self.queue.len() == 1 {
            self.refresh_display();
        }
    }

    fn on_request_resolved(&mut self, id: RequestId, status: RequestStatus) {
        let Some(index) = self.position(&id) else {
            tracing::debug!(request_id = %id, "Resolution for unknown request ignored");
            self.resolved.record(id);
            return;
        };
        let at = self.clock.now().millis;
        let Some(mut request) = self.queue.remove(index) else {
            return;
        };
        match lifecycle::apply(&mut request, status, at, None) {
            Ok(_) => tracing::info!(request_id = %id, "Request closed by coordinator: {}", status),
            Err(e) => tracing::warn!("{}", e),
        }
        self.timers.disarm(&id);
        self.resolved.record(id);
        if index == 0 {
            self.refresh_display();
        }
    }

    fn handle_operator(&mut self, action: OperatorAction) {
        let (target, status, reason) = match action {
            OperatorAction::Accept { id } => (id, RequestStatus::Accepted, None),
            OperatorAction::Decline { id, reason } => (id, RequestStatus::Declined, reason),
        };
        let Some(id) = target.or_else(|| self.queue.front().map(|r| r.id)) else {
            tracing::debug!("No pending request to {}", status);
            return;
        };
        self.resolve(id, status, reason);
    }

    fn handle_local_timeout(&mut self, id: RequestId) {
        if self.position(&id).is_some() {
            tracing::info!(request_id = %id, "Request timed out at terminal");
            self.resolve(id, RequestStatus::TimedOut, None);
        } else {
            tracing::debug!(request_id = %id, "Timeout for already resolved request");
        }
    }

    /// Move a queued request to a terminal status and report it
    fn resolve(&mut self, id: RequestId, to: RequestStatus, response: Option<String>) {
        let Some(index) = self.position(&id) else {
            tracing::debug!(request_id = %id, "Request is no longer pending, ignoring {}", to);
            return;
        };
        let now = self.clock.now();
        let Some(mut request) = self.queue.remove(index) else {
            return;
        };
        if let Err(e) = lifecycle::apply(&mut request, to, now.millis, response.clone()) {
            tracing::warn!("{}", e);
            return;
        }

        self.timers.disarm(&id);
        self.resolved.record(id);
        tracing::info!(request_id = %id, "Request {}", to);

        let update = Message::status_update(id, to, now, response);
        self.publish(self.topics.status(), update);

        if index == 0 {
            self.refresh_display();
        }
    }

    fn handle_presence(&mut self, event: PresenceEvent) {
        match event {
            PresenceEvent::Changed(state) => {
                self.presence = state;
                self.publish(self.topics.presence(), Message::Presence(state.into()));
            }
            PresenceEvent::Keepalive { as_of } => {
                self.presence.as_of = as_of;
                self.publish(self.topics.keepalive(), Message::Keepalive { as_of });
            }
        }
    }

    /// Beacon mode has no keepalive, so the last state is re-sent periodically
    fn refresh_presence(&mut self) {
        if self.presence.source != PresenceSource::Override {
            self.republish_presence();
        }
    }

    fn republish_presence(&mut self) {
        if self.presence.presence == Presence::Unknown {
            return;
        }
        tracing::debug!("Republishing presence {}", self.presence.presence);
        self.publish(self.topics.presence(), Message::Presence(self.presence.into()));
    }

    fn refresh_display(&mut self) {
        match self.queue.front() {
            Some(head) => self.display.show_request(head),
            None => self.display.clear_request(),
        }
    }

    fn position(&self, id: &RequestId) -> Option<usize> {
        self.queue.iter().position(|r| r.id == *id)
    }

    fn publish(&mut self, topic: String, body: Message) {
        self.sequence += 1;
        let envelope = MessageEnvelope::new(body, self.clock.now(), self.sequence);
        if let Err(e) = self.bus.publish_envelope(topic, &envelope) {
            tracing::warn!(error = %e, "Failed to publish {}", envelope.message_type());
        }
    }
}
