//! Request coordinator
//!
//! Every status change (terminal report, coordinator timeout, requester
//! cancel) goes through [`Coordinator::apply_transition`], which holds one
//! mutex across load, check, save. Whichever writer reaches it first wins;
//! later writers see a terminal status and become no-ops.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use tokio::sync::{mpsc, Mutex};
use tokio_util::sync::CancellationToken;

use ce_core::bus::{BusClient, Inbound};
use ce_core::config::CoordinatorConfig;
use ce_core::dedup::DedupWindow;
use ce_core::error::{CeError, InvalidTransition, RoutingError};
use ce_core::ipc::FacultyInfo;
use ce_core::lifecycle::{self, TransitionOutcome};
use ce_core::time::{current_time_millis, elapsed_millis, remaining};
use ce_core::timers::PendingTimers;
use ce_core::traits::{CoordinatorListener, RequestRegistry};
use ce_core::FacultyIdentity;
use ce_protocol::{
    ConsultationRequest, FacultyId, IdempotencyToken, Message, MessageEnvelope, Presence,
    PresenceState, RequestId, RequestStatus, RequesterId, Timestamp,
};

use crate::presence::PresenceMirror;

/// Central coordinator
pub struct Coordinator {
    config: CoordinatorConfig,
    bus: BusClient,
    registry: Arc<dyn RequestRegistry>,
    listener: Arc<dyn CoordinatorListener>,
    presence: PresenceMirror,
    timers: PendingTimers,
    expired_tx: mpsc::UnboundedSender<RequestId>,
    /// Guards every registry read-modify-write; holds the tokens already applied
    transitions: Mutex<DedupWindow<IdempotencyToken>>,
    sequence: AtomicU64,
}

impl Coordinator {
    /// Validate configuration, subscribe to every terminal, recover pending
    /// requests and start the background tasks.
    pub async fn start(
        config: CoordinatorConfig,
        bus: BusClient,
        registry: Arc<dyn RequestRegistry>,
        listener: Arc<dyn CoordinatorListener>,
        cancel: CancellationToken,
    ) -> Result<Arc<Self>, CeError> {
        config.validate()?;

        let (expired_tx, expired_rx) = mpsc::unbounded_channel();
        let coordinator = Arc::new(Self {
            presence: PresenceMirror::new(config.faculty.iter().map(|f| f.id)),
            transitions: Mutex::new(DedupWindow::new(config.token_retention)),
            config,
            bus,
            registry,
            listener,
            timers: PendingTimers::new(),
            expired_tx,
            sequence: AtomicU64::new(0),
        });

        for identity in &coordinator.config.faculty {
            coordinator.subscribe_terminal(identity).await?;
        }
        coordinator.recover().await?;

        tokio::spawn(Arc::clone(&coordinator).run_expiry(expired_rx, cancel.clone()));
        tokio::spawn(Arc::clone(&coordinator).run_staleness(cancel));

        tracing::info!(
            faculty = coordinator.config.faculty.len(),
            "Coordinator started (request timeout {:?}, staleness window {:?})",
            coordinator.config.request_timeout,
            coordinator.config.staleness_window
        );
        Ok(coordinator)
    }

    /// Route a new request to a present faculty member
    pub async fn create_request(
        &self,
        faculty_id: FacultyId,
        requester_id: RequesterId,
        message: impl Into<String>,
    ) -> Result<RequestId, RoutingError> {
        let identity = self
            .config
            .faculty(faculty_id)
            .ok_or(RoutingError::UnknownFaculty(faculty_id))?;

        let presence = self.presence.get(faculty_id);
        if presence.presence != Presence::Available {
            tracing::info!(
                faculty = %faculty_id,
                "Refusing request, faculty is {}",
                presence.presence
            );
            return Err(RoutingError::FacultyUnavailable {
                faculty_id,
                presence: presence.presence,
            });
        }

        let mut request = ConsultationRequest::new(
            RequestId::generate(),
            faculty_id,
            requester_id,
            message,
            current_time_millis(),
        );
        // Routing moves a fresh request straight to pending
        request.status = RequestStatus::Pending;

        {
            let _guard = self.transitions.lock().await;
            self.registry.save(&request).await?;
        }
        self.timers
            .arm(request.id, self.config.request_timeout, self.expired_tx.clone());
        self.publish(
            identity.topics().requests(),
            Message::RequestCreated(request.clone()),
        );

        tracing::info!(
            request_id = %request.id,
            faculty = %faculty_id,
            requester = %request.requester_id,
            "Request routed"
        );
        self.listener.on_request_created(&request);
        Ok(request.id)
    }

    /// Withdraw a pending request on behalf of the requester
    pub async fn cancel_request(&self, id: RequestId) -> Result<TransitionOutcome, CeError> {
        let (outcome, request) = self
            .apply_transition(id, RequestStatus::Cancelled, None, None, None)
            .await?;
        if outcome.is_applied() {
            tracing::info!(request_id = %id, "Request cancelled");
            self.publish_resolved(&request);
        }
        Ok(outcome)
    }

    /// Current registry copy of a request
    pub async fn request(&self, id: RequestId) -> Result<Option<ConsultationRequest>, CeError> {
        Ok(self.registry.load(&id).await?)
    }

    pub async fn list_pending(&self) -> Result<Vec<ConsultationRequest>, CeError> {
        Ok(self.registry.list_pending().await?)
    }

    /// Mirrored presence of one faculty member
    pub fn presence(&self, faculty_id: FacultyId) -> PresenceState {
        self.presence.get(faculty_id)
    }

    /// Configured faculty with their mirrored presence
    pub fn faculty_directory(&self) -> Vec<FacultyInfo> {
        self.config
            .faculty
            .iter()
            .map(|f| FacultyInfo {
                id: f.id,
                name: f.name.clone(),
                department: f.department.clone(),
                namespace: f.namespace(),
                presence: self.presence.get(f.id),
            })
            .collect()
    }

    /// Whether a timeout timer is running for `id`
    pub fn timer_armed(&self, id: &RequestId) -> bool {
        self.timers.is_armed(id)
    }

    /// Mutex-guarded compare-and-set on a request's status.
    ///
    /// `token` suppresses redelivered terminal reports; `reporter` is the
    /// faculty whose topic the report arrived on.
    async fn apply_transition(
        &self,
        id: RequestId,
        to: RequestStatus,
        token: Option<IdempotencyToken>,
        response_message: Option<String>,
        reporter: Option<FacultyId>,
    ) -> Result<(TransitionOutcome, ConsultationRequest), CeError> {
        let mut seen = self.transitions.lock().await;

        let Some(mut request) = self.registry.load(&id).await? else {
            return Err(InvalidTransition::UnknownRequest(id).into());
        };
        if let Some(reporter) = reporter {
            if request.faculty_id != reporter {
                return Err(InvalidTransition::WrongFaculty {
                    id,
                    owner: request.faculty_id,
                    reporter,
                }
                .into());
            }
        }
        if let Some(token) = token {
            if seen.contains(&token) {
                tracing::debug!(request_id = %id, token = %token, "Redelivered status report");
                return Ok((TransitionOutcome::Duplicate(request.status), request));
            }
        }

        let previous = request.status;
        let outcome = match lifecycle::apply(&mut request, to, current_time_millis(), response_message) {
            Ok(outcome) => outcome,
            Err(e) => {
                if let Some(token) = token {
                    seen.record(token);
                }
                return Err(e.into());
            }
        };

        if outcome.is_applied() {
            self.registry.save(&request).await?;
            self.timers.disarm(&id);
        }
        if let Some(token) = token {
            seen.record(token);
        }
        drop(seen);

        if outcome.is_applied() {
            self.listener.on_request_status_changed(&request, previous);
        }
        Ok((outcome, request))
    }

    async fn subscribe_terminal(self: &Arc<Self>, identity: &FacultyIdentity) -> Result<(), CeError> {
        let topics = identity.topics();
        let faculty_id = identity.id;

        let this = Arc::clone(self);
        self.bus
            .subscribe(topics.status(), move |message: Inbound| {
                let this = Arc::clone(&this);
                async move { this.handle_status(faculty_id, message).await }
            })
            .await?;

        let this = Arc::clone(self);
        self.bus
            .subscribe(topics.presence(), move |message: Inbound| {
                let this = Arc::clone(&this);
                async move { this.handle_presence(faculty_id, message) }
            })
            .await?;

        let this = Arc::clone(self);
        self.bus
            .subscribe(topics.keepalive(), move |message: Inbound| {
                let this = Arc::clone(&this);
                async move { this.handle_presence(faculty_id, message) }
            })
            .await?;

        tracing::debug!(faculty = %faculty_id, namespace = %topics.namespace(), "Subscribed to terminal");
        Ok(())
    }

    async fn handle_status(&self, faculty_id: FacultyId, message: Inbound) {
        let Some(envelope) = decode(&message) else {
            return;
        };
        let report = match envelope.body {
            Message::StatusUpdate(report) => report,
            other => {
                tracing::debug!(topic = %message.topic, "Ignoring {} on status topic", other.message_type());
                return;
            }
        };

        let result = self
            .apply_transition(
                report.request_id,
                report.status,
                Some(report.idempotency_token),
                report.response_message,
                Some(faculty_id),
            )
            .await;

        match result {
            Ok((TransitionOutcome::Applied { from, to }, _)) => tracing::info!(
                request_id = %report.request_id,
                clock = %report.clock_confidence,
                "Request {} -> {} (reported by terminal)",
                from,
                to
            ),
            Ok((TransitionOutcome::Duplicate(status), _)) => tracing::debug!(
                request_id = %report.request_id,
                "Duplicate {} report ignored",
                status
            ),
            Err(e) => tracing::warn!(request_id = %report.request_id, "Dropping status report: {}", e),
        }
    }

    fn handle_presence(&self, faculty_id: FacultyId, message: Inbound) {
        let Some(envelope) = decode(&message) else {
            return;
        };
        let changed = match envelope.body {
            Message::Presence(report) => {
                self.presence
                    .apply_report(faculty_id, report.into(), envelope.origin)
            }
            Message::Keepalive { as_of } => {
                tracing::trace!(faculty = %faculty_id, "Keepalive");
                self.presence.keepalive(faculty_id, as_of, envelope.origin)
            }
            other => {
                tracing::debug!(topic = %message.topic, "Ignoring {} on presence topic", other.message_type());
                None
            }
        };

        if let Some(state) = changed {
            tracing::info!(faculty = %faculty_id, source = ?state.source, "Presence now {}", state.presence);
            self.listener.on_presence_changed(faculty_id, &state);
        }
    }

    /// Re-arm timers for requests left pending by a previous run
    async fn recover(&self) -> Result<(), CeError> {
        let pending = self.registry.list_pending().await?;
        if pending.is_empty() {
            return Ok(());
        }

        for request in &pending {
            let left = remaining(request.created_at, self.config.request_timeout);
            tracing::debug!(
                request_id = %request.id,
                age_ms = elapsed_millis(request.created_at),
                "Re-arming timeout ({:?} left)",
                left
            );
            self.timers.arm(request.id, left, self.expired_tx.clone());
        }
        tracing::info!("Recovered {} pending requests", pending.len());
        Ok(())
    }

    async fn expire(&self, id: RequestId) {
        match self
            .apply_transition(id, RequestStatus::TimedOut, None, None, None)
            .await
        {
            Ok((outcome, request)) if outcome.is_applied() => {
                tracing::info!(request_id = %id, "Request timed out");
                self.publish_resolved(&request);
            }
            Ok(_) => tracing::debug!(request_id = %id, "Timeout for request already timed out"),
            Err(e) => tracing::debug!(request_id = %id, "Timeout superseded: {}", e),
        }
    }

    async fn run_expiry(
        self: Arc<Self>,
        mut expired_rx: mpsc::UnboundedReceiver<RequestId>,
        cancel: CancellationToken,
    ) {
        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                Some(id) = expired_rx.recv() => self.expire(id).await,
            }
        }
        self.timers.disarm_all();
        tracing::debug!("Expiry task stopped");
    }

    async fn run_staleness(self: Arc<Self>, cancel: CancellationToken) {
        let mut interval = tokio::time::interval(self.config.staleness_check_interval);
        interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

        loop {
            tokio::select! {
                _ = cancel.cancelled() => break,
                _ = interval.tick() => {
                    for (faculty_id, state) in self.presence.expire_stale(self.config.staleness_window) {
                        tracing::warn!(
                            faculty = %faculty_id,
                            "No presence from terminal within {:?}, marking unknown",
                            self.config.staleness_window
                        );
                        self.listener.on_presence_changed(faculty_id, &state);
                    }
                }
            }
        }
        tracing::debug!("Staleness task stopped");
    }

    /// Tell the terminal a request was closed without its involvement
    fn publish_resolved(&self, request: &ConsultationRequest) {
        let Some(identity) = self.config.faculty(request.faculty_id) else {
            return;
        };
        self.publish(
            identity.topics().requests(),
            Message::RequestResolved {
                request_id: request.id,
                status: request.status,
            },
        );
    }

    fn publish(&self, topic: String, body: Message) {
        let sequence = self.sequence.fetch_add(1, Ordering::Relaxed) + 1;
        let envelope = MessageEnvelope::new(body, Timestamp::synced(current_time_millis()), sequence);
        if let Err(e) = self.bus.publish_envelope(topic, &envelope) {
            tracing::warn!(error = %e, "Failed to publish {}", envelope.message_type());
        }
    }
}

fn decode(message: &Inbound) -> Option<MessageEnvelope> {
    match MessageEnvelope::decode(&message.payload) {
        Ok(envelope) => Some(envelope),
        Err(e) => {
            tracing::warn!(topic = %message.topic, error = %e, "Dropping undecodable message");
            None
        }
    }
}
