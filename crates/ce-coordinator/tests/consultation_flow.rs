//! End-to-end consultation scenarios: coordinator and terminal agent over
//! an in-process broker, on paused tokio time.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::mpsc;
use tokio_util::sync::CancellationToken;

use ce_coordinator::{Coordinator, MemoryRegistry};
use ce_core::bus::{BusClient, Inbound, MemoryBroker};
use ce_core::config::{BackoffConfig, BusConfig, CoordinatorConfig, TerminalConfig};
use ce_core::error::RoutingError;
use ce_core::traits::{CoordinatorListener, RequestDisplay};
use ce_core::FacultyIdentity;
use ce_protocol::{
    ConsultationRequest, FacultyId, FacultyTopics, Presence, PresenceSource, PresenceState,
    RequestId, RequestStatus,
};
use ce_terminal::presence::{NullScanner, ScriptedScanner};
use ce_terminal::{ClockHandle, PresenceDetector, TerminalAgent, TerminalHandle};

const FACULTY: FacultyId = FacultyId(1);
const TERMINAL_CLIENT: &str = "ce-terminal-1";
const STRONG: Option<i16> = Some(-55);

#[derive(Default)]
struct Recorder {
    changes: Mutex<Vec<(RequestId, RequestStatus, RequestStatus)>>,
    presence: Mutex<Vec<Presence>>,
}

impl CoordinatorListener for Recorder {
    fn on_request_status_changed(&self, request: &ConsultationRequest, previous: RequestStatus) {
        self.changes
            .lock()
            .unwrap()
            .push((request.id, previous, request.status));
    }

    fn on_presence_changed(&self, _faculty_id: FacultyId, state: &PresenceState) {
        self.presence.lock().unwrap().push(state.presence);
    }
}

#[derive(Clone, Default)]
struct Screen {
    showing: Arc<Mutex<Option<RequestId>>>,
}

impl Screen {
    fn showing(&self) -> Option<RequestId> {
        *self.showing.lock().unwrap()
    }
}

impl RequestDisplay for Screen {
    fn show_request(&mut self, request: &ConsultationRequest) {
        *self.showing.lock().unwrap() = Some(request.id);
    }

    fn clear_request(&mut self) {
        *self.showing.lock().unwrap() = None;
    }
}

enum Mode {
    Beacon(ScriptedScanner),
    AlwaysAvailable,
}

struct Deployment {
    broker: MemoryBroker,
    coordinator: Arc<Coordinator>,
    recorder: Arc<Recorder>,
    terminal: TerminalHandle,
    screen: Screen,
    /// Raw status payloads as published by the terminal
    status_wire: Arc<Mutex<Vec<Bytes>>>,
    _tap: BusClient,
    terminal_cancel: CancellationToken,
    cancel: CancellationToken,
}

fn bus_config() -> BusConfig {
    BusConfig {
        backoff: BackoffConfig {
            initial: Duration::from_millis(500),
            max: Duration::from_secs(2),
            ..BackoffConfig::default()
        },
        ..BusConfig::default()
    }
}

fn identity() -> FacultyIdentity {
    FacultyIdentity::new(FACULTY, "Dr. Moreau", "C4:7C:8D:6A:2B:10")
}

impl Deployment {
    async fn start(mode: Mode) -> Self {
        Self::start_with(mode, MemoryRegistry::new()).await
    }

    async fn start_with(mode: Mode, registry: MemoryRegistry) -> Self {
        let broker = MemoryBroker::new();
        let cancel = CancellationToken::new();
        let terminal_cancel = cancel.child_token();

        let coordinator_config = CoordinatorConfig {
            bus: bus_config(),
            request_timeout: Duration::from_secs(60),
            keepalive_interval: Duration::from_secs(10),
            staleness_window: Duration::from_secs(25),
            staleness_check_interval: Duration::from_secs(1),
            faculty: vec![identity()],
            ..CoordinatorConfig::default()
        };

        // Tap on the status topic, standing in for the broker's redelivery
        let tap = BusClient::connect(broker.transport("tap"), &bus_config(), cancel.clone());
        let status_wire = Arc::new(Mutex::new(Vec::new()));
        let sink = Arc::clone(&status_wire);
        tap.subscribe(FacultyTopics::for_faculty(FACULTY).status(), move |message: Inbound| {
            let sink = Arc::clone(&sink);
            async move { sink.lock().unwrap().push(message.payload) }
        })
        .await
        .unwrap();

        let recorder = Arc::new(Recorder::default());
        let coordinator = Coordinator::start(
            coordinator_config,
            BusClient::connect(broker.transport("ce-coordinator"), &bus_config(), cancel.clone()),
            Arc::new(registry),
            recorder.clone(),
            cancel.clone(),
        )
        .await
        .unwrap();

        let mut terminal_config = TerminalConfig {
            faculty: Some(identity()),
            bus: bus_config(),
            request_timeout: Duration::from_secs(60),
            ..TerminalConfig::default()
        };
        terminal_config.presence.scan_interval = Duration::from_secs(1);
        terminal_config.presence.rssi_threshold = -70;
        terminal_config.presence.enter_scans = 2;
        terminal_config.presence.exit_scans = 3;
        terminal_config.presence.keepalive_interval = Duration::from_secs(10);

        let clock = ClockHandle::local();
        let (presence_tx, presence_rx) = mpsc::unbounded_channel();
        match mode {
            Mode::Beacon(scanner) => {
                let detector = PresenceDetector::new(
                    scanner,
                    identity().beacon_address,
                    terminal_config.presence.clone(),
                    clock.clone(),
                    presence_tx,
                );
                tokio::spawn(detector.run(terminal_cancel.clone()));
            }
            Mode::AlwaysAvailable => {
                terminal_config.presence.always_available = true;
                let detector = PresenceDetector::new(
                    NullScanner,
                    identity().beacon_address,
                    terminal_config.presence.clone(),
                    clock.clone(),
                    presence_tx,
                );
                tokio::spawn(detector.run(terminal_cancel.clone()));
            }
        }

        let screen = Screen::default();
        let (agent, terminal) = TerminalAgent::new(
            &terminal_config,
            BusClient::connect(broker.transport(TERMINAL_CLIENT), &bus_config(), terminal_cancel.clone()),
            clock,
            screen.clone(),
            presence_rx,
        )
        .unwrap();
        tokio::spawn(agent.run(terminal_cancel.clone()));

        Self {
            broker,
            coordinator,
            recorder,
            terminal,
            screen,
            status_wire,
            _tap: tap,
            terminal_cancel,
            cancel,
        }
    }

    async fn status_of(&self, id: RequestId) -> RequestStatus {
        self.coordinator.request(id).await.unwrap().unwrap().status
    }

    fn changes(&self) -> Vec<(RequestId, RequestStatus, RequestStatus)> {
        self.recorder.changes.lock().unwrap().clone()
    }

    async fn route(&self) -> RequestId {
        self.coordinator
            .create_request(FACULTY, "student-42".into(), "Can we go over problem set 4?")
            .await
            .unwrap()
    }
}

async fn wait(secs: u64) {
    tokio::time::sleep(Duration::from_secs(secs)).await;
}

#[tokio::test(start_paused = true)]
async fn test_accept_within_ten_seconds() {
    let d = Deployment::start(Mode::Beacon(ScriptedScanner::new([STRONG]))).await;
    wait(5).await;
    assert!(d.coordinator.presence(FACULTY).is_available());

    let id = d.route().await;
    wait(1).await;
    assert_eq!(d.screen.showing(), Some(id));

    wait(8).await;
    d.terminal.on_operator_accept(id).unwrap();
    wait(1).await;

    assert_eq!(d.status_of(id).await, RequestStatus::Accepted);
    assert_eq!(d.screen.showing(), None);

    // Neither side's timeout fires afterwards
    wait(120).await;
    assert_eq!(d.status_of(id).await, RequestStatus::Accepted);
    assert_eq!(
        d.changes(),
        vec![(id, RequestStatus::Pending, RequestStatus::Accepted)]
    );
    assert!(!d.coordinator.timer_armed(&id));
    d.cancel.cancel();
}

#[tokio::test(start_paused = true)]
async fn test_unanswered_request_times_out_once() {
    let d = Deployment::start(Mode::Beacon(ScriptedScanner::new([STRONG]))).await;
    wait(5).await;

    let id = d.route().await;
    wait(59).await;
    assert_eq!(d.status_of(id).await, RequestStatus::Pending);
    assert_eq!(d.screen.showing(), Some(id));

    wait(2).await;
    assert_eq!(d.status_of(id).await, RequestStatus::TimedOut);
    assert_eq!(d.screen.showing(), None);

    // An operator pressing accept now changes nothing
    d.terminal
        .send(ce_terminal::OperatorAction::Accept { id: None })
        .unwrap();
    wait(120).await;
    assert_eq!(d.status_of(id).await, RequestStatus::TimedOut);
    assert_eq!(
        d.changes(),
        vec![(id, RequestStatus::Pending, RequestStatus::TimedOut)]
    );
    d.cancel.cancel();
}

#[tokio::test(start_paused = true)]
async fn test_status_delivered_after_disconnect() {
    let d = Deployment::start(Mode::Beacon(ScriptedScanner::new([STRONG]))).await;
    wait(5).await;

    let id = d.route().await;
    wait(1).await;
    assert_eq!(d.screen.showing(), Some(id));

    d.broker.disconnect(TERMINAL_CLIENT);
    wait(1).await;
    d.terminal.on_operator_accept(id).unwrap();
    wait(30).await;

    // Nothing reached the coordinator; the silent terminal went stale
    assert_eq!(d.status_of(id).await, RequestStatus::Pending);
    assert_eq!(d.coordinator.presence(FACULTY).presence, Presence::Unknown);

    d.broker.restore(TERMINAL_CLIENT);
    wait(5).await;

    assert_eq!(d.status_of(id).await, RequestStatus::Accepted);
    assert_eq!(
        d.changes(),
        vec![(id, RequestStatus::Pending, RequestStatus::Accepted)]
    );
    assert!(d.coordinator.presence(FACULTY).is_available());

    wait(120).await;
    assert_eq!(d.changes().len(), 1);
    d.cancel.cancel();
}

#[tokio::test(start_paused = true)]
async fn test_redelivered_status_has_single_effect() {
    let d = Deployment::start(Mode::Beacon(ScriptedScanner::new([STRONG]))).await;
    wait(5).await;

    let id = d.route().await;
    wait(1).await;
    d.terminal
        .on_operator_decline(id, Some("In a meeting".to_string()))
        .unwrap();
    wait(1).await;

    let wire = d.status_wire.lock().unwrap().clone();
    assert_eq!(wire.len(), 1);
    for _ in 0..3 {
        d.broker
            .publish(&FacultyTopics::for_faculty(FACULTY).status(), wire[0].clone());
    }
    wait(1).await;

    let request = d.coordinator.request(id).await.unwrap().unwrap();
    assert_eq!(request.status, RequestStatus::Declined);
    assert_eq!(request.response_message.as_deref(), Some("In a meeting"));
    assert!(request.resolved_at.is_some());
    assert_eq!(d.changes().len(), 1);
    d.cancel.cancel();
}

#[tokio::test(start_paused = true)]
async fn test_routing_refused_unless_available() {
    let scanner = ScriptedScanner::new([None]);
    let d = Deployment::start(Mode::Beacon(scanner.clone())).await;

    // Before any verdict the mirror is unknown
    let err = d
        .coordinator
        .create_request(FACULTY, "student-42".into(), "hello")
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        RoutingError::FacultyUnavailable { presence: Presence::Unknown, .. }
    ));

    wait(5).await;
    let err = d
        .coordinator
        .create_request(FACULTY, "student-42".into(), "hello")
        .await
        .unwrap_err();
    assert!(matches!(
        err,
        RoutingError::FacultyUnavailable { presence: Presence::Unavailable, .. }
    ));
    assert_eq!(d.screen.showing(), None);

    scanner.set(STRONG);
    wait(3).await;
    let id = d.route().await;
    wait(1).await;
    assert_eq!(d.screen.showing(), Some(id));
    d.cancel.cancel();
}

#[tokio::test(start_paused = true)]
async fn test_presence_loss_keeps_pending_request() {
    let scanner = ScriptedScanner::new([STRONG]);
    let d = Deployment::start(Mode::Beacon(scanner.clone())).await;
    wait(5).await;

    let id = d.route().await;
    scanner.set(None);
    wait(5).await;
    assert_eq!(d.coordinator.presence(FACULTY).presence, Presence::Unavailable);
    assert_eq!(d.status_of(id).await, RequestStatus::Pending);

    d.terminal.on_operator_accept(id).unwrap();
    wait(1).await;
    assert_eq!(d.status_of(id).await, RequestStatus::Accepted);
    d.cancel.cancel();
}

#[tokio::test(start_paused = true)]
async fn test_override_keepalives_prevent_staleness() {
    let d = Deployment::start(Mode::AlwaysAvailable).await;
    wait(1).await;
    let state = d.coordinator.presence(FACULTY);
    assert!(state.is_available());
    assert_eq!(state.source, PresenceSource::Override);

    wait(120).await;
    assert!(d.coordinator.presence(FACULTY).is_available());
    assert_eq!(*d.recorder.presence.lock().unwrap(), vec![Presence::Available]);

    // Terminal goes away: the mirror downgrades after the staleness window
    d.terminal_cancel.cancel();
    wait(20).await;
    assert!(d.coordinator.presence(FACULTY).is_available());
    wait(20).await;
    assert_eq!(d.coordinator.presence(FACULTY).presence, Presence::Unknown);
    d.cancel.cancel();
}

#[tokio::test(start_paused = true)]
async fn test_beacon_terminal_never_goes_stale() {
    let d = Deployment::start(Mode::Beacon(ScriptedScanner::new([STRONG]))).await;
    wait(300).await;
    assert!(d.coordinator.presence(FACULTY).is_available());
    assert_eq!(*d.recorder.presence.lock().unwrap(), vec![Presence::Available]);
    d.cancel.cancel();
}

#[tokio::test(start_paused = true)]
async fn test_cancel_clears_terminal() {
    let d = Deployment::start(Mode::AlwaysAvailable).await;
    wait(1).await;

    let id = d.route().await;
    wait(1).await;
    assert_eq!(d.screen.showing(), Some(id));

    assert!(d.coordinator.cancel_request(id).await.unwrap().is_applied());
    wait(1).await;
    assert_eq!(d.screen.showing(), None);

    // The terminal stays quiet about a request the coordinator closed
    wait(120).await;
    assert!(d.status_wire.lock().unwrap().is_empty());
    assert_eq!(d.status_of(id).await, RequestStatus::Cancelled);
    d.cancel.cancel();
}

#[tokio::test(start_paused = true)]
async fn test_restart_rearms_pending_timeout() {
    let mut leftover = ConsultationRequest::new(
        RequestId::generate(),
        FACULTY,
        "student-7".into(),
        "Left from before the restart",
        ce_core::time::current_time_millis() - 45_000,
    );
    leftover.status = RequestStatus::Pending;
    let id = leftover.id;

    let d = Deployment::start_with(
        Mode::AlwaysAvailable,
        MemoryRegistry::with_requests([leftover]),
    )
    .await;
    wait(10).await;
    assert_eq!(d.status_of(id).await, RequestStatus::Pending);
    assert!(d.coordinator.timer_armed(&id));

    wait(10).await;
    assert_eq!(d.status_of(id).await, RequestStatus::TimedOut);
    d.cancel.cancel();
}

#[test]
fn test_coordinator_config_file_round_trip() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("coordinator.toml");
    std::fs::write(
        &path,
        r#"
request_timeout = 90
staleness_window = 150
keepalive_interval = 60

[bus]
host = "broker.campus.local"

[[faculty]]
id = 1
name = "Dr. Moreau"
beacon_address = "C4:7C:8D:6A:2B:10"

[[faculty]]
id = 2
name = "Dr. Tanaka"
department = "Physics"
namespace = "physics/tanaka"
"#,
    )
    .unwrap();

    let config: CoordinatorConfig = ce_core::config::load_config(&path).unwrap();
    config.validate().unwrap();
    assert_eq!(config.request_timeout, Duration::from_secs(90));
    assert_eq!(config.bus.host, "broker.campus.local");
    assert_eq!(config.faculty.len(), 2);
    assert_eq!(
        config.faculty(FacultyId(2)).unwrap().topics().requests(),
        "physics/tanaka/requests"
    );
}
