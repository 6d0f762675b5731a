//! IPC server for local clients
//!
//! The kiosk UI and admin tools talk to the running coordinator over
//! newline-delimited JSON on localhost TCP.

mod server;

pub use server::IpcServer;

use tokio::sync::broadcast;

use ce_core::ipc::IpcEvent;
use ce_core::traits::CoordinatorListener;
use ce_protocol::{ConsultationRequest, FacultyId, PresenceState, RequestStatus};

/// Listener that fans coordinator notifications out to IPC clients
#[derive(Debug, Clone)]
pub struct BroadcastListener {
    event_tx: broadcast::Sender<IpcEvent>,
}

impl BroadcastListener {
    pub fn new(capacity: usize) -> Self {
        let (event_tx, _) = broadcast::channel(capacity);
        Self { event_tx }
    }

    /// Sender handed to the IPC server
    pub fn sender(&self) -> broadcast::Sender<IpcEvent> {
        self.event_tx.clone()
    }

    pub fn subscribe(&self) -> broadcast::Receiver<IpcEvent> {
        self.event_tx.subscribe()
    }

    fn emit(&self, event: IpcEvent) {
        // No connected clients is not an error
        let _ = self.event_tx.send(event);
    }
}

impl CoordinatorListener for BroadcastListener {
    fn on_request_created(&self, request: &ConsultationRequest) {
        self.emit(IpcEvent::RequestRouted {
            request: request.clone(),
        });
    }

    fn on_request_status_changed(&self, request: &ConsultationRequest, previous: RequestStatus) {
        self.emit(IpcEvent::RequestStatusChanged {
            request: request.clone(),
            previous,
        });
    }

    fn on_presence_changed(&self, faculty_id: FacultyId, state: &PresenceState) {
        self.emit(IpcEvent::PresenceChanged {
            faculty_id,
            state: *state,
        });
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ce_protocol::{Presence, PresenceSource, RequestId};

    #[test]
    fn test_events_reach_subscribers() {
        let listener = BroadcastListener::new(8);
        let mut rx = listener.subscribe();

        let mut request = ConsultationRequest::new(
            RequestId::generate(),
            FacultyId(3),
            "student-9".into(),
            "grading question",
            5,
        );
        listener.on_request_created(&request);
        request.status = RequestStatus::Accepted;
        listener.on_request_status_changed(&request, RequestStatus::Pending);
        listener.on_presence_changed(
            FacultyId(3),
            &PresenceState {
                presence: Presence::Available,
                as_of: 9,
                source: PresenceSource::Beacon,
            },
        );

        assert!(matches!(rx.try_recv().unwrap(), IpcEvent::RequestRouted { .. }));
        match rx.try_recv().unwrap() {
            IpcEvent::RequestStatusChanged { request, previous } => {
                assert_eq!(request.status, RequestStatus::Accepted);
                assert_eq!(previous, RequestStatus::Pending);
            }
            other => panic!("unexpected event {:?}", other),
        }
        assert!(matches!(
            rx.try_recv().unwrap(),
            IpcEvent::PresenceChanged { faculty_id: FacultyId(3), .. }
        ));
    }

    #[test]
    fn test_emit_without_subscribers() {
        let listener = BroadcastListener::new(8);
        listener.on_presence_changed(FacultyId(1), &PresenceState::unknown());
    }
}
