//! Outbound notification traits

use ce_protocol::{ConsultationRequest, FacultyId, PresenceState, RequestStatus};

/// Receives coordinator-side changes (kiosk UI, notifier, audit log)
pub trait CoordinatorListener: Send + Sync {
    /// A request was routed to a terminal
    fn on_request_created(&self, _request: &ConsultationRequest) {}

    /// A request changed status; called once per applied transition
    fn on_request_status_changed(&self, _request: &ConsultationRequest, _previous: RequestStatus) {}

    /// The mirrored presence of a faculty member changed
    fn on_presence_changed(&self, _faculty_id: FacultyId, _state: &PresenceState) {}
}

/// Listener that ignores everything
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopListener;

impl CoordinatorListener for NoopListener {}

/// Terminal-side surface showing the active request
pub trait RequestDisplay: Send {
    /// Show `request` as the one awaiting a decision
    fn show_request(&mut self, request: &ConsultationRequest);

    /// Nothing is awaiting a decision
    fn clear_request(&mut self);
}
