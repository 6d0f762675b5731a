//! Headless request display

use ce_core::traits::RequestDisplay;
use ce_protocol::{ConsultationRequest, RequestId};

/// Writes the active request to the log instead of a screen
#[derive(Debug, Default)]
pub struct LogDisplay {
    showing: Option<RequestId>,
}

impl LogDisplay {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request currently on display
    pub fn showing(&self) -> Option<RequestId> {
        self.showing
    }
}

impl RequestDisplay for LogDisplay {
    fn show_request(&mut self, request: &ConsultationRequest) {
        if self.showing == Some(request.id) {
            return;
        }
        self.showing = Some(request.id);
        tracing::info!(
            request_id = %request.id,
            requester = %request.requester_id,
            "Consultation request: {:?} (type 'accept' or 'decline [reason]')",
            request.message
        );
    }

    fn clear_request(&mut self) {
        if self.showing.take().is_some() {
            tracing::info!("No pending consultation requests");
        }
    }
}
