//! Consultation request types

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::ids::{FacultyId, RequestId, RequesterId};

/// Lifecycle status of a consultation request
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RequestStatus {
    /// Built by the coordinator, not yet routed
    Created,
    /// Routed to the terminal, waiting for the faculty member
    Pending,
    /// Faculty member accepted
    Accepted,
    /// Faculty member declined
    Declined,
    /// Nobody acted before the timeout
    TimedOut,
    /// Requester withdrew the request
    Cancelled,
}

impl RequestStatus {
    /// Whether this status is absorbing
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            RequestStatus::Accepted
                | RequestStatus::Declined
                | RequestStatus::TimedOut
                | RequestStatus::Cancelled
        )
    }
}

impl fmt::Display for RequestStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            RequestStatus::Created => "created",
            RequestStatus::Pending => "pending",
            RequestStatus::Accepted => "accepted",
            RequestStatus::Declined => "declined",
            RequestStatus::TimedOut => "timed_out",
            RequestStatus::Cancelled => "cancelled",
        };
        write!(f, "{}", s)
    }
}

/// A request from a student to consult a faculty member
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ConsultationRequest {
    /// Coordinator-assigned identifier
    pub id: RequestId,
    /// Faculty member being asked
    pub faculty_id: FacultyId,
    /// Who is asking
    pub requester_id: RequesterId,
    /// Free-form request text
    pub message: String,
    /// Creation time (Unix millis, coordinator clock)
    pub created_at: u64,
    /// Current lifecycle status
    pub status: RequestStatus,
    /// Optional reply from the faculty member, e.g. a decline reason
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_message: Option<String>,
    /// When the request reached a terminal status
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub resolved_at: Option<u64>,
}

impl ConsultationRequest {
    /// Build a new request in the `Created` state
    pub fn new(
        id: RequestId,
        faculty_id: FacultyId,
        requester_id: RequesterId,
        message: impl Into<String>,
        created_at: u64,
    ) -> Self {
        Self {
            id,
            faculty_id,
            requester_id,
            message: message.into(),
            created_at,
            status: RequestStatus::Created,
            response_message: None,
            resolved_at: None,
        }
    }

    /// Whether the request is still waiting for a decision
    pub fn is_pending(&self) -> bool {
        self.status == RequestStatus::Pending
    }
}
