//! Message types for the ConsultEase protocol
//!
//! This module defines the messages exchanged between the coordinator and
//! terminals. Each message travels inside a [`MessageEnvelope`] published on
//! one of the faculty topics described in `topic.rs`.
//!
//! # Message Flow
//!
//! 1. Terminal publishes `Presence` on every presence transition, and
//!    `Keepalive` periodically while in override mode
//! 2. Coordinator publishes `RequestCreated` to the faculty's request topic
//! 3. Terminal publishes `StatusUpdate` once the request is accepted,
//!    declined or timed out locally
//! 4. Coordinator publishes `RequestResolved` when it closes a request on its
//!    own (requester cancel, coordinator-side timeout)
//!
//! [`MessageEnvelope`]: crate::envelope::MessageEnvelope

use serde::{Deserialize, Serialize};
use std::fmt;

use crate::clock::{ClockConfidence, Timestamp};
use crate::ids::{IdempotencyToken, RequestId};
use crate::presence::{Presence, PresenceSource, PresenceState};
use crate::request::{ConsultationRequest, RequestStatus};

/// Current protocol version string, carried by every envelope.
///
/// Format: "MAJOR.MINOR" where MAJOR changes indicate breaking changes.
pub const PROTOCOL_VERSION: &str = "1.0";

/// Message type identifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum MessageType {
    /// New request for a terminal
    RequestCreated,
    /// Coordinator closed a request
    RequestResolved,
    /// Terminal-side status change
    StatusUpdate,
    /// Presence transition
    Presence,
    /// Override-mode liveness signal
    Keepalive,
}

impl MessageType {
    /// Wire name of this type
    pub fn as_str(&self) -> &'static str {
        match self {
            MessageType::RequestCreated => "request_created",
            MessageType::RequestResolved => "request_resolved",
            MessageType::StatusUpdate => "status_update",
            MessageType::Presence => "presence",
            MessageType::Keepalive => "keepalive",
        }
    }
}

impl fmt::Display for MessageType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.as_str())
    }
}

/// Status change reported by a terminal
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StatusReport {
    /// Request the status belongs to
    pub request_id: RequestId,
    /// New status
    pub status: RequestStatus,
    /// Token identifying this report across redeliveries
    pub idempotency_token: IdempotencyToken,
    /// Terminal time of the operator action or timeout (Unix millis)
    pub timestamp: u64,
    /// Whether `timestamp` came from a synchronized clock
    pub clock_confidence: ClockConfidence,
    /// Optional reply text, e.g. a decline reason
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub response_message: Option<String>,
}

/// Presence transition reported by a terminal
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceReport {
    /// New presence
    pub state: Presence,
    /// What produced it
    pub source: PresenceSource,
    /// When it was established (terminal clock, Unix millis)
    pub as_of: u64,
}

impl From<PresenceState> for PresenceReport {
    fn from(state: PresenceState) -> Self {
        Self {
            state: state.presence,
            source: state.source,
            as_of: state.as_of,
        }
    }
}

impl From<PresenceReport> for PresenceState {
    fn from(report: PresenceReport) -> Self {
        Self {
            presence: report.state,
            as_of: report.as_of,
            source: report.source,
        }
    }
}

/// Protocol messages
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", content = "payload", rename_all = "snake_case")]
pub enum Message {
    /// Coordinator routed a new request to the terminal
    RequestCreated(ConsultationRequest),

    /// Coordinator closed a request without terminal action
    RequestResolved {
        /// Request that was closed
        #[serde(rename = "requestId")]
        request_id: RequestId,
        /// Terminal status it was closed with
        status: RequestStatus,
    },

    /// Terminal reports a status change
    StatusUpdate(StatusReport),

    /// Terminal reports a presence transition
    Presence(PresenceReport),

    /// Terminal in override mode is still alive
    Keepalive {
        /// Terminal time of the keepalive (Unix millis)
        #[serde(rename = "asOf")]
        as_of: u64,
    },
}

impl Message {
    /// Get the message type for this message
    pub fn message_type(&self) -> MessageType {
        match self {
            Message::RequestCreated(_) => MessageType::RequestCreated,
            Message::RequestResolved { .. } => MessageType::RequestResolved,
            Message::StatusUpdate(_) => MessageType::StatusUpdate,
            Message::Presence(_) => MessageType::Presence,
            Message::Keepalive { .. } => MessageType::Keepalive,
        }
    }

    /// Request this message concerns, if any
    pub fn request_id(&self) -> Option<RequestId> {
        match self {
            Message::RequestCreated(request) => Some(request.id),
            Message::RequestResolved { request_id, .. } => Some(*request_id),
            Message::StatusUpdate(report) => Some(report.request_id),
            Message::Presence(_) | Message::Keepalive { .. } => None,
        }
    }

    /// Build a status update stamped with the given terminal time
    pub fn status_update(
        request_id: RequestId,
        status: RequestStatus,
        at: Timestamp,
        response_message: Option<String>,
    ) -> Self {
        Message::StatusUpdate(StatusReport {
            request_id,
            status,
            idempotency_token: IdempotencyToken::generate(),
            timestamp: at.millis,
            clock_confidence: at.confidence,
            response_message,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_message_wire_tags() {
        let msg = Message::Keepalive { as_of: 42 };
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value["type"], "keepalive");
        assert_eq!(value["payload"]["asOf"], 42);
        assert_eq!(msg.message_type().as_str(), "keepalive");
    }

    #[test]
    fn test_status_update_fields() {
        let id = RequestId::generate();
        let msg = Message::status_update(
            id,
            RequestStatus::Declined,
            Timestamp::unsynced(10),
            Some("In a meeting".to_string()),
        );
        let value = serde_json::to_value(&msg).unwrap();
        assert_eq!(value["type"], "status_update");
        assert_eq!(value["payload"]["status"], "declined");
        assert_eq!(value["payload"]["clockConfidence"], "fallback");
        assert_eq!(value["payload"]["responseMessage"], "In a meeting");
        assert_eq!(msg.request_id(), Some(id));
    }

    #[test]
    fn test_presence_messages_have_no_request() {
        let msg = Message::Presence(PresenceReport {
            state: Presence::Available,
            source: PresenceSource::Beacon,
            as_of: 5,
        });
        assert_eq!(msg.request_id(), None);
    }
}
