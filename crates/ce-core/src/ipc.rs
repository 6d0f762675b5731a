//! IPC protocol between local tools (kiosk UI, CLI) and the coordinator
//!
//! Newline-delimited JSON over TCP on 127.0.0.1. Every request gets exactly
//! one response line; event lines may be interleaved at any point.

use serde::{Deserialize, Serialize};

use ce_protocol::{ConsultationRequest, FacultyId, PresenceState, RequestStatus};

/// Request from a local client to the coordinator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum IpcRequest {
    /// Route a new consultation request
    CreateRequest {
        faculty_id: u32,
        requester_id: String,
        message: String,
    },

    /// Withdraw a pending request
    CancelRequest { request_id: String },

    /// Fetch a single request
    GetRequest { request_id: String },

    /// List requests still pending
    ListPending,

    /// List configured faculty with their mirrored presence
    ListFaculty,

    /// Keepalive
    Ping,
}

/// Response to an [`IpcRequest`]
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum IpcResponse {
    /// Request routed
    RequestCreated { request: ConsultationRequest },

    /// Single request
    Request { request: ConsultationRequest },

    /// Pending requests
    Requests { requests: Vec<ConsultationRequest> },

    /// Faculty directory
    Faculty { faculty: Vec<FacultyInfo> },

    /// Generic success
    Ok,

    /// Error response
    Error { message: String },

    /// Pong response
    Pong,
}

/// Event pushed to every connected client
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum IpcEvent {
    /// A request was routed to a terminal
    RequestRouted { request: ConsultationRequest },

    /// A request changed status
    RequestStatusChanged {
        request: ConsultationRequest,
        previous: RequestStatus,
    },

    /// Mirrored presence changed
    PresenceChanged {
        faculty_id: FacultyId,
        state: PresenceState,
    },
}

/// Faculty member as seen by the coordinator
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FacultyInfo {
    pub id: FacultyId,
    pub name: String,
    pub department: Option<String>,
    pub namespace: String,
    pub presence: PresenceState,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_request_wire_format() {
        let request: IpcRequest = serde_json::from_str(
            r#"{"type":"create_request","faculty_id":3,"requester_id":"s-1","message":"hi"}"#,
        )
        .unwrap();
        assert_eq!(
            request,
            IpcRequest::CreateRequest {
                faculty_id: 3,
                requester_id: "s-1".to_string(),
                message: "hi".to_string(),
            }
        );

        let ping: IpcRequest = serde_json::from_str(r#"{"type":"ping"}"#).unwrap();
        assert_eq!(ping, IpcRequest::Ping);
    }

    #[test]
    fn test_error_response_shape() {
        let json = serde_json::to_value(IpcResponse::Error {
            message: "nope".to_string(),
        })
        .unwrap();
        assert_eq!(json["type"], "error");
        assert_eq!(json["message"], "nope");
    }

    #[test]
    fn test_event_tags_differ_from_responses() {
        let request = ConsultationRequest::new(
            ce_protocol::RequestId::generate(),
            FacultyId(1),
            "s-1".into(),
            "hi",
            0,
        );
        let event = serde_json::to_value(IpcEvent::RequestRouted {
            request: request.clone(),
        })
        .unwrap();
        assert_eq!(event["type"], "request_routed");
        assert!(serde_json::from_value::<IpcResponse>(event).is_err());

        let response = serde_json::to_value(IpcResponse::RequestCreated { request }).unwrap();
        assert_eq!(response["type"], "request_created");
    }
}
