//! Message envelope encoding/decoding
//!
//! Every message is wrapped in an envelope that carries routing and
//! deduplication metadata. Envelopes are JSON encoded so they can be
//! inspected with ordinary MQTT tooling.

use bytes::Bytes;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::clock::Timestamp;
use crate::error::ProtocolError;
use crate::ids::{IdempotencyToken, RequestId};
use crate::message::{Message, MessageType, PROTOCOL_VERSION};

/// Maximum encoded envelope size (64KB, well under broker packet limits)
pub const MAX_ENVELOPE_SIZE: usize = 64 * 1024;

/// Wire-level wrapper around a [`Message`]
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct MessageEnvelope {
    /// Unique per publish
    pub id: Uuid,
    /// Request this message concerns, if any
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub request_id: Option<RequestId>,
    /// Publisher-local sequence number
    pub sequence: u64,
    /// Stable across retries of the same logical message
    pub token: IdempotencyToken,
    /// When and under which clock the publisher built this message
    pub origin: Timestamp,
    /// Protocol version of the publisher
    pub version: String,
    /// The message itself
    pub body: Message,
}

impl MessageEnvelope {
    /// Wrap a message.
    ///
    /// Status updates reuse their report's idempotency token so that the
    /// envelope and the payload dedupe identically.
    pub fn new(body: Message, origin: Timestamp, sequence: u64) -> Self {
        let token = match &body {
            Message::StatusUpdate(report) => report.idempotency_token,
            _ => IdempotencyToken::generate(),
        };
        Self {
            id: Uuid::new_v4(),
            request_id: body.request_id(),
            sequence,
            token,
            origin,
            version: PROTOCOL_VERSION.to_string(),
            body,
        }
    }

    /// Type of the wrapped message
    pub fn message_type(&self) -> MessageType {
        self.body.message_type()
    }

    /// Encode to bytes for publishing
    pub fn encode(&self) -> Result<Bytes, ProtocolError> {
        let payload = serde_json::to_vec(self)?;
        if payload.len() > MAX_ENVELOPE_SIZE {
            return Err(ProtocolError::PayloadTooLarge {
                size: payload.len(),
                max: MAX_ENVELOPE_SIZE,
            });
        }
        Ok(Bytes::from(payload))
    }

    /// Decode from received bytes
    pub fn decode(src: &[u8]) -> Result<Self, ProtocolError> {
        if src.len() > MAX_ENVELOPE_SIZE {
            return Err(ProtocolError::PayloadTooLarge {
                size: src.len(),
                max: MAX_ENVELOPE_SIZE,
            });
        }
        let envelope: MessageEnvelope = serde_json::from_slice(src)?;
        if !is_compatible(&envelope.version) {
            return Err(ProtocolError::UnsupportedVersion(envelope.version));
        }
        Ok(envelope)
    }
}

/// Same major version as ours
fn is_compatible(version: &str) -> bool {
    let major = |v: &str| v.split('.').next().map(str::to_owned);
    major(version) == major(PROTOCOL_VERSION)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ids::FacultyId;
    use crate::request::{ConsultationRequest, RequestStatus};
    use crate::ids::RequesterId;

    #[test]
    fn test_envelope_carries_request_id() {
        let request = ConsultationRequest::new(
            RequestId::generate(),
            FacultyId::new(2),
            RequesterId::new("s-1"),
            "hello",
            0,
        );
        let id = request.id;
        let envelope =
            MessageEnvelope::new(Message::RequestCreated(request), Timestamp::synced(1), 7);
        assert_eq!(envelope.request_id, Some(id));
        assert_eq!(envelope.sequence, 7);

        let bytes = envelope.encode().unwrap();
        let decoded = MessageEnvelope::decode(&bytes).unwrap();
        assert_eq!(decoded, envelope);
    }

    #[test]
    fn test_status_envelope_reuses_report_token() {
        let body = Message::status_update(
            RequestId::generate(),
            RequestStatus::Accepted,
            Timestamp::synced(1),
            None,
        );
        let expected = match &body {
            Message::StatusUpdate(report) => report.idempotency_token,
            _ => unreachable!(),
        };
        let envelope = MessageEnvelope::new(body, Timestamp::synced(1), 1);
        assert_eq!(envelope.token, expected);
    }

    #[test]
    fn test_rejects_incompatible_version() {
        let mut envelope =
            MessageEnvelope::new(Message::Keepalive { as_of: 1 }, Timestamp::synced(1), 1);
        envelope.version = "2.0".to_string();
        let bytes = serde_json::to_vec(&envelope).unwrap();
        assert!(matches!(
            MessageEnvelope::decode(&bytes),
            Err(ProtocolError::UnsupportedVersion(v)) if v == "2.0"
        ));
    }

    #[test]
    fn test_rejects_oversized_input() {
        let big = vec![b' '; MAX_ENVELOPE_SIZE + 1];
        assert!(matches!(
            MessageEnvelope::decode(&big),
            Err(ProtocolError::PayloadTooLarge { .. })
        ));
    }

    #[test]
    fn test_rejects_garbage() {
        assert!(matches!(
            MessageEnvelope::decode(b"{not json"),
            Err(ProtocolError::Serialization(_))
        ));
    }
}
