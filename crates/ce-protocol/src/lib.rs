//! ce-protocol: Wire protocol for ConsultEase
//!
//! This crate defines the messages exchanged between the central coordinator
//! and the per-faculty terminals over the publish/subscribe bus, the
//! envelope they travel in, and the topic layout they are published on.

pub mod clock;
pub mod envelope;
pub mod error;
pub mod ids;
pub mod message;
pub mod presence;
pub mod request;
pub mod topic;

pub use clock::{ClockConfidence, Timestamp};
pub use envelope::{MessageEnvelope, MAX_ENVELOPE_SIZE};
pub use error::ProtocolError;
pub use ids::{FacultyId, IdempotencyToken, RequestId, RequesterId};
pub use message::{Message, MessageType, PresenceReport, StatusReport, PROTOCOL_VERSION};
pub use presence::{Presence, PresenceSource, PresenceState};
pub use request::{ConsultationRequest, RequestStatus};
pub use topic::{topic_matches, FacultyTopics};
