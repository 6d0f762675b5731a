//! Protocol error types

use thiserror::Error;

/// Errors that can occur while encoding or decoding protocol messages
#[derive(Error, Debug)]
pub enum ProtocolError {
    /// Payload exceeds maximum size
    #[error("Payload too large: {size} bytes exceeds maximum of {max} bytes")]
    PayloadTooLarge { size: usize, max: usize },

    /// Envelope carries a protocol version we cannot read
    #[error("Unsupported protocol version: {0}")]
    UnsupportedVersion(String),

    /// Message arrived on a topic that does not carry its type
    #[error("Unexpected {message_type} message on topic {topic}")]
    UnexpectedMessage { message_type: String, topic: String },

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}
