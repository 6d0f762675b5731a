//! Core error types for ConsultEase
//!
//! Only [`ConfigError`] is ever fatal, and only at startup. Everything else
//! is either retried ([`TransportError`], [`SyncFailure`]), returned to the
//! caller ([`RoutingError`]) or logged and dropped ([`InvalidTransition`]).

use std::path::PathBuf;

use ce_protocol::{FacultyId, Presence, ProtocolError, RequestId, RequestStatus};
use thiserror::Error;

/// Top-level error type for the ConsultEase core
#[derive(Error, Debug)]
pub enum CeError {
    /// Protocol error
    #[error("Protocol error: {0}")]
    Protocol(#[from] ProtocolError),

    /// Bus transport error
    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    /// Routing error
    #[error("Routing error: {0}")]
    Routing(#[from] RoutingError),

    /// Rejected state transition
    #[error("Invalid transition: {0}")]
    Transition(#[from] InvalidTransition),

    /// Time synchronization failure
    #[error("Time sync failure: {0}")]
    Sync(#[from] SyncFailure),

    /// Registry failure
    #[error("Registry error: {0}")]
    Registry(#[from] RegistryError),

    /// Configuration error
    #[error("Configuration error: {0}")]
    Config(#[from] ConfigError),

    /// I/O error
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Bus-related errors
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// No session with the broker
    #[error("Not connected to the bus")]
    Disconnected,

    /// Session could not be established
    #[error("Connection failed: {0}")]
    ConnectFailed(String),

    /// Established session dropped
    #[error("Connection lost: {0}")]
    ConnectionLost(String),

    /// Broker did not answer in time
    #[error("Timed out waiting for the broker")]
    Timeout,

    /// The bus client task has stopped
    #[error("Bus client closed")]
    Closed,
}

/// Errors returned synchronously from request creation
#[derive(Error, Debug)]
pub enum RoutingError {
    /// Faculty member is not known to the coordinator
    #[error("Unknown faculty: {0}")]
    UnknownFaculty(FacultyId),

    /// Faculty member is not present
    #[error("{faculty_id} is unavailable (presence: {presence})")]
    FacultyUnavailable {
        faculty_id: FacultyId,
        presence: Presence,
    },

    /// Request could not be recorded
    #[error("Failed to record request: {0}")]
    Registry(#[from] RegistryError),
}

/// Transition requests that are logged and dropped
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum InvalidTransition {
    /// No request with this identifier
    #[error("Unknown request: {0}")]
    UnknownRequest(RequestId),

    /// Request already reached a different terminal status
    #[error("Request {id} is already {current}, cannot become {attempted}")]
    AlreadyTerminal {
        id: RequestId,
        current: RequestStatus,
        attempted: RequestStatus,
    },

    /// Transition is not part of the lifecycle
    #[error("Request {id} cannot move from {from} to {to}")]
    NotAllowed {
        id: RequestId,
        from: RequestStatus,
        to: RequestStatus,
    },

    /// Status reported on a topic that does not own the request
    #[error("Request {id} belongs to {owner}, not {reporter}")]
    WrongFaculty {
        id: RequestId,
        owner: FacultyId,
        reporter: FacultyId,
    },
}

/// Time synchronization failures
#[derive(Error, Debug)]
pub enum SyncFailure {
    /// Server did not answer within the timeout
    #[error("Time server {server} timed out")]
    Timeout { server: String },

    /// Server answered with something unusable
    #[error("Malformed reply from {server}: {reason}")]
    Malformed { server: String, reason: String },

    /// Every configured server failed
    #[error("All {attempted} time servers failed")]
    AllServersFailed { attempted: usize },

    /// Socket error
    #[error("I/O error talking to {server}: {source}")]
    Io {
        server: String,
        #[source]
        source: std::io::Error,
    },
}

/// Registry (persistence collaborator) errors
#[derive(Error, Debug)]
#[error("{0}")]
pub struct RegistryError(pub String);

/// Configuration-related errors
#[derive(Error, Debug)]
pub enum ConfigError {
    /// Config file not found
    #[error("Config file not found: {0}")]
    NotFound(PathBuf),

    /// Invalid configuration
    #[error("Invalid config: {0}")]
    Invalid(String),

    /// TOML parse error
    #[error("TOML parse error: {0}")]
    Parse(#[from] toml::de::Error),

    /// TOML serialize error
    #[error("TOML serialize error: {0}")]
    Serialize(#[from] toml::ser::Error),

    /// Missing required field
    #[error("Missing required field: {0}")]
    MissingField(String),
}
