//! Core domain types

use serde::{Deserialize, Serialize};
use std::fmt;

use ce_protocol::topic::default_namespace;
use ce_protocol::{FacultyId, FacultyTopics};

/// A provisioned faculty member and the terminal assigned to them
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FacultyIdentity {
    /// Stable numeric identifier
    pub id: FacultyId,
    /// Display name
    pub name: String,
    /// Department, for display
    #[serde(default)]
    pub department: Option<String>,
    /// BLE address of the faculty member's beacon
    #[serde(default)]
    pub beacon_address: String,
    /// Topic namespace (defaults to `faculty/{id}`)
    #[serde(default)]
    pub namespace: Option<String>,
}

impl FacultyIdentity {
    /// Create an identity using the default topic namespace
    pub fn new(id: FacultyId, name: impl Into<String>, beacon_address: impl Into<String>) -> Self {
        Self {
            id,
            name: name.into(),
            department: None,
            beacon_address: beacon_address.into(),
            namespace: None,
        }
    }

    /// Effective topic namespace
    pub fn namespace(&self) -> String {
        self.namespace
            .clone()
            .unwrap_or_else(|| default_namespace(self.id))
    }

    /// Topics this faculty member's terminal talks on
    pub fn topics(&self) -> FacultyTopics {
        FacultyTopics::new(self.namespace())
    }
}

/// Connection status of a bus client
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConnectionStatus {
    /// Session with the broker is up
    Connected,
    /// No session; publishes are buffered
    Disconnected,
}

impl ConnectionStatus {
    /// Whether a session is up
    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionStatus::Connected)
    }
}

impl fmt::Display for ConnectionStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ConnectionStatus::Connected => write!(f, "connected"),
            ConnectionStatus::Disconnected => write!(f, "disconnected"),
        }
    }
}
