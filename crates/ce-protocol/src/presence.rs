//! Faculty presence types

use serde::{Deserialize, Serialize};
use std::fmt;

/// Whether a faculty member is physically at their desk
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum Presence {
    /// Nothing trustworthy is known
    #[default]
    Unknown,
    /// Present and accepting requests
    Available,
    /// Away
    Unavailable,
}

impl fmt::Display for Presence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Presence::Unknown => write!(f, "unknown"),
            Presence::Available => write!(f, "available"),
            Presence::Unavailable => write!(f, "unavailable"),
        }
    }
}

/// What produced a presence value
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PresenceSource {
    /// Beacon scan results
    Beacon,
    /// Administrative "always available" mode
    Override,
    /// Periodic keepalive from an override-mode terminal
    Keepalive,
}

/// Presence of one faculty member at a point in time
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PresenceState {
    /// Current presence
    pub presence: Presence,
    /// Unix millis at which this value was established; never decreases
    pub as_of: u64,
    /// Origin of the value
    pub source: PresenceSource,
}

impl PresenceState {
    /// Initial state before any scan has completed
    pub fn unknown() -> Self {
        Self {
            presence: Presence::Unknown,
            as_of: 0,
            source: PresenceSource::Beacon,
        }
    }

    /// Whether requests may be routed to this faculty member
    pub fn is_available(&self) -> bool {
        self.presence == Presence::Available
    }
}

impl Default for PresenceState {
    fn default() -> Self {
        Self::unknown()
    }
}
