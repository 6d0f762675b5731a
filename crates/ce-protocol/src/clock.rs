//! Timestamps tagged with clock confidence
//!
//! Terminals run on constrained devices whose wall clock may drift. Every
//! timestamp they produce records whether it was taken from a synchronized
//! clock so the coordinator can decide how far to trust it.

use serde::{Deserialize, Serialize};
use std::fmt;

/// How trustworthy a terminal's clock currently is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClockConfidence {
    /// Offset from a time server is known
    Synced,
    /// Free-running local clock
    Fallback,
}

impl ClockConfidence {
    /// Whether timestamps under this confidence can be compared across peers
    pub fn is_synced(&self) -> bool {
        matches!(self, ClockConfidence::Synced)
    }
}

impl fmt::Display for ClockConfidence {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ClockConfidence::Synced => write!(f, "synced"),
            ClockConfidence::Fallback => write!(f, "fallback"),
        }
    }
}

/// Unix time in milliseconds plus the confidence of the clock that produced it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Timestamp {
    /// Milliseconds since the Unix epoch
    pub millis: u64,
    /// Confidence of the producing clock
    pub confidence: ClockConfidence,
}

impl Timestamp {
    /// Timestamp from a synchronized clock
    pub fn synced(millis: u64) -> Self {
        Self {
            millis,
            confidence: ClockConfidence::Synced,
        }
    }

    /// Timestamp from an unsynchronized clock
    pub fn unsynced(millis: u64) -> Self {
        Self {
            millis,
            confidence: ClockConfidence::Fallback,
        }
    }

    /// Whether this timestamp may be ordered against `other` by value.
    ///
    /// Only two synchronized timestamps are comparable; anything involving a
    /// fallback clock must be ordered by arrival instead.
    pub fn comparable_with(&self, other: &Timestamp) -> bool {
        self.confidence.is_synced() && other.confidence.is_synced()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_comparable_only_when_both_synced() {
        let a = Timestamp::synced(1);
        let b = Timestamp::synced(2);
        let c = Timestamp::unsynced(3);
        assert!(a.comparable_with(&b));
        assert!(!a.comparable_with(&c));
        assert!(!c.comparable_with(&a));
    }

    #[test]
    fn test_confidence_wire_format() {
        let json = serde_json::to_string(&ClockConfidence::Fallback).unwrap();
        assert_eq!(json, "\"fallback\"");
    }
}
