//! Identifier types

use serde::{Deserialize, Serialize};
use std::fmt;
use uuid::Uuid;

/// Stable numeric identifier of a faculty member (and of their terminal)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct FacultyId(pub u32);

impl FacultyId {
    /// Create a new faculty ID
    pub fn new(id: u32) -> Self {
        Self(id)
    }

    /// Get the raw ID value
    pub fn as_u32(&self) -> u32 {
        self.0
    }
}

impl fmt::Display for FacultyId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "faculty-{}", self.0)
    }
}

impl From<u32> for FacultyId {
    fn from(id: u32) -> Self {
        Self(id)
    }
}

/// Unique identifier of a consultation request, assigned by the coordinator
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequestId(pub Uuid);

impl RequestId {
    /// Allocate a fresh request ID
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }

    /// Parse a request ID from its string form
    pub fn parse(s: &str) -> Option<Self> {
        Uuid::parse_str(s).ok().map(Self)
    }
}

impl fmt::Display for RequestId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Opaque token letting a receiver recognize a redelivered message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct IdempotencyToken(pub Uuid);

impl IdempotencyToken {
    /// Create a fresh token
    pub fn generate() -> Self {
        Self(Uuid::new_v4())
    }
}

impl fmt::Display for IdempotencyToken {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of the student (or kiosk user) who asked for the consultation
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RequesterId(pub String);

impl RequesterId {
    /// Create a new requester ID
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    /// Get the raw ID string
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for RequesterId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl From<&str> for RequesterId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_faculty_id_display() {
        assert_eq!(format!("{}", FacultyId::new(7)), "faculty-7");
    }

    #[test]
    fn test_request_id_parse() {
        let id = RequestId::generate();
        assert_eq!(RequestId::parse(&id.to_string()), Some(id));
        assert_eq!(RequestId::parse("not-a-uuid"), None);
    }

    #[test]
    fn test_ids_serialize_transparently() {
        let json = serde_json::to_string(&FacultyId::new(3)).unwrap();
        assert_eq!(json, "3");
        let json = serde_json::to_string(&RequesterId::new("s-100")).unwrap();
        assert_eq!(json, "\"s-100\"");
    }
}
