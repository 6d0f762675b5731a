//! Bus topic layout
//!
//! Each faculty member owns a topic namespace (by default `faculty/{id}`):
//!
//! | Topic | Direction |
//! |---|---|
//! | `{ns}/requests` | coordinator → terminal |
//! | `{ns}/requests/status` | terminal → coordinator |
//! | `{ns}/presence` | terminal → coordinator |
//! | `{ns}/presence/keepalive` | terminal → coordinator |

use crate::ids::FacultyId;

/// Default namespace for a faculty member's topics
pub fn default_namespace(faculty_id: FacultyId) -> String {
    format!("faculty/{}", faculty_id.as_u32())
}

/// Topic names for one faculty namespace
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FacultyTopics {
    namespace: String,
}

impl FacultyTopics {
    /// Topics under an explicit namespace
    pub fn new(namespace: impl Into<String>) -> Self {
        let namespace = namespace.into();
        Self {
            namespace: namespace.trim_end_matches('/').to_string(),
        }
    }

    /// Topics under the default namespace for `faculty_id`
    pub fn for_faculty(faculty_id: FacultyId) -> Self {
        Self::new(default_namespace(faculty_id))
    }

    /// The namespace prefix
    pub fn namespace(&self) -> &str {
        &self.namespace
    }

    /// Coordinator → terminal request topic
    pub fn requests(&self) -> String {
        format!("{}/requests", self.namespace)
    }

    /// Terminal → coordinator status topic
    pub fn status(&self) -> String {
        format!("{}/requests/status", self.namespace)
    }

    /// Terminal → coordinator presence topic
    pub fn presence(&self) -> String {
        format!("{}/presence", self.namespace)
    }

    /// Terminal → coordinator keepalive topic
    pub fn keepalive(&self) -> String {
        format!("{}/presence/keepalive", self.namespace)
    }
}

/// Match a topic against an MQTT-style filter.
///
/// `+` matches exactly one level, `#` (only valid as the last level) matches
/// the remaining levels including none.
pub fn topic_matches(filter: &str, topic: &str) -> bool {
    let mut filter_levels = filter.split('/');
    let mut topic_levels = topic.split('/');

    loop {
        match (filter_levels.next(), topic_levels.next()) {
            (Some("#"), _) => return filter_levels.next().is_none(),
            (Some("+"), Some(_)) => {}
            (Some(f), Some(t)) if f == t => {}
            (None, None) => return true,
            _ => return false,
        }
    }
}
