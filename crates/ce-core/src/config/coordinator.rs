//! Coordinator configuration

use serde::{Deserialize, Serialize};
use std::collections::HashSet;
use std::time::Duration;

use super::serde_utils::duration_secs;
use super::BusConfig;
use crate::error::ConfigError;
use crate::types::FacultyIdentity;

/// How many keepalive intervals the staleness window must exceed.
///
/// With 2, a terminal can miss one keepalive (or one presence refresh)
/// without its mirrored presence being downgraded.
pub const KEEPALIVE_TOLERANCE: u32 = 2;

/// Configuration for the central coordinator
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CoordinatorConfig {
    /// Bus connection
    pub bus: BusConfig,

    /// How long a request may stay pending
    #[serde(with = "duration_secs")]
    pub request_timeout: Duration,

    /// Silence after which a terminal's presence is considered unknown
    #[serde(with = "duration_secs")]
    pub staleness_window: Duration,

    /// Interval at which terminals send keepalives or presence refreshes
    #[serde(with = "duration_secs")]
    pub keepalive_interval: Duration,

    /// How often the staleness sweep runs
    #[serde(with = "duration_secs")]
    pub staleness_check_interval: Duration,

    /// How long idempotency tokens of applied status reports are remembered
    #[serde(with = "duration_secs")]
    pub token_retention: Duration,

    /// IPC port for the kiosk UI (localhost only)
    pub ipc_port: u16,

    /// Faculty directory
    pub faculty: Vec<FacultyIdentity>,
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            bus: BusConfig::default(),
            request_timeout: Duration::from_secs(60),
            staleness_window: Duration::from_secs(150),
            keepalive_interval: Duration::from_secs(60),
            staleness_check_interval: Duration::from_secs(10),
            token_retention: Duration::from_secs(600),
            ipc_port: 22240,
            faculty: vec![],
        }
    }
}

impl CoordinatorConfig {
    /// Get the IPC address (localhost:port)
    pub fn ipc_address(&self) -> String {
        format!("127.0.0.1:{}", self.ipc_port)
    }

    /// Check the configuration before anything is started
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.faculty.is_empty() {
            return Err(ConfigError::MissingField("faculty".to_string()));
        }

        let mut ids = HashSet::new();
        let mut namespaces = HashSet::new();
        for faculty in &self.faculty {
            if !ids.insert(faculty.id) {
                return Err(ConfigError::Invalid(format!(
                    "duplicate faculty id {}",
                    faculty.id
                )));
            }
            let namespace = faculty.namespace();
            if namespace.trim_matches('/').is_empty() {
                return Err(ConfigError::Invalid(format!(
                    "{} has an empty topic namespace",
                    faculty.id
                )));
            }
            if !namespaces.insert(namespace.clone()) {
                return Err(ConfigError::Invalid(format!(
                    "topic namespace {} is assigned twice",
                    namespace
                )));
            }
        }

        if self.request_timeout.is_zero() {
            return Err(ConfigError::Invalid(
                "request_timeout must be positive".to_string(),
            ));
        }

        if self.staleness_window <= self.keepalive_interval * KEEPALIVE_TOLERANCE {
            return Err(ConfigError::Invalid(format!(
                "staleness_window ({:?}) must exceed {} x keepalive_interval ({:?})",
                self.staleness_window, KEEPALIVE_TOLERANCE, self.keepalive_interval
            )));
        }

        if self.staleness_check_interval.is_zero() {
            return Err(ConfigError::Invalid(
                "staleness_check_interval must be positive".to_string(),
            ));
        }

        Ok(())
    }

    /// Look up a faculty member by id
    pub fn faculty(&self, id: ce_protocol::FacultyId) -> Option<&FacultyIdentity> {
        self.faculty.iter().find(|f| f.id == id)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ce_protocol::FacultyId;

    fn config_with(ids: &[u32]) -> CoordinatorConfig {
        CoordinatorConfig {
            faculty: ids
                .iter()
                .map(|id| FacultyIdentity::new(FacultyId::new(*id), format!("F{}", id), ""))
                .collect(),
            ..Default::default()
        }
    }

    #[test]
    fn test_defaults_are_valid_with_faculty() {
        assert!(config_with(&[1, 2]).validate().is_ok());
    }

    #[test]
    fn test_missing_faculty_is_rejected() {
        let err = CoordinatorConfig::default().validate().unwrap_err();
        assert!(matches!(err, ConfigError::MissingField(f) if f == "faculty"));
    }

    #[test]
    fn test_duplicate_faculty_is_rejected() {
        assert!(config_with(&[1, 1]).validate().is_err());
    }

    #[test]
    fn test_shared_namespace_is_rejected() {
        let mut config = config_with(&[1, 2]);
        config.faculty[1].namespace = Some("faculty/1".to_string());
        assert!(config.validate().is_err());
    }

    #[test]
    fn test_staleness_must_tolerate_one_missed_keepalive() {
        let mut config = config_with(&[1]);
        config.keepalive_interval = Duration::from_secs(60);
        config.staleness_window = Duration::from_secs(120);
        assert!(config.validate().is_err());

        config.staleness_window = Duration::from_secs(121);
        assert!(config.validate().is_ok());
    }

    #[test]
    fn test_faculty_lookup() {
        let config = config_with(&[5, 6]);
        assert_eq!(config.faculty(FacultyId::new(6)).unwrap().name, "F6");
        assert!(config.faculty(FacultyId::new(7)).is_none());
    }
}
