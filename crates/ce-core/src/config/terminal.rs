//! Terminal configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::serde_utils::{duration_millis, duration_secs};
use super::BusConfig;
use crate::error::ConfigError;
use crate::types::FacultyIdentity;

/// Configuration for a faculty terminal
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TerminalConfig {
    /// Identity of the faculty member this terminal serves; required
    pub faculty: Option<FacultyIdentity>,

    /// Bus connection
    pub bus: BusConfig,

    /// Local timeout for a pending request
    #[serde(with = "duration_secs")]
    pub request_timeout: Duration,

    /// Beacon presence detection
    pub presence: PresenceConfig,

    /// Clock synchronization
    pub time_sync: TimeSyncConfig,

    /// How beacons are scanned
    pub scanner: ScannerConfig,
}

impl Default for TerminalConfig {
    fn default() -> Self {
        Self {
            faculty: None,
            bus: BusConfig::default(),
            request_timeout: Duration::from_secs(60),
            presence: PresenceConfig::default(),
            time_sync: TimeSyncConfig::default(),
            scanner: ScannerConfig::None,
        }
    }
}

impl TerminalConfig {
    /// The faculty identity, or an error naming the missing mapping
    pub fn identity(&self) -> Result<&FacultyIdentity, ConfigError> {
        self.faculty
            .as_ref()
            .ok_or_else(|| ConfigError::MissingField("faculty".to_string()))
    }

    /// Check the configuration before anything is started
    pub fn validate(&self) -> Result<(), ConfigError> {
        let faculty = self.identity()?;

        if faculty.namespace().trim_matches('/').is_empty() {
            return Err(ConfigError::MissingField("faculty.namespace".to_string()));
        }
        if faculty.beacon_address.trim().is_empty() && !self.presence.always_available {
            return Err(ConfigError::MissingField(
                "faculty.beacon_address".to_string(),
            ));
        }
        if self.presence.enter_scans == 0 || self.presence.exit_scans == 0 {
            return Err(ConfigError::Invalid(
                "presence.enter_scans and presence.exit_scans must be at least 1".to_string(),
            ));
        }
        if self.presence.scan_interval.is_zero() || self.presence.keepalive_interval.is_zero() {
            return Err(ConfigError::Invalid(
                "presence intervals must be positive".to_string(),
            ));
        }
        if self.time_sync.servers.is_empty() {
            return Err(ConfigError::MissingField("time_sync.servers".to_string()));
        }
        if self.request_timeout.is_zero() {
            return Err(ConfigError::Invalid(
                "request_timeout must be positive".to_string(),
            ));
        }
        Ok(())
    }
}

/// Beacon presence detection settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PresenceConfig {
    /// Time between beacon scans
    #[serde(with = "duration_millis")]
    pub scan_interval: Duration,

    /// Minimum RSSI (dBm) for a reading to count as present
    pub rssi_threshold: i16,

    /// Consecutive strong scans needed to become available
    pub enter_scans: u32,

    /// Consecutive weak or empty scans needed to become unavailable
    pub exit_scans: u32,

    /// Administrative override: always report available
    pub always_available: bool,

    /// Keepalive period in override mode; also the presence refresh period
    #[serde(with = "duration_secs")]
    pub keepalive_interval: Duration,
}

impl Default for PresenceConfig {
    fn default() -> Self {
        Self {
            scan_interval: Duration::from_secs(5),
            rssi_threshold: -80,
            enter_scans: 2,
            exit_scans: 4,
            always_available: false,
            keepalive_interval: Duration::from_secs(60),
        }
    }
}

/// Clock synchronization settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeSyncConfig {
    /// Time servers, tried in order
    pub servers: Vec<String>,

    /// Per-server timeout
    #[serde(with = "duration_millis")]
    pub timeout: Duration,

    /// Delay before the next sync after a success
    #[serde(with = "duration_secs")]
    pub sync_interval: Duration,

    /// Delay before retrying after every server failed
    #[serde(with = "duration_secs")]
    pub retry_interval: Duration,

    /// Short retries before falling back to `sync_interval`
    pub max_retries: u32,
}

impl Default for TimeSyncConfig {
    fn default() -> Self {
        Self {
            servers: vec![
                "pool.ntp.org".to_string(),
                "time.google.com".to_string(),
                "time.cloudflare.com".to_string(),
            ],
            timeout: Duration::from_secs(3),
            sync_interval: Duration::from_secs(3600),
            retry_interval: Duration::from_secs(60),
            max_retries: 5,
        }
    }
}

/// Beacon scanner backend
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum ScannerConfig {
    /// No radio; every scan reports the beacon absent
    None,
    /// Run an external program with the beacon address as last argument;
    /// it prints the RSSI in dBm, or nothing if the beacon was not seen
    Command {
        program: String,
        #[serde(default)]
        args: Vec<String>,
        #[serde(default = "default_scan_timeout", with = "duration_millis")]
        timeout: Duration,
    },
}

fn default_scan_timeout() -> Duration {
    Duration::from_secs(4)
}
