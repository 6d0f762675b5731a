//! Bus client configuration

use serde::{Deserialize, Serialize};
use std::time::Duration;

use super::serde_utils::{duration_millis, duration_secs};
use crate::bus::QoS;
use crate::error::ConfigError;

/// Connection settings for the publish/subscribe bus
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct BusConfig {
    /// Broker host name
    pub host: String,

    /// Broker port
    pub port: u16,

    /// Client identifier (defaults to `{component}-{hostname}`)
    pub client_id: Option<String>,

    /// Optional broker credentials
    pub username: Option<String>,
    pub password: Option<String>,

    /// MQTT keep-alive
    #[serde(with = "duration_secs")]
    pub keep_alive: Duration,

    /// How long to wait for the broker to accept a session
    #[serde(with = "duration_secs")]
    pub connect_timeout: Duration,

    /// Outbound messages kept while disconnected; the oldest is dropped
    /// beyond this
    pub queue_capacity: usize,

    /// Capacity of the MQTT client's request channel
    pub request_channel_capacity: usize,

    /// Delivery guarantee for publishes and subscriptions
    pub qos: QoS,

    /// Reconnect backoff
    pub backoff: BackoffConfig,
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            host: "localhost".to_string(),
            port: 1883,
            client_id: None,
            username: None,
            password: None,
            keep_alive: Duration::from_secs(30),
            connect_timeout: Duration::from_secs(10),
            queue_capacity: 256,
            request_channel_capacity: 64,
            qos: QoS::AtLeastOnce,
            backoff: BackoffConfig::default(),
        }
    }
}

impl BusConfig {
    /// Client identifier, falling back to `{component}-{hostname}`
    pub fn client_id_or(&self, component: &str) -> String {
        self.client_id.clone().unwrap_or_else(|| {
            format!(
                "{}-{}",
                component,
                gethostname::gethostname().to_string_lossy()
            )
        })
    }

    /// Override the broker from a `host` or `host:port` string
    pub fn set_broker(&mut self, address: &str) -> Result<(), ConfigError> {
        match address.rsplit_once(':') {
            Some((host, port)) => {
                self.port = port
                    .parse()
                    .map_err(|_| ConfigError::Invalid(format!("invalid broker port: {}", address)))?;
                self.host = host.to_string();
            }
            None => self.host = address.to_string(),
        }
        Ok(())
    }
}

/// Exponential backoff configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackoffConfig {
    /// Initial delay
    #[serde(with = "duration_millis")]
    pub initial: Duration,

    /// Maximum delay
    #[serde(with = "duration_millis")]
    pub max: Duration,

    /// Multiplier for each retry
    pub multiplier: f64,

    /// Jitter factor (0.0 to 1.0). 1.0 is full jitter: each delay is drawn
    /// uniformly from zero up to the current ceiling.
    pub jitter: f64,
}

impl Default for BackoffConfig {
    fn default() -> Self {
        Self {
            initial: Duration::from_secs(1),
            max: Duration::from_secs(60),
            multiplier: 2.0,
            jitter: 1.0,
        }
    }
}
