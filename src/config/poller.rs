//! Polling and publishing settings shared by every worker.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use validator::{Validate, ValidationError};

use crate::core::walker::{snmp::WalkSettings, Oid};

/// `[poller]` section.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct PollerConfig {
    /// Per-request SNMP timeout in milliseconds.
    #[validate(range(
        min = 100,
        max = 60000,
        message = "Timeout must be between 100 and 60000 ms"
    ))]
    pub timeout_ms: u64,

    /// Retransmissions after the first request times out.
    #[validate(range(max = 10, message = "Retries must not exceed 10"))]
    pub retries: u32,

    /// GetBulk max-repetitions.
    #[validate(range(
        min = 1,
        max = 100,
        message = "Max repetitions must be between 1 and 100"
    ))]
    pub max_repetitions: u32,

    /// How far back, in seconds, the first statistics sample of a device is
    /// dated.
    #[validate(range(max = 86400, message = "Stats window must not exceed 86400 seconds"))]
    pub stats_window: u64,

    /// Seconds allowed for workers and the publisher to stop on shutdown.
    #[validate(range(
        min = 1,
        max = 300,
        message = "Shutdown grace must be between 1 and 300 seconds"
    ))]
    pub shutdown_grace: u64,

    #[validate(nested)]
    pub columns: DeviceColumns,
}

impl Default for PollerConfig {
    fn default() -> Self {
        Self {
            timeout_ms: 3000,
            retries: 3,
            max_repetitions: 10,
            stats_window: 300,
            shutdown_grace: 10,
            columns: DeviceColumns::default(),
        }
    }
}

impl PollerConfig {
    pub fn walk_settings(&self) -> WalkSettings {
        WalkSettings {
            timeout: Duration::from_millis(self.timeout_ms),
            retries: self.retries,
            max_repetitions: self.max_repetitions,
        }
    }

    pub fn shutdown_grace(&self) -> Duration {
        Duration::from_secs(self.shutdown_grace)
    }
}

/// `[poller.columns]`: the table columns walked on every cycle.
///
/// Devices are discovered under `name`; every other column is matched by the
/// index suffix found there. An optional column set to `""` is not walked.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct DeviceColumns {
    #[validate(custom(function = "validate_oid"))]
    pub name: String,

    #[validate(custom(function = "validate_oid"))]
    pub mac: String,

    #[validate(custom(function = "validate_optional_oid"))]
    pub ip: Option<String>,

    #[validate(custom(function = "validate_optional_oid"))]
    pub client_count: Option<String>,

    #[validate(custom(function = "validate_optional_oid"))]
    pub sent_bytes: Option<String>,

    #[validate(custom(function = "validate_optional_oid"))]
    pub recv_bytes: Option<String>,

    #[validate(custom(function = "validate_optional_oid"))]
    pub sent_packets: Option<String>,

    #[validate(custom(function = "validate_optional_oid"))]
    pub recv_packets: Option<String>,
}

impl Default for DeviceColumns {
    fn default() -> Self {
        Self {
            name: "1.3.6.1.4.1.14179.2.2.1.1.3".into(),
            mac: "1.3.6.1.4.1.14179.2.2.1.1.1".into(),
            ip: Some("1.3.6.1.4.1.14179.2.2.1.1.19".into()),
            client_count: Some("1.3.6.1.4.1.14179.2.2.2.1.15".into()),
            recv_bytes: Some("1.3.6.1.4.1.9.9.513.1.2.2.1.12".into()),
            sent_bytes: Some("1.3.6.1.4.1.9.9.513.1.2.2.1.13".into()),
            recv_packets: Some("1.3.6.1.4.1.9.9.513.1.2.2.1.14".into()),
            sent_packets: Some("1.3.6.1.4.1.9.9.513.1.2.2.1.15".into()),
        }
    }
}

fn validate_oid(value: &str) -> Result<(), ValidationError> {
    match value.parse::<Oid>() {
        Ok(_) => Ok(()),
        Err(e) => {
            let mut err = ValidationError::new("invalid_oid");
            err.message = Some(e.to_string().into());
            Err(err)
        }
    }
}

fn validate_optional_oid(value: &str) -> Result<(), ValidationError> {
    if value.is_empty() {
        return Ok(());
    }
    validate_oid(value)
}

/// `[publisher]` section: logical topics, prefixed by the transport base topic.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct PublisherConfig {
    #[validate(length(min = 1, max = 255, message = "State topic must not be empty"))]
    pub state_topic: String,

    #[validate(length(min = 1, max = 255, message = "Stats topic must not be empty"))]
    pub stats_topic: String,
}

impl Default for PublisherConfig {
    fn default() -> Self {
        Self {
            state_topic: "wireless/state".into(),
            stats_topic: "wireless/stats".into(),
        }
    }
}
