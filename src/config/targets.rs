//! Poll targets: one wireless LAN controller each.

use std::{collections::BTreeMap, fmt, time::Duration};

use serde::{Deserialize, Serialize};
use validator::{Validate, ValidationError};

/// Stable identity of a target: `address + "_" + community`.
///
/// Two targets with the same identity are the same worker, whatever their
/// other fields say.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TargetId(String);

impl TargetId {
    pub fn new(address: &str, community: &str) -> Self {
        TargetId(format!("{address}_{community}"))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for TargetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// A controller to poll, as listed under `[[targets]]`.
///
/// ```toml
/// [[targets]]
/// address = "10.0.0.1"
/// community = "public"
/// interval = 60
/// enrichment = { sensor_name = "wlc-hq", deployment = "campus" }
/// ```
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize, Validate)]
pub struct Target {
    /// Hostname or IP address of the controller.
    #[validate(length(
        min = 1,
        max = 255,
        message = "Target address must be between 1 and 255 characters"
    ))]
    pub address: String,

    #[serde(default = "default_port")]
    #[validate(range(min = 1, message = "Target port must be between 1 and 65535"))]
    pub port: u16,

    /// SNMP community. Part of the target identity.
    #[validate(length(min = 1, message = "Target community must not be empty"))]
    pub community: String,

    /// Seconds between poll cycles.
    #[serde(default = "default_interval")]
    #[validate(range(
        min = 1,
        max = 86400,
        message = "Target interval must be between 1 and 86400 seconds"
    ))]
    pub interval: u64,

    /// Attributes merged into every event emitted for this target.
    #[serde(default)]
    #[validate(custom(function = "validate_enrichment"))]
    pub enrichment: BTreeMap<String, String>,
}

fn default_port() -> u16 {
    161
}

fn default_interval() -> u64 {
    60
}

fn validate_enrichment(enrichment: &BTreeMap<String, String>) -> Result<(), ValidationError> {
    if let Some(key) = enrichment.keys().find(|key| key.trim().is_empty()) {
        let mut err = ValidationError::new("empty_enrichment_key");
        err.message = Some(format!("Enrichment key '{}' is blank", key).into());
        return Err(err);
    }
    Ok(())
}

impl Target {
    pub fn identity(&self) -> TargetId {
        TargetId::new(&self.address, &self.community)
    }

    /// `address:port`, used in logs instead of the identity, which carries
    /// the community.
    pub fn endpoint(&self) -> String {
        format!("{}:{}", self.address, self.port)
    }

    pub fn poll_interval(&self) -> Duration {
        Duration::from_secs(self.interval)
    }
}

impl Default for Target {
    fn default() -> Self {
        Target {
            address: String::new(),
            port: default_port(),
            community: String::new(),
            interval: default_interval(),
            enrichment: BTreeMap::new(),
        }
    }
}
