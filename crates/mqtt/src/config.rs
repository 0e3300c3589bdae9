//! Broker connection configuration.
//!
//! Deserialized from the `[transport]` table of the application config. Every
//! field has a default, so an empty table connects to `localhost:1883`.
//!
//! ```toml
//! [transport]
//! host = "broker.local"
//! port = 1883
//! base_topic = "wlcbee"
//! qos = 1
//! send_retries = 60
//! send_retry_backoff_ms = 1000
//! ```

use serde::{Deserialize, Serialize};
use uuid::Uuid;
use validator::{Validate, ValidationError};

/// Main MQTT connection configuration.
#[derive(Debug, Clone, Serialize, Deserialize, Validate)]
#[serde(default)]
pub struct Config {
    /// Prefix applied to every published topic.
    ///
    /// Leading and trailing slashes are stripped. An empty value publishes
    /// directly under the event topic.
    #[validate(
        length(max = 255, message = "Base topic must not exceed 255 characters"),
        custom(
            function = "validate_no_wildcards",
            message = "Base topic must not contain '+' or '#'"
        )
    )]
    pub base_topic: String,

    /// Broker hostname or IP address. Resolved at connect time.
    #[validate(length(
        min = 1,
        max = 255,
        message = "Host must be between 1 and 255 characters"
    ))]
    pub host: String,

    #[validate(range(min = 1, max = 65535, message = "Port must be between 1 and 65535"))]
    pub port: u16,

    /// Whether to request a clean session from the broker.
    pub clean_session: bool,

    /// Maximum number of unacknowledged QoS 1/2 publishes.
    #[validate(range(
        min = 1,
        max = 1000,
        message = "Max inflight must be between 1 and 1000"
    ))]
    pub max_inflight: u16,

    /// Keep-alive interval in seconds.
    #[validate(range(
        min = 5,
        max = 3600,
        message = "Keep alive must be between 5 and 3600 seconds"
    ))]
    pub keep_alive: u64,

    /// Client identifier. A random UUID is generated when omitted.
    #[validate(length(
        min = 1,
        max = 36,
        message = "Client ID must be between 1 and 36 characters"
    ))]
    pub client_id: String,

    /// Largest packet accepted or sent, in bytes.
    #[validate(range(
        min = 64,
        max = 268_435_455,
        message = "Max packet size must be between 64 bytes and 256 MiB"
    ))]
    pub max_packet_size: Option<u32>,

    /// Capacity of the request channel between client handles and the event loop.
    #[validate(range(
        min = 1,
        max = 65535,
        message = "Request channel capacity must be between 1 and 65535"
    ))]
    pub request_channel_capacity: Option<u16>,

    pub username: Option<String>,

    pub password: Option<String>,

    /// Delivery guarantee for published events: 0, 1 or 2.
    #[validate(range(max = 2, message = "QoS must be 0, 1 or 2"))]
    pub qos: u8,

    /// Initial reconnect delay in seconds.
    #[validate(range(
        min = 1,
        max = 60,
        message = "Reconnect delay must be between 1 and 60 seconds"
    ))]
    pub reconnect_delay: u64,

    /// Upper bound of the reconnect delay in seconds.
    #[validate(range(
        min = 1,
        max = 3600,
        message = "Reconnect max delay must be between 1 and 3600 seconds"
    ))]
    pub reconnect_max_delay: u64,

    /// Growth factor applied to the reconnect delay after each failure.
    #[validate(range(
        min = 1.0,
        max = 30.0,
        message = "Reconnect multiplier must be between 1.0 and 30.0"
    ))]
    pub reconnect_multiplier: f64,

    /// 0 keeps reconnecting forever.
    pub max_reconnect_attempts: u32,

    /// How many times a failed publish is retried before it is reported.
    #[validate(range(max = 1000, message = "Send retries must not exceed 1000"))]
    pub send_retries: u32,

    /// Pause between publish retries in milliseconds.
    #[validate(range(
        min = 1,
        max = 60_000,
        message = "Send retry backoff must be between 1 and 60000 ms"
    ))]
    pub send_retry_backoff_ms: u64,
}

fn validate_no_wildcards(topic: &str) -> Result<(), ValidationError> {
    if topic.contains(['+', '#']) {
        return Err(ValidationError::new("wildcard_in_topic"));
    }
    Ok(())
}

impl Default for Config {
    fn default() -> Self {
        Config {
            base_topic: "wlcbee".to_string(),
            host: "localhost".to_string(),
            port: 1883,
            clean_session: true,
            max_inflight: 100,
            keep_alive: 30,
            client_id: Uuid::new_v4().to_string(),
            max_packet_size: Some(1_048_576),
            request_channel_capacity: Some(1024),
            username: None,
            password: None,
            qos: 1,
            reconnect_delay: 1,
            reconnect_max_delay: 60,
            reconnect_multiplier: 1.1,
            max_reconnect_attempts: 0,
            send_retries: 60,
            send_retry_backoff_ms: 1000,
        }
    }
}
