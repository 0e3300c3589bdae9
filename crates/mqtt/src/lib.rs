//! MQTT transport for wlcbee.
//!
//! Wraps rumqttc with a reconnecting connection kernel, an observable
//! connection state and a keyed publisher with bounded retries.
//!
//! ```ignore
//! let instance = MqttManager::from_config(config)?.build_and_start().await?;
//! instance
//!     .publisher()
//!     .send("wireless/state", "aa:bb:cc:dd:ee:ff", payload)
//!     .await?;
//! instance.shutdown(Duration::from_secs(2)).await;
//! ```

pub mod backoff;
pub mod client;
pub mod config;
pub mod connection;
pub mod error;
pub mod manager;
pub mod publisher;
pub mod state;

pub use backoff::{AttemptLimit, AttemptsExhausted, Backoff};
pub use config::Config;
pub use error::TransferError;
pub use manager::{MqttInstance, MqttManager};
pub use publisher::KeyedPublisher;
pub use rumqttc::QoS;
pub use state::ConnectionState;
