//! Error handling for MQTT transport operations.
//!
//! `TransferError` is the single error type returned by this crate. It covers
//! configuration problems caught at startup, connection failures surfaced by
//! the connection kernel, and publish failures after the bounded retry policy
//! has been exhausted.

use thiserror::Error;

/// The unified error type for MQTT transport operations.
#[derive(Debug, Error)]
pub enum TransferError {
    /// Endpoint metadata is invalid (QoS out of range, empty topic).
    #[error("Invalid metadata: {0}")]
    InvalidMetadata(String),

    /// MQTT client initialization failed.
    #[error("Client setup error: {0}")]
    ClientSetup(String),

    /// Configuration validation failed.
    ///
    /// Raised by `MqttManager::from_config` before anything touches the network.
    #[error("Configuration error: {0}")]
    ConfigError(#[from] validator::ValidationErrors),

    /// MQTT client failed to queue a packet (request channel closed).
    #[error("Client transfer error: {0}")]
    ClientTransfer(#[from] rumqttc::ClientError),

    /// MQTT connection to broker failed or was lost.
    ///
    /// Boxed to keep the enum small.
    #[error("Client connection error: {0}")]
    ClientConnection(#[from] Box<rumqttc::ConnectionError>),

    /// Reconnection policy exhausted (max reconnection attempts exceeded).
    #[error("Retry policy error: {0}")]
    RetriesPolicy(#[from] super::backoff::AttemptsExhausted),

    /// A publish kept failing after every configured retry.
    #[error("Publish to '{topic}' failed after {attempts} attempts: {source}")]
    RetriesExhausted {
        topic: String,
        attempts: u32,
        #[source]
        source: rumqttc::ClientError,
    },
}

impl From<rumqttc::ConnectionError> for TransferError {
    fn from(err: rumqttc::ConnectionError) -> Self {
        TransferError::ClientConnection(Box::new(err))
    }
}
