//! Error types for the polling and publishing pipeline.
//!
//! None of these terminate the process once it is running. `CoordinatorError`
//! is fatal only while bootstrapping the initial target set.

use thiserror::Error;

use crate::config::ConfigError;

/// A failed walk against one target.
#[derive(Debug, Error)]
pub enum PollError {
    /// Timeout, connection failure or address resolution failure.
    #[error("target {target} unreachable: {reason}")]
    TargetUnreachable { target: String, reason: String },

    /// The agent answered with something that could not be used.
    #[error("malformed response from {target}: {reason}")]
    MalformedResponse { target: String, reason: String },
}

impl PollError {
    pub fn unreachable(target: impl Into<String>, reason: impl ToString) -> Self {
        PollError::TargetUnreachable {
            target: target.into(),
            reason: reason.to_string(),
        }
    }

    pub fn malformed(target: impl Into<String>, reason: impl ToString) -> Self {
        PollError::MalformedResponse {
            target: target.into(),
            reason: reason.to_string(),
        }
    }
}

/// A single event that could not be delivered. The event is dropped.
#[derive(Debug, Error)]
pub enum PublishError {
    #[error("failed to serialize event for {key}: {source}")]
    Serialization {
        key: String,
        #[source]
        source: serde_json::Error,
    },

    #[error("broker rejected event on '{topic}' for {key}: {reason}")]
    BrokerSend {
        topic: String,
        key: String,
        reason: String,
    },
}

/// The target source could not produce a target set.
#[derive(Debug, Error)]
pub enum CoordinatorError {
    #[error("target source unavailable: {0}")]
    Unavailable(String),

    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Pool(#[from] PoolError),
}

#[derive(Debug, Error, PartialEq, Eq)]
pub enum PoolError {
    /// The pool actor has shut down and no longer accepts commands.
    #[error("worker pool is closed")]
    Closed,
}

/// Every receiver of the event queue is gone.
#[derive(Debug, Error, Clone, Copy, PartialEq, Eq)]
#[error("event queue closed")]
pub struct QueueClosed;
