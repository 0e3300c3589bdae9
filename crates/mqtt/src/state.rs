//! Observable broker connection state.
//!
//! The connection kernel owns a `watch::Sender<ConnectionState>` and every
//! interested party (readiness listener, publishers) holds a receiver.

use std::fmt;

/// Broker connection lifecycle.
///
/// `Connecting` -> `Connected` -> `Disconnected` -> `Reconnecting` -> `Connecting` ...
#[derive(Debug, Clone, PartialEq)]
pub enum ConnectionState {
    /// CONNECT sent, waiting for CONNACK.
    Connecting,

    /// CONNACK accepted. Publishes are delivered.
    Connected,

    /// Connection lost. Carries the human readable reason.
    Disconnected(String),

    /// Waiting the given number of seconds before the next attempt.
    Reconnecting(f64),
}

impl ConnectionState {
    /// Short static identifier, suitable for log fields.
    pub fn as_str(&self) -> &'static str {
        match self {
            ConnectionState::Connecting => "Connecting",
            ConnectionState::Connected => "Connected",
            ConnectionState::Disconnected(_) => "Disconnected",
            ConnectionState::Reconnecting(_) => "Reconnecting",
        }
    }

    /// Reason or delay attached to the state, if any.
    pub fn details(&self) -> Option<String> {
        match self {
            ConnectionState::Disconnected(reason) => Some(reason.clone()),
            ConnectionState::Reconnecting(secs) => Some(format!("in {secs:.1} seconds")),
            _ => None,
        }
    }

    pub fn is_connected(&self) -> bool {
        matches!(self, ConnectionState::Connected)
    }
}

impl fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self.details() {
            Some(details) => write!(f, "{} ({})", self.as_str(), details),
            None => f.write_str(self.as_str()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_state_display() {
        assert_eq!(ConnectionState::Connected.to_string(), "Connected");
        assert_eq!(
            ConnectionState::Disconnected("broker closed".into()).to_string(),
            "Disconnected (broker closed)"
        );
        assert_eq!(
            ConnectionState::Reconnecting(1.5).to_string(),
            "Reconnecting (in 1.5 seconds)"
        );
    }

    #[test]
    fn test_state_is_connected() {
        assert!(ConnectionState::Connected.is_connected());
        assert!(!ConnectionState::Connecting.is_connected());
        assert!(!ConnectionState::Reconnecting(1.0).is_connected());
    }
}
