//! Broker readiness.
//!
//! The publisher holds events back until the broker connection is up. The
//! connection kernel reports its state on a watch channel; the listener here
//! folds it into a plain ready / not ready signal.

use std::{fmt, time::Duration};

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ReadinessState {
    Ready,
    NotReady(String),
    /// No report from the broker connection yet.
    Unknown,
}

impl ReadinessState {
    pub fn is_ready(&self) -> bool {
        matches!(self, ReadinessState::Ready)
    }

    pub fn reason(&self) -> &str {
        match self {
            ReadinessState::NotReady(reason) => reason,
            _ => "",
        }
    }
}

impl fmt::Display for ReadinessState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ReadinessState::Ready => write!(f, "Ready"),
            ReadinessState::NotReady(reason) => write!(f, "NotReady: {}", reason),
            ReadinessState::Unknown => write!(f, "Unknown"),
        }
    }
}

#[cfg(feature = "wlcbee-mqtt")]
pub mod listener {
    use wlcbee_mqtt::ConnectionState;

    use super::*;

    /// Mirrors connection state changes into `state_tx` until either side
    /// goes away.
    pub async fn listen(
        mut connection_rx: watch::Receiver<ConnectionState>,
        state_tx: watch::Sender<ReadinessState>,
    ) {
        let initial = adapt(&connection_rx.borrow_and_update());
        debug!("Initial readiness: {}", initial);
        state_tx.send_replace(initial);

        while connection_rx.changed().await.is_ok() {
            let connection = connection_rx.borrow_and_update().clone();
            let readiness = adapt(&connection);
            debug!("Broker {} -> readiness {}", connection, readiness);

            if state_tx.send(readiness).is_err() {
                debug!("No readiness subscribers left");
                break;
            }
        }

        debug!("Connection state channel closed, readiness listener stopped");
    }

    pub(super) fn adapt(state: &ConnectionState) -> ReadinessState {
        match state {
            ConnectionState::Connected => ReadinessState::Ready,
            ConnectionState::Connecting => ReadinessState::NotReady("connecting".to_string()),
            ConnectionState::Disconnected(reason) => {
                ReadinessState::NotReady(format!("disconnected: {}", reason))
            }
            ConnectionState::Reconnecting(secs) => {
                ReadinessState::NotReady(format!("reconnecting in {:.1} sec", secs))
            }
        }
    }
}

/// Shared readiness tracker.
#[derive(Debug, Clone)]
pub struct Readiness {
    state_tx: watch::Sender<ReadinessState>,
    state_rx: watch::Receiver<ReadinessState>,
}

impl Readiness {
    pub fn new() -> Self {
        let (state_tx, state_rx) = watch::channel(ReadinessState::Unknown);
        Self { state_tx, state_rx }
    }

    pub fn subscribe(&self) -> watch::Receiver<ReadinessState> {
        self.state_rx.clone()
    }

    pub fn current_state(&self) -> ReadinessState {
        self.state_rx.borrow().clone()
    }

    /// Follows the broker connection from a background task.
    #[cfg(feature = "wlcbee-mqtt")]
    pub fn start_listening(
        &self,
        connection_rx: watch::Receiver<wlcbee_mqtt::ConnectionState>,
    ) -> tokio::task::JoinHandle<()> {
        let state_tx = self.state_tx.clone();
        tokio::spawn(listener::listen(connection_rx, state_tx))
    }

    pub fn set_state(&self, state: ReadinessState) {
        let old = self.state_tx.send_replace(state.clone());
        if old != state {
            debug!("Readiness changed: {} -> {}", old, state);
        }
    }
}

impl Default for Readiness {
    fn default() -> Self {
        Self::new()
    }
}

/// Blocks until `rx` reports ready. Returns `false` when cancelled first or
/// when the readiness source is gone.
pub async fn wait_ready(
    rx: &mut watch::Receiver<ReadinessState>,
    cancel: &CancellationToken,
    reminder: Duration,
) -> bool {
    if rx.borrow_and_update().is_ready() {
        return true;
    }
    warn!("Waiting for broker readiness, current: {}", *rx.borrow());

    loop {
        tokio::select! {
            _ = cancel.cancelled() => return false,
            changed = rx.changed() => {
                if changed.is_err() {
                    warn!("Readiness source closed before becoming ready");
                    return false;
                }
                let state = rx.borrow_and_update().clone();
                if state.is_ready() {
                    info!("Broker ready");
                    return true;
                }
                debug!("Still not ready: {}", state);
            }
            _ = tokio::time::sleep(reminder) => {
                warn!("Still waiting for broker readiness, current: {}", *rx.borrow());
            }
        }
    }
}
