//! Connection kernel: drives the rumqttc event loop.
//!
//! The kernel is the only owner of the [`EventLoop`]. It polls it until the
//! cancellation token fires, publishes [`ConnectionState`] changes on a watch
//! channel and applies exponential backoff between reconnect attempts.

use std::time::Duration;

use rumqttc::{AsyncClient, ConnectReturnCode, ConnectionError, Event, EventLoop, Packet};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use super::{backoff::Backoff, error::TransferError, state::ConnectionState};

/// Time allowed for the DISCONNECT packet to leave after cancellation.
const DISCONNECT_FLUSH: Duration = Duration::from_secs(1);

pub struct ConnectionKernel {
    client: AsyncClient,
    event_loop: EventLoop,
    backoff: Backoff,
    cancel: CancellationToken,
    state_tx: watch::Sender<ConnectionState>,
    state_rx: watch::Receiver<ConnectionState>,
}

impl ConnectionKernel {
    pub fn new(
        client: AsyncClient,
        event_loop: EventLoop,
        cancel: CancellationToken,
        backoff: Backoff,
    ) -> Self {
        let (state_tx, state_rx) = watch::channel(ConnectionState::Connecting);
        Self {
            client,
            event_loop,
            backoff,
            cancel,
            state_tx,
            state_rx,
        }
    }

    pub fn subscribe_state(&self) -> watch::Receiver<ConnectionState> {
        self.state_rx.clone()
    }

    fn update_state(&self, state: ConnectionState) {
        let changed = self.state_tx.send_if_modified(|current| {
            if *current == state {
                return false;
            }
            *current = state.clone();
            true
        });

        if changed {
            info!(state = %state, "Broker connection state changed");
        }
    }

    /// Runs until cancelled, a fatal error occurs or the backoff policy gives up.
    pub async fn run(mut self) -> Result<(), TransferError> {
        self.update_state(ConnectionState::Connecting);
        self.backoff.reset();

        info!("Starting broker connection event loop");
        loop {
            tokio::select! {
                _ = self.cancel.cancelled() => {
                    info!("Shutdown signal received, disconnecting from broker");
                    self.disconnect().await;
                    self.update_state(ConnectionState::Disconnected("shutdown".into()));
                    return Ok(());
                }

                event_result = self.event_loop.poll() => {
                    match event_result {
                        Ok(event) => self.handle_event(event),
                        Err(e) => {
                            if classify_connection_error(&e) == Disposition::Fatal {
                                error!(error = %e, "Fatal broker connection error");
                                self.update_state(ConnectionState::Disconnected(e.to_string()));
                                return Err(TransferError::from(e));
                            }

                            let sleep_duration = match self.backoff.next_sleep() {
                                Ok(duration) => duration,
                                Err(exhausted) => {
                                    error!("Broker unreachable, {exhausted}");
                                    self.update_state(ConnectionState::Disconnected(exhausted.to_string()));
                                    return Err(exhausted.into());
                                }
                            };

                            warn!(
                                "Reconnecting in {:.2} seconds due to error: {}",
                                sleep_duration.as_secs_f64(),
                                e
                            );
                            self.update_state(ConnectionState::Reconnecting(sleep_duration.as_secs_f64()));

                            tokio::select! {
                                _ = self.cancel.cancelled() => {}
                                _ = tokio::time::sleep(sleep_duration) => {
                                    self.update_state(ConnectionState::Connecting);
                                }
                            }
                        }
                    }
                }
            }
        }
    }

    fn handle_event(&mut self, event: Event) {
        match event {
            Event::Incoming(Packet::ConnAck(conn_ack)) => {
                if conn_ack.code == ConnectReturnCode::Success {
                    info!("Connection established successfully");
                    self.update_state(ConnectionState::Connected);
                    self.backoff.reset();
                } else {
                    warn!(code = ?conn_ack.code, "Broker refused connection");
                }
            }
            Event::Incoming(Packet::Disconnect) => {
                warn!("Disconnected by broker");
                self.update_state(ConnectionState::Disconnected(
                    "Disconnected by broker".into(),
                ));
            }
            Event::Incoming(Packet::PingResp | Packet::PingReq) => {}
            Event::Incoming(packet) => trace!("Incoming packet: {:?}", packet),
            Event::Outgoing(outgoing) => trace!("Outgoing packet: {:?}", outgoing),
        }
    }

    async fn disconnect(&mut self) {
        if let Err(e) = self.client.disconnect().await {
            warn!("Error sending disconnect packet: {:?}", e);
            return;
        }

        // DISCONNECT only leaves the socket while the event loop is polled.
        let flushed = tokio::time::timeout(DISCONNECT_FLUSH, async {
            loop {
                match self.event_loop.poll().await {
                    Ok(Event::Outgoing(rumqttc::Outgoing::Disconnect)) => break,
                    Ok(_) => continue,
                    Err(_) => break,
                }
            }
        })
        .await;

        if flushed.is_err() {
            debug!("Timed out flushing DISCONNECT");
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Disposition {
    Fatal,
    Reconnect,
}

/// Only local misconfiguration is fatal. A poller outlives broker restarts,
/// so protocol and network failures are retried.
fn classify_connection_error(err: &ConnectionError) -> Disposition {
    use Disposition::*;

    match err {
        ConnectionError::RequestsDone => Fatal,

        ConnectionError::ConnectionRefused(code) => match code {
            ConnectReturnCode::BadUserNamePassword | ConnectReturnCode::NotAuthorized => Fatal,
            _ => Reconnect,
        },

        ConnectionError::Io(e) => match e.kind() {
            std::io::ErrorKind::AddrInUse
            | std::io::ErrorKind::PermissionDenied
            | std::io::ErrorKind::InvalidInput => Fatal,
            _ => Reconnect,
        },

        _ => Reconnect,
    }
}
