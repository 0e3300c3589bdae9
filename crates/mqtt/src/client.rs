//! Translates [`Config`] into a rumqttc client and event loop.

use std::time::Duration;

use rumqttc::{AsyncClient, EventLoop, MqttOptions, QoS};

use super::{config::Config, error::TransferError};

const DEFAULT_REQUEST_CAPACITY: usize = 1024;

/// Builder holding the resolved MQTT options until the client is created.
pub struct ClientBuilder {
    opts: MqttOptions,
    cap: usize,
}

impl ClientBuilder {
    pub fn from_config(config: &Config) -> Result<Self, TransferError> {
        if config.host.trim().is_empty() {
            return Err(TransferError::ClientSetup("broker host is empty".into()));
        }

        let client_id = if config.client_id.is_empty() {
            uuid::Uuid::new_v4().to_string()
        } else {
            config.client_id.clone()
        };

        let mut opts = MqttOptions::new(client_id, config.host.clone(), config.port);
        opts.set_keep_alive(Duration::from_secs(config.keep_alive));
        opts.set_clean_session(config.clean_session);
        opts.set_inflight(config.max_inflight);

        if let Some(max_packet_size) = config.max_packet_size {
            opts.set_max_packet_size(max_packet_size as usize, max_packet_size as usize);
        }

        match (&config.username, &config.password) {
            (Some(username), password) => {
                opts.set_credentials(username.clone(), password.clone().unwrap_or_default());
            }
            (None, Some(_)) => {
                return Err(TransferError::ClientSetup(
                    "password configured without username".into(),
                ));
            }
            (None, None) => {}
        }

        let cap = config
            .request_channel_capacity
            .map(usize::from)
            .unwrap_or(DEFAULT_REQUEST_CAPACITY);

        Ok(Self { opts, cap })
    }

    pub fn build(self) -> (AsyncClient, EventLoop) {
        AsyncClient::new(self.opts, self.cap)
    }
}

/// Maps the numeric configuration value onto rumqttc's QoS.
pub fn qos_from_level(level: u8) -> Result<QoS, TransferError> {
    match level {
        0 => Ok(QoS::AtMostOnce),
        1 => Ok(QoS::AtLeastOnce),
        2 => Ok(QoS::ExactlyOnce),
        other => Err(TransferError::InvalidMetadata(format!(
            "QoS must be 0-2, got {other}"
        ))),
    }
}
