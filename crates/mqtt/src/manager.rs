//! Entry point: validates the config, spawns the connection kernel and hands
//! back an [`MqttInstance`].

use std::{sync::Arc, time::Duration};

use rumqttc::AsyncClient;
use tokio::{
    sync::{watch, Mutex},
    task::JoinHandle,
};
use tokio_util::sync::CancellationToken;
use tracing::{error, info, warn};
use validator::Validate;

use super::{
    backoff::Backoff,
    client::{qos_from_level, ClientBuilder},
    config::Config,
    connection::ConnectionKernel,
    error::TransferError,
    publisher::KeyedPublisher,
    state::ConnectionState,
};

pub struct MqttManager {
    config: Config,
}

impl MqttManager {
    /// # Errors
    /// `TransferError::ConfigError` when validation fails.
    pub fn from_config(config: Config) -> Result<Self, TransferError> {
        config.validate()?;
        Ok(Self { config })
    }

    /// Builds the client and spawns the connection kernel.
    ///
    /// Returns immediately; the connection is established in the background
    /// and reported through [`MqttInstance::state_receiver`].
    pub async fn build_and_start(self) -> Result<MqttInstance, TransferError> {
        info!(
            host = %self.config.host,
            port = self.config.port,
            base_topic = %self.config.base_topic,
            "Building MQTT transport"
        );

        let qos = qos_from_level(self.config.qos)?;
        let (client, event_loop) = ClientBuilder::from_config(&self.config)?.build();

        let cancel_token = CancellationToken::new();
        let kernel = ConnectionKernel::new(
            client.clone(),
            event_loop,
            cancel_token.clone(),
            Backoff::from_config(&self.config),
        );
        let state_rx = kernel.subscribe_state();

        let kernel_handle = tokio::spawn(async move {
            if let Err(e) = kernel.run().await {
                error!("MQTT connection kernel exited with error: {e}");
            }
        });

        let publisher = KeyedPublisher::new(
            client.clone(),
            &self.config.base_topic,
            qos,
            self.config.send_retries,
            Duration::from_millis(self.config.send_retry_backoff_ms),
        );

        Ok(MqttInstance {
            client,
            publisher,
            state_rx,
            cancel_token,
            kernel_handle: Arc::new(Mutex::new(Some(kernel_handle))),
        })
    }
}

/// Handle to a running transport. Cheap to clone.
#[derive(Clone)]
pub struct MqttInstance {
    client: AsyncClient,
    publisher: KeyedPublisher,
    state_rx: watch::Receiver<ConnectionState>,
    cancel_token: CancellationToken,
    kernel_handle: Arc<Mutex<Option<JoinHandle<()>>>>,
}

impl MqttInstance {
    pub fn client(&self) -> &AsyncClient {
        &self.client
    }

    pub fn publisher(&self) -> KeyedPublisher {
        self.publisher.clone()
    }

    pub fn state_receiver(&self) -> watch::Receiver<ConnectionState> {
        self.state_rx.clone()
    }

    pub fn cancel_token(&self) -> CancellationToken {
        self.cancel_token.clone()
    }

    /// Cancels the kernel and waits up to `grace` for it to disconnect.
    pub async fn shutdown(&self, grace: Duration) {
        self.cancel_token.cancel();

        let Some(handle) = self.kernel_handle.lock().await.take() else {
            return;
        };

        match tokio::time::timeout(grace, handle).await {
            Ok(Ok(())) => info!("MQTT transport stopped"),
            Ok(Err(e)) => warn!("MQTT connection kernel task failed: {e}"),
            Err(_) => warn!("MQTT connection kernel did not stop within {:?}", grace),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_from_config_rejects_invalid() {
        let config = Config {
            port: 0,
            ..Default::default()
        };
        assert!(matches!(
            MqttManager::from_config(config),
            Err(TransferError::ConfigError(_))
        ));
    }

    #[tokio::test]
    async fn test_build_and_shutdown() {
        let config = Config {
            host: "127.0.0.1".into(),
            port: 1,
            ..Default::default()
        };
        let instance = MqttManager::from_config(config)
            .unwrap()
            .build_and_start()
            .await
            .unwrap();

        assert!(!instance.state_receiver().borrow().is_connected());

        instance.shutdown(Duration::from_secs(5)).await;
        assert!(instance.cancel_token().is_cancelled());

        // Second call is a no-op.
        instance.shutdown(Duration::from_millis(10)).await;
    }
}
