//! Keyed publishing with bounded retries.
//!
//! A keyed message lands on `{base_topic}/{topic}/{key}`. Messages sharing a
//! key therefore share a topic, and the broker preserves their order.

use std::time::Duration;

use rumqttc::{AsyncClient, QoS};
use tracing::{debug, warn};

use super::error::TransferError;

#[derive(Clone)]
pub struct KeyedPublisher {
    client: AsyncClient,
    base_topic: String,
    qos: QoS,
    retries: u32,
    retry_backoff: Duration,
}

impl KeyedPublisher {
    pub fn new(
        client: AsyncClient,
        base_topic: &str,
        qos: QoS,
        retries: u32,
        retry_backoff: Duration,
    ) -> Self {
        Self {
            client,
            base_topic: base_topic.trim_matches('/').to_string(),
            qos,
            retries,
            retry_backoff,
        }
    }

    /// Full topic for a logical topic and partition key.
    pub fn topic_for(&self, topic: &str, key: &str) -> String {
        keyed_topic(&self.base_topic, topic, key)
    }

    /// Queues `payload` for delivery, retrying a failed hand-off to the event
    /// loop up to the configured number of times.
    pub async fn send(&self, topic: &str, key: &str, payload: Vec<u8>) -> Result<(), TransferError> {
        let full_topic = self.topic_for(topic, key);
        let mut attempt: u32 = 0;

        loop {
            match self
                .client
                .publish(full_topic.as_str(), self.qos, false, payload.clone())
                .await
            {
                Ok(()) => {
                    debug!(topic = %full_topic, bytes = payload.len(), "Message queued");
                    return Ok(());
                }
                Err(e) if attempt < self.retries => {
                    attempt += 1;
                    warn!(
                        topic = %full_topic,
                        attempt,
                        "Publish failed, retrying in {:?}: {}",
                        self.retry_backoff,
                        e
                    );
                    tokio::time::sleep(self.retry_backoff).await;
                }
                Err(e) => {
                    return Err(TransferError::RetriesExhausted {
                        topic: full_topic,
                        attempts: attempt + 1,
                        source: e,
                    });
                }
            }
        }
    }
}

/// Joins the non-empty segments with `/`. The key is a single segment, so
/// separators and wildcards inside it are replaced.
pub fn keyed_topic(base_topic: &str, topic: &str, key: &str) -> String {
    let key: String = key
        .chars()
        .map(|c| match c {
            '/' | '+' | '#' => '_',
            other => other,
        })
        .collect();

    [base_topic.trim_matches('/'), topic.trim_matches('/'), key.as_str()]
        .into_iter()
        .filter(|segment| !segment.is_empty())
        .collect::<Vec<_>>()
        .join("/")
}
