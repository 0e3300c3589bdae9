//! Single consumer of the event queue.
//!
//! Every event is shaped into a flat JSON document and handed to the broker
//! keyed by device id. A failed event is logged and dropped; the next one is
//! tried regardless.

use std::{sync::Arc, time::Duration};

use async_trait::async_trait;
use serde_json::{Map, Value};
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use super::{
    error::PublishError,
    event::{OutboundEvent, StateEvent, StatsEvent},
    queue::EventReceiver,
    readiness::{wait_ready, ReadinessState},
};
use crate::config::poller::PublisherConfig;

const READINESS_REMINDER: Duration = Duration::from_secs(30);

/// Destination of shaped documents.
#[async_trait]
pub trait BrokerSink: Send + Sync {
    async fn send(&self, topic: &str, key: &str, payload: Vec<u8>) -> Result<(), PublishError>;
}

#[cfg(feature = "wlcbee-mqtt")]
#[async_trait]
impl BrokerSink for wlcbee_mqtt::KeyedPublisher {
    async fn send(&self, topic: &str, key: &str, payload: Vec<u8>) -> Result<(), PublishError> {
        wlcbee_mqtt::KeyedPublisher::send(self, topic, key, payload)
            .await
            .map_err(|e| PublishError::BrokerSend {
                topic: topic.to_string(),
                key: key.to_string(),
                reason: e.to_string(),
            })
    }
}

/// Builds the published document. Enrichment goes in last and overrides any
/// field of the same name.
pub fn shape(event: &OutboundEvent) -> Map<String, Value> {
    let mut doc = match event {
        OutboundEvent::State(state) => shape_state(state),
        OutboundEvent::Stats(stats) => shape_stats(stats),
    };
    doc.insert("type".into(), event.kind().into());

    for (key, value) in event.enrichment().iter() {
        doc.insert(key.clone(), Value::String(value.clone()));
    }
    doc
}

fn shape_state(event: &StateEvent) -> Map<String, Value> {
    let mut doc = Map::new();
    doc.insert("wireless_station".into(), event.device_id.clone().into());
    if let Some(ip) = &event.device_ip {
        doc.insert("wireless_station_ip".into(), ip.clone().into());
    }
    if let Some(name) = &event.device_name {
        doc.insert("wireless_station_name".into(), name.clone().into());
    }
    doc.insert("device_client_count".into(), event.client_count.into());
    doc.insert("timestamp".into(), event.timestamp.into());
    doc.insert("time_switched".into(), event.time_switched.into());
    doc.insert("status".into(), event.status.as_str().into());
    doc.insert("sensor_ip".into(), event.sensor_ip.clone().into());
    doc
}

fn shape_stats(event: &StatsEvent) -> Map<String, Value> {
    let mut doc = Map::new();
    doc.insert("bytes".into(), event.bytes.into());
    doc.insert("pkts".into(), event.packets.into());
    doc.insert("direction".into(), event.direction.as_str().into());
    doc.insert("timestamp".into(), event.timestamp.into());
    doc.insert("time_switched".into(), event.time_switched.into());
    doc.insert("sensor_ip".into(), event.sensor_ip.clone().into());
    doc.insert("wireless_station".into(), event.device_id.clone().into());
    if let Some(ip) = &event.device_ip {
        doc.insert("wireless_station_ip".into(), ip.clone().into());
    }
    doc.insert("device_category".into(), "stations".into());
    doc
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PublisherStats {
    pub published: u64,
    pub dropped: u64,
}

pub struct Publisher {
    sink: Arc<dyn BrokerSink>,
    topics: PublisherConfig,
}

impl Publisher {
    pub fn new(sink: Arc<dyn BrokerSink>, topics: PublisherConfig) -> Self {
        Self { sink, topics }
    }

    fn topic_for(&self, event: &OutboundEvent) -> &str {
        match event {
            OutboundEvent::State(_) => &self.topics.state_topic,
            OutboundEvent::Stats(_) => &self.topics.stats_topic,
        }
    }

    async fn publish(&self, event: &OutboundEvent) -> Result<(), PublishError> {
        let key = event.partition_key();
        let payload = serde_json::to_vec(&shape(event)).map_err(|source| {
            PublishError::Serialization {
                key: key.to_string(),
                source,
            }
        })?;
        self.sink.send(self.topic_for(event), key, payload).await
    }

    /// Drains `events` until every producer is gone, or until `cancel` fires
    /// and what was already queued has been handed over.
    pub async fn run(
        self,
        mut events: EventReceiver,
        mut readiness: watch::Receiver<ReadinessState>,
        cancel: CancellationToken,
    ) -> PublisherStats {
        let mut stats = PublisherStats::default();

        if !wait_ready(&mut readiness, &cancel, READINESS_REMINDER).await {
            warn!(
                queued = events.len(),
                "Publisher stopped before the broker became ready"
            );
            return stats;
        }
        info!(
            state_topic = %self.topics.state_topic,
            stats_topic = %self.topics.stats_topic,
            "Publisher started"
        );

        loop {
            let event = tokio::select! {
                biased;
                event = events.recv() => event,
                _ = cancel.cancelled() => {
                    events.close();
                    debug!(queued = events.len(), "Publisher cancelled, draining queue");
                    events.recv().await
                }
            };
            let Some(event) = event else { break };

            match self.publish(&event).await {
                Ok(()) => stats.published += 1,
                Err(e) => {
                    stats.dropped += 1;
                    warn!(kind = event.kind(), "Dropping event: {e}");
                }
            }
        }

        info!(
            published = stats.published,
            dropped = stats.dropped,
            "Publisher stopped"
        );
        stats
    }
}
