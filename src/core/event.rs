//! Outbound events: produced by workers, consumed once by the publisher.

use std::{collections::BTreeMap, sync::Arc};

use super::cache::DeviceStatus;

/// Target attributes attached to every event. Shared, never mutated.
pub type Enrichment = Arc<BTreeMap<String, String>>;

/// Traffic direction seen from the access point's clients.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    /// Bytes and packets received by the access point.
    Ingress,
    /// Bytes and packets sent by the access point.
    Egress,
}

impl Direction {
    pub fn as_str(&self) -> &'static str {
        match self {
            Direction::Ingress => "ingress",
            Direction::Egress => "egress",
        }
    }
}

/// Per-cycle presence of one device.
#[derive(Debug, Clone, PartialEq)]
pub struct StateEvent {
    pub device_id: String,
    pub device_ip: Option<String>,
    pub device_name: Option<String>,
    pub client_count: u64,
    pub status: DeviceStatus,
    pub timestamp: i64,
    pub time_switched: i64,
    pub sensor_ip: String,
    pub enrichment: Enrichment,
}

/// One direction of a device's counters at first sight.
#[derive(Debug, Clone, PartialEq)]
pub struct StatsEvent {
    pub device_id: String,
    pub device_ip: Option<String>,
    pub direction: Direction,
    pub bytes: u64,
    pub packets: u64,
    pub timestamp: i64,
    pub time_switched: i64,
    pub sensor_ip: String,
    pub enrichment: Enrichment,
}

#[derive(Debug, Clone, PartialEq)]
pub enum OutboundEvent {
    State(StateEvent),
    Stats(StatsEvent),
}

impl OutboundEvent {
    /// Routing key: every event of one device shares it.
    pub fn partition_key(&self) -> &str {
        match self {
            OutboundEvent::State(event) => &event.device_id,
            OutboundEvent::Stats(event) => &event.device_id,
        }
    }

    /// Value of the `type` field in the published document.
    pub fn kind(&self) -> &'static str {
        match self {
            OutboundEvent::State(_) => "stateEvent",
            OutboundEvent::Stats(_) => "statsEvent",
        }
    }

    pub fn enrichment(&self) -> &Enrichment {
        match self {
            OutboundEvent::State(event) => &event.enrichment,
            OutboundEvent::Stats(event) => &event.enrichment,
        }
    }
}
