//! Per-target view of previously seen devices.
//!
//! The cache is owned by one worker and never shared. Each cycle's
//! observations are reconciled into it: observed devices are `on`, cached
//! devices missing from the cycle are `off`.

use std::collections::{BTreeMap, HashSet};

use super::event::Enrichment;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceStatus {
    On,
    Off,
}

impl DeviceStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            DeviceStatus::On => "on",
            DeviceStatus::Off => "off",
        }
    }
}

/// Cumulative traffic counters; `None` when the controller did not report one.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct Counters {
    pub sent_bytes: Option<u64>,
    pub recv_bytes: Option<u64>,
    pub sent_packets: Option<u64>,
    pub recv_packets: Option<u64>,
}

/// One device as reported in a single poll cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceObservation {
    pub device_id: String,
    pub display_name: Option<String>,
    pub ip_address: Option<String>,
    pub client_count: u64,
    pub counters: Counters,
}

#[derive(Debug, Clone, PartialEq)]
pub struct DeviceRecord {
    pub device_id: String,
    pub display_name: Option<String>,
    pub ip_address: Option<String>,
    pub client_count: u64,
    pub counters: Counters,
    pub status: DeviceStatus,
    pub last_enrichment: Enrichment,
    /// Epoch seconds of the last status change.
    pub last_switched: i64,
}

/// A record touched by one reconcile pass.
#[derive(Debug, Clone, PartialEq)]
pub struct Touched {
    pub record: DeviceRecord,
    /// No record existed before this cycle.
    pub first_observation: bool,
}

#[derive(Debug, Default)]
pub struct DeviceCache {
    records: BTreeMap<String, DeviceRecord>,
}

impl DeviceCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.records.len()
    }

    pub fn is_empty(&self) -> bool {
        self.records.is_empty()
    }

    pub fn get(&self, device_id: &str) -> Option<&DeviceRecord> {
        self.records.get(device_id)
    }

    /// Applies one cycle's observations and returns every touched record:
    /// observed devices in observation order, then absent ones by device id.
    ///
    /// A device id repeated within `observations` is applied once, first wins.
    pub fn reconcile(
        &mut self,
        observations: Vec<DeviceObservation>,
        enrichment: &Enrichment,
        now: i64,
    ) -> Vec<Touched> {
        let mut seen = HashSet::with_capacity(observations.len());
        let mut touched = Vec::with_capacity(observations.len());

        for observation in observations {
            if !seen.insert(observation.device_id.clone()) {
                continue;
            }

            let first_observation = !self.records.contains_key(&observation.device_id);
            let record = self
                .records
                .entry(observation.device_id.clone())
                .or_insert_with(|| DeviceRecord {
                    device_id: observation.device_id.clone(),
                    display_name: None,
                    ip_address: None,
                    client_count: 0,
                    counters: Counters::default(),
                    status: DeviceStatus::Off,
                    last_enrichment: enrichment.clone(),
                    last_switched: now,
                });

            if record.status != DeviceStatus::On {
                record.status = DeviceStatus::On;
                record.last_switched = now;
            }
            record.display_name = observation.display_name;
            record.ip_address = observation.ip_address;
            record.client_count = observation.client_count;
            record.counters = observation.counters;
            record.last_enrichment = enrichment.clone();

            touched.push(Touched {
                record: record.clone(),
                first_observation,
            });
        }

        for record in self.records.values_mut() {
            if seen.contains(&record.device_id) {
                continue;
            }
            record.status = DeviceStatus::Off;
            record.client_count = 0;
            record.last_switched = now;
            record.last_enrichment = enrichment.clone();

            touched.push(Touched {
                record: record.clone(),
                first_observation: false,
            });
        }

        touched
    }
}
