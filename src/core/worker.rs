//! Per-target polling state machine.
//!
//! ```text
//! Starting -> Polling -> Diffing -> Emitting -> Sleeping -> Polling ... -> Stopped
//! ```
//!
//! Cancellation is checked at the top of every iteration and raced against
//! the inter-cycle sleep. A poll already in flight runs to completion.

use std::{collections::BTreeMap, ops::Bound, sync::Arc};

use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use super::{
    cache::{Counters, DeviceCache, DeviceObservation, Touched},
    error::{PollError, QueueClosed},
    event::{Direction, Enrichment, OutboundEvent, StateEvent, StatsEvent},
    queue::EventSender,
    walker::{Oid, OidParseError, SubtreeWalker, Value, VarBind},
};
use crate::config::{
    poller::{DeviceColumns, PollerConfig},
    targets::Target,
};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerPhase {
    Starting,
    Polling,
    Diffing,
    Emitting,
    Sleeping,
    Stopped,
}

/// Column roots walked every cycle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Columns {
    pub name: Oid,
    pub mac: Oid,
    pub ip: Option<Oid>,
    pub client_count: Option<Oid>,
    pub sent_bytes: Option<Oid>,
    pub recv_bytes: Option<Oid>,
    pub sent_packets: Option<Oid>,
    pub recv_packets: Option<Oid>,
}

impl Columns {
    pub fn from_config(columns: &DeviceColumns) -> Result<Self, OidParseError> {
        fn optional(column: &Option<String>) -> Result<Option<Oid>, OidParseError> {
            match column.as_deref() {
                None | Some("") => Ok(None),
                Some(oid) => oid.parse().map(Some),
            }
        }

        Ok(Columns {
            name: columns.name.parse()?,
            mac: columns.mac.parse()?,
            ip: optional(&columns.ip)?,
            client_count: optional(&columns.client_count)?,
            sent_bytes: optional(&columns.sent_bytes)?,
            recv_bytes: optional(&columns.recv_bytes)?,
            sent_packets: optional(&columns.sent_packets)?,
            recv_packets: optional(&columns.recv_packets)?,
        })
    }

    fn roots(&self) -> impl Iterator<Item = &Oid> {
        [Some(&self.name), Some(&self.mac)]
            .into_iter()
            .chain([
                self.ip.as_ref(),
                self.client_count.as_ref(),
                self.sent_bytes.as_ref(),
                self.recv_bytes.as_ref(),
                self.sent_packets.as_ref(),
                self.recv_packets.as_ref(),
            ])
            .flatten()
    }
}

/// Settings shared by every worker of a pool.
#[derive(Debug, Clone)]
pub struct WorkerSettings {
    pub columns: Columns,
    /// Seconds subtracted from `now` for the first statistics sample.
    pub stats_window: i64,
}

impl WorkerSettings {
    pub fn from_config(poller: &PollerConfig) -> Result<Self, OidParseError> {
        Ok(Self {
            columns: Columns::from_config(&poller.columns)?,
            stats_window: i64::try_from(poller.stats_window).unwrap_or(i64::MAX),
        })
    }
}

/// Values of one column keyed by index suffix.
type ColumnValues<'a> = BTreeMap<&'a [u32], &'a Value>;

fn column_values<'a>(root: Option<&Oid>, bindings: &'a [VarBind]) -> ColumnValues<'a> {
    let Some(root) = root else {
        return BTreeMap::new();
    };
    bindings
        .iter()
        .filter_map(|binding| binding.oid.suffix(root).map(|suffix| (suffix, &binding.value)))
        .collect()
}

/// Entries at `index` or below it, e.g. per-radio rows of one access point.
fn entries_at<'a, 'b>(
    values: &'b ColumnValues<'a>,
    index: &'b [u32],
) -> impl Iterator<Item = &'a Value> + 'b {
    values
        .range::<[u32], _>((Bound::Included(index), Bound::Unbounded))
        .take_while(move |(suffix, _)| suffix.starts_with(index))
        .map(|(_, value)| *value)
}

fn text_at(values: &ColumnValues<'_>, index: &[u32], render: fn(&Value) -> Option<String>) -> Option<String> {
    entries_at(values, index).find_map(render)
}

/// Sum over every entry under `index`. Unparsable entries are skipped; `None`
/// when nothing parsable was reported.
fn sum_at(values: &ColumnValues<'_>, index: &[u32]) -> Option<u64> {
    entries_at(values, index).fold(None, |total, value| match value.as_u64() {
        Some(n) => Some(total.unwrap_or(0u64).saturating_add(n)),
        None => {
            trace!(?value, "Skipping non-numeric value");
            total
        }
    })
}

/// Groups a flat walk result into one observation per index under the name
/// column. Indexes without a MAC are dropped.
pub fn extract_devices(columns: &Columns, bindings: &[VarBind]) -> Vec<DeviceObservation> {
    let names = column_values(Some(&columns.name), bindings);
    let macs = column_values(Some(&columns.mac), bindings);
    let ips = column_values(columns.ip.as_ref(), bindings);
    let clients = column_values(columns.client_count.as_ref(), bindings);
    let sent_bytes = column_values(columns.sent_bytes.as_ref(), bindings);
    let recv_bytes = column_values(columns.recv_bytes.as_ref(), bindings);
    let sent_packets = column_values(columns.sent_packets.as_ref(), bindings);
    let recv_packets = column_values(columns.recv_packets.as_ref(), bindings);

    let mut observations = Vec::with_capacity(names.len());
    for (index, name) in &names {
        let Some(device_id) = text_at(&macs, index, Value::as_mac) else {
            debug!(?index, "Skipping device without MAC address");
            continue;
        };

        observations.push(DeviceObservation {
            device_id,
            display_name: name.as_text(),
            ip_address: text_at(&ips, index, Value::as_text).filter(|ip| !ip.is_empty()),
            client_count: sum_at(&clients, index).unwrap_or(0),
            counters: Counters {
                sent_bytes: sum_at(&sent_bytes, index),
                recv_bytes: sum_at(&recv_bytes, index),
                sent_packets: sum_at(&sent_packets, index),
                recv_packets: sum_at(&recv_packets, index),
            },
        });
    }
    observations
}

pub fn epoch_now() -> i64 {
    time::OffsetDateTime::now_utc().unix_timestamp()
}

pub struct PollingWorker {
    target: Target,
    endpoint: String,
    walker: Arc<dyn SubtreeWalker>,
    settings: Arc<WorkerSettings>,
    cache: DeviceCache,
    enrichment: Enrichment,
    events: EventSender,
    phase_tx: watch::Sender<WorkerPhase>,
    cancel: CancellationToken,
}

impl PollingWorker {
    pub fn new(
        target: Target,
        walker: Arc<dyn SubtreeWalker>,
        settings: Arc<WorkerSettings>,
        events: EventSender,
        cancel: CancellationToken,
    ) -> (Self, watch::Receiver<WorkerPhase>) {
        let (phase_tx, phase_rx) = watch::channel(WorkerPhase::Starting);
        let worker = Self {
            endpoint: target.endpoint(),
            enrichment: Arc::new(target.enrichment.clone()),
            target,
            walker,
            settings,
            cache: DeviceCache::new(),
            events,
            phase_tx,
            cancel,
        };
        (worker, phase_rx)
    }

    fn set_phase(&self, phase: WorkerPhase) {
        self.phase_tx.send_replace(phase);
    }

    pub fn cache(&self) -> &DeviceCache {
        &self.cache
    }

    /// Runs until cancelled or until the event queue is closed.
    pub async fn run(mut self) {
        info!(
            target = %self.endpoint,
            interval = self.target.interval,
            "Polling worker started"
        );

        loop {
            if self.cancel.is_cancelled() {
                break;
            }

            if let Err(QueueClosed) = self.run_cycle(epoch_now()).await {
                warn!(target = %self.endpoint, "Event queue closed, stopping worker");
                break;
            }

            self.set_phase(WorkerPhase::Sleeping);
            tokio::select! {
                _ = self.cancel.cancelled() => break,
                _ = tokio::time::sleep(self.target.poll_interval()) => {}
            }
        }

        self.set_phase(WorkerPhase::Stopped);
        info!(target = %self.endpoint, "Polling worker stopped");
    }

    /// One poll, diff and emit pass. Returns the number of events enqueued.
    pub async fn run_cycle(&mut self, now: i64) -> Result<usize, QueueClosed> {
        self.set_phase(WorkerPhase::Polling);
        let started = tokio::time::Instant::now();
        let bindings = self.poll().await;

        self.set_phase(WorkerPhase::Diffing);
        let observations = extract_devices(&self.settings.columns, &bindings);
        let found = observations.len();
        let touched = self.cache.reconcile(observations, &self.enrichment, now);

        self.set_phase(WorkerPhase::Emitting);
        let events = self.build_events(touched, now);
        let sent = self.events.send_batch(events)?;

        debug!(
            target = %self.endpoint,
            bindings = bindings.len(),
            devices = found,
            cached = self.cache.len(),
            events = sent,
            elapsed_ms = started.elapsed().as_millis() as u64,
            "Poll cycle finished"
        );
        Ok(sent)
    }

    /// Walks every column. An unreachable target ends the poll early; the
    /// other columns would time out the same way.
    async fn poll(&self) -> Vec<VarBind> {
        let mut bindings = Vec::new();
        for root in self.settings.columns.roots() {
            match self.walker.walk(root).await {
                Ok(mut found) => bindings.append(&mut found),
                Err(e @ PollError::TargetUnreachable { .. }) => {
                    warn!(target = %self.endpoint, root = %root, "Walk failed: {e}");
                    break;
                }
                Err(e @ PollError::MalformedResponse { .. }) => {
                    warn!(target = %self.endpoint, root = %root, "Walk failed: {e}");
                }
            }
        }
        bindings
    }

    fn build_events(&self, touched: Vec<Touched>, now: i64) -> Vec<OutboundEvent> {
        let mut events = Vec::with_capacity(touched.len());

        for Touched {
            record,
            first_observation,
        } in touched
        {
            if first_observation {
                let directions = [
                    (
                        Direction::Ingress,
                        record.counters.recv_bytes,
                        record.counters.recv_packets,
                    ),
                    (
                        Direction::Egress,
                        record.counters.sent_bytes,
                        record.counters.sent_packets,
                    ),
                ];

                events.push(OutboundEvent::State(self.state_event(&record, now)));
                for (direction, bytes, packets) in directions {
                    if bytes.is_none() && packets.is_none() {
                        continue;
                    }
                    events.push(OutboundEvent::Stats(StatsEvent {
                        device_id: record.device_id.clone(),
                        device_ip: record.ip_address.clone(),
                        direction,
                        bytes: bytes.unwrap_or(0),
                        packets: packets.unwrap_or(0),
                        timestamp: now,
                        time_switched: now.saturating_sub(self.settings.stats_window),
                        sensor_ip: self.target.address.clone(),
                        enrichment: record.last_enrichment.clone(),
                    }));
                }
            } else {
                events.push(OutboundEvent::State(self.state_event(&record, now)));
            }
        }
        events
    }

    fn state_event(&self, record: &super::cache::DeviceRecord, now: i64) -> StateEvent {
        StateEvent {
            device_id: record.device_id.clone(),
            device_ip: record.ip_address.clone(),
            device_name: record.display_name.clone(),
            client_count: record.client_count,
            status: record.status,
            timestamp: now,
            time_switched: record.last_switched,
            sensor_ip: self.target.address.clone(),
            enrichment: record.last_enrichment.clone(),
        }
    }
}

#[cfg(test)]
pub(crate) mod tests {
    use std::{
        collections::{HashMap, HashSet},
        sync::Mutex,
        time::Duration,
    };

    use async_trait::async_trait;
    use tracing_test::traced_test;

    use super::*;
    use crate::core::{cache::DeviceStatus, queue::event_queue};

    /// Serves a mutable table of column contents.
    #[derive(Default)]
    pub(crate) struct MockWalker {
        tables: Mutex<HashMap<Oid, Vec<VarBind>>>,
        failing: Mutex<HashSet<Oid>>,
        calls: Mutex<usize>,
    }

    impl MockWalker {
        pub(crate) fn set(&self, root: &Oid, bindings: Vec<VarBind>) {
            self.tables.lock().unwrap().insert(root.clone(), bindings);
        }

        pub(crate) fn clear(&self) {
            self.tables.lock().unwrap().clear();
        }

        fn fail(&self, root: &Oid) {
            self.failing.lock().unwrap().insert(root.clone());
        }

        fn calls(&self) -> usize {
            *self.calls.lock().unwrap()
        }
    }

    #[async_trait]
    impl SubtreeWalker for MockWalker {
        async fn walk(&self, root: &Oid) -> Result<Vec<VarBind>, PollError> {
            *self.calls.lock().unwrap() += 1;
            if self.failing.lock().unwrap().contains(root) {
                return Err(PollError::malformed("mock", format!("garbled {root}")));
            }
            Ok(self
                .tables
                .lock()
                .unwrap()
                .get(root)
                .cloned()
                .unwrap_or_default())
        }
    }

    struct UnreachableWalker;

    #[async_trait]
    impl SubtreeWalker for UnreachableWalker {
        async fn walk(&self, _root: &Oid) -> Result<Vec<VarBind>, PollError> {
            Err(PollError::unreachable("10.0.0.9:161", "no response after 4 attempts"))
        }
    }

    pub(crate) fn oid(s: &str) -> Oid {
        s.parse().unwrap()
    }

    pub(crate) fn test_settings() -> WorkerSettings {
        WorkerSettings {
            columns: Columns {
                name: oid("1.3.6.1.4.1.9999.1.1"),
                mac: oid("1.3.6.1.4.1.9999.1.2"),
                ip: Some(oid("1.3.6.1.4.1.9999.1.3")),
                client_count: Some(oid("1.3.6.1.4.1.9999.2.1")),
                sent_bytes: Some(oid("1.3.6.1.4.1.9999.3.1")),
                recv_bytes: Some(oid("1.3.6.1.4.1.9999.3.2")),
                sent_packets: None,
                recv_packets: None,
            },
            stats_window: 300,
        }
    }

    /// Populates `walker` with one access point at `index`.
    pub(crate) fn add_device(
        walker: &MockWalker,
        columns: &Columns,
        index: u32,
        mac: [u8; 6],
        clients: u32,
        sent: u32,
        recv: u32,
    ) {
        let idx = [index];
        let push = |root: &Oid, arcs: &[u32], value: Value| {
            let mut tables = walker.tables.lock().unwrap();
            tables
                .entry(root.clone())
                .or_default()
                .push(VarBind::new(root.child(arcs), value));
        };

        push(&columns.name, &idx, Value::OctetString(format!("AP-{index}").into_bytes()));
        push(&columns.mac, &[index, 0], Value::OctetString(mac.to_vec()));
        if let Some(ip) = &columns.ip {
            push(ip, &idx, Value::IpAddress([192, 168, 0, index as u8]));
        }
        if let Some(client_count) = &columns.client_count {
            push(client_count, &[index, 0], Value::Gauge32(clients));
        }
        if let Some(sent_bytes) = &columns.sent_bytes {
            push(sent_bytes, &idx, Value::Counter32(sent));
        }
        if let Some(recv_bytes) = &columns.recv_bytes {
            push(recv_bytes, &idx, Value::Counter32(recv));
        }
    }

    fn target() -> Target {
        Target {
            address: "10.0.0.1".into(),
            community: "public".into(),
            interval: 60,
            enrichment: BTreeMap::from([
                ("sensor_name".to_string(), "wlc-hq".to_string()),
                ("status".to_string(), "from-enrichment".to_string()),
            ]),
            ..Default::default()
        }
    }

    pub(crate) const MAC: [u8; 6] = [0xAA, 0xBB, 0xCC, 0xDD, 0xEE, 0x01];

    fn split(events: &[OutboundEvent]) -> (Vec<&StateEvent>, Vec<&StatsEvent>) {
        let mut states = Vec::new();
        let mut stats = Vec::new();
        for event in events {
            match event {
                OutboundEvent::State(e) => states.push(e),
                OutboundEvent::Stats(e) => stats.push(e),
            }
        }
        (states, stats)
    }

    fn drain(rx: &mut crate::core::queue::EventReceiver) -> Vec<OutboundEvent> {
        std::iter::from_fn(|| rx.try_recv()).collect()
    }

    #[tokio::test]
    async fn test_first_sight_then_absence_scenario() {
        let settings = Arc::new(test_settings());
        let walker = Arc::new(MockWalker::default());
        add_device(&walker, &settings.columns, 1, MAC, 3, 1000, 500);

        let (tx, mut rx) = event_queue();
        let (mut worker, _phase) = PollingWorker::new(
            target(),
            walker.clone(),
            settings,
            tx,
            CancellationToken::new(),
        );

        worker.run_cycle(1_000).await.unwrap();
        let events = drain(&mut rx);
        let (states, stats) = split(&events);

        assert_eq!(states.len(), 1);
        assert_eq!(states[0].device_id, "aa:bb:cc:dd:ee:01");
        assert_eq!(states[0].status, DeviceStatus::On);
        assert_eq!(states[0].client_count, 3);
        assert_eq!(states[0].device_name.as_deref(), Some("AP-1"));
        assert_eq!(states[0].device_ip.as_deref(), Some("192.168.0.1"));
        assert_eq!(states[0].sensor_ip, "10.0.0.1");

        assert_eq!(stats.len(), 2);
        let ingress = stats.iter().find(|s| s.direction == Direction::Ingress).unwrap();
        let egress = stats.iter().find(|s| s.direction == Direction::Egress).unwrap();
        assert_eq!(ingress.bytes, 500);
        assert_eq!(egress.bytes, 1000);
        assert_eq!(ingress.time_switched, 1_000 - 300);
        assert_eq!(ingress.timestamp, 1_000);

        // State precedes the stats of the same device.
        assert!(matches!(events[0], OutboundEvent::State(_)));

        walker.clear();
        worker.run_cycle(1_060).await.unwrap();
        let events = drain(&mut rx);
        let (states, stats) = split(&events);

        assert_eq!(states.len(), 1);
        assert_eq!(states[0].status, DeviceStatus::Off);
        assert_eq!(states[0].client_count, 0);
        assert_eq!(states[0].time_switched, 1_060);
        assert!(stats.is_empty());
    }

    #[tokio::test]
    async fn test_stats_only_once_per_cached_lifetime() {
        let settings = Arc::new(test_settings());
        let walker = Arc::new(MockWalker::default());
        add_device(&walker, &settings.columns, 1, MAC, 3, 1000, 500);

        let (tx, mut rx) = event_queue();
        let (mut worker, _phase) =
            PollingWorker::new(target(), walker.clone(), settings.clone(), tx, CancellationToken::new());

        let mut stats_total = 0;
        for cycle in 0..5 {
            if cycle == 2 {
                walker.clear();
            }
            if cycle == 3 {
                add_device(&walker, &settings.columns, 1, MAC, 1, 2000, 900);
            }
            worker.run_cycle(1_000 + cycle * 60).await.unwrap();
            stats_total += split(&drain(&mut rx)).1.len();
        }
        assert_eq!(stats_total, 2);
    }

    #[tokio::test]
    async fn test_every_event_carries_enrichment_and_it_wins() {
        let settings = Arc::new(test_settings());
        let walker = Arc::new(MockWalker::default());
        add_device(&walker, &settings.columns, 1, MAC, 3, 1000, 500);

        let (tx, mut rx) = event_queue();
        let (mut worker, _phase) =
            PollingWorker::new(target(), walker, settings, tx, CancellationToken::new());
        worker.run_cycle(1_000).await.unwrap();

        let events = drain(&mut rx);
        assert_eq!(events.len(), 3);
        for event in &events {
            assert_eq!(event.enrichment().get("sensor_name").map(String::as_str), Some("wlc-hq"));
            assert_eq!(event.enrichment().get("status").map(String::as_str), Some("from-enrichment"));
        }
    }

    #[test]
    fn test_extract_skips_index_without_mac_and_sums_slots() {
        let settings = test_settings();
        let columns = &settings.columns;
        let bindings = vec![
            VarBind::new(columns.name.child(&[1]), Value::OctetString(b"AP-1".to_vec())),
            VarBind::new(columns.name.child(&[2]), Value::OctetString(b"AP-2".to_vec())),
            VarBind::new(columns.mac.child(&[1, 0]), Value::OctetString(MAC.to_vec())),
            VarBind::new(columns.client_count.as_ref().unwrap().child(&[1, 0]), Value::Gauge32(2)),
            VarBind::new(columns.client_count.as_ref().unwrap().child(&[1, 1]), Value::Gauge32(5)),
            VarBind::new(
                columns.client_count.as_ref().unwrap().child(&[1, 2]),
                Value::OctetString(b"n/a".to_vec()),
            ),
            VarBind::new(columns.client_count.as_ref().unwrap().child(&[10, 0]), Value::Gauge32(99)),
        ];

        let observations = extract_devices(columns, &bindings);
        assert_eq!(observations.len(), 1);
        assert_eq!(observations[0].device_id, "aa:bb:cc:dd:ee:01");
        assert_eq!(observations[0].client_count, 7);
        assert_eq!(observations[0].ip_address, None);
        assert_eq!(observations[0].counters, Counters::default());
    }

    #[test]
    fn test_columns_from_default_config() {
        let columns = Columns::from_config(&DeviceColumns::default()).unwrap();
        assert_eq!(columns.roots().count(), 8);

        let partial = DeviceColumns {
            ip: Some(String::new()),
            sent_packets: None,
            ..Default::default()
        };
        let columns = Columns::from_config(&partial).unwrap();
        assert!(columns.ip.is_none());
        assert_eq!(columns.roots().count(), 6);
    }

    #[tokio::test]
    #[traced_test]
    async fn test_malformed_column_keeps_other_columns() {
        let settings = Arc::new(test_settings());
        let walker = Arc::new(MockWalker::default());
        add_device(&walker, &settings.columns, 1, MAC, 3, 1000, 500);
        walker.fail(settings.columns.sent_bytes.as_ref().unwrap());

        let (tx, mut rx) = event_queue();
        let (mut worker, _phase) =
            PollingWorker::new(target(), walker, settings, tx, CancellationToken::new());
        worker.run_cycle(1_000).await.unwrap();

        let events = drain(&mut rx);
        let (states, stats) = split(&events);
        assert_eq!(states.len(), 1);
        assert_eq!(stats.len(), 1);
        assert_eq!(stats[0].direction, Direction::Ingress);
        assert!(logs_contain("Walk failed"));
    }

    #[tokio::test]
    #[traced_test]
    async fn test_unreachable_target_is_an_empty_cycle() {
        let (tx, mut rx) = event_queue();
        let (mut worker, _phase) = PollingWorker::new(
            target(),
            Arc::new(UnreachableWalker),
            Arc::new(test_settings()),
            tx,
            CancellationToken::new(),
        );

        assert_eq!(worker.run_cycle(1_000).await.unwrap(), 0);
        assert!(rx.try_recv().is_none());
        assert!(worker.cache().is_empty());
        assert!(logs_contain("unreachable"));
    }

    #[tokio::test]
    async fn test_unreachable_stops_walking_remaining_columns() {
        struct Counting(Mutex<usize>);

        #[async_trait]
        impl SubtreeWalker for Counting {
            async fn walk(&self, _root: &Oid) -> Result<Vec<VarBind>, PollError> {
                *self.0.lock().unwrap() += 1;
                Err(PollError::unreachable("x", "timeout"))
            }
        }

        let walker = Arc::new(Counting(Mutex::new(0)));
        let (tx, _rx) = event_queue();
        let (mut worker, _phase) = PollingWorker::new(
            target(),
            walker.clone(),
            Arc::new(test_settings()),
            tx,
            CancellationToken::new(),
        );
        worker.run_cycle(1_000).await.unwrap();
        assert_eq!(*walker.0.lock().unwrap(), 1);
    }

    #[tokio::test]
    async fn test_cancel_interrupts_sleep_and_reports_stopped() {
        let walker = Arc::new(MockWalker::default());
        let (tx, _rx) = event_queue();
        let cancel = CancellationToken::new();
        let target = Target {
            interval: 3600,
            ..target()
        };
        let (worker, mut phase) = PollingWorker::new(
            target,
            walker.clone(),
            Arc::new(test_settings()),
            tx,
            cancel.clone(),
        );

        let handle = tokio::spawn(worker.run());
        phase
            .wait_for(|p| *p == WorkerPhase::Sleeping)
            .await
            .unwrap();
        cancel.cancel();

        tokio::time::timeout(Duration::from_secs(1), handle)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(*phase.borrow(), WorkerPhase::Stopped);
        assert!(walker.calls() > 0);
    }

    #[tokio::test]
    async fn test_closed_queue_stops_worker() {
        let (tx, rx) = event_queue();
        drop(rx);

        let settings = Arc::new(test_settings());
        let walker = Arc::new(MockWalker::default());
        add_device(&walker, &settings.columns, 1, MAC, 3, 1000, 500);
        let (worker, phase) =
            PollingWorker::new(target(), walker, settings, tx, CancellationToken::new());

        tokio::time::timeout(Duration::from_secs(1), worker.run())
            .await
            .unwrap();
        assert_eq!(*phase.borrow(), WorkerPhase::Stopped);
    }
}
