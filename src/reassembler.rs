use std::sync::Arc;
use std::time::{Duration, Instant};

use tokio::task::JoinHandle;
use tracing::{debug, trace};

use super::aggregation_map::AggregationMap;
use super::flow_key::FlowKey;
use super::flow_metrics::{FlowMetrics, COOKIE_LEN};
use super::ring::Ring;
use super::tcp;

// USERSPACE REASSEMBLER (C10)
//
// Grounded on §4.10's two paths and §A.5's choice of `tokio` for the piece
// of this crate that actually suspends (the rest of the datapath never
// does, see datapath.rs). One task blocks on the ring via
// `Ring::pop_wait`, a second wakes on a `tokio::time::interval` to scan and
// evict the map. Neither touches the other's state beyond the maps/ring
// themselves (§5 "no shared mutable state between them").
//
//   Source - which path produced a canonical flow record
//   CanonicalFlow - the merged-across-shards record handed to the exporter
//   Exporter - out-of-scope trait the embedding application implements
//   Reassembler::new(primary, secondary, ring, exporter, scan_interval)
//   Reassembler.scan_once(now) -> usize - one periodic-scan pass, returns evicted count
//   Reassembler.drain_ring_once() -> one ring record forwarded to the exporter
//   Reassembler.spawn(self: Arc<Self>) -> (ring task, scan task)

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Source {
    EvictedFromMap,
    DirectFromRing,
}

#[derive(Debug, Clone)]
pub struct CanonicalFlow {
    pub key: FlowKey,
    pub metrics: FlowMetrics,
    pub source: Source,
}

pub trait Exporter: Send + Sync {
    fn emit(&self, flow: CanonicalFlow);
}

pub struct Reassembler {
    primary: Arc<AggregationMap>,
    secondary: Arc<AggregationMap>,
    ring: Arc<Ring>,
    exporter: Arc<dyn Exporter>,
    scan_interval: Duration,
}

impl Reassembler {
    pub fn new(
        primary: Arc<AggregationMap>,
        secondary: Arc<AggregationMap>,
        ring: Arc<Ring>,
        exporter: Arc<dyn Exporter>,
        scan_interval: Duration,
    ) -> Reassembler {
        Reassembler { primary, secondary, ring, exporter, scan_interval }
    }

    /// Spawns the two background tasks. The scan task times itself off an
    /// `Instant` captured at spawn rather than the caller's own clock
    /// domain; callers that need scan evictions measured against the same
    /// clock as `Datapath::observe`'s `now` should drive `scan_once`
    /// directly on their own timer instead of using this helper.
    pub fn spawn(self: Arc<Self>) -> (JoinHandle<()>, JoinHandle<()>) {
        let ring_task = {
            let this = self.clone();
            tokio::spawn(async move {
                loop {
                    this.drain_ring_once().await;
                }
            })
        };
        let scan_task = {
            let this = self.clone();
            let epoch = Instant::now();
            tokio::spawn(async move {
                let mut ticker = tokio::time::interval(this.scan_interval);
                loop {
                    ticker.tick().await;
                    let now = epoch.elapsed().as_nanos() as u64;
                    let evicted = this.scan_once(now).await;
                    if evicted > 0 {
                        debug!(evicted, "map scan evicted flows");
                    }
                }
            })
        };
        (ring_task, scan_task)
    }

    pub async fn drain_ring_once(&self) {
        let record = self.ring.pop_wait().await;
        trace!(errno = record.errno, "draining overflow record");
        self.exporter.emit(CanonicalFlow {
            key: record.key,
            metrics: record.metrics,
            source: Source::DirectFromRing,
        });
    }

    /// One pass of §4.10's periodic map scan. `now` is the same
    /// monotonic-ns clock domain the caller passes into
    /// `Datapath::observe` elsewhere in this crate — this type never reads
    /// a clock itself. Returns the number of flows evicted.
    pub async fn scan_once(&self, now: u64) -> usize {
        let shard_count = self.primary.shard_count();
        let scan_interval_ns = self.scan_interval.as_nanos() as u64;

        let mut candidates: Vec<FlowKey> = Vec::new();
        for shard in 0..shard_count {
            for (key, _) in self.primary.snapshot_shard(shard) {
                if !candidates.contains(&key) {
                    candidates.push(key);
                }
            }
        }

        let mut secondary_entries: Vec<(usize, FlowKey, FlowMetrics)> = Vec::new();
        for shard in 0..self.secondary.shard_count() {
            for (key, metrics) in self.secondary.snapshot_shard(shard) {
                secondary_entries.push((shard, key, metrics));
            }
        }

        let mut evicted = 0;
        for key in candidates {
            let mut merged: Option<FlowMetrics> = None;
            for shard in 0..shard_count {
                if let Some(m) = self.primary.lookup(shard, &key) {
                    merged = Some(merge_metrics(merged, m));
                }
            }
            let mut merged = match merged {
                Some(m) => m,
                None => continue, // raced with a concurrent removal; skip
            };

            if !is_evictable(&merged, now, scan_interval_ns) {
                continue;
            }

            for shard in 0..shard_count {
                self.primary.remove(shard, &key);
            }

            let mut matched = Vec::new();
            for (i, (_, skey, smetrics)) in secondary_entries.iter().enumerate() {
                if same_flow_ignoring_direction_and_ifindex(&key, skey) {
                    merged = merge_metrics(Some(merged), smetrics.clone());
                    matched.push(i);
                }
            }
            for i in matched.into_iter().rev() {
                let (shard, skey, _) = secondary_entries.remove(i);
                self.secondary.remove(shard, &skey);
            }

            self.exporter.emit(CanonicalFlow { key, metrics: merged, source: Source::EvictedFromMap });
            evicted += 1;
        }

        // Unjoined secondary entries are emitted alone, direction=Unknown.
        for (shard, skey, smetrics) in secondary_entries {
            self.secondary.remove(shard, &skey);
            self.exporter.emit(CanonicalFlow { key: skey, metrics: smetrics, source: Source::EvictedFromMap });
        }

        evicted
    }
}

// A FlowKey differing only in `direction`/`if_index` identifies the same
// logical 5-tuple (§4.6: DNS secondary entries are inserted with
// `direction=UNKNOWN, if_index=0`).
fn same_flow_ignoring_direction_and_ifindex(a: &FlowKey, b: &FlowKey) -> bool {
    a.eth_protocol == b.eth_protocol
        && a.src_mac == b.src_mac
        && a.dst_mac == b.dst_mac
        && a.src_ip == b.src_ip
        && a.dst_ip == b.dst_ip
        && a.src_port == b.src_port
        && a.dst_port == b.dst_port
        && a.transport_protocol == b.transport_protocol
}

fn is_evictable(m: &FlowMetrics, now: u64, scan_interval_ns: u64) -> bool {
    let fin_or_rst = m.flags & (tcp::FLAG_FIN | tcp::FLAG_RST) != 0;
    fin_or_rst || now.saturating_sub(m.end_mono_time_ts) >= scan_interval_ns
}

// §4.4 cross-shard tie-breaks: start_ts=min, end_ts=max, packets/bytes=sum,
// flags=OR, dscp/pkt_drops.latest_*=from whichever shard observed later,
// flow_rtt=first non-zero, network_events=union deduped up to K.
fn merge_metrics(acc: Option<FlowMetrics>, m: FlowMetrics) -> FlowMetrics {
    let mut a = match acc {
        None => return m,
        Some(a) => a,
    };
    let m_is_later = m.end_mono_time_ts >= a.end_mono_time_ts;

    a.packets += m.packets;
    a.bytes += m.bytes;
    a.start_mono_time_ts = a.start_mono_time_ts.min(m.start_mono_time_ts);
    a.end_mono_time_ts = a.end_mono_time_ts.max(m.end_mono_time_ts);
    a.flags |= m.flags;
    if m_is_later {
        a.dscp = m.dscp;
    }
    if a.flow_rtt == 0 {
        a.flow_rtt = m.flow_rtt;
    }

    a.pkt_drops.packets += m.pkt_drops.packets;
    a.pkt_drops.bytes += m.pkt_drops.bytes;
    if m_is_later && m.pkt_drops.packets > 0 {
        a.pkt_drops.latest_state = m.pkt_drops.latest_state;
        a.pkt_drops.latest_flags = m.pkt_drops.latest_flags;
        a.pkt_drops.latest_drop_cause = m.pkt_drops.latest_drop_cause;
    }

    if a.dns_record.id == 0 && m.dns_record.id != 0 {
        a.dns_record = m.dns_record;
    }

    for cookie in m.network_events.iter() {
        if *cookie != [0u8; COOKIE_LEN] {
            a.record_cookie(cookie);
        }
    }

    a
}

#[cfg(test)]
mod selftest {
    use super::*;
    use crate::counters::Counters;
    use crate::flow_key::Direction;
    use std::sync::Mutex as StdMutex;

    struct CollectingExporter {
        flows: StdMutex<Vec<CanonicalFlow>>,
    }

    impl CollectingExporter {
        fn new() -> CollectingExporter {
            CollectingExporter { flows: StdMutex::new(Vec::new()) }
        }
    }

    impl Exporter for CollectingExporter {
        fn emit(&self, flow: CanonicalFlow) {
            self.flows.lock().unwrap().push(flow);
        }
    }

    fn key(port: u16) -> FlowKey {
        FlowKey {
            eth_protocol: 0x0800, src_mac: [0; 6], dst_mac: [0; 6],
            src_ip: [1; 16], dst_ip: [2; 16], src_port: port, dst_port: 80,
            transport_protocol: 6, if_index: 1, direction: Direction::Egress,
        }
    }

    #[tokio::test]
    async fn fin_flagged_flow_is_evicted_regardless_of_recency() {
        let primary = Arc::new(AggregationMap::new(1, 10));
        let secondary = Arc::new(AggregationMap::new(1, 10));
        let ring = Arc::new(Ring::with_capacity(4));
        let counters = Counters::default();
        let exporter = Arc::new(CollectingExporter::new());

        primary.update_or_insert(0, key(1), 60, 100, tcp::FLAG_FIN, 0, 0, &ring, &counters);

        let reassembler = Reassembler::new(
            primary.clone(), secondary, ring,
            exporter.clone(), Duration::from_secs(5),
        );
        let evicted = reassembler.scan_once(101).await;
        assert_eq!(evicted, 1);
        assert_eq!(primary.len(0), 0);
        assert_eq!(exporter.flows.lock().unwrap().len(), 1);
    }

    #[tokio::test]
    async fn fresh_flow_without_fin_is_left_in_place() {
        let primary = Arc::new(AggregationMap::new(1, 10));
        let secondary = Arc::new(AggregationMap::new(1, 10));
        let ring = Arc::new(Ring::with_capacity(4));
        let counters = Counters::default();
        let exporter = Arc::new(CollectingExporter::new());

        primary.update_or_insert(0, key(1), 60, 100, 0, 0, 0, &ring, &counters);

        let reassembler = Reassembler::new(
            primary.clone(), secondary, ring,
            exporter.clone(), Duration::from_secs(5),
        );
        let evicted = reassembler.scan_once(101).await;
        assert_eq!(evicted, 0);
        assert_eq!(primary.len(0), 1);
    }

    #[tokio::test]
    async fn stale_flow_past_scan_interval_is_evicted() {
        let primary = Arc::new(AggregationMap::new(1, 10));
        let secondary = Arc::new(AggregationMap::new(1, 10));
        let ring = Arc::new(Ring::with_capacity(4));
        let counters = Counters::default();
        let exporter = Arc::new(CollectingExporter::new());

        primary.update_or_insert(0, key(1), 60, 1_000_000_000, 0, 0, 0, &ring, &counters);

        let reassembler = Reassembler::new(
            primary.clone(), secondary, ring,
            exporter.clone(), Duration::from_secs(5),
        );
        let still_fresh = reassembler.scan_once(2_000_000_000).await;
        assert_eq!(still_fresh, 0);

        let now_past_interval = 1_000_000_000 + 5_000_000_000 + 1;
        let evicted = reassembler.scan_once(now_past_interval).await;
        assert_eq!(evicted, 1);
    }

    #[tokio::test]
    async fn merges_shards_and_joins_dns_secondary_entry() {
        let primary = Arc::new(AggregationMap::new(2, 10));
        let secondary = Arc::new(AggregationMap::new(2, 10));
        let ring = Arc::new(Ring::with_capacity(4));
        let counters = Counters::default();
        let exporter = Arc::new(CollectingExporter::new());

        primary.update_or_insert(0, key(1), 60, 100, tcp::FLAG_SYN, 0, 0, &ring, &counters);
        primary.update_or_insert(1, key(1), 40, 150, tcp::FLAG_FIN, 0, 0, &ring, &counters);

        let mut dns_key = key(1).with_unknown_direction();
        dns_key.if_index = 0;
        let mut dns_metrics = FlowMetrics::empty(90);
        dns_metrics.dns_record.id = 0x1234;
        dns_metrics.dns_record.latency_ns = 5_000_000;
        secondary.insert_if_absent(0, dns_key, dns_metrics);

        let reassembler = Reassembler::new(
            primary.clone(), secondary.clone(), ring,
            exporter.clone(), Duration::from_secs(5),
        );
        let evicted = reassembler.scan_once(200).await;
        assert_eq!(evicted, 1);
        assert_eq!(secondary.len(0), 0);

        let flows = exporter.flows.lock().unwrap();
        let flow = &flows[0];
        assert_eq!(flow.metrics.packets, 2);
        assert_eq!(flow.metrics.bytes, 100);
        assert_eq!(flow.metrics.flags, tcp::FLAG_SYN | tcp::FLAG_FIN);
        assert_eq!(flow.metrics.dns_record.id, 0x1234);
    }

    #[tokio::test]
    async fn drain_ring_once_forwards_overflow_record_with_errno() {
        let primary = Arc::new(AggregationMap::new(1, 10));
        let secondary = Arc::new(AggregationMap::new(1, 10));
        let ring = Arc::new(Ring::with_capacity(4));
        let exporter = Arc::new(CollectingExporter::new());

        ring.push(crate::ring::OverflowRecord {
            key: key(1),
            metrics: FlowMetrics::new_packet(1, 0, 0, 0, 0),
            errno: -12,
        });

        let reassembler = Reassembler::new(primary, secondary, ring, exporter.clone(), Duration::from_secs(5));
        reassembler.drain_ring_once().await;

        let flows = exporter.flows.lock().unwrap();
        assert_eq!(flows.len(), 1);
        assert_eq!(flows[0].source, Source::DirectFromRing);
    }
}
