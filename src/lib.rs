pub mod errors;
pub mod flow_key;
pub mod flow_metrics;
pub mod settings;
pub mod counters;
pub mod header;
pub mod util;
pub mod ethernet;
pub mod ipv4;
pub mod ipv6;
pub mod tcp;
pub mod udp;
pub mod sctp;
pub mod icmp;
pub mod parser;
pub mod sampler;
pub mod filter;
pub mod ring;
pub mod aggregation_map;
pub mod dns_tracker;
pub mod rtt_tracker;
pub mod drops_tracker;
pub mod network_events;
pub mod datapath;
pub mod reassembler;

use std::sync::Arc;
use std::time::Duration;

use flow_key::{Direction, FlowKey};
use flow_metrics::COOKIE_LEN;
use settings::Settings;
use counters::Counters;
use aggregation_map::AggregationMap;
use ring::Ring;
use filter::{allow, FlowFilter};
use datapath::Datapath;
use errors::Result;
use reassembler::{Exporter, Reassembler};

// FLOW ENGINE
//
// The facade wiring C1..C9 (Datapath::observe, drops_tracker, network_events)
// to the maps and ring an embedding application owns, per §6's "external
// interfaces": the primary map, the secondary DNS-only map, and the direct
// flow ring. One FlowEngine per attached interface set, sized by the number
// of shards (CPUs) the caller intends to drive concurrently — each shard is
// assumed to be driven by a single execution context at a time (§5).
//
//   FlowEngine::new(settings, shards) - AllowAll flow filter
//   FlowEngine::with_filter(settings, shards, filter)
//   FlowEngine.observe(raw, if_index, direction, shard, now) -> Result<()>
//   FlowEngine.record_drop(key, len, drop_reason, state, flags, now, shard) -> Result<()>
//   FlowEngine.record_network_event(key, cookie, event_groupid, now, shard) -> Result<()>
//   FlowEngine.primary_map()/.secondary_map()/.ring()/.counters()/.settings()
//   FlowEngine.build_reassembler(exporter, scan_interval) -> Reassembler
pub struct FlowEngine {
    settings: Settings,
    datapath: Datapath,
    primary: Arc<AggregationMap>,
    secondary: Arc<AggregationMap>,
    ring: Arc<Ring>,
    counters: Counters,
    filter: Box<dyn FlowFilter>,
}

impl FlowEngine {
    pub fn new(settings: Settings, shards: usize) -> FlowEngine {
        FlowEngine::with_filter(settings, shards, Box::new(allow()))
    }

    pub fn with_filter(settings: Settings, shards: usize, filter: Box<dyn FlowFilter>) -> FlowEngine {
        let capacity = settings.map_capacity;
        FlowEngine {
            datapath: Datapath::new(settings.clone(), shards),
            primary: Arc::new(AggregationMap::new(shards, capacity)),
            secondary: Arc::new(AggregationMap::new(shards, capacity)),
            ring: Arc::new(Ring::new()),
            counters: Counters::default(),
            filter,
            settings,
        }
    }

    /// Hands off this engine's maps and ring to a Reassembler (C10). The
    /// engine keeps its own `Arc` clones, so `observe`/`record_drop`/
    /// `record_network_event` keep working after the reassembler is built.
    pub fn build_reassembler(&self, exporter: Arc<dyn Exporter>, scan_interval: Duration) -> Reassembler {
        Reassembler::new(self.primary.clone(), self.secondary.clone(), self.ring.clone(), exporter, scan_interval)
    }

    pub fn observe(
        &self,
        raw: &[u8],
        if_index: u32,
        direction: Direction,
        shard: usize,
        now: u64,
    ) -> Result<()> {
        self.datapath.observe(
            raw, if_index, direction, shard, now,
            &self.primary, &self.secondary, &self.ring,
            self.filter.as_ref(), &self.counters,
        )
    }

    #[allow(clippy::too_many_arguments)]
    pub fn record_drop(
        &self,
        key: &FlowKey,
        len: u64,
        drop_reason: u32,
        state: u8,
        flags: u16,
        now: u64,
        shard: usize,
    ) -> Result<()> {
        if !self.settings.enable_pkt_drops {
            return Ok(());
        }
        drops_tracker::record_drop(
            key, len, drop_reason, state, flags, now, shard,
            &self.primary, &self.ring, self.datapath.sampler(), self.filter.as_ref(),
        )
    }

    #[allow(clippy::too_many_arguments)]
    pub fn record_network_event(
        &self,
        key: &FlowKey,
        cookie: &[u8; COOKIE_LEN],
        event_groupid: i32,
        now: u64,
        shard: usize,
    ) -> Result<()> {
        if !self.settings.enable_network_events_monitoring {
            return Ok(());
        }
        network_events::record_event(
            key, cookie, event_groupid, self.settings.network_events_monitoring_groupid,
            now, shard, &self.primary, &self.ring, self.datapath.sampler(), &self.counters,
        )
    }

    pub fn primary_map(&self) -> &AggregationMap { self.primary.as_ref() }
    pub fn secondary_map(&self) -> &AggregationMap { self.secondary.as_ref() }
    pub fn ring(&self) -> &Ring { self.ring.as_ref() }
    pub fn counters(&self) -> &Counters { &self.counters }
    pub fn settings(&self) -> &Settings { &self.settings }
}
