use dashmap::DashMap;
use dashmap::mapref::entry::Entry;

use super::flow_key::FlowKey;
use super::flow_metrics::FlowMetrics;
use super::ring::{OverflowRecord, Ring};
use super::counters::Counters;

// AGGREGATION MAP (C4)
//
// Standing in for the kernel's per-CPU `BPF_MAP_TYPE_PERCPU_HASH`: one
// `DashMap` shard per CPU context. A `DashMap`'s `entry()` already performs
// an atomic look-up-or-vacant-slot operation under the bucket's internal
// lock, which is why the EEXIST-retry dance from §4.4/§9 has no code path
// here — it is subsumed by the map implementation's own atomicity rather
// than hand-rolled (see DESIGN.md). The capacity check happens before
// `entry()` is taken (not inside the occupied/vacant match) because a
// shard is only ever driven by the single execution context that owns it,
// matching §5's "writer is the single CPU owning the shard" — there is no
// second writer racing the length check on the same shard in normal use.
//
//   ENOMEM, E2BIG - the two overflow-triggering errno values from §4.4
//   UpdateOutcome - what update_or_insert actually did
//   AggregationMap::new(shards, capacity_per_shard)
//   AggregationMap.update_or_insert(shard, key, len, now, flags, dscp, rtt, ring, counters)
//   AggregationMap.update_if_present(shard, key, f) -> bool - side-channel RMW
//   AggregationMap.insert_if_absent(shard, key, metrics) -> bool
//   AggregationMap.lookup(shard, key) -> Option<FlowMetrics>
//   AggregationMap.remove(shard, key) -> Option<FlowMetrics>
//   AggregationMap.snapshot_shard(shard) -> Vec<(FlowKey, FlowMetrics)>
//   AggregationMap.shard_count()/.len(shard)

pub const ENOMEM: i32 = -12;
pub const E2BIG: i32 = -7;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpdateOutcome {
    Updated,
    Inserted,
    /// Map was at capacity; the new flow was emitted on the ring instead.
    Overflowed,
    /// Map was at capacity and the ring was also full; record dropped.
    RingDropped,
}

pub struct AggregationMap {
    shards: Vec<DashMap<FlowKey, FlowMetrics>>,
    capacity: usize,
}

impl AggregationMap {
    pub fn new(shard_count: usize, capacity_per_shard: usize) -> AggregationMap {
        let mut shards = Vec::with_capacity(shard_count);
        shards.resize_with(shard_count, DashMap::new);
        AggregationMap { shards, capacity: capacity_per_shard }
    }

    pub fn shard_count(&self) -> usize {
        self.shards.len()
    }

    pub fn len(&self, shard: usize) -> usize {
        self.shards[shard].len()
    }

    #[allow(clippy::too_many_arguments)]
    pub fn update_or_insert(
        &self,
        shard: usize,
        key: FlowKey,
        len: u64,
        now: u64,
        flags: u16,
        dscp: u8,
        initial_rtt: u64,
        ring: &Ring,
        counters: &Counters,
    ) -> UpdateOutcome {
        let map = &self.shards[shard];

        if map.len() >= self.capacity && !map.contains_key(&key) {
            let mut metrics = FlowMetrics::new_packet(len, now, flags, dscp, initial_rtt);
            metrics.errno = ENOMEM;
            let record = OverflowRecord { key, metrics, errno: ENOMEM };
            return if ring.push(record) {
                UpdateOutcome::Overflowed
            } else {
                // trace-only per §4.4; no counter is specified for this case
                let _ = counters;
                UpdateOutcome::RingDropped
            };
        }

        match map.entry(key) {
            Entry::Occupied(mut e) => {
                e.get_mut().apply_packet(len, now, flags, dscp);
                UpdateOutcome::Updated
            }
            Entry::Vacant(e) => {
                e.insert(FlowMetrics::new_packet(len, now, flags, dscp, initial_rtt));
                UpdateOutcome::Inserted
            }
        }
    }

    /// §4.6/§4.7/§4.8/§4.9 RMW against an existing flow. Returns false if no
    /// entry for `key` exists on this shard (SideChannelMiss territory).
    pub fn update_if_present<F>(&self, shard: usize, key: &FlowKey, f: F) -> bool
    where
        F: FnOnce(&mut FlowMetrics),
    {
        match self.shards[shard].get_mut(key) {
            Some(mut entry) => {
                f(&mut entry);
                true
            }
            None => false,
        }
    }

    /// Synthetic insert for a side channel that found no flow to attach to
    /// (§4.8 "inserts a new flow with direction=INGRESS", §4.9 "insert a new
    /// one with the cookie at index 0"). Returns false if an entry already
    /// existed (caller should have hit update_if_present instead).
    pub fn insert_if_absent(&self, shard: usize, key: FlowKey, metrics: FlowMetrics) -> bool {
        match self.shards[shard].entry(key) {
            Entry::Occupied(_) => false,
            Entry::Vacant(e) => {
                e.insert(metrics);
                true
            }
        }
    }

    /// Same synthetic insert, but falls back to the overflow ring when the
    /// shard is at capacity rather than just failing — §9 open question 1
    /// resolves in favor of the reference behavior of emitting side-channel-
    /// only flows (`packets=0, pkt_drops.packets>0`) through C5 instead of
    /// dropping the annotation outright. Returns false only when both the
    /// map slot and the ring are unavailable.
    pub fn insert_if_absent_or_ring(
        &self,
        shard: usize,
        key: FlowKey,
        mut metrics: FlowMetrics,
        ring: &Ring,
    ) -> bool {
        let map = &self.shards[shard];
        if map.len() >= self.capacity && !map.contains_key(&key) {
            metrics.errno = ENOMEM;
            return ring.push(OverflowRecord { key, metrics, errno: ENOMEM });
        }
        self.insert_if_absent(shard, key, metrics)
    }

    pub fn lookup(&self, shard: usize, key: &FlowKey) -> Option<FlowMetrics> {
        self.shards[shard].get(key).map(|e| e.clone())
    }

    pub fn remove(&self, shard: usize, key: &FlowKey) -> Option<FlowMetrics> {
        self.shards[shard].remove(key).map(|(_, v)| v)
    }

    /// A read-only snapshot of a shard's current keys and values; does not
    /// remove anything (used by the reassembler to enumerate candidates
    /// before the merge-then-delete pass, see reassembler.rs).
    pub fn snapshot_shard(&self, shard: usize) -> Vec<(FlowKey, FlowMetrics)> {
        self.shards[shard]
            .iter()
            .map(|e| (*e.key(), e.value().clone()))
            .collect()
    }
}

#[cfg(test)]
mod selftest {
    use super::*;
    use crate::flow_key::Direction;

    fn key(port: u16) -> FlowKey {
        FlowKey {
            eth_protocol: 0x0800, src_mac: [0; 6], dst_mac: [0; 6],
            src_ip: [0; 16], dst_ip: [0; 16], src_port: port, dst_port: 80,
            transport_protocol: 6, if_index: 1, direction: Direction::Egress,
        }
    }

    #[test]
    fn first_packet_inserts_second_updates() {
        let map = AggregationMap::new(1, 1000);
        let ring = Ring::with_capacity(8);
        let counters = Counters::default();
        let k = key(1);

        let o1 = map.update_or_insert(0, k, 100, 1, 0, 0, 0, &ring, &counters);
        assert_eq!(o1, UpdateOutcome::Inserted);
        let o2 = map.update_or_insert(0, k, 50, 2, 0, 0, 0, &ring, &counters);
        assert_eq!(o2, UpdateOutcome::Updated);

        let m = map.lookup(0, &k).unwrap();
        assert_eq!(m.packets, 2);
        assert_eq!(m.bytes, 150);
    }

    #[test]
    fn map_at_capacity_overflows_to_ring() {
        let map = AggregationMap::new(1, 1);
        let ring = Ring::with_capacity(8);
        let counters = Counters::default();

        let o1 = map.update_or_insert(0, key(1), 10, 0, 0, 0, 0, &ring, &counters);
        assert_eq!(o1, UpdateOutcome::Inserted);

        let o2 = map.update_or_insert(0, key(2), 10, 0, 0, 0, 0, &ring, &counters);
        assert_eq!(o2, UpdateOutcome::Overflowed);
        assert_eq!(ring.len(), 1);
        assert_eq!(map.len(0), 1);
    }

    #[test]
    fn existing_key_updates_even_when_shard_is_at_capacity() {
        let map = AggregationMap::new(1, 1);
        let ring = Ring::with_capacity(8);
        let counters = Counters::default();
        let k = key(1);

        map.update_or_insert(0, k, 10, 0, 0, 0, 0, &ring, &counters);
        let o = map.update_or_insert(0, k, 10, 1, 0, 0, 0, &ring, &counters);
        assert_eq!(o, UpdateOutcome::Updated);
        assert_eq!(map.lookup(0, &k).unwrap().packets, 2);
    }

    #[test]
    fn side_channel_rmw_and_synthetic_insert() {
        let map = AggregationMap::new(1, 1000);
        let k = key(1);
        assert!(!map.update_if_present(0, &k, |_| {}));

        let metrics = FlowMetrics::new_packet(0, 0, 0, 0, 0);
        assert!(map.insert_if_absent(0, k, metrics));
        assert!(!map.insert_if_absent(0, k, FlowMetrics::new_packet(0, 0, 0, 0, 0)));

        assert!(map.update_if_present(0, &k, |m| m.pkt_drops.packets += 1));
        assert_eq!(map.lookup(0, &k).unwrap().pkt_drops.packets, 1);
    }
}
