use super::flow_key::{Direction, FlowKey};
use super::flow_metrics::{FlowMetrics, COOKIE_LEN};
use super::aggregation_map::AggregationMap;
use super::ring::Ring;
use super::sampler::Sampler;
use super::counters::Counters;
use super::errors::{FlowError, Result};

// NETWORK-EVENT TRACKER (C9)
//
// Grounded on `trace_network_events`/`lookup_and_update_existing_flow_network_events`:
// tries INGRESS then EGRESS against the same key (direction of a sampled
// event isn't known ahead of time, same as C8), dedupes the cookie against
// the flow's existing slots, and falls back to a synthetic INGRESS insert
// with the cookie in slot 0 when no flow matches either direction.
//
//   record_event(key, cookie, event_groupid, configured_groupid, now, shard, map, ring, sampler, counters)

#[allow(clippy::too_many_arguments)]
pub fn record_event(
    key: &FlowKey,
    cookie: &[u8; COOKIE_LEN],
    event_groupid: i32,
    configured_groupid: i32,
    now: u64,
    shard: usize,
    map: &AggregationMap,
    ring: &Ring,
    sampler: &Sampler,
    counters: &Counters,
) -> Result<()> {
    if configured_groupid != 0 && configured_groupid != event_groupid {
        counters.inc_network_events_err_groupid_mismatch();
        return Err(FlowError::FilteredOut);
    }
    if sampler.sampling_active(shard) {
        return Err(FlowError::FilteredOut);
    }

    let ingress_key = FlowKey { direction: Direction::Ingress, ..*key };
    let egress_key = FlowKey { direction: Direction::Egress, ..*key };

    for candidate in [&ingress_key, &egress_key] {
        if map.update_if_present(shard, candidate, |m| m.record_cookie(cookie)) {
            counters.inc_network_events_good();
            return Ok(());
        }
    }

    let mut metrics = FlowMetrics::empty(now);
    metrics.record_cookie(cookie);
    if map.insert_if_absent_or_ring(shard, ingress_key, metrics, ring) {
        counters.inc_network_events_good();
        Ok(())
    } else {
        counters.inc_network_events_err_update_map_flows();
        counters.inc_network_events_err();
        Err(FlowError::SideChannelMiss)
    }
}

#[cfg(test)]
mod selftest {
    use super::*;
    use crate::ring::Ring;

    fn key() -> FlowKey {
        FlowKey {
            eth_protocol: 0x0800, src_mac: [0; 6], dst_mac: [0; 6],
            src_ip: [1; 16], dst_ip: [2; 16], src_port: 1, dst_port: 2,
            transport_protocol: 6, if_index: 5, direction: Direction::Unknown,
        }
    }

    fn not_sampling(shards: usize) -> Sampler {
        Sampler::new(0, shards)
    }

    #[test]
    fn appends_cookie_to_existing_flow() {
        let map = AggregationMap::new(1, 10);
        let ring = Ring::with_capacity(4);
        let sampler = not_sampling(1);
        let counters = Counters::default();
        let mut egress_key = key();
        egress_key.direction = Direction::Egress;
        map.update_or_insert(0, egress_key, 10, 0, 0, 0, 0, &ring, &counters);

        record_event(&key(), &[9; 8], 0, 0, 0, 0, &map, &ring, &sampler, &counters).unwrap();
        assert_eq!(map.lookup(0, &egress_key).unwrap().network_events[0], [9; 8]);
        assert_eq!(counters.network_events_good(), 1);
    }

    #[test]
    fn groupid_mismatch_is_rejected() {
        let map = AggregationMap::new(1, 10);
        let ring = Ring::with_capacity(4);
        let sampler = not_sampling(1);
        let counters = Counters::default();
        let err = record_event(&key(), &[1; 8], 5, 7, 0, 0, &map, &ring, &sampler, &counters).unwrap_err();
        assert_eq!(err, FlowError::FilteredOut);
        assert_eq!(counters.network_events_err_groupid_mismatch(), 1);
    }

    #[test]
    fn ignored_while_sampled_out() {
        let map = AggregationMap::new(1, 10);
        let ring = Ring::with_capacity(4);
        let sampler = Sampler::new(2, 1);
        while sampler.admit(0) {}
        let counters = Counters::default();
        let err = record_event(&key(), &[1; 8], 0, 0, 0, 0, &map, &ring, &sampler, &counters).unwrap_err();
        assert_eq!(err, FlowError::FilteredOut);
        assert_eq!(map.len(0), 0);
    }

    #[test]
    fn missing_flow_creates_synthetic_ingress_entry() {
        let map = AggregationMap::new(1, 10);
        let ring = Ring::with_capacity(4);
        let sampler = not_sampling(1);
        let counters = Counters::default();
        record_event(&key(), &[1; 8], 0, 0, 0, 0, &map, &ring, &sampler, &counters).unwrap();

        let mut ingress_key = key();
        ingress_key.direction = Direction::Ingress;
        let m = map.lookup(0, &ingress_key).unwrap();
        assert_eq!(m.network_events[0], [1; 8]);
        assert_eq!(m.packets, 0);
    }

    #[test]
    fn missing_flow_and_full_map_overflows_to_ring() {
        let map = AggregationMap::new(1, 0);
        let ring = Ring::with_capacity(4);
        let sampler = not_sampling(1);
        let counters = Counters::default();
        record_event(&key(), &[1; 8], 0, 0, 0, 0, &map, &ring, &sampler, &counters).unwrap();
        assert_eq!(map.len(0), 0);
        assert_eq!(ring.len(), 1);
        assert_eq!(counters.network_events_good(), 1);
    }
}
