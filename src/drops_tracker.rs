use super::flow_key::{Direction, FlowKey};
use super::flow_metrics::FlowMetrics;
use super::aggregation_map::AggregationMap;
use super::ring::Ring;
use super::sampler::Sampler;
use super::filter::{Decision, FlowFilter};
use super::errors::{FlowError, Result};

// DROPS TRACKER (C8)
//
// Hooks the kernel's free-skb path, grounded on `pkt_drop_lookup_and_update_flow`:
// the direction of a drop isn't known ahead of time, so this tries INGRESS
// then EGRESS against the same key before giving up and inserting a
// drop-only synthetic flow under INGRESS (matching the original exactly).
// C1's parser supplies `key` with whatever direction it happened to guess;
// this tracker ignores that field and tries both.
//
//   NOT_SPECIFIED - drop reasons at or below this are ignored
//   record_drop(key, len, drop_reason, state, flags, now, shard, map, ring, sampler, filter)

pub const NOT_SPECIFIED: u32 = 0;

#[allow(clippy::too_many_arguments)]
pub fn record_drop(
    key: &FlowKey,
    len: u64,
    drop_reason: u32,
    state: u8,
    flags: u16,
    now: u64,
    shard: usize,
    map: &AggregationMap,
    ring: &Ring,
    sampler: &Sampler,
    filter: &dyn FlowFilter,
) -> Result<()> {
    if key.if_index == 0 || key.if_index == 1 {
        return Ok(());
    }
    if drop_reason <= NOT_SPECIFIED {
        return Ok(());
    }
    if sampler.sampling_active(shard) {
        return Err(FlowError::FilteredOut);
    }

    let ingress_key = FlowKey { direction: Direction::Ingress, ..*key };
    let egress_key = FlowKey { direction: Direction::Egress, ..*key };

    if let Decision::Skip = filter.evaluate(&ingress_key, flags, Some(drop_reason)) {
        return Err(FlowError::FilteredOut);
    }

    let apply = |m: &mut FlowMetrics| {
        m.pkt_drops.packets += 1;
        m.pkt_drops.bytes += len;
        m.pkt_drops.latest_state = state;
        m.pkt_drops.latest_flags = flags;
        m.pkt_drops.latest_drop_cause = drop_reason;
    };

    if map.update_if_present(shard, &ingress_key, apply) {
        return Ok(());
    }
    if map.update_if_present(shard, &egress_key, apply) {
        return Ok(());
    }

    let mut metrics = FlowMetrics::empty(now);
    apply(&mut metrics);
    if map.insert_if_absent_or_ring(shard, ingress_key, metrics, ring) {
        Ok(())
    } else {
        Err(FlowError::SideChannelMiss)
    }
}
