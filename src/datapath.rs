use tracing::trace;

use super::settings::Settings;
use super::sampler::Sampler;
use super::filter::{Decision, FlowFilter};
use super::aggregation_map::{AggregationMap, UpdateOutcome};
use super::ring::Ring;
use super::counters::Counters;
use super::dns_tracker::{self, DnsTracker};
use super::rtt_tracker::RttTracker;
use super::parser::{self, Parsed};
use super::flow_key::Direction;
use super::errors::{FlowError, Result};
use super::tcp;
use super::ipv4;

// MAIN DATAPATH HOOK
//
// The single entry point C1/C2/C3/C6/C7/C4 are wired into, grounded
// directly on the original's `flow_monitor(skb, direction)`: one function
// handling both directions rather than a pipeline of linked apps, because
// that's what the source this was distilled from actually does. Runs to
// completion for every admitted packet, never suspends, never takes a
// blocking lock (§5).
//
//   Datapath - owns C2..C7, borrows C4/C5/Counters for the duration of a call
//   Datapath::new(settings, shards)
//   Datapath.observe(raw, if_index, direction, shard, now, map, ring, filter, counters)
//   Datapath.sampler() -> &Sampler - shared with C8/C9 so side channels
//       can honor the same sampled-out windows as the packet path (§4.2)

pub struct Datapath {
    settings: Settings,
    sampler: Sampler,
    dns: DnsTracker,
    rtt: RttTracker,
}

impl Datapath {
    pub fn new(settings: Settings, shards: usize) -> Datapath {
        let sampling = settings.sampling;
        Datapath {
            settings,
            sampler: Sampler::new(sampling, shards),
            dns: DnsTracker::new(),
            rtt: RttTracker::new(),
        }
    }

    pub fn sampler(&self) -> &Sampler {
        &self.sampler
    }

    #[allow(clippy::too_many_arguments)]
    pub fn observe(
        &self,
        raw: &[u8],
        if_index: u32,
        direction: Direction,
        shard: usize,
        now: u64,
        map: &AggregationMap,
        secondary: &AggregationMap,
        ring: &Ring,
        filter: &dyn FlowFilter,
        counters: &Counters,
    ) -> Result<()> {
        // C2: sampler
        if !self.sampler.admit(shard) {
            return Ok(());
        }

        // C1: parser
        let Parsed { key, flags, dscp } = parser::parse(raw, if_index, direction)?;

        // C3: flow filter, pre-parse-commit gate
        if let Decision::Skip = filter.evaluate(&key, flags, None) {
            return Err(FlowError::FilteredOut);
        }

        // C6: DNS tracker, in-line
        if self.settings.enable_dns_tracking
            && key.transport_protocol == ipv4::PROTOCOL_UDP
            && (key.src_port == 53 || key.dst_port == 53)
        {
            if let Some(payload) = parser::udp_payload(raw, &key) {
                if let Some(dns) = dns_tracker::parse_dns_header(payload) {
                    if key.dst_port == 53 {
                        self.dns.observe_query(&key, dns, now);
                    } else {
                        let _ = self.dns.observe_response(
                            &key, dns, now, map, secondary, shard, ring, counters,
                        );
                    }
                }
            }
        }

        // C7: RTT tracker, in-line. The computed RTT (if any) only matters
        // if this packet is the one that inserts the flow below: flow_rtt
        // latches to the first observation and is never touched again.
        let mut initial_rtt = 0u64;
        if self.settings.enable_rtt && key.transport_protocol == ipv4::PROTOCOL_TCP {
            let is_syn = flags & tcp::FLAG_SYN != 0 && flags & tcp::FLAG_ACK == 0;
            let is_ack = flags & tcp::FLAG_ACK != 0;
            if direction == Direction::Egress && is_syn {
                if let Some(seq) = syn_seq(raw, &key) {
                    self.rtt.observe_egress_syn(&key, seq, now);
                }
            } else if direction == Direction::Ingress && is_ack {
                if let Some(ack_seq) = ack_seq(raw, &key) {
                    if let Some(rtt) = self.rtt.observe_ingress_ack(&key, ack_seq, now) {
                        initial_rtt = rtt;
                    }
                }
            }
        }

        // C4: aggregation map update-or-insert
        let len = raw.len() as u64;
        match map.update_or_insert(shard, key, len, now, flags, dscp, initial_rtt, ring, counters) {
            UpdateOutcome::Updated | UpdateOutcome::Inserted => Ok(()),
            UpdateOutcome::Overflowed => {
                trace!(if_index, "flow map at capacity, emitted overflow record");
                Err(FlowError::MapFull)
            }
            UpdateOutcome::RingDropped => {
                trace!(if_index, "overflow ring full, dropping record");
                Err(FlowError::RingFull)
            }
        }
    }
}

fn syn_seq(raw: &[u8], key: &super::flow_key::FlowKey) -> Option<u32> {
    parser::tcp_header(raw, key).map(|h| h.seq())
}

fn ack_seq(raw: &[u8], key: &super::flow_key::FlowKey) -> Option<u32> {
    parser::tcp_header(raw, key).map(|h| h.ack_seq())
}
