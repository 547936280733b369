use dashmap::DashMap;

use super::flow_key::FlowKey;

// RTT TRACKER (C7)
//
// TCP SYN -> ACK timestamp cache, grounded directly on the original's
// `fill_flow_seq_id`/`calculate_flow_rtt_tcp`: record the SYN's sequence
// number and timestamp on egress, look it up by `ack_seq - 1` on the
// matching ingress ACK. The computed RTT feeds `update_or_insert`'s
// `initial_rtt` argument (§4.4: "construct a new Flow Metrics with ...
// flow_rtt=... if TCP & rtt-enabled") rather than a separate read-modify-
// write against the map — `flow_rtt` only takes effect on the insert path,
// which is exactly how it ends up latched to the first observation (§9
// open question 3: the spec resolves this explicitly).
//
//   RttTracker::new()
//   RttTracker.observe_egress_syn(key, seq, now)
//   RttTracker.observe_ingress_ack(key, ack_seq, now) -> Option<u64>

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct SeqKey {
    src_ip: [u8; 16],
    dst_ip: [u8; 16],
    src_port: u16,
    dst_port: u16,
    seq: u32,
}

impl SeqKey {
    fn forward(key: &FlowKey, seq: u32) -> SeqKey {
        SeqKey {
            src_ip: key.src_ip, dst_ip: key.dst_ip,
            src_port: key.src_port, dst_port: key.dst_port,
            seq,
        }
    }

    // The ACK arrives on the reversed tuple, acknowledging `seq + 1`.
    fn reversed_for_ack(key: &FlowKey, ack_seq: u32) -> SeqKey {
        SeqKey {
            src_ip: key.dst_ip, dst_ip: key.src_ip,
            src_port: key.dst_port, dst_port: key.src_port,
            seq: ack_seq.wrapping_sub(1),
        }
    }
}

pub struct RttTracker {
    flow_sequences: DashMap<SeqKey, u64>,
}

impl RttTracker {
    pub fn new() -> RttTracker {
        RttTracker { flow_sequences: DashMap::new() }
    }

    pub fn observe_egress_syn(&self, key: &FlowKey, seq: u32, now: u64) {
        self.flow_sequences.insert(SeqKey::forward(key, seq), now);
    }

    pub fn observe_ingress_ack(&self, key: &FlowKey, ack_seq: u32, now: u64) -> Option<u64> {
        let (_, sent_ts) = self.flow_sequences.remove(&SeqKey::reversed_for_ack(key, ack_seq))?;
        Some(now.saturating_sub(sent_ts))
    }
}

impl Default for RttTracker {
    fn default() -> RttTracker { RttTracker::new() }
}

#[cfg(test)]
mod selftest {
    use super::*;
    use crate::flow_key::Direction;

    fn egress_key() -> FlowKey {
        FlowKey {
            eth_protocol: 0x0800, src_mac: [0; 6], dst_mac: [0; 6],
            src_ip: [1; 16], dst_ip: [2; 16], src_port: 4000, dst_port: 80,
            transport_protocol: 6, if_index: 1, direction: Direction::Egress,
        }
    }

    fn ingress_key() -> FlowKey {
        let mut k = egress_key();
        std::mem::swap(&mut k.src_ip, &mut k.dst_ip);
        std::mem::swap(&mut k.src_port, &mut k.dst_port);
        k.direction = Direction::Ingress;
        k
    }

    #[test]
    fn syn_then_matching_ack_yields_rtt() {
        let tracker = RttTracker::new();
        tracker.observe_egress_syn(&egress_key(), 100, 1_000_000);
        let rtt = tracker.observe_ingress_ack(&ingress_key(), 101, 3_000_000);
        assert_eq!(rtt, Some(2_000_000));
    }

    #[test]
    fn ack_without_prior_syn_is_a_miss() {
        let tracker = RttTracker::new();
        assert_eq!(tracker.observe_ingress_ack(&ingress_key(), 101, 0), None);
    }

    #[test]
    fn entry_is_consumed_on_first_match() {
        let tracker = RttTracker::new();
        tracker.observe_egress_syn(&egress_key(), 100, 0);
        assert!(tracker.observe_ingress_ack(&ingress_key(), 101, 1_000).is_some());
        // A retransmitted/duplicate ACK finds nothing left to match.
        assert_eq!(tracker.observe_ingress_ack(&ingress_key(), 101, 2_000), None);
    }
}
