use serde::{Serialize, Deserialize};

// FLOW METRICS
//
// The accumulated value half of an aggregation-map entry. See tcp.rs for
// the FLAG_* bit positions ORed into `flags`.
//
//   FlowMetrics - the value type
//   PktDrops - drop-tracker substruct
//   DnsRecord - DNS-tracker substruct
//   NETWORK_EVENTS_SLOTS - K, the cookie ring capacity
//   FlowMetrics::new_packet(..) - construct a fresh entry for a first packet
//   FlowMetrics.apply_packet(..) - fold a subsequent packet in
//   FlowMetrics.record_cookie(..) - append a network-event cookie, deduped

pub const NETWORK_EVENTS_SLOTS: usize = 4;
pub const COOKIE_LEN: usize = 8;

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PktDrops {
    pub packets: u32,
    pub bytes: u64,
    pub latest_state: u8,
    pub latest_flags: u16,
    pub latest_drop_cause: u32,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DnsRecord {
    pub id: u16,
    pub flags: u16,
    pub latency_ns: u64,
    pub errno: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FlowMetrics {
    pub packets: u32,
    pub bytes: u64,
    pub start_mono_time_ts: u64,
    pub end_mono_time_ts: u64,
    pub flags: u16,
    pub dscp: u8,
    pub flow_rtt: u64,
    pub pkt_drops: PktDrops,
    pub dns_record: DnsRecord,
    pub network_events: [[u8; COOKIE_LEN]; NETWORK_EVENTS_SLOTS],
    pub network_events_idx: u8,
    pub errno: i32,
}

impl FlowMetrics {
    // A side-channel-only entry (DNS-before-first-packet, drop-only,
    // network-event-only): `packets=0`. §3's "packets >= 1 for any present
    // entry" governs datapath-observed entries; synthetic side-channel
    // inserts are the documented exception (see DESIGN.md open question 1).
    pub fn empty(now: u64) -> FlowMetrics {
        FlowMetrics {
            packets: 0,
            bytes: 0,
            start_mono_time_ts: now,
            end_mono_time_ts: now,
            flags: 0,
            dscp: 0,
            flow_rtt: 0,
            pkt_drops: PktDrops::default(),
            dns_record: DnsRecord::default(),
            network_events: [[0; COOKIE_LEN]; NETWORK_EVENTS_SLOTS],
            network_events_idx: 0,
            errno: 0,
        }
    }

    pub fn new_packet(len: u64, now: u64, flags: u16, dscp: u8, initial_rtt: u64) -> FlowMetrics {
        FlowMetrics {
            packets: 1,
            bytes: len,
            start_mono_time_ts: now,
            end_mono_time_ts: now,
            flags,
            dscp,
            flow_rtt: initial_rtt,
            pkt_drops: PktDrops::default(),
            dns_record: DnsRecord::default(),
            network_events: [[0; COOKIE_LEN]; NETWORK_EVENTS_SLOTS],
            network_events_idx: 0,
            errno: 0,
        }
    }

    // §4.4 hit path: packets += 1, bytes += len, end_ts = now, flags |=,
    // dscp = latest.
    pub fn apply_packet(&mut self, len: u64, now: u64, flags: u16, dscp: u8) {
        self.packets += 1;
        self.bytes += len;
        self.end_mono_time_ts = now;
        self.flags |= flags;
        self.dscp = dscp;
    }

    // §4.9: dedup against the K existing slots, then round-robin replace.
    pub fn record_cookie(&mut self, cookie: &[u8; COOKIE_LEN]) {
        if self.network_events.iter().any(|slot| slot == cookie) {
            return;
        }
        let idx = self.network_events_idx as usize % NETWORK_EVENTS_SLOTS;
        self.network_events[idx] = *cookie;
        self.network_events_idx = ((idx + 1) % NETWORK_EVENTS_SLOTS) as u8;
    }
}
