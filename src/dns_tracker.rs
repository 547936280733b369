use dashmap::DashMap;

use super::flow_key::FlowKey;
use super::flow_metrics::FlowMetrics;
use super::aggregation_map::AggregationMap;
use super::ring::Ring;
use super::counters::Counters;
use super::errors::{FlowError, Result};

// DNS TRACKER (C6)
//
// Correlates DNS request/response pairs observed on UDP/53. Keyed on the
// direction-independent 4-tuple plus the DNS transaction id, so a query's
// egress 5-tuple matches its response's (reversed) ingress 5-tuple.
//
//   DnsHeader - the 4 bytes this tracker actually looks at
//   parse_dns_header(payload) -> Option<DnsHeader>
//   DnsTracker::new()
//   DnsTracker.observe_query(key, dns, now)
//   DnsTracker.observe_response(key, dns, now, primary, secondary, shard, secondary_ring, counters)
//       writes dns_record.errno from the response's RCODE (0 = no error)

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct DnsHeader {
    pub id: u16,
    pub flags: u16,
}

impl DnsHeader {
    // The low 4 bits of the DNS header's flags word are RCODE: 0 = no
    // error, nonzero = NXDOMAIN/SERVFAIL/etc. Surfaced on dns_record.errno
    // so a failed resolution is visible without re-parsing the payload.
    pub fn rcode(&self) -> i32 {
        (self.flags & 0x000f) as i32
    }
}

pub fn parse_dns_header(payload: &[u8]) -> Option<DnsHeader> {
    if payload.len() < 4 { return None; }
    Some(DnsHeader {
        id: u16::from_be_bytes([payload[0], payload[1]]),
        flags: u16::from_be_bytes([payload[2], payload[3]]),
    })
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
struct PendingKey {
    src_ip: [u8; 16],
    dst_ip: [u8; 16],
    src_port: u16,
    dst_port: u16,
    dns_id: u16,
}

impl PendingKey {
    fn from_query(key: &FlowKey, dns_id: u16) -> PendingKey {
        PendingKey {
            src_ip: key.src_ip, dst_ip: key.dst_ip,
            src_port: key.src_port, dst_port: key.dst_port,
            dns_id,
        }
    }

    // The response arrives with source/destination swapped relative to the
    // query that it answers.
    fn from_response(key: &FlowKey, dns_id: u16) -> PendingKey {
        PendingKey {
            src_ip: key.dst_ip, dst_ip: key.src_ip,
            src_port: key.dst_port, dst_port: key.src_port,
            dns_id,
        }
    }
}

pub struct DnsTracker {
    pending: DashMap<PendingKey, u64>,
}

impl DnsTracker {
    pub fn new() -> DnsTracker {
        DnsTracker { pending: DashMap::new() }
    }

    pub fn observe_query(&self, key: &FlowKey, dns: DnsHeader, now: u64) {
        self.pending.insert(PendingKey::from_query(key, dns.id), now);
    }

    /// On a hit this also writes `dns_record` onto the owning flow, either
    /// in the primary map (flow already exists) or, per §4.6, into a
    /// secondary map under `direction=Unknown, if_index=0` when it doesn't.
    #[allow(clippy::too_many_arguments)]
    pub fn observe_response(
        &self,
        key: &FlowKey,
        dns: DnsHeader,
        now: u64,
        primary: &AggregationMap,
        secondary: &AggregationMap,
        shard: usize,
        secondary_ring: &Ring,
        counters: &Counters,
    ) -> Result<()> {
        let (_, send_ts) = match self.pending.remove(&PendingKey::from_response(key, dns.id)) {
            Some(entry) => entry,
            None => return Ok(()), // response to a query we never observed
        };
        let latency_ns = now.saturating_sub(send_ts);

        if primary.update_if_present(shard, key, |m| {
            m.dns_record.id = dns.id;
            m.dns_record.flags = dns.flags;
            m.dns_record.latency_ns = latency_ns;
            m.dns_record.errno = dns.rcode();
        }) {
            return Ok(());
        }

        let mut secondary_key = key.with_unknown_direction();
        secondary_key.if_index = 0;
        let mut metrics = FlowMetrics::empty(now);
        metrics.dns_record.id = dns.id;
        metrics.dns_record.flags = dns.flags;
        metrics.dns_record.latency_ns = latency_ns;
        metrics.dns_record.errno = dns.rcode();

        if !secondary.insert_if_absent_or_ring(shard, secondary_key, metrics, secondary_ring) {
            counters.inc_hashmap_fail_update_dns();
            return Err(FlowError::SideChannelMiss);
        }
        Ok(())
    }
}

impl Default for DnsTracker {
    fn default() -> DnsTracker { DnsTracker::new() }
}
