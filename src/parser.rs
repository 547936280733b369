use super::header;
use super::ethernet::{self, Ethernet};
use super::ipv4::{self, IPv4};
use super::ipv6::IPv6;
use super::tcp::TCP;
use super::udp::UDP;
use super::sctp::SCTP;
use super::icmp::ICMP;
use super::errors::{FlowError, Result};
use super::flow_key::{Direction, FlowKey, map_ipv4};

// PACKET PARSER (C1)
//
// Parses Ethernet/IPv4/IPv6/TCP/UDP/SCTP/ICMP into a Flow Key plus
// per-packet {flags, dscp}. `if_index` and `direction` are supplied by the
// caller (they are properties of the hook the packet arrived on, not of
// the packet itself). Every header access is length-bounded via
// header::from_mem; a truncated header yields `Discard`, matching §4.1.
//
//   Parsed - the per-packet result: Flow Key plus flags/dscp
//   parse(raw, if_index, direction) -> Result<Parsed>

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Parsed {
    pub key: FlowKey,
    pub flags: u16,
    pub dscp: u8,
}

pub fn parse(raw: &[u8], if_index: u32, direction: Direction) -> Result<Parsed> {
    let eth = header::from_mem::<Ethernet>(raw).ok_or(FlowError::Discard)?;
    let l3 = &raw[header::size_of::<Ethernet>()..];

    let mut key = FlowKey {
        eth_protocol: eth.ethertype(),
        src_mac: *eth.src(),
        dst_mac: *eth.dst(),
        src_ip: [0; 16],
        dst_ip: [0; 16],
        src_port: 0,
        dst_port: 0,
        transport_protocol: 0,
        if_index,
        direction,
    };

    // Unknown ethertype: still counted under its L2 identity (§4.1).
    match eth.ethertype() {
        ethernet::TYPE_IPV4 => parse_ipv4(l3, &mut key),
        ethernet::TYPE_IPV6 => parse_ipv6(l3, &mut key),
        _ => Ok(Parsed { key, flags: 0, dscp: 0 }),
    }
}

fn parse_ipv4(l3: &[u8], key: &mut FlowKey) -> Result<Parsed> {
    let ip = header::from_mem::<IPv4>(l3).ok_or(FlowError::Discard)?;
    key.src_ip = map_ipv4(ip.src());
    key.dst_ip = map_ipv4(ip.dst());
    key.transport_protocol = ip.protocol();
    let dscp = ip.dscp();

    let l4_offset = (ip.ihl() as usize) * 4;
    if l4_offset < header::size_of::<IPv4>() || l4_offset > l3.len() {
        return Ok(Parsed { key: *key, flags: 0, dscp });
    }
    let l4 = &l3[l4_offset..];
    let flags = peek_ports_and_flags(l4, ip.protocol(), key);
    Ok(Parsed { key: *key, flags, dscp })
}

fn parse_ipv6(l3: &[u8], key: &mut FlowKey) -> Result<Parsed> {
    let ip = header::from_mem::<IPv6>(l3).ok_or(FlowError::Discard)?;
    key.src_ip = *ip.src();
    key.dst_ip = *ip.dst();
    key.transport_protocol = ip.next_header();
    let dscp = ip.dscp();

    let l4 = &l3[header::size_of::<IPv6>()..];
    let flags = peek_ports_and_flags(l4, ip.next_header(), key);
    Ok(Parsed { key: *key, flags, dscp })
}

// Peeks ports (and, for TCP, flags) without requiring the caller to know
// which protocol it is ahead of time. Truncated L4 headers are tolerated
// (not Discard): the Flow Key is still usable keyed on L3 alone, matching
// the spec's "all header accesses are length-bounded" without turning a
// short TCP options area into a dropped packet.
fn peek_ports_and_flags(l4: &[u8], protocol: u8, key: &mut FlowKey) -> u16 {
    match protocol {
        ipv4::PROTOCOL_TCP => {
            if let Some(tcp) = header::from_mem::<TCP>(l4) {
                key.src_port = tcp.src_port();
                key.dst_port = tcp.dst_port();
                return tcp.flags();
            }
        }
        ipv4::PROTOCOL_UDP => {
            if let Some(udp) = header::from_mem::<UDP>(l4) {
                key.src_port = udp.src_port();
                key.dst_port = udp.dst_port();
            }
        }
        ipv4::PROTOCOL_SCTP => {
            if let Some(sctp) = header::from_mem::<SCTP>(l4) {
                key.src_port = sctp.src_port();
                key.dst_port = sctp.dst_port();
            }
        }
        ipv4::PROTOCOL_ICMP | ICMPV6 => {
            let _ = header::from_mem::<ICMP>(l4); // no ports to extract
        }
        _ => {}
    }
    0
}

const ICMPV6: u8 = super::icmp::PROTOCOL_ICMPV6;

// Re-locates the UDP payload inside `raw` for a packet already parsed into
// `key`. Used by the DNS tracker (C6), which needs the bytes past the UDP
// header rather than just the ports parse() already extracted. Only exact
// for fixed-size IPv4 (no options, matching the IPv4 struct) and fixed
// 40-byte IPv6; returns None rather than guess for anything else.
pub fn udp_payload<'a>(raw: &'a [u8], key: &FlowKey) -> Option<&'a [u8]> {
    let l3 = raw.get(header::size_of::<Ethernet>()..)?;
    let l4 = match key.eth_protocol {
        ethernet::TYPE_IPV4 => {
            let ip = header::from_mem::<IPv4>(l3)?;
            l3.get((ip.ihl() as usize) * 4..)?
        }
        ethernet::TYPE_IPV6 => l3.get(header::size_of::<IPv6>()..)?,
        _ => return None,
    };
    l4.get(header::size_of::<UDP>()..)
}

// Re-locates the TCP header for a packet already parsed into `key`. Used
// by the RTT tracker (C7), which needs `seq`/`ack_seq` that parse() doesn't
// carry in its Parsed result.
pub fn tcp_header(raw: &[u8], key: &FlowKey) -> Option<header::Header<TCP>> {
    let l3 = raw.get(header::size_of::<Ethernet>()..)?;
    let l4 = match key.eth_protocol {
        ethernet::TYPE_IPV4 => {
            let ip = header::from_mem::<IPv4>(l3)?;
            l3.get((ip.ihl() as usize) * 4..)?
        }
        ethernet::TYPE_IPV6 => l3.get(header::size_of::<IPv6>()..)?,
        _ => return None,
    };
    header::from_mem::<TCP>(l4)
}
