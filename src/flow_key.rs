use serde::{Serialize, Deserialize};

use super::ethernet::MacAddress;

// FLOW KEY
//
// The stable, byte-packed identifier of a flow. Two packets with an equal
// FlowKey (including `if_index` and `direction`) belong to the same
// aggregation-map entry.
//
//   Direction - INGRESS/EGRESS/UNKNOWN (side-channel inserts)
//   FlowKey - the identifier itself
//   FlowKey::ipv4(..)/::ipv6(..) - constructors that take care of the
//       ::ffff:0:0/96 IPv4-in-IPv6 address mapping

pub type IpAddress = [u8; 16];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum Direction {
    Ingress = 0,
    Egress = 1,
    Unknown = 255,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct FlowKey {
    pub eth_protocol: u16,
    pub src_mac: MacAddress,
    pub dst_mac: MacAddress,
    pub src_ip: IpAddress,
    pub dst_ip: IpAddress,
    pub src_port: u16,
    pub dst_port: u16,
    pub transport_protocol: u8,
    pub if_index: u32,
    pub direction: Direction,
}

// The canonical IPv4-in-IPv6 mapping used throughout the Flow Key: the high
// 96 bits are the well-known ::ffff:0:0/96 prefix, the low 32 bits are the
// IPv4 address in network byte order.
pub fn map_ipv4(addr: u32) -> IpAddress {
    let mut mapped: IpAddress = [0; 16];
    mapped[10] = 0xff;
    mapped[11] = 0xff;
    mapped[12..16].copy_from_slice(&addr.to_ne_bytes());
    mapped
}

impl FlowKey {
    // A FlowKey with the direction-independent fields preserved and
    // `direction` forced to Unknown; used to join secondary-map (DNS) and
    // primary-map records that share everything but direction (§4.6, §4.10).
    pub fn with_unknown_direction(&self) -> FlowKey {
        let mut k = *self;
        k.direction = Direction::Unknown;
        k
    }

    pub fn reversed(&self) -> FlowKey {
        FlowKey {
            eth_protocol: self.eth_protocol,
            src_mac: self.dst_mac,
            dst_mac: self.src_mac,
            src_ip: self.dst_ip,
            dst_ip: self.src_ip,
            src_port: self.dst_port,
            dst_port: self.src_port,
            transport_protocol: self.transport_protocol,
            if_index: self.if_index,
            direction: match self.direction {
                Direction::Ingress => Direction::Egress,
                Direction::Egress => Direction::Ingress,
                Direction::Unknown => Direction::Unknown,
            },
        }
    }
}
