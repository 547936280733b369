use super::header;

use std::net;
use std::str::FromStr;

// IPv6
//
// Fixed 40-byte IPv6 header. The original datapath's `fill_ip6hdr` copies
// `saddr`/`daddr` straight into the Flow Key with no address mapping (the
// `::ffff:0:0/96` IPv4-in-IPv6 convention only applies to IPv4 traffic, see
// flow_key.rs); this module exists purely because the teacher never carried
// IPv6 support.
//
//   Address - [u8; 16]
//   ntop(&Address) -> String
//   pton(&str) -> Address
//   IPv6 - struct for IPv6 headers
//   Header<IPv6>.traffic_class() -> u8 - DSCP + ECN byte
//   Header<IPv6>.payload_length() -> u16
//   Header<IPv6>.next_header() -> u8 - upper-layer protocol (same id space as
//       IPv4's `protocol` field; ignores any extension header chain)
//   Header<IPv6>.hop_limit() -> u8
//   Header<IPv6>.src()/.dst() -> Address

pub type Address = [u8; 16];

pub fn ntop(address: &Address) -> String {
    net::Ipv6Addr::from(*address).to_string()
}

pub fn pton(string: &str) -> Address {
    net::Ipv6Addr::from_str(string).unwrap().octets()
}

#[repr(C, packed)]
#[derive(Default)]
pub struct IPv6 {
    version_tc_flowlabel: u32,
    payload_length: u16,
    next_header: u8,
    hop_limit: u8,
    src: Address,
    dst: Address
}

impl header::Header<IPv6> {

    pub fn traffic_class(&self) -> u8 {
        (u32::from_be(self.header_ref().version_tc_flowlabel) >> 20) as u8
    }

    pub fn dscp(&self) -> u8 {
        (self.traffic_class() >> 2) & 0x3f
    }

    pub fn payload_length(&self) -> u16 {
        u16::from_be(self.header_ref().payload_length)
    }

    pub fn next_header(&self) -> u8 {
        self.header_ref().next_header
    }

    pub fn hop_limit(&self) -> u8 {
        self.header_ref().hop_limit
    }

    pub fn src(&self) -> &Address {
        &self.header_ref().src
    }

    pub fn dst(&self) -> &Address {
        &self.header_ref().dst
    }

}

#[cfg(test)]
mod selftest {
    use super::*;

    #[test]
    fn parses_fixed_header() {
        let mut mem: [u8; 40] = [0; 40];
        mem[0] = 0x6d; // version=6, tc high nibble=0xd
        mem[1] = 0x80; // tc low nibble=8 -> traffic_class=0xd8
        mem[4] = 0x00; mem[5] = 0x14; // payload_length=20
        mem[6] = 0x06; // next_header=TCP
        mem[7] = 64;   // hop_limit
        mem[8..24].copy_from_slice(&pton("2001:db8::1"));
        mem[24..40].copy_from_slice(&pton("2001:db8::2"));

        let ip6 = header::from_mem::<IPv6>(&mut mem).unwrap();
        assert_eq!(ip6.traffic_class(), 0xd8);
        assert_eq!(ip6.payload_length(), 20);
        assert_eq!(ip6.next_header(), 6);
        assert_eq!(ip6.hop_limit(), 64);
        assert_eq!(ntop(ip6.src()), "2001:db8::1");
        assert_eq!(ntop(ip6.dst()), "2001:db8::2");
    }

    #[test]
    fn truncated_header_is_discard() {
        let mut mem: [u8; 20] = [0; 20];
        assert!(header::from_mem::<IPv6>(&mut mem).is_none());
    }
}
