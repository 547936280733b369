use super::flow_key::FlowKey;

// FLOW FILTER (C3)
//
// Rule semantics are out of scope (§4.3): the core contract is that C3 is
// the sole admission gate between C1 and C4, and that the same gate is
// reused for the main datapath *and* both side channels (§S.4) — the
// original's `check_and_do_flow_filtering` is called identically from the
// drops tracker and the network-event tracker. An embedding application
// supplies the rule list by implementing FlowFilter; the default `allow`
// admits everything.
//
//   Decision - Accept or Skip(reason)
//   FlowFilter - user-supplied rule evaluator
//   allow() -> impl FlowFilter - the no-op filter used when none is configured

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Accept,
    Skip,
}

pub trait FlowFilter: Send + Sync {
    /// `drop_reason` is only meaningful when this evaluation is being made
    /// on behalf of a side channel re-evaluating an event (§4.3: "for side
    /// channels it is re-evaluated with the event's drop reason").
    fn evaluate(&self, key: &FlowKey, flags: u16, drop_reason: Option<u32>) -> Decision;
}

pub struct AllowAll;

impl FlowFilter for AllowAll {
    fn evaluate(&self, _key: &FlowKey, _flags: u16, _drop_reason: Option<u32>) -> Decision {
        Decision::Accept
    }
}

pub fn allow() -> AllowAll {
    AllowAll
}

#[cfg(test)]
mod selftest {
    use super::*;
    use crate::flow_key::Direction;

    fn key() -> FlowKey {
        FlowKey {
            eth_protocol: 0x0800,
            src_mac: [0; 6],
            dst_mac: [0; 6],
            src_ip: [0; 16],
            dst_ip: [0; 16],
            src_port: 0,
            dst_port: 0,
            transport_protocol: 6,
            if_index: 1,
            direction: Direction::Egress,
        }
    }

    #[test]
    fn allow_all_accepts_everything() {
        let f = allow();
        assert_eq!(f.evaluate(&key(), 0, None), Decision::Accept);
        assert_eq!(f.evaluate(&key(), 0xff, Some(3)), Decision::Accept);
    }

    struct DenyPort80;
    impl FlowFilter for DenyPort80 {
        fn evaluate(&self, key: &FlowKey, _flags: u16, _drop_reason: Option<u32>) -> Decision {
            if key.dst_port == 80 { Decision::Skip } else { Decision::Accept }
        }
    }

    #[test]
    fn custom_filter_can_skip() {
        let f = DenyPort80;
        let mut k = key();
        k.dst_port = 80;
        assert_eq!(f.evaluate(&k, 0, None), Decision::Skip);
        k.dst_port = 443;
        assert_eq!(f.evaluate(&k, 0, None), Decision::Accept);
    }
}
