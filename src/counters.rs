use std::sync::atomic::{AtomicU64, Ordering};

// COUNTERS
//
// §6's six userspace-visible counters. Each is a plain per-process u64;
// the per-CPU summing the spec describes is a property of the kernel-side
// implementation this crate stands in for, so a single atomic per counter
// is globally visible without a separate read-time merge pass.
//
//   Counters - holds all six, Default-constructible, Send+Sync

#[derive(Debug, Default)]
pub struct Counters {
    hashmap_flows_dropped: AtomicU64,
    hashmap_fail_update_dns: AtomicU64,
    network_events_good: AtomicU64,
    network_events_err: AtomicU64,
    network_events_err_groupid_mismatch: AtomicU64,
    network_events_err_update_map_flows: AtomicU64,
}

macro_rules! counter_accessors {
    ($field:ident, $inc:ident, $get:ident) => {
        pub fn $inc(&self) {
            self.$field.fetch_add(1, Ordering::Relaxed);
        }
        pub fn $get(&self) -> u64 {
            self.$field.load(Ordering::Relaxed)
        }
    };
}

impl Counters {
    counter_accessors!(hashmap_flows_dropped, inc_hashmap_flows_dropped, hashmap_flows_dropped);
    counter_accessors!(hashmap_fail_update_dns, inc_hashmap_fail_update_dns, hashmap_fail_update_dns);
    counter_accessors!(network_events_good, inc_network_events_good, network_events_good);
    counter_accessors!(network_events_err, inc_network_events_err, network_events_err);
    counter_accessors!(network_events_err_groupid_mismatch,
                        inc_network_events_err_groupid_mismatch,
                        network_events_err_groupid_mismatch);
    counter_accessors!(network_events_err_update_map_flows,
                        inc_network_events_err_update_map_flows,
                        network_events_err_update_map_flows);
}

#[cfg(test)]
mod selftest {
    use super::*;

    #[test]
    fn counters_start_at_zero_and_increment() {
        let c = Counters::default();
        assert_eq!(c.hashmap_flows_dropped(), 0);
        c.inc_hashmap_flows_dropped();
        c.inc_hashmap_flows_dropped();
        assert_eq!(c.hashmap_flows_dropped(), 2);
        assert_eq!(c.network_events_good(), 0);
    }
}
