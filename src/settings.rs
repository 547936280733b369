use serde::Deserialize;

// SETTINGS
//
// Read-mostly configuration, set once at construction time (§6). Parsing a
// config file or argv into this struct is out of scope here; an embedding
// application builds one however it likes and deserialization is provided
// for convenience.

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// 1-in-N admission; 0 or 1 admits every packet.
    pub sampling: u32,
    /// Verbose datapath diagnostics via `tracing`.
    pub trace_messages: bool,
    pub enable_rtt: bool,
    pub enable_dns_tracking: bool,
    pub enable_pkt_drops: bool,
    pub enable_network_events_monitoring: bool,
    pub network_events_monitoring_groupid: i32,
    /// Per-shard aggregation map capacity (§4.4, default 1000).
    pub map_capacity: usize,
}

impl Default for Settings {
    fn default() -> Settings {
        Settings {
            sampling: 1,
            trace_messages: false,
            enable_rtt: true,
            enable_dns_tracking: true,
            enable_pkt_drops: true,
            enable_network_events_monitoring: true,
            network_events_monitoring_groupid: 0,
            map_capacity: 1000,
        }
    }
}
