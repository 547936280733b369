use std::fmt;
use std::error::Error;

// ERROR KINDS
//
// None of these are hard failures: every datapath error is recovered,
// degraded, or counted (see counters.rs). They exist so call sites can
// match on what happened without the datapath ever panicking or
// propagating a failure out to the caller.
//
//   FlowError - the error kinds a datapath operation can report
//   Result<T> - shorthand, as nxthdr-sflow-parser does for its ParseError

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowError {
    /// Header malformed or truncated; packet skipped, not accounted.
    Discard,
    /// The flow filter rejected the packet or event.
    FilteredOut,
    /// Map is at capacity; insert fell back to the overflow ring.
    MapFull,
    /// Concurrent-insert race (-EEXIST equivalent) did not resolve on retry.
    KeyConflict,
    /// A side-channel event (DNS/RTT/drop/network-event) found no flow to
    /// attach to and a synthetic insert also failed.
    SideChannelMiss,
    /// The overflow ring itself was full; the record was dropped silently.
    RingFull,
}

impl fmt::Display for FlowError {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        let msg = match self {
            FlowError::Discard => "packet header malformed or truncated",
            FlowError::FilteredOut => "rejected by flow filter",
            FlowError::MapFull => "aggregation map at capacity",
            FlowError::KeyConflict => "concurrent insert conflict did not resolve",
            FlowError::SideChannelMiss => "side channel could not attach to a flow",
            FlowError::RingFull => "overflow ring is full",
        };
        write!(f, "{}", msg)
    }
}

impl Error for FlowError {}

pub type Result<T> = std::result::Result<T, FlowError>;
