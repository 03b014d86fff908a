//! Metric helpers for `sarframe`.
//!
//! This module defines metric names and simple helper functions wrapping the
//! [`metrics`](https://docs.rs/metrics) crate. With the `metrics` feature
//! disabled the helpers compile to no-ops.

#[cfg(feature = "metrics")]
use metrics::counter;

/// Name of the counter tracking fragments handed to the transport.
pub const FRAGMENTS_SENT: &str = "sarframe_fragments_sent_total";
/// Name of the counter tracking finished outbound sends.
pub const SENDS_COMPLETED: &str = "sarframe_sends_completed_total";
/// Name of the counter tracking fully reassembled inbound messages.
pub const MESSAGES_REASSEMBLED: &str = "sarframe_messages_reassembled_total";
/// Name of the counter tracking inbound fragments or reassemblies dropped.
pub const REASSEMBLY_DROPPED: &str = "sarframe_reassembly_dropped_total";

/// Why inbound data was discarded.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DropReason {
    /// No inbound slot was free or reclaimable.
    PoolExhausted,
    /// The fragment fell outside the receive window.
    OutsideWindow,
    /// Fragments of one message were inconsistent.
    ProtocolViolation,
    /// The message did not fit the reassembly buffer.
    Overflow,
    /// The reassembly stalled past its timeout.
    Stalled,
}

impl DropReason {
    /// Label value used for this reason.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::PoolExhausted => "pool_exhausted",
            Self::OutsideWindow => "outside_window",
            Self::ProtocolViolation => "protocol_violation",
            Self::Overflow => "overflow",
            Self::Stalled => "stalled",
        }
    }
}

/// Record a fragment handed to the transport.
pub fn inc_fragments_sent() {
    #[cfg(feature = "metrics")]
    counter!(FRAGMENTS_SENT).increment(1);
}

/// Record a finished outbound send.
pub fn inc_sends_completed(success: bool) {
    #[cfg(feature = "metrics")]
    counter!(SENDS_COMPLETED, "outcome" => if success { "success" } else { "failure" })
        .increment(1);
    #[cfg(not(feature = "metrics"))]
    let _ = success;
}

/// Record a delivered inbound message.
pub fn inc_messages_reassembled() {
    #[cfg(feature = "metrics")]
    counter!(MESSAGES_REASSEMBLED).increment(1);
}

/// Record discarded inbound data.
pub fn inc_reassembly_dropped(reason: DropReason) {
    #[cfg(feature = "metrics")]
    counter!(REASSEMBLY_DROPPED, "reason" => reason.as_str()).increment(1);
    #[cfg(not(feature = "metrics"))]
    let _ = reason;
}
