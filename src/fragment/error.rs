//! Error types emitted by the segmentation and reassembly engine.
//!
//! The outbound and inbound halves report through separate enums so callers
//! can match on exactly the failures each entry point can produce.

use bincode::error::EncodeError;
use thiserror::Error;

use super::{FragmentIndex, MessageId, TransportError};

/// Errors produced while starting or driving an outbound fragmented send.
#[derive(Debug, Error)]
pub enum FragmentationError {
    /// The message exceeds the buffer capacity or needs more fragments than
    /// the wire metadata can count.
    #[error("message too long: {length} bytes > {limit} bytes")]
    MessageTooLong {
        /// Length of the rejected message.
        length: usize,
        /// Largest length that could have been accepted.
        limit: usize,
    },
    /// Every outbound slot is busy.
    #[error("too many outstanding sends: all {capacity} slots busy")]
    TooManyOutstandingSends {
        /// Number of outbound slots.
        capacity: usize,
    },
    /// The transport reported no room for fragment payload to this destination.
    #[error("transport offers no payload budget for this destination")]
    NoPayloadBudget,
    /// The transport rejected a fragment.
    #[error("transport failure: {0}")]
    Transport(#[from] TransportError),
    /// Serialisation failed before fragmentation.
    #[error("failed to encode message: {0}")]
    Encode(#[from] EncodeError),
}

/// Inconsistency detected between fragments of one inbound message.
#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
pub enum ViolationKind {
    /// A non-final fragment differs in length from the window's first one.
    #[error("fragment length mismatch: expected {expected}, found {found}")]
    LengthMismatch {
        /// Length learned for this window.
        expected: usize,
        /// Length of the offending fragment.
        found: usize,
    },
    /// The final fragment is longer than the regular fragment length.
    #[error("final fragment of {found} bytes exceeds fragment length {limit}")]
    FinalFragmentTooLong {
        /// Length learned for this window.
        limit: usize,
        /// Length of the final fragment.
        found: usize,
    },
    /// The fragment advertised a total count of zero.
    #[error("fragment count must be non-zero")]
    ZeroFragmentCount,
    /// The fragment index lies beyond the advertised count.
    #[error("fragment index {index} outside message of {count} fragments")]
    IndexOutOfRange {
        /// Index carried by the fragment.
        index: FragmentIndex,
        /// Count carried by the fragment.
        count: u8,
    },
    /// Fragments of the same message disagree on the total count.
    #[error("fragment count changed from {expected} to {found}")]
    CountMismatch {
        /// Count learned earlier for this message.
        expected: u8,
        /// Count carried by the offending fragment.
        found: u8,
    },
}

/// Errors produced while reassembling inbound fragments.
#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
pub enum ReassemblyError {
    /// Fragments of one message were inconsistent; the reassembly was
    /// abandoned and its slot freed.
    #[error("protocol violation in message {message_id}: {kind}")]
    ProtocolViolation {
        /// Message whose reassembly was abandoned.
        message_id: MessageId,
        /// What was inconsistent.
        kind: ViolationKind,
    },
    /// Every fragment arrived but the message did not fit the reassembly
    /// buffer, so nothing is delivered.
    #[error("message {message_id} exceeds reassembly capacity: {attempted} bytes > {capacity} bytes")]
    PayloadTooLarge {
        /// Message that overflowed.
        message_id: MessageId,
        /// Buffer end offset first demanded by an overflowing fragment.
        attempted: usize,
        /// Reassembly buffer capacity.
        capacity: usize,
    },
}

/// Errors produced while validating a [`FragmentationConfig`](super::FragmentationConfig).
#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
pub enum ConfigError {
    /// The window size is outside `1..=8`.
    #[error("window size must be between 1 and 8, got {value}")]
    InvalidWindowSize {
        /// Rejected window size.
        value: u8,
    },
    /// The reassembly timeout is zero.
    #[error("reassembly timeout must be non-zero")]
    ZeroReassemblyTimeout,
}
