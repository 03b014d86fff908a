//! Contract between the engine and the point-to-point packet transport.
//!
//! The transport moves single fragments between nodes and reports whether
//! each one was delivered. It is consumed through the [`Transport`] trait;
//! the types in this module are the values that cross that boundary.

use std::fmt;

use bytes::Bytes;
use thiserror::Error;

use super::{FragmentHeader, FragmentIndex, MessageId, WindowMask};

/// Failure reported by the transport, either synchronously from
/// [`Transport::send_fragment`] or later through a [`DeliveryReport`].
#[derive(Clone, Debug, Error, PartialEq, Eq)]
pub enum TransportError {
    /// No route to the destination is known.
    #[error("no route to destination")]
    NoRoute,
    /// The transport cannot accept more packets right now.
    #[error("transport busy")]
    Busy,
    /// The destination never confirmed receipt.
    #[error("delivery not confirmed")]
    DeliveryFailed,
    /// Any other transport-specific failure.
    #[error("transport error: {0}")]
    Other(String),
}

/// Transport envelope that can be flagged as carrying a fragment.
///
/// The engine reuses the caller's envelope for every fragment of a message and
/// changes nothing on it except the "fragmented" option bit.
pub trait FragmentEnvelope: Clone + fmt::Debug {
    /// Set or clear the "this message is fragmented" option bit.
    fn set_fragmented(&mut self, fragmented: bool);

    /// Whether the "this message is fragmented" option bit is set.
    fn is_fragmented(&self) -> bool;
}

/// Point-to-point packet transport used by both halves of the engine.
pub trait Transport {
    /// Address of a peer node.
    type Address: Clone + PartialEq + fmt::Debug;
    /// Per-packet envelope (headers and options) supplied by the caller.
    type Envelope: FragmentEnvelope;

    /// Largest fragment payload the transport can carry to `destination`.
    fn max_payload_size(&self, destination: &Self::Address, envelope: &Self::Envelope) -> usize;

    /// Hand one fragment to the transport.
    ///
    /// Delivery is confirmed later through
    /// [`SarEngine::on_fragment_delivered`](super::SarEngine::on_fragment_delivered).
    /// The transport must not call back into the engine from inside this
    /// method.
    ///
    /// # Errors
    ///
    /// Returns a [`TransportError`] when the fragment cannot be queued.
    fn send_fragment(
        &mut self,
        destination: &Self::Address,
        envelope: &Self::Envelope,
        fragment: OutboundFragment<'_>,
    ) -> Result<(), TransportError>;

    /// Send a window acknowledgment back to the sender of a message.
    ///
    /// # Errors
    ///
    /// Returns a [`TransportError`] when the acknowledgment cannot be queued.
    fn send_acknowledgment(
        &mut self,
        source: &Self::Address,
        envelope: &Self::Envelope,
        ack: Acknowledgment,
    ) -> Result<(), TransportError>;
}

/// One outbound fragment, borrowed from the sending slot's buffer.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct OutboundFragment<'a> {
    message_id: MessageId,
    header: FragmentHeader,
    offset: usize,
    payload: &'a [u8],
}

impl<'a> OutboundFragment<'a> {
    pub(crate) fn new(
        message_id: MessageId,
        header: FragmentHeader,
        offset: usize,
        payload: &'a [u8],
    ) -> Self {
        Self {
            message_id,
            header,
            offset,
            payload,
        }
    }

    /// Message the fragment belongs to.
    #[must_use]
    pub const fn message_id(&self) -> MessageId { self.message_id }

    /// Fragment count and index metadata.
    #[must_use]
    pub const fn header(&self) -> FragmentHeader { self.header }

    /// Byte offset of the payload within the whole message.
    #[must_use]
    pub const fn offset(&self) -> usize { self.offset }

    /// Fragment payload bytes.
    #[must_use]
    pub const fn payload(&self) -> &'a [u8] { self.payload }
}

/// One inbound fragment as decoded at the transport boundary.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct InboundFragment<A, E> {
    /// Sender of the fragment.
    pub source: A,
    /// Envelope the fragment arrived in; reused for the acknowledgment.
    pub envelope: E,
    /// Sender-assigned message identifier.
    pub message_id: MessageId,
    /// Fragment count and index metadata.
    pub header: FragmentHeader,
    /// Fragment payload bytes.
    pub payload: Bytes,
}

/// Transport confirmation (or failure) for one previously sent fragment.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct DeliveryReport {
    /// Message the fragment belonged to.
    pub message_id: MessageId,
    /// Index of the confirmed fragment.
    pub fragment_index: FragmentIndex,
    /// Delivery outcome.
    pub status: Result<(), TransportError>,
}

impl DeliveryReport {
    /// Report a successful delivery.
    #[must_use]
    pub const fn delivered(message_id: MessageId, fragment_index: FragmentIndex) -> Self {
        Self {
            message_id,
            fragment_index,
            status: Ok(()),
        }
    }

    /// Report a failed delivery.
    #[must_use]
    pub const fn failed(
        message_id: MessageId,
        fragment_index: FragmentIndex,
        error: TransportError,
    ) -> Self {
        Self {
            message_id,
            fragment_index,
            status: Err(error),
        }
    }
}

/// Window acknowledgment returned to a sender.
///
/// `received` carries the receiver's window mask, padding bits included, so a
/// sender can tell a complete window from the single comparison
/// `received.is_full()`.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Acknowledgment {
    /// Message being acknowledged.
    pub message_id: MessageId,
    /// First fragment index of the acknowledged window.
    pub window_base: FragmentIndex,
    /// Fragments of the window received so far.
    pub received: WindowMask,
}
