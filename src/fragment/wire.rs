//! On-wire encoding for fragments and window acknowledgments.
//!
//! A fragment travels as its packed 16-bit [`FragmentHeader`] followed by the
//! raw fragment bytes:
//!
//! `[u16 big-endian: count << 8 | index][fragment payload]`
//!
//! An acknowledgment is a fixed ten-byte record:
//!
//! `[u64 big-endian message id][u8 window base][u8 received mask]`
//!
//! Transports that carry these records decode them once at the boundary and
//! hand the engine named fields.

use bytes::{Buf, BufMut, Bytes, BytesMut};
use thiserror::Error;

use super::{Acknowledgment, FragmentHeader, FragmentIndex, MessageId, WindowMask};

/// Bytes occupied by the packed fragment header.
pub const FRAGMENT_HEADER_LEN: usize = std::mem::size_of::<u16>();

/// Bytes occupied by an encoded acknowledgment.
pub const ACKNOWLEDGMENT_LEN: usize = std::mem::size_of::<u64>() + 2;

/// Errors raised while decoding wire records.
#[derive(Clone, Copy, Debug, Error, PartialEq, Eq)]
pub enum WireError {
    /// The buffer ended before the fixed-size prefix.
    #[error("truncated record: needed {needed} bytes, found {available}")]
    Truncated {
        /// Bytes required.
        needed: usize,
        /// Bytes present.
        available: usize,
    },
}

/// Encode a fragment for transport.
#[must_use]
pub fn encode_fragment(header: FragmentHeader, payload: &[u8]) -> Bytes {
    let mut buf = BytesMut::with_capacity(FRAGMENT_HEADER_LEN + payload.len());
    buf.put_u16(header.to_packed());
    buf.put_slice(payload);
    buf.freeze()
}

/// Split an encoded fragment into its header and payload.
///
/// # Errors
///
/// Returns [`WireError::Truncated`] when `frame` is shorter than the header.
pub fn decode_fragment(mut frame: Bytes) -> Result<(FragmentHeader, Bytes), WireError> {
    ensure_len(&frame, FRAGMENT_HEADER_LEN)?;
    let header = FragmentHeader::from_packed(frame.get_u16());
    Ok((header, frame))
}

/// Encode a window acknowledgment.
#[must_use]
pub fn encode_acknowledgment(ack: &Acknowledgment) -> Bytes {
    let mut buf = BytesMut::with_capacity(ACKNOWLEDGMENT_LEN);
    buf.put_u64(ack.message_id.get());
    buf.put_u8(ack.window_base.get());
    buf.put_u8(ack.received.bits());
    buf.freeze()
}

/// Decode a window acknowledgment.
///
/// Trailing bytes after the fixed record are ignored.
///
/// # Errors
///
/// Returns [`WireError::Truncated`] when `record` is shorter than
/// [`ACKNOWLEDGMENT_LEN`].
pub fn decode_acknowledgment(mut record: &[u8]) -> Result<Acknowledgment, WireError> {
    ensure_len(record, ACKNOWLEDGMENT_LEN)?;
    Ok(Acknowledgment {
        message_id: MessageId::new(record.get_u64()),
        window_base: FragmentIndex::new(record.get_u8()),
        received: WindowMask::from_bits(record.get_u8()),
    })
}

fn ensure_len(buf: &[u8], needed: usize) -> Result<(), WireError> {
    if buf.len() < needed {
        return Err(WireError::Truncated {
            needed,
            available: buf.len(),
        });
    }
    Ok(())
}
