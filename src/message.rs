//! Typed application messages carried by the engine.
//!
//! The engine moves opaque bytes. [`Message`] lets callers hand it any
//! bincode-encodable value instead, through
//! [`SarEngine::send_message`](crate::fragment::SarEngine::send_message) on
//! the way out and
//! [`ReassembledMessage::decode`](crate::fragment::ReassembledMessage::decode)
//! on the way in.

use bincode::{
    BorrowDecode,
    Encode,
    borrow_decode_from_slice,
    config,
    encode_to_vec,
    error::{DecodeError, EncodeError},
};

/// A typed value that can travel through the engine as one fragmented
/// message.
///
/// Derive [`Encode`] and [`BorrowDecode`] and the blanket implementation
/// below does the rest. Both directions use bincode's standard
/// configuration, so sender and receiver agree without negotiating.
///
/// # Examples
///
/// ```
/// use bincode::{BorrowDecode, Encode};
/// use sarframe::Message;
///
/// #[derive(Debug, PartialEq, Encode, BorrowDecode)]
/// struct Reading {
///     sensor: u16,
///     celsius: i32,
/// }
///
/// let reading = Reading { sensor: 3, celsius: -4 };
/// let bytes = reading.to_bytes().expect("encodes");
/// let (decoded, used) = Reading::from_bytes(&bytes).expect("decodes");
/// assert_eq!(decoded, reading);
/// assert_eq!(used, bytes.len());
/// ```
pub trait Message: Encode + for<'de> BorrowDecode<'de, ()> {
    /// Encode the value into the bytes handed to the fragmenter.
    ///
    /// # Errors
    ///
    /// Returns an [`EncodeError`] if a field cannot be encoded.
    fn to_bytes(&self) -> Result<Vec<u8>, EncodeError> { encode_to_vec(self, config::standard()) }

    /// Decode a value from a reassembled payload.
    ///
    /// Also returns how many bytes were read, so trailing bytes can be
    /// detected by the caller.
    ///
    /// # Errors
    ///
    /// Returns a [`DecodeError`] if the payload is truncated or malformed.
    fn from_bytes(bytes: &[u8]) -> Result<(Self, usize), DecodeError>
    where
        Self: Sized,
    {
        borrow_decode_from_slice(bytes, config::standard())
    }
}

impl<T> Message for T where for<'de> T: Encode + BorrowDecode<'de, ()> {}
