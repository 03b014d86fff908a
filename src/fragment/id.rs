use derive_more::{Display, From, Into};

/// Identifier for a fragmented message.
///
/// Outbound, it correlates asynchronous delivery reports with the send that
/// produced them. Inbound, together with the sender address, it keys the
/// reassembly slot.
///
/// # Examples
///
/// ```
/// use sarframe::fragment::MessageId;
/// let id = MessageId::new(42);
/// assert_eq!(id.get(), 42);
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Display, From, Into)]
#[display("{_0}")]
pub struct MessageId(u64);

impl MessageId {
    /// Create a new identifier.
    #[must_use]
    pub const fn new(value: u64) -> Self { Self(value) }

    /// Return the inner numeric identifier.
    #[must_use]
    pub const fn get(self) -> u64 { self.0 }
}
