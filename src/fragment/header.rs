use super::FragmentIndex;

/// Per-fragment metadata carried outside the payload.
///
/// On the wire the header occupies a single 16-bit field: the high byte holds
/// the total fragment count and the low byte the fragment index. The header is
/// decoded once at the transport boundary and handled as named fields
/// everywhere else.
///
/// # Examples
///
/// ```
/// use sarframe::fragment::{FragmentHeader, FragmentIndex};
/// let header = FragmentHeader::new(3, FragmentIndex::new(2));
/// assert!(header.is_last_fragment());
/// assert_eq!(header.to_packed(), 0x0302);
/// assert_eq!(FragmentHeader::from_packed(0x0302), header);
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct FragmentHeader {
    fragment_count: u8,
    fragment_index: FragmentIndex,
}

impl FragmentHeader {
    /// Create a new fragment header.
    #[must_use]
    pub const fn new(fragment_count: u8, fragment_index: FragmentIndex) -> Self {
        Self {
            fragment_count,
            fragment_index,
        }
    }

    /// Decode a header from its packed 16-bit wire form.
    #[must_use]
    pub const fn from_packed(packed: u16) -> Self {
        let [count, index] = packed.to_be_bytes();
        Self::new(count, FragmentIndex::new(index))
    }

    /// Encode the header into its packed 16-bit wire form.
    #[must_use]
    pub const fn to_packed(self) -> u16 {
        u16::from_be_bytes([self.fragment_count, self.fragment_index.get()])
    }

    /// Total number of fragments in the message.
    #[must_use]
    pub const fn fragment_count(&self) -> u8 { self.fragment_count }

    /// Position of this fragment within the message.
    #[must_use]
    pub const fn fragment_index(&self) -> FragmentIndex { self.fragment_index }

    /// Report whether this is the final fragment of the message.
    #[must_use]
    pub const fn is_last_fragment(&self) -> bool {
        self.fragment_count > 0 && self.fragment_index.get() == self.fragment_count - 1
    }
}
