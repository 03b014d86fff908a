//! Zero-based fragment positioning within fragmented messages.
//!
//! Provides [`FragmentIndex`], a type-safe wrapper around `u8`. The wire
//! metadata reserves a single byte for the index, which caps a message at
//! [`MAX_FRAGMENTS`] fragments.

use std::num::TryFromIntError;

use derive_more::{Display, From};

/// Largest number of fragments a single message may be split into.
pub const MAX_FRAGMENTS: usize = u8::MAX as usize;

/// Zero-based ordinal describing a fragment's position within its message.
///
/// # Examples
///
/// ```
/// use sarframe::fragment::FragmentIndex;
/// let index = FragmentIndex::new(3);
/// assert_eq!(index.get(), 3);
/// assert_eq!(index.checked_add(2), Some(FragmentIndex::new(5)));
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Display, From)]
#[display("{_0}")]
pub struct FragmentIndex(u8);

impl FragmentIndex {
    /// Construct an index from a `u8` value.
    #[must_use]
    pub const fn new(value: u8) -> Self { Self(value) }

    /// Return the first valid fragment index.
    #[must_use]
    pub const fn zero() -> Self { Self(0) }

    /// Return the underlying numeric value.
    #[must_use]
    pub const fn get(self) -> u8 { self.0 }

    /// Return the index as a `usize` for offset arithmetic.
    #[must_use]
    pub const fn as_usize(self) -> usize { self.0 as usize }

    /// Advance the index by `step`, returning `None` on overflow.
    #[must_use]
    pub fn checked_add(self, step: u8) -> Option<Self> { self.0.checked_add(step).map(Self) }

    /// Advance the index by `step`, clamping at `u8::MAX`.
    #[must_use]
    pub const fn saturating_add(self, step: u8) -> Self { Self(self.0.saturating_add(step)) }
}

impl TryFrom<usize> for FragmentIndex {
    type Error = TryFromIntError;

    fn try_from(value: usize) -> Result<Self, Self::Error> { u8::try_from(value).map(Self) }
}

impl From<FragmentIndex> for u8 {
    fn from(value: FragmentIndex) -> Self { value.0 }
}
