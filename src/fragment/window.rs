//! Sliding-window bookkeeping shared by both halves of the engine.
//!
//! A window is a contiguous run of at most [`WindowSize::MAX`] fragment
//! indices. [`WindowMask`] records one bit per index within the current
//! window. Bits that do not correspond to a real fragment (beyond the window
//! size, or beyond the end of the message in its final window) are pre-set so
//! that "every fragment accounted for" is a single comparison.

use std::fmt;

use serde::{Deserialize, Serialize};

use super::{ConfigError, FragmentIndex};

/// Number of fragments that may be in flight (or accepted) per window.
///
/// # Examples
///
/// ```
/// use sarframe::fragment::WindowSize;
/// assert_eq!(WindowSize::new(4).map(WindowSize::get), Some(4));
/// assert!(WindowSize::new(0).is_none());
/// assert!(WindowSize::new(9).is_none());
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(try_from = "u8", into = "u8")]
pub struct WindowSize(u8);

impl WindowSize {
    /// Largest supported window; one bit per fragment in a `u8` mask.
    pub const MAX: u8 = 8;

    /// Window of a single fragment: each fragment is confirmed before the
    /// next one is sent.
    pub const ONE: Self = Self(1);

    /// Create a window size, returning `None` outside `1..=8`.
    #[must_use]
    pub const fn new(value: u8) -> Option<Self> {
        if value == 0 || value > Self::MAX {
            None
        } else {
            Some(Self(value))
        }
    }

    /// Return the number of fragments per window.
    #[must_use]
    pub const fn get(self) -> u8 { self.0 }

    /// Number of fragments of a message with `fragment_count` fragments that
    /// fall in the window starting at `base`.
    #[must_use]
    pub fn fragments_in_window(self, base: FragmentIndex, fragment_count: Option<u8>) -> u8 {
        fragment_count.map_or(self.0, |count| {
            count.saturating_sub(base.get()).min(self.0)
        })
    }

    /// Whether `index` falls inside the window starting at `base`.
    #[must_use]
    pub fn contains(self, base: FragmentIndex, index: FragmentIndex) -> bool {
        index >= base && u16::from(index.get()) < u16::from(base.get()) + u16::from(self.0)
    }
}

impl Default for WindowSize {
    fn default() -> Self { Self::ONE }
}

impl TryFrom<u8> for WindowSize {
    type Error = ConfigError;

    fn try_from(value: u8) -> Result<Self, Self::Error> {
        Self::new(value).ok_or(ConfigError::InvalidWindowSize { value })
    }
}

impl From<WindowSize> for u8 {
    fn from(value: WindowSize) -> Self { value.0 }
}

/// One bit per fragment slot of the current window.
///
/// # Examples
///
/// ```
/// use sarframe::fragment::WindowMask;
/// // Only two fragments exist in this window; the other six bits are pre-set.
/// let mut mask = WindowMask::open(2);
/// assert!(mask.insert(0));
/// assert!(!mask.is_full());
/// assert!(mask.insert(1));
/// assert!(mask.is_full());
/// ```
#[derive(Clone, Copy, Default, PartialEq, Eq, Hash)]
pub struct WindowMask(u8);

impl WindowMask {
    /// Mask with no bits set.
    #[must_use]
    pub const fn empty() -> Self { Self(0) }

    /// Mask for a fresh window holding `present` real fragments.
    #[must_use]
    pub const fn open(present: u8) -> Self { Self(Self::padding(present)) }

    /// Reconstruct a mask from its raw bits.
    #[must_use]
    pub const fn from_bits(bits: u8) -> Self { Self(bits) }

    /// Raw mask bits.
    #[must_use]
    pub const fn bits(self) -> u8 { self.0 }

    /// Re-apply padding after learning that only `present` fragments exist in
    /// this window, keeping every bit already recorded.
    #[must_use]
    pub const fn with_padding(self, present: u8) -> Self { Self(self.0 | Self::padding(present)) }

    /// Whether every bit is set.
    #[must_use]
    pub const fn is_full(self) -> bool { self.0 == u8::MAX }

    /// Whether no bit is set.
    #[must_use]
    pub const fn is_empty(self) -> bool { self.0 == 0 }

    /// Whether the bit at `offset` is set.
    #[must_use]
    pub const fn contains(self, offset: u8) -> bool {
        offset < WindowSize::MAX && self.0 & (1 << offset) != 0
    }

    /// Set the bit at `offset`, returning `true` if it was previously clear.
    pub fn insert(&mut self, offset: u8) -> bool {
        if offset >= WindowSize::MAX || self.contains(offset) {
            return false;
        }
        self.0 |= 1 << offset;
        true
    }

    /// Clear the bit at `offset`, returning `true` if it was previously set.
    pub fn remove(&mut self, offset: u8) -> bool {
        if !self.contains(offset) {
            return false;
        }
        self.0 &= !(1 << offset);
        true
    }

    /// Number of set bits.
    #[must_use]
    pub const fn len(self) -> u32 { self.0.count_ones() }

    const fn padding(present: u8) -> u8 {
        match u8::MAX.checked_shl(present as u32) {
            Some(bits) => bits,
            None => 0,
        }
    }
}

impl fmt::Debug for WindowMask {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result { write!(f, "{:#010b}", self.0) }
}
