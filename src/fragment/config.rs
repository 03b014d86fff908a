//! Configuration bounding the engine's windows, pools, and buffers.

use std::{num::NonZeroUsize, time::Duration};

use serde::{Deserialize, Serialize};

use super::{ConfigError, WindowSize};

const DEFAULT_SLOTS: NonZeroUsize = NonZeroUsize::new(4).expect("4 is non-zero");
const DEFAULT_BUFFER_CAPACITY: NonZeroUsize = NonZeroUsize::new(1024).expect("1024 is non-zero");
const DEFAULT_REASSEMBLY_TIMEOUT: Duration = Duration::from_secs(5);

/// Settings that bound fragment windows and resource usage.
///
/// Every pool and buffer is sized from these values once, when the engine is
/// constructed.
///
/// # Examples
///
/// ```
/// use std::{num::NonZeroUsize, time::Duration};
///
/// use sarframe::fragment::{FragmentationConfig, WindowSize};
///
/// let config = FragmentationConfig::default()
///     .with_window_size(WindowSize::new(4).expect("valid window"))
///     .with_buffer_capacity(NonZeroUsize::new(4096).expect("non-zero"))
///     .with_reassembly_timeout(Duration::from_millis(500));
/// assert_eq!(config.window_size.get(), 4);
/// ```
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct FragmentationConfig {
    /// Fragments sent (or accepted) per window.
    pub window_size: WindowSize,
    /// Maximum concurrent outbound fragmented sends.
    pub max_outbound: NonZeroUsize,
    /// Maximum concurrent inbound reassemblies, completed ones included.
    pub max_inbound: NonZeroUsize,
    /// Capacity of each outbound and inbound message buffer.
    pub buffer_capacity: NonZeroUsize,
    /// Idle time after which a stalled reassembly is abandoned.
    pub reassembly_timeout: Duration,
}

impl Default for FragmentationConfig {
    fn default() -> Self {
        Self {
            window_size: WindowSize::ONE,
            max_outbound: DEFAULT_SLOTS,
            max_inbound: DEFAULT_SLOTS,
            buffer_capacity: DEFAULT_BUFFER_CAPACITY,
            reassembly_timeout: DEFAULT_REASSEMBLY_TIMEOUT,
        }
    }
}

impl FragmentationConfig {
    /// Override the window size.
    #[must_use]
    pub const fn with_window_size(mut self, window_size: WindowSize) -> Self {
        self.window_size = window_size;
        self
    }

    /// Override the outbound and inbound pool sizes.
    #[must_use]
    pub const fn with_slots(mut self, outbound: NonZeroUsize, inbound: NonZeroUsize) -> Self {
        self.max_outbound = outbound;
        self.max_inbound = inbound;
        self
    }

    /// Override the per-message buffer capacity.
    #[must_use]
    pub const fn with_buffer_capacity(mut self, capacity: NonZeroUsize) -> Self {
        self.buffer_capacity = capacity;
        self
    }

    /// Override the reassembly stall timeout.
    #[must_use]
    pub const fn with_reassembly_timeout(mut self, timeout: Duration) -> Self {
        self.reassembly_timeout = timeout;
        self
    }

    /// Check the settings the field types cannot enforce.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::ZeroReassemblyTimeout`] when stalled
    /// reassemblies would be abandoned immediately.
    pub const fn validate(&self) -> Result<(), ConfigError> {
        if self.reassembly_timeout.is_zero() {
            return Err(ConfigError::ZeroReassemblyTimeout);
        }
        Ok(())
    }
}
