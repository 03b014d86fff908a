//! Single-shot timer service consumed by the reassembler.

use std::time::Duration;

use derive_more::Display;

/// Opaque handle returned by [`Timer::schedule`].
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Display)]
#[display("timer#{_0}")]
pub struct TimerHandle(u64);

impl TimerHandle {
    /// Wrap a timer-specific handle value.
    #[must_use]
    pub const fn new(value: u64) -> Self { Self(value) }

    /// Return the handle value.
    #[must_use]
    pub const fn get(self) -> u64 { self.0 }
}

/// Token delivered back to
/// [`SarEngine::on_idle_timeout`](super::SarEngine::on_idle_timeout) when a
/// stall timer fires.
///
/// The token names the reassembly slot and the arming epoch; a token whose
/// epoch no longer matches the slot (because the timer was rearmed, or the
/// slot freed and reused) is ignored.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct IdleTimeout {
    pub(crate) slot: usize,
    pub(crate) epoch: u64,
}

/// Single-shot, cancelable timer service.
pub trait Timer {
    /// Arrange for `token` to be handed to the engine after `delay`.
    fn schedule(&mut self, delay: Duration, token: IdleTimeout) -> TimerHandle;

    /// Cancel a pending timer. Cancelling an expired or unknown handle is a
    /// no-op.
    fn cancel(&mut self, handle: TimerHandle);
}
