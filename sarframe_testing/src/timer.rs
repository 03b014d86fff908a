//! Timer service driven by the test instead of a clock.

use std::time::Duration;

use sarframe::fragment::{IdleTimeout, Timer, TimerHandle};

/// [`Timer`] whose timers expire only when [`ManualTimer::fire_next`] or
/// [`ManualTimer::fire_all`] is called.
#[derive(Debug, Default)]
pub struct ManualTimer {
    next_handle: u64,
    pending: Vec<(TimerHandle, Duration, IdleTimeout)>,
    cancelled: usize,
}

impl ManualTimer {
    /// Number of armed timers.
    #[must_use]
    pub fn pending_len(&self) -> usize { self.pending.len() }

    /// Number of cancellations received.
    #[must_use]
    pub fn cancelled_len(&self) -> usize { self.cancelled }

    /// Delays of the armed timers, oldest first.
    #[must_use]
    pub fn delays(&self) -> Vec<Duration> { self.pending.iter().map(|(_, d, _)| *d).collect() }

    /// Expire the oldest armed timer.
    pub fn fire_next(&mut self) -> Option<IdleTimeout> {
        if self.pending.is_empty() {
            return None;
        }
        let (_, _, token) = self.pending.remove(0);
        Some(token)
    }

    /// Expire every armed timer, oldest first.
    pub fn fire_all(&mut self) -> Vec<IdleTimeout> {
        self.pending.drain(..).map(|(_, _, token)| token).collect()
    }
}

impl Timer for ManualTimer {
    fn schedule(&mut self, delay: Duration, token: IdleTimeout) -> TimerHandle {
        self.next_handle += 1;
        let handle = TimerHandle::new(self.next_handle);
        self.pending.push((handle, delay, token));
        handle
    }

    fn cancel(&mut self, handle: TimerHandle) {
        self.pending.retain(|(pending, _, _)| *pending != handle);
        self.cancelled += 1;
    }
}
