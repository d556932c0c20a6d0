//! Millisecond timer service
//!
//! A free-running 32-bit millisecond tick, advanced by a 1 ms hardware
//! interrupt, and interval timers computed from the difference between "now"
//! and a stored start tick. All arithmetic is wrapping, so timers stay correct
//! across the ~49.7 day rollover of the tick counter.

use core::sync::atomic::{AtomicU32, Ordering};

/// Source of the current millisecond tick
pub trait TickSource {
    /// Current tick in milliseconds
    fn now(&self) -> u32;
}

impl<T: TickSource + ?Sized> TickSource for &T {
    fn now(&self) -> u32 {
        (**self).now()
    }
}

/// Monotonic millisecond counter shared with the tick interrupt
///
/// The counter is a single atomic word, so reads from the main loop never
/// observe a torn value.
///
/// ```
/// use bacnet_mstp::util::{MillisecondClock, TickSource};
///
/// static CLOCK: MillisecondClock = MillisecondClock::new();
///
/// // from the 1 ms timer interrupt
/// CLOCK.tick();
/// assert_eq!(CLOCK.now(), 1);
/// ```
#[derive(Debug, Default)]
pub struct MillisecondClock {
    ticks: AtomicU32,
}

impl MillisecondClock {
    /// Create a clock starting at tick zero
    pub const fn new() -> Self {
        Self::starting_at(0)
    }

    /// Create a clock starting at an arbitrary tick
    pub const fn starting_at(tick: u32) -> Self {
        Self {
            ticks: AtomicU32::new(tick),
        }
    }

    /// Advance by one millisecond; call from the tick interrupt
    pub fn tick(&self) {
        self.ticks.fetch_add(1, Ordering::Relaxed);
    }

    /// Advance by several milliseconds at once
    pub fn advance(&self, ms: u32) {
        self.ticks.fetch_add(ms, Ordering::Relaxed);
    }
}

impl TickSource for MillisecondClock {
    fn now(&self) -> u32 {
        self.ticks.load(Ordering::Relaxed)
    }
}

/// Interval timer over a [`TickSource`] tick
#[derive(Debug, Default, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct MsTimer {
    start: u32,
    interval: u32,
}

impl MsTimer {
    /// An expired zero-length timer
    pub const fn new() -> Self {
        Self {
            start: 0,
            interval: 0,
        }
    }

    /// Start the timer at `now` with a new interval
    pub fn set(&mut self, now: u32, interval: u32) {
        self.start = now;
        self.interval = interval;
    }

    /// Restart the timer at `now`, keeping the interval
    pub fn reset(&mut self, now: u32) {
        self.start = now;
    }

    /// Force the timer into the expired state
    pub fn expire(&mut self, now: u32) {
        self.start = now.wrapping_sub(self.interval);
    }

    /// Milliseconds since the timer was last set or reset
    pub fn elapsed(&self, now: u32) -> u32 {
        now.wrapping_sub(self.start)
    }

    /// True once the interval has fully elapsed
    pub fn expired(&self, now: u32) -> bool {
        self.elapsed(now) >= self.interval
    }

    /// Milliseconds left before expiry, zero once expired
    pub fn remaining(&self, now: u32) -> u32 {
        self.interval.saturating_sub(self.elapsed(now))
    }

    pub fn interval(&self) -> u32 {
        self.interval
    }
}
