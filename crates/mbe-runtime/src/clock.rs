//! Wall-clock pacing for recipes driving real hardware.

#![allow(missing_docs)]

use std::sync::Arc;
use std::thread;
use std::time::{Duration, Instant};

use parking_lot::Mutex;

/// Time source used by recipe waits and convergence polling.
pub trait Clock: Send + Sync + 'static {
    /// Time elapsed since the clock's origin.
    fn now(&self) -> Duration;

    /// Block the calling thread for `duration`.
    fn sleep(&self, duration: Duration);
}

/// Monotonic clock based on `std::time::Instant`.
#[derive(Debug, Clone)]
pub struct StdClock {
    start: Instant,
}

impl StdClock {
    #[must_use]
    pub fn new() -> Self {
        Self {
            start: Instant::now(),
        }
    }
}

impl Default for StdClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for StdClock {
    fn now(&self) -> Duration {
        self.start.elapsed()
    }

    fn sleep(&self, duration: Duration) {
        if !duration.is_zero() {
            thread::sleep(duration);
        }
    }
}

#[derive(Debug, Default)]
struct ManualClockState {
    now: Duration,
    sleep_calls: u64,
}

/// Deterministic clock for tests: sleeping advances time instantly.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    inner: Arc<Mutex<ManualClockState>>,
}

impl ManualClock {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Advance time by the given delta.
    pub fn advance(&self, delta: Duration) -> Duration {
        let mut state = self.inner.lock();
        state.now = state.now.saturating_add(delta);
        state.now
    }

    /// Number of sleep calls issued to this clock.
    #[must_use]
    pub fn sleep_calls(&self) -> u64 {
        self.inner.lock().sleep_calls
    }
}

impl Clock for ManualClock {
    fn now(&self) -> Duration {
        self.inner.lock().now
    }

    fn sleep(&self, duration: Duration) {
        let mut state = self.inner.lock();
        state.sleep_calls = state.sleep_calls.saturating_add(1);
        state.now = state.now.saturating_add(duration);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manual_clock_sleep_advances_time() {
        let clock = ManualClock::new();
        clock.sleep(Duration::from_secs(3));
        clock.advance(Duration::from_millis(500));
        assert_eq!(clock.now(), Duration::from_millis(3500));
        assert_eq!(clock.sleep_calls(), 1);
    }

    #[test]
    fn std_clock_is_monotonic() {
        let clock = StdClock::new();
        let first = clock.now();
        clock.sleep(Duration::from_millis(2));
        assert!(clock.now() >= first + Duration::from_millis(2));
    }
}
