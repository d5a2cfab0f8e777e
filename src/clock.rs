//! Clock abstractions used to evaluate counter expiry.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Clock abstraction so window expiry can be faked in tests.
pub trait Clock: Send + Sync + std::fmt::Debug {
    fn now_millis(&self) -> u64;
}

/// Monotonic clock backed by `Instant::now()`.
///
/// Notes: resets when the process restarts, which is fine for the in-memory store because
/// its records do not survive a restart either.
#[derive(Debug, Clone)]
pub struct MonotonicClock {
    start: Instant,
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self { start: Instant::now() }
    }
}

impl Clock for MonotonicClock {
    fn now_millis(&self) -> u64 {
        u64::try_from(self.start.elapsed().as_millis()).unwrap_or(u64::MAX)
    }
}

/// Manually driven clock. Clones share the same time source.
#[derive(Debug, Clone, Default)]
pub struct ManualClock {
    now: Arc<AtomicU64>,
}

impl ManualClock {
    pub fn new() -> Self {
        Self::default()
    }

    /// Move time forward.
    pub fn advance(&self, by: Duration) {
        let millis = u64::try_from(by.as_millis()).unwrap_or(u64::MAX);
        let _ = self
            .now
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |now| Some(now.saturating_add(millis)));
    }

    pub fn set_millis(&self, millis: u64) {
        self.now.store(millis, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    fn now_millis(&self) -> u64 {
        self.now.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn manual_clock_advances_shared_time() {
        let clock = ManualClock::new();
        let other = clock.clone();
        assert_eq!(clock.now_millis(), 0);

        other.advance(Duration::from_millis(1500));
        assert_eq!(clock.now_millis(), 1500);

        clock.set_millis(10);
        assert_eq!(other.now_millis(), 10);
    }

    #[test]
    fn manual_clock_saturates() {
        let clock = ManualClock::new();
        clock.set_millis(u64::MAX - 1);
        clock.advance(Duration::from_secs(5));
        assert_eq!(clock.now_millis(), u64::MAX);
    }

    #[test]
    fn monotonic_clock_never_goes_backwards() {
        let clock = MonotonicClock::default();
        let a = clock.now_millis();
        let b = clock.now_millis();
        assert!(b >= a);
    }
}
