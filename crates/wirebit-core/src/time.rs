//! Monotonic nanosecond time.
//!
//! All pacing and timestamps in wirebit share a single scale: signed 64-bit
//! nanoseconds read from `CLOCK_MONOTONIC`. On Linux the monotonic clock is
//! system-wide, so timestamps stamped by one process are comparable in a
//! cooperating process on the same host, which is what the shared-memory
//! links require.

use std::sync::atomic::{AtomicI64, Ordering};

/// Nanosecond timestamp or duration on the monotonic scale.
pub type TimeNs = i64;

/// Returns the current monotonic time in nanoseconds.
pub fn now_ns() -> TimeNs {
    let mut ts = libc::timespec { tv_sec: 0, tv_nsec: 0 };
    // CLOCK_MONOTONIC cannot fail with a valid timespec pointer.
    unsafe {
        libc::clock_gettime(libc::CLOCK_MONOTONIC, &mut ts);
    }
    ts.tv_sec as i64 * 1_000_000_000 + ts.tv_nsec as i64
}

/// Converts nanoseconds to whole microseconds.
pub fn ns_to_us(ns: TimeNs) -> i64 {
    ns / 1_000
}

/// Converts nanoseconds to whole milliseconds.
pub fn ns_to_ms(ns: TimeNs) -> i64 {
    ns / 1_000_000
}

/// Converts nanoseconds to fractional seconds.
pub fn ns_to_s(ns: TimeNs) -> f64 {
    ns as f64 / 1e9
}

/// Converts microseconds to nanoseconds.
pub fn us_to_ns(us: i64) -> TimeNs {
    us * 1_000
}

/// Converts milliseconds to nanoseconds.
pub fn ms_to_ns(ms: i64) -> TimeNs {
    ms * 1_000_000
}

/// Abstraction over a time source to improve testability.
pub trait Clock: Send + Sync + 'static {
    /// Returns the current time in nanoseconds.
    fn now_ns(&self) -> TimeNs;
}

/// System clock reading `CLOCK_MONOTONIC`.
#[derive(Debug, Default)]
pub struct MonotonicClock;

impl Clock for MonotonicClock {
    #[inline]
    fn now_ns(&self) -> TimeNs {
        now_ns()
    }
}

/// Manually advanced clock for tests.
///
/// Starts at an arbitrary instant and only moves when told to, so pacing
/// and delivery-time behavior can be asserted exactly.
#[derive(Debug, Default)]
pub struct ManualClock {
    now: AtomicI64,
}

impl ManualClock {
    /// Creates a manual clock starting at `start_ns`.
    pub fn new(start_ns: TimeNs) -> Self {
        Self { now: AtomicI64::new(start_ns) }
    }

    /// Advances the clock by `delta_ns`.
    pub fn advance(&self, delta_ns: TimeNs) {
        self.now.fetch_add(delta_ns, Ordering::SeqCst);
    }

    /// Jumps the clock to an absolute instant.
    pub fn set(&self, now_ns: TimeNs) {
        self.now.store(now_ns, Ordering::SeqCst);
    }
}

impl Clock for ManualClock {
    #[inline]
    fn now_ns(&self) -> TimeNs {
        self.now.load(Ordering::SeqCst)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn monotonic_clock_advances() {
        let a = now_ns();
        let b = now_ns();
        assert!(b >= a);
        assert!(a > 0);
    }

    #[test]
    fn unit_conversions() {
        assert_eq!(ns_to_us(1_500), 1);
        assert_eq!(ns_to_ms(2_000_000), 2);
        assert_eq!(ms_to_ns(3), 3_000_000);
        assert_eq!(us_to_ns(7), 7_000);
        assert!((ns_to_s(1_500_000_000) - 1.5).abs() < 1e-12);
    }

    #[test]
    fn manual_clock_is_controlled() {
        let clock = ManualClock::new(1_000);
        assert_eq!(clock.now_ns(), 1_000);
        clock.advance(500);
        assert_eq!(clock.now_ns(), 1_500);
        clock.set(10);
        assert_eq!(clock.now_ns(), 10);
    }
}
