//! Periodic deadline helper for loop-driven timers.

use std::time::{Duration, Instant};

/// A fixed-period timer polled by the owning loop.
///
/// `tick` reports whether the period elapsed since the last firing and
/// re-arms for the next one. Late polls fire once and re-arm from the poll
/// time; missed periods are not replayed.
#[derive(Debug)]
pub struct Interval {
    period: Duration,
    next: Instant,
}

impl Interval {
    /// Creates a timer that first fires one `period` from now.
    pub fn new(period: Duration) -> Self {
        Self { period, next: Instant::now() + period }
    }

    /// Returns true when the deadline has passed, re-arming the timer.
    pub fn tick(&mut self, now: Instant) -> bool {
        if now < self.next {
            return false;
        }
        self.next = now + self.period;
        true
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn fires_once_per_period() {
        let start = Instant::now();
        let mut interval = Interval::new(Duration::from_millis(500));

        assert!(!interval.tick(start));
        assert!(interval.tick(start + Duration::from_millis(500)));
        // re-armed: same instant does not fire twice
        assert!(!interval.tick(start + Duration::from_millis(500)));
        assert!(interval.tick(start + Duration::from_millis(1100)));
    }
}
