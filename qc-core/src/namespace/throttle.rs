//! Throttled commit boundary
//!
//! Collapses a burst of reduced states into one commit per window. The first
//! pending value opens a window; when it elapses the latest value is released.
//! A steady storm therefore commits at the window cadence and the final value
//! of a burst is never lost.

use std::time::Duration;

use tokio::time::Instant;

use crate::constants::sync::MIN_THROTTLE_INTERVAL_MS;

#[derive(Debug)]
pub struct Throttle<T> {
    interval: Duration,
    pending: Option<T>,
    deadline: Option<Instant>,
}

impl<T> Throttle<T> {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval: interval.max(Duration::from_millis(MIN_THROTTLE_INTERVAL_MS)),
            pending: None,
            deadline: None,
        }
    }

    pub fn interval(&self) -> Duration {
        self.interval
    }

    /// Stage `value`, replacing anything staged earlier in the same window
    pub fn offer(&mut self, value: T, now: Instant) {
        if self.deadline.is_none() {
            self.deadline = Some(now + self.interval);
        }
        self.pending = Some(value);
    }

    /// Release the staged value once its window has elapsed
    pub fn poll(&mut self, now: Instant) -> Option<T> {
        match self.deadline {
            Some(deadline) if deadline <= now => self.flush(),
            _ => None,
        }
    }

    /// Release the staged value regardless of the window
    pub fn flush(&mut self) -> Option<T> {
        self.deadline = None;
        self.pending.take()
    }

    pub fn pending(&self) -> Option<&T> {
        self.pending.as_ref()
    }

    pub fn deadline(&self) -> Option<Instant> {
        self.deadline
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const WINDOW: Duration = Duration::from_millis(33);

    #[test]
    fn test_burst_collapses_to_last_value() {
        let start = Instant::now();
        let mut throttle = Throttle::new(WINDOW);

        for i in 0..10u32 {
            throttle.offer(i, start + Duration::from_millis(i as u64));
            assert_eq!(throttle.poll(start + Duration::from_millis(i as u64)), None);
        }

        assert_eq!(throttle.deadline(), Some(start + WINDOW));
        assert_eq!(throttle.poll(start + WINDOW), Some(9));
        assert_eq!(throttle.poll(start + WINDOW * 2), None);
        assert!(throttle.deadline().is_none());
    }

    #[test]
    fn test_storm_commits_at_fixed_cadence() {
        let start = Instant::now();
        let mut throttle = Throttle::new(WINDOW);
        let mut commits = Vec::new();

        // One event per millisecond for 200ms
        for ms in 0..200u64 {
            let now = start + Duration::from_millis(ms);
            if let Some(v) = throttle.poll(now) {
                commits.push((ms, v));
            }
            throttle.offer(ms, now);
        }

        assert!(commits.len() >= 5, "storm starved the boundary: {commits:?}");
        for pair in commits.windows(2) {
            assert!(pair[1].0 - pair[0].0 <= 34);
        }
        // The tail of the storm is still pending, not dropped
        assert_eq!(throttle.flush(), Some(199));
    }

    #[test]
    fn test_zero_interval_is_clamped() {
        let throttle: Throttle<()> = Throttle::new(Duration::ZERO);
        assert_eq!(throttle.interval(), Duration::from_millis(1));
    }
}
