//! Wall-clock source for poll timestamps.

use std::fmt::Debug;

use chrono::{DateTime, Utc};
use tokio::time::Instant;

/// Source of "now" for `since` timestamps and session bookkeeping.
pub trait Clock: Send + Sync + Debug {
    fn now(&self) -> DateTime<Utc>;
}

/// System wall clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn now(&self) -> DateTime<Utc> {
        Utc::now()
    }
}

/// Wall-clock anchor advanced by the tokio monotonic clock.
///
/// Never goes backwards when the system clock is adjusted, and follows
/// tokio's paused time in tests.
#[derive(Debug, Clone)]
pub struct MonotonicClock {
    anchor: DateTime<Utc>,
    started: Instant,
}

impl MonotonicClock {
    /// Anchor at the current system time.
    pub fn new() -> Self {
        Self::anchored_at(Utc::now())
    }

    /// Anchor at an explicit wall-clock time.
    pub fn anchored_at(anchor: DateTime<Utc>) -> Self {
        Self {
            anchor,
            started: Instant::now(),
        }
    }
}

impl Default for MonotonicClock {
    fn default() -> Self {
        Self::new()
    }
}

impl Clock for MonotonicClock {
    fn now(&self) -> DateTime<Utc> {
        let elapsed = chrono::Duration::from_std(self.started.elapsed())
            .unwrap_or_else(|_| chrono::Duration::zero());
        self.anchor + elapsed
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn test_monotonic_clock_follows_tokio_time() {
        let anchor = Utc::now();
        let clock = MonotonicClock::anchored_at(anchor);
        assert_eq!(clock.now(), anchor);

        tokio::time::advance(Duration::from_secs(5)).await;
        assert_eq!(clock.now(), anchor + chrono::Duration::seconds(5));
    }
}
