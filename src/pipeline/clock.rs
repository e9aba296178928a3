//! Presentation clock for outgoing tracks

use tokio::time::Instant;

use super::types::TimeBase;

/// Per-track presentation clock
///
/// The epoch is taken on the first call to [`TimestampClock::next`], not when
/// the clock is created, so every track gets its own zero-based timeline that
/// starts with the first frame it actually sends. Later timestamps are the
/// wall-clock time elapsed since that first call, which keeps playback in step
/// with real time no matter how irregularly frames are produced.
///
/// The clock reads `tokio::time::Instant`, so tests can drive it with a paused
/// runtime clock.
#[derive(Debug, Clone)]
pub struct TimestampClock {
    epoch: Option<Instant>,
    time_base: TimeBase,
}

impl TimestampClock {
    /// Create a clock counting in milliseconds
    pub fn new() -> Self {
        Self {
            epoch: None,
            time_base: TimeBase::MILLIS,
        }
    }

    /// Get the next presentation timestamp
    pub fn next(&mut self) -> (i64, TimeBase) {
        let now = Instant::now();
        match self.epoch {
            None => {
                self.epoch = Some(now);
                (0, self.time_base)
            }
            Some(epoch) => {
                let elapsed = now.saturating_duration_since(epoch);
                (self.time_base.ticks(elapsed), self.time_base)
            }
        }
    }
}

impl Default for TimestampClock {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test(start_paused = true)]
    async fn test_first_timestamp_is_zero() {
        let mut clock = TimestampClock::new();

        tokio::time::advance(Duration::from_secs(5)).await;

        // Creation time does not count, only the first pull does
        assert_eq!(clock.next(), (0, TimeBase::MILLIS));
        tokio::time::advance(Duration::from_millis(20)).await;
        assert_eq!(clock.next().0, 20);
    }

    #[tokio::test(start_paused = true)]
    async fn test_timestamps_follow_wall_clock() {
        let mut clock = TimestampClock::new();
        let mut previous = clock.next().0;
        assert_eq!(previous, 0);

        for step in [0u64, 16, 33, 1, 250] {
            tokio::time::advance(Duration::from_millis(step)).await;
            let (ts, unit) = clock.next();
            assert_eq!(unit, TimeBase::MILLIS);
            assert!(ts >= previous, "{} went backwards from {}", ts, previous);
            previous = ts;
        }

        assert_eq!(previous, 300);
    }

    #[tokio::test(start_paused = true)]
    async fn test_clocks_are_independent() {
        let mut first = TimestampClock::new();
        let mut second = TimestampClock::new();

        first.next();
        tokio::time::advance(Duration::from_millis(40)).await;
        second.next();
        tokio::time::advance(Duration::from_millis(60)).await;

        assert_eq!(first.next().0, 100);
        assert_eq!(second.next().0, 60);
    }
}
