//! Wall-clock sources.
//!
//! Staleness and alignment boundaries are measured in wall time since the
//! UNIX epoch. Suspensions always go through `tokio::time`, so a clock
//! anchored to tokio's instant lets paused-time tests drive both.

use std::time::{Duration, SystemTime, UNIX_EPOCH};

/// Milliseconds since the UNIX epoch.
#[must_use]
pub fn now_ms() -> u128 {
    SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map(|d| d.as_millis())
        .unwrap_or_default()
}

/// Source of wall-clock time.
pub trait Clock: Send + Sync + 'static {
    /// Time elapsed since the UNIX epoch.
    fn since_epoch(&self) -> Duration;

    /// Same instant as a `SystemTime`.
    fn system_time(&self) -> SystemTime {
        UNIX_EPOCH + self.since_epoch()
    }
}

/// Reads the operating system clock.
#[derive(Debug, Clone, Copy, Default)]
pub struct SystemClock;

impl Clock for SystemClock {
    fn since_epoch(&self) -> Duration {
        SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .unwrap_or_default()
    }
}

/// Wall time that advances with `tokio::time::Instant` from a fixed anchor.
#[derive(Debug, Clone, Copy)]
pub struct AnchoredClock {
    anchor_wall: Duration,
    anchor_instant: tokio::time::Instant,
}

impl AnchoredClock {
    /// Anchor `since_epoch` to the current tokio instant.
    #[must_use]
    pub fn starting_at(since_epoch: Duration) -> Self {
        Self {
            anchor_wall: since_epoch,
            anchor_instant: tokio::time::Instant::now(),
        }
    }
}

impl Clock for AnchoredClock {
    fn since_epoch(&self) -> Duration {
        self.anchor_wall + self.anchor_instant.elapsed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test(start_paused = true)]
    async fn anchored_clock_follows_tokio_time() {
        let clock = AnchoredClock::starting_at(Duration::from_secs(1_000));
        assert_eq!(clock.since_epoch(), Duration::from_secs(1_000));
        tokio::time::sleep(Duration::from_secs(90)).await;
        assert_eq!(clock.since_epoch(), Duration::from_secs(1_090));
        assert_eq!(
            clock.system_time(),
            UNIX_EPOCH + Duration::from_secs(1_090)
        );
    }

    #[test]
    fn system_clock_is_after_2020() {
        assert!(SystemClock.since_epoch() > Duration::from_secs(1_577_836_800));
        assert!(now_ms() > 1_577_836_800_000);
    }
}
