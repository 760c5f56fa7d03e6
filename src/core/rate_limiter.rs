//! Sliding-window-log rate limiter shared by every scheduler.
//!
//! At most `capacity` grants are issued in any trailing `window`. Grants are
//! permanent: nothing is ever refunded.
//!
//! Waiters are serialized through a FIFO gate (`tokio::sync::Mutex`, which
//! hands the lock out in request order). Only the caller at the head of the
//! gate inspects the log and sleeps until the oldest grant ages out, so
//! callers are granted strictly in arrival order and nobody races to recheck
//! the log.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};
use std::time::Duration;

use parking_lot::Mutex;
use tokio::time::Instant;
use tracing::{debug, error, trace};

use crate::core::SchedulerError;
use crate::runtime::Shutdown;

/// Budget: at most `capacity` grants in any trailing `window`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RateLimit {
    /// Maximum grants inside one window.
    pub capacity: usize,
    /// Length of the trailing window.
    pub window: Duration,
}

impl RateLimit {
    /// Budget of `capacity` grants per `window`.
    #[must_use]
    pub const fn new(capacity: usize, window: Duration) -> Self {
        Self { capacity, window }
    }

    /// Budget of `capacity` grants per `window_secs` seconds.
    #[must_use]
    pub const fn per_seconds(capacity: usize, window_secs: u64) -> Self {
        Self::new(capacity, Duration::from_secs(window_secs))
    }
}

/// Successful acquisition.
#[derive(Debug, Clone, Copy)]
pub struct Grant {
    /// Instant the grant was recorded in the log.
    pub granted_at: Instant,
    /// Time spent suspended before the grant.
    pub waited: Duration,
    /// Grants inside the window including this one.
    pub in_window: usize,
}

enum Admission {
    Granted { in_window: usize },
    Wait(Duration),
}

/// Decrements the waiter count however `acquire` exits.
struct WaitingGuard<'a>(&'a AtomicUsize);

impl Drop for WaitingGuard<'_> {
    fn drop(&mut self) {
        self.0.fetch_sub(1, Ordering::AcqRel);
    }
}

/// The sole gate on outbound requests.
pub struct RateLimiter {
    limit: RateLimit,
    /// Grant timestamps, oldest first.
    log: Mutex<VecDeque<Instant>>,
    /// FIFO turnstile for callers.
    gate: tokio::sync::Mutex<()>,
    waiting: AtomicUsize,
    granted_total: AtomicU64,
    shutdown: Shutdown,
}

impl std::fmt::Debug for RateLimiter {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RateLimiter")
            .field("limit", &self.limit)
            .field("waiting", &self.waiting())
            .field("granted_total", &self.granted_total())
            .finish_non_exhaustive()
    }
}

impl RateLimiter {
    /// Create a limiter with an empty log.
    #[must_use]
    pub fn new(limit: RateLimit) -> Self {
        Self {
            limit,
            log: Mutex::new(VecDeque::with_capacity(limit.capacity.min(1024))),
            gate: tokio::sync::Mutex::new(()),
            waiting: AtomicUsize::new(0),
            granted_total: AtomicU64::new(0),
            shutdown: Shutdown::new(),
        }
    }

    /// Resolve suspended and future acquisitions to `Cancelled` once
    /// `shutdown` is raised.
    #[must_use]
    pub fn with_shutdown(mut self, shutdown: Shutdown) -> Self {
        self.shutdown = shutdown;
        self
    }

    /// Wait for a grant.
    ///
    /// # Errors
    ///
    /// `SchedulerError::Cancelled` when shutdown is raised before the grant,
    /// `SchedulerError::BudgetCorrupted` if the log ever exceeds capacity.
    pub async fn acquire(&self) -> Result<Grant, SchedulerError> {
        if self.shutdown.is_triggered() {
            return Err(SchedulerError::Cancelled);
        }
        let arrived = Instant::now();
        self.waiting.fetch_add(1, Ordering::AcqRel);
        let _waiting = WaitingGuard(&self.waiting);

        let Some(_turn) = self.shutdown.run_until_cancelled(self.gate.lock()).await else {
            debug!("acquire cancelled while queued");
            return Err(SchedulerError::Cancelled);
        };

        loop {
            let now = Instant::now();
            match self.admit(now)? {
                Admission::Granted { in_window } => {
                    self.granted_total.fetch_add(1, Ordering::Relaxed);
                    let waited = now.duration_since(arrived);
                    trace!(
                        in_window,
                        capacity = self.limit.capacity,
                        waited_ms = u64::try_from(waited.as_millis()).unwrap_or(u64::MAX),
                        "rate limit grant"
                    );
                    return Ok(Grant {
                        granted_at: now,
                        waited,
                        in_window,
                    });
                }
                Admission::Wait(wait) => {
                    debug!(
                        wait_ms = u64::try_from(wait.as_millis()).unwrap_or(u64::MAX),
                        queued = self.waiting(),
                        "budget exhausted, waiting for oldest grant to age out"
                    );
                    if self
                        .shutdown
                        .run_until_cancelled(tokio::time::sleep(wait))
                        .await
                        .is_none()
                    {
                        debug!("acquire cancelled while waiting for budget");
                        return Err(SchedulerError::Cancelled);
                    }
                }
            }
        }
    }

    /// Prune, then either record a grant at `now` or report how long the
    /// oldest grant needs to age out.
    fn admit(&self, now: Instant) -> Result<Admission, SchedulerError> {
        let mut log = self.log.lock();
        prune(&mut log, now, self.limit.window);
        let in_window = log.len();
        if in_window > self.limit.capacity {
            error!(in_window, capacity = self.limit.capacity, "grant log exceeds capacity");
            return Err(SchedulerError::BudgetCorrupted {
                in_window,
                capacity: self.limit.capacity,
            });
        }
        if in_window < self.limit.capacity {
            log.push_back(now);
            return Ok(Admission::Granted {
                in_window: in_window + 1,
            });
        }
        let wait = log.front().map_or(self.limit.window, |oldest| {
            self.limit
                .window
                .saturating_sub(now.duration_since(*oldest))
        });
        Ok(Admission::Wait(wait))
    }

    /// Grants inside the trailing window right now.
    #[must_use]
    pub fn load(&self) -> usize {
        let mut log = self.log.lock();
        prune(&mut log, Instant::now(), self.limit.window);
        log.len()
    }

    /// Configured capacity `N`.
    #[must_use]
    pub const fn capacity(&self) -> usize {
        self.limit.capacity
    }

    /// Configured window `W`.
    #[must_use]
    pub const fn window(&self) -> Duration {
        self.limit.window
    }

    /// Configured budget.
    #[must_use]
    pub const fn limit(&self) -> RateLimit {
        self.limit
    }

    /// Callers currently inside `acquire`.
    #[must_use]
    pub fn waiting(&self) -> usize {
        self.waiting.load(Ordering::Acquire)
    }

    /// Grants issued since construction.
    #[must_use]
    pub fn granted_total(&self) -> u64 {
        self.granted_total.load(Ordering::Relaxed)
    }
}

/// Drop grants at or before `now - window`; the window is `(now - W, now]`.
fn prune(log: &mut VecDeque<Instant>, now: Instant, window: Duration) {
    let Some(cutoff) = now.checked_sub(window) else {
        return;
    };
    while log.front().is_some_and(|t| *t <= cutoff) {
        log.pop_front();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Arc;

    fn limiter(capacity: usize, window_secs: u64) -> Arc<RateLimiter> {
        Arc::new(RateLimiter::new(RateLimit::per_seconds(capacity, window_secs)))
    }

    #[tokio::test(start_paused = true)]
    async fn sixteenth_call_waits_for_oldest_grant() {
        let limiter = limiter(15, 60);
        let start = Instant::now();
        for _ in 0..15 {
            let grant = limiter.acquire().await.unwrap();
            assert_eq!(grant.waited, Duration::ZERO);
        }
        assert_eq!(limiter.load(), 15);

        let grant = limiter.acquire().await.unwrap();
        let elapsed = start.elapsed();
        assert!(elapsed >= Duration::from_secs(60), "resolved after {elapsed:?}");
        assert!(elapsed < Duration::from_secs(61), "resolved after {elapsed:?}");
        assert!(grant.waited >= Duration::from_secs(60));
    }

    #[tokio::test(start_paused = true)]
    async fn load_drains_as_window_slides() {
        let limiter = limiter(5, 10);
        for _ in 0..3 {
            limiter.acquire().await.unwrap();
        }
        assert_eq!(limiter.load(), 3);
        tokio::time::sleep(Duration::from_secs(10)).await;
        assert_eq!(limiter.load(), 0);
        assert_eq!(limiter.granted_total(), 3);
        assert_eq!(limiter.capacity(), 5);
        assert_eq!(limiter.window(), Duration::from_secs(10));
    }

    #[tokio::test(start_paused = true)]
    async fn waiters_are_granted_in_arrival_order() {
        let limiter = limiter(2, 10);
        limiter.acquire().await.unwrap();
        limiter.acquire().await.unwrap();

        let order = Arc::new(Mutex::new(Vec::new()));
        let mut handles = Vec::new();
        for i in 0..8 {
            let l = Arc::clone(&limiter);
            let o = Arc::clone(&order);
            handles.push(tokio::spawn(async move {
                l.acquire().await.unwrap();
                o.lock().push(i);
            }));
            while limiter.waiting() < i + 1 {
                tokio::task::yield_now().await;
            }
        }
        for h in handles {
            h.await.unwrap();
        }
        assert_eq!(*order.lock(), (0..8).collect::<Vec<_>>());
    }

    #[tokio::test(start_paused = true)]
    async fn shutdown_releases_head_and_queued_waiters() {
        let shutdown = Shutdown::new();
        let limiter = Arc::new(
            RateLimiter::new(RateLimit::per_seconds(1, 3600)).with_shutdown(shutdown.clone()),
        );
        limiter.acquire().await.unwrap();

        let mut handles = Vec::new();
        for _ in 0..3 {
            let l = Arc::clone(&limiter);
            handles.push(tokio::spawn(async move { l.acquire().await }));
        }
        tokio::time::sleep(Duration::from_secs(5)).await;
        assert_eq!(limiter.waiting(), 3);

        let start = Instant::now();
        shutdown.trigger();
        for h in handles {
            assert!(matches!(h.await.unwrap(), Err(SchedulerError::Cancelled)));
        }
        assert!(start.elapsed() < Duration::from_secs(1));
        assert_eq!(limiter.waiting(), 0);
        assert!(matches!(
            limiter.acquire().await,
            Err(SchedulerError::Cancelled)
        ));
    }

    #[test]
    fn prune_keeps_only_the_open_window() {
        let base = Instant::now();
        let mut log: VecDeque<Instant> = (0..5).map(|s| base + Duration::from_secs(s)).collect();
        prune(&mut log, base + Duration::from_secs(12), Duration::from_secs(10));
        // grants at 0,1,2 are at or before the cutoff of 2
        assert_eq!(log.len(), 2);
    }
}
