//! Urgency-driven scheduler for high-frequency assets.
//!
//! Each asset has a target polling interval. Its urgency is the fraction of
//! that interval elapsed since the last fetch, so `1.0` means exactly due.
//! The loop always services the most urgent due asset, and otherwise sleeps
//! until the earliest asset becomes due.
//!
//! Selection order among due assets:
//! 1. higher urgency score,
//! 2. larger absolute overdue time,
//! 3. earlier position in configuration.
//!
//! `last_fetch_at` advances after every completed round-trip, successful or
//! not, so a failing asset cannot monopolise the budget. Transient failures
//! (throttling, 5xx, network) additionally start a cooldown of
//! `interval * min(2^(n-1), max_cooldown_multiplier)` during which the asset
//! is skipped.

use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, info, trace, warn};

use crate::core::audit::{self, AuditAction, SharedAudit};
use crate::core::collaborator::round_trip;
use crate::core::{
    Job, MarketFetcher, RateLimiter, ResultSink, RoundTrip, RunReport, SchedulerError,
    TrackedAsset,
};
use crate::runtime::Shutdown;
use crate::util::clock::{Clock, SystemClock};

const SCHEDULER: &str = "snoozer";

/// Shortest idle sleep, so a rounding-level wait never spins.
const MIN_IDLE: Duration = Duration::from_millis(1);

/// Urgency of an asset: elapsed staleness over its interval.
///
/// Pure in its inputs. Times are measured since the UNIX epoch and a
/// never-fetched asset has `last_fetch_at == 0`, so its score keeps
/// growing with `now`.
#[must_use]
pub fn urgency_score(now: Duration, last_fetch_at: Duration, interval: Duration) -> f64 {
    if interval.is_zero() {
        return f64::INFINITY;
    }
    now.saturating_sub(last_fetch_at).as_secs_f64() / interval.as_secs_f64()
}

/// How far past its due time an asset is.
#[must_use]
pub fn overdue_by(now: Duration, last_fetch_at: Duration, interval: Duration) -> Duration {
    now.saturating_sub(last_fetch_at).saturating_sub(interval)
}

/// Cooldown multiplier policy for transient failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SnoozerPolicy {
    /// Cap on the number of intervals skipped after consecutive failures.
    pub max_cooldown_multiplier: u32,
}

impl Default for SnoozerPolicy {
    fn default() -> Self {
        Self {
            max_cooldown_multiplier: 8,
        }
    }
}

impl SnoozerPolicy {
    /// Cooldown after the `consecutive`-th transient failure in a row.
    #[must_use]
    pub fn cooldown(&self, interval: Duration, consecutive: u32) -> Duration {
        let exp = consecutive.saturating_sub(1).min(31);
        let multiplier = (1_u32 << exp).min(self.max_cooldown_multiplier.max(1));
        interval.saturating_mul(multiplier)
    }
}

/// Per-asset mutable schedule state, owned by the snoozer alone.
#[derive(Debug, Clone)]
pub struct SnoozeEntry {
    /// Asset configuration.
    pub asset: Arc<TrackedAsset>,
    /// Target cadence.
    pub interval: Duration,
    /// Time of the last completed round-trip, since the epoch (zero = never).
    pub last_fetch_at: Duration,
    /// Score from the most recent evaluation.
    pub urgency_score: f64,
    /// Transient failures in a row.
    pub consecutive_failures: u32,
    /// Skip the asset until this time.
    pub cooldown_until: Option<Duration>,
}

impl SnoozeEntry {
    /// Fresh entry for an asset that has never been fetched.
    #[must_use]
    pub const fn new(asset: Arc<TrackedAsset>, interval: Duration) -> Self {
        Self {
            asset,
            interval,
            last_fetch_at: Duration::ZERO,
            urgency_score: 0.0,
            consecutive_failures: 0,
            cooldown_until: None,
        }
    }

    fn cooling(&self, now: Duration) -> Option<Duration> {
        self.cooldown_until
            .filter(|until| *until > now)
            .map(|until| until - now)
    }
}

/// Result of one selection pass.
#[derive(Debug, Clone, Copy, PartialEq)]
pub enum Selection {
    /// Dispatch the entry at `index`.
    Due {
        /// Position in configuration order.
        index: usize,
        /// Its urgency score.
        urgency: f64,
    },
    /// Nothing is due; the earliest asset becomes actionable after `wake_in`.
    Idle {
        /// Time until the next asset is due or leaves cooldown.
        wake_in: Duration,
    },
    /// No assets at all.
    Empty,
}

/// Score every entry at `now` and pick the most urgent due one.
pub fn select_most_urgent(entries: &mut [SnoozeEntry], now: Duration) -> Selection {
    let mut best: Option<(usize, f64, Duration)> = None;
    let mut wake_in: Option<Duration> = None;

    for (index, entry) in entries.iter_mut().enumerate() {
        if let Some(remaining) = entry.cooling(now) {
            entry.urgency_score = 0.0;
            wake_in = Some(wake_in.map_or(remaining, |w| w.min(remaining)));
            continue;
        }
        let score = urgency_score(now, entry.last_fetch_at, entry.interval);
        entry.urgency_score = score;
        if score >= 1.0 {
            let overdue = overdue_by(now, entry.last_fetch_at, entry.interval);
            let better = best.map_or(true, |(_, best_score, best_overdue)| {
                score
                    .total_cmp(&best_score)
                    .then(overdue.cmp(&best_overdue))
                    .is_gt()
            });
            if better {
                best = Some((index, score, overdue));
            }
        } else {
            let until_due = (entry.last_fetch_at + entry.interval).saturating_sub(now);
            wake_in = Some(wake_in.map_or(until_due, |w| w.min(until_due)));
        }
    }

    match (best, wake_in) {
        (Some((index, urgency, _)), _) => Selection::Due { index, urgency },
        (None, Some(wake_in)) => Selection::Idle {
            wake_in: wake_in.max(MIN_IDLE),
        },
        (None, None) => Selection::Empty,
    }
}

/// Loop state, logged on every transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SnoozerState {
    /// Sleeping until something is due.
    Idle,
    /// Scoring assets.
    Select,
    /// Suspended in the rate limiter.
    WaitForToken,
    /// Fetch/persist in flight.
    Dispatch,
    /// Recording the outcome.
    Update,
    /// Shut down; no further dispatches.
    Stopped,
}

/// High-frequency urgency scheduler.
pub struct SnoozerScheduler {
    entries: Vec<SnoozeEntry>,
    limiter: Arc<RateLimiter>,
    fetcher: Arc<dyn MarketFetcher>,
    sink: Arc<dyn ResultSink>,
    clock: Arc<dyn Clock>,
    shutdown: Shutdown,
    policy: SnoozerPolicy,
    audit: Option<SharedAudit>,
    state: SnoozerState,
    report: RunReport,
}

impl SnoozerScheduler {
    /// Build a scheduler over `assets`. Assets without a polling interval
    /// cannot be scored and are left out with a warning.
    pub fn new(
        assets: Vec<Arc<TrackedAsset>>,
        limiter: Arc<RateLimiter>,
        fetcher: Arc<dyn MarketFetcher>,
        sink: Arc<dyn ResultSink>,
        shutdown: Shutdown,
    ) -> Self {
        let entries = assets
            .into_iter()
            .filter_map(|asset| match asset.polling_interval {
                Some(interval) if !interval.is_zero() => Some(SnoozeEntry::new(asset, interval)),
                _ => {
                    warn!(
                        asset = %asset.id,
                        endpoint = %asset.endpoint,
                        "no polling interval, not scheduled"
                    );
                    None
                }
            })
            .collect();
        Self {
            entries,
            limiter,
            fetcher,
            sink,
            clock: Arc::new(SystemClock),
            shutdown,
            policy: SnoozerPolicy::default(),
            audit: None,
            state: SnoozerState::Idle,
            report: RunReport::default(),
        }
    }

    /// Use a different wall clock.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Override the cooldown policy.
    #[must_use]
    pub const fn with_policy(mut self, policy: SnoozerPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Attach an audit sink.
    #[must_use]
    pub fn with_audit(mut self, audit: SharedAudit) -> Self {
        self.audit = Some(audit);
        self
    }

    /// Schedule entries in configuration order.
    #[must_use]
    pub fn entries(&self) -> &[SnoozeEntry] {
        &self.entries
    }

    /// Current loop state.
    #[must_use]
    pub const fn state(&self) -> SnoozerState {
        self.state
    }

    fn enter(&mut self, state: SnoozerState) {
        trace!(from = ?self.state, to = ?state, "snoozer transition");
        self.state = state;
    }

    /// Run until shutdown.
    ///
    /// # Errors
    ///
    /// Only budget corruption in the rate limiter ends the loop with an
    /// error; per-asset failures are logged and absorbed.
    pub async fn run(mut self) -> Result<RunReport, SchedulerError> {
        info!(assets = self.entries.len(), "snoozer scheduler started");
        let result = self.run_loop().await;
        self.enter(SnoozerState::Stopped);
        info!(
            dispatched = self.report.dispatched,
            fetch_failures = self.report.fetch_failures,
            "snoozer scheduler stopped"
        );
        result.map(|()| self.report)
    }

    async fn run_loop(&mut self) -> Result<(), SchedulerError> {
        loop {
            if self.shutdown.is_triggered() {
                return Ok(());
            }
            self.enter(SnoozerState::Select);
            let now = self.clock.since_epoch();
            match select_most_urgent(&mut self.entries, now) {
                Selection::Empty => {
                    self.enter(SnoozerState::Idle);
                    self.shutdown.cancelled().await;
                    return Ok(());
                }
                Selection::Idle { wake_in } => {
                    self.enter(SnoozerState::Idle);
                    debug!(wake_in_ms = duration_ms(wake_in), "nothing due, sleeping");
                    if self
                        .shutdown
                        .run_until_cancelled(tokio::time::sleep(wake_in))
                        .await
                        .is_none()
                    {
                        return Ok(());
                    }
                }
                Selection::Due { index, urgency } => {
                    self.enter(SnoozerState::WaitForToken);
                    match self.limiter.acquire().await {
                        Ok(grant) => trace!(
                            asset = %self.entries[index].asset.id,
                            urgency,
                            waited_ms = duration_ms(grant.waited),
                            "token granted"
                        ),
                        Err(SchedulerError::Cancelled) => return Ok(()),
                        Err(e) => return Err(e),
                    }
                    self.enter(SnoozerState::Dispatch);
                    let trip = self.dispatch(index).await;
                    self.enter(SnoozerState::Update);
                    self.update(index, &trip);
                }
            }
        }
    }

    async fn dispatch(&mut self, index: usize) -> RoundTrip {
        let job = Job::for_asset(&self.entries[index].asset);
        self.report.dispatched += 1;
        audit::record(
            self.audit.as_ref(),
            SCHEDULER,
            &job.asset.id,
            job.endpoint,
            AuditAction::Dispatched,
            None,
        );
        let clock = Arc::clone(&self.clock);
        round_trip(&*self.fetcher, &*self.sink, &job, || clock.system_time()).await
    }

    fn update(&mut self, index: usize, trip: &RoundTrip) {
        let now = self.clock.since_epoch();
        self.report.record(trip);
        let entry = &mut self.entries[index];
        entry.last_fetch_at = now;

        let (action, detail) = match trip {
            RoundTrip::Stored => {
                entry.consecutive_failures = 0;
                entry.cooldown_until = None;
                debug!(asset = %entry.asset.id, endpoint = %entry.asset.endpoint, "stored");
                (AuditAction::Fetched, None)
            }
            RoundTrip::PersistFailed(e) => {
                entry.consecutive_failures = 0;
                entry.cooldown_until = None;
                warn!(asset = %entry.asset.id, endpoint = %entry.asset.endpoint, "{e}");
                (AuditAction::PersistFailed, Some(e.to_string()))
            }
            RoundTrip::FetchFailed(e) if e.kind.is_transient() => {
                entry.consecutive_failures += 1;
                let cooldown = self
                    .policy
                    .cooldown(entry.interval, entry.consecutive_failures);
                entry.cooldown_until = Some(now + cooldown);
                warn!(
                    asset = %entry.asset.id,
                    endpoint = %entry.asset.endpoint,
                    attempt = entry.consecutive_failures,
                    cooldown_secs = cooldown.as_secs(),
                    "{e}, cooling down"
                );
                (AuditAction::CooldownStarted, Some(e.to_string()))
            }
            RoundTrip::FetchFailed(e) => {
                warn!(
                    asset = %entry.asset.id,
                    endpoint = %entry.asset.endpoint,
                    "fetch failed: {e}"
                );
                (AuditAction::FetchFailed, Some(e.to_string()))
            }
        };
        entry.urgency_score = urgency_score(now, entry.last_fetch_at, entry.interval);
        let (id, endpoint) = (entry.asset.id.clone(), entry.asset.endpoint);
        audit::record(self.audit.as_ref(), SCHEDULER, &id, endpoint, action, detail);
    }
}

fn duration_ms(d: Duration) -> u64 {
    u64::try_from(d.as_millis()).unwrap_or(u64::MAX)
}
