//! Boundary-aligned batch scheduler for low-frequency assets.
//!
//! Boundaries sit at `floor((t - offset) / size) * size + offset` seconds
//! since the UNIX epoch, which by default is half past every UTC hour. Each
//! asset is serviced at most once per boundary; `last_fired_boundary` is the
//! only state carried between wakes, so waking several times inside one
//! boundary never dispatches twice.
//!
//! At a boundary every due asset gets its own sub-flow:
//!
//! ```text
//! WAIT_FOR_TOKEN -> FETCH -> (RETRY_BACKOFF -> WAIT_FOR_TOKEN -> FETCH)* -> DONE
//! ```
//!
//! Sub-flows compete for the shared limiter like any other caller.

use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinSet;
use tracing::{debug, error, info, trace, warn};

use crate::core::audit::{self, AuditAction, SharedAudit};
use crate::core::collaborator::round_trip;
use crate::core::{
    AssetId, Job, MarketFetcher, RateLimiter, ResultSink, RoundTrip, RunReport, SchedulerError,
    TrackedAsset,
};
use crate::runtime::Shutdown;
use crate::util::clock::{Clock, SystemClock};

const SCHEDULER: &str = "clockwork";

/// Fixed-size wall-clock boundaries shifted by an offset.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BoundarySchedule {
    /// Distance between boundaries.
    pub size: Duration,
    /// Shift from the epoch-aligned grid.
    pub offset: Duration,
}

impl Default for BoundarySchedule {
    fn default() -> Self {
        Self::hourly()
    }
}

impl BoundarySchedule {
    /// Boundaries every `size`, shifted by `offset`.
    #[must_use]
    pub const fn new(size: Duration, offset: Duration) -> Self {
        Self { size, offset }
    }

    /// Half past every hour.
    #[must_use]
    pub const fn hourly() -> Self {
        Self::new(Duration::from_secs(3600), Duration::from_secs(1800))
    }

    /// Latest boundary at or before `t`.
    #[must_use]
    pub fn floor(&self, t: Duration) -> Duration {
        let size = self.size.as_millis();
        if size == 0 {
            return t;
        }
        let offset = self.offset.as_millis() % size;
        let t = t.as_millis();
        let boundary = if t < offset {
            0
        } else {
            (t - offset) / size * size + offset
        };
        millis(boundary)
    }

    /// First boundary strictly after `t`.
    #[must_use]
    pub fn next_after(&self, t: Duration) -> Duration {
        self.floor(t) + self.size
    }
}

fn millis(ms: u128) -> Duration {
    Duration::from_millis(u64::try_from(ms).unwrap_or(u64::MAX))
}

/// Bounded exponential backoff inside one boundary.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Retries after the first attempt.
    pub max_retries: u32,
    /// Delay before the first retry.
    pub base_backoff: Duration,
    /// Cap on a single delay.
    pub max_backoff: Duration,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_retries: 4,
            base_backoff: Duration::from_secs(30),
            max_backoff: Duration::from_secs(240),
        }
    }
}

impl RetryPolicy {
    /// Delay before retry number `attempt + 1` (zero-based).
    #[must_use]
    pub fn delay(&self, attempt: u32) -> Duration {
        let factor = 1_u32.checked_shl(attempt).unwrap_or(u32::MAX);
        self.base_backoff.saturating_mul(factor).min(self.max_backoff)
    }
}

/// Boundary layout plus retry behaviour.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ClockworkPolicy {
    /// Where boundaries fall.
    pub schedule: BoundarySchedule,
    /// Retry within a boundary.
    pub retry: RetryPolicy,
}

/// Per-asset schedule state.
#[derive(Debug, Clone)]
pub struct ClockworkEntry {
    /// Asset configuration.
    pub asset: Arc<TrackedAsset>,
    /// Boundary most recently serviced.
    pub last_fired_boundary: Option<Duration>,
}

impl ClockworkEntry {
    /// Whether the asset still needs servicing for `boundary`.
    #[must_use]
    pub fn is_due(&self, boundary: Duration) -> bool {
        self.last_fired_boundary.map_or(true, |fired| boundary > fired)
    }
}

/// Loop state, logged on every transition.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ClockworkState {
    /// Waiting for the next boundary.
    Sleeping,
    /// Woke at or after a boundary.
    BoundaryReached,
    /// Picking assets not yet serviced for this boundary.
    CollectDue,
    /// Sub-flows in flight.
    DispatchAll,
    /// Shut down.
    Stopped,
}

/// How a single asset's sub-flow ended.
enum Subflow {
    /// Serviced (or given up on) for this boundary.
    Finished(RunReport),
    /// Shutdown interrupted it; the boundary stays open.
    Cancelled(RunReport),
    Fatal(SchedulerError),
}

/// Everything a sub-flow needs, cloned per asset.
#[derive(Clone)]
struct SubflowContext {
    limiter: Arc<RateLimiter>,
    fetcher: Arc<dyn MarketFetcher>,
    sink: Arc<dyn ResultSink>,
    clock: Arc<dyn Clock>,
    shutdown: Shutdown,
    retry: RetryPolicy,
    audit: Option<SharedAudit>,
    next_boundary: Duration,
}

impl SubflowContext {
    fn audit(&self, id: &AssetId, job: &Job, action: AuditAction, detail: Option<String>) {
        audit::record(self.audit.as_ref(), SCHEDULER, id, job.endpoint, action, detail);
    }

    async fn run(self, asset: Arc<TrackedAsset>) -> Subflow {
        let job = Job::for_asset(&asset);
        let id = &asset.id;
        let mut report = RunReport::default();
        let mut attempt = 0_u32;
        loop {
            match self.limiter.acquire().await {
                Ok(_) => {}
                Err(SchedulerError::Cancelled) => return Subflow::Cancelled(report),
                Err(e) => return Subflow::Fatal(e),
            }
            report.dispatched += 1;
            self.audit(id, &job, AuditAction::Dispatched, None);
            let clock = Arc::clone(&self.clock);
            let trip = round_trip(&*self.fetcher, &*self.sink, &job, || clock.system_time()).await;
            report.record(&trip);

            let err = match trip {
                RoundTrip::Stored => {
                    debug!(asset = %id, endpoint = %job.endpoint, attempt, "stored");
                    self.audit(id, &job, AuditAction::Fetched, None);
                    return Subflow::Finished(report);
                }
                RoundTrip::PersistFailed(e) => {
                    warn!(asset = %id, endpoint = %job.endpoint, "{e}");
                    self.audit(id, &job, AuditAction::PersistFailed, Some(e.to_string()));
                    return Subflow::Finished(report);
                }
                RoundTrip::FetchFailed(e) => e,
            };

            if !err.kind.is_retryable() {
                warn!(asset = %id, endpoint = %job.endpoint, "fetch failed, not retrying: {err}");
                self.audit(id, &job, AuditAction::FetchFailed, Some(err.to_string()));
                return Subflow::Finished(report);
            }

            let delay = self.retry.delay(attempt);
            let resume_at = self.clock.since_epoch() + delay;
            if attempt >= self.retry.max_retries || resume_at >= self.next_boundary {
                error!(
                    asset = %id,
                    endpoint = %job.endpoint,
                    attempts = attempt + 1,
                    "retries exhausted for boundary: {err}"
                );
                self.audit(id, &job, AuditAction::RetriesExhausted, Some(err.to_string()));
                return Subflow::Finished(report);
            }

            attempt += 1;
            warn!(
                asset = %id,
                endpoint = %job.endpoint,
                attempt,
                delay_secs = delay.as_secs(),
                "{err}, retrying"
            );
            self.audit(id, &job, AuditAction::RetryScheduled, Some(err.to_string()));
            if self
                .shutdown
                .run_until_cancelled(tokio::time::sleep(delay))
                .await
                .is_none()
            {
                return Subflow::Cancelled(report);
            }
        }
    }
}

/// Boundary-aligned scheduler.
pub struct ClockworkScheduler {
    entries: Vec<ClockworkEntry>,
    limiter: Arc<RateLimiter>,
    fetcher: Arc<dyn MarketFetcher>,
    sink: Arc<dyn ResultSink>,
    clock: Arc<dyn Clock>,
    shutdown: Shutdown,
    policy: ClockworkPolicy,
    audit: Option<SharedAudit>,
    state: ClockworkState,
    report: RunReport,
}

impl ClockworkScheduler {
    /// Build a scheduler; every asset starts never-fired.
    pub fn new(
        assets: Vec<Arc<TrackedAsset>>,
        limiter: Arc<RateLimiter>,
        fetcher: Arc<dyn MarketFetcher>,
        sink: Arc<dyn ResultSink>,
        shutdown: Shutdown,
    ) -> Self {
        let entries = assets
            .into_iter()
            .map(|asset| ClockworkEntry {
                asset,
                last_fired_boundary: None,
            })
            .collect();
        Self {
            entries,
            limiter,
            fetcher,
            sink,
            clock: Arc::new(SystemClock),
            shutdown,
            policy: ClockworkPolicy::default(),
            audit: None,
            state: ClockworkState::Sleeping,
            report: RunReport::default(),
        }
    }

    /// Use a different wall clock.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Override boundaries and retry behaviour.
    #[must_use]
    pub const fn with_policy(mut self, policy: ClockworkPolicy) -> Self {
        self.policy = policy;
        self
    }

    /// Attach an audit sink.
    #[must_use]
    pub fn with_audit(mut self, audit: SharedAudit) -> Self {
        self.audit = Some(audit);
        self
    }

    /// Mark `id` as already serviced for `boundary`. Returns false for an
    /// unknown asset.
    pub fn set_last_fired(&mut self, id: &AssetId, boundary: Duration) -> bool {
        let mut found = false;
        for entry in self.entries.iter_mut().filter(|e| &e.asset.id == id) {
            entry.last_fired_boundary = Some(boundary);
            found = true;
        }
        found
    }

    /// Schedule entries in configuration order.
    #[must_use]
    pub fn entries(&self) -> &[ClockworkEntry] {
        &self.entries
    }

    /// Counters accumulated so far.
    #[must_use]
    pub const fn report(&self) -> RunReport {
        self.report
    }

    fn enter(&mut self, state: ClockworkState) {
        trace!(from = ?self.state, to = ?state, "clockwork transition");
        self.state = state;
    }

    /// Service every asset not yet fired for the current boundary and wait
    /// for their sub-flows. Returns how many assets were marked fired.
    ///
    /// # Errors
    ///
    /// Fails on budget corruption reported by the limiter or when a sub-flow
    /// panics.
    pub async fn service_boundary(&mut self) -> Result<usize, SchedulerError> {
        self.enter(ClockworkState::CollectDue);
        let now = self.clock.since_epoch();
        let boundary = self.policy.schedule.floor(now);
        let due: Vec<usize> = self
            .entries
            .iter()
            .enumerate()
            .filter(|(_, e)| e.is_due(boundary))
            .map(|(i, _)| i)
            .collect();
        if due.is_empty() {
            debug!(boundary_secs = boundary.as_secs(), "nothing due at boundary");
            return Ok(0);
        }

        self.enter(ClockworkState::DispatchAll);
        info!(
            boundary_secs = boundary.as_secs(),
            due = due.len(),
            "dispatching boundary batch"
        );
        let ctx = SubflowContext {
            limiter: Arc::clone(&self.limiter),
            fetcher: Arc::clone(&self.fetcher),
            sink: Arc::clone(&self.sink),
            clock: Arc::clone(&self.clock),
            shutdown: self.shutdown.clone(),
            retry: self.policy.retry,
            audit: self.audit.clone(),
            next_boundary: self.policy.schedule.next_after(now),
        };
        let mut flows = JoinSet::new();
        for index in due {
            let asset = Arc::clone(&self.entries[index].asset);
            let ctx = ctx.clone();
            flows.spawn(async move { (index, ctx.run(asset).await) });
        }

        let mut fired = 0;
        while let Some(joined) = flows.join_next().await {
            match joined {
                Ok((index, Subflow::Finished(report))) => {
                    self.report.merge(&report);
                    self.entries[index].last_fired_boundary = Some(boundary);
                    fired += 1;
                }
                Ok((index, Subflow::Cancelled(report))) => {
                    self.report.merge(&report);
                    debug!(
                        asset = %self.entries[index].asset.id,
                        "sub-flow cancelled, boundary left open"
                    );
                }
                Ok((_, Subflow::Fatal(e))) => return Err(e),
                Err(e) => {
                    error!("clockwork sub-flow failed: {e}");
                    flows.abort_all();
                    return Err(SchedulerError::TaskFailed(e.to_string()));
                }
            }
        }
        Ok(fired)
    }

    /// Run until shutdown: service the current boundary, then sleep until
    /// the next one. A boundary that passed while a batch was still running
    /// is serviced right away.
    ///
    /// # Errors
    ///
    /// Fails on budget corruption reported by the limiter or when a sub-flow
    /// panics.
    pub async fn run(mut self) -> Result<RunReport, SchedulerError> {
        info!(
            assets = self.entries.len(),
            boundary_secs = self.policy.schedule.size.as_secs(),
            offset_secs = self.policy.schedule.offset.as_secs(),
            "clockwork scheduler started"
        );
        let result = self.run_loop().await;
        self.enter(ClockworkState::Stopped);
        info!(
            dispatched = self.report.dispatched,
            fetch_failures = self.report.fetch_failures,
            "clockwork scheduler stopped"
        );
        result.map(|()| self.report)
    }

    async fn run_loop(&mut self) -> Result<(), SchedulerError> {
        while !self.shutdown.is_triggered() {
            self.enter(ClockworkState::BoundaryReached);
            let serviced = self.policy.schedule.floor(self.clock.since_epoch());
            self.service_boundary().await?;

            let now = self.clock.since_epoch();
            if self.policy.schedule.floor(now) > serviced {
                warn!(
                    boundary_secs = serviced.as_secs(),
                    "batch overran the next boundary"
                );
                continue;
            }
            self.enter(ClockworkState::Sleeping);
            let next = self.policy.schedule.next_after(now);
            let wait = next.saturating_sub(now);
            debug!(sleep_secs = wait.as_secs(), "sleeping until next boundary");
            if self
                .shutdown
                .run_until_cancelled(tokio::time::sleep(wait))
                .await
                .is_none()
            {
                break;
            }
        }
        Ok(())
    }
}
