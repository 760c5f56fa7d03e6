//! Composition root: one limiter, two schedulers, one shutdown signal.
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use market_cadence::core::{Orchestrator, OrchestratorConfig, RateLimit};
//!
//! let orchestrator = Orchestrator::new(
//!     OrchestratorConfig::new(RateLimit::per_seconds(15, 60)),
//!     assets,
//!     Arc::new(my_fetcher),
//!     Arc::new(my_sink),
//! );
//! let report = orchestrator.run_until_signal().await?;
//! ```

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio::task::JoinHandle;
use tokio::time::Instant;
use tracing::{error, info, warn};

use crate::core::audit::SharedAudit;
use crate::core::clockwork::{ClockworkPolicy, ClockworkScheduler};
use crate::core::snoozer::{SnoozerPolicy, SnoozerScheduler};
use crate::core::{
    AppResult, MarketFetcher, RateLimit, RateLimiter, ResultSink, RunReport, SchedulerError,
    TrackedAsset,
};
use crate::runtime::{wait_for_stop, Shutdown};
use crate::util::clock::{Clock, SystemClock};

/// Budget, grace period and scheduler policies.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct OrchestratorConfig {
    /// Global request budget.
    pub limit: RateLimit,
    /// How long `stop` waits for in-flight work before aborting.
    pub grace: Duration,
    /// Snoozer cooldown policy.
    pub snoozer: SnoozerPolicy,
    /// Clockwork boundaries and retries.
    pub clockwork: ClockworkPolicy,
}

impl OrchestratorConfig {
    /// Default policies around `limit`, with a 30 second grace period.
    #[must_use]
    pub fn new(limit: RateLimit) -> Self {
        Self {
            limit,
            grace: Duration::from_secs(30),
            snoozer: SnoozerPolicy::default(),
            clockwork: ClockworkPolicy::default(),
        }
    }

    /// Override the shutdown grace period.
    #[must_use]
    pub const fn with_grace(mut self, grace: Duration) -> Self {
        self.grace = grace;
        self
    }
}

/// What each scheduler reported when it stopped.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ShutdownReport {
    /// Snoozer counters, if it was started and stopped cleanly.
    pub snoozer: Option<RunReport>,
    /// Clockwork counters, if it was started and stopped cleanly.
    pub clockwork: Option<RunReport>,
    /// True when a scheduler outlived the grace period and was aborted.
    pub forced: bool,
}

impl ShutdownReport {
    /// Dispatches across both schedulers.
    #[must_use]
    pub fn total_dispatched(&self) -> u64 {
        self.snoozer.map_or(0, |r| r.dispatched) + self.clockwork.map_or(0, |r| r.dispatched)
    }
}

/// Wires the schedulers to a single shared limiter.
pub struct Orchestrator {
    config: OrchestratorConfig,
    assets: Vec<Arc<TrackedAsset>>,
    fetcher: Arc<dyn MarketFetcher>,
    sink: Arc<dyn ResultSink>,
    clock: Arc<dyn Clock>,
    audit: Option<SharedAudit>,
    shutdown: Shutdown,
}

impl Orchestrator {
    /// Create an orchestrator over validated assets.
    pub fn new(
        config: OrchestratorConfig,
        assets: Vec<TrackedAsset>,
        fetcher: Arc<dyn MarketFetcher>,
        sink: Arc<dyn ResultSink>,
    ) -> Self {
        Self {
            config,
            assets: assets.into_iter().map(Arc::new).collect(),
            fetcher,
            sink,
            clock: Arc::new(SystemClock),
            audit: None,
            shutdown: Shutdown::new(),
        }
    }

    /// Use a different wall clock for both schedulers.
    #[must_use]
    pub fn with_clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = clock;
        self
    }

    /// Attach an audit sink shared by both schedulers.
    #[must_use]
    pub fn with_audit(mut self, audit: SharedAudit) -> Self {
        self.audit = Some(audit);
        self
    }

    /// Configured policies.
    #[must_use]
    pub const fn config(&self) -> &OrchestratorConfig {
        &self.config
    }

    /// Clone of the shutdown signal the schedulers will observe. Triggering
    /// it before or after `start` requests a stop.
    #[must_use]
    pub fn shutdown_signal(&self) -> Shutdown {
        self.shutdown.clone()
    }

    /// Spawn both schedulers on the current tokio runtime.
    #[must_use]
    pub fn start(self) -> OrchestratorHandle {
        let shutdown = self.shutdown;
        let limiter = Arc::new(RateLimiter::new(self.config.limit).with_shutdown(shutdown.clone()));

        let (aligned, cadence): (Vec<_>, Vec<_>) = self
            .assets
            .into_iter()
            .partition(|a| a.endpoint.is_boundary_aligned());

        let snoozer = if cadence.is_empty() {
            warn!("no cadence assets configured, snoozer scheduler not started");
            None
        } else {
            let mut scheduler = SnoozerScheduler::new(
                cadence,
                Arc::clone(&limiter),
                Arc::clone(&self.fetcher),
                Arc::clone(&self.sink),
                shutdown.clone(),
            )
            .with_clock(Arc::clone(&self.clock))
            .with_policy(self.config.snoozer);
            if let Some(audit) = &self.audit {
                scheduler = scheduler.with_audit(Arc::clone(audit));
            }
            Some(spawn_scheduler("snoozer", shutdown.clone(), scheduler.run()))
        };

        let clockwork = if aligned.is_empty() {
            warn!("no boundary-aligned assets configured, clockwork scheduler not started");
            None
        } else {
            let mut scheduler = ClockworkScheduler::new(
                aligned,
                Arc::clone(&limiter),
                Arc::clone(&self.fetcher),
                Arc::clone(&self.sink),
                shutdown.clone(),
            )
            .with_clock(Arc::clone(&self.clock))
            .with_policy(self.config.clockwork);
            if let Some(audit) = &self.audit {
                scheduler = scheduler.with_audit(Arc::clone(audit));
            }
            Some(spawn_scheduler("clockwork", shutdown.clone(), scheduler.run()))
        };

        info!(
            capacity = self.config.limit.capacity,
            window_secs = self.config.limit.window.as_secs(),
            snoozer = snoozer.is_some(),
            clockwork = clockwork.is_some(),
            "orchestrator started"
        );
        OrchestratorHandle {
            limiter,
            shutdown,
            grace: self.config.grace,
            snoozer,
            clockwork,
        }
    }

    /// Start, wait for Ctrl-C, SIGTERM or an internal shutdown, then stop.
    ///
    /// # Errors
    ///
    /// Returns the first fatal scheduler error.
    pub async fn run_until_signal(self) -> AppResult<ShutdownReport> {
        let handle = self.start();
        if handle.is_idle() {
            warn!("no assets to schedule, exiting");
            return Ok(ShutdownReport::default());
        }
        let reason = wait_for_stop(&handle.shutdown).await;
        info!(reason, "stop requested");
        Ok(handle.stop().await?)
    }
}

fn spawn_scheduler<F>(
    name: &'static str,
    shutdown: Shutdown,
    run: F,
) -> JoinHandle<Result<RunReport, SchedulerError>>
where
    F: Future<Output = Result<RunReport, SchedulerError>> + Send + 'static,
{
    tokio::spawn(async move {
        let result = run.await;
        if let Err(e) = &result {
            error!(scheduler = name, "scheduler failed: {e}");
            shutdown.trigger();
        }
        result
    })
}

/// Running orchestrator.
pub struct OrchestratorHandle {
    limiter: Arc<RateLimiter>,
    shutdown: Shutdown,
    grace: Duration,
    snoozer: Option<JoinHandle<Result<RunReport, SchedulerError>>>,
    clockwork: Option<JoinHandle<Result<RunReport, SchedulerError>>>,
}

impl OrchestratorHandle {
    /// The single limiter both schedulers share.
    #[must_use]
    pub fn limiter(&self) -> Arc<RateLimiter> {
        Arc::clone(&self.limiter)
    }

    /// Clone of the shutdown signal; triggering it is equivalent to a stop
    /// request.
    #[must_use]
    pub fn shutdown_signal(&self) -> Shutdown {
        self.shutdown.clone()
    }

    /// True when neither scheduler was started.
    #[must_use]
    pub const fn is_idle(&self) -> bool {
        self.snoozer.is_none() && self.clockwork.is_none()
    }

    /// Broadcast shutdown and wait up to the grace period for both
    /// schedulers; anything still running afterwards is aborted.
    ///
    /// # Errors
    ///
    /// Returns the first fatal error a scheduler reported.
    pub async fn stop(self) -> Result<ShutdownReport, SchedulerError> {
        info!(grace_secs = self.grace.as_secs(), "stopping schedulers");
        self.shutdown.trigger();
        let deadline = Instant::now() + self.grace;

        let mut report = ShutdownReport::default();
        let mut fatal = None;
        for (name, handle, slot) in [
            ("snoozer", self.snoozer, &mut report.snoozer),
            ("clockwork", self.clockwork, &mut report.clockwork),
        ] {
            let Some(mut handle) = handle else { continue };
            match tokio::time::timeout_at(deadline, &mut handle).await {
                Ok(Ok(Ok(run))) => *slot = Some(run),
                Ok(Ok(Err(e))) => {
                    fatal.get_or_insert(e);
                }
                Ok(Err(join)) => {
                    error!(scheduler = name, "scheduler task failed: {join}");
                    fatal.get_or_insert(SchedulerError::TaskFailed(join.to_string()));
                }
                Err(_) => {
                    warn!(scheduler = name, "grace period elapsed, aborting");
                    handle.abort();
                    report.forced = true;
                }
            }
        }

        match fatal {
            Some(e) => Err(e),
            None => {
                info!(
                    dispatched = report.total_dispatched(),
                    forced = report.forced,
                    "orchestrator stopped"
                );
                Ok(report)
            }
        }
    }
}
