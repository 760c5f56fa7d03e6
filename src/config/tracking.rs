//! Tracker configuration: budget, scheduler policies and tracked assets.
//!
//! Raw records deserialize leniently (missing fields become `None`) so that
//! [`TrackerConfig::validate`] can report every problem in one pass instead
//! of failing on the first one.

use std::fmt;
use std::path::Path;
use std::time::Duration;

use anyhow::Context;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::{info, warn};

use crate::core::{
    AppResult, AssetId, BoundarySchedule, ClockworkPolicy, EndpointKind, MarketParams,
    OrchestratorConfig, RateLimit, RetryPolicy, SnoozerPolicy, TrackedAsset,
};

/// Environment variable overriding `limits.requests_per_window`.
pub const ENV_REQUESTS_PER_WINDOW: &str = "MARKET_REQUESTS_PER_WINDOW";
/// Environment variable overriding `limits.window_seconds`.
pub const ENV_WINDOW_SECONDS: &str = "MARKET_WINDOW_SECONDS";
/// Environment variable overriding `shutdown_grace_seconds`.
pub const ENV_SHUTDOWN_GRACE_SECONDS: &str = "MARKET_SHUTDOWN_GRACE_SECONDS";

/// Global request budget.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct LimitsConfig {
    /// Maximum requests inside one window (`N`).
    pub requests_per_window: usize,
    /// Window length in seconds (`W`).
    pub window_seconds: u64,
}

/// Snoozer tuning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct SnoozerConfig {
    /// Cap on intervals skipped after repeated transient failures.
    pub max_cooldown_multiplier: u32,
}

impl Default for SnoozerConfig {
    fn default() -> Self {
        Self {
            max_cooldown_multiplier: 8,
        }
    }
}

/// Clockwork tuning.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct ClockworkConfig {
    /// Distance between boundaries.
    pub boundary_seconds: u64,
    /// Shift of each boundary past the epoch grid.
    pub offset_seconds: u64,
    /// Retries after the first failed attempt.
    pub max_retries: u32,
    /// First retry delay.
    pub base_backoff_seconds: u64,
    /// Cap on a single retry delay.
    pub max_backoff_seconds: u64,
}

impl Default for ClockworkConfig {
    fn default() -> Self {
        Self {
            boundary_seconds: 3600,
            offset_seconds: 1800,
            max_retries: 4,
            base_backoff_seconds: 30,
            max_backoff_seconds: 240,
        }
    }
}

fn default_currency() -> u32 {
    1
}

fn default_country() -> String {
    "US".into()
}

fn default_language() -> String {
    "english".into()
}

fn default_grace() -> u64 {
    30
}

/// One tracked asset as written in the configuration file.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssetEntry {
    /// Market item name.
    pub market_hash_name: Option<String>,
    /// Application scope.
    pub app_id: Option<u32>,
    /// Endpoint name, see [`EndpointKind`].
    pub endpoint: Option<String>,
    /// Required for every endpoint except `price_history`.
    pub polling_interval_seconds: Option<u64>,
    /// Required for order-book endpoints.
    pub item_nameid: Option<u64>,
    /// Currency code.
    #[serde(default = "default_currency")]
    pub currency: u32,
    /// Country code.
    #[serde(default = "default_country")]
    pub country: String,
    /// Response language.
    #[serde(default = "default_language")]
    pub language: String,
}

/// Root configuration.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackerConfig {
    /// Global request budget.
    pub limits: LimitsConfig,
    /// Snoozer tuning.
    #[serde(default)]
    pub snoozer: SnoozerConfig,
    /// Clockwork tuning.
    #[serde(default)]
    pub clockwork: ClockworkConfig,
    /// Seconds `stop` waits for in-flight work.
    #[serde(default = "default_grace")]
    pub shutdown_grace_seconds: u64,
    /// Tracked assets in scheduling order.
    #[serde(default)]
    pub assets: Vec<AssetEntry>,
}

/// A single validation problem.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{location}: `{field}` {message}")]
pub struct ConfigError {
    /// Section or asset the problem belongs to.
    pub location: String,
    /// Offending field.
    pub field: &'static str,
    /// What is wrong with it.
    pub message: String,
}

impl ConfigError {
    fn new(location: impl Into<String>, field: &'static str, message: impl Into<String>) -> Self {
        Self {
            location: location.into(),
            field,
            message: message.into(),
        }
    }
}

/// Every problem found in one validation pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ConfigErrors(pub Vec<ConfigError>);

impl ConfigErrors {
    /// Individual problems in discovery order.
    #[must_use]
    pub fn errors(&self) -> &[ConfigError] {
        &self.0
    }

    /// Number of problems.
    #[must_use]
    pub fn len(&self) -> usize {
        self.0.len()
    }

    /// True when nothing was reported.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    fn push(&mut self, error: ConfigError) {
        self.0.push(error);
    }
}

impl fmt::Display for ConfigErrors {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} configuration error(s)", self.0.len())?;
        for (i, e) in self.0.iter().enumerate() {
            f.write_str(if i == 0 { ": " } else { "; " })?;
            write!(f, "{e}")?;
        }
        Ok(())
    }
}

impl std::error::Error for ConfigErrors {}

/// Configuration that passed validation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ValidatedConfig {
    /// Budget and policies for the orchestrator.
    pub orchestrator: OrchestratorConfig,
    /// Assets in configuration order.
    pub assets: Vec<TrackedAsset>,
}

impl TrackerConfig {
    /// Parse a JSON document. Validation is a separate step.
    ///
    /// # Errors
    ///
    /// Fails on malformed JSON or wrongly typed fields.
    pub fn from_json_str(input: &str) -> AppResult<Self> {
        serde_json::from_str(input).context("failed to parse tracker configuration")
    }

    /// Read and parse a JSON file.
    ///
    /// # Errors
    ///
    /// Fails when the file cannot be read or parsed.
    pub fn from_json_file(path: impl AsRef<Path>) -> AppResult<Self> {
        let path = path.as_ref();
        let raw = std::fs::read_to_string(path)
            .with_context(|| format!("failed to read {}", path.display()))?;
        Self::from_json_str(&raw).with_context(|| format!("in {}", path.display()))
    }

    /// Load `.env` if present, read `path`, apply environment overrides and
    /// validate.
    ///
    /// # Errors
    ///
    /// Fails on unreadable or malformed input, bad overrides, or any
    /// validation problem.
    pub fn load(path: impl AsRef<Path>) -> AppResult<ValidatedConfig> {
        if let Err(e) = dotenvy::dotenv() {
            if !e.not_found() {
                warn!("ignoring unreadable .env file: {e}");
            }
        }
        let mut cfg = Self::from_json_file(path)?;
        Ok(cfg.resolve(|key| std::env::var(key).ok())?)
    }

    /// Apply overrides from `lookup`, then validate. Bad overrides and
    /// validation problems come back together in one [`ConfigErrors`].
    ///
    /// # Errors
    ///
    /// Returns every override and validation problem found.
    pub fn resolve<F>(&mut self, lookup: F) -> Result<ValidatedConfig, ConfigErrors>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut errors = self.apply_overrides_from(lookup).err().unwrap_or_default();
        match self.validate() {
            Ok(validated) if errors.is_empty() => Ok(validated),
            Ok(_) => Err(errors),
            Err(more) => {
                errors.0.extend(more.0);
                Err(errors)
            }
        }
    }

    /// Apply `MARKET_*` overrides from the process environment.
    ///
    /// # Errors
    ///
    /// Reports every override that is not a valid number.
    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigErrors> {
        self.apply_overrides_from(|key| std::env::var(key).ok())
    }

    /// Apply overrides from an arbitrary lookup.
    ///
    /// # Errors
    ///
    /// Reports every override that is not a valid number.
    pub fn apply_overrides_from<F>(&mut self, lookup: F) -> Result<(), ConfigErrors>
    where
        F: Fn(&str) -> Option<String>,
    {
        let mut errors = ConfigErrors::default();
        if let Some(n) = parse_override(
            &lookup,
            ENV_REQUESTS_PER_WINDOW,
            "requests_per_window",
            &mut errors,
        ) {
            self.limits.requests_per_window = n;
        }
        if let Some(w) =
            parse_override(&lookup, ENV_WINDOW_SECONDS, "window_seconds", &mut errors)
        {
            self.limits.window_seconds = w;
        }
        if let Some(g) = parse_override(
            &lookup,
            ENV_SHUTDOWN_GRACE_SECONDS,
            "shutdown_grace_seconds",
            &mut errors,
        ) {
            self.shutdown_grace_seconds = g;
        }
        if errors.is_empty() {
            Ok(())
        } else {
            Err(errors)
        }
    }

    /// Check everything and build typed records.
    ///
    /// # Errors
    ///
    /// Returns all problems found, naming each offending asset.
    pub fn validate(&self) -> Result<ValidatedConfig, ConfigErrors> {
        let mut errors = ConfigErrors::default();

        if self.limits.requests_per_window == 0 {
            errors.push(ConfigError::new(
                "limits",
                "requests_per_window",
                "must be greater than 0",
            ));
        }
        if self.limits.window_seconds == 0 {
            errors.push(ConfigError::new("limits", "window_seconds", "must be greater than 0"));
        }
        let cw = &self.clockwork;
        if cw.boundary_seconds == 0 {
            errors.push(ConfigError::new(
                "clockwork",
                "boundary_seconds",
                "must be greater than 0",
            ));
        } else if cw.offset_seconds >= cw.boundary_seconds {
            errors.push(ConfigError::new(
                "clockwork",
                "offset_seconds",
                format!("must be less than boundary_seconds ({})", cw.boundary_seconds),
            ));
        }
        if cw.base_backoff_seconds == 0 {
            errors.push(ConfigError::new(
                "clockwork",
                "base_backoff_seconds",
                "must be greater than 0",
            ));
        }
        if cw.max_backoff_seconds < cw.base_backoff_seconds {
            errors.push(ConfigError::new(
                "clockwork",
                "max_backoff_seconds",
                "must not be less than base_backoff_seconds",
            ));
        }
        if self.snoozer.max_cooldown_multiplier == 0 {
            errors.push(ConfigError::new(
                "snoozer",
                "max_cooldown_multiplier",
                "must be at least 1",
            ));
        }

        let assets: Vec<TrackedAsset> = self
            .assets
            .iter()
            .enumerate()
            .filter_map(|(index, entry)| validate_asset(index, entry, &mut errors))
            .collect();

        if !errors.is_empty() {
            return Err(errors);
        }

        let orchestrator = OrchestratorConfig {
            limit: RateLimit::per_seconds(
                self.limits.requests_per_window,
                self.limits.window_seconds,
            ),
            grace: Duration::from_secs(self.shutdown_grace_seconds),
            snoozer: SnoozerPolicy {
                max_cooldown_multiplier: self.snoozer.max_cooldown_multiplier,
            },
            clockwork: ClockworkPolicy {
                schedule: BoundarySchedule::new(
                    Duration::from_secs(cw.boundary_seconds),
                    Duration::from_secs(cw.offset_seconds),
                ),
                retry: RetryPolicy {
                    max_retries: cw.max_retries,
                    base_backoff: Duration::from_secs(cw.base_backoff_seconds),
                    max_backoff: Duration::from_secs(cw.max_backoff_seconds),
                },
            },
        };
        Ok(ValidatedConfig {
            orchestrator,
            assets,
        })
    }
}

fn parse_override<T, F>(
    lookup: &F,
    key: &str,
    field: &'static str,
    errors: &mut ConfigErrors,
) -> Option<T>
where
    T: std::str::FromStr,
    F: Fn(&str) -> Option<String>,
{
    let raw = lookup(key)?;
    match raw.trim().parse() {
        Ok(value) => Some(value),
        Err(_) => {
            errors.push(ConfigError::new(
                format!("env {key}"),
                field,
                format!("is not a valid number: {raw:?}"),
            ));
            None
        }
    }
}

fn validate_asset(
    index: usize,
    entry: &AssetEntry,
    errors: &mut ConfigErrors,
) -> Option<TrackedAsset> {
    let location = match &entry.market_hash_name {
        Some(name) => format!("assets[{index}] ({name})"),
        None => format!("assets[{index}]"),
    };
    let before = errors.len();

    let name = entry
        .market_hash_name
        .as_deref()
        .map(str::trim)
        .filter(|n| !n.is_empty());
    if name.is_none() {
        errors.push(ConfigError::new(&location, "market_hash_name", "is required"));
    }
    if entry.app_id.is_none() {
        errors.push(ConfigError::new(&location, "app_id", "is required"));
    }
    let endpoint = match entry.endpoint.as_deref() {
        None => {
            errors.push(ConfigError::new(&location, "endpoint", "is required"));
            None
        }
        Some(raw) => match raw.parse::<EndpointKind>() {
            Ok(kind) => Some(kind),
            Err(e) => {
                errors.push(ConfigError::new(&location, "endpoint", e));
                None
            }
        },
    };

    if let Some(kind) = endpoint {
        if !kind.is_boundary_aligned() {
            match entry.polling_interval_seconds {
                None => errors.push(ConfigError::new(
                    &location,
                    "polling_interval_seconds",
                    format!("is required for {kind}"),
                )),
                Some(0) => errors.push(ConfigError::new(
                    &location,
                    "polling_interval_seconds",
                    "must be greater than 0",
                )),
                Some(_) => {}
            }
        }
        if kind.requires_item_id() && entry.item_nameid.is_none() {
            errors.push(ConfigError::new(
                &location,
                "item_nameid",
                format!("is required for {kind}"),
            ));
        }
    }

    if errors.len() > before {
        return None;
    }
    Some(TrackedAsset {
        id: AssetId {
            name: name?.to_owned(),
            app_id: entry.app_id?,
        },
        endpoint: endpoint?,
        polling_interval: entry.polling_interval_seconds.map(Duration::from_secs),
        params: MarketParams {
            currency: entry.currency,
            country: entry.country.clone(),
            language: entry.language.clone(),
        },
        item_nameid: entry.item_nameid,
    })
}

/// Worst-case demand per window compared with the budget.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FeasibilityReport {
    /// Budget `N`.
    pub capacity: usize,
    /// Window `W`.
    pub window: Duration,
    /// Requests the snoozer would like per window.
    pub snoozer_requests: u64,
    /// Requests the clockwork needs per window.
    pub clockwork_requests: u64,
    /// Assets due immediately at startup.
    pub startup_burst: usize,
}

impl FeasibilityReport {
    /// Total requested per window.
    #[must_use]
    pub const fn total_requests(&self) -> u64 {
        self.snoozer_requests + self.clockwork_requests
    }

    /// Demand as a percentage of the budget.
    #[must_use]
    #[allow(clippy::cast_precision_loss)]
    pub fn utilization_pct(&self) -> f64 {
        if self.capacity == 0 {
            return f64::INFINITY;
        }
        self.total_requests() as f64 * 100.0 / self.capacity as f64
    }

    /// Whether configured cadences fit inside the budget.
    #[must_use]
    pub fn is_feasible(&self) -> bool {
        self.total_requests() <= self.capacity as u64
    }

    /// Whether the initial fetch of every asset exceeds one window's budget.
    #[must_use]
    pub const fn has_startup_burst(&self) -> bool {
        self.startup_burst > self.capacity
    }

    /// Log the report: `info!` when feasible, `warn!` otherwise.
    pub fn log(&self) {
        let utilization = format!("{:.1}%", self.utilization_pct());
        if self.is_feasible() {
            info!(
                snoozer = self.snoozer_requests,
                clockwork = self.clockwork_requests,
                capacity = self.capacity,
                %utilization,
                "request budget feasible"
            );
        } else {
            warn!(
                snoozer = self.snoozer_requests,
                clockwork = self.clockwork_requests,
                capacity = self.capacity,
                %utilization,
                "configured cadences exceed the request budget, assets will fall behind"
            );
        }
        if self.has_startup_burst() {
            warn!(
                assets = self.startup_burst,
                capacity = self.capacity,
                "startup burst exceeds one window, initial fetches will spread over several windows"
            );
        }
    }
}

impl ValidatedConfig {
    /// Compute worst-case demand per window.
    #[must_use]
    pub fn feasibility(&self) -> FeasibilityReport {
        let limit = self.orchestrator.limit;
        let window = limit.window.as_secs();
        let boundary = self.orchestrator.clockwork.schedule.size.as_secs().max(1);
        let mut report = FeasibilityReport {
            capacity: limit.capacity,
            window: limit.window,
            snoozer_requests: 0,
            clockwork_requests: 0,
            startup_burst: self.assets.len(),
        };
        for asset in &self.assets {
            if asset.endpoint.is_boundary_aligned() {
                report.clockwork_requests += window.div_ceil(boundary);
            } else if let Some(interval) = asset.polling_interval {
                report.snoozer_requests += window.div_ceil(interval.as_secs().max(1));
            }
        }
        report
    }
}
