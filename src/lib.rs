//! # Market Cadence
//!
//! Rate-limited dual scheduling for polling a third-party market API under a
//! single shared request budget.
//!
//! Two schedulers compete for one sliding-window budget of `N` requests per
//! trailing `W` seconds:
//!
//! - **SnoozerScheduler** keeps high-frequency assets close to their polling
//!   interval, always servicing the most overdue asset first.
//! - **ClockworkScheduler** services low-frequency assets exactly once per
//!   wall-clock boundary (half past every hour by default), retrying
//!   transient failures inside the boundary.
//!
//! Both acquire from the same [`core::RateLimiter`], which grants strictly in
//! arrival order and never exceeds the budget. The [`core::Orchestrator`]
//! constructs that limiter once, injects it into both schedulers and owns the
//! shutdown signal.
//!
//! ## Collaborators
//!
//! The wire-level client and the storage layer stay outside the crate. Plug
//! them in by implementing [`core::MarketFetcher`] and [`core::ResultSink`]:
//!
//! ```rust,ignore
//! use std::sync::Arc;
//! use market_cadence::builders::build_orchestrator;
//! use market_cadence::config::TrackerConfig;
//! use market_cadence::util::init_tracing;
//!
//! init_tracing();
//! let cfg = TrackerConfig::from_json_file("tracking.json")?;
//! let orchestrator = build_orchestrator(&cfg, Arc::new(my_fetcher), Arc::new(my_sink))?;
//! let report = orchestrator.run_until_signal().await?;
//! ```
//!
//! For complete scenarios, see:
//! - `tests/dual_scheduler_test.rs` - both schedulers against one budget
//! - `tests/rate_limiter_test.rs` - window and fairness properties

#![deny(missing_docs)]
#![deny(unsafe_code)]
#![warn(clippy::all)]
#![warn(clippy::pedantic)]
#![warn(clippy::nursery)]

/// Core scheduling abstractions and budget accounting.
pub mod core;
/// Configuration models for the budget, policies and tracked assets.
pub mod config;
/// Builders to construct scheduler components from configuration.
pub mod builders;
/// Infrastructure adapters for result storage.
pub mod infra;
/// Shutdown signalling and process signal handling.
pub mod runtime;
/// Shared utilities.
pub mod util;
