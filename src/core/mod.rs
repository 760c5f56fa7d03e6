//! Core scheduling abstractions and budget accounting.

pub mod asset;
pub mod audit;
pub mod clockwork;
pub mod collaborator;
pub mod error;
pub mod orchestrator;
pub mod rate_limiter;
pub mod snoozer;

#[cfg(test)]
pub(crate) mod test_support;

pub use asset::{AssetId, EndpointKind, Job, MarketParams, TrackedAsset};
pub use audit::{
    build_audit_event, shared_audit, AuditAction, AuditEvent, AuditReader, AuditSink,
    InMemoryAuditSink, SharedAudit,
};
pub use clockwork::{
    BoundarySchedule, ClockworkEntry, ClockworkPolicy, ClockworkScheduler, ClockworkState,
    RetryPolicy,
};
pub use collaborator::{
    FetchError, FetchErrorKind, MarketFetcher, MarketResponse, PersistError, PersistRecord,
    ResultSink, RoundTrip, RunReport,
};
pub use error::{AppResult, SchedulerError};
pub use orchestrator::{Orchestrator, OrchestratorConfig, OrchestratorHandle, ShutdownReport};
pub use rate_limiter::{Grant, RateLimit, RateLimiter};
pub use snoozer::{
    select_most_urgent, urgency_score, Selection, SnoozeEntry, SnoozerPolicy, SnoozerScheduler,
    SnoozerState,
};
