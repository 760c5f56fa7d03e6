//! Audit sink implementations.
//!
//! Every dispatch and every per-asset failure is surfaced here in addition
//! to the tracing log, so an operator can see which assets are struggling
//! without grepping logs.

use std::collections::VecDeque;
use std::fmt;
use std::sync::Arc;

use parking_lot::Mutex;

use crate::core::{AssetId, EndpointKind};
use crate::util::clock::now_ms;

/// What happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AuditAction {
    /// A job passed the rate limiter and was handed to the fetcher.
    Dispatched,
    /// Fetched and persisted.
    Fetched,
    /// The fetch failed and will not be retried in this cycle.
    FetchFailed,
    /// The sink rejected a fetched response.
    PersistFailed,
    /// A snoozer asset was put into transient-failure cooldown.
    CooldownStarted,
    /// A clockwork asset will be retried inside the same boundary.
    RetryScheduled,
    /// A clockwork asset ran out of retries for its boundary.
    RetriesExhausted,
}

impl AuditAction {
    /// Stable lowercase name.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Dispatched => "dispatched",
            Self::Fetched => "fetched",
            Self::FetchFailed => "fetch_failed",
            Self::PersistFailed => "persist_failed",
            Self::CooldownStarted => "cooldown_started",
            Self::RetryScheduled => "retry_scheduled",
            Self::RetriesExhausted => "retries_exhausted",
        }
    }

    /// Actions that represent a problem with the asset.
    #[must_use]
    pub const fn is_failure(self) -> bool {
        matches!(
            self,
            Self::FetchFailed | Self::PersistFailed | Self::CooldownStarted | Self::RetriesExhausted
        )
    }
}

impl fmt::Display for AuditAction {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Audit event structure.
#[derive(Debug, Clone)]
pub struct AuditEvent {
    /// Event identifier.
    pub event_id: String,
    /// Scheduler that produced the event (`snoozer` or `clockwork`).
    pub scheduler: &'static str,
    /// Asset concerned.
    pub asset: AssetId,
    /// Endpoint concerned.
    pub endpoint: EndpointKind,
    /// Action taken.
    pub action: AuditAction,
    /// Timestamp milliseconds.
    pub created_at_ms: u128,
    /// Additional context.
    pub detail: Option<String>,
}

/// Audit sink abstraction.
pub trait AuditSink: Send {
    /// Record an audit event.
    fn record(&mut self, event: AuditEvent);
}

/// Audit sink shared between a scheduler and its sub-flows.
pub type SharedAudit = Arc<Mutex<Box<dyn AuditSink>>>;

/// Wrap a sink for sharing.
pub fn shared_audit(sink: impl AuditSink + 'static) -> SharedAudit {
    Arc::new(Mutex::new(Box::new(sink)))
}

/// In-memory audit sink for testing and dev.
pub struct InMemoryAuditSink {
    events: Arc<Mutex<VecDeque<AuditEvent>>>,
    max_events: usize,
}

impl InMemoryAuditSink {
    /// Create a new in-memory sink with a bounded buffer.
    #[must_use]
    pub fn new(max_events: usize) -> Self {
        Self {
            events: Arc::new(Mutex::new(VecDeque::with_capacity(max_events))),
            max_events,
        }
    }

    /// Reader that stays valid after the sink is moved into a scheduler.
    #[must_use]
    pub fn reader(&self) -> AuditReader {
        AuditReader {
            events: Arc::clone(&self.events),
        }
    }

    /// Retrieve a snapshot of stored events.
    #[must_use]
    pub fn events(&self) -> Vec<AuditEvent> {
        self.events.lock().iter().cloned().collect()
    }
}

impl AuditSink for InMemoryAuditSink {
    fn record(&mut self, event: AuditEvent) {
        let mut events = self.events.lock();
        if events.len() >= self.max_events {
            events.pop_front();
        }
        events.push_back(event);
    }
}

/// Read handle onto an [`InMemoryAuditSink`].
#[derive(Clone)]
pub struct AuditReader {
    events: Arc<Mutex<VecDeque<AuditEvent>>>,
}

impl AuditReader {
    /// Snapshot of stored events.
    #[must_use]
    pub fn events(&self) -> Vec<AuditEvent> {
        self.events.lock().iter().cloned().collect()
    }

    /// Count events with `action`.
    #[must_use]
    pub fn count(&self, action: AuditAction) -> usize {
        self.events.lock().iter().filter(|e| e.action == action).count()
    }
}

/// Helper to build an audit event from context.
pub fn build_audit_event(
    scheduler: &'static str,
    asset: &AssetId,
    endpoint: EndpointKind,
    action: AuditAction,
    detail: Option<String>,
) -> AuditEvent {
    AuditEvent {
        event_id: uuid::Uuid::new_v4().to_string(),
        scheduler,
        asset: asset.clone(),
        endpoint,
        action,
        created_at_ms: now_ms(),
        detail,
    }
}

/// Record into an optional shared sink.
pub(crate) fn record(
    audit: Option<&SharedAudit>,
    scheduler: &'static str,
    asset: &AssetId,
    endpoint: EndpointKind,
    action: AuditAction,
    detail: Option<String>,
) {
    if let Some(sink) = audit {
        sink.lock()
            .record(build_audit_event(scheduler, asset, endpoint, action, detail));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn asset() -> AssetId {
        AssetId {
            name: "Glock-18 | Fade".into(),
            app_id: 730,
        }
    }

    #[test]
    fn ring_buffer_drops_oldest() {
        let mut sink = InMemoryAuditSink::new(2);
        for action in [
            AuditAction::Dispatched,
            AuditAction::FetchFailed,
            AuditAction::Fetched,
        ] {
            sink.record(build_audit_event(
                "snoozer",
                &asset(),
                EndpointKind::PriceOverview,
                action,
                None,
            ));
        }
        let events = sink.events();
        assert_eq!(events.len(), 2);
        assert_eq!(events[0].action, AuditAction::FetchFailed);
        assert_eq!(events[1].action, AuditAction::Fetched);
    }

    #[test]
    fn reader_sees_events_after_sink_is_shared() {
        let sink = InMemoryAuditSink::new(16);
        let reader = sink.reader();
        let shared = shared_audit(sink);
        record(
            Some(&shared),
            "clockwork",
            &asset(),
            EndpointKind::PriceHistory,
            AuditAction::RetriesExhausted,
            Some("server error 503".into()),
        );
        record(
            None,
            "clockwork",
            &asset(),
            EndpointKind::PriceHistory,
            AuditAction::Fetched,
            None,
        );
        assert_eq!(reader.count(AuditAction::RetriesExhausted), 1);
        let event = &reader.events()[0];
        assert_eq!(event.scheduler, "clockwork");
        assert!(event.action.is_failure());
        assert_eq!(event.event_id.len(), 36);
    }
}
