//! Tests for error types

use market_cadence::config::{ConfigError, ConfigErrors};
use market_cadence::core::{FetchError, FetchErrorKind, PersistError, SchedulerError};

#[test]
fn test_cancelled_error() {
    let err = SchedulerError::Cancelled;
    assert_eq!(format!("{}", err), "cancelled by shutdown");
    assert!(err.is_cancelled());
}

#[test]
fn test_budget_corrupted_error() {
    let err = SchedulerError::BudgetCorrupted {
        in_window: 16,
        capacity: 15,
    };
    assert_eq!(
        format!("{}", err),
        "budget state corrupted: 16 grants in window, capacity 15"
    );
    assert!(!err.is_cancelled());
}

#[test]
fn test_config_error_aggregates() {
    let errors = ConfigErrors(vec![
        ConfigError {
            location: "limits".into(),
            field: "window_seconds",
            message: "must be greater than 0".into(),
        },
        ConfigError {
            location: "assets[3]".into(),
            field: "endpoint",
            message: "is required".into(),
        },
    ]);
    let err = SchedulerError::from(errors);
    assert_eq!(
        format!("{}", err),
        "configuration rejected: 2 configuration error(s): \
         limits: `window_seconds` must be greater than 0; assets[3]: `endpoint` is required"
    );
}

#[test]
fn test_collaborator_errors() {
    let err = FetchError::new(FetchErrorKind::RateLimited, "429 Too Many Requests");
    assert_eq!(format!("{}", err), "rate limited: 429 Too Many Requests");
    let err = PersistError("disk full".into());
    assert_eq!(format!("{}", err), "persist failed: disk full");
}

#[test]
fn test_task_failed_error() {
    let err = SchedulerError::TaskFailed("panicked".into());
    assert_eq!(format!("{}", err), "scheduler task failed: panicked");
}
