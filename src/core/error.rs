//! Error types for scheduler operations.

use thiserror::Error;

use crate::config::ConfigErrors;

/// Errors produced by scheduler components.
#[derive(Debug, Error)]
pub enum SchedulerError {
    /// Shutdown was requested while the operation was suspended.
    #[error("cancelled by shutdown")]
    Cancelled,
    /// The grant log holds more entries inside the window than the budget allows.
    #[error("budget state corrupted: {in_window} grants in window, capacity {capacity}")]
    BudgetCorrupted {
        /// Grants counted inside the trailing window.
        in_window: usize,
        /// Configured capacity.
        capacity: usize,
    },
    /// Configuration was rejected at startup.
    #[error("configuration rejected: {0}")]
    Config(#[from] ConfigErrors),
    /// A scheduler task panicked or could not be joined.
    #[error("scheduler task failed: {0}")]
    TaskFailed(String),
}

impl SchedulerError {
    /// True when the error only signals cooperative shutdown.
    #[must_use]
    pub const fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled)
    }
}

/// Application-facing result using anyhow for higher-level contexts.
pub type AppResult<T> = Result<T, anyhow::Error>;
