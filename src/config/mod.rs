//! Configuration models for the request budget, scheduler policies and
//! tracked assets.

pub mod tracking;

pub use tracking::{
    AssetEntry, ClockworkConfig, ConfigError, ConfigErrors, FeasibilityReport, LimitsConfig,
    SnoozerConfig, TrackerConfig, ValidatedConfig,
};
