//! Builders to construct the orchestrator from configuration.

pub mod orchestrator_builder;

pub use orchestrator_builder::{build_orchestrator, orchestrator_from_validated};
