//! Build an [`Orchestrator`] from tracker configuration.

use std::sync::Arc;

use tracing::info;

use crate::config::{TrackerConfig, ValidatedConfig};
use crate::core::{MarketFetcher, Orchestrator, ResultSink, SchedulerError};

/// Validate `cfg`, log the budget feasibility report and wire up an
/// orchestrator around the given collaborators.
///
/// # Errors
///
/// `SchedulerError::Config` with every validation problem found.
pub fn build_orchestrator(
    cfg: &TrackerConfig,
    fetcher: Arc<dyn MarketFetcher>,
    sink: Arc<dyn ResultSink>,
) -> Result<Orchestrator, SchedulerError> {
    let validated = cfg.validate()?;
    Ok(orchestrator_from_validated(validated, fetcher, sink))
}

/// Wire up an orchestrator from configuration that already passed
/// validation.
#[must_use]
pub fn orchestrator_from_validated(
    validated: ValidatedConfig,
    fetcher: Arc<dyn MarketFetcher>,
    sink: Arc<dyn ResultSink>,
) -> Orchestrator {
    validated.feasibility().log();
    let (aligned, cadence): (Vec<_>, Vec<_>) = validated
        .assets
        .iter()
        .partition(|a| a.endpoint.is_boundary_aligned());
    info!(
        snoozer_assets = cadence.len(),
        clockwork_assets = aligned.len(),
        "configuration loaded"
    );
    Orchestrator::new(validated.orchestrator, validated.assets, fetcher, sink)
}
