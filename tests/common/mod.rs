//! Shared fixtures for integration tests.

#![allow(dead_code)]

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use market_cadence::core::{
    AssetId, EndpointKind, FetchError, FetchErrorKind, Job, MarketFetcher, MarketParams,
    MarketResponse, TrackedAsset,
};
use parking_lot::Mutex;
use tokio::time::Instant;

/// 2023-11-14 22:00:00 UTC.
pub const TOP_OF_HOUR: Duration = Duration::from_secs(1_699_999_200);

/// One observed fetch.
#[derive(Debug, Clone)]
pub struct Call {
    pub name: String,
    pub endpoint: EndpointKind,
    pub at: Instant,
}

/// Fetcher that records every call and can be told to fail for an asset.
#[derive(Clone, Default)]
pub struct RecordingFetcher {
    calls: Arc<Mutex<Vec<Call>>>,
    failures: Arc<Mutex<HashMap<String, FetchErrorKind>>>,
}

impl RecordingFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn fail(&self, name: &str, kind: FetchErrorKind) {
        self.failures.lock().insert(name.to_owned(), kind);
    }

    pub fn calls(&self) -> Vec<Call> {
        self.calls.lock().clone()
    }

    pub fn count_for(&self, endpoint: EndpointKind) -> usize {
        self.calls.lock().iter().filter(|c| c.endpoint == endpoint).count()
    }
}

#[async_trait]
impl MarketFetcher for RecordingFetcher {
    async fn fetch(&self, job: &Job) -> Result<MarketResponse, FetchError> {
        self.calls.lock().push(Call {
            name: job.asset.id.name.clone(),
            endpoint: job.endpoint,
            at: Instant::now(),
        });
        if let Some(kind) = self.failures.lock().get(&job.asset.id.name) {
            return Err(FetchError::new(*kind, "injected failure"));
        }
        Ok(MarketResponse::new(serde_json::json!({ "success": true })))
    }
}

pub fn tracked(name: &str, endpoint: EndpointKind, interval_secs: Option<u64>) -> TrackedAsset {
    TrackedAsset {
        id: AssetId {
            name: name.to_owned(),
            app_id: 730,
        },
        endpoint,
        polling_interval: interval_secs.map(Duration::from_secs),
        params: MarketParams::default(),
        item_nameid: endpoint.requires_item_id().then_some(176_118_270),
    }
}

/// Largest number of instants falling inside any trailing `window`.
pub fn max_in_window(instants: &[Instant], window: Duration) -> usize {
    let mut sorted = instants.to_vec();
    sorted.sort();
    let mut best = 0;
    let mut start = 0;
    for end in 0..sorted.len() {
        while sorted[end].duration_since(sorted[start]) >= window {
            start += 1;
        }
        best = best.max(end - start + 1);
    }
    best
}
