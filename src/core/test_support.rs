//! Scripted collaborators shared by the unit tests.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tokio::time::Instant;

use crate::core::{
    AssetId, EndpointKind, FetchError, FetchErrorKind, Job, MarketFetcher, MarketParams,
    MarketResponse, TrackedAsset,
};

pub fn asset(name: &str, endpoint: EndpointKind, interval_secs: Option<u64>) -> Arc<TrackedAsset> {
    Arc::new(TrackedAsset {
        id: AssetId {
            name: name.into(),
            app_id: 730,
        },
        endpoint,
        polling_interval: interval_secs.map(Duration::from_secs),
        params: MarketParams::default(),
        item_nameid: endpoint.requires_item_id().then_some(176_000_000),
    })
}

struct Script {
    kind: FetchErrorKind,
    remaining: Option<u32>,
}

#[derive(Clone, Default)]
pub struct ScriptedFetcher {
    calls: Arc<Mutex<Vec<(String, Instant)>>>,
    scripts: Arc<Mutex<HashMap<String, Script>>>,
    latency: Duration,
}

impl ScriptedFetcher {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = latency;
        self
    }

    pub fn fail_always(&self, name: &str, kind: FetchErrorKind) {
        self.scripts.lock().insert(
            name.into(),
            Script {
                kind,
                remaining: None,
            },
        );
    }

    pub fn fail_times(&self, name: &str, kind: FetchErrorKind, times: u32) {
        self.scripts.lock().insert(
            name.into(),
            Script {
                kind,
                remaining: Some(times),
            },
        );
    }

    pub fn calls_for(&self, name: &str) -> Vec<Instant> {
        self.calls
            .lock()
            .iter()
            .filter(|(n, _)| n == name)
            .map(|(_, t)| *t)
            .collect()
    }

    pub fn total_calls(&self) -> usize {
        self.calls.lock().len()
    }
}

#[async_trait]
impl MarketFetcher for ScriptedFetcher {
    async fn fetch(&self, job: &Job) -> Result<MarketResponse, FetchError> {
        let name = job.asset.id.name.clone();
        self.calls.lock().push((name.clone(), Instant::now()));
        if !self.latency.is_zero() {
            tokio::time::sleep(self.latency).await;
        }
        let mut scripts = self.scripts.lock();
        if let Some(script) = scripts.get_mut(&name) {
            match script.remaining {
                None => return Err(FetchError::new(script.kind, "scripted failure")),
                Some(n) if n > 0 => {
                    script.remaining = Some(n - 1);
                    return Err(FetchError::new(script.kind, "scripted failure"));
                }
                Some(_) => {}
            }
        }
        Ok(MarketResponse::new(serde_json::json!({
            "asset": name,
            "endpoint": job.endpoint.as_str(),
        })))
    }
}
