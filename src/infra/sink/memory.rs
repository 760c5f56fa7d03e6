//! In-memory result sink.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::SystemTime;

use async_trait::async_trait;
use parking_lot::Mutex;

use crate::core::{AssetId, EndpointKind, PersistError, PersistRecord, ResultSink};

/// Stored copy of a persisted response.
#[derive(Debug, Clone)]
pub struct StoredRecord {
    /// Endpoint the response came from.
    pub endpoint: EndpointKind,
    /// Asset described.
    pub asset_id: AssetId,
    /// Response body.
    pub body: serde_json::Value,
    /// Observation time.
    pub observed_at: SystemTime,
}

/// Simple in-memory sink for development/testing. Clones share storage.
#[derive(Clone, Default)]
pub struct InMemorySink {
    records: Arc<Mutex<Vec<StoredRecord>>>,
    failing: Arc<AtomicBool>,
}

impl InMemorySink {
    /// Create an empty sink.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent `persist` fail (or succeed again).
    pub fn set_failing(&self, failing: bool) {
        self.failing.store(failing, Ordering::Release);
    }

    /// Snapshot of everything persisted so far.
    #[must_use]
    pub fn records(&self) -> Vec<StoredRecord> {
        self.records.lock().clone()
    }

    /// Number of persisted records.
    #[must_use]
    pub fn len(&self) -> usize {
        self.records.lock().len()
    }

    /// True when nothing has been persisted.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Persisted record counts per asset name.
    #[must_use]
    pub fn counts_by_asset(&self) -> HashMap<String, usize> {
        let mut counts = HashMap::new();
        for record in self.records.lock().iter() {
            *counts.entry(record.asset_id.name.clone()).or_insert(0) += 1;
        }
        counts
    }
}

#[async_trait]
impl ResultSink for InMemorySink {
    async fn persist(&self, record: PersistRecord<'_>) -> Result<(), PersistError> {
        if self.failing.load(Ordering::Acquire) {
            return Err(PersistError(format!(
                "in-memory sink rejecting {} for {}",
                record.endpoint, record.asset_id
            )));
        }
        self.records.lock().push(StoredRecord {
            endpoint: record.endpoint,
            asset_id: record.asset_id.clone(),
            body: record.response.body.clone(),
            observed_at: record.observed_at,
        });
        Ok(())
    }
}
