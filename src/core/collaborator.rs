//! Narrow interfaces to the external fetch and persistence collaborators.
//!
//! The scheduling core never interprets payloads. It only needs to know
//! whether a round-trip succeeded, how a failure should be classified, and
//! when the response was observed.

use std::fmt;
use std::time::SystemTime;

use async_trait::async_trait;
use thiserror::Error;

use super::asset::{AssetId, EndpointKind, Job};

/// Opaque response body returned by the fetch collaborator.
#[derive(Debug, Clone, PartialEq)]
pub struct MarketResponse {
    /// Raw decoded payload.
    pub body: serde_json::Value,
}

impl MarketResponse {
    /// Wrap a decoded payload.
    #[must_use]
    pub const fn new(body: serde_json::Value) -> Self {
        Self { body }
    }
}

/// Classification of a fetch failure.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FetchErrorKind {
    /// The remote side throttled the request.
    RateLimited,
    /// Remote 5xx.
    Server(u16),
    /// Timeout, DNS, connection refused and similar.
    Network,
    /// Credentials rejected (400/401/403).
    Auth(u16),
    /// Any other client-side HTTP error.
    Client(u16),
    /// The payload could not be decoded.
    Decode,
}

impl FetchErrorKind {
    /// Failures likely to clear on their own after a pause.
    #[must_use]
    pub const fn is_transient(self) -> bool {
        matches!(self, Self::RateLimited | Self::Server(_) | Self::Network)
    }

    /// Failures worth retrying inside a boundary window. Credentials can be
    /// rotated while the process runs, so auth errors qualify.
    #[must_use]
    pub const fn is_retryable(self) -> bool {
        self.is_transient() || matches!(self, Self::Auth(_))
    }
}

impl fmt::Display for FetchErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::RateLimited => f.write_str("rate limited"),
            Self::Server(status) => write!(f, "server error {status}"),
            Self::Network => f.write_str("network error"),
            Self::Auth(status) => write!(f, "auth error {status}"),
            Self::Client(status) => write!(f, "client error {status}"),
            Self::Decode => f.write_str("decode error"),
        }
    }
}

/// Failure reported by the fetch collaborator.
#[derive(Debug, Clone, Error)]
#[error("{kind}: {message}")]
pub struct FetchError {
    /// Failure class driving retry and cooldown decisions.
    pub kind: FetchErrorKind,
    /// Human-readable detail.
    pub message: String,
}

impl FetchError {
    /// Build a fetch error.
    pub fn new(kind: FetchErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }
}

/// Failure reported by the persistence collaborator.
#[derive(Debug, Clone, Error)]
#[error("persist failed: {0}")]
pub struct PersistError(pub String);

/// What gets handed to the persistence collaborator.
#[derive(Debug, Clone, Copy)]
pub struct PersistRecord<'a> {
    /// Endpoint the response came from.
    pub endpoint: EndpointKind,
    /// Asset the response describes.
    pub asset_id: &'a AssetId,
    /// Response body.
    pub response: &'a MarketResponse,
    /// Wall-clock time the response was observed.
    pub observed_at: SystemTime,
}

/// Wire-level API client.
///
/// # Example
///
/// ```rust,ignore
/// use async_trait::async_trait;
/// use market_cadence::core::{FetchError, Job, MarketFetcher, MarketResponse};
///
/// struct HttpFetcher { client: reqwest::Client }
///
/// #[async_trait]
/// impl MarketFetcher for HttpFetcher {
///     async fn fetch(&self, job: &Job) -> Result<MarketResponse, FetchError> {
///         // issue the request for job.endpoint with job.asset.params ...
///     }
/// }
/// ```
#[async_trait]
pub trait MarketFetcher: Send + Sync + 'static {
    /// Issue one request. Called only after a rate-limit grant.
    async fn fetch(&self, job: &Job) -> Result<MarketResponse, FetchError>;
}

/// Storage layer. Failures are logged by the core and never retried.
#[async_trait]
pub trait ResultSink: Send + Sync + 'static {
    /// Persist one observed response.
    async fn persist(&self, record: PersistRecord<'_>) -> Result<(), PersistError>;
}

/// Outcome of a single fetch/persist round-trip.
#[derive(Debug, Clone)]
pub enum RoundTrip {
    /// Fetched and persisted.
    Stored,
    /// Fetched, but the sink rejected the record.
    PersistFailed(PersistError),
    /// The fetch itself failed.
    FetchFailed(FetchError),
}

/// Counters returned by a scheduler when it stops.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RunReport {
    /// Jobs that passed the limiter and were handed to the fetcher.
    pub dispatched: u64,
    /// Fetched and persisted.
    pub stored: u64,
    /// Fetches that failed.
    pub fetch_failures: u64,
    /// Fetched responses the sink rejected.
    pub persist_failures: u64,
}

impl RunReport {
    /// Count one completed round-trip.
    pub fn record(&mut self, trip: &RoundTrip) {
        match trip {
            RoundTrip::Stored => self.stored += 1,
            RoundTrip::PersistFailed(_) => self.persist_failures += 1,
            RoundTrip::FetchFailed(_) => self.fetch_failures += 1,
        }
    }

    /// Fold another report into this one.
    pub fn merge(&mut self, other: &Self) {
        self.dispatched += other.dispatched;
        self.stored += other.stored;
        self.fetch_failures += other.fetch_failures;
        self.persist_failures += other.persist_failures;
    }
}

/// Run the fetch, then hand any response to the sink.
pub(crate) async fn round_trip(
    fetcher: &dyn MarketFetcher,
    sink: &dyn ResultSink,
    job: &Job,
    observed_at: impl FnOnce() -> SystemTime,
) -> RoundTrip {
    let response = match fetcher.fetch(job).await {
        Ok(response) => response,
        Err(e) => return RoundTrip::FetchFailed(e),
    };
    let record = PersistRecord {
        endpoint: job.endpoint,
        asset_id: &job.asset.id,
        response: &response,
        observed_at: observed_at(),
    };
    match sink.persist(record).await {
        Ok(()) => RoundTrip::Stored,
        Err(e) => RoundTrip::PersistFailed(e),
    }
}
