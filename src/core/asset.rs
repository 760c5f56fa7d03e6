//! Tracked asset model and the transient job handed to collaborators.

use std::fmt;
use std::str::FromStr;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Market endpoint polled for an asset.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndpointKind {
    /// Lowest/median price and volume summary.
    PriceOverview,
    /// Buy/sell order book histogram.
    OrdersHistogram,
    /// Recent order book activity.
    OrdersActivity,
    /// Hourly price history archive.
    PriceHistory,
}

impl EndpointKind {
    /// All endpoint kinds in declaration order.
    pub const ALL: [Self; 4] = [
        Self::PriceOverview,
        Self::OrdersHistogram,
        Self::OrdersActivity,
        Self::PriceHistory,
    ];

    /// Wire name used in configuration and logs.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::PriceOverview => "price_overview",
            Self::OrdersHistogram => "orders_histogram",
            Self::OrdersActivity => "orders_activity",
            Self::PriceHistory => "price_history",
        }
    }

    /// Order-book endpoints address the item by its numeric id.
    #[must_use]
    pub const fn requires_item_id(self) -> bool {
        matches!(self, Self::OrdersHistogram | Self::OrdersActivity)
    }

    /// Endpoints serviced once per alignment boundary rather than by cadence.
    #[must_use]
    pub const fn is_boundary_aligned(self) -> bool {
        matches!(self, Self::PriceHistory)
    }
}

impl fmt::Display for EndpointKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EndpointKind {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim() {
            "price_overview" | "priceoverview" => Ok(Self::PriceOverview),
            "orders_histogram" | "itemordershistogram" => Ok(Self::OrdersHistogram),
            "orders_activity" | "itemordersactivity" => Ok(Self::OrdersActivity),
            "price_history" | "pricehistory" => Ok(Self::PriceHistory),
            other => Err(format!(
                "unknown endpoint `{other}` (expected one of: {})",
                Self::ALL.map(Self::as_str).join(", ")
            )),
        }
    }
}

/// Identifies a market item within an application scope.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AssetId {
    /// Market hash name of the item.
    pub name: String,
    /// Application the item belongs to.
    pub app_id: u32,
}

impl fmt::Display for AssetId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.app_id, self.name)
    }
}

/// Market parameters forwarded untouched to the fetch collaborator.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MarketParams {
    /// Numeric currency code.
    pub currency: u32,
    /// Two-letter country code.
    pub country: String,
    /// Response language.
    pub language: String,
}

impl Default for MarketParams {
    fn default() -> Self {
        Self {
            currency: 1,
            country: "US".into(),
            language: "english".into(),
        }
    }
}

/// Immutable configuration of one tracked asset.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TrackedAsset {
    /// Item identity.
    pub id: AssetId,
    /// Endpoint polled for this entry.
    pub endpoint: EndpointKind,
    /// Target polling cadence. Boundary-aligned endpoints may leave it unset.
    pub polling_interval: Option<Duration>,
    /// Market parameters.
    pub params: MarketParams,
    /// Numeric item id, present for order-book endpoints.
    pub item_nameid: Option<u64>,
}

/// A dispatch decision: one asset on one endpoint, alive for a single
/// fetch/persist round-trip.
#[derive(Debug, Clone)]
pub struct Job {
    /// Asset being fetched.
    pub asset: Arc<TrackedAsset>,
    /// Endpoint to call.
    pub endpoint: EndpointKind,
}

impl Job {
    /// Build a job for the asset's configured endpoint.
    #[must_use]
    pub fn for_asset(asset: &Arc<TrackedAsset>) -> Self {
        Self {
            asset: Arc::clone(asset),
            endpoint: asset.endpoint,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_canonical_and_compact_names() {
        assert_eq!("price_overview".parse(), Ok(EndpointKind::PriceOverview));
        assert_eq!("itemordershistogram".parse(), Ok(EndpointKind::OrdersHistogram));
        assert_eq!(" orders_activity ".parse(), Ok(EndpointKind::OrdersActivity));
        assert_eq!("pricehistory".parse(), Ok(EndpointKind::PriceHistory));
    }

    #[test]
    fn unknown_endpoint_lists_options() {
        let err = "candles".parse::<EndpointKind>().unwrap_err();
        assert!(err.contains("candles"));
        assert!(err.contains("price_history"));
    }

    #[test]
    fn order_book_endpoints_need_item_id() {
        assert!(EndpointKind::OrdersHistogram.requires_item_id());
        assert!(EndpointKind::OrdersActivity.requires_item_id());
        assert!(!EndpointKind::PriceOverview.requires_item_id());
        assert!(!EndpointKind::PriceHistory.requires_item_id());
    }

    #[test]
    fn only_price_history_is_boundary_aligned() {
        let aligned: Vec<_> = EndpointKind::ALL
            .into_iter()
            .filter(|k| k.is_boundary_aligned())
            .collect();
        assert_eq!(aligned, vec![EndpointKind::PriceHistory]);
    }

    #[test]
    fn asset_id_display() {
        let id = AssetId {
            name: "AK-47 | Redline (Field-Tested)".into(),
            app_id: 730,
        };
        assert_eq!(id.to_string(), "730/AK-47 | Redline (Field-Tested)");
    }
}
