//! Configuration-driven orchestrator lifecycle.

mod common;

use std::sync::Arc;
use std::time::Duration;

use market_cadence::builders::build_orchestrator;
use market_cadence::config::TrackerConfig;
use market_cadence::core::{EndpointKind, SchedulerError};
use market_cadence::infra::InMemorySink;
use market_cadence::util::AnchoredClock;

use common::{RecordingFetcher, TOP_OF_HOUR};

const CONFIG: &str = r#"{
    "limits": { "requests_per_window": 15, "window_seconds": 60 },
    "shutdown_grace_seconds": 10,
    "assets": [
        { "market_hash_name": "M4A4 | Howl (Minimal Wear)", "app_id": 730,
          "endpoint": "price_overview", "polling_interval_seconds": 20 },
        { "market_hash_name": "Operation Breakout Weapon Case", "app_id": 730,
          "endpoint": "orders_activity", "polling_interval_seconds": 30, "item_nameid": 1 },
        { "market_hash_name": "Operation Breakout Weapon Case", "app_id": 730,
          "endpoint": "price_history" }
    ]
}"#;

#[tokio::test(start_paused = true)]
async fn runs_from_configuration_and_stops_within_grace() {
    let cfg = TrackerConfig::from_json_str(CONFIG).unwrap();
    let fetcher = RecordingFetcher::new();
    let sink = InMemorySink::new();
    let orchestrator = build_orchestrator(&cfg, Arc::new(fetcher.clone()), Arc::new(sink.clone()))
        .unwrap()
        .with_clock(Arc::new(AnchoredClock::starting_at(TOP_OF_HOUR)));
    assert_eq!(orchestrator.config().grace, Duration::from_secs(10));

    let handle = orchestrator.start();
    tokio::time::sleep(Duration::from_secs(61)).await;
    let report = handle.stop().await.unwrap();

    assert!(!report.forced);
    // 0,20,40,60 and 0,30,60, plus the initial aligned fetch
    assert_eq!(fetcher.count_for(EndpointKind::PriceOverview), 4);
    assert_eq!(fetcher.count_for(EndpointKind::OrdersActivity), 3);
    assert_eq!(fetcher.count_for(EndpointKind::PriceHistory), 1);
    assert_eq!(sink.len(), 8);
    assert_eq!(report.total_dispatched(), 8);
}

#[test]
fn invalid_configuration_is_fatal_and_fully_reported() {
    let cfg = TrackerConfig::from_json_str(
        r#"{
            "limits": { "requests_per_window": 15, "window_seconds": 60 },
            "assets": [
                { "market_hash_name": "A", "app_id": 730, "endpoint": "price_overview" },
                { "market_hash_name": "B", "app_id": 730, "endpoint": "orders_histogram",
                  "polling_interval_seconds": 30 }
            ]
        }"#,
    )
    .unwrap();
    let err = build_orchestrator(
        &cfg,
        Arc::new(RecordingFetcher::new()),
        Arc::new(InMemorySink::new()),
    )
    .err()
    .unwrap();
    match err {
        SchedulerError::Config(errors) => {
            assert_eq!(errors.len(), 2);
            assert!(errors.errors()[0].location.contains("(A)"));
            assert_eq!(errors.errors()[1].field, "item_nameid");
        }
        other => panic!("unexpected error: {other}"),
    }
}
