//! Benchmarks for the scheduling core.
//!
//! Benchmarks cover:
//! - RateLimiter acquire fast path (budget never exhausted)
//! - Urgency selection over growing asset sets
//! - Boundary alignment math

use criterion::{criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use std::hint::black_box;
use std::sync::Arc;
use std::time::Duration;

use market_cadence::core::{
    select_most_urgent, AssetId, BoundarySchedule, EndpointKind, MarketParams, RateLimit,
    RateLimiter, SnoozeEntry, TrackedAsset,
};
use tokio::runtime::Runtime;

// ============================================================================
// RateLimiter
// ============================================================================

fn bench_acquire_fast_path(c: &mut Criterion) {
    let mut group = c.benchmark_group("limiter_acquire");
    for calls in [1_u64, 100, 1_000] {
        group.throughput(Throughput::Elements(calls));
        group.bench_with_input(BenchmarkId::from_parameter(calls), &calls, |b, &calls| {
            b.to_async(Runtime::new().unwrap()).iter(|| async move {
                let limiter = RateLimiter::new(RateLimit::per_seconds(10_000, 60));
                for _ in 0..calls {
                    black_box(limiter.acquire().await.unwrap());
                }
            });
        });
    }
    group.finish();
}

// ============================================================================
// Snoozer selection
// ============================================================================

fn entries(count: usize) -> Vec<SnoozeEntry> {
    (0..count)
        .map(|i| {
            let interval = Duration::from_secs(10 + (i as u64 % 50));
            let asset = Arc::new(TrackedAsset {
                id: AssetId {
                    name: format!("item-{i}"),
                    app_id: 730,
                },
                endpoint: EndpointKind::PriceOverview,
                polling_interval: Some(interval),
                params: MarketParams::default(),
                item_nameid: None,
            });
            let mut entry = SnoozeEntry::new(asset, interval);
            entry.last_fetch_at = Duration::from_secs(1_700_000_000 - (i as u64 % 97));
            entry
        })
        .collect()
}

fn bench_select_most_urgent(c: &mut Criterion) {
    let mut group = c.benchmark_group("snoozer_select");
    for count in [10_usize, 100, 1_000] {
        group.throughput(Throughput::Elements(count as u64));
        group.bench_with_input(BenchmarkId::from_parameter(count), &count, |b, &count| {
            let mut entries = entries(count);
            let now = Duration::from_secs(1_700_000_030);
            b.iter(|| black_box(select_most_urgent(&mut entries, black_box(now))));
        });
    }
    group.finish();
}

// ============================================================================
// Clockwork boundaries
// ============================================================================

fn bench_boundary_floor(c: &mut Criterion) {
    let schedule = BoundarySchedule::hourly();
    c.bench_function("boundary_next_after", |b| {
        let mut t = Duration::from_secs(1_700_000_000);
        b.iter(|| {
            t += Duration::from_millis(1_337);
            black_box(schedule.next_after(black_box(t)))
        });
    });
}

criterion_group!(
    benches,
    bench_acquire_fast_path,
    bench_select_most_urgent,
    bench_boundary_floor
);
criterion_main!(benches);
