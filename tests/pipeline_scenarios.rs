// tests/pipeline_scenarios.rs
//
// End-to-end aggregation cycles over scripted sources, on a paused clock so
// timeouts and TTLs are deterministic.
//
// Covered:
// - partial failure (one source times out) still yields the healthy source's items
// - total failure with a snapshot -> stale snapshot, not an error
// - total failure without a snapshot -> Unavailable (+ strict error)
// - duplicates across feeds keep the copy from the first-completed fetch
// - single-flight: concurrent callers trigger one upstream fan-out
// - rate-limited sources are skipped without an upstream call
// - a caller that goes away mid-cycle does not cancel the fan-out or the snapshot save

mod common;

use std::sync::Arc;
use std::time::Duration;

use market_news_aggregator::ingest::fallback::FallbackStore;
use market_news_aggregator::ingest::pipeline::{AggregationPipeline, Freshness, PipelineError};
use market_news_aggregator::ingest::rate_limit::RateLimiter;
use market_news_aggregator::ingest::types::{Article, FetchError, Quote, SourceProvider};

use common::*;

const TTL: Duration = Duration::from_secs(300);
const TIMEOUT: Duration = Duration::from_secs(2);

#[tokio::test(start_paused = true)]
async fn slow_source_times_out_and_healthy_source_is_returned() {
    let a = Arc::new(StaticSource::new(
        "AAPL",
        vec![quote("a1", 1.0), quote("a2", 2.0), quote("a3", 3.0)],
    ));
    let sources: Vec<Arc<dyn SourceProvider<Quote>>> =
        vec![a.clone(), Arc::new(HangingSource::new("SLOW"))];
    let p = pipeline("quotes", sources, memory_store(), settings(TTL, TIMEOUT));

    let agg = p.aggregate().await;
    assert_eq!(agg.freshness, Freshness::Live);
    assert!(agg.failure.is_none());
    let ids: Vec<&str> = agg.result.items().iter().map(|q| q.id.as_str()).collect();
    assert_eq!(ids, ["a1", "a2", "a3"]);
    assert_eq!(a.calls(), 1);
}

#[tokio::test(start_paused = true)]
async fn all_sources_failing_serves_stale_snapshot() {
    let store = memory_store();
    let snapshot: Vec<Article> = (0..5)
        .map(|i| {
            article(
                Some(&format!("g{i}")),
                &format!("https://old.test/{i}"),
                "Old",
                "https://old.test/rss",
            )
        })
        .collect();
    seed_snapshot(&store, "news.snapshot.v1", snapshot).await;

    let sources: Vec<Arc<dyn SourceProvider<Article>>> = vec![
        Arc::new(FailingSource::new("https://a.test/rss", FetchError::Status(502))),
        Arc::new(FailingSource::new(
            "https://b.test/rss",
            FetchError::Parse("not xml".into()),
        )),
    ];
    let p = pipeline("news", sources, store, settings(TTL, TIMEOUT));

    let agg = p.aggregate().await;
    assert_eq!(agg.freshness, Freshness::Stale);
    assert_eq!(agg.result.len(), 5);
    assert_eq!(
        agg.failure,
        Some(PipelineError::AllSourcesFailed {
            failed: 2,
            rate_limited: 0
        })
    );
    assert!(agg.into_strict().is_ok(), "stale data is still data");
}

#[tokio::test(start_paused = true)]
async fn total_failure_without_snapshot_is_unavailable() {
    let sources: Vec<Arc<dyn SourceProvider<Quote>>> = vec![Arc::new(FailingSource::new(
        "AAPL",
        FetchError::Unavailable("dns".into()),
    ))];
    let p = pipeline("quotes", sources, memory_store(), settings(TTL, TIMEOUT));

    let agg = p.aggregate().await;
    assert_eq!(agg.freshness, Freshness::Unavailable);
    assert!(agg.result.is_empty());
    match agg.into_strict() {
        Err(PipelineError::FallbackUnavailable(cause)) => assert!(matches!(
            *cause,
            PipelineError::AllSourcesFailed { failed: 1, .. }
        )),
        other => panic!("expected FallbackUnavailable, got {other:?}"),
    }
}

#[tokio::test(start_paused = true)]
async fn empty_success_is_not_an_error_but_falls_back() {
    let store = memory_store();
    seed_snapshot(&store, "quotes.snapshot.v1", vec![quote("old", 9.0)]).await;
    let sources: Vec<Arc<dyn SourceProvider<Quote>>> =
        vec![Arc::new(StaticSource::new("AAPL", Vec::<Quote>::new()))];
    let p = pipeline("quotes", sources, store, settings(TTL, TIMEOUT));

    let agg = p.aggregate().await;
    assert_eq!(agg.freshness, Freshness::Stale);
    assert!(agg.failure.is_none());
    assert_eq!(agg.result.items()[0].id, "old");
}

#[tokio::test(start_paused = true)]
async fn duplicate_guid_keeps_first_completed_copy() {
    let slow_feed = "https://slow.test/rss";
    let fast_feed = "https://fast.test/rss";
    let slow = StaticSource::new(
        slow_feed,
        vec![
            article(Some("shared"), "https://slow.test/s", "Slow", slow_feed),
            article(Some("slow-only"), "https://slow.test/x", "Slow", slow_feed),
        ],
    )
    .with_delay(Duration::from_millis(50));
    let fast = StaticSource::new(
        fast_feed,
        vec![article(Some("shared"), "https://fast.test/s", "Fast", fast_feed)],
    )
    .with_delay(Duration::from_millis(10));

    // Listed slow-first: completion order, not configuration order, decides.
    let sources: Vec<Arc<dyn SourceProvider<Article>>> = vec![Arc::new(slow), Arc::new(fast)];
    let p = pipeline("news", sources, memory_store(), settings(TTL, TIMEOUT));

    let agg = p.aggregate().await;
    let got: Vec<(&str, &str)> = agg
        .result
        .items()
        .iter()
        .map(|a| (a.canonical_id.as_str(), a.source_name.as_str()))
        .collect();
    assert_eq!(got, [("shared", "Fast"), ("slow-only", "Slow")]);
}

#[tokio::test(start_paused = true)]
async fn concurrent_callers_share_one_fan_out_and_then_hit_cache() {
    let a = Arc::new(
        StaticSource::new("AAPL", vec![quote("aapl", 190.0)]).with_delay(Duration::from_millis(100)),
    );
    let b = Arc::new(
        StaticSource::new("MSFT", vec![quote("msft", 410.0)]).with_delay(Duration::from_millis(30)),
    );
    let sources: Vec<Arc<dyn SourceProvider<Quote>>> = vec![a.clone(), b.clone()];
    let p = pipeline("quotes", sources, memory_store(), settings(TTL, TIMEOUT));

    let (r1, r2, r3, r4) = tokio::join!(p.aggregate(), p.aggregate(), p.aggregate(), p.aggregate());
    assert_eq!(a.calls(), 1);
    assert_eq!(b.calls(), 1);
    for r in [&r1, &r2, &r3, &r4] {
        assert_eq!(r.freshness, Freshness::Live);
        assert_eq!(r.result.len(), 2);
    }

    let cached = p.aggregate().await;
    assert_eq!(cached.freshness, Freshness::Cached);
    assert_eq!(cached.result.captured_at(), r1.result.captured_at());
    assert_eq!(a.calls(), 1);

    // Absolute TTL: once expired, exactly one more fan-out.
    tokio::time::advance(TTL + Duration::from_millis(1)).await;
    let refreshed = p.aggregate().await;
    assert_eq!(refreshed.freshness, Freshness::Live);
    assert_eq!(a.calls(), 2);
}

#[tokio::test(start_paused = true)]
async fn rate_limited_source_is_skipped_without_upstream_call() {
    let store = memory_store();
    let src = Arc::new(StaticSource::new("AAPL", vec![quote("aapl", 1.0)]));
    let sources: Vec<Arc<dyn SourceProvider<Quote>>> = vec![src.clone()];
    let p = AggregationPipeline::new(
        "quotes",
        sources,
        Arc::new(RateLimiter::per_minute(1)),
        FallbackStore::new(Arc::clone(&store), "quotes.snapshot.v1"),
        settings(TTL, TIMEOUT),
    );

    assert_eq!(p.aggregate().await.freshness, Freshness::Live);
    p.invalidate();

    let agg = p.aggregate().await;
    assert_eq!(src.calls(), 1, "limiter must prevent the second upstream call");
    assert_eq!(agg.freshness, Freshness::Stale, "first cycle left a snapshot");
    assert_eq!(
        agg.failure,
        Some(PipelineError::AllSourcesFailed {
            failed: 1,
            rate_limited: 1
        })
    );
}

#[tokio::test(start_paused = true)]
async fn successful_cycle_overwrites_snapshot() {
    let store = memory_store();
    seed_snapshot(&store, "quotes.snapshot.v1", vec![quote("old", 1.0), quote("older", 2.0)])
        .await;
    let sources: Vec<Arc<dyn SourceProvider<Quote>>> =
        vec![Arc::new(StaticSource::new("AAPL", vec![quote("aapl", 3.0)]))];
    let p = pipeline("quotes", sources, Arc::clone(&store), settings(TTL, TIMEOUT));
    p.aggregate().await;

    let snap = FallbackStore::<Quote>::new(store, "quotes.snapshot.v1")
        .load()
        .await
        .expect("snapshot");
    let ids: Vec<&str> = snap.items().iter().map(|q| q.id.as_str()).collect();
    assert_eq!(ids, ["aapl"]);
}

#[tokio::test(start_paused = true)]
async fn dropped_caller_does_not_abandon_the_cycle() {
    let store = memory_store();
    let src = Arc::new(
        StaticSource::new("AAPL", vec![quote("aapl", 1.0)]).with_delay(Duration::from_millis(100)),
    );
    let sources: Vec<Arc<dyn SourceProvider<Quote>>> = vec![src.clone()];
    let p = AggregationPipeline::new(
        "quotes",
        sources,
        Arc::new(RateLimiter::per_minute(1)),
        FallbackStore::new(Arc::clone(&store), "quotes.snapshot.v1"),
        settings(TTL, TIMEOUT),
    );

    // A client that disconnects before the fan-out finishes.
    let gone = tokio::time::timeout(Duration::from_millis(10), p.aggregate()).await;
    assert!(gone.is_err());

    let agg = p.aggregate().await;
    assert_eq!(agg.freshness, Freshness::Live);
    assert!(agg.failure.is_none());
    assert_eq!(agg.result.items()[0].id, "aapl");
    assert_eq!(src.calls(), 1, "the limiter token was spent once, by the surviving cycle");

    let snap = FallbackStore::<Quote>::new(store, "quotes.snapshot.v1")
        .load()
        .await
        .expect("cycle saved its snapshot");
    assert_eq!(snap.len(), 1);
}
