//! Integration tests for the detection fetcher: admission, caching and the
//! paginated historical backfill, against the scripted upstream.

use std::sync::Arc;
use std::time::Duration as StdDuration;

use chrono::{DateTime, Duration, TimeZone, Utc};
use serde_json::{json, Value};

use bird_buddy::fetcher::{DataService, DataState, FetchOutcome, FetchSettings};
use bird_buddy::rate_limit::RateLimits;
use bird_buddy::upstream::{MockExecutor, MockReply};
use bird_buddy::ManualClock;

fn t0() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2025, 6, 1, 12, 0, 0).unwrap()
}

fn node(i: usize, at: DateTime<Utc>) -> Value {
    json!({
        "id": format!("d{i}"),
        "timestamp": at.to_rfc3339(),
        "confidence": 0.8,
        "species": { "id": format!("s{}", i % 7), "commonName": format!("Bird {}", i % 7) }
    })
}

fn page(start: usize, n: usize, next: Option<&str>) -> MockReply {
    let nodes: Vec<Value> = (start..start + n)
        .map(|i| node(i, t0() - Duration::days(40)))
        .collect();
    MockReply::Data(json!({
        "detections": {
            "nodes": nodes,
            "pageInfo": { "hasNextPage": next.is_some(), "endCursor": next }
        }
    }))
}

fn service(
    limits: RateLimits,
    settings: FetchSettings,
) -> (Arc<ManualClock>, Arc<MockExecutor>, DataService) {
    let clock = Arc::new(ManualClock::new(t0()));
    let mock = Arc::new(MockExecutor::new());
    let svc = DataService::new(mock.clone(), clock.clone(), limits, settings);
    (clock, mock, svc)
}

fn quick_settings() -> FetchSettings {
    FetchSettings {
        history_page_delay: StdDuration::ZERO,
        ..FetchSettings::default()
    }
}

#[tokio::test]
async fn ceiling_turns_new_keys_into_empty() {
    let (clock, mock, svc) = service(
        RateLimits {
            max_calls_per_minute: 3,
            min_call_interval: Duration::zero(),
        },
        quick_settings(),
    );
    mock.set(
        "detections",
        MockReply::Data(json!({ "detections": { "nodes": [node(1, t0())] } })),
    );

    for id in ["a", "b", "c"] {
        assert_eq!(svc.today_detections(&[id]).await.state(), DataState::Fresh);
        clock.advance(Duration::seconds(1));
    }
    assert_eq!(svc.today_detections(&["d"]).await, FetchOutcome::Empty);
    assert_eq!(mock.call_count("detections"), 3);

    // A cached key is still served while the ceiling holds.
    assert_eq!(svc.today_detections(&["a"]).await.state(), DataState::Fresh);
    assert_eq!(mock.call_count("detections"), 3);

    // Once the calls age out, the expired entry is refreshed upstream.
    clock.advance(Duration::minutes(5));
    assert_eq!(svc.today_detections(&["a"]).await.state(), DataState::Fresh);
    assert_eq!(mock.call_count("detections"), 4);
}

#[tokio::test]
async fn same_set_in_any_order_shares_a_cache_entry() {
    let (_clock, mock, svc) = service(RateLimits::default(), quick_settings());
    mock.set(
        "detections",
        MockReply::Data(json!({ "detections": { "nodes": [node(1, t0())] } })),
    );

    svc.today_detections(&["2", "1"]).await;
    let again = svc.today_detections(&["1", "2", "1"]).await;
    assert_eq!(again.state(), DataState::Fresh);
    assert_eq!(mock.call_count("detections"), 1);
    assert_eq!(svc.cache_status()[0].key, "today_1_2");
}

#[tokio::test]
async fn coarse_period_is_sent_upstream() {
    let (_clock, mock, svc) = service(RateLimits::default(), quick_settings());
    mock.set(
        "detections",
        MockReply::Data(json!({ "detections": { "nodes": [] } })),
    );
    svc.today_detections(&["1"]).await;

    let vars = &mock.calls()[0].variables;
    assert_eq!(vars["period"]["from"], "2025-05-31");
    assert_eq!(vars["period"]["to"], "2025-06-02");
    assert_eq!(vars["first"], 500);
}

#[tokio::test]
async fn backfill_stops_at_page_cap() {
    let (_clock, mock, svc) = service(
        RateLimits::default(),
        FetchSettings {
            history_max_pages: 3,
            ..quick_settings()
        },
    );
    mock.set("historicalDetections", page(0, 10, Some("more")));

    let out = svc.historical_detections(&["1"]).await;
    assert_eq!(out.into_inner().len(), 30);
    assert_eq!(mock.call_count("historicalDetections"), 3);
}

#[tokio::test]
async fn backfill_stops_at_record_cap() {
    let (_clock, mock, svc) = service(
        RateLimits::default(),
        FetchSettings {
            history_max_records: 150,
            ..quick_settings()
        },
    );
    mock.set("historicalDetections", page(0, 100, Some("more")));

    let out = svc.historical_detections(&["1"]).await;
    assert_eq!(out.into_inner().len(), 200);
    assert_eq!(mock.call_count("historicalDetections"), 2);
}

#[tokio::test]
async fn backfill_keeps_pages_collected_before_a_failure() {
    let (_clock, mock, svc) = service(RateLimits::default(), quick_settings());
    mock.enqueue("historicalDetections", page(0, 4, Some("c1")));
    mock.set("historicalDetections", MockReply::Fail("timeout".into()));

    let out = svc.historical_detections(&["1"]).await;
    assert_eq!(out.state(), DataState::Fresh);
    assert_eq!(out.into_inner().len(), 4);
    assert_eq!(mock.call_count("historicalDetections"), 2);
}

#[tokio::test]
async fn expired_backfill_is_served_stale_when_refresh_fails() {
    let (clock, mock, svc) = service(RateLimits::default(), quick_settings());
    mock.enqueue("historicalDetections", page(0, 3, None));
    mock.set("historicalDetections", MockReply::Fail("down".into()));

    assert_eq!(
        svc.historical_detections(&["1"]).await.state(),
        DataState::Fresh
    );
    clock.advance(Duration::hours(7));
    let out = svc.historical_detections(&["1"]).await;
    assert!(out.is_stale());
    assert_eq!(out.into_inner().len(), 3);
}

#[tokio::test]
async fn failed_backfill_waits_before_retrying() {
    let (clock, mock, svc) = service(RateLimits::default(), quick_settings());
    mock.set("historicalDetections", MockReply::Fail("down".into()));

    for _ in 0..20 {
        assert_eq!(svc.historical_detections(&["1"]).await, FetchOutcome::Empty);
    }
    assert_eq!(mock.call_count("historicalDetections"), 1);

    clock.advance(Duration::minutes(4));
    assert_eq!(svc.historical_detections(&["1"]).await, FetchOutcome::Empty);
    assert_eq!(mock.call_count("historicalDetections"), 1);

    // Quiet period over: one more attempt, which succeeds and clears the gate.
    clock.advance(Duration::minutes(2));
    mock.set("historicalDetections", page(0, 2, None));
    let out = svc.historical_detections(&["1"]).await;
    assert_eq!(out.state(), DataState::Fresh);
    assert_eq!(mock.call_count("historicalDetections"), 2);
}

#[tokio::test]
async fn stale_backfill_is_served_without_hammering_upstream() {
    let (clock, mock, svc) = service(RateLimits::default(), quick_settings());
    mock.enqueue("historicalDetections", page(0, 3, None));
    mock.set("historicalDetections", MockReply::Fail("down".into()));

    svc.historical_detections(&["1"]).await;
    clock.advance(Duration::hours(7));
    for _ in 0..10 {
        let out = svc.historical_detections(&["1"]).await;
        assert!(out.is_stale());
        assert_eq!(out.into_inner().len(), 3);
    }
    assert_eq!(mock.call_count("historicalDetections"), 2);
}

#[tokio::test]
async fn invalidate_all_lifts_the_backfill_retry_gate() {
    let (_clock, mock, svc) = service(RateLimits::default(), quick_settings());
    mock.set("historicalDetections", MockReply::Fail("down".into()));

    svc.historical_detections(&["1"]).await;
    svc.historical_detections(&["1"]).await;
    assert_eq!(mock.call_count("historicalDetections"), 1);

    svc.invalidate_all();
    svc.historical_detections(&["1"]).await;
    assert_eq!(mock.call_count("historicalDetections"), 2);
}
