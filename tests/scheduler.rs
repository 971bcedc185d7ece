// tests/scheduler.rs
//! Refresh semantics: caching, failure isolation, single-flight and ordering.

mod common;

use std::time::Duration;

use common::{setup, setup_with, url};
use seat_tracker::extract::fixture::FixturePage;
use seat_tracker::extract::ExtractorConfig;
use seat_tracker::{CacheState, ExtractionErrorKind, PageRenderer, RefreshOutcome};
use tokio::time::{sleep, timeout};

#[tokio::test]
async fn successful_refresh_publishes_value() {
    let (renderer, sched) = setup(&[1]);
    renderer.set(&url(1), FixturePage::text("Available Seats: 42"));

    assert_eq!(sched.registry().get_cached(1).unwrap().state(), CacheState::Pending);
    assert_eq!(sched.run_once(1).await, RefreshOutcome::Updated(42));

    let entry = sched.registry().get_cached(1).unwrap();
    assert_eq!(entry.last_value, Some(42));
    assert_eq!(entry.state(), CacheState::Fresh);
    assert!(entry.last_updated_at.is_some());
    assert_eq!(renderer.active_contexts(), 0, "context must be released");
}

#[tokio::test]
async fn parse_failure_keeps_previous_value() {
    let (renderer, sched) = setup(&[1]);
    renderer.script(
        &url(1),
        [
            FixturePage::text("Available Seats: 10"),
            FixturePage::text("Seats remaining : notanumber"),
        ],
    );

    assert_eq!(sched.run_once(1).await, RefreshOutcome::Updated(10));
    assert_eq!(
        sched.run_once(1).await,
        RefreshOutcome::Failed(ExtractionErrorKind::Parse)
    );
    assert_eq!(
        sched.run_once(1).await,
        RefreshOutcome::Failed(ExtractionErrorKind::Parse)
    );

    let entry = sched.registry().get_cached(1).unwrap();
    assert_eq!(entry.last_value, Some(10), "failures must not clear the value");
    assert_eq!(entry.state(), CacheState::Fresh);
    assert_eq!(entry.success_count, 1);
    assert_eq!(entry.failure_count, 2);
    assert!(entry.last_error.as_deref().unwrap_or_default().contains("notanumber"));
}

#[tokio::test]
async fn repeated_identical_value_is_idempotent() {
    let (renderer, sched) = setup(&[1]);
    renderer.set(&url(1), FixturePage::text("Seats: 7"));

    for _ in 0..3 {
        assert_eq!(sched.run_once(1).await, RefreshOutcome::Updated(7));
        assert_eq!(sched.registry().last_value(1), Some(7));
    }
}

#[tokio::test]
async fn missing_marker_times_out_and_next_tick_recovers() {
    let (renderer, sched) = setup(&[1]);
    renderer.script(&url(1), [FixturePage::NoMarker, FixturePage::text("Seats: 3")]);

    assert_eq!(
        sched.run_once(1).await,
        RefreshOutcome::Failed(ExtractionErrorKind::Timeout)
    );
    assert_eq!(sched.registry().get_cached(1).unwrap().state(), CacheState::Pending);

    assert_eq!(sched.run_once(1).await, RefreshOutcome::Updated(3));
    assert_eq!(sched.registry().last_value(1), Some(3));
}

#[tokio::test]
async fn renderer_unavailable_is_recorded_not_raised() {
    let (renderer, sched) = setup(&[1]);
    renderer.set_unavailable(true);

    assert_eq!(
        sched.run_once(1).await,
        RefreshOutcome::Failed(ExtractionErrorKind::Renderer)
    );
    let entry = sched.registry().get_cached(1).unwrap();
    assert_eq!(entry.last_value, None);
    assert!(entry.last_error.is_some());
}

#[tokio::test]
async fn unknown_target_is_absent_not_an_error() {
    let (_renderer, sched) = setup(&[1]);
    assert_eq!(sched.run_once(99).await, RefreshOutcome::UnknownTarget);
    assert_eq!(sched.try_run_once(99).await, RefreshOutcome::UnknownTarget);
    assert!(sched.registry().get_cached(99).is_none());
}

#[tokio::test]
async fn hung_target_does_not_block_other_target_or_reads() {
    let cfg = ExtractorConfig {
        navigation_timeout: Duration::from_secs(30),
        ..common::fast_cfg()
    };
    let (renderer, sched) = setup_with(&[1, 2], cfg);
    renderer.set(&url(1), FixturePage::HangNavigation);
    renderer.set(&url(2), FixturePage::text("Seats: 5"));

    let hung = {
        let s = sched.clone();
        tokio::spawn(async move { s.run_once(1).await })
    };
    sleep(Duration::from_millis(10)).await;

    let b = timeout(Duration::from_secs(1), sched.run_once(2))
        .await
        .expect("target 2 must not wait for target 1");
    assert_eq!(b, RefreshOutcome::Updated(5));

    let a = sched.registry().get_cached(1).expect("read while refresh hangs");
    assert_eq!(a.state(), CacheState::Pending);
    assert!(!hung.is_finished());
    hung.abort();
}

#[tokio::test]
async fn overlapping_tick_is_skipped_while_in_flight() {
    let (renderer, sched) = setup(&[1]);
    renderer.set(
        &url(1),
        FixturePage::slow(Duration::from_millis(150), FixturePage::text("Seats: 9")),
    );

    let first = {
        let s = sched.clone();
        tokio::spawn(async move { s.try_run_once(1).await })
    };
    sleep(Duration::from_millis(20)).await;

    assert!(sched.registry().is_in_flight(1));
    assert_eq!(sched.try_run_once(1).await, RefreshOutcome::Skipped);
    assert_eq!(first.await.unwrap(), RefreshOutcome::Updated(9));
    assert!(!sched.registry().is_in_flight(1));
    assert_eq!(renderer.opened(), 1, "skipped tick must not open a context");
}

#[tokio::test]
async fn older_run_finishing_late_does_not_overwrite_newer_value() {
    let (renderer, sched) = setup(&[1]);
    renderer.script(
        &url(1),
        [
            FixturePage::slow(Duration::from_millis(150), FixturePage::text("Seats: 1")),
            FixturePage::text("Seats: 2"),
        ],
    );

    let older = {
        let s = sched.clone();
        tokio::spawn(async move { s.run_once(1).await })
    };
    sleep(Duration::from_millis(20)).await;

    assert_eq!(sched.run_once(1).await, RefreshOutcome::Updated(2));
    assert_eq!(older.await.unwrap(), RefreshOutcome::Superseded);
    assert_eq!(sched.registry().last_value(1), Some(2));
}

#[tokio::test]
async fn prime_refreshes_every_target_once() {
    let (renderer, sched) = setup(&[1, 2]);
    renderer.set(&url(1), FixturePage::text("Available Seats: 11"));
    renderer.set(&url(2), FixturePage::text("Available Seats: 22"));

    let mut outcomes = sched.prime().await;
    outcomes.sort_by_key(|(id, _)| *id);
    assert_eq!(
        outcomes,
        vec![(1, RefreshOutcome::Updated(11)), (2, RefreshOutcome::Updated(22))]
    );
    assert_eq!(renderer.opened(), 2);
}

#[tokio::test]
async fn periodic_cycle_waits_one_interval_then_keeps_ticking() {
    let (renderer, sched) = setup(&[1]);
    renderer.set(&url(1), FixturePage::text("Seats: 4"));

    let handle = sched.start_periodic(1, Duration::from_millis(40));
    sleep(Duration::from_millis(15)).await;
    assert_eq!(renderer.opened(), 0, "no implicit immediate tick");

    sleep(Duration::from_millis(250)).await;
    let entry = sched.registry().get_cached(1).unwrap();
    assert_eq!(entry.last_value, Some(4));
    assert!(entry.success_count >= 2, "got {}", entry.success_count);
    handle.abort();
}

#[tokio::test]
async fn periodic_cycles_are_independent_per_target() {
    let cfg = ExtractorConfig {
        navigation_timeout: Duration::from_secs(30),
        ..common::fast_cfg()
    };
    let (renderer, sched) = setup_with(&[1, 2], cfg);
    renderer.set(&url(1), FixturePage::HangNavigation);
    renderer.set(&url(2), FixturePage::text("Seats: 8"));

    let handles = sched.spawn_all(&[
        (1, Duration::from_millis(30)),
        (2, Duration::from_millis(30)),
    ]);
    sleep(Duration::from_millis(250)).await;

    let b = sched.registry().get_cached(2).unwrap();
    assert_eq!(b.last_value, Some(8));
    assert!(b.success_count >= 3, "target 2 kept ticking: {}", b.success_count);

    // target 1 hung in its initial run; every later tick was skipped
    assert!(sched.registry().is_in_flight(1));
    assert_eq!(sched.registry().get_cached(1).unwrap().state(), CacheState::Pending);
    // one hung context for target 1, at most one in flight for target 2
    assert!(renderer.active_contexts() <= 2, "active: {}", renderer.active_contexts());

    for h in handles {
        h.abort();
    }
}

#[tokio::test]
async fn wedged_context_close_does_not_stall_periodic_refresh() {
    let (renderer, sched) = setup(&[1]);
    renderer.set(&url(1), FixturePage::text("Seats: 5"));
    renderer.set_close_hangs(true);

    let handle = sched.start_periodic(1, Duration::from_millis(20));
    sleep(Duration::from_millis(600)).await;

    let entry = sched.registry().get_cached(1).unwrap();
    assert_eq!(entry.last_value, Some(5));
    assert!(entry.success_count >= 2, "ticks kept running: {}", entry.success_count);
    handle.abort();

    // let any in-flight run hit its close timeout
    sleep(Duration::from_millis(200)).await;
    assert!(!sched.registry().is_in_flight(1));
    assert_eq!(sched.try_run_once(1).await, RefreshOutcome::Updated(5));
}
