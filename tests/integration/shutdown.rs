//! Graceful shutdown in the middle of a run.

use std::time::Duration;

use unmark_engine::{Mode, ShutdownCoordinator};
use unmark_integration_tests::{BUCKET, TestBucket};
use unmark_store::RateLimiter;

const PREFIX_COUNT: usize = 200;

/// One hidden key per prefix, behind a slow limiter.
fn slow_bucket() -> (TestBucket, Vec<String>) {
    let bucket = TestBucket::new(10).with_limiter(RateLimiter::new(40, 1));
    let prefixes: Vec<String> = (0..PREFIX_COUNT).map(|i| format!("stack/p{i:03}/")).collect();
    for prefix in &prefixes {
        bucket.hide(&format!("{prefix}key"), 1_500);
    }
    (bucket, prefixes)
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_shutdown_stops_submission_and_drains() {
    let (bucket, prefixes) = slow_bucket();
    let refs: Vec<&str> = prefixes.iter().map(String::as_str).collect();
    let shutdown = ShutdownCoordinator::new();

    let trigger = {
        let shutdown = shutdown.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(300)).await;
            shutdown.trigger(std::process::id(), "test");
        })
    };

    let summary = tokio::time::timeout(
        Duration::from_secs(30),
        bucket.run_until(Mode::Restore { zero_frozen: false }, &refs, shutdown.token()),
    )
    .await
    .expect("run did not finish after shutdown");
    trigger.await.unwrap();

    assert!(summary.interrupted);
    assert!(summary.prefixes < PREFIX_COUNT, "every prefix was accepted");

    // Each key is either fully restored or untouched.
    let mut restored = 0;
    for prefix in &prefixes {
        match bucket.store.versions(BUCKET, &format!("{prefix}key")).len() {
            1 => restored += 1,
            2 => {}
            n => panic!("{prefix}key has {n} versions"),
        }
    }
    assert!(restored < PREFIX_COUNT);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_shutdown_before_start_runs_nothing() {
    let (bucket, prefixes) = slow_bucket();
    let refs: Vec<&str> = prefixes.iter().map(String::as_str).collect();
    let shutdown = ShutdownCoordinator::new();
    shutdown.trigger(std::process::id(), "test");

    let summary = bucket
        .run_until(Mode::Restore { zero_frozen: false }, &refs, shutdown.token())
        .await;

    assert!(summary.interrupted);
    assert_eq!(summary.prefixes, 0);
    for prefix in &prefixes {
        assert_eq!(bucket.store.versions(BUCKET, &format!("{prefix}key")).len(), 2);
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_killed_pipeline_refuses_prefixes() {
    let bucket = TestBucket::new(10);
    let pipeline = bucket.pipeline(Mode::DryRun).await;
    pipeline.start_workers().unwrap();

    pipeline.scan_prefix("stack/a/".into()).await.unwrap();
    pipeline.kill().await;
    assert!(pipeline.scan_prefix("stack/b/".into()).await.is_err());

    tokio::time::timeout(Duration::from_secs(10), pipeline.shutdown())
        .await
        .expect("shutdown hung");
}
