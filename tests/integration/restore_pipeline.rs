//! Restore, dry-run and list runs over many prefixes.

use unmark_engine::Mode;
use unmark_integration_tests::{BUCKET, TestBucket};
use unmark_store::RateLimiter;

/// 6 prefixes × 40 keys: two thirds in the window, the rest outside.
fn seed(bucket: &TestBucket) -> (Vec<String>, Vec<String>) {
    let mut inside = Vec::new();
    let mut outside = Vec::new();
    for p in 0..6 {
        for k in 0..40 {
            let key = format!("stack/idx{p}/db/{k:03}");
            match k % 3 {
                0 => {
                    bucket.hide(&key, 2_500);
                    outside.push(key);
                }
                _ => {
                    bucket.hide(&key, 1_000 + 10 * (k as i64 + 1));
                    inside.push(key);
                }
            }
        }
    }
    (inside, outside)
}

const PREFIXES: &[&str] = &[
    "stack/idx0/",
    "stack/idx1/",
    "stack/idx2/",
    "stack/idx3/",
    "stack/idx4/",
    "stack/idx5/",
];

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_restore_removes_every_in_window_marker_once() {
    let bucket = TestBucket::new(7);
    let (inside, outside) = seed(&bucket);

    let summary = bucket.run(Mode::Restore { zero_frozen: false }, PREFIXES).await;
    assert_eq!(summary.prefixes, PREFIXES.len());
    assert!(!summary.interrupted);

    for key in &inside {
        assert!(bucket.is_visible(key).await, "{key} still hidden");
        assert_eq!(bucket.store.versions(BUCKET, key).len(), 1, "{key}");
    }
    for key in &outside {
        assert!(!bucket.is_visible(key).await, "{key} restored");
        assert_eq!(bucket.store.versions(BUCKET, key).len(), 2, "{key}");
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_restore_through_rate_limiter() {
    let bucket = TestBucket::new(5).with_limiter(RateLimiter::new(10_000, 64));
    let (inside, _) = seed(&bucket);

    bucket.run(Mode::Restore { zero_frozen: false }, PREFIXES).await;

    for key in &inside {
        assert!(bucket.is_visible(key).await, "{key} still hidden");
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_refused_deletes_do_not_block_siblings() {
    let bucket = TestBucket::new(10);
    let (inside, _) = seed(&bucket);
    let refused = inside[3].clone();
    bucket.store.fail_deletes_for(&refused, "Access Denied");

    bucket.run(Mode::Restore { zero_frozen: false }, PREFIXES).await;

    assert!(!bucket.is_visible(&refused).await);
    for key in inside.iter().filter(|k| **k != refused) {
        assert!(bucket.is_visible(key).await, "{key} still hidden");
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_superseded_markers_are_left_alone() {
    let bucket = TestBucket::new(3);
    let key = "stack/idx0/db/rewritten";
    bucket.hide(key, 1_500);
    bucket.store.put_object_at(
        BUCKET,
        key,
        bytes::Bytes::from_static(b"new"),
        unmark_integration_tests::at(1_600),
    );

    bucket.run(Mode::Restore { zero_frozen: false }, &["stack/idx0/"]).await;

    assert_eq!(bucket.store.versions(BUCKET, key).len(), 3);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_dry_run_deletes_nothing() {
    let bucket = TestBucket::new(7);
    let (inside, _) = seed(&bucket);

    let summary = bucket.run(Mode::DryRun, PREFIXES).await;

    assert_eq!(summary.prefixes, PREFIXES.len());
    for key in &inside {
        assert_eq!(bucket.store.versions(BUCKET, key).len(), 2, "{key}");
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_list_writes_each_in_window_marker_once() {
    let bucket = TestBucket::new(7);
    let (inside, _) = seed(&bucket);
    let output = bucket.staging.path().join("markers.txt");

    bucket
        .run(
            Mode::List {
                output: Some(output.clone()),
            },
            PREFIXES,
        )
        .await;

    let mut listed: Vec<String> = std::fs::read_to_string(&output)
        .unwrap()
        .lines()
        .map(str::to_string)
        .collect();
    listed.sort();
    let mut expected: Vec<String> = inside
        .iter()
        .map(|k| k.strip_prefix("stack/").unwrap().to_string())
        .collect();
    expected.sort();
    assert_eq!(listed, expected);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_audit_leaves_the_bucket_untouched() {
    let bucket = TestBucket::new(7);
    let (inside, outside) = seed(&bucket);
    let calls_before = bucket.store.calls();

    let summary = bucket.run(Mode::Audit, PREFIXES).await;

    assert_eq!(summary.prefixes, PREFIXES.len());
    for key in inside.iter().chain(&outside) {
        assert_eq!(bucket.store.versions(BUCKET, key).len(), 2, "{key}");
    }
    // 80 entries per prefix at 7 per page.
    assert_eq!(bucket.store.calls() - calls_before, 6 * 12);
}
