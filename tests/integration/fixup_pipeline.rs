//! Receipt repair through fixup runs and zero-frozen restores.

use bytes::Bytes;
use unmark_engine::Mode;
use unmark_integration_tests::{
    BUCKET, SUFFIX, TestBucket, at, corrupt_receipt, receipt,
};

fn receipt_key(bid: &str) -> String {
    format!("stack/main/db/3A/7F/{bid}/receipt.json")
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_fixup_resets_mismatched_hashes_only() {
    let bucket = TestBucket::new(4);
    let broken: Vec<String> = (0..5).map(|i| receipt_key(&format!("broken{i}"))).collect();
    let valid: Vec<String> = (0..5).map(|i| receipt_key(&format!("valid{i}"))).collect();
    for key in &broken {
        bucket.put(key, corrupt_receipt());
    }
    for key in &valid {
        bucket.put(key, receipt(true));
    }
    bucket.put("stack/main/db/3A/7F/broken0/journal.gz", Bytes::from_static(b"j"));

    bucket.run(Mode::Fixup { zero_frozen: false }, &["stack/main/"]).await;

    for key in &broken {
        let fixed = bucket.body(key).await.unwrap();
        let parsed = bucket.inspect(&fixed);
        assert!(parsed.hashes_match(), "{key} not repaired");
        assert!(!parsed.is_frozen_in_cluster());
        assert_eq!(
            bucket.body(&format!("{key}.{SUFFIX}")).await.unwrap(),
            Bytes::from(corrupt_receipt())
        );
        assert!(bucket.staged(key).exists());
    }
    for key in &valid {
        assert_eq!(bucket.store.versions(BUCKET, key).len(), 1, "{key} rewritten");
        assert!(bucket.body(&format!("{key}.{SUFFIX}")).await.is_none());
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_fixup_zero_frozen_clears_flag() {
    let bucket = TestBucket::new(10);
    let frozen = receipt_key("frozen");
    let thawed = receipt_key("thawed");
    bucket.put(&frozen, receipt(true));
    bucket.put(&thawed, receipt(false));

    bucket.run(Mode::Fixup { zero_frozen: true }, &["stack/main/"]).await;

    let fixed = bucket.inspect(&bucket.body(&frozen).await.unwrap());
    assert!(!fixed.is_frozen_in_cluster());
    assert!(fixed.hashes_match());
    assert_eq!(
        bucket.body(&format!("{frozen}.{SUFFIX}")).await.unwrap(),
        Bytes::from(receipt(true))
    );

    assert_eq!(bucket.store.versions(BUCKET, &thawed).len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_fixup_skips_receipts_hidden_by_markers() {
    let bucket = TestBucket::new(10);
    let hidden = receipt_key("hidden");
    bucket.put(&hidden, corrupt_receipt());
    bucket
        .store
        .put_delete_marker_at(BUCKET, &hidden, at(1_500));

    bucket.run(Mode::Fixup { zero_frozen: false }, &["stack/main/"]).await;

    assert_eq!(bucket.store.versions(BUCKET, &hidden).len(), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_zero_frozen_restore_repairs_restored_receipts() {
    let bucket = TestBucket::new(3);
    let mut receipts = Vec::new();
    for i in 0..6 {
        let key = receipt_key(&format!("b{i}"));
        bucket.put(&key, receipt(true));
        bucket
            .store
            .put_delete_marker_at(BUCKET, &key, at(1_100 + i));
        receipts.push(key);
        bucket.hide(&format!("stack/main/db/3A/7F/b{i}/rawdata/journal.gz"), 1_200);
    }
    let untouched = receipt_key("outside");
    bucket.put(&untouched, receipt(true));
    bucket
        .store
        .put_delete_marker_at(BUCKET, &untouched, at(2_500));

    bucket.run(Mode::Restore { zero_frozen: true }, &["stack/main/"]).await;

    for (i, key) in receipts.iter().enumerate() {
        let restored = bucket.inspect(&bucket.body(key).await.unwrap());
        assert!(restored.hashes_match(), "{key}");
        assert!(!restored.is_frozen_in_cluster(), "{key}");
        assert_eq!(
            bucket.body(&format!("{key}.{SUFFIX}")).await.unwrap(),
            Bytes::from(receipt(true))
        );
        assert!(
            bucket
                .is_visible(&format!("stack/main/db/3A/7F/b{i}/rawdata/journal.gz"))
                .await
        );
    }
    assert!(!bucket.is_visible(&untouched).await);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_plain_restore_does_not_touch_receipts() {
    let bucket = TestBucket::new(10);
    let key = receipt_key("plain");
    bucket.put(&key, receipt(true));
    bucket.store.put_delete_marker_at(BUCKET, &key, at(1_500));

    bucket.run(Mode::Restore { zero_frozen: false }, &["stack/main/"]).await;

    assert_eq!(bucket.body(&key).await.unwrap(), Bytes::from(receipt(true)));
    assert!(bucket.body(&format!("{key}.{SUFFIX}")).await.is_none());
}
