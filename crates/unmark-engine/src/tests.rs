//! Tests for scanning, executors and pipeline wiring.

use std::collections::HashMap;
use std::sync::Arc;
use std::sync::Mutex;

use bytes::Bytes;
use chrono::{DateTime, TimeZone, Utc};
use sha2::{Digest, Sha256};
use tempfile::TempDir;
use tokio_util::sync::CancellationToken;
use unmark_pool::{BatchAction, JobSink, PoolError, WorkerId};
use unmark_receipt::Receipt;
use unmark_store::{MAX_DELETE_KEYS, MemoryStore, ObjectStore};
use unmark_types::{TimeWindow, VersionEntry};

use crate::executor::{FixupExecutor, RestoreExecutor};
use crate::{AuditLog, Mode, Pipeline, PipelineOptions, PoolSizes, RunContext, ScanCoordinator, ScanMode};

// ---------------------------------------------------------------------------
// Test helpers
// ---------------------------------------------------------------------------

const BUCKET: &str = "archive";
const STACK: &str = "stack";
const SUFFIX: &str = "20240101000000";

fn at(secs: i64) -> DateTime<Utc> {
    Utc.timestamp_opt(secs, 0).unwrap()
}

/// Window (1000, 2000).
fn ctx() -> Arc<RunContext> {
    Arc::new(RunContext::new(BUCKET, STACK, TimeWindow::new(at(1000), at(2000))))
}

fn worker() -> WorkerId {
    WorkerId {
        pool: Arc::from("test"),
        num: 0,
    }
}

/// Sink recording every submitted batch.
struct RecordingSink<T> {
    batches: Mutex<Vec<Vec<T>>>,
}

impl<T> RecordingSink<T> {
    fn new() -> Arc<Self> {
        Arc::new(Self {
            batches: Mutex::new(Vec::new()),
        })
    }

    fn sizes(&self) -> Vec<usize> {
        self.batches.lock().unwrap().iter().map(Vec::len).collect()
    }
}

impl<T: Clone> RecordingSink<T> {
    fn items(&self) -> Vec<T> {
        self.batches.lock().unwrap().iter().flatten().cloned().collect()
    }
}

#[async_trait::async_trait]
impl<T: Send + 'static> JobSink<T> for RecordingSink<T> {
    async fn submit(&self, batch: Vec<T>) -> Result<(), PoolError> {
        self.batches.lock().unwrap().push(batch);
        Ok(())
    }
}

fn small_sizes() -> PoolSizes {
    PoolSizes {
        scan_workers: 2,
        scan_batch: 3,
        restore_workers: 3,
        restore_batch: 10,
        fixup_workers: 2,
        fixup_batch: 2,
        queue_capacity: 8,
        emit_threshold: 5,
    }
}

fn options(mode: Mode, staging: &TempDir) -> PipelineOptions {
    PipelineOptions {
        mode,
        sizes: small_sizes(),
        staging_dir: staging.path().to_path_buf(),
        backup_suffix: Some(SUFFIX.to_string()),
    }
}

async fn run(store: Arc<MemoryStore>, mode: Mode, staging: &TempDir, prefixes: &[&str]) {
    let pipeline = Arc::new(
        Pipeline::new(store, ctx(), options(mode, staging))
            .await
            .unwrap(),
    );
    let summary = pipeline
        .run(
            prefixes.iter().map(|p| p.to_string()).collect::<Vec<_>>(),
            CancellationToken::new(),
        )
        .await
        .unwrap();
    assert_eq!(summary.prefixes, prefixes.len());
    assert!(!summary.interrupted);
}

/// Receipt JSON with `frozen_in_cluster` set and a valid hash.
fn frozen_receipt() -> String {
    let body = r#"{"cipher_blob":"YmxvYg==","frozen_in_cluster":"1"}"#;
    let hash = hex::encode_upper(Sha256::digest(body.as_bytes()));
    format!(r#"{{"cipher_blob":"YmxvYg==","content_hash":"{hash}","frozen_in_cluster":"1"}}"#)
}

/// Receipt JSON with a wrong hash and the flag cleared.
fn bad_hash_receipt() -> String {
    r#"{"cipher_blob":"YmxvYg==","content_hash":"AB12","frozen_in_cluster":"0"}"#.to_string()
}

fn check_receipt(dir: &TempDir, data: &Bytes) -> Receipt {
    let path = dir.path().join("check-receipt.json");
    std::fs::write(&path, data).unwrap();
    Receipt::open(&path).unwrap()
}

/// Formatted log lines captured by a thread-local subscriber.
#[derive(Clone, Default)]
struct LogCapture(Arc<Mutex<Vec<u8>>>);

impl std::io::Write for LogCapture {
    fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
        self.0.lock().unwrap().extend_from_slice(buf);
        Ok(buf.len())
    }

    fn flush(&mut self) -> std::io::Result<()> {
        Ok(())
    }
}

impl LogCapture {
    /// Route events on this thread here until the guard drops.
    fn install(&self) -> tracing::subscriber::DefaultGuard {
        let writer = self.clone();
        let subscriber = tracing_subscriber::fmt()
            .with_writer(move || writer.clone())
            .with_max_level(tracing::Level::INFO)
            .with_ansi(false)
            .without_time()
            .finish();
        tracing::subscriber::set_default(subscriber)
    }

    fn lines(&self, status: &str) -> Vec<String> {
        let text = String::from_utf8(self.0.lock().unwrap().clone()).unwrap();
        let wanted = format!("status={status}");
        text.lines()
            .filter(|line| line.split_whitespace().any(|t| t == wanted))
            .map(str::to_string)
            .collect()
    }

    /// `(batchid, key, versionid)` of every line with `status`.
    fn outcomes(&self, status: &str) -> Vec<(String, String, String)> {
        self.lines(status)
            .iter()
            .map(|line| {
                (
                    field(line, "batchid"),
                    field(line, "key"),
                    field(line, "versionid"),
                )
            })
            .collect()
    }
}

fn field(line: &str, name: &str) -> String {
    let prefix = format!("{name}=");
    line.split_whitespace()
        .find_map(|t| t.strip_prefix(prefix.as_str()))
        .unwrap_or_else(|| panic!("no {name} in {line}"))
        .to_string()
}

/// Lines per batch id, smallest first.
fn batch_sizes(outcomes: &[(String, String, String)]) -> Vec<usize> {
    let mut per_batch: HashMap<&str, usize> = HashMap::new();
    for (batch, _, _) in outcomes {
        *per_batch.entry(batch.as_str()).or_default() += 1;
    }
    let mut sizes: Vec<usize> = per_batch.into_values().collect();
    sizes.sort_unstable();
    sizes
}

/// Data version at 500 hidden by a delete marker at `marker_at`.
fn hidden_object(store: &MemoryStore, key: &str, marker_at: i64) -> String {
    store.put_object_at(BUCKET, key, Bytes::from_static(b"data"), at(500));
    store.put_delete_marker_at(BUCKET, key, at(marker_at))
}

// ---------------------------------------------------------------------------
// Scanning
// ---------------------------------------------------------------------------

#[tokio::test]
async fn test_scan_batches_by_emit_threshold_across_pages() {
    let store = Arc::new(MemoryStore::new().with_page_size(7));
    for i in 0..50 {
        hidden_object(&store, &format!("stack/p/{i:03}"), 1500);
    }
    let sink = RecordingSink::<VersionEntry>::new();
    let scanner = ScanCoordinator::new(
        store,
        ctx(),
        ScanMode::DeleteMarkers {
            sink: sink.clone(),
            emit_threshold: 24,
        },
        AuditLog::new(1),
    );

    scanner.scan_prefix(&worker(), "stack/p/").await;

    assert_eq!(sink.sizes(), vec![24, 24, 2]);
    let mut keys: Vec<_> = sink.items().into_iter().map(|e| e.key).collect();
    keys.sort();
    keys.dedup();
    assert_eq!(keys.len(), 50);
}

#[tokio::test]
async fn test_scan_selects_only_latest_markers_in_window() {
    let store = Arc::new(MemoryStore::new().with_page_size(3));
    let selected = hidden_object(&store, "stack/p/in", 1500);
    hidden_object(&store, "stack/p/early", 900);
    hidden_object(&store, "stack/p/late", 2500);
    hidden_object(&store, "stack/p/edge", 2000);
    // Marker in window but superseded by a later data version.
    store.put_delete_marker_at(BUCKET, "stack/p/old", at(1500));
    store.put_object_at(BUCKET, "stack/p/old", Bytes::new(), at(1600));

    let sink = RecordingSink::<VersionEntry>::new();
    let scanner = ScanCoordinator::new(
        store,
        Arc::new(ctx().as_ref().clone().with_verbose(true)),
        ScanMode::DeleteMarkers {
            sink: sink.clone(),
            emit_threshold: 24,
        },
        AuditLog::new(1),
    );
    scanner.scan_prefix(&worker(), "stack/p/").await;

    let items = sink.items();
    assert_eq!(items.len(), 1);
    assert_eq!(items[0].key, "stack/p/in");
    assert_eq!(items[0].version_id, selected);
}

#[tokio::test]
async fn test_scan_listing_error_is_contained() {
    let store = Arc::new(MemoryStore::new());
    let sink = RecordingSink::<VersionEntry>::new();
    let scanner = ScanCoordinator::new(
        store,
        ctx(),
        ScanMode::DeleteMarkers {
            sink: sink.clone(),
            emit_threshold: 24,
        },
        AuditLog::new(1),
    );
    // Bucket does not exist.
    scanner.scan_prefix(&worker(), "stack/p/").await;
    assert!(sink.sizes().is_empty());
}

#[tokio::test]
async fn test_scan_receipts_submits_only_receipt_keys() {
    let store = Arc::new(MemoryStore::new().with_page_size(2));
    for key in [
        "stack/i/db/AA/BB/b1/receipt.json",
        "stack/i/db/AA/BB/b1/journal.gz",
        "stack/i/db/AA/BB/b2/receipt.json",
        "stack/i/db/AA/BB/b2/receipt.json.20230101000000",
    ] {
        store.put_object_at(BUCKET, key, Bytes::new(), at(10));
    }
    let sink = RecordingSink::<String>::new();
    let scanner = ScanCoordinator::new(
        store,
        ctx(),
        ScanMode::Receipts { sink: sink.clone() },
        AuditLog::new(1),
    );
    scanner.scan_prefix(&worker(), "stack/i/").await;

    assert_eq!(
        sink.items(),
        vec![
            "stack/i/db/AA/BB/b1/receipt.json".to_string(),
            "stack/i/db/AA/BB/b2/receipt.json".to_string(),
        ]
    );
}

#[tokio::test]
async fn test_audit_log_waits_for_records() {
    let audit = AuditLog::new(1);
    let entries = vec![VersionEntry {
        key: "k".into(),
        version_id: "v".into(),
        last_modified: at(1),
        is_latest: true,
        is_delete_marker: true,
    }];
    audit.record(unmark_types::Status::Audit, entries);
    audit.wait().await;
    assert_eq!(audit.in_flight(), 0);
}

// ---------------------------------------------------------------------------
// Pipelines
// ---------------------------------------------------------------------------

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_restore_removes_markers_and_reports_failures() {
    let store = Arc::new(MemoryStore::new().with_page_size(4));
    for i in 0..30 {
        hidden_object(&store, &format!("stack/a/{i:02}"), 1500);
    }
    hidden_object(&store, "stack/b/locked", 1500);
    store.fail_deletes_for("stack/b/locked", "access denied");
    hidden_object(&store, "stack/b/outside", 2500);
    let staging = TempDir::new().unwrap();

    run(
        store.clone(),
        Mode::Restore { zero_frozen: false },
        &staging,
        &["stack/a/", "stack/b/"],
    )
    .await;

    for i in 0..30 {
        let key = format!("stack/a/{i:02}");
        assert_eq!(
            store.get_object(BUCKET, &key).await.unwrap(),
            Bytes::from_static(b"data"),
            "{key} not restored"
        );
    }
    assert!(store.get_object(BUCKET, "stack/b/locked").await.is_err());
    assert!(store.get_object(BUCKET, "stack/b/outside").await.is_err());
}

// Current-thread runtime so every worker logs through the captured subscriber.
#[tokio::test]
async fn test_restore_logs_one_outcome_per_marker() {
    let logs = LogCapture::default();
    let _guard = logs.install();

    let store = Arc::new(MemoryStore::new().with_page_size(4));
    let mut expected = Vec::new();
    for i in 0..30 {
        let key = format!("stack/a/{i:02}");
        let marker = hidden_object(&store, &key, 1500);
        expected.push((key, marker));
    }
    let locked = hidden_object(&store, "stack/a/locked", 1500);
    store.fail_deletes_for("stack/a/locked", "access denied");
    hidden_object(&store, "stack/a/outside", 2500);
    let staging = TempDir::new().unwrap();

    run(
        store.clone(),
        Mode::Restore { zero_frozen: false },
        &staging,
        &["stack/a/"],
    )
    .await;

    let ok = logs.outcomes("ok");
    let mut removed: Vec<(String, String)> =
        ok.iter().map(|(_, k, v)| (k.clone(), v.clone())).collect();
    removed.sort();
    expected.sort();
    assert_eq!(removed, expected);

    let fail = logs.outcomes("fail");
    assert_eq!(fail.len(), 1);
    assert_eq!(fail[0].1, "stack/a/locked");
    assert_eq!(fail[0].2, locked);

    let all: Vec<_> = ok.into_iter().chain(fail).collect();
    let sizes = batch_sizes(&all);
    assert_eq!(sizes.iter().sum::<usize>(), 31);
    assert!(sizes.iter().all(|&n| n <= small_sizes().restore_batch), "{sizes:?}");
    assert!(logs.lines("error").is_empty());
}

#[tokio::test]
async fn test_restore_splits_batches_at_delete_limit() {
    let logs = LogCapture::default();
    let _guard = logs.install();

    let store = Arc::new(MemoryStore::new());
    let count = MAX_DELETE_KEYS * 2 + 500;
    let batch: Vec<VersionEntry> = (0..count)
        .map(|i| {
            let key = format!("stack/a/{i:05}");
            hidden_object(&store, &key, 1500);
            store.versions(BUCKET, &key).remove(0)
        })
        .collect();
    assert!(batch.iter().all(|e| e.is_delete_marker));

    RestoreExecutor::new(store.clone(), ctx())
        .run(&worker(), batch)
        .await;

    assert!(logs.lines("error").is_empty());
    let ok = logs.outcomes("ok");
    assert_eq!(ok.len(), count);
    assert_eq!(batch_sizes(&ok), vec![500, MAX_DELETE_KEYS, MAX_DELETE_KEYS]);
    assert_eq!(store.versions(BUCKET, "stack/a/02499").len(), 1);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_restore_zero_frozen_requeues_receipts() {
    let store = Arc::new(MemoryStore::new());
    let key = "stack/idx/db/AB/CD/bid/receipt.json";
    let original = frozen_receipt();
    store.put_object_at(BUCKET, key, Bytes::from(original.clone()), at(500));
    store.put_delete_marker_at(BUCKET, key, at(1500));
    hidden_object(&store, "stack/idx/db/AB/CD/bid/journal.gz", 1500);
    let staging = TempDir::new().unwrap();

    run(
        store.clone(),
        Mode::Restore { zero_frozen: true },
        &staging,
        &["stack/idx/"],
    )
    .await;

    let backup = store
        .get_object(BUCKET, &format!("{key}.{SUFFIX}"))
        .await
        .unwrap();
    assert_eq!(backup, Bytes::from(original));

    let uploaded = store.get_object(BUCKET, key).await.unwrap();
    let receipt = check_receipt(&staging, &uploaded);
    assert!(receipt.hashes_match());
    assert!(!receipt.is_frozen_in_cluster());
    assert!(store
        .get_object(BUCKET, "stack/idx/db/AB/CD/bid/journal.gz")
        .await
        .is_ok());
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_dry_run_changes_nothing() {
    let store = Arc::new(MemoryStore::new());
    hidden_object(&store, "stack/a/1", 1500);
    let calls_before = store.calls();
    let staging = TempDir::new().unwrap();

    run(store.clone(), Mode::DryRun, &staging, &["stack/a/"]).await;

    assert!(store.get_object(BUCKET, "stack/a/1").await.is_err());
    assert_eq!(store.versions(BUCKET, "stack/a/1").len(), 2);
    // One listing call plus the get above.
    assert_eq!(store.calls(), calls_before + 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_list_writes_stack_relative_keys() {
    let store = Arc::new(MemoryStore::new().with_page_size(2));
    for key in ["stack/a/1", "stack/a/2", "stack/a/3"] {
        hidden_object(&store, key, 1500);
    }
    hidden_object(&store, "stack/a/old", 100);
    let staging = TempDir::new().unwrap();
    let output = staging.path().join("list.txt");

    run(
        store.clone(),
        Mode::List {
            output: Some(output.clone()),
        },
        &staging,
        &["stack/a/"],
    )
    .await;

    let listed = std::fs::read_to_string(&output).unwrap();
    let mut lines: Vec<_> = listed.lines().collect();
    lines.sort();
    assert_eq!(lines, vec!["a/1", "a/2", "a/3"]);
    assert_eq!(store.versions(BUCKET, "stack/a/1").len(), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_fixup_repairs_only_broken_receipts() {
    let store = Arc::new(MemoryStore::new());
    let broken = "stack/i/db/00/11/b1/receipt.json";
    let valid = "stack/i/db/00/11/b2/receipt.json";
    store.put_object_at(BUCKET, broken, Bytes::from(bad_hash_receipt()), at(10));
    store.put_object_at(BUCKET, valid, Bytes::from(frozen_receipt()), at(10));
    let staging = TempDir::new().unwrap();

    run(
        store.clone(),
        Mode::Fixup { zero_frozen: false },
        &staging,
        &["stack/i/"],
    )
    .await;

    let fixed = store.get_object(BUCKET, broken).await.unwrap();
    assert!(check_receipt(&staging, &fixed).hashes_match());
    assert_eq!(
        store
            .get_object(BUCKET, &format!("{broken}.{SUFFIX}"))
            .await
            .unwrap(),
        Bytes::from(bad_hash_receipt())
    );

    assert_eq!(store.versions(BUCKET, valid).len(), 1, "valid receipt re-uploaded");
    assert!(store.get_object(BUCKET, &format!("{valid}.{SUFFIX}")).await.is_err());
    assert!(staging.path().join(valid).exists(), "staged copy missing");
}

#[tokio::test]
async fn test_fixup_missing_object_is_an_error() {
    let store: Arc<dyn ObjectStore> = Arc::new(MemoryStore::new());
    let staging = TempDir::new().unwrap();
    let executor = FixupExecutor::new(store, ctx(), staging.path(), false);

    let err = executor
        .fix_one("stack/i/db/00/11/b1/receipt.json")
        .await
        .unwrap_err();
    assert!(err.to_string().contains("download"));
    assert!(!executor.fix_one("stack/i/other.json").await.unwrap());
}

#[tokio::test]
async fn test_fixup_refuses_keys_leaving_staging() {
    let store = Arc::new(MemoryStore::new());
    let key = "stack/a/../../../escaped/receipt.json";
    store.put_object_at(BUCKET, key, Bytes::from(bad_hash_receipt()), at(500));
    let calls_before = store.calls();
    let staging = TempDir::new().unwrap();
    let executor = FixupExecutor::new(store.clone(), ctx(), staging.path().join("fixups"), false);

    assert!(matches!(
        executor.staging_path(key),
        Err(crate::EngineError::UnsafeKey(_))
    ));
    let err = executor.fix_one(key).await.unwrap_err();
    assert!(matches!(err, crate::EngineError::UnsafeKey(_)));
    assert_eq!(store.calls(), calls_before);
    assert!(!staging.path().join("escaped").exists());

    assert_eq!(
        executor.staging_path("/stack/a/./receipt.json").unwrap(),
        staging.path().join("fixups/stack/a/receipt.json")
    );
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_audit_mode_submits_nothing() {
    let store = Arc::new(MemoryStore::new());
    hidden_object(&store, "stack/a/1", 1500);
    let staging = TempDir::new().unwrap();

    run(store.clone(), Mode::Audit, &staging, &["stack/a/"]).await;

    assert_eq!(store.versions(BUCKET, "stack/a/1").len(), 2);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn test_cancelled_run_submits_nothing() {
    let store = Arc::new(MemoryStore::new());
    hidden_object(&store, "stack/a/1", 1500);
    let staging = TempDir::new().unwrap();
    let pipeline = Arc::new(
        Pipeline::new(
            store.clone(),
            ctx(),
            options(Mode::Restore { zero_frozen: false }, &staging),
        )
        .await
        .unwrap(),
    );

    let token = CancellationToken::new();
    token.cancel();
    let summary = pipeline
        .run(vec!["stack/a/".to_string()], token)
        .await
        .unwrap();

    assert_eq!(summary.prefixes, 0);
    assert!(summary.interrupted);
    assert_eq!(store.versions(BUCKET, "stack/a/1").len(), 2);
    assert!(pipeline.scan_prefix("stack/a/".into()).await.is_err());
}
