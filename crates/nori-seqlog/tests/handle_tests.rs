//! Handle semantics tests.
//!
//! Covers the observable contract of `SeqLog`:
//! - length and slicing over persisted ++ pending records
//! - durability across handles and reopen
//! - open/close/clear state errors and idempotence
//! - registry-wide events (push, change, clear)
//! - no duplicated records across repeated flush cycles

use nori_observe::RecordingMeter;
use nori_seqlog::{
    Error, EventBus, LogEvent, LogOptions, Registry, RegistryConfig, Scalar, SeqLog,
};
use serde_json::json;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;
use tokio::sync::broadcast;

const DELAY: Duration = Duration::from_millis(20);

fn registry() -> Arc<Registry> {
    Registry::new(RegistryConfig::default()).unwrap()
}

fn options() -> LogOptions {
    LogOptions::new().with_flush_delay(DELAY)
}

fn ints(values: &[i64]) -> Vec<Scalar> {
    values.iter().copied().map(Scalar::Int).collect()
}

fn file_lines(path: &Path) -> Vec<String> {
    std::fs::read_to_string(path)
        .unwrap_or_default()
        .lines()
        .map(str::to_string)
        .collect()
}

/// Polls until the handle has no pending records.
async fn wait_flushed(log: &SeqLog) {
    tokio::time::timeout(Duration::from_secs(5), async {
        while log.pending_len() > 0 {
            tokio::time::sleep(DELAY).await;
        }
    })
    .await
    .expect("pending records were never flushed");
}

/// Waits for the first event of the given kind, failing after a few seconds.
async fn wait_for(rx: &mut broadcast::Receiver<LogEvent>, kind: &str) -> LogEvent {
    tokio::time::timeout(Duration::from_secs(5), async {
        loop {
            match rx.recv().await {
                Ok(event) if event.kind() == kind => return event,
                Ok(_) | Err(broadcast::error::RecvError::Lagged(_)) => continue,
                Err(e) => panic!("event bus closed: {}", e),
            }
        }
    })
    .await
    .unwrap_or_else(|_| panic!("timed out waiting for {} event", kind))
}

// ============================================================================
// Length and slicing
// ============================================================================

#[tokio::test]
async fn test_never_opened_handle_is_empty() {
    let log = SeqLog::new(&registry());
    assert_eq!(log.len(), 0);
    assert!(log.is_empty());
    assert!(log.slice(0, Some(5)).is_empty());
    assert!(log.slice(-1, None).is_empty());
}

#[tokio::test]
async fn test_length_grows_with_pushes() {
    let log = SeqLog::new(&registry());
    let size = log.len();
    log.push(1).unwrap();
    log.push(2).unwrap();
    assert_eq!(log.len(), size + 2);

    log.push(11).unwrap();
    log.clear().await.unwrap();
    assert_eq!(log.len(), 0);
}

#[tokio::test]
async fn test_slice_positive_indices() {
    let log = SeqLog::new(&registry());
    for v in [4, 5, 6] {
        log.push(v).unwrap();
    }

    assert_eq!(log.slice(0, Some(5)), ints(&[4, 5, 6]));
    assert_eq!(log.slice(0, None), ints(&[4, 5, 6]));
    assert_eq!(log.slice(1, Some(2)), ints(&[5]));
    assert_eq!(log.slice(1, Some(3)), ints(&[5, 6]));
    assert_eq!(log.slice(2, None), ints(&[6]));
}

#[tokio::test]
async fn test_slice_negative_indices_across_persisted_and_pending() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("datafile");
    let registry = registry();

    // 8 persisted, 9 and 11 pending
    let log = SeqLog::new(&registry);
    log.open(&path, LogOptions::new().with_flush_delay(Duration::from_secs(30)))
        .await
        .unwrap();
    log.push(8).unwrap();
    log.flush().await.unwrap();
    log.push(9).unwrap();
    log.push(11).unwrap();
    assert_eq!(log.pending_len(), 2);

    assert_eq!(log.slice(-1, None), ints(&[11]));
    assert_eq!(log.slice(-2, None), ints(&[9, 11]));
    assert_eq!(log.slice(1, Some(-1)), ints(&[9]));
    assert_eq!(log.slice(-2, Some(-1)), ints(&[9]));
    assert_eq!(log.slice(0, Some(-1)), ints(&[8, 9]));
    assert_eq!(log.slice(-2, Some(55)), ints(&[9, 11]));

    log.close().await.unwrap();
}

// ============================================================================
// Durability
// ============================================================================

#[tokio::test]
async fn test_reopen_round_trip() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("datafile");
    let registry = registry();

    let first = SeqLog::new(&registry);
    first.open(&path, options()).await.unwrap();
    for v in [8, 9, 11] {
        first.push(v).unwrap();
    }
    first.close().await.unwrap();

    let second = SeqLog::new(&registry);
    second.open(&path, options()).await.unwrap();
    assert_eq!(second.slice(0, None), ints(&[8, 9, 11]));
    second.close().await.unwrap();
}

#[tokio::test]
async fn test_large_burst_is_persisted_once() {
    const ITEMS: i64 = 20_000;
    const FIRST: i64 = 946_684_799_000;

    let dir = TempDir::new().unwrap();
    let path = dir.path().join("datafile");
    let registry = registry();

    let log = SeqLog::new(&registry);
    log.open(&path, options()).await.unwrap();
    log.clear().await.unwrap();
    for i in 0..ITEMS {
        log.push(FIRST + i).unwrap();
    }
    wait_flushed(&log).await;

    let reader = SeqLog::new(&Registry::new(RegistryConfig::default()).unwrap());
    reader.open(&path, options()).await.unwrap();
    assert_eq!(reader.len(), ITEMS as usize);
    assert_eq!(reader.slice(0, Some(1)), ints(&[FIRST]));
    reader.close().await.unwrap();

    log.close().await.unwrap();
}

#[tokio::test]
async fn test_no_duplication_across_flush_cycles() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("datafile");
    let meter = RecordingMeter::new();
    let registry = Registry::with_parts(
        RegistryConfig::default(),
        EventBus::new(64),
        Arc::new(meter.clone()),
    )
    .unwrap();

    let log = SeqLog::new(&registry);
    log.open(&path, options()).await.unwrap();

    for v in [1, 2, 3] {
        log.push(v).unwrap();
        wait_flushed(&log).await;
    }
    log.close().await.unwrap();

    assert_eq!(file_lines(&path), vec!["1", "2", "3"]);
    assert_eq!(meter.counter_value("seqlog_flush_total"), 3);
    assert_eq!(meter.counter_value("seqlog_flushed_records_total"), 3);

    let reopened = SeqLog::new(&registry);
    reopened.open(&path, options()).await.unwrap();
    assert_eq!(reopened.len(), 3);
    reopened.close().await.unwrap();
}

#[tokio::test]
async fn test_mixed_scalars_round_trip() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("datafile");
    let registry = registry();

    let values = vec![
        Scalar::Int(-3),
        Scalar::Float(2.5),
        Scalar::Float(4.0),
        Scalar::from("hello world"),
        Scalar::from(""),
    ];

    let log = SeqLog::new(&registry);
    log.open(&path, options()).await.unwrap();
    for v in &values {
        log.push(v.clone()).unwrap();
    }
    log.close().await.unwrap();

    let reader = SeqLog::new(&registry);
    reader.open(&path, options()).await.unwrap();
    assert_eq!(reader.slice(0, None), values);
    reader.close().await.unwrap();
}

// ============================================================================
// State errors
// ============================================================================

#[tokio::test]
async fn test_open_twice_fails() {
    let dir = TempDir::new().unwrap();
    let log = SeqLog::new(&registry());
    log.open(dir.path().join("datafile"), options()).await.unwrap();

    let err = log
        .open(dir.path().join("datafile2"), options())
        .await
        .unwrap_err();
    assert!(matches!(err, Error::AlreadyOpen));
    assert!(!dir.path().join("datafile2").exists());

    log.close().await.unwrap();
}

#[tokio::test]
async fn test_close_requires_open() {
    let dir = TempDir::new().unwrap();
    let log = SeqLog::new(&registry());
    assert!(matches!(log.close().await, Err(Error::NotOpen)));

    log.open(dir.path().join("datafile"), options()).await.unwrap();
    log.close().await.unwrap();
    assert!(matches!(log.close().await, Err(Error::NotOpen)));
}

#[tokio::test]
async fn test_open_rejects_directory_and_bad_options() {
    let dir = TempDir::new().unwrap();
    let log = SeqLog::new(&registry());

    assert!(matches!(
        log.open(dir.path(), options()).await,
        Err(Error::NotAFile(_))
    ));
    assert!(matches!(
        log.open(
            dir.path().join("datafile"),
            LogOptions::new().with_flush_delay(Duration::from_secs(3600))
        )
        .await,
        Err(Error::InvalidArgument(_))
    ));
    assert!(!log.is_open());
}

#[tokio::test]
async fn test_push_rejects_invalid_values() {
    let log = SeqLog::new(&registry());

    assert!(matches!(log.push("a\nb"), Err(Error::InvalidValue(_))));
    assert!(matches!(
        log.push(json!({"a": "Object not allowed"})),
        Err(Error::InvalidType(_))
    ));
    assert!(matches!(log.push(json!(null)), Err(Error::InvalidType(_))));
    assert_eq!(log.len(), 0);

    log.push(json!(42)).unwrap();
    log.push(json!("text")).unwrap();
    assert_eq!(log.slice(0, None), vec![Scalar::Int(42), Scalar::from("text")]);
}

// ============================================================================
// Clear
// ============================================================================

#[tokio::test]
async fn test_clear_twice_removes_file() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("datafile");
    let log = SeqLog::new(&registry());
    let mut events = log.subscribe();

    log.open(&path, options()).await.unwrap();
    log.push(1).unwrap();
    log.flush().await.unwrap();
    assert!(path.exists());

    log.clear().await.unwrap();
    log.clear().await.unwrap();
    assert_eq!(log.len(), 0);
    assert!(!path.exists());

    wait_for(&mut events, "clear").await;
    wait_for(&mut events, "clear").await;

    // Still usable after clearing
    log.push(2).unwrap();
    log.close().await.unwrap();
    assert_eq!(file_lines(&path), vec!["2"]);
}

#[tokio::test]
async fn test_clear_keeps_other_handles_pending() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("datafile");
    let registry = registry();
    let slow = LogOptions::new().with_flush_delay(Duration::from_secs(30));

    let a = SeqLog::new(&registry);
    let b = SeqLog::new(&registry);
    a.open(&path, slow).await.unwrap();
    b.open(&path, slow).await.unwrap();

    a.push(1).unwrap();
    a.flush().await.unwrap();
    b.push(2).unwrap();
    assert_eq!(b.len(), 2);

    a.clear().await.unwrap();
    // Shared persisted view is gone, b's own pending record is not
    assert_eq!(a.len(), 0);
    assert_eq!(b.len(), 1);

    b.flush().await.unwrap();
    assert_eq!(file_lines(&path), vec!["2"]);

    a.close().await.unwrap();
    b.close().await.unwrap();
}

// ============================================================================
// Events
// ============================================================================

#[tokio::test]
async fn test_push_event_reaches_every_subscriber() {
    let registry = registry();
    let a = SeqLog::new(&registry);
    let b = SeqLog::new(&registry);
    let mut on_b = b.subscribe();

    a.push(42).unwrap();

    match wait_for(&mut on_b, "push").await {
        LogEvent::Push(v) => assert_eq!(v, Scalar::Int(42)),
        other => panic!("unexpected event {:?}", other),
    }
}

#[tokio::test]
async fn test_same_registry_handles_see_each_other() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("datafile_events");
    let registry = registry();
    let instant = LogOptions::new().with_flush_delay(Duration::ZERO);

    let watcher = SeqLog::new(&registry);
    watcher.open(&path, instant).await.unwrap();
    let mut events = watcher.subscribe();

    let writer = SeqLog::new(&registry);
    writer.open(&path, instant).await.unwrap();
    writer.push(2).unwrap();

    wait_for(&mut events, "change").await;
    assert_eq!(watcher.slice(0, None), ints(&[2]));

    watcher.close().await.unwrap();
    writer.close().await.unwrap();
}

#[tokio::test]
async fn test_separate_registries_reconcile_on_change() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("datafile");

    let reader_registry = registry();
    let reader = SeqLog::new(&reader_registry);
    reader.open(&path, options()).await.unwrap();
    let mut events = reader.subscribe();

    // Let the initial read's mtime age before the other writer appends
    tokio::time::sleep(Duration::from_millis(20)).await;

    let writer = SeqLog::new(&registry());
    writer.open(&path, options()).await.unwrap();
    writer.push(5).unwrap();
    writer.push(6).unwrap();
    writer.flush().await.unwrap();

    tokio::time::timeout(Duration::from_secs(5), async {
        while reader.len() < 2 {
            wait_for(&mut events, "change").await;
        }
    })
    .await
    .expect("reader never observed the external append");
    assert_eq!(reader.slice(0, None), ints(&[5, 6]));

    writer.close().await.unwrap();
    reader.close().await.unwrap();
}

#[tokio::test]
async fn test_registry_flush_all_and_teardown() {
    let dir = TempDir::new().unwrap();
    let registry = registry();
    let slow = LogOptions::new().with_flush_delay(Duration::from_secs(30));

    let a = SeqLog::new(&registry);
    let b = SeqLog::new(&registry);
    a.open(dir.path().join("one"), slow).await.unwrap();
    b.open(dir.path().join("two"), slow).await.unwrap();
    a.push(1).unwrap();
    b.push(2).unwrap();
    b.push(3).unwrap();

    assert_eq!(registry.flush_all().await.unwrap(), 3);
    assert_eq!(file_lines(&dir.path().join("one")), vec!["1"]);
    assert_eq!(file_lines(&dir.path().join("two")), vec!["2", "3"]);
    assert_eq!(registry.open_paths().await.len(), 2);

    a.close().await.unwrap();
    b.close().await.unwrap();
    assert!(registry.open_paths().await.is_empty());
    assert_eq!(registry.flush_all().await.unwrap(), 0);
}

// ============================================================================
// Flush failures and concurrency
// ============================================================================

#[tokio::test]
async fn test_failed_scheduled_flush_keeps_records_pending() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("datafile");
    let log = SeqLog::new(&registry());
    log.open(&path, options()).await.unwrap();
    let mut events = log.subscribe();

    // Backing file replaced by something that cannot be appended to
    std::fs::remove_file(&path).unwrap();
    std::fs::create_dir(&path).unwrap();

    log.push(1).unwrap();
    match wait_for(&mut events, "error").await {
        LogEvent::Error { path: p, error } => {
            assert_eq!(p, path.canonicalize().unwrap());
            assert!(matches!(*error, Error::NotAFile(_)));
        }
        other => panic!("unexpected event {:?}", other),
    }

    tokio::time::timeout(Duration::from_secs(5), async {
        while log.flush_scheduled() {
            tokio::time::sleep(DELAY).await;
        }
    })
    .await
    .expect("scheduled flush never ran");
    assert_eq!(log.pending_len(), 1);
    assert!(matches!(log.flush().await, Err(Error::NotAFile(_))));
    assert_eq!(log.pending_len(), 1);

    // Once the path is a file again the record goes out
    std::fs::remove_dir(&path).unwrap();
    assert_eq!(log.flush().await.unwrap(), 1);
    log.close().await.unwrap();
    assert_eq!(file_lines(&path), vec!["1"]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn test_pushes_during_flush_are_written_once() {
    const FIRST_BATCH: i64 = 5_000;
    const SECOND_BATCH: i64 = 100;

    let dir = TempDir::new().unwrap();
    let path = dir.path().join("datafile");
    let log = Arc::new(SeqLog::new(&registry()));
    log.open(&path, LogOptions::new().with_flush_delay(Duration::from_secs(30)))
        .await
        .unwrap();

    for v in 0..FIRST_BATCH {
        log.push(v).unwrap();
    }

    let flusher = {
        let log = Arc::clone(&log);
        tokio::spawn(async move { log.flush().await })
    };
    for v in FIRST_BATCH..FIRST_BATCH + SECOND_BATCH {
        log.push(v).unwrap();
        tokio::task::yield_now().await;
    }

    let first = flusher.await.unwrap().unwrap();
    let second = log.flush().await.unwrap();
    assert_eq!(first + second, (FIRST_BATCH + SECOND_BATCH) as usize);
    assert_eq!(log.pending_len(), 0);

    let expected: Vec<String> = (0..FIRST_BATCH + SECOND_BATCH)
        .map(|v| v.to_string())
        .collect();
    assert_eq!(file_lines(&path), expected);
    assert_eq!(log.len(), expected.len());

    log.close().await.unwrap();
}

#[tokio::test]
async fn test_numeric_looking_text_survives_reopen() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("datafile");
    let registry = registry();

    let log = SeqLog::new(&registry);
    log.open(&path, options()).await.unwrap();
    for v in ["007", "+5", "1e3", "nan"] {
        log.push(v).unwrap();
    }
    log.push(7).unwrap();
    log.close().await.unwrap();

    assert_eq!(file_lines(&path), vec!["007", "+5", "1e3", "nan", "7"]);

    let reader = SeqLog::new(&registry);
    reader.open(&path, options()).await.unwrap();
    assert_eq!(
        reader.slice(0, None),
        vec![
            Scalar::from("007"),
            Scalar::from("+5"),
            Scalar::from("1e3"),
            Scalar::from("nan"),
            Scalar::Int(7),
        ]
    );
    reader.close().await.unwrap();
}
