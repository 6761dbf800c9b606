use std::collections::HashSet;
use std::thread;
use std::time::{Duration, Instant};

use time::macros::datetime;

use super::*;
use crate::classifier::{Confusion, Verdict};

fn ledger_with(backend: &MemoryBackend, timeout: Duration) -> Ledger {
    Ledger::spawn(
        Box::new(backend.clone()),
        Classifier::new("INCIDENT"),
        timeout,
    )
    .unwrap()
}

fn memory_ledger() -> (Ledger, MemoryBackend) {
    let backend = MemoryBackend::new();
    (ledger_with(&backend, Duration::from_secs(5)), backend)
}

fn labelled(id: &str, verdict: Verdict, label: &str) -> Submission {
    Submission::new(id, verdict).with_label(label)
}

#[test]
fn empty_ledger_reads_live_and_empty() {
    let (ledger, _backend) = memory_ledger();
    let snapshot = ledger.read_all();
    assert!(snapshot.records.is_empty());
    assert!(!snapshot.is_degraded());
    assert_eq!(snapshot.data_source(), "live");
}

#[test]
fn scenario_submissions_classify_and_upsert() {
    let (ledger, backend) = memory_ledger();

    let r1 = ledger
        .submit(labelled("r1", Verdict::Correct, "INCIDENT"))
        .unwrap();
    assert_eq!(r1.confusion, Some(Confusion::TruePositive));

    let r2 = ledger.submit(labelled("r2", Verdict::Incorrect, "NOT")).unwrap();
    assert_eq!(r2.confusion, Some(Confusion::FalseNegative));

    let r1 = ledger
        .submit(labelled("r1", Verdict::Incorrect, "INCIDENT"))
        .unwrap();
    assert_eq!(r1.confusion, Some(Confusion::FalsePositive));

    let records = ledger.try_read_all().unwrap();
    assert_eq!(records.len(), 2);
    assert_eq!(records[0].id, "r1");
    assert_eq!(records[0].verdict, Verdict::Incorrect);
    assert_eq!(records[1].id, "r2");
    assert_eq!(backend.records(), records);

    let r3 = ledger.submit(Submission::new("r3", Verdict::Correct)).unwrap();
    assert_eq!(r3.confusion, None);
    assert_eq!(ledger.try_read_all().unwrap().len(), 3);
}

#[test]
fn resubmission_keeps_first_recorded_at() {
    let (ledger, _backend) = memory_ledger();
    let first = datetime!(2025-08-10 08:00 UTC);
    let later = datetime!(2025-08-12 08:00 UTC);
    ledger
        .submit(labelled("r1", Verdict::Correct, "INCIDENT").with_timestamp(first))
        .unwrap();
    let updated = ledger
        .submit(labelled("r1", Verdict::Incorrect, "INCIDENT").with_timestamp(later))
        .unwrap();
    assert_eq!(updated.timestamp, later);
    assert_eq!(updated.first_recorded_at, Some(first));
}

#[test]
fn invalid_submission_never_reaches_the_store() {
    let (ledger, backend) = memory_ledger();
    let err = ledger
        .submit(Submission::new("", Verdict::Correct))
        .unwrap_err();
    assert!(matches!(err, LedgerError::InvalidPayload(_)));
    assert!(!err.is_retryable());
    assert!(backend.records().is_empty());
}

#[test]
fn unreadable_store_degrades_reads() {
    let (ledger, backend) = memory_ledger();
    ledger
        .submit(labelled("r1", Verdict::Correct, "INCIDENT"))
        .unwrap();
    backend.fail_reads(true);

    let snapshot = ledger.read_all();
    assert!(snapshot.is_degraded());
    assert!(snapshot.records.is_empty());
    assert!(snapshot.storage_error().unwrap().contains("injected read failure"));

    let err = ledger.try_read_all().unwrap_err();
    assert!(matches!(err, LedgerError::StorageUnavailable(_)));
}

#[test]
fn read_failure_during_submit_keeps_store_intact() {
    let (ledger, backend) = memory_ledger();
    ledger
        .submit(labelled("r1", Verdict::Correct, "INCIDENT"))
        .unwrap();
    backend.fail_reads(true);

    let err = ledger
        .submit(labelled("r2", Verdict::Correct, "INCIDENT"))
        .unwrap_err();
    assert!(matches!(err, LedgerError::StorageUnavailable(_)));
    assert_eq!(backend.records().len(), 1);
}

#[test]
fn write_failure_propagates() {
    let (ledger, backend) = memory_ledger();
    backend.fail_writes(true);
    let err = ledger
        .submit(labelled("r1", Verdict::Correct, "INCIDENT"))
        .unwrap_err();
    assert!(matches!(err, LedgerError::StorageUnavailable(_)));
    assert!(backend.records().is_empty());

    backend.fail_writes(false);
    ledger
        .submit(labelled("r1", Verdict::Correct, "INCIDENT"))
        .unwrap();
    assert_eq!(backend.records().len(), 1);
}

#[test]
fn slow_write_times_out_but_still_completes() {
    let backend = MemoryBackend::new();
    backend.set_write_delay(Duration::from_millis(300));
    let ledger = ledger_with(&backend, Duration::from_millis(50));

    let err = ledger
        .submit(labelled("r1", Verdict::Correct, "INCIDENT"))
        .unwrap_err();
    assert!(matches!(err, LedgerError::Timeout(_)));
    assert!(err.is_retryable());

    let deadline = Instant::now() + Duration::from_secs(5);
    while backend.records().is_empty() && Instant::now() < deadline {
        thread::sleep(Duration::from_millis(20));
    }
    let records = backend.records();
    assert_eq!(records.len(), 1);
    assert_eq!(records[0].id, "r1");
}

#[test]
fn concurrent_submissions_lose_no_updates() {
    let (ledger, backend) = memory_ledger();
    let handles: Vec<_> = (0..8)
        .map(|worker| {
            let ledger = ledger.clone();
            thread::spawn(move || {
                for n in 0..25 {
                    ledger
                        .submit(labelled(
                            &format!("w{worker}-r{n}"),
                            Verdict::Correct,
                            "INCIDENT",
                        ))
                        .unwrap();
                }
            })
        })
        .collect();
    for handle in handles {
        handle.join().unwrap();
    }

    let records = backend.records();
    assert_eq!(records.len(), 200);
    let ids: HashSet<_> = records.iter().map(|record| record.id.as_str()).collect();
    assert_eq!(ids.len(), 200);
}

#[test]
fn status_counts_records_and_reports_read_errors() {
    let (ledger, backend) = memory_ledger();
    ledger
        .submit(labelled("r1", Verdict::Correct, "INCIDENT"))
        .unwrap();
    let status = ledger.status().unwrap();
    assert_eq!(status.backend, "memory");
    assert_eq!(status.record_count, 1);
    assert!(status.read_error.is_none());

    backend.fail_reads(true);
    let status = ledger.status().unwrap();
    assert!(status.read_error.is_some());
}

#[test]
fn legacy_records_without_confusion_are_classified_on_load() {
    let mut record = labelled("legacy", Verdict::Incorrect, "INCIDENT")
        .into_record(&Classifier::new("INCIDENT"), OffsetDateTime::now_utc())
        .unwrap();
    record.confusion = None;
    let backend = MemoryBackend::with_records(vec![record]);
    let ledger = ledger_with(&backend, Duration::from_secs(5));

    let records = ledger.try_read_all().unwrap();
    assert_eq!(records[0].confusion, Some(Confusion::FalsePositive));
}

#[test]
fn json_backend_round_trips_through_the_writer() {
    let dir = tempfile::tempdir().unwrap();
    let ledger = Ledger::spawn(
        Box::new(JsonFileBackend::new(dir.path(), "ledger.json")),
        Classifier::new("INCIDENT"),
        Duration::from_secs(5),
    )
    .unwrap();
    ledger
        .submit(labelled("r1", Verdict::Correct, "INCIDENT"))
        .unwrap();
    ledger.submit(labelled("r2", Verdict::Incorrect, "NOT")).unwrap();
    drop(ledger);

    let reopened = Ledger::spawn(
        backend_for_path(&dir.path().join("ledger.json")).unwrap(),
        Classifier::new("INCIDENT"),
        Duration::from_secs(5),
    )
    .unwrap();
    let records = reopened.try_read_all().unwrap();
    assert_eq!(records.len(), 2);
    assert_eq!(records[1].confusion, Some(Confusion::FalseNegative));
}

#[test]
fn backend_for_path_picks_sqlite_by_extension() {
    let dir = tempfile::tempdir().unwrap();
    let backend = backend_for_path(&dir.path().join("ledger.db")).unwrap();
    assert_eq!(backend.name(), "sqlite");
    let backend = backend_for_path(&dir.path().join("ledger.json")).unwrap();
    assert_eq!(backend.name(), "json");
}

#[test]
fn existing_backend_for_path_leaves_missing_files_alone() {
    let dir = tempfile::tempdir().unwrap();
    for name in ["missing.db", "missing.json"] {
        let path = dir.path().join(name);
        let err = existing_backend_for_path(&path).err().unwrap();
        assert!(matches!(err, StorageError::Read { .. }), "{name}");
        assert!(!path.exists(), "{name}");
    }

    let path = dir.path().join("ledger.db");
    drop(backend_for_path(&path).unwrap());
    let backend = existing_backend_for_path(&path).unwrap();
    assert_eq!(backend.name(), "sqlite");
}

#[test]
fn open_uses_configured_backend_and_data_dir() {
    let dir = tempfile::tempdir().unwrap();
    let mut config = AppConfig::default();
    config.storage.data_dir = Some(dir.path().join("volume"));
    let ledger = Ledger::open(&config).unwrap();
    ledger
        .submit(labelled("r1", Verdict::Correct, "INCIDENT"))
        .unwrap();
    assert!(dir.path().join("volume").join(&config.storage.results_file).exists());
    assert!(dir.path().join("volume").join(&config.storage.log_file).exists());

    config.storage.backend = StorageBackendKind::Sqlite;
    let ledger = Ledger::open(&config).unwrap();
    assert_eq!(ledger.status().unwrap().backend, "sqlite");
    assert!(dir.path().join("volume").join(&config.storage.sqlite_file).exists());
}
