//! Verification ledger: durable, id-keyed store of human verdicts.
//!
//! A single writer thread owns the persistence backend. Every read and every
//! read-modify-write cycle is a command on its channel, so concurrent
//! submissions are serialized and never lose updates.

pub mod backend;
mod record;

#[cfg(test)]
mod tests;

use std::path::Path;
use std::sync::mpsc::{self, Receiver, RecvTimeoutError, Sender};
use std::thread;
use std::time::Duration;

use thiserror::Error;
use time::OffsetDateTime;

use crate::classifier::Classifier;
use crate::config::{self, AppConfig, StorageBackendKind};

pub use backend::{
    JsonFileBackend, LedgerBackend, MemoryBackend, SqliteBackend, StorageError, StoreStatus,
};
pub use record::{RecordMeta, Submission, VerificationRecord};

/// Failures surfaced to ledger callers.
#[derive(Debug, Error)]
pub enum LedgerError {
    #[error("Invalid payload: {0}")]
    InvalidPayload(String),
    #[error("Ledger storage unavailable: {0}")]
    StorageUnavailable(#[from] StorageError),
    #[error("Ledger did not answer within {0:?}")]
    Timeout(Duration),
}

impl LedgerError {
    /// Whether the same request may succeed if the caller tries again later.
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Timeout(_))
    }
}

/// Where the records of a snapshot came from.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SnapshotSource {
    /// Read from the backing store.
    Live,
    /// The store could not be read; the snapshot is empty and not authoritative.
    Degraded { reason: String },
}

/// Every ledger record at one point in time, in ledger order.
#[derive(Clone, Debug, PartialEq)]
pub struct LedgerSnapshot {
    pub records: Vec<VerificationRecord>,
    pub source: SnapshotSource,
}

impl LedgerSnapshot {
    pub fn live(records: Vec<VerificationRecord>) -> Self {
        Self {
            records,
            source: SnapshotSource::Live,
        }
    }

    pub fn degraded(reason: impl Into<String>) -> Self {
        Self {
            records: Vec::new(),
            source: SnapshotSource::Degraded {
                reason: reason.into(),
            },
        }
    }

    pub fn is_degraded(&self) -> bool {
        matches!(self.source, SnapshotSource::Degraded { .. })
    }

    /// `"live"` or `"degraded"`.
    pub fn data_source(&self) -> &'static str {
        match self.source {
            SnapshotSource::Live => "live",
            SnapshotSource::Degraded { .. } => "degraded",
        }
    }

    pub fn storage_error(&self) -> Option<&str> {
        match &self.source {
            SnapshotSource::Live => None,
            SnapshotSource::Degraded { reason } => Some(reason),
        }
    }
}

enum Command {
    Upsert {
        record: VerificationRecord,
        reply: Sender<Result<VerificationRecord, StorageError>>,
    },
    ReadAll {
        reply: Sender<Result<Vec<VerificationRecord>, StorageError>>,
    },
    Status {
        reply: Sender<StoreStatus>,
    },
}

/// Cloneable handle to the ledger writer thread.
///
/// The writer stops once every handle is dropped.
#[derive(Clone)]
pub struct Ledger {
    commands: Sender<Command>,
    classifier: Classifier,
    timeout: Duration,
}

impl Ledger {
    /// Start a writer thread owning `backend`.
    ///
    /// Callers wait at most `timeout` for each reply.
    pub fn spawn(
        backend: Box<dyn LedgerBackend>,
        classifier: Classifier,
        timeout: Duration,
    ) -> Result<Self, StorageError> {
        let (commands, inbox) = mpsc::channel();
        let writer = Writer {
            backend,
            classifier: classifier.clone(),
        };
        thread::Builder::new()
            .name("ledger-writer".to_string())
            .spawn(move || writer.run(inbox))
            .map_err(StorageError::Spawn)?;
        Ok(Self {
            commands,
            classifier,
            timeout,
        })
    }

    /// Open the backend selected by `config.storage` and start the writer.
    pub fn open(config: &AppConfig) -> Result<Self, StorageError> {
        let backend = backend_from_config(config)?;
        tracing::info!("Ledger backend: {}", backend.name());
        Self::spawn(
            backend,
            Classifier::new(config.metrics.positive_label.clone()),
            config.storage.ledger_timeout(),
        )
    }

    pub fn classifier(&self) -> &Classifier {
        &self.classifier
    }

    /// Validate, classify and upsert one verification, persisting before returning.
    pub fn submit(&self, submission: Submission) -> Result<VerificationRecord, LedgerError> {
        let record = submission.into_record(&self.classifier, OffsetDateTime::now_utc())?;
        let (reply, response) = mpsc::channel();
        self.send(Command::Upsert { record, reply })?;
        let stored = self.wait(response)??;
        tracing::info!(
            "Recorded verification {} ({}, {})",
            stored.id,
            stored.verdict,
            stored.confusion.map_or("unclassified", |cell| cell.as_str())
        );
        Ok(stored)
    }

    /// Every record in ledger order, or the storage failure.
    pub fn try_read_all(&self) -> Result<Vec<VerificationRecord>, LedgerError> {
        let (reply, response) = mpsc::channel();
        self.send(Command::ReadAll { reply })?;
        Ok(self.wait(response)??)
    }

    /// Every record in ledger order; an unreadable store yields a degraded empty snapshot.
    pub fn read_all(&self) -> LedgerSnapshot {
        match self.try_read_all() {
            Ok(records) => LedgerSnapshot::live(records),
            Err(err) => {
                tracing::warn!("Ledger read failed, serving empty snapshot: {err}");
                LedgerSnapshot::degraded(err.to_string())
            }
        }
    }

    /// Backing-store visibility, including the current record count.
    pub fn status(&self) -> Result<StoreStatus, LedgerError> {
        let (reply, response) = mpsc::channel();
        self.send(Command::Status { reply })?;
        self.wait(response)
    }

    fn send(&self, command: Command) -> Result<(), LedgerError> {
        self.commands
            .send(command)
            .map_err(|_| LedgerError::StorageUnavailable(StorageError::WriterStopped))
    }

    fn wait<T>(&self, response: Receiver<T>) -> Result<T, LedgerError> {
        match response.recv_timeout(self.timeout) {
            Ok(value) => Ok(value),
            Err(RecvTimeoutError::Timeout) => Err(LedgerError::Timeout(self.timeout)),
            Err(RecvTimeoutError::Disconnected) => {
                Err(LedgerError::StorageUnavailable(StorageError::WriterStopped))
            }
        }
    }
}

/// Pick a backend from a ledger file path: `.db`/`.sqlite` opens SQLite, anything else JSON.
pub fn backend_for_path(path: &Path) -> Result<Box<dyn LedgerBackend>, StorageError> {
    if is_sqlite_path(path) {
        return Ok(Box::new(SqliteBackend::open(path)?));
    }
    let dir = path
        .parent()
        .filter(|parent| !parent.as_os_str().is_empty())
        .unwrap_or_else(|| Path::new("."));
    let file_name = path
        .file_name()
        .and_then(|name| name.to_str())
        .ok_or_else(|| StorageError::DataDir(format!("invalid ledger path {}", path.display())))?;
    Ok(Box::new(JsonFileBackend::new(dir, file_name)))
}

/// Like [`backend_for_path`], but for readers: the file must already exist
/// and SQLite databases are opened read-only.
pub fn existing_backend_for_path(path: &Path) -> Result<Box<dyn LedgerBackend>, StorageError> {
    if !path.is_file() {
        return Err(StorageError::Read {
            path: path.to_path_buf(),
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "no such ledger file"),
        });
    }
    if is_sqlite_path(path) {
        return Ok(Box::new(SqliteBackend::open_read_only(path)?));
    }
    backend_for_path(path)
}

fn is_sqlite_path(path: &Path) -> bool {
    let extension = path
        .extension()
        .and_then(|ext| ext.to_str())
        .map(str::to_ascii_lowercase);
    matches!(extension.as_deref(), Some("db" | "sqlite" | "sqlite3"))
}

fn backend_from_config(config: &AppConfig) -> Result<Box<dyn LedgerBackend>, StorageError> {
    let storage = &config.storage;
    let dir = config::resolve_data_dir(storage)
        .map_err(|err| StorageError::DataDir(err.to_string()))?;
    Ok(match storage.backend {
        StorageBackendKind::Json => Box::new(
            JsonFileBackend::new(&dir, &storage.results_file)
                .with_backup(&storage.backup_file)
                .with_audit_log(&storage.log_file),
        ),
        StorageBackendKind::Sqlite => Box::new(SqliteBackend::open(dir.join(&storage.sqlite_file))?),
    })
}

struct Writer {
    backend: Box<dyn LedgerBackend>,
    classifier: Classifier,
}

impl Writer {
    fn run(mut self, inbox: Receiver<Command>) {
        // Replies to callers that already timed out are dropped; the work itself still completes.
        while let Ok(command) = inbox.recv() {
            match command {
                Command::Upsert { record, reply } => {
                    let _ = reply.send(self.upsert(record));
                }
                Command::ReadAll { reply } => {
                    let _ = reply.send(self.load());
                }
                Command::Status { reply } => {
                    let _ = reply.send(self.status());
                }
            }
        }
        tracing::debug!("Ledger writer stopped");
    }

    fn load(&mut self) -> Result<Vec<VerificationRecord>, StorageError> {
        let mut records = self.backend.load()?;
        reconcile_confusion(&mut records, &self.classifier);
        Ok(records)
    }

    fn upsert(&mut self, record: VerificationRecord) -> Result<VerificationRecord, StorageError> {
        let mut records = self.load()?;
        let index = record::upsert(&mut records, record);
        if let Err(err) = self.backend.persist(&records, index) {
            tracing::error!("Failed to persist ledger: {err}");
            return Err(err);
        }
        Ok(records[index].clone())
    }

    fn status(&mut self) -> StoreStatus {
        let mut status = self.backend.status();
        match self.backend.load() {
            Ok(records) => status.record_count = records.len(),
            Err(err) => status.read_error = Some(err.to_string()),
        }
        status
    }
}

/// Restore "confusion is set iff a label is present" on records written by older layouts.
fn reconcile_confusion(records: &mut [VerificationRecord], classifier: &Classifier) {
    for record in records {
        match (&record.label, record.confusion) {
            (Some(label), None) => {
                record.confusion = classifier.classify(Some(label.as_str()), record.verdict);
            }
            (None, Some(_)) => record.confusion = None,
            _ => {}
        }
    }
}
