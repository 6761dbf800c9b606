//! Persistence backends for the verification ledger.

mod json_file;
mod memory;
mod sqlite;

use std::path::PathBuf;

use serde::Serialize;
use thiserror::Error;

use crate::fs_ops::FileStatus;

use super::VerificationRecord;

pub use json_file::JsonFileBackend;
pub use memory::MemoryBackend;
pub use sqlite::SqliteBackend;

/// Newest ledger layout this build reads and writes.
pub const SCHEMA_VERSION: u32 = 1;

/// Durable storage for the full ordered ledger.
///
/// Implementations are driven by a single writer thread, so they need no
/// internal locking.
pub trait LedgerBackend: Send {
    /// Short backend name for status output.
    fn name(&self) -> &'static str;

    /// Read every record in ledger order. A store that was never written is empty.
    fn load(&mut self) -> Result<Vec<VerificationRecord>, StorageError>;

    /// Make `records` durable. `changed` indexes the record that was just upserted.
    fn persist(
        &mut self,
        records: &[VerificationRecord],
        changed: usize,
    ) -> Result<(), StorageError>;

    /// File-level visibility into the store; never fails.
    fn status(&self) -> StoreStatus;
}

/// Operational view of a ledger store.
#[derive(Clone, Debug, Serialize)]
pub struct StoreStatus {
    pub backend: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub data_directory: Option<FileStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub results_file: Option<FileStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub backup_file: Option<FileStatus>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_file: Option<FileStatus>,
    pub record_count: usize,
    /// Set when the store exists but could not be read.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub read_error: Option<String>,
}

impl StoreStatus {
    pub(crate) fn new(backend: &'static str) -> Self {
        Self {
            backend,
            data_directory: None,
            results_file: None,
            backup_file: None,
            log_file: None,
            record_count: 0,
            read_error: None,
        }
    }
}

/// Failures of the backing store.
#[derive(Debug, Error)]
pub enum StorageError {
    #[error("Failed to read ledger {path}: {source}")]
    Read {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Failed to write ledger {path}: {source}")]
    Write {
        path: PathBuf,
        source: std::io::Error,
    },
    #[error("Corrupt ledger document {path}: {message}")]
    Corrupt { path: PathBuf, message: String },
    #[error("Ledger schema version {found} is newer than supported version {supported}")]
    UnsupportedSchema { found: u32, supported: u32 },
    #[error("Failed to serialize ledger: {0}")]
    Serialize(#[from] serde_json::Error),
    #[error("Ledger database error: {0}")]
    Sqlite(#[from] rusqlite::Error),
    #[error("Ledger data directory unavailable: {0}")]
    DataDir(String),
    #[error("Failed to start ledger writer: {0}")]
    Spawn(std::io::Error),
    #[error("Ledger writer stopped")]
    WriterStopped,
    #[error("Ledger store unavailable: {0}")]
    Unavailable(String),
}
