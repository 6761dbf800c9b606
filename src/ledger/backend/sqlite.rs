use std::path::{Path, PathBuf};

use rusqlite::{Connection, OpenFlags, OptionalExtension, TransactionBehavior, params};
use time::OffsetDateTime;

use crate::fs_ops::FileStatus;

use super::{LedgerBackend, SCHEMA_VERSION, StorageError, StoreStatus, VerificationRecord};

const SCHEMA_VERSION_KEY: &str = "schema_version";

/// Ledger kept in an embedded SQLite file, one row per record.
///
/// Every upsert also lands in `verification_log` inside the same transaction.
pub struct SqliteBackend {
    path: PathBuf,
    connection: Connection,
}

impl SqliteBackend {
    /// Open or create the database at `path`, applying the schema.
    pub fn open(path: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let path = path.into();
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent).map_err(|source| StorageError::Write {
                path: parent.to_path_buf(),
                source,
            })?;
        }
        let connection = Connection::open(&path)?;
        let mut backend = Self { path, connection };
        backend.apply_pragmas()?;
        backend.apply_schema()?;
        backend.check_schema_version()?;
        Ok(backend)
    }

    /// Open an existing database without creating or migrating anything.
    ///
    /// Fails when the file is missing; writes through this handle fail too.
    pub fn open_read_only(path: impl Into<PathBuf>) -> Result<Self, StorageError> {
        let path = path.into();
        let connection = Connection::open_with_flags(&path, OpenFlags::SQLITE_OPEN_READ_ONLY)?;
        connection.busy_timeout(std::time::Duration::from_secs(5))?;
        let backend = Self { path, connection };
        backend.check_schema_version()?;
        Ok(backend)
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn apply_pragmas(&mut self) -> Result<(), StorageError> {
        self.connection.execute_batch(
            "PRAGMA journal_mode=WAL;
             PRAGMA synchronous=FULL;
             PRAGMA busy_timeout=5000;",
        )?;
        Ok(())
    }

    fn apply_schema(&mut self) -> Result<(), StorageError> {
        self.connection.execute_batch(
            "CREATE TABLE IF NOT EXISTS ledger_meta (
                key TEXT PRIMARY KEY,
                value TEXT NOT NULL
             );
             CREATE TABLE IF NOT EXISTS verification_records (
                id TEXT PRIMARY KEY,
                position INTEGER NOT NULL,
                record_json TEXT NOT NULL
             );
             CREATE TABLE IF NOT EXISTS verification_log (
                seq INTEGER PRIMARY KEY AUTOINCREMENT,
                logged_at INTEGER NOT NULL,
                id TEXT NOT NULL,
                record_json TEXT NOT NULL
             );",
        )?;
        self.connection.execute(
            "INSERT OR IGNORE INTO ledger_meta (key, value) VALUES (?1, ?2)",
            params![SCHEMA_VERSION_KEY, SCHEMA_VERSION.to_string()],
        )?;
        Ok(())
    }

    fn check_schema_version(&self) -> Result<(), StorageError> {
        let stored: Option<String> = self
            .connection
            .query_row(
                "SELECT value FROM ledger_meta WHERE key = ?1",
                params![SCHEMA_VERSION_KEY],
                |row| row.get(0),
            )
            .optional()?;
        let found = stored
            .as_deref()
            .unwrap_or("0")
            .parse::<u32>()
            .map_err(|err| StorageError::Corrupt {
                path: self.path.clone(),
                message: format!("invalid schema_version: {err}"),
            })?;
        if found > SCHEMA_VERSION {
            return Err(StorageError::UnsupportedSchema {
                found,
                supported: SCHEMA_VERSION,
            });
        }
        Ok(())
    }
}

impl LedgerBackend for SqliteBackend {
    fn name(&self) -> &'static str {
        "sqlite"
    }

    fn load(&mut self) -> Result<Vec<VerificationRecord>, StorageError> {
        let mut stmt = self
            .connection
            .prepare("SELECT id, record_json FROM verification_records ORDER BY position ASC")?;
        let rows = stmt.query_map([], |row| {
            Ok((row.get::<_, String>(0)?, row.get::<_, String>(1)?))
        })?;
        let mut records = Vec::new();
        for row in rows {
            let (id, json) = row?;
            let record = serde_json::from_str(&json).map_err(|err| StorageError::Corrupt {
                path: self.path.clone(),
                message: format!("record {id}: {err}"),
            })?;
            records.push(record);
        }
        Ok(records)
    }

    fn persist(
        &mut self,
        records: &[VerificationRecord],
        changed: usize,
    ) -> Result<(), StorageError> {
        let Some(record) = records.get(changed) else {
            return Ok(());
        };
        let json = serde_json::to_string(record)?;
        let position = i64::try_from(changed).unwrap_or(i64::MAX);
        let tx = self
            .connection
            .transaction_with_behavior(TransactionBehavior::Immediate)?;
        tx.execute(
            "INSERT INTO verification_records (id, position, record_json)
             VALUES (?1, ?2, ?3)
             ON CONFLICT(id) DO UPDATE SET record_json = excluded.record_json",
            params![record.id, position, json],
        )?;
        tx.execute(
            "INSERT INTO verification_log (logged_at, id, record_json) VALUES (?1, ?2, ?3)",
            params![OffsetDateTime::now_utc().unix_timestamp(), record.id, json],
        )?;
        tx.commit()?;
        Ok(())
    }

    fn status(&self) -> StoreStatus {
        let mut status = StoreStatus::new(self.name());
        status.data_directory = self.path.parent().map(FileStatus::probe);
        status.results_file = Some(FileStatus::probe(&self.path));
        status
    }
}
