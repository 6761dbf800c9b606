use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use serde_json::Value;
use time::OffsetDateTime;
use time::format_description::well_known::Rfc3339;

use crate::classifier::{Confusion, Verdict};
use crate::fs_ops::{self, FileStatus};
use crate::ledger::record;

use super::{LedgerBackend, SCHEMA_VERSION, StorageError, StoreStatus, VerificationRecord};

/// Ledger kept as one versioned JSON document, replaced atomically on every write.
///
/// Reads also accept the unversioned layout (a bare array of records).
#[derive(Clone, Debug)]
pub struct JsonFileBackend {
    dir: PathBuf,
    results_path: PathBuf,
    backup_path: Option<PathBuf>,
    log_path: Option<PathBuf>,
}

impl JsonFileBackend {
    pub fn new(dir: impl Into<PathBuf>, results_file: &str) -> Self {
        let dir = dir.into();
        let results_path = dir.join(results_file);
        Self {
            dir,
            results_path,
            backup_path: None,
            log_path: None,
        }
    }

    /// Copy the previous document to `backup_file` before each overwrite.
    pub fn with_backup(mut self, backup_file: &str) -> Self {
        self.backup_path = Some(self.dir.join(backup_file));
        self
    }

    /// Append one JSON line per accepted submission to `log_file`.
    pub fn with_audit_log(mut self, log_file: &str) -> Self {
        self.log_path = Some(self.dir.join(log_file));
        self
    }

    pub fn results_path(&self) -> &Path {
        &self.results_path
    }

    fn write_backup(&self) {
        let Some(backup) = &self.backup_path else {
            return;
        };
        if !self.results_path.exists() {
            return;
        }
        if let Err(err) = std::fs::copy(&self.results_path, backup) {
            tracing::warn!("Failed to back up ledger to {}: {err}", backup.display());
        }
    }

    fn append_audit(&self, record: &VerificationRecord) {
        let Some(log_path) = &self.log_path else {
            return;
        };
        let entry = AuditEntry {
            logged_at: OffsetDateTime::now_utc(),
            id: &record.id,
            verdict: record.verdict,
            label: record.label.as_deref(),
            confusion: record.confusion,
        };
        let result = serde_json::to_string(&entry)
            .map_err(std::io::Error::other)
            .and_then(|line| fs_ops::append_line(log_path, &line));
        if let Err(err) = result {
            tracing::warn!("Failed to append audit entry to {}: {err}", log_path.display());
        }
    }
}

impl LedgerBackend for JsonFileBackend {
    fn name(&self) -> &'static str {
        "json"
    }

    fn load(&mut self) -> Result<Vec<VerificationRecord>, StorageError> {
        let text = match std::fs::read_to_string(&self.results_path) {
            Ok(text) => text,
            Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(source) => {
                return Err(StorageError::Read {
                    path: self.results_path.clone(),
                    source,
                });
            }
        };
        parse_document(&text, &self.results_path)
    }

    fn persist(
        &mut self,
        records: &[VerificationRecord],
        changed: usize,
    ) -> Result<(), StorageError> {
        let document = LedgerDocumentRef {
            schema_version: SCHEMA_VERSION,
            records,
        };
        let data = serde_json::to_vec_pretty(&document)?;
        std::fs::create_dir_all(&self.dir).map_err(|source| StorageError::Write {
            path: self.dir.clone(),
            source,
        })?;
        self.write_backup();
        fs_ops::atomic_write(&self.results_path, &data).map_err(|source| StorageError::Write {
            path: self.results_path.clone(),
            source,
        })?;
        if let Some(record) = records.get(changed) {
            self.append_audit(record);
        }
        Ok(())
    }

    fn status(&self) -> StoreStatus {
        let mut status = StoreStatus::new(self.name());
        status.data_directory = Some(FileStatus::probe(&self.dir));
        status.results_file = Some(FileStatus::probe(&self.results_path));
        status.backup_file = self.backup_path.as_deref().map(FileStatus::probe);
        status.log_file = self.log_path.as_deref().map(FileStatus::probe);
        status
    }
}

#[derive(Serialize)]
struct LedgerDocumentRef<'a> {
    schema_version: u32,
    records: &'a [VerificationRecord],
}

#[derive(Deserialize)]
struct LedgerDocument {
    records: Vec<VerificationRecord>,
}

#[derive(Serialize)]
struct AuditEntry<'a> {
    #[serde(with = "time::serde::rfc3339")]
    logged_at: OffsetDateTime,
    id: &'a str,
    verdict: Verdict,
    label: Option<&'a str>,
    confusion: Option<Confusion>,
}

/// Flat or nested (`meta`) record of the unversioned layout.
#[derive(Deserialize)]
struct LegacyRecord {
    id: String,
    verdict: Verdict,
    #[serde(default)]
    label: Option<String>,
    #[serde(default)]
    confidence: Option<f64>,
    #[serde(default)]
    predicted_at: Option<String>,
    #[serde(default)]
    source: Option<String>,
    timestamp: String,
    #[serde(default)]
    confusion: Option<Confusion>,
    #[serde(default)]
    meta: Option<LegacyMeta>,
}

#[derive(Default, Deserialize)]
struct LegacyMeta {
    #[serde(default)]
    label: Option<String>,
    #[serde(default)]
    confidence: Option<f64>,
    #[serde(default)]
    predicted_at: Option<String>,
    #[serde(default)]
    source: Option<String>,
}

fn parse_document(text: &str, path: &Path) -> Result<Vec<VerificationRecord>, StorageError> {
    if text.trim().is_empty() {
        return Ok(Vec::new());
    }
    let corrupt = |message: String| StorageError::Corrupt {
        path: path.to_path_buf(),
        message,
    };
    let value: Value = serde_json::from_str(text).map_err(|err| corrupt(err.to_string()))?;
    match value {
        Value::Array(items) => {
            let mut records = Vec::with_capacity(items.len());
            for item in items {
                let legacy: LegacyRecord =
                    serde_json::from_value(item).map_err(|err| corrupt(err.to_string()))?;
                let converted = convert_legacy(legacy).map_err(corrupt)?;
                record::upsert(&mut records, converted);
            }
            Ok(records)
        }
        Value::Object(map) => {
            let version = map
                .get("schema_version")
                .and_then(Value::as_u64)
                .ok_or_else(|| corrupt("missing schema_version".to_string()))?;
            if version > u64::from(SCHEMA_VERSION) {
                return Err(StorageError::UnsupportedSchema {
                    found: u32::try_from(version).unwrap_or(u32::MAX),
                    supported: SCHEMA_VERSION,
                });
            }
            let document: LedgerDocument =
                serde_json::from_value(Value::Object(map)).map_err(|err| corrupt(err.to_string()))?;
            Ok(document.records)
        }
        _ => Err(corrupt(
            "expected a record array or a versioned ledger document".to_string(),
        )),
    }
}

fn convert_legacy(legacy: LegacyRecord) -> Result<VerificationRecord, String> {
    let meta = legacy.meta.unwrap_or_default();
    let timestamp = OffsetDateTime::parse(legacy.timestamp.trim(), &Rfc3339)
        .map_err(|err| format!("record {}: invalid timestamp: {err}", legacy.id))?;
    let predicted_at = legacy
        .predicted_at
        .or(meta.predicted_at)
        .and_then(|value| OffsetDateTime::parse(value.trim(), &Rfc3339).ok());
    Ok(VerificationRecord {
        id: legacy.id,
        verdict: legacy.verdict,
        label: legacy
            .label
            .or(meta.label)
            .filter(|label| !label.trim().is_empty()),
        confidence: legacy.confidence.or(meta.confidence),
        predicted_at,
        source: legacy.source.or(meta.source),
        timestamp,
        first_recorded_at: None,
        confusion: legacy.confusion,
    })
}
