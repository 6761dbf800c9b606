use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};

use super::defaults::*;

/// Aggregate service settings loaded from `config.toml`.
///
/// Config tables (TOML): `server`, `upstream`, `storage`, `metrics`, `logging`.
/// Every key is optional; missing keys take their documented defaults.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub server: ServerSettings,
    #[serde(default)]
    pub upstream: UpstreamSettings,
    #[serde(default)]
    pub storage: StorageSettings,
    #[serde(default)]
    pub metrics: MetricsSettings,
    #[serde(default)]
    pub logging: LoggingSettings,
}

impl AppConfig {
    /// Clamp values into the ranges the service can work with.
    pub fn normalized(self) -> Self {
        Self {
            server: self.server.normalized(),
            upstream: self.upstream.normalized(),
            storage: self.storage.normalized(),
            metrics: self.metrics.normalized(),
            logging: self.logging,
        }
    }
}

/// HTTP listener settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ServerSettings {
    /// Socket address the HTTP server binds to.
    #[serde(default = "default_bind_addr")]
    pub bind_addr: String,
    /// Per-connection socket read/write timeout.
    #[serde(default = "default_io_timeout_ms")]
    pub io_timeout_ms: u64,
    /// Largest request body accepted.
    #[serde(default = "default_max_body_bytes")]
    pub max_body_bytes: usize,
}

impl Default for ServerSettings {
    fn default() -> Self {
        Self {
            bind_addr: default_bind_addr(),
            io_timeout_ms: default_io_timeout_ms(),
            max_body_bytes: default_max_body_bytes(),
        }
    }
}

impl ServerSettings {
    fn normalized(self) -> Self {
        Self {
            io_timeout_ms: clamp_timeout_ms(self.io_timeout_ms),
            max_body_bytes: self.max_body_bytes.max(1024),
            ..self
        }
    }

    pub fn io_timeout(&self) -> Duration {
        Duration::from_millis(self.io_timeout_ms)
    }
}

/// Upstream review-prediction service settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UpstreamSettings {
    /// Reviews listing endpoint; `page`, `page_size` and `label` are appended as query params.
    #[serde(default = "default_reviews_url")]
    pub reviews_url: String,
    /// Page size sent upstream whenever a page is requested.
    #[serde(default = "default_page_size")]
    pub default_page_size: u32,
    #[serde(default = "default_upstream_timeout_ms")]
    pub timeout_ms: u64,
    #[serde(default = "default_max_response_bytes")]
    pub max_response_bytes: usize,
    /// Serve built-in sample reviews, flagged as such, when the upstream is unreachable.
    #[serde(default = "default_false")]
    pub demo_fallback: bool,
}

impl Default for UpstreamSettings {
    fn default() -> Self {
        Self {
            reviews_url: default_reviews_url(),
            default_page_size: default_page_size(),
            timeout_ms: default_upstream_timeout_ms(),
            max_response_bytes: default_max_response_bytes(),
            demo_fallback: false,
        }
    }
}

impl UpstreamSettings {
    fn normalized(self) -> Self {
        Self {
            default_page_size: clamp_page_size(self.default_page_size),
            timeout_ms: clamp_timeout_ms(self.timeout_ms),
            ..self
        }
    }

    pub fn timeout(&self) -> Duration {
        Duration::from_millis(self.timeout_ms)
    }
}

/// Which persistence backend holds the verification ledger.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StorageBackendKind {
    /// One versioned JSON document, replaced atomically on each write.
    #[default]
    Json,
    /// Embedded SQLite file.
    Sqlite,
}

/// Ledger storage settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StorageSettings {
    #[serde(default)]
    pub backend: StorageBackendKind,
    /// Directory holding the ledger files; defaults to `<app root>/data`.
    #[serde(default)]
    pub data_dir: Option<PathBuf>,
    #[serde(default = "default_results_file")]
    pub results_file: String,
    #[serde(default = "default_backup_file")]
    pub backup_file: String,
    /// Append-only audit trail of accepted submissions.
    #[serde(default = "default_log_file")]
    pub log_file: String,
    #[serde(default = "default_sqlite_file")]
    pub sqlite_file: String,
    /// How long a caller waits on the ledger writer before giving up.
    #[serde(default = "default_ledger_timeout_ms")]
    pub ledger_timeout_ms: u64,
}

impl Default for StorageSettings {
    fn default() -> Self {
        Self {
            backend: StorageBackendKind::default(),
            data_dir: None,
            results_file: default_results_file(),
            backup_file: default_backup_file(),
            log_file: default_log_file(),
            sqlite_file: default_sqlite_file(),
            ledger_timeout_ms: default_ledger_timeout_ms(),
        }
    }
}

impl StorageSettings {
    fn normalized(self) -> Self {
        Self {
            ledger_timeout_ms: clamp_timeout_ms(self.ledger_timeout_ms),
            ..self
        }
    }

    pub fn ledger_timeout(&self) -> Duration {
        Duration::from_millis(self.ledger_timeout_ms)
    }
}

/// Confusion-matrix and bucketing settings for the aggregator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MetricsSettings {
    /// Predicted label counted as the positive class; every other label is negative.
    #[serde(default = "default_positive_label")]
    pub positive_label: String,
    /// Lower bound (inclusive) of the high-confidence bucket.
    #[serde(default = "default_high_confidence")]
    pub high_confidence: f64,
    /// Lower bound (inclusive) of the medium-confidence bucket.
    #[serde(default = "default_medium_confidence")]
    pub medium_confidence: f64,
}

impl Default for MetricsSettings {
    fn default() -> Self {
        Self {
            positive_label: default_positive_label(),
            high_confidence: default_high_confidence(),
            medium_confidence: default_medium_confidence(),
        }
    }
}

impl MetricsSettings {
    fn normalized(self) -> Self {
        let high = clamp_unit(self.high_confidence, default_high_confidence());
        let medium = clamp_unit(self.medium_confidence, default_medium_confidence()).min(high);
        Self {
            positive_label: self.positive_label.trim().to_string(),
            high_confidence: high,
            medium_confidence: medium,
        }
    }
}

/// Tracing output settings.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct LoggingSettings {
    /// Filter directive used when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub level: String,
    /// Number of per-launch log files to keep.
    #[serde(default = "default_max_log_files")]
    pub max_files: usize,
    /// Log directory; defaults to `<app root>/logs`.
    #[serde(default)]
    pub directory: Option<PathBuf>,
}

impl Default for LoggingSettings {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            max_files: default_max_log_files(),
            directory: None,
        }
    }
}
