//! Verification ledger and metrics service for reviewing model predictions.
/// Application directory resolution.
pub mod app_dirs;
/// Confusion-matrix bucketing of human verdicts.
pub mod classifier;
/// TOML configuration, defaults and environment overrides.
pub mod config;
/// Atomic file writes and file status probes.
pub mod fs_ops;
/// Upstream review-prediction service client.
pub mod gateway;
pub(crate) mod http_client;
/// Durable verification ledger and its storage backends.
pub mod ledger;
/// Logging setup.
pub mod logging;
/// Metrics aggregation over ledger snapshots.
pub mod metrics;
/// Plain-text metrics report.
pub mod report;
/// HTTP API server.
pub mod server;
