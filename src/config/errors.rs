use std::path::PathBuf;

use thiserror::Error;

/// Errors that may occur while loading service configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Failed to create the config or data directory.
    #[error("Unable to create directory {path}: {source}")]
    CreateDir {
        /// Directory path that failed to create.
        path: PathBuf,
        /// Underlying IO error.
        source: std::io::Error,
    },
    /// Failed to read a config file.
    #[error("Failed to read {path}: {source}")]
    Read {
        /// Path that failed to read.
        path: PathBuf,
        /// Underlying IO error.
        source: std::io::Error,
    },
    /// Failed to parse TOML config.
    #[error("Invalid config at {path}: {source}")]
    ParseToml {
        /// TOML file path.
        path: PathBuf,
        /// TOML parse error.
        source: toml::de::Error,
    },
    /// A setting holds a value the service cannot run with.
    #[error("Invalid setting {key}: {message}")]
    InvalidValue {
        /// Dotted TOML key of the offending setting.
        key: &'static str,
        /// What is wrong with it.
        message: String,
    },
    /// No usable config directory found.
    #[error("No suitable config directory found")]
    NoConfigDir,
}
