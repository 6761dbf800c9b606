use std::path::{Path, PathBuf};

use crate::app_dirs;

use super::defaults::default_reviews_url;
use super::types::{AppConfig, StorageSettings};
use super::{CONFIG_FILE_NAME, ConfigError, map_app_dir_error};

pub(super) const ENV_REVIEWS_URL: &str = "REVIEWS_UPSTREAM_URL";
pub(super) const ENV_DATA_DIR: &str = "DATA_VOLUME_PATH";
pub(super) const ENV_POSITIVE_LABEL: &str = "REVIEWDASH_POSITIVE_LABEL";
pub(super) const ENV_BIND: &str = "REVIEWDASH_BIND";

/// Configuration plus what was learned while loading it.
#[derive(Debug, Clone)]
pub struct LoadedConfig {
    pub config: AppConfig,
    /// File the settings came from, when one existed.
    pub path: Option<PathBuf>,
    /// Non-fatal findings to log once logging is up.
    pub warnings: Vec<String>,
}

/// Resolve the default configuration file path, ensuring the app root exists.
pub fn config_path() -> Result<PathBuf, ConfigError> {
    let dir = app_dirs::app_root_dir().map_err(map_app_dir_error)?;
    Ok(dir.join(CONFIG_FILE_NAME))
}

/// Load settings from `explicit` or the default location, then apply
/// environment overrides and normalization.
///
/// A missing default file yields defaults; a missing explicit file is an error.
pub fn load(explicit: Option<&Path>) -> Result<LoadedConfig, ConfigError> {
    let path = match explicit {
        Some(path) => path.to_path_buf(),
        None => config_path()?,
    };
    let (mut config, source) = if path.exists() {
        (load_from_path(&path)?, Some(path))
    } else if explicit.is_some() {
        return Err(ConfigError::Read {
            path,
            source: std::io::Error::new(std::io::ErrorKind::NotFound, "config file not found"),
        });
    } else {
        (AppConfig::default(), None)
    };
    let warnings = apply_env_overrides(&mut config, |key| std::env::var(key).ok());
    let config = config.normalized();
    validate(&config)?;
    Ok(LoadedConfig {
        config,
        path: source,
        warnings,
    })
}

/// Parse a TOML settings file.
pub fn load_from_path(path: &Path) -> Result<AppConfig, ConfigError> {
    let text = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
        path: path.to_path_buf(),
        source,
    })?;
    toml::from_str(&text).map_err(|source| ConfigError::ParseToml {
        path: path.to_path_buf(),
        source,
    })
}

/// Apply environment overrides through `lookup`, returning warnings for
/// settings that silently fell back to built-in defaults.
pub fn apply_env_overrides(
    config: &mut AppConfig,
    lookup: impl Fn(&str) -> Option<String>,
) -> Vec<String> {
    let mut warnings = Vec::new();
    let lookup = |key: &str| lookup(key).filter(|value| !value.trim().is_empty());

    match lookup(ENV_REVIEWS_URL) {
        Some(url) => config.upstream.reviews_url = url.trim().to_string(),
        None if config.upstream.reviews_url == default_reviews_url() => {
            warnings.push(format!("{ENV_REVIEWS_URL} not set, using default"));
        }
        None => {}
    }
    match lookup(ENV_DATA_DIR) {
        Some(dir) => config.storage.data_dir = Some(PathBuf::from(dir)),
        None if config.storage.data_dir.is_none() => {
            warnings.push(format!("{ENV_DATA_DIR} not set, using default"));
        }
        None => {}
    }
    if let Some(label) = lookup(ENV_POSITIVE_LABEL) {
        config.metrics.positive_label = label.trim().to_string();
    }
    if let Some(bind) = lookup(ENV_BIND) {
        config.server.bind_addr = bind.trim().to_string();
    }
    warnings
}

/// Directory that holds the ledger files, created if missing.
pub fn resolve_data_dir(storage: &StorageSettings) -> Result<PathBuf, ConfigError> {
    match &storage.data_dir {
        Some(dir) => {
            std::fs::create_dir_all(dir).map_err(|source| ConfigError::CreateDir {
                path: dir.clone(),
                source,
            })?;
            Ok(dir.clone())
        }
        None => app_dirs::data_dir().map_err(map_app_dir_error),
    }
}

pub(super) fn validate(config: &AppConfig) -> Result<(), ConfigError> {
    let url = url::Url::parse(&config.upstream.reviews_url).map_err(|err| {
        ConfigError::InvalidValue {
            key: "upstream.reviews_url",
            message: err.to_string(),
        }
    })?;
    if !matches!(url.scheme(), "http" | "https") {
        return Err(ConfigError::InvalidValue {
            key: "upstream.reviews_url",
            message: format!("unsupported scheme '{}'", url.scheme()),
        });
    }
    if config.metrics.positive_label.trim().is_empty() {
        return Err(ConfigError::InvalidValue {
            key: "metrics.positive_label",
            message: "must not be empty".to_string(),
        });
    }
    for (key, name) in [
        ("storage.results_file", &config.storage.results_file),
        ("storage.backup_file", &config.storage.backup_file),
        ("storage.log_file", &config.storage.log_file),
        ("storage.sqlite_file", &config.storage.sqlite_file),
    ] {
        if name.trim().is_empty() || name.contains(['/', '\\']) {
            return Err(ConfigError::InvalidValue {
                key,
                message: format!("'{name}' must be a plain file name"),
            });
        }
    }
    Ok(())
}
