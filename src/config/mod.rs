//! Service configuration: TOML settings, defaults and environment overrides.

mod defaults;
mod errors;
mod load;
mod types;


use crate::app_dirs;

/// Default filename used to store the service configuration.
pub const CONFIG_FILE_NAME: &str = "config.toml";

pub use errors::ConfigError;
pub use load::{
    LoadedConfig, apply_env_overrides, config_path, load, load_from_path, resolve_data_dir,
};
pub use types::{
    AppConfig, LoggingSettings, MetricsSettings, ServerSettings, StorageBackendKind,
    StorageSettings, UpstreamSettings,
};

fn map_app_dir_error(error: app_dirs::AppDirError) -> ConfigError {
    match error {
        app_dirs::AppDirError::NoBaseDir => ConfigError::NoConfigDir,
        app_dirs::AppDirError::CreateDir { path, source } => {
            ConfigError::CreateDir { path, source }
        }
    }
}
