// Configuration management module
// Handles TOML configuration, defaults and connection target resolution

pub mod settings;

#[cfg(test)]
mod tests;

pub use settings::{
    Config, ConfigError, DATABASE_URL_ENV_VARS, OllamaConfig, PipelineConfig,
    PostgresConfig, resolve_database_url,
};

/// Get the default configuration directory path
#[inline]
pub fn get_config_dir() -> Result<std::path::PathBuf, ConfigError> {
    Config::default_config_dir()
}
