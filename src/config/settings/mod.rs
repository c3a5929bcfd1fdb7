
use anyhow::{Context, Result};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;
use url::Url;

use crate::database::postgres::models::{
    DEFAULT_ADMIN_DATABASE, DEFAULT_VECTOR_DIMENSIONS, DEFAULT_VECTOR_INDEX, DEFAULT_VECTOR_TABLE,
    IndexSettings, StoreSettings,
};
use crate::embeddings::ollama::DEFAULT_EMBEDDING_DIMENSION;
use crate::pipeline::writer::ParquetCompression;

/// Environment variables consulted for the connection target, in order.
pub const DATABASE_URL_ENV_VARS: [&str; 3] = ["POSTGRES_URL", "POSTGRESQL_URL", "DATABASE_URL"];

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct Config {
    #[serde(default)]
    pub postgres: PostgresConfig,
    #[serde(default)]
    pub ollama: OllamaConfig,
    #[serde(default)]
    pub pipeline: PipelineConfig,
    #[serde(skip)]
    pub base_dir: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PostgresConfig {
    pub url: Option<String>,
    pub max_connections: u32,
    pub vector_dimensions: u32,
    pub vector_table: String,
    pub vector_index: String,
    pub admin_database: String,
    pub index: IndexSettings,
}

impl Default for PostgresConfig {
    fn default() -> Self {
        Self {
            url: None,
            max_connections: 5,
            vector_dimensions: DEFAULT_VECTOR_DIMENSIONS,
            vector_table: DEFAULT_VECTOR_TABLE.to_string(),
            vector_index: DEFAULT_VECTOR_INDEX.to_string(),
            admin_database: DEFAULT_ADMIN_DATABASE.to_string(),
            index: IndexSettings::default(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct OllamaConfig {
    pub protocol: String,
    pub host: String,
    pub port: u16,
    pub model: String,
    pub batch_size: u32,
    pub embedding_dimension: u32,
}

impl Default for OllamaConfig {
    fn default() -> Self {
        Self {
            protocol: "http".to_string(),
            host: "localhost".to_string(),
            port: 11434,
            model: "bge-m3:latest".to_string(),
            batch_size: 16,
            embedding_dimension: DEFAULT_EMBEDDING_DIMENSION,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
#[serde(default)]
pub struct PipelineConfig {
    /// Directory holding `<subset>/<split>.jsonl` translation files
    pub dataset_dir: PathBuf,
    pub dataset_name: String,
    pub subsets: Vec<String>,
    pub splits: Vec<String>,
    pub pivot_language: String,
    /// Records buffered per row group of the intermediate file
    pub chunk_size: usize,
    /// Rows read per batch in the feature stage
    pub batch_size: usize,
    pub compression: ParquetCompression,
    pub intermediate_path: PathBuf,
    pub feature_path: PathBuf,
    pub cache_dir: PathBuf,
    pub show_progress: bool,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            dataset_dir: PathBuf::from("data/opus-100"),
            dataset_name: "Helsinki-NLP/opus-100".to_string(),
            subsets: vec!["en-vi".to_string(), "en-zh".to_string()],
            splits: vec!["test".to_string()],
            pivot_language: "en".to_string(),
            chunk_size: 10_000,
            batch_size: 1_000,
            compression: ParquetCompression::Snappy,
            intermediate_path: PathBuf::from("data/opus-100-intermediate.parquet"),
            feature_path: PathBuf::from("data/opus-100-feature.parquet"),
            cache_dir: PathBuf::from("data/cache"),
            show_progress: true,
        }
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Configuration directory not found or could not be created")]
    DirectoryError,
    #[error(
        "No PostgreSQL URL provided (pass one explicitly, set postgres.url, or export POSTGRES_URL, POSTGRESQL_URL or DATABASE_URL)"
    )]
    MissingDatabaseUrl,
    #[error("Invalid PostgreSQL URL: {0}")]
    InvalidDatabaseUrl(String),
    #[error("No database name provided in the URL: {0}")]
    MissingDatabaseName(String),
    #[error("Invalid URL format: {0}")]
    InvalidUrl(String),
    #[error("Invalid port: {0} (must be between 1 and 65535)")]
    InvalidPort(u16),
    #[error("Invalid batch size: {0} (must be between 1 and 1000)")]
    InvalidBatchSize(u32),
    #[error("Invalid model name: {0} (cannot be empty)")]
    InvalidModel(String),
    #[error("Invalid protocol: {0} (must be 'http' or 'https')")]
    InvalidProtocol(String),
    #[error("Invalid embedding dimension: {0} (must be between 64 and 4096)")]
    InvalidEmbeddingDimension(u32),
    #[error("Invalid vector dimensions: {0} (must be between 1 and 16000)")]
    InvalidVectorDimensions(u32),
    #[error("Invalid identifier: '{0}' (only ASCII letters, digits and '_' are allowed)")]
    InvalidIdentifier(String),
    #[error("Invalid max connections: {0} (must be between 1 and 100)")]
    InvalidMaxConnections(u32),
    #[error("Invalid HNSW m: {0} (must be between 2 and 100)")]
    InvalidHnswM(u32),
    #[error("Invalid HNSW ef_construction: {0} (must be between {1} and 1000)")]
    InvalidEfConstruction(u32, u32),
    #[error("Invalid chunk size: {0} (must be between 1 and 1000000)")]
    InvalidChunkSize(usize),
    #[error("Invalid pipeline batch size: {0} (must be between 1 and 100000)")]
    InvalidPipelineBatchSize(usize),
    #[error("No subsets or splits configured for the dataset pipeline")]
    EmptyDatasetSelection,
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("TOML parsing error: {0}")]
    TomlParse(#[from] toml::de::Error),
    #[error("TOML serialization error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),
}

impl Default for Config {
    #[inline]
    fn default() -> Self {
        Self {
            postgres: PostgresConfig::default(),
            ollama: OllamaConfig::default(),
            pipeline: PipelineConfig::default(),
            base_dir: Self::default_config_dir().unwrap_or_else(|_| PathBuf::from(".")),
        }
    }
}

impl Config {
    #[inline]
    pub fn default_config_dir() -> Result<PathBuf, ConfigError> {
        dirs::config_dir()
            .map(|dir| dir.join("pgvector-perf"))
            .or_else(|| dirs::home_dir().map(|home| home.join(".pgvector-perf")))
            .ok_or(ConfigError::DirectoryError)
    }

    #[inline]
    pub fn load<P: AsRef<Path>>(config_dir: P) -> Result<Self> {
        let config_path = config_dir.as_ref().join("config.toml");

        if !config_path.exists() {
            return Ok(Self {
                base_dir: config_dir.as_ref().to_path_buf(),
                ..Self::default()
            });
        }

        let content = fs::read_to_string(&config_path)
            .with_context(|| format!("Failed to read config file: {}", config_path.display()))?;

        let mut config: Config = toml::from_str(&content)
            .with_context(|| format!("Failed to parse config file: {}", config_path.display()))?;
        config.base_dir = config_dir.as_ref().to_path_buf();

        config
            .validate()
            .with_context(|| "Configuration validation failed")?;

        Ok(config)
    }

    #[inline]
    pub fn save(&self) -> Result<()> {
        self.validate()
            .context("Configuration validation failed before saving")?;

        let config_dir = self.get_base_dir();

        fs::create_dir_all(config_dir).with_context(|| {
            format!(
                "Failed to create config directory: {}",
                config_dir.display()
            )
        })?;

        let config_path = self.config_file_path();
        let content = toml::to_string_pretty(self).context("Failed to serialize config to TOML")?;

        fs::write(&config_path, content)
            .with_context(|| format!("Failed to write config file: {}", config_path.display()))?;

        Ok(())
    }

    #[inline]
    pub fn get_base_dir(&self) -> &Path {
        &self.base_dir
    }

    #[inline]
    pub fn config_file_path(&self) -> PathBuf {
        self.get_base_dir().join("config.toml")
    }

    #[inline]
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.postgres.validate()?;
        self.ollama.validate()?;
        self.pipeline.validate()?;
        Ok(())
    }

    #[inline]
    pub fn ollama_url(&self) -> Result<Url, ConfigError> {
        self.ollama.ollama_url()
    }
}

impl PostgresConfig {
    #[inline]
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.max_connections == 0 || self.max_connections > 100 {
            return Err(ConfigError::InvalidMaxConnections(self.max_connections));
        }
        self.store_settings().validate()
    }

    /// Settings handed to the point store at construction time
    #[inline]
    pub fn store_settings(&self) -> StoreSettings {
        StoreSettings {
            vector_dimensions: self.vector_dimensions,
            vector_table: self.vector_table.clone(),
            vector_index: self.vector_index.clone(),
            admin_database: self.admin_database.clone(),
            index: self.index.clone(),
        }
    }
}

impl OllamaConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.protocol != "http" && self.protocol != "https" {
            return Err(ConfigError::InvalidProtocol(self.protocol.clone()));
        }

        let url_str = format!("{}://{}:{}", self.protocol, self.host, self.port);
        Url::parse(&url_str).map_err(|_| ConfigError::InvalidUrl(url_str))?;

        if self.port == 0 {
            return Err(ConfigError::InvalidPort(self.port));
        }

        if self.model.trim().is_empty() {
            return Err(ConfigError::InvalidModel(self.model.clone()));
        }

        if self.batch_size == 0 || self.batch_size > 1000 {
            return Err(ConfigError::InvalidBatchSize(self.batch_size));
        }

        if !(64..=4096).contains(&self.embedding_dimension) {
            return Err(ConfigError::InvalidEmbeddingDimension(
                self.embedding_dimension,
            ));
        }

        Ok(())
    }

    pub fn ollama_url(&self) -> Result<Url, ConfigError> {
        let url_str = format!("{}://{}:{}", self.protocol, self.host, self.port);
        Url::parse(&url_str).map_err(|_| ConfigError::InvalidUrl(url_str))
    }

    pub fn set_model(&mut self, model: String) -> Result<(), ConfigError> {
        if model.trim().is_empty() {
            return Err(ConfigError::InvalidModel(model));
        }
        self.model = model;
        Ok(())
    }

    pub fn set_embedding_dimension(&mut self, dimension: u32) -> Result<(), ConfigError> {
        if !(64..=4096).contains(&dimension) {
            return Err(ConfigError::InvalidEmbeddingDimension(dimension));
        }
        self.embedding_dimension = dimension;
        Ok(())
    }
}

impl PipelineConfig {
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.chunk_size == 0 || self.chunk_size > 1_000_000 {
            return Err(ConfigError::InvalidChunkSize(self.chunk_size));
        }

        if self.batch_size == 0 || self.batch_size > 100_000 {
            return Err(ConfigError::InvalidPipelineBatchSize(self.batch_size));
        }

        if self.subsets.is_empty() || self.splits.is_empty() {
            return Err(ConfigError::EmptyDatasetSelection);
        }

        Ok(())
    }
}

/// Resolve the PostgreSQL connection target.
///
/// Precedence: explicit argument, then the configured URL, then the first
/// non-empty variable of [`DATABASE_URL_ENV_VARS`].
#[inline]
pub fn resolve_database_url(
    explicit: Option<&str>,
    configured: Option<&str>,
) -> Result<String, ConfigError> {
    resolve_database_url_with(explicit, configured, |key| std::env::var(key).ok())
}

pub(crate) fn resolve_database_url_with<F>(
    explicit: Option<&str>,
    configured: Option<&str>,
    lookup: F,
) -> Result<String, ConfigError>
where
    F: Fn(&str) -> Option<String>,
{
    [explicit, configured]
        .into_iter()
        .flatten()
        .find(|url| !url.trim().is_empty())
        .map(str::to_string)
        .or_else(|| {
            DATABASE_URL_ENV_VARS
                .iter()
                .filter_map(|key| lookup(key))
                .find(|url| !url.trim().is_empty())
        })
        .ok_or(ConfigError::MissingDatabaseUrl)
}
