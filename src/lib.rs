use thiserror::Error;

pub type Result<T> = std::result::Result<T, PerfError>;

#[derive(Error, Debug)]
pub enum PerfError {
    #[error("Configuration error: {0}")]
    Configuration(String),

    #[error("Invalid argument: {0}")]
    InvalidArgument(String),

    #[error("Validation error: {0}")]
    Validation(String),

    #[error("Not found: {0}")]
    NotFound(String),

    #[error("Already exists: {0}")]
    AlreadyExists(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Embedding error: {0}")]
    Embedding(String),

    #[error("Pipeline error: {0}")]
    Pipeline(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Other error: {0}")]
    Other(#[from] anyhow::Error),
}

impl From<sqlx::Error> for PerfError {
    #[inline]
    fn from(error: sqlx::Error) -> Self {
        Self::Storage(error.to_string())
    }
}

impl From<sqlx::migrate::MigrateError> for PerfError {
    #[inline]
    fn from(error: sqlx::migrate::MigrateError) -> Self {
        Self::Storage(format!("migration failed: {}", error))
    }
}

impl From<crate::config::ConfigError> for PerfError {
    #[inline]
    fn from(error: crate::config::ConfigError) -> Self {
        Self::Configuration(error.to_string())
    }
}

impl From<arrow::error::ArrowError> for PerfError {
    #[inline]
    fn from(error: arrow::error::ArrowError) -> Self {
        Self::Pipeline(format!("arrow: {}", error))
    }
}

impl From<parquet::errors::ParquetError> for PerfError {
    #[inline]
    fn from(error: parquet::errors::ParquetError) -> Self {
        Self::Pipeline(format!("parquet: {}", error))
    }
}

pub mod commands;
pub mod config;
pub mod database;
pub mod embeddings;
pub mod pipeline;

pub use database::postgres::{
    DatabaseLifecycle, IndexLifecycle, PgvectorClient, Point, PointSchema, PointStore,
    TableLifecycle,
};
pub use embeddings::{Embedder, EmbeddingCache, OllamaClient, embed_texts};
pub use pipeline::{DatasetPipeline, PipelineStats};
