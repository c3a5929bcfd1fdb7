#[cfg(test)]
mod tests;

use chrono::{DateTime, Utc};
use pgvector::Vector;
use serde::{Deserialize, Serialize};
use sqlx::FromRow;

use crate::config::ConfigError;
use crate::{PerfError, Result};

pub const DEFAULT_VECTOR_DIMENSIONS: u32 = 1536;
pub const DEFAULT_VECTOR_TABLE: &str = "point_with_embeddings";
pub const DEFAULT_VECTOR_INDEX: &str = "index_embedding";
pub const DEFAULT_ADMIN_DATABASE: &str = "postgres";
/// Model tag stored when a point is created without one
pub const DEFAULT_MODEL: &str = "default";
pub const EMBEDDING_COLUMN: &str = "embedding";

/// Columns selected whenever a full point is read back
pub(crate) const POINT_COLUMNS: &str = "id, text, model, embedding, created_at";

/// A stored point as the application sees it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub id: i64,
    pub text: String,
    pub model: String,
    pub embedding: Vec<f32>,
    pub created_at: DateTime<Utc>,
}

/// Raw storage row for the points table.
#[derive(Debug, Clone, FromRow)]
pub struct PointRow {
    pub id: i64,
    pub text: String,
    pub model: String,
    pub embedding: Vector,
    pub created_at: DateTime<Utc>,
}

/// Input for creating a point. Storage assigns `id` and `created_at`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NewPoint {
    pub text: String,
    pub model: Option<String>,
    pub embedding: Vec<f32>,
}

/// Attributes that may change on an existing point.
///
/// `None` leaves the stored column untouched. `id` and `created_at` are not
/// representable here, so they can never be updated.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct PointUpdate {
    pub text: Option<String>,
    pub model: Option<String>,
    pub embedding: Option<Vec<f32>>,
}

/// Optional filters and paging for listing points.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ListOptions {
    pub model: Option<String>,
    /// Case-insensitive substring matched against `text`
    pub text: Option<String>,
    pub limit: Option<i64>,
    pub offset: Option<i64>,
    pub sort_desc: bool,
}

impl Default for ListOptions {
    #[inline]
    fn default() -> Self {
        Self {
            model: None,
            text: None,
            limit: None,
            offset: None,
            sort_desc: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum DistanceMetric {
    #[default]
    L2,
    Cosine,
    InnerProduct,
}

impl DistanceMetric {
    /// pgvector operator class for an HNSW index using this metric
    #[inline]
    pub fn operator_class(self) -> &'static str {
        match self {
            DistanceMetric::L2 => "vector_l2_ops",
            DistanceMetric::Cosine => "vector_cosine_ops",
            DistanceMetric::InnerProduct => "vector_ip_ops",
        }
    }
}

impl std::fmt::Display for DistanceMetric {
    #[inline]
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match *self {
            DistanceMetric::L2 => write!(f, "l2"),
            DistanceMetric::Cosine => write!(f, "cosine"),
            DistanceMetric::InnerProduct => write!(f, "inner_product"),
        }
    }
}

/// HNSW tunables. Defaults match pgvector's own defaults.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndexSettings {
    pub distance: DistanceMetric,
    /// Maximum connections per graph layer
    pub m: u32,
    /// Candidate list size while building the graph
    pub ef_construction: u32,
}

impl Default for IndexSettings {
    #[inline]
    fn default() -> Self {
        Self {
            distance: DistanceMetric::L2,
            m: 16,
            ef_construction: 64,
        }
    }
}

impl IndexSettings {
    #[inline]
    pub fn validate(&self) -> std::result::Result<(), ConfigError> {
        if !(2..=100).contains(&self.m) {
            return Err(ConfigError::InvalidHnswM(self.m));
        }

        let min_ef = self.m * 2;
        if self.ef_construction < min_ef || self.ef_construction > 1000 {
            return Err(ConfigError::InvalidEfConstruction(
                self.ef_construction,
                min_ef,
            ));
        }

        Ok(())
    }
}

/// Shape of the backing table, passed to the client at construction time.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StoreSettings {
    pub vector_dimensions: u32,
    pub vector_table: String,
    pub vector_index: String,
    pub admin_database: String,
    pub index: IndexSettings,
}

impl Default for StoreSettings {
    #[inline]
    fn default() -> Self {
        Self {
            vector_dimensions: DEFAULT_VECTOR_DIMENSIONS,
            vector_table: DEFAULT_VECTOR_TABLE.to_string(),
            vector_index: DEFAULT_VECTOR_INDEX.to_string(),
            admin_database: DEFAULT_ADMIN_DATABASE.to_string(),
            index: IndexSettings::default(),
        }
    }
}

impl StoreSettings {
    #[inline]
    pub fn validate(&self) -> std::result::Result<(), ConfigError> {
        if !(1..=16_000).contains(&self.vector_dimensions) {
            return Err(ConfigError::InvalidVectorDimensions(self.vector_dimensions));
        }

        validate_identifier(&self.vector_table)?;
        validate_identifier(&self.vector_index)?;
        validate_identifier(&self.admin_database)?;
        self.index.validate()
    }

    #[inline]
    pub fn dimensions(&self) -> usize {
        self.vector_dimensions as usize
    }

    /// Reject embeddings whose length differs from the table dimensionality
    #[inline]
    pub fn check_embedding(&self, embedding: &[f32]) -> Result<()> {
        if embedding.len() != self.dimensions() {
            return Err(PerfError::Validation(format!(
                "embedding has {} dimensions, table '{}' expects {}",
                embedding.len(),
                self.vector_table,
                self.vector_dimensions
            )));
        }
        Ok(())
    }
}

/// Mapping between a storage row and an application-facing point type.
///
/// The store is generic over this trait; [`Point`] is the stock implementation.
pub trait PointSchema: Sized + Send + Unpin {
    fn from_row(row: PointRow) -> Self;

    /// Values written when this point is used as a creation template
    fn to_new_point(&self) -> NewPoint;

    /// Full attribute set of this point, as an update source
    fn to_update(&self) -> PointUpdate;
}

impl PointSchema for Point {
    #[inline]
    fn from_row(row: PointRow) -> Self {
        Self {
            id: row.id,
            text: row.text,
            model: row.model,
            embedding: row.embedding.to_vec(),
            created_at: row.created_at,
        }
    }

    #[inline]
    fn to_new_point(&self) -> NewPoint {
        NewPoint {
            text: self.text.clone(),
            model: Some(self.model.clone()),
            embedding: self.embedding.clone(),
        }
    }

    #[inline]
    fn to_update(&self) -> PointUpdate {
        PointUpdate {
            text: Some(self.text.clone()),
            model: Some(self.model.clone()),
            embedding: Some(self.embedding.clone()),
        }
    }
}

impl NewPoint {
    #[inline]
    pub fn new(text: impl Into<String>, embedding: Vec<f32>) -> Self {
        Self {
            text: text.into(),
            model: None,
            embedding,
        }
    }

    #[inline]
    pub fn with_model(mut self, model: impl Into<String>) -> Self {
        self.model = Some(model.into());
        self
    }

    #[inline]
    pub fn model_or_default(&self) -> &str {
        self.model.as_deref().unwrap_or(DEFAULT_MODEL)
    }

    #[inline]
    pub fn validate(&self, settings: &StoreSettings) -> Result<()> {
        if self.text.is_empty() {
            return Err(PerfError::Validation("point text must not be empty".to_string()));
        }
        if self.model.as_deref().is_some_and(str::is_empty) {
            return Err(PerfError::Validation("point model must not be empty".to_string()));
        }
        settings.check_embedding(&self.embedding)
    }
}

impl PointUpdate {
    #[inline]
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: Some(text.into()),
            ..Self::default()
        }
    }

    #[inline]
    pub fn is_empty(&self) -> bool {
        self.text.is_none() && self.model.is_none() && self.embedding.is_none()
    }

    /// Merge two attribute sets. Present values in `overrides` win; absent
    /// ones fall back to `self`, so an absent override never clears a value.
    #[inline]
    #[must_use]
    pub fn merge(self, overrides: PointUpdate) -> PointUpdate {
        PointUpdate {
            text: overrides.text.or(self.text),
            model: overrides.model.or(self.model),
            embedding: overrides.embedding.or(self.embedding),
        }
    }

    #[inline]
    pub fn validate(&self, settings: &StoreSettings) -> Result<()> {
        if self.text.as_deref().is_some_and(str::is_empty) {
            return Err(PerfError::Validation("point text must not be empty".to_string()));
        }
        if self.model.as_deref().is_some_and(str::is_empty) {
            return Err(PerfError::Validation("point model must not be empty".to_string()));
        }
        if let Some(embedding) = &self.embedding {
            settings.check_embedding(embedding)?;
        }
        Ok(())
    }
}

/// Check that a name is safe to interpolate into SQL as an identifier.
#[inline]
pub fn validate_identifier(name: &str) -> std::result::Result<(), ConfigError> {
    let valid = !name.is_empty()
        && name.len() <= 63
        && !name.starts_with(|c: char| c.is_ascii_digit())
        && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_');

    if valid {
        Ok(())
    } else {
        Err(ConfigError::InvalidIdentifier(name.to_string()))
    }
}

/// Quote an identifier for Postgres, escaping embedded quotes.
#[inline]
pub fn quote_ident(input: &str) -> String {
    format!("\"{}\"", input.replace('"', "\"\""))
}
