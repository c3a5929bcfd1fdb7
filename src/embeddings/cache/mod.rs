//! Content-addressed embedding cache.
//!
//! One SQLite file per model name, keyed by the raw text. Entries are
//! write-once: a second `put` for an existing key keeps the first vector.
//! Keys carry no model identity beyond the file they live in, so switching
//! the model under an existing cache directory requires `clear`.


use base64::Engine;
use base64::engine::general_purpose::STANDARD;
use itertools::Itertools;
use sqlx::{QueryBuilder, Sqlite};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::database::{StateDatabase, StateKind};
use crate::embeddings::Embedder;
use crate::{PerfError, Result};

/// Stays well under SQLite's bound-parameter limit
const LOOKUP_CHUNK: usize = 500;

#[derive(Debug, Clone)]
pub struct EmbeddingCache {
    database: StateDatabase,
    model: String,
}

/// Vectors for one `embed_texts` call, in input order
#[derive(Debug, Clone, PartialEq, Default)]
pub struct EmbeddingBatch {
    pub vectors: Vec<Vec<f32>>,
    /// Inputs answered from the cache
    pub cache_hits: usize,
    /// Distinct texts sent to the embedder
    pub computed: usize,
}

impl EmbeddingCache {
    /// Opens (creating if needed) `<cache_dir>/<model>.sqlite`.
    #[inline]
    pub async fn open<P: AsRef<Path>>(cache_dir: P, model: &str) -> Result<Self> {
        let path = Self::path_for(cache_dir, model);
        let database = StateDatabase::open(&path, StateKind::EmbeddingCache).await?;
        info!("Opened embedding cache for {} at {}", model, path.display());

        Ok(Self {
            database,
            model: model.to_string(),
        })
    }

    /// Cache file location for a model; characters outside
    /// `[A-Za-z0-9._-]` become `_`.
    #[inline]
    pub fn path_for<P: AsRef<Path>>(cache_dir: P, model: &str) -> PathBuf {
        let file_stem: String = model
            .chars()
            .map(|c| {
                if c.is_ascii_alphanumeric() || matches!(c, '.' | '_' | '-') {
                    c
                } else {
                    '_'
                }
            })
            .collect();
        let file_stem = if file_stem.is_empty() {
            "default".to_string()
        } else {
            file_stem
        };
        cache_dir.as_ref().join(format!("{file_stem}.sqlite"))
    }

    #[inline]
    pub fn model(&self) -> &str {
        &self.model
    }

    #[inline]
    pub fn path(&self) -> &Path {
        self.database.path()
    }

    #[inline]
    pub async fn get(&self, text: &str) -> Result<Option<Vec<f32>>> {
        let encoded: Option<String> =
            sqlx::query_scalar("SELECT embedding FROM embedding_cache WHERE text = ?")
                .bind(text)
                .fetch_optional(self.database.pool())
                .await?;

        encoded.as_deref().map(decode_embedding).transpose()
    }

    /// Looks up every distinct text; absent keys are missing from the map.
    #[inline]
    pub async fn get_many(&self, texts: &[String]) -> Result<HashMap<String, Vec<f32>>> {
        let mut found = HashMap::new();
        let unique: Vec<&String> = texts.iter().unique().collect();

        for chunk in unique.chunks(LOOKUP_CHUNK) {
            let mut builder: QueryBuilder<'_, Sqlite> =
                QueryBuilder::new("SELECT text, embedding FROM embedding_cache WHERE text IN (");
            let mut separated = builder.separated(", ");
            for text in chunk {
                separated.push_bind(text.as_str());
            }
            separated.push_unseparated(")");

            let rows: Vec<(String, String)> = builder
                .build_query_as()
                .fetch_all(self.database.pool())
                .await?;
            for (text, encoded) in rows {
                let vector = decode_embedding(&encoded)?;
                found.insert(text, vector);
            }
        }

        debug!(
            "Embedding cache lookup: {} of {} distinct texts found",
            found.len(),
            unique.len()
        );
        Ok(found)
    }

    /// Returns true when the entry was newly written
    #[inline]
    pub async fn put(&self, text: &str, embedding: &[f32]) -> Result<bool> {
        let result =
            sqlx::query("INSERT OR IGNORE INTO embedding_cache (text, embedding) VALUES (?, ?)")
                .bind(text)
                .bind(encode_embedding(embedding))
                .execute(self.database.pool())
                .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Writes all entries in one transaction; returns how many were new.
    #[inline]
    pub async fn put_many<'a, I>(&self, entries: I) -> Result<u64>
    where
        I: IntoIterator<Item = (&'a str, &'a [f32])>,
    {
        let mut tx = self.database.pool().begin().await?;
        let mut inserted = 0;

        for (text, embedding) in entries {
            let result = sqlx::query(
                "INSERT OR IGNORE INTO embedding_cache (text, embedding) VALUES (?, ?)",
            )
            .bind(text)
            .bind(encode_embedding(embedding))
            .execute(&mut *tx)
            .await?;
            inserted += result.rows_affected();
        }

        tx.commit().await?;
        Ok(inserted)
    }

    #[inline]
    pub async fn len(&self) -> Result<u64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM embedding_cache")
            .fetch_one(self.database.pool())
            .await?;
        Ok(u64::try_from(count).unwrap_or_default())
    }

    #[inline]
    pub async fn is_empty(&self) -> Result<bool> {
        Ok(self.len().await? == 0)
    }

    /// Removes every entry; returns the number removed.
    #[inline]
    pub async fn clear(&self) -> Result<u64> {
        let result = sqlx::query("DELETE FROM embedding_cache")
            .execute(self.database.pool())
            .await?;
        self.database.optimize().await?;
        info!(
            "Cleared {} entries from embedding cache {}",
            result.rows_affected(),
            self.path().display()
        );
        Ok(result.rows_affected())
    }

    #[inline]
    pub async fn close(&self) {
        self.database.close().await;
    }
}

/// Base64 of the vector's little-endian `f32` bytes.
#[inline]
pub fn encode_embedding(embedding: &[f32]) -> String {
    let bytes: Vec<u8> = embedding.iter().flat_map(|v| v.to_le_bytes()).collect();
    STANDARD.encode(bytes)
}

#[inline]
pub fn decode_embedding(encoded: &str) -> Result<Vec<f32>> {
    let bytes = STANDARD
        .decode(encoded)
        .map_err(|e| PerfError::Validation(format!("Invalid base64 embedding: {e}")))?;

    if bytes.len() % 4 != 0 {
        return Err(PerfError::Validation(format!(
            "Encoded embedding has {} bytes, not a multiple of 4",
            bytes.len()
        )));
    }

    Ok(bytes
        .chunks_exact(4)
        .map(|chunk| {
            let mut buf = [0u8; 4];
            buf.copy_from_slice(chunk);
            f32::from_le_bytes(buf)
        })
        .collect())
}

/// Embeds `texts` through the cache.
///
/// Cached texts are answered directly. The remaining distinct texts go to
/// `embedder` in a single call, are checked against `dim`, and are written
/// back before returning. When everything is cached the embedder is not
/// called at all.
#[inline]
pub async fn embed_texts(
    cache: &EmbeddingCache,
    embedder: &dyn Embedder,
    texts: &[String],
    dim: usize,
) -> Result<EmbeddingBatch> {
    if texts.is_empty() {
        return Ok(EmbeddingBatch::default());
    }

    let mut known = cache.get_many(texts).await?;
    for (text, vector) in &known {
        check_dimension(text, vector, dim)?;
    }

    let cache_hits = texts.iter().filter(|t| known.contains_key(*t)).count();
    let misses: Vec<String> = texts
        .iter()
        .filter(|t| !known.contains_key(*t))
        .unique()
        .cloned()
        .collect();

    if !misses.is_empty() {
        debug!(
            "Computing {} embeddings with {} ({} cache hits)",
            misses.len(),
            embedder.model_name(),
            cache_hits
        );
        let computed = embedder.embed(&misses).await?;

        if computed.len() != misses.len() {
            return Err(PerfError::Embedding(format!(
                "Embedder returned {} vectors for {} texts",
                computed.len(),
                misses.len()
            )));
        }
        for (text, vector) in misses.iter().zip(&computed) {
            check_dimension(text, vector, dim)?;
        }

        cache
            .put_many(
                misses
                    .iter()
                    .zip(&computed)
                    .map(|(text, vector)| (text.as_str(), vector.as_slice())),
            )
            .await?;
        known.extend(misses.iter().cloned().zip(computed));
    }

    let vectors = texts
        .iter()
        .map(|text| {
            known.get(text).cloned().ok_or_else(|| {
                PerfError::Embedding(format!("No embedding produced for text {text:?}"))
            })
        })
        .collect::<Result<Vec<_>>>()?;

    Ok(EmbeddingBatch {
        vectors,
        cache_hits,
        computed: misses.len(),
    })
}

fn check_dimension(text: &str, vector: &[f32], dim: usize) -> Result<()> {
    if vector.len() == dim {
        Ok(())
    } else {
        Err(PerfError::Validation(format!(
            "Embedding for {:?} has {} dimensions, expected {}",
            text,
            vector.len(),
            dim
        )))
    }
}
