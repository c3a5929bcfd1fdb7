#[cfg(test)]
mod tests;

use std::path::{Path, PathBuf};
use tracing::debug;

use crate::Result;
use crate::database::{StateDatabase, StateKind};

pub const SEEN_SET_FILE: &str = "seen_texts.sqlite";

/// Persistent set of texts already emitted by the intermediate stage.
#[derive(Debug, Clone)]
pub struct SeenSet {
    database: StateDatabase,
}

impl SeenSet {
    /// Opens `<cache_dir>/seen_texts.sqlite`, keeping existing entries.
    #[inline]
    pub async fn open<P: AsRef<Path>>(cache_dir: P) -> Result<Self> {
        let database =
            StateDatabase::open(Self::path_for(cache_dir), StateKind::SeenSet).await?;
        Ok(Self { database })
    }

    #[inline]
    pub fn path_for<P: AsRef<Path>>(cache_dir: P) -> PathBuf {
        cache_dir.as_ref().join(SEEN_SET_FILE)
    }

    #[inline]
    pub fn path(&self) -> &Path {
        self.database.path()
    }

    /// Records `text`; returns false when it was already present.
    #[inline]
    pub async fn insert(&self, text: &str) -> Result<bool> {
        let result = sqlx::query("INSERT OR IGNORE INTO seen_texts (text) VALUES (?)")
            .bind(text)
            .execute(self.database.pool())
            .await?;
        Ok(result.rows_affected() > 0)
    }

    #[inline]
    pub async fn contains(&self, text: &str) -> Result<bool> {
        let found: Option<i64> = sqlx::query_scalar("SELECT 1 FROM seen_texts WHERE text = ?")
            .bind(text)
            .fetch_optional(self.database.pool())
            .await?;
        Ok(found.is_some())
    }

    #[inline]
    pub async fn len(&self) -> Result<u64> {
        let count: i64 = sqlx::query_scalar("SELECT COUNT(*) FROM seen_texts")
            .fetch_one(self.database.pool())
            .await?;
        Ok(u64::try_from(count).unwrap_or_default())
    }

    #[inline]
    pub async fn is_empty(&self) -> Result<bool> {
        Ok(self.len().await? == 0)
    }

    /// Forgets every text, starting a fresh run.
    #[inline]
    pub async fn clear(&self) -> Result<()> {
        let result = sqlx::query("DELETE FROM seen_texts")
            .execute(self.database.pool())
            .await?;
        debug!(
            "Cleared {} entries from seen set {}",
            result.rows_affected(),
            self.path().display()
        );
        Ok(())
    }

    #[inline]
    pub async fn close(&self) {
        self.database.close().await;
    }
}
