use sqlx::migrate::Migrator;
use sqlx::sqlite::{
    SqliteConnectOptions, SqliteJournalMode, SqlitePoolOptions, SqliteSynchronous,
};
use sqlx::{Pool, Sqlite};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

use crate::{PerfError, Result};


pub type DbPool = Pool<Sqlite>;

static CACHE_MIGRATOR: Migrator = sqlx::migrate!("src/database/sqlite/migrations/cache");
static SEEN_MIGRATOR: Migrator = sqlx::migrate!("src/database/sqlite/migrations/seen");

/// Which local state a database file holds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StateKind {
    EmbeddingCache,
    SeenSet,
}

impl StateKind {
    fn migrator(self) -> &'static Migrator {
        match self {
            StateKind::EmbeddingCache => &CACHE_MIGRATOR,
            StateKind::SeenSet => &SEEN_MIGRATOR,
        }
    }
}

impl std::fmt::Display for StateKind {
    #[inline]
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match *self {
            StateKind::EmbeddingCache => write!(f, "embedding cache"),
            StateKind::SeenSet => write!(f, "seen set"),
        }
    }
}

/// On-disk SQLite file backing pipeline state that survives across runs.
#[derive(Debug, Clone)]
pub struct StateDatabase {
    pool: DbPool,
    path: PathBuf,
    kind: StateKind,
}

impl StateDatabase {
    #[inline]
    pub async fn open<P: AsRef<Path>>(path: P, kind: StateKind) -> Result<Self> {
        let path = path.as_ref().to_path_buf();
        if let Some(parent) = path.parent().filter(|p| !p.as_os_str().is_empty()) {
            std::fs::create_dir_all(parent).map_err(|e| {
                PerfError::Storage(format!(
                    "Failed to create state directory {}: {}",
                    parent.display(),
                    e
                ))
            })?;
        }

        // WAL lets concurrent pipeline runs read while one of them writes
        let options = SqliteConnectOptions::new()
            .filename(&path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(std::time::Duration::from_secs(30));

        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await
            .map_err(|e| {
                PerfError::Storage(format!(
                    "Failed to open {} at {}: {}",
                    kind,
                    path.display(),
                    e
                ))
            })?;

        let database = Self { pool, path, kind };
        database.run_migrations().await?;

        Ok(database)
    }

    #[inline]
    pub fn pool(&self) -> &DbPool {
        &self.pool
    }

    #[inline]
    pub fn path(&self) -> &Path {
        &self.path
    }

    #[inline]
    pub fn kind(&self) -> StateKind {
        self.kind
    }

    #[inline]
    pub async fn run_migrations(&self) -> Result<()> {
        info!("Running {} migrations at {}", self.kind, self.path.display());

        self.kind.migrator().run(&self.pool).await?;

        debug!("{} migrations completed successfully", self.kind);
        Ok(())
    }

    /// Reclaim space after large deletions
    #[inline]
    pub async fn optimize(&self) -> Result<()> {
        sqlx::query("VACUUM").execute(&self.pool).await?;
        sqlx::query("ANALYZE").execute(&self.pool).await?;
        debug!("Optimized {} at {}", self.kind, self.path.display());
        Ok(())
    }

    #[inline]
    pub async fn close(&self) {
        self.pool.close().await;
    }
}
