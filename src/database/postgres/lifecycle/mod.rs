#[cfg(test)]
mod tests;

use sqlx::postgres::{PgConnectOptions, PgConnection, PgPool};
use sqlx::{ConnectOptions, Connection, Postgres, Transaction};
use tracing::{debug, error, info, warn};

use super::models::{EMBEDDING_COLUMN, StoreSettings, quote_ident, validate_identifier};
use crate::{PerfError, Result};

/// Extension providing the `vector` column type and HNSW indexes
pub const VECTOR_EXTENSION: &str = "vector";

const DUPLICATE_DATABASE: &str = "42P04";
const DUPLICATE_OBJECT: &str = "42710";
const DUPLICATE_TABLE: &str = "42P07";
const UNIQUE_VIOLATION: &str = "23505";

/// Database and extension lifecycle.
///
/// Database creation and removal go through a connection to the
/// administrative database, since a database cannot create itself.
pub struct DatabaseLifecycle<'a> {
    connect_options: &'a PgConnectOptions,
    pool: &'a PgPool,
    settings: &'a StoreSettings,
}

impl<'a> DatabaseLifecycle<'a> {
    #[inline]
    pub fn new(
        connect_options: &'a PgConnectOptions,
        pool: &'a PgPool,
        settings: &'a StoreSettings,
    ) -> Self {
        Self {
            connect_options,
            pool,
            settings,
        }
    }

    fn database_name(&self) -> Result<&str> {
        let name = self.connect_options.get_database().ok_or_else(|| {
            PerfError::Configuration("No database name provided in the URL".to_string())
        })?;
        validate_identifier(name)?;
        Ok(name)
    }

    async fn admin_connection(&self) -> Result<PgConnection> {
        let options = self
            .connect_options
            .clone()
            .database(&self.settings.admin_database);

        options.connect().await.map_err(|e| {
            error!(
                "Failed to connect to admin database '{}': {}",
                self.settings.admin_database, e
            );
            PerfError::from(e)
        })
    }

    /// Whether the target database is present in `pg_database`
    #[inline]
    pub async fn database_exists(&self) -> Result<bool> {
        let name = self.database_name()?;
        let mut conn = self.admin_connection().await?;
        let exists = database_exists(&mut conn, name).await;
        close_quietly(conn).await;
        exists
    }

    /// Create the target database if it is missing.
    ///
    /// Returns `true` when this call created it. When it already exists the
    /// call is a no-op, unless `exist_ok` is false, which yields
    /// [`PerfError::AlreadyExists`].
    #[inline]
    pub async fn ensure_database(&self, exist_ok: bool) -> Result<bool> {
        let name = self.database_name()?;
        let mut conn = self.admin_connection().await?;
        let result = create_database(&mut conn, name, exist_ok).await;
        close_quietly(conn).await;
        result
    }

    /// Enable an extension in the target database if it is not enabled yet.
    /// Returns `true` when this call enabled it.
    #[inline]
    pub async fn ensure_extension(&self, name: &str) -> Result<bool> {
        validate_identifier(name)?;

        let mut tx = self.pool.begin().await?;
        if extension_exists(&mut tx, name).await? {
            debug!("Extension '{}' already enabled", name);
            tx.commit().await?;
            return Ok(false);
        }

        let sql = format!("CREATE EXTENSION IF NOT EXISTS {}", quote_ident(name));
        match sqlx::query(&sql).execute(&mut *tx).await {
            Ok(_) => {
                tx.commit().await?;
                info!("Extension '{}' enabled", name);
                Ok(true)
            }
            Err(e) if is_code(&e, DUPLICATE_OBJECT) || is_code(&e, UNIQUE_VIOLATION) => {
                debug!("Extension '{}' was enabled concurrently", name);
                Ok(false)
            }
            Err(e) => {
                error!("Failed to enable extension '{}': {}", name, e);
                Err(e.into())
            }
        }
    }

    #[inline]
    pub async fn extension_exists(&self, name: &str) -> Result<bool> {
        let mut tx = self.pool.begin().await?;
        let exists = extension_exists(&mut tx, name).await?;
        tx.commit().await?;
        Ok(exists)
    }

    /// Drop the target database, disconnecting any other sessions first.
    /// Pooled connections of this client must be closed beforehand.
    #[inline]
    pub async fn drop_database(&self) -> Result<bool> {
        let name = self.database_name()?;
        let mut conn = self.admin_connection().await?;
        let result = drop_database(&mut conn, name).await;
        close_quietly(conn).await;
        result
    }
}

async fn database_exists(conn: &mut PgConnection, name: &str) -> Result<bool> {
    let exists: bool =
        sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM pg_database WHERE datname = $1)")
            .bind(name)
            .fetch_one(&mut *conn)
            .await?;
    Ok(exists)
}

async fn create_database(conn: &mut PgConnection, name: &str, exist_ok: bool) -> Result<bool> {
    if database_exists(conn, name).await? {
        if !exist_ok {
            return Err(PerfError::AlreadyExists(format!(
                "database '{}' already exists",
                name
            )));
        }
        debug!("Database '{}' already exists", name);
        return Ok(false);
    }

    // CREATE DATABASE cannot run inside a transaction block
    let sql = format!("CREATE DATABASE {}", quote_ident(name));
    match sqlx::query(&sql).execute(&mut *conn).await {
        Ok(_) => {
            info!("Database '{}' created", name);
            Ok(true)
        }
        Err(e) if is_code(&e, DUPLICATE_DATABASE) => {
            if exist_ok {
                debug!("Database '{}' was created concurrently", name);
                Ok(false)
            } else {
                Err(PerfError::AlreadyExists(format!(
                    "database '{}' already exists",
                    name
                )))
            }
        }
        Err(e) => {
            error!("Failed to create database '{}': {}", name, e);
            Err(e.into())
        }
    }
}

async fn drop_database(conn: &mut PgConnection, name: &str) -> Result<bool> {
    if !database_exists(conn, name).await? {
        debug!("Database '{}' does not exist, nothing to drop", name);
        return Ok(false);
    }

    sqlx::query(
        "SELECT pg_terminate_backend(pid) FROM pg_stat_activity WHERE datname = $1 AND pid <> pg_backend_pid()",
    )
    .bind(name)
    .execute(&mut *conn)
    .await?;

    let sql = format!("DROP DATABASE IF EXISTS {}", quote_ident(name));
    sqlx::query(&sql).execute(&mut *conn).await.map_err(|e| {
        error!("Failed to drop database '{}': {}", name, e);
        PerfError::from(e)
    })?;

    info!("Database '{}' dropped", name);
    Ok(true)
}

async fn extension_exists(tx: &mut Transaction<'_, Postgres>, name: &str) -> Result<bool> {
    let exists: bool =
        sqlx::query_scalar("SELECT EXISTS (SELECT 1 FROM pg_extension WHERE extname = $1)")
            .bind(name)
            .fetch_one(&mut **tx)
            .await?;
    Ok(exists)
}

async fn relation_exists(
    tx: &mut Transaction<'_, Postgres>,
    name: &str,
    kinds: &[&str],
) -> Result<bool> {
    let kinds: Vec<String> = kinds.iter().map(|kind| (*kind).to_string()).collect();
    let exists: bool = sqlx::query_scalar(
        r#"
        SELECT EXISTS (
            SELECT 1
            FROM pg_class c
            JOIN pg_namespace n ON n.oid = c.relnamespace
            WHERE c.relname = $1
              AND n.nspname = current_schema()
              AND c.relkind::text = ANY($2)
        )
        "#,
    )
    .bind(name)
    .bind(&kinds)
    .fetch_one(&mut **tx)
    .await?;
    Ok(exists)
}

async fn close_quietly(conn: PgConnection) {
    if let Err(e) = conn.close().await {
        warn!("Failed to close admin connection cleanly: {}", e);
    }
}

fn is_code(error: &sqlx::Error, code: &str) -> bool {
    error
        .as_database_error()
        .and_then(|db_error| db_error.code())
        .is_some_and(|actual| actual == code)
}

/// Backing table lifecycle.
pub struct TableLifecycle<'a> {
    pool: &'a PgPool,
    settings: &'a StoreSettings,
}

impl<'a> TableLifecycle<'a> {
    #[inline]
    pub fn new(pool: &'a PgPool, settings: &'a StoreSettings) -> Self {
        Self { pool, settings }
    }

    #[inline]
    pub async fn table_exists(&self) -> Result<bool> {
        let mut tx = self.pool.begin().await?;
        let exists = relation_exists(&mut tx, &self.settings.vector_table, &["r", "p"]).await?;
        tx.commit().await?;
        Ok(exists)
    }

    /// Create the points table and its secondary indexes if missing.
    /// Returns `true` when the table did not exist before this call.
    #[inline]
    pub async fn ensure_table(&self) -> Result<bool> {
        let table = &self.settings.vector_table;
        let mut tx = self.pool.begin().await?;

        let existed = relation_exists(&mut tx, table, &["r", "p"]).await?;
        for statement in create_table_statements(self.settings) {
            sqlx::query(&statement)
                .execute(&mut *tx)
                .await
                .map_err(|e| {
                    error!("Failed to create table '{}': {}", table, e);
                    PerfError::from(e)
                })?;
        }
        tx.commit().await?;

        if existed {
            debug!("Table '{}' already exists", table);
        } else {
            info!("Table '{}' created", table);
        }
        Ok(!existed)
    }

    #[inline]
    pub async fn drop_table(&self) -> Result<()> {
        let sql = format!(
            "DROP TABLE IF EXISTS {}",
            quote_ident(&self.settings.vector_table)
        );
        sqlx::query(&sql).execute(self.pool).await?;
        info!("Table '{}' dropped", self.settings.vector_table);
        Ok(())
    }
}

/// DDL for the points table, idempotent by construction
pub(crate) fn create_table_statements(settings: &StoreSettings) -> Vec<String> {
    let table = &settings.vector_table;
    let quoted = quote_ident(table);

    vec![
        format!(
            r#"CREATE TABLE IF NOT EXISTS {quoted} (
                id BIGSERIAL PRIMARY KEY,
                text TEXT NOT NULL,
                model TEXT NOT NULL DEFAULT 'default',
                embedding vector({dims}) NOT NULL,
                created_at TIMESTAMPTZ NOT NULL DEFAULT now()
            )"#,
            quoted = quoted,
            dims = settings.vector_dimensions,
        ),
        format!(
            "CREATE INDEX IF NOT EXISTS {} ON {} (model)",
            quote_ident(&format!("ix_{}_model", table)),
            quoted
        ),
        format!(
            "CREATE INDEX IF NOT EXISTS {} ON {} (created_at)",
            quote_ident(&format!("ix_{}_created_at", table)),
            quoted
        ),
    ]
}

/// Approximate-nearest-neighbor index lifecycle.
pub struct IndexLifecycle<'a> {
    pool: &'a PgPool,
    settings: &'a StoreSettings,
}

impl<'a> IndexLifecycle<'a> {
    #[inline]
    pub fn new(pool: &'a PgPool, settings: &'a StoreSettings) -> Self {
        Self { pool, settings }
    }

    #[inline]
    pub async fn index_exists(&self) -> Result<bool> {
        let mut tx = self.pool.begin().await?;
        let exists = relation_exists(&mut tx, &self.settings.vector_index, &["i"]).await?;
        tx.commit().await?;
        Ok(exists)
    }

    /// Create the HNSW index over the embedding column if missing.
    ///
    /// Fails with [`PerfError::Configuration`] when the vector extension is not
    /// enabled in the target database. Returns `true` when this call created
    /// the index.
    #[inline]
    pub async fn ensure_index(&self) -> Result<bool> {
        let index = &self.settings.vector_index;
        let mut tx = self.pool.begin().await?;

        if !extension_exists(&mut tx, VECTOR_EXTENSION).await? {
            error!(
                "Cannot create index '{}': extension '{}' is not enabled",
                index, VECTOR_EXTENSION
            );
            return Err(PerfError::Configuration(format!(
                "extension '{}' is not enabled; run ensure_extension first",
                VECTOR_EXTENSION
            )));
        }

        if relation_exists(&mut tx, index, &["i"]).await? {
            debug!("Index '{}' already exists", index);
            tx.commit().await?;
            return Ok(false);
        }

        match sqlx::query(&create_index_sql(self.settings))
            .execute(&mut *tx)
            .await
        {
            Ok(_) => {
                tx.commit().await?;
                info!(
                    "Index '{}' created ({}, m = {}, ef_construction = {})",
                    index,
                    self.settings.index.distance,
                    self.settings.index.m,
                    self.settings.index.ef_construction
                );
                Ok(true)
            }
            Err(e) if is_code(&e, DUPLICATE_TABLE) || is_code(&e, UNIQUE_VIOLATION) => {
                debug!("Index '{}' was created concurrently", index);
                Ok(false)
            }
            Err(e) => {
                error!("Failed to create index '{}': {}", index, e);
                Err(e.into())
            }
        }
    }

    #[inline]
    pub async fn drop_index(&self) -> Result<()> {
        let sql = format!(
            "DROP INDEX IF EXISTS {}",
            quote_ident(&self.settings.vector_index)
        );
        sqlx::query(&sql).execute(self.pool).await?;
        info!("Index '{}' dropped", self.settings.vector_index);
        Ok(())
    }
}

pub(crate) fn create_index_sql(settings: &StoreSettings) -> String {
    format!(
        "CREATE INDEX IF NOT EXISTS {index} ON {table} USING hnsw ({column} {ops}) WITH (m = {m}, ef_construction = {ef})",
        index = quote_ident(&settings.vector_index),
        table = quote_ident(&settings.vector_table),
        column = EMBEDDING_COLUMN,
        ops = settings.index.distance.operator_class(),
        m = settings.index.m,
        ef = settings.index.ef_construction,
    )
}
