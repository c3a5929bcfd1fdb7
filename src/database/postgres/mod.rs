use std::marker::PhantomData;
use std::str::FromStr;

use sqlx::postgres::{PgConnectOptions, PgPool, PgPoolOptions};
use tracing::{debug, info};

use crate::config::{Config, ConfigError, resolve_database_url};
use crate::{PerfError, Result};

#[cfg(test)]
mod tests;

pub mod lifecycle;
pub mod models;
pub mod points;

pub use lifecycle::{DatabaseLifecycle, IndexLifecycle, TableLifecycle};
pub use models::{
    DistanceMetric, IndexSettings, ListOptions, NewPoint, Point, PointRow, PointSchema,
    PointUpdate, StoreSettings,
};
pub use points::PointStore;

pub const DEFAULT_MAX_CONNECTIONS: u32 = 5;

/// Client for a pgvector-backed point table.
///
/// Construction never touches the network: the pool connects lazily so the
/// target database can be created through [`PgvectorClient::databases`]
/// before anything else runs against it.
#[derive(Debug, Clone)]
pub struct PgvectorClient<S: PointSchema = Point> {
    pool: PgPool,
    connect_options: PgConnectOptions,
    settings: StoreSettings,
    schema: PhantomData<fn() -> S>,
}

impl<S: PointSchema> PgvectorClient<S> {
    /// Build a client from an explicit URL (or the environment fallbacks) and
    /// the point table settings.
    #[inline]
    pub fn new(url: Option<&str>, settings: StoreSettings) -> Result<Self> {
        Self::with_max_connections(url, settings, DEFAULT_MAX_CONNECTIONS)
    }

    #[inline]
    pub fn with_max_connections(
        url: Option<&str>,
        settings: StoreSettings,
        max_connections: u32,
    ) -> Result<Self> {
        let url = resolve_database_url(url, None)?;
        Self::connect_lazy(&url, settings, max_connections)
    }

    /// Build a client from loaded configuration; `url` overrides `postgres.url`.
    #[inline]
    pub fn from_config(config: &Config, url: Option<&str>) -> Result<Self> {
        let url = resolve_database_url(url, config.postgres.url.as_deref())?;
        Self::connect_lazy(
            &url,
            config.postgres.store_settings(),
            config.postgres.max_connections,
        )
    }

    fn connect_lazy(url: &str, settings: StoreSettings, max_connections: u32) -> Result<Self> {
        settings.validate()?;

        let connect_options = PgConnectOptions::from_str(url)
            .map_err(|e| ConfigError::InvalidDatabaseUrl(e.to_string()))?;

        let database = connect_options
            .get_database()
            .ok_or_else(|| ConfigError::MissingDatabaseName(redact_url(url)))?;
        debug!(
            "Configured client for database '{}' (table '{}', {} dimensions)",
            database, settings.vector_table, settings.vector_dimensions
        );

        let pool = PgPoolOptions::new()
            .max_connections(max_connections)
            .connect_lazy_with(connect_options.clone());

        Ok(Self {
            pool,
            connect_options,
            settings,
            schema: PhantomData,
        })
    }

    #[inline]
    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    #[inline]
    pub fn settings(&self) -> &StoreSettings {
        &self.settings
    }

    #[inline]
    pub fn connect_options(&self) -> &PgConnectOptions {
        &self.connect_options
    }

    /// Name of the target database taken from the connection URL
    #[inline]
    pub fn database_name(&self) -> Result<&str> {
        self.connect_options.get_database().ok_or_else(|| {
            PerfError::Configuration("No database name provided in the URL".to_string())
        })
    }

    /// Connection options for the sibling administrative database
    #[inline]
    pub fn admin_connect_options(&self) -> PgConnectOptions {
        self.connect_options
            .clone()
            .database(&self.settings.admin_database)
    }

    #[inline]
    pub fn databases(&self) -> DatabaseLifecycle<'_> {
        DatabaseLifecycle::new(&self.connect_options, &self.pool, &self.settings)
    }

    #[inline]
    pub fn tables(&self) -> TableLifecycle<'_> {
        TableLifecycle::new(&self.pool, &self.settings)
    }

    #[inline]
    pub fn index(&self) -> IndexLifecycle<'_> {
        IndexLifecycle::new(&self.pool, &self.settings)
    }

    #[inline]
    pub fn points(&self) -> PointStore<'_, S> {
        PointStore::new(&self.pool, &self.settings)
    }

    /// Create everything the point store needs, in dependency order:
    /// database, vector extension, table, ANN index.
    ///
    /// With `strict`, an already existing database is an error.
    #[inline]
    pub async fn initialize(&self, strict: bool) -> Result<()> {
        info!("Initializing pgvector storage");

        self.databases().ensure_database(!strict).await?;
        self.databases()
            .ensure_extension(lifecycle::VECTOR_EXTENSION)
            .await?;
        self.tables().ensure_table().await?;
        self.index().ensure_index().await?;

        info!("pgvector storage ready");
        Ok(())
    }

    /// Close every pooled connection. Needed before dropping the database.
    #[inline]
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

/// Strip the password from a connection URL for messages and logs.
pub(crate) fn redact_url(url: &str) -> String {
    match url::Url::parse(url) {
        Ok(mut parsed) if parsed.password().is_some() => {
            let _ = parsed.set_password(Some("***"));
            parsed.to_string()
        }
        Ok(parsed) => parsed.to_string(),
        Err(_) => "<unparseable url>".to_string(),
    }
}
