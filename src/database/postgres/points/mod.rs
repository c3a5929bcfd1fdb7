
use std::marker::PhantomData;

use pgvector::Vector;
use sqlx::postgres::PgPool;
use sqlx::{Postgres, QueryBuilder, Transaction};
use tracing::{debug, info};

use super::models::{
    ListOptions, NewPoint, POINT_COLUMNS, PointRow, PointSchema, PointUpdate, StoreSettings,
    quote_ident,
};
use crate::{PerfError, Result};

/// CRUD and listing over the points table.
///
/// Every operation runs inside a single transaction. Dropping an
/// uncommitted transaction rolls it back, so early returns and errors never
/// leave partial writes behind.
pub struct PointStore<'a, S: PointSchema> {
    pool: &'a PgPool,
    settings: &'a StoreSettings,
    schema: PhantomData<fn() -> S>,
}

impl<'a, S: PointSchema> PointStore<'a, S> {
    #[inline]
    pub fn new(pool: &'a PgPool, settings: &'a StoreSettings) -> Self {
        Self {
            pool,
            settings,
            schema: PhantomData,
        }
    }

    fn table(&self) -> String {
        quote_ident(&self.settings.vector_table)
    }

    /// List points, newest first unless `options.sort_desc` is false.
    ///
    /// Ties on `created_at` are broken by `id` in the same direction.
    #[inline]
    pub async fn list(&self, options: &ListOptions) -> Result<Vec<S>> {
        let mut query = build_list_query(&self.table(), options);

        let mut tx = self.pool.begin().await?;
        let rows: Vec<PointRow> = query.build_query_as().fetch_all(&mut *tx).await?;
        tx.commit().await?;

        debug!("Listed {} points", rows.len());
        Ok(rows.into_iter().map(S::from_row).collect())
    }

    /// Number of stored points, optionally restricted to one model tag
    #[inline]
    pub async fn count(&self, model: Option<&str>) -> Result<i64> {
        let mut query = QueryBuilder::<Postgres>::new("SELECT COUNT(*) FROM ");
        query.push(self.table());
        if let Some(model) = model {
            query.push(" WHERE model = ").push_bind(model);
        }

        let count: i64 = query.build_query_scalar().fetch_one(self.pool).await?;
        Ok(count)
    }

    /// Fetch one point.
    ///
    /// A missing row is [`PerfError::NotFound`] unless `not_found_ok`, in
    /// which case `Ok(None)` is returned.
    #[inline]
    pub async fn retrieve(&self, id: i64, not_found_ok: bool) -> Result<Option<S>> {
        check_id(id)?;

        let mut tx = self.pool.begin().await?;
        let row = self.fetch_row(&mut tx, id, false).await?;
        tx.commit().await?;

        match row {
            Some(row) => Ok(Some(S::from_row(row))),
            None if not_found_ok => Ok(None),
            None => Err(not_found(id)),
        }
    }

    /// Insert one point and return it with its generated `id` and `created_at`.
    #[inline]
    pub async fn create(&self, point: &NewPoint) -> Result<S> {
        point.validate(self.settings)?;

        let mut tx = self.pool.begin().await?;
        let row = self.insert_row(&mut tx, point).await?;
        tx.commit().await?;

        debug!("Created point {}", row.id);
        Ok(S::from_row(row))
    }

    /// Insert a copy of an existing value. Its `id` and `created_at` are
    /// ignored; the stored row gets fresh ones.
    #[inline]
    pub async fn create_from(&self, point: &S) -> Result<S> {
        self.create(&point.to_new_point()).await
    }

    /// Insert all points in one transaction. Either every row is committed or
    /// none is; the result keeps the input order.
    #[inline]
    pub async fn create_batch(&self, points: &[NewPoint]) -> Result<Vec<S>> {
        if points.is_empty() {
            return Ok(Vec::new());
        }

        for (position, point) in points.iter().enumerate() {
            point.validate(self.settings).map_err(|e| match e {
                PerfError::Validation(message) => {
                    PerfError::Validation(format!("point #{}: {}", position, message))
                }
                other => other,
            })?;
        }

        let mut tx = self.pool.begin().await?;
        let mut created = Vec::with_capacity(points.len());
        for point in points {
            let row = self.insert_row(&mut tx, point).await?;
            created.push(S::from_row(row));
        }
        tx.commit().await?;

        info!("Created {} points in one batch", created.len());
        Ok(created)
    }

    /// Apply a partial update.
    ///
    /// The attribute set is the present fields of `point` merged with
    /// `overrides`, overrides winning. An empty set is
    /// [`PerfError::InvalidArgument`]; a missing row is [`PerfError::NotFound`].
    #[inline]
    pub async fn update(
        &self,
        id: i64,
        point: Option<&S>,
        overrides: Option<PointUpdate>,
    ) -> Result<S> {
        check_id(id)?;

        let base = point.map(PointSchema::to_update).unwrap_or_default();
        let changes = base.merge(overrides.unwrap_or_default());
        if changes.is_empty() {
            return Err(PerfError::InvalidArgument(
                "No attributes provided to update".to_string(),
            ));
        }
        changes.validate(self.settings)?;

        let mut tx = self.pool.begin().await?;
        if self.fetch_row(&mut tx, id, true).await?.is_none() {
            return Err(not_found(id));
        }

        let mut query = build_update_query(&self.table(), id, &changes);
        let row: PointRow = query.build_query_as().fetch_one(&mut *tx).await?;
        tx.commit().await?;

        debug!("Updated point {}", id);
        Ok(S::from_row(row))
    }

    /// Physically delete a point. A missing row returns `Ok(false)` when
    /// `not_found_ok`, otherwise [`PerfError::NotFound`].
    #[inline]
    pub async fn delete(&self, id: i64, not_found_ok: bool) -> Result<bool> {
        check_id(id)?;

        let sql = format!("DELETE FROM {} WHERE id = $1", self.table());
        let mut tx = self.pool.begin().await?;
        let deleted = sqlx::query(&sql)
            .bind(id)
            .execute(&mut *tx)
            .await?
            .rows_affected();
        tx.commit().await?;

        if deleted > 0 {
            debug!("Deleted point {}", id);
            Ok(true)
        } else if not_found_ok {
            Ok(false)
        } else {
            Err(not_found(id))
        }
    }

    async fn fetch_row(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        id: i64,
        for_update: bool,
    ) -> Result<Option<PointRow>> {
        let sql = format!(
            "SELECT {} FROM {} WHERE id = $1{}",
            POINT_COLUMNS,
            self.table(),
            if for_update { " FOR UPDATE" } else { "" }
        );

        let row = sqlx::query_as::<_, PointRow>(&sql)
            .bind(id)
            .fetch_optional(&mut **tx)
            .await?;
        Ok(row)
    }

    async fn insert_row(
        &self,
        tx: &mut Transaction<'_, Postgres>,
        point: &NewPoint,
    ) -> Result<PointRow> {
        let sql = format!(
            "INSERT INTO {} (text, model, embedding) VALUES ($1, $2, $3) RETURNING {}",
            self.table(),
            POINT_COLUMNS
        );

        let row = sqlx::query_as::<_, PointRow>(&sql)
            .bind(&point.text)
            .bind(point.model_or_default())
            .bind(Vector::from(point.embedding.clone()))
            .fetch_one(&mut **tx)
            .await?;
        Ok(row)
    }
}

fn check_id(id: i64) -> Result<()> {
    if id <= 0 {
        return Err(PerfError::InvalidArgument(format!(
            "point id must be a positive integer, got {}",
            id
        )));
    }
    Ok(())
}

fn not_found(id: i64) -> PerfError {
    PerfError::NotFound(format!("No point found with ID: {}", id))
}

/// Escape `%`, `_` and `\` so the value matches literally inside ILIKE.
pub(crate) fn escape_like(value: &str) -> String {
    let mut escaped = String::with_capacity(value.len());
    for c in value.chars() {
        if matches!(c, '%' | '_' | '\\') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

pub(crate) fn build_list_query<'q>(
    table: &str,
    options: &'q ListOptions,
) -> QueryBuilder<'q, Postgres> {
    let mut query =
        QueryBuilder::<Postgres>::new(format!("SELECT {} FROM {}", POINT_COLUMNS, table));

    let mut has_where = false;
    if let Some(model) = &options.model {
        query.push(" WHERE model = ").push_bind(model.as_str());
        has_where = true;
    }
    if let Some(text) = &options.text {
        query
            .push(if has_where { " AND " } else { " WHERE " })
            .push("text ILIKE ")
            .push_bind(format!("%{}%", escape_like(text)));
    }

    let direction = if options.sort_desc { "DESC" } else { "ASC" };
    query.push(format!(
        " ORDER BY created_at {dir}, id {dir}",
        dir = direction
    ));

    if let Some(limit) = options.limit {
        query.push(" LIMIT ").push_bind(limit.max(0));
    }
    if let Some(offset) = options.offset {
        query.push(" OFFSET ").push_bind(offset.max(0));
    }

    query
}

pub(crate) fn build_update_query<'q>(
    table: &str,
    id: i64,
    changes: &'q PointUpdate,
) -> QueryBuilder<'q, Postgres> {
    let mut query = QueryBuilder::<Postgres>::new(format!("UPDATE {} SET ", table));

    let mut assignments = query.separated(", ");
    if let Some(text) = &changes.text {
        assignments.push("text = ").push_bind_unseparated(text.as_str());
    }
    if let Some(model) = &changes.model {
        assignments.push("model = ").push_bind_unseparated(model.as_str());
    }
    if let Some(embedding) = &changes.embedding {
        assignments
            .push("embedding = ")
            .push_bind_unseparated(Vector::from(embedding.clone()));
    }

    query.push(" WHERE id = ").push_bind(id);
    query.push(format!(" RETURNING {}", POINT_COLUMNS));
    query
}
