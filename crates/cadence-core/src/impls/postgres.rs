//! Postgres persistence provider (sqlx).
//!
//! Each collection is a JSONB document table:
//!
//! ```sql
//! CREATE TABLE resource_groups (id TEXT PRIMARY KEY, document JSONB NOT NULL);
//! ```
//!
//! A claim is two statements: select the best candidate, then a
//! compare-and-set `UPDATE` that only succeeds while the schedule field still
//! holds the value that was read. Of two racing claimants exactly one update
//! matches a row; the other sees zero rows affected (claim lost) and reports
//! "no candidate".
//!
//! Schedule writes build missing parent objects of a dotted field path
//! explicitly (`jsonb_set` alone only creates the last key) and check the
//! written value through `RETURNING`, so a claim never reports success
//! without having moved the schedule.

use std::time::Duration;

use async_trait::async_trait;
use serde_json::Value;
use sqlx::postgres::{PgPool, PgPoolOptions, PgRow};
use sqlx::{Postgres, QueryBuilder, Row};
use tracing::{debug, info, instrument};

use crate::config::DatabaseSettings;
use crate::domain::filter::Filter;
use crate::domain::iterable::{lookup, schedule_from_document};
use crate::domain::schedule::{EpochMillis, Schedule, SchedulingPolicy};
use crate::domain::{PersistentIterable, ProviderError};
use crate::ports::{CandidateQuery, PersistenceProvider, ScheduleSwap};

/// Quoted table name for a collection. Only `[A-Za-z_][A-Za-z0-9_]*` is accepted.
fn table_name(collection: &str) -> Result<String, ProviderError> {
    let mut chars = collection.chars();
    let valid_head = chars
        .next()
        .is_some_and(|c| c.is_ascii_alphabetic() || c == '_');
    let valid_tail = chars.all(|c| c.is_ascii_alphanumeric() || c == '_');
    if valid_head && valid_tail {
        Ok(format!("\"{collection}\""))
    } else {
        Err(ProviderError::InvalidCollection(collection.to_string()))
    }
}

/// Dotted field path as a Postgres `text[]` path.
fn field_path(field_name: &str) -> Result<Vec<String>, ProviderError> {
    let path: Vec<String> = field_name.split('.').map(str::to_string).collect();
    if path.iter().any(String::is_empty) {
        return Err(ProviderError::InvalidField(field_name.to_string()));
    }
    Ok(path)
}

/// Earliest value of a schedule field: the number itself, or the smallest
/// element of the list (stored lists are not required to be sorted). NULL
/// when absent, `null` or empty.
fn push_earliest(builder: &mut QueryBuilder<'static, Postgres>, path: &[String]) {
    builder.push("(CASE jsonb_typeof(document #> ");
    builder.push_bind(path.to_vec());
    builder.push(") WHEN 'number' THEN (document #>> ");
    builder.push_bind(path.to_vec());
    builder.push(")::bigint WHEN 'array' THEN (SELECT min(e.v::bigint) FROM ");
    builder.push("jsonb_array_elements_text(document #> ");
    builder.push_bind(path.to_vec());
    builder.push(") AS e(v)) END)");
}

/// `document` with `value` set at `path`, creating missing parent objects.
///
/// `["a", "b"]` renders as
/// `jsonb_set(jsonb_set(document, '{a}', COALESCE(document #> '{a}', '{}'), true), '{a,b}', value, true)`.
fn push_set_field(builder: &mut QueryBuilder<'static, Postgres>, path: &[String], value: Value) {
    for _ in path {
        builder.push("jsonb_set(");
    }
    builder.push("document");
    for depth in 1..path.len() {
        let parent = path[..depth].to_vec();
        builder.push(", ");
        builder.push_bind(parent.clone());
        builder.push(", COALESCE(document #> ");
        builder.push_bind(parent);
        builder.push(", '{}'::jsonb), true)");
    }
    builder.push(", ");
    builder.push_bind(path.to_vec());
    builder.push(", ");
    builder.push_bind(value);
    builder.push(", true)");
}

fn push_due(builder: &mut QueryBuilder<'static, Postgres>, path: &[String], as_of: EpochMillis) {
    builder.push("(COALESCE(jsonb_typeof(document #> ");
    builder.push_bind(path.to_vec());
    builder.push("), 'null') = 'null' OR ");
    push_earliest(builder, path);
    builder.push(" < ");
    builder.push_bind(as_of);
    builder.push(")");
}

/// Renders a filter as a SQL predicate over the `document` column.
fn push_filter(
    builder: &mut QueryBuilder<'static, Postgres>,
    filter: &Filter,
) -> Result<(), ProviderError> {
    match filter {
        Filter::Eq(field, value) => {
            builder.push("(document #> ");
            builder.push_bind(field_path(field)?);
            builder.push(") = ");
            builder.push_bind(value.clone());
        }
        Filter::Ne(field, value) => {
            builder.push("(document #> ");
            builder.push_bind(field_path(field)?);
            builder.push(") IS DISTINCT FROM ");
            builder.push_bind(value.clone());
        }
        Filter::In(field, values) => {
            if values.is_empty() {
                builder.push("FALSE");
                return Ok(());
            }
            builder.push("(document #> ");
            builder.push_bind(field_path(field)?);
            builder.push(") IN (");
            let mut separated = builder.separated(", ");
            for value in values {
                separated.push_bind(value.clone());
            }
            builder.push(")");
        }
        Filter::Exists(field) => {
            builder.push("(document #> ");
            builder.push_bind(field_path(field)?);
            builder.push(") IS NOT NULL");
        }
        Filter::NotExists(field) => {
            builder.push("(document #> ");
            builder.push_bind(field_path(field)?);
            builder.push(") IS NULL");
        }
        Filter::And(filters) | Filter::Or(filters) => {
            let (joiner, empty) = if matches!(filter, Filter::And(_)) {
                (" AND ", "TRUE")
            } else {
                (" OR ", "FALSE")
            };
            if filters.is_empty() {
                builder.push(empty);
                return Ok(());
            }
            builder.push("(");
            for (index, inner) in filters.iter().enumerate() {
                if index > 0 {
                    builder.push(joiner);
                }
                push_filter(builder, inner)?;
            }
            builder.push(")");
        }
        Filter::Not(inner) => {
            builder.push("NOT (");
            push_filter(builder, inner)?;
            builder.push(")");
        }
    }
    Ok(())
}

/// `SELECT id, document ...` for a candidate query.
fn candidate_select(
    query: &CandidateQuery,
    limit: usize,
) -> Result<QueryBuilder<'static, Postgres>, ProviderError> {
    let table = table_name(query.collection)?;
    let path = field_path(&query.field_name)?;

    let mut builder = QueryBuilder::new(format!("SELECT id, document FROM {table} WHERE TRUE"));
    if let Some(as_of) = query.as_of {
        builder.push(" AND ");
        push_due(&mut builder, &path, as_of);
    }
    if let Some(filter) = &query.filter {
        builder.push(" AND ");
        push_filter(&mut builder, filter)?;
    }
    builder.push(" ORDER BY ");
    push_earliest(&mut builder, &path);
    builder.push(" ASC NULLS FIRST, id ASC LIMIT ");
    builder.push_bind(i64::try_from(limit).unwrap_or(i64::MAX));
    Ok(builder)
}

fn push_returning_written(builder: &mut QueryBuilder<'static, Postgres>, path: &[String]) {
    builder.push(" RETURNING document #> ");
    builder.push_bind(path.to_vec());
    builder.push(" AS written");
}

fn decode_row<T: PersistentIterable>(row: &PgRow) -> Result<(String, Value, T), ProviderError> {
    let id: String = row.try_get("id")?;
    let document: Value = row.try_get("document")?;
    let entity = serde_json::from_value(document.clone()).map_err(|e| ProviderError::Decode {
        collection: T::COLLECTION.to_string(),
        id: id.clone(),
        reason: e.to_string(),
    })?;
    Ok((id, document, entity))
}

fn encode_schedule(schedule: &Schedule) -> Result<Value, ProviderError> {
    serde_json::to_value(schedule).map_err(|e| ProviderError::Encode(e.to_string()))
}

/// Fails when an update matched its row but the schedule did not land at
/// `field_name` (a parent on the path holds a non-object value).
fn check_written(row: &PgRow, field_name: &str, expected: &Value) -> Result<(), ProviderError> {
    let written: Option<Value> = row.try_get("written")?;
    if written.as_ref() == Some(expected) {
        Ok(())
    } else {
        Err(ProviderError::InvalidField(field_name.to_string()))
    }
}

/// Provider backed by a Postgres connection pool.
#[derive(Debug, Clone)]
pub struct PgPersistenceProvider {
    pool: PgPool,
}

impl PgPersistenceProvider {
    pub fn new(pool: PgPool) -> Self {
        Self { pool }
    }

    /// Opens a connection pool.
    ///
    /// # Errors
    /// `ProviderError::Unavailable` if no connection can be established.
    #[instrument(skip(settings), fields(max_connections = settings.max_connections))]
    pub async fn connect(settings: &DatabaseSettings) -> Result<Self, ProviderError> {
        info!("Initializing database connection pool");

        let pool = PgPoolOptions::new()
            .max_connections(settings.max_connections)
            .min_connections(settings.min_connections)
            .acquire_timeout(Duration::from_millis(settings.connect_timeout_ms))
            .connect(&settings.url)
            .await
            .map_err(|e| {
                tracing::error!(error = %e, "Failed to create database pool");
                ProviderError::Unavailable(e.to_string())
            })?;

        Ok(Self { pool })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    #[instrument(skip(self))]
    pub async fn health_check(&self) -> Result<(), ProviderError> {
        sqlx::query("SELECT 1").execute(&self.pool).await?;
        debug!("Database health check passed");
        Ok(())
    }

    /// Creates the document table of `T` if it does not exist yet.
    pub async fn ensure_collection<T: PersistentIterable>(&self) -> Result<(), ProviderError> {
        let table = table_name(T::COLLECTION)?;
        sqlx::query(&format!(
            "CREATE TABLE IF NOT EXISTS {table} (id TEXT PRIMARY KEY, document JSONB NOT NULL)"
        ))
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Inserts or replaces an entity document.
    pub async fn upsert<T: PersistentIterable>(&self, entity: &T) -> Result<(), ProviderError> {
        let table = table_name(T::COLLECTION)?;
        let document =
            serde_json::to_value(entity).map_err(|e| ProviderError::Encode(e.to_string()))?;
        sqlx::query(&format!(
            "INSERT INTO {table} (id, document) VALUES ($1, $2) \
             ON CONFLICT (id) DO UPDATE SET document = EXCLUDED.document"
        ))
        .bind(entity.uuid())
        .bind(document)
        .execute(&self.pool)
        .await?;
        Ok(())
    }
}

#[async_trait]
impl<T: PersistentIterable> PersistenceProvider<T> for PgPersistenceProvider {
    #[instrument(skip(self, query), fields(collection = query.collection))]
    async fn list_candidates(
        &self,
        query: &CandidateQuery,
        limit: usize,
    ) -> Result<Vec<T>, ProviderError> {
        let mut select = candidate_select(query, limit)?;
        let rows = select.build().fetch_all(&self.pool).await?;
        rows.iter()
            .map(|row| decode_row::<T>(row).map(|(_, _, entity)| entity))
            .collect()
    }

    #[instrument(skip(self, policy, filter), fields(collection = T::COLLECTION))]
    async fn claim_next(
        &self,
        base: EpochMillis,
        policy: &SchedulingPolicy,
        field_name: &str,
        filter: Option<&Filter>,
    ) -> Result<Option<T>, ProviderError> {
        let query = CandidateQuery::new(T::COLLECTION, field_name)
            .with_filter(filter.cloned())
            .as_of(Some(base));
        let mut select = candidate_select(&query, 1)?;
        let Some(row) = select.build().fetch_optional(&self.pool).await? else {
            return Ok(None);
        };

        let id: String = row.try_get("id")?;
        let document: Value = row.try_get("document")?;
        let prior = lookup(&document, field_name).cloned();
        let current = schedule_from_document(&document, field_name);
        let next = encode_schedule(&policy.advance(current.as_ref(), base))?;

        let table = table_name(T::COLLECTION)?;
        let path = field_path(field_name)?;
        let mut update = QueryBuilder::new(format!("UPDATE {table} SET document = "));
        push_set_field(&mut update, &path, next.clone());
        update.push(" WHERE id = ");
        update.push_bind(id.clone());
        update.push(" AND (document #> ");
        update.push_bind(path.clone());
        update.push(") IS NOT DISTINCT FROM ");
        update.push_bind(prior);
        push_returning_written(&mut update, &path);

        let Some(updated) = update.build().fetch_optional(&self.pool).await? else {
            debug!(entity_id = %id, "claim lost to another claimant");
            return Ok(None);
        };
        check_written(&updated, field_name, &next)?;

        serde_json::from_value(document)
            .map(Some)
            .map_err(|e| ProviderError::Decode {
                collection: T::COLLECTION.to_string(),
                id,
                reason: e.to_string(),
            })
    }

    #[instrument(skip(self, entity, schedule), fields(collection = T::COLLECTION, entity_id = %entity.uuid()))]
    async fn update_entity_field(
        &self,
        entity: &T,
        schedule: Option<Schedule>,
        field_name: &str,
    ) -> Result<(), ProviderError> {
        let table = table_name(T::COLLECTION)?;
        let path = field_path(field_name)?;
        match schedule {
            Some(schedule) => {
                let value = encode_schedule(&schedule)?;
                let mut update = QueryBuilder::new(format!("UPDATE {table} SET document = "));
                push_set_field(&mut update, &path, value.clone());
                update.push(" WHERE id = ");
                update.push_bind(entity.uuid().to_string());
                push_returning_written(&mut update, &path);

                // no row: the entity was deleted and is not resurrected
                if let Some(updated) = update.build().fetch_optional(&self.pool).await? {
                    check_written(&updated, field_name, &value)?;
                }
            }
            None => {
                sqlx::query(&format!(
                    "UPDATE {table} SET document = document #- $1 WHERE id = $2"
                ))
                .bind(path)
                .bind(entity.uuid())
                .execute(&self.pool)
                .await?;
            }
        }
        Ok(())
    }

    #[instrument(skip(self, entity, expected, replacement), fields(collection = T::COLLECTION, entity_id = %entity.uuid()))]
    async fn replace_entity_field(
        &self,
        entity: &T,
        expected: &Schedule,
        replacement: Schedule,
        field_name: &str,
    ) -> Result<ScheduleSwap, ProviderError> {
        let table = table_name(T::COLLECTION)?;
        let path = field_path(field_name)?;
        let value = encode_schedule(&replacement)?;

        let mut update = QueryBuilder::new(format!("UPDATE {table} SET document = "));
        push_set_field(&mut update, &path, value.clone());
        update.push(" WHERE id = ");
        update.push_bind(entity.uuid().to_string());
        update.push(" AND (document #> ");
        update.push_bind(path.clone());
        update.push(") = ");
        update.push_bind(encode_schedule(expected)?);
        push_returning_written(&mut update, &path);

        if let Some(updated) = update.build().fetch_optional(&self.pool).await? {
            check_written(&updated, field_name, &value)?;
            return Ok(ScheduleSwap::Replaced);
        }

        let row = sqlx::query(&format!("SELECT document FROM {table} WHERE id = $1"))
            .bind(entity.uuid())
            .fetch_optional(&self.pool)
            .await?;
        let current = match row {
            Some(row) => {
                let document: Value = row.try_get("document")?;
                schedule_from_document(&document, field_name)
            }
            None => None,
        };
        Ok(ScheduleSwap::Conflict { current })
    }

    #[instrument(skip(self, filter), fields(collection = T::COLLECTION))]
    async fn find_one(
        &self,
        field_name: &str,
        filter: Option<&Filter>,
    ) -> Result<Option<T>, ProviderError> {
        let query = CandidateQuery::new(T::COLLECTION, field_name).with_filter(filter.cloned());
        let mut select = candidate_select(&query, 1)?;
        let row = select.build().fetch_optional(&self.pool).await?;
        row.as_ref()
            .map(|row| decode_row::<T>(row).map(|(_, _, entity)| entity))
            .transpose()
    }

    #[instrument(skip(self), fields(collection = T::COLLECTION))]
    async fn recover_after_pause(
        &self,
        field_name: &str,
        as_of: EpochMillis,
    ) -> Result<u64, ProviderError> {
        let table = table_name(T::COLLECTION)?;
        let path = field_path(field_name)?;
        let result = sqlx::query(&format!(
            "UPDATE {table} SET document = jsonb_set(document, $1, to_jsonb($2::bigint), true) \
             WHERE jsonb_typeof(document #> $1) = 'number' AND (document #>> $1)::bigint < $2"
        ))
        .bind(path)
        .bind(as_of)
        .execute(&self.pool)
        .await?;
        Ok(result.rows_affected())
    }
}
