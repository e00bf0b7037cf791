//! PostgreSQL implementation of the [`Store`] trait.

use std::sync::Arc;

use async_trait::async_trait;
use serde_json::{Value, json};
use sqlx_core::query::{Query, query};
use sqlx_core::query_as::query_as;
use sqlx_postgres::{PgArguments, PgPool, Postgres};
use tracing::{debug, instrument, warn};
use vellum_core::{CollectionRegistry, FieldTypeRegistry};
use vellum_storage::{
    Aggregate, BuiltQuery, ConnectionSlot, Dialect, FilterNode, RawQueryResult, Row,
    SlotStatus, SqlBuilder, SqlValue, StorageError, StorageResult, Store, StoreQuery,
};

use crate::config::PostgresConfig;
use crate::error::{PostgresError, Result};
use crate::pool::create_pool;
use crate::schema::SchemaManager;

const DIALECT: Dialect = Dialect::Postgres;

type PgQuery<'q> = Query<'q, Postgres, PgArguments>;

fn bind_params<'q>(mut statement: PgQuery<'q>, params: &'q [SqlValue]) -> PgQuery<'q> {
    for param in params {
        statement = match param {
            SqlValue::Text(s) | SqlValue::Json(s) => statement.bind(s.as_str()),
            SqlValue::Integer(i) => statement.bind(*i),
            SqlValue::Float(f) => statement.bind(*f),
            SqlValue::Boolean(b) => statement.bind(*b),
            SqlValue::Null => statement.bind(None::<String>),
        };
    }
    statement
}

/// Wraps a row-returning statement so every row comes back as one JSON text column.
fn json_rows_sql(sql: &str) -> String {
    if sql.starts_with("INSERT") {
        format!("WITH t AS ({sql}) SELECT row_to_json(t)::text FROM t")
    } else {
        format!("SELECT row_to_json(t)::text FROM ({sql}) t")
    }
}

fn decode_row(text: &str) -> Result<Row> {
    match serde_json::from_str(text)? {
        Value::Object(row) => Ok(row),
        other => Err(PostgresError::schema(format!("expected a row object, got {other}"))),
    }
}

/// Store backed by a lazily-connected PostgreSQL pool.
#[derive(Debug)]
pub struct PostgresStore {
    config: PostgresConfig,
    pool: ConnectionSlot<PgPool>,
    schema: ConnectionSlot<SchemaManager>,
}

impl PostgresStore {
    /// Creates a store that connects on first use.
    #[must_use]
    pub fn new(config: PostgresConfig) -> Self {
        Self {
            config,
            pool: ConnectionSlot::new(),
            schema: ConnectionSlot::new(),
        }
    }

    /// Creates a store around an existing pool.
    #[must_use]
    pub fn from_pool(pool: PgPool, config: PostgresConfig) -> Self {
        Self {
            config,
            schema: ConnectionSlot::ready(SchemaManager::new(pool.clone())),
            pool: ConnectionSlot::ready(pool),
        }
    }

    pub fn config(&self) -> &PostgresConfig {
        &self.config
    }

    pub fn connection_status(&self) -> SlotStatus {
        self.pool.status()
    }

    async fn pool(&self) -> StorageResult<Arc<PgPool>> {
        self.pool
            .get_or_init(|| create_pool(&self.config))
            .await
            .map_err(StorageError::from)
    }

    async fn schema(&self) -> StorageResult<Arc<SchemaManager>> {
        let pool = self.pool().await?;
        self.schema
            .get_or_init(|| async move { Ok::<_, PostgresError>(SchemaManager::new((*pool).clone())) })
            .await
            .map_err(StorageError::from)
    }

    /// Creates or extends the tables of every registered collection.
    #[instrument(skip(self, registry, field_types))]
    pub async fn sync_collections(
        &self,
        registry: &CollectionRegistry,
        field_types: &FieldTypeRegistry,
    ) -> StorageResult<()> {
        let schema = self.schema().await?;
        for name in registry.names() {
            let collection = registry
                .get(name)
                .ok_or_else(|| StorageError::internal(format!("collection '{name}' vanished")))?;
            schema
                .sync_collection(&collection, field_types)
                .await
                .map_err(|e| e.into_storage(collection.table_name()))?;
        }
        Ok(())
    }

    /// Drops the pool when the connection itself failed so the next call reconnects.
    fn observe(&self, err: PostgresError, table: &str) -> StorageError {
        let err = err.into_storage(table);
        if matches!(err, StorageError::ConnectionError { .. }) {
            warn!(table, error = %err, "PostgreSQL connection lost, resetting pool");
            self.pool.reset();
            self.schema.reset();
        }
        err
    }

    async fn fetch_rows(
        &self,
        table: &str,
        built: &BuiltQuery,
    ) -> StorageResult<Vec<Row>> {
        let pool = self.pool().await?;
        let sql = json_rows_sql(&built.sql);
        debug!(sql = %sql, params = built.params.len(), "Executing row query");

        let mut rows_query = query_as::<_, (String,)>(&sql);
        for param in &built.params {
            rows_query = match param {
                SqlValue::Text(s) | SqlValue::Json(s) => rows_query.bind(s.as_str()),
                SqlValue::Integer(i) => rows_query.bind(*i),
                SqlValue::Float(f) => rows_query.bind(*f),
                SqlValue::Boolean(b) => rows_query.bind(*b),
                SqlValue::Null => rows_query.bind(None::<String>),
            };
        }
        let texts = rows_query
            .fetch_all(&*pool)
            .await
            .map_err(|e| self.observe(e.into(), table))?;

        texts
            .iter()
            .map(|(text,)| decode_row(text).map_err(|e| self.observe(e, table)))
            .collect()
    }

    async fn execute(
        &self,
        table: &str,
        built: &BuiltQuery,
    ) -> StorageResult<u64> {
        let pool = self.pool().await?;
        debug!(sql = %built.sql, params = built.params.len(), "Executing statement");
        let result = bind_params(query(&built.sql), &built.params)
            .execute(&*pool)
            .await
            .map_err(|e| self.observe(e.into(), table))?;
        Ok(result.rows_affected())
    }
}

#[async_trait]
impl Store for PostgresStore {
    #[instrument(skip(self, query), fields(table = %query.table))]
    async fn select(&self, query: &StoreQuery) -> StorageResult<Vec<Row>> {
        let built = SqlBuilder::build_select(DIALECT, query)?;
        self.fetch_rows(&query.table, &built).await
    }

    #[instrument(skip(self, query), fields(table = %query.table))]
    async fn count(&self, query: &StoreQuery) -> StorageResult<u64> {
        let built = SqlBuilder::build_count(DIALECT, query)?;
        let rows = self.fetch_rows(&query.table, &built).await?;
        let count = rows
            .first()
            .and_then(|row| row.get("count"))
            .and_then(Value::as_u64)
            .unwrap_or(0);
        Ok(count)
    }

    #[instrument(skip(self, query), fields(table = %query.table))]
    async fn aggregate(
        &self,
        query: &StoreQuery,
        function: Aggregate,
        column: &str,
    ) -> StorageResult<Value> {
        let built = SqlBuilder::build_aggregate(DIALECT, query, function, column)?;
        let rows = self.fetch_rows(&query.table, &built).await?;
        Ok(rows
            .into_iter()
            .next()
            .and_then(|mut row| row.remove("value"))
            .unwrap_or(Value::Null))
    }

    #[instrument(skip(self, values))]
    async fn insert(&self, table: &str, values: &Row) -> StorageResult<Row> {
        let built = SqlBuilder::build_insert(DIALECT, table, values);
        self.fetch_rows(table, &built)
            .await?
            .into_iter()
            .next()
            .ok_or_else(|| StorageError::internal(format!("insert into {table} returned no row")))
    }

    #[instrument(skip(self, filter, values))]
    async fn update(
        &self,
        table: &str,
        filter: &FilterNode,
        values: &Row,
    ) -> StorageResult<u64> {
        let built = SqlBuilder::build_update(DIALECT, table, filter, values)?;
        self.execute(table, &built).await
    }

    #[instrument(skip(self, filter))]
    async fn delete(&self, table: &str, filter: &FilterNode) -> StorageResult<u64> {
        let built = SqlBuilder::build_delete(DIALECT, table, filter)?;
        self.execute(table, &built).await
    }

    /// Only row-returning statements are supported; each row is returned as an object.
    #[instrument(skip(self, replacements))]
    async fn raw_query(
        &self,
        sql: &str,
        replacements: &[Value],
    ) -> StorageResult<RawQueryResult> {
        let built = BuiltQuery {
            sql: sql.trim().trim_end_matches(';').to_string(),
            params: replacements.iter().map(SqlValue::from_json).collect(),
        };
        let results = self.fetch_rows("raw", &built).await?;
        let metadata = json!({ "rowCount": results.len() });
        Ok(RawQueryResult { results, metadata })
    }

    fn dialect(&self) -> Option<Dialect> {
        Some(DIALECT)
    }

    fn backend_name(&self) -> &'static str {
        "postgres"
    }
}
