//! The store contract every backend implements.

use async_trait::async_trait;
use serde_json::Value;

use crate::error::StorageError;
use crate::query::{Aggregate, FilterNode, RawQueryResult, Row, StoreQuery};
use crate::sql::Dialect;

/// A relational store holding one table per multi-entry collection plus the shared
/// single-entry table.
///
/// Implementations must be thread-safe (`Send + Sync`). Tables are created outside this
/// layer; a backend may create missing tables lazily.
///
/// # Example
///
/// ```ignore
/// use vellum_storage::{FilterNode, Operator, Store, StoreQuery};
///
/// async fn cheap_products(store: &dyn Store) -> Result<u64, StorageError> {
///     let query = StoreQuery::new("products").with_filter(FilterNode::And(vec![
///         FilterNode::condition("price", Operator::Lt, json!(10)),
///     ]));
///     store.count(&query).await
/// }
/// ```
#[async_trait]
pub trait Store: Send + Sync {
    /// Rows matching the query, projected, ordered, grouped and paginated.
    async fn select(&self, query: &StoreQuery) -> Result<Vec<Row>, StorageError>;

    /// Number of rows matching the query filter. Order and pagination are ignored.
    async fn count(&self, query: &StoreQuery) -> Result<u64, StorageError>;

    /// Aggregate of `column` over the rows matching the query filter; null when none match.
    async fn aggregate(
        &self,
        query: &StoreQuery,
        function: Aggregate,
        column: &str,
    ) -> Result<Value, StorageError>;

    /// Inserts a row and returns it as stored, including a generated `id`.
    ///
    /// # Errors
    ///
    /// Returns `StorageError::UniqueViolation` when a unique constraint rejects the row.
    async fn insert(&self, table: &str, values: &Row) -> Result<Row, StorageError>;

    /// Sets `values` on every row matching `filter`; returns the number of affected rows.
    async fn update(
        &self,
        table: &str,
        filter: &FilterNode,
        values: &Row,
    ) -> Result<u64, StorageError>;

    /// Deletes every row matching `filter`; returns the number of affected rows.
    async fn delete(&self, table: &str, filter: &FilterNode) -> Result<u64, StorageError>;

    /// Executes caller-supplied SQL with positional replacements.
    async fn raw_query(
        &self,
        sql: &str,
        replacements: &[Value],
    ) -> Result<RawQueryResult, StorageError>;

    /// SQL dialect of the backend, `None` for stores that do not speak SQL.
    fn dialect(&self) -> Option<Dialect>;

    /// Returns the backend name for logging.
    fn backend_name(&self) -> &'static str;
}
