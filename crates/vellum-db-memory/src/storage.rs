use async_trait::async_trait;
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};
use std::sync::atomic::{AtomicU64, Ordering as AtomicOrdering};
use tokio::sync::RwLock;
use tracing::{debug, instrument};
use vellum_storage::{
    Aggregate, Dialect, FilterNode, RawQueryResult, Row, StorageError, Store, StoreQuery,
};

use crate::query::{compare_rows, compare_values, matches};

#[derive(Debug, Default)]
struct Table {
    rows: Vec<Row>,
    next_id: u64,
}

/// Number of store calls per kind, for asserting cache behavior in tests.
#[derive(Debug, Default)]
pub struct StoreCounters {
    selects: AtomicU64,
    counts: AtomicU64,
    aggregates: AtomicU64,
    inserts: AtomicU64,
    updates: AtomicU64,
    deletes: AtomicU64,
}

impl StoreCounters {
    pub fn selects(&self) -> u64 {
        self.selects.load(AtomicOrdering::SeqCst)
    }

    pub fn counts(&self) -> u64 {
        self.counts.load(AtomicOrdering::SeqCst)
    }

    pub fn aggregates(&self) -> u64 {
        self.aggregates.load(AtomicOrdering::SeqCst)
    }

    pub fn inserts(&self) -> u64 {
        self.inserts.load(AtomicOrdering::SeqCst)
    }

    pub fn updates(&self) -> u64 {
        self.updates.load(AtomicOrdering::SeqCst)
    }

    pub fn deletes(&self) -> u64 {
        self.deletes.load(AtomicOrdering::SeqCst)
    }

    /// Every read call: selects, counts and aggregates.
    pub fn reads(&self) -> u64 {
        self.selects() + self.counts() + self.aggregates()
    }

    pub fn reset(&self) {
        for counter in [
            &self.selects,
            &self.counts,
            &self.aggregates,
            &self.inserts,
            &self.updates,
            &self.deletes,
        ] {
            counter.store(0, AtomicOrdering::SeqCst);
        }
    }

    fn bump(counter: &AtomicU64) {
        counter.fetch_add(1, AtomicOrdering::SeqCst);
    }
}

/// In-memory store backend.
///
/// Tables are created on first write. Rows receive an auto-incremented `id` unless the
/// inserted values carry one. Unique column sets can be declared per table with
/// [`with_unique`](Self::with_unique).
#[derive(Debug, Default)]
pub struct InMemoryStore {
    tables: RwLock<HashMap<String, Table>>,
    unique: HashMap<String, Vec<Vec<String>>>,
    counters: StoreCounters,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Declares a unique constraint over `columns` of `table`.
    #[must_use]
    pub fn with_unique(mut self, table: &str, columns: &[&str]) -> Self {
        self.unique
            .entry(table.to_string())
            .or_default()
            .push(columns.iter().map(|c| c.to_string()).collect());
        self
    }

    pub fn counters(&self) -> &StoreCounters {
        &self.counters
    }

    /// Snapshot of every row of a table, in insertion order.
    pub async fn rows(&self, table: &str) -> Vec<Row> {
        let tables = self.tables.read().await;
        tables.get(table).map(|t| t.rows.clone()).unwrap_or_default()
    }

    fn check_unique(
        &self,
        table_name: &str,
        rows: &[Row],
        candidate: &Row,
        skip_index: Option<usize>,
    ) -> Result<(), StorageError> {
        let Some(constraints) = self.unique.get(table_name) else {
            return Ok(());
        };
        for columns in constraints {
            let values: Vec<&Value> = columns
                .iter()
                .map(|c| candidate.get(c).unwrap_or(&Value::Null))
                .collect();
            if values.iter().any(|v| v.is_null()) {
                continue;
            }
            let clash = rows.iter().enumerate().any(|(index, row)| {
                Some(index) != skip_index
                    && columns.iter().zip(&values).all(|(column, value)| {
                        row.get(column)
                            .is_some_and(|existing| compare_values(existing, value) == Some(Ordering::Equal))
                    })
            });
            if clash {
                return Err(StorageError::unique_violation(table_name, columns.join(", ")));
            }
        }
        Ok(())
    }

    async fn filtered(&self, query: &StoreQuery) -> Vec<Row> {
        let tables = self.tables.read().await;
        tables
            .get(&query.table)
            .map(|table| {
                table
                    .rows
                    .iter()
                    .filter(|row| matches(&query.filter, row))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default()
    }
}

fn group_rows(rows: Vec<Row>, group: &[String]) -> Vec<Row> {
    if group.is_empty() {
        return rows;
    }
    let mut seen = HashSet::new();
    rows.into_iter()
        .filter(|row| {
            let key: Vec<String> = group
                .iter()
                .map(|column| row.get(column).unwrap_or(&Value::Null).to_string())
                .collect();
            seen.insert(key)
        })
        .collect()
}

fn project(row: Row, columns: &[String]) -> Row {
    if columns.is_empty() {
        return row;
    }
    columns
        .iter()
        .map(|column| {
            (
                column.clone(),
                row.get(column).cloned().unwrap_or(Value::Null),
            )
        })
        .collect()
}

fn sum(values: &[&Value]) -> Value {
    if values.iter().all(|v| v.is_i64()) {
        return Value::from(values.iter().filter_map(|v| v.as_i64()).sum::<i64>());
    }
    let total: f64 = values.iter().filter_map(|v| v.as_f64()).sum();
    serde_json::Number::from_f64(total)
        .map(Value::Number)
        .unwrap_or(Value::Null)
}

#[async_trait]
impl Store for InMemoryStore {
    #[instrument(skip(self, query), fields(table = %query.table))]
    async fn select(&self, query: &StoreQuery) -> Result<Vec<Row>, StorageError> {
        StoreCounters::bump(&self.counters.selects);

        let mut rows = group_rows(self.filtered(query).await, &query.group);
        if !query.order.is_empty() {
            rows.sort_by(|a, b| compare_rows(a, b, &query.order));
        }

        let offset = query.offset.unwrap_or(0) as usize;
        let limit = query.limit.map(|l| l as usize).unwrap_or(usize::MAX);
        let rows: Vec<Row> = rows
            .into_iter()
            .skip(offset)
            .take(limit)
            .map(|row| project(row, &query.columns))
            .collect();

        debug!(rows = rows.len(), "select");
        Ok(rows)
    }

    async fn count(&self, query: &StoreQuery) -> Result<u64, StorageError> {
        StoreCounters::bump(&self.counters.counts);
        Ok(self.filtered(query).await.len() as u64)
    }

    async fn aggregate(
        &self,
        query: &StoreQuery,
        function: Aggregate,
        column: &str,
    ) -> Result<Value, StorageError> {
        StoreCounters::bump(&self.counters.aggregates);
        let rows = self.filtered(query).await;
        let values: Vec<&Value> = rows
            .iter()
            .filter_map(|row| row.get(column))
            .filter(|v| !v.is_null())
            .collect();
        if values.is_empty() {
            return Ok(Value::Null);
        }

        let pick = |wanted: Ordering| {
            values
                .iter()
                .copied()
                .reduce(|best, v| {
                    if compare_values(v, best) == Some(wanted) {
                        v
                    } else {
                        best
                    }
                })
                .cloned()
                .unwrap_or(Value::Null)
        };

        Ok(match function {
            Aggregate::Min => pick(Ordering::Less),
            Aggregate::Max => pick(Ordering::Greater),
            Aggregate::Sum => sum(&values),
        })
    }

    #[instrument(skip(self, values))]
    async fn insert(&self, table: &str, values: &Row) -> Result<Row, StorageError> {
        StoreCounters::bump(&self.counters.inserts);
        let mut tables = self.tables.write().await;
        let entry = tables.entry(table.to_string()).or_default();

        let mut row = values.clone();
        match row.get("id").and_then(Value::as_u64) {
            Some(id) => entry.next_id = entry.next_id.max(id),
            None => {
                entry.next_id += 1;
                row.insert("id".to_string(), Value::from(entry.next_id));
            }
        }

        self.check_unique(table, &entry.rows, &row, None)?;
        entry.rows.push(row.clone());
        debug!(id = ?row.get("id"), "inserted row");
        Ok(row)
    }

    #[instrument(skip(self, filter, values))]
    async fn update(
        &self,
        table: &str,
        filter: &FilterNode,
        values: &Row,
    ) -> Result<u64, StorageError> {
        StoreCounters::bump(&self.counters.updates);
        let mut tables = self.tables.write().await;
        let Some(entry) = tables.get_mut(table) else {
            return Ok(0);
        };

        let targets: Vec<usize> = entry
            .rows
            .iter()
            .enumerate()
            .filter(|(_, row)| matches(filter, row))
            .map(|(index, _)| index)
            .collect();

        // Constraints are checked against the whole post-update table before anything is written.
        let mut staged = entry.rows.clone();
        for index in &targets {
            for (column, value) in values {
                staged[*index].insert(column.clone(), value.clone());
            }
        }
        for index in &targets {
            self.check_unique(table, &staged, &staged[*index], Some(*index))?;
        }
        entry.rows = staged;

        Ok(targets.len() as u64)
    }

    #[instrument(skip(self, filter))]
    async fn delete(&self, table: &str, filter: &FilterNode) -> Result<u64, StorageError> {
        StoreCounters::bump(&self.counters.deletes);
        let mut tables = self.tables.write().await;
        let Some(entry) = tables.get_mut(table) else {
            return Ok(0);
        };
        let before = entry.rows.len();
        entry.rows.retain(|row| !matches(filter, row));
        Ok((before - entry.rows.len()) as u64)
    }

    async fn raw_query(
        &self,
        _sql: &str,
        _replacements: &[Value],
    ) -> Result<RawQueryResult, StorageError> {
        Err(StorageError::unsupported(self.backend_name(), "raw_query"))
    }

    fn dialect(&self) -> Option<Dialect> {
        None
    }

    fn backend_name(&self) -> &'static str {
        "memory"
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use vellum_storage::{Operator, SortDirection, SortKey};

    fn row(value: Value) -> Row {
        value.as_object().cloned().unwrap_or_default()
    }

    async fn seeded() -> InMemoryStore {
        let store = InMemoryStore::new();
        for (name, price) in [("Lamp", 50), ("Desk", 200), ("Chair", 120), ("Mat", 20)] {
            store
                .insert("products", &row(json!({ "name": name, "price": price })))
                .await
                .unwrap();
        }
        store
    }

    #[tokio::test]
    async fn test_insert_assigns_ids() {
        let store = seeded().await;
        let rows = store.rows("products").await;
        let ids: Vec<Value> = rows.iter().map(|r| r["id"].clone()).collect();
        assert_eq!(ids, vec![json!(1), json!(2), json!(3), json!(4)]);
        assert_eq!(store.counters().inserts(), 4);
    }

    #[tokio::test]
    async fn test_select_orders_and_paginates() {
        let store = seeded().await;
        let query = StoreQuery::new("products")
            .with_columns(vec!["name".into()])
            .with_filter(FilterNode::And(vec![FilterNode::condition(
                "price",
                Operator::Gte,
                json!(50),
            )]))
            .with_order(vec![SortKey::column("price", SortDirection::Desc)])
            .with_offset(Some(1))
            .with_limit(Some(5));

        let rows = store.select(&query).await.unwrap();
        assert_eq!(
            rows,
            vec![row(json!({ "name": "Chair" })), row(json!({ "name": "Lamp" }))]
        );
        assert_eq!(store.count(&query).await.unwrap(), 3);
        assert_eq!(store.counters().reads(), 2);
    }

    #[tokio::test]
    async fn test_aggregates() {
        let store = seeded().await;
        let query = StoreQuery::new("products");
        assert_eq!(
            store.aggregate(&query, Aggregate::Min, "price").await.unwrap(),
            json!(20)
        );
        assert_eq!(
            store.aggregate(&query, Aggregate::Max, "price").await.unwrap(),
            json!(200)
        );
        assert_eq!(
            store.aggregate(&query, Aggregate::Sum, "price").await.unwrap(),
            json!(390)
        );
        let empty = StoreQuery::new("orders");
        assert_eq!(
            store.aggregate(&empty, Aggregate::Sum, "total").await.unwrap(),
            json!(null)
        );
    }

    #[tokio::test]
    async fn test_update_and_delete() {
        let store = seeded().await;
        let cheap = FilterNode::And(vec![FilterNode::condition("price", Operator::Lt, json!(100))]);

        let updated = store
            .update("products", &cheap, &row(json!({ "price": 99 })))
            .await
            .unwrap();
        assert_eq!(updated, 2);

        let deleted = store.delete("products", &cheap).await.unwrap();
        assert_eq!(deleted, 2);
        assert_eq!(store.rows("products").await.len(), 2);
    }

    #[tokio::test]
    async fn test_unique_constraint() {
        let store = InMemoryStore::new().with_unique("users", &["email"]);
        store
            .insert("users", &row(json!({ "email": "a@example.com" })))
            .await
            .unwrap();
        let err = store
            .insert("users", &row(json!({ "email": "a@example.com" })))
            .await
            .unwrap_err();
        assert!(err.is_unique_violation());
    }

    #[tokio::test]
    async fn test_update_violation_leaves_rows_untouched() {
        let store = InMemoryStore::new().with_unique("users", &["email"]);
        for email in ["a@x", "b@x"] {
            store
                .insert("users", &row(json!({ "email": email })))
                .await
                .unwrap();
        }

        let err = store
            .update("users", &FilterNode::And(vec![]), &row(json!({ "email": "z@x" })))
            .await
            .unwrap_err();
        assert!(err.is_unique_violation());

        let emails: Vec<Value> = store
            .rows("users")
            .await
            .iter()
            .map(|r| r["email"].clone())
            .collect();
        assert_eq!(emails, vec![json!("a@x"), json!("b@x")]);
    }

    #[tokio::test]
    async fn test_update_of_one_row_rechecks_only_that_row() {
        let store = InMemoryStore::new().with_unique("users", &["email"]);
        store
            .insert("users", &row(json!({ "email": "a@x" })))
            .await
            .unwrap();
        let only_first = FilterNode::And(vec![FilterNode::condition("id", Operator::Eq, json!(1))]);
        let updated = store
            .update("users", &only_first, &row(json!({ "email": "c@x" })))
            .await
            .unwrap();
        assert_eq!(updated, 1);
        assert_eq!(store.rows("users").await[0]["email"], json!("c@x"));
    }

    #[tokio::test]
    async fn test_group_keeps_first_row() {
        let store = InMemoryStore::new();
        for kind in ["a", "b", "a"] {
            store
                .insert("items", &row(json!({ "kind": kind })))
                .await
                .unwrap();
        }
        let query = StoreQuery::new("items").with_group(vec!["kind".into()]);
        let rows = store.select(&query).await.unwrap();
        assert_eq!(rows.len(), 2);
    }

    #[tokio::test]
    async fn test_raw_query_unsupported() {
        let store = InMemoryStore::new();
        let err = store.raw_query("SELECT 1", &[]).await.unwrap_err();
        assert!(matches!(err, StorageError::Unsupported { .. }));
    }
}
