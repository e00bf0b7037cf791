//! SQL translation of store queries.
//!
//! Every operator has an explicit translation per [`Dialect`]. Values are never
//! interpolated: the builder emits numbered placeholders and collects [`SqlValue`]
//! parameters alongside the statement.

use serde_json::Value;
use std::fmt;

use crate::error::StorageError;
use crate::query::{
    Aggregate, Condition, FilterNode, Operator, Row, SortKey, SortTarget, StoreQuery,
};

/// SQL dialect of a relational backend.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Dialect {
    Postgres,
    Sqlite,
}

impl Dialect {
    /// SQL comparison keyword for an operator.
    pub fn comparison(self, operator: Operator) -> &'static str {
        match (self, operator) {
            (_, Operator::Eq) => "=",
            (_, Operator::Ne) => "!=",
            (_, Operator::Gt) => ">",
            (_, Operator::Gte) => ">=",
            (_, Operator::Lt) => "<",
            (_, Operator::Lte) => "<=",
            (_, Operator::Between) => "BETWEEN",
            (_, Operator::NotBetween) => "NOT BETWEEN",
            (_, Operator::In) => "IN",
            (_, Operator::NotIn) => "NOT IN",
            (_, Operator::Like) => "LIKE",
            (_, Operator::NotLike) => "NOT LIKE",
            (Dialect::Postgres, Operator::ILike) => "ILIKE",
            (Dialect::Postgres, Operator::NotILike) => "NOT ILIKE",
            // LIKE is case-insensitive for ASCII in SQLite
            (Dialect::Sqlite, Operator::ILike) => "LIKE",
            (Dialect::Sqlite, Operator::NotILike) => "NOT LIKE",
        }
    }

    /// Placeholder for the `index`-th (1-based) parameter.
    pub fn placeholder(self, index: usize) -> String {
        match self {
            Dialect::Postgres => format!("${index}"),
            Dialect::Sqlite => format!("?{index}"),
        }
    }

    /// Expression returning the 1-based position of `needle` in `column`, NULL when absent.
    pub fn position(self, column: &str, needle: &str) -> String {
        match self {
            Dialect::Postgres => format!("NULLIF(strpos({column}, {needle}), 0)"),
            Dialect::Sqlite => format!("NULLIF(instr({column}, {needle}), 0)"),
        }
    }

    pub fn quote_ident(self, ident: &str) -> String {
        format!("\"{}\"", ident.replace('"', "\"\""))
    }
}

/// A bound parameter value.
#[derive(Debug, Clone, PartialEq)]
pub enum SqlValue {
    Text(String),
    Integer(i64),
    Float(f64),
    Boolean(bool),
    Json(String),
    Null,
}

impl SqlValue {
    pub fn from_json(value: &Value) -> Self {
        match value {
            Value::Null => Self::Null,
            Value::Bool(b) => Self::Boolean(*b),
            Value::Number(n) => match n.as_i64() {
                Some(i) => Self::Integer(i),
                None => Self::Float(n.as_f64().unwrap_or_default()),
            },
            Value::String(s) => Self::Text(s.clone()),
            other => Self::Json(other.to_string()),
        }
    }

    /// Get the value as a string for display/debugging.
    pub fn as_display_str(&self) -> String {
        match self {
            Self::Text(s) | Self::Json(s) => s.clone(),
            Self::Integer(i) => i.to_string(),
            Self::Float(f) => f.to_string(),
            Self::Boolean(b) => b.to_string(),
            Self::Null => "NULL".to_string(),
        }
    }
}

/// A statement with its parameters.
#[derive(Debug, Clone, PartialEq)]
pub struct BuiltQuery {
    pub sql: String,
    pub params: Vec<SqlValue>,
}

impl fmt::Display for BuiltQuery {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.sql)
    }
}

/// Accumulates parameters while translating filter trees and queries.
#[derive(Debug)]
pub struct SqlBuilder {
    dialect: Dialect,
    params: Vec<SqlValue>,
}

impl SqlBuilder {
    pub fn new(dialect: Dialect) -> Self {
        Self {
            dialect,
            params: Vec::new(),
        }
    }

    /// Nulls are written as a literal since an untyped parameter cannot be bound.
    fn bind(&mut self, value: &Value) -> String {
        if value.is_null() {
            return "NULL".to_string();
        }
        self.params.push(SqlValue::from_json(value));
        self.dialect.placeholder(self.params.len())
    }

    fn bind_text(&mut self, text: &str) -> String {
        self.params.push(SqlValue::Text(text.to_string()));
        self.dialect.placeholder(self.params.len())
    }

    fn finish(self, sql: String) -> BuiltQuery {
        BuiltQuery {
            sql,
            params: self.params,
        }
    }

    /// Translates a filter tree into a boolean SQL expression.
    pub fn filter_to_sql(&mut self, node: &FilterNode) -> Result<String, StorageError> {
        match node {
            FilterNode::Condition(condition) => self.condition_to_sql(condition),
            FilterNode::And(children) => self.group_to_sql(children, "AND", "1 = 1"),
            FilterNode::Or(children) => self.group_to_sql(children, "OR", "1 = 0"),
        }
    }

    fn group_to_sql(
        &mut self,
        children: &[FilterNode],
        joiner: &str,
        empty: &str,
    ) -> Result<String, StorageError> {
        if children.is_empty() {
            return Ok(empty.to_string());
        }
        let parts = children
            .iter()
            .map(|child| self.filter_to_sql(child))
            .collect::<Result<Vec<_>, _>>()?;
        if parts.len() == 1 {
            return Ok(parts.into_iter().collect());
        }
        Ok(format!("({})", parts.join(&format!(" {joiner} "))))
    }

    fn condition_to_sql(&mut self, condition: &Condition) -> Result<String, StorageError> {
        let column = self.dialect.quote_ident(&condition.field);
        let keyword = self.dialect.comparison(condition.operator);

        match condition.operator {
            Operator::Eq if condition.value.is_null() => Ok(format!("{column} IS NULL")),
            Operator::Ne if condition.value.is_null() => Ok(format!("{column} IS NOT NULL")),
            Operator::Between | Operator::NotBetween => {
                let bounds = condition
                    .value
                    .as_array()
                    .filter(|items| items.len() == 2)
                    .ok_or_else(|| {
                        StorageError::invalid_query(format!(
                            "'{}' on '{}' requires exactly two values",
                            condition.operator, condition.field
                        ))
                    })?;
                let low = self.bind(&bounds[0]);
                let high = self.bind(&bounds[1]);
                Ok(format!("{column} {keyword} {low} AND {high}"))
            }
            Operator::In | Operator::NotIn => {
                let items = condition.value.as_array().ok_or_else(|| {
                    StorageError::invalid_query(format!(
                        "'{}' on '{}' requires a list of values",
                        condition.operator, condition.field
                    ))
                })?;
                if items.is_empty() {
                    let always = if condition.operator == Operator::In {
                        "1 = 0"
                    } else {
                        "1 = 1"
                    };
                    return Ok(always.to_string());
                }
                let placeholders: Vec<String> = items.iter().map(|item| self.bind(item)).collect();
                Ok(format!("{column} {keyword} ({})", placeholders.join(", ")))
            }
            _ => {
                let placeholder = self.bind(&condition.value);
                Ok(format!("{column} {keyword} {placeholder}"))
            }
        }
    }

    fn order_to_sql(&mut self, order: &[SortKey]) -> String {
        let keys: Vec<String> = order
            .iter()
            .map(|key| {
                let expr = match &key.target {
                    SortTarget::Column(column) => self.dialect.quote_ident(column),
                    SortTarget::Position { column, needle } => {
                        let placeholder = self.bind_text(needle);
                        let column = self.dialect.quote_ident(column);
                        self.dialect.position(&column, &placeholder)
                    }
                };
                let direction = if key.direction.is_descending() {
                    "DESC"
                } else {
                    "ASC"
                };
                let nulls = if key.direction.nulls_last() {
                    "NULLS LAST"
                } else {
                    "NULLS FIRST"
                };
                format!("{expr} {direction} {nulls}")
            })
            .collect();
        keys.join(", ")
    }

    fn where_clause(&mut self, filter: &FilterNode) -> Result<String, StorageError> {
        if filter.is_empty() {
            return Ok(String::new());
        }
        Ok(format!(" WHERE {}", self.filter_to_sql(filter)?))
    }

    /// `SELECT` statement for a query.
    pub fn build_select(dialect: Dialect, query: &StoreQuery) -> Result<BuiltQuery, StorageError> {
        let mut builder = Self::new(dialect);
        let columns = if query.columns.is_empty() {
            "*".to_string()
        } else {
            query
                .columns
                .iter()
                .map(|c| dialect.quote_ident(c))
                .collect::<Vec<_>>()
                .join(", ")
        };
        let mut sql = format!(
            "SELECT {columns} FROM {}",
            dialect.quote_ident(&query.table)
        );
        sql.push_str(&builder.where_clause(&query.filter)?);
        if !query.group.is_empty() {
            let group: Vec<String> = query.group.iter().map(|c| dialect.quote_ident(c)).collect();
            sql.push_str(&format!(" GROUP BY {}", group.join(", ")));
        }
        if !query.order.is_empty() {
            let order = builder.order_to_sql(&query.order);
            sql.push_str(&format!(" ORDER BY {order}"));
        }
        match (query.limit, dialect) {
            (Some(limit), _) => sql.push_str(&format!(" LIMIT {limit}")),
            // SQLite only accepts OFFSET after a LIMIT
            (None, Dialect::Sqlite) if query.offset.is_some() => sql.push_str(" LIMIT -1"),
            _ => {}
        }
        if let Some(offset) = query.offset {
            sql.push_str(&format!(" OFFSET {offset}"));
        }
        Ok(builder.finish(sql))
    }

    /// `SELECT COUNT(*)` over the query filter.
    pub fn build_count(dialect: Dialect, query: &StoreQuery) -> Result<BuiltQuery, StorageError> {
        let mut builder = Self::new(dialect);
        let mut sql = format!(
            "SELECT COUNT(*) AS count FROM {}",
            dialect.quote_ident(&query.table)
        );
        sql.push_str(&builder.where_clause(&query.filter)?);
        Ok(builder.finish(sql))
    }

    pub fn build_aggregate(
        dialect: Dialect,
        query: &StoreQuery,
        function: Aggregate,
        column: &str,
    ) -> Result<BuiltQuery, StorageError> {
        let mut builder = Self::new(dialect);
        let mut sql = format!(
            "SELECT {}({}) AS value FROM {}",
            function.as_sql(),
            dialect.quote_ident(column),
            dialect.quote_ident(&query.table)
        );
        sql.push_str(&builder.where_clause(&query.filter)?);
        Ok(builder.finish(sql))
    }

    pub fn build_insert(dialect: Dialect, table: &str, values: &Row) -> BuiltQuery {
        let mut builder = Self::new(dialect);
        let table = dialect.quote_ident(table);
        if values.is_empty() {
            return builder.finish(format!("INSERT INTO {table} DEFAULT VALUES RETURNING *"));
        }
        let columns: Vec<String> = values.keys().map(|k| dialect.quote_ident(k)).collect();
        let placeholders: Vec<String> = values.values().map(|v| builder.bind(v)).collect();
        let sql = format!(
            "INSERT INTO {table} ({}) VALUES ({}) RETURNING *",
            columns.join(", "),
            placeholders.join(", ")
        );
        builder.finish(sql)
    }

    pub fn build_update(
        dialect: Dialect,
        table: &str,
        filter: &FilterNode,
        values: &Row,
    ) -> Result<BuiltQuery, StorageError> {
        if values.is_empty() {
            return Err(StorageError::invalid_query("update without values"));
        }
        let mut builder = Self::new(dialect);
        let assignments: Vec<String> = values
            .iter()
            .map(|(column, value)| {
                let placeholder = builder.bind(value);
                format!("{} = {placeholder}", dialect.quote_ident(column))
            })
            .collect();
        let mut sql = format!(
            "UPDATE {} SET {}",
            dialect.quote_ident(table),
            assignments.join(", ")
        );
        sql.push_str(&builder.where_clause(filter)?);
        Ok(builder.finish(sql))
    }

    pub fn build_delete(
        dialect: Dialect,
        table: &str,
        filter: &FilterNode,
    ) -> Result<BuiltQuery, StorageError> {
        let mut builder = Self::new(dialect);
        let mut sql = format!("DELETE FROM {}", dialect.quote_ident(table));
        sql.push_str(&builder.where_clause(filter)?);
        Ok(builder.finish(sql))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::query::{SortDirection, SortKey};
    use serde_json::json;

    fn leaf(op: Operator, value: Value) -> FilterNode {
        FilterNode::condition("price", op, value)
    }

    #[test]
    fn test_every_operator_translates_in_both_dialects() {
        for dialect in [Dialect::Postgres, Dialect::Sqlite] {
            for op in Operator::ALL {
                let value = match op.arity() {
                    crate::query::Arity::Scalar => json!(10),
                    crate::query::Arity::Pair => json!([1, 2]),
                    crate::query::Arity::List => json!([1, 2, 3]),
                };
                let mut builder = SqlBuilder::new(dialect);
                let sql = builder.filter_to_sql(&leaf(op, value)).unwrap();
                assert!(sql.contains(dialect.comparison(op)), "{dialect:?} {op}: {sql}");
            }
        }
        assert_eq!(Dialect::Postgres.comparison(Operator::ILike), "ILIKE");
        assert_eq!(Dialect::Sqlite.comparison(Operator::NotILike), "NOT LIKE");
    }

    #[test]
    fn test_nested_groups_keep_structure() {
        let tree = FilterNode::And(vec![
            leaf(Operator::Gte, json!(1)),
            FilterNode::Or(vec![
                FilterNode::And(vec![leaf(Operator::Lt, json!(100))]),
                FilterNode::And(vec![
                    FilterNode::condition("discount", Operator::Gte, json!(0.5)),
                    FilterNode::condition("name", Operator::ILike, json!("%lamp%")),
                ]),
            ]),
        ]);
        let mut builder = SqlBuilder::new(Dialect::Postgres);
        let sql = builder.filter_to_sql(&tree).unwrap();
        assert_eq!(
            sql,
            r#"("price" >= $1 AND ("price" < $2 OR ("discount" >= $3 AND "name" ILIKE $4)))"#
        );
        assert_eq!(builder.params.len(), 4);
    }

    #[test]
    fn test_null_comparisons_and_empty_lists() {
        let mut builder = SqlBuilder::new(Dialect::Postgres);
        assert_eq!(
            builder.filter_to_sql(&leaf(Operator::Eq, json!(null))).unwrap(),
            r#""price" IS NULL"#
        );
        assert_eq!(
            builder.filter_to_sql(&leaf(Operator::In, json!([]))).unwrap(),
            "1 = 0"
        );
        assert_eq!(
            builder.filter_to_sql(&leaf(Operator::NotIn, json!([]))).unwrap(),
            "1 = 1"
        );
        assert!(builder.params.is_empty());
    }

    #[test]
    fn test_insert_inlines_nulls() {
        let mut values = Row::new();
        values.insert("name".into(), json!("lamp"));
        values.insert("sku".into(), json!(null));
        let built = SqlBuilder::build_insert(Dialect::Postgres, "products", &values);
        assert_eq!(
            built.sql,
            r#"INSERT INTO "products" ("name", "sku") VALUES ($1, NULL) RETURNING *"#
        );
        assert_eq!(built.params, vec![SqlValue::Text("lamp".into())]);
    }

    #[test]
    fn test_between_requires_pair() {
        let mut builder = SqlBuilder::new(Dialect::Postgres);
        let err = builder
            .filter_to_sql(&leaf(Operator::Between, json!([1])))
            .unwrap_err();
        assert!(matches!(err, StorageError::InvalidQuery { .. }));
    }

    #[test]
    fn test_select_with_relevance_order() {
        let query = StoreQuery::new("products")
            .with_columns(vec!["id".into(), "name".into()])
            .with_filter(FilterNode::And(vec![FilterNode::condition(
                "_search_main",
                Operator::ILike,
                json!("%foo%"),
            )]))
            .with_order(vec![
                SortKey::position("_search_main", "foo"),
                SortKey::column("id", SortDirection::Desc),
            ])
            .with_offset(Some(20))
            .with_limit(Some(10));

        let pg = SqlBuilder::build_select(Dialect::Postgres, &query).unwrap();
        assert_eq!(
            pg.sql,
            r#"SELECT "id", "name" FROM "products" WHERE "_search_main" ILIKE $1 ORDER BY NULLIF(strpos("_search_main", $2), 0) ASC NULLS LAST, "id" DESC NULLS FIRST LIMIT 10 OFFSET 20"#
        );
        assert_eq!(
            pg.params,
            vec![SqlValue::Text("%foo%".into()), SqlValue::Text("foo".into())]
        );

        let lite = SqlBuilder::build_select(Dialect::Sqlite, &query).unwrap();
        assert!(lite.sql.contains(r#"NULLIF(instr("_search_main", ?2), 0)"#));
    }

    #[test]
    fn test_sqlite_offset_without_limit() {
        let query = StoreQuery::new("products").with_offset(Some(5));
        let built = SqlBuilder::build_select(Dialect::Sqlite, &query).unwrap();
        assert_eq!(built.sql, r#"SELECT * FROM "products" LIMIT -1 OFFSET 5"#);
    }

    #[test]
    fn test_write_statements() {
        let mut values = Row::new();
        values.insert("name".into(), json!("Lamp"));
        values.insert("price".into(), json!(12.5));

        let insert = SqlBuilder::build_insert(Dialect::Postgres, "products", &values);
        assert_eq!(
            insert.sql,
            r#"INSERT INTO "products" ("name", "price") VALUES ($1, $2) RETURNING *"#
        );

        let filter = FilterNode::And(vec![FilterNode::condition("id", Operator::In, json!([1, 2]))]);
        let update = SqlBuilder::build_update(Dialect::Postgres, "products", &filter, &values).unwrap();
        assert_eq!(
            update.sql,
            r#"UPDATE "products" SET "name" = $1, "price" = $2 WHERE "id" IN ($3, $4)"#
        );

        let delete = SqlBuilder::build_delete(Dialect::Sqlite, "products", &filter).unwrap();
        assert_eq!(delete.sql, r#"DELETE FROM "products" WHERE "id" IN (?1, ?2)"#);
    }

    #[test]
    fn test_quote_ident_escapes() {
        assert_eq!(Dialect::Postgres.quote_ident(r#"we"ird"#), r#""we""ird""#);
    }
}
