//! Schema management for the PostgreSQL store backend.
//!
//! Every multi-entry collection gets its own table with one column per declared field
//! plus one `_search_<structure>` text column per search structure. Single-entry
//! collections share the `single_collections` table.

use std::sync::Arc;

use dashmap::DashSet;
use sqlx_postgres::PgPool;
use tracing::{debug, info, instrument};
use vellum_core::{
    CollectionDefinition, FieldTypeRegistry, SINGLE_COLLECTIONS_TABLE, StorageType, Uniqueness,
};
use vellum_storage::Dialect;

use crate::error::{PostgresError, Result};

fn quote(ident: &str) -> String {
    Dialect::Postgres.quote_ident(ident)
}

fn index_name(table: &str, columns: &[&str], unique: bool) -> String {
    let suffix = if unique { "key" } else { "idx" };
    quote(&format!("{table}_{}_{suffix}", columns.join("_")))
}

fn index_sql(table: &str, columns: &[&str], unique: bool) -> String {
    let quoted: Vec<String> = columns.iter().map(|c| quote(c)).collect();
    format!(
        "CREATE {}INDEX IF NOT EXISTS {} ON {} ({})",
        if unique { "UNIQUE " } else { "" },
        index_name(table, columns, unique),
        quote(table),
        quoted.join(", ")
    )
}

/// Column type of a declared field.
fn column_type(collection: &CollectionDefinition, name: &str, storage: StorageType) -> &'static str {
    if collection.is_timestamp_field(name) {
        return "BIGINT";
    }
    match storage {
        StorageType::Text => "TEXT",
        StorageType::Number => "DOUBLE PRECISION",
        StorageType::Boolean => "BOOLEAN",
    }
}

/// Statements creating the table of a collection and its indexes. Idempotent.
pub fn collection_ddl(
    collection: &CollectionDefinition,
    field_types: &FieldTypeRegistry,
) -> Vec<String> {
    if collection.is_single() {
        return single_collections_ddl();
    }

    let table = collection.table_name();
    let mut statements = vec![format!(
        "CREATE TABLE IF NOT EXISTS {} (\"id\" BIGSERIAL PRIMARY KEY)",
        quote(table)
    )];

    for (name, declaration) in &collection.fields {
        if name == "id" {
            continue;
        }
        let storage = field_types.storage_type(declaration);
        statements.push(format!(
            "ALTER TABLE {} ADD COLUMN IF NOT EXISTS {} {}",
            quote(table),
            quote(name),
            column_type(collection, name, storage)
        ));
    }
    for structure in collection.search.keys() {
        statements.push(format!(
            "ALTER TABLE {} ADD COLUMN IF NOT EXISTS {} TEXT",
            quote(table),
            quote(&CollectionDefinition::search_column(structure))
        ));
    }

    for (name, declaration) in &collection.fields {
        if name == "id" {
            continue;
        }
        let additional = &declaration.additional;
        match additional.unique {
            Uniqueness::Global => statements.push(index_sql(table, &[name], true)),
            Uniqueness::PerLanguage if collection.translatable => {
                statements.push(index_sql(table, &[name, "language"], true));
            }
            Uniqueness::PerLanguage => statements.push(index_sql(table, &[name], true)),
            Uniqueness::None if additional.index => {
                statements.push(index_sql(table, &[name], false));
            }
            Uniqueness::None => {}
        }
    }

    for columns in &collection.composite_indexes {
        let columns: Vec<&str> = columns.iter().map(String::as_str).collect();
        statements.push(index_sql(table, &columns, false));
    }
    for columns in &collection.unique_composite_indexes {
        let columns: Vec<&str> = columns.iter().map(String::as_str).collect();
        statements.push(index_sql(table, &columns, true));
    }

    statements
}

/// Statements creating the shared single-entry table.
pub fn single_collections_ddl() -> Vec<String> {
    vec![
        format!(
            "CREATE TABLE IF NOT EXISTS {} (\
             \"id\" BIGSERIAL PRIMARY KEY, \
             \"name\" TEXT NOT NULL, \
             \"language\" TEXT NOT NULL, \
             \"data\" TEXT NOT NULL)",
            quote(SINGLE_COLLECTIONS_TABLE)
        ),
        index_sql(SINGLE_COLLECTIONS_TABLE, &["name", "language"], true),
    ]
}

/// Creates collection tables on demand.
#[derive(Debug, Clone)]
pub struct SchemaManager {
    pool: PgPool,
    /// Tables already synced by this process.
    synced_tables: Arc<DashSet<String>>,
}

impl SchemaManager {
    #[must_use]
    pub fn new(pool: PgPool) -> Self {
        Self {
            pool,
            synced_tables: Arc::new(DashSet::new()),
        }
    }

    /// Ensures the table of `collection` exists with every declared column.
    #[instrument(skip(self, collection, field_types), fields(collection = %collection.name))]
    pub async fn sync_collection(
        &self,
        collection: &CollectionDefinition,
        field_types: &FieldTypeRegistry,
    ) -> Result<()> {
        let key = if collection.is_single() {
            SINGLE_COLLECTIONS_TABLE.to_string()
        } else {
            collection.name.clone()
        };
        if self.synced_tables.contains(&key) {
            debug!(table = %key, "Table already synced");
            return Ok(());
        }

        for statement in collection_ddl(collection, field_types) {
            sqlx_core::query::query(&statement)
                .execute(&self.pool)
                .await
                .map_err(|e| PostgresError::schema(format!("{statement}: {e}")))?;
        }

        info!(table = %key, "Synced collection table");
        self.synced_tables.insert(key);
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use vellum_core::{FieldDeclaration, SearchField};

    #[test]
    fn test_collection_ddl() {
        let collection = CollectionDefinition::builder("products")
            .translatable()
            .timestamps()
            .field("name", FieldDeclaration::new("text").unique(Uniqueness::PerLanguage))
            .field("price", FieldDeclaration::new("number").indexed())
            .field("featured", FieldDeclaration::new("switch"))
            .search("default", vec![SearchField::new("name")])
            .composite_index(vec!["price".into(), "featured".into()])
            .build();

        let ddl = collection_ddl(&collection, &FieldTypeRegistry::with_builtin());

        assert_eq!(
            ddl[0],
            r#"CREATE TABLE IF NOT EXISTS "products" ("id" BIGSERIAL PRIMARY KEY)"#
        );
        assert!(ddl.contains(
            &r#"ALTER TABLE "products" ADD COLUMN IF NOT EXISTS "price" DOUBLE PRECISION"#
                .to_string()
        ));
        assert!(ddl.contains(
            &r#"ALTER TABLE "products" ADD COLUMN IF NOT EXISTS "createdAt" BIGINT"#.to_string()
        ));
        assert!(ddl.contains(
            &r#"ALTER TABLE "products" ADD COLUMN IF NOT EXISTS "_search_default" TEXT"#
                .to_string()
        ));
        assert!(ddl.contains(
            &r#"CREATE UNIQUE INDEX IF NOT EXISTS "products_name_language_key" ON "products" ("name", "language")"#
                .to_string()
        ));
        assert!(ddl.contains(
            &r#"CREATE INDEX IF NOT EXISTS "products_price_featured_idx" ON "products" ("price", "featured")"#
                .to_string()
        ));
    }

    #[test]
    fn test_single_collections_share_one_table() {
        let collection = CollectionDefinition::builder("settings").single().build();
        let ddl = collection_ddl(&collection, &FieldTypeRegistry::with_builtin());
        assert_eq!(ddl, single_collections_ddl());
        assert!(ddl[0].contains(r#""single_collections""#));
    }
}
