//! Keyword columns and relevance search.
//!
//! Each search structure of a collection owns a text column `_search_<structure>` holding
//! the lowercase keywords of its fields, in declaration order and separated by a space.
//! A field with a `reserve` width always occupies exactly that many characters, so match
//! positions in that field are comparable across records. Searching ANDs one
//! `iLike '%token%'` per token; relevance orders by the position of each token in the
//! column, earlier first, absent last.

use indexmap::IndexMap;
use serde_json::Value;
use tracing::{debug, instrument};
use vellum_core::{CollectionDefinition, FieldTypeRegistry, KeywordContext, Record, value_to_text};
use vellum_storage::{FilterNode, Operator, Row, SortKey, Store, StoreQuery};

use crate::error::Result;
use crate::pipeline::cast_row;

/// Lowercase, whitespace-separated, de-duplicated search tokens.
pub fn search_tokens(text: &str) -> Vec<String> {
    let mut tokens: Vec<String> = Vec::new();
    for token in text.split_whitespace().map(str::to_lowercase) {
        if !tokens.contains(&token) {
            tokens.push(token);
        }
    }
    tokens
}

fn escape_like(token: &str) -> String {
    let mut escaped = String::with_capacity(token.len());
    for c in token.chars() {
        if matches!(c, '\\' | '%' | '_') {
            escaped.push('\\');
        }
        escaped.push(c);
    }
    escaped
}

/// One `iLike` condition per searched token.
pub fn search_conditions(search: &IndexMap<String, Vec<String>>) -> Vec<FilterNode> {
    search
        .iter()
        .flat_map(|(structure, tokens)| {
            let column = CollectionDefinition::search_column(structure);
            tokens.iter().map(move |token| {
                FilterNode::condition(
                    column.clone(),
                    Operator::ILike,
                    Value::String(format!("%{}%", escape_like(token))),
                )
            })
        })
        .collect()
}

/// Sort keys ordering by the position of each token, in token order.
pub fn relevance_keys(structure: &str, tokens: &[String]) -> Vec<SortKey> {
    let column = CollectionDefinition::search_column(structure);
    tokens
        .iter()
        .map(|token| SortKey::position(column.clone(), token.clone()))
        .collect()
}

fn pad(text: String, reserve: Option<usize>) -> String {
    match reserve {
        Some(width) => {
            let truncated: String = text.chars().take(width).collect();
            format!("{truncated:<width$}")
        }
        None => text,
    }
}

/// Keyword column values of a casted record, one per search structure.
pub fn keyword_columns(
    collection: &CollectionDefinition,
    record: &Record,
    field_types: &FieldTypeRegistry,
) -> Row {
    let mut columns = Row::new();

    for (structure, fields) in &collection.search {
        let mut parts = Vec::with_capacity(fields.len());
        for search_field in fields {
            let Some(declaration) = collection.field(&search_field.field) else {
                continue;
            };
            let value = record.get(&search_field.field).unwrap_or(&Value::Null);
            let ctx = KeywordContext {
                collection,
                field_name: &search_field.field,
                field: declaration,
                value,
                record,
            };
            let keywords = match (&search_field.extractor, field_types.get(&declaration.field_type)) {
                (Some(extractor), _) => (**extractor)(&ctx),
                (None, Some(field_type)) => field_type.extract_keywords(&ctx),
                (None, None) => value_to_text(value),
            };
            parts.push(pad(keywords.to_lowercase(), search_field.reserve));
        }
        columns.insert(
            CollectionDefinition::search_column(structure),
            Value::String(parts.join(" ")),
        );
    }

    columns
}

/// Recomputes the keyword columns of the given records. Returns the number of rows updated.
#[instrument(skip(store, collection, field_types, ids), fields(collection = %collection.name, count = ids.len()))]
pub async fn rebuild_keywords(
    store: &dyn Store,
    collection: &CollectionDefinition,
    field_types: &FieldTypeRegistry,
    ids: &[Value],
) -> Result<u64> {
    if !collection.is_searchable() || ids.is_empty() {
        return Ok(0);
    }

    let query = StoreQuery::new(collection.table_name())
        .with_columns(collection.field_names().map(str::to_string).collect())
        .with_filter(FilterNode::condition(
            "id",
            Operator::In,
            Value::Array(ids.to_vec()),
        ));
    let rows = store.select(&query).await?;

    let mut updated = 0;
    for row in rows {
        let Some(id) = row.get("id").cloned() else {
            continue;
        };
        let record = cast_row(collection, field_types, row);
        let columns = keyword_columns(collection, &record, field_types);
        updated += store
            .update(
                collection.table_name(),
                &FilterNode::condition("id", Operator::Eq, id),
                &columns,
            )
            .await?;
    }

    debug!(updated, "Rebuilt search keywords");
    Ok(updated)
}
