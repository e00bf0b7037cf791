use async_trait::async_trait;
use serde_json::Value;
use std::sync::Arc;

use super::{as_record_id, is_blank, required_validator};
use crate::error::CoreError;
use crate::field_type::{
    DefaultContext, FieldType, PopulateContext, Populator, Sanitizer, StorageType,
    ValidationFailure, Validator,
};
use crate::record::value_to_text;
use crate::schema::FieldDeclaration;

fn target_collection<'a>(
    field_name: &str,
    field: &'a FieldDeclaration,
) -> Result<&'a str, CoreError> {
    field
        .option("collection")
        .and_then(Value::as_str)
        .ok_or_else(|| CoreError::population(field_name, "missing 'collection' option"))
}

fn normalize_id(value: &Value) -> Value {
    match as_record_id(value) {
        Some(id) => Value::from(id),
        None => value.clone(),
    }
}

/// Reference to a single record of another collection, stored as its id.
pub struct RecordField;

impl FieldType for RecordField {
    fn name(&self) -> &str {
        "record"
    }

    fn storage_type(&self) -> StorageType {
        StorageType::Number
    }

    fn sanitizers(&self) -> Vec<Sanitizer> {
        vec![Sanitizer::new(|ctx| match ctx.value {
            Value::String(s) if s.trim().is_empty() => Value::Null,
            other => normalize_id(other),
        })]
    }

    fn validators(&self) -> Vec<Validator> {
        vec![
            required_validator(),
            Validator::new(|ctx| {
                if ctx.value.is_null() || as_record_id(ctx.value).is_some() {
                    Ok(())
                } else {
                    Err(ValidationFailure::new("The value must be a record id"))
                }
            }),
        ]
    }

    fn deserialize(&self, value: &Value) -> Value {
        normalize_id(value)
    }

    fn population(&self) -> Option<Arc<dyn Populator>> {
        Some(Arc::new(RecordPopulator))
    }
}

/// Replaces an id with the referenced record, or null when it no longer exists.
pub struct RecordPopulator;

#[async_trait]
impl Populator for RecordPopulator {
    async fn populate(&self, ctx: &PopulateContext<'_>) -> Result<Value, CoreError> {
        if ctx.value.is_null() {
            return Ok(Value::Null);
        }
        let collection = target_collection(ctx.field_name, ctx.field)?;
        let record = ctx
            .resolver
            .resolve_record(collection, ctx.value, ctx.language)
            .await?;
        Ok(record.map(Value::Object).unwrap_or(Value::Null))
    }
}

/// Ordered list of references to records of another collection.
///
/// Stored as a JSON array of quoted ids (`["1","2"]`) so that a single id can be
/// matched with a `like '%"<id>"%'` pattern.
pub struct RecordsField;

fn parse_id_list(value: &Value) -> Value {
    match value {
        Value::Array(items) => Value::Array(items.iter().map(normalize_id).collect()),
        Value::String(s) => {
            let trimmed = s.trim();
            if trimmed.is_empty() {
                return Value::Array(Vec::new());
            }
            if let Ok(Value::Array(items)) = serde_json::from_str::<Value>(trimmed) {
                return Value::Array(items.iter().map(normalize_id).collect());
            }
            Value::Array(
                trimmed
                    .split(',')
                    .map(|part| normalize_id(&Value::String(part.trim().to_string())))
                    .collect(),
            )
        }
        other => other.clone(),
    }
}

impl FieldType for RecordsField {
    fn name(&self) -> &str {
        "records"
    }

    fn storage_type(&self) -> StorageType {
        StorageType::Text
    }

    fn default_value(&self, ctx: &DefaultContext<'_>) -> Value {
        ctx.field
            .option("default")
            .cloned()
            .unwrap_or_else(|| Value::Array(Vec::new()))
    }

    fn sanitizers(&self) -> Vec<Sanitizer> {
        vec![Sanitizer::new(|ctx| parse_id_list(ctx.value))]
    }

    fn validators(&self) -> Vec<Validator> {
        vec![
            required_validator(),
            Validator::new(|ctx| match ctx.value {
                Value::Null if !ctx.field.is_required() => Ok(()),
                Value::Array(items) => {
                    match items.iter().position(|item| as_record_id(item).is_none()) {
                        Some(index) => Err(ValidationFailure::at(
                            index.to_string(),
                            "The value must be a record id",
                        )),
                        None => Ok(()),
                    }
                }
                _ => Err(ValidationFailure::new("The value must be a list of record ids")),
            }),
        ]
    }

    fn serialize(&self, value: &Value) -> Value {
        let Value::Array(items) = value else {
            return value.clone();
        };
        let ids: Vec<String> = items.iter().map(value_to_text).collect();
        serde_json::to_string(&ids)
            .map(Value::String)
            .unwrap_or_else(|_| value.clone())
    }

    fn deserialize(&self, value: &Value) -> Value {
        parse_id_list(value)
    }

    fn population(&self) -> Option<Arc<dyn Populator>> {
        Some(Arc::new(RecordsPopulator))
    }
}

/// Replaces a list of ids with the records that still exist, in list order.
pub struct RecordsPopulator;

#[async_trait]
impl Populator for RecordsPopulator {
    async fn populate(&self, ctx: &PopulateContext<'_>) -> Result<Value, CoreError> {
        let Value::Array(ids) = ctx.value else {
            return Ok(ctx.value.clone());
        };
        if is_blank(ctx.value) {
            return Ok(Value::Array(Vec::new()));
        }
        let collection = target_collection(ctx.field_name, ctx.field)?;
        let mut records = Vec::with_capacity(ids.len());
        for id in ids {
            if let Some(record) = ctx
                .resolver
                .resolve_record(collection, id, ctx.language)
                .await?
            {
                records.push(Value::Object(record));
            }
        }
        Ok(Value::Array(records))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field_type::RecordResolver;
    use crate::record::Record;
    use crate::schema::CollectionDefinition;
    use serde_json::json;

    struct FixedResolver;

    #[async_trait]
    impl RecordResolver for FixedResolver {
        async fn resolve_record(
            &self,
            collection: &str,
            id: &Value,
            language: &str,
        ) -> Result<Option<Record>, CoreError> {
            if id == &json!(404) {
                return Ok(None);
            }
            let record = json!({ "id": id, "collection": collection, "language": language });
            Ok(record.as_object().cloned())
        }
    }

    #[test]
    fn test_records_serialization() {
        assert_eq!(
            RecordsField.serialize(&json!([1, 2])),
            json!(r#"["1","2"]"#)
        );
        assert_eq!(
            RecordsField.deserialize(&json!(r#"["1","2"]"#)),
            json!([1, 2])
        );
        assert_eq!(RecordsField.deserialize(&json!("3, 4")), json!([3, 4]));
    }

    #[tokio::test]
    async fn test_record_populator() {
        let def = CollectionDefinition::builder("posts").build();
        let decl = FieldDeclaration::new("record").with_options(json!({ "collection": "authors" }));
        let value = json!(7);
        let ctx = PopulateContext {
            collection: &def,
            field_name: "author",
            field: &decl,
            value: &value,
            language: "de",
            resolver: &FixedResolver,
        };

        let populated = RecordPopulator.populate(&ctx).await.unwrap();
        assert_eq!(
            populated,
            json!({ "id": 7, "collection": "authors", "language": "de" })
        );
    }

    #[tokio::test]
    async fn test_records_populator_skips_missing() {
        let def = CollectionDefinition::builder("posts").build();
        let decl = FieldDeclaration::new("records").with_options(json!({ "collection": "tags" }));
        let value = json!([1, 404, 2]);
        let ctx = PopulateContext {
            collection: &def,
            field_name: "tags",
            field: &decl,
            value: &value,
            language: "en",
            resolver: &FixedResolver,
        };

        let populated = RecordsPopulator.populate(&ctx).await.unwrap();
        let ids: Vec<Value> = populated
            .as_array()
            .map(|items| items.iter().map(|r| r["id"].clone()).collect())
            .unwrap_or_default();
        assert_eq!(ids, vec![json!(1), json!(2)]);
    }

    #[tokio::test]
    async fn test_populator_requires_collection_option() {
        let def = CollectionDefinition::builder("posts").build();
        let decl = FieldDeclaration::new("record");
        let value = json!(1);
        let ctx = PopulateContext {
            collection: &def,
            field_name: "author",
            field: &decl,
            value: &value,
            language: "en",
            resolver: &FixedResolver,
        };
        assert!(matches!(
            RecordPopulator.populate(&ctx).await,
            Err(CoreError::Population { .. })
        ));
    }
}
