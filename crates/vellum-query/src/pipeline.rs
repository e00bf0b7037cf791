//! Per-field processing applied around the store.
//!
//! Writes run sanitize → conditional logic → validate → serialize. Reads run
//! cast → conditional reset → fallback → populate.

use indexmap::IndexSet;
use serde_json::Value;
use std::collections::HashSet;
use tracing::{debug, warn};
use vellum_core::{
    CollectionDefinition, ConditionalLogicResolver, DefaultContext, FieldTypeRegistry, Operation,
    PopulateContext, Record, RecordResolver, SanitizeContext, ValidateContext,
};
use vellum_storage::Row;

use crate::error::{FieldErrors, Result};

/// Bound on fallback passes. Each pass removes at least one invalid array entry.
const MAX_FALLBACK_PASSES: usize = 16;

/// Deserializes the declared fields of a stored row. Keyword columns are dropped.
pub fn cast_row(
    collection: &CollectionDefinition,
    field_types: &FieldTypeRegistry,
    row: Row,
) -> Record {
    let mut record = Record::new();
    for (column, value) in row {
        match collection.field(&column) {
            Some(declaration) => {
                let value = field_types.deserialize(declaration, &value);
                record.insert(column, value);
            }
            None if column.starts_with("_search_") => {}
            None => {
                record.insert(column, value);
            }
        }
    }
    record
}

/// Which validators a validation pass runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ValidatorFilter {
    /// Every validator whose scope covers the operation.
    #[default]
    Applicable,
    /// Only validators explicitly flagged for reads.
    ReadFlagged,
}

/// Field processing for one collection in one language.
#[derive(Clone, Copy)]
pub struct FieldPipeline<'a> {
    pub collection: &'a CollectionDefinition,
    pub field_types: &'a FieldTypeRegistry,
    pub language: &'a str,
}

impl<'a> FieldPipeline<'a> {
    pub fn new(
        collection: &'a CollectionDefinition,
        field_types: &'a FieldTypeRegistry,
        language: &'a str,
    ) -> Self {
        Self {
            collection,
            field_types,
            language,
        }
    }

    pub fn default_value(&self, field_name: &str) -> Value {
        let Some(field) = self.collection.field(field_name) else {
            return Value::Null;
        };
        self.field_types.default_value(&DefaultContext {
            collection: self.collection,
            field_name,
            field,
            language: self.language,
        })
    }

    /// Whether input may set the field.
    pub fn is_writable(&self, field_name: &str) -> bool {
        self.collection
            .field(field_name)
            .is_some_and(|declaration| !declaration.additional.immutable)
            && !self.collection.is_timestamp_field(field_name)
    }

    /// Drops unknown, immutable and timestamp fields from input.
    pub fn restrict(&self, input: Record) -> Record {
        input
            .into_iter()
            .filter(|(name, _)| {
                let keep = self.is_writable(name);
                if !keep {
                    debug!(field = %name, "Ignoring non-writable input field");
                }
                keep
            })
            .collect()
    }

    /// Fills every writable field missing from `input` with its default.
    pub fn fill_defaults(&self, input: &mut Record) {
        for name in self.collection.field_names() {
            if self.is_writable(name) && !input.contains_key(name) {
                input.insert(name.to_string(), self.default_value(name));
            }
        }
    }

    pub fn sanitize(&self, input: &Record, operation: Operation) -> Record {
        let mut output = input.clone();
        for (name, value) in input {
            let Some(field) = self.collection.field(name) else {
                continue;
            };
            let mut current = value.clone();
            for sanitizer in self.field_types.effective_sanitizers(field) {
                if !sanitizer.applies_to(operation) {
                    continue;
                }
                let next = sanitizer.apply(&SanitizeContext {
                    collection: self.collection,
                    field_name: name,
                    field,
                    value: &current,
                    input,
                    operation,
                    language: self.language,
                });
                current = next;
            }
            output.insert(name.clone(), current);
        }
        output
    }

    /// Fields whose conditional logic does not hold for `record`.
    pub fn inactive_fields(&self, record: &Record) -> HashSet<String> {
        ConditionalLogicResolver::new(self.collection, record, self.field_types)
            .failing_fields()
            .into_iter()
            .collect()
    }

    /// Resets fields present in `record` whose conditional logic fails.
    pub fn reset_inactive(&self, record: &mut Record) {
        let inactive = self.inactive_fields(record);
        for name in inactive {
            if record.contains_key(&name) {
                let default = self.default_value(&name);
                record.insert(name, default);
            }
        }
    }

    /// Runs the validators of `fields` against `input`.
    ///
    /// Only the first failure of each field is reported. Fields in `skip` are not validated.
    pub fn validate<'f>(
        &self,
        input: &Record,
        fields: impl IntoIterator<Item = &'f str>,
        operation: Operation,
        all_inputs: Option<&[Record]>,
        skip: &HashSet<String>,
        filter: ValidatorFilter,
    ) -> FieldErrors {
        let mut errors = FieldErrors::new();

        for name in fields {
            if skip.contains(name) {
                continue;
            }
            let Some(field) = self.collection.field(name) else {
                continue;
            };
            let value = input.get(name).unwrap_or(&Value::Null);
            let ctx = ValidateContext {
                collection: self.collection,
                field_name: name,
                field,
                value,
                input,
                operation,
                language: self.language,
                all_inputs,
                field_types: self.field_types,
            };

            for validator in self.field_types.effective_validators(field) {
                if !validator.applies_to(operation) {
                    continue;
                }
                if filter == ValidatorFilter::ReadFlagged && !validator.scope().is_read_flagged() {
                    continue;
                }
                if let Err(failure) = validator.validate(&ctx) {
                    errors.insert(failure.path(name), failure.message);
                    break;
                }
            }
        }

        errors
    }

    /// Stored form of the declared fields of `record`.
    pub fn serialize(&self, record: &Record) -> Row {
        record
            .iter()
            .filter_map(|(name, value)| {
                self.collection
                    .field(name)
                    .map(|field| (name.clone(), self.field_types.serialize(field, value)))
            })
            .collect()
    }

    /// Repairs a fetched record so that it passes validation.
    ///
    /// A failing field is reset to its default. A failing array entry (`tags.2`) is removed
    /// from its array, and validation runs again since indexes shift. Any other failing
    /// path is deleted.
    pub fn fallback(&self, record: &mut Record, filter: ValidatorFilter) {
        let no_skip = HashSet::new();

        for _ in 0..MAX_FALLBACK_PASSES {
            let fields: Vec<String> = record
                .keys()
                .filter(|name| {
                    name.as_str() != "id"
                        && self.collection.has_field(name)
                        && !self.collection.is_timestamp_field(name)
                })
                .cloned()
                .collect();
            let errors = self.validate(
                record,
                fields.iter().map(String::as_str),
                Operation::Read,
                None,
                &no_skip,
                filter,
            );
            if errors.is_empty() {
                return;
            }

            let mut arrays: IndexSet<String> = IndexSet::new();
            for (path, message) in &errors {
                debug!(path = %path, message = %message, "Falling back invalid value");
                if self.collection.has_field(path) {
                    record.insert(path.clone(), self.default_value(path));
                } else if let Some((parent, index)) = path.rsplit_once('.')
                    && index.parse::<usize>().is_ok()
                {
                    if let Some(slot) = value_at_mut(record, path) {
                        *slot = Value::Null;
                        arrays.insert(parent.to_string());
                    }
                } else {
                    remove_path(record, path);
                }
            }

            if arrays.is_empty() {
                return;
            }
            for parent in &arrays {
                if let Some(Value::Array(items)) = value_at_mut(record, parent) {
                    items.retain(|item| !item.is_null());
                }
            }
        }

        warn!(
            collection = %self.collection.name,
            "Fallback did not converge"
        );
    }

    /// Replaces every populatable field of `record` with its populated value.
    pub async fn populate(
        &self,
        record: &mut Record,
        resolver: &dyn RecordResolver,
    ) -> Result<()> {
        let names: Vec<String> = record.keys().cloned().collect();
        for name in names {
            let Some(field) = self.collection.field(&name) else {
                continue;
            };
            let Some(populator) = self.field_types.population_for(field) else {
                continue;
            };
            let value = record.get(&name).cloned().unwrap_or(Value::Null);
            let populated = populator
                .populate(&PopulateContext {
                    collection: self.collection,
                    field_name: &name,
                    field,
                    value: &value,
                    language: self.language,
                    resolver,
                })
                .await?;
            record.insert(name, populated);
        }
        Ok(())
    }
}

/// Mutable access to a dotted path (`gallery.2.caption`).
pub fn value_at_mut<'r>(record: &'r mut Record, path: &str) -> Option<&'r mut Value> {
    let mut segments = path.split('.');
    let mut current = record.get_mut(segments.next()?)?;
    for segment in segments {
        current = match current {
            Value::Object(map) => map.get_mut(segment)?,
            Value::Array(items) => items.get_mut(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current)
}

/// Removes the value at a dotted path.
pub fn remove_path(record: &mut Record, path: &str) {
    let Some((parent, last)) = path.rsplit_once('.') else {
        record.remove(path);
        return;
    };
    match value_at_mut(record, parent) {
        Some(Value::Object(map)) => {
            map.remove(last);
        }
        Some(Value::Array(items)) => {
            if let Ok(index) = last.parse::<usize>()
                && index < items.len()
            {
                items.remove(index);
            }
        }
        _ => {}
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use vellum_core::{
        ConditionOp, ConditionalLogic, FieldDeclaration, OperationScope, ValidationFailure,
        Validator,
    };

    fn record(value: Value) -> Record {
        value.as_object().cloned().unwrap_or_default()
    }

    fn products() -> CollectionDefinition {
        CollectionDefinition::builder("products")
            .timestamps()
            .field(
                "name",
                FieldDeclaration::new("text").with_options(json!({ "required": true })),
            )
            .field(
                "price",
                FieldDeclaration::new("number").with_options(json!({ "min": 0, "default": 1 })),
            )
            .field(
                "discount",
                FieldDeclaration::new("number")
                    .with_conditional_logic(ConditionalLogic::field(
                        "price",
                        ConditionOp::Gt,
                        json!(10),
                    )),
            )
            .field("tags", FieldDeclaration::new("records").with_options(json!({ "collection": "tags" })))
            .build()
    }

    #[test]
    fn test_restrict_drops_immutable_and_unknown() {
        let collection = products();
        let field_types = FieldTypeRegistry::with_builtin();
        let pipeline = FieldPipeline::new(&collection, &field_types, "en");
        let input = pipeline.restrict(record(json!({
            "id": 5, "createdAt": 1, "name": "Lamp", "bogus": true
        })));
        assert_eq!(input, record(json!({ "name": "Lamp" })));
    }

    #[test]
    fn test_sanitize_then_validate() {
        let collection = products();
        let field_types = FieldTypeRegistry::with_builtin();
        let pipeline = FieldPipeline::new(&collection, &field_types, "en");

        let input = pipeline.sanitize(
            &record(json!({ "name": "  Lamp ", "price": "-3" })),
            Operation::Create,
        );
        assert_eq!(input["name"], json!("Lamp"));
        assert_eq!(input["price"], json!(-3));

        let errors = pipeline.validate(
            &input,
            ["name", "price"],
            Operation::Create,
            None,
            &HashSet::new(),
            ValidatorFilter::Applicable,
        );
        assert_eq!(errors.len(), 1);
        assert_eq!(
            errors["price"],
            "The value must be greater than or equal to 0"
        );
    }

    #[test]
    fn test_inactive_fields_are_skipped_and_reset() {
        let collection = products();
        let field_types = FieldTypeRegistry::with_builtin();
        let pipeline = FieldPipeline::new(&collection, &field_types, "en");

        let mut fetched = record(json!({ "price": 5, "discount": 0.3 }));
        assert!(pipeline.inactive_fields(&fetched).contains("discount"));
        pipeline.reset_inactive(&mut fetched);
        assert_eq!(fetched["discount"], json!(0));
    }

    #[test]
    fn test_fallback_resets_fields_and_filters_arrays() {
        let collection = products();
        let field_types = FieldTypeRegistry::with_builtin();
        let pipeline = FieldPipeline::new(&collection, &field_types, "en");

        let mut fetched = record(json!({
            "name": "Lamp",
            "price": -4,
            "tags": [1, "x", 3, "y"]
        }));
        pipeline.fallback(&mut fetched, ValidatorFilter::Applicable);
        assert_eq!(fetched["price"], json!(1));
        assert_eq!(fetched["tags"], json!([1, 3]));
    }

    #[test]
    fn test_read_flagged_fallback_ignores_bare_validators() {
        let collection = CollectionDefinition::builder("notes")
            .field(
                "title",
                FieldDeclaration::new("text")
                    .with_options(json!({ "default": "untitled" }))
                    .with_validator(Validator::scoped(OperationScope::on_read(), |ctx| {
                        if ctx.value == &json!("secret") {
                            Err(ValidationFailure::new("Hidden"))
                        } else {
                            Ok(())
                        }
                    })),
            )
            .field(
                "body",
                FieldDeclaration::new("text").with_options(json!({ "maxLength": 3 })),
            )
            .build();
        let field_types = FieldTypeRegistry::with_builtin();
        let pipeline = FieldPipeline::new(&collection, &field_types, "en");

        let mut fetched = record(json!({ "title": "secret", "body": "too long" }));
        pipeline.fallback(&mut fetched, ValidatorFilter::ReadFlagged);
        assert_eq!(fetched["title"], json!("untitled"));
        assert_eq!(fetched["body"], json!("too long"));
    }

    #[test]
    fn test_paths() {
        let mut value = record(json!({ "gallery": [{ "caption": "a" }, { "caption": "b" }] }));
        assert_eq!(
            value_at_mut(&mut value, "gallery.1.caption").cloned(),
            Some(json!("b"))
        );
        remove_path(&mut value, "gallery.0.caption");
        remove_path(&mut value, "gallery.1");
        assert_eq!(value, record(json!({ "gallery": [{}] })));
    }

    #[test]
    fn test_cast_row_drops_keyword_columns() {
        let collection = products();
        let field_types = FieldTypeRegistry::with_builtin();
        let row = record(json!({ "id": 1, "tags": "[\"2\"]", "_search_default": "lamp" }));
        let cast = cast_row(&collection, &field_types, row);
        assert_eq!(cast, record(json!({ "id": 1, "tags": [2] })));
    }
}
