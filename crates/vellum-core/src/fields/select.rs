use serde_json::Value;

use super::required_validator;
use crate::field_type::{FieldType, KeywordContext, StorageType, ValidationFailure, Validator};
use crate::record::value_to_text;
use crate::schema::FieldDeclaration;

/// One value out of `choices`, given as strings or `{ "value", "label" }` objects.
pub struct SelectField;

fn choices(field: &FieldDeclaration) -> Vec<(String, String)> {
    field
        .option("choices")
        .and_then(Value::as_array)
        .map(|items| {
            items
                .iter()
                .filter_map(|item| match item {
                    Value::String(s) => Some((s.clone(), s.clone())),
                    Value::Object(obj) => {
                        let value = value_to_text(obj.get("value")?);
                        let label = obj
                            .get("label")
                            .map(value_to_text)
                            .unwrap_or_else(|| value.clone());
                        Some((value, label))
                    }
                    _ => None,
                })
                .collect()
        })
        .unwrap_or_default()
}

impl FieldType for SelectField {
    fn name(&self) -> &str {
        "select"
    }

    fn storage_type(&self) -> StorageType {
        StorageType::Text
    }

    fn validators(&self) -> Vec<Validator> {
        vec![
            required_validator(),
            Validator::new(|ctx| {
                if ctx.value.is_null() {
                    return Ok(());
                }
                let value = value_to_text(ctx.value);
                if choices(ctx.field).iter().any(|(choice, _)| *choice == value) {
                    Ok(())
                } else {
                    Err(ValidationFailure::new("The value is not one of the allowed choices"))
                }
            }),
        ]
    }

    /// Labels are indexed instead of raw values.
    fn extract_keywords(&self, ctx: &KeywordContext<'_>) -> String {
        let value = value_to_text(ctx.value);
        choices(ctx.field)
            .into_iter()
            .find(|(choice, _)| *choice == value)
            .map(|(_, label)| label)
            .unwrap_or(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::Record;
    use crate::schema::CollectionDefinition;
    use serde_json::json;

    #[test]
    fn test_choices_from_strings_and_objects() {
        let decl = FieldDeclaration::new("select").with_options(json!({
            "choices": ["draft", { "value": "live", "label": "Published" }, 3]
        }));
        assert_eq!(
            choices(&decl),
            vec![
                ("draft".to_string(), "draft".to_string()),
                ("live".to_string(), "Published".to_string()),
            ]
        );
    }

    #[test]
    fn test_keywords_use_label() {
        let def = CollectionDefinition::builder("posts").build();
        let decl = FieldDeclaration::new("select")
            .with_options(json!({ "choices": [{ "value": "live", "label": "Published" }] }));
        let record = Record::new();
        let value = json!("live");
        let ctx = KeywordContext {
            collection: &def,
            field_name: "status",
            field: &decl,
            value: &value,
            record: &record,
        };
        assert_eq!(SelectField.extract_keywords(&ctx), "Published");
    }
}
