use serde_json::Value;

use super::{parse_number, required_validator};
use crate::field_type::{
    DefaultContext, FieldType, Sanitizer, StorageType, ValidationFailure, Validator,
};

/// Numeric field. Options: `required`, `min`, `max`, `integer`, `default`.
pub struct NumberField;

impl FieldType for NumberField {
    fn name(&self) -> &str {
        "number"
    }

    fn storage_type(&self) -> StorageType {
        StorageType::Number
    }

    fn default_value(&self, ctx: &DefaultContext<'_>) -> Value {
        match ctx.field.option("default") {
            Some(value) => value.clone(),
            None if ctx.field.additional.nullable => Value::Null,
            None => Value::from(0),
        }
    }

    fn sanitizers(&self) -> Vec<Sanitizer> {
        vec![Sanitizer::new(|ctx| match ctx.value {
            Value::String(s) if s.trim().is_empty() => Value::Null,
            Value::String(s) => parse_number(s).unwrap_or_else(|| ctx.value.clone()),
            other => other.clone(),
        })]
    }

    fn validators(&self) -> Vec<Validator> {
        vec![
            required_validator(),
            Validator::new(|ctx| match ctx.value {
                Value::Number(_) | Value::Null => Ok(()),
                _ => Err(ValidationFailure::new("The value must be a number")),
            }),
            Validator::new(|ctx| {
                let Some(number) = ctx.value.as_f64() else {
                    return Ok(());
                };
                let integer = ctx
                    .field
                    .option("integer")
                    .and_then(Value::as_bool)
                    .unwrap_or(false);
                if integer && number.fract() != 0.0 {
                    return Err(ValidationFailure::new("The value must be an integer"));
                }
                if let Some(min) = ctx.field.option("min").and_then(Value::as_f64)
                    && number < min
                {
                    return Err(ValidationFailure::new(format!(
                        "The value must be greater than or equal to {min}"
                    )));
                }
                if let Some(max) = ctx.field.option("max").and_then(Value::as_f64)
                    && number > max
                {
                    return Err(ValidationFailure::new(format!(
                        "The value must be less than or equal to {max}"
                    )));
                }
                Ok(())
            }),
        ]
    }

    fn deserialize(&self, value: &Value) -> Value {
        match value {
            Value::String(s) => parse_number(s).unwrap_or(Value::Null),
            other => other.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::field_type::ValidateContext;
    use crate::record::{Operation, Record};
    use crate::schema::{CollectionDefinition, FieldDeclaration};
    use crate::FieldTypeRegistry;
    use serde_json::json;

    fn run(declaration: &FieldDeclaration, value: Value) -> Result<(), ValidationFailure> {
        let def = CollectionDefinition::builder("products").build();
        let registry = FieldTypeRegistry::with_builtin();
        let input = Record::new();
        let ctx = ValidateContext {
            collection: &def,
            field_name: "price",
            field: declaration,
            value: &value,
            input: &input,
            operation: Operation::Update,
            language: "en",
            all_inputs: None,
            field_types: &registry,
        };
        NumberField
            .validators()
            .iter()
            .try_for_each(|validator| validator.validate(&ctx))
    }

    #[test]
    fn test_bounds() {
        let decl = FieldDeclaration::new("number").with_options(json!({ "min": 0, "max": 100 }));
        assert!(run(&decl, json!(50)).is_ok());
        assert!(run(&decl, json!(-1)).is_err());
        assert_eq!(
            run(&decl, json!(101)),
            Err(ValidationFailure::new(
                "The value must be less than or equal to 100"
            ))
        );
        assert!(run(&decl, json!("12")).is_err());
    }

    #[test]
    fn test_integer_option() {
        let decl = FieldDeclaration::new("number").with_options(json!({ "integer": true }));
        assert!(run(&decl, json!(3)).is_ok());
        assert!(run(&decl, json!(3.5)).is_err());
    }

    #[test]
    fn test_deserialize_numeric_text() {
        assert_eq!(NumberField.deserialize(&json!("12")), json!(12));
        assert_eq!(NumberField.deserialize(&json!("x")), json!(null));
        assert_eq!(NumberField.deserialize(&json!(1.5)), json!(1.5));
    }
}
