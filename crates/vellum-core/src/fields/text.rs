use serde_json::Value;

use super::required_validator;
use crate::field_type::{
    DefaultContext, FieldType, Sanitizer, StorageType, ValidationFailure, Validator,
};

/// Free-form text. Options: `required`, `minLength`, `maxLength`, `default`.
pub struct TextField;

impl FieldType for TextField {
    fn name(&self) -> &str {
        "text"
    }

    fn storage_type(&self) -> StorageType {
        StorageType::Text
    }

    fn default_value(&self, ctx: &DefaultContext<'_>) -> Value {
        match ctx.field.option("default") {
            Some(value) => value.clone(),
            None if ctx.field.additional.nullable => Value::Null,
            None => Value::String(String::new()),
        }
    }

    fn sanitizers(&self) -> Vec<Sanitizer> {
        vec![Sanitizer::new(|ctx| match ctx.value {
            Value::String(s) => Value::String(s.trim().to_string()),
            Value::Number(n) => Value::String(n.to_string()),
            other => other.clone(),
        })]
    }

    fn validators(&self) -> Vec<Validator> {
        vec![
            required_validator(),
            Validator::new(|ctx| match ctx.value {
                Value::String(_) => Ok(()),
                Value::Null if ctx.field.additional.nullable || !ctx.field.is_required() => Ok(()),
                _ => Err(ValidationFailure::new("The value must be a string")),
            }),
            Validator::new(|ctx| {
                let Some(text) = ctx.value.as_str() else {
                    return Ok(());
                };
                let length = text.chars().count() as u64;
                if let Some(min) = ctx.field.option("minLength").and_then(Value::as_u64)
                    && length < min
                {
                    return Err(ValidationFailure::new(format!(
                        "The value must be at least {min} characters long"
                    )));
                }
                if let Some(max) = ctx.field.option("maxLength").and_then(Value::as_u64)
                    && length > max
                {
                    return Err(ValidationFailure::new(format!(
                        "The value must be at most {max} characters long"
                    )));
                }
                Ok(())
            }),
        ]
    }
}
