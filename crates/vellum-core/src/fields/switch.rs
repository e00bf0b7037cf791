use serde_json::Value;

use crate::field_type::{
    DefaultContext, FieldType, Sanitizer, StorageType, ValidationFailure, Validator,
};

/// Boolean on/off field.
pub struct SwitchField;

fn coerce(value: &Value) -> Option<bool> {
    match value {
        Value::Bool(b) => Some(*b),
        Value::Number(n) => match n.as_i64() {
            Some(0) => Some(false),
            Some(1) => Some(true),
            _ => None,
        },
        Value::String(s) => match s.trim().to_ascii_lowercase().as_str() {
            "true" | "1" | "yes" | "on" => Some(true),
            "false" | "0" | "no" | "off" => Some(false),
            _ => None,
        },
        _ => None,
    }
}

impl FieldType for SwitchField {
    fn name(&self) -> &str {
        "switch"
    }

    fn storage_type(&self) -> StorageType {
        StorageType::Boolean
    }

    fn default_value(&self, ctx: &DefaultContext<'_>) -> Value {
        ctx.field
            .option("default")
            .and_then(coerce)
            .map(Value::Bool)
            .unwrap_or(Value::Bool(false))
    }

    fn sanitizers(&self) -> Vec<Sanitizer> {
        vec![Sanitizer::new(|ctx| {
            coerce(ctx.value)
                .map(Value::Bool)
                .unwrap_or_else(|| ctx.value.clone())
        })]
    }

    fn validators(&self) -> Vec<Validator> {
        vec![Validator::new(|ctx| match ctx.value {
            Value::Bool(_) => Ok(()),
            Value::Null if ctx.field.additional.nullable => Ok(()),
            _ => Err(ValidationFailure::new("The value must be a boolean")),
        })]
    }

    fn deserialize(&self, value: &Value) -> Value {
        coerce(value).map(Value::Bool).unwrap_or(Value::Null)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_coerce() {
        assert_eq!(coerce(&json!("on")), Some(true));
        assert_eq!(coerce(&json!(0)), Some(false));
        assert_eq!(coerce(&json!(2)), None);
        assert_eq!(coerce(&json!("maybe")), None);
    }

    #[test]
    fn test_deserialize_stored_integers() {
        assert_eq!(SwitchField.deserialize(&json!(1)), json!(true));
        assert_eq!(SwitchField.deserialize(&json!(false)), json!(false));
    }
}
