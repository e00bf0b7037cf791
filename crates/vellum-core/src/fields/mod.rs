//! Built-in field types.

mod number;
mod record;
mod select;
mod switch;
mod text;

use serde_json::{Number, Value};
use std::sync::Arc;

use crate::field_type::{FieldType, ValidateContext, ValidationFailure, Validator};

pub use number::NumberField;
pub use record::{RecordField, RecordPopulator, RecordsField, RecordsPopulator};
pub use select::SelectField;
pub use switch::SwitchField;
pub use text::TextField;

/// Every built-in field type.
pub fn builtin() -> Vec<Arc<dyn FieldType>> {
    vec![
        Arc::new(TextField),
        Arc::new(NumberField),
        Arc::new(SwitchField),
        Arc::new(SelectField),
        Arc::new(RecordField),
        Arc::new(RecordsField),
    ]
}

/// Validator rejecting missing values on fields declared `required`.
pub(crate) fn required_validator() -> Validator {
    Validator::new(|ctx: &ValidateContext<'_>| {
        if ctx.field.is_required() && is_blank(ctx.value) {
            return Err(ValidationFailure::new("This field is required"));
        }
        Ok(())
    })
}

pub(crate) fn is_blank(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::String(s) => s.trim().is_empty(),
        Value::Array(items) => items.is_empty(),
        _ => false,
    }
}

/// Parses a numeric string into a JSON number, integers first.
pub(crate) fn parse_number(text: &str) -> Option<Value> {
    let text = text.trim();
    if let Ok(i) = text.parse::<i64>() {
        return Some(Value::Number(i.into()));
    }
    text.parse::<f64>()
        .ok()
        .and_then(Number::from_f64)
        .map(Value::Number)
}

/// Interprets a value as a positive integer id.
pub(crate) fn as_record_id(value: &Value) -> Option<u64> {
    match value {
        Value::Number(n) => n.as_u64().filter(|id| *id > 0),
        Value::String(s) => s.trim().parse::<u64>().ok().filter(|id| *id > 0),
        _ => None,
    }
}
