//! Conditional logic: activation rules making a field depend on other field values.

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::cmp::Ordering;
use std::collections::{HashMap, HashSet};

use crate::field_type::FieldTypeRegistry;
use crate::record::{Record, value_to_text};
use crate::schema::CollectionDefinition;

/// Comparison used by a conditional-logic leaf.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ConditionOp {
    #[serde(rename = "=")]
    Eq,
    #[serde(rename = "!=")]
    Ne,
    #[serde(rename = ">")]
    Gt,
    #[serde(rename = ">=")]
    Gte,
    #[serde(rename = "<")]
    Lt,
    #[serde(rename = "<=")]
    Lte,
    #[serde(rename = "includes")]
    Includes,
    #[serde(rename = "!includes")]
    NotIncludes,
    #[serde(rename = "regexp")]
    Regexp,
}

/// A condition on the value of another field.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct FieldCondition {
    pub op: ConditionOp,
    pub value: Value,
}

impl FieldCondition {
    pub fn new(op: ConditionOp, value: Value) -> Self {
        Self { op, value }
    }

    /// Evaluates the condition against `actual` with loose, type-coercing comparison.
    pub fn matches(&self, actual: &Value) -> bool {
        match self.op {
            ConditionOp::Eq => loose_eq(actual, &self.value),
            ConditionOp::Ne => !loose_eq(actual, &self.value),
            ConditionOp::Gt => compare(actual, &self.value) == Some(Ordering::Greater),
            ConditionOp::Gte => matches!(
                compare(actual, &self.value),
                Some(Ordering::Greater | Ordering::Equal)
            ),
            ConditionOp::Lt => compare(actual, &self.value) == Some(Ordering::Less),
            ConditionOp::Lte => matches!(
                compare(actual, &self.value),
                Some(Ordering::Less | Ordering::Equal)
            ),
            ConditionOp::Includes => includes(actual, &self.value),
            ConditionOp::NotIncludes => !includes(actual, &self.value),
            ConditionOp::Regexp => Regex::new(&value_to_text(&self.value))
                .map(|re| re.is_match(&value_to_text(actual)))
                .unwrap_or(false),
        }
    }
}

fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        Value::Bool(b) => Some(if *b { 1.0 } else { 0.0 }),
        _ => None,
    }
}

fn loose_eq(a: &Value, b: &Value) -> bool {
    if a == b {
        return true;
    }
    if a.is_null() || b.is_null() {
        return false;
    }
    match (as_number(a), as_number(b)) {
        (Some(x), Some(y)) => x == y,
        _ => value_to_text(a) == value_to_text(b),
    }
}

fn compare(a: &Value, b: &Value) -> Option<Ordering> {
    if a.is_null() || b.is_null() {
        return None;
    }
    match (as_number(a), as_number(b)) {
        (Some(x), Some(y)) => x.partial_cmp(&y),
        _ => Some(value_to_text(a).cmp(&value_to_text(b))),
    }
}

fn includes(haystack: &Value, needle: &Value) -> bool {
    match haystack {
        Value::Array(items) => items.iter().any(|item| loose_eq(item, needle)),
        Value::String(s) => s.contains(&value_to_text(needle)),
        _ => false,
    }
}

/// Activation rule tree of a field.
#[derive(Debug, Clone, PartialEq)]
pub enum ConditionalLogic {
    Field {
        field: String,
        condition: FieldCondition,
    },
    /// Active when any rule holds.
    Some(Vec<ConditionalLogic>),
    /// Active when every rule holds.
    Every(Vec<ConditionalLogic>),
}

impl ConditionalLogic {
    pub fn field(field: impl Into<String>, op: ConditionOp, value: Value) -> Self {
        Self::Field {
            field: field.into(),
            condition: FieldCondition::new(op, value),
        }
    }

    pub fn some(rules: Vec<ConditionalLogic>) -> Self {
        Self::Some(rules)
    }

    pub fn every(rules: Vec<ConditionalLogic>) -> Self {
        Self::Every(rules)
    }

    /// Names of the fields this rule tree references.
    pub fn referenced_fields(&self) -> Vec<&str> {
        match self {
            Self::Field { field, .. } => vec![field.as_str()],
            Self::Some(rules) | Self::Every(rules) => {
                rules.iter().flat_map(|r| r.referenced_fields()).collect()
            }
        }
    }
}

/// Evaluates the conditional logic of every field of a record.
///
/// A field is active when its own rules hold and every field those rules reference is
/// itself active. Reference cycles resolve to inactive.
pub struct ConditionalLogicResolver<'a> {
    collection: &'a CollectionDefinition,
    record: &'a Record,
    field_types: &'a FieldTypeRegistry,
    memo: HashMap<String, bool>,
    visiting: HashSet<String>,
}

impl<'a> ConditionalLogicResolver<'a> {
    pub fn new(
        collection: &'a CollectionDefinition,
        record: &'a Record,
        field_types: &'a FieldTypeRegistry,
    ) -> Self {
        Self {
            collection,
            record,
            field_types,
            memo: HashMap::new(),
            visiting: HashSet::new(),
        }
    }

    pub fn is_active(&mut self, field_name: &str) -> bool {
        if let Some(active) = self.memo.get(field_name) {
            return *active;
        }
        let Some(declaration) = self.collection.field(field_name) else {
            return false;
        };
        let Some(logic) = declaration.additional.conditional_logic.as_ref() else {
            self.memo.insert(field_name.to_string(), true);
            return true;
        };
        if !self.visiting.insert(field_name.to_string()) {
            return false;
        }

        let active = self.evaluate(logic);

        self.visiting.remove(field_name);
        self.memo.insert(field_name.to_string(), active);
        active
    }

    fn evaluate(&mut self, logic: &ConditionalLogic) -> bool {
        match logic {
            ConditionalLogic::Field { field, condition } => {
                if !self.is_active(field) {
                    return false;
                }
                let Some(declaration) = self.collection.field(field) else {
                    return false;
                };
                let value = self.record.get(field).unwrap_or(&Value::Null);
                match self.field_types.get(&declaration.field_type) {
                    Some(field_type) => field_type.matches_condition(value, condition),
                    None => condition.matches(value),
                }
            }
            ConditionalLogic::Some(rules) => rules.iter().any(|rule| self.evaluate(rule)),
            ConditionalLogic::Every(rules) => rules.iter().all(|rule| self.evaluate(rule)),
        }
    }

    /// Fields (in declaration order) whose conditional logic does not hold.
    pub fn failing_fields(mut self) -> Vec<String> {
        let names: Vec<String> = self.collection.fields.keys().cloned().collect();
        names
            .into_iter()
            .filter(|name| !self.is_active(name))
            .collect()
    }
}
