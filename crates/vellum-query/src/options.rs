//! The serializable state of a query builder.

use indexmap::{IndexMap, IndexSet};
use serde::{Deserialize, Serialize};
use vellum_storage::{FilterNode, SortDirection};

/// What an order entry sorts by.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum OrderTarget {
    Field(String),
    /// Relevance against the tokens searched in a search structure.
    Relevance(String),
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct OrderSpec {
    pub target: OrderTarget,
    pub direction: SortDirection,
}

impl OrderSpec {
    pub fn field(field: impl Into<String>, direction: SortDirection) -> Self {
        Self {
            target: OrderTarget::Field(field.into()),
            direction,
        }
    }

    pub fn relevance(structure: impl Into<String>) -> Self {
        Self {
            target: OrderTarget::Relevance(structure.into()),
            direction: SortDirection::AscNullsLast,
        }
    }
}

/// How fetched values are returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub enum FieldValueType {
    #[default]
    Casted,
    Populated,
}

/// Full builder state. Two builders with equal options issue the same query.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryOptions {
    pub select: IndexSet<String>,
    pub filter: FilterNode,
    /// Search structure → lowercase tokens.
    pub search: IndexMap<String, Vec<String>>,
    pub order: Vec<OrderSpec>,
    pub group: Vec<String>,
    pub offset: Option<u64>,
    pub limit: Option<u64>,
    pub field_value_type: FieldValueType,
    pub fallback: bool,
    pub language: String,
}

impl QueryOptions {
    /// Default options for a collection: every field selected, casted values, fallback on.
    pub fn new<'a>(fields: impl IntoIterator<Item = &'a str>, language: impl Into<String>) -> Self {
        Self {
            select: fields.into_iter().map(str::to_string).collect(),
            filter: FilterNode::And(Vec::new()),
            search: IndexMap::new(),
            order: Vec::new(),
            group: Vec::new(),
            offset: None,
            limit: None,
            field_value_type: FieldValueType::Casted,
            fallback: true,
            language: language.into(),
        }
    }

    pub fn populates(&self) -> bool {
        self.field_value_type == FieldValueType::Populated
    }

    /// Appends a node to the root AND group.
    pub fn push_filter(&mut self, node: FilterNode) {
        match &mut self.filter {
            FilterNode::And(children) => children.push(node),
            other => {
                let previous = std::mem::take(other);
                *other = FilterNode::And(vec![previous, node]);
            }
        }
    }
}
