//! Store-level query types: filter trees, sort keys and the query passed to a [`Store`].
//!
//! [`Store`]: crate::Store

use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::fmt;
use std::str::FromStr;

/// A row as returned by the store.
pub type Row = serde_json::Map<String, Value>;

/// Comparison operator of a filter leaf.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum Operator {
    Eq,
    Ne,
    Gt,
    Gte,
    Lt,
    Lte,
    Between,
    NotBetween,
    In,
    NotIn,
    Like,
    NotLike,
    ILike,
    NotILike,
}

/// Shape of the value an operator expects.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arity {
    Scalar,
    /// Exactly two values.
    Pair,
    List,
}

impl Operator {
    pub const ALL: [Operator; 14] = [
        Self::Eq,
        Self::Ne,
        Self::Gt,
        Self::Gte,
        Self::Lt,
        Self::Lte,
        Self::Between,
        Self::NotBetween,
        Self::In,
        Self::NotIn,
        Self::Like,
        Self::NotLike,
        Self::ILike,
        Self::NotILike,
    ];

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Eq => "eq",
            Self::Ne => "ne",
            Self::Gt => "gt",
            Self::Gte => "gte",
            Self::Lt => "lt",
            Self::Lte => "lte",
            Self::Between => "between",
            Self::NotBetween => "notBetween",
            Self::In => "in",
            Self::NotIn => "notIn",
            Self::Like => "like",
            Self::NotLike => "notLike",
            Self::ILike => "iLike",
            Self::NotILike => "notILike",
        }
    }

    /// Requires a field whose values have an order.
    pub fn is_ordering(self) -> bool {
        matches!(
            self,
            Self::Gt | Self::Gte | Self::Lt | Self::Lte | Self::Between | Self::NotBetween
        )
    }

    /// Requires a text field.
    pub fn is_pattern(self) -> bool {
        matches!(
            self,
            Self::Like | Self::NotLike | Self::ILike | Self::NotILike
        )
    }

    pub fn arity(self) -> Arity {
        match self {
            Self::Between | Self::NotBetween => Arity::Pair,
            Self::In | Self::NotIn => Arity::List,
            _ => Arity::Scalar,
        }
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// An operator name or symbol that is not part of the operator set.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
#[error("unknown operator '{0}'")]
pub struct UnknownOperator(pub String);

impl FromStr for Operator {
    type Err = UnknownOperator;

    /// Accepts operator names (`notBetween`) and comparison symbols (`>=`).
    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "=" | "==" => return Ok(Self::Eq),
            "!=" | "<>" => return Ok(Self::Ne),
            ">" => return Ok(Self::Gt),
            ">=" => return Ok(Self::Gte),
            "<" => return Ok(Self::Lt),
            "<=" => return Ok(Self::Lte),
            _ => {}
        }
        Self::ALL
            .into_iter()
            .find(|op| op.as_str() == s)
            .ok_or_else(|| UnknownOperator(s.to_string()))
    }
}

/// A `{field, operator, value}` leaf.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Condition {
    pub field: String,
    pub operator: Operator,
    pub value: Value,
}

impl Condition {
    pub fn new(field: impl Into<String>, operator: Operator, value: Value) -> Self {
        Self {
            field: field.into(),
            operator,
            value,
        }
    }
}

/// Node of a filter tree. The root of a query filter is an `And` group.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum FilterNode {
    Condition(Condition),
    And(Vec<FilterNode>),
    Or(Vec<FilterNode>),
}

impl Default for FilterNode {
    fn default() -> Self {
        Self::And(Vec::new())
    }
}

impl FilterNode {
    pub fn condition(field: impl Into<String>, operator: Operator, value: Value) -> Self {
        Self::Condition(Condition::new(field, operator, value))
    }

    /// `true` for a group without children.
    pub fn is_empty(&self) -> bool {
        match self {
            Self::Condition(_) => false,
            Self::And(children) | Self::Or(children) => children.is_empty(),
        }
    }

    /// Every field referenced by a leaf of this tree.
    pub fn fields(&self) -> Vec<&str> {
        let mut fields = Vec::new();
        self.collect_fields(&mut fields);
        fields
    }

    fn collect_fields<'a>(&'a self, out: &mut Vec<&'a str>) {
        match self {
            Self::Condition(condition) => out.push(condition.field.as_str()),
            Self::And(children) | Self::Or(children) => {
                for child in children {
                    child.collect_fields(out);
                }
            }
        }
    }
}

/// Sort direction. Plain directions place nulls first.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "camelCase")]
pub enum SortDirection {
    #[default]
    Asc,
    Desc,
    AscNullsLast,
    DescNullsLast,
}

impl SortDirection {
    pub fn is_descending(self) -> bool {
        matches!(self, Self::Desc | Self::DescNullsLast)
    }

    pub fn nulls_last(self) -> bool {
        matches!(self, Self::AscNullsLast | Self::DescNullsLast)
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Asc => "asc",
            Self::Desc => "desc",
            Self::AscNullsLast => "ascNullsLast",
            Self::DescNullsLast => "descNullsLast",
        }
    }
}

/// What a sort key orders by.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub enum SortTarget {
    Column(String),
    /// Position of the first occurrence of `needle` in `column`, earlier first.
    Position { column: String, needle: String },
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SortKey {
    pub target: SortTarget,
    pub direction: SortDirection,
}

impl SortKey {
    pub fn column(column: impl Into<String>, direction: SortDirection) -> Self {
        Self {
            target: SortTarget::Column(column.into()),
            direction,
        }
    }

    pub fn position(column: impl Into<String>, needle: impl Into<String>) -> Self {
        Self {
            target: SortTarget::Position {
                column: column.into(),
                needle: needle.into(),
            },
            direction: SortDirection::AscNullsLast,
        }
    }
}

/// Aggregate function over one column.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Aggregate {
    Min,
    Max,
    Sum,
}

impl Aggregate {
    pub fn as_sql(self) -> &'static str {
        match self {
            Self::Min => "MIN",
            Self::Max => "MAX",
            Self::Sum => "SUM",
        }
    }
}

/// A single-table query.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct StoreQuery {
    pub table: String,
    /// Projected columns; empty selects every column.
    pub columns: Vec<String>,
    pub filter: FilterNode,
    pub order: Vec<SortKey>,
    pub group: Vec<String>,
    pub offset: Option<u64>,
    pub limit: Option<u64>,
}

impl StoreQuery {
    pub fn new(table: impl Into<String>) -> Self {
        Self {
            table: table.into(),
            ..Self::default()
        }
    }

    #[must_use]
    pub fn with_columns(mut self, columns: Vec<String>) -> Self {
        self.columns = columns;
        self
    }

    #[must_use]
    pub fn with_filter(mut self, filter: FilterNode) -> Self {
        self.filter = filter;
        self
    }

    #[must_use]
    pub fn with_order(mut self, order: Vec<SortKey>) -> Self {
        self.order = order;
        self
    }

    #[must_use]
    pub fn with_group(mut self, group: Vec<String>) -> Self {
        self.group = group;
        self
    }

    #[must_use]
    pub fn with_offset(mut self, offset: Option<u64>) -> Self {
        self.offset = offset;
        self
    }

    #[must_use]
    pub fn with_limit(mut self, limit: Option<u64>) -> Self {
        self.limit = limit;
        self
    }
}

/// Result of a raw query.
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct RawQueryResult {
    pub results: Vec<Row>,
    pub metadata: Value,
}
