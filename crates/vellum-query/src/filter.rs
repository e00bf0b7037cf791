//! Fluent filter composition.
//!
//! Conditions added through [`WhereBuilder`] are appended to the current AND group.
//! [`some`](WhereBuilder::some) runs each branch against a fresh scope and appends
//! `OR(AND(branch₁), AND(branch₂), ...)`, so nesting composes the same way at any depth.

use serde_json::Value;
use vellum_storage::{FilterNode, Operator};

/// A branch of [`WhereBuilder::some`] or [`WhereBuilder::every`].
pub type Branch = Box<dyn FnOnce(FilterScope) -> FilterScope + Send>;

/// Boxes a closure as a filter branch.
pub fn branch(f: impl FnOnce(FilterScope) -> FilterScope + Send + 'static) -> Branch {
    Box::new(f)
}

/// How [`WhereBuilder::where_records_in`] combines the requested ids.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum RecordsMatch {
    /// At least one id is referenced.
    #[default]
    Some,
    /// Every id is referenced.
    Every,
}

/// An AND group under construction.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct FilterScope {
    nodes: Vec<FilterNode>,
}

impl FilterScope {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn nodes(&self) -> &[FilterNode] {
        &self.nodes
    }

    pub fn into_node(self) -> FilterNode {
        FilterNode::And(self.nodes)
    }

    pub fn into_nodes(self) -> Vec<FilterNode> {
        self.nodes
    }
}

impl From<Vec<FilterNode>> for FilterScope {
    fn from(nodes: Vec<FilterNode>) -> Self {
        Self { nodes }
    }
}

/// Filter methods shared by query builders and nested filter scopes.
pub trait WhereBuilder: Sized {
    /// Hands the current AND group to `f` and stores what it returns.
    fn map_filter(self, f: impl FnOnce(FilterScope) -> FilterScope) -> Self;

    fn where_op(self, field: impl Into<String>, operator: Operator, value: Value) -> Self {
        let node = FilterNode::condition(field, operator, value);
        self.map_filter(|mut scope| {
            scope.nodes.push(node);
            scope
        })
    }

    fn where_eq(self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.where_op(field, Operator::Eq, value.into())
    }

    fn where_ne(self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.where_op(field, Operator::Ne, value.into())
    }

    fn where_gt(self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.where_op(field, Operator::Gt, value.into())
    }

    fn where_gte(self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.where_op(field, Operator::Gte, value.into())
    }

    fn where_lt(self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.where_op(field, Operator::Lt, value.into())
    }

    fn where_lte(self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.where_op(field, Operator::Lte, value.into())
    }

    /// Takes the bounds as given; their count is checked when SQL is built.
    fn where_between(self, field: impl Into<String>, bounds: Vec<Value>) -> Self {
        self.where_op(field, Operator::Between, Value::Array(bounds))
    }

    fn where_not_between(self, field: impl Into<String>, bounds: Vec<Value>) -> Self {
        self.where_op(field, Operator::NotBetween, Value::Array(bounds))
    }

    fn where_in(self, field: impl Into<String>, values: Vec<Value>) -> Self {
        self.where_op(field, Operator::In, Value::Array(values))
    }

    fn where_not_in(self, field: impl Into<String>, values: Vec<Value>) -> Self {
        self.where_op(field, Operator::NotIn, Value::Array(values))
    }

    fn where_like(self, field: impl Into<String>, pattern: impl Into<String>) -> Self {
        self.where_op(field, Operator::Like, Value::String(pattern.into()))
    }

    fn where_not_like(self, field: impl Into<String>, pattern: impl Into<String>) -> Self {
        self.where_op(field, Operator::NotLike, Value::String(pattern.into()))
    }

    fn where_ilike(self, field: impl Into<String>, pattern: impl Into<String>) -> Self {
        self.where_op(field, Operator::ILike, Value::String(pattern.into()))
    }

    fn where_not_ilike(self, field: impl Into<String>, pattern: impl Into<String>) -> Self {
        self.where_op(field, Operator::NotILike, Value::String(pattern.into()))
    }

    /// Matches records whose serialized id list (`["1","12"]`) references the given ids.
    fn where_records_in(self, field: impl Into<String>, ids: &[u64], mode: RecordsMatch) -> Self {
        let field = field.into();
        let conditions: Vec<FilterNode> = ids
            .iter()
            .map(|id| {
                FilterNode::condition(
                    field.clone(),
                    Operator::Like,
                    Value::String(format!("%\"{id}\"%")),
                )
            })
            .collect();
        let node = match mode {
            RecordsMatch::Some => FilterNode::Or(conditions),
            RecordsMatch::Every => FilterNode::And(conditions),
        };
        self.map_filter(|mut scope| {
            scope.nodes.push(node);
            scope
        })
    }

    /// Appends `OR(AND(branch₁), ...)` to the current group.
    fn some(self, branches: Vec<Branch>) -> Self {
        self.map_filter(|scope| {
            let mut nodes = scope.nodes;
            let alternatives = branches
                .into_iter()
                .map(|branch| branch(FilterScope::new()).into_node())
                .collect();
            nodes.push(FilterNode::Or(alternatives));
            FilterScope { nodes }
        })
    }

    /// Runs every branch against the current group.
    fn every(self, branches: Vec<Branch>) -> Self {
        self.map_filter(|scope| {
            branches
                .into_iter()
                .fold(scope, |scope, branch| branch(scope))
        })
    }
}

impl WhereBuilder for FilterScope {
    fn map_filter(self, f: impl FnOnce(FilterScope) -> FilterScope) -> Self {
        f(self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn test_conditions_append_to_and_group() {
        let scope = FilterScope::new()
            .where_gte("price", 5)
            .where_ilike("name", "%lamp%");
        assert_eq!(
            scope.into_node(),
            FilterNode::And(vec![
                FilterNode::condition("price", Operator::Gte, json!(5)),
                FilterNode::condition("name", Operator::ILike, json!("%lamp%")),
            ])
        );
    }

    #[test]
    fn test_some_appends_or_of_and_groups() {
        let scope = FilterScope::new().where_eq("active", true).some(vec![
            branch(|s| s.where_lt("price", 100)),
            branch(|s| s.where_gte("discount", 0.5)),
        ]);
        assert_eq!(
            scope.into_node(),
            FilterNode::And(vec![
                FilterNode::condition("active", Operator::Eq, json!(true)),
                FilterNode::Or(vec![
                    FilterNode::And(vec![FilterNode::condition(
                        "price",
                        Operator::Lt,
                        json!(100)
                    )]),
                    FilterNode::And(vec![FilterNode::condition(
                        "discount",
                        Operator::Gte,
                        json!(0.5)
                    )]),
                ]),
            ])
        );
    }

    #[test]
    fn test_nested_some_inside_every() {
        let scope = FilterScope::new().every(vec![
            branch(|s| s.where_eq("a", 1)),
            branch(|s| {
                s.some(vec![
                    branch(|s| s.where_eq("b", 2)),
                    branch(|s| s.where_eq("c", 3)),
                ])
            }),
        ]);
        let nodes = scope.into_nodes();
        assert_eq!(nodes.len(), 2);
        assert!(matches!(&nodes[1], FilterNode::Or(alts) if alts.len() == 2));
    }

    #[test]
    fn test_where_records_in() {
        let scope = FilterScope::new().where_records_in("tags", &[1, 12], RecordsMatch::Every);
        assert_eq!(
            scope.into_nodes(),
            vec![FilterNode::And(vec![
                FilterNode::condition("tags", Operator::Like, json!("%\"1\"%")),
                FilterNode::condition("tags", Operator::Like, json!("%\"12\"%")),
            ])]
        );
    }
}
