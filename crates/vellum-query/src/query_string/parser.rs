//! `where` expression parser.
//!
//! Terms are separated by commas and combined with AND:
//!
//! - `field[operator][value]` is one condition,
//! - `[...]` is a nested AND group,
//! - `some:[t₁,t₂]` is `OR(AND(t₁), AND(t₂))`,
//! - `every:[t₁,t₂]` is `AND(t₁, t₂)`.
//!
//! Errors are collected and parsing continues with the next term.

use serde_json::{Number, Value};
use vellum_core::{CollectionDefinition, FieldTypeRegistry, StorageType};
use vellum_storage::{Arity, FilterNode, Operator};

use super::error::QueryStringError;
use super::tokenizer::{Token, render_all, tokenize};

pub struct WhereParser<'a> {
    collection: &'a CollectionDefinition,
    field_types: &'a FieldTypeRegistry,
    errors: Vec<QueryStringError>,
}

impl<'a> WhereParser<'a> {
    pub fn new(collection: &'a CollectionDefinition, field_types: &'a FieldTypeRegistry) -> Self {
        Self {
            collection,
            field_types,
            errors: Vec::new(),
        }
    }

    /// Parses a full expression into the nodes of the root AND group.
    pub fn parse(mut self, input: &str) -> (Vec<FilterNode>, Vec<QueryStringError>) {
        match tokenize(input) {
            Ok(tokens) => {
                let nodes = self.terms(&tokens);
                (nodes, self.errors)
            }
            Err(error) => (Vec::new(), vec![error]),
        }
    }

    fn terms(&mut self, tokens: &[Token]) -> Vec<FilterNode> {
        let mut nodes = Vec::new();
        let mut i = 0;

        while i < tokens.len() {
            match &tokens[i] {
                Token::Comma => i += 1,
                Token::Group(inner) => {
                    nodes.push(FilterNode::And(self.terms(inner)));
                    i += 1;
                }
                Token::Text(text) => {
                    let word = text.trim();

                    if let Some(keyword) = word.strip_suffix(':')
                        && matches!(keyword, "some" | "every")
                    {
                        match tokens.get(i + 1) {
                            Some(Token::Group(inner)) => {
                                let terms = self.terms(inner);
                                nodes.push(if keyword == "some" {
                                    FilterNode::Or(terms.into_iter().map(and_group).collect())
                                } else {
                                    FilterNode::And(terms)
                                });
                                i += 2;
                            }
                            _ => {
                                self.errors.push(QueryStringError::invalid_where(word));
                                i = skip_term(tokens, i + 1);
                            }
                        }
                        continue;
                    }

                    match (tokens.get(i + 1), tokens.get(i + 2)) {
                        (Some(Token::Group(operator)), Some(Token::Group(value))) => {
                            if let Some(node) = self.condition(word, operator, value) {
                                nodes.push(node);
                            }
                            i += 3;
                        }
                        _ => {
                            let fragment = render_all(&tokens[i..skip_term(tokens, i + 1)]);
                            self.errors
                                .push(QueryStringError::invalid_where(fragment.trim()));
                            i = skip_term(tokens, i + 1);
                        }
                    }
                }
            }
        }

        nodes
    }

    fn condition(&mut self, field: &str, operator: &[Token], value: &[Token]) -> Option<FilterNode> {
        let Some(declaration) = self.collection.field(field) else {
            self.errors.push(QueryStringError::unknown_field(field));
            return None;
        };
        if declaration.additional.protected {
            self.errors.push(QueryStringError::protected_field(field));
            return None;
        }

        let operator_text = render_all(operator);
        let operator: Operator = match operator_text.trim().parse() {
            Ok(operator) => operator,
            Err(_) => {
                self.errors.push(QueryStringError::UnknownOperator {
                    operator: operator_text.trim().to_string(),
                });
                return None;
            }
        };

        let storage = self.field_types.storage_type(declaration);
        if (operator.is_ordering() && !storage.supports_ordering())
            || (operator.is_pattern() && !storage.supports_patterns())
        {
            self.errors.push(QueryStringError::IncompatibleOperator {
                field: field.to_string(),
                operator: operator.to_string(),
            });
            return None;
        }

        let raw = render_all(value);
        let incompatible = || QueryStringError::IncompatibleValue {
            field: field.to_string(),
            operator: operator.to_string(),
            value: raw.clone(),
        };

        let coerced = match operator.arity() {
            Arity::Scalar => coerce(&raw, storage, operator).map_err(|_| incompatible()),
            Arity::Pair | Arity::List => {
                let items = split_items(value);
                if operator.arity() == Arity::Pair && items.len() != 2 {
                    Err(incompatible())
                } else {
                    items
                        .iter()
                        .map(|item| coerce(item, storage, operator))
                        .collect::<Result<Vec<_>, ()>>()
                        .map(Value::Array)
                        .map_err(|_| incompatible())
                }
            }
        };

        match coerced {
            Ok(value) => Some(FilterNode::condition(field, operator, value)),
            Err(error) => {
                self.errors.push(error);
                None
            }
        }
    }
}

fn and_group(node: FilterNode) -> FilterNode {
    match node {
        FilterNode::And(_) => node,
        other => FilterNode::And(vec![other]),
    }
}

/// Index of the token after the next top-level comma.
fn skip_term(tokens: &[Token], from: usize) -> usize {
    tokens[from.min(tokens.len())..]
        .iter()
        .position(|token| *token == Token::Comma)
        .map(|offset| from + offset + 1)
        .unwrap_or(tokens.len())
}

fn split_items(tokens: &[Token]) -> Vec<String> {
    if tokens.is_empty() {
        return Vec::new();
    }
    tokens
        .split(|token| *token == Token::Comma)
        .map(render_all)
        .collect()
}

fn coerce(raw: &str, storage: StorageType, operator: Operator) -> Result<Value, ()> {
    if operator.is_pattern() {
        return Ok(Value::String(raw.to_string()));
    }
    let trimmed = raw.trim();
    if trimmed == "null" {
        return Ok(Value::Null);
    }
    match storage {
        StorageType::Number => {
            if let Ok(int) = trimmed.parse::<i64>() {
                Ok(Value::from(int))
            } else {
                trimmed
                    .parse::<f64>()
                    .ok()
                    .and_then(Number::from_f64)
                    .map(Value::Number)
                    .ok_or(())
            }
        }
        StorageType::Boolean => match trimmed {
            "true" | "1" => Ok(Value::Bool(true)),
            "false" | "0" => Ok(Value::Bool(false)),
            _ => Err(()),
        },
        StorageType::Text => Ok(Value::String(raw.to_string())),
    }
}
