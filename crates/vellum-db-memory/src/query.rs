//! Filter evaluation and ordering over in-memory rows.

use serde_json::Value;
use std::cmp::Ordering;
use vellum_storage::{Condition, FilterNode, Operator, Row, SortKey, SortTarget};

/// Whether `row` satisfies the filter tree.
pub fn matches(node: &FilterNode, row: &Row) -> bool {
    match node {
        FilterNode::Condition(condition) => condition_matches(condition, row),
        FilterNode::And(children) => children.iter().all(|child| matches(child, row)),
        FilterNode::Or(children) => children.iter().any(|child| matches(child, row)),
    }
}

fn condition_matches(condition: &Condition, row: &Row) -> bool {
    let actual = row.get(&condition.field).unwrap_or(&Value::Null);
    let expected = &condition.value;

    match condition.operator {
        Operator::Eq if expected.is_null() => actual.is_null(),
        Operator::Ne if expected.is_null() => !actual.is_null(),
        Operator::Eq => compare_values(actual, expected) == Some(Ordering::Equal),
        Operator::Ne => matches!(
            compare_values(actual, expected),
            Some(Ordering::Less | Ordering::Greater)
        ),
        Operator::Gt => compare_values(actual, expected) == Some(Ordering::Greater),
        Operator::Gte => matches!(
            compare_values(actual, expected),
            Some(Ordering::Greater | Ordering::Equal)
        ),
        Operator::Lt => compare_values(actual, expected) == Some(Ordering::Less),
        Operator::Lte => matches!(
            compare_values(actual, expected),
            Some(Ordering::Less | Ordering::Equal)
        ),
        Operator::Between | Operator::NotBetween => {
            let Some([low, high]) = expected
                .as_array()
                .and_then(|bounds| <&[Value; 2]>::try_from(bounds.as_slice()).ok())
            else {
                return false;
            };
            if actual.is_null() {
                return false;
            }
            let within = matches!(
                compare_values(actual, low),
                Some(Ordering::Greater | Ordering::Equal)
            ) && matches!(
                compare_values(actual, high),
                Some(Ordering::Less | Ordering::Equal)
            );
            within == (condition.operator == Operator::Between)
        }
        Operator::In | Operator::NotIn => {
            let Some(items) = expected.as_array() else {
                return false;
            };
            let found = items
                .iter()
                .any(|item| compare_values(actual, item) == Some(Ordering::Equal));
            match condition.operator {
                Operator::In => found,
                _ => !actual.is_null() && !found,
            }
        }
        Operator::Like | Operator::NotLike | Operator::ILike | Operator::NotILike => {
            let (Some(text), Some(pattern)) = (as_text(actual), as_text(expected)) else {
                return false;
            };
            let insensitive = matches!(condition.operator, Operator::ILike | Operator::NotILike);
            let hit = if insensitive {
                like_match(&text.to_lowercase(), &pattern.to_lowercase())
            } else {
                like_match(&text, &pattern)
            };
            hit == matches!(condition.operator, Operator::Like | Operator::ILike)
        }
    }
}

fn as_text(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) => Some(s.clone()),
        other => Some(other.to_string()),
    }
}

fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

/// SQL-style comparison: `None` when either side is null.
pub fn compare_values(a: &Value, b: &Value) -> Option<Ordering> {
    match (a, b) {
        (Value::Null, _) | (_, Value::Null) => None,
        (Value::Bool(x), Value::Bool(y)) => Some(x.cmp(y)),
        (Value::String(x), Value::String(y)) => Some(x.cmp(y)),
        _ => match (as_number(a), as_number(b)) {
            (Some(x), Some(y)) => x.partial_cmp(&y),
            _ => Some(as_text(a)?.cmp(&as_text(b)?)),
        },
    }
}

/// `LIKE` matching with `%`, `_` and backslash escapes.
pub fn like_match(text: &str, pattern: &str) -> bool {
    #[derive(Clone, Copy, PartialEq)]
    enum Token {
        Any,
        One,
        Char(char),
    }

    let mut tokens = Vec::new();
    let mut chars = pattern.chars();
    while let Some(c) = chars.next() {
        tokens.push(match c {
            '%' => Token::Any,
            '_' => Token::One,
            '\\' => Token::Char(chars.next().unwrap_or('\\')),
            other => Token::Char(other),
        });
    }

    let text: Vec<char> = text.chars().collect();
    // reachable[j]: the first i tokens can match the first j characters
    let mut reachable = vec![false; text.len() + 1];
    reachable[0] = true;
    for token in tokens {
        let mut next = vec![false; text.len() + 1];
        for j in 0..=text.len() {
            match token {
                Token::Any => {
                    next[j] = reachable[j] || (j > 0 && next[j - 1]);
                }
                Token::One => {
                    next[j] = j > 0 && reachable[j - 1];
                }
                Token::Char(c) => {
                    next[j] = j > 0 && reachable[j - 1] && text[j - 1] == c;
                }
            }
        }
        reachable = next;
    }
    reachable[text.len()]
}

fn sort_value(row: &Row, target: &SortTarget) -> Option<Value> {
    match target {
        SortTarget::Column(column) => row.get(column).filter(|v| !v.is_null()).cloned(),
        SortTarget::Position { column, needle } => {
            let text = as_text(row.get(column)?)?;
            text.find(needle.as_str()).map(|offset| Value::from(offset + 1))
        }
    }
}

/// Orders rows by the sort keys, combined left to right.
pub fn compare_rows(a: &Row, b: &Row, order: &[SortKey]) -> Ordering {
    for key in order {
        let left = sort_value(a, &key.target);
        let right = sort_value(b, &key.target);
        let ordering = match (&left, &right) {
            (None, None) => Ordering::Equal,
            (None, Some(_)) if key.direction.nulls_last() => Ordering::Greater,
            (None, Some(_)) => Ordering::Less,
            (Some(_), None) if key.direction.nulls_last() => Ordering::Less,
            (Some(_), None) => Ordering::Greater,
            (Some(x), Some(y)) => {
                let ordering = compare_values(x, y).unwrap_or(Ordering::Equal);
                if key.direction.is_descending() {
                    ordering.reverse()
                } else {
                    ordering
                }
            }
        };
        if ordering != Ordering::Equal {
            return ordering;
        }
    }
    Ordering::Equal
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use vellum_storage::SortDirection;

    fn row(value: Value) -> Row {
        value.as_object().cloned().unwrap_or_default()
    }

    #[test]
    fn test_like_match() {
        assert!(like_match("desk lamp", "%lamp"));
        assert!(like_match("lamp", "l_mp"));
        assert!(!like_match("lamp", "l_p"));
        assert!(like_match(r#"["1","12"]"#, r#"%"12"%"#));
        assert!(!like_match(r#"["1","12"]"#, r#"%"2"%"#));
        assert!(like_match("50%", r"50\%"));
        assert!(!like_match("500", r"50\%"));
    }

    #[test]
    fn test_operators_against_row() {
        let r = row(json!({ "price": 50, "name": "Desk Lamp", "tag": null }));
        let check = |field: &str, op: Operator, value: Value| {
            matches(&FilterNode::condition(field, op, value), &r)
        };

        assert!(check("price", Operator::Eq, json!(50)));
        assert!(check("price", Operator::Ne, json!(10)));
        assert!(check("price", Operator::Between, json!([20, 50])));
        assert!(!check("price", Operator::NotBetween, json!([20, 50])));
        assert!(check("price", Operator::In, json!([1, 50])));
        assert!(check("price", Operator::NotIn, json!([1, 2])));
        assert!(check("name", Operator::ILike, json!("%lamp%")));
        assert!(!check("name", Operator::Like, json!("%lamp%")));
        assert!(check("name", Operator::NotLike, json!("%lamp%")));
        assert!(check("tag", Operator::Eq, json!(null)));
        assert!(!check("tag", Operator::Ne, json!("x")));
        assert!(!check("tag", Operator::NotIn, json!(["x"])));
    }

    #[test]
    fn test_nested_or_of_and() {
        let tree = FilterNode::And(vec![FilterNode::Or(vec![
            FilterNode::And(vec![FilterNode::condition("price", Operator::Lt, json!(100))]),
            FilterNode::And(vec![FilterNode::condition(
                "discount",
                Operator::Gte,
                json!(0.5),
            )]),
        ])]);
        assert!(matches(&tree, &row(json!({ "price": 50, "discount": 0 }))));
        assert!(matches(&tree, &row(json!({ "price": 200, "discount": 0.6 }))));
        assert!(!matches(&tree, &row(json!({ "price": 200, "discount": 0 }))));
    }

    #[test]
    fn test_compare_rows_nulls_and_position() {
        let a = row(json!({ "rank": null, "kw": "xxxxxfoo" }));
        let b = row(json!({ "rank": 2, "kw": "foo" }));

        let asc = [SortKey::column("rank", SortDirection::Asc)];
        assert_eq!(compare_rows(&a, &b, &asc), Ordering::Less);
        let asc_last = [SortKey::column("rank", SortDirection::AscNullsLast)];
        assert_eq!(compare_rows(&a, &b, &asc_last), Ordering::Greater);

        let relevance = [SortKey::position("kw", "foo")];
        assert_eq!(compare_rows(&a, &b, &relevance), Ordering::Greater);
    }
}
