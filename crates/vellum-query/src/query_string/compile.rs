//! Compiles decoded query-string parameters into builder parameters.

use indexmap::IndexMap;
use serde::Serialize;
use tracing::debug;
use vellum_core::{CollectionDefinition, CollectionRegistry, FieldTypeRegistry, Operation};
use vellum_storage::{FilterNode, SortDirection};

use super::error::QueryStringError;
use super::parser::WhereParser;
use crate::options::OrderSpec;
use crate::search::search_tokens;

/// Schema the query string is compiled against.
#[derive(Clone, Copy)]
pub struct QueryStringContext<'a> {
    pub collection: &'a CollectionDefinition,
    pub collections: &'a CollectionRegistry,
    pub field_types: &'a FieldTypeRegistry,
}

/// Parameters ready to be applied to a builder. Absent parameters leave the builder as is.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct QueryStringParams {
    pub select: Option<Vec<String>>,
    /// Nodes appended to the root AND group.
    pub filter: Vec<FilterNode>,
    pub search: IndexMap<String, Vec<String>>,
    pub order: Vec<OrderSpec>,
    pub group: Vec<String>,
    pub offset: Option<u64>,
    pub limit: Option<u64>,
    pub populate: Option<bool>,
    pub language: Option<String>,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize)]
pub struct CompiledQuery {
    pub params: QueryStringParams,
    pub errors: Vec<QueryStringError>,
}

impl CompiledQuery {
    pub fn is_valid(&self) -> bool {
        self.errors.is_empty()
    }
}

/// Decodes a raw `application/x-www-form-urlencoded` query string into pairs.
pub fn parse_query_pairs(raw: &str) -> Vec<(String, String)> {
    url::form_urlencoded::parse(raw.trim_start_matches('?').as_bytes())
        .into_owned()
        .collect()
}

fn is_relevant(parameter: &str, operation: Operation) -> bool {
    let base = parameter.split(':').next().unwrap_or(parameter);
    match operation {
        Operation::Create => matches!(base, "select" | "populate" | "language"),
        Operation::Read => true,
        Operation::Update | Operation::Delete => base != "group",
    }
}

/// Parses an order direction such as `desc`, `d`, `up` or `ascNullsLast`.
pub fn parse_direction(input: &str) -> Option<SortDirection> {
    let lower = input.trim().to_ascii_lowercase();
    let (base, nulls_last) = match lower.strip_suffix("nullslast") {
        Some(base) => (base, true),
        None => (lower.as_str(), false),
    };
    let descending = match base {
        "" | "a" | "asc" | "ascending" | "u" | "up" => false,
        "d" | "desc" | "descending" | "down" => true,
        _ => return None,
    };
    Some(match (descending, nulls_last) {
        (false, false) => SortDirection::Asc,
        (true, false) => SortDirection::Desc,
        (false, true) => SortDirection::AscNullsLast,
        (true, true) => SortDirection::DescNullsLast,
    })
}

struct Compiler<'a> {
    ctx: QueryStringContext<'a>,
    params: QueryStringParams,
    errors: Vec<QueryStringError>,
}

impl Compiler<'_> {
    fn field(&mut self, name: &str) -> Option<String> {
        match self.ctx.collection.field(name) {
            None => {
                self.errors.push(QueryStringError::unknown_field(name));
                None
            }
            Some(declaration) if declaration.additional.protected => {
                self.errors.push(QueryStringError::protected_field(name));
                None
            }
            Some(_) => Some(name.to_string()),
        }
    }

    fn fields(&mut self, list: &str) -> Vec<String> {
        list.split(',')
            .map(str::trim)
            .filter(|name| !name.is_empty())
            .filter_map(|name| self.field(name))
            .collect()
    }

    fn structure(&mut self, structure: Option<&str>) -> Option<String> {
        let collection = self.ctx.collection;
        if !collection.is_searchable() {
            self.errors.push(QueryStringError::NotSearchable {
                collection: collection.name.clone(),
            });
            return None;
        }
        match structure {
            None => collection.search.keys().next().cloned(),
            Some(name) if collection.search.contains_key(name) => Some(name.to_string()),
            Some(name) => {
                self.errors.push(QueryStringError::UnknownSearchStructure {
                    structure: name.to_string(),
                });
                None
            }
        }
    }

    fn integer(&mut self, parameter: &str, value: &str) -> Option<u64> {
        match value.trim().parse::<u64>() {
            Ok(n) => Some(n),
            Err(_) => {
                self.errors
                    .push(QueryStringError::invalid_integer(parameter, value));
                None
            }
        }
    }

    fn select(&mut self, value: &str) {
        let collection = self.ctx.collection;
        let mut fields = if value.trim() == "*" {
            collection
                .fields
                .iter()
                .filter(|(_, declaration)| !declaration.additional.protected)
                .map(|(name, _)| name.clone())
                .collect()
        } else {
            self.fields(value)
        };
        if fields.is_empty() && collection.has_field("id") {
            fields.push("id".to_string());
        }
        self.params.select = Some(fields);
    }

    fn filter(&mut self, value: &str) {
        let (nodes, errors) = WhereParser::new(self.ctx.collection, self.ctx.field_types).parse(value);
        self.params.filter.extend(nodes);
        self.errors.extend(errors);
    }

    fn search(&mut self, structure: Option<&str>, value: &str) {
        if let Some(structure) = self.structure(structure) {
            let tokens = search_tokens(value);
            if !tokens.is_empty() {
                self.params
                    .search
                    .entry(structure)
                    .or_default()
                    .extend(tokens);
            }
        }
    }

    fn order(&mut self, value: &str) {
        for item in value.split(',').map(str::trim).filter(|item| !item.is_empty()) {
            if let Some(rest) = item.strip_prefix(':') {
                let structure = rest.split(':').next().unwrap_or(rest);
                if let Some(structure) = self.structure(Some(structure)) {
                    self.params.order.push(OrderSpec::relevance(structure));
                }
                continue;
            }

            let (name, direction) = item.split_once(':').unwrap_or((item, ""));
            let Some(direction) = parse_direction(direction) else {
                self.errors.push(QueryStringError::UnknownDirection {
                    direction: direction.to_string(),
                });
                continue;
            };
            if let Some(field) = self.field(name.trim()) {
                self.params.order.push(OrderSpec::field(field, direction));
            }
        }
    }

    fn populate(&mut self, value: &str) {
        match value.trim().to_ascii_lowercase().as_str() {
            "" | "1" | "true" | "yes" => self.params.populate = Some(true),
            "0" | "false" | "no" => self.params.populate = Some(false),
            _ => self.errors.push(QueryStringError::InvalidBoolean {
                parameter: "populate".to_string(),
                value: value.to_string(),
            }),
        }
    }

    fn language(&mut self, value: &str) {
        let code = value.trim();
        if self.ctx.collections.is_language(code) {
            self.params.language = Some(code.to_string());
        } else {
            self.errors.push(QueryStringError::UnsupportedLanguage {
                language: code.to_string(),
            });
        }
    }
}

/// Compiles decoded query parameters for `operation`.
///
/// Parameters that do not apply to the operation are ignored. Every problem is reported in
/// [`CompiledQuery::errors`]; the parameters that compiled cleanly are still returned.
pub fn compile_query_string<K, V>(
    pairs: &[(K, V)],
    ctx: QueryStringContext<'_>,
    operation: Operation,
) -> CompiledQuery
where
    K: AsRef<str>,
    V: AsRef<str>,
{
    let mut compiler = Compiler {
        ctx,
        params: QueryStringParams::default(),
        errors: Vec::new(),
    };
    let mut offset = None;
    let mut limit = None;
    let mut page = None;
    let mut per_page = None;

    for (key, value) in pairs {
        let (key, value) = (key.as_ref(), value.as_ref());
        if !is_relevant(key, operation) {
            continue;
        }
        match key {
            "select" => compiler.select(value),
            "where" => compiler.filter(value),
            "search" => compiler.search(None, value),
            "order" => compiler.order(value),
            "group" => {
                let fields = compiler.fields(value);
                compiler.params.group.extend(fields);
            }
            "offset" => offset = compiler.integer("offset", value),
            "limit" => limit = compiler.integer("limit", value),
            "page" => {
                page = compiler.integer("page", value);
                if page == Some(0) {
                    compiler
                        .errors
                        .push(QueryStringError::invalid_integer("page", value));
                    page = None;
                }
            }
            "perPage" => per_page = compiler.integer("perPage", value),
            "populate" => compiler.populate(value),
            "language" => compiler.language(value),
            other => match other.strip_prefix("search:") {
                Some(structure) => compiler.search(Some(structure), value),
                None => debug!(parameter = other, "Ignoring unknown query parameter"),
            },
        }
    }

    if page.is_some() && offset.is_some() {
        compiler.errors.push(QueryStringError::conflicting("page", "offset"));
    }
    if per_page.is_some() && limit.is_some() {
        compiler
            .errors
            .push(QueryStringError::conflicting("perPage", "limit"));
    }

    match (page, per_page.or(limit)) {
        (Some(page), Some(size)) => match (page - 1).checked_mul(size) {
            Some(offset) => {
                compiler.params.offset = Some(offset);
                compiler.params.limit = Some(size);
            }
            None => compiler
                .errors
                .push(QueryStringError::invalid_integer("page", page.to_string())),
        },
        (Some(_), None) => compiler.errors.push(QueryStringError::PageWithoutLimit),
        (None, size) => {
            compiler.params.offset = offset;
            compiler.params.limit = size;
        }
    }

    CompiledQuery {
        params: compiler.params,
        errors: compiler.errors,
    }
}
