//! Collection and field declarations.
//!
//! A [`CollectionDefinition`] is the resolved, immutable configuration of one collection.
//! Definitions are assembled once at boot through [`CollectionBuilder`] and shared as
//! `Arc` afterwards; nothing in the query layer mutates them.

use indexmap::IndexMap;
use serde_json::{Value, json};
use std::collections::HashSet;
use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use crate::conditional::ConditionalLogic;
use crate::field_type::{KeywordContext, Populator, Sanitizer, Validator};
use crate::record::Operation;

/// Table shared by every single-entry collection.
pub const SINGLE_COLLECTIONS_TABLE: &str = "single_collections";

/// Whether a collection holds many records or exactly one per language.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CollectionMode {
    Multi,
    Single,
}

/// Latency-adaptive caching configuration.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CacheQueries {
    /// Never cache queries for this collection.
    Disabled,
    /// Cache a query result when its latency reached this many milliseconds.
    Threshold(u64),
}

impl CacheQueries {
    pub fn is_enabled(self) -> bool {
        matches!(self, Self::Threshold(_))
    }

    /// The latency a query must reach before its result is cached.
    pub fn threshold(self) -> Option<Duration> {
        match self {
            Self::Disabled => None,
            Self::Threshold(ms) => Some(Duration::from_millis(ms)),
        }
    }
}

/// Per-operation cache invalidation switches.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ClearCacheRules {
    pub on_create: bool,
    pub on_update: bool,
    pub on_delete: bool,
}

impl Default for ClearCacheRules {
    fn default() -> Self {
        Self {
            on_create: true,
            on_update: true,
            on_delete: true,
        }
    }
}

impl ClearCacheRules {
    /// Rules with every switch off.
    pub fn none() -> Self {
        Self {
            on_create: false,
            on_update: false,
            on_delete: false,
        }
    }

    pub fn applies_to(&self, operation: Operation) -> bool {
        match operation {
            Operation::Create => self.on_create,
            Operation::Update => self.on_update,
            Operation::Delete => self.on_delete,
            Operation::Read => false,
        }
    }
}

/// Uniqueness constraint of a field.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Uniqueness {
    #[default]
    None,
    /// Unique across the whole collection.
    Global,
    /// Unique among records of the same language.
    PerLanguage,
}

/// Custom keyword extraction for one field of a search structure.
pub type KeywordExtractor = Arc<dyn Fn(&KeywordContext<'_>) -> String + Send + Sync>;

/// One field participating in a search structure.
#[derive(Clone)]
pub struct SearchField {
    pub field: String,
    pub extractor: Option<KeywordExtractor>,
    /// Fixed width the extracted keywords are padded to.
    pub reserve: Option<usize>,
}

impl SearchField {
    pub fn new(field: impl Into<String>) -> Self {
        Self {
            field: field.into(),
            extractor: None,
            reserve: None,
        }
    }

    #[must_use]
    pub fn reserve(mut self, width: usize) -> Self {
        self.reserve = Some(width);
        self
    }

    #[must_use]
    pub fn extractor(
        mut self,
        extractor: impl Fn(&KeywordContext<'_>) -> String + Send + Sync + 'static,
    ) -> Self {
        self.extractor = Some(Arc::new(extractor));
        self
    }
}

impl fmt::Debug for SearchField {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SearchField")
            .field("field", &self.field)
            .field("extractor", &self.extractor.is_some())
            .field("reserve", &self.reserve)
            .finish()
    }
}

/// Orthogonal behavior flags of a field declaration.
#[derive(Clone)]
pub struct AdditionalOptions {
    /// Excluded from write input regardless of the caller-supplied value.
    pub immutable: bool,
    pub nullable: bool,
    pub index: bool,
    pub unique: Uniqueness,
    /// Never selectable, sortable or filterable through query strings.
    pub protected: bool,
    /// `false` keeps the value identical across every translation of a record.
    pub translatable: bool,
    pub conditional_logic: Option<ConditionalLogic>,
    pub sanitizers: Vec<Sanitizer>,
    pub validators: Vec<Validator>,
    pub population: Option<Arc<dyn Populator>>,
}

impl Default for AdditionalOptions {
    fn default() -> Self {
        Self {
            immutable: false,
            nullable: false,
            index: false,
            unique: Uniqueness::None,
            protected: false,
            translatable: true,
            conditional_logic: None,
            sanitizers: Vec::new(),
            validators: Vec::new(),
            population: None,
        }
    }
}

impl fmt::Debug for AdditionalOptions {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("AdditionalOptions")
            .field("immutable", &self.immutable)
            .field("nullable", &self.nullable)
            .field("index", &self.index)
            .field("unique", &self.unique)
            .field("protected", &self.protected)
            .field("translatable", &self.translatable)
            .field("conditional_logic", &self.conditional_logic)
            .field("sanitizers", &self.sanitizers.len())
            .field("validators", &self.validators.len())
            .field("population", &self.population.is_some())
            .finish()
    }
}

/// Declaration of a single field: its type name, type options and behavior flags.
#[derive(Debug, Clone)]
pub struct FieldDeclaration {
    pub field_type: String,
    pub options: Value,
    pub additional: AdditionalOptions,
}

impl FieldDeclaration {
    pub fn new(field_type: impl Into<String>) -> Self {
        Self {
            field_type: field_type.into(),
            options: json!({}),
            additional: AdditionalOptions::default(),
        }
    }

    #[must_use]
    pub fn with_options(mut self, options: Value) -> Self {
        self.options = options;
        self
    }

    #[must_use]
    pub fn immutable(mut self) -> Self {
        self.additional.immutable = true;
        self
    }

    #[must_use]
    pub fn nullable(mut self) -> Self {
        self.additional.nullable = true;
        self
    }

    #[must_use]
    pub fn indexed(mut self) -> Self {
        self.additional.index = true;
        self
    }

    #[must_use]
    pub fn unique(mut self, uniqueness: Uniqueness) -> Self {
        self.additional.unique = uniqueness;
        self
    }

    #[must_use]
    pub fn protected(mut self) -> Self {
        self.additional.protected = true;
        self
    }

    #[must_use]
    pub fn not_translatable(mut self) -> Self {
        self.additional.translatable = false;
        self
    }

    #[must_use]
    pub fn with_conditional_logic(mut self, logic: ConditionalLogic) -> Self {
        self.additional.conditional_logic = Some(logic);
        self
    }

    #[must_use]
    pub fn with_sanitizer(mut self, sanitizer: Sanitizer) -> Self {
        self.additional.sanitizers.push(sanitizer);
        self
    }

    #[must_use]
    pub fn with_validator(mut self, validator: Validator) -> Self {
        self.additional.validators.push(validator);
        self
    }

    #[must_use]
    pub fn with_population(mut self, populator: Arc<dyn Populator>) -> Self {
        self.additional.population = Some(populator);
        self
    }

    /// Looks up a type option by key.
    pub fn option(&self, key: &str) -> Option<&Value> {
        self.options.get(key)
    }

    pub fn is_required(&self) -> bool {
        self.option("required").and_then(Value::as_bool).unwrap_or(false)
    }
}

/// Resolved, immutable configuration for one collection.
#[derive(Debug, Clone)]
pub struct CollectionDefinition {
    pub name: String,
    pub mode: CollectionMode,
    pub fields: IndexMap<String, FieldDeclaration>,
    pub translatable: bool,
    pub created_at_field: Option<String>,
    pub updated_at_field: Option<String>,
    pub search: IndexMap<String, Vec<SearchField>>,
    pub cache_queries: CacheQueries,
    pub clear_cache_rules: ClearCacheRules,
    pub non_cached_fields: HashSet<String>,
    pub composite_indexes: Vec<Vec<String>>,
    pub unique_composite_indexes: Vec<Vec<String>>,
}

impl CollectionDefinition {
    pub fn builder(name: impl Into<String>) -> CollectionBuilder {
        CollectionBuilder::new(name)
    }

    pub fn field(&self, name: &str) -> Option<&FieldDeclaration> {
        self.fields.get(name)
    }

    pub fn has_field(&self, name: &str) -> bool {
        self.fields.contains_key(name)
    }

    pub fn is_single(&self) -> bool {
        self.mode == CollectionMode::Single
    }

    pub fn is_searchable(&self) -> bool {
        !self.search.is_empty()
    }

    /// Name of the table records of this collection live in.
    pub fn table_name(&self) -> &str {
        match self.mode {
            CollectionMode::Multi => &self.name,
            CollectionMode::Single => SINGLE_COLLECTIONS_TABLE,
        }
    }

    /// Text column holding the keywords of a search structure.
    pub fn search_column(structure: &str) -> String {
        format!("_search_{structure}")
    }

    pub fn is_timestamp_field(&self, name: &str) -> bool {
        self.created_at_field.as_deref() == Some(name)
            || self.updated_at_field.as_deref() == Some(name)
    }

    /// Field names in declaration order.
    pub fn field_names(&self) -> impl Iterator<Item = &str> {
        self.fields.keys().map(String::as_str)
    }

    /// Fields whose values are shared across every translation of a record.
    pub fn non_translatable_fields(&self) -> Vec<&str> {
        self.fields
            .iter()
            .filter(|(name, decl)| !decl.additional.translatable && name.as_str() != "id")
            .map(|(name, _)| name.as_str())
            .collect()
    }
}

/// Builder assembling a [`CollectionDefinition`].
///
/// Implicit fields are declared on [`build`](Self::build): `id` for multi-entry
/// collections, `language`/`translations` for translatable ones and the timestamp
/// fields when enabled.
#[derive(Debug)]
pub struct CollectionBuilder {
    definition: CollectionDefinition,
}

impl CollectionBuilder {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            definition: CollectionDefinition {
                name: name.into(),
                mode: CollectionMode::Multi,
                fields: IndexMap::new(),
                translatable: false,
                created_at_field: None,
                updated_at_field: None,
                search: IndexMap::new(),
                cache_queries: CacheQueries::Disabled,
                clear_cache_rules: ClearCacheRules::default(),
                non_cached_fields: HashSet::new(),
                composite_indexes: Vec::new(),
                unique_composite_indexes: Vec::new(),
            },
        }
    }

    #[must_use]
    pub fn single(mut self) -> Self {
        self.definition.mode = CollectionMode::Single;
        self
    }

    #[must_use]
    pub fn translatable(mut self) -> Self {
        self.definition.translatable = true;
        self
    }

    /// Enables `createdAt` and `updatedAt` auto-managed fields.
    #[must_use]
    pub fn timestamps(self) -> Self {
        self.timestamp_fields(Some("createdAt"), Some("updatedAt"))
    }

    #[must_use]
    pub fn timestamp_fields(mut self, created_at: Option<&str>, updated_at: Option<&str>) -> Self {
        self.definition.created_at_field = created_at.map(str::to_string);
        self.definition.updated_at_field = updated_at.map(str::to_string);
        self
    }

    #[must_use]
    pub fn field(mut self, name: impl Into<String>, declaration: FieldDeclaration) -> Self {
        self.definition.fields.insert(name.into(), declaration);
        self
    }

    #[must_use]
    pub fn search(mut self, structure: impl Into<String>, fields: Vec<SearchField>) -> Self {
        self.definition.search.insert(structure.into(), fields);
        self
    }

    #[must_use]
    pub fn cache_queries(mut self, cache_queries: CacheQueries) -> Self {
        self.definition.cache_queries = cache_queries;
        self
    }

    #[must_use]
    pub fn clear_cache_rules(mut self, rules: ClearCacheRules) -> Self {
        self.definition.clear_cache_rules = rules;
        self
    }

    #[must_use]
    pub fn non_cached_field(mut self, field: impl Into<String>) -> Self {
        self.definition.non_cached_fields.insert(field.into());
        self
    }

    #[must_use]
    pub fn composite_index(mut self, fields: Vec<String>) -> Self {
        self.definition.composite_indexes.push(fields);
        self
    }

    #[must_use]
    pub fn unique_composite_index(mut self, fields: Vec<String>) -> Self {
        self.definition.unique_composite_indexes.push(fields);
        self
    }

    pub fn build(self) -> CollectionDefinition {
        let mut definition = self.definition;
        let mut fields = IndexMap::new();

        if definition.mode == CollectionMode::Multi {
            fields.insert(
                "id".to_string(),
                FieldDeclaration::new("number").immutable().indexed(),
            );
        }

        if definition.translatable && definition.mode == CollectionMode::Multi {
            fields.insert("language".to_string(), FieldDeclaration::new("text").indexed());
            fields.insert(
                "translations".to_string(),
                FieldDeclaration::new("text").nullable().indexed(),
            );
        }

        for (name, declaration) in definition.fields.drain(..) {
            fields.insert(name, declaration);
        }

        for name in [
            definition.created_at_field.clone(),
            definition.updated_at_field.clone(),
        ]
        .into_iter()
        .flatten()
        {
            fields
                .entry(name)
                .or_insert_with(|| FieldDeclaration::new("number").immutable());
        }

        definition.fields = fields;
        definition
    }
}
