//! Query builder for multi-entry collections.
//!
//! A builder accumulates [`QueryOptions`] through by-value methods and runs them with one
//! of the terminal operations. Reads go through the adaptive cache and the read pipeline
//! (cast, conditional reset, fallback, population). Writes return a [`WriteOutcome`].
//!
//! ```ignore
//! let cheap = env
//!     .query("products")?
//!     .select(["id", "name", "price"])
//!     .where_lt("price", 100)
//!     .order("price", SortDirection::Asc)
//!     .limit(10)
//!     .all()
//!     .await?;
//! ```

use indexmap::IndexMap;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashSet;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, instrument, warn};
use vellum_core::{CollectionDefinition, Operation, Record, Uniqueness, now_millis};
use vellum_storage::{
    Aggregate, FilterNode, Operator, Row, SortDirection, SortKey, StorageError, StoreQuery,
};

use crate::cache::{cache_key, should_store};
use crate::env::QueryEnv;
use crate::error::{FieldErrors, QueryError, Result, WriteOutcome};
use crate::filter::{FilterScope, WhereBuilder};
use crate::options::{FieldValueType, OrderSpec, OrderTarget, QueryOptions};
use crate::pipeline::{FieldPipeline, ValidatorFilter, cast_row};
use crate::query_string::{CompiledQuery, QueryStringParams, compile_query_string};
use crate::search::{relevance_keys, search_conditions, search_tokens};

/// Validation errors of a batch, keyed by input index.
pub type BatchErrors = IndexMap<usize, FieldErrors>;

pub(crate) const UNIQUE_MESSAGE: &str = "The value must be unique";

/// Records together with the number of records matching the filter.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RecordsWithCount {
    pub records: Vec<Record>,
    pub total: u64,
}

/// One page of records.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Paginated {
    pub records: Vec<Record>,
    pub current_page: u64,
    pub last_page: u64,
    pub per_page: u64,
    pub total: u64,
}

pub(crate) fn into_record(input: Value) -> Result<Record> {
    match input {
        Value::Object(map) => Ok(map),
        _ => Err(QueryError::invalid_input("the input must be an object")),
    }
}

fn ids_of(rows: &[Row]) -> Vec<Value> {
    rows.iter().filter_map(|row| row.get("id").cloned()).collect()
}

fn id_filter(ids: Vec<Value>) -> FilterNode {
    FilterNode::condition("id", Operator::In, Value::Array(ids))
}

#[derive(Clone)]
pub struct QueryBuilder {
    env: QueryEnv,
    collection: Arc<CollectionDefinition>,
    options: QueryOptions,
}

impl fmt::Debug for QueryBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryBuilder")
            .field("collection", &self.collection.name)
            .field("options", &self.options)
            .finish()
    }
}

impl WhereBuilder for QueryBuilder {
    fn map_filter(mut self, f: impl FnOnce(FilterScope) -> FilterScope) -> Self {
        let scope = match std::mem::take(&mut self.options.filter) {
            FilterNode::And(nodes) => FilterScope::from(nodes),
            other => FilterScope::from(vec![other]),
        };
        self.options.filter = f(scope).into_node();
        self
    }
}

impl QueryBuilder {
    pub fn new(env: QueryEnv, collection: Arc<CollectionDefinition>) -> Self {
        let options = Self::default_options(&env, &collection);
        Self {
            env,
            collection,
            options,
        }
    }

    fn default_options(env: &QueryEnv, collection: &CollectionDefinition) -> QueryOptions {
        QueryOptions::new(
            collection.field_names(),
            env.collections().primary_language(),
        )
    }

    pub fn collection(&self) -> &CollectionDefinition {
        &self.collection
    }

    pub fn options(&self) -> &QueryOptions {
        &self.options
    }

    pub fn into_options(self) -> QueryOptions {
        self.options
    }

    /// Replaces the whole builder state.
    #[must_use]
    pub fn with_options(mut self, options: QueryOptions) -> Self {
        self.options = options;
        self
    }

    /// Restores the default state.
    #[must_use]
    pub fn reset(mut self) -> Self {
        self.options = Self::default_options(&self.env, &self.collection);
        self
    }

    /// Selects exactly the given fields. Undeclared fields are ignored.
    #[must_use]
    pub fn select<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.options.select = fields
            .into_iter()
            .map(Into::into)
            .filter(|field| {
                let known = self.collection.has_field(field);
                if !known {
                    debug!(field = %field, "Ignoring unknown field in select");
                }
                known
            })
            .collect();
        self
    }

    #[must_use]
    pub fn select_all(mut self) -> Self {
        self.options.select = self
            .collection
            .field_names()
            .map(str::to_string)
            .collect();
        self
    }

    #[must_use]
    pub fn deselect<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        for field in fields {
            let field: String = field.into();
            self.options.select.shift_remove(&field);
        }
        self
    }

    /// Adds the tokens of `text` to a search structure.
    #[must_use]
    pub fn search(mut self, structure: &str, text: &str) -> Self {
        if !self.collection.search.contains_key(structure) {
            warn!(
                collection = %self.collection.name,
                structure,
                "Ignoring search in unknown structure"
            );
            return self;
        }
        let tokens = self
            .options
            .search
            .entry(structure.to_string())
            .or_default();
        for token in search_tokens(text) {
            if !tokens.contains(&token) {
                tokens.push(token);
            }
        }
        self
    }

    #[must_use]
    pub fn order(mut self, field: impl Into<String>, direction: SortDirection) -> Self {
        self.options.order.push(OrderSpec::field(field, direction));
        self
    }

    /// Orders by relevance to the tokens searched in `structure`.
    #[must_use]
    pub fn order_by_relevance(mut self, structure: impl Into<String>) -> Self {
        self.options.order.push(OrderSpec::relevance(structure));
        self
    }

    #[must_use]
    pub fn group<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.options.group.extend(fields.into_iter().map(Into::into));
        self
    }

    #[must_use]
    pub fn offset(mut self, offset: u64) -> Self {
        self.options.offset = Some(offset);
        self
    }

    #[must_use]
    pub fn limit(mut self, limit: u64) -> Self {
        self.options.limit = Some(limit);
        self
    }

    #[must_use]
    pub fn populate(mut self) -> Self {
        self.options.field_value_type = FieldValueType::Populated;
        self
    }

    #[must_use]
    pub fn unpopulate(mut self) -> Self {
        self.options.field_value_type = FieldValueType::Casted;
        self
    }

    pub fn field_value_type(&self) -> FieldValueType {
        self.options.field_value_type
    }

    #[must_use]
    pub fn set_field_value_type(mut self, value_type: FieldValueType) -> Self {
        self.options.field_value_type = value_type;
        self
    }

    #[must_use]
    pub fn fallback(mut self) -> Self {
        self.options.fallback = true;
        self
    }

    #[must_use]
    pub fn no_fallback(mut self) -> Self {
        self.options.fallback = false;
        self
    }

    /// Sets the context language. Unsupported codes are ignored.
    #[must_use]
    pub fn language(mut self, code: &str) -> Self {
        if self.env.collections().is_language(code) {
            self.options.language = code.to_string();
        } else {
            warn!(language = code, "Ignoring unsupported language");
        }
        self
    }

    /// Compiles decoded query-string pairs against this builder's collection.
    pub fn compile_query_string<K, V>(&self, pairs: &[(K, V)], operation: Operation) -> CompiledQuery
    where
        K: AsRef<str>,
        V: AsRef<str>,
    {
        compile_query_string(
            pairs,
            self.env.query_string_context(&self.collection),
            operation,
        )
    }

    /// Applies compiled query-string parameters on top of the current state.
    #[must_use]
    pub fn apply_query_string_params(mut self, params: &QueryStringParams) -> Self {
        if let Some(select) = &params.select {
            self.options.select = select.iter().cloned().collect();
        }
        for node in &params.filter {
            self.options.push_filter(node.clone());
        }
        for (structure, tokens) in &params.search {
            let current = self.options.search.entry(structure.clone()).or_default();
            for token in tokens {
                if !current.contains(token) {
                    current.push(token.clone());
                }
            }
        }
        self.options.order.extend(params.order.iter().cloned());
        self.options.group.extend(params.group.iter().cloned());
        if params.offset.is_some() {
            self.options.offset = params.offset;
        }
        if params.limit.is_some() {
            self.options.limit = params.limit;
        }
        match params.populate {
            Some(true) => self.options.field_value_type = FieldValueType::Populated,
            Some(false) => self.options.field_value_type = FieldValueType::Casted,
            None => {}
        }
        if let Some(language) = &params.language {
            self.options.language = language.clone();
        }
        self
    }

    fn pipeline(&self) -> FieldPipeline<'_> {
        FieldPipeline::new(
            &self.collection,
            self.env.field_types(),
            &self.options.language,
        )
    }

    fn filter_with_search(&self) -> FilterNode {
        let mut filter = self.options.filter.clone();
        for node in search_conditions(&self.options.search) {
            match &mut filter {
                FilterNode::And(children) => children.push(node),
                other => {
                    let previous = std::mem::take(other);
                    *other = FilterNode::And(vec![previous, node]);
                }
            }
        }
        filter
    }

    fn sort_keys(&self) -> Vec<SortKey> {
        self.options
            .order
            .iter()
            .flat_map(|spec| match &spec.target {
                OrderTarget::Field(field) => vec![SortKey::column(field.clone(), spec.direction)],
                OrderTarget::Relevance(structure) => relevance_keys(
                    structure,
                    self.options
                        .search
                        .get(structure)
                        .map(Vec::as_slice)
                        .unwrap_or_default(),
                ),
            })
            .collect()
    }

    /// Columns a read fetches: the selection plus whatever conditional logic depends on.
    fn read_columns(&self) -> Vec<String> {
        let needs_all = self.options.select.iter().any(|name| {
            self.collection
                .field(name)
                .is_some_and(|field| field.additional.conditional_logic.is_some())
        });
        let mut columns: Vec<String> = if needs_all {
            self.collection.field_names().map(str::to_string).collect()
        } else {
            self.options.select.iter().cloned().collect()
        };
        if self.collection.has_field("id") && !columns.iter().any(|c| c == "id") {
            columns.push("id".to_string());
        }
        columns
    }

    fn store_query(&self, columns: Vec<String>) -> StoreQuery {
        StoreQuery::new(self.collection.table_name())
            .with_columns(columns)
            .with_filter(self.filter_with_search())
            .with_order(self.sort_keys())
            .with_group(self.options.group.clone())
            .with_offset(self.options.offset)
            .with_limit(self.options.limit)
    }

    /// Runs the read pipeline on a casted record and trims it to the selection.
    async fn finish(&self, mut record: Record, filter: ValidatorFilter) -> Result<Record> {
        let pipeline = self.pipeline();
        pipeline.reset_inactive(&mut record);
        if self.options.fallback {
            pipeline.fallback(&mut record, filter);
        }
        if self.options.populates() {
            pipeline.populate(&mut record, &self.env).await?;
        }
        record.retain(|name, _| self.options.select.contains(name));
        Ok(record)
    }

    async fn fetch_rows(&self, query: &StoreQuery) -> Result<Vec<Row>> {
        Ok(self.env.store().select(query).await?)
    }

    async fn finish_rows(&self, rows: Vec<Row>) -> Result<Vec<Record>> {
        let mut records = Vec::with_capacity(rows.len());
        for row in rows {
            let record = cast_row(&self.collection, self.env.field_types(), row);
            records.push(self.finish(record, ValidatorFilter::Applicable).await?);
        }
        Ok(records)
    }

    async fn fetch(&self, query: &StoreQuery) -> Result<Vec<Record>> {
        let rows = self.fetch_rows(query).await?;
        self.finish_rows(rows).await
    }

    /// Serves a read from the cache or runs it, storing slow results.
    async fn read_through<T, Fut>(&self, method: &str, run: Fut) -> Result<T>
    where
        T: Serialize + DeserializeOwned,
        Fut: Future<Output = Result<T>>,
    {
        let key = if self.env.cache().is_enabled() {
            cache_key(&self.collection, method, &self.options)
        } else {
            None
        };

        if let Some(key) = &key
            && let Some(hit) = self.env.cache().get(key).await
        {
            match serde_json::from_str(&hit) {
                Ok(value) => return Ok(value),
                Err(e) => warn!(key = %key, error = %e, "Discarding unreadable cache entry"),
            }
        }

        let started = Instant::now();
        let value = run.await?;
        let elapsed = started.elapsed();

        if let Some(key) = key
            && should_store(&self.collection, elapsed)
        {
            let serialized = serde_json::to_string(&value)?;
            self.env.cache().set(&key, &serialized).await;
            debug!(key = %key, elapsed_ms = elapsed.as_millis() as u64, "Cached query result");
        }
        Ok(value)
    }

    // Reads

    /// Number of records matching the filter and search.
    #[instrument(skip(self), fields(collection = %self.collection.name))]
    pub async fn count(&self) -> Result<u64> {
        let query = self.store_query(Vec::new());
        self.read_through("count", async {
            Ok::<_, QueryError>(self.env.store().count(&query).await?)
        })
        .await
    }

    pub async fn exists(&self) -> Result<bool> {
        Ok(self.count().await? > 0)
    }

    pub async fn not_exists(&self) -> Result<bool> {
        Ok(self.count().await? == 0)
    }

    #[instrument(skip(self), fields(collection = %self.collection.name))]
    pub async fn all(&self) -> Result<Vec<Record>> {
        let query = self.store_query(self.read_columns());
        self.read_through("all", self.fetch(&query)).await
    }

    pub async fn first(&self) -> Result<Option<Record>> {
        let builder = self.clone().limit(1);
        let query = builder.store_query(builder.read_columns());
        let records = builder.read_through("first", builder.fetch(&query)).await?;
        Ok(records.into_iter().next())
    }

    /// Records plus the total ignoring offset and limit.
    #[instrument(skip(self), fields(collection = %self.collection.name))]
    pub async fn all_with_count(&self) -> Result<RecordsWithCount> {
        let query = self.store_query(self.read_columns());
        self.read_through("allWithCount", async {
            let total = self.env.store().count(&query).await?;
            let records = self.fetch(&query).await?;
            Ok::<_, QueryError>(RecordsWithCount { records, total })
        })
        .await
    }

    /// One page of records. Pages start at 1.
    #[instrument(skip(self), fields(collection = %self.collection.name))]
    pub async fn paginate(&self, page: u64, per_page: u64) -> Result<Paginated> {
        let page = page.max(1);
        let per_page = per_page.max(1);
        let builder = self
            .clone()
            .offset((page - 1).saturating_mul(per_page))
            .limit(per_page);
        let query = builder.store_query(builder.read_columns());

        builder
            .read_through("paginate", async {
                let total = builder.env.store().count(&query).await?;
                let records = builder.fetch(&query).await?;
                Ok::<_, QueryError>(Paginated {
                    records,
                    current_page: page,
                    last_page: total.div_ceil(per_page).max(1),
                    per_page,
                    total,
                })
            })
            .await
    }

    async fn aggregate(&self, function: Aggregate, field: &str) -> Result<Value> {
        let method = format!("{}:{field}", function.as_sql().to_ascii_lowercase());
        let query = self.store_query(Vec::new());
        self.read_through(&method, async {
            Ok::<_, QueryError>(
                self.env
                    .store()
                    .aggregate(&query, function, field)
                    .await?,
            )
        })
        .await
    }

    pub async fn min(&self, field: &str) -> Result<Value> {
        self.aggregate(Aggregate::Min, field).await
    }

    pub async fn max(&self, field: &str) -> Result<Value> {
        self.aggregate(Aggregate::Max, field).await
    }

    pub async fn sum(&self, field: &str) -> Result<Value> {
        self.aggregate(Aggregate::Sum, field).await
    }

    // Validation

    /// Validates `input` as it would be validated by `operation`, without writing.
    pub async fn validate(&self, input: Value, operation: Operation) -> Result<FieldErrors> {
        let input = into_record(input)?;
        match operation {
            Operation::Create => {
                let record = self.normalize_create(input).await?;
                self.validate_create(&record, None).await
            }
            _ => {
                let pipeline = self.pipeline();
                let input = pipeline.sanitize(&pipeline.restrict(input), operation);
                let inactive = pipeline.inactive_fields(&input);
                let fields: Vec<String> = input.keys().cloned().collect();
                let mut errors = pipeline.validate(
                    &input,
                    fields.iter().map(String::as_str),
                    operation,
                    None,
                    &inactive,
                    ValidatorFilter::Applicable,
                );
                self.check_unique(&input, &fields, None, &inactive, None, &mut errors)
                    .await?;
                Ok(errors)
            }
        }
    }

    /// Restricts, links translations, defaults and sanitizes a create input.
    async fn normalize_create(&self, input: Record) -> Result<Record> {
        let pipeline = self.pipeline();
        let mut input = pipeline.restrict(input);

        if self.collection.translatable {
            self.copy_shared_fields(&mut input).await?;
            if input.get("language").is_none_or(Value::is_null) {
                input.insert(
                    "language".to_string(),
                    Value::String(self.options.language.clone()),
                );
            }
            if input
                .get("translations")
                .is_none_or(|key| key.is_null() || key.as_str() == Some(""))
            {
                input.insert(
                    "translations".to_string(),
                    Value::String(uuid::Uuid::new_v4().to_string()),
                );
            }
        }

        pipeline.fill_defaults(&mut input);
        Ok(pipeline.sanitize(&input, Operation::Create))
    }

    async fn validate_create(
        &self,
        record: &Record,
        batch: Option<(&[Record], usize)>,
    ) -> Result<FieldErrors> {
        let pipeline = self.pipeline();
        let inactive = pipeline.inactive_fields(record);
        let fields: Vec<String> = record.keys().cloned().collect();
        let mut errors = pipeline.validate(
            record,
            fields.iter().map(String::as_str),
            Operation::Create,
            batch.map(|(all, _)| all),
            &inactive,
            ValidatorFilter::Applicable,
        );

        if self.collection.translatable {
            self.check_translation(record, &mut errors).await?;
        }
        self.check_unique(record, &fields, None, &inactive, batch, &mut errors)
            .await?;
        Ok(errors)
    }

    /// Copies shared field values from an existing translation of the same record.
    async fn copy_shared_fields(&self, input: &mut Record) -> Result<()> {
        let Some(key) = input.get("translations").filter(|key| !key.is_null()).cloned() else {
            return Ok(());
        };
        let shared: Vec<String> = self
            .collection
            .non_translatable_fields()
            .into_iter()
            .map(str::to_string)
            .collect();
        if shared.is_empty() {
            return Ok(());
        }

        let query = StoreQuery::new(self.collection.table_name())
            .with_columns(shared.clone())
            .with_filter(FilterNode::condition("translations", Operator::Eq, key))
            .with_limit(Some(1));
        if let Some(row) = self.fetch_rows(&query).await?.into_iter().next() {
            let sibling = cast_row(&self.collection, self.env.field_types(), row);
            for field in shared {
                if let Some(value) = sibling.get(&field) {
                    input.insert(field, value.clone());
                }
            }
        }
        Ok(())
    }

    async fn check_translation(&self, record: &Record, errors: &mut FieldErrors) -> Result<()> {
        let language = record.get("language").and_then(Value::as_str).unwrap_or_default();
        if !self.env.collections().is_language(language) {
            errors.insert("language".to_string(), "The language is not supported".to_string());
            return Ok(());
        }
        let Some(key) = record.get("translations").filter(|key| !key.is_null()) else {
            return Ok(());
        };
        let query = StoreQuery::new(self.collection.table_name()).with_filter(FilterNode::And(vec![
            FilterNode::condition("translations", Operator::Eq, key.clone()),
            FilterNode::condition("language", Operator::Eq, Value::from(language)),
        ]));
        if self.env.store().count(&query).await? > 0 {
            errors.insert(
                "language".to_string(),
                "A translation in this language already exists".to_string(),
            );
        }
        Ok(())
    }

    /// Adds an error for every unique field whose value is already taken.
    async fn check_unique(
        &self,
        record: &Record,
        fields: &[String],
        exclude_id: Option<&Value>,
        skip: &HashSet<String>,
        batch: Option<(&[Record], usize)>,
        errors: &mut FieldErrors,
    ) -> Result<()> {
        let language = record
            .get("language")
            .cloned()
            .unwrap_or_else(|| Value::String(self.options.language.clone()));

        for name in fields {
            if skip.contains(name) || errors.contains_key(name) {
                continue;
            }
            let Some(field) = self.collection.field(name) else {
                continue;
            };
            let per_language = match field.additional.unique {
                Uniqueness::None => continue,
                Uniqueness::Global => false,
                Uniqueness::PerLanguage => self.collection.translatable,
            };
            let value = record.get(name).unwrap_or(&Value::Null);
            if value.is_null() {
                continue;
            }

            let mut conditions = vec![FilterNode::condition(
                name.clone(),
                Operator::Eq,
                self.env.field_types().serialize(field, value),
            )];
            if per_language {
                conditions.push(FilterNode::condition("language", Operator::Eq, language.clone()));
            }
            if let Some(id) = exclude_id {
                conditions.push(FilterNode::condition("id", Operator::Ne, id.clone()));
            }
            let query = StoreQuery::new(self.collection.table_name())
                .with_filter(FilterNode::And(conditions));
            let taken = self.env.store().count(&query).await? > 0;

            let duplicated_in_batch = batch.is_some_and(|(all, index)| {
                all.iter().enumerate().any(|(other, input)| {
                    other < index
                        && input.get(name) == Some(value)
                        && (!per_language || input.get("language") == Some(&language))
                })
            });

            if taken || duplicated_in_batch {
                errors.insert(name.clone(), UNIQUE_MESSAGE.to_string());
            }
        }
        Ok(())
    }

    fn stamp(&self, record: &mut Record, operation: Operation) {
        let now = Value::from(now_millis());
        if operation == Operation::Create
            && let Some(field) = &self.collection.created_at_field
        {
            record.insert(field.clone(), now.clone());
        }
        if let Some(field) = &self.collection.updated_at_field {
            record.insert(field.clone(), now);
        }
    }

    // Writes

    /// Creates one record.
    #[instrument(skip(self, input), fields(collection = %self.collection.name))]
    pub async fn create(&self, input: Value) -> Result<WriteOutcome<Record>> {
        let record = self.normalize_create(into_record(input)?).await?;
        let errors = self.validate_create(&record, None).await?;
        if !errors.is_empty() {
            debug!(errors = errors.len(), "Create rejected by validation");
            return Ok(WriteOutcome::Invalid(errors));
        }

        let (created, ids) = match self.insert_all(vec![record]).await? {
            WriteOutcome::Success(result) => result,
            WriteOutcome::Invalid(errors) => return Ok(WriteOutcome::Invalid(errors)),
            WriteOutcome::Failed(message) => return Ok(WriteOutcome::Failed(message)),
        };
        self.after_write(Operation::Create, ids).await;
        Ok(created
            .into_iter()
            .next()
            .map(WriteOutcome::Success)
            .unwrap_or_else(|| WriteOutcome::Failed("the store returned no row".to_string())))
    }

    /// Creates several records. Nothing is written unless every input is valid.
    #[instrument(skip(self, inputs), fields(collection = %self.collection.name, count = inputs.len()))]
    pub async fn create_many(
        &self,
        inputs: Vec<Value>,
    ) -> Result<WriteOutcome<Vec<Record>, BatchErrors>> {
        let mut records = Vec::with_capacity(inputs.len());
        for input in inputs {
            records.push(self.normalize_create(into_record(input)?).await?);
        }

        let mut batch_errors = BatchErrors::new();
        for (index, record) in records.iter().enumerate() {
            let errors = self
                .validate_create(record, Some((records.as_slice(), index)))
                .await?;
            if !errors.is_empty() {
                batch_errors.insert(index, errors);
            }
        }
        if !batch_errors.is_empty() {
            return Ok(WriteOutcome::Invalid(batch_errors));
        }

        match self.insert_all(records).await? {
            WriteOutcome::Success((created, ids)) => {
                self.after_write(Operation::Create, ids).await;
                Ok(WriteOutcome::Success(created))
            }
            WriteOutcome::Invalid(errors) => {
                Ok(WriteOutcome::Invalid(BatchErrors::from([(0, errors)])))
            }
            WriteOutcome::Failed(message) => Ok(WriteOutcome::Failed(message)),
        }
    }

    async fn insert_all(
        &self,
        records: Vec<Record>,
    ) -> Result<WriteOutcome<(Vec<Record>, Vec<Value>)>> {
        let pipeline = self.pipeline();
        let mut created = Vec::with_capacity(records.len());
        let mut ids = Vec::with_capacity(records.len());

        for mut record in records {
            self.stamp(&mut record, Operation::Create);
            let row = pipeline.serialize(&record);
            let stored = match self.env.store().insert(self.collection.table_name(), &row).await {
                Ok(stored) => stored,
                Err(e) => {
                    warn!(error = %e, "Insert failed");
                    if !ids.is_empty() {
                        self.after_write(Operation::Create, ids).await;
                    }
                    return Ok(WriteOutcome::Failed(e.to_string()));
                }
            };
            if let Some(id) = stored.get("id") {
                ids.push(id.clone());
            }
            let record = cast_row(&self.collection, self.env.field_types(), stored);
            created.push(self.finish(record, ValidatorFilter::ReadFlagged).await?);
        }

        Ok(WriteOutcome::Success((created, ids)))
    }

    /// Updates every record matching the filter with `input`.
    #[instrument(skip(self, input), fields(collection = %self.collection.name))]
    pub async fn update(&self, input: Value) -> Result<WriteOutcome<Vec<Record>>> {
        let pipeline = self.pipeline();
        let input = pipeline.sanitize(&pipeline.restrict(into_record(input)?), Operation::Update);
        let fields: Vec<String> = input.keys().cloned().collect();

        let all_columns: Vec<String> = self.collection.field_names().map(str::to_string).collect();
        let rows = self.fetch_rows(&self.store_query(all_columns)).await?;
        if rows.is_empty() {
            return Ok(WriteOutcome::Success(Vec::new()));
        }
        let ids = ids_of(&rows);
        let targets: Vec<Record> = rows
            .into_iter()
            .map(|row| cast_row(&self.collection, self.env.field_types(), row))
            .collect();

        for target in &targets {
            let mut merged = target.clone();
            merged.extend(input.clone());
            let inactive = pipeline.inactive_fields(&merged);
            let mut errors = pipeline.validate(
                &merged,
                fields.iter().map(String::as_str),
                Operation::Update,
                None,
                &inactive,
                ValidatorFilter::Applicable,
            );
            self.check_unique(&merged, &fields, target.get("id"), &inactive, None, &mut errors)
                .await?;
            if !errors.is_empty() {
                debug!(errors = errors.len(), "Update rejected by validation");
                return Ok(WriteOutcome::Invalid(errors));
            }
        }

        let mut values = input;
        self.stamp(&mut values, Operation::Update);
        let row = pipeline.serialize(&values);
        let table = self.collection.table_name();

        if let Err(e) = self.env.store().update(table, &id_filter(ids.clone()), &row).await {
            warn!(error = %e, "Update failed");
            return Ok(WriteOutcome::Failed(e.to_string()));
        }

        let mut touched = ids.clone();
        match self.sync_shared_fields(&targets, &ids, &row).await {
            Ok(siblings) => touched.extend(siblings),
            Err(e) => {
                warn!(error = %e, "Syncing shared fields failed");
                self.after_write(Operation::Update, touched).await;
                return Ok(WriteOutcome::Failed(e.to_string()));
            }
        }

        let refetch = StoreQuery::new(table)
            .with_columns(self.read_columns())
            .with_filter(id_filter(ids))
            .with_order(self.sort_keys());
        let records = self.fetch(&refetch).await?;

        self.after_write(Operation::Update, touched).await;
        Ok(WriteOutcome::Success(records))
    }

    /// Writes shared (non-translatable) values to the other translations of the targets.
    /// Returns the ids of the translations touched.
    async fn sync_shared_fields(
        &self,
        targets: &[Record],
        ids: &[Value],
        row: &Row,
    ) -> std::result::Result<Vec<Value>, StorageError> {
        if !self.collection.translatable {
            return Ok(Vec::new());
        }
        let shared: Row = self
            .collection
            .non_translatable_fields()
            .into_iter()
            .filter_map(|field| row.get(field).map(|value| (field.to_string(), value.clone())))
            .collect();
        if shared.is_empty() {
            return Ok(Vec::new());
        }

        let mut keys: Vec<Value> = Vec::new();
        for key in targets.iter().filter_map(|t| t.get("translations")) {
            if !key.is_null() && !keys.contains(key) {
                keys.push(key.clone());
            }
        }
        if keys.is_empty() {
            return Ok(Vec::new());
        }

        let siblings = FilterNode::And(vec![
            FilterNode::condition("translations", Operator::In, Value::Array(keys)),
            FilterNode::condition("id", Operator::NotIn, Value::Array(ids.to_vec())),
        ]);
        let table = self.collection.table_name();
        let sibling_rows = self
            .env
            .store()
            .select(
                &StoreQuery::new(table)
                    .with_columns(vec!["id".to_string()])
                    .with_filter(siblings.clone()),
            )
            .await?;
        self.env.store().update(table, &siblings, &shared).await?;
        debug!(count = sibling_rows.len(), "Synced shared fields to translations");
        Ok(ids_of(&sibling_rows))
    }

    /// Deletes every record matching the filter and returns them as they were.
    #[instrument(skip(self), fields(collection = %self.collection.name))]
    pub async fn delete(&self) -> Result<WriteOutcome<Vec<Record>>> {
        let rows = self
            .fetch_rows(&self.store_query(self.read_columns()))
            .await?;
        if rows.is_empty() {
            return Ok(WriteOutcome::Success(Vec::new()));
        }
        let ids = ids_of(&rows);
        let records = self.finish_rows(rows).await?;

        if let Err(e) = self
            .env
            .store()
            .delete(self.collection.table_name(), &id_filter(ids))
            .await
        {
            warn!(error = %e, "Delete failed");
            return Ok(WriteOutcome::Failed(e.to_string()));
        }

        self.after_write(Operation::Delete, Vec::new()).await;
        Ok(WriteOutcome::Success(records))
    }

    /// Schedules the keyword rebuild and flushes the cache for the write itself.
    async fn after_write(&self, operation: Operation, ids: Vec<Value>) {
        self.env
            .schedule_keyword_rebuild(self.collection.clone(), operation, ids);
        self.env.cache().flush_for(&self.collection, operation).await;
    }
}
