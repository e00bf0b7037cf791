//! Query builder for single-entry collections.
//!
//! A single-entry collection holds one record per language. Records live in the shared
//! `single_collections` table as `{id, name, language, data}`, where `data` is the JSON
//! text of every declared field.

use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, instrument, warn};
use vellum_core::{CollectionDefinition, Operation, Record, now_millis};
use vellum_storage::{FilterNode, Operator, Row, StoreQuery};

use crate::builder::into_record;
use crate::cache::{cache_key, should_store};
use crate::env::QueryEnv;
use crate::error::{FieldErrors, QueryError, Result, WriteOutcome};
use crate::options::{FieldValueType, QueryOptions};
use crate::pipeline::{FieldPipeline, ValidatorFilter, cast_row};
use crate::query_string::{CompiledQuery, QueryStringParams, compile_query_string};

/// Columns identifying a stored single-entry record.
const IDENTITY_FIELDS: [&str; 2] = ["id", "language"];

#[derive(Clone)]
pub struct SingleQueryBuilder {
    env: QueryEnv,
    collection: Arc<CollectionDefinition>,
    options: QueryOptions,
}

impl fmt::Debug for SingleQueryBuilder {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("SingleQueryBuilder")
            .field("collection", &self.collection.name)
            .field("options", &self.options)
            .finish()
    }
}

impl SingleQueryBuilder {
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

    #[must_use]
    pub fn with_options(mut self, options: QueryOptions) -> Self {
        self.options = options;
        self
    }

    #[must_use]
    pub fn reset(mut self) -> Self {
        self.options = Self::default_options(&self.env, &self.collection);
        self
    }

    #[must_use]
    pub fn select<I, S>(mut self, fields: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.options.select = fields
            .into_iter()
            .map(Into::into)
            .filter(|field| self.collection.has_field(field))
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

    #[must_use]
    pub fn language(mut self, code: &str) -> Self {
        if self.env.collections().is_language(code) {
            self.options.language = code.to_string();
        } else {
            warn!(language = code, "Ignoring unsupported language");
        }
        self
    }

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

    /// Applies the parameters meaningful for a single record: selection, populate and language.
    #[must_use]
    pub fn apply_query_string_params(mut self, params: &QueryStringParams) -> Self {
        if let Some(select) = &params.select {
            self.options.select = select.iter().cloned().collect();
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

    fn row_filter(&self, language: &str) -> FilterNode {
        FilterNode::And(vec![
            FilterNode::condition("name", Operator::Eq, Value::from(self.collection.name.as_str())),
            FilterNode::condition("language", Operator::Eq, Value::from(language)),
        ])
    }

    /// Parses the `data` column. Stores may hand it back as text or as a JSON object.
    fn decode_data(&self, row: &Row) -> Result<Record> {
        match row.get("data") {
            Some(Value::String(text)) => match serde_json::from_str(text)? {
                Value::Object(map) => Ok(map),
                _ => Err(QueryError::invalid_input("single-entry data must be an object")),
            },
            Some(Value::Object(map)) => Ok(map.clone()),
            _ => Ok(Record::new()),
        }
    }

    /// Stored row of `language`, created with default values when missing.
    async fn load_row(&self, language: &str) -> Result<Row> {
        let query = StoreQuery::new(self.collection.table_name())
            .with_filter(self.row_filter(language))
            .with_limit(Some(1));
        if let Some(row) = self.env.store().select(&query).await?.into_iter().next() {
            return Ok(row);
        }

        let pipeline = FieldPipeline::new(&self.collection, self.env.field_types(), language);
        let mut defaults = Record::new();
        pipeline.fill_defaults(&mut defaults);
        let now = Value::from(now_millis());
        for field in [&self.collection.created_at_field, &self.collection.updated_at_field]
            .into_iter()
            .flatten()
        {
            defaults.insert(field.clone(), now.clone());
        }

        let mut row = Row::new();
        row.insert("name".to_string(), Value::from(self.collection.name.as_str()));
        row.insert("language".to_string(), Value::from(language));
        row.insert(
            "data".to_string(),
            Value::String(serde_json::to_string(&pipeline.serialize(&defaults))?),
        );
        debug!(collection = %self.collection.name, language, "Creating single-entry record");
        Ok(self
            .env
            .store()
            .insert(self.collection.table_name(), &row)
            .await?)
    }

    /// Casted record of `language`: the declared fields plus `id` and `language`.
    async fn load_record(&self, language: &str) -> Result<Record> {
        let row = self.load_row(language).await?;
        let mut record = cast_row(&self.collection, self.env.field_types(), self.decode_data(&row)?);
        for field in IDENTITY_FIELDS {
            if let Some(value) = row.get(field) {
                record.insert(field.to_string(), value.clone());
            }
        }
        Ok(record)
    }

    async fn finish(&self, mut record: Record) -> Result<Record> {
        let pipeline = self.pipeline();
        pipeline.reset_inactive(&mut record);
        if self.options.fallback {
            pipeline.fallback(&mut record, ValidatorFilter::Applicable);
        }
        if self.options.populates() {
            pipeline.populate(&mut record, &self.env).await?;
        }
        record.retain(|name, _| {
            IDENTITY_FIELDS.contains(&name.as_str()) || self.options.select.contains(name)
        });
        Ok(record)
    }

    /// Reads the record of the context language, creating it on first access.
    #[instrument(skip(self), fields(collection = %self.collection.name, language = %self.options.language))]
    pub async fn read(&self) -> Result<Record> {
        let key = if self.env.cache().is_enabled() {
            cache_key(&self.collection, "read", &self.options)
        } else {
            None
        };
        if let Some(key) = &key
            && let Some(hit) = self.env.cache().get(key).await
        {
            match serde_json::from_str(&hit) {
                Ok(record) => return Ok(record),
                Err(e) => warn!(key = %key, error = %e, "Discarding unreadable cache entry"),
            }
        }

        let started = Instant::now();
        let record = self.load_record(&self.options.language).await?;
        let record = self.finish(record).await?;
        let elapsed = started.elapsed();

        if let Some(key) = key
            && should_store(&self.collection, elapsed)
        {
            self.env
                .cache()
                .set(&key, &serde_json::to_string(&record)?)
                .await;
        }
        Ok(record)
    }

    fn validate_merged(&self, current: &Record, input: &Record) -> FieldErrors {
        let pipeline = self.pipeline();
        let mut merged = current.clone();
        merged.extend(input.clone());
        let inactive = pipeline.inactive_fields(&merged);
        pipeline.validate(
            &merged,
            input.keys().map(String::as_str),
            Operation::Update,
            None,
            &inactive,
            ValidatorFilter::Applicable,
        )
    }

    /// Validates `input` against the current record without writing.
    pub async fn validate(&self, input: Value) -> Result<FieldErrors> {
        let pipeline = self.pipeline();
        let input = pipeline.sanitize(&pipeline.restrict(into_record(input)?), Operation::Update);
        let current = self.load_record(&self.options.language).await?;
        Ok(self.validate_merged(&current, &input))
    }

    /// Updates the record of the context language.
    ///
    /// Values of non-translatable fields are copied into the records of every other
    /// language.
    #[instrument(skip(self, input), fields(collection = %self.collection.name, language = %self.options.language))]
    pub async fn update(&self, input: Value) -> Result<WriteOutcome<Record>> {
        let pipeline = self.pipeline();
        let mut input =
            pipeline.sanitize(&pipeline.restrict(into_record(input)?), Operation::Update);
        let row = self.load_row(&self.options.language).await?;
        let mut current = cast_row(&self.collection, self.env.field_types(), self.decode_data(&row)?);

        let errors = self.validate_merged(&current, &input);
        if !errors.is_empty() {
            debug!(errors = errors.len(), "Update rejected by validation");
            return Ok(WriteOutcome::Invalid(errors));
        }

        if let Some(field) = &self.collection.updated_at_field {
            input.insert(field.clone(), Value::from(now_millis()));
        }
        current.extend(input.clone());

        let id_filter = FilterNode::condition(
            "id",
            Operator::Eq,
            row.get("id").cloned().unwrap_or(Value::Null),
        );
        if let Err(e) = self.write_data(&id_filter, &current).await {
            warn!(error = %e, "Single-entry update failed");
            return Ok(WriteOutcome::Failed(e.to_string()));
        }
        if let Err(e) = self.sync_shared_fields(&input).await {
            warn!(error = %e, "Syncing shared fields failed");
            self.env
                .cache()
                .flush_for(&self.collection, Operation::Update)
                .await;
            return Ok(WriteOutcome::Failed(e.to_string()));
        }

        let record = self.load_record(&self.options.language).await?;
        let record = self.finish(record).await?;
        self.env
            .cache()
            .flush_for(&self.collection, Operation::Update)
            .await;
        Ok(WriteOutcome::Success(record))
    }

    async fn write_data(&self, filter: &FilterNode, record: &Record) -> Result<()> {
        let data = serde_json::to_string(&self.pipeline().serialize(record))?;
        let mut values = Row::new();
        values.insert("data".to_string(), Value::String(data));
        self.env
            .store()
            .update(self.collection.table_name(), filter, &values)
            .await?;
        Ok(())
    }

    async fn sync_shared_fields(&self, input: &Record) -> Result<()> {
        let shared: Record = self
            .collection
            .non_translatable_fields()
            .into_iter()
            .filter_map(|field| input.get(field).map(|value| (field.to_string(), value.clone())))
            .collect();
        if shared.is_empty() {
            return Ok(());
        }

        for language in self.env.collections().languages() {
            if *language == self.options.language {
                continue;
            }
            let row = self.load_row(language).await?;
            let mut record =
                cast_row(&self.collection, self.env.field_types(), self.decode_data(&row)?);
            record.extend(shared.clone());
            let filter = FilterNode::condition(
                "id",
                Operator::Eq,
                row.get("id").cloned().unwrap_or(Value::Null),
            );
            self.write_data(&filter, &record).await?;
            debug!(language = %language, fields = shared.len(), "Synced shared fields");
        }
        Ok(())
    }
}
