//! Shared query environment: store, schema, cache and background tasks.

use async_trait::async_trait;
use serde_json::Value;
use std::fmt;
use std::sync::Arc;
use tracing::{instrument, warn};
use vellum_core::{
    CollectionDefinition, CollectionRegistry, CoreError, FieldTypeRegistry, Operation, Record,
    RecordResolver,
};
use vellum_storage::{DynStore, FilterNode, Operator, RawQueryResult, Store, StoreQuery};

use crate::builder::QueryBuilder;
use crate::cache::CacheLayer;
use crate::error::Result;
use crate::pipeline::{FieldPipeline, ValidatorFilter, cast_row};
use crate::query_string::QueryStringContext;
use crate::search::rebuild_keywords;
use crate::single::SingleQueryBuilder;
use crate::tasks::BackgroundTasks;

/// Everything a query builder needs besides its own options. Cheap to clone.
#[derive(Clone)]
pub struct QueryEnv {
    store: DynStore,
    collections: Arc<CollectionRegistry>,
    field_types: Arc<FieldTypeRegistry>,
    cache: CacheLayer,
    tasks: BackgroundTasks,
}

impl fmt::Debug for QueryEnv {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("QueryEnv")
            .field("store", &self.store.backend_name())
            .field("collections", &self.collections)
            .field("cache", &self.cache)
            .field("pending_tasks", &self.tasks.pending())
            .finish()
    }
}

impl QueryEnv {
    pub fn new(
        store: DynStore,
        collections: CollectionRegistry,
        field_types: FieldTypeRegistry,
    ) -> Self {
        Self {
            store,
            collections: Arc::new(collections),
            field_types: Arc::new(field_types),
            cache: CacheLayer::disabled(),
            tasks: BackgroundTasks::new(),
        }
    }

    #[must_use]
    pub fn with_cache(mut self, cache: CacheLayer) -> Self {
        self.cache = cache;
        self
    }

    pub fn store(&self) -> &dyn Store {
        self.store.as_ref()
    }

    pub fn collections(&self) -> &CollectionRegistry {
        &self.collections
    }

    pub fn field_types(&self) -> &FieldTypeRegistry {
        &self.field_types
    }

    pub fn cache(&self) -> &CacheLayer {
        &self.cache
    }

    pub fn tasks(&self) -> &BackgroundTasks {
        &self.tasks
    }

    /// Query builder for a multi-entry collection.
    pub fn query(&self, collection: &str) -> Result<QueryBuilder> {
        let definition = self.collections.require(collection)?;
        if definition.is_single() {
            return Err(CoreError::wrong_mode(collection, "multi-entry").into());
        }
        Ok(QueryBuilder::new(self.clone(), definition))
    }

    /// Query builder for a single-entry collection.
    pub fn single(&self, collection: &str) -> Result<SingleQueryBuilder> {
        let definition = self.collections.require(collection)?;
        if !definition.is_single() {
            return Err(CoreError::wrong_mode(collection, "single-entry").into());
        }
        Ok(SingleQueryBuilder::new(self.clone(), definition))
    }

    /// Schema context for compiling query strings against `collection`.
    pub fn query_string_context<'a>(
        &'a self,
        collection: &'a CollectionDefinition,
    ) -> QueryStringContext<'a> {
        QueryStringContext {
            collection,
            collections: &self.collections,
            field_types: &self.field_types,
        }
    }

    /// Passes caller-supplied SQL through to the store.
    #[instrument(skip(self, replacements), fields(backend = self.store.backend_name()))]
    pub async fn raw_query(&self, sql: &str, replacements: &[Value]) -> Result<RawQueryResult> {
        Ok(self.store.raw_query(sql, replacements).await?)
    }

    /// Rebuilds keywords of the given records in the background, then flushes the cache
    /// when the collection's clear rules cover `operation`.
    pub(crate) fn schedule_keyword_rebuild(
        &self,
        collection: Arc<CollectionDefinition>,
        operation: Operation,
        ids: Vec<Value>,
    ) {
        if !collection.is_searchable() || ids.is_empty() {
            return;
        }
        let env = self.clone();
        self.tasks.spawn("rebuild_keywords", async move {
            if let Err(e) =
                rebuild_keywords(env.store(), &collection, env.field_types(), &ids).await
            {
                warn!(collection = %collection.name, error = %e, "Keyword rebuild failed");
            }
            env.cache.flush_for(&collection, operation).await;
        });
    }
}

#[async_trait]
impl RecordResolver for QueryEnv {
    async fn resolve_record(
        &self,
        collection: &str,
        id: &Value,
        language: &str,
    ) -> std::result::Result<Option<Record>, CoreError> {
        let definition = self.collections.require(collection)?;
        if definition.is_single() {
            return Err(CoreError::wrong_mode(collection, "multi-entry"));
        }
        let columns: Vec<String> = definition.field_names().map(str::to_string).collect();
        let select = |filter: FilterNode| {
            StoreQuery::new(definition.table_name())
                .with_columns(columns.clone())
                .with_filter(filter)
                .with_limit(Some(1))
        };

        let rows = self
            .store
            .select(&select(FilterNode::condition("id", Operator::Eq, id.clone())))
            .await
            .map_err(|e| CoreError::population(collection, e.to_string()))?;
        let Some(row) = rows.into_iter().next() else {
            return Ok(None);
        };
        let mut record = cast_row(&definition, &self.field_types, row);

        // Prefer the translation in the requested language.
        if definition.translatable
            && record.get("language").and_then(Value::as_str) != Some(language)
            && let Some(key) = record.get("translations").filter(|key| !key.is_null())
        {
            let translation = self
                .store
                .select(&select(FilterNode::And(vec![
                    FilterNode::condition("translations", Operator::Eq, key.clone()),
                    FilterNode::condition("language", Operator::Eq, Value::from(language)),
                ])))
                .await
                .map_err(|e| CoreError::population(collection, e.to_string()))?;
            if let Some(row) = translation.into_iter().next() {
                record = cast_row(&definition, &self.field_types, row);
            }
        }

        let pipeline = FieldPipeline::new(&definition, &self.field_types, language);
        pipeline.reset_inactive(&mut record);
        pipeline.fallback(&mut record, ValidatorFilter::Applicable);
        Ok(Some(record))
    }
}
