//! Assembles a ready-to-use query layer from [`AppConfig`].

use std::sync::Arc;

use tracing::{info, instrument, warn};
use vellum_core::{CollectionDefinition, CollectionRegistry, FieldTypeRegistry};
use vellum_db_postgres::create_store;
use vellum_query::{
    CacheLayer, LocalCache, PageCache, QueryBuilder, QueryEnv, SingleQueryBuilder,
};
use vellum_storage::DynStore;

use crate::config::{AppConfig, CacheBackend, CacheConfig, StorageBackend};
use crate::error::{Result, RuntimeError};
use crate::redis_cache::RedisCache;

/// Builds the cache layer. An unreachable Redis falls back to the local cache.
pub async fn create_cache_layer(config: &CacheConfig) -> CacheLayer {
    if !config.enabled {
        info!("Query cache disabled");
        return CacheLayer::disabled();
    }

    match config.backend {
        CacheBackend::Local => CacheLayer::new(Arc::new(LocalCache::new())),
        CacheBackend::Redis => match RedisCache::connect(&config.redis).await {
            Ok(cache) => CacheLayer::new(Arc::new(cache)),
            Err(e) => {
                warn!(error = %e, "Redis unavailable, falling back to local query cache");
                CacheLayer::new(Arc::new(LocalCache::new()))
            }
        },
    }
}

/// A configured store, schema and cache with builder entry points.
#[derive(Debug, Clone)]
pub struct QueryLayer {
    config: Arc<AppConfig>,
    env: QueryEnv,
}

impl QueryLayer {
    /// Starts a layer with the built-in field types.
    pub async fn start(config: AppConfig, collections: Vec<CollectionDefinition>) -> Result<Self> {
        QueryLayerBuilder::new(config)
            .collections(collections)
            .start()
            .await
    }

    pub fn builder(config: AppConfig) -> QueryLayerBuilder {
        QueryLayerBuilder::new(config)
    }

    pub fn config(&self) -> &AppConfig {
        &self.config
    }

    pub fn env(&self) -> &QueryEnv {
        &self.env
    }

    pub fn query(&self, collection: &str) -> vellum_query::Result<QueryBuilder> {
        self.env.query(collection)
    }

    pub fn single(&self, collection: &str) -> vellum_query::Result<SingleQueryBuilder> {
        self.env.single(collection)
    }

    /// Waits for background keyword rebuilds to finish.
    pub async fn shutdown(&self) {
        self.env.tasks().wait_idle().await;
        info!("Query layer stopped");
    }
}

/// Builder for [`QueryLayer`] when custom field types or a page cache are needed.
pub struct QueryLayerBuilder {
    config: AppConfig,
    collections: Vec<CollectionDefinition>,
    field_types: FieldTypeRegistry,
    page_cache: Option<Arc<dyn PageCache>>,
    store: Option<DynStore>,
}

impl std::fmt::Debug for QueryLayerBuilder {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("QueryLayerBuilder")
            .field("collections", &self.collections.len())
            .field("page_cache", &self.page_cache.is_some())
            .field("store", &self.store.as_ref().map(|s| s.backend_name()))
            .finish_non_exhaustive()
    }
}

impl QueryLayerBuilder {
    pub fn new(config: AppConfig) -> Self {
        Self {
            config,
            collections: Vec::new(),
            field_types: FieldTypeRegistry::with_builtin(),
            page_cache: None,
            store: None,
        }
    }

    #[must_use]
    pub fn collection(mut self, collection: CollectionDefinition) -> Self {
        self.collections.push(collection);
        self
    }

    #[must_use]
    pub fn collections(mut self, collections: Vec<CollectionDefinition>) -> Self {
        self.collections.extend(collections);
        self
    }

    #[must_use]
    pub fn field_types(mut self, field_types: FieldTypeRegistry) -> Self {
        self.field_types = field_types;
        self
    }

    #[must_use]
    pub fn page_cache(mut self, page_cache: Arc<dyn PageCache>) -> Self {
        self.page_cache = Some(page_cache);
        self
    }

    /// Uses `store` instead of the configured backend.
    #[must_use]
    pub fn store(mut self, store: DynStore) -> Self {
        self.store = Some(store);
        self
    }

    #[instrument(skip(self), fields(storage = ?self.config.storage.backend, cache = ?self.config.cache.backend))]
    pub async fn start(self) -> Result<QueryLayer> {
        self.config.validate()?;

        let languages = &self.config.languages;
        let mut registry =
            CollectionRegistry::new(languages.supported.clone(), languages.primary.clone());
        for collection in self.collections {
            registry.register(collection);
        }

        let store = match self.store {
            Some(store) => store,
            None => match self.config.storage.backend {
                StorageBackend::Memory => vellum_db_memory::create_store(),
                StorageBackend::Postgres => create_store(
                    self.config.storage.postgres.clone(),
                    &registry,
                    &self.field_types,
                )
                .await
                .map_err(RuntimeError::from)?,
            },
        };

        let mut cache = create_cache_layer(&self.config.cache).await;
        if let Some(page_cache) = self.page_cache {
            cache = cache.with_page_cache(page_cache);
        }

        info!(
            store = store.backend_name(),
            cache = cache.backend_name().unwrap_or("disabled"),
            collections = registry.names().count(),
            "Query layer ready"
        );

        let env = QueryEnv::new(store, registry, self.field_types).with_cache(cache);
        Ok(QueryLayer {
            config: Arc::new(self.config),
            env,
        })
    }
}
