//! Latency-adaptive read cache.
//!
//! A read is stored only when the collection opts in and the read took at least the
//! collection's threshold, so fast queries never occupy the cache. Keys are derived from
//! the complete builder state; equal options always produce equal keys. Any write that a
//! collection's clear rules cover flushes the whole namespace and then the page cache.
//!
//! Cache failures never fail a query: a failed lookup is a miss, a failed store or flush
//! is logged and skipped.

use async_trait::async_trait;
use dashmap::DashMap;
use std::fmt;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;
use thiserror::Error;
use tracing::{debug, warn};
use vellum_core::{CollectionDefinition, Operation};
use vellum_storage::FilterNode;

use crate::options::{OrderTarget, QueryOptions};

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("Cache connection error: {0}")]
    Connection(String),

    #[error("Cache backend error: {0}")]
    Backend(String),
}

/// A string key/value store holding serialized query results.
#[async_trait]
pub trait CacheClient: Send + Sync {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError>;

    async fn set(&self, key: &str, value: &str) -> Result<(), CacheError>;

    /// Removes every key of the namespace.
    async fn flush_db(&self) -> Result<(), CacheError>;

    /// Returns the backend name for logging.
    fn backend_name(&self) -> &'static str;
}

/// In-process cache client.
#[derive(Default)]
pub struct LocalCache {
    entries: DashMap<String, String>,
}

impl LocalCache {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

impl fmt::Debug for LocalCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("LocalCache")
            .field("size", &self.entries.len())
            .finish()
    }
}

#[async_trait]
impl CacheClient for LocalCache {
    async fn get(&self, key: &str) -> Result<Option<String>, CacheError> {
        Ok(self.entries.get(key).map(|entry| entry.value().clone()))
    }

    async fn set(&self, key: &str, value: &str) -> Result<(), CacheError> {
        self.entries.insert(key.to_string(), value.to_string());
        Ok(())
    }

    async fn flush_db(&self) -> Result<(), CacheError> {
        self.entries.clear();
        Ok(())
    }

    fn backend_name(&self) -> &'static str {
        "local"
    }
}

/// Downstream page cache cleared after every flush.
#[async_trait]
pub trait PageCache: Send + Sync {
    async fn clear_page_cache(&self);
}

#[derive(Debug, Default, Clone, Copy)]
pub struct NoopPageCache;

#[async_trait]
impl PageCache for NoopPageCache {
    async fn clear_page_cache(&self) {}
}

/// Page cache that runs a callback on clear.
#[derive(Clone)]
pub struct CallbackPageCache {
    callback: Arc<dyn Fn() + Send + Sync>,
}

impl CallbackPageCache {
    pub fn new(callback: impl Fn() + Send + Sync + 'static) -> Self {
        Self {
            callback: Arc::new(callback),
        }
    }
}

impl fmt::Debug for CallbackPageCache {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CallbackPageCache").finish_non_exhaustive()
    }
}

#[async_trait]
impl PageCache for CallbackPageCache {
    async fn clear_page_cache(&self) {
        (self.callback)();
    }
}

/// Cache statistics.
#[derive(Debug, Default)]
pub struct CacheStats {
    pub hits: AtomicU64,
    pub misses: AtomicU64,
    pub stores: AtomicU64,
    pub flushes: AtomicU64,
    pub errors: AtomicU64,
}

impl CacheStats {
    pub fn snapshot(&self) -> CacheStatsSnapshot {
        CacheStatsSnapshot {
            hits: self.hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            stores: self.stores.load(Ordering::Relaxed),
            flushes: self.flushes.load(Ordering::Relaxed),
            errors: self.errors.load(Ordering::Relaxed),
        }
    }
}

/// Point-in-time copy of [`CacheStats`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct CacheStatsSnapshot {
    pub hits: u64,
    pub misses: u64,
    pub stores: u64,
    pub flushes: u64,
    pub errors: u64,
}

/// The cache as seen by query builders: an optional client plus the page cache.
#[derive(Clone)]
pub struct CacheLayer {
    client: Option<Arc<dyn CacheClient>>,
    page_cache: Arc<dyn PageCache>,
    stats: Arc<CacheStats>,
}

impl fmt::Debug for CacheLayer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("CacheLayer")
            .field("backend", &self.client.as_ref().map(|c| c.backend_name()))
            .field("stats", &self.stats.snapshot())
            .finish()
    }
}

impl Default for CacheLayer {
    fn default() -> Self {
        Self::disabled()
    }
}

impl CacheLayer {
    pub fn new(client: Arc<dyn CacheClient>) -> Self {
        Self {
            client: Some(client),
            page_cache: Arc::new(NoopPageCache),
            stats: Arc::new(CacheStats::default()),
        }
    }

    /// A layer without a cache client. Flushes still clear the page cache.
    pub fn disabled() -> Self {
        Self {
            client: None,
            page_cache: Arc::new(NoopPageCache),
            stats: Arc::new(CacheStats::default()),
        }
    }

    #[must_use]
    pub fn with_page_cache(mut self, page_cache: Arc<dyn PageCache>) -> Self {
        self.page_cache = page_cache;
        self
    }

    pub fn is_enabled(&self) -> bool {
        self.client.is_some()
    }

    /// Backend name of the cache client, if any.
    pub fn backend_name(&self) -> Option<&'static str> {
        self.client.as_ref().map(|c| c.backend_name())
    }

    pub fn stats(&self) -> CacheStatsSnapshot {
        self.stats.snapshot()
    }

    /// Looks up a key. Failures count as a miss.
    pub async fn get(&self, key: &str) -> Option<String> {
        let client = self.client.as_ref()?;
        match client.get(key).await {
            Ok(Some(value)) => {
                self.stats.hits.fetch_add(1, Ordering::Relaxed);
                debug!(key, "Query cache hit");
                Some(value)
            }
            Ok(None) => {
                self.stats.misses.fetch_add(1, Ordering::Relaxed);
                None
            }
            Err(e) => {
                self.stats.errors.fetch_add(1, Ordering::Relaxed);
                self.stats.misses.fetch_add(1, Ordering::Relaxed);
                warn!(error = %e, backend = client.backend_name(), "Query cache lookup failed");
                None
            }
        }
    }

    pub async fn set(&self, key: &str, value: &str) {
        let Some(client) = self.client.as_ref() else {
            return;
        };
        match client.set(key, value).await {
            Ok(()) => {
                self.stats.stores.fetch_add(1, Ordering::Relaxed);
            }
            Err(e) => {
                self.stats.errors.fetch_add(1, Ordering::Relaxed);
                warn!(error = %e, backend = client.backend_name(), "Failed to store query result");
            }
        }
    }

    /// Flushes the namespace, then the page cache.
    pub async fn flush(&self) {
        if let Some(client) = self.client.as_ref() {
            match client.flush_db().await {
                Ok(()) => {
                    self.stats.flushes.fetch_add(1, Ordering::Relaxed);
                    debug!(backend = client.backend_name(), "Query cache flushed");
                }
                Err(e) => {
                    self.stats.errors.fetch_add(1, Ordering::Relaxed);
                    warn!(error = %e, backend = client.backend_name(), "Query cache flush failed");
                }
            }
        }
        self.page_cache.clear_page_cache().await;
    }

    /// Flushes when the collection's clear rules cover `operation`.
    pub async fn flush_for(&self, collection: &CollectionDefinition, operation: Operation) {
        if collection.clear_cache_rules.applies_to(operation) {
            self.flush().await;
        }
    }
}

/// Whether a query with these options touches a field excluded from caching.
pub fn touches_non_cached_fields(collection: &CollectionDefinition, options: &QueryOptions) -> bool {
    if collection.non_cached_fields.is_empty() {
        return false;
    }
    let excluded = |field: &str| collection.non_cached_fields.contains(field);

    options.select.iter().any(|f| excluded(f.as_str()))
        || options.filter.fields().into_iter().any(excluded)
        || options.group.iter().any(|f| excluded(f.as_str()))
        || options.order.iter().any(|spec| match &spec.target {
            OrderTarget::Field(field) => excluded(field),
            OrderTarget::Relevance(_) => false,
        })
}

/// Cache key for a read, or `None` when the read must not be cached.
pub fn cache_key(
    collection: &CollectionDefinition,
    method: &str,
    options: &QueryOptions,
) -> Option<String> {
    if !collection.cache_queries.is_enabled() || touches_non_cached_fields(collection, options) {
        return None;
    }

    let mut key = format!("{}:{}", collection.name, method);
    key.push_str(":select:");
    key.push_str(&options.select.iter().map(String::as_str).collect::<Vec<_>>().join(","));
    if !is_empty_filter(&options.filter) {
        key.push_str(":where:");
        key.push_str(&serde_json::to_string(&options.filter).ok()?);
    }
    if !options.search.is_empty() {
        key.push_str(":search:");
        key.push_str(&serde_json::to_string(&options.search).ok()?);
    }
    if !options.order.is_empty() {
        let order: Vec<String> = options
            .order
            .iter()
            .map(|spec| match &spec.target {
                OrderTarget::Field(field) => format!("{field}:{}", spec.direction.as_str()),
                OrderTarget::Relevance(structure) => format!(":{structure}"),
            })
            .collect();
        key.push_str(":order:");
        key.push_str(&order.join(","));
    }
    if !options.group.is_empty() {
        key.push_str(":group:");
        key.push_str(&options.group.join(","));
    }
    if let Some(offset) = options.offset {
        key.push_str(&format!(":offset:{offset}"));
    }
    if let Some(limit) = options.limit {
        key.push_str(&format!(":limit:{limit}"));
    }
    key.push_str(&format!(
        ":populate:{}:fallback:{}:language:{}",
        options.populates(),
        options.fallback,
        options.language
    ));
    Some(key)
}

fn is_empty_filter(filter: &FilterNode) -> bool {
    matches!(filter, FilterNode::And(children) if children.is_empty())
}

/// Whether a read that took `elapsed` is slow enough to be stored.
pub fn should_store(collection: &CollectionDefinition, elapsed: Duration) -> bool {
    collection
        .cache_queries
        .threshold()
        .is_some_and(|threshold| elapsed >= threshold)
}
