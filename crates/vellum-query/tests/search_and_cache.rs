//! Relevance search and the adaptive read cache.

mod common;

use async_trait::async_trait;
use common::{fixture, fixture_with, registry};
use serde_json::{Value, json};
use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use vellum_core::{CacheQueries, ClearCacheRules, CollectionDefinition, FieldDeclaration, SearchField};
use vellum_query::{CacheClient, CacheError, CacheLayer, CallbackPageCache, LocalCache, WhereBuilder};

#[tokio::test]
async fn test_relevance_orders_earlier_matches_first() {
    let fx = fixture();
    let products = fx.env.query("products").expect("products");

    let late = format!("{}lamp", "x".repeat(30));
    let early = format!("{}lamp", "y".repeat(5));
    for (name, description) in [("late", late.as_str()), ("early", early.as_str()), ("none", "chair")] {
        products
            .create(json!({ "name": name, "description": description }))
            .await
            .expect("create");
    }
    fx.env.tasks().wait_idle().await;

    let records = products
        .search("default", "LAMP")
        .order_by_relevance("default")
        .all()
        .await
        .expect("all");

    let names: Vec<&str> = records
        .iter()
        .filter_map(|r| r.get("name").and_then(Value::as_str))
        .collect();
    assert_eq!(names, vec!["early", "late"]);
    assert!(records.iter().all(|r| !r.contains_key("_search_default")));
}

#[tokio::test]
async fn test_keywords_follow_updates() {
    let fx = fixture();
    let products = fx.env.query("products").expect("products");
    products
        .create(json!({ "name": "item", "description": "Brass Lamp" }))
        .await
        .expect("create");
    fx.env.tasks().wait_idle().await;

    products
        .clone()
        .where_eq("name", "item")
        .update(json!({ "description": "Oak table" }))
        .await
        .expect("update");
    fx.env.tasks().wait_idle().await;

    let rows = fx.store.rows("products").await;
    assert_eq!(rows[0]["_search_default"], json!("oak table"));
    assert_eq!(
        products.clone().search("default", "lamp").count().await.expect("count"),
        0
    );
    assert_eq!(
        products.search("default", "table").count().await.expect("count"),
        1
    );
}

#[tokio::test]
async fn test_unknown_search_structure_is_ignored() {
    let fx = fixture();
    let products = fx.env.query("products").expect("products");
    let builder = products.search("missing", "lamp");
    assert!(builder.options().search.is_empty());
}

#[tokio::test]
async fn test_cached_read_skips_the_store() {
    let cache = Arc::new(LocalCache::new());
    let fx = fixture_with(registry(), CacheLayer::new(cache.clone()));
    let products = fx.env.query("cached_products").expect("products");
    products
        .create(json!({ "name": "lamp", "price": 20 }))
        .await
        .expect("create");
    fx.env.tasks().wait_idle().await;

    let query = products.clone().where_gt("price", 10);
    let first = query.all().await.expect("all");
    let selects = fx.store.counters().selects();
    let second = query.all().await.expect("all");

    assert_eq!(first, second);
    assert_eq!(fx.store.counters().selects(), selects);
    assert_eq!(fx.env.cache().stats().hits, 1);
    assert!(!cache.is_empty());
}

#[tokio::test]
async fn test_writes_flush_the_cache_and_page_cache() {
    let cache = Arc::new(LocalCache::new());
    let cleared = Arc::new(AtomicUsize::new(0));
    let counter = cleared.clone();
    let layer = CacheLayer::new(cache.clone()).with_page_cache(Arc::new(CallbackPageCache::new(
        move || {
            counter.fetch_add(1, Ordering::SeqCst);
        },
    )));
    let fx = fixture_with(registry(), layer);
    let products = fx.env.query("cached_products").expect("products");

    products
        .create(json!({ "name": "lamp", "price": 20 }))
        .await
        .expect("create");
    assert_eq!(products.count().await.expect("count"), 1);
    assert!(!cache.is_empty());

    products
        .create(json!({ "name": "desk", "price": 90 }))
        .await
        .expect("create");
    assert!(cache.is_empty());
    assert_eq!(products.count().await.expect("count"), 2);
    assert_eq!(cleared.load(Ordering::SeqCst), 2);
}

#[tokio::test]
async fn test_keyword_rebuild_respects_clear_rules() {
    let notes = CollectionDefinition::builder("notes")
        .field("body", FieldDeclaration::new("text"))
        .search("default", vec![SearchField::new("body")])
        .cache_queries(CacheQueries::Threshold(0))
        .clear_cache_rules(ClearCacheRules::none())
        .build();
    let cache = Arc::new(LocalCache::new());
    let cleared = Arc::new(AtomicUsize::new(0));
    let counter = cleared.clone();
    let layer = CacheLayer::new(cache.clone()).with_page_cache(Arc::new(CallbackPageCache::new(
        move || {
            counter.fetch_add(1, Ordering::SeqCst);
        },
    )));
    let fx = fixture_with(registry().with_collection(notes), layer);
    let notes = fx.env.query("notes").expect("notes");

    assert!(notes.all().await.expect("all").is_empty());
    notes
        .create(json!({ "body": "Brass desk lamp" }))
        .await
        .expect("create");
    fx.env.tasks().wait_idle().await;

    assert_eq!(fx.env.cache().stats().flushes, 0);
    assert_eq!(cleared.load(Ordering::SeqCst), 0);
    assert!(!cache.is_empty());
    assert!(notes.all().await.expect("all").is_empty());
}

struct FailingCache;

#[async_trait]
impl CacheClient for FailingCache {
    async fn get(&self, _key: &str) -> Result<Option<String>, CacheError> {
        Err(CacheError::Connection("connection refused".into()))
    }

    async fn set(&self, _key: &str, _value: &str) -> Result<(), CacheError> {
        Err(CacheError::Connection("connection refused".into()))
    }

    async fn flush_db(&self) -> Result<(), CacheError> {
        Err(CacheError::Connection("connection refused".into()))
    }

    fn backend_name(&self) -> &'static str {
        "failing"
    }
}

#[tokio::test]
async fn test_cache_failures_are_misses() {
    let fx = fixture_with(registry(), CacheLayer::new(Arc::new(FailingCache)));
    let products = fx.env.query("cached_products").expect("products");

    let created = products
        .create(json!({ "name": "lamp", "price": 20 }))
        .await
        .expect("create");
    assert!(created.is_success());

    let records = products.all().await.expect("all");
    assert_eq!(records.len(), 1);

    let stats = fx.env.cache().stats();
    assert_eq!(stats.hits, 0);
    assert!(stats.errors >= 2);
}
