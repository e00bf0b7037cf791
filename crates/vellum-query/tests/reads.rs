//! Read shaping: selection, grouping, totals and latency-gated caching.

mod common;

use common::{fixture, fixture_with, registry};
use serde_json::json;
use std::sync::Arc;
use vellum_core::{CacheQueries, CollectionDefinition, FieldDeclaration};
use vellum_query::{CacheLayer, LocalCache, QueryBuilder, WhereBuilder};

async fn seed(products: &QueryBuilder) {
    for (name, price) in [("lamp", 10), ("desk", 10), ("chair", 20), ("mat", 5)] {
        products
            .create(json!({ "name": name, "price": price }))
            .await
            .expect("create");
    }
}

#[tokio::test]
async fn test_all_with_count_total_ignores_limit() {
    let fx = fixture();
    let products = fx.env.query("cached_products").expect("products");
    seed(&products).await;

    let page = products
        .clone()
        .where_gte("price", 10)
        .limit(1)
        .all_with_count()
        .await
        .expect("all_with_count");
    assert_eq!(page.records.len(), 1);
    assert_eq!(page.total, 3);

    let skipped = products
        .offset(3)
        .all_with_count()
        .await
        .expect("all_with_count");
    assert_eq!(skipped.records.len(), 1);
    assert_eq!(skipped.total, 4);
}

#[tokio::test]
async fn test_paginate_far_past_the_end_is_empty() {
    let fx = fixture();
    let products = fx.env.query("cached_products").expect("products");
    seed(&products).await;

    let page = products.paginate(u64::MAX, 2).await.expect("paginate");
    assert!(page.records.is_empty());
    assert_eq!(page.total, 4);
    assert_eq!(page.last_page, 2);
}

#[tokio::test]
async fn test_group_collapses_duplicates() {
    let fx = fixture();
    let products = fx.env.query("cached_products").expect("products");
    seed(&products).await;

    let grouped = products
        .select(["price"])
        .group(["price"])
        .all()
        .await
        .expect("all");
    let mut prices: Vec<i64> = grouped
        .iter()
        .filter_map(|record| record["price"].as_i64())
        .collect();
    prices.sort_unstable();
    assert_eq!(prices, vec![5, 10, 20]);
}

#[tokio::test]
async fn test_select_all_and_deselect_shape_records() {
    let fx = fixture();
    let products = fx.env.query("cached_products").expect("products");
    seed(&products).await;

    let narrowed = products
        .clone()
        .select(["name"])
        .first()
        .await
        .expect("first")
        .expect("record");
    assert!(narrowed.contains_key("name"));
    assert!(!narrowed.contains_key("price"));

    let widened = products
        .select(["name"])
        .select_all()
        .deselect(["name"])
        .first()
        .await
        .expect("first")
        .expect("record");
    assert!(widened.contains_key("id"));
    assert!(widened.contains_key("price"));
    assert!(!widened.contains_key("name"));
}

#[tokio::test]
async fn test_fast_reads_below_threshold_are_not_cached() {
    let slow_only = CollectionDefinition::builder("slow_only")
        .field("name", FieldDeclaration::new("text"))
        .cache_queries(CacheQueries::Threshold(10_000))
        .build();
    let cache = Arc::new(LocalCache::new());
    let fx = fixture_with(
        registry().with_collection(slow_only),
        CacheLayer::new(cache.clone()),
    );
    let entries = fx.env.query("slow_only").expect("slow_only");
    entries
        .create(json!({ "name": "lamp" }))
        .await
        .expect("create");

    assert_eq!(entries.all().await.expect("all").len(), 1);
    assert_eq!(entries.all().await.expect("all").len(), 1);

    let stats = fx.env.cache().stats();
    assert_eq!(stats.stores, 0);
    assert_eq!(stats.hits, 0);
    assert!(cache.is_empty());
}
