//! Shared fixtures for the query-layer integration tests.

#![allow(dead_code)]

use serde_json::json;
use std::sync::Arc;
use vellum_core::{
    CacheQueries, CollectionDefinition, CollectionRegistry, FieldDeclaration, FieldTypeRegistry,
    SearchField, Uniqueness,
};
use vellum_db_memory::InMemoryStore;
use vellum_query::{CacheLayer, QueryEnv};
use vellum_storage::DynStore;

pub fn products() -> CollectionDefinition {
    CollectionDefinition::builder("products")
        .timestamps()
        .field(
            "name",
            FieldDeclaration::new("text").with_options(json!({ "required": true, "maxLength": 60 })),
        )
        .field(
            "sku",
            FieldDeclaration::new("text")
                .nullable()
                .unique(Uniqueness::Global),
        )
        .field("price", FieldDeclaration::new("number"))
        .field("discount", FieldDeclaration::new("number"))
        .field(
            "stock",
            FieldDeclaration::new("number").with_options(json!({ "min": 0 })),
        )
        .field("featured", FieldDeclaration::new("switch"))
        .field("description", FieldDeclaration::new("text"))
        .search("default", vec![SearchField::new("description")])
        .build()
}

/// Products with every read cached regardless of latency.
pub fn cached_products() -> CollectionDefinition {
    CollectionDefinition::builder("cached_products")
        .field("name", FieldDeclaration::new("text"))
        .field("price", FieldDeclaration::new("number"))
        .cache_queries(CacheQueries::Threshold(0))
        .build()
}

pub fn registry() -> CollectionRegistry {
    CollectionRegistry::new(vec!["en".to_string(), "de".to_string()], "en")
        .with_collection(products())
        .with_collection(cached_products())
}

pub struct Fixture {
    pub store: Arc<InMemoryStore>,
    pub env: QueryEnv,
}

pub fn fixture_with(collections: CollectionRegistry, cache: CacheLayer) -> Fixture {
    let store = Arc::new(InMemoryStore::new());
    let dyn_store: DynStore = store.clone();
    let env = QueryEnv::new(dyn_store, collections, FieldTypeRegistry::with_builtin())
        .with_cache(cache);
    Fixture { store, env }
}

pub fn fixture() -> Fixture {
    fixture_with(registry(), CacheLayer::disabled())
}
