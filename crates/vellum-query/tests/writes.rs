//! Create, update and delete through the field pipeline.

mod common;

use common::{fixture, fixture_with};
use serde_json::{Map, Value, json};
use vellum_core::{CollectionDefinition, CollectionRegistry, FieldDeclaration, Operation};
use vellum_query::{CacheLayer, WhereBuilder, WriteOutcome};
use vellum_storage::Store;

#[tokio::test]
async fn test_create_fills_defaults_and_timestamps() {
    let fx = fixture();
    let products = fx.env.query("products").expect("products");

    let created = products
        .create(json!({ "name": "  lamp ", "price": "49" }))
        .await
        .expect("create")
        .success()
        .expect("valid input");

    assert_eq!(created["name"], json!("lamp"));
    assert_eq!(created["price"], json!(49));
    assert_eq!(created["stock"], json!(0));
    assert_eq!(created["featured"], json!(false));
    assert_eq!(created["sku"], Value::Null);
    assert!(created["id"].is_number());
    assert!(created["createdAt"].is_number());
}

#[tokio::test]
async fn test_create_ignores_immutable_input() {
    let fx = fixture();
    let products = fx.env.query("products").expect("products");

    let created = products
        .create(json!({ "id": 999, "name": "lamp", "createdAt": 1 }))
        .await
        .expect("create")
        .success()
        .expect("valid input");

    assert_ne!(created["id"], json!(999));
    assert_ne!(created["createdAt"], json!(1));
}

#[tokio::test]
async fn test_create_reports_field_errors() {
    let fx = fixture();
    let products = fx.env.query("products").expect("products");

    let outcome = products
        .create(json!({ "name": "", "stock": -1 }))
        .await
        .expect("create");

    let errors = outcome.errors().expect("invalid input");
    assert_eq!(errors["name"], "This field is required");
    assert_eq!(errors["stock"], "The value must be greater than or equal to 0");
    assert!(fx.store.rows("products").await.is_empty());
}

#[tokio::test]
async fn test_create_rejects_non_object_input() {
    let fx = fixture();
    let products = fx.env.query("products").expect("products");
    assert!(products.create(json!([1, 2])).await.is_err());
}

#[tokio::test]
async fn test_create_many_is_all_or_nothing() {
    let fx = fixture();
    let products = fx.env.query("products").expect("products");

    let outcome = products
        .create_many(vec![
            json!({ "name": "lamp" }),
            json!({ "name": "desk" }),
            json!({ "price": 10 }),
        ])
        .await
        .expect("create many");

    let WriteOutcome::Invalid(errors) = outcome else {
        panic!("expected validation errors, got {outcome:?}");
    };
    assert_eq!(errors.keys().copied().collect::<Vec<_>>(), vec![2]);
    assert_eq!(errors[&2]["name"], "This field is required");
    assert!(fx.store.rows("products").await.is_empty());
}

#[tokio::test]
async fn test_unique_values_are_enforced() {
    let fx = fixture();
    let products = fx.env.query("products").expect("products");

    assert!(
        products
            .create(json!({ "name": "lamp", "sku": "L-1" }))
            .await
            .expect("create")
            .is_success()
    );

    let duplicate = products
        .create(json!({ "name": "other lamp", "sku": "L-1" }))
        .await
        .expect("create");
    assert_eq!(
        duplicate.errors().map(|e| e["sku"].as_str()),
        Some("The value must be unique")
    );

    let batch = products
        .create_many(vec![
            json!({ "name": "a", "sku": "B-1" }),
            json!({ "name": "b", "sku": "B-1" }),
        ])
        .await
        .expect("create many");
    let errors = batch.errors().expect("duplicate within batch");
    assert!(!errors.contains_key(&0));
    assert_eq!(errors[&1]["sku"], "The value must be unique");

    // A record may keep its own value.
    let updated = products
        .clone()
        .where_eq("sku", "L-1")
        .update(json!({ "sku": "L-1", "price": 12 }))
        .await
        .expect("update");
    assert!(updated.is_success(), "{updated:?}");
}

#[tokio::test]
async fn test_update_validates_before_writing() {
    let fx = fixture();
    let products = fx.env.query("products").expect("products");
    products
        .create(json!({ "name": "lamp", "stock": 3 }))
        .await
        .expect("create");

    let rejected = products
        .clone()
        .where_eq("name", "lamp")
        .update(json!({ "stock": -5 }))
        .await
        .expect("update");
    assert!(rejected.errors().is_some());
    assert_eq!(fx.store.rows("products").await[0]["stock"], json!(3));

    let updated = products
        .clone()
        .where_eq("name", "lamp")
        .update(json!({ "stock": "7" }))
        .await
        .expect("update")
        .success()
        .expect("valid input");
    assert_eq!(updated.len(), 1);
    assert_eq!(updated[0]["stock"], json!(7));
    assert!(updated[0]["updatedAt"].is_number());
}

#[tokio::test]
async fn test_delete_returns_removed_records() {
    let fx = fixture();
    let products = fx.env.query("products").expect("products");
    for name in ["lamp", "desk"] {
        products.create(json!({ "name": name })).await.expect("create");
    }

    let deleted = products
        .clone()
        .where_eq("name", "lamp")
        .delete()
        .await
        .expect("delete")
        .success()
        .expect("deleted");
    assert_eq!(deleted.len(), 1);
    assert_eq!(deleted[0]["name"], json!("lamp"));
    assert_eq!(products.count().await.expect("count"), 1);
}

#[tokio::test]
async fn test_fallback_repairs_invalid_stored_values() {
    let fx = fixture();
    let mut row = Map::new();
    row.insert("name".into(), json!("lamp"));
    row.insert("stock".into(), json!(-4));
    fx.store.insert("products", &row).await.expect("insert");

    let products = fx.env.query("products").expect("products");
    let repaired = products.first().await.expect("first").expect("row");
    assert_eq!(repaired["stock"], json!(0));

    let raw = products
        .no_fallback()
        .first()
        .await
        .expect("first")
        .expect("row");
    assert_eq!(raw["stock"], json!(-4));
}

fn translated_registry() -> CollectionRegistry {
    CollectionRegistry::new(vec!["en".to_string(), "de".to_string()], "en")
        .with_collection(
            CollectionDefinition::builder("pages")
                .translatable()
                .field("title", FieldDeclaration::new("text"))
                .field("order", FieldDeclaration::new("number").not_translatable())
                .build(),
        )
}

#[tokio::test]
async fn test_translations_share_non_translatable_fields() {
    let fx = fixture_with(translated_registry(), CacheLayer::disabled());
    let pages = fx.env.query("pages").expect("pages");

    let english = pages
        .create(json!({ "title": "About", "order": 3 }))
        .await
        .expect("create")
        .success()
        .expect("valid");
    let key = english["translations"].clone();
    assert!(key.as_str().is_some_and(|k| !k.is_empty()));

    let german = pages
        .clone()
        .language("de")
        .create(json!({ "title": "Über uns", "translations": key.clone() }))
        .await
        .expect("create")
        .success()
        .expect("valid");
    assert_eq!(german["language"], json!("de"));
    assert_eq!(german["order"], json!(3));

    let duplicate = pages
        .clone()
        .language("de")
        .create(json!({ "title": "Again", "translations": key }))
        .await
        .expect("create");
    assert!(duplicate.errors().is_some_and(|e| e.contains_key("language")));

    pages
        .clone()
        .where_eq("id", english["id"].clone())
        .update(json!({ "order": 9 }))
        .await
        .expect("update");

    let synced = pages
        .where_eq("language", "de")
        .first()
        .await
        .expect("first")
        .expect("german page");
    assert_eq!(synced["order"], json!(9));
    assert_eq!(synced["title"], json!("Über uns"));
}

#[tokio::test]
async fn test_validate_does_not_write() {
    let fx = fixture();
    let products = fx.env.query("products").expect("products");

    let errors = products
        .validate(json!({ "name": "" }), Operation::Create)
        .await
        .expect("validate");
    assert!(errors.contains_key("name"));

    let errors = products
        .validate(json!({ "name": "ok" }), Operation::Create)
        .await
        .expect("validate");
    assert!(errors.is_empty());
    assert!(fx.store.rows("products").await.is_empty());
}
