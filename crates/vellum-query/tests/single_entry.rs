//! Single-entry collections: lazy creation, updates and cross-language sync.

mod common;

use common::fixture_with;
use serde_json::json;
use vellum_core::{CollectionDefinition, CollectionRegistry, FieldDeclaration, SINGLE_COLLECTIONS_TABLE};
use vellum_query::CacheLayer;

fn settings_registry() -> CollectionRegistry {
    CollectionRegistry::new(vec!["en".to_string(), "de".to_string()], "en").with_collection(
        CollectionDefinition::builder("settings")
            .single()
            .field(
                "title",
                FieldDeclaration::new("text").with_options(json!({ "default": "My site" })),
            )
            .field("maintenance", FieldDeclaration::new("switch").not_translatable())
            .field(
                "perPage",
                FieldDeclaration::new("number").with_options(json!({ "min": 1, "default": 10 })),
            )
            .build(),
    )
}

#[tokio::test]
async fn test_read_creates_record_with_defaults() {
    let fx = fixture_with(settings_registry(), CacheLayer::disabled());
    let settings = fx.env.single("settings").expect("settings");

    let record = settings.read().await.expect("read");
    assert_eq!(record["title"], json!("My site"));
    assert_eq!(record["maintenance"], json!(false));
    assert_eq!(record["perPage"], json!(10));
    assert_eq!(record["language"], json!("en"));
    assert!(record["id"].is_number());

    settings.read().await.expect("read again");
    let rows = fx.store.rows(SINGLE_COLLECTIONS_TABLE).await;
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0]["name"], json!("settings"));
    assert!(rows[0]["data"].is_string());
}

#[tokio::test]
async fn test_update_syncs_shared_fields_across_languages() {
    let fx = fixture_with(settings_registry(), CacheLayer::disabled());
    let settings = fx.env.single("settings").expect("settings");

    let updated = settings
        .update(json!({ "title": "Welcome", "maintenance": "on" }))
        .await
        .expect("update")
        .success()
        .expect("valid input");
    assert_eq!(updated["title"], json!("Welcome"));
    assert_eq!(updated["maintenance"], json!(true));

    let german = settings.clone().language("de").read().await.expect("read");
    assert_eq!(german["language"], json!("de"));
    assert_eq!(german["maintenance"], json!(true));
    assert_eq!(german["title"], json!("My site"));
}

#[tokio::test]
async fn test_update_rejects_invalid_values() {
    let fx = fixture_with(settings_registry(), CacheLayer::disabled());
    let settings = fx.env.single("settings").expect("settings");

    let outcome = settings
        .update(json!({ "perPage": 0 }))
        .await
        .expect("update");
    assert_eq!(
        outcome.errors().map(|e| e["perPage"].as_str()),
        Some("The value must be greater than or equal to 1")
    );
    assert_eq!(settings.read().await.expect("read")["perPage"], json!(10));

    let errors = settings
        .validate(json!({ "perPage": 5 }))
        .await
        .expect("validate");
    assert!(errors.is_empty());
}

#[tokio::test]
async fn test_select_limits_fields_but_keeps_identity() {
    let fx = fixture_with(settings_registry(), CacheLayer::disabled());
    let record = fx
        .env
        .single("settings")
        .expect("settings")
        .select(["title"])
        .read()
        .await
        .expect("read");

    let mut keys: Vec<&str> = record.keys().map(String::as_str).collect();
    keys.sort_unstable();
    assert_eq!(keys, vec!["id", "language", "title"]);
}
