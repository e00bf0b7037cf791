//! Filter composition and query-string compilation against the in-memory store.

mod common;

use common::fixture;
use serde_json::{Value, json};
use vellum_core::Operation;
use vellum_query::query_string::{QueryStringError, parse_query_pairs};
use vellum_query::{FilterScope, WhereBuilder, branch};
use vellum_storage::{FilterNode, Operator, SortDirection};

async fn seed(env: &vellum_query::QueryEnv) {
    let products = env.query("products").expect("products");
    for (name, price, discount) in [("lamp", 50, 0.0), ("desk", 200, 0.6), ("chair", 200, 0.0)] {
        let outcome = products
            .create(json!({ "name": name, "price": price, "discount": discount }))
            .await
            .expect("create");
        assert!(outcome.is_success(), "{outcome:?}");
    }
    env.tasks().wait_idle().await;
}

fn names(records: &[vellum_core::Record]) -> Vec<&str> {
    records
        .iter()
        .filter_map(|r| r.get("name").and_then(Value::as_str))
        .collect()
}

#[tokio::test]
async fn test_some_nests_or_of_and_groups() {
    let fx = fixture();
    let builder = fx
        .env
        .query("products")
        .expect("products")
        .where_eq("featured", true)
        .some(vec![
            branch(|q| q.where_lt("price", 100)),
            branch(|q| q.where_gte("discount", 0.5)),
        ]);

    assert_eq!(
        builder.options().filter,
        FilterNode::And(vec![
            FilterNode::condition("featured", Operator::Eq, json!(true)),
            FilterNode::Or(vec![
                FilterNode::And(vec![FilterNode::condition("price", Operator::Lt, json!(100))]),
                FilterNode::And(vec![FilterNode::condition(
                    "discount",
                    Operator::Gte,
                    json!(0.5)
                )]),
            ]),
        ])
    );
}

#[tokio::test]
async fn test_some_matches_either_branch() {
    let fx = fixture();
    seed(&fx.env).await;

    let records = fx
        .env
        .query("products")
        .expect("products")
        .some(vec![
            branch(|q| q.where_lt("price", 100)),
            branch(|q| q.where_gte("discount", 0.5)),
        ])
        .order("name", SortDirection::Asc)
        .all()
        .await
        .expect("all");

    assert_eq!(names(&records), vec!["desk", "lamp"]);
}

#[tokio::test]
async fn test_query_string_filters_like_builder() {
    let fx = fixture();
    let products = fx.env.query("products").expect("products");

    let compiled = products.compile_query_string(
        &parse_query_pairs("where=price[>=][5],price[between][20,50]"),
        Operation::Read,
    );
    assert!(compiled.is_valid(), "{:?}", compiled.errors);

    let expected = FilterScope::new()
        .where_gte("price", 5)
        .where_between("price", vec![json!(20), json!(50)])
        .into_nodes();
    assert_eq!(compiled.params.filter, expected);
}

#[tokio::test]
async fn test_query_string_some_group_matches_builder_results() {
    let fx = fixture();
    seed(&fx.env).await;
    let products = fx.env.query("products").expect("products");

    let compiled = products.compile_query_string(
        &parse_query_pairs("where=some:[price[<][100],discount[>=][0.5]]&order=name"),
        Operation::Read,
    );
    assert!(compiled.is_valid(), "{:?}", compiled.errors);
    let from_string = products
        .clone()
        .apply_query_string_params(&compiled.params)
        .all()
        .await
        .expect("all");

    let from_builder = products
        .some(vec![
            branch(|q| q.where_lt("price", 100)),
            branch(|q| q.where_gte("discount", 0.5)),
        ])
        .order("name", SortDirection::Asc)
        .all()
        .await
        .expect("all");

    assert_eq!(from_string, from_builder);
}

#[tokio::test]
async fn test_unknown_field_does_not_drop_valid_sibling() {
    let fx = fixture();
    let products = fx.env.query("products").expect("products");

    let compiled = products.compile_query_string(
        &parse_query_pairs("where=foo[=][1],price[=][5]"),
        Operation::Read,
    );

    assert_eq!(compiled.errors.len(), 1);
    assert_eq!(
        compiled.errors[0].to_string(),
        "the field 'foo' does not exist"
    );
    assert!(matches!(&compiled.errors[0], QueryStringError::UnknownField { .. }));
    assert_eq!(
        compiled.params.filter,
        vec![FilterNode::condition("price", Operator::Eq, json!(5))]
    );
}

#[tokio::test]
async fn test_page_and_per_page_become_offset_and_limit() {
    let fx = fixture();
    seed(&fx.env).await;
    let products = fx.env.query("products").expect("products");

    let compiled = products.compile_query_string(
        &parse_query_pairs("page=2&perPage=2&order=name:desc"),
        Operation::Read,
    );
    assert!(compiled.is_valid(), "{:?}", compiled.errors);
    assert_eq!(compiled.params.offset, Some(2));
    assert_eq!(compiled.params.limit, Some(2));

    let records = products
        .apply_query_string_params(&compiled.params)
        .all()
        .await
        .expect("all");
    assert_eq!(names(&records), vec!["chair"]);
}

#[tokio::test]
async fn test_options_round_trip_reproduces_results() {
    let fx = fixture();
    seed(&fx.env).await;

    let original = fx
        .env
        .query("products")
        .expect("products")
        .select(["name", "price"])
        .where_gt("price", 10)
        .order("price", SortDirection::Desc)
        .order("name", SortDirection::Asc)
        .limit(2);
    let restored = fx
        .env
        .query("products")
        .expect("products")
        .with_options(original.options().clone());

    assert_eq!(
        original.all().await.expect("all"),
        restored.all().await.expect("all")
    );
    assert_eq!(
        names(&restored.all().await.expect("all")),
        vec!["chair", "desk"]
    );
}

#[tokio::test]
async fn test_counts_and_aggregates() {
    let fx = fixture();
    seed(&fx.env).await;
    let products = fx.env.query("products").expect("products");

    assert_eq!(products.count().await.expect("count"), 3);
    assert!(products.clone().where_eq("name", "lamp").exists().await.expect("exists"));
    assert!(
        products
            .clone()
            .where_eq("name", "sofa")
            .not_exists()
            .await
            .expect("not exists")
    );
    assert_eq!(products.min("price").await.expect("min"), json!(50));
    assert_eq!(products.max("price").await.expect("max"), json!(200));
    assert_eq!(products.sum("price").await.expect("sum"), json!(450));

    let page = products
        .order("name", SortDirection::Asc)
        .paginate(2, 2)
        .await
        .expect("paginate");
    assert_eq!(page.total, 3);
    assert_eq!(page.last_page, 2);
    assert_eq!(page.current_page, 2);
    assert_eq!(names(&page.records), vec!["lamp"]);
}

#[tokio::test]
async fn test_single_collection_rejected_by_multi_builder() {
    let fx = common::fixture_with(
        common::registry().with_collection(
            vellum_core::CollectionDefinition::builder("settings")
                .single()
                .build(),
        ),
        vellum_query::CacheLayer::disabled(),
    );
    assert!(fx.env.query("settings").is_err());
    assert!(fx.env.single("products").is_err());
    assert!(fx.env.query("missing").is_err());
}
