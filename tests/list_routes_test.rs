mod common;

use axum::http::{Method, StatusCode};
use common::{Recording, User, app, app_with, get, seeded_storage, send, user};
use crudroute::{
    CrudOption, CreateOption, GetOption, ListOption, MemoryStorage, QueryTransformation,
    RequestContext, RequestOptions, hooks::BoxError,
};
use serde_json::{Value, json};

fn names(body: &Value, key: &str) -> Vec<String> {
    body[key]
        .as_array()
        .expect("array payload")
        .iter()
        .map(|record| record["name"].as_str().unwrap_or_default().to_string())
        .collect()
}

#[tokio::test]
async fn test_list_is_keyed_by_plural_name() {
    let (status, body) = get(app(seeded_storage()), "/users").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(names(&body, "users"), vec!["Ann", "Bo", "Cy", "Di"]);
    assert!(body.get("total").is_none());
}

#[tokio::test]
async fn test_limit_is_capped_by_limit_max() {
    let storage = MemoryStorage::new(common::registry());
    for index in 0..12 {
        storage
            .seed(user(&format!("User{index:02}"), "2024-01-01"))
            .unwrap();
    }

    let (_, body) = get(app(storage.clone()), "/users").await;
    assert_eq!(body["users"].as_array().unwrap().len(), 10);

    let (_, body) = get(app(storage.clone()), "/users?limit=50").await;
    assert_eq!(body["users"].as_array().unwrap().len(), 10);

    let (_, body) = get(app(storage.clone()), "/users?limit=3&offset=10").await;
    assert_eq!(names(&body, "users"), vec!["User10", "User11"]);

    let options = CrudOption::default().with_list(ListOption::default().with_limit_max(2));
    let (_, body) = get(app_with(storage, &options), "/users?limit=5").await;
    assert_eq!(body["users"].as_array().unwrap().len(), 2);
}

#[tokio::test]
async fn test_order_and_filters() {
    let (_, body) = get(app(seeded_storage()), "/users?order_by=name&desc=true").await;
    assert_eq!(names(&body, "users"), vec!["Di", "Cy", "Bo", "Ann"]);

    let (_, body) = get(app(seeded_storage()), "/users?filters[name]=Bo").await;
    assert_eq!(names(&body, "users"), vec!["Bo"]);

    let (_, body) = get(app(seeded_storage()), "/users?filters[name]=Bo&filters[id]=1").await;
    assert_eq!(names(&body, "users"), Vec::<String>::new());

    // An empty filter value is not a filter.
    let (_, body) = get(app(seeded_storage()), "/users?filters[name]=").await;
    assert_eq!(body["users"].as_array().unwrap().len(), 4);
}

#[tokio::test]
async fn test_range_filter_is_half_open() {
    let (_, body) = get(
        app(seeded_storage()),
        "/users?filters_at=2024-02-10&filters_at=2024-04-10",
    )
    .await;
    assert_eq!(names(&body, "users"), vec!["Bo", "Cy"]);

    // A single bound is ignored.
    let (_, body) = get(app(seeded_storage()), "/users?filters_at=2024-02-10").await;
    assert_eq!(body["users"].as_array().unwrap().len(), 4);
}

#[tokio::test]
async fn test_total_ignores_pagination() {
    let (status, body) = get(app(seeded_storage()), "/users?limit=1&total=true").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["users"].as_array().unwrap().len(), 1);
    assert_eq!(body["total"], 4);

    let (_, body) = get(app(seeded_storage()), "/users?filters[name]=Cy&total=1").await;
    assert_eq!(body["total"], 1);
}

#[tokio::test]
async fn test_failed_count_is_a_soft_error() {
    let storage = Recording::new(seeded_storage()).failing_counts();
    let (status, body) = get(app_with(storage, &CrudOption::default()), "/users?total=true").await;

    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["users"].as_array().unwrap().len(), 4);
    assert!(body.get("total").is_none());
    assert!(body["totalError"].as_str().unwrap().contains("count unavailable"));
}

#[tokio::test]
async fn test_storage_receives_composed_query() {
    let storage = Recording::new(seeded_storage());
    let scope = QueryTransformation::filter_by("created_at", "2024-01-10");
    let options = CrudOption::default().with_list(
        ListOption::default()
            .with_omit(["email"])
            .with_query_option(scope.clone()),
    );
    let app = app_with(storage.clone(), &options);

    get(
        app,
        "/users?limit=3&offset=1&order_by=name&filters[name]=Ann&preload=orders&total=true",
    )
    .await;

    assert_eq!(
        storage.query_of("find_many"),
        vec![
            QueryTransformation::page(3, 1),
            QueryTransformation::omit(["email"]),
            QueryTransformation::order_by("name", false),
            QueryTransformation::filter_by("name", "Ann"),
            QueryTransformation::preload("orders"),
            scope.clone(),
        ]
    );
    assert_eq!(
        storage.query_of("count"),
        vec![QueryTransformation::filter_by("name", "Ann"), scope]
    );
}

#[tokio::test]
async fn test_route_scope_cannot_be_widened() {
    let options = CrudOption::default()
        .with_list(ListOption::default().with_query_option(QueryTransformation::filter_by("name", "Ann")));

    let (_, body) = get(app_with(seeded_storage(), &options), "/users?filters[name]=Bo").await;
    assert_eq!(names(&body, "users"), Vec::<String>::new());

    let (_, body) = get(app_with(seeded_storage(), &options), "/users").await;
    assert_eq!(names(&body, "users"), vec!["Ann"]);
}

#[tokio::test]
async fn test_omitted_fields_read_back_as_defaults() {
    let options = CrudOption::default().with_list(ListOption::default().with_omit(["email"]));
    let (_, body) = get(app_with(seeded_storage(), &options), "/users?limit=1").await;

    assert_eq!(body["users"][0]["name"], "Ann");
    assert_eq!(body["users"][0]["email"], "");
}

#[tokio::test]
async fn test_preload_on_list() {
    let (_, body) = get(app(seeded_storage()), "/users?preload=orders.product&limit=2").await;

    let orders = body["users"][0]["orders"].as_array().unwrap();
    assert_eq!(orders.len(), 2);
    assert_eq!(orders[0]["product"]["title"], "Keyboard");
    assert_eq!(body["users"][1]["orders"][0]["product"]["code"], "ms");
    assert_eq!(body["users"][1]["friends"], json!([]));
}

#[tokio::test]
async fn test_bad_query_and_unknown_fields() {
    let (status, body) = get(app(seeded_storage()), "/users?limit=ten").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["error"].as_str().unwrap().contains("limit"));

    let (status, body) = get(app(seeded_storage()), "/users?order_by=shoe_size").await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert!(body["error"].as_str().unwrap().contains("shoe_size"));
}

#[tokio::test]
async fn test_get_pretreat_can_rewrite_and_reject() {
    let pretreat = |_: &RequestContext, mut options: RequestOptions| -> Result<RequestOptions, BoxError> {
        if options.filters.contains_key("email") {
            return Err("filtering by email is not allowed".into());
        }
        options.order_by = "name".to_string();
        options.descending = true;
        Ok(options)
    };
    let options = CrudOption::default().with_list(ListOption::default().with_pretreat(pretreat));

    let (_, body) = get(app_with(seeded_storage(), &options), "/users").await;
    assert_eq!(names(&body, "users"), vec!["Di", "Cy", "Bo", "Ann"]);

    let (status, body) = get(
        app_with(seeded_storage(), &options),
        "/users?filters[email]=ann@example.com",
    )
    .await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body, json!({"error": "list rejected: filtering by email is not allowed"}));
}

#[tokio::test]
async fn test_get_by_id() {
    let (status, body) = get(app(seeded_storage()), "/users/2").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["user"]["name"], "Bo");
    assert_eq!(body["user"]["id"], 2);

    let (status, body) = get(app(seeded_storage()), "/users/2?preload=orders").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["user"]["orders"][0]["quantity"], 5);

    let (status, body) = get(app(seeded_storage()), "/users/99").await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
    assert!(body["error"].as_str().unwrap().contains("not found"));

    let (status, _) = get(app(seeded_storage()), "/users/abc").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_get_by_id_honours_omit_and_scope() {
    let options = CrudOption::default().with_get(
        GetOption::default()
            .with_omit(["created_at"])
            .with_query_option(QueryTransformation::filter_by("name", "Bo")),
    );

    let (status, body) = get(app_with(seeded_storage(), &options), "/users/2").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["user"]["created_at"], "");

    let (status, _) = get(app_with(seeded_storage(), &options), "/users/1").await;
    assert_eq!(status, StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn test_string_identity_routes() {
    let (status, body) = get(app(seeded_storage()), "/products/kb").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["product"]["title"], "Keyboard");

    let (_, body) = get(app(seeded_storage()), "/products?order_by=price").await;
    assert_eq!(body["products"][0]["code"], "ms");
}

#[tokio::test]
async fn test_disabled_verbs_are_not_routed() {
    let options: CrudOption<User> = CrudOption::default()
        .with_list(ListOption::disabled())
        .with_create(CreateOption::disabled());

    let (status, _) = get(app_with(seeded_storage(), &options), "/users").await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, _) = send(
        app_with(seeded_storage(), &options),
        Method::POST,
        "/users",
        Some(json!({"name": "Eve"})),
    )
    .await;
    assert_eq!(status, StatusCode::NOT_FOUND);

    let (status, body) = get(app_with(seeded_storage(), &options), "/users/1").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["user"]["name"], "Ann");
}

#[tokio::test]
async fn test_disabled_get_keeps_other_item_verbs() {
    let options: CrudOption<User> = CrudOption::default().with_get(GetOption::disabled());

    let (status, _) = get(app_with(seeded_storage(), &options), "/users/1").await;
    assert_eq!(status, StatusCode::METHOD_NOT_ALLOWED);
}
