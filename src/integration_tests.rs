use axum::{
    body::Body,
    http::{header, Request, StatusCode},
    Router,
};
use serde_json::{json, Value};
use std::sync::Arc;
use tower::util::ServiceExt; // for `oneshot`

use crate::coercion::CoercionOptions;
use crate::condition::ConditionBuilder;
use crate::listing::ListingService;
use crate::repository::testing::RecordingRepository;
use crate::repository::Repository;
use crate::schema::bundled_schema;
use crate::{app, AppState};

fn router(repo: Option<Arc<RecordingRepository>>) -> Router {
    let builder = ConditionBuilder::new(Arc::new(bundled_schema()), CoercionOptions::default());
    let repo = repo.map(|r| r as Arc<dyn Repository>);
    app(AppState::new(ListingService::new(builder, repo, false), 100))
}

fn uri(path: &str, params: &[(&str, &str)]) -> String {
    let url = reqwest::Url::parse_with_params(&format!("http://localhost{}", path), params).unwrap();
    match url.query() {
        Some(q) => format!("{}?{}", url.path(), q),
        None => url.path().to_string(),
    }
}

async fn get_json(router: Router, uri: &str) -> (StatusCode, Value) {
    let response = router
        .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
        .await
        .unwrap();
    let status = response.status();
    let body = axum::body::to_bytes(response.into_body(), usize::MAX)
        .await
        .unwrap();
    (status, serde_json::from_slice(&body).unwrap())
}

#[tokio::test]
async fn test_health_reports_models_and_store() {
    let (status, body) = get_json(router(None), "/health").await;
    assert_eq!(status, StatusCode::OK);
    assert_eq!(body["status"], json!("ok"));
    assert_eq!(body["datastore"], json!(false));
    assert!(body["models"].as_array().unwrap().contains(&json!("User")));

    let (_, body) = get_json(router(Some(Arc::new(RecordingRepository::default()))), "/health").await;
    assert_eq!(body["datastore"], json!(true));
}

#[tokio::test]
async fn test_list_users_end_to_end() {
    let repo = Arc::new(RecordingRepository::with_records(
        vec![json!({"id": "u1", "userName": "jo.reyes"})],
        1,
    ));
    let target = uri(
        "/users",
        &[
            ("query", "jo"),
            ("filter", "loginCount>=3,role:admin,role:viewer"),
            ("fields", "userName,person.personalInfo.firstName"),
            ("sort", r#"{"createdAt":"desc"}"#),
            ("count", "true"),
        ],
    );

    let (status, body) = get_json(router(Some(repo.clone())), &target).await;
    assert_eq!(status, StatusCode::OK, "{}", body);
    assert_eq!(body["status"], json!("success"));
    assert_eq!(body["data"]["users"][0]["userName"], json!("jo.reyes"));
    assert_eq!(body["data"]["count"], json!(1));
    assert_eq!(body["data"]["pagination"]["totalPages"], json!(1));

    let calls = repo.calls();
    let find = calls.iter().find(|c| c.action == "findMany").unwrap();
    assert_eq!(
        find.args,
        json!({
            "where": {
                "isDeleted": false,
                "OR": [{"userName": {"contains": "jo", "mode": "insensitive"}}],
                "AND": [
                    {"loginCount": {"gte": 3}},
                    {"OR": [{"role": "admin"}, {"role": "viewer"}]}
                ]
            },
            "skip": 0,
            "take": 10,
            "orderBy": {"createdAt": "desc"},
            "select": {
                "id": true,
                "userName": true,
                "person": {"select": {"personalInfo": {"select": {"firstName": true}}}}
            }
        })
    );
}

#[tokio::test]
async fn test_plan_works_without_a_store() {
    let target = uri(
        "/persons/plan",
        &[("filter", "contactInfo.address.city~cebu,kycStatus:APPROVED"), ("order", "asc")],
    );
    let (status, body) = get_json(router(None), &target).await;
    assert_eq!(status, StatusCode::OK, "{}", body);
    assert_eq!(body["data"]["model"], json!("Person"));
    assert_eq!(
        body["data"]["query"]["where"],
        json!({
            "AND": [
                {"contactInfo": {"some": {"is": {"address": {"is": {
                    "city": {"contains": "cebu", "mode": "insensitive"}
                }}}}}},
                {"kycStatus": "APPROVED"}
            ]
        })
    );
    assert_eq!(body["data"]["query"]["orderBy"], json!({"id": "asc"}));
}

#[tokio::test]
async fn test_list_without_store_is_unavailable() {
    let (status, body) = get_json(router(None), "/users").await;
    assert_eq!(status, StatusCode::SERVICE_UNAVAILABLE);
    assert_eq!(body["status"], json!("error"));
    assert_eq!(body["code"], json!(503));
}

#[tokio::test]
async fn test_unknown_entity_is_rejected() {
    let (status, body) = get_json(router(None), "/invoices/plan").await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(body["message"], json!("Unknown entity: invoices"));
    assert_eq!(body["reasoning"], json!("The requested resource is not part of the schema."));
    assert!(body["timestamp"].is_string());
}

#[tokio::test]
async fn test_unknown_filter_field_names_expression() {
    let repo = Arc::new(RecordingRepository::default());
    let target = uri("/users", &[("filter", "bogus:1")]);
    let (status, body) = get_json(router(Some(repo.clone())), &target).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    let message = body["message"].as_str().unwrap();
    assert!(message.contains("\"bogus\""), "{}", message);
    assert!(message.contains("bogus:1"), "{}", message);
    assert!(repo.calls().is_empty());
}

#[tokio::test]
async fn test_unknown_projection_field_is_rejected() {
    let repo = Arc::new(RecordingRepository::default());
    let target = uri("/users", &[("fields", "userName,person.noSuchThing")]);
    let (status, body) = get_json(router(Some(repo.clone())), &target).await;

    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(
        body["message"],
        json!("Field \"noSuchThing\" not found in model \"Person\"")
    );
    assert!(repo.calls().is_empty());
}

#[tokio::test]
async fn test_type_coercion_error_response() {
    let target = uri("/users/plan", &[("filter", "createdAt>not-a-date")]);
    let (status, body) = get_json(router(None), &target).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert!(body["message"]
        .as_str()
        .unwrap()
        .contains("Invalid date value: \"not-a-date\" for field \"createdAt\""));
    assert_eq!(
        body["reasoning"],
        json!("The filter value does not match the field's declared type.")
    );
}

#[tokio::test]
async fn test_every_entity_plans_a_search() {
    // Every built-in whitelist must plan cleanly with a search term.
    for segment in [
        "users",
        "persons",
        "roles",
        "organizations",
        "notifications",
        "metrics",
        "system-logs",
        "audit-logs",
        "activity-logs",
    ] {
        let target = uri(&format!("/{}/plan", segment), &[("query", "abc")]);
        let (status, body) = get_json(router(None), &target).await;
        assert_eq!(status, StatusCode::OK, "{}: {}", segment, body);
        assert!(body["data"]["query"]["where"]["OR"].is_array(), "{}", segment);
    }
}

#[tokio::test]
async fn test_limit_above_maximum_is_rejected() {
    let target = uri("/users/plan", &[("limit", "500")]);
    let (status, body) = get_json(router(None), &target).await;
    assert_eq!(status, StatusCode::BAD_REQUEST);
    assert_eq!(
        body["message"],
        json!("Invalid query parameter \"limit\": must not exceed 100")
    );
}

#[tokio::test]
async fn test_store_failure_is_bad_gateway() {
    let repo = Arc::new(RecordingRepository::failing());
    let (status, body) = get_json(router(Some(repo)), "/notifications").await;
    assert_eq!(status, StatusCode::BAD_GATEWAY);
    assert_eq!(body["code"], json!(502));
}

#[tokio::test]
async fn test_grouped_notifications() {
    let repo = Arc::new(RecordingRepository::with_records(
        vec![
            json!({"id": "n1", "priority": "HIGH"}),
            json!({"id": "n2", "priority": "LOW"}),
            json!({"id": "n3", "priority": "HIGH"}),
        ],
        3,
    ));
    let target = uri("/notifications", &[("groupBy", "priority"), ("pagination", "false")]);
    let (status, body) = get_json(router(Some(repo)), &target).await;
    assert_eq!(status, StatusCode::OK, "{}", body);
    assert_eq!(body["data"]["groupedBy"], json!("priority"));
    assert_eq!(body["data"]["notifications"]["HIGH"].as_array().unwrap().len(), 2);
    assert!(body["data"].get("pagination").is_none());
}

#[tokio::test]
async fn test_aggregate_endpoint() {
    let repo = Arc::new(RecordingRepository {
        aggregate: json!({"_avg": {"quantity": 7.5}}),
        ..Default::default()
    });
    let target = uri(
        "/metrics/aggregate",
        &[("op", "avg"), ("field", "quantity"), ("filter", "createdAt:2024-01-01-2024-12-31")],
    );
    let (status, body) = get_json(router(Some(repo.clone())), &target).await;

    // The date-like value is not a numeric range, so it fails date coercion.
    assert_eq!(status, StatusCode::BAD_REQUEST, "{}", body);
    assert!(repo.calls().is_empty());

    let target = uri(
        "/metrics/aggregate",
        &[("op", "avg"), ("field", "quantity"), ("filter", "createdAt>=2024-01-01")],
    );
    let (status, body) = get_json(router(Some(repo.clone())), &target).await;
    assert_eq!(status, StatusCode::OK, "{}", body);
    assert_eq!(body["data"], json!({"op": "avg", "field": "quantity", "value": 7.5}));
    assert_eq!(
        repo.calls()[0].args["_avg"],
        json!({"quantity": true})
    );
}

#[tokio::test]
async fn test_cors_allows_any_origin() {
    let response = router(None)
        .oneshot(
            Request::builder()
                .uri("/health")
                .header(header::ORIGIN, "https://admin.example.org")
                .body(Body::empty())
                .unwrap(),
        )
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(
        response.headers().get(header::ACCESS_CONTROL_ALLOW_ORIGIN).unwrap(),
        "*"
    );
}
