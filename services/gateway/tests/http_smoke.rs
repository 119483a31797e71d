mod common;

use axum::body::Body;
use axum::http::{Request, StatusCode};
use common::{read_json, test_app};
use tower::ServiceExt;

fn get(uri: &str) -> Request<Body> {
    Request::builder()
        .uri(uri)
        .body(Body::empty())
        .expect("request")
}

#[tokio::test]
async fn healthz_reports_backend() {
    let app = test_app();
    let response = app
        .router
        .clone()
        .oneshot(get("/api/healthz"))
        .await
        .expect("health");
    assert_eq!(response.status(), StatusCode::OK);
    let body = read_json(response).await;
    assert_eq!(body["status"], "ok");
    assert_eq!(body["storage"], "memory");
}

#[tokio::test]
async fn openapi_document_lists_routes() {
    let app = test_app();
    let response = app
        .router
        .clone()
        .oneshot(get("/api/openapi.json"))
        .await
        .expect("openapi");
    assert_eq!(response.status(), StatusCode::OK);
    let body = read_json(response).await;
    let paths = body["paths"].as_object().expect("paths");
    for path in [
        "/api/healthz",
        "/api/me",
        "/api/groups",
        "/api/users",
        "/api/users/{user_id}",
        "/api/users/{user_id}/role",
        "/api/group-role-assignments",
        "/api/group-role-assignments/{group_name}",
    ] {
        assert!(paths.contains_key(path), "missing {path}");
    }
}

#[tokio::test]
async fn unknown_route_is_not_found() {
    let app = test_app();
    let response = app
        .router
        .clone()
        .oneshot(get("/api/nope"))
        .await
        .expect("response");
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}
