//! Health check endpoint tests.

mod common;

use axum::http::StatusCode;
use common::{json_body, TestApp};

#[tokio::test]
async fn health_check_returns_success_when_database_is_up() {
    let app = TestApp::new();

    let response = app.request("GET", "/health").await;

    assert_eq!(response.status(), StatusCode::OK);
    let body = json_body(response).await;
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["checks"]["database"]["status"], "up");
    assert!(body["checks"]["database"].get("message").is_none());
    assert!(body["version"].is_string());
    assert!(body["timestamp"].is_string());
}

#[tokio::test]
async fn health_check_reports_unavailable_database() {
    let app = TestApp::with_unhealthy_database();

    let response = app.request("GET", "/health").await;

    assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
    let body = json_body(response).await;
    assert_eq!(body["status"], "unhealthy");
    assert_eq!(body["checks"]["database"]["status"], "down");
    assert!(body["checks"]["database"]["message"]
        .as_str()
        .is_some_and(|m| m.contains("connection refused")));
}
