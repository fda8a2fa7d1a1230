//! HTTP API tests.
//!
//! Tests cover:
//! - Health and identity handling
//! - Command submission and idempotent retries
//! - State and event queries
//! - Error rendering
//! - The HTTP remote-log client, against mocks and a live server

use std::sync::Arc;

use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use axum::Router;
use lifeos_core::api::{build_router, AppState};
use lifeos_core::commands::Command;
use lifeos_core::error::{ErrorCode, ErrorResponse, KernelError};
use lifeos_core::events::UserId;
use lifeos_core::local::{
    ClientConfig, HttpRemote, InMemoryLocalStore, LocalFirstClient, RemoteLog, SubmitRequest,
};
use lifeos_core::Kernel;
use serde_json::{json, Value};
use tower::ServiceExt;
use wiremock::matchers::{header, method, path};
use wiremock::{Mock, MockServer, ResponseTemplate};

// ============================================================================
// Test Utilities
// ============================================================================

fn app() -> Router {
    build_router(AppState::new(Kernel::in_memory()))
}

fn submit_request(user: &str, command: Command) -> Request<Body> {
    Request::post("/v1/commands")
        .header("content-type", "application/json")
        .header("x-user-id", user)
        .body(Body::from(serde_json::to_vec(&SubmitRequest { command }).unwrap()))
        .unwrap()
}

fn get(uri: &str, user: Option<&str>) -> Request<Body> {
    let mut builder = Request::get(uri);
    if let Some(user) = user {
        builder = builder.header("x-user-id", user);
    }
    builder.body(Body::empty()).unwrap()
}

async fn json_body(response: axum::response::Response) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

fn create_task(key: &str) -> Command {
    Command::new(
        "create_task",
        json!({ "taskId": "t1", "title": "write", "estimateMinutes": 30 }),
        key,
    )
}

// ============================================================================
// Router
// ============================================================================

#[tokio::test]
async fn test_health_check() {
    let response = app().oneshot(get("/health", None)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = json_body(response).await;
    assert_eq!(body["status"], "healthy");
    assert_eq!(body["storage"], "memory");
    assert_eq!(body["policies"], 7);
}

#[tokio::test]
async fn test_missing_user_is_unauthorized() {
    let response = app().oneshot(get("/v1/state", None)).await.unwrap();
    assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

    let body = json_body(response).await;
    assert_eq!(body["success"], false);
    assert_eq!(body["error"]["code"], "UNAUTHORIZED");
}

#[tokio::test]
async fn test_submit_then_retry_is_deduped() {
    let app = app();

    let first = app.clone().oneshot(submit_request("ana", create_task("k1"))).await.unwrap();
    assert_eq!(first.status(), StatusCode::OK);
    let body = json_body(first).await;
    assert_eq!(body["success"], true);
    assert!(body.get("deduped").is_none());

    let retry = app.clone().oneshot(submit_request("ana", create_task("k1"))).await.unwrap();
    let body = json_body(retry).await;
    assert_eq!(body["success"], true);
    assert_eq!(body["deduped"], true);

    let events = json_body(app.oneshot(get("/v1/events", Some("ana"))).await.unwrap()).await;
    assert_eq!(events.as_array().unwrap().len(), 1);
    assert_eq!(events[0]["type"], "TASK_CREATED");
    assert_eq!(events[0]["idempotencyKey"], "k1");
}

#[tokio::test]
async fn test_validation_error_rendering() {
    let response = app()
        .oneshot(submit_request(
            "ana",
            Command::new("complete_task", json!({ "taskId": "nope" }), "k1"),
        ))
        .await
        .unwrap();

    assert_eq!(response.status(), StatusCode::NOT_FOUND);
    let body = json_body(response).await;
    assert_eq!(body["error"]["code"], "TASK_NOT_FOUND");
}

#[tokio::test]
async fn test_state_reflects_commands() {
    let app = app();
    app.clone().oneshot(submit_request("ana", create_task("k1"))).await.unwrap();

    let response = app
        .oneshot(get("/v1/state?tzOffsetMinutes=120", Some("ana")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);

    let body = json_body(response).await;
    assert_eq!(body["state"]["backlogPressure"], 1.0);
    assert!(body["suggestions"].is_array());
}

#[tokio::test]
async fn test_out_of_range_offset_rejected() {
    let response = app()
        .oneshot(get("/v1/state?tzOffsetMinutes=900", Some("ana")))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::UNPROCESSABLE_ENTITY);
}

#[tokio::test]
async fn test_metrics_without_exporter() {
    let response = app().oneshot(get("/metrics", None)).await.unwrap();
    assert_eq!(response.status(), StatusCode::NOT_FOUND);
}

// ============================================================================
// HTTP Remote (mocked)
// ============================================================================

#[tokio::test]
async fn test_http_remote_maps_server_errors() {
    let server = MockServer::start().await;
    let body = ErrorResponse::from(&KernelError::storage_unavailable("db down"));
    Mock::given(method("POST"))
        .and(path("/v1/commands"))
        .and(header("x-user-id", "ana"))
        .respond_with(ResponseTemplate::new(503).set_body_json(&body))
        .mount(&server)
        .await;

    let remote = HttpRemote::new(server.uri()).unwrap();
    let err = remote
        .submit(&UserId::new("ana"), &create_task("k1"))
        .await
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::StorageUnavailable);
    assert!(err.is_retryable());
}

#[tokio::test]
async fn test_http_remote_preserves_validation_code() {
    let server = MockServer::start().await;
    let body = ErrorResponse::from(&KernelError::task_not_found("t9"));
    Mock::given(method("POST"))
        .and(path("/v1/commands"))
        .respond_with(ResponseTemplate::new(404).set_body_json(&body))
        .mount(&server)
        .await;

    let remote = HttpRemote::new(server.uri()).unwrap();
    let err = remote
        .submit(&UserId::new("ana"), &create_task("k1"))
        .await
        .unwrap_err();
    assert_eq!(err.code(), ErrorCode::TaskNotFound);
    assert!(err.is_validation());
}

#[tokio::test]
async fn test_http_remote_unparseable_gateway_error_is_transient() {
    let server = MockServer::start().await;
    Mock::given(method("GET"))
        .and(path("/v1/events"))
        .respond_with(ResponseTemplate::new(502).set_body_string("bad gateway"))
        .mount(&server)
        .await;

    let remote = HttpRemote::new(server.uri()).unwrap();
    let err = remote.fetch(&UserId::new("ana"), None).await.unwrap_err();
    assert!(err.is_retryable());
}

// ============================================================================
// HTTP Remote (live server)
// ============================================================================

#[tokio::test]
async fn test_client_reconciles_over_http() {
    let kernel = Kernel::in_memory();
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let app = build_router(AppState::new(kernel.clone()));
    let server = tokio::spawn(async move {
        axum::serve(listener, app).await.unwrap();
    });

    let client = LocalFirstClient::open(
        UserId::new("ana"),
        Arc::new(HttpRemote::new(format!("http://{}", addr)).unwrap()),
        Arc::new(InMemoryLocalStore::new()),
        ClientConfig::default(),
    )
    .await
    .unwrap();

    client.submit(&create_task("k1")).await.unwrap();
    client
        .submit(&Command::new("complete_task", json!({ "taskId": "t1" }), "k2"))
        .await
        .unwrap();

    let report = client.reconcile_once().await.unwrap();
    assert!(report.is_clean());
    assert_eq!(report.acknowledged.len(), 2);

    let remote_view = kernel.today(&UserId::new("ana"), None).await.unwrap();
    let local_view = client.today(None).await.unwrap();
    assert_eq!(local_view.state, remote_view.state);

    server.abort();
}
