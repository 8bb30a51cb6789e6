//! HTTP surface tests driven through the router without a socket.

use axum::body::{to_bytes, Body};
use axum::http::{Request, StatusCode};
use axum::Router;
use serde_json::{json, Value};
use snipbox::config::types::ServiceConfig;
use snipbox::server::{router, REQUEST_ID_HEADER};
use snipbox::service::SandboxService;
use tower::ServiceExt;
use uuid::Uuid;

fn app() -> Router {
    let config = ServiceConfig {
        worker_program: Some(env!("CARGO_BIN_EXE_snipbox").into()),
        ..Default::default()
    };
    router(SandboxService::new(&config).unwrap())
}

fn post_run(body: &str) -> Request<Body> {
    Request::builder()
        .method("POST")
        .uri("/code/run")
        .header("content-type", "application/json")
        .body(Body::from(body.to_string()))
        .unwrap()
}

async fn json_body(response: axum::response::Response) -> Value {
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    serde_json::from_slice(&bytes).unwrap()
}

#[tokio::test]
async fn health_is_ok() {
    let response = app()
        .oneshot(Request::get("/health").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert_eq!(json_body(response).await, json!({ "status": "ok" }));
}

#[tokio::test]
async fn metrics_are_prometheus_text() {
    let response = app()
        .oneshot(Request::get("/metrics").body(Body::empty()).unwrap())
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
    let text = String::from_utf8(bytes.to_vec()).unwrap();
    assert!(text.contains("# TYPE snipbox_executions_total counter"));
}

#[tokio::test]
async fn run_returns_output() {
    let response = app().oneshot(post_run(r#"{"code":"1 + 1"}"#)).await.unwrap();
    assert_eq!(response.status(), StatusCode::OK);
    assert!(response.headers().contains_key(REQUEST_ID_HEADER));
    assert_eq!(json_body(response).await, json!({ "output": "2" }));
}

#[tokio::test]
async fn runtime_fault_is_400() {
    let response = app()
        .oneshot(post_run(r#"{"code":"throw new Error('boom')"}"#))
        .await
        .unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(
        json_body(response).await,
        json!({ "error": "boom", "kind": "runtime" })
    );
}

#[tokio::test]
async fn malformed_json_is_a_validation_error() {
    let response = app().oneshot(post_run("{not json")).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(json_body(response).await["kind"], "validation");
}

#[tokio::test]
async fn missing_code_field_is_a_validation_error() {
    let response = app().oneshot(post_run(r#"{"source":"1"}"#)).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(json_body(response).await["kind"], "validation");
}

#[tokio::test]
async fn empty_code_is_rejected() {
    let response = app().oneshot(post_run(r#"{"code":""}"#)).await.unwrap();
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
    assert_eq!(
        json_body(response).await,
        json!({ "error": "empty", "kind": "validation" })
    );
}

#[tokio::test]
async fn incoming_request_id_is_echoed() {
    let id = Uuid::new_v4();
    let mut request = Request::get("/health").body(Body::empty()).unwrap();
    request
        .headers_mut()
        .insert(REQUEST_ID_HEADER, id.to_string().parse().unwrap());
    let response = app().oneshot(request).await.unwrap();
    assert_eq!(
        response.headers()[REQUEST_ID_HEADER].to_str().unwrap(),
        id.to_string()
    );
}

#[tokio::test]
async fn garbage_request_id_is_replaced() {
    let mut request = Request::get("/health").body(Body::empty()).unwrap();
    request
        .headers_mut()
        .insert(REQUEST_ID_HEADER, "not-a-uuid".parse().unwrap());
    let response = app().oneshot(request).await.unwrap();
    let echoed = response.headers()[REQUEST_ID_HEADER].to_str().unwrap();
    assert!(Uuid::parse_str(echoed).is_ok());
}
