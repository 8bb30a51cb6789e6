//! HTTP surface
//!
//! `POST /code/run`, `GET /health` and `GET /metrics`. The server never parses
//! chat or markdown: it receives `{"code": "..."}` and answers with either
//! `{output}` or `{error, kind}`. Every response carries `x-request-id`.

use crate::config::types::{Result, SandboxError, ServiceConfig};
use crate::core::types::{ExecutionOutcome, RejectReason};
use crate::observability::metrics;
use crate::service::SandboxService;
use axum::extract::rejection::JsonRejection;
use axum::extract::{Extension, Request, State};
use axum::http::{header, HeaderName, HeaderValue, StatusCode};
use axum::middleware::{self, Next};
use axum::response::{IntoResponse, Json, Response};
use axum::routing::{get, post};
use axum::Router;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::net::TcpListener;
use tower_http::cors::{Any, CorsLayer};
use uuid::Uuid;

pub const REQUEST_ID_HEADER: &str = "x-request-id";

/// Message returned for every host fault; details stay in the logs.
pub const HOST_FAULT_MESSAGE: &str = "internal sandbox failure";

#[derive(Clone)]
pub struct AppState {
    pub service: SandboxService,
}

/// Correlation id assigned to each HTTP request.
#[derive(Clone, Copy, Debug)]
pub struct RequestId(pub Uuid);

#[derive(Debug, Deserialize)]
pub struct RunBody {
    pub code: String,
}

#[derive(Debug, Serialize)]
pub struct RunResponse {
    pub output: String,
}

#[derive(Debug, Serialize)]
pub struct ErrorBody {
    pub error: String,
    pub kind: &'static str,
}

pub fn router(service: SandboxService) -> Router {
    let cors = CorsLayer::new()
        .allow_origin(Any)
        .allow_methods(Any)
        .allow_headers(Any)
        .expose_headers([HeaderName::from_static(REQUEST_ID_HEADER)]);

    Router::new()
        .route("/code/run", post(run_code))
        .route("/health", get(health))
        .route("/metrics", get(metrics_text))
        .layer(middleware::from_fn(assign_request_id))
        .layer(cors)
        .with_state(AppState { service })
}

/// Reuse a well-formed incoming `x-request-id`, otherwise mint one, and echo
/// it on the response.
async fn assign_request_id(mut request: Request, next: Next) -> Response {
    let id = request
        .headers()
        .get(REQUEST_ID_HEADER)
        .and_then(|value| value.to_str().ok())
        .and_then(|value| Uuid::parse_str(value).ok())
        .unwrap_or_else(Uuid::new_v4);
    request.extensions_mut().insert(RequestId(id));

    let mut response = next.run(request).await;
    if let Ok(value) = HeaderValue::from_str(&id.to_string()) {
        response.headers_mut().insert(REQUEST_ID_HEADER, value);
    }
    response
}

async fn run_code(
    State(state): State<AppState>,
    Extension(RequestId(request_id)): Extension<RequestId>,
    body: std::result::Result<Json<RunBody>, JsonRejection>,
) -> Response {
    let Json(body) = match body {
        Ok(body) => body,
        Err(rejection) => {
            log::debug!("request {} has a malformed body: {}", request_id, rejection);
            return error_response(
                StatusCode::BAD_REQUEST,
                format!("invalid request body: {}", rejection.body_text()),
                "validation",
            );
        }
    };

    let result = state.service.execute_with_id(request_id, &body.code).await;
    outcome_response(result)
}

/// Map a service result onto status code and body.
pub fn outcome_response(result: Result<ExecutionOutcome>) -> Response {
    match result {
        Ok(ExecutionOutcome::Completed { output }) => {
            (StatusCode::OK, Json(RunResponse { output })).into_response()
        }
        Ok(ExecutionOutcome::Rejected {
            reason: RejectReason::Busy,
        }) => error_response(
            StatusCode::SERVICE_UNAVAILABLE,
            RejectReason::Busy.to_string(),
            "validation",
        ),
        Ok(outcome) => {
            let kind = outcome.fault_kind().map(|k| k.as_str()).unwrap_or("runtime");
            let message = outcome.error_message().unwrap_or_default();
            error_response(StatusCode::BAD_REQUEST, message, kind)
        }
        Err(_) => error_response(
            StatusCode::INTERNAL_SERVER_ERROR,
            HOST_FAULT_MESSAGE.to_string(),
            "host",
        ),
    }
}

fn error_response(status: StatusCode, error: String, kind: &'static str) -> Response {
    (status, Json(ErrorBody { error, kind })).into_response()
}

async fn health() -> Json<serde_json::Value> {
    Json(json!({ "status": "ok" }))
}

async fn metrics_text() -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        metrics::get_metrics().export_prometheus(),
    )
}

/// Bind and serve until SIGINT or SIGTERM.
pub async fn serve(config: &ServiceConfig) -> Result<()> {
    let service = SandboxService::new(config)?;
    let addr = config.bind_addr()?;
    let listener = TcpListener::bind(addr)
        .await
        .map_err(|e| SandboxError::Config(format!("cannot bind {}: {}", addr, e)))?;
    log::info!(
        "snipbox listening on {} (deadline {} ms, {} concurrent sandboxes)",
        addr,
        config.deadline_ms,
        config.max_concurrent
    );

    axum::serve(listener, router(service))
        .with_graceful_shutdown(shutdown_signal())
        .await?;
    log::info!("snipbox stopped");
    Ok(())
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            log::error!("failed to listen for ctrl-c: {}", e);
            std::future::pending::<()>().await;
        }
    };

    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                log::error!("failed to listen for SIGTERM: {}", e);
                std::future::pending::<()>().await;
            }
        }
    };

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    log::info!("shutdown signal received; draining in-flight requests");
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::to_bytes;

    async fn body_json(response: Response) -> serde_json::Value {
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        serde_json::from_slice(&bytes).unwrap()
    }

    #[tokio::test]
    async fn completed_is_200_with_output() {
        let response = outcome_response(Ok(ExecutionOutcome::Completed {
            output: "2".to_string(),
        }));
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(body_json(response).await, json!({ "output": "2" }));
    }

    #[tokio::test]
    async fn timeout_is_400_timeout_kind() {
        let response = outcome_response(Ok(ExecutionOutcome::TimedOut {}));
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            body_json(response).await,
            json!({ "error": "execution timed out", "kind": "timeout" })
        );
    }

    #[tokio::test]
    async fn busy_is_503() {
        let response = outcome_response(Ok(ExecutionOutcome::Rejected {
            reason: RejectReason::Busy,
        }));
        assert_eq!(response.status(), StatusCode::SERVICE_UNAVAILABLE);
        assert_eq!(
            body_json(response).await,
            json!({ "error": "busy", "kind": "validation" })
        );
    }

    #[tokio::test]
    async fn host_fault_hides_details() {
        let response = outcome_response(Err(SandboxError::Spawn(
            "/usr/lib/secret/path missing".to_string(),
        )));
        assert_eq!(response.status(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(
            body_json(response).await,
            json!({ "error": "internal sandbox failure", "kind": "host" })
        );
    }

    #[tokio::test]
    async fn runtime_fault_is_400() {
        let response = outcome_response(Ok(ExecutionOutcome::Faulted {
            message: "boom".to_string(),
        }));
        assert_eq!(response.status(), StatusCode::BAD_REQUEST);
        assert_eq!(
            body_json(response).await,
            json!({ "error": "boom", "kind": "runtime" })
        );
    }
}
