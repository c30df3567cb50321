//! Built-in routes.
//!
//! `/health` for probes, plus diagnostic routes that exercise each telemetry
//! path: a client error, a server error, and an outbound call.

use std::sync::Arc;

use axum::http::{Method, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::Json;
use serde_json::json;

use crate::http::response::AppError;
use crate::routing::{handler, RouteTable};
use crate::telemetry::TrackedClient;

/// Liveness probe.
pub async fn health() -> Result<Response, AppError> {
    Ok((StatusCode::OK, "ok").into_response())
}

/// Always refuses with 401.
pub async fn unauthorized() -> Result<Response, AppError> {
    Err(AppError::Unauthorized("Unauthorized access".to_string()))
}

/// Always fails with 500.
pub async fn server_error() -> Result<Response, AppError> {
    Err(AppError::Internal("simulated server error".to_string()))
}

/// Call the configured upstream and report its status.
pub async fn upstream(client: TrackedClient, url: Option<Arc<str>>) -> Result<Response, AppError> {
    let url = url.ok_or(AppError::NotConfigured("upstream.url"))?;
    let response = client.get(url.as_ref()).send().await?;
    let status = response.status().as_u16();
    tracing::debug!(url = %url, status, "Upstream responded");
    Ok(Json(json!({ "upstream": url.as_ref(), "status": status })).into_response())
}

/// The service's route table.
pub fn routes(client: TrackedClient, upstream_url: Option<String>) -> RouteTable {
    let upstream_url: Option<Arc<str>> = upstream_url.map(Arc::from);

    RouteTable::new()
        .route(Method::GET, "/health", handler(|_req| health()))
        .route(Method::GET, "/api/test/unauthorized", handler(|_req| unauthorized()))
        .route(Method::GET, "/api/test/server-error", handler(|_req| server_error()))
        .route(
            Method::GET,
            "/api/test/upstream",
            handler(move |_req| upstream(client.clone(), upstream_url.clone())),
        )
}
