//! Inbound request instrumentation.
//!
//! # Responsibilities
//! - Open an operation for every inbound request
//! - Bind it to the request future so handlers and their calls can find it
//! - Emit exactly one root dependency when the request ends
//!
//! # Design Decisions
//! - Completion is tracked by a guard moved into the response future; dropping
//!   the future (client disconnect, server shutdown) still emits once
//! - Host and scheme honour the forwarding proxy (`x-forwarded-proto`)
//! - The layer sits outside panic recovery so panics surface as 500s here

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

use axum::http::{header, HeaderMap, Request, Response};
use tower::{Layer, Service};
use tracing::Instrument;

use crate::observability::metrics;
use crate::telemetry::context::{begin_operation, with_context, OperationContext};
use crate::telemetry::event::{DependencyEvent, Properties, TYPE_HTTP_MANUAL};
use crate::telemetry::TelemetryClient;

/// Header carrying a caller supplied request id.
pub const X_REQUEST_ID: &str = "x-request-id";

/// What the root event needs to know about the request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RequestInfo {
    pub method: String,
    /// Host without port.
    pub host: String,
    /// Full URL as seen by the client.
    pub url: String,
    pub request_id: Option<String>,
}

impl RequestInfo {
    pub fn from_request<B>(req: &Request<B>) -> Self {
        let headers = req.headers();
        let authority = header_str(headers, header::HOST.as_str())
            .map(str::to_string)
            .or_else(|| req.uri().authority().map(|a| a.to_string()))
            .unwrap_or_default();
        let host = strip_port(&authority).to_string();
        let scheme = header_str(headers, "x-forwarded-proto")
            .and_then(|v| v.split(',').next())
            .map(str::trim)
            .or_else(|| req.uri().scheme_str())
            .unwrap_or("http");
        let path_and_query = req
            .uri()
            .path_and_query()
            .map(|pq| pq.as_str())
            .unwrap_or("/");

        Self {
            method: req.method().to_string(),
            host,
            url: format!("{}://{}{}", scheme, authority, path_and_query),
            request_id: header_str(headers, X_REQUEST_ID).map(str::to_string),
        }
    }
}

fn header_str<'a>(headers: &'a HeaderMap, name: &str) -> Option<&'a str> {
    headers.get(name).and_then(|v| v.to_str().ok())
}

fn strip_port(authority: &str) -> &str {
    // IPv6 literals keep their brackets: "[::1]:8080" -> "[::1]".
    if let Some(end) = authority.find(']') {
        return &authority[..=end];
    }
    authority.split(':').next().unwrap_or(authority)
}

/// Emits the root event for one request, exactly once.
struct RequestGuard {
    client: TelemetryClient,
    ctx: OperationContext,
    info: RequestInfo,
    done: bool,
}

impl RequestGuard {
    fn finish(mut self, status: Option<u16>) {
        self.emit(status, false);
    }

    fn emit(&mut self, status: Option<u16>, aborted: bool) {
        if self.done {
            return;
        }
        self.done = true;

        let duration = self.ctx.started().elapsed();
        let mut properties = Properties::new();
        if let Some(id) = &self.info.request_id {
            properties.insert("request_id".to_string(), id.clone());
        }
        if aborted {
            properties.insert("aborted".to_string(), "true".to_string());
        }

        metrics::record_request(&self.info.method, status, duration);
        tracing::debug!(
            operation_id = %self.ctx.id(),
            status = ?status,
            aborted,
            duration_ms = duration.as_millis() as u64,
            "Request finished"
        );

        self.client.track_dependency(DependencyEvent {
            id: self.ctx.id(),
            target: self.info.host.clone(),
            name: self.ctx.name().to_string(),
            data: self.info.url.clone(),
            duration,
            success: !aborted && matches!(status, Some(code) if code < 400),
            result_code: status,
            type_name: TYPE_HTTP_MANUAL.to_string(),
            parent_id: None,
            properties,
        });
    }
}

impl Drop for RequestGuard {
    fn drop(&mut self) {
        self.emit(None, true);
    }
}

/// Tower layer instrumenting every inbound request.
#[derive(Clone, Debug)]
pub struct RequestTelemetryLayer {
    client: TelemetryClient,
}

impl RequestTelemetryLayer {
    pub fn new(client: TelemetryClient) -> Self {
        Self { client }
    }
}

impl<S> Layer<S> for RequestTelemetryLayer {
    type Service = RequestTelemetry<S>;

    fn layer(&self, inner: S) -> Self::Service {
        RequestTelemetry {
            inner,
            client: self.client.clone(),
        }
    }
}

/// Service produced by [`RequestTelemetryLayer`].
#[derive(Clone, Debug)]
pub struct RequestTelemetry<S> {
    inner: S,
    client: TelemetryClient,
}

impl<S, ReqBody, ResBody> Service<Request<ReqBody>> for RequestTelemetry<S>
where
    S: Service<Request<ReqBody>, Response = Response<ResBody>> + Clone + Send + 'static,
    S::Future: Send,
    ReqBody: Send + 'static,
    ResBody: Send + 'static,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request<ReqBody>) -> Self::Future {
        let info = RequestInfo::from_request(&req);
        let ctx = begin_operation(format!("{} {}", req.method(), req.uri().path()));
        let span = tracing::info_span!(
            "request",
            operation_id = %ctx.id(),
            method = %req.method(),
            path = %req.uri().path(),
        );
        let guard = RequestGuard {
            client: self.client.clone(),
            ctx: ctx.clone(),
            info,
            done: false,
        };

        // Take the service that was driven to readiness, leave a fresh clone behind.
        let clone = self.inner.clone();
        let mut inner = std::mem::replace(&mut self.inner, clone);

        Box::pin(
            with_context(ctx, async move {
                let result = inner.call(req).await;
                match &result {
                    Ok(response) => guard.finish(Some(response.status().as_u16())),
                    Err(_) => guard.finish(None),
                }
                result
            })
            .instrument(span),
        )
    }
}
