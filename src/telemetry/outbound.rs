//! Outbound call instrumentation.
//!
//! # Responsibilities
//! - Open a dependency handle before a call leaves the process
//! - Close it exactly once with the call's outcome
//! - Apply both steps to every call made through a wrapped client
//!
//! # Design Decisions
//! - `after_call` consumes the handle, so a call cannot be completed twice
//! - A handle dropped without completion records a cancelled call
//! - Observation only: responses and errors pass through untouched

use std::fmt;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};
use std::time::{Duration, Instant};

use axum::http::header::{HeaderName, HeaderValue};
use axum::http::{Method, Request, Response, StatusCode, Uri};
use serde::Serialize;
use tower::{Layer, Service};

use crate::telemetry::client::TelemetryClient;
use crate::telemetry::context::{current_context, OperationId};
use crate::telemetry::event::{CapturedError, DependencyEvent, Properties, TYPE_HTTP};

/// What is known about a call before it is sent.
#[derive(Debug, Clone)]
pub struct CallInfo {
    pub method: Method,
    /// Destination host, with port when not the scheme default.
    pub target: String,
    pub path: String,
    pub url: String,
}

impl CallInfo {
    pub fn from_url(method: Method, url: &url::Url) -> Self {
        let host = url.host_str().unwrap_or_default();
        let target = match url.port() {
            Some(port) => format!("{}:{}", host, port),
            None => host.to_string(),
        };
        Self {
            method,
            target,
            path: url.path().to_string(),
            url: url.to_string(),
        }
    }

    pub fn from_uri(method: Method, uri: &Uri) -> Self {
        Self {
            method,
            target: uri.authority().map(|a| a.to_string()).unwrap_or_default(),
            path: uri.path().to_string(),
            url: uri.to_string(),
        }
    }

    /// `"<METHOD> <path>"`.
    pub fn name(&self) -> String {
        format!("{} {}", self.method, self.path)
    }
}

/// How an outbound call ended.
#[derive(Debug, Clone)]
pub enum Outcome {
    /// A response arrived, whatever its status.
    Response { status: u16 },
    /// No response: connect error, timeout, protocol error.
    Failed(CapturedError),
}

impl Outcome {
    pub fn status(status: StatusCode) -> Self {
        Outcome::Response { status: status.as_u16() }
    }

    pub fn failed<E: fmt::Display + ?Sized>(error: &E) -> Self {
        Outcome::Failed(CapturedError::capture(error))
    }
}

/// An in-flight outbound call.
#[must_use = "complete the call with `TelemetryClient::after_call`"]
pub struct DependencyHandle {
    client: TelemetryClient,
    id: OperationId,
    info: CallInfo,
    parent_id: Option<OperationId>,
    started: Instant,
    completed: bool,
}

impl DependencyHandle {
    pub fn id(&self) -> OperationId {
        self.id
    }

    pub fn parent_id(&self) -> Option<OperationId> {
        self.parent_id
    }

    fn event(&self, success: bool, result_code: Option<u16>, properties: Properties) -> DependencyEvent {
        DependencyEvent {
            id: self.id,
            target: self.info.target.clone(),
            name: self.info.name(),
            data: self.info.url.clone(),
            duration: self.started.elapsed(),
            success,
            result_code,
            type_name: TYPE_HTTP.to_string(),
            parent_id: self.parent_id,
            properties,
        }
    }

    fn complete(mut self, outcome: Outcome) {
        self.completed = true;
        match outcome {
            Outcome::Response { status } => {
                let event = self.event(status < 400, Some(status), Properties::new());
                self.client.track_dependency(event);
            }
            Outcome::Failed(error) => {
                let event = self.event(false, None, Properties::new());
                self.client.track_failure(error, &event, Properties::new());
                self.client.track_dependency(event);
            }
        }
    }
}

impl Drop for DependencyHandle {
    fn drop(&mut self) {
        if self.completed {
            return;
        }
        let mut properties = Properties::new();
        properties.insert("cancelled".to_string(), "true".to_string());
        let event = self.event(false, None, properties);
        self.client.track_dependency(event);
    }
}

impl TelemetryClient {
    /// Start timing an outbound call, parented to the ambient operation.
    pub fn before_call(&self, info: CallInfo) -> DependencyHandle {
        DependencyHandle {
            client: self.clone(),
            id: OperationId::new(),
            info,
            parent_id: current_context().map(|ctx| ctx.id()),
            started: Instant::now(),
            completed: false,
        }
    }

    /// Finish an outbound call.
    pub fn after_call(&self, handle: DependencyHandle, outcome: Outcome) {
        handle.complete(outcome);
    }
}

/// Wrap a reqwest client so every call through it is recorded.
pub fn wrap_outbound_client(client: reqwest::Client, telemetry: &TelemetryClient) -> TrackedClient {
    TrackedClient {
        inner: client,
        telemetry: telemetry.clone(),
    }
}

/// A reqwest client whose calls are recorded as `HTTP` dependencies.
#[derive(Clone, Debug)]
pub struct TrackedClient {
    inner: reqwest::Client,
    telemetry: TelemetryClient,
}

impl TrackedClient {
    pub fn get(&self, url: impl reqwest::IntoUrl) -> TrackedRequestBuilder {
        self.request(Method::GET, url)
    }

    pub fn post(&self, url: impl reqwest::IntoUrl) -> TrackedRequestBuilder {
        self.request(Method::POST, url)
    }

    pub fn request(&self, method: Method, url: impl reqwest::IntoUrl) -> TrackedRequestBuilder {
        TrackedRequestBuilder {
            client: self.clone(),
            inner: self.inner.request(method, url),
        }
    }

    /// Execute a request, recording it as a child of the ambient operation.
    pub async fn execute(&self, request: reqwest::Request) -> reqwest::Result<reqwest::Response> {
        let handle = self
            .telemetry
            .before_call(CallInfo::from_url(request.method().clone(), request.url()));

        let result = self.inner.execute(request).await;
        let outcome = match &result {
            Ok(response) => Outcome::status(response.status()),
            Err(e) => Outcome::failed(e),
        };
        self.telemetry.after_call(handle, outcome);
        result
    }
}

/// Request builder bound to a [`TrackedClient`]; `send` is recorded.
#[must_use = "a request is only sent and recorded by `send`"]
#[derive(Debug)]
pub struct TrackedRequestBuilder {
    client: TrackedClient,
    inner: reqwest::RequestBuilder,
}

impl TrackedRequestBuilder {
    pub fn header<K, V>(self, key: K, value: V) -> Self
    where
        HeaderName: TryFrom<K>,
        <HeaderName as TryFrom<K>>::Error: Into<axum::http::Error>,
        HeaderValue: TryFrom<V>,
        <HeaderValue as TryFrom<V>>::Error: Into<axum::http::Error>,
    {
        self.map(|b| b.header(key, value))
    }

    pub fn query<T: Serialize + ?Sized>(self, query: &T) -> Self {
        self.map(|b| b.query(query))
    }

    pub fn json<T: Serialize + ?Sized>(self, json: &T) -> Self {
        self.map(|b| b.json(json))
    }

    pub fn body(self, body: impl Into<reqwest::Body>) -> Self {
        self.map(|b| b.body(body))
    }

    pub fn timeout(self, timeout: Duration) -> Self {
        self.map(|b| b.timeout(timeout))
    }

    fn map(self, f: impl FnOnce(reqwest::RequestBuilder) -> reqwest::RequestBuilder) -> Self {
        Self {
            client: self.client,
            inner: f(self.inner),
        }
    }

    /// Build the request and send it through the tracked client.
    ///
    /// A request that fails to build never leaves the process and is not
    /// recorded.
    pub async fn send(self) -> reqwest::Result<reqwest::Response> {
        let request = self.inner.build()?;
        self.client.execute(request).await
    }
}

/// Tower layer recording calls made through any HTTP client service.
#[derive(Clone, Debug)]
pub struct OutboundLayer {
    telemetry: TelemetryClient,
}

impl OutboundLayer {
    pub fn new(telemetry: TelemetryClient) -> Self {
        Self { telemetry }
    }
}

impl<S> Layer<S> for OutboundLayer {
    type Service = OutboundService<S>;

    fn layer(&self, inner: S) -> Self::Service {
        OutboundService {
            inner,
            telemetry: self.telemetry.clone(),
        }
    }
}

/// Service produced by [`OutboundLayer`].
#[derive(Clone, Debug)]
pub struct OutboundService<S> {
    inner: S,
    telemetry: TelemetryClient,
}

impl<S, ReqBody, ResBody> Service<Request<ReqBody>> for OutboundService<S>
where
    S: Service<Request<ReqBody>, Response = Response<ResBody>>,
    S::Future: Send + 'static,
    S::Error: fmt::Display + 'static,
    ResBody: 'static,
{
    type Response = S::Response;
    type Error = S::Error;
    type Future = Pin<Box<dyn Future<Output = Result<Self::Response, Self::Error>> + Send>>;

    fn poll_ready(&mut self, cx: &mut Context<'_>) -> Poll<Result<(), Self::Error>> {
        self.inner.poll_ready(cx)
    }

    fn call(&mut self, req: Request<ReqBody>) -> Self::Future {
        let handle = self
            .telemetry
            .before_call(CallInfo::from_uri(req.method().clone(), req.uri()));
        let telemetry = self.telemetry.clone();
        let fut = self.inner.call(req);

        Box::pin(async move {
            let result = fut.await;
            let outcome = match &result {
                Ok(response) => Outcome::status(response.status()),
                Err(e) => Outcome::failed(e),
            };
            telemetry.after_call(handle, outcome);
            result
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::telemetry::context::{begin_operation, with_context};
    use crate::telemetry::sink::MemorySink;
    use axum::body::Body;
    use std::convert::Infallible;
    use std::sync::Arc;
    use tower::ServiceExt;

    fn setup() -> (Arc<MemorySink>, TelemetryClient) {
        let sink = Arc::new(MemorySink::new());
        let client = TelemetryClient::new(sink.clone(), "pizza-api");
        (sink, client)
    }

    #[test]
    fn test_call_info_from_url() {
        let url = url::Url::parse("https://api.example.com:8443/v1/users?page=2").unwrap();
        let info = CallInfo::from_url(Method::GET, &url);
        assert_eq!(info.target, "api.example.com:8443");
        assert_eq!(info.name(), "GET /v1/users");
        assert_eq!(info.url, "https://api.example.com:8443/v1/users?page=2");
    }

    #[tokio::test]
    async fn test_before_and_after_call_inside_context() {
        let (sink, client) = setup();
        let ctx = begin_operation("GET /api/orders");
        let expected = ctx.id();

        with_context(ctx, async {
            let url = url::Url::parse("http://payments.local/charge").unwrap();
            let handle = client.before_call(CallInfo::from_url(Method::POST, &url));
            client.after_call(handle, Outcome::Response { status: 502 });
        })
        .await;

        let deps = sink.dependencies();
        assert_eq!(deps.len(), 1);
        assert_eq!(deps[0].parent_id, Some(expected));
        assert_eq!(deps[0].result_code, Some(502));
        assert!(!deps[0].success);
        assert_eq!(deps[0].type_name, TYPE_HTTP);
        assert!(sink.exceptions().is_empty());
    }

    #[tokio::test]
    async fn test_network_failure_pairs_exception() {
        let (sink, client) = setup();
        let url = url::Url::parse("http://payments.local/charge").unwrap();
        let handle = client.before_call(CallInfo::from_url(Method::POST, &url));
        let handle_id = handle.id();
        client.after_call(handle, Outcome::Failed(CapturedError::message("timeout", "deadline elapsed")));

        let deps = sink.dependencies();
        let excs = sink.exceptions();
        assert_eq!(deps.len(), 1);
        assert!(deps[0].parent_id.is_none());
        assert!(!deps[0].success);
        assert_eq!(deps[0].result_code, None);
        assert_eq!(excs.len(), 1);
        assert_eq!(excs[0].dependency_id, Some(handle_id));
    }

    #[tokio::test]
    async fn test_dropped_handle_records_cancellation() {
        let (sink, client) = setup();
        let url = url::Url::parse("http://slow.local/").unwrap();
        drop(client.before_call(CallInfo::from_url(Method::GET, &url)));

        let deps = sink.dependencies();
        assert_eq!(deps.len(), 1);
        assert!(!deps[0].success);
        assert_eq!(deps[0].properties.get("cancelled").map(String::as_str), Some("true"));
    }

    #[tokio::test]
    async fn test_outbound_layer_passes_response_through() {
        let (sink, client) = setup();
        let service = tower::service_fn(|_req: Request<Body>| async {
            Ok::<_, Infallible>(
                Response::builder()
                    .status(StatusCode::CREATED)
                    .body(Body::from("made"))
                    .unwrap(),
            )
        });
        let service = OutboundLayer::new(client).layer(service);

        let ctx = begin_operation("POST /api/pizzas");
        let expected = ctx.id();
        let response = with_context(ctx, async {
            service
                .oneshot(
                    Request::post("http://inventory.local:9000/items")
                        .body(Body::empty())
                        .unwrap(),
                )
                .await
                .unwrap()
        })
        .await;

        assert_eq!(response.status(), StatusCode::CREATED);
        let deps = sink.dependencies();
        assert_eq!(deps.len(), 1);
        assert_eq!(deps[0].target, "inventory.local:9000");
        assert_eq!(deps[0].name, "POST /items");
        assert_eq!(deps[0].parent_id, Some(expected));
        assert!(deps[0].success);
    }
}
