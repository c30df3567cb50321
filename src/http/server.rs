//! HTTP server setup and configuration.
//!
//! # Responsibilities
//! - Build the route table and instrument every handler
//! - Wire up middleware (request id, tracing, request telemetry, panics, timeout)
//! - Bind server to listener
//! - Stop accepting on the shutdown broadcast

use std::time::Duration;

use axum::Router;
use tokio::net::TcpListener;
use tokio::sync::broadcast;
use tower_http::{
    catch_panic::CatchPanicLayer,
    request_id::{MakeRequestUuid, PropagateRequestIdLayer, SetRequestIdLayer},
    timeout::TimeoutLayer,
    trace::TraceLayer,
};

use crate::config::ServiceConfig;
use crate::http::handlers;
use crate::http::request::RequestTelemetryLayer;
use crate::routing::{auto_instrument_routes, InstrumentationReport};
use crate::telemetry::{wrap_outbound_client, TelemetryClient};

/// HTTP server with request telemetry on every route.
pub struct HttpServer {
    router: Router,
    report: InstrumentationReport,
}

impl HttpServer {
    /// Create a new HTTP server with the given configuration.
    pub fn new(config: ServiceConfig, telemetry: TelemetryClient) -> Self {
        let outbound = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeouts.outbound_secs))
            .build()
            .unwrap_or_else(|e| {
                tracing::warn!(error = %e, "Falling back to default outbound client");
                reqwest::Client::new()
            });
        let outbound = wrap_outbound_client(outbound, &telemetry);

        let mut table = handlers::routes(outbound, config.upstream.url.clone());
        let report = auto_instrument_routes(&telemetry, &mut table);

        let router = Self::build_router(&config, table.into_router(), telemetry);
        Self { router, report }
    }

    /// Layer the middleware stack. Outermost first: request id, trace,
    /// request telemetry, panic recovery, timeout.
    #[allow(deprecated)]
    fn build_router(config: &ServiceConfig, routes: Router, telemetry: TelemetryClient) -> Router {
        routes
            .layer(TimeoutLayer::new(Duration::from_secs(config.timeouts.request_secs)))
            .layer(CatchPanicLayer::new())
            .layer(RequestTelemetryLayer::new(telemetry))
            .layer(PropagateRequestIdLayer::x_request_id())
            .layer(TraceLayer::new_for_http())
            .layer(SetRequestIdLayer::x_request_id(MakeRequestUuid))
    }

    /// The fully layered router, for in-process testing.
    pub fn router(&self) -> Router {
        self.router.clone()
    }

    /// Result of instrumenting the route table.
    pub fn instrumentation(&self) -> &InstrumentationReport {
        &self.report
    }

    /// Run the server until `shutdown` fires, then drain in-flight requests.
    pub async fn run(self, listener: TcpListener, mut shutdown: broadcast::Receiver<()>) -> Result<(), std::io::Error> {
        let addr = listener.local_addr()?;
        tracing::info!(
            address = %addr,
            routes = self.report.wrapped + self.report.already_instrumented,
            "HTTP server starting"
        );

        axum::serve(listener, self.router.into_make_service())
            .with_graceful_shutdown(async move {
                let _ = shutdown.recv().await;
                tracing::info!("HTTP server draining");
            })
            .await?;

        tracing::info!("HTTP server stopped");
        Ok(())
    }
}
