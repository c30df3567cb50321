//! Bulk instrumentation of a route table.
//!
//! Walks every registered route and wraps its handler so each invocation is
//! recorded as an in-process dependency named `"<METHOD> <path>"`. Entries
//! that cannot be served are reported and left alone; they never abort the
//! pass.

use crate::routing::router::RouteTable;
use crate::telemetry::TelemetryClient;

/// What [`auto_instrument_routes`] did to a table.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct InstrumentationReport {
    /// Handlers newly wrapped by this pass.
    pub wrapped: usize,
    /// Handlers that were already instrumented and kept as-is.
    pub already_instrumented: usize,
    /// Entries skipped because they are incomplete or malformed.
    pub skipped: usize,
}

/// Wrap every route handler in `table` with `client`.
///
/// Running the pass twice is harmless: handlers wrapped by an earlier pass,
/// or by [`RouteTable::with_telemetry`], are counted and not wrapped again.
pub fn auto_instrument_routes(client: &TelemetryClient, table: &mut RouteTable) -> InstrumentationReport {
    let mut report = InstrumentationReport::default();

    let defects = table.defects();
    for (entry, defect) in table.entries_mut().iter_mut().zip(defects) {
        if let Some(defect) = defect {
            tracing::warn!(path = %entry.path, defect, "Not instrumenting route");
            report.skipped += 1;
            continue;
        }
        let (Some(name), Some(handler)) = (entry.operation_name(), entry.handler.take()) else {
            report.skipped += 1;
            continue;
        };

        if handler.is_instrumented() {
            report.already_instrumented += 1;
            entry.handler = Some(handler);
        } else {
            entry.handler = Some(client.instrument(name, handler));
            report.wrapped += 1;
        }
    }

    tracing::info!(
        wrapped = report.wrapped,
        already_instrumented = report.already_instrumented,
        skipped = report.skipped,
        "Routes instrumented"
    );
    report
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::http::response::AppError;
    use crate::routing::router::{handler, RouteEntry, RouteHandler};
    use crate::telemetry::event::TYPE_IN_PROC;
    use crate::telemetry::MemorySink;
    use axum::body::Body;
    use axum::http::{Method, Request, StatusCode};
    use axum::response::IntoResponse;
    use std::sync::Arc;
    use tower::ServiceExt;

    fn setup() -> (Arc<MemorySink>, TelemetryClient) {
        let sink = Arc::new(MemorySink::new());
        let client = TelemetryClient::new(sink.clone(), "pizza-api");
        (sink, client)
    }

    fn ok() -> RouteHandler {
        handler(|_req| async { Ok(StatusCode::OK.into_response()) })
    }

    fn pizza_routes() -> RouteTable {
        RouteTable::new()
            .route(Method::GET, "/api/pizzas", ok())
            .route(Method::POST, "/api/pizzas", ok())
            .route(Method::GET, "/api/pizzas/{id}", ok())
            .route(Method::DELETE, "/api/pizzas/{id}", ok())
            .route(Method::GET, "/api/toppings", ok())
    }

    #[tokio::test]
    async fn test_every_route_is_wrapped_and_still_served() {
        let (sink, client) = setup();
        let mut table = pizza_routes();

        let report = auto_instrument_routes(&client, &mut table);
        assert_eq!(
            report,
            InstrumentationReport {
                wrapped: 5,
                already_instrumented: 0,
                skipped: 0
            }
        );
        assert!(table
            .entries()
            .iter()
            .all(|e| e.handler.as_ref().is_some_and(|h| h.is_instrumented())));

        let router = table.into_router();
        let requests = [
            (Method::GET, "/api/pizzas"),
            (Method::POST, "/api/pizzas"),
            (Method::GET, "/api/pizzas/7"),
            (Method::DELETE, "/api/pizzas/7"),
            (Method::GET, "/api/toppings"),
        ];
        for (method, uri) in requests {
            let response = router
                .clone()
                .oneshot(Request::builder().method(method).uri(uri).body(Body::empty()).unwrap())
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::OK);
        }

        let mut names: Vec<String> = sink.dependencies().into_iter().map(|d| d.name).collect();
        names.sort();
        assert_eq!(
            names,
            vec![
                "DELETE /api/pizzas/{id}",
                "GET /api/pizzas",
                "GET /api/pizzas/{id}",
                "GET /api/toppings",
                "POST /api/pizzas",
            ]
        );
        assert!(sink.dependencies().iter().all(|d| d.type_name == TYPE_IN_PROC));
    }

    #[tokio::test]
    async fn test_second_pass_does_not_double_wrap() {
        let (sink, client) = setup();
        let mut table = pizza_routes();
        auto_instrument_routes(&client, &mut table);

        let report = auto_instrument_routes(&client, &mut table);
        assert_eq!(report.wrapped, 0);
        assert_eq!(report.already_instrumented, 5);

        table
            .into_router()
            .oneshot(Request::get("/api/toppings").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(sink.dependencies().len(), 1);
    }

    #[tokio::test]
    async fn test_mixed_table_wraps_only_plain_handlers() {
        let (_sink, client) = setup();
        let mut table = RouteTable::with_telemetry(client.clone()).route(Method::GET, "/api/orders", ok());
        table.push(RouteEntry::new(Method::GET, "/api/menu", ok()));

        let report = auto_instrument_routes(&client, &mut table);
        assert_eq!(report.wrapped, 1);
        assert_eq!(report.already_instrumented, 1);
        assert_eq!(
            table.entries()[0].handler.as_ref().and_then(|h| h.instrumented_name()),
            Some("GET /api/orders")
        );
    }

    #[tokio::test]
    async fn test_malformed_entries_are_skipped() {
        let (sink, client) = setup();
        let mut table = RouteTable::new().route(Method::GET, "/api/pizzas", ok());
        table.push(RouteEntry::parse("", "/api/ghost", Some(ok())));
        table.push(RouteEntry::parse("GET", "/api/empty", None));
        table.push(RouteEntry::parse("GET", "no-slash", Some(ok())));

        let report = auto_instrument_routes(&client, &mut table);
        assert_eq!(report.wrapped, 1);
        assert_eq!(report.skipped, 3);
        assert_eq!(table.len(), 4);

        let router = table.into_router();
        let response = router
            .clone()
            .oneshot(Request::get("/api/pizzas").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        let ghost = router
            .oneshot(Request::get("/api/ghost").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(ghost.status(), StatusCode::NOT_FOUND);
        assert_eq!(sink.dependencies().len(), 1);
    }

    #[tokio::test]
    async fn test_unroutable_paths_are_skipped_not_wrapped() {
        let (sink, client) = setup();
        let mut table = RouteTable::new()
            .route(Method::GET, "/api/pizzas", ok())
            .route(Method::GET, "/api/pizzas/:id", ok())
            .route(Method::GET, "/api/orders/{id}", ok())
            .route(Method::PUT, "/api/orders/{order_id}", ok());

        let report = auto_instrument_routes(&client, &mut table);
        assert_eq!(
            report,
            InstrumentationReport {
                wrapped: 2,
                already_instrumented: 0,
                skipped: 2
            }
        );

        let router = table.into_router();
        let response = router
            .oneshot(Request::get("/api/orders/3").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::OK);
        assert_eq!(sink.dependencies()[0].name, "GET /api/orders/{id}");
    }

    #[tokio::test]
    async fn test_wrapped_failure_keeps_status_and_records_exception() {
        let (sink, client) = setup();
        let mut table = RouteTable::new().route(
            Method::GET,
            "/api/test/unauthorized",
            handler(|_req| async { Err(AppError::Unauthorized("Unauthorized access".into())) }),
        );
        auto_instrument_routes(&client, &mut table);

        let response = table
            .into_router()
            .oneshot(Request::get("/api/test/unauthorized").body(Body::empty()).unwrap())
            .await
            .unwrap();
        assert_eq!(response.status(), StatusCode::UNAUTHORIZED);

        let deps = sink.dependencies();
        assert_eq!(deps.len(), 1);
        assert!(!deps[0].success);
        assert_eq!(sink.exceptions().len(), 1);
        assert_eq!(sink.exceptions()[0].error.message, "Unauthorized access");
    }
}
