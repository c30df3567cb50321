//! Request telemetry correlation for axum services.
//!
//! Every inbound request opens an operation; wrapped functions, outbound HTTP
//! calls and route handlers record dependencies correlated to it; a buffered
//! sink uploads the events and is flushed on shutdown.

pub mod config;
pub mod http;
pub mod lifecycle;
pub mod observability;
pub mod resilience;
pub mod routing;
pub mod telemetry;

pub use config::schema::ServiceConfig;
pub use http::HttpServer;
pub use lifecycle::{Shutdown, ShutdownFlush};
pub use routing::{auto_instrument_routes, RouteTable};
pub use telemetry::{
    begin_operation, current_context, instrument, with_context, wrap_outbound_client, TelemetryClient,
};
