//! HTTP protocol handling subsystem.
//!
//! # Data Flow
//! ```text
//! TCP connection
//!     → server.rs (Axum setup, middleware stack)
//!     → request.rs (open the operation, emit the root event on completion)
//!     → [routing table dispatches to an instrumented handler]
//!     → handlers.rs (built-in routes, outbound calls)
//!     → response.rs (handler failures to JSON responses)
//!     → Send to client
//! ```

pub mod handlers;
pub mod request;
pub mod response;
pub mod server;

pub use request::{RequestInfo, RequestTelemetryLayer, X_REQUEST_ID};
pub use response::AppError;
pub use server::HttpServer;
