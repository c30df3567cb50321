//! Route table and its composition into an axum router.
//!
//! # Responsibilities
//! - Hold (method, path, handler) registrations
//! - Optionally instrument handlers as they are registered
//! - Compose the table into an axum `Router`
//!
//! # Design Decisions
//! - Entries may be incomplete; incomplete entries are skipped, not fatal
//! - Duplicate (method, path) pairs keep the first registration
//! - Handlers are `AsyncOp`s so instrumentation is an explicit composition step

use std::collections::{BTreeMap, HashSet};
use std::panic::{self, AssertUnwindSafe};

use axum::body::Body;
use axum::http::{Method, Request};
use axum::response::{IntoResponse, Response};
use axum::routing::{MethodFilter, MethodRouter};
use axum::Router;

use crate::http::response::AppError;
use crate::telemetry::{AsyncOp, TelemetryClient};

/// A route handler: request in, response or failure out.
pub type RouteHandler = AsyncOp<Request<Body>, Response, AppError>;

/// Build a [`RouteHandler`] from an async closure.
pub fn handler<F, Fut>(f: F) -> RouteHandler
where
    F: Fn(Request<Body>) -> Fut + Send + Sync + 'static,
    Fut: std::future::Future<Output = Result<Response, AppError>> + Send + 'static,
{
    AsyncOp::new(f)
}

/// One registration. Fields are optional because tables may be assembled
/// from partial sources.
#[derive(Debug, Clone)]
pub struct RouteEntry {
    pub method: Option<Method>,
    pub path: String,
    pub handler: Option<RouteHandler>,
}

impl RouteEntry {
    pub fn new(method: Method, path: impl Into<String>, handler: RouteHandler) -> Self {
        Self {
            method: Some(method),
            path: path.into(),
            handler: Some(handler),
        }
    }

    /// Entry from a textual method; an unparseable method leaves it incomplete.
    pub fn parse(method: &str, path: impl Into<String>, handler: Option<RouteHandler>) -> Self {
        Self {
            method: Method::from_bytes(method.trim().to_ascii_uppercase().as_bytes()).ok(),
            path: path.into(),
            handler,
        }
    }

    /// Why this entry cannot be served, if it cannot.
    pub fn defect(&self) -> Option<&'static str> {
        if self.method.is_none() {
            Some("missing method")
        } else if self.handler.is_none() {
            Some("missing handler")
        } else if !self.path.starts_with('/') {
            Some("path must start with '/'")
        } else {
            path_defect(&self.path)
        }
    }

    /// `"<METHOD> <path>"`, the name used for this route's telemetry.
    pub fn operation_name(&self) -> Option<String> {
        self.method.as_ref().map(|m| format!("{} {}", m, self.path))
    }
}

/// A `{name}` or `{*name}` capture segment.
#[derive(Debug, PartialEq, Eq)]
enum Capture<'a> {
    Param(&'a str),
    CatchAll(&'a str),
}

fn capture(segment: &str) -> Option<Capture<'_>> {
    let inner = segment.strip_prefix('{')?.strip_suffix('}')?;
    match inner.strip_prefix('*') {
        Some(name) => Some(Capture::CatchAll(name)),
        None => Some(Capture::Param(inner)),
    }
}

fn valid_capture_name(name: &str) -> bool {
    !name.is_empty() && name.chars().all(|c| c.is_ascii_alphanumeric() || c == '_')
}

/// Syntax problems the router would refuse at registration.
fn path_defect(path: &str) -> Option<&'static str> {
    let segments: Vec<&str> = path[1..].split('/').collect();
    let mut names = HashSet::new();

    for (i, segment) in segments.iter().enumerate() {
        if segment.starts_with(':') || segment.starts_with('*') {
            return Some("captures must use '{name}', not ':' or '*'");
        }
        if !segment.contains(['{', '}']) {
            continue;
        }
        let name = match capture(segment) {
            Some(Capture::Param(name)) => name,
            Some(Capture::CatchAll(name)) if i + 1 == segments.len() => name,
            Some(Capture::CatchAll(_)) => return Some("catch-all capture must be the last segment"),
            None => return Some("capture must fill a whole segment"),
        };
        if !valid_capture_name(name) {
            return Some("invalid capture name");
        }
        if !names.insert(name) {
            return Some("duplicate capture name");
        }
    }
    None
}

/// Whether two paths put differently named captures at the same position.
fn captures_conflict(a: &str, b: &str) -> bool {
    for (x, y) in a.split('/').zip(b.split('/')) {
        if x == y {
            continue;
        }
        return capture(x).is_some() && capture(y).is_some();
    }
    false
}

/// Ordered collection of route registrations.
#[derive(Debug, Clone, Default)]
pub struct RouteTable {
    entries: Vec<RouteEntry>,
    telemetry: Option<TelemetryClient>,
}

impl RouteTable {
    pub fn new() -> Self {
        Self::default()
    }

    /// A table that instruments each handler as it is registered.
    pub fn with_telemetry(client: TelemetryClient) -> Self {
        Self {
            entries: Vec::new(),
            telemetry: Some(client),
        }
    }

    /// Register a handler.
    pub fn route(mut self, method: Method, path: impl Into<String>, handler: RouteHandler) -> Self {
        let path = path.into();
        let handler = match &self.telemetry {
            Some(client) => client.instrument(format!("{} {}", method, path), handler),
            None => handler,
        };
        self.entries.push(RouteEntry::new(method, path, handler));
        self
    }

    /// Append a raw entry as-is.
    pub fn push(&mut self, entry: RouteEntry) {
        self.entries.push(entry);
    }

    pub fn entries(&self) -> &[RouteEntry] {
        &self.entries
    }

    pub(crate) fn entries_mut(&mut self) -> &mut [RouteEntry] {
        &mut self.entries
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Why each entry cannot be served, in table order.
    ///
    /// Adds table-level conflicts to [`RouteEntry::defect`]: an entry whose
    /// captures clash with an earlier servable path is refused.
    pub fn defects(&self) -> Vec<Option<&'static str>> {
        let mut accepted: Vec<&str> = Vec::new();
        self.entries
            .iter()
            .map(|entry| {
                if let Some(defect) = entry.defect() {
                    return Some(defect);
                }
                if accepted.iter().any(|path| captures_conflict(path, &entry.path)) {
                    return Some("capture conflicts with an earlier route");
                }
                accepted.push(&entry.path);
                None
            })
            .collect()
    }

    /// Compose an axum router from every servable entry.
    pub fn into_router(self) -> Router {
        let mut by_path: BTreeMap<String, MethodRouter> = BTreeMap::new();
        let mut seen: HashSet<(Method, String)> = HashSet::new();
        let defects = self.defects();

        for (entry, defect) in self.entries.into_iter().zip(defects) {
            if let Some(defect) = defect {
                tracing::warn!(path = %entry.path, defect, "Skipping route");
                continue;
            }
            let (Some(method), Some(handler)) = (entry.method, entry.handler) else {
                continue;
            };
            let filter = match MethodFilter::try_from(method.clone()) {
                Ok(filter) => filter,
                Err(_) => {
                    tracing::warn!(path = %entry.path, method = %method, "Skipping route with unsupported method");
                    continue;
                }
            };
            if !seen.insert((method.clone(), entry.path.clone())) {
                tracing::warn!(path = %entry.path, method = %method, "Skipping duplicate route");
                continue;
            }

            let endpoint = move |req: Request<Body>| {
                let handler = handler.clone();
                async move {
                    match handler.call(req).await {
                        Ok(response) => response,
                        Err(e) => e.into_response(),
                    }
                }
            };

            let method_router = by_path.remove(&entry.path).unwrap_or_else(MethodRouter::new);
            by_path.insert(entry.path, method_router.on(filter, endpoint));
        }

        let mut router = Router::new();
        for (path, method_router) in by_path {
            // The router panics on paths it refuses; keep what was built so far.
            let attempt = router.clone();
            match panic::catch_unwind(AssertUnwindSafe(|| attempt.route(&path, method_router))) {
                Ok(extended) => router = extended,
                Err(_) => tracing::warn!(path = %path, "Skipping route refused by the router"),
            }
        }
        router
    }
}
