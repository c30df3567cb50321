//! Telemetry event records.
//!
//! Every record is immutable once built and handed to the sink wrapped in an
//! [`Envelope`].

use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Serialize, Serializer};

use crate::telemetry::context::OperationId;

/// Dependency type for inbound requests measured by the request layer.
pub const TYPE_HTTP_MANUAL: &str = "HTTP (Manual)";
/// Dependency type for outbound HTTP calls.
pub const TYPE_HTTP: &str = "HTTP";
/// Dependency type for in-process async work.
pub const TYPE_IN_PROC: &str = "InProc";

pub type Properties = BTreeMap<String, String>;

fn as_millis<S: Serializer>(duration: &Duration, serializer: S) -> Result<S::Ok, S::Error> {
    serializer.serialize_f64(duration.as_secs_f64() * 1000.0)
}

/// A timed call (inbound or outbound) with its outcome.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct DependencyEvent {
    pub id: OperationId,
    /// Destination host or logical subsystem.
    pub target: String,
    pub name: String,
    /// Free-form detail, usually the URL.
    pub data: String,
    #[serde(rename = "durationMs", serialize_with = "as_millis")]
    pub duration: Duration,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result_code: Option<u16>,
    pub type_name: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<OperationId>,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub properties: Properties,
}

impl DependencyEvent {
    pub fn duration_ms(&self) -> f64 {
        self.duration.as_secs_f64() * 1000.0
    }
}

/// A failure captured from a tracked operation.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CapturedError {
    pub type_name: String,
    pub message: String,
}

impl CapturedError {
    /// Capture an error's type and rendered message.
    pub fn capture<E: fmt::Display + ?Sized>(error: &E) -> Self {
        Self {
            type_name: std::any::type_name::<E>().to_string(),
            message: error.to_string(),
        }
    }

    /// Build from a bare message, for failures with no error value (panics, aborts).
    pub fn message(type_name: &str, message: impl Into<String>) -> Self {
        Self {
            type_name: type_name.to_string(),
            message: message.into(),
        }
    }
}

impl fmt::Display for CapturedError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}: {}", self.type_name, self.message)
    }
}

/// A failure paired with the failed dependency that produced it.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ExceptionEvent {
    pub error: CapturedError,
    pub properties: Properties,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<OperationId>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub dependency_id: Option<OperationId>,
}

/// Trace severity, in increasing order.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
pub enum SeverityLevel {
    Verbose,
    Information,
    Warning,
    Error,
    Critical,
}

/// A free-form diagnostic message.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct TraceEvent {
    pub message: String,
    pub severity: SeverityLevel,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub properties: Properties,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<OperationId>,
}

/// A named business event.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct CustomEvent {
    pub name: String,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    pub properties: Properties,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub parent_id: Option<OperationId>,
}

/// Any record the sink accepts.
#[derive(Debug, Clone, Serialize)]
#[serde(tag = "kind", content = "data", rename_all = "camelCase")]
pub enum TelemetryItem {
    Dependency(DependencyEvent),
    Exception(ExceptionEvent),
    Trace(TraceEvent),
    Event(CustomEvent),
}

impl TelemetryItem {
    /// Short label used for metrics and logs.
    pub fn kind(&self) -> &'static str {
        match self {
            TelemetryItem::Dependency(_) => "dependency",
            TelemetryItem::Exception(_) => "exception",
            TelemetryItem::Trace(_) => "trace",
            TelemetryItem::Event(_) => "event",
        }
    }
}

/// A record stamped with emission time and the emitting service's role.
#[derive(Debug, Clone, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct Envelope {
    pub time: DateTime<Utc>,
    pub role: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub instrumentation_key: Option<String>,
    pub item: TelemetryItem,
}

impl Envelope {
    pub fn new(role: impl Into<String>, item: TelemetryItem) -> Self {
        Self {
            time: Utc::now(),
            role: role.into(),
            instrumentation_key: None,
            item,
        }
    }

    pub fn as_dependency(&self) -> Option<&DependencyEvent> {
        match &self.item {
            TelemetryItem::Dependency(dep) => Some(dep),
            _ => None,
        }
    }

    pub fn as_exception(&self) -> Option<&ExceptionEvent> {
        match &self.item {
            TelemetryItem::Exception(exc) => Some(exc),
            _ => None,
        }
    }
}
