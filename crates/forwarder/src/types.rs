//! Value types for the forwarder domain.
//!
//! Three families live here:
//!
//! - the inbound [`EventEnvelope`], a transport-neutral copy of a CloudEvent;
//! - the records derived from it ([`EventSummary`], [`AuditLogEntry`],
//!   [`ErrorRecord`]);
//! - the outbound [`LogEntry`] every sink accepts.

use std::collections::BTreeMap;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

use crate::ForwarderError;

// ---------------------------------------------------------------------------
// Time
// ---------------------------------------------------------------------------

/// A UTC wall-clock timestamp.
///
/// Wraps [`chrono::DateTime<Utc>`] so callers never depend on `chrono` types
/// directly. Serialises as RFC 3339.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct Timestamp(DateTime<Utc>);

impl Timestamp {
    /// Returns the current UTC time as a [`Timestamp`].
    pub fn now() -> Self {
        Self(Utc::now())
    }

    /// Creates a [`Timestamp`] from a [`DateTime<Utc>`].
    pub fn from_utc(dt: DateTime<Utc>) -> Self {
        Self(dt)
    }

    /// Returns the underlying [`DateTime<Utc>`].
    pub fn as_datetime(self) -> DateTime<Utc> {
        self.0
    }
}

impl std::fmt::Display for Timestamp {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0.to_rfc3339())
    }
}

// ---------------------------------------------------------------------------
// Severity
// ---------------------------------------------------------------------------

/// Severity of a log entry, using the logging API's level names.
///
/// Unknown names decode as [`Severity::Default`] so an audit record with an
/// unexpected level still forwards.
#[derive(
    Debug, Clone, Copy, Default, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize,
)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE", from = "String")]
pub enum Severity {
    /// No assigned severity.
    #[default]
    Default,
    /// Debug or trace information.
    Debug,
    /// Routine information.
    Info,
    /// Normal but significant events, such as configuration changes.
    Notice,
    /// Events that might cause problems.
    Warning,
    /// Events likely to cause problems.
    Error,
    /// Events that cause more severe problems or outages.
    Critical,
    /// A person must take action immediately.
    Alert,
    /// One or more systems are unusable.
    Emergency,
}

impl From<String> for Severity {
    fn from(value: String) -> Self {
        match value.to_ascii_uppercase().as_str() {
            "DEBUG" => Self::Debug,
            "INFO" => Self::Info,
            "NOTICE" => Self::Notice,
            "WARNING" => Self::Warning,
            "ERROR" => Self::Error,
            "CRITICAL" => Self::Critical,
            "ALERT" => Self::Alert,
            "EMERGENCY" => Self::Emergency,
            _ => Self::Default,
        }
    }
}

impl std::fmt::Display for Severity {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            Self::Default => "DEFAULT",
            Self::Debug => "DEBUG",
            Self::Info => "INFO",
            Self::Notice => "NOTICE",
            Self::Warning => "WARNING",
            Self::Error => "ERROR",
            Self::Critical => "CRITICAL",
            Self::Alert => "ALERT",
            Self::Emergency => "EMERGENCY",
        };
        f.write_str(name)
    }
}

// ---------------------------------------------------------------------------
// Inbound envelope
// ---------------------------------------------------------------------------

/// A pushed event: protocol metadata plus an opaque payload.
///
/// Built by the listener from a CloudEvent that has already passed binding
/// validation. The receiver only reads it.
#[derive(Debug, Clone, PartialEq)]
pub struct EventEnvelope {
    /// CloudEvents spec version, e.g. `"1.0"`.
    pub spec_version: String,
    /// Declared event type.
    pub event_type: String,
    /// Event source URI reference.
    pub source: String,
    /// Subject of the event within the source, e.g. a resource path.
    pub subject: Option<String>,
    /// Event ID, unique per source.
    pub id: String,
    /// When the occurrence happened, as stated by the producer.
    pub time: Option<Timestamp>,
    /// Schema the data adheres to.
    pub data_schema: Option<String>,
    /// Content type of the data, parameters included.
    pub data_content_type: Option<String>,
    /// Pre-1.0 `datacontentencoding` attribute, when the sender set it.
    pub deprecated_data_content_encoding: Option<String>,
    /// Payload bytes, `None` when the event carried no data.
    pub data: Option<Vec<u8>>,
}

impl EventEnvelope {
    /// Returns the MIME media type of the data: the content type lower-cased
    /// with any parameters removed.
    ///
    /// `None` when no content type is set or the type part is blank.
    pub fn data_media_type(&self) -> Option<String> {
        let content_type = self.data_content_type.as_deref()?;
        let media_type = content_type
            .split(';')
            .next()
            .unwrap_or_default()
            .trim()
            .to_ascii_lowercase();
        if media_type.is_empty() {
            None
        } else {
            Some(media_type)
        }
    }

    /// Returns `true` when the data is declared as JSON or declares nothing.
    ///
    /// JSON is `application/json`, `text/json`, or any `+json` structured
    /// syntax suffix.
    pub fn has_json_data(&self) -> bool {
        match self.data_media_type() {
            None => true,
            Some(media_type) => {
                media_type == "application/json"
                    || media_type == "text/json"
                    || media_type.ends_with("+json")
            }
        }
    }
}

// ---------------------------------------------------------------------------
// Derived records
// ---------------------------------------------------------------------------

/// Metadata-only snapshot of an [`EventEnvelope`], logged for every event.
///
/// All fields are copied verbatim; only `data_media_type` is derived.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct EventSummary {
    /// CloudEvents spec version.
    pub spec_version: String,
    /// Declared event type, serialised as `type`.
    #[serde(rename = "type")]
    pub event_type: String,
    /// Event source URI reference.
    pub source: String,
    /// Subject within the source; `null` when unset.
    pub subject: Option<String>,
    /// Event ID.
    pub id: String,
    /// Producer-stated occurrence time; `null` when unset.
    pub time: Option<Timestamp>,
    /// Data schema; `null` when unset.
    pub data_schema: Option<String>,
    /// Declared content type, parameters included; `null` when unset.
    pub data_content_type: Option<String>,
    /// Pre-1.0 content encoding; `null` when unset.
    pub deprecated_data_content_encoding: Option<String>,
    /// Content type without parameters, lower-cased; `null` when unset.
    pub data_media_type: Option<String>,
}

impl From<&EventEnvelope> for EventSummary {
    fn from(event: &EventEnvelope) -> Self {
        Self {
            spec_version: event.spec_version.clone(),
            event_type: event.event_type.clone(),
            source: event.source.clone(),
            subject: event.subject.clone(),
            id: event.id.clone(),
            time: event.time,
            data_schema: event.data_schema.clone(),
            data_content_type: event.data_content_type.clone(),
            deprecated_data_content_encoding: event.deprecated_data_content_encoding.clone(),
            data_media_type: event.data_media_type(),
        }
    }
}

/// A monitored resource: the thing a log entry is about.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct MonitoredResource {
    /// Resource type, e.g. `"cloud_run_revision"` or `"global"`.
    #[serde(rename = "type")]
    pub resource_type: String,
    /// Labels identifying the resource instance.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
}

impl MonitoredResource {
    /// Creates a resource with no labels.
    pub fn new(resource_type: impl Into<String>) -> Self {
        Self {
            resource_type: resource_type.into(),
            labels: BTreeMap::new(),
        }
    }

    /// Adds a label, replacing any existing value.
    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }
}

/// Identity of the principal that made an audited call.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuthenticationInfo {
    /// Email of the authenticated caller.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub principal_email: Option<String>,
    /// Remaining fields, as sent.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Outcome of an audited call, in `google.rpc.Status` shape.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RpcStatus {
    /// `google.rpc.Code` value; `0` is OK.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub code: Option<i32>,
    /// Developer-facing error message.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Remaining fields (`details`, ...), as sent.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// The `protoPayload` of an audit log entry.
///
/// The commonly queried fields are typed; everything else the producer sent
/// is kept in `extra` and re-emitted unchanged.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AuditLog {
    /// Payload type URL, normally `type.googleapis.com/google.cloud.audit.AuditLog`.
    #[serde(rename = "@type", skip_serializing_if = "Option::is_none")]
    pub type_url: Option<String>,
    /// API service that performed the operation, e.g. `cloudsql.googleapis.com`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub service_name: Option<String>,
    /// Name of the audited method, e.g. `cloudsql.instances.update`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub method_name: Option<String>,
    /// Resource the operation acted on.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resource_name: Option<String>,
    /// Who made the call.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub authentication_info: Option<AuthenticationInfo>,
    /// Outcome of the call.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub status: Option<RpcStatus>,
    /// Every other payload field, as sent.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// Operation an entry belongs to, for long-running audited calls.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LogEntryOperation {
    /// Operation identifier, shared by all its entries.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub id: Option<String>,
    /// Service that produced the operation.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub producer: Option<String>,
    /// Set on the operation's first entry.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub first: Option<bool>,
    /// Set on the operation's last entry.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub last: Option<bool>,
}

/// The log entry carried as the data of an audit log event.
///
/// Every field is optional, so any JSON object decodes. Fields without a
/// typed slot (`httpRequest`, `spanId`, `sourceLocation`, ...) are kept in
/// `extra` and re-emitted unchanged.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default)]
pub struct AuditLogEntry {
    /// Full resource name of the log the entry was written to.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub log_name: Option<String>,
    /// The audit payload itself.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub proto_payload: Option<AuditLog>,
    /// Unique entry identifier within the log.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub insert_id: Option<String>,
    /// Resource the entry was written against.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub resource: Option<MonitoredResource>,
    /// When the audited event occurred.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub timestamp: Option<Timestamp>,
    /// When the logging backend received the entry.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub receive_timestamp: Option<Timestamp>,
    /// Level of the entry; the forwarded entry uses it, or `DEFAULT`.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub severity: Option<Severity>,
    /// User-defined labels.
    #[serde(default, skip_serializing_if = "BTreeMap::is_empty")]
    pub labels: BTreeMap<String, String>,
    /// Long-running operation the entry belongs to.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub operation: Option<LogEntryOperation>,
    /// Trace resource name associated with the entry.
    #[serde(skip_serializing_if = "Option::is_none")]
    pub trace: Option<String>,
    /// Every other field of the entry, as sent.
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

/// An error logged in place of an audit record.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ErrorRecord {
    /// Full error message, including any wrapped cause.
    pub message: String,
    /// The wrapped cause on its own, when there is one.
    pub cause: Option<String>,
    /// Whether redelivering the event could succeed.
    pub retryable: bool,
}

impl From<&ForwarderError> for ErrorRecord {
    fn from(err: &ForwarderError) -> Self {
        Self {
            message: err.to_string(),
            cause: std::error::Error::source(err).map(|source| source.to_string()),
            retryable: err.retry_policy().is_retryable(),
        }
    }
}

// ---------------------------------------------------------------------------
// Outbound log entry
// ---------------------------------------------------------------------------

/// Label carried by every entry written for an event, holding the event ID.
pub const EVENT_ID_LABEL: &str = "event_id";

/// Payload of a [`LogEntry`].
///
/// Structured variants serialise as their inner record; sinks send
/// [`LogPayload::Text`] as a plain text line.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum LogPayload {
    /// The metadata summary written first for every event.
    EventSummary(EventSummary),
    /// The decoded audit record.
    AuditRecord(Box<AuditLogEntry>),
    /// Why an event failed.
    Error(ErrorRecord),
    /// A plain diagnostic line.
    Text(String),
}

impl LogPayload {
    /// Returns the text line for [`LogPayload::Text`], `None` otherwise.
    pub fn as_text(&self) -> Option<&str> {
        match self {
            Self::Text(line) => Some(line),
            _ => None,
        }
    }
}

/// One entry written to a [`crate::LogSink`].
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct LogEntry {
    /// Level the entry is written at.
    pub severity: Severity,
    /// Time the entry was created in this process.
    pub timestamp: Timestamp,
    /// Entry labels; event entries carry [`EVENT_ID_LABEL`].
    pub labels: BTreeMap<String, String>,
    /// What the entry says.
    pub payload: LogPayload,
}

impl LogEntry {
    /// Creates an entry stamped with the current time and no labels.
    pub fn new(severity: Severity, payload: LogPayload) -> Self {
        Self {
            severity,
            timestamp: Timestamp::now(),
            labels: BTreeMap::new(),
            payload,
        }
    }

    /// Adds a label, replacing any existing value.
    pub fn with_label(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.labels.insert(key.into(), value.into());
        self
    }

    /// The summary entry for an event, at `INFO`.
    pub fn event_summary(summary: EventSummary) -> Self {
        let id = summary.id.clone();
        Self::new(Severity::Info, LogPayload::EventSummary(summary)).with_label(EVENT_ID_LABEL, id)
    }

    /// The decoded audit record for an event, at the record's own severity.
    pub fn audit_record(record: AuditLogEntry, event_id: &str) -> Self {
        let severity = record.severity.unwrap_or_default();
        Self::new(severity, LogPayload::AuditRecord(Box::new(record)))
            .with_label(EVENT_ID_LABEL, event_id)
    }

    /// The error entry for an event that failed, at `ERROR`.
    pub fn error(err: &ForwarderError, event_id: &str) -> Self {
        Self::new(Severity::Error, LogPayload::Error(ErrorRecord::from(err)))
            .with_label(EVENT_ID_LABEL, event_id)
    }

    /// A plain text diagnostic line.
    pub fn text(severity: Severity, line: impl Into<String>) -> Self {
        Self::new(severity, LogPayload::Text(line.into()))
    }
}
