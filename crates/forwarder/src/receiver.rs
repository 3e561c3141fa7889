//! The per-event receive operation.
//!
//! ## Flow
//!
//! 1. Log a summary of the envelope's metadata. Always, before any check, so
//!    every event that reaches the process leaves a trace.
//! 2. Check the declared type against [`AUDIT_LOG_EVENT_TYPE`].
//! 3. Decode the payload as an [`AuditLogEntry`] and log it, or log an error
//!    record and return the error.
//!
//! Receive calls share nothing but the sink, so they run concurrently
//! without coordination.

use std::sync::Arc;

use tracing::{debug, warn};

use crate::{AuditLogEntry, EventEnvelope, EventSummary, ForwarderError, LogEntry, LogSession, LogSink};

/// The only event type the receiver accepts.
pub const AUDIT_LOG_EVENT_TYPE: &str = "google.cloud.audit.log.v1.written";

/// Turns pushed audit log events into log entries.
#[derive(Clone)]
pub struct AuditEventReceiver {
    sink: Arc<dyn LogSink>,
}

impl AuditEventReceiver {
    pub fn new(sink: Arc<dyn LogSink>) -> Self {
        Self { sink }
    }

    /// Creates a receiver writing to the session's structured handle.
    pub fn from_session(session: &LogSession) -> Self {
        Self::new(session.structured())
    }

    /// Processes one event.
    ///
    /// Writes exactly two entries when the sink accepts them: the summary,
    /// then either the decoded audit record or an error record.
    ///
    /// # Errors
    ///
    /// Returns the [`ForwarderError`] that was logged as the error record, or
    /// [`ForwarderError::Sink`] when the decoded record could not be written.
    /// [`ForwarderError::retry_policy`] says whether redelivery can help.
    #[tracing::instrument(
        name = "receive_event",
        skip_all,
        fields(event_id = %event.id, event_type = %event.event_type)
    )]
    pub async fn receive(&self, event: &EventEnvelope) -> Result<(), ForwarderError> {
        let summary = LogEntry::event_summary(EventSummary::from(event));
        if let Err(e) = self.sink.write(summary).await {
            warn!(error = %e, "failed to write event summary");
        }

        let record = match decode_audit_record(event) {
            Ok(record) => record,
            Err(err) => {
                if let Err(e) = self.sink.write(LogEntry::error(&err, &event.id)).await {
                    warn!(error = %e, "failed to write error record");
                }
                return Err(err);
            }
        };

        debug!(
            log_name = record.log_name.as_deref().unwrap_or_default(),
            method = record
                .proto_payload
                .as_ref()
                .and_then(|payload| payload.method_name.as_deref())
                .unwrap_or_default(),
            "forwarding audit record"
        );
        self.sink
            .write(LogEntry::audit_record(record, &event.id))
            .await
            .map_err(|source| ForwarderError::Sink { source })
    }
}

impl std::fmt::Debug for AuditEventReceiver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("AuditEventReceiver").finish_non_exhaustive()
    }
}

/// Checks the event type and decodes the payload as an audit log entry.
///
/// The type check comes first: an event of another type is rejected even if
/// its payload would decode. An event without data decodes to an empty
/// record, whatever its declared content type.
///
/// # Errors
///
/// - [`ForwarderError::UnrecognizedEventType`] when the type does not match
///   exactly.
/// - [`ForwarderError::UnsupportedContentType`] when the payload is declared
///   as something other than JSON.
/// - [`ForwarderError::PayloadDecode`] when the payload is not a JSON object.
pub fn decode_audit_record(event: &EventEnvelope) -> Result<AuditLogEntry, ForwarderError> {
    if event.event_type != AUDIT_LOG_EVENT_TYPE {
        return Err(ForwarderError::UnrecognizedEventType {
            event_type: event.event_type.clone(),
        });
    }

    let data = match event.data.as_deref() {
        None | Some([]) => return Ok(AuditLogEntry::default()),
        Some(data) => data,
    };

    if !event.has_json_data() {
        return Err(ForwarderError::UnsupportedContentType {
            content_type: event.data_content_type.clone().unwrap_or_default(),
        });
    }

    serde_json::from_slice(data).map_err(|source| ForwarderError::PayloadDecode { source })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::testing::{FailingSink, RecordingSink};
    use crate::types::EVENT_ID_LABEL;
    use crate::{LogPayload, Severity};

    const AUDIT_PAYLOAD: &str = r#"{
        "logName": "projects/proj-a/logs/cloudaudit.googleapis.com%2Factivity",
        "insertId": "abc123",
        "severity": "NOTICE",
        "resource": { "type": "cloudsql_database", "labels": { "database_id": "proj-a:db-1" } },
        "timestamp": "2024-05-01T12:00:00Z",
        "protoPayload": {
            "@type": "type.googleapis.com/google.cloud.audit.AuditLog",
            "serviceName": "cloudsql.googleapis.com",
            "methodName": "cloudsql.instances.update",
            "resourceName": "projects/proj-a/instances/db-1"
        }
    }"#;

    fn audit_event(data: &[u8]) -> EventEnvelope {
        EventEnvelope {
            spec_version: "1.0".to_string(),
            event_type: AUDIT_LOG_EVENT_TYPE.to_string(),
            source: "//cloudaudit.googleapis.com/projects/proj-a/logs/activity".to_string(),
            subject: Some("cloudsql.googleapis.com/projects/proj-a/instances/db-1".to_string()),
            id: "proj-a-abc123".to_string(),
            time: None,
            data_schema: None,
            data_content_type: Some("application/json; charset=utf-8".to_string()),
            deprecated_data_content_encoding: None,
            data: Some(data.to_vec()),
        }
    }

    fn receiver() -> (AuditEventReceiver, Arc<RecordingSink>) {
        let sink = Arc::new(RecordingSink::new());
        (AuditEventReceiver::new(sink.clone()), sink)
    }

    fn error_message(entry: &LogEntry) -> &str {
        match &entry.payload {
            LogPayload::Error(record) => &record.message,
            other => panic!("expected error record, got {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_valid_audit_event_logs_summary_then_record() {
        let (receiver, sink) = receiver();
        let event = audit_event(AUDIT_PAYLOAD.as_bytes());

        receiver.receive(&event).await.unwrap();

        let entries = sink.entries();
        assert_eq!(entries.len(), 2);
        assert_eq!(
            entries[0].payload,
            LogPayload::EventSummary(EventSummary::from(&event))
        );
        match &entries[1].payload {
            LogPayload::AuditRecord(record) => {
                assert_eq!(record.insert_id.as_deref(), Some("abc123"));
                assert_eq!(
                    record
                        .proto_payload
                        .as_ref()
                        .and_then(|payload| payload.resource_name.as_deref()),
                    Some("projects/proj-a/instances/db-1")
                );
            }
            other => panic!("expected audit record, got {other:?}"),
        }
        assert_eq!(entries[1].severity, Severity::Notice);
        for entry in &entries {
            assert_eq!(
                entry.labels.get(EVENT_ID_LABEL).map(String::as_str),
                Some("proj-a-abc123")
            );
        }
    }

    #[tokio::test]
    async fn test_malformed_payload_logs_wrapped_error() {
        let (receiver, sink) = receiver();
        let event = audit_event(b"\x00\x01not json");

        let err = receiver.receive(&event).await.unwrap_err();

        assert!(matches!(err, ForwarderError::PayloadDecode { .. }));
        let entries = sink.entries();
        assert_eq!(entries.len(), 2);
        assert!(matches!(entries[0].payload, LogPayload::EventSummary(_)));
        assert_eq!(entries[1].severity, Severity::Error);
        assert!(error_message(&entries[1]).starts_with("failed to render audit data: "));
        match &entries[1].payload {
            LogPayload::Error(record) => assert!(record.cause.is_some()),
            _ => unreachable!(),
        }
    }

    #[tokio::test]
    async fn test_any_json_object_is_forwarded() {
        let (receiver, sink) = receiver();
        let event = audit_event(br#"{"message":"hello"}"#);

        receiver.receive(&event).await.unwrap();

        let entries = sink.entries();
        assert_eq!(entries.len(), 2);
        match &entries[1].payload {
            LogPayload::AuditRecord(record) => {
                assert_eq!(record.log_name, None);
                assert_eq!(record.extra["message"], "hello");
            }
            other => panic!("expected audit record, got {other:?}"),
        }
        assert_eq!(entries[1].severity, Severity::Default);
    }

    #[tokio::test]
    async fn test_json_that_is_not_an_object_fails_to_decode() {
        let (receiver, sink) = receiver();
        let event = audit_event(b"[1, 2, 3]");

        let err = receiver.receive(&event).await.unwrap_err();

        assert!(matches!(err, ForwarderError::PayloadDecode { .. }));
        assert_eq!(sink.entries().len(), 2);
    }

    #[tokio::test]
    async fn test_event_without_data_forwards_empty_record() {
        let (receiver, sink) = receiver();
        let mut event = audit_event(b"");
        event.data = None;
        event.data_content_type = Some("application/protobuf".to_string());

        receiver.receive(&event).await.unwrap();

        let entries = sink.entries();
        assert_eq!(entries.len(), 2);
        assert_eq!(
            entries[1].payload,
            LogPayload::AuditRecord(Box::new(AuditLogEntry::default()))
        );

        event.data = Some(Vec::new());
        assert_eq!(decode_audit_record(&event).unwrap(), AuditLogEntry::default());
    }

    #[tokio::test]
    async fn test_other_event_type_is_rejected_even_with_valid_payload() {
        let (receiver, sink) = receiver();
        let mut event = audit_event(AUDIT_PAYLOAD.as_bytes());
        event.event_type = "com.example.other".to_string();

        let err = receiver.receive(&event).await.unwrap_err();

        assert!(matches!(err, ForwarderError::UnrecognizedEventType { .. }));
        let entries = sink.entries();
        assert_eq!(entries.len(), 2);
        assert!(matches!(entries[0].payload, LogPayload::EventSummary(_)));
        assert_eq!(
            error_message(&entries[1]),
            "invalid event type: com.example.other"
        );
    }

    #[tokio::test]
    async fn test_type_match_is_exact() {
        let mut event = audit_event(AUDIT_PAYLOAD.as_bytes());
        event.event_type = "Google.Cloud.Audit.Log.V1.Written".to_string();
        assert!(matches!(
            decode_audit_record(&event),
            Err(ForwarderError::UnrecognizedEventType { .. })
        ));

        event.event_type = format!("{AUDIT_LOG_EVENT_TYPE} ");
        assert!(decode_audit_record(&event).is_err());
    }

    #[tokio::test]
    async fn test_non_json_content_is_rejected() {
        let mut event = audit_event(AUDIT_PAYLOAD.as_bytes());
        event.data_content_type = Some("application/protobuf".to_string());
        assert!(matches!(
            decode_audit_record(&event),
            Err(ForwarderError::UnsupportedContentType { .. })
        ));
    }

    #[tokio::test]
    async fn test_processing_is_idempotent() {
        let (receiver, sink) = receiver();
        let good = audit_event(AUDIT_PAYLOAD.as_bytes());
        let bad = audit_event(b"garbage");

        assert!(receiver.receive(&good).await.is_ok());
        assert!(receiver.receive(&good).await.is_ok());
        assert!(receiver.receive(&bad).await.is_err());
        assert!(receiver.receive(&bad).await.is_err());

        let entries = sink.entries();
        assert_eq!(entries.len(), 8);
        assert_eq!(entries[0].payload, entries[2].payload);
        assert_eq!(entries[1].payload, entries[3].payload);
        assert_eq!(entries[5].payload, entries[7].payload);
    }

    #[tokio::test]
    async fn test_unwritable_audit_record_is_retryable() {
        let receiver = AuditEventReceiver::new(Arc::new(FailingSink::unreachable()));
        let event = audit_event(AUDIT_PAYLOAD.as_bytes());

        let err = receiver.receive(&event).await.unwrap_err();

        assert!(matches!(err, ForwarderError::Sink { .. }));
        assert!(err.retry_policy().is_retryable());
    }

    #[tokio::test]
    async fn test_failed_error_write_still_returns_event_error() {
        let receiver = AuditEventReceiver::new(Arc::new(FailingSink::rejecting(403)));
        let mut event = audit_event(AUDIT_PAYLOAD.as_bytes());
        event.event_type = "com.example.other".to_string();

        let err = receiver.receive(&event).await.unwrap_err();

        assert!(matches!(err, ForwarderError::UnrecognizedEventType { .. }));
    }
}
