//! Structured stdout sink.
//!
//! Cloud Run, GKE, and Cloud Functions parse single-line JSON written to
//! stdout into log entries. `severity`, `time`, `message`, and
//! `logging.googleapis.com/labels` are lifted into the entry itself; every
//! other field lands in `jsonPayload`.

use std::io::Write;
use std::sync::{Arc, Mutex, PoisonError};

use async_trait::async_trait;
use forwarder::{
    LogEntry, LogName, LogPayload, LogSink, LogSinkFactory, ProjectId, SinkError, StartupError,
};
use serde_json::{json, Map, Value};

const LABELS_KEY: &str = "logging.googleapis.com/labels";

/// [`LogSink`] writing one JSON line per entry.
pub struct ConsoleSink<W> {
    out: Mutex<W>,
    log_name: String,
}

impl ConsoleSink<std::io::Stdout> {
    pub fn stdout(log_name: &LogName) -> Self {
        Self::new(std::io::stdout(), log_name)
    }
}

impl<W: Write> ConsoleSink<W> {
    pub fn new(out: W, log_name: &LogName) -> Self {
        Self {
            out: Mutex::new(out),
            log_name: log_name.to_string(),
        }
    }

    fn render(&self, entry: LogEntry) -> Result<String, SinkError> {
        let mut labels = entry.labels;
        labels.insert("log_name".to_string(), self.log_name.clone());

        let mut line = Map::new();
        line.insert("severity".to_string(), json!(entry.severity));
        line.insert("time".to_string(), json!(entry.timestamp));
        line.insert(LABELS_KEY.to_string(), json!(labels));

        let message = match &entry.payload {
            LogPayload::Text(text) => text.clone(),
            LogPayload::EventSummary(summary) => format!("received event {}", summary.id),
            LogPayload::AuditRecord(record) => match &record.log_name {
                Some(log_name) => format!("audit record {log_name}"),
                None => "audit record".to_string(),
            },
            LogPayload::Error(record) => record.message.clone(),
        };
        line.insert("message".to_string(), Value::String(message));

        if entry.payload.as_text().is_none() {
            let payload = serde_json::to_value(&entry.payload)
                .map_err(|e| SinkError::Encode(e.to_string()))?;
            line.insert("payload".to_string(), payload);
        }

        serde_json::to_string(&line).map_err(|e| SinkError::Encode(e.to_string()))
    }
}

#[async_trait]
impl<W: Write + Send + 'static> LogSink for ConsoleSink<W> {
    async fn write(&self, entry: LogEntry) -> Result<(), SinkError> {
        let line = self.render(entry)?;
        let mut out = self.out.lock().unwrap_or_else(PoisonError::into_inner);
        writeln!(out, "{line}")
            .and_then(|()| out.flush())
            .map_err(|e| SinkError::Transport(e.to_string()))
    }
}

/// [`LogSinkFactory`] producing a [`ConsoleSink`] on stdout.
#[derive(Debug, Clone, Default)]
pub struct ConsoleSinkFactory;

#[async_trait]
impl LogSinkFactory for ConsoleSinkFactory {
    async fn open(
        &self,
        _project_id: &ProjectId,
        log_name: &LogName,
    ) -> Result<Arc<dyn LogSink>, StartupError> {
        Ok(Arc::new(ConsoleSink::stdout(log_name)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use forwarder::{ForwarderError, Severity};

    #[derive(Clone, Default)]
    struct SharedBuffer(Arc<Mutex<Vec<u8>>>);

    impl Write for SharedBuffer {
        fn write(&mut self, buf: &[u8]) -> std::io::Result<usize> {
            self.0.lock().unwrap().write(buf)
        }

        fn flush(&mut self) -> std::io::Result<()> {
            Ok(())
        }
    }

    impl SharedBuffer {
        fn lines(&self) -> Vec<Value> {
            let bytes = self.0.lock().unwrap().clone();
            String::from_utf8(bytes)
                .unwrap()
                .lines()
                .map(|l| serde_json::from_str(l).unwrap())
                .collect()
        }
    }

    fn sink(buffer: &SharedBuffer) -> ConsoleSink<SharedBuffer> {
        ConsoleSink::new(buffer.clone(), &LogName::new("audit-log-forwarder").unwrap())
    }

    #[tokio::test]
    async fn test_text_line_uses_message_field() {
        let buffer = SharedBuffer::default();

        sink(&buffer)
            .write(LogEntry::text(Severity::Info, "Starting Server"))
            .await
            .unwrap();

        let lines = buffer.lines();
        assert_eq!(lines.len(), 1);
        assert_eq!(lines[0]["severity"], "INFO");
        assert_eq!(lines[0]["message"], "Starting Server");
        assert_eq!(lines[0][LABELS_KEY]["log_name"], "audit-log-forwarder");
        assert!(lines[0].get("payload").is_none());
    }

    #[tokio::test]
    async fn test_error_line_carries_record() {
        let buffer = SharedBuffer::default();
        let err = ForwarderError::UnrecognizedEventType {
            event_type: "com.example.other".to_string(),
        };

        sink(&buffer)
            .write(LogEntry::error(&err, "evt-9"))
            .await
            .unwrap();

        let line = &buffer.lines()[0];
        assert_eq!(line["severity"], "ERROR");
        assert_eq!(line["message"], "invalid event type: com.example.other");
        assert_eq!(line["payload"]["retryable"], false);
        assert_eq!(line[LABELS_KEY]["event_id"], "evt-9");
    }
}
