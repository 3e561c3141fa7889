//! In-memory fakes for the port traits.
//!
//! Compiled for this crate's own tests and, through the `test-support`
//! feature, for the tests of the adapter crates.

use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use async_trait::async_trait;

use crate::{
    IdentityResolver, LogEntry, LogName, LogSink, LogSinkFactory, ProjectId, SinkError,
    StartupError,
};

/// Sink that keeps every entry it is given, in order.
#[derive(Debug, Default)]
pub struct RecordingSink {
    entries: Mutex<Vec<LogEntry>>,
}

impl RecordingSink {
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a copy of the entries written so far.
    pub fn entries(&self) -> Vec<LogEntry> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl LogSink for RecordingSink {
    async fn write(&self, entry: LogEntry) -> Result<(), SinkError> {
        self.entries
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(entry);
        Ok(())
    }
}

/// Sink that rejects every write with a copy of the configured error.
#[derive(Debug)]
pub struct FailingSink {
    status: Option<u16>,
    retry_after: Option<Duration>,
}

impl FailingSink {
    /// Fails as if the sink were unreachable (retryable).
    pub fn unreachable() -> Self {
        Self {
            status: None,
            retry_after: None,
        }
    }

    /// Fails as if the sink answered with `status`.
    pub fn rejecting(status: u16) -> Self {
        Self {
            status: Some(status),
            retry_after: None,
        }
    }

    /// Fails as if the sink answered `429` with a `Retry-After` of `after`.
    pub fn throttled(after: Duration) -> Self {
        Self {
            status: Some(429),
            retry_after: Some(after),
        }
    }
}

#[async_trait]
impl LogSink for FailingSink {
    async fn write(&self, _entry: LogEntry) -> Result<(), SinkError> {
        Err(match self.status {
            None => SinkError::Transport("connection refused".to_string()),
            Some(status) => SinkError::Rejected {
                status,
                message: "rejected by test sink".to_string(),
                retry_after: self.retry_after,
            },
        })
    }
}

/// Resolver whose identity source is unreachable.
#[derive(Debug, Default)]
pub struct FailingResolver;

#[async_trait]
impl IdentityResolver for FailingResolver {
    async fn resolve_project_id(&self) -> Result<ProjectId, StartupError> {
        Err(StartupError::IdentityResolution {
            message: "metadata server unreachable".to_string(),
        })
    }
}

/// Factory that records each `open` call and hands out one shared
/// [`RecordingSink`], or fails every call.
#[derive(Debug, Default)]
pub struct RecordingFactory {
    sink: Arc<RecordingSink>,
    opened: Mutex<Vec<(String, String)>>,
    fail: bool,
}

impl RecordingFactory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    /// The sink handed out by successful `open` calls.
    pub fn sink(&self) -> Arc<RecordingSink> {
        Arc::clone(&self.sink)
    }

    /// `(project_id, log_name)` pairs passed to `open`, in call order.
    pub fn opened(&self) -> Vec<(String, String)> {
        self.opened
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

#[async_trait]
impl LogSinkFactory for RecordingFactory {
    async fn open(
        &self,
        project_id: &ProjectId,
        log_name: &LogName,
    ) -> Result<Arc<dyn LogSink>, StartupError> {
        if self.fail {
            return Err(StartupError::SessionConstruction {
                message: "no credentials".to_string(),
            });
        }
        self.opened
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push((project_id.to_string(), log_name.to_string()));
        Ok(self.sink())
    }
}
