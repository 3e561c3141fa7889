//! Startup initialisation of the process-wide logging session.

use std::sync::Arc;

use async_trait::async_trait;
use tracing::{info, warn};

use crate::{
    IdentityResolver, LogEntry, LogName, LogSink, LogSinkFactory, ProjectId, Severity,
    StartupError,
};

/// The logging session shared by every receive call for the life of the process.
///
/// Built once by [`LogSession::initialize`] before any traffic is accepted and
/// handed to the receiver explicitly. Cloning is cheap.
#[derive(Clone)]
pub struct LogSession {
    project_id: ProjectId,
    log_name: LogName,
    sink: Arc<dyn LogSink>,
}

impl LogSession {
    /// Resolves the project identity and opens a sink bound to it.
    ///
    /// The factory is only consulted once the identity is known.
    ///
    /// # Errors
    ///
    /// Returns the resolver's or the factory's [`StartupError`] unchanged.
    /// Callers treat both as fatal.
    pub async fn initialize(
        resolver: &dyn IdentityResolver,
        factory: &dyn LogSinkFactory,
        log_name: LogName,
    ) -> Result<Self, StartupError> {
        let project_id = resolver.resolve_project_id().await?;
        info!(project_id = %project_id, "resolved project identity");

        let sink = factory.open(&project_id, &log_name).await?;
        info!(project_id = %project_id, log_name = %log_name, "logging session ready");

        Ok(Self {
            project_id,
            log_name,
            sink,
        })
    }

    /// Creates a session from parts that are already known.
    pub fn from_parts(project_id: ProjectId, log_name: LogName, sink: Arc<dyn LogSink>) -> Self {
        Self {
            project_id,
            log_name,
            sink,
        }
    }

    pub fn project_id(&self) -> &ProjectId {
        &self.project_id
    }

    pub fn log_name(&self) -> &LogName {
        &self.log_name
    }

    /// Handle for structured entries.
    pub fn structured(&self) -> Arc<dyn LogSink> {
        Arc::clone(&self.sink)
    }

    /// Handle for plain text diagnostic lines at `INFO`.
    pub fn diagnostics(&self) -> DiagnosticLog {
        DiagnosticLog {
            sink: Arc::clone(&self.sink),
            severity: Severity::Info,
        }
    }
}

impl std::fmt::Debug for LogSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LogSession")
            .field("project_id", &self.project_id)
            .field("log_name", &self.log_name)
            .finish_non_exhaustive()
    }
}

/// Plain text logger writing through the session's sink.
#[derive(Clone)]
pub struct DiagnosticLog {
    sink: Arc<dyn LogSink>,
    severity: Severity,
}

impl DiagnosticLog {
    /// Writes one line. A failed write is reported through `tracing` only.
    pub async fn line(&self, line: impl Into<String>) {
        let line = line.into();
        if let Err(e) = self.sink.write(LogEntry::text(self.severity, line.clone())).await {
            warn!(error = %e, line = %line, "failed to write diagnostic line");
        }
    }
}

/// An [`IdentityResolver`] that always answers with a configured project ID.
#[derive(Debug, Clone)]
pub struct FixedIdentity(ProjectId);

impl FixedIdentity {
    pub fn new(project_id: ProjectId) -> Self {
        Self(project_id)
    }
}

#[async_trait]
impl IdentityResolver for FixedIdentity {
    async fn resolve_project_id(&self) -> Result<ProjectId, StartupError> {
        Ok(self.0.clone())
    }
}
