//! Port traits implemented by the infrastructure crates.
//!
//! The domain needs three capabilities from its environment: learn which
//! project it runs in, open a sink bound to that project, and write entries
//! to the sink. All three are object-safe so the composition root can pick
//! implementations at runtime and tests can substitute fakes.

use std::sync::Arc;

use async_trait::async_trait;

use crate::{LogEntry, LogName, ProjectId, SinkError, StartupError};

/// Resolves the identity of the deployment the process runs in.
///
/// Called once at startup. Implementations must not retry: a failure here
/// means the environment is mis-provisioned.
#[async_trait]
pub trait IdentityResolver: Send + Sync {
    /// Returns the project ID to log under.
    ///
    /// # Errors
    ///
    /// Returns [`StartupError::IdentityResolution`] when the identity source
    /// is unreachable or answers with something unusable.
    async fn resolve_project_id(&self) -> Result<ProjectId, StartupError>;
}

/// Destination for log entries.
///
/// One instance is shared by every concurrent receive call, so `write` must
/// be safe to call from many tasks at once.
#[async_trait]
pub trait LogSink: Send + Sync {
    /// Writes one entry.
    ///
    /// # Errors
    ///
    /// Returns a [`SinkError`] describing why the entry was not accepted; the
    /// error's [`SinkError::retry_policy`] says whether trying again can help.
    async fn write(&self, entry: LogEntry) -> Result<(), SinkError>;
}

/// Opens a [`LogSink`] bound to a project and log name.
#[async_trait]
pub trait LogSinkFactory: Send + Sync {
    /// Constructs the sink.
    ///
    /// # Errors
    ///
    /// Returns [`StartupError::SessionConstruction`] when the sink cannot be
    /// built (no credentials, unreachable endpoint, invalid settings).
    async fn open(
        &self,
        project_id: &ProjectId,
        log_name: &LogName,
    ) -> Result<Arc<dyn LogSink>, StartupError>;
}
