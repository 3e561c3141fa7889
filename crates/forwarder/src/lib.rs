//! Core domain for the audit log forwarder.
//!
//! This crate contains the envelope and log-entry types, the receiver that
//! turns one pushed CloudEvent into log entries, and the port traits the
//! infrastructure crates implement. Transports and sinks never add domain
//! rules; they only supply the ports.
//!
//! ## Architectural Layer
//!
//! **Business logic + port definitions.** This crate has no I/O dependencies.
//! It defines *what* is needed; the `gcp` and `listener` crates define *how*
//! to supply it.
//!
//! ## Module Layout
//!
//! | Module | Contents |
//! |--------|----------|
//! | [`identifiers`] | Newtype identifiers (`ProjectId`, `LogName`) |
//! | [`types`] | Envelope, summary, audit record, and log entry types |
//! | [`errors`] | Error types and the retry-policy classification |
//! | [`ports`] | `IdentityResolver`, `LogSink`, `LogSinkFactory` |
//! | [`session`] | Startup initialisation of the process-wide logging session |
//! | [`receiver`] | The per-event receive operation |

pub mod errors;
pub mod identifiers;
pub mod ports;
pub mod receiver;
pub mod session;
pub mod types;

#[cfg(any(test, feature = "test-support"))]
pub mod testing;

// Re-export everything at the crate root for ergonomic usage by downstream crates.
pub use errors::{ForwarderError, RetryPolicy, SinkError, StartupError};
pub use identifiers::{LogName, ProjectId};
pub use ports::{IdentityResolver, LogSink, LogSinkFactory};
pub use receiver::{AuditEventReceiver, AUDIT_LOG_EVENT_TYPE};
pub use session::{DiagnosticLog, FixedIdentity, LogSession};
pub use types::{
    AuditLog, AuditLogEntry, AuthenticationInfo, ErrorRecord, EventEnvelope, EventSummary,
    LogEntry, LogEntryOperation, LogPayload, MonitoredResource, RpcStatus, Severity, Timestamp,
};
