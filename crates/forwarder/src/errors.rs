//! Error and retry-policy types for the forwarder domain.
//!
//! [`StartupError`] covers conditions that stop the process before it accepts
//! any traffic. [`ForwarderError`] covers the failure of a single event; the
//! process keeps serving. [`SinkError`] is what a [`crate::LogSink`] reports
//! when an entry could not be written.
//!
//! [`RetryPolicy`] is a cross-cutting concern: every per-event error type can
//! produce one, and the listener turns it into the response status that tells
//! the push transport whether redelivery is worthwhile.

use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;

// ---------------------------------------------------------------------------
// Retry semantics
// ---------------------------------------------------------------------------

/// Whether a failed event is worth redelivering and, if so, after what delay.
///
/// ## Rules
///
/// - `Retryable`: the sink could not be reached, authentication failed
///   transiently, or the sink answered with a rate-limit or server error.
/// - `NonRetryable`: the event itself is unusable (unrecognised type or
///   malformed payload). Redelivering the same bytes cannot succeed.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub enum RetryPolicy {
    /// The event may be redelivered.
    Retryable {
        /// Minimum back-off before the next attempt. `None` leaves the delay to
        /// the transport's own schedule.
        after: Option<Duration>,
    },
    /// Redelivery cannot help.
    NonRetryable,
}

impl RetryPolicy {
    /// Returns `true` for [`RetryPolicy::Retryable`].
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::Retryable { .. })
    }
}

// ---------------------------------------------------------------------------
// Startup errors
// ---------------------------------------------------------------------------

/// Errors that prevent the logging session from being constructed.
///
/// Both variants are fatal: nothing downstream can work without an identity
/// to log under, and the environment will not fix itself within the process.
#[derive(Debug, Error)]
pub enum StartupError {
    /// The project identifier could not be obtained from the environment.
    #[error("failed to obtain project ID: {message}")]
    IdentityResolution {
        /// Description of the underlying failure.
        message: String,
    },

    /// The logging sink could not be constructed for the resolved project.
    #[error("failed to obtain logging client: {message}")]
    SessionConstruction {
        /// Description of the underlying failure.
        message: String,
    },
}

// ---------------------------------------------------------------------------
// Sink errors
// ---------------------------------------------------------------------------

/// Failure to write one [`crate::LogEntry`] to a sink.
#[derive(Debug, Error)]
pub enum SinkError {
    /// The sink could not be reached (connection refused, timeout, I/O error).
    #[error("log sink unreachable: {0}")]
    Transport(String),

    /// Credentials for the sink could not be obtained.
    #[error("log sink authentication failed: {0}")]
    Auth(String),

    /// The sink answered with a non-success status.
    #[error("log sink rejected entry with status {status}: {message}")]
    Rejected {
        /// HTTP status code returned by the sink.
        status: u16,
        /// Response body or reason phrase.
        message: String,
        /// Delay the sink asked for before trying again (`Retry-After`).
        retry_after: Option<Duration>,
    },

    /// The entry could not be encoded for the sink.
    #[error("failed to encode log entry: {0}")]
    Encode(String),
}

impl SinkError {
    /// Classifies this failure for redelivery purposes.
    pub fn retry_policy(&self) -> RetryPolicy {
        match self {
            Self::Transport(_) | Self::Auth(_) => RetryPolicy::Retryable { after: None },
            Self::Rejected {
                status,
                retry_after,
                ..
            } if *status == 429 || *status >= 500 => RetryPolicy::Retryable {
                after: *retry_after,
            },
            Self::Rejected { .. } | Self::Encode(_) => RetryPolicy::NonRetryable,
        }
    }
}

// ---------------------------------------------------------------------------
// Per-event errors
// ---------------------------------------------------------------------------

/// Failure to process one pushed event.
///
/// Every variant is logged as an error record before it is returned; see
/// [`crate::AuditEventReceiver::receive`].
#[derive(Debug, Error)]
pub enum ForwarderError {
    /// The event's declared type is not the audit log type.
    #[error("invalid event type: {event_type}")]
    UnrecognizedEventType {
        /// The type the event declared.
        event_type: String,
    },

    /// The event's data is not JSON-encoded.
    #[error("failed to render audit data: unsupported content type '{content_type}'")]
    UnsupportedContentType {
        /// The declared data content type.
        content_type: String,
    },

    /// The event's data could not be decoded as a log entry.
    #[error("failed to render audit data: {source}")]
    PayloadDecode {
        /// Underlying JSON error.
        #[source]
        source: serde_json::Error,
    },

    /// The decoded audit record could not be written to the sink.
    #[error("failed to write audit record: {source}")]
    Sink {
        /// Underlying sink failure.
        #[source]
        source: SinkError,
    },
}

impl ForwarderError {
    /// Classifies this failure for redelivery purposes.
    ///
    /// Only sink failures can be fixed by redelivering the same event.
    pub fn retry_policy(&self) -> RetryPolicy {
        match self {
            Self::UnrecognizedEventType { .. }
            | Self::UnsupportedContentType { .. }
            | Self::PayloadDecode { .. } => RetryPolicy::NonRetryable,
            Self::Sink { source } => source.retry_policy(),
        }
    }
}
