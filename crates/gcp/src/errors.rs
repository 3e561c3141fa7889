use forwarder::SinkError;
use thiserror::Error;

/// Failure talking to a Google Cloud endpoint.
#[derive(Debug, Error)]
pub enum GcpError {
    /// The request could not be built or sent, or timed out.
    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    /// The endpoint answered with a non-success status.
    #[error("{endpoint} answered with status {status}: {body}")]
    Status {
        /// Path or URL that was requested.
        endpoint: String,
        /// HTTP status code.
        status: u16,
        /// Response body, possibly empty.
        body: String,
    },

    /// A response to a metadata request did not carry `Metadata-Flavor: Google`,
    /// so whatever answered is not a metadata server.
    #[error("not running on Google Cloud: {0}")]
    NotOnGcp(String),

    /// The response arrived but its content is unusable.
    #[error("invalid response from {endpoint}: {reason}")]
    InvalidResponse {
        /// Path or URL that was requested.
        endpoint: String,
        /// What was wrong with the response.
        reason: String,
    },
}

impl GcpError {
    /// Maps a failed write onto the domain's [`SinkError`].
    ///
    /// Token failures surface as [`SinkError::Auth`] so they stay retryable.
    pub(crate) fn into_sink_error(self, during_auth: bool) -> SinkError {
        match self {
            _ if during_auth => SinkError::Auth(self.to_string()),
            Self::Http(e) if e.is_builder() => SinkError::Encode(e.to_string()),
            Self::Http(e) => SinkError::Transport(e.to_string()),
            Self::Status { status, body, .. } => SinkError::Rejected {
                status,
                message: body,
                retry_after: None,
            },
            Self::NotOnGcp(reason) => SinkError::Auth(reason),
            Self::InvalidResponse { .. } => SinkError::Transport(self.to_string()),
        }
    }
}
