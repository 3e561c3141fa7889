//! HTTP server receiving pushed events.
//!
//! ## Response mapping
//!
//! | Outcome | Status |
//! |---------|--------|
//! | processed | `200 OK` |
//! | malformed request | `400 Bad Request` (receiver not invoked) |
//! | failed, retryable | `503 Service Unavailable`, with `Retry-After` when the sink gave a delay |
//! | failed, not retryable | `422 Unprocessable Entity`, or `200 OK` when `ack_non_retryable` is set |
//!
//! Push transports redeliver on non-2xx responses, so `ack_non_retryable`
//! trades the failure signal for an end to redelivery of events that can
//! never succeed. The event has already been logged as an error record
//! either way.

use std::future::Future;
use std::net::SocketAddr;

use axum::body::Bytes;
use axum::extract::{DefaultBodyLimit, State};
use axum::http::{header::RETRY_AFTER, HeaderMap, HeaderValue, StatusCode};
use axum::response::{IntoResponse, Response};
use axum::routing::{get, post};
use axum::Router;
use forwarder::{AuditEventReceiver, ForwarderError, RetryPolicy};
use thiserror::Error;
use tokio::net::TcpListener;
use tower_http::trace::TraceLayer;
use tracing::{info, warn};

use crate::binding;

/// Default request body limit. Audit entries with large request payloads
/// can run to a few hundred kilobytes.
pub const DEFAULT_BODY_LIMIT: usize = 4 * 1024 * 1024;

/// Settings for [`CloudEventListener`].
#[derive(Debug, Clone)]
pub struct ListenerConfig {
    /// Address to bind; port `0` picks an ephemeral port.
    pub addr: SocketAddr,
    /// Path events are posted to. Must start with `/`.
    pub path: String,
    /// Answer `200 OK` for events that failed permanently.
    pub ack_non_retryable: bool,
    /// Maximum accepted request body, in bytes.
    pub body_limit: usize,
}

impl Default for ListenerConfig {
    fn default() -> Self {
        Self {
            addr: SocketAddr::from(([0, 0, 0, 0], 8080)),
            path: "/".to_string(),
            ack_non_retryable: false,
            body_limit: DEFAULT_BODY_LIMIT,
        }
    }
}

/// Failure to start or run the listener.
#[derive(Debug, Error)]
pub enum ListenerError {
    /// The configured event path is not absolute.
    #[error("event path '{0}' must start with '/'")]
    InvalidPath(String),

    /// The address could not be bound.
    #[error("failed to bind {addr}: {source}")]
    Bind {
        /// Address that was requested.
        addr: SocketAddr,
        /// Underlying socket error.
        #[source]
        source: std::io::Error,
    },

    /// The server stopped with an I/O error.
    #[error("event server failed: {0}")]
    Serve(#[source] std::io::Error),
}

#[derive(Clone)]
struct ListenerState {
    receiver: AuditEventReceiver,
    ack_non_retryable: bool,
}

/// Builds the router: `POST <path>` receives events, `GET /healthz` answers `ok`.
pub fn router(receiver: AuditEventReceiver, config: &ListenerConfig) -> Router {
    let state = ListenerState {
        receiver,
        ack_non_retryable: config.ack_non_retryable,
    };
    Router::new()
        .route("/healthz", get(health))
        .route(&config.path, post(receive_event))
        .layer(DefaultBodyLimit::max(config.body_limit))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

async fn health() -> &'static str {
    "ok\n"
}

async fn receive_event(
    State(state): State<ListenerState>,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    let event = match binding::decode_request(&headers, &body)
        .and_then(|event| binding::to_envelope(&event))
    {
        Ok(event) => event,
        Err(e) => {
            warn!(error = %e, "rejecting malformed event");
            return (StatusCode::BAD_REQUEST, e.to_string()).into_response();
        }
    };

    match state.receiver.receive(&event).await {
        Ok(()) => StatusCode::OK.into_response(),
        Err(err) => failure_response(&err, state.ack_non_retryable),
    }
}

fn failure_response(err: &ForwarderError, ack_non_retryable: bool) -> Response {
    match err.retry_policy() {
        RetryPolicy::Retryable { after } => {
            warn!(error = %err, "event failed; requesting redelivery");
            let mut response = (StatusCode::SERVICE_UNAVAILABLE, err.to_string()).into_response();
            if let Some(after) = after {
                response
                    .headers_mut()
                    .insert(RETRY_AFTER, HeaderValue::from(after.as_secs().max(1)));
            }
            response
        }
        RetryPolicy::NonRetryable if ack_non_retryable => {
            warn!(error = %err, "event failed permanently; acknowledging to stop redelivery");
            StatusCode::OK.into_response()
        }
        RetryPolicy::NonRetryable => {
            warn!(error = %err, "event failed permanently");
            (StatusCode::UNPROCESSABLE_ENTITY, err.to_string()).into_response()
        }
    }
}

/// A bound listener, ready to serve.
pub struct CloudEventListener {
    listener: TcpListener,
    local_addr: SocketAddr,
    router: Router,
}

impl CloudEventListener {
    /// Binds the configured address. Port `0` picks an ephemeral port; see
    /// [`CloudEventListener::local_addr`].
    pub async fn bind(
        config: &ListenerConfig,
        receiver: AuditEventReceiver,
    ) -> Result<Self, ListenerError> {
        if !config.path.starts_with('/') {
            return Err(ListenerError::InvalidPath(config.path.clone()));
        }
        let listener = TcpListener::bind(config.addr)
            .await
            .map_err(|source| ListenerError::Bind {
                addr: config.addr,
                source,
            })?;
        let local_addr = listener
            .local_addr()
            .map_err(|source| ListenerError::Bind {
                addr: config.addr,
                source,
            })?;
        Ok(Self {
            listener,
            local_addr,
            router: router(receiver, config),
        })
    }

    /// The address actually bound.
    pub fn local_addr(&self) -> SocketAddr {
        self.local_addr
    }

    /// Serves until `shutdown` completes, then drains in-flight requests.
    pub async fn run<F>(self, shutdown: F) -> Result<(), ListenerError>
    where
        F: Future<Output = ()> + Send + 'static,
    {
        info!(addr = %self.local_addr, "listening for events");
        axum::serve(self.listener, self.router)
            .with_graceful_shutdown(shutdown)
            .await
            .map_err(ListenerError::Serve)
    }
}
