//! In-process stand-in for the metadata server and the Cloud Logging API.

use std::sync::atomic::{AtomicU16, AtomicU64, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use axum::body::Bytes;
use axum::extract::State;
use axum::http::{header::AUTHORIZATION, header::RETRY_AFTER, HeaderMap, StatusCode, Uri};
use axum::response::{IntoResponse, Response};
use axum::routing::get;
use axum::{Json, Router};
use serde_json::{json, Value};

/// One request received on `entries:write`.
#[derive(Debug, Clone)]
pub(crate) struct CapturedWrite {
    pub authorization: Option<String>,
    pub body: Value,
}

#[derive(Debug, Default)]
pub(crate) struct FakeGcp {
    pub token_requests: AtomicUsize,
    pub writes: Mutex<Vec<CapturedWrite>>,
    /// Status returned by `entries:write`; `0` means success.
    pub write_status: AtomicU16,
    /// Lifetime of issued tokens in seconds; `0` means 3599.
    pub token_expires_in: AtomicU64,
    /// `Retry-After` seconds sent with a failing write; `0` sends none.
    pub write_retry_after: AtomicU64,
}

impl FakeGcp {
    pub fn writes(&self) -> Vec<CapturedWrite> {
        self.writes.lock().unwrap().clone()
    }
}

/// Binds `router` to an ephemeral local port and returns its base URL.
pub(crate) async fn spawn(router: Router) -> String {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    tokio::spawn(async move {
        axum::serve(listener, router).await.unwrap();
    });
    format!("http://{addr}")
}

pub(crate) fn fake_metadata_router() -> (Router, Arc<FakeGcp>) {
    let state = Arc::new(FakeGcp::default());
    let router = Router::new()
        .route(
            "/computeMetadata/v1/project/project-id",
            get(|headers: HeaderMap| async move { metadata_reply(&headers, "proj-a".to_string()) }),
        )
        .route(
            "/computeMetadata/v1/instance/region",
            get(|headers: HeaderMap| async move {
                metadata_reply(&headers, "projects/123456/regions/us-central1".to_string())
            }),
        )
        .route(
            "/computeMetadata/v1/instance/service-accounts/default/token",
            get(token),
        )
        .fallback(entries_write)
        .with_state(Arc::clone(&state));
    (router, state)
}

fn metadata_reply(headers: &HeaderMap, body: String) -> Response {
    let flavored = headers
        .get("metadata-flavor")
        .is_some_and(|v| v.as_bytes() == b"Google");
    if !flavored {
        return StatusCode::FORBIDDEN.into_response();
    }
    ([("metadata-flavor", "Google")], body).into_response()
}

async fn token(State(state): State<Arc<FakeGcp>>, headers: HeaderMap) -> Response {
    let n = state.token_requests.fetch_add(1, Ordering::SeqCst) + 1;
    let expires_in = match state.token_expires_in.load(Ordering::SeqCst) {
        0 => 3599,
        secs => secs,
    };
    metadata_reply(
        &headers,
        json!({ "access_token": format!("tok-{n}"), "expires_in": expires_in, "token_type": "Bearer" })
            .to_string(),
    )
}

async fn entries_write(
    State(state): State<Arc<FakeGcp>>,
    uri: Uri,
    headers: HeaderMap,
    body: Bytes,
) -> Response {
    if uri.path() != "/v2/entries:write" {
        return StatusCode::NOT_FOUND.into_response();
    }
    let authorization = headers
        .get(AUTHORIZATION)
        .and_then(|v| v.to_str().ok())
        .map(str::to_string);
    let body = serde_json::from_slice(&body).unwrap_or(Value::Null);
    state.writes.lock().unwrap().push(CapturedWrite {
        authorization,
        body,
    });

    match state.write_status.load(Ordering::SeqCst) {
        0 => Json(json!({})).into_response(),
        status => {
            let mut response = (
                StatusCode::from_u16(status).unwrap(),
                "rejected by fake logging API",
            )
                .into_response();
            match state.write_retry_after.load(Ordering::SeqCst) {
                0 => {}
                secs => {
                    response.headers_mut().insert(RETRY_AFTER, secs.into());
                }
            }
            response
        }
    }
}
