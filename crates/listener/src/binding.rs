//! CloudEvents HTTP protocol binding.
//!
//! Two request shapes are accepted:
//!
//! - **Structured mode**: `Content-Type: application/cloudevents+json`; the
//!   body is the whole event as JSON.
//! - **Binary mode**: attributes travel as `ce-*` headers, the body is the
//!   event data verbatim and `Content-Type` is its content type.
//!
//! Both are decoded by the SDK's HTTP binding. Batch mode is refused before
//! the SDK sees the request. The data is never interpreted here; whether it
//! decodes is the receiver's concern.

use axum::http::{header::CONTENT_TYPE, HeaderMap};
use cloudevents::binding::http::to_event;
use cloudevents::event::{AttributesReader, ExtensionValue};
use cloudevents::{Data, Event};
use forwarder::{EventEnvelope, Timestamp};
use thiserror::Error;

const BATCH_MEDIA_TYPE: &str = "application/cloudevents-batch+json";

/// Extension attribute carrying the pre-1.0 `datacontentencoding` value.
pub const DEPRECATED_ENCODING_EXTENSION: &str = "datacontentencoding";

/// A request that is not a well-formed CloudEvent.
#[derive(Debug, Error)]
pub enum BindingError {
    /// The request used the batched content mode.
    #[error("batched events are not supported")]
    Batch,

    /// The SDK could not read an event from the request.
    #[error("malformed event: {0}")]
    Malformed(#[from] cloudevents::message::Error),

    /// JSON event data could not be serialised back to bytes.
    #[error("malformed event data: {0}")]
    Data(#[from] serde_json::Error),
}

/// Decodes an HTTP request into a CloudEvent.
///
/// # Errors
///
/// Returns [`BindingError::Batch`] for batch requests and
/// [`BindingError::Malformed`] for anything the SDK rejects: missing or
/// invalid attributes, an unknown spec version, or a structured body that is
/// not a CloudEvent.
pub fn decode_request(headers: &HeaderMap, body: &[u8]) -> Result<Event, BindingError> {
    let is_batch = headers
        .get(CONTENT_TYPE)
        .and_then(|v| v.to_str().ok())
        .and_then(|ct| ct.split(';').next())
        .is_some_and(|media_type| media_type.trim().eq_ignore_ascii_case(BATCH_MEDIA_TYPE));
    if is_batch {
        return Err(BindingError::Batch);
    }

    Ok(to_event(headers, body.to_vec())?)
}

/// Copies a CloudEvent into the forwarder's envelope.
///
/// JSON data is re-serialised to bytes, string data is taken as UTF-8, and
/// binary data is copied verbatim.
///
/// # Errors
///
/// Returns [`BindingError::Data`] if JSON data cannot be serialised.
pub fn to_envelope(event: &Event) -> Result<EventEnvelope, BindingError> {
    let data = match event.data() {
        None => None,
        Some(Data::Binary(bytes)) => Some(bytes.clone()),
        Some(Data::String(text)) => Some(text.clone().into_bytes()),
        Some(Data::Json(value)) => Some(serde_json::to_vec(value)?),
    };

    Ok(EventEnvelope {
        spec_version: event.specversion().to_string(),
        event_type: event.ty().to_string(),
        source: event.source().to_string(),
        subject: event.subject().map(str::to_string),
        id: event.id().to_string(),
        time: event.time().map(|t| Timestamp::from_utc(*t)),
        data_schema: event.dataschema().map(|s| s.to_string()),
        data_content_type: event.datacontenttype().map(str::to_string),
        deprecated_data_content_encoding: event
            .extension(DEPRECATED_ENCODING_EXTENSION)
            .map(extension_text),
        data,
    })
}

fn extension_text(value: &ExtensionValue) -> String {
    match value {
        ExtensionValue::String(s) => s.clone(),
        ExtensionValue::Boolean(b) => b.to_string(),
        ExtensionValue::Integer(i) => i.to_string(),
    }
}
