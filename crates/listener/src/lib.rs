//! CloudEvents push receiver.
//!
//! Binds an HTTP server, decodes each request as a CloudEvent and hands the
//! resulting [`forwarder::EventEnvelope`] to an
//! [`forwarder::AuditEventReceiver`]. Both HTTP bindings are accepted:
//!
//! | Mode | Recognised by | Data |
//! |------|---------------|------|
//! | Binary | `ce-*` headers | request body, `Content-Type` as data content type |
//! | Structured | `Content-Type: application/cloudevents+json` | the event's `data` / `data_base64` |
//!
//! The receiver's outcome decides the response status; see [`server`] for
//! the mapping.
//!
//! ## Architectural Layer
//!
//! **Infrastructure.** HTTP and CloudEvents wire details live here. The
//! [`forwarder`] crate sees only envelopes.

pub mod binding;
pub mod server;

pub use binding::{decode_request, to_envelope, BindingError};
pub use server::{router, CloudEventListener, ListenerConfig, ListenerError, DEFAULT_BODY_LIMIT};
