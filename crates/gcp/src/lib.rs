//! Google Cloud infrastructure adapters.
//!
//! Implements the port traits defined in the [`forwarder`] crate:
//!
//! - [`MetadataIdentityResolver`]: [`forwarder::IdentityResolver`] backed by
//!   the GCE / Cloud Run metadata server.
//! - [`CloudLoggingSinkFactory`] / [`CloudLoggingSink`]:
//!   [`forwarder::LogSinkFactory`] and [`forwarder::LogSink`] over the Cloud
//!   Logging `entries:write` REST method, authenticated with the default
//!   service account's token from the metadata server.
//! - [`ConsoleSinkFactory`] / [`ConsoleSink`]: one JSON line per entry on
//!   stdout in the Cloud Run structured logging format. Used for local runs
//!   and wherever the platform already ships stdout to Cloud Logging.
//!
//! ## Architectural Layer
//!
//! **Infrastructure.** This crate must not contain domain rules. HTTP,
//! authentication, and wire formats are handled here; the [`forwarder`] crate
//! never sees them. [`GcpError`] is converted into the domain's
//! [`forwarder::StartupError`] and [`forwarder::SinkError`] at the port
//! boundary.

mod console;
mod errors;
mod logging;
mod metadata;

#[cfg(test)]
mod test_server;

pub use console::{ConsoleSink, ConsoleSinkFactory};
pub use errors::GcpError;
pub use logging::{
    detect_resource, CloudLoggingConfig, CloudLoggingSink, CloudLoggingSinkFactory,
    DEFAULT_LOGGING_ENDPOINT,
};
pub use metadata::{
    AccessToken, MetadataClient, MetadataIdentityResolver, DEFAULT_METADATA_HOST,
    METADATA_HOST_ENV,
};
