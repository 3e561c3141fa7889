//! Audit log forwarder entry point.
//!
//! This binary is the composition root. Responsibilities:
//!
//! 1. **Load configuration** from defaults, an optional TOML file and the
//!    environment (see [`config`]).
//! 2. **Wire observability**: `tracing-subscriber` with a JSON layer and an
//!    optional OpenTelemetry OTLP exporter.
//! 3. **Open the logging session**: resolve the project identity (configured,
//!    or from the metadata server) and open the configured sink. Failure here
//!    is fatal and the process exits non-zero.
//! 4. **Serve** pushed events until SIGINT or SIGTERM.

mod config;
mod telemetry;

use std::sync::Arc;

use anyhow::Context;
use forwarder::{
    AuditEventReceiver, FixedIdentity, IdentityResolver, LogSession, LogSinkFactory,
};
use gcp::{CloudLoggingSinkFactory, ConsoleSinkFactory, MetadataClient, MetadataIdentityResolver};
use listener::CloudEventListener;
use tracing::{error, info};

use crate::config::{ForwarderConfig, SinkKind};

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let config = ForwarderConfig::load()?;
    let _telemetry = telemetry::init(config.log_format, config.otlp_endpoint.as_deref())?;

    let session = match open_session(&config).await {
        Ok(session) => session,
        Err(e) => {
            error!(error = %format!("{e:#}"), "failed to open logging session");
            return Err(e);
        }
    };
    let diagnostics = session.diagnostics();

    let listener = CloudEventListener::bind(
        &config.listener(),
        AuditEventReceiver::from_session(&session),
    )
    .await
    .context("failed to start event listener")?;

    diagnostics
        .line(format!("Listening on {}", listener.local_addr()))
        .await;

    if let Err(e) = listener.run(shutdown_signal()).await {
        diagnostics.line(format!("Server stopped: {e}")).await;
        return Err(e).context("event listener failed");
    }

    info!("shut down");
    Ok(())
}

async fn open_session(config: &ForwarderConfig) -> anyhow::Result<LogSession> {
    let log_name = config.log_name()?;
    let metadata = MetadataClient::from_env(config.metadata_timeout())
        .context("failed to build metadata client")?;

    let resolver: Box<dyn IdentityResolver> = match config.project_id() {
        Some(project_id) => {
            info!(project_id = %project_id, "using configured project");
            Box::new(FixedIdentity::new(project_id))
        }
        None => Box::new(MetadataIdentityResolver::new(metadata.clone())),
    };

    let factory: Arc<dyn LogSinkFactory> = match config.sink {
        SinkKind::CloudLogging => Arc::new(CloudLoggingSinkFactory::new(
            config.cloud_logging(),
            metadata,
        )),
        SinkKind::Console => Arc::new(ConsoleSinkFactory),
    };

    Ok(LogSession::initialize(resolver.as_ref(), factory.as_ref(), log_name).await?)
}

async fn shutdown_signal() {
    let ctrl_c = async {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "failed to listen for ctrl-c");
            std::future::pending::<()>().await;
        }
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut signal) => {
                signal.recv().await;
            }
            Err(e) => {
                error!(error = %e, "failed to listen for SIGTERM");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => {},
        _ = terminate => {},
    }
    info!("shutdown signal received");
}
