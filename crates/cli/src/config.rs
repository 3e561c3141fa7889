//! Process configuration.
//!
//! Sources, later overriding earlier:
//!
//! 1. built-in defaults;
//! 2. the TOML file named by `FORWARDER_CONFIG`, if set;
//! 3. `FORWARDER_*` environment variables (`FORWARDER_LOG_NAME`, ...);
//! 4. `PORT`, which Cloud Run sets for the container.

use std::collections::HashMap;
use std::net::{IpAddr, SocketAddr};
use std::time::Duration;

use anyhow::{bail, Context};
use ::config::{Config, Environment, File, FileFormat};
use forwarder::{LogName, ProjectId};
use gcp::{CloudLoggingConfig, DEFAULT_LOGGING_ENDPOINT};
use listener::{ListenerConfig, DEFAULT_BODY_LIMIT};
use serde::Deserialize;

pub const CONFIG_PATH_ENV: &str = "FORWARDER_CONFIG";
pub const CONFIG_ENV_PREFIX: &str = "FORWARDER";
pub const PORT_ENV: &str = "PORT";

/// Where forwarded entries are written.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum SinkKind {
    /// The Cloud Logging API of the resolved project.
    CloudLogging,
    /// Standard output, one JSON entry per line.
    Console,
}

/// Output format of the process's own diagnostics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogFormat {
    /// One JSON object per line.
    Json,
    /// Human-readable, for local runs.
    Pretty,
}

/// Settings for one forwarder process.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ForwarderConfig {
    /// Interface to listen on.
    pub host: IpAddr,
    /// Port to listen on. `PORT` overrides it.
    pub port: u16,
    /// Request path events are accepted on.
    pub path: String,
    /// Short name of the destination log.
    pub log_name: String,
    /// Skips the metadata server lookup when set.
    pub project_id: Option<String>,
    pub sink: SinkKind,
    /// Base URL of the Cloud Logging API.
    pub logging_endpoint: String,
    /// Per-request timeout against the metadata server.
    pub metadata_timeout_secs: u64,
    /// Per-request timeout against the Cloud Logging API.
    pub logging_timeout_secs: u64,
    /// Answer `200` instead of `422` for events that will never succeed.
    pub ack_non_retryable: bool,
    /// Largest accepted request body.
    pub body_limit_bytes: usize,
    /// Format of the process's own diagnostics.
    pub log_format: LogFormat,
    /// OTLP collector for traces; tracing export is off when unset.
    pub otlp_endpoint: Option<String>,
}

impl Default for ForwarderConfig {
    fn default() -> Self {
        Self {
            host: IpAddr::from([0, 0, 0, 0]),
            port: 8080,
            path: "/".to_string(),
            log_name: "audit-log-forwarder".to_string(),
            project_id: None,
            sink: SinkKind::CloudLogging,
            logging_endpoint: DEFAULT_LOGGING_ENDPOINT.to_string(),
            metadata_timeout_secs: 5,
            logging_timeout_secs: 10,
            ack_non_retryable: false,
            body_limit_bytes: DEFAULT_BODY_LIMIT,
            log_format: LogFormat::Json,
            otlp_endpoint: None,
        }
    }
}

impl ForwarderConfig {
    /// Loads configuration from the process environment.
    pub fn load() -> anyhow::Result<Self> {
        Self::load_from(std::env::vars().collect())
    }

    /// Loads configuration with `env` standing in for the process environment.
    pub fn load_from(env: HashMap<String, String>) -> anyhow::Result<Self> {
        let mut builder = Config::builder();

        if let Some(path) = env.get(CONFIG_PATH_ENV) {
            builder = builder.add_source(File::new(path, FileFormat::Toml).required(true));
        }

        let config: Self = builder
            .add_source(
                Environment::with_prefix(CONFIG_ENV_PREFIX)
                    .prefix_separator("_")
                    .try_parsing(true)
                    .source(Some(env.clone().into_iter().collect())),
            )
            .set_override_option("port", env.get(PORT_ENV).cloned())
            .context("invalid PORT override")?
            .build()
            .context("failed to read configuration")?
            .try_deserialize()
            .context("invalid configuration")?;

        config.validate()?;
        Ok(config)
    }

    fn validate(&self) -> anyhow::Result<()> {
        if !self.path.starts_with('/') {
            bail!("path '{}' must start with '/'", self.path);
        }
        if self.body_limit_bytes == 0 {
            bail!("body_limit_bytes must be greater than zero");
        }
        self.log_name()?;
        Ok(())
    }

    pub fn log_name(&self) -> anyhow::Result<LogName> {
        LogName::new(self.log_name.as_str())
            .with_context(|| format!("invalid log_name '{}'", self.log_name))
    }

    /// The configured project, if any. Blank values count as unset.
    pub fn project_id(&self) -> Option<ProjectId> {
        self.project_id.as_deref().and_then(ProjectId::new)
    }

    pub fn listener(&self) -> ListenerConfig {
        ListenerConfig {
            addr: SocketAddr::new(self.host, self.port),
            path: self.path.clone(),
            ack_non_retryable: self.ack_non_retryable,
            body_limit: self.body_limit_bytes,
        }
    }

    pub fn cloud_logging(&self) -> CloudLoggingConfig {
        CloudLoggingConfig {
            endpoint: self.logging_endpoint.clone(),
            timeout: Duration::from_secs(self.logging_timeout_secs),
        }
    }

    pub fn metadata_timeout(&self) -> Duration {
        Duration::from_secs(self.metadata_timeout_secs)
    }
}
