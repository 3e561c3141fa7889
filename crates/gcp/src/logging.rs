//! Cloud Logging sink over the `entries:write` REST method.
//!
//! Each [`LogEntry`] becomes one `entries:write` call. Nothing is buffered:
//! when `write` returns `Ok`, the API has accepted the entry.

use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use forwarder::{
    LogEntry, LogName, LogPayload, LogSink, LogSinkFactory, MonitoredResource, ProjectId,
    Severity, SinkError, StartupError, Timestamp,
};
use reqwest::header::RETRY_AFTER;
use reqwest::StatusCode;
use serde::Serialize;
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};

use crate::{AccessToken, GcpError, MetadataClient};

/// Production Cloud Logging API endpoint.
pub const DEFAULT_LOGGING_ENDPOINT: &str = "https://logging.googleapis.com";

/// A cached token is replaced once it has less than this left to live.
const TOKEN_REFRESH_MARGIN: Duration = Duration::from_secs(60);

/// Settings for [`CloudLoggingSink`].
#[derive(Debug, Clone)]
pub struct CloudLoggingConfig {
    /// API base URL, without the `/v2/...` path.
    pub endpoint: String,
    /// Timeout applied to each `entries:write` request.
    pub timeout: Duration,
}

impl Default for CloudLoggingConfig {
    fn default() -> Self {
        Self {
            endpoint: DEFAULT_LOGGING_ENDPOINT.to_string(),
            timeout: Duration::from_secs(10),
        }
    }
}

/// Picks the monitored resource entries are attributed to.
///
/// On Cloud Run (`K_SERVICE` is set) this is the `cloud_run_revision` of the
/// running service; anywhere else it is `global`. `env` looks up environment
/// variables so callers can substitute a fixed set.
pub fn detect_resource(
    project_id: &ProjectId,
    region: Option<&str>,
    env: impl Fn(&str) -> Option<String>,
) -> MonitoredResource {
    let Some(service) = env("K_SERVICE") else {
        return MonitoredResource::new("global").with_label("project_id", project_id.as_str());
    };

    let mut resource = MonitoredResource::new("cloud_run_revision")
        .with_label("project_id", project_id.as_str())
        .with_label("service_name", service);
    for (label, var) in [
        ("revision_name", "K_REVISION"),
        ("configuration_name", "K_CONFIGURATION"),
    ] {
        if let Some(value) = env(var) {
            resource = resource.with_label(label, value);
        }
    }
    if let Some(region) = region {
        resource = resource.with_label("location", region);
    }
    resource
}

// ---------------------------------------------------------------------------
// Wire format
// ---------------------------------------------------------------------------

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct WriteEntriesRequest<'a> {
    log_name: &'a str,
    resource: &'a MonitoredResource,
    entries: [WireEntry; 1],
}

#[derive(Serialize)]
#[serde(rename_all = "camelCase")]
struct WireEntry {
    severity: Severity,
    timestamp: Timestamp,
    #[serde(skip_serializing_if = "BTreeMap::is_empty")]
    labels: BTreeMap<String, String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    json_payload: Option<Value>,
    #[serde(skip_serializing_if = "Option::is_none")]
    text_payload: Option<String>,
}

impl WireEntry {
    fn from_entry(entry: LogEntry) -> Result<Self, SinkError> {
        let (json_payload, text_payload) = match entry.payload {
            LogPayload::Text(line) => (None, Some(line)),
            structured => {
                let value = serde_json::to_value(&structured)
                    .map_err(|e| SinkError::Encode(e.to_string()))?;
                (Some(value), None)
            }
        };
        Ok(Self {
            severity: entry.severity,
            timestamp: entry.timestamp,
            labels: entry.labels,
            json_payload,
            text_payload,
        })
    }
}

// ---------------------------------------------------------------------------
// Sink
// ---------------------------------------------------------------------------

/// [`LogSink`] writing to one log of one project.
pub struct CloudLoggingSink {
    http: reqwest::Client,
    write_url: String,
    log_name: String,
    resource: MonitoredResource,
    metadata: MetadataClient,
    token: Mutex<Option<AccessToken>>,
}

impl CloudLoggingSink {
    pub fn new(
        config: &CloudLoggingConfig,
        metadata: MetadataClient,
        project_id: &ProjectId,
        log_name: &LogName,
        resource: MonitoredResource,
    ) -> Result<Self, GcpError> {
        let http = reqwest::Client::builder().timeout(config.timeout).build()?;
        Ok(Self {
            http,
            write_url: format!(
                "{}/v2/entries:write",
                config.endpoint.trim_end_matches('/')
            ),
            log_name: format!("projects/{project_id}/logs/{}", log_name.url_encoded()),
            resource,
            metadata,
            token: Mutex::new(None),
        })
    }

    /// Full resource name of the log, `projects/<id>/logs/<encoded name>`.
    pub fn log_name(&self) -> &str {
        &self.log_name
    }

    pub fn resource(&self) -> &MonitoredResource {
        &self.resource
    }

    /// Returns a token valid for at least the refresh margin, fetching a new
    /// one when the cached token is missing or about to expire.
    ///
    /// The lock is held across the fetch so concurrent writers share one
    /// refresh.
    async fn bearer_token(&self) -> Result<String, GcpError> {
        let mut cached = self.token.lock().await;
        if let Some(token) = cached.as_ref().filter(|t| t.is_fresh(TOKEN_REFRESH_MARGIN)) {
            return Ok(token.token.clone());
        }
        debug!("refreshing logging access token");
        let fresh = self.metadata.access_token().await?;
        let token = fresh.token.clone();
        *cached = Some(fresh);
        Ok(token)
    }

    async fn invalidate_token(&self) {
        *self.token.lock().await = None;
    }
}

impl std::fmt::Debug for CloudLoggingSink {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CloudLoggingSink")
            .field("write_url", &self.write_url)
            .field("log_name", &self.log_name)
            .field("resource", &self.resource)
            .finish_non_exhaustive()
    }
}

#[async_trait]
impl LogSink for CloudLoggingSink {
    async fn write(&self, entry: LogEntry) -> Result<(), SinkError> {
        let request = WriteEntriesRequest {
            log_name: &self.log_name,
            resource: &self.resource,
            entries: [WireEntry::from_entry(entry)?],
        };

        let token = self
            .bearer_token()
            .await
            .map_err(|e| e.into_sink_error(true))?;

        let response = self
            .http
            .post(&self.write_url)
            .bearer_auth(token)
            .json(&request)
            .send()
            .await
            .map_err(|e| GcpError::from(e).into_sink_error(false))?;

        let status = response.status();
        if status.is_success() {
            return Ok(());
        }

        let retry_after = match status {
            StatusCode::TOO_MANY_REQUESTS | StatusCode::SERVICE_UNAVAILABLE => response
                .headers()
                .get(RETRY_AFTER)
                .and_then(|v| v.to_str().ok())
                .and_then(parse_retry_after),
            _ => None,
        };
        let body = response.text().await.unwrap_or_default();
        if status == StatusCode::UNAUTHORIZED {
            self.invalidate_token().await;
            return Err(SinkError::Auth(format!("access token rejected: {body}")));
        }
        Err(SinkError::Rejected {
            status: status.as_u16(),
            message: body,
            retry_after,
        })
    }
}

/// Reads a `Retry-After` value given in delay-seconds. HTTP-date values are
/// ignored and leave the delay to the push transport.
fn parse_retry_after(value: &str) -> Option<Duration> {
    value.trim().parse().ok().map(Duration::from_secs)
}

// ---------------------------------------------------------------------------
// Factory
// ---------------------------------------------------------------------------

/// [`LogSinkFactory`] producing [`CloudLoggingSink`]s.
///
/// `open` fetches one access token before returning, so an instance without
/// a usable service account fails at startup rather than on the first event.
#[derive(Debug, Clone)]
pub struct CloudLoggingSinkFactory {
    config: CloudLoggingConfig,
    metadata: MetadataClient,
}

impl CloudLoggingSinkFactory {
    pub fn new(config: CloudLoggingConfig, metadata: MetadataClient) -> Self {
        Self { config, metadata }
    }
}

#[async_trait]
impl LogSinkFactory for CloudLoggingSinkFactory {
    async fn open(
        &self,
        project_id: &ProjectId,
        log_name: &LogName,
    ) -> Result<Arc<dyn LogSink>, StartupError> {
        let region = if std::env::var_os("K_SERVICE").is_some() {
            match self.metadata.region().await {
                Ok(region) => Some(region),
                Err(e) => {
                    warn!(error = %e, "could not determine region; omitting location label");
                    None
                }
            }
        } else {
            None
        };
        let resource = detect_resource(project_id, region.as_deref(), |key| {
            std::env::var(key).ok()
        });

        let sink = CloudLoggingSink::new(
            &self.config,
            self.metadata.clone(),
            project_id,
            log_name,
            resource,
        )
        .map_err(|e| StartupError::SessionConstruction {
            message: e.to_string(),
        })?;

        sink.bearer_token()
            .await
            .map_err(|e| StartupError::SessionConstruction {
                message: e.to_string(),
            })?;

        info!(
            log_name = %sink.log_name(),
            resource_type = %sink.resource().resource_type,
            "cloud logging sink ready"
        );
        Ok(Arc::new(sink))
    }
}
