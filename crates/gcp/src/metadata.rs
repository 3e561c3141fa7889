//! Metadata server client.
//!
//! Every GCE VM, GKE node, and Cloud Run instance can reach a metadata server
//! that answers plain-text queries about the deployment. Requests must carry
//! `Metadata-Flavor: Google`, and genuine responses echo it back; a response
//! without it came from something else (a captive proxy, a local dev server).

use std::time::{Duration, Instant};

use async_trait::async_trait;
use forwarder::{IdentityResolver, ProjectId, StartupError};
use serde::Deserialize;
use tracing::debug;

use crate::GcpError;

/// Environment variable overriding the metadata server host (`host[:port]`).
pub const METADATA_HOST_ENV: &str = "GCE_METADATA_HOST";

/// Metadata server host used when [`METADATA_HOST_ENV`] is unset.
pub const DEFAULT_METADATA_HOST: &str = "metadata.google.internal";

const METADATA_FLAVOR: &str = "Metadata-Flavor";
const PROJECT_ID_PATH: &str = "project/project-id";
const REGION_PATH: &str = "instance/region";
const TOKEN_PATH: &str = "instance/service-accounts/default/token";

/// OAuth access token for the instance's default service account.
#[derive(Debug, Clone)]
pub struct AccessToken {
    pub token: String,
    pub expires_at: Instant,
}

impl AccessToken {
    /// Returns `true` if the token stays valid for at least `margin`.
    pub fn is_fresh(&self, margin: Duration) -> bool {
        Instant::now() + margin < self.expires_at
    }
}

#[derive(Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: u64,
}

/// HTTP client for the metadata server.
#[derive(Debug, Clone)]
pub struct MetadataClient {
    http: reqwest::Client,
    base_url: String,
}

impl MetadataClient {
    /// Creates a client for the server at `base_url` (scheme and authority,
    /// e.g. `http://metadata.google.internal`).
    pub fn new(base_url: impl Into<String>, timeout: Duration) -> Result<Self, GcpError> {
        let http = reqwest::Client::builder().timeout(timeout).build()?;
        Ok(Self {
            http,
            base_url: base_url.into().trim_end_matches('/').to_string(),
        })
    }

    /// Creates a client for the host named by [`METADATA_HOST_ENV`], or
    /// [`DEFAULT_METADATA_HOST`].
    pub fn from_env(timeout: Duration) -> Result<Self, GcpError> {
        let host = std::env::var(METADATA_HOST_ENV)
            .ok()
            .filter(|h| !h.trim().is_empty())
            .unwrap_or_else(|| DEFAULT_METADATA_HOST.to_string());
        Self::new(format!("http://{host}"), timeout)
    }

    /// Fetches `computeMetadata/v1/<path>` as text.
    pub async fn get(&self, path: &str) -> Result<String, GcpError> {
        let url = format!(
            "{}/computeMetadata/v1/{}",
            self.base_url,
            path.trim_start_matches('/')
        );
        debug!(url = %url, "querying metadata server");

        let response = self
            .http
            .get(&url)
            .header(METADATA_FLAVOR, "Google")
            .send()
            .await?;

        let genuine = response
            .headers()
            .get(METADATA_FLAVOR)
            .is_some_and(|v| v.as_bytes() == b"Google");
        if !genuine {
            return Err(GcpError::NotOnGcp(format!(
                "{url} did not answer as a metadata server"
            )));
        }

        let status = response.status();
        let body = response.text().await?;
        if !status.is_success() {
            return Err(GcpError::Status {
                endpoint: url,
                status: status.as_u16(),
                body,
            });
        }
        Ok(body)
    }

    /// Returns the ID of the project the instance belongs to.
    pub async fn project_id(&self) -> Result<ProjectId, GcpError> {
        let body = self.get(PROJECT_ID_PATH).await?;
        ProjectId::new(body).ok_or_else(|| GcpError::InvalidResponse {
            endpoint: PROJECT_ID_PATH.to_string(),
            reason: "empty project ID".to_string(),
        })
    }

    /// Returns the region the instance runs in, e.g. `us-central1`.
    ///
    /// The server answers `projects/<number>/regions/<region>`; only the last
    /// segment is returned.
    pub async fn region(&self) -> Result<String, GcpError> {
        let body = self.get(REGION_PATH).await?;
        body.trim()
            .rsplit('/')
            .next()
            .filter(|r| !r.is_empty())
            .map(str::to_string)
            .ok_or_else(|| GcpError::InvalidResponse {
                endpoint: REGION_PATH.to_string(),
                reason: format!("unexpected region '{}'", body.trim()),
            })
    }

    /// Fetches a fresh access token for the default service account.
    pub async fn access_token(&self) -> Result<AccessToken, GcpError> {
        let body = self.get(TOKEN_PATH).await?;
        let parsed: TokenResponse =
            serde_json::from_str(&body).map_err(|e| GcpError::InvalidResponse {
                endpoint: TOKEN_PATH.to_string(),
                reason: e.to_string(),
            })?;
        let expires_at = Instant::now()
            .checked_add(Duration::from_secs(parsed.expires_in))
            .ok_or_else(|| GcpError::InvalidResponse {
                endpoint: TOKEN_PATH.to_string(),
                reason: format!("token lifetime of {}s is out of range", parsed.expires_in),
            })?;
        Ok(AccessToken {
            token: parsed.access_token,
            expires_at,
        })
    }
}

/// [`IdentityResolver`] asking the metadata server for the project ID.
#[derive(Debug, Clone)]
pub struct MetadataIdentityResolver {
    client: MetadataClient,
}

impl MetadataIdentityResolver {
    pub fn new(client: MetadataClient) -> Self {
        Self { client }
    }
}

#[async_trait]
impl IdentityResolver for MetadataIdentityResolver {
    async fn resolve_project_id(&self) -> Result<ProjectId, StartupError> {
        self.client
            .project_id()
            .await
            .map_err(|e| StartupError::IdentityResolution {
                message: e.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::Ordering;

    use super::*;
    use crate::test_server::{fake_metadata_router, spawn};

    const TIMEOUT: Duration = Duration::from_secs(2);

    #[tokio::test]
    async fn test_resolves_project_id() {
        let base = spawn(fake_metadata_router().0).await;
        let resolver = MetadataIdentityResolver::new(MetadataClient::new(base, TIMEOUT).unwrap());

        let project = resolver.resolve_project_id().await.unwrap();

        assert_eq!(project.as_str(), "proj-a");
    }

    #[tokio::test]
    async fn test_out_of_range_token_lifetime_is_invalid() {
        let (router, fake) = fake_metadata_router();
        fake.token_expires_in.store(u64::MAX, Ordering::SeqCst);
        let client = MetadataClient::new(spawn(router).await, TIMEOUT).unwrap();

        let err = client.access_token().await.unwrap_err();

        assert!(matches!(err, GcpError::InvalidResponse { .. }), "{err}");
    }

    #[tokio::test]
    async fn test_region_keeps_last_segment() {
        let base = spawn(fake_metadata_router().0).await;
        let client = MetadataClient::new(base, TIMEOUT).unwrap();

        assert_eq!(client.region().await.unwrap(), "us-central1");
    }

    #[tokio::test]
    async fn test_access_token_expiry() {
        let base = spawn(fake_metadata_router().0).await;
        let client = MetadataClient::new(base, TIMEOUT).unwrap();

        let token = client.access_token().await.unwrap();

        assert_eq!(token.token, "tok-1");
        assert!(token.is_fresh(Duration::from_secs(60)));
        assert!(!token.is_fresh(Duration::from_secs(7200)));
    }

    #[tokio::test]
    async fn test_unreachable_metadata_server_fails_resolution() {
        let client = MetadataClient::new("http://127.0.0.1:1", TIMEOUT).unwrap();
        let resolver = MetadataIdentityResolver::new(client);

        let err = resolver.resolve_project_id().await.unwrap_err();

        assert!(matches!(err, StartupError::IdentityResolution { .. }));
    }

    #[tokio::test]
    async fn test_response_without_flavor_header_is_rejected() {
        let router = axum::Router::new().route(
            "/computeMetadata/v1/project/project-id",
            axum::routing::get(|| async { "proj-a" }),
        );
        let base = spawn(router).await;
        let client = MetadataClient::new(base, TIMEOUT).unwrap();

        assert!(matches!(
            client.project_id().await,
            Err(GcpError::NotOnGcp(_))
        ));
    }
}
