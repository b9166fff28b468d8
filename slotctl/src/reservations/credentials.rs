//! Access token sources for the BigQuery Reservation API.
//!
//! Setting up service accounts and IAM is out of scope here: we either get a token handed to us
//! through configuration, or ask the metadata server for the identity the workload already runs
//! as (Cloud Functions, Cloud Run, GCE, GKE with workload identity).

use async_trait::async_trait;
use serde::Deserialize;
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::Mutex;
use tokio::time::Instant;
use tracing::{debug, instrument};
use url::Url;

use super::{ReservationError, Result};
use crate::config::CredentialsConfig;

/// Tokens are refreshed this long before the metadata server says they expire
const EXPIRY_MARGIN: Duration = Duration::from_secs(60);

const TOKEN_PATH: &str = "computeMetadata/v1/instance/service-accounts/default/token";

/// Create a credentials source from configuration
pub fn create_credentials(config: &CredentialsConfig, client: reqwest::Client) -> anyhow::Result<Arc<dyn Credentials>> {
    match config {
        CredentialsConfig::MetadataServer { metadata_url } => {
            Ok(Arc::new(MetadataServerCredentials::new(client, metadata_url)?))
        }
        CredentialsConfig::Static { access_token } => Ok(Arc::new(StaticToken::new(access_token.clone()))),
    }
}

/// Something that can produce an OAuth2 bearer token
#[async_trait]
pub trait Credentials: Send + Sync {
    async fn access_token(&self) -> Result<String>;
}

/// A token that never changes
pub struct StaticToken(String);

impl StaticToken {
    pub fn new(token: impl Into<String>) -> Self {
        Self(token.into())
    }
}

#[async_trait]
impl Credentials for StaticToken {
    async fn access_token(&self) -> Result<String> {
        Ok(self.0.clone())
    }
}

#[derive(Debug, Deserialize)]
struct TokenResponse {
    access_token: String,
    expires_in: u64,
}

struct CachedToken {
    token: String,
    refresh_at: Instant,
}

/// Tokens for the default service account, from the GCE metadata server
pub struct MetadataServerCredentials {
    client: reqwest::Client,
    token_url: Url,
    cached: Mutex<Option<CachedToken>>,
}

impl MetadataServerCredentials {
    pub fn new(client: reqwest::Client, metadata_url: &Url) -> anyhow::Result<Self> {
        let token_url = super::bigquery::with_trailing_slash(metadata_url).join(TOKEN_PATH)?;
        Ok(Self {
            client,
            token_url,
            cached: Mutex::new(None),
        })
    }
}

#[async_trait]
impl Credentials for MetadataServerCredentials {
    #[instrument(skip(self), fields(token_url = %self.token_url), err)]
    async fn access_token(&self) -> Result<String> {
        // Held across the fetch so concurrent requests don't stampede the metadata server
        let mut cached = self.cached.lock().await;
        if let Some(token) = cached.as_ref()
            && Instant::now() < token.refresh_at
        {
            return Ok(token.token.clone());
        }

        let response = self
            .client
            .get(self.token_url.clone())
            .header("Metadata-Flavor", "Google")
            .send()
            .await
            .map_err(|e| ReservationError::Credentials(format!("metadata server unreachable: {e}")))?;

        let status = response.status();
        if !status.is_success() {
            let body = response.text().await.unwrap_or_default();
            return Err(ReservationError::Credentials(format!(
                "metadata server returned {status}: {body}"
            )));
        }

        let token: TokenResponse = response
            .json()
            .await
            .map_err(|e| ReservationError::Credentials(format!("malformed token response: {e}")))?;

        debug!(expires_in = token.expires_in, "Fetched access token from metadata server");

        let lifetime = Duration::from_secs(token.expires_in).saturating_sub(EXPIRY_MARGIN);
        // An expiry too far out to represent is not cached at all
        *cached = Instant::now().checked_add(lifetime).map(|refresh_at| CachedToken {
            token: token.access_token.clone(),
            refresh_at,
        });

        Ok(token.access_token)
    }
}
